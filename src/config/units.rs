//! Conversion of user units into provider units.
//!
//! CPU is given in cores and becomes provider CPU units (1024 per core).
//! Memory is a size expression and becomes MiB. Health check intervals
//! are time expressions and become whole seconds. Every conversion rounds
//! up so the provider never receives less than was asked for.

use crate::error::ConfigError;

const KIB: f64 = 1024.0;
const MIB: f64 = 1024.0 * 1024.0;

/// Converts CPU cores to provider CPU units.
///
/// # Errors
///
/// Returns an error if `cores` is not a positive finite number or overflows.
pub fn cpu_units(cores: f64) -> Result<u32, ConfigError> {
    if !cores.is_finite() || cores <= 0.0 {
        return Err(ConfigError::invalid_unit(
            "cpu",
            cores.to_string(),
            "must be a positive number of cores",
        ));
    }
    to_u32("cpu", &cores.to_string(), (cores * 1024.0).ceil())
}

/// Converts a memory expression (`512m`, `1g`, `256MB`, `1.5GiB`) to MiB.
///
/// Units are binary. A bare number is a byte count.
///
/// # Errors
///
/// Returns an error if the expression cannot be parsed or is not positive.
pub fn memory_mib(expression: &str) -> Result<u32, ConfigError> {
    let invalid = |reason: &str| ConfigError::invalid_unit("memory", expression, reason);

    let trimmed = expression.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);

    let value: f64 = number.parse().map_err(|_| invalid("expected a number"))?;
    let bytes = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => value,
        "k" | "kb" | "ki" | "kib" => value * KIB,
        "m" | "mb" | "mi" | "mib" => value * MIB,
        "g" | "gb" | "gi" | "gib" => value * MIB * KIB,
        "t" | "tb" | "ti" | "tib" => value * MIB * MIB,
        _ => return Err(invalid("unknown size unit")),
    };

    if bytes <= 0.0 {
        return Err(invalid("must be positive"));
    }
    to_u32("memory", expression, (bytes / MIB).ceil())
}

/// Converts a time expression (`30s`, `1m30s`, `500ms`, `2h`) to whole seconds.
///
/// A bare number is a count of seconds.
///
/// # Errors
///
/// Returns an error if the expression cannot be parsed.
pub fn duration_secs(expression: &str) -> Result<u32, ConfigError> {
    let invalid = |reason: &str| ConfigError::invalid_unit("duration", expression, reason);

    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty duration"));
    }
    if let Ok(seconds) = trimmed.parse::<f64>() {
        if seconds < 0.0 {
            return Err(invalid("must not be negative"));
        }
        return to_u32("duration", expression, seconds.ceil());
    }

    let mut total_ms = 0.0;
    let mut rest = trimmed;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| invalid("missing unit"))?;
        if number_end == 0 {
            return Err(invalid("expected a number"));
        }
        let value: f64 = rest[..number_end]
            .parse()
            .map_err(|_| invalid("expected a number"))?;
        rest = &rest[number_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let factor = match &rest[..unit_end] {
            "h" => 3_600_000.0,
            "m" => 60_000.0,
            "s" => 1000.0,
            "ms" => 1.0,
            _ => return Err(invalid("unknown time unit")),
        };
        total_ms += value * factor;
        rest = &rest[unit_end..];
    }

    to_u32("duration", expression, (total_ms / 1000.0).ceil())
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_u32(field: &str, expression: &str, value: f64) -> Result<u32, ConfigError> {
    if value > f64::from(u32::MAX) {
        return Err(ConfigError::invalid_unit(field, expression, "value too large"));
    }
    Ok(value as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_rounds_up() {
        assert_eq!(cpu_units(1.0).unwrap(), 1024);
        assert_eq!(cpu_units(0.5).unwrap(), 512);
        assert_eq!(cpu_units(0.3).unwrap(), 308);
        assert!(cpu_units(0.0).is_err());
        assert!(cpu_units(f64::NAN).is_err());
    }

    #[test]
    fn test_memory_expressions() {
        assert_eq!(memory_mib("512m").unwrap(), 512);
        assert_eq!(memory_mib("256MB").unwrap(), 256);
        assert_eq!(memory_mib("1g").unwrap(), 1024);
        assert_eq!(memory_mib("1.5GiB").unwrap(), 1536);
        assert_eq!(memory_mib("1048577").unwrap(), 2);
        assert!(memory_mib("lots").is_err());
        assert!(memory_mib("12 parsecs").is_err());
    }

    #[test]
    fn test_durations() {
        assert_eq!(duration_secs("30s").unwrap(), 30);
        assert_eq!(duration_secs("1m30s").unwrap(), 90);
        assert_eq!(duration_secs("500ms").unwrap(), 1);
        assert_eq!(duration_secs("15").unwrap(), 15);
        assert_eq!(duration_secs("2h").unwrap(), 7200);
        assert!(duration_secs("soon").is_err());
        assert!(duration_secs("10x").is_err());
    }
}
