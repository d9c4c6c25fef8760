//! Duration grammar for cleanup settings
//!
//! Values like `30m`, `2h`, `7d` as used by `cleanup.inactiveTimeout`.

use crate::{ConfigError, Result};
use std::time::Duration;

/// Parse a duration of the form `<number>{s,m,h,d}`.
///
/// A bare number is rejected; the unit suffix is required so config files
/// stay unambiguous.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    if s.len() < 2 {
        return Err(ConfigError::InvalidDuration(input.to_string()));
    }

    let (digits, unit) = s.split_at(s.len() - 1);
    let value: u64 = digits
        .parse()
        .map_err(|_| ConfigError::InvalidDuration(input.to_string()))?;

    let secs = match unit {
        "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        "d" => value * 86_400,
        _ => return Err(ConfigError::InvalidDuration(input.to_string())),
    };

    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_duration("45s").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_parse_trims_whitespace() {
        assert_eq!(parse_duration(" 5m ").unwrap(), Duration::from_secs(300));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5").is_err());
        assert!(parse_duration("m").is_err());
        assert!(parse_duration("5w").is_err());
        assert!(parse_duration("-5m").is_err());
        assert!(parse_duration("5.5h").is_err());
    }
}
