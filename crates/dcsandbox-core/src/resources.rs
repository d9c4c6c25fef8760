//! Resource limit validation
//!
//! Memory strings follow `^\d+[KMGT]?$` (case-insensitive), CPU is a
//! fractional core count, timeouts are minutes.

use crate::{EngineError, Result};

/// Upper bound for the CPU limit, in cores
pub const CPU_MAX_CORES: f64 = 32.0;

/// Minimum sandbox timeout in minutes
pub const TIMEOUT_MIN_MINUTES: u64 = 30;

/// Maximum sandbox timeout in minutes
pub const TIMEOUT_MAX_MINUTES: u64 = 3600;

/// Parse a memory string into bytes.
///
/// No unit means bytes; K/M/G/T are binary multiples. Zero is rejected.
pub fn parse_memory_bytes(input: &str) -> Result<u64> {
    let s = input.trim();
    if s.is_empty() {
        return Err(EngineError::InvalidMemory(input.to_string()));
    }

    let (digits, multiplier) = match s.chars().last() {
        Some(c) if c.is_ascii_digit() => (s, 1u64),
        Some(c) => {
            let mult = match c.to_ascii_uppercase() {
                'K' => 1u64 << 10,
                'M' => 1u64 << 20,
                'G' => 1u64 << 30,
                'T' => 1u64 << 40,
                _ => return Err(EngineError::InvalidMemory(input.to_string())),
            };
            (&s[..s.len() - 1], mult)
        }
        None => return Err(EngineError::InvalidMemory(input.to_string())),
    };

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(EngineError::InvalidMemory(input.to_string()));
    }

    let value: u64 = digits
        .parse()
        .map_err(|_| EngineError::InvalidMemory(input.to_string()))?;

    let bytes = value
        .checked_mul(multiplier)
        .ok_or_else(|| EngineError::InvalidMemory(input.to_string()))?;

    if bytes == 0 {
        return Err(EngineError::InvalidMemory(input.to_string()));
    }

    Ok(bytes)
}

/// Validate a CPU core count and convert to millicores
pub fn cpu_millicores(cpu: f64) -> Result<u64> {
    if !cpu.is_finite() || cpu < 1.0 || cpu > CPU_MAX_CORES {
        return Err(EngineError::InvalidCpu(cpu, CPU_MAX_CORES));
    }
    Ok((cpu * 1000.0).round() as u64)
}

/// Nano-CPUs for the runtime: cores × 10^9 = millicores × 10^6
pub fn millicores_to_nano_cpus(millicores: u64) -> i64 {
    (millicores as i64) * 1_000_000
}

/// Validate a timeout in minutes and convert to seconds
pub fn timeout_seconds(minutes: u64) -> Result<u64> {
    if !(TIMEOUT_MIN_MINUTES..=TIMEOUT_MAX_MINUTES).contains(&minutes) {
        return Err(EngineError::InvalidTimeout(minutes));
    }
    Ok(minutes * 60)
}

/// Validate a sandbox name: non-empty, filesystem- and DNS-friendly
pub fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        && name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(EngineError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_units() {
        assert_eq!(parse_memory_bytes("512").unwrap(), 512);
        assert_eq!(parse_memory_bytes("1K").unwrap(), 1024);
        assert_eq!(parse_memory_bytes("2M").unwrap(), 2 << 20);
        assert_eq!(parse_memory_bytes("2G").unwrap(), 2 << 30);
        assert_eq!(parse_memory_bytes("1T").unwrap(), 1 << 40);
        // Case-insensitive
        assert_eq!(parse_memory_bytes("2g").unwrap(), 2 << 30);
    }

    #[test]
    fn test_memory_rejects_bad_grammar() {
        assert!(parse_memory_bytes("").is_err());
        assert!(parse_memory_bytes("0").is_err());
        assert!(parse_memory_bytes("1KB").is_err());
        assert!(parse_memory_bytes("1 G").is_err());
        assert!(parse_memory_bytes("G").is_err());
        assert!(parse_memory_bytes("-1G").is_err());
        assert!(parse_memory_bytes("1.5G").is_err());
    }

    #[test]
    fn test_cpu_bounds() {
        assert_eq!(cpu_millicores(1.0).unwrap(), 1000);
        assert_eq!(cpu_millicores(2.5).unwrap(), 2500);
        assert_eq!(cpu_millicores(32.0).unwrap(), 32_000);

        assert!(cpu_millicores(0.0).is_err());
        assert!(cpu_millicores(-1.0).is_err());
        assert!(cpu_millicores(33.0).is_err());
        assert!(cpu_millicores(f64::NAN).is_err());
    }

    #[test]
    fn test_nano_cpus() {
        // 2 cores = 2 × 10^9 nano-CPUs
        assert_eq!(millicores_to_nano_cpus(2000), 2_000_000_000);
        assert_eq!(millicores_to_nano_cpus(500), 500_000_000);
    }

    #[test]
    fn test_timeout_bounds() {
        assert_eq!(timeout_seconds(30).unwrap(), 1800);
        assert_eq!(timeout_seconds(120).unwrap(), 7200);
        assert_eq!(timeout_seconds(3600).unwrap(), 216_000);

        assert!(timeout_seconds(29).is_err());
        assert!(timeout_seconds(0).is_err());
        assert!(timeout_seconds(3601).is_err());
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_name("s1").is_ok());
        assert!(validate_name("my-sandbox_2").is_ok());

        assert!(validate_name("").is_err());
        assert!(validate_name("-leading").is_err());
        assert!(validate_name("has space").is_err());
        assert!(validate_name("dot.name").is_err());
        assert!(validate_name(&"x".repeat(64)).is_err());
    }
}
