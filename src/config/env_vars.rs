use std::env;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use log::debug;

use crate::constants::MIB;

/// Read and parse an environment override.
///
/// Unset or empty variables yield `Ok(None)`; a value that does not parse is
/// an error naming the variable rather than a silent fallback.
pub fn env_override<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => {
            let parsed = raw
                .trim()
                .parse::<T>()
                .map_err(|e| anyhow!("Invalid value '{}' for {}: {}", raw, name, e))?;
            debug!("Using {} from environment", name);
            Ok(Some(parsed))
        }
        _ => Ok(None),
    }
}

pub fn mb_to_bytes(mb: u64) -> u64 {
    mb.saturating_mul(MIB)
}
