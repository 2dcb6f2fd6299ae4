//! Various small helper functions

use serde_json::Value;
use std::num::ParseIntError;
use std::time::Duration;

/// Parses a Duration from a string containing seconds.
/// Useful for command line parsing
pub fn parse_seconds(src: &str) -> Result<Duration, ParseIntError> {
    let seconds = src.parse::<u64>()?;
    Ok(Duration::from_secs(seconds))
}

/// Parses a Duration from a string containing milliseconds
pub fn parse_millis(src: &str) -> Result<Duration, ParseIntError> {
    let millis = src.parse::<u64>()?;
    Ok(Duration::from_millis(millis))
}

/// Parses a JSON document given on the command line
pub fn parse_json(src: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(src)
}

/// Removes duplicate entries while retaining the order of first occurrence
pub fn dedup_ordered<I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = Vec::new();

    for item in items {
        if !seen.contains(&item) {
            seen.push(item);
        }
    }

    seen
}
