//! Decode the human-readable magnitudes printed by `zpool iostat` (e.g. "94.5K", "200M", "0")
//!
//! Units are decimal (`K` = 1000), matching the scaled columns of the default output.

use std::num::ParseFloatError;

const UNITS: [(char, f64); 4] = [('K', 1e3), ('M', 1e6), ('G', 1e9), ('T', 1e12)];

/// Failure to interpret a magnitude string
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The numeric portion is not a number
    #[error("invalid number {input:?}")]
    Parse {
        /// Full magnitude string
        input: String,
        /// Underlying float parse failure
        #[source]
        source: ParseFloatError,
    },
    /// The alphabetic suffix is not a known unit
    #[error("unknown unit {suffix:?} in {input:?}")]
    UnknownUnit {
        /// Full magnitude string
        input: String,
        /// Offending suffix
        suffix: char,
    },
}

/// Converts a magnitude (with optional unit suffix) to a plain count
///
/// - Single characters are always plain numbers, never a unit
/// - All but the last character must be a (possibly fractional) number
/// - A trailing letter is a unit, applied to that prefix
/// - Anything else is a plain number (e.g. "310", already in bytes or operations)
///
/// # Errors
/// Returns an error if the number is malformed, or the suffix is not one of `K`, `M`, `G`, `T`
pub fn decode(size: &str) -> Result<f64, DecodeError> {
    let parse = |number: &str| {
        number.parse::<f64>().map_err(|source| DecodeError::Parse {
            input: size.to_string(),
            source,
        })
    };

    let mut chars = size.chars();
    let Some(suffix) = chars.next_back() else {
        // empty string
        return parse(size);
    };
    let prefix = chars.as_str();
    if prefix.is_empty() {
        return parse(size);
    }

    // prefix must be numeric, with or without a unit
    let magnitude = parse(prefix)?;
    if !suffix.is_alphabetic() {
        return parse(size);
    }
    let Some(&(_, multiplier)) = UNITS.iter().find(|&&(unit, _)| unit == suffix) else {
        return Err(DecodeError::UnknownUnit {
            input: size.to_string(),
            suffix,
        });
    };
    Ok(magnitude * multiplier)
}
