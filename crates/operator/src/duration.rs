//! Signed relative durations such as `-24h`, `1h30m` or `-1.5h`.
//!
//! Thresholds are written the way operators already write them in Kubernetes
//! manifests: an optional sign followed by one or more decimal numbers, each
//! with a unit suffix (`ns`, `us`, `µs`, `ms`, `s`, `m`, `h`).

use chrono::TimeDelta;

/// Reasons a duration string was rejected
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DurationError {
    /// Nothing to parse
    #[error("empty duration")]
    Empty,

    /// A component had no number in front of its unit
    #[error("invalid duration {0:?}")]
    Invalid(String),

    /// A number was not followed by a unit
    #[error("missing unit in duration {0:?}")]
    MissingUnit(String),

    /// Unit suffix is not recognised
    #[error("unknown unit {unit:?} in duration {input:?}")]
    UnknownUnit {
        /// The offending suffix
        unit: String,
        /// The full input
        input: String,
    },

    /// The value does not fit in signed 64-bit nanoseconds
    #[error("duration {0:?} out of range")]
    Overflow(String),
}

const NANOS_PER_UNIT: &[(&str, u128)] = &[
    ("ns", 1),
    ("us", 1_000),
    ("µs", 1_000),
    ("μs", 1_000),
    ("ms", 1_000_000),
    ("s", 1_000_000_000),
    ("m", 60 * 1_000_000_000),
    ("h", 60 * 60 * 1_000_000_000),
];

fn unit_nanos(unit: &str) -> Option<u128> {
    NANOS_PER_UNIT
        .iter()
        .find(|(name, _)| *name == unit)
        .map(|(_, nanos)| *nanos)
}

/// Parses a signed duration string into a [`TimeDelta`].
///
/// # Errors
///
/// Returns a [`DurationError`] describing the first malformed component.
pub fn parse(input: &str) -> Result<TimeDelta, DurationError> {
    let invalid = || DurationError::Invalid(input.to_string());

    let (negative, mut rest) = match input.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, input.strip_prefix('+').unwrap_or(input)),
    };

    if rest.is_empty() {
        return Err(if input.is_empty() {
            DurationError::Empty
        } else {
            invalid()
        });
    }

    // A bare zero is the only value allowed without a unit.
    if rest == "0" {
        return Ok(TimeDelta::zero());
    }

    let mut total: u128 = 0;

    while !rest.is_empty() {
        let int_len = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let (int_part, after_int) = rest.split_at(int_len);

        let (frac_part, after_number) = match after_int.strip_prefix('.') {
            Some(frac) => {
                let frac_len = frac.find(|c: char| !c.is_ascii_digit()).unwrap_or(frac.len());
                frac.split_at(frac_len)
            }
            None => ("", after_int),
        };

        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }

        let unit_len = after_number
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(after_number.len());
        let (unit, remainder) = after_number.split_at(unit_len);

        if unit.is_empty() {
            return Err(DurationError::MissingUnit(input.to_string()));
        }

        let nanos = unit_nanos(unit).ok_or_else(|| DurationError::UnknownUnit {
            unit: unit.to_string(),
            input: input.to_string(),
        })?;

        let overflow = || DurationError::Overflow(input.to_string());

        let whole = if int_part.is_empty() {
            0
        } else {
            int_part.parse::<u128>().map_err(|_| overflow())?
        };
        let mut component = whole.checked_mul(nanos).ok_or_else(overflow)?;

        // Digits past nanosecond precision carry no weight.
        let frac_digits = &frac_part[..frac_part.len().min(18)];
        if !frac_digits.is_empty() {
            let scale = 10u128.pow(u32::try_from(frac_digits.len()).map_err(|_| overflow())?);
            let frac = frac_digits.parse::<u128>().map_err(|_| overflow())?;
            component += frac * nanos / scale;
        }

        total = total.checked_add(component).ok_or_else(overflow)?;
        if total > i64::MAX as u128 {
            return Err(overflow());
        }

        rest = remainder;
    }

    let nanos = i64::try_from(total).map_err(|_| DurationError::Overflow(input.to_string()))?;

    Ok(if negative {
        TimeDelta::nanoseconds(-nanos)
    } else {
        TimeDelta::nanoseconds(nanos)
    })
}
