//! `grpc-timeout` header parsing.
//!
//! The value is at most eight ASCII digits followed by one unit character:
//! `H` hours, `M` minutes, `S` seconds, `m` milliseconds, `u` microseconds or
//! `n` nanoseconds.

use core::time::Duration;

const MAX_DIGITS: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TimeoutError {
    #[error("grpc-timeout is empty")]
    Empty,

    #[error("grpc-timeout has {0} digits, at most 8 are allowed")]
    TooLong(usize),

    #[error("grpc-timeout value is not a number: {0:?}")]
    NotANumber(String),

    #[error("grpc-timeout has an unknown unit: {0:?}")]
    UnknownUnit(char),
}

pub fn parse_grpc_timeout(value: &str) -> Result<Duration, TimeoutError> {
    let unit = value.chars().last().ok_or(TimeoutError::Empty)?;
    let digits = &value[..value.len() - unit.len_utf8()];

    if digits.is_empty() {
        return Err(TimeoutError::NotANumber(value.to_owned()));
    }
    if digits.len() > MAX_DIGITS {
        return Err(TimeoutError::TooLong(digits.len()));
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TimeoutError::NotANumber(digits.to_owned()));
    }
    let amount: u64 = digits
        .parse()
        .map_err(|_| TimeoutError::NotANumber(digits.to_owned()))?;

    let duration = match unit {
        'H' => Duration::from_secs(amount * 60 * 60),
        'M' => Duration::from_secs(amount * 60),
        'S' => Duration::from_secs(amount),
        'm' => Duration::from_millis(amount),
        'u' => Duration::from_micros(amount),
        'n' => Duration::from_nanos(amount),
        other => return Err(TimeoutError::UnknownUnit(other)),
    };
    Ok(duration)
}
