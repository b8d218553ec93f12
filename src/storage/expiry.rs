//! Expiry Policy Resolution
//!
//! `SET key value <POLICY> <N>` carries its expiry as a policy token and a
//! number. This module turns that pair into the absolute [`Instant`] stored
//! on the entry.
//!
//! | token  | meaning                      |
//! |--------|------------------------------|
//! | `EX`   | now + N seconds              |
//! | `PX`   | now + N milliseconds         |
//! | `EXAT` | absolute Unix time, seconds  |
//! | `PXAT` | absolute Unix time, millis   |
//!
//! Instants are monotonic, so absolute Unix times are converted against the
//! wall clock once, when the command runs. A time that is already in the past
//! resolves to "now", which the engine treats as expired.

use std::str::FromStr;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Errors produced while resolving an expiry argument.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExpiryError {
    /// Policy token or its value was not supplied
    #[error("ERR expiry policy and value are both required")]
    MissingArgument,

    /// Token other than EX, PX, EXAT or PXAT
    #[error("ERR unknown expiry policy '{0}'")]
    UnknownPolicy(String),

    /// Value is not a base-10 integer
    #[error("ERR invalid expire time '{0}'")]
    InvalidValue(String),

    /// Value does not fit in the clock's range
    #[error("ERR expire time out of range")]
    OutOfRange,
}

/// How a SET expiry argument should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryPolicy {
    /// Relative, seconds
    Ex,
    /// Relative, milliseconds
    Px,
    /// Absolute Unix timestamp, seconds
    ExAt,
    /// Absolute Unix timestamp, milliseconds
    PxAt,
}

impl FromStr for ExpiryPolicy {
    type Err = ExpiryError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token.to_ascii_uppercase().as_str() {
            "EX" => Ok(ExpiryPolicy::Ex),
            "PX" => Ok(ExpiryPolicy::Px),
            "EXAT" => Ok(ExpiryPolicy::ExAt),
            "PXAT" => Ok(ExpiryPolicy::PxAt),
            _ => Err(ExpiryError::UnknownPolicy(token.to_string())),
        }
    }
}

impl ExpiryPolicy {
    /// Computes the expiry instant for `amount` relative to the given clocks.
    ///
    /// `now` and `wall_now` must describe the same moment; taking them as
    /// arguments keeps the arithmetic testable.
    pub fn resolve_at(
        self,
        amount: i64,
        now: Instant,
        wall_now: SystemTime,
    ) -> Result<Instant, ExpiryError> {
        match self {
            ExpiryPolicy::Ex => offset_from(now, amount, Duration::from_secs),
            ExpiryPolicy::Px => offset_from(now, amount, Duration::from_millis),
            ExpiryPolicy::ExAt => absolute(now, wall_now, amount, Duration::from_secs),
            ExpiryPolicy::PxAt => absolute(now, wall_now, amount, Duration::from_millis),
        }
    }

    /// Computes the expiry instant for `amount` from the current time.
    pub fn resolve(self, amount: i64) -> Result<Instant, ExpiryError> {
        self.resolve_at(amount, Instant::now(), SystemTime::now())
    }
}

/// Parses a policy token and its numeric argument into an expiry instant.
///
/// Either argument may be absent (for example when a request was cut short);
/// that is reported as [`ExpiryError::MissingArgument`].
pub fn resolve_expiry(token: Option<&str>, amount: Option<&str>) -> Result<Instant, ExpiryError> {
    let (token, amount) = match (token, amount) {
        (Some(t), Some(a)) if !t.is_empty() && !a.is_empty() => (t, a),
        _ => return Err(ExpiryError::MissingArgument),
    };

    let policy: ExpiryPolicy = token.parse()?;
    let amount: i64 = amount
        .parse()
        .map_err(|_| ExpiryError::InvalidValue(amount.to_string()))?;

    policy.resolve(amount)
}

fn offset_from(
    now: Instant,
    amount: i64,
    unit: fn(u64) -> Duration,
) -> Result<Instant, ExpiryError> {
    // Zero or negative offsets are already expired.
    if amount <= 0 {
        return Ok(now);
    }
    now.checked_add(unit(amount as u64))
        .ok_or(ExpiryError::OutOfRange)
}

fn absolute(
    now: Instant,
    wall_now: SystemTime,
    amount: i64,
    unit: fn(u64) -> Duration,
) -> Result<Instant, ExpiryError> {
    if amount <= 0 {
        return Ok(now);
    }
    let target = UNIX_EPOCH
        .checked_add(unit(amount as u64))
        .ok_or(ExpiryError::OutOfRange)?;

    match target.duration_since(wall_now) {
        Ok(remaining) => now.checked_add(remaining).ok_or(ExpiryError::OutOfRange),
        Err(_) => Ok(now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clocks() -> (Instant, SystemTime) {
        (Instant::now(), UNIX_EPOCH + Duration::from_secs(1_700_000_000))
    }

    #[test]
    fn test_relative_policies() {
        let (now, wall) = clocks();

        let at = ExpiryPolicy::Ex.resolve_at(10, now, wall).unwrap();
        assert_eq!(at - now, Duration::from_secs(10));

        let at = ExpiryPolicy::Px.resolve_at(1500, now, wall).unwrap();
        assert_eq!(at - now, Duration::from_millis(1500));
    }

    #[test]
    fn test_absolute_policies() {
        let (now, wall) = clocks();

        let at = ExpiryPolicy::ExAt
            .resolve_at(1_700_000_060, now, wall)
            .unwrap();
        assert_eq!(at - now, Duration::from_secs(60));

        let at = ExpiryPolicy::PxAt
            .resolve_at(1_700_000_000_250, now, wall)
            .unwrap();
        assert_eq!(at - now, Duration::from_millis(250));
    }

    #[test]
    fn test_past_and_zero_resolve_to_now() {
        let (now, wall) = clocks();

        assert_eq!(ExpiryPolicy::Ex.resolve_at(0, now, wall).unwrap(), now);
        assert_eq!(ExpiryPolicy::Px.resolve_at(-5, now, wall).unwrap(), now);
        assert_eq!(
            ExpiryPolicy::ExAt.resolve_at(1_600_000_000, now, wall).unwrap(),
            now
        );
    }

    #[test]
    fn test_policy_tokens_are_case_insensitive() {
        assert_eq!("ex".parse::<ExpiryPolicy>().unwrap(), ExpiryPolicy::Ex);
        assert_eq!("PxAt".parse::<ExpiryPolicy>().unwrap(), ExpiryPolicy::PxAt);
    }

    #[test]
    fn test_resolve_expiry_validation() {
        assert_eq!(
            resolve_expiry(Some("EX"), None),
            Err(ExpiryError::MissingArgument)
        );
        assert_eq!(
            resolve_expiry(Some(""), Some("10")),
            Err(ExpiryError::MissingArgument)
        );
        assert_eq!(
            resolve_expiry(Some("KEEPTTL"), Some("10")),
            Err(ExpiryError::UnknownPolicy("KEEPTTL".to_string()))
        );
        assert_eq!(
            resolve_expiry(Some("EX"), Some("ten")),
            Err(ExpiryError::InvalidValue("ten".to_string()))
        );
    }

    #[test]
    fn test_resolve_expiry_from_now() {
        let before = Instant::now();
        let at = resolve_expiry(Some("EX"), Some("100")).unwrap();
        assert!(at >= before + Duration::from_secs(100));
        assert!(at <= Instant::now() + Duration::from_secs(100));
    }

    #[test]
    fn test_overflow_is_out_of_range() {
        let (now, wall) = clocks();
        assert_eq!(
            ExpiryPolicy::Ex.resolve_at(i64::MAX, now, wall),
            Err(ExpiryError::OutOfRange)
        );
    }
}
