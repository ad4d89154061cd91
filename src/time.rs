//! Timestamps and time bounds.
//!
//! Events carry the timestamp of the observation, not the time the monitor
//! processed them. Time bounds are measured between such timestamps.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Point in time carried by every monitor input.
pub type Timestamp = DateTime<Utc>;

/// Optional upper bound on how long an obligation or scope window lasts.
///
/// # Examples
///
/// ```
/// use rvsynth::TimeBound;
///
/// let bound = TimeBound::from_secs(0.1).unwrap();
/// assert!(bound.is_bounded());
/// assert!(TimeBound::from_secs(-1.0).is_err());
/// assert!(!TimeBound::Unbounded.is_bounded());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "micros", rename_all = "snake_case")]
pub enum TimeBound {
    /// No deadline.
    #[default]
    Unbounded,
    /// Deadline after the given duration.
    Within(#[serde(with = "micros")] Duration),
}

impl TimeBound {
    /// Creates a bound from a number of seconds.
    ///
    /// `f64::INFINITY` is accepted as the unbounded sentinel.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidTimeBound` for `NaN`, zero or negative values.
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_secs(secs: f64) -> Result<Self, ValidationError> {
        if secs.is_nan() {
            return Err(ValidationError::InvalidTimeBound {
                reason: "bound is NaN".to_string(),
            });
        }
        if secs == f64::INFINITY {
            return Ok(Self::Unbounded);
        }
        if secs <= 0.0 {
            return Err(ValidationError::InvalidTimeBound {
                reason: format!("bound must be positive, got {secs}"),
            });
        }
        let micros = (secs * 1_000_000.0).round();
        if micros < 1.0 || micros > i64::MAX as f64 {
            return Err(ValidationError::InvalidTimeBound {
                reason: format!("bound {secs}s is outside the representable range"),
            });
        }
        Ok(Self::Within(Duration::microseconds(micros as i64)))
    }

    /// Creates a bound from a positive duration.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidTimeBound` if `duration` is not positive.
    pub fn within(duration: Duration) -> Result<Self, ValidationError> {
        if duration <= Duration::zero() {
            return Err(ValidationError::InvalidTimeBound {
                reason: format!("bound must be positive, got {duration}"),
            });
        }
        Ok(Self::Within(duration))
    }

    /// True if a deadline applies.
    #[must_use]
    pub const fn is_bounded(&self) -> bool {
        matches!(self, Self::Within(_))
    }

    /// The bound, `None` if unbounded.
    #[must_use]
    pub const fn duration(&self) -> Option<Duration> {
        match self {
            Self::Within(d) => Some(*d),
            Self::Unbounded => None,
        }
    }

    /// True once `now` is at least the bound past `reference`.
    #[must_use]
    pub fn has_elapsed(&self, reference: Timestamp, now: Timestamp) -> bool {
        match self {
            Self::Within(d) => now - reference >= *d,
            Self::Unbounded => false,
        }
    }
}

impl std::fmt::Display for TimeBound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unbounded => write!(f, "unbounded"),
            Self::Within(d) => write!(f, "within {}ms", d.num_milliseconds()),
        }
    }
}

mod micros {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        match d.num_microseconds() {
            Some(v) => s.serialize_i64(v),
            None => Err(serde::ser::Error::custom("duration overflows microseconds")),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        i64::deserialize(d).map(Duration::microseconds)
    }
}
