//! Nanosecond-precision timestamps, independent of wall-clock sampling.
//!
//! Shard boundary arithmetic must be an exact, pure function of an integer
//! nanosecond count; `std::time::SystemTime` doesn't expose one directly
//! (and deliberately hides the epoch), so we carry our own thin wrapper.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Nanoseconds since the Unix epoch. May be negative for instants before
/// 1970, which the boundary calculator handles via floor-division rather
/// than truncating (Rust's `%` truncates toward zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnixNanos(pub i128);

impl UnixNanos {
    pub fn now() -> Self {
        let d = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the Unix epoch");
        UnixNanos(d.as_nanos() as i128)
    }

    /// The value used on the wire and as a CRL number / crlId component.
    pub fn as_i64(self) -> i64 {
        self.0 as i64
    }

    pub fn checked_sub_duration(self, d: Duration) -> Self {
        UnixNanos(self.0 - d.as_nanos() as i128)
    }

    pub fn checked_add_duration(self, d: Duration) -> Self {
        UnixNanos(self.0 + d.as_nanos() as i128)
    }
}

impl std::fmt::Display for UnixNanos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// Euclidean (floor) modulo: unlike `%`, the result always has the sign of
/// `rhs`, which is what anchoring the timeline at epoch-zero requires for
/// instants both before and after 1970.
pub fn floor_mod(lhs: i128, rhs: i128) -> i128 {
    let r = lhs % rhs;
    if (r != 0) && ((r < 0) != (rhs < 0)) {
        r + rhs
    } else {
        r
    }
}
