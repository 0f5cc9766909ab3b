//! Media timestamps
//!
//! Presentation times are carried as signed nanosecond counts so that
//! sums of frame durations do not accumulate floating point error.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// A presentation time or duration in nanoseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MediaTime(i64);

impl MediaTime {
    pub const ZERO: MediaTime = MediaTime(0);

    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub const fn from_millis(millis: i64) -> Self {
        Self(millis * 1_000_000)
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * NANOS_PER_SEC as f64).round() as i64)
    }

    /// Duration of `frames` audio frames at `sample_rate`
    pub fn from_samples(frames: u64, sample_rate: u32) -> Self {
        if sample_rate == 0 {
            return Self::ZERO;
        }
        let nanos = (frames as i128 * NANOS_PER_SEC as i128) / sample_rate as i128;
        Self(nanos as i64)
    }

    /// Duration of one frame at `fps`
    pub fn frame_duration(fps: u32) -> Self {
        if fps == 0 {
            return Self::ZERO;
        }
        Self(NANOS_PER_SEC / fps as i64)
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC as f64
    }

    /// Number of audio frames covering this duration, rounded to nearest
    pub fn to_samples(self, sample_rate: u32) -> u64 {
        if self.0 <= 0 {
            return 0;
        }
        ((self.0 as i128 * sample_rate as i128 + NANOS_PER_SEC as i128 / 2) / NANOS_PER_SEC as i128)
            as u64
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }
}

impl Add for MediaTime {
    type Output = MediaTime;

    fn add(self, rhs: MediaTime) -> MediaTime {
        MediaTime(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for MediaTime {
    fn add_assign(&mut self, rhs: MediaTime) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sub for MediaTime {
    type Output = MediaTime;

    fn sub(self, rhs: MediaTime) -> MediaTime {
        MediaTime(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_secs_f64())
    }
}
