//! Build timing utilities.

use std::fmt;
use std::time::{Duration, Instant};

/// A simple timer for measuring stage durations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn finish(self) -> Duration {
        self.start.elapsed()
    }
}

/// Formats a duration as `12.3s` or `4.5m`.
pub struct Elapsed(pub Duration);

impl fmt::Display for Elapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs_f64();
        if secs >= 60.0 {
            write!(f, "{:.1}m", secs / 60.0)
        } else {
            write!(f, "{:.1}s", secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_format() {
        assert_eq!(Elapsed(Duration::from_millis(1500)).to_string(), "1.5s");
        assert_eq!(Elapsed(Duration::from_secs(90)).to_string(), "1.5m");
    }
}
