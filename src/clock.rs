//! Minute-alignment helpers. Every time-sensitive decision in the screener
//! routes through these so that stream-derived candles line up with what
//! the exchange considers a closed minute.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time, whole seconds since the Unix epoch.
pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs() as i64
}

/// Round a timestamp down to its minute boundary.
pub fn minute_of(ts: i64) -> i64 {
    ts - ts.rem_euclid(60)
}

/// Start of the minute currently in progress.
pub fn current_minute() -> i64 {
    minute_of(now())
}

/// Start of the most recent minute that is fully closed.
pub fn last_closed_minute() -> i64 {
    current_minute() - 60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minute_of_rounds_down() {
        assert_eq!(minute_of(125), 120);
        assert_eq!(minute_of(180), 180);
        assert_eq!(minute_of(179), 120);
    }

    #[test]
    fn last_closed_minute_is_one_minute_behind_current() {
        let current = current_minute();
        assert_eq!(last_closed_minute(), current - 60);
    }

    #[test]
    fn current_minute_is_aligned() {
        assert_eq!(current_minute() % 60, 0);
    }
}
