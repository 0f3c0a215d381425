use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Source of "now" for cache freshness and run timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;

    fn unix_now(&self) -> i64 {
        self.now().unix_timestamp()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(OffsetDateTime);

impl FixedClock {
    pub fn new(at: OffsetDateTime) -> Self {
        Self(at)
    }

    /// Out-of-range values clamp to the epoch.
    pub fn at_unix(secs: i64) -> Self {
        Self(OffsetDateTime::from_unix_timestamp(secs).unwrap_or(OffsetDateTime::UNIX_EPOCH))
    }
}

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        self.0
    }
}

pub fn rfc3339(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.unix_timestamp().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_is_stable() {
        let clock = FixedClock::at_unix(1_700_000_000);
        assert_eq!(clock.unix_now(), 1_700_000_000);
        assert_eq!(clock.unix_now(), clock.unix_now());
        assert_eq!(rfc3339(clock.now()), "2023-11-14T22:13:20Z");
    }

    #[test]
    fn system_clock_moves_forward_from_epoch() {
        assert!(SystemClock.unix_now() > 1_600_000_000);
    }
}
