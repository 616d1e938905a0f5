//! Time utilities and timing defaults for the Cambio pipeline.

use chrono::{DateTime, Duration, Utc};

/// Pipeline timing defaults.
pub mod defaults {
    use super::Duration;

    /// How long a quote stays committable (90 seconds).
    pub fn quote_ttl() -> Duration {
        Duration::seconds(90)
    }

    /// Age after which a cached market rate is served as stale (30 seconds).
    pub fn rate_stale_after() -> Duration {
        Duration::seconds(30)
    }

    /// Age beyond which a cached market rate is refused outright (5 minutes).
    pub fn rate_hard_ceiling() -> Duration {
        Duration::minutes(5)
    }

    /// How long a conversion may sit in PENDING/PAID before the external
    /// reaper fails it (30 minutes).
    pub fn pending_conversion_timeout() -> Duration {
        Duration::minutes(30)
    }
}

/// A timestamp with timezone (always UTC for Cambio).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Check if a timestamp has expired (is in the past).
pub fn is_expired(expiry: Timestamp) -> bool {
    now() > expiry
}

/// Calculate expiry time from now.
pub fn expires_in(duration: Duration) -> Timestamp {
    now() + duration
}

/// Age of a timestamp relative to now.
pub fn age_of(timestamp: Timestamp) -> Duration {
    now() - timestamp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_expired() {
        let past = now() - Duration::seconds(10);
        assert!(is_expired(past));

        let future = now() + Duration::seconds(10);
        assert!(!is_expired(future));
    }

    #[test]
    fn test_expires_in() {
        let expiry = expires_in(Duration::seconds(60));
        assert!(!is_expired(expiry));
        assert!(expiry - now() <= Duration::seconds(60));
    }

    #[test]
    fn test_age_of() {
        let stamped = now() - Duration::seconds(5);
        assert!(age_of(stamped) >= Duration::seconds(5));
    }
}
