use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch.
///
/// Message timestamps are always server-assigned seconds; client-supplied
/// millisecond values are accepted as hints but overwritten with this.
pub fn now_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_seconds_is_seconds_not_millis() {
        let now = now_seconds();
        // Anything in the 2020s expressed in seconds is ~1.7e9; the same
        // instant in milliseconds would be three orders of magnitude larger.
        assert!(now > 1_500_000_000);
        assert!(now < 100_000_000_000);
    }
}
