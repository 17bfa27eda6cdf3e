use std::time::{Duration, Instant};

/// Stand-in for deadlines too far away to represent.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// `Instant::now() + timeout`, or `None` if it is not representable.
///
/// Callers treat `None` as "wait without a deadline".
pub(crate) fn deadline(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// `base + delay`, clamped to a far-off instant instead of overflowing.
pub(crate) fn after(base: Instant, delay: Duration) -> Instant {
    base.checked_add(delay)
        .or_else(|| base.checked_add(FAR_FUTURE))
        .unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn huge_timeouts_do_not_overflow() {
        assert!(deadline(Duration::MAX).is_none());
        assert!(deadline(Duration::from_secs(1)).is_some());

        let now = Instant::now();
        assert!(after(now, Duration::MAX) >= now + Duration::from_secs(3600));
        assert_eq!(after(now, Duration::from_millis(5)), now + Duration::from_millis(5));
    }
}
