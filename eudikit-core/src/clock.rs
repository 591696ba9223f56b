//! Unix-time plumbing.
//!
//! Protocol flows accept an optional explicit `now` so tests can pin the
//! clock; production callers pass `None` and get the system time.

use crate::error::WalletError;

/// Returns `now` when given, otherwise the current Unix time in seconds.
pub(crate) fn now_or(now: Option<u64>) -> Result<u64, WalletError> {
    match now {
        Some(n) => Ok(n),
        None => std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .map_err(|e| WalletError::Clock(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_now_wins() {
        assert_eq!(now_or(Some(42)).unwrap(), 42);
    }

    #[test]
    fn system_time_is_after_2023() {
        assert!(now_or(None).unwrap() > 1_672_531_200);
    }
}
