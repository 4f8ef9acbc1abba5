//! Cooperative shutdown flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One-way stop flag shared between the signal listener and every loop.
///
/// Loops poll [`StopFlag::is_requested`] at their own boundaries; nothing is
/// interrupted mid-operation. Once set, the flag never reverts.
#[derive(Clone, Debug, Default)]
pub struct StopFlag {
    requested: Arc<AtomicBool>,
}

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Returns `true` only for the call that flipped the flag.
    pub fn request(&self) -> bool {
        !self.requested.swap(true, Ordering::AcqRel)
    }

    /// Whether a stop has been requested.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_clear() {
        assert!(!StopFlag::new().is_requested());
    }

    #[test]
    fn test_request_is_one_way() {
        let flag = StopFlag::new();

        assert!(flag.request());
        assert!(flag.is_requested());

        // Second request is a no-op and the flag stays set
        assert!(!flag.request());
        assert!(flag.is_requested());
    }

    #[test]
    fn test_clones_share_state() {
        let flag = StopFlag::new();
        let listener = flag.clone();

        std::thread::spawn(move || {
            listener.request();
        })
        .join()
        .unwrap();

        assert!(flag.is_requested());
    }
}
