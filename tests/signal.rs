//! SIGUSR2 handling.

#![cfg(unix)]

use churn_core::StopFlag;
use shard_churn::install_stop_handler;
use std::time::Duration;

#[tokio::test]
async fn test_sigusr2_requests_stop() {
    let stop = StopFlag::new();
    let listener = install_stop_handler(stop.clone()).unwrap();
    assert!(!stop.is_requested());

    // SAFETY: the SIGUSR2 handler was registered above
    unsafe {
        libc::raise(libc::SIGUSR2);
    }

    tokio::time::timeout(Duration::from_secs(5), listener)
        .await
        .expect("listener should exit after the signal")
        .unwrap();
    assert!(stop.is_requested());
}
