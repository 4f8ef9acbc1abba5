//! Signal handling for cooperative shutdown.
//!
//! A signal never interrupts a backend call. It only sets the shared
//! [`StopFlag`], which the drivers poll at their loop boundaries.

use churn_core::StopFlag;
use tokio::task::JoinHandle;
use tracing::info;

/// Install the stop-signal listener and return its task.
///
/// On Unix the listener reacts to `SIGUSR2` and to Ctrl+C; elsewhere only to
/// Ctrl+C. The signal stream is registered before this returns, so a signal
/// delivered right afterwards is not lost.
pub fn install_stop_handler(stop: StopFlag) -> anyhow::Result<JoinHandle<()>> {
    #[cfg(unix)]
    let mut usr2 = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::user_defined2())?
    };

    Ok(tokio::spawn(async move {
        #[cfg(unix)]
        let received = tokio::select! {
            _ = usr2.recv() => "SIGUSR2",
            _ = tokio::signal::ctrl_c() => "Ctrl+C",
        };
        #[cfg(not(unix))]
        let received = {
            let _ = tokio::signal::ctrl_c().await;
            "Ctrl+C"
        };

        if stop.request() {
            info!("Received {received}, stopping after the current phase");
        }
    }))
}
