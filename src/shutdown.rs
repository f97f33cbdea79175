//! Cooperative shutdown signaling (§5 "Cancellation / timeouts", SPEC_FULL §C).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cheap, cloneable flag checked at each segment boundary and each
/// resequencer budget tick. Setting it never interrupts an in-flight
/// complete segment; per §5, no segment is ever published partial.
#[derive(Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Waits for Ctrl+C and triggers the handle, keeping a long-lived
    /// async task alive until a signal arrives.
    pub async fn wait_for_ctrl_c(self) {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to listen for ctrl-c: {e}");
        }
        self.trigger();
    }
}
