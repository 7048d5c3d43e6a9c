use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Why the gateway is going down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootReason {
    /// Operator asked for a restart.
    Requested,
    /// Restart after a successful firmware upload.
    FirmwareUpdate,
}

const REASON_NONE: u8 = 0;
const REASON_REQUESTED: u8 = 1;
const REASON_FIRMWARE: u8 = 2;

/// Schedules a process restart.
///
/// The original dongle performs a hardware reset; here the root
/// cancellation token is cancelled after a short grace period so pending
/// HTTP responses flush first, and the process exits for its supervisor
/// to restart.
#[derive(Debug, Clone)]
pub struct RebootController {
    root: CancellationToken,
    reason: Arc<AtomicU8>,
}

impl RebootController {
    pub fn new(root: CancellationToken) -> Self {
        Self {
            root,
            reason: Arc::new(AtomicU8::new(REASON_NONE)),
        }
    }

    /// Request a reboot. The shutdown fires after `grace`, once the
    /// response that triggered it has gone out.
    pub fn schedule(&self, reason: RebootReason, grace: Duration) {
        let encoded = match reason {
            RebootReason::Requested => REASON_REQUESTED,
            RebootReason::FirmwareUpdate => REASON_FIRMWARE,
        };
        self.reason.store(encoded, Ordering::Release);
        info!(?reason, grace_ms = grace.as_millis() as u64, "reboot scheduled");
        let root = self.root.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            root.cancel();
        });
    }

    /// The reason recorded by [`RebootController::schedule`], if any.
    pub fn reason(&self) -> Option<RebootReason> {
        match self.reason.load(Ordering::Acquire) {
            REASON_REQUESTED => Some(RebootReason::Requested),
            REASON_FIRMWARE => Some(RebootReason::FirmwareUpdate),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn shutdown_fires_after_grace() {
        let root = CancellationToken::new();
        let controller = RebootController::new(root.clone());
        controller.schedule(RebootReason::Requested, Duration::from_millis(500));
        assert!(!root.is_cancelled());
        root.cancelled().await;
        assert_eq!(controller.reason(), Some(RebootReason::Requested));
    }
}
