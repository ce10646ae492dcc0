use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use auxcast_core::service::DiscoveryService;
use auxcast_core::Result;

use crate::events::FanoutEvent;
use crate::hub::FanoutHub;

/// Periodic repair for the lossy event stream
///
/// Scoped delivery is at-most-once, so a subscriber that missed a
/// lifecycle event would otherwise render a stale world forever. The
/// reconciler pushes an authoritative live-broadcast snapshot to every
/// connection; clients replace their view with it wholesale.
#[derive(Clone)]
pub struct Reconciler {
    hub: Arc<FanoutHub>,
    discovery: DiscoveryService,
}

impl Reconciler {
    #[must_use]
    pub fn new(hub: Arc<FanoutHub>, discovery: DiscoveryService) -> Self {
        Self { hub, discovery }
    }

    /// Publish one snapshot, returning how many subscribers received it
    pub async fn reconcile(&self) -> Result<usize> {
        let broadcasts = self.discovery.live_broadcasts(None, Utc::now()).await?;
        let live = broadcasts.len();

        let delivered = self.hub.publish_global(FanoutEvent::LiveBroadcasts {
            broadcasts,
            timestamp: Utc::now(),
        });
        debug!(live, delivered, "Snapshot published");
        Ok(delivered)
    }

    /// Run snapshots on an interval until shutdown
    pub fn spawn(
        &self,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let reconciler = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        info!("Reconciler stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = reconciler.reconcile().await {
                            error!(error = %e, "Snapshot publish failed");
                        }
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").finish_non_exhaustive()
    }
}
