use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::{debug, warn};

use crate::DomainResult;
use crate::inbox::InboxRefresher;
use crate::ports::push::PushChannel;

const COALESCED_EVENTS_TOTAL: &str = "rukun_notifier_coalesced_events_total";

/// Subscribes to the push channel and turns bursts of change events into
/// single inbox refreshes. The first event of a burst opens a debounce
/// window; everything arriving inside the window rides the same rebuild.
/// Duplicate delivery is harmless since a rebuild is idempotent.
pub struct ChangeNotifier {
    push: Arc<dyn PushChannel>,
    refresher: Arc<InboxRefresher>,
    debounce: Duration,
}

impl ChangeNotifier {
    pub fn new(
        push: Arc<dyn PushChannel>,
        refresher: Arc<InboxRefresher>,
        debounce: Duration,
    ) -> Self {
        Self {
            push,
            refresher,
            debounce,
        }
    }

    /// Runs until the push channel closes.
    pub async fn run(&self, user_id: &str) -> DomainResult<()> {
        let mut events = self.push.subscribe(user_id).await?;

        while let Some(first) = events.recv().await {
            let mut coalesced: u64 = 1;
            let window = tokio::time::sleep(self.debounce);
            tokio::pin!(window);
            loop {
                tokio::select! {
                    _ = &mut window => break,
                    more = events.recv() => match more {
                        Some(_) => coalesced += 1,
                        None => break,
                    },
                }
            }

            counter!(COALESCED_EVENTS_TOTAL).increment(coalesced);
            debug!(coalesced, event = ?first, "change burst observed, rebuilding inbox");
            if let Err(err) = self.refresher.refresh(user_id).await {
                warn!(error = %err, "push-triggered inbox refresh failed");
            }
        }

        debug!("push channel closed, notifier stopping");
        Ok(())
    }
}
