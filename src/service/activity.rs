use crate::common::Result;
use crate::service::client::SessionTransport;
use crate::service::protocol::ActivityLogEntry;
use std::sync::Arc;
use tokio::sync::watch;

/// Read-only cache of the backend's recent-activity log.
#[derive(Clone)]
pub struct ActivityFeed {
    transport: Arc<dyn SessionTransport>,
    entries: Arc<watch::Sender<Vec<ActivityLogEntry>>>,
}

impl ActivityFeed {
    pub fn new(transport: Arc<dyn SessionTransport>) -> Self {
        let (entries, _) = watch::channel(Vec::new());
        Self {
            transport,
            entries: Arc::new(entries),
        }
    }

    /// Re-fetch the log. On failure the previous cache is kept.
    pub async fn refresh(&self) -> Result<()> {
        match self.transport.recent_activity().await {
            Ok(entries) => {
                tracing::debug!("Activity feed refreshed ({} entries)", entries.len());
                self.entries.send_replace(entries);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Failed to refresh recent activity: {}", e);
                Err(e)
            }
        }
    }

    pub fn entries(&self) -> Vec<ActivityLogEntry> {
        self.entries.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<ActivityLogEntry>> {
        self.entries.subscribe()
    }
}
