use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use traydio_core::metadata::{Metadata, TagSet};

use crate::controller::ControllerEvent;

/// Owns the now-playing snapshot for the current playback session and the
/// periodic re-query ticker that pulls tags while nothing arrives by push.
///
/// The generation counter fences sessions: `reset()` bumps it, every ticker
/// stamps its ticks with the generation it was started under, and the
/// controller drops ticks whose generation is stale.  Together with the
/// abort-on-restart rule this guarantees at most one live timer and no
/// cross-session leakage even for ticks already sitting in the event queue.
pub struct MetadataTracker {
    snapshot: Metadata,
    generation: u64,
    poll_task: Option<AbortHandle>,
}

impl MetadataTracker {
    pub fn new() -> Self {
        Self {
            snapshot: Metadata::default(),
            generation: 0,
            poll_task: None,
        }
    }

    pub fn snapshot(&self) -> &Metadata {
        &self.snapshot
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Clear the snapshot and open a new session.  Called exactly once per
    /// `play()` and on `stop()`.
    pub fn reset(&mut self) {
        self.snapshot = Metadata::default();
        self.generation += 1;
    }

    /// Merge a tag update into the snapshot.  Returns true when anything
    /// changed.
    pub fn ingest(&mut self, tags: &TagSet) -> bool {
        self.snapshot.merge(tags)
    }

    /// Start the periodic re-query ticker.  Any previously running ticker is
    /// aborted first, so at most one timer is ever live.
    pub fn start_polling(&mut self, interval: Duration, event_tx: mpsc::Sender<ControllerEvent>) {
        self.stop_polling();
        let generation = self.generation;
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if event_tx
                    .send(ControllerEvent::PollTick(generation))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
        self.poll_task = Some(handle.abort_handle());
    }

    pub fn stop_polling(&mut self) {
        if let Some(handle) = self.poll_task.take() {
            handle.abort();
        }
    }

    pub fn is_polling(&self) -> bool {
        self.poll_task.is_some()
    }
}

impl Drop for MetadataTracker {
    fn drop(&mut self) {
        self.stop_polling();
    }
}
