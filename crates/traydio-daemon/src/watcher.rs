use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::sync::mpsc;
use tracing::{info, warn};

use traydio_core::protocol::Command;
use traydio_core::station::StationStore;

use crate::controller::ControllerEvent;

const WATCH_PERIOD: std::time::Duration = std::time::Duration::from_secs(2);

/// Watch the stations file for external edits (the preferences surface writes
/// it) and push a wholesale `SetStations` reload into the controller whenever
/// its mtime changes.  Full replace, no incremental diff.
pub fn start(path: PathBuf, event_tx: mpsc::Sender<ControllerEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_modified = modified_at(&path);
        loop {
            tokio::time::sleep(WATCH_PERIOD).await;
            let modified = modified_at(&path);
            if modified == last_modified {
                continue;
            }
            last_modified = modified;

            match StationStore::new(&path).load() {
                Ok(stations) => {
                    info!(
                        "station list changed on disk, reloading {} stations",
                        stations.len()
                    );
                    let cmd = Command::SetStations { stations };
                    if event_tx.send(ControllerEvent::Command(cmd)).await.is_err() {
                        break;
                    }
                }
                // Keep the current view; the next successful write wins.
                Err(e) => warn!("failed to reload station list: {}", e),
            }
        }
    })
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).ok().and_then(|m| m.modified().ok())
}
