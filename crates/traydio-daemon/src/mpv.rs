/// mpv IPC backend with separated reader/writer tasks.
///
/// Architecture:
///
/// ```text
///   MpvFactory::create()
///         │
///         ├── writer_task   ← receives PendingRequest via mpsc, serialises → socket
///         └── reader_task   ← reads JSON lines from socket
///                                ├── response (has request_id) → matched oneshot::Sender
///                                └── unsolicited event          → translate_event → BackendEvent
/// ```
///
/// One mpv process (`--idle=yes`) serves the whole session; `loadfile`
/// switches stations without respawning anything.  Unsolicited mpv messages
/// are translated to the fixed [`BackendEvent`] vocabulary right here in the
/// reader task; everything unrecognized is dropped before the controller
/// ever sees it.
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use traydio_core::metadata::TagSet;
use traydio_core::platform;

use crate::backend::{BackendEvent, BackendFactory, MediaBackend};

// ── global request-id counter ─────────────────────────────────────────────────

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

// ── observation property IDs ──────────────────────────────────────────────────

/// Fixed observe_property IDs.  Property-change events are matched on these.
const OBS_METADATA: u64 = 1;
const OBS_BITRATE: u64 = 2;
const OBS_ICY_TITLE: u64 = 3;

// ── internal channel types ────────────────────────────────────────────────────

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

// ── IPC handle ────────────────────────────────────────────────────────────────

/// Cheaply cloneable handle to the writer task.  `send()` fires a command and
/// awaits the matched response.
#[derive(Clone)]
struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    async fn set_property(&self, name: &str, value: Value) -> anyhow::Result<()> {
        self.send(json!(["set_property", name, value])).await?;
        Ok(())
    }

    async fn get_property(&self, name: &str) -> anyhow::Result<Value> {
        let mut resp = self.send(json!(["get_property", name])).await?;
        Ok(resp.get_mut("data").map(Value::take).unwrap_or(Value::Null))
    }

    /// Register observe_property for the stream tags we track.  mpv pushes a
    /// property-change event whenever any of these change.
    async fn observe_stream_properties(&self) {
        let props = [
            (OBS_METADATA, "metadata"),
            (OBS_BITRATE, "audio-bitrate"),
            (OBS_ICY_TITLE, "metadata/by-key/icy-title"),
        ];
        for (id, name) in &props {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }
}

// ── factory / backend ─────────────────────────────────────────────────────────

pub struct MpvFactory {
    socket_name: String,
}

impl MpvFactory {
    pub fn new() -> Self {
        Self {
            socket_name: platform::mpv_socket_name(),
        }
    }
}

impl BackendFactory for MpvFactory {
    type Backend = MpvBackend;

    async fn create(&mut self, events: mpsc::Sender<BackendEvent>) -> anyhow::Result<MpvBackend> {
        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        let mpv_binary = platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;
        info!("mpv: spawning {}", mpv_binary.display());

        let child = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg(platform::mpv_socket_arg())
            .arg("--quiet")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()?;

        // Wait for the IPC socket to appear
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");

        let handle = start_io_tasks(stream, events);
        handle.observe_stream_properties().await;

        Ok(MpvBackend {
            handle,
            process: child,
        })
    }
}

/// Owns the mpv child process plus a live IPC handle.
pub struct MpvBackend {
    handle: MpvHandle,
    process: tokio::process::Child,
}

impl MediaBackend for MpvBackend {
    async fn load(&mut self, uri: &str) -> anyhow::Result<()> {
        // loadfile implicitly interrupts whatever was streaming before.
        self.handle.send(json!(["loadfile", uri])).await?;
        Ok(())
    }

    async fn play(&mut self) -> anyhow::Result<()> {
        self.handle.set_property("pause", json!(false)).await
    }

    async fn pause(&mut self) -> anyhow::Result<()> {
        self.handle.set_property("pause", json!(true)).await
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        self.handle.send(json!(["stop"])).await?;
        Ok(())
    }

    async fn query_tags(&mut self) -> anyhow::Result<Option<TagSet>> {
        // Either property can be unavailable while mpv is still probing the
        // stream; that just means no tags yet.
        let metadata = self
            .handle
            .get_property("metadata")
            .await
            .unwrap_or(Value::Null);
        let bitrate = self
            .handle
            .get_property("audio-bitrate")
            .await
            .ok()
            .and_then(|v| v.as_f64())
            .map(|b| b as u32);
        let tags = parse_tag_object(&metadata, bitrate);
        Ok((!tags.is_empty()).then_some(tags))
    }

    async fn shutdown(&mut self) -> anyhow::Result<()> {
        // Force the pipeline idle before the process goes away.
        let _ = self.handle.send(json!(["stop"])).await;
        self.process.kill().await?;
        Ok(())
    }
}

// ── IO tasks ──────────────────────────────────────────────────────────────────

fn start_io_tasks(stream: UnixStream, events: mpsc::Sender<BackendEvent>) -> MpvHandle {
    let (read_half, write_half) = stream.into_split();
    let reader = BufReader::new(read_half);

    // pending map: req_id → reply channel.  Writer inserts, reader resolves.
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(reader, pending, events));

    MpvHandle { tx: cmd_tx }
}

async fn reader_task(
    mut reader: BufReader<OwnedReadHalf>,
    pending: PendingMap,
    events: mpsc::Sender<BackendEvent>,
) {
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_pending(&pending, "mpv IPC connection closed").await;
                let _ = events
                    .send(BackendEvent::Error("media backend connection lost".into()))
                    .await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    resolve_pending(&pending, req_id, val).await;
                } else if let Some(event) = translate_event(&val) {
                    debug!("mpv reader: event {:?}", event);
                    if events.send(event).await.is_err() {
                        break;
                    }
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_pending(&pending, &format!("mpv IPC read error: {}", e)).await;
                break;
            }
        }
    }
}

async fn resolve_pending(pending: &PendingMap, req_id: u64, val: Value) {
    let mut map = pending.lock().await;
    if let Some(tx) = map.remove(&req_id) {
        let result = if val["error"].as_str() == Some("success") {
            Ok(val)
        } else {
            let err = val["error"].as_str().unwrap_or("unknown error").to_string();
            debug!("mpv reader: response req={} err={}", req_id, err);
            Err(anyhow::anyhow!("mpv error: {}", err))
        };
        let _ = tx.send(result);
    } else {
        debug!("mpv reader: response for unknown req={}", req_id);
    }
}

async fn fail_pending(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", reason)));
    }
}

async fn writer_task(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<PendingRequest>,
    pending: PendingMap,
) {
    while let Some(req) = rx.recv().await {
        // Register the reply channel before writing so the reader can match it
        {
            let mut map = pending.lock().await;
            map.insert(req.req_id, req.reply);
        }
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            let mut map = pending.lock().await;
            if let Some(tx) = map.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── event translation ─────────────────────────────────────────────────────────

fn as_property_change(raw: &Value) -> Option<(u64, &Value)> {
    if raw.get("event")?.as_str()? == "property-change" {
        let id = raw.get("id")?.as_u64()?;
        Some((id, raw.get("data").unwrap_or(&Value::Null)))
    } else {
        None
    }
}

/// Map one unsolicited mpv message onto the backend event vocabulary.
fn translate_event(raw: &Value) -> Option<BackendEvent> {
    if let Some((obs_id, data)) = as_property_change(raw) {
        return match obs_id {
            OBS_METADATA => {
                let tags = parse_tag_object(data, None);
                (!tags.is_empty()).then_some(BackendEvent::Tag(tags))
            }
            OBS_BITRATE => {
                let bitrate = data.as_f64().map(|b| b as u32).filter(|&b| b > 0)?;
                Some(BackendEvent::Tag(TagSet {
                    bitrate: Some(bitrate),
                    ..TagSet::default()
                }))
            }
            OBS_ICY_TITLE => {
                let mut tags = TagSet::default();
                apply_stream_title(&mut tags, data.as_str()?);
                (!tags.is_empty()).then_some(BackendEvent::Tag(tags))
            }
            _ => None,
        };
    }

    match raw.get("event")?.as_str()? {
        "start-file" => Some(BackendEvent::Loaded),
        "end-file" => {
            let reason = raw.get("reason").and_then(|v| v.as_str()).unwrap_or("unknown");
            match reason {
                "eof" => Some(BackendEvent::EndOfStream),
                "error" | "network" => {
                    let detail = raw
                        .get("file_error")
                        .and_then(|v| v.as_str())
                        .unwrap_or(reason);
                    Some(BackendEvent::Error(detail.to_string()))
                }
                // stop/redirect/quit: the stream was interrupted on purpose,
                // usually by a new load.  Not a session-ending event.
                _ => None,
            }
        }
        _ => None,
    }
}

/// Build a TagSet from mpv's `metadata` property.  Only the fixed key set is
/// recognized (title, artist, icy-title/StreamTitle); everything else is
/// ignored deterministically.
fn parse_tag_object(metadata: &Value, bitrate: Option<u32>) -> TagSet {
    let mut tags = TagSet {
        bitrate: bitrate.filter(|&b| b > 0),
        ..TagSet::default()
    };
    if let Some(map) = metadata.as_object() {
        let lookup = |key: &str| {
            map.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .and_then(|(_, v)| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
        };
        if let Some(title) = lookup("title") {
            tags.title = Some(title.to_string());
        }
        if let Some(artist) = lookup("artist") {
            tags.artist = Some(artist.to_string());
        }
        if tags.title.is_none() {
            if let Some(stream_title) = lookup("icy-title").or_else(|| lookup("StreamTitle")) {
                apply_stream_title(&mut tags, stream_title);
            }
        }
    }
    tags
}

/// ICY streams carry one combined "Artist - Title" string; split it on the
/// first separator.  Placeholder values like "-" are discarded.
fn apply_stream_title(tags: &mut TagSet, stream_title: &str) {
    let cleaned = stream_title.trim().trim_matches('-').trim();
    if cleaned.is_empty() {
        return;
    }
    match stream_title.split_once(" - ") {
        Some((artist, title)) if !artist.trim().is_empty() && !title.trim().is_empty() => {
            if tags.artist.is_none() {
                tags.artist = Some(artist.trim().to_string());
            }
            tags.title = Some(title.trim().to_string());
        }
        _ => tags.title = Some(cleaned.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_file_becomes_loaded() {
        let evt = translate_event(&json!({"event": "start-file"}));
        assert_eq!(evt, Some(BackendEvent::Loaded));
    }

    #[test]
    fn end_file_reasons_map_deterministically() {
        let eof = translate_event(&json!({"event": "end-file", "reason": "eof"}));
        assert_eq!(eof, Some(BackendEvent::EndOfStream));

        let err = translate_event(&json!({
            "event": "end-file", "reason": "error", "file_error": "HTTP 404"
        }));
        assert_eq!(err, Some(BackendEvent::Error("HTTP 404".into())));

        let net = translate_event(&json!({"event": "end-file", "reason": "network"}));
        assert_eq!(net, Some(BackendEvent::Error("network".into())));

        // An interrupted stream (new load, explicit stop) must not surface.
        assert_eq!(
            translate_event(&json!({"event": "end-file", "reason": "stop"})),
            None
        );
        assert_eq!(
            translate_event(&json!({"event": "end-file", "reason": "redirect"})),
            None
        );
    }

    #[test]
    fn metadata_property_change_yields_tags() {
        let evt = translate_event(&json!({
            "event": "property-change",
            "id": OBS_METADATA,
            "data": {"title": "Take Five", "artist": "Dave Brubeck", "encoder": "Lavf"}
        }));
        match evt {
            Some(BackendEvent::Tag(tags)) => {
                assert_eq!(tags.title.as_deref(), Some("Take Five"));
                assert_eq!(tags.artist.as_deref(), Some("Dave Brubeck"));
                assert!(tags.image.is_none(), "unrecognized keys are dropped");
            }
            other => panic!("expected Tag, got {:?}", other),
        }
    }

    #[test]
    fn icy_title_is_split_into_artist_and_title() {
        let tags = parse_tag_object(
            &json!({"icy-title": "Dave Brubeck - Take Five"}),
            None,
        );
        assert_eq!(tags.artist.as_deref(), Some("Dave Brubeck"));
        assert_eq!(tags.title.as_deref(), Some("Take Five"));

        let plain = parse_tag_object(&json!({"icy-title": "Station jingle"}), None);
        assert_eq!(plain.artist, None);
        assert_eq!(plain.title.as_deref(), Some("Station jingle"));
    }

    #[test]
    fn placeholder_icy_titles_are_discarded() {
        let tags = parse_tag_object(&json!({"icy-title": " - "}), None);
        assert!(tags.is_empty());
    }

    #[test]
    fn explicit_tags_win_over_icy_title() {
        let tags = parse_tag_object(
            &json!({"TITLE": "Blue Rondo", "icy-title": "Dave Brubeck - Take Five"}),
            None,
        );
        assert_eq!(tags.title.as_deref(), Some("Blue Rondo"));
    }

    #[test]
    fn zero_bitrate_never_enters_a_tagset() {
        assert!(parse_tag_object(&Value::Null, Some(0)).is_empty());
        assert_eq!(
            translate_event(&json!({
                "event": "property-change", "id": OBS_BITRATE, "data": 0
            })),
            None
        );
        let evt = translate_event(&json!({
            "event": "property-change", "id": OBS_BITRATE, "data": 128000.0
        }));
        assert_eq!(
            evt,
            Some(BackendEvent::Tag(TagSet {
                bitrate: Some(128_000),
                ..TagSet::default()
            }))
        );
    }
}
