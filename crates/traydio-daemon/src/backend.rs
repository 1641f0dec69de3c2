use tokio::sync::mpsc;
use traydio_core::metadata::TagSet;

/// Events pushed asynchronously by the media backend.
///
/// The channel carrying these has exactly one subscriber by construction:
/// [`BackendFactory::create`] receives the only sender, and the controller's
/// forwarder task holds the only receiver.  There is no way to register a
/// second listener, so event delivery can never be duplicated.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// Incremental stream-tag update.
    Tag(TagSet),
    /// The backend accepted a freshly issued `load`; tag events from here on
    /// belong to the new source.
    Loaded,
    /// The stream failed to open or decode.  The message is the backend's own
    /// text and may be empty.
    Error(String),
    /// The stream ended normally.  Not a failure.
    EndOfStream,
}

/// Control surface of the single streaming pipeline.
///
/// All methods are requests, not guarantees: the backend confirms their
/// effects later through [`BackendEvent`]s.
pub trait MediaBackend: Send + 'static {
    /// Stop whatever is playing and point the pipeline at a new source URI.
    async fn load(&mut self, uri: &str) -> anyhow::Result<()>;
    async fn play(&mut self) -> anyhow::Result<()>;
    async fn pause(&mut self) -> anyhow::Result<()>;
    async fn stop(&mut self) -> anyhow::Result<()>;
    /// Best-effort pull of the currently known stream tags.  `None` when the
    /// backend has not parsed any yet.
    async fn query_tags(&mut self) -> anyhow::Result<Option<TagSet>>;
    /// Force the pipeline idle and release the backend's resources.  Must be
    /// called before the owner is discarded.
    async fn shutdown(&mut self) -> anyhow::Result<()>;
}

/// Explicit constructor for the backend.  The controller calls this once, on
/// the first `play`, and owns the returned instance for the rest of the
/// session: one pipeline, reused across stations, never re-created per play.
pub trait BackendFactory: Send + 'static {
    type Backend: MediaBackend;

    async fn create(
        &mut self,
        events: mpsc::Sender<BackendEvent>,
    ) -> anyhow::Result<Self::Backend>;
}
