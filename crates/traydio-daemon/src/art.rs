use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Best-effort fetcher for station favicons and album art.
///
/// Every failure is silent per item: the presentation layer falls back to a
/// generic icon, so a broken image URL must never surface as an error or
/// interrupt playback.
pub struct ArtFetcher {
    client: reqwest::Client,
    dir: PathBuf,
}

impl ArtFetcher {
    pub fn new(dir: PathBuf) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("traydio/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self { client, dir })
    }

    /// Where the image for `url` lands once fetched.  Stable across runs.
    pub fn cached_path(&self, url: &str) -> PathBuf {
        let mut hasher = DefaultHasher::new();
        url.hash(&mut hasher);
        self.dir.join(format!("{:016x}", hasher.finish()))
    }

    /// Fetch `url` into the cache in the background.  No-op for non-HTTP URIs
    /// (local paths need no fetch) and for images already cached.
    pub fn prefetch(&self, url: &str) {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return;
        }
        let path = self.cached_path(url);
        if path.exists() {
            return;
        }
        let client = self.client.clone();
        let dir = self.dir.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            if let Err(e) = fetch_to(&client, &url, &dir, &path).await {
                debug!("art fetch failed for {}: {:#}", url, e);
            }
        });
    }
}

async fn fetch_to(
    client: &reqwest::Client,
    url: &str,
    dir: &Path,
    path: &Path,
) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        anyhow::bail!("HTTP {}", response.status());
    }
    let bytes = response.bytes().await?;
    tokio::fs::write(path, &bytes).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn cached_paths_are_stable_and_distinct() {
        let dir = TempDir::new().unwrap();
        let fetcher = ArtFetcher::new(dir.path().to_path_buf()).unwrap();

        let a = fetcher.cached_path("https://x.example/logo.png");
        let b = fetcher.cached_path("https://x.example/logo.png");
        let c = fetcher.cached_path("https://y.example/logo.png");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with(dir.path()));
    }

    #[tokio::test]
    async fn non_http_uris_are_ignored() {
        let dir = TempDir::new().unwrap();
        let fetcher = ArtFetcher::new(dir.path().to_path_buf()).unwrap();
        fetcher.prefetch("/usr/share/icons/radio.svg");
        fetcher.prefetch("file:///tmp/cover.png");
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }
}
