//! Transport layer: turns a media source into a verified local file.
//!
//! Strategies are tried in order until one succeeds. Failures of every
//! applicable strategy are aggregated into a single transport error.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use url::Url;

use crate::job::MediaSource;
use crate::{Error, Result};

/// Bytes inspected when sniffing for HTML error pages.
const SNIFF_LEN: usize = 1024;

const MEDIA_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "mp3", "wav", "aac", "ogg", "flac", "m4a",
];

/// One way of fetching a location.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this strategy understands `location`.
    fn supports(&self, location: &str) -> bool;

    /// Fetch `location` into `dest_dir`, naming the file after `stem`.
    async fn fetch(&self, location: &str, dest_dir: &Path, stem: &str) -> Result<PathBuf>;
}

/// Resolves [`MediaSource`]s to local files.
#[derive(Clone, Default)]
pub struct FetchChain {
    strategies: Vec<Arc<dyn FetchStrategy>>,
}

impl FetchChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn FetchStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Resolve a source to a verified, non-empty local media file.
    pub async fn resolve(
        &self,
        source: &MediaSource,
        dest_dir: &Path,
        stem: &str,
    ) -> Result<PathBuf> {
        if let Some(path) = &source.resolved_path {
            verify_media_file(path).await?;
            return Ok(path.clone());
        }

        let Some(location) = source.url.as_deref() else {
            return Err(Error::Transport(format!(
                "Source {} has no fetchable location",
                source.describe()
            )));
        };

        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| Error::io_path("creating", dest_dir, e))?;

        let mut failures = Vec::new();
        for strategy in self.strategies.iter().filter(|s| s.supports(location)) {
            debug!(strategy = strategy.name(), %location, "Trying fetch strategy");
            match strategy.fetch(location, dest_dir, stem).await {
                Ok(path) => {
                    info!(strategy = strategy.name(), path = %path.display(), "Fetched input");
                    return Ok(path);
                }
                Err(e) => {
                    warn!(
                        strategy = strategy.name(),
                        %location,
                        error = %e,
                        "Fetch strategy failed"
                    );
                    failures.push(format!("{}: {e}", strategy.name()));
                }
            }
        }

        if failures.is_empty() {
            return Err(Error::Transport(format!(
                "No fetch strategy supports {location}"
            )));
        }
        Err(Error::Transport(format!(
            "All fetch strategies failed for {location}: {}",
            failures.join("; ")
        )))
    }
}

/// Reject missing, empty and HTML files.
pub async fn verify_media_file(path: &Path) -> Result<()> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| Error::Transport(format!("{} is not readable: {e}", path.display())))?;
    let len = file.metadata().await.map(|m| m.len()).unwrap_or(0);
    if len == 0 {
        return Err(Error::Transport(format!("{} is empty", path.display())));
    }

    let mut head = vec![0u8; SNIFF_LEN.min(len as usize)];
    let read = file.read(&mut head).await?;
    if looks_like_html(&head[..read]) {
        return Err(Error::Transport(format!(
            "{} is an HTML page, not media",
            path.display()
        )));
    }
    Ok(())
}

fn looks_like_html(head: &[u8]) -> bool {
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();
    head.contains("<html") || head.contains("<!doctype") || head.contains("virus scan warning")
}

fn guess_extension(url: &Url) -> &'static str {
    let path = url.path().to_ascii_lowercase();
    MEDIA_EXTENSIONS
        .iter()
        .find(|ext| path.ends_with(&format!(".{ext}")))
        .copied()
        .unwrap_or("mp4")
}

/// Uses files already on this host, restricted to configured roots.
pub struct LocalFileStrategy {
    roots: Vec<PathBuf>,
}

impl LocalFileStrategy {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    fn local_path(location: &str) -> Option<PathBuf> {
        if let Ok(url) = Url::parse(location)
            && url.scheme() == "file"
        {
            return url.to_file_path().ok();
        }
        let path = Path::new(location);
        path.is_absolute().then(|| path.to_path_buf())
    }
}

#[async_trait]
impl FetchStrategy for LocalFileStrategy {
    fn name(&self) -> &'static str {
        "local"
    }

    fn supports(&self, location: &str) -> bool {
        !self.roots.is_empty() && Self::local_path(location).is_some()
    }

    async fn fetch(&self, location: &str, _dest_dir: &Path, _stem: &str) -> Result<PathBuf> {
        let path = Self::local_path(location)
            .ok_or_else(|| Error::Transport(format!("Not a local path: {location}")))?;
        let path = tokio::fs::canonicalize(&path)
            .await
            .map_err(|e| Error::Transport(format!("{}: {e}", path.display())))?;

        let mut allowed = false;
        for root in &self.roots {
            if let Ok(root) = tokio::fs::canonicalize(root).await
                && path.starts_with(&root)
            {
                allowed = true;
                break;
            }
        }
        if !allowed {
            return Err(Error::Transport(format!(
                "{} is outside the allowed input directories",
                path.display()
            )));
        }

        verify_media_file(&path).await?;
        Ok(path)
    }
}

/// Downloads over HTTP(S).
pub struct HttpStrategy {
    client: reqwest::Client,
}

impl HttpStrategy {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn download(&self, url: &Url, path: &Path) -> Result<u64> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Transport(format!("Request failed: {e}")))?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if content_type.contains("text/html") {
            return Err(Error::Transport(
                "Server returned an HTML page instead of media".to_string(),
            ));
        }

        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| Error::io_path("creating", path, e))?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Transport(format!("Download interrupted: {e}")))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| Error::io_path("writing", path, e))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| Error::io_path("writing", path, e))?;
        Ok(written)
    }
}

#[async_trait]
impl FetchStrategy for HttpStrategy {
    fn name(&self) -> &'static str {
        "http"
    }

    fn supports(&self, location: &str) -> bool {
        Url::parse(location).is_ok_and(|u| matches!(u.scheme(), "http" | "https"))
    }

    async fn fetch(&self, location: &str, dest_dir: &Path, stem: &str) -> Result<PathBuf> {
        let url = Url::parse(location)
            .map_err(|e| Error::Transport(format!("Invalid URL {location}: {e}")))?;
        let path = dest_dir.join(format!("{stem}.{}", guess_extension(&url)));

        let result = match self.download(&url, &path).await {
            Ok(bytes) => {
                debug!(%url, bytes, "Download finished");
                verify_media_file(&path).await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            if let Err(rm) = tokio::fs::remove_file(&path).await
                && rm.kind() != std::io::ErrorKind::NotFound
            {
                warn!(path = %path.display(), error = %rm, "Failed to remove partial download");
            }
            return Err(e);
        }
        Ok(path)
    }
}
