//! Where a session's document comes from.
//!
//! A configured remote URL is tried once; any failure falls back to the local
//! file. Nothing is cached, so every session sees the current content.

use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ContentError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DocumentOrigin {
    Remote(String),
    Local(PathBuf),
}

/// Raw document bytes and where they were read from.
#[derive(Clone, Debug)]
pub struct Document {
    pub bytes: Vec<u8>,
    pub origin: DocumentOrigin,
}

#[derive(Clone, Debug)]
pub struct ContentSource {
    pub remote_url: Option<String>,
    pub local_path: PathBuf,
    /// Overall deadline for the remote fetch. `None` waits as long as the
    /// server keeps the connection open.
    pub remote_timeout: Option<Duration>,
    /// Treat non-2xx responses as failures instead of using their body.
    pub strict_status: bool,
}

impl ContentSource {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            remote_url: None,
            local_path: path.into(),
            remote_timeout: None,
            strict_status: false,
        }
    }

    pub fn with_remote(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.remote_url = (!url.trim().is_empty()).then_some(url);
        self
    }

    pub async fn resolve(&self) -> Result<Document, ContentError> {
        let Some(url) = self.remote_url.as_deref() else {
            return self.read_local().await;
        };

        debug!(url, "fetching remote README");
        match self.fetch_remote(url).await {
            Ok(bytes) => Ok(Document {
                bytes,
                origin: DocumentOrigin::Remote(url.to_string()),
            }),
            Err(remote) => {
                warn!("{remote}; falling back to local README");
                self.read_local()
                    .await
                    .map_err(|local| ContentError::Fallback {
                        remote: Box::new(remote),
                        local: Box::new(local),
                    })
            }
        }
    }

    async fn read_local(&self) -> Result<Document, ContentError> {
        let bytes = tokio::fs::read(&self.local_path)
            .await
            .map_err(|err| ContentError::local(&self.local_path, err))?;
        debug!(path = %self.local_path.display(), len = bytes.len(), "read local README");
        Ok(Document {
            bytes,
            origin: DocumentOrigin::Local(self.local_path.clone()),
        })
    }

    async fn fetch_remote(&self, url: &str) -> Result<Vec<u8>, ContentError> {
        let owned = url.to_string();
        let timeout = self.remote_timeout;
        let strict = self.strict_status;
        tokio::task::spawn_blocking(move || fetch_blocking(&owned, timeout, strict))
            .await
            .map_err(|err| ContentError::remote(url, format!("fetch task failed: {err}")))?
    }
}

fn fetch_blocking(
    url: &str,
    timeout: Option<Duration>,
    strict_status: bool,
) -> Result<Vec<u8>, ContentError> {
    let mut builder = ureq::AgentBuilder::new();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    let agent = builder.build();

    let response = match agent.get(url).call() {
        Ok(response) => response,
        Err(ureq::Error::Status(code, response)) if !strict_status => {
            debug!(url, code, "remote README answered with an error status, using its body");
            response
        }
        Err(ureq::Error::Status(code, _)) => {
            return Err(ContentError::remote(url, format!("HTTP status {code}")));
        }
        Err(err) => return Err(ContentError::remote(url, err.to_string())),
    };

    let mut bytes = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut bytes)
        .map_err(|err| ContentError::remote(url, err.to_string()))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn readme(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    /// A URL on a loopback port nothing listens on.
    async fn refused_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}/README.md")
    }

    /// Serve one HTTP response on loopback and return its URL.
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
        });
        format!("http://{addr}/README.md")
    }

    #[tokio::test]
    async fn test_local_only() {
        let file = readme("# local");
        let doc = ContentSource::local(file.path()).resolve().await.unwrap();
        assert_eq!(doc.bytes, b"# local");
        assert_eq!(doc.origin, DocumentOrigin::Local(file.path().to_path_buf()));
    }

    #[tokio::test]
    async fn test_missing_local_without_remote_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ContentSource::local(dir.path().join("README.md"))
            .resolve()
            .await
            .unwrap_err();
        assert!(matches!(err, ContentError::Local { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_remote_falls_back_to_local() {
        let file = readme("# fallback");
        let source = ContentSource::local(file.path()).with_remote(refused_url().await);
        let doc = source.resolve().await.unwrap();
        assert_eq!(doc.bytes, b"# fallback");
        assert!(matches!(doc.origin, DocumentOrigin::Local(_)));
    }

    #[tokio::test]
    async fn test_both_sources_failing_reports_both() {
        let dir = tempfile::tempdir().unwrap();
        let source =
            ContentSource::local(dir.path().join("README.md")).with_remote(refused_url().await);
        let err = source.resolve().await.unwrap_err();
        assert!(matches!(err, ContentError::Fallback { .. }));
    }

    #[tokio::test]
    async fn test_remote_body_is_used() {
        let file = readme("# local");
        let url = serve_once("200 OK", "# remote").await;
        let doc = ContentSource::local(file.path())
            .with_remote(url.clone())
            .resolve()
            .await
            .unwrap();
        assert_eq!(doc.bytes, b"# remote");
        assert_eq!(doc.origin, DocumentOrigin::Remote(url));
    }

    #[tokio::test]
    async fn test_error_status_body_is_accepted_by_default() {
        let file = readme("# local");
        let url = serve_once("404 Not Found", "not here").await;
        let doc = ContentSource::local(file.path())
            .with_remote(url)
            .resolve()
            .await
            .unwrap();
        assert_eq!(doc.bytes, b"not here");
    }

    #[tokio::test]
    async fn test_strict_status_falls_back_on_error_status() {
        let file = readme("# local");
        let url = serve_once("500 Internal Server Error", "boom").await;
        let mut source = ContentSource::local(file.path()).with_remote(url);
        source.strict_status = true;
        let doc = source.resolve().await.unwrap();
        assert_eq!(doc.bytes, b"# local");
    }

    #[test]
    fn test_blank_url_means_local_only() {
        let source = ContentSource::local("README.md").with_remote("  ");
        assert_eq!(source.remote_url, None);
    }
}
