//! Error types for each layer of the server

use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to obtain the document for a session.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("failed to fetch {url}: {message}")]
    Remote { url: String, message: String },

    #[error("failed to read {}: {source}", path.display())]
    Local {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{remote}; local fallback also failed: {local}")]
    Fallback {
        remote: Box<ContentError>,
        local: Box<ContentError>,
    },
}

impl ContentError {
    pub fn remote(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn local(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Local {
            path: path.into(),
            source,
        }
    }
}

/// Failure to turn a document into terminal lines.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("wrap width must be at least one column")]
    ZeroWidth,

    #[error("syntax highlighting failed: {0}")]
    Highlight(#[from] syntect::Error),
}

/// Errors that end a single session. Never escalated past the session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Content(#[from] ContentError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("terminal output failed: {0}")]
    Terminal(#[from] std::io::Error),
}

/// Invalid command line or environment configuration.
#[derive(Debug, Error)]
#[error("invalid configuration: {message}")]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Startup, transport and shutdown errors of the SSH server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("could not bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not load host key {}: {message}", path.display())]
    HostKey { path: PathBuf, message: String },

    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    #[error("connection from {peer} failed: {message}")]
    Connection { peer: SocketAddr, message: String },

    #[error("signal handler error: {0}")]
    Signal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_message_names_both_failures() {
        let err = ContentError::Fallback {
            remote: Box::new(ContentError::remote("http://example.invalid", "refused")),
            local: Box::new(ContentError::local(
                "./README.md",
                std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
            )),
        };
        let message = err.to_string();
        assert!(message.contains("http://example.invalid"));
        assert!(message.contains("./README.md"));
    }

    #[test]
    fn test_server_errors_name_their_subject() {
        let bind = ServerError::Bind {
            addr: "0.0.0.0:22".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(bind.to_string().contains("0.0.0.0:22"));

        let conn = ServerError::Connection {
            peer: "127.0.0.1:4000".parse().unwrap(),
            message: "reset".to_string(),
        };
        assert_eq!(conn.to_string(), "connection from 127.0.0.1:4000 failed: reset");
    }
}
