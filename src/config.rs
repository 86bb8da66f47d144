//! Command line and the immutable server configuration built from it.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::content::ContentSource;
use crate::error::ConfigError;
use crate::style::StylePolicy;

pub const DEFAULT_MAX_WIDTH: u16 = 78;
pub const DEFAULT_HEIGHT: u16 = 24;

/// Smallest frame that leaves one column and one row of content inside the
/// border and padding.
const MIN_FRAME_WIDTH: u16 = 5;

#[derive(Debug, Parser)]
#[command(
    name = "sshmd",
    version,
    about = "Serve a markdown README over SSH"
)]
pub struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 22)]
    pub port: u16,

    /// SSH host key (OpenSSH private key file).
    #[arg(long, default_value = ".ssh/id_ed25519")]
    pub host_key: PathBuf,

    /// Local markdown file, also the fallback when the remote fetch fails.
    #[arg(long, default_value = "./README.md")]
    pub readme: PathBuf,

    /// Remote markdown URL fetched for every session.
    #[arg(long, env = "README_URL")]
    pub readme_url: Option<String>,

    /// Maximum frame width in columns.
    #[arg(long, default_value_t = DEFAULT_MAX_WIDTH)]
    pub max_width: u16,

    /// Rows used when the client reports no window size.
    #[arg(long, default_value_t = DEFAULT_HEIGHT)]
    pub default_height: u16,

    /// How document colours are chosen.
    #[arg(long, value_enum, default_value_t = StylePolicy::NoColorOverride)]
    pub style: StylePolicy,

    /// Give up on the remote fetch after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub remote_timeout: Option<u64>,

    /// Treat non-2xx responses from the remote URL as failures.
    #[arg(long)]
    pub strict_remote_status: bool,

    /// Seconds to wait for open sessions on shutdown.
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    pub shutdown_timeout: u64,
}

/// Frame sizing shared by every session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ViewConfig {
    pub max_width: u16,
    pub default_height: u16,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_MAX_WIDTH,
            default_height: DEFAULT_HEIGHT,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub host_key: PathBuf,
    pub content: ContentSource,
    pub view: ViewConfig,
    pub style: StylePolicy,
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        if cli.host.trim().is_empty() {
            return Err(ConfigError::new("--host must not be empty"));
        }
        if cli.max_width < MIN_FRAME_WIDTH {
            return Err(ConfigError::new(format!(
                "--max-width must be at least {MIN_FRAME_WIDTH}, got {}",
                cli.max_width
            )));
        }
        if cli.default_height < 3 {
            return Err(ConfigError::new(format!(
                "--default-height must be at least 3, got {}",
                cli.default_height
            )));
        }
        if cli.remote_timeout == Some(0) {
            return Err(ConfigError::new("--remote-timeout must be positive"));
        }

        let mut content = ContentSource::local(cli.readme);
        if let Some(url) = cli.readme_url {
            content = content.with_remote(url);
        }
        content.remote_timeout = cli.remote_timeout.map(Duration::from_secs);
        content.strict_status = cli.strict_remote_status;

        Ok(Self {
            host: cli.host,
            port: cli.port,
            host_key: cli.host_key,
            content,
            view: ViewConfig {
                max_width: cli.max_width,
                default_height: cli.default_height,
            },
            style: cli.style,
            shutdown_timeout: Duration::from_secs(cli.shutdown_timeout),
        })
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn listen_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 22,
            host_key: PathBuf::from(".ssh/id_ed25519"),
            content: ContentSource::local("./README.md"),
            view: ViewConfig::default(),
            style: StylePolicy::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["sshmd"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_cli(parse(&["--readme-url", ""])).unwrap();
        assert_eq!(config.listen_addr(), "0.0.0.0:22");
        assert_eq!(config.host_key, PathBuf::from(".ssh/id_ed25519"));
        assert_eq!(config.content.local_path, PathBuf::from("./README.md"));
        assert_eq!(config.content.remote_url, None);
        assert_eq!(config.content.remote_timeout, None);
        assert!(!config.content.strict_status);
        assert_eq!(config.view, ViewConfig::default());
        assert_eq!(config.style, StylePolicy::NoColorOverride);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_remote_options() {
        let config = ServerConfig::from_cli(parse(&[
            "--readme-url",
            "https://example.com/README.md",
            "--remote-timeout",
            "5",
            "--strict-remote-status",
        ]))
        .unwrap();
        assert_eq!(
            config.content.remote_url.as_deref(),
            Some("https://example.com/README.md")
        );
        assert_eq!(config.content.remote_timeout, Some(Duration::from_secs(5)));
        assert!(config.content.strict_status);
    }

    #[test]
    fn test_style_values() {
        let cli = parse(&["--style", "auto"]);
        assert_eq!(cli.style, StylePolicy::Automatic);
        let cli = parse(&["--style", "no-color-override"]);
        assert_eq!(cli.style, StylePolicy::NoColorOverride);
        assert!(Cli::try_parse_from(["sshmd", "--style", "loud"]).is_err());
    }

    #[test]
    fn test_rejects_unusable_sizes() {
        let err = ServerConfig::from_cli(parse(&["--max-width", "2"])).unwrap_err();
        assert!(err.message.contains("--max-width"));
        assert!(ServerConfig::from_cli(parse(&["--default-height", "1"])).is_err());
        assert!(ServerConfig::from_cli(parse(&["--remote-timeout", "0"])).is_err());
    }

    #[test]
    fn test_ipv6_listen_addr() {
        let config = ServerConfig::from_cli(parse(&["--host", "::1", "--port", "2222"])).unwrap();
        assert_eq!(config.listen_addr(), "[::1]:2222");
    }
}
