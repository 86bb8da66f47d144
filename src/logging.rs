//! Logging configuration using tracing

use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable holding the filter directives.
pub const LOG_ENV: &str = "SSHMD_LOG";

const DEFAULT_FILTER: &str = "sshmd=info,russh=warn";

/// Initialize the logging subsystem
///
/// Logs go to stderr. Level is controlled by `SSHMD_LOG`.
///
/// # Examples
/// ```bash
/// SSHMD_LOG=debug sshmd --port 2222
/// SSHMD_LOG=sshmd=trace,russh=debug sshmd
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(filter())
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false),
        )
        .init();
}

/// Log a startup failure before it is returned from `main`, so it reaches
/// the same log as everything else.
pub fn fatal<T, E>(result: Result<T, E>, context: &'static str) -> anyhow::Result<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    result.map_err(|err| {
        error!("{context}: {err}");
        anyhow::Error::new(err).context(context)
    })
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

#[cfg(test)]
mod tests {
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_fatal_errors_are_logged_and_returned() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let result = tracing::subscriber::with_default(subscriber, || {
            let bind: Result<(), io::Error> =
                Err(io::Error::new(io::ErrorKind::AddrInUse, "address in use"));
            fatal(bind, "failed to start listener")
        });

        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "failed to start listener");
        assert_eq!(err.root_cause().to_string(), "address in use");
        let logged = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logged.contains("ERROR"));
        assert!(logged.contains("failed to start listener: address in use"));
    }

    #[test]
    fn test_fatal_passes_success_through() {
        let value = fatal(Ok::<_, io::Error>(7), "unused").unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_default_filter_parses() {
        let filter = EnvFilter::new(DEFAULT_FILTER);
        assert!(filter.to_string().contains("sshmd=info"));
    }
}
