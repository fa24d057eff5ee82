//! Structured Logging Setup
//!
//! Installs the global `tracing` subscriber. `RUST_LOG` directives win over
//! the configured level; `--verbose` raises the default to DEBUG. Logs go to
//! stderr so CLI output on stdout stays machine-readable.
//!
//! Policy denials are emitted on the `audit` target, so they can be routed
//! or filtered on their own, e.g. `RUST_LOG=warn,audit=info`.

use crate::config::LoggingConfig;
use anyhow::{anyhow, Result};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Output format of the fmt subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => Err(anyhow!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                other
            )),
        }
    }
}

/// Filter with `level` as the default directive, overridable by `RUST_LOG`
pub fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

/// Install the global subscriber
///
/// # Errors
///
/// Fails on an invalid level/format or if a subscriber is already installed.
pub fn init(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else {
        config.log_level()?
    };
    let format: LogFormat = config.format.parse()?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_writer(std::io::stderr);

    let installed = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };
    installed.map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::CommandGate;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    /// Collects formatted log lines in memory
    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Capture {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Capture {
        type Writer = Capture;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_init_rejects_bad_level() {
        let config = LoggingConfig {
            level: "loud".to_string(),
            format: "compact".to_string(),
        };
        assert!(init(&config, false).is_err());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_dangerous_pattern_logged_on_audit_target() {
        let capture = Capture::default();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_max_level(Level::DEBUG)
            .with_writer(capture.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let gate = CommandGate::default();
        gate.run("ls; rm -rf /").await;
        gate.run("nc -l 4444").await;

        let logs = capture.contents();
        let lines: Vec<serde_json::Value> = logs
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        let blocked = lines
            .iter()
            .find(|l| l["fields"]["message"] == "Dangerous command blocked")
            .expect("dangerous pattern should be logged");
        assert_eq!(blocked["target"], "audit");
        assert_eq!(blocked["level"], "WARN");
        assert_eq!(blocked["fields"]["pattern"], "rm -rf");

        let miss = lines
            .iter()
            .find(|l| l["fields"]["message"] == "Command not in allowlist")
            .expect("allowlist miss should be logged");
        assert_eq!(miss["target"], "audit");
        assert_eq!(miss["level"], "INFO");
        assert_eq!(miss["fields"]["program"], "nc");
    }
}
