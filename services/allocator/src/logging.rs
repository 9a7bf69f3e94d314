//! Tracing setup.
//!
//! Events go to stdout as JSON. When a log file is configured the same JSON
//! lines are appended to it as well.

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins over `log_level`.
pub fn init(log_level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let file = log_file.map(open_log_file).transpose()?;
    subscriber(filter, file)
        .try_init()
        .context("failed to install tracing subscriber")
}

fn subscriber(filter: EnvFilter, file: Option<File>) -> impl tracing::Subscriber + Send + Sync {
    let file_layer = file.map(|file| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(Mutex::new(file))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .with(file_layer)
}

/// Open `path` for appending, creating it and its directory if missing.
pub fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use simalloc_testing::Workspace;
    use std::io::Write;

    #[test]
    fn test_file_receives_json_events() {
        let ws = Workspace::new();
        let path = ws.path().join("logs").join("allocator.json");
        let file = open_log_file(&path).unwrap();

        tracing::subscriber::with_default(subscriber(EnvFilter::new("info"), Some(file)), || {
            tracing::info!(worker_id = "w1", "Scenario allocated");
            tracing::debug!("filtered out");
        });

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["level"], "INFO");
        assert_eq!(lines[0]["fields"]["message"], "Scenario allocated");
        assert_eq!(lines[0]["fields"]["worker_id"], "w1");
    }

    #[test]
    fn test_open_log_file_appends() {
        let ws = Workspace::new();
        let path = ws.path().join("allocator.json");
        fs::write(&path, "first\n").unwrap();

        writeln!(open_log_file(&path).unwrap(), "second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }
}
