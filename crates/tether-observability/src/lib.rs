//! Structured logging for Tether processes.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    /// The editor extension host embedding the chat panel.
    Host,
    /// Headless supervision, e.g. scripted runs and diagnostics.
    Headless,
}

impl ProcessKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessKind::Host => "host",
            ProcessKind::Headless => "headless",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoggingInitInfo {
    pub process: String,
    pub logs_dir: String,
    pub prefix: String,
    pub retention_days: u64,
    pub initialized_at: DateTime<Utc>,
}

/// Fixed-shape lifecycle record. Empty fields are logged as "".
#[derive(Debug, Clone, Default, Serialize)]
pub struct ObservabilityEvent<'a> {
    pub event: &'a str,
    pub component: &'a str,
    pub session_id: Option<&'a str>,
    pub plan_session_id: Option<&'a str>,
    pub model_id: Option<&'a str>,
    pub classification: Option<&'a str>,
    pub status: Option<&'a str>,
    pub detail: Option<&'a str>,
}

pub fn redact_text(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    format!(
        "[redacted len={} hash={}]",
        trimmed.len(),
        short_hash(trimmed)
    )
}

pub fn short_hash(input: &str) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    input.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

pub fn emit_event(level: Level, process: ProcessKind, event: ObservabilityEvent<'_>) {
    macro_rules! record {
        ($mac:ident) => {
            tracing::$mac!(
                target: "tether.obs",
                process = process.as_str(),
                component = event.component,
                event = event.event,
                session_id = event.session_id.unwrap_or(""),
                plan_session_id = event.plan_session_id.unwrap_or(""),
                model_id = event.model_id.unwrap_or(""),
                classification = event.classification.unwrap_or(""),
                status = event.status.unwrap_or(""),
                detail = event.detail.unwrap_or(""),
                "observability_event"
            )
        };
    }
    match level {
        Level::ERROR => record!(error),
        Level::WARN => record!(warn),
        Level::DEBUG | Level::TRACE => record!(debug),
        _ => record!(info),
    }
}

/// Installs the global subscriber: console output plus a JSONL file per day
/// under `logs_dir`. Files of this process older than `retention_days` are
/// removed first. Keep the returned guard alive to flush the file writer.
pub fn init_process_logging(
    process: ProcessKind,
    logs_dir: &Path,
    retention_days: u64,
) -> anyhow::Result<(WorkerGuard, LoggingInitInfo)> {
    fs::create_dir_all(logs_dir)?;
    let prefix = log_prefix(process);
    let removed = cleanup_old_jsonl(logs_dir, process.as_str(), retention_days)?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(&prefix)
        .filename_suffix("jsonl")
        .build(logs_dir)?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_target(true))
        .with(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_current_span(false)
                .with_span_list(false),
        )
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!(removed, logs_dir = %logs_dir.display(), "logging initialised");
    }

    Ok((
        guard,
        LoggingInitInfo {
            process: process.as_str().to_string(),
            logs_dir: logs_dir.display().to_string(),
            prefix,
            retention_days,
            initialized_at: Utc::now(),
        },
    ))
}

fn log_prefix(process: ProcessKind) -> String {
    format!("tether.{}", process.as_str())
}

/// Date stamped into `tether.<proc>.YYYY-MM-DD.jsonl`, if `name` is one of ours.
fn log_file_date(name: &str, process: &str) -> Option<NaiveDate> {
    let stamp = name
        .strip_prefix("tether.")?
        .strip_prefix(process)?
        .strip_prefix('.')?
        .strip_suffix(".jsonl")?;
    NaiveDate::parse_from_str(stamp, "%Y-%m-%d").ok()
}

/// Deletes this process's daily log files older than the retention window.
/// Returns how many were removed.
fn cleanup_old_jsonl(logs_dir: &Path, process: &str, retention_days: u64) -> anyhow::Result<usize> {
    let oldest_kept = Utc::now().date_naive() - chrono::Duration::days(retention_days as i64);
    let expired: Vec<PathBuf> = fs::read_dir(logs_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .and_then(|name| log_file_date(name, process))
                .is_some_and(|date| date < oldest_kept)
        })
        .collect();

    let mut removed = 0;
    for path in expired {
        if fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_text_masks_content() {
        let raw = "please refactor the billing module";
        let redacted = redact_text(raw);
        assert!(redacted.contains("[redacted len="));
        assert!(!redacted.contains("billing"));
        assert_eq!(redact_text("   "), "");
    }

    #[test]
    fn cleanup_removes_only_expired_logs_for_the_process() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("tether.host.2001-01-01.jsonl");
        let fresh_name = format!("tether.host.{}.jsonl", Utc::now().format("%Y-%m-%d"));
        let fresh = dir.path().join(fresh_name);
        let other = dir.path().join("tether.headless.2001-01-01.jsonl");
        for path in [&stale, &fresh, &other] {
            fs::write(path, b"{}\n").unwrap();
        }

        let removed = cleanup_old_jsonl(dir.path(), ProcessKind::Host.as_str(), 7).unwrap();

        assert_eq!(removed, 1);
        assert!(!stale.exists());
        assert!(fresh.exists());
        assert!(other.exists());
    }

    #[test]
    fn log_file_date_ignores_foreign_names() {
        assert!(log_file_date("tether.host.2026-03-04.jsonl", "host").is_some());
        assert!(log_file_date("tether.host.latest.jsonl", "host").is_none());
        assert!(log_file_date("tether.headless.2026-03-04.jsonl", "host").is_none());
        assert!(log_file_date("other.host.2026-03-04.jsonl", "host").is_none());
    }

    #[test]
    fn init_process_logging_prepares_dir_and_prunes_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        let logs_dir = dir.path().join("logs");
        fs::create_dir_all(&logs_dir).unwrap();
        let stale = logs_dir.join("tether.headless.2001-01-01.jsonl");
        fs::write(&stale, b"{}\n").unwrap();

        let (_guard, info) = init_process_logging(ProcessKind::Headless, &logs_dir, 3).unwrap();

        assert_eq!(info.process, "headless");
        assert_eq!(info.prefix, "tether.headless");
        assert_eq!(info.retention_days, 3);
        assert_eq!(info.logs_dir, logs_dir.display().to_string());
        assert!(!stale.exists());
        assert!(logs_dir.is_dir());
    }
}
