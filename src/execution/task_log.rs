//! # Node-Local Task Logs
//!
//! Every task writes its log under
//! `{log_root}/{task_type}/{creator_id}/{task_id}/{level}.log` on the node
//! that executes it. `all.log` receives every line, `warn.log` only warnings
//! and errors.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::io::AsyncWriteExt;

use crate::error::{FlowError, FlowResult};
use crate::models::TaskEntity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    #[default]
    All,
    Warn,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Warn => "warn",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "warn" => Ok(Self::Warn),
            _ => Err(FlowError::Validation(format!("Invalid log level: {s}"))),
        }
    }
}

pub fn task_log_dir(log_root: &Path, task: &TaskEntity) -> PathBuf {
    log_root
        .join(task.task_type.as_str())
        .join(task.creator_id.to_string())
        .join(task.id.to_string())
}

pub fn task_log_path(log_root: &Path, task: &TaskEntity, level: LogLevel) -> PathBuf {
    task_log_dir(log_root, task).join(format!("{}.log", level.as_str()))
}

#[derive(Debug, Clone)]
pub struct TaskLogWriter {
    dir: PathBuf,
}

impl TaskLogWriter {
    pub fn new(log_root: &Path, task: &TaskEntity) -> Self {
        Self {
            dir: task_log_dir(log_root, task),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn info(&self, message: &str) -> FlowResult<()> {
        self.append(LogLevel::All, "INFO", message).await
    }

    pub async fn warn(&self, message: &str) -> FlowResult<()> {
        self.append(LogLevel::All, "WARN", message).await?;
        self.append(LogLevel::Warn, "WARN", message).await
    }

    pub async fn error(&self, message: &str) -> FlowResult<()> {
        self.append(LogLevel::All, "ERROR", message).await?;
        self.append(LogLevel::Warn, "ERROR", message).await
    }

    async fn append(&self, level: LogLevel, tag: &str, message: &str) -> FlowResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(format!("{}.log", level.as_str())))
            .await?;
        let line = format!("{} {tag} {message}\n", Utc::now().to_rfc3339());
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Last `max_lines` lines of a log, capped at `max_bytes`; `None` when the
/// log does not exist yet
pub async fn read_log_tail(
    path: &Path,
    max_lines: usize,
    max_bytes: usize,
) -> FlowResult<Option<String>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let text = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    let mut tail = lines[start..].join("\n");

    if tail.len() > max_bytes {
        let mut cut = tail.len() - max_bytes;
        while !tail.is_char_boundary(cut) {
            cut += 1;
        }
        tail = tail[cut..].to_string();
    }
    Ok(Some(tail))
}
