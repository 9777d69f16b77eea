use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Article URLs posted recently, kept so consecutive runs do not publish the same headline.
///
/// The file is a JSON object mapping URL to the RFC 3339 time of the post. It is a hint,
/// not a record: a missing or corrupt file only means a headline may be posted twice.
#[derive(Debug, Clone)]
pub struct PostHistory {
    path: Option<PathBuf>,
    retention_days: i64,
    entries: BTreeMap<String, DateTime<Utc>>,
}

impl PostHistory {
    /// History that is never written to disk.
    pub fn in_memory(retention_days: i64) -> Self {
        Self {
            path: None,
            retention_days,
            entries: BTreeMap::new(),
        }
    }

    /// Load the history file and prune entries older than the retention window.
    pub async fn load(path: impl Into<PathBuf>, retention_days: i64, now: DateTime<Utc>) -> Self {
        let path = path.into();
        let mut history = Self {
            path: Some(path.clone()),
            ..Self::in_memory(retention_days)
        };

        match read_entries(&path).await {
            Ok(Some(entries)) => history.entries = entries,
            Ok(None) => info!(path = %path.display(), "history: no file yet, starting empty"),
            Err(e) => warn!(path = %path.display(), "history: ignoring unreadable file: {:#}", e),
        }

        let before = history.entries.len();
        history.prune(now);
        info!(
            tracked = history.entries.len(),
            expired = before - history.entries.len(),
            "history: loaded"
        );
        history
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }

    pub fn record(&mut self, url: impl Into<String>, at: DateTime<Utc>) {
        self.entries.insert(url.into(), at);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        // a window reaching past the calendar range keeps everything
        let Some(cutoff) = Duration::try_days(self.retention_days).and_then(|r| now.checked_sub_signed(r)) else {
            return;
        };
        self.entries.retain(|_, posted_at| *posted_at > cutoff);
    }

    /// Write the history back. Goes through a sibling temp file so a crash never leaves
    /// a truncated file behind.
    pub async fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create history directory: {}", parent.display()))?;
        }

        let data = serde_json::to_vec_pretty(&self.entries).context("Failed to serialize history")?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data)
            .await
            .with_context(|| format!("Failed to write history file: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Failed to replace history file: {}", path.display()))?;
        Ok(())
    }
}

async fn read_entries(path: &Path) -> Result<Option<BTreeMap<String, DateTime<Utc>>>> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(None);
    }
    let data = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read history file: {}", path.display()))?;
    let entries = serde_json::from_str(&data).context("Failed to parse history file")?;
    Ok(Some(entries))
}
