use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use log::debug;

use crate::error::PlinkError;

/// Persists device transcripts.
///
/// `group` is the schedule name of the batch, if any. `write` returns the
/// artifact key under which the content was stored.
pub trait LogStore: Send + Sync {
    fn write(&self, group: Option<&str>, key: &str, content: &str) -> Result<String, PlinkError>;
}

/// Writes each transcript to `<root>/[<group>/]<YYYY-MM-DD>/<key>.log`.
///
/// The date is today's local date at the time of the write.
#[derive(Debug, Clone)]
pub struct FileLogStore {
    root: PathBuf,
}

impl FileLogStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory that a write for `group` would use today.
    pub fn dir_for(&self, group: Option<&str>) -> PathBuf {
        let mut dir = self.root.clone();
        if let Some(name) = group.filter(|name| !name.is_empty()) {
            dir.push(sanitize(name));
        }
        dir.push(Local::now().format("%Y-%m-%d").to_string());
        dir
    }
}

impl LogStore for FileLogStore {
    fn write(&self, group: Option<&str>, key: &str, content: &str) -> Result<String, PlinkError> {
        let dir = self.dir_for(group);
        fs::create_dir_all(&dir).map_err(|e| {
            PlinkError::LogPersist(format!("cannot create {}: {e}", dir.display()))
        })?;
        let path = dir.join(format!("{}.log", sanitize(key)));
        fs::write(&path, content)
            .map_err(|e| PlinkError::LogPersist(format!("{}: {e}", path.display())))?;
        debug!("Transcript saved to {}", path.display());
        Ok(path.to_string_lossy().replace('\\', "/"))
    }
}

/// Keeps transcripts in memory, keyed by `[<group>/]<key>`.
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    entries: Mutex<HashMap<String, String>>,
    fail_with: Option<String>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every write fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            fail_with: Some(reason.into()),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogStore for MemoryLogStore {
    fn write(&self, group: Option<&str>, key: &str, content: &str) -> Result<String, PlinkError> {
        if let Some(reason) = self.fail_with.as_ref() {
            return Err(PlinkError::LogPersist(reason.clone()));
        }
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| PlinkError::Internal(format!("log store lock error: {e}")))?;
        let key = match group.filter(|name| !name.is_empty()) {
            Some(group) => format!("{group}/{key}"),
            None => key.to_string(),
        };
        entries.insert(key.clone(), content.to_string());
        Ok(key)
    }
}

/// Replaces characters that would escape the log directory or are invalid in file names.
fn sanitize(key: &str) -> String {
    let cleaned: String = key
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => "unnamed".to_string(),
        trimmed => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_writes_transcript_under_dated_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileLogStore::new(dir.path().join("logs"));
        let today = Local::now().format("%Y-%m-%d").to_string();

        let key = store.write(None, "core-sw1", "show ver\r\nIOS\r\n").expect("write");

        assert!(key.ends_with(&format!("logs/{today}/core-sw1.log")));
        let saved = fs::read_to_string(dir.path().join("logs").join(&today).join("core-sw1.log"))
            .expect("read");
        assert_eq!(saved, "show ver\r\nIOS\r\n");
    }

    #[test]
    fn schedule_group_nests_above_the_date() {
        let store = FileLogStore::new("logs");
        let today = Local::now().format("%Y-%m-%d").to_string();
        assert_eq!(
            store.dir_for(Some("nightly")),
            Path::new("logs").join("nightly").join(&today)
        );
        assert_eq!(store.dir_for(Some("")), Path::new("logs").join(&today));
        assert_eq!(store.dir_for(None), Path::new("logs").join(today));
    }

    #[test]
    fn keys_cannot_escape_the_log_directory() {
        assert_eq!(sanitize("../etc/passwd"), ".._etc_passwd");
        assert_eq!(sanitize("r1:22"), "r1_22");
        assert_eq!(sanitize(".."), "unnamed");
    }

    #[test]
    fn file_store_reports_persist_error_when_root_is_a_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "x").expect("write");

        let store = FileLogStore::new(&blocker);
        let err = store.write(None, "r1", "data").expect_err("must fail");
        assert!(matches!(err, PlinkError::LogPersist(_)));
    }

    #[test]
    fn memory_store_keeps_content_and_can_fail() {
        let store = MemoryLogStore::new();
        assert_eq!(store.write(None, "r1", "out").expect("write"), "r1");
        assert_eq!(store.write(Some("nightly"), "r1", "later").expect("write"), "nightly/r1");
        assert_eq!(store.get("r1").as_deref(), Some("out"));
        assert_eq!(store.get("nightly/r1").as_deref(), Some("later"));
        assert_eq!(store.len(), 2);

        let failing = MemoryLogStore::failing("disk full");
        assert_eq!(
            failing.write(None, "r1", "out"),
            Err(PlinkError::LogPersist("disk full".to_string()))
        );
        assert!(failing.is_empty());
    }
}
