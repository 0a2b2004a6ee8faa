use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// How many delivered identities are remembered
pub const MAX_PROCESSED_IDS: usize = 200;

/// Dedup history persisted between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DedupState {
    #[serde(default)]
    pub last_uid: Option<String>,
    #[serde(default)]
    pub processed_ids: VecDeque<String>,
}

impl DedupState {
    /// Whether this identity was already delivered.
    pub fn contains(&self, uid: &str) -> bool {
        self.last_uid.as_deref() == Some(uid) || self.processed_ids.iter().any(|id| id == uid)
    }

    /// Record a delivered identity, evicting the oldest entries past the limit.
    pub fn record(&mut self, uid: String) {
        self.processed_ids.push_back(uid.clone());
        while self.processed_ids.len() > MAX_PROCESSED_IDS {
            self.processed_ids.pop_front();
        }
        self.last_uid = Some(uid);
    }
}

/// JSON file backing a [`DedupState`].
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the state, falling back to an empty one when the file is
    /// missing or unreadable.
    pub fn load(&self) -> DedupState {
        if !self.path.exists() {
            info!("No state file at {}, starting fresh", self.path.display());
            return DedupState::default();
        }

        match self.try_load() {
            Ok(state) => {
                info!(
                    "Loaded state from {} ({} processed ids)",
                    self.path.display(),
                    state.processed_ids.len()
                );
                state
            }
            Err(e) => {
                error!("Error loading state: {:#}", e);
                warn!("Continuing with empty state");
                DedupState::default()
            }
        }
    }

    fn try_load(&self) -> Result<DedupState> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state file: {}", self.path.display()))?;
        let mut state: DedupState = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", self.path.display()))?;

        // Files written by hand or by older builds may exceed the limit
        while state.processed_ids.len() > MAX_PROCESSED_IDS {
            state.processed_ids.pop_front();
        }
        Ok(state)
    }

    /// Overwrite the file with `state`. Written to a sibling temp file and
    /// renamed so a crash never leaves a truncated document behind.
    pub fn save(&self, state: &DedupState) -> Result<()> {
        let json = serde_json::to_string_pretty(state).context("Failed to serialize state")?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create state directory: {}", parent.display())
            })?;
        }

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write state file: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace state file: {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_record_sets_last_uid_and_history() {
        let mut state = DedupState::default();
        state.record("a".to_string());

        assert_eq!(state.last_uid.as_deref(), Some("a"));
        assert!(state.processed_ids.contains(&"a".to_string()));
        assert!(state.contains("a"));
        assert!(!state.contains("b"));
    }

    #[test]
    fn test_history_is_bounded_fifo() {
        let mut state = DedupState::default();
        for i in 0..250 {
            state.record(format!("id-{i}"));
        }

        assert_eq!(state.processed_ids.len(), MAX_PROCESSED_IDS);
        assert_eq!(state.processed_ids.front().map(String::as_str), Some("id-50"));
        assert_eq!(state.processed_ids.back().map(String::as_str), Some("id-249"));
        assert!(!state.contains("id-49"));
        assert!(state.contains("id-50"));
        assert_eq!(state.last_uid.as_deref(), Some("id-249"));
    }

    #[test]
    fn test_contains_checks_last_uid() {
        let state = DedupState {
            last_uid: Some("only-last".to_string()),
            processed_ids: VecDeque::new(),
        };
        assert!(state.contains("only-last"));
    }

    #[test]
    fn test_save_and_load() {
        let tmp = TempDir::new().unwrap();
        let file = StateFile::new(tmp.path().join("state.json"));

        let mut state = DedupState::default();
        state.record("2024-01-01 10:00:00_1234567890_abcd".to_string());
        file.save(&state).unwrap();

        assert_eq!(file.load(), state);
        assert!(!tmp.path().join("state.json.tmp").exists());
    }

    #[test]
    fn test_saved_document_shape() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        let file = StateFile::new(&path);

        file.save(&DedupState::default()).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();

        assert!(value["last_uid"].is_null());
        assert_eq!(value["processed_ids"], serde_json::json!([]));
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let file = StateFile::new(tmp.path().join("absent.json"));
        assert_eq!(file.load(), DedupState::default());
    }

    #[test]
    fn test_load_corrupt_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();

        assert_eq!(StateFile::new(path).load(), DedupState::default());
    }

    #[test]
    fn test_load_trims_oversized_history() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        let ids: Vec<String> = (0..300).map(|i| format!("id-{i}")).collect();
        let doc = serde_json::json!({ "last_uid": "id-299", "processed_ids": ids });
        std::fs::write(&path, doc.to_string()).unwrap();

        let state = StateFile::new(path).load();
        assert_eq!(state.processed_ids.len(), MAX_PROCESSED_IDS);
        assert_eq!(state.processed_ids.front().map(String::as_str), Some("id-100"));
    }
}
