//! Ledger persistence.
//!
//! The runner only reads through `LedgerRepository`. Writes happen outside the
//! loop (agent tool handlers, the `mark` command) via the concrete stores.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::aggregate::DeliverableLedger;
use crate::error::{LedgerLoopError, Result};

/// Read access to the deliverable ledger.
pub trait LedgerRepository: Send + Sync {
    /// Returns true if a ledger has been created.
    fn exists(&self) -> bool;

    /// Load the current ledger snapshot.
    fn load(&self) -> Result<DeliverableLedger>;
}

/// Ledger stored as a single camelCase JSON document.
#[derive(Debug, Clone)]
pub struct JsonFileLedgerRepository {
    path: PathBuf,
}

impl JsonFileLedgerRepository {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the ledger, replacing any existing file atomically.
    pub fn save(&self, ledger: &DeliverableLedger) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(ledger)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl LedgerRepository for JsonFileLedgerRepository {
    fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn load(&self) -> Result<DeliverableLedger> {
        let content = fs::read_to_string(&self.path).map_err(|e| {
            LedgerLoopError::Storage(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Ledger held in memory, for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryLedgerRepository {
    ledger: RwLock<Option<DeliverableLedger>>,
}

impl InMemoryLedgerRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ledger(ledger: DeliverableLedger) -> Self {
        Self {
            ledger: RwLock::new(Some(ledger)),
        }
    }

    pub fn store(&self, ledger: DeliverableLedger) -> Result<()> {
        let mut slot = self
            .ledger
            .write()
            .map_err(|e| LedgerLoopError::Storage(e.to_string()))?;
        *slot = Some(ledger);
        Ok(())
    }
}

impl LedgerRepository for InMemoryLedgerRepository {
    fn exists(&self) -> bool {
        self.ledger.read().map(|slot| slot.is_some()).unwrap_or(false)
    }

    fn load(&self) -> Result<DeliverableLedger> {
        let slot = self
            .ledger
            .read()
            .map_err(|e| LedgerLoopError::Storage(e.to_string()))?;
        (*slot)
            .clone()
            .ok_or_else(|| LedgerLoopError::Storage("no ledger has been created".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Deliverable;
    use tempfile::TempDir;

    fn ledger() -> DeliverableLedger {
        DeliverableLedger::new(vec![
            Deliverable::new("a", "first", vec!["one".to_string()]).unwrap(),
            Deliverable::new("b", "second", vec!["two".to_string()])
                .unwrap()
                .mark_passed(),
        ])
        .unwrap()
    }

    #[test]
    fn test_json_repository_missing_file() {
        let temp = TempDir::new().unwrap();
        let repo = JsonFileLedgerRepository::new(temp.path().join("ledger.json"));
        assert!(!repo.exists());
        assert!(matches!(repo.load(), Err(LedgerLoopError::Storage(_))));
    }

    #[test]
    fn test_json_repository_save_and_load() {
        let temp = TempDir::new().unwrap();
        let repo = JsonFileLedgerRepository::new(temp.path().join("nested/ledger.json"));

        repo.save(&ledger()).unwrap();
        assert!(repo.exists());

        let loaded = repo.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.count_passed(), 1);
        assert!(!temp.path().join("nested/ledger.json.tmp").exists());
    }

    #[test]
    fn test_json_repository_rejects_corrupt_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ledger.json");
        fs::write(&path, "{ not json").unwrap();

        let repo = JsonFileLedgerRepository::new(&path);
        assert!(repo.exists());
        assert!(matches!(repo.load(), Err(LedgerLoopError::Json(_))));
    }

    #[test]
    fn test_in_memory_repository() {
        let repo = InMemoryLedgerRepository::new();
        assert!(!repo.exists());
        assert!(repo.load().is_err());

        repo.store(ledger()).unwrap();
        assert!(repo.exists());
        assert_eq!(repo.load().unwrap().len(), 2);
    }
}
