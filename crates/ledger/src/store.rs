//! JSON-file ledger persistence with advisory locking.
//!
//! Concurrent dispatches race on the same model keys, so every write goes
//! through [`LedgerStore::mutate`]: lock, re-read, apply, write. A writer
//! merges into the state left by other writers instead of overwriting it.

use std::{
    fs,
    path::{Path, PathBuf},
};

use {fd_lock::RwLock, tracing::debug};

use crate::{
    CooldownLedger, Result,
    error::{Context, Error},
};

pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current ledger. A missing or empty file is an empty ledger.
    pub async fn load(&self) -> Result<CooldownLedger> {
        let path = self.path.clone();
        run_blocking(move || read_ledger(&path)).await
    }

    /// Overwrite the ledger file with the given state.
    pub async fn save(&self, ledger: &CooldownLedger) -> Result<()> {
        let path = self.path.clone();
        let ledger = ledger.clone();
        run_blocking(move || {
            let mut lock = acquire_lock(&path)?;
            let _guard = lock.write()?;
            write_ledger(&path, &ledger)
        })
        .await
    }

    /// Lock, re-read, apply `apply`, write. Returns the updated ledger.
    pub async fn mutate<F>(&self, apply: F) -> Result<CooldownLedger>
    where
        F: FnOnce(&mut CooldownLedger) + Send + 'static,
    {
        let path = self.path.clone();
        run_blocking(move || {
            let mut lock = acquire_lock(&path)?;
            let _guard = lock.write()?;
            let mut ledger = read_ledger(&path)?;
            apply(&mut ledger);
            write_ledger(&path, &ledger)?;
            debug!(path = %path.display(), entries = ledger.entries.len(), "cooldown ledger updated");
            Ok(ledger)
        })
        .await
    }
}

async fn run_blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::message(format!("ledger task failed: {e}")))?
}

fn acquire_lock(path: &Path) -> Result<RwLock<fs::File>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create ledger directory {}", parent.display()))?;
    }
    let lock_path = path.with_extension("lock");
    let lock_file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .with_context(|| format!("open ledger lock file {}", lock_path.display()))?;
    Ok(RwLock::new(lock_file))
}

fn read_ledger(path: &Path) -> Result<CooldownLedger> {
    match fs::read_to_string(path) {
        Ok(text) if text.trim().is_empty() => Ok(CooldownLedger::default()),
        Ok(text) => Ok(serde_json::from_str(&text)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(CooldownLedger::default()),
        Err(err) => Err(err).with_context(|| format!("read ledger file {}", path.display())),
    }
}

fn write_ledger(path: &Path, ledger: &CooldownLedger) -> Result<()> {
    let mut json = serde_json::to_string_pretty(ledger)?;
    json.push('\n');
    fs::write(path, json).with_context(|| format!("write ledger file {}", path.display()))?;
    Ok(())
}
