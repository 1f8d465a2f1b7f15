use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::stuck::StuckDetector;
use crate::types::{Action, ActionRecord, PageSignature};

/// Durable JSON shape of the store. Kept separate from the store itself so
/// runtime-only fields (path, caps) never leak into the file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct MemoryFile {
    #[serde(default)]
    records: Vec<ActionRecord>,
    #[serde(default)]
    known_selectors: HashMap<String, Vec<String>>,
    #[serde(default)]
    stuck: StuckDetector,
}

/// The only long-lived mutable state in the agent: a bounded ledger of
/// past actions per page signature, the selectors that worked, and the
/// stuck counters. Single writer; all reads are non-destructive.
#[derive(Debug)]
pub struct MemoryStore {
    data: MemoryFile,
    path: Option<PathBuf>,
    record_cap: usize,
    selector_cap: usize,
}

impl MemoryStore {
    /// In-memory store, used by tests and dry runs.
    pub fn ephemeral(record_cap: usize, selector_cap: usize) -> Self {
        Self {
            data: MemoryFile::default(),
            path: None,
            record_cap,
            selector_cap,
        }
    }

    /// Load from disk. A missing or corrupt file degrades to empty
    /// defaults rather than aborting startup.
    pub fn load(path: impl Into<PathBuf>, record_cap: usize, selector_cap: usize) -> Self {
        let path = path.into();
        let data = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<MemoryFile>(&bytes) {
                Ok(data) => {
                    info!(
                        records = data.records.len(),
                        selectors = data.known_selectors.len(),
                        "memory loaded"
                    );
                    data
                }
                Err(err) => {
                    warn!(error = %err, path = %path.display(), "memory file corrupt, starting fresh");
                    MemoryFile::default()
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => MemoryFile::default(),
            Err(err) => {
                warn!(error = %err, path = %path.display(), "memory file unreadable, starting fresh");
                MemoryFile::default()
            }
        };
        Self {
            data,
            path: Some(path),
            record_cap,
            selector_cap,
        }
    }

    /// Atomic write: serialize to a temp file in the same directory, then
    /// rename over the target. An interrupt never leaves the store
    /// unreadable.
    pub fn save(&self) -> io::Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;
        let json = serde_json::to_vec_pretty(&self.data)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(&json)?;
        tmp.persist(path).map_err(|err| err.error)?;
        debug!(records = self.data.records.len(), "memory flushed");
        Ok(())
    }

    /// The single mutator. Appends a record, learns the selector on
    /// success, then prunes oldest entries beyond the cap.
    pub fn record_action(
        &mut self,
        signature: &PageSignature,
        action: &Action,
        success: bool,
        error: Option<String>,
        selector: Option<&str>,
    ) {
        self.data.records.push(ActionRecord {
            at: Utc::now(),
            signature: signature.clone(),
            action: action.clone(),
            success,
            error,
        });
        if self.data.records.len() > self.record_cap {
            let excess = self.data.records.len() - self.record_cap;
            self.data.records.drain(..excess);
        }

        if success {
            if let Some(selector) = selector {
                let list = self
                    .data
                    .known_selectors
                    .entry(signature.0.clone())
                    .or_default();
                list.retain(|s| s != selector);
                list.insert(0, selector.to_string());
                list.truncate(self.selector_cap);
            }
        }
    }

    /// Most recent success-outcome record for this signature, if any.
    pub fn last_success_for(&self, signature: &PageSignature) -> Option<&ActionRecord> {
        self.data
            .records
            .iter()
            .rev()
            .find(|r| r.success && &r.signature == signature)
    }

    /// Locator strings observed in successful executions on this page,
    /// most recent first.
    pub fn known_selectors_for(&self, signature: &PageSignature) -> &[String] {
        self.data
            .known_selectors
            .get(&signature.0)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn stuck(&self) -> &StuckDetector {
        &self.data.stuck
    }

    pub fn stuck_mut(&mut self) -> &mut StuckDetector {
        &mut self.data.stuck
    }

    pub fn record_count(&self) -> usize {
        self.data.records.len()
    }
}
