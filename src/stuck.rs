use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ActionKind, PageSignature};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StuckEntry {
    count: u32,
    last_seen: DateTime<Utc>,
}

/// Sliding-window counter of repeated (signature, action-kind) pairs.
/// Breaks the loop where an action keeps "succeeding" locally but never
/// advances the flow. State is persisted inside the memory store's
/// durable form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StuckDetector {
    counters: HashMap<String, StuckEntry>,
}

fn key(signature: &PageSignature, kind: ActionKind) -> String {
    format!("{}:{}", signature.0, kind.as_str())
}

impl StuckDetector {
    /// Record one attempt of `kind` on `signature` and report whether the
    /// pair is now stuck. Attempts inside the window accumulate; an
    /// attempt after the window lapses resets the count to 1.
    pub fn observe(
        &mut self,
        signature: &PageSignature,
        kind: ActionKind,
        threshold: u32,
        window: Duration,
    ) -> bool {
        self.observe_at(Utc::now(), signature, kind, threshold, window)
    }

    pub fn observe_at(
        &mut self,
        now: DateTime<Utc>,
        signature: &PageSignature,
        kind: ActionKind,
        threshold: u32,
        window: Duration,
    ) -> bool {
        let entry = self
            .counters
            .entry(key(signature, kind))
            .or_insert(StuckEntry {
                count: 0,
                last_seen: now,
            });
        if entry.count == 0 || now - entry.last_seen < window {
            entry.count += 1;
        } else {
            entry.count = 1;
        }
        entry.last_seen = now;
        entry.count >= threshold
    }

    /// Non-mutating check used at decision time.
    pub fn is_stuck(&self, signature: &PageSignature, kind: ActionKind, threshold: u32) -> bool {
        self.counters
            .get(&key(signature, kind))
            .map(|e| e.count >= threshold)
            .unwrap_or(false)
    }
}
