//! Reconciliation of candidates against produced areas.
//!
//! Every way or relation that qualified as a boundary candidate must either
//! produce an area or an explicit, classified error. The index tracks both
//! growing sets during a run and diffs them once the engine has completed,
//! turning silent data loss into error records.

use hashbrown::HashSet;
use std::collections::BTreeMap;

use crate::error::{ErrorKind, ErrorRecord};
use crate::models::{AreaKey, Candidate, MemberType};

/// Index of candidates and the subset that produced areas.
///
/// Owned and mutated exclusively by the worker. `produced` is always a
/// subset of the candidate key set.
#[derive(Debug, Default)]
pub struct ReconciliationIndex {
    candidates: BTreeMap<AreaKey, Candidate>,
    produced: HashSet<AreaKey>,
}

impl ReconciliationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a candidate boundary. A later insert for the same key replaces
    /// the earlier one.
    pub fn insert_candidate(&mut self, candidate: Candidate) {
        self.candidates.insert(candidate.key, candidate);
    }

    /// Mark a candidate key as having produced a result (an area, or a
    /// per-record error that already reported it). Keys without a matching
    /// candidate are ignored, preserving `produced ⊆ candidates`.
    pub fn mark_produced(&mut self, key: AreaKey) {
        if self.candidates.contains_key(&key) {
            self.produced.insert(key);
        }
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    pub fn produced_count(&self) -> usize {
        self.produced.len()
    }

    /// Diff candidates against produced keys and classify every candidate
    /// that never materialized. Consumes the index; must run exactly once,
    /// strictly after the engine's completion signal.
    ///
    /// Emits exactly `candidates − produced` records, one per missing key,
    /// in key order.
    pub fn reconcile(self) -> Vec<ErrorRecord> {
        let mut records = Vec::with_capacity(self.candidates.len() - self.produced.len());

        for (key, candidate) in &self.candidates {
            if self.produced.contains(key) {
                continue;
            }
            records.push(classify(candidate, &self.candidates));
        }

        records
    }
}

/// Classify a candidate that never produced an area.
fn classify(candidate: &Candidate, candidates: &BTreeMap<AreaKey, Candidate>) -> ErrorRecord {
    let data = serde_json::to_value(candidate).unwrap_or(serde_json::Value::Null);

    if candidate.is_relation() && candidate.members.is_empty() {
        return ErrorRecord::new("relation has no members", ErrorKind::NoMembers, data);
    }

    let missing_way_count = candidate
        .members
        .iter()
        .filter(|m| {
            m.member_type == MemberType::Way
                && !candidates.contains_key(&AreaKey::way(m.member_ref))
        })
        .count();

    if missing_way_count > 0 {
        let mut record = ErrorRecord::new(
            "relation is missing way members",
            ErrorKind::MissingWayMembers,
            data,
        );
        record.missing_way_count = Some(missing_way_count);
        return record;
    }

    ErrorRecord::new("problematic candidate", ErrorKind::Unexplained, data)
}
