//! Reference validation and key mapping.
//!
//! The [`IdMap`] records, per table, which keys are known to exist in the
//! target. A table's entry is published once, after every one of its batches
//! has committed; until then dependents cannot start, so readers never see a
//! half-filled entry.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use crate::core::schema::{ForeignKeySpec, PkValue, ReferencePolicy};
use crate::core::value::SqlValue;

/// Confirmed keys of one table.
#[derive(Debug, Clone)]
pub enum TableKeys {
    /// Source and target keys are identical.
    Preserved(HashSet<PkValue>),
    /// Source key to target key.
    Remapped(HashMap<PkValue, PkValue>),
}

impl TableKeys {
    /// The target-side key for a source-side key.
    pub fn resolve(&self, key: &PkValue) -> Option<PkValue> {
        match self {
            TableKeys::Preserved(keys) => keys.contains(key).then(|| key.clone()),
            TableKeys::Remapped(map) => map.get(key).cloned(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TableKeys::Preserved(keys) => keys.len(),
            TableKeys::Remapped(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merge keys confirmed by a later batch.
    pub fn extend(&mut self, other: TableKeys) {
        if let TableKeys::Preserved(keys) = self {
            if let TableKeys::Preserved(more) = other {
                keys.extend(more);
                return;
            }
            let identity = std::mem::take(keys)
                .into_iter()
                .map(|k| (k.clone(), k))
                .collect();
            *self = TableKeys::Remapped(identity);
        }
        if let TableKeys::Remapped(map) = self {
            map.extend(other.into_pairs());
        }
    }

    fn into_pairs(self) -> Vec<(PkValue, PkValue)> {
        match self {
            TableKeys::Preserved(keys) => keys.into_iter().map(|k| (k.clone(), k)).collect(),
            TableKeys::Remapped(map) => map.into_iter().collect(),
        }
    }
}

impl FromIterator<PkValue> for TableKeys {
    fn from_iter<I: IntoIterator<Item = PkValue>>(iter: I) -> Self {
        TableKeys::Preserved(iter.into_iter().collect())
    }
}

impl FromIterator<(PkValue, PkValue)> for TableKeys {
    fn from_iter<I: IntoIterator<Item = (PkValue, PkValue)>>(iter: I) -> Self {
        TableKeys::Remapped(iter.into_iter().collect())
    }
}

/// Process-scoped registry of confirmed target keys, per table.
#[derive(Debug, Default)]
pub struct IdMap {
    tables: RwLock<HashMap<String, Arc<TableKeys>>>,
}

impl IdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a table's confirmed keys, replacing any earlier entry.
    pub fn publish(&self, table: impl Into<String>, keys: TableKeys) {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables.insert(table.into(), Arc::new(keys));
    }

    pub fn get(&self, table: &str) -> Option<Arc<TableKeys>> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.get(table).cloned()
    }

    pub fn contains_table(&self, table: &str) -> bool {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.contains_key(table)
    }

    /// Frozen view of the given tables' entries.
    pub fn snapshot<S: AsRef<str>>(&self, tables: &[S]) -> IdMapSnapshot {
        let all = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        let tables = tables
            .iter()
            .filter_map(|t| {
                all.get(t.as_ref())
                    .map(|keys| (t.as_ref().to_string(), Arc::clone(keys)))
            })
            .collect();
        IdMapSnapshot { tables }
    }
}

/// Immutable view of part of the [`IdMap`], handed to one table's transformer.
#[derive(Debug, Clone, Default)]
pub struct IdMapSnapshot {
    tables: HashMap<String, Arc<TableKeys>>,
}

impl IdMapSnapshot {
    pub fn get(&self, table: &str) -> Option<&TableKeys> {
        self.tables.get(table).map(Arc::as_ref)
    }
}

/// Outcome of validating one foreign-key value.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidatedValue {
    /// The raw value was absent.
    Null,
    /// The referenced row exists; carries the target-side key.
    Valid(PkValue),
    /// The reference was dangling and has been nulled.
    NulledOut { original: PkValue },
    /// The reference was dangling and has been replaced by the fallback key.
    Defaulted { original: PkValue, fallback: PkValue },
    /// The reference was dangling and the row must be dropped.
    Rejected { original: PkValue },
}

impl ValidatedValue {
    /// The value to write, or `None` when the row is rejected.
    pub fn to_value(&self) -> Option<SqlValue> {
        match self {
            ValidatedValue::Null | ValidatedValue::NulledOut { .. } => Some(SqlValue::Null),
            ValidatedValue::Valid(key) => Some(key.to_value()),
            ValidatedValue::Defaulted { fallback, .. } => Some(fallback.to_value()),
            ValidatedValue::Rejected { .. } => None,
        }
    }

    /// Whether the raw value was a dangling reference.
    pub fn is_violation(&self) -> bool {
        matches!(
            self,
            ValidatedValue::NulledOut { .. }
                | ValidatedValue::Defaulted { .. }
                | ValidatedValue::Rejected { .. }
        )
    }
}

/// Validates foreign keys against an [`IdMapSnapshot`].
#[derive(Debug, Clone)]
pub struct ReferenceValidator {
    snapshot: IdMapSnapshot,
    default_policy: ReferencePolicy,
}

impl ReferenceValidator {
    pub fn new(snapshot: IdMapSnapshot, default_policy: ReferencePolicy) -> Self {
        Self {
            snapshot,
            default_policy,
        }
    }

    /// Validate a raw foreign-key value.
    ///
    /// A referenced table missing from the snapshot has no confirmed keys,
    /// so every non-null value is a violation.
    pub fn validate(&self, fk: &ForeignKeySpec, raw: &SqlValue) -> ValidatedValue {
        let Some(key) = PkValue::from_value(raw) else {
            return ValidatedValue::Null;
        };

        if let Some(target_key) = self
            .snapshot
            .get(&fk.references)
            .and_then(|keys| keys.resolve(&key))
        {
            return ValidatedValue::Valid(target_key);
        }

        match (fk.policy.unwrap_or(self.default_policy), &fk.fallback) {
            (ReferencePolicy::RejectRow, _) => ValidatedValue::Rejected { original: key },
            (ReferencePolicy::Default, Some(fallback)) => ValidatedValue::Defaulted {
                original: key,
                fallback: fallback.clone(),
            },
            // Config validation requires a fallback for the default policy.
            (ReferencePolicy::Default, None) | (ReferencePolicy::NullOut, _) => {
                ValidatedValue::NulledOut { original: key }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fk(policy: Option<ReferencePolicy>, fallback: Option<i64>) -> ForeignKeySpec {
        ForeignKeySpec {
            column: "machine_id".into(),
            references: "machines".into(),
            policy,
            fallback: fallback.map(PkValue::Int),
        }
    }

    fn validator(policy: ReferencePolicy) -> ReferenceValidator {
        let map = IdMap::new();
        map.publish("machines", [PkValue::Int(1), PkValue::Int(2)].into_iter().collect());
        ReferenceValidator::new(map.snapshot(&["machines"]), policy)
    }

    #[test]
    fn test_valid_reference_passes_through() {
        let v = validator(ReferencePolicy::NullOut);
        assert_eq!(
            v.validate(&fk(None, None), &SqlValue::Int(1)),
            ValidatedValue::Valid(PkValue::Int(1))
        );
        // Loosely typed text keys still match.
        assert_eq!(
            v.validate(&fk(None, None), &SqlValue::from("2")),
            ValidatedValue::Valid(PkValue::Int(2))
        );
    }

    #[test]
    fn test_absent_reference_is_null() {
        let v = validator(ReferencePolicy::RejectRow);
        assert_eq!(v.validate(&fk(None, None), &SqlValue::Null), ValidatedValue::Null);
        assert_eq!(v.validate(&fk(None, None), &SqlValue::from("")), ValidatedValue::Null);
    }

    #[test]
    fn test_policies_for_dangling_reference() {
        let raw = SqlValue::Int(99);
        let v = validator(ReferencePolicy::NullOut);
        let nulled = v.validate(&fk(None, None), &raw);
        assert_eq!(nulled, ValidatedValue::NulledOut { original: PkValue::Int(99) });
        assert_eq!(nulled.to_value(), Some(SqlValue::Null));

        let defaulted = v.validate(&fk(Some(ReferencePolicy::Default), Some(1)), &raw);
        assert_eq!(defaulted.to_value(), Some(SqlValue::Int(1)));

        let rejected = v.validate(&fk(Some(ReferencePolicy::RejectRow), None), &raw);
        assert!(rejected.is_violation());
        assert_eq!(rejected.to_value(), None);
    }

    #[test]
    fn test_remapped_keys_translate() {
        let map = IdMap::new();
        map.publish(
            "machines",
            [(PkValue::Int(10), PkValue::Int(501))].into_iter().collect(),
        );
        let v = ReferenceValidator::new(map.snapshot(&["machines"]), ReferencePolicy::NullOut);
        assert_eq!(
            v.validate(&fk(None, None), &SqlValue::Int(10)),
            ValidatedValue::Valid(PkValue::Int(501))
        );
    }

    #[test]
    fn test_snapshot_is_frozen() {
        let map = IdMap::new();
        map.publish("machines", [PkValue::Int(1)].into_iter().collect());
        let snapshot = map.snapshot(&["machines"]);
        map.publish("machines", [PkValue::Int(1), PkValue::Int(2)].into_iter().collect());
        assert_eq!(snapshot.get("machines").map(TableKeys::len), Some(1));
        assert_eq!(map.get("machines").map(|k| k.len()), Some(2));
    }

    #[test]
    fn test_extend_mixes_modes() {
        let mut keys: TableKeys = [PkValue::Int(1)].into_iter().collect();
        keys.extend([(PkValue::Int(2), PkValue::Int(20))].into_iter().collect());
        assert_eq!(keys.resolve(&PkValue::Int(1)), Some(PkValue::Int(1)));
        assert_eq!(keys.resolve(&PkValue::Int(2)), Some(PkValue::Int(20)));
    }
}
