//! Mutation records consumed by the ingestion path.

use serde::Deserialize;
use serde::Serialize;

/// Whether a record writes or deletes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MutationType {
    /// Insert or update the value (for sets: add the listed elements).
    Update,
    /// Delete the value (for sets: remove the listed elements).
    Delete,
}

/// The payload of one mutation record. The variant fixes which cache
/// namespace the record targets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RecordValue {
    /// A scalar value.
    String(String),
    /// String-set elements being added or removed.
    StringSet(Vec<String>),
    /// Uint32-set elements being added or removed.
    UintSet(Vec<u32>),
}

/// One mutation from a delta file or a realtime message.
///
/// `logical_commit_time` totally orders mutations of one key; the cache
/// drops records that arrive with a time at or below what it has already
/// observed, so replaying a stream is harmless.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeltaRecord {
    /// The key being mutated.
    pub key: String,
    /// The payload; for deletes of scalar keys the content is ignored.
    pub value: RecordValue,
    /// Externally assigned logical time of this mutation.
    pub logical_commit_time: i64,
    /// Write or delete.
    pub mutation_type: MutationType,
}

impl DeltaRecord {
    /// A scalar update record.
    pub fn update(key: impl Into<String>, value: impl Into<String>, logical_commit_time: i64) -> Self {
        Self {
            key: key.into(),
            value: RecordValue::String(value.into()),
            logical_commit_time,
            mutation_type: MutationType::Update,
        }
    }

    /// A scalar delete record.
    pub fn delete(key: impl Into<String>, logical_commit_time: i64) -> Self {
        Self {
            key: key.into(),
            value: RecordValue::String(String::new()),
            logical_commit_time,
            mutation_type: MutationType::Delete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_roundtrip() {
        let record = DeltaRecord {
            key: "segments".into(),
            value: RecordValue::StringSet(vec!["a".into(), "b".into()]),
            logical_commit_time: 42,
            mutation_type: MutationType::Update,
        };
        let json = serde_json::to_string(&record).unwrap();
        let decoded: DeltaRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn constructors() {
        let record = DeltaRecord::update("k", "v", 7);
        assert_eq!(record.mutation_type, MutationType::Update);
        assert_eq!(record.value, RecordValue::String("v".into()));

        let record = DeltaRecord::delete("k", 8);
        assert_eq!(record.mutation_type, MutationType::Delete);
    }
}
