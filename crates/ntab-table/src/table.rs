use chrono::{DateTime, Utc};
use ntab_types::TableId;
use serde::{Deserialize, Serialize};

use crate::error::{TableDataError, TableDataResult};
use crate::payload::{encode_payload, parse_payload, validate_versions};
use crate::record::{Record, RecordDraft, RecordSelector};
use crate::summary;

/// A named, ordered collection of records.
///
/// Every mutating method either commits completely or leaves the table
/// untouched. `updated_at` advances on each commit and never moves backwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Table {
    id: TableId,
    name: String,
    description: String,
    records: Vec<Record>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Persisted form of a table. `data` holds the record array as a JSON string.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotDocument {
    id: TableId,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    data: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Table {
    /// Create an empty table.
    pub fn new(id: TableId, name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            description: description.into(),
            records: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &TableId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn latest(&self) -> Option<&Record> {
        self.records.last()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    /// Advance `updated_at` to now, clamped so it never decreases.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now().max(self.updated_at);
    }

    /// The version the next appended record will carry.
    ///
    /// For an append-only history this is `len + 1`. After a removal it is
    /// one past the last surviving record, so versions are never reused.
    pub fn next_version(&self) -> TableDataResult<u64> {
        let last = self
            .records
            .last()
            .map_or(0, |r| r.version)
            .max(self.records.len() as u64);
        last.checked_add(1).ok_or(TableDataError::VersionsExhausted(last))
    }

    /// Append a record, assigning its version and creation time.
    pub fn append(&mut self, draft: RecordDraft) -> TableDataResult<Record> {
        let record = draft.into_record(self.next_version()?, Utc::now());
        self.records.push(record.clone());
        self.touch();
        Ok(record)
    }

    /// Remove the record picked by `selector`.
    pub fn remove(&mut self, selector: &RecordSelector) -> TableDataResult<Record> {
        let index = match selector {
            RecordSelector::Index(i) => {
                if *i >= self.records.len() {
                    return Err(TableDataError::IndexOutOfRange {
                        index: *i,
                        len: self.records.len(),
                    });
                }
                *i
            }
            RecordSelector::Hash(hash) => self
                .records
                .iter()
                .position(|r| &r.hash == hash)
                .ok_or_else(|| TableDataError::RecordNotFound(selector.to_string()))?,
            RecordSelector::Value(record) => self
                .records
                .iter()
                .position(|r| r == record)
                .ok_or_else(|| TableDataError::RecordNotFound(selector.to_string()))?,
        };
        let removed = self.records.remove(index);
        self.touch();
        Ok(removed)
    }

    /// Replace the whole record sequence. Fails without changing anything
    /// unless versions are positive and strictly increasing.
    pub fn replace_records(&mut self, records: Vec<Record>) -> TableDataResult<()> {
        validate_versions(&records)?;
        self.records = records;
        self.touch();
        Ok(())
    }

    /// Rewrite the description as a record-count summary when the table
    /// holds more than one record. See [`summary`].
    pub fn refresh_summary(&mut self) {
        if self.records.len() > 1 {
            let base = summary::base_name(&self.description)
                .unwrap_or(&self.name)
                .to_string();
            self.description = summary::summarize(&base, self.records.len());
        }
    }

    /// The record array as a JSON payload string.
    pub fn payload(&self) -> TableDataResult<String> {
        encode_payload(&self.records)
    }

    /// Serialize the table into its snapshot form.
    pub fn to_snapshot(&self) -> TableDataResult<Vec<u8>> {
        let doc = SnapshotDocument {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            data: self.payload()?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        };
        serde_json::to_vec(&doc).map_err(|e| TableDataError::Encode(e.to_string()))
    }

    /// Decode a snapshot produced by [`Table::to_snapshot`].
    pub fn from_snapshot(bytes: &[u8]) -> TableDataResult<Self> {
        let doc: SnapshotDocument =
            serde_json::from_slice(bytes).map_err(|e| TableDataError::Decode(e.to_string()))?;
        let records = parse_payload(&doc.data).map_err(|e| match e {
            TableDataError::MalformedPayload(msg) => {
                TableDataError::Decode(format!("snapshot data: {msg}"))
            }
            other => other,
        })?;
        Ok(Self {
            id: doc.id,
            name: doc.name,
            description: doc.description,
            records,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn table() -> Table {
        Table::new(TableId::new("t1").unwrap(), "movies", "my movies")
    }

    fn draft(hash: &str) -> RecordDraft {
        RecordDraft {
            hash: hash.to_string(),
            file_name: format!("{hash}.bin"),
            file_size: 10,
            ..RecordDraft::default()
        }
    }

    // -----------------------------------------------------------------------
    // Versioning
    // -----------------------------------------------------------------------

    #[test]
    fn append_assigns_sequential_versions() {
        let mut t = table();
        assert_eq!(t.append(draft("a")).unwrap().version, 1);
        assert_eq!(t.append(draft("b")).unwrap().version, 2);
        assert_eq!(t.append(draft("c")).unwrap().version, 3);
        assert_eq!(t.latest().unwrap().hash, "c");
    }

    #[test]
    fn versions_are_not_reused_after_removal() {
        let mut t = table();
        t.append(draft("a")).unwrap();
        t.append(draft("b")).unwrap();
        t.append(draft("c")).unwrap();
        t.remove(&RecordSelector::Index(0)).unwrap();
        assert_eq!(t.append(draft("d")).unwrap().version, 4);
    }

    #[test]
    fn append_at_max_version_is_an_error() {
        let mut t = table();
        let last = Record {
            version: u64::MAX,
            hash: "z".into(),
            ..Record::default()
        };
        t.replace_records(vec![last]).unwrap();
        let before = t.clone();
        assert_eq!(
            t.append(draft("a")).unwrap_err(),
            TableDataError::VersionsExhausted(u64::MAX)
        );
        assert_eq!(t, before);
    }

    #[test]
    fn replace_rejects_unordered_versions() {
        let mut t = table();
        t.append(draft("a")).unwrap();
        let before = t.clone();
        let records = [5, 2, 2]
            .into_iter()
            .map(|version| Record {
                version,
                ..Record::default()
            })
            .collect();
        assert!(matches!(
            t.replace_records(records),
            Err(TableDataError::MalformedPayload(_))
        ));
        assert_eq!(t, before);
    }

    #[test]
    fn append_follows_replaced_records() {
        let mut t = table();
        let records = [3, 9]
            .into_iter()
            .map(|version| Record {
                version,
                ..Record::default()
            })
            .collect();
        t.replace_records(records).unwrap();
        assert_eq!(t.append(draft("a")).unwrap().version, 10);
    }

    #[test]
    fn updated_at_never_decreases() {
        let mut t = table();
        let before = t.updated_at();
        t.append(draft("a")).unwrap();
        assert!(t.updated_at() >= before);
        t.touch();
        assert!(t.updated_at() >= before);
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    #[test]
    fn remove_out_of_range_changes_nothing() {
        let mut t = table();
        t.append(draft("a")).unwrap();
        let before = t.clone();
        let err = t.remove(&RecordSelector::Index(1)).unwrap_err();
        assert_eq!(err, TableDataError::IndexOutOfRange { index: 1, len: 1 });
        assert_eq!(t, before);
    }

    #[test]
    fn remove_by_hash_and_value() {
        let mut t = table();
        t.append(draft("a")).unwrap();
        let b = t.append(draft("b")).unwrap();
        t.append(draft("c")).unwrap();

        let removed = t.remove(&RecordSelector::Hash("a".into())).unwrap();
        assert_eq!(removed.hash, "a");
        let removed = t.remove(&RecordSelector::Value(b.clone())).unwrap();
        assert_eq!(removed, b);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn remove_missing_value_changes_nothing() {
        let mut t = table();
        t.append(draft("a")).unwrap();
        let before = t.clone();
        let err = t.remove(&RecordSelector::Hash("zzz".into())).unwrap_err();
        assert!(matches!(err, TableDataError::RecordNotFound(_)));
        assert_eq!(t, before);
    }

    // -----------------------------------------------------------------------
    // Summary
    // -----------------------------------------------------------------------

    #[test]
    fn summary_uses_display_name_by_default() {
        let mut t = table();
        t.append(draft("a")).unwrap();
        t.append(draft("b")).unwrap();
        t.refresh_summary();
        assert_eq!(t.description(), r#"Torrent versions for "movies" - 2 version(s)"#);
    }

    #[test]
    fn summary_keeps_embedded_base_name() {
        let mut t = table();
        t.set_description(r#"Torrent versions for "bibi" - Version 1"#);
        t.set_name("renamed");
        t.append(draft("a")).unwrap();
        t.append(draft("b")).unwrap();
        t.append(draft("c")).unwrap();
        t.refresh_summary();
        assert_eq!(t.description(), r#"Torrent versions for "bibi" - 3 version(s)"#);
    }

    #[test]
    fn single_record_keeps_description() {
        let mut t = table();
        t.append(draft("a")).unwrap();
        t.refresh_summary();
        assert_eq!(t.description(), "my movies");
    }

    // -----------------------------------------------------------------------
    // Snapshot codec
    // -----------------------------------------------------------------------

    #[test]
    fn snapshot_has_string_data_field() {
        let mut t = table();
        t.append(draft("a")).unwrap();
        let bytes = t.to_snapshot().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(value["data"].is_string());
        assert_eq!(value["id"], "t1");
        assert!(value["createdAt"].is_string());
    }

    #[test]
    fn snapshot_roundtrip() {
        let mut t = table();
        t.append(draft("a")).unwrap();
        t.append(draft("b")).unwrap();
        let decoded = Table::from_snapshot(&t.to_snapshot().unwrap()).unwrap();
        assert_eq!(decoded, t);
    }

    #[test]
    fn legacy_snapshot_with_empty_data_decodes() {
        let json = r#"{"id":"t9","name":"n","description":"d","data":"[]",
            "createdAt":"2024-01-01T00:00:00Z","updatedAt":"2024-01-02T00:00:00Z"}"#;
        let t = Table::from_snapshot(json.as_bytes()).unwrap();
        assert!(t.is_empty());
        assert_eq!(t.name(), "n");
    }

    #[test]
    fn garbage_snapshot_is_decode_error() {
        assert!(matches!(
            Table::from_snapshot(b"not json"),
            Err(TableDataError::Decode(_))
        ));
        let bad_data = r#"{"id":"t9","name":"n","data":"{oops",
            "createdAt":"2024-01-01T00:00:00Z","updatedAt":"2024-01-01T00:00:00Z"}"#;
        assert!(matches!(
            Table::from_snapshot(bad_data.as_bytes()),
            Err(TableDataError::Decode(_))
        ));
    }

    // -----------------------------------------------------------------------
    // Properties
    // -----------------------------------------------------------------------

    proptest! {
        #[test]
        fn appends_are_ordered_and_gapless(hashes in prop::collection::vec("[a-f0-9]{1,16}", 0..40)) {
            let mut t = table();
            for h in &hashes {
                t.append(draft(h)).unwrap();
            }
            let got: Vec<&str> = t.records().iter().map(|r| r.hash.as_str()).collect();
            let want: Vec<&str> = hashes.iter().map(String::as_str).collect();
            prop_assert_eq!(got, want);
            for (i, r) in t.records().iter().enumerate() {
                prop_assert_eq!(r.version, i as u64 + 1);
            }
        }

        #[test]
        fn snapshot_preserves_metadata_and_records(
            name in "[A-Za-z0-9 _-]{0,24}",
            description in "\\PC{0,48}",
            hashes in prop::collection::vec("[a-f0-9]{1,16}", 0..12),
        ) {
            let mut t = Table::new(TableId::new("p").unwrap(), name, description);
            for h in &hashes {
                t.append(draft(h)).unwrap();
            }
            let decoded = Table::from_snapshot(&t.to_snapshot().unwrap()).unwrap();
            prop_assert_eq!(decoded.name(), t.name());
            prop_assert_eq!(decoded.description(), t.description());
            prop_assert_eq!(decoded.records(), t.records());
        }
    }
}
