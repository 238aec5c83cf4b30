//! Point-in-time export of the in-memory collections.
//!
//! Snapshots are built from what the [`RecordStore`] currently holds; nothing
//! is reloaded, written or read from the secure tier.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::collection::{Collection, RecordStore};
use crate::error::Result;
use crate::records::{JournalEntry, MemoryItem, NurseShiftRecord, ProgressEntry, Record};

pub const SCHEMA_VERSION: u32 = 1;

fn rfc3339<S: serde::Serializer>(ts: &DateTime<Utc>, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Secs, true))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSnapshot {
    #[serde(serialize_with = "rfc3339")]
    pub export_date: DateTime<Utc>,
    pub app_version: String,
    pub schema_version: u32,
    pub journal_entries: Vec<JournalEntry>,
    pub progress_entries: Vec<ProgressEntry>,
    pub memory_items: Vec<MemoryItem>,
    pub nurse_shifts: Vec<NurseShiftRecord>,
}

impl ExportSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn record_count(&self) -> usize {
        self.journal_entries.len()
            + self.progress_entries.len()
            + self.memory_items.len()
            + self.nurse_shifts.len()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionExport<T> {
    #[serde(serialize_with = "rfc3339")]
    pub export_date: DateTime<Utc>,
    pub app_version: String,
    pub collection: &'static str,
    pub records: Vec<T>,
}

impl<T: Serialize> CollectionExport<T> {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub fn export_all(store: &RecordStore, app_version: &str) -> ExportSnapshot {
    ExportSnapshot {
        export_date: Utc::now(),
        app_version: app_version.to_string(),
        schema_version: SCHEMA_VERSION,
        journal_entries: store.journal.records().to_vec(),
        progress_entries: store.progress.records().to_vec(),
        memory_items: store.memories.records().to_vec(),
        nurse_shifts: store.nurse_shifts.records().to_vec(),
    }
}

pub fn export_collection<T: Record>(
    collection: &Collection<T>,
    app_version: &str,
) -> CollectionExport<T> {
    CollectionExport {
        export_date: Utc::now(),
        app_version: app_version.to_string(),
        collection: T::COLLECTION,
        records: collection.records().to_vec(),
    }
}
