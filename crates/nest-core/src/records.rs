//! Record kinds kept by the store and their built-in seed data.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A record owned by a [`Collection`](crate::collection::Collection).
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Storage key of the collection holding this kind.
    const COLLECTION: &'static str;

    fn id(&self) -> Uuid;

    fn set_id(&mut self, id: Uuid);

    fn timestamp(&self) -> DateTime<Utc>;

    /// Starter data used when nothing has been persisted yet.
    fn seed() -> Vec<Self>;
}

// ── Journal ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Hopeful,
    Happy,
    Calm,
    Tired,
    Worried,
    Overwhelmed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub id: Uuid,
    pub date: DateTime<Utc>,
    pub title: String,
    pub content: String,
    pub mood: Mood,
}

impl JournalEntry {
    pub fn new(title: impl Into<String>, content: impl Into<String>, mood: Mood) -> Self {
        Self {
            id: Uuid::new_v4(),
            date: Utc::now(),
            title: title.into(),
            content: content.into(),
            mood,
        }
    }
}

impl Record for JournalEntry {
    const COLLECTION: &'static str = "journal_entries";

    fn id(&self) -> Uuid {
        self.id
    }

    fn set_id(&mut self, id: Uuid) {
        self.id = id;
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.date
    }

    fn seed() -> Vec<Self> {
        let now = Utc::now();
        vec![
            JournalEntry {
                date: now - Duration::days(1),
                ..JournalEntry::new(
                    "Our first day",
                    "Today we met the care team and learned how the incubator works. \
                     Everyone was so patient with our questions.",
                    Mood::Hopeful,
                )
            },
            JournalEntry {
                date: now,
                ..JournalEntry::new(
                    "Skin-to-skin",
                    "The nurse helped us hold the baby for the first time. \
                     Breathing was steady the whole time.",
                    Mood::Happy,
                )
            },
        ]
    }
}

// ── Progress ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEntry {
    pub id: Uuid,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_grams: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length_cm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_circumference_cm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feeding_ml: Option<f64>,
    #[serde(default)]
    pub notes: String,
}

impl ProgressEntry {
    pub fn new(weight_grams: Option<f64>, notes: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            date: Utc::now(),
            weight_grams,
            length_cm: None,
            head_circumference_cm: None,
            feeding_ml: None,
            notes: notes.into(),
        }
    }
}

impl Record for ProgressEntry {
    const COLLECTION: &'static str = "progress_entries";

    fn id(&self) -> Uuid {
        self.id
    }

    fn set_id(&mut self, id: Uuid) {
        self.id = id;
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.date
    }

    fn seed() -> Vec<Self> {
        let now = Utc::now();
        vec![
            ProgressEntry {
                date: now - Duration::days(7),
                length_cm: Some(39.5),
                head_circumference_cm: Some(27.0),
                ..ProgressEntry::new(Some(1250.0), "Birth measurements")
            },
            ProgressEntry {
                date: now,
                length_cm: Some(40.2),
                head_circumference_cm: Some(27.6),
                feeding_ml: Some(18.0),
                ..ProgressEntry::new(Some(1320.0), "Back above birth weight")
            },
        ]
    }
}

// ── Memories ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MemoryKind {
    Milestone,
    FirstTime,
    Photo,
    Note,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryItem {
    pub id: Uuid,
    pub date: DateTime<Utc>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub kind: MemoryKind,
}

impl MemoryItem {
    pub fn new(title: impl Into<String>, description: impl Into<String>, kind: MemoryKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            date: Utc::now(),
            title: title.into(),
            description: description.into(),
            kind,
        }
    }
}

impl Record for MemoryItem {
    const COLLECTION: &'static str = "memory_items";

    fn id(&self) -> Uuid {
        self.id
    }

    fn set_id(&mut self, id: Uuid) {
        self.id = id;
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.date
    }

    fn seed() -> Vec<Self> {
        let now = Utc::now();
        vec![
            MemoryItem {
                date: now - Duration::days(3),
                ..MemoryItem::new(
                    "First touch",
                    "Tiny fingers wrapped around mine through the porthole.",
                    MemoryKind::FirstTime,
                )
            },
            MemoryItem {
                date: now,
                ..MemoryItem::new(
                    "Off CPAP",
                    "Breathing on room air for the first time.",
                    MemoryKind::Milestone,
                )
            },
        ]
    }
}

// ── Nurse shifts ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShiftKind {
    Day,
    Night,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NurseShiftRecord {
    pub id: Uuid,
    pub date: DateTime<Utc>,
    pub nurse_name: String,
    pub shift: ShiftKind,
    #[serde(default)]
    pub notes: String,
}

impl NurseShiftRecord {
    pub fn new(nurse_name: impl Into<String>, shift: ShiftKind, notes: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            date: Utc::now(),
            nurse_name: nurse_name.into(),
            shift,
            notes: notes.into(),
        }
    }
}

impl Record for NurseShiftRecord {
    const COLLECTION: &'static str = "nurse_shifts";

    fn id(&self) -> Uuid {
        self.id
    }

    fn set_id(&mut self, id: Uuid) {
        self.id = id;
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.date
    }

    // Shift logs start empty.
    fn seed() -> Vec<Self> {
        Vec::new()
    }
}

// ── Preferences and secure-tier documents ───────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Metric,
    Imperial,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreferences {
    #[serde(default)]
    pub parent_name: String,
    #[serde(default)]
    pub baby_name: String,
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
    #[serde(default)]
    pub units: Units,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_reminder_hour: Option<u8>,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            parent_name: String::new(),
            baby_name: String::new(),
            notifications_enabled: true,
            units: Units::Metric,
            daily_reminder_hour: Some(20),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BabyProfile {
    pub name: String,
    pub birth_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gestational_age_weeks: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_weight_grams: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hospital: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySettings {
    pub biometric_unlock: bool,
    pub auto_lock_minutes: u32,
    pub hide_in_app_switcher: bool,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            biometric_unlock: false,
            auto_lock_minutes: 5,
            hide_in_app_switcher: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_have_unique_ids() {
        let journal = JournalEntry::seed();
        assert_eq!(journal.len(), 2);
        assert_ne!(journal[0].id, journal[1].id);
        assert_eq!(ProgressEntry::seed().len(), 2);
        assert_eq!(MemoryItem::seed().len(), 2);
        assert!(NurseShiftRecord::seed().is_empty());
    }

    #[test]
    fn journal_serializes_camel_case() {
        let entry = JournalEntry::new("t", "c", Mood::Calm);
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["mood"], "calm");
        assert!(value.get("date").is_some());
        let back: JournalEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn preferences_tolerate_missing_fields() {
        let prefs: UserPreferences = serde_json::from_str(r#"{"babyName":"Ava"}"#).unwrap();
        assert_eq!(prefs.baby_name, "Ava");
        assert!(prefs.notifications_enabled);
        assert_eq!(prefs.units, Units::Metric);
    }
}
