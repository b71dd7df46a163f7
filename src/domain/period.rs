use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::assignment::{AssignmentKey, AssignmentRecord, AssignmentSlot};
use super::state::AssignmentState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub id: String,
    pub name: String,
    pub coordinator_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub start_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end_at: OffsetDateTime,
    pub active: bool,
    pub description: Option<String>,
    #[serde(with = "assignment_list")]
    pub assignments: BTreeMap<AssignmentKey, AssignmentRecord>,
    pub progress: Progress,
    pub version: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub total_devices: u32,
    pub completed_devices: u32,
    pub completion_percent: u32,
}

impl Progress {
    pub fn from_assignments<'a>(records: impl Iterator<Item = &'a AssignmentRecord>) -> Self {
        let mut total = 0u32;
        let mut completed = 0u32;
        for record in records {
            total += 1;
            if record.state == AssignmentState::Completed {
                completed += 1;
            }
        }
        let completion_percent = if total == 0 {
            0
        } else {
            (completed * 100 + total / 2) / total
        };
        Self {
            total_devices: total,
            completed_devices: completed,
            completion_percent,
        }
    }
}

/// `end > start`, checked at creation and on every date edit.
pub fn window_is_valid(start_at: OffsetDateTime, end_at: OffsetDateTime) -> bool {
    end_at > start_at
}

/// A period is active until its end has passed; future windows count.
pub fn derive_active(end_at: OffsetDateTime, now: OffsetDateTime) -> bool {
    now <= end_at
}

impl Period {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        !derive_active(self.end_at, now)
    }

    pub fn refresh_progress(&mut self) {
        self.progress = Progress::from_assignments(self.assignments.values());
    }

    pub fn insert_assignment(&mut self, record: AssignmentRecord) -> bool {
        let key = record.key();
        if self.assignments.contains_key(&key) {
            return false;
        }
        self.assignments.insert(key, record);
        true
    }

    /// Individual ownership wins over pool membership.
    pub fn find_for_collaborator(
        &self,
        catalog_item_id: &str,
        collaborator_id: &str,
    ) -> Option<AssignmentKey> {
        let individual = AssignmentKey::individual(catalog_item_id, collaborator_id);
        if self.assignments.contains_key(&individual) {
            return Some(individual);
        }
        let pooled = AssignmentKey::pooled(catalog_item_id);
        match self.assignments.get(&pooled) {
            Some(record) if record.target.admits(collaborator_id) => Some(pooled),
            _ => None,
        }
    }

    pub fn records_for_item<'a>(
        &'a self,
        catalog_item_id: &'a str,
    ) -> impl Iterator<Item = (&'a AssignmentKey, &'a AssignmentRecord)> + 'a {
        self.assignments
            .iter()
            .filter(move |(key, _)| key.catalog_item_id == catalog_item_id)
    }

    pub fn keys_linked_to(&self, completion_record_id: &str) -> Vec<AssignmentKey> {
        self.assignments
            .iter()
            .filter(|(_, record)| record.completion_record_id.as_deref() == Some(completion_record_id))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn linked_report_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for record in self.assignments.values() {
            if let Some(id) = record.completion_record_id.as_ref() {
                if !ids.contains(id) {
                    ids.push(id.clone());
                }
            }
        }
        ids
    }
}

/// Rebuilds the keyed view from a flat list, refusing duplicate keys.
pub fn index_assignments(
    records: Vec<AssignmentRecord>,
) -> Result<BTreeMap<AssignmentKey, AssignmentRecord>, DuplicateAssignment> {
    let mut map = BTreeMap::new();
    for record in records {
        let key = record.key();
        if map.contains_key(&key) {
            return Err(DuplicateAssignment { key });
        }
        map.insert(key, record);
    }
    Ok(map)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateAssignment {
    pub key: AssignmentKey,
}

impl fmt::Display for DuplicateAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key.slot {
            AssignmentSlot::Individual(collaborator_id) => write!(
                f,
                "duplicate assignment of '{}' to '{}'",
                self.key.catalog_item_id, collaborator_id
            ),
            AssignmentSlot::Pool => write!(
                f,
                "duplicate pooled assignment of '{}'",
                self.key.catalog_item_id
            ),
        }
    }
}

impl Error for DuplicateAssignment {}

/// Assignments persist as a plain JSON array; the key is rebuilt on load.
mod assignment_list {
    use std::collections::BTreeMap;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::{index_assignments, AssignmentKey, AssignmentRecord};

    pub fn serialize<S>(
        value: &BTreeMap<AssignmentKey, AssignmentRecord>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let records: Vec<&AssignmentRecord> = value.values().collect();
        records.serialize(serializer)
    }

    pub fn deserialize<'de, D>(
        deserializer: D,
    ) -> Result<BTreeMap<AssignmentKey, AssignmentRecord>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let records = Vec::<AssignmentRecord>::deserialize(deserializer)?;
        index_assignments(records).map_err(D::Error::custom)
    }
}
