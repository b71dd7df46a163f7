use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::state::{AssignmentState, InvalidStateTransition};

/// Who an assignment belongs to. Exactly one shape is ever populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssignmentTarget {
    Individual { collaborator_id: String },
    Pooled { eligible: Vec<String> },
}

impl AssignmentTarget {
    pub fn shape(&self) -> &'static str {
        match self {
            AssignmentTarget::Individual { .. } => "individual",
            AssignmentTarget::Pooled { .. } => "pooled",
        }
    }

    /// Owner for individual targets, membership for pooled ones.
    pub fn admits(&self, collaborator_id: &str) -> bool {
        match self {
            AssignmentTarget::Individual {
                collaborator_id: owner,
            } => owner == collaborator_id,
            AssignmentTarget::Pooled { eligible } => eligible.iter().any(|id| id == collaborator_id),
        }
    }

    pub fn collaborators(&self) -> Vec<&str> {
        match self {
            AssignmentTarget::Individual { collaborator_id } => vec![collaborator_id.as_str()],
            AssignmentTarget::Pooled { eligible } => eligible.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AssignmentSlot {
    Individual(String),
    Pool,
}

/// Uniqueness key inside a period: `(item, collaborator)` for individual
/// work, `(item, pool)` for a pooled group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssignmentKey {
    pub catalog_item_id: String,
    pub slot: AssignmentSlot,
}

impl AssignmentKey {
    pub fn individual(catalog_item_id: &str, collaborator_id: &str) -> Self {
        Self {
            catalog_item_id: catalog_item_id.to_string(),
            slot: AssignmentSlot::Individual(collaborator_id.to_string()),
        }
    }

    pub fn pooled(catalog_item_id: &str) -> Self {
        Self {
            catalog_item_id: catalog_item_id.to_string(),
            slot: AssignmentSlot::Pool,
        }
    }
}

impl Ord for AssignmentKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.catalog_item_id
            .cmp(&other.catalog_item_id)
            .then_with(|| self.slot.cmp(&other.slot))
    }
}

impl PartialOrd for AssignmentKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Everything stamped onto an assignment when it completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionStamp {
    pub completed_at: OffsetDateTime,
    pub completed_by: String,
    pub completion_record_id: String,
    pub contributors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub catalog_item_id: String,
    pub target: AssignmentTarget,
    pub state: AssignmentState,
    #[serde(with = "time::serde::rfc3339")]
    pub assigned_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub completed_by: Option<String>,
    #[serde(default)]
    pub completion_record_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contributors: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl AssignmentRecord {
    pub fn new(
        catalog_item_id: &str,
        target: AssignmentTarget,
        notes: Option<String>,
        assigned_at: OffsetDateTime,
    ) -> Self {
        Self {
            catalog_item_id: catalog_item_id.to_string(),
            target,
            state: AssignmentState::Pending,
            assigned_at,
            completed_at: None,
            completed_by: None,
            completion_record_id: None,
            contributors: Vec::new(),
            notes,
        }
    }

    pub fn key(&self) -> AssignmentKey {
        match &self.target {
            AssignmentTarget::Individual { collaborator_id } => {
                AssignmentKey::individual(&self.catalog_item_id, collaborator_id)
            }
            AssignmentTarget::Pooled { .. } => AssignmentKey::pooled(&self.catalog_item_id),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == AssignmentState::Completed
    }

    pub fn mark_in_progress(&mut self) -> Result<(), InvalidStateTransition> {
        self.state.validate_transition(AssignmentState::InProgress)?;
        self.state = AssignmentState::InProgress;
        Ok(())
    }

    pub fn mark_completed(&mut self, stamp: &CompletionStamp) -> Result<(), InvalidStateTransition> {
        self.state.validate_transition(AssignmentState::Completed)?;
        self.state = AssignmentState::Completed;
        self.completed_at = Some(stamp.completed_at);
        self.completed_by = Some(stamp.completed_by.clone());
        self.completion_record_id = Some(stamp.completion_record_id.clone());
        self.contributors = stamp.contributors.clone();
        Ok(())
    }

    pub fn revert_to_pending(&mut self) {
        self.state = AssignmentState::Pending;
        self.completed_at = None;
        self.completed_by = None;
        self.completion_record_id = None;
        self.contributors.clear();
    }

    /// Collaborators whose completion records belong to this assignment:
    /// the completer plus any collaborative contributors.
    pub fn completion_participants(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for id in self.completed_by.iter().chain(self.contributors.iter()) {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }
}

/// One line of an "assign devices" request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentSpec {
    pub catalog_item_id: String,
    pub collaborators: Vec<String>,
    #[serde(default)]
    pub assign_to_all: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

impl AssignmentSpec {
    pub fn individual(catalog_item_id: &str, collaborator_id: &str) -> Self {
        Self {
            catalog_item_id: catalog_item_id.to_string(),
            collaborators: vec![collaborator_id.to_string()],
            assign_to_all: false,
            notes: None,
        }
    }

    pub fn pooled(catalog_item_id: &str, eligible: &[&str]) -> Self {
        Self {
            catalog_item_id: catalog_item_id.to_string(),
            collaborators: eligible.iter().map(|id| id.to_string()).collect(),
            assign_to_all: true,
            notes: None,
        }
    }
}
