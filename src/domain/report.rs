use std::error::Error;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::state::ReportState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributorRole {
    Principal,
    Contributor,
}

impl ContributorRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ContributorRole::Principal => "principal",
            ContributorRole::Contributor => "contributor",
        }
    }
}

impl FromStr for ContributorRole {
    type Err = CollaborationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "principal" => Ok(ContributorRole::Principal),
            "contributor" | "" => Ok(ContributorRole::Contributor),
            other => Err(CollaborationError::UnknownRole(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
    pub collaborator_id: String,
    pub role: ContributorRole,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    Work,
    Device,
    Site,
}

impl FromStr for EvidenceKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "work" => Ok(EvidenceKind::Work),
            "device" => Ok(EvidenceKind::Device),
            "site" | "location" => Ok(EvidenceKind::Site),
            other => Err(format!(
                "unknown evidence kind '{other}': expected work, device, or site"
            )),
        }
    }
}

/// Pointer to stored evidence. Storage itself lives outside this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub kind: EvidenceKind,
    pub reference: String,
}

/// What a collaborator submits when completing an assignment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionPayload {
    #[serde(default)]
    pub specialty_id: Option<String>,
    #[serde(default)]
    pub evidence: Vec<EvidenceRef>,
    #[serde(default)]
    pub note: Option<String>,
    /// Empty means an individual completion.
    #[serde(default)]
    pub contributors: Vec<Contributor>,
}

impl CompletionPayload {
    pub fn is_collaborative(&self) -> bool {
        !self.contributors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub id: String,
    pub catalog_item_id: String,
    pub collaborator_id: String,
    pub specialty_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    pub evidence: Vec<EvidenceRef>,
    pub note: Option<String>,
    pub state: ReportState,
    pub is_collaborative: bool,
    pub contributors: Vec<Contributor>,
    pub period_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl CompletionRecord {
    pub fn contributor_ids(&self) -> Vec<String> {
        self.contributors
            .iter()
            .map(|contributor| contributor.collaborator_id.clone())
            .collect()
    }

    pub fn involves(&self, collaborator_id: &str) -> bool {
        self.collaborator_id == collaborator_id
            || self
                .contributors
                .iter()
                .any(|contributor| contributor.collaborator_id == collaborator_id)
    }
}

/// A collaborative list must be non-empty, name each collaborator once, and
/// carry exactly one principal, who must be the submitting collaborator.
pub fn validate_collaboration(
    principal_id: &str,
    contributors: &[Contributor],
) -> Result<(), CollaborationError> {
    if contributors.is_empty() {
        return Err(CollaborationError::Empty);
    }

    let mut seen: Vec<&str> = Vec::with_capacity(contributors.len());
    for contributor in contributors {
        let id = contributor.collaborator_id.trim();
        if id.is_empty() {
            return Err(CollaborationError::BlankContributor);
        }
        if seen.contains(&id) {
            return Err(CollaborationError::Duplicate(id.to_string()));
        }
        seen.push(id);
    }

    let principals: Vec<&Contributor> = contributors
        .iter()
        .filter(|contributor| contributor.role == ContributorRole::Principal)
        .collect();
    match principals.as_slice() {
        [] => Err(CollaborationError::PrincipalCount(0)),
        [only] if only.collaborator_id == principal_id => Ok(()),
        [only] => Err(CollaborationError::PrincipalMismatch {
            expected: principal_id.to_string(),
            found: only.collaborator_id.clone(),
        }),
        many => Err(CollaborationError::PrincipalCount(many.len())),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollaborationError {
    Empty,
    BlankContributor,
    Duplicate(String),
    PrincipalCount(usize),
    PrincipalMismatch { expected: String, found: String },
    UnknownRole(String),
}

impl fmt::Display for CollaborationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollaborationError::Empty => {
                write!(f, "collaborative completion requires at least one contributor")
            }
            CollaborationError::BlankContributor => write!(f, "contributor id cannot be empty"),
            CollaborationError::Duplicate(id) => {
                write!(f, "contributor '{}' is listed more than once", id)
            }
            CollaborationError::PrincipalCount(count) => write!(
                f,
                "collaborative completion needs exactly one principal, found {}",
                count
            ),
            CollaborationError::PrincipalMismatch { expected, found } => write!(
                f,
                "principal must be the completing collaborator '{}', found '{}'",
                expected, found
            ),
            CollaborationError::UnknownRole(role) => write!(
                f,
                "unknown contributor role '{}': expected principal or contributor",
                role
            ),
        }
    }
}

impl Error for CollaborationError {}
