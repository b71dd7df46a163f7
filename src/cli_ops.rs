use clap::Args;

use crate::directory::COLLABORATOR_ROLE;
use crate::domain::assignment::AssignmentSpec;
use crate::domain::report::{Contributor, ContributorRole, EvidenceKind, EvidenceRef};

#[derive(Debug, Args)]
pub struct JsonArgs {
    #[arg(long, help = "Render as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct IdArgs {
    #[arg(help = "Identifier.")]
    pub id: String,
}

#[derive(Debug, Args)]
pub struct PeriodNewArgs {
    #[arg(short = 'n', long, help = "Period name, for example Q1-2025.")]
    pub name: String,

    #[arg(long, help = "Coordinator collaborator id that owns the period.")]
    pub coordinator: String,

    #[arg(long, help = "Start (RFC 3339 or YYYY-MM-DD, a bare date means 00:00:00Z).")]
    pub start: String,

    #[arg(long, help = "End (RFC 3339 or YYYY-MM-DD, a bare date means 23:59:59Z).")]
    pub end: String,

    #[arg(long = "desc", help = "Optional description.")]
    pub description: Option<String>,

    #[arg(
        long = "assign",
        value_name = "ITEM=C1[,C2]",
        value_parser = parse_individual_spec,
        help = "Seed one individual assignment per listed collaborator (repeatable)."
    )]
    pub assign: Vec<AssignmentSpec>,

    #[arg(
        long = "pool",
        value_name = "ITEM=C1,C2",
        value_parser = parse_pooled_spec,
        help = "Seed one pooled assignment shared by the listed collaborators (repeatable)."
    )]
    pub pool: Vec<AssignmentSpec>,

    #[arg(long, help = "Render as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct PeriodListArgs {
    #[arg(long, help = "Only periods owned by this coordinator.")]
    pub coordinator: Option<String>,

    #[arg(long, help = "Only active (true) or inactive (false) periods.")]
    pub active: Option<bool>,

    #[arg(long, help = "Only periods that end on or after this date.")]
    pub from: Option<String>,

    #[arg(long, help = "Only periods that start on or before this date.")]
    pub to: Option<String>,

    #[arg(long, help = "Page number, starting at 1.")]
    pub page: Option<u32>,

    #[arg(long = "per-page", help = "Page size (default 20, at most 100).")]
    pub per_page: Option<u32>,

    #[arg(long, help = "Render as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct PeriodIdArgs {
    #[arg(help = "Period id.")]
    pub id: String,

    #[arg(long, help = "Render as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct PeriodDatesArgs {
    #[arg(help = "Period id.")]
    pub id: String,

    #[arg(long, help = "New start.")]
    pub start: String,

    #[arg(long, help = "New end.")]
    pub end: String,

    #[arg(long, help = "Render as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct PeriodRemoveArgs {
    #[arg(help = "Period id.")]
    pub id: String,

    #[arg(
        short = 'f',
        long,
        help = "Also delete completion records that still reference the period."
    )]
    pub force: bool,

    #[arg(long, help = "Render as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct AssignArgs {
    #[arg(help = "Period id.")]
    pub period: String,

    #[arg(help = "Catalog item id.")]
    pub item: String,

    #[arg(
        long = "to",
        required = true,
        num_args = 1..,
        value_delimiter = ',',
        help = "Collaborator id(s)."
    )]
    pub collaborators: Vec<String>,

    #[arg(
        long = "all",
        help = "Create one pooled assignment shared by every listed collaborator."
    )]
    pub assign_to_all: bool,

    #[arg(long, help = "Optional notes.")]
    pub notes: Option<String>,

    #[arg(long, help = "Render as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ReassignArgs {
    #[arg(help = "Period id.")]
    pub period: String,

    #[arg(help = "Catalog item id.")]
    pub item: String,

    #[arg(long, help = "Current owner.")]
    pub from: String,

    #[arg(long, help = "New owner.")]
    pub to: String,

    #[arg(long, help = "Render as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ProgressArgs {
    #[arg(help = "Period id.")]
    pub period: String,

    #[arg(help = "Catalog item id.")]
    pub item: String,

    #[arg(long = "by", help = "Collaborator doing the work.")]
    pub collaborator: String,
}

#[derive(Debug, Args)]
pub struct CompleteArgs {
    #[arg(help = "Period id.")]
    pub period: String,

    #[arg(help = "Catalog item id.")]
    pub item: String,

    #[arg(long = "by", help = "Collaborator completing the work.")]
    pub collaborator: String,

    #[arg(long, help = "Specialty reference.")]
    pub specialty: Option<String>,

    #[arg(long, help = "Free-text note.")]
    pub note: Option<String>,

    #[arg(
        long = "evidence",
        value_name = "KIND:REF",
        value_parser = parse_evidence,
        help = "Evidence reference, kind is work, device, or site (repeatable)."
    )]
    pub evidence: Vec<EvidenceRef>,

    #[arg(
        long = "contributor",
        value_name = "ID[:ROLE[:DESCRIPTION]]",
        value_parser = parse_contributor,
        help = "Collaborative contributor; exactly one must be the principal (repeatable)."
    )]
    pub contributors: Vec<Contributor>,

    #[arg(long, help = "Render as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct UnassignArgs {
    #[arg(help = "Period id.")]
    pub period: String,

    #[arg(help = "Catalog item id.")]
    pub item: String,

    #[arg(
        long = "collaborator",
        conflicts_with = "pooled",
        required_unless_present = "pooled",
        help = "Owner of the individual assignment to delete."
    )]
    pub collaborator: Option<String>,

    #[arg(long, help = "Delete the pooled assignment for the item.")]
    pub pooled: bool,

    #[arg(long, help = "Render as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct CollaboratorViewArgs {
    #[arg(help = "Collaborator id.")]
    pub collaborator: String,

    #[arg(long, help = "Render as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ReportIdArgs {
    #[arg(help = "Completion record id.")]
    pub id: String,

    #[arg(long, help = "Render as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ReportUpdateArgs {
    #[arg(help = "Completion record id.")]
    pub id: String,

    #[arg(long, help = "Collaborator making the correction.")]
    pub actor: String,

    #[arg(long, help = "Replacement note.")]
    pub note: Option<String>,

    #[arg(long, help = "Replacement specialty reference.")]
    pub specialty: Option<String>,

    #[arg(long, help = "Render as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ReportReviewArgs {
    #[arg(help = "Completion record id.")]
    pub id: String,

    #[arg(help = "Review state: submitted, approved, or rejected.")]
    pub state: String,

    #[arg(long, help = "Render as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct RevertArgs {
    #[arg(help = "Completion record id.")]
    pub report: String,

    #[arg(long, help = "Render as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct SweepArgs {
    #[arg(
        short = 'w',
        long,
        help = "Keep sweeping every sweep.interval_secs until interrupted."
    )]
    pub watch: bool,

    #[arg(long, help = "Render as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct CatalogAddArgs {
    #[arg(help = "Catalog item id.")]
    pub id: String,

    #[arg(long, help = "Item kind, for example extinguisher.")]
    pub kind: String,

    #[arg(long)]
    pub location: Option<String>,

    #[arg(long)]
    pub building: Option<String>,

    #[arg(long)]
    pub level: Option<String>,

    #[arg(long, help = "Register the item as inactive.")]
    pub inactive: bool,
}

#[derive(Debug, Args)]
pub struct CollaboratorAddArgs {
    #[arg(help = "Collaborator id.")]
    pub id: String,

    #[arg(long, help = "Display name.")]
    pub name: String,

    #[arg(long, default_value = COLLABORATOR_ROLE, help = "Role: collaborator or coordinator.")]
    pub role: String,

    #[arg(long, help = "Policy membership.")]
    pub policy: Option<String>,

    #[arg(long, help = "Register the collaborator as inactive.")]
    pub inactive: bool,
}

fn split_spec(raw: &str) -> Result<(String, Vec<String>), String> {
    let (item, people) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected ITEM=C1[,C2], got '{raw}'"))?;
    let item = item.trim();
    if item.is_empty() {
        return Err(format!("missing catalog item in '{raw}'"));
    }
    let collaborators: Vec<String> = people
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();
    if collaborators.is_empty() {
        return Err(format!("no collaborators in '{raw}'"));
    }
    Ok((item.to_string(), collaborators))
}

pub fn parse_individual_spec(raw: &str) -> Result<AssignmentSpec, String> {
    let (catalog_item_id, collaborators) = split_spec(raw)?;
    Ok(AssignmentSpec {
        catalog_item_id,
        collaborators,
        assign_to_all: false,
        notes: None,
    })
}

pub fn parse_pooled_spec(raw: &str) -> Result<AssignmentSpec, String> {
    let (catalog_item_id, collaborators) = split_spec(raw)?;
    Ok(AssignmentSpec {
        catalog_item_id,
        collaborators,
        assign_to_all: true,
        notes: None,
    })
}

pub fn parse_evidence(raw: &str) -> Result<EvidenceRef, String> {
    let (kind, reference) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected KIND:REF, got '{raw}'"))?;
    let kind: EvidenceKind = kind.parse()?;
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(format!("missing evidence reference in '{raw}'"));
    }
    Ok(EvidenceRef {
        kind,
        reference: reference.to_string(),
    })
}

pub fn parse_contributor(raw: &str) -> Result<Contributor, String> {
    let mut parts = raw.splitn(3, ':');
    let collaborator_id = parts.next().unwrap_or_default().trim();
    if collaborator_id.is_empty() {
        return Err(format!("missing contributor id in '{raw}'"));
    }
    let role: ContributorRole = parts
        .next()
        .unwrap_or_default()
        .parse()
        .map_err(|err: crate::domain::report::CollaborationError| err.to_string())?;
    let description = parts
        .next()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string);
    Ok(Contributor {
        collaborator_id: collaborator_id.to_string(),
        role,
        description,
    })
}
