use std::path::PathBuf;

use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::{Args, Parser, Subcommand};

pub use crate::cli_ops::*;

fn cli_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::BrightCyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::BrightYellow.on_default() | Effects::BOLD)
        .literal(AnsiColor::BrightGreen.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::BrightMagenta.on_default())
}

#[derive(Debug, Parser)]
#[command(name = "mperiod")]
#[command(bin_name = "mperiod")]
#[command(version)]
#[command(about = "Maintenance period assignments, completions, and cleanup")]
#[command(styles = cli_styles())]
pub struct Cli {
    #[arg(
        short = 'd',
        long,
        env = "MPERIOD_DB_PATH",
        help = "Path to the SQLite database (overrides store.db_path)."
    )]
    pub db: Option<String>,

    #[arg(
        short = 'c',
        long,
        env = "MPERIOD_CONFIG",
        help = "Path to a TOML config file (default .mperiod/config.toml)."
    )]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Create, inspect, close, and delete periods.")]
    Period(PeriodArgs),
    #[command(about = "Assign a catalog item to collaborators in a period.")]
    Assign(AssignArgs),
    #[command(about = "Move an individual assignment to another collaborator.")]
    Reassign(ReassignArgs),
    #[command(about = "Mark an assignment as in progress.")]
    Progress(ProgressArgs),
    #[command(about = "Complete an assignment and record its evidence.")]
    Complete(CompleteArgs),
    #[command(about = "Delete an assignment and any completion records it produced.")]
    Unassign(UnassignArgs),
    #[command(about = "List open assignments for a collaborator across active periods.")]
    Pending(CollaboratorViewArgs),
    #[command(about = "List every assignment a collaborator can see, any state.")]
    History(CollaboratorViewArgs),
    #[command(about = "Inspect, correct, review, or delete completion records.")]
    Report(ReportArgs),
    #[command(about = "Reset assignments that reference a completion record.")]
    Revert(RevertArgs),
    #[command(about = "Deactivate periods whose end date has passed.")]
    Sweep(SweepArgs),
    #[command(about = "Remove assignments whose catalog item no longer exists.")]
    Repair(JsonArgs),
    #[command(about = "Seed the local catalog projection.")]
    Catalog(CatalogArgs),
    #[command(about = "Seed the local collaborator projection.")]
    Collaborator(CollaboratorArgs),
}

#[derive(Debug, Args)]
pub struct PeriodArgs {
    #[command(subcommand)]
    pub command: PeriodSubcommands,
}

#[derive(Debug, Subcommand)]
pub enum PeriodSubcommands {
    #[command(about = "Create a period, optionally with seed assignments.")]
    New(PeriodNewArgs),
    #[command(about = "List periods with filters and pagination.")]
    Ls(PeriodListArgs),
    #[command(about = "Show one period with its assignments.")]
    Show(PeriodIdArgs),
    #[command(about = "Change the period window; re-derives the active flag.")]
    Dates(PeriodDatesArgs),
    #[command(about = "Close a period early.")]
    Finalize(PeriodIdArgs),
    #[command(about = "Delete a period.")]
    Rm(PeriodRemoveArgs),
    #[command(about = "Show the audit trail of a period.")]
    Events(PeriodIdArgs),
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    #[command(subcommand)]
    pub command: ReportSubcommands,
}

#[derive(Debug, Subcommand)]
pub enum ReportSubcommands {
    #[command(about = "Show one completion record.")]
    Show(ReportIdArgs),
    #[command(about = "Correct the note or specialty of a completion record.")]
    Update(ReportUpdateArgs),
    #[command(about = "Set the review state: submitted, approved, or rejected.")]
    Review(ReportReviewArgs),
    #[command(about = "Delete a completion record and revert its assignments.")]
    Rm(ReportIdArgs),
}

#[derive(Debug, Args)]
pub struct CatalogArgs {
    #[command(subcommand)]
    pub command: CatalogSubcommands,
}

#[derive(Debug, Subcommand)]
pub enum CatalogSubcommands {
    #[command(about = "Add or replace a catalog item.")]
    Add(CatalogAddArgs),
    #[command(about = "Remove a catalog item.")]
    Rm(IdArgs),
    #[command(about = "List catalog items.")]
    Ls(JsonArgs),
}

#[derive(Debug, Args)]
pub struct CollaboratorArgs {
    #[command(subcommand)]
    pub command: CollaboratorSubcommands,
}

#[derive(Debug, Subcommand)]
pub enum CollaboratorSubcommands {
    #[command(about = "Add or replace a collaborator.")]
    Add(CollaboratorAddArgs),
    #[command(about = "Remove a collaborator.")]
    Rm(IdArgs),
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
