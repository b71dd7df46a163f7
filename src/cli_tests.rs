use clap::Parser;

use super::{
    parse_contributor, parse_evidence, parse_individual_spec, parse_pooled_spec, Cli,
    CollaboratorSubcommands, Commands, PeriodSubcommands, ReportSubcommands,
};
use crate::directory::{COLLABORATOR_ROLE, COORDINATOR_ROLE};
use crate::domain::report::{ContributorRole, EvidenceKind};

fn parse(args: &[&str]) -> Cli {
    Cli::parse_from(args)
}

#[test]
fn period_new_collects_seed_specs() {
    let cli = parse(&[
        "mperiod",
        "period",
        "new",
        "--name",
        "Q1-2025",
        "--coordinator",
        "boss",
        "--start",
        "2025-01-01",
        "--end",
        "2025-03-31",
        "--assign",
        "dev-x=c1",
        "--pool",
        "dev-y=c2,c3",
    ]);
    match cli.command {
        Commands::Period(args) => match args.command {
            PeriodSubcommands::New(new) => {
                assert_eq!(new.name, "Q1-2025");
                assert_eq!(new.assign.len(), 1);
                assert!(!new.assign[0].assign_to_all);
                assert_eq!(new.pool.len(), 1);
                assert!(new.pool[0].assign_to_all);
                assert_eq!(new.pool[0].collaborators, vec!["c2", "c3"]);
            }
            other => panic!("expected New, got {:?}", other),
        },
        other => panic!("expected Period, got {:?}", other),
    }
}

#[test]
fn assign_accepts_comma_separated_collaborators() {
    let cli = parse(&["mperiod", "assign", "P-1", "dev-y", "--to", "c2,c3", "--all"]);
    match cli.command {
        Commands::Assign(args) => {
            assert_eq!(args.collaborators, vec!["c2", "c3"]);
            assert!(args.assign_to_all);
        }
        other => panic!("expected Assign, got {:?}", other),
    }
}

#[test]
fn unassign_requires_collaborator_or_pooled() {
    assert!(Cli::try_parse_from(["mperiod", "unassign", "P-1", "dev-x"]).is_err());
    assert!(Cli::try_parse_from([
        "mperiod",
        "unassign",
        "P-1",
        "dev-x",
        "--collaborator",
        "c1",
        "--pooled"
    ])
    .is_err());
    let cli = parse(&["mperiod", "unassign", "P-1", "dev-y", "--pooled"]);
    assert!(matches!(cli.command, Commands::Unassign(ref args) if args.pooled));
}

#[test]
fn report_review_takes_positional_state() {
    let cli = parse(&["mperiod", "report", "review", "R-1", "approved"]);
    match cli.command {
        Commands::Report(args) => match args.command {
            ReportSubcommands::Review(review) => {
                assert_eq!(review.id, "R-1");
                assert_eq!(review.state, "approved");
            }
            other => panic!("expected Review, got {:?}", other),
        },
        other => panic!("expected Report, got {:?}", other),
    }
}

#[test]
fn global_db_flag_is_optional() {
    let cli = parse(&["mperiod", "--db", "/tmp/x.sqlite", "sweep"]);
    assert_eq!(cli.db.as_deref(), Some("/tmp/x.sqlite"));
    assert!(matches!(cli.command, Commands::Sweep(ref args) if !args.watch));
}

#[test]
fn spec_parsers_reject_malformed_input() {
    assert!(parse_individual_spec("dev-x").is_err());
    assert!(parse_individual_spec("=c1").is_err());
    assert!(parse_pooled_spec("dev-y=").is_err());
    let spec = parse_individual_spec(" dev-x = c1 , c2 ").unwrap();
    assert_eq!(spec.catalog_item_id, "dev-x");
    assert_eq!(spec.collaborators, vec!["c1", "c2"]);
}

#[test]
fn evidence_and_contributor_parsers() {
    let evidence = parse_evidence("device:photos/123.jpg").unwrap();
    assert_eq!(evidence.kind, EvidenceKind::Device);
    assert_eq!(evidence.reference, "photos/123.jpg");
    assert!(parse_evidence("audio:x").is_err());
    assert!(parse_evidence("work:").is_err());

    let principal = parse_contributor("c2:principal").unwrap();
    assert_eq!(principal.role, ContributorRole::Principal);
    let helper = parse_contributor("c3::held the ladder").unwrap();
    assert_eq!(helper.role, ContributorRole::Contributor);
    assert_eq!(helper.description.as_deref(), Some("held the ladder"));
    assert!(parse_contributor("c4:boss").is_err());
    assert!(parse_contributor(":principal").is_err());
}

#[test]
fn collaborator_add_defaults_to_the_collaborator_role() {
    let cli = parse(&["mperiod", "collaborator", "add", "c1", "--name", "Ana"]);
    match cli.command {
        Commands::Collaborator(args) => match args.command {
            CollaboratorSubcommands::Add(add) => {
                assert_eq!(add.role, COLLABORATOR_ROLE);
                assert!(!add.inactive);
            }
            other => panic!("expected Add, got {:?}", other),
        },
        other => panic!("expected Collaborator, got {:?}", other),
    }

    let cli = parse(&["mperiod", "collaborator", "add", "boss", "--name", "B", "--role", "coordinator"]);
    assert!(matches!(
        cli.command,
        Commands::Collaborator(ref args)
            if matches!(args.command, CollaboratorSubcommands::Add(ref add) if add.role == COORDINATOR_ROLE)
    ));
}
