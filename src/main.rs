mod app;
mod cli;
mod cli_ops;
mod completion;
mod config;
mod db;
mod directory;
mod domain;
mod events;
mod ledger;
mod lifecycle;
mod locks;
mod logging;
#[cfg(test)]
mod main_tests;
mod reversion;
mod ui;

use std::time::Duration;

use app::{AppError, ErrorKind};

fn main() {
    if let Err(err) = run() {
        eprintln!("error[{}]: {}", err.kind(), err);
        std::process::exit(exit_code(&err));
    }
}

fn exit_code(err: &AppError) -> i32 {
    match err.kind() {
        ErrorKind::Internal => 2,
        _ => 1,
    }
}

fn print_json(value: &impl serde::Serialize) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).expect("json serialization should work")
    );
}

fn parse_date(raw: &str, bound: domain::timestamp::DateBound) -> Result<time::OffsetDateTime, AppError> {
    Ok(domain::timestamp::parse_timestamp(raw, bound)?)
}

fn run() -> Result<(), AppError> {
    use clap::Parser;
    use cli::{
        CatalogSubcommands, CollaboratorSubcommands, Commands, PeriodSubcommands,
        ReportSubcommands,
    };
    use domain::timestamp::DateBound;

    let cli = cli::Cli::parse();
    let config = config::Config::load(cli.config.as_deref())?;
    logging::init(&config.logging.filter);

    let db_path = cli.db.clone().unwrap_or_else(|| config.store.db_path.clone());
    let app = app::App::open(&db_path, config)?;

    match cli.command {
        Commands::Period(args) => match args.command {
            PeriodSubcommands::New(args) => {
                let mut seed = args.assign;
                seed.extend(args.pool);
                let period = app.create_period(lifecycle::NewPeriod {
                    name: args.name,
                    coordinator_id: args.coordinator,
                    start_at: parse_date(&args.start, DateBound::Start)?,
                    end_at: parse_date(&args.end, DateBound::End)?,
                    description: args.description,
                    seed,
                })?;
                if args.json {
                    print_json(&period);
                } else {
                    println!("created {} {}", period.id, period.name);
                }
            }
            PeriodSubcommands::Ls(args) => {
                let filter = lifecycle::PeriodFilter {
                    coordinator_id: args.coordinator,
                    active: args.active,
                    from: args
                        .from
                        .as_deref()
                        .map(|raw| parse_date(raw, DateBound::Start))
                        .transpose()?,
                    to: args
                        .to
                        .as_deref()
                        .map(|raw| parse_date(raw, DateBound::End))
                        .transpose()?,
                    page: args.page,
                    per_page: args.per_page,
                };
                let page = app.list_periods(&filter)?;
                if args.json {
                    print_json(&page);
                } else {
                    ui::print_period_page(&page, &filter);
                }
            }
            PeriodSubcommands::Show(args) => {
                let period = app.show_period(&args.id)?;
                if args.json {
                    print_json(&period);
                } else {
                    ui::print_period(&period);
                }
            }
            PeriodSubcommands::Dates(args) => {
                let period = app.update_dates(
                    &args.id,
                    parse_date(&args.start, DateBound::Start)?,
                    parse_date(&args.end, DateBound::End)?,
                )?;
                if args.json {
                    print_json(&period);
                } else {
                    println!(
                        "updated {} active={}",
                        period.id, period.active
                    );
                }
            }
            PeriodSubcommands::Finalize(args) => {
                let period = app.finalize_period(&args.id)?;
                if args.json {
                    print_json(&period);
                } else {
                    println!("finalized {}", period.id);
                }
            }
            PeriodSubcommands::Rm(args) => {
                let deleted = app.delete_period(&args.id, args.force)?;
                if args.json {
                    print_json(&deleted);
                } else {
                    println!(
                        "deleted {} reports_deleted={} events_deleted={}",
                        deleted.period_id, deleted.reports_deleted, deleted.events_deleted
                    );
                }
            }
            PeriodSubcommands::Events(args) => {
                let events = app.period_events(&args.id)?;
                if args.json {
                    print_json(&events);
                } else {
                    for event in events {
                        println!("{} {} {}", event.occurred_at, event.event_type, event.data);
                    }
                }
            }
        },
        Commands::Assign(args) => {
            let spec = domain::assignment::AssignmentSpec {
                catalog_item_id: args.item,
                collaborators: args.collaborators,
                assign_to_all: args.assign_to_all,
                notes: args.notes,
            };
            let period = app.assign_devices(&args.period, &[spec])?;
            if args.json {
                print_json(&period);
            } else {
                println!(
                    "assigned in {} ({} assignment(s))",
                    period.id, period.progress.total_devices
                );
            }
        }
        Commands::Reassign(args) => {
            let period = app.reassign_owner(&args.period, &args.item, &args.from, &args.to)?;
            if args.json {
                print_json(&period);
            } else {
                println!("reassigned {} {} -> {}", args.item, args.from, args.to);
            }
        }
        Commands::Progress(args) => {
            app.record_progress(&args.period, &args.item, &args.collaborator)?;
            println!("{} in progress for {}", args.item, args.collaborator);
        }
        Commands::Complete(args) => {
            let payload = domain::report::CompletionPayload {
                specialty_id: args.specialty,
                evidence: args.evidence,
                note: args.note,
                contributors: args.contributors,
            };
            let summary = app.complete(&args.period, &args.item, &args.collaborator, payload)?;
            if args.json {
                print_json(&summary);
            } else {
                println!(
                    "completed {} by {} -> {} ({}%)",
                    summary.catalog_item_id,
                    summary.completed_by,
                    summary.completion_record_id,
                    summary.progress.completion_percent
                );
            }
        }
        Commands::Unassign(args) => {
            let summary = match args.collaborator.as_deref() {
                Some(collaborator) => app.delete_assignment(&args.period, &args.item, collaborator)?,
                None => app.delete_pooled_assignment(&args.period, &args.item)?,
            };
            if args.json {
                print_json(&summary);
            } else {
                println!(
                    "removed {} assignment of {} reports_deleted={}",
                    summary.shape,
                    summary.catalog_item_id,
                    summary.reports_deleted.len()
                );
            }
        }
        Commands::Pending(args) => {
            let views = app.list_pending_for_collaborator(&args.collaborator)?;
            if args.json {
                print_json(&views);
            } else {
                ui::print_assignment_views("Pending", &views);
            }
        }
        Commands::History(args) => {
            let views = app.list_all_for_collaborator(&args.collaborator)?;
            if args.json {
                print_json(&views);
            } else {
                ui::print_assignment_views("History", &views);
            }
        }
        Commands::Report(args) => match args.command {
            ReportSubcommands::Show(args) => {
                let report = app.show_report(&args.id)?;
                print_json(&report);
            }
            ReportSubcommands::Update(args) => {
                let report = app.update_report(
                    &args.id,
                    &args.actor,
                    completion::ReportPatch {
                        note: args.note,
                        specialty_id: args.specialty,
                    },
                )?;
                if args.json {
                    print_json(&report);
                } else {
                    println!("updated {}", report.id);
                }
            }
            ReportSubcommands::Review(args) => {
                let state: domain::state::ReportState = args.state.parse()?;
                let report = app.review_report(&args.id, state)?;
                if args.json {
                    print_json(&report);
                } else {
                    println!("{} -> {}", report.id, report.state);
                }
            }
            ReportSubcommands::Rm(args) => {
                let summary = app.delete_report(&args.id)?;
                if args.json {
                    print_json(&summary);
                } else {
                    println!(
                        "deleted {} reverted={}",
                        summary.completion_record_id, summary.reverted
                    );
                }
            }
        },
        Commands::Revert(args) => {
            let summary = app.revert_to_pending(&args.report)?;
            if args.json {
                print_json(&summary);
            } else {
                println!("reverted={}", summary.reverted);
            }
        }
        Commands::Sweep(args) => {
            let interval = Duration::from_secs(app.config().sweep.interval_secs);
            loop {
                let summary = app.sweep_expired()?;
                if args.json {
                    print_json(&summary);
                } else {
                    println!("deactivated={}", summary.deactivated);
                }
                if !args.watch {
                    break;
                }
                std::thread::sleep(interval);
            }
        }
        Commands::Repair(args) => {
            let summary = app.repair_broken_references()?;
            if args.json {
                print_json(&summary);
            } else {
                println!(
                    "periods_touched={} removed={} reverted={}",
                    summary.periods_touched, summary.records_removed, summary.records_reverted
                );
            }
        }
        Commands::Catalog(args) => match args.command {
            CatalogSubcommands::Add(args) => {
                app.register_catalog_item(&db::CatalogItemRecord {
                    id: args.id.clone(),
                    kind: args.kind,
                    location: args.location,
                    building: args.building,
                    level: args.level,
                    active: !args.inactive,
                })?;
                println!("catalog item {} saved", args.id);
            }
            CatalogSubcommands::Rm(args) => {
                app.remove_catalog_item(&args.id)?;
                println!("catalog item {} removed", args.id);
            }
            CatalogSubcommands::Ls(args) => {
                let items = app.list_catalog_items()?;
                if args.json {
                    print_json(&items);
                } else {
                    for item in items {
                        let status = if item.active { "active" } else { "inactive" };
                        println!("{} {} {}", item.id, item.kind, status);
                    }
                }
            }
        },
        Commands::Collaborator(args) => match args.command {
            CollaboratorSubcommands::Add(args) => {
                app.register_collaborator(&db::CollaboratorRecord {
                    id: args.id.clone(),
                    name: args.name,
                    policy_id: args.policy,
                    role: args.role,
                    active: !args.inactive,
                })?;
                println!("collaborator {} saved", args.id);
            }
            CollaboratorSubcommands::Rm(args) => {
                app.remove_collaborator(&args.id)?;
                println!("collaborator {} removed", args.id);
            }
        },
    }

    Ok(())
}
