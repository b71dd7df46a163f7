use std::io::{self, IsTerminal};

use crate::domain::assignment::{AssignmentRecord, AssignmentTarget};
use crate::domain::period::Period;
use crate::domain::timestamp::format_rfc3339;
use crate::ledger::AssignmentView;
use crate::lifecycle::{PeriodFilter, PeriodPage};

pub fn print_period_page(page: &PeriodPage, filter: &PeriodFilter) {
    let palette = Palette::auto();
    println!("{}", palette.heading("Periods"));
    if let Some(summary) = filter_summary(filter) {
        println!("{}", palette.dim(&format!("filters: {summary}")));
    }

    if page.items.is_empty() {
        println!("{}", palette.dim("no periods matched"));
        return;
    }

    for period in &page.items {
        println!("{}", format_period_row(period, &palette));
    }
    println!(
        "{}",
        palette.dim(&format!(
            "page {} ({} per page), {} period(s) total",
            page.page, page.per_page, page.total
        ))
    );
}

pub fn print_period(period: &Period) {
    let palette = Palette::auto();
    println!("{}", format_period_row(period, &palette));
    println!(
        "{}",
        palette.dim(&format!(
            "coordinator={} window={}..{}",
            period.coordinator_id,
            format_rfc3339(period.start_at),
            format_rfc3339(period.end_at)
        ))
    );
    if let Some(description) = period.description.as_deref() {
        println!("{description}");
    }
    if period.assignments.is_empty() {
        println!("{}", palette.dim("no assignments"));
        return;
    }
    for record in period.assignments.values() {
        println!("  {}", format_assignment(record, &palette));
    }
}

pub fn print_assignment_views(heading: &str, views: &[AssignmentView]) {
    let palette = Palette::auto();
    println!("{}", palette.heading(heading));
    if views.is_empty() {
        println!("{}", palette.dim("nothing assigned"));
        return;
    }
    for view in views {
        println!(
            "{} {} {}",
            palette.id(&view.period_id),
            view.period_name,
            format_assignment(&view.record, &palette)
        );
    }
    println!("{}", palette.dim(&format!("{} assignment(s)", views.len())));
}

fn format_period_row(period: &Period, palette: &Palette) -> String {
    let status = if period.active { "active" } else { "inactive" };
    format!(
        "{} {} {} {}",
        palette.id(&period.id),
        palette.state(status),
        period.name,
        palette.dim(&format!(
            "{}/{} done ({}%)",
            period.progress.completed_devices,
            period.progress.total_devices,
            period.progress.completion_percent
        ))
    )
}

fn format_assignment(record: &AssignmentRecord, palette: &Palette) -> String {
    let owner = match &record.target {
        AssignmentTarget::Individual { collaborator_id } => collaborator_id.clone(),
        AssignmentTarget::Pooled { eligible } => format!("pool[{}]", eligible.join(",")),
    };
    let mut line = format!(
        "{} {} {}",
        palette.state(record.state.as_str()),
        record.catalog_item_id,
        palette.owner(&owner)
    );
    if let Some(completed_by) = record.completed_by.as_deref() {
        line.push_str(&palette.dim(&format!(" by {completed_by}")));
    }
    if let Some(report_id) = record.completion_record_id.as_deref() {
        line.push_str(&palette.dim(&format!(" -> {report_id}")));
    }
    line
}

fn filter_summary(filter: &PeriodFilter) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(coordinator) = filter.coordinator_id.as_deref() {
        parts.push(format!("coordinator={coordinator}"));
    }
    if let Some(active) = filter.active {
        parts.push(format!("active={active}"));
    }
    if let Some(from) = filter.from {
        parts.push(format!("from={}", format_rfc3339(from)));
    }
    if let Some(to) = filter.to {
        parts.push(format!("to={}", format_rfc3339(to)));
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

struct Palette {
    enabled: bool,
}

impl Palette {
    fn auto() -> Self {
        let enabled = std::env::var_os("NO_COLOR").is_none() && io::stdout().is_terminal();
        Self { enabled }
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.enabled {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }

    fn heading(&self, text: &str) -> String {
        self.paint("1;36", text)
    }

    fn dim(&self, text: &str) -> String {
        self.paint("2", text)
    }

    fn id(&self, text: &str) -> String {
        self.paint("1;94", text)
    }

    fn state(&self, state: &str) -> String {
        let upper = state.to_ascii_uppercase();
        self.paint(state_color_code(state), &format!("[{upper}]"))
    }

    fn owner(&self, text: &str) -> String {
        self.paint("35", &format!("({text})"))
    }
}

fn state_color_code(state: &str) -> &'static str {
    match state {
        "pending" => "34",
        "in_progress" => "33",
        "completed" | "active" => "32",
        "inactive" => "90",
        _ => "37",
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::filter_summary;
    use crate::lifecycle::PeriodFilter;

    #[test]
    fn filter_summary_formats_only_set_filters() {
        let filter = PeriodFilter {
            coordinator_id: Some("boss".to_string()),
            active: Some(false),
            from: Some(datetime!(2025-01-01 00:00 UTC)),
            ..PeriodFilter::default()
        };
        assert_eq!(
            filter_summary(&filter).expect("summary should exist"),
            "coordinator=boss active=false from=2025-01-01T00:00:00Z"
        );
    }

    #[test]
    fn filter_summary_is_none_for_empty_filters() {
        assert!(filter_summary(&PeriodFilter::default()).is_none());
    }
}
