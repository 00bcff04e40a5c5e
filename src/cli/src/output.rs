//! Output formatting for the CRM CLI.
//!
//! Generic table/JSON/YAML printers plus the renderings of pipeline records:
//! stage tables, lead and deal details, stage moves and stage histories.

use clap::ValueEnum;
use colored::*;
use serde::Serialize;
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};
use uuid::Uuid;

use crate::commands::{DealInfo, HistoryEntry, LeadInfo, StageInfo, TransitionInfo};

/// Output format selection.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Render as a formatted table
    #[default]
    Table,
    /// Render as JSON
    Json,
    /// Render as YAML
    Yaml,
}

impl OutputFormat {
    pub fn is_table(self) -> bool {
        matches!(self, OutputFormat::Table)
    }
}

pub fn print_success(msg: &str) {
    println!("{} {}", "[OK]".green().bold(), msg);
}

/// Errors go to stderr.
pub fn print_error(msg: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), msg);
}

pub fn print_info(msg: &str) {
    println!("{} {}", "[INFO]".blue().bold(), msg);
}

/// Print rows as a table, or the serialized rows for JSON/YAML.
pub fn print_list<T: Tabled + Serialize>(items: &[T], format: OutputFormat) {
    if !format.is_table() {
        print_item(&items, format);
        return;
    }
    if items.is_empty() {
        println!("{}", "No results found.".dimmed());
        return;
    }
    let table = Table::new(items)
        .with(Style::rounded())
        .with(Modify::new(Columns::first()).with(Alignment::left()))
        .to_string();
    println!("{}", table);
}

/// Print a single item as JSON (also for table output) or YAML.
pub fn print_item<T: Serialize>(item: &T, format: OutputFormat) {
    let rendered = match format {
        OutputFormat::Table | OutputFormat::Json => {
            serde_json::to_string_pretty(item).map(|json| json + "\n").map_err(|e| e.to_string())
        }
        OutputFormat::Yaml => serde_yaml::to_string(item).map_err(|e| e.to_string()),
    };
    match rendered {
        Ok(text) => print!("{}", text),
        Err(e) => print_error(&format!("Failed to render output: {}", e)),
    }
}

pub fn print_detail(key: &str, value: &str) {
    println!("  {}: {}", key.cyan(), value);
}

pub fn print_header(title: &str) {
    println!();
    println!("{}", title.bold().underline());
    println!();
}

fn print_details(title: &str, details: &[(&str, String)]) {
    print_header(title);
    for (key, value) in details {
        print_detail(key, value);
    }
}

/// Shorten a UUID to its first block for table columns.
pub fn short_id(id: &Uuid) -> String {
    let id = id.to_string();
    id.split('-').next().unwrap_or(&id).to_string()
}

/// `1250.50 EUR`
pub fn format_amount(cents: i64, currency: &str) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    format!("{}{}.{:02} {}", sign, cents / 100, cents % 100, currency)
}

/// "won", "lost" or "open".
pub fn closing_state(won: bool, lost: bool) -> &'static str {
    if won {
        "won"
    } else if lost {
        "lost"
    } else {
        "open"
    }
}

// ── Stages ──────────────────────────────────────────────────────────────────

/// Resolves stage ids to names for display.
pub struct StageNames<'a> {
    stages: &'a [StageInfo],
}

impl<'a> StageNames<'a> {
    pub fn new(stages: &'a [StageInfo]) -> Self {
        Self { stages }
    }

    pub fn label(&self, id: &Uuid) -> String {
        self.stages
            .iter()
            .find(|s| &s.id == id)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| short_id(id))
    }

    fn optional(&self, id: Option<&Uuid>) -> String {
        id.map(|id| self.label(id)).unwrap_or_else(|| "-".into())
    }
}

#[derive(Debug, Serialize, Tabled)]
pub struct StageRow {
    #[tabled(rename = "#")]
    order: i32,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Win %")]
    probability: i32,
    #[tabled(rename = "Closes")]
    closes: String,
    #[tabled(rename = "ID")]
    id: String,
}

impl From<&StageInfo> for StageRow {
    fn from(s: &StageInfo) -> Self {
        let closes = match closing_state(s.is_closed_won, s.is_closed_lost) {
            "open" => String::new(),
            state => state.to_string(),
        };
        Self {
            order: s.order_index,
            name: s.name.clone(),
            probability: s.win_probability,
            closes,
            id: s.id.to_string(),
        }
    }
}

pub fn print_stages(stages: &[StageInfo], format: OutputFormat) {
    if format.is_table() {
        let rows: Vec<StageRow> = stages.iter().map(StageRow::from).collect();
        print_list(&rows, format);
    } else {
        print_item(&stages, format);
    }
}

// ── Leads and deals ─────────────────────────────────────────────────────────

fn lead_details(lead: &LeadInfo, stages: &StageNames<'_>) -> Vec<(&'static str, String)> {
    let mut details = vec![
        ("ID", lead.id.to_string()),
        ("Qualification", lead.qualification.clone()),
        ("Stage", stages.optional(lead.stage_id.as_ref())),
        ("Converted", if lead.is_converted { "yes" } else { "no" }.to_string()),
    ];
    for (key, label) in [("email", "Email"), ("company", "Company"), ("phone", "Phone")] {
        if let Some(value) = lead.contact.get(key).and_then(|v| v.as_str()) {
            details.push((label, value.to_string()));
        }
    }
    details.push(("Created", lead.created_at.clone()));
    details
}

pub fn print_lead(lead: &LeadInfo, stages: &[StageInfo], format: OutputFormat) {
    if format.is_table() {
        let details = lead_details(lead, &StageNames::new(stages));
        print_details(&format!("Lead: {}", lead.name), &details);
    } else {
        print_item(lead, format);
    }
}

fn deal_details(deal: &DealInfo, stages: &StageNames<'_>) -> Vec<(&'static str, String)> {
    let mut details = vec![
        ("ID", deal.id.to_string()),
        ("Value", format_amount(deal.value_cents, &deal.currency)),
        ("Stage", stages.optional(deal.stage_id.as_ref())),
        ("Probability", format!("{}%", deal.probability)),
        ("State", closing_state(deal.is_won, deal.is_lost).to_string()),
    ];
    if let Some(customer) = deal.customer_id {
        details.push(("Customer", customer.to_string()));
    }
    if let Some(closed) = &deal.closed_at {
        details.push(("Closed", closed.clone()));
    }
    details
}

pub fn print_deal(deal: &DealInfo, stages: &[StageInfo], format: OutputFormat) {
    if format.is_table() {
        let details = deal_details(deal, &StageNames::new(stages));
        print_details(&format!("Deal: {}", deal.name), &details);
    } else {
        print_item(deal, format);
    }
}

// ── Stage moves ─────────────────────────────────────────────────────────────

/// Print the result of a stage move, including conversion effects.
pub fn print_transition(subject: &str, outcome: &TransitionInfo, format: OutputFormat) {
    if !format.is_table() {
        print_item(outcome, format);
        return;
    }
    if outcome.changed {
        print_success(&format!("{} moved to '{}'", subject, outcome.to_stage.name));
    } else {
        print_info(&format!("{} is already in '{}'", subject, outcome.to_stage.name));
    }
    for effect in &outcome.conversion {
        print_detail(
            &format!("customer {}", short_id(&effect.customer_id)),
            &effect.effect.replace('_', " "),
        );
    }
}

#[derive(Debug, Serialize, Tabled)]
pub struct HistoryRow {
    #[tabled(rename = "When")]
    changed_at: String,
    #[tabled(rename = "From")]
    from: String,
    #[tabled(rename = "To")]
    to: String,
    #[tabled(rename = "Note")]
    note: String,
}

fn history_rows(entries: &[HistoryEntry], stages: &StageNames<'_>) -> Vec<HistoryRow> {
    entries
        .iter()
        .map(|e| HistoryRow {
            changed_at: e.changed_at.clone(),
            from: stages.optional(e.from_stage_id.as_ref()),
            to: stages.label(&e.to_stage_id),
            note: e.note.clone().unwrap_or_default(),
        })
        .collect()
}

pub fn print_history(entries: &[HistoryEntry], stages: &[StageInfo], format: OutputFormat) {
    if format.is_table() {
        print_list(&history_rows(entries, &StageNames::new(stages)), format);
    } else {
        print_item(&entries, format);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(name: &str, order: i32, won: bool, lost: bool) -> StageInfo {
        StageInfo {
            id: Uuid::new_v4(),
            name: name.to_string(),
            order_index: order,
            win_probability: if won { 100 } else { 10 * order },
            is_closed_won: won,
            is_closed_lost: lost,
        }
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(125_050, "EUR"), "1250.50 EUR");
        assert_eq!(format_amount(7, "USD"), "0.07 USD");
        assert_eq!(format_amount(-150, "USD"), "-1.50 USD");
    }

    #[test]
    fn test_stage_rows_mark_closing_stages() {
        let stages = [
            stage("New", 1, false, false),
            stage("Closed Won", 5, true, false),
            stage("Closed Lost", 6, false, true),
        ];
        let closes: Vec<String> = stages.iter().map(|s| StageRow::from(s).closes).collect();
        assert_eq!(closes, ["", "won", "lost"]);
    }

    #[test]
    fn test_history_rows_use_stage_names() {
        let stages = [stage("New", 1, false, false), stage("Qualified", 2, false, false)];
        let unknown = Uuid::new_v4();
        let entries = [
            HistoryEntry {
                from_stage_id: None,
                to_stage_id: stages[0].id,
                changed_by: None,
                note: None,
                changed_at: "2024-01-01T00:00:00Z".into(),
            },
            HistoryEntry {
                from_stage_id: Some(stages[0].id),
                to_stage_id: unknown,
                changed_by: None,
                note: Some("call booked".into()),
                changed_at: "2024-01-02T00:00:00Z".into(),
            },
        ];

        let rows = history_rows(&entries, &StageNames::new(&stages));
        assert_eq!(rows[0].from, "-");
        assert_eq!(rows[0].to, "New");
        assert_eq!(rows[1].from, "New");
        assert_eq!(rows[1].to, short_id(&unknown));
        assert_eq!(rows[1].note, "call booked");
    }

    #[test]
    fn test_lead_and_deal_details() {
        let stages = [stage("Closed Won", 5, true, false)];
        let names = StageNames::new(&stages);
        let lead = LeadInfo {
            id: Uuid::new_v4(),
            name: "Ada".into(),
            qualification: "hot".into(),
            stage_id: Some(stages[0].id),
            is_converted: true,
            contact: serde_json::json!({ "email": "ada@example.com" }),
            created_at: "2024-01-01T00:00:00Z".into(),
        };
        let details = lead_details(&lead, &names);
        assert!(details.contains(&("Stage", "Closed Won".to_string())));
        assert!(details.contains(&("Converted", "yes".to_string())));
        assert!(details.contains(&("Email", "ada@example.com".to_string())));
        assert!(!details.iter().any(|(k, _)| *k == "Phone"));

        let deal = DealInfo {
            id: Uuid::new_v4(),
            name: "Renewal".into(),
            value_cents: 990_000,
            currency: "USD".into(),
            stage_id: None,
            customer_id: None,
            probability: 40,
            is_won: false,
            is_lost: false,
            closed_at: None,
        };
        let details = deal_details(&deal, &names);
        assert!(details.contains(&("Value", "9900.00 USD".to_string())));
        assert!(details.contains(&("Stage", "-".to_string())));
        assert!(details.contains(&("State", "open".to_string())));
        assert!(!details.iter().any(|(k, _)| *k == "Customer"));
    }
}
