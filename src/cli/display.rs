//! Table and detail rendering for the CLI.

use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Table};
use console::style;

use crate::domain::models::{ActivityEvent, Agent, AgentStatus, Iteration, KnowledgeEntry, StrategyVersion};

pub fn agents_table(agents: &[Agent]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["#", "id", "name", "status", "style", "risk", "failures"]);
    for agent in agents {
        table.add_row(vec![
            Cell::new(agent.display_seq),
            Cell::new(short_id(&agent.id.to_string())),
            Cell::new(&agent.name),
            Cell::new(status_label(agent.status)),
            Cell::new(agent.personality.trading_style.as_str()),
            Cell::new(agent.personality.risk_tolerance.as_str()),
            Cell::new(agent.consecutive_failures),
        ]);
    }
    table
}

pub fn iterations_table(iterations: &[Iteration]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec![
        "#", "id", "status", "signals", "winner", "win rate", "sharpe", "total $",
    ]);
    for it in iterations {
        table.add_row(vec![
            Cell::new(it.iteration_number),
            Cell::new(short_id(&it.id.to_string())),
            Cell::new(iteration_status_label(it)),
            Cell::new(it.signals_found),
            Cell::new(it.winning_template.as_deref().unwrap_or("-")),
            Cell::new(format_opt_pct(it.win_rate)),
            Cell::new(format_opt(it.sharpe_ratio)),
            Cell::new(format_opt(it.total_return)),
        ]);
    }
    table
}

pub fn knowledge_table(entries: &[KnowledgeEntry]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["kind", "tag", "confidence", "validated", "from", "insight"]);
    for entry in entries {
        table.add_row(vec![
            Cell::new(entry.kind.as_str()),
            Cell::new(entry.pattern_tag.as_deref().unwrap_or("-")),
            Cell::new(format!("{:.2}", entry.confidence)),
            Cell::new(entry.times_validated),
            Cell::new(entry.learned_from_iteration),
            Cell::new(truncate(&entry.insight, 72)),
        ]);
    }
    table
}

pub fn versions_table(versions: &[StrategyVersion]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["version", "current", "winner", "win rate", "sharpe", "total $", "summary"]);
    for version in versions {
        table.add_row(vec![
            Cell::new(&version.version),
            Cell::new(if version.is_current { "*" } else { "" }),
            Cell::new(&version.winning_template),
            Cell::new(format!("{:.1}%", version.win_rate * 100.0)),
            Cell::new(format!("{:.2}", version.sharpe_ratio)),
            Cell::new(format!("{:.2}", version.total_return)),
            Cell::new(truncate(&version.change_summary, 48)),
        ]);
    }
    table
}

pub fn events_table(events: &[ActivityEvent]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["time", "event", "payload"]);
    for event in events {
        table.add_row(vec![
            Cell::new(event.created_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(&event.event_type),
            Cell::new(truncate(&event.payload.to_string(), 64)),
        ]);
    }
    table
}

pub fn iteration_detail(it: &Iteration) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{} iteration {} ({})\n",
        style("Iteration").bold(),
        it.iteration_number,
        iteration_status_label(it)
    ));
    out.push_str(&format!("id:      {}\n", it.id));
    out.push_str(&format!("agent:   {}\n", it.agent_id));
    out.push_str(&format!("signals: {}\n", it.signals_found));
    if let Some(winner) = &it.winning_template {
        out.push_str(&format!("winner:  {winner}\n"));
    }
    if let Some(report) = &it.backtest_results {
        out.push_str(&format!("\nPer-template results ({} signals):\n", report.signals_evaluated));
        for m in &report.per_template {
            out.push_str(&format!(
                "  {:<14} trades={:<4} win={:>5.1}% total=${:<10.2} sharpe={:.2}\n",
                m.template,
                m.total_trades,
                m.win_rate * 100.0,
                m.total_return,
                m.sharpe_ratio
            ));
        }
    }
    if !it.refinements_suggested.is_empty() {
        out.push_str("\nRefinements suggested:\n");
        for refinement in &it.refinements_suggested {
            out.push_str(&format!("  - {refinement}\n"));
        }
    }
    if let Some(source) = &it.scan_source {
        out.push_str(&format!("\nScanner source:\n{source}\n"));
    }
    if let Some(source) = &it.executor_source {
        out.push_str(&format!("\nExecutor source:\n{source}\n"));
    } else {
        out.push_str("\nExecutor: template library\n");
    }
    if let Some(prompt) = &it.scan_prompt {
        out.push_str(&format!("\nScanner prompt ({} chars)\n", prompt.len()));
    }
    if let Some(prompt) = &it.execution_prompt {
        out.push_str(&format!("Executor prompt ({} chars)\n", prompt.len()));
    }
    out
}

fn status_label(status: AgentStatus) -> String {
    let text = status.as_str();
    match status {
        AgentStatus::Learning => style(text).cyan().to_string(),
        AgentStatus::PaperTrading => style(text).green().to_string(),
        AgentStatus::LiveTrading => style(text).bold().green().to_string(),
        AgentStatus::Paused => style(text).yellow().to_string(),
    }
}

fn iteration_status_label(it: &Iteration) -> String {
    match it.failure_reason {
        Some(reason) => format!("{} [{}]", it.status.as_str(), reason.as_str()),
        None => it.status.as_str().to_string(),
    }
}

fn format_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"))
}

fn format_opt_pct(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.1}%", v * 100.0))
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
        out.push('\u{2026}');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Personality;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        let long = "a".repeat(80);
        let cut = truncate(&long, 10);
        assert_eq!(cut.chars().count(), 10);
        assert!(cut.ends_with('\u{2026}'));
    }

    #[test]
    fn test_tables_render_without_panicking() {
        let agent = Agent::new("t", "swing trade", Personality::default());
        let _ = agents_table(&[agent.clone()]).to_string();

        let it = Iteration::open(agent.id, 1);
        let _ = iterations_table(&[it.clone()]).to_string();
        let _ = iteration_detail(&it);
    }
}
