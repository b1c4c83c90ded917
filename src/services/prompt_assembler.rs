//! Prompt context assembly.
//!
//! Identical inputs must produce identical prompts: every section renders
//! in a fixed order, knowledge arrives pre-ordered and capped, and the
//! anti-lookahead contract is a program constant that never passes through
//! the mutable knowledge store.

use std::fmt::Write as _;

use crate::domain::models::{Agent, BacktestReport, Iteration, KnowledgeEntry};

/// Knowledge entries admitted into one prompt.
pub const KNOWLEDGE_CAP: i64 = 40;

/// The sequential-processing contract carried verbatim in every scanner
/// and executor prompt. Invariant text; do not fold into knowledge.
pub const ANTI_LOOKAHEAD_CONTRACT: &str = "\
## Sequential data contract (MANDATORY)

Your code must treat market bars strictly sequentially. When deciding
whether to emit a signal on a bar, you may only use that bar and bars
with earlier timestamps. No aggregate, indicator, ranking or filter may
be computed over bars whose timestamp exceeds the bar on which the
signal is emitted.

FORBIDDEN (lookahead - inflates backtest results):

    # computes the day's high using bars from the whole day, then
    # emits a morning signal relative to it
    day_high = max(bar['high'] for bar in all_bars_for_day)
    if bar['close'] > day_high * 0.99:
        emit_signal(bar)

ALLOWED (sequential):

    running_high = 0.0
    for bar in bars_in_timestamp_order:
        if bar['close'] > running_high * 0.99 and running_high > 0.0:
            emit_signal(bar)
        running_high = max(running_high, bar['high'])";

/// Description of the read-only data interface and the mandatory signal
/// shape, rendered into every scanner prompt.
const DATA_SCHEMA: &str = "\
## Data access

The environment variable QUANTLAB_MARKET_DB holds the path to a
read-only SQLite database with these views:

- bars(ticker, timestamp, timeframe, open, high, low, close, volume,
  time_of_day) -- timeframe is one of '1min', '5min', '1day';
  time_of_day is a wall-clock label on intraday bars.
- daily_metrics(ticker, date, change_pct, rsi_14, sma_20, sma_50,
  sma_200, volume_ratio, consecutive_up_days, consecutive_down_days,
  change_5d_pct, change_20d_pct)
- universe_members(universe, ticker)

Writes are rejected; open the database read-only.

## Output requirements

Print to stdout a single JSON array of signal objects. Each signal MUST
carry \"ticker\" and \"timestamp\" (RFC3339) or \"date\" (YYYY-MM-DD).
Optional: \"side\" (\"long\"/\"short\", default long) and any extra keys
you find useful; they are preserved.";

const EXECUTOR_CONTRACT: &str = "\
## Executor contract

Your program receives the signal list as a JSON array on stdin and must
print to stdout a JSON array of trade objects. Each trade MUST carry
\"ticker\" and \"entry_time\"; include \"entry_price\", \"exit_time\",
\"exit_price\" so profit is computed from your fills. Position sizing is
uniform: $10,000 notional per trade.";

/// Inputs for one iteration's prompts.
pub struct PromptContext<'a> {
    pub agent: &'a Agent,
    pub previous: Option<&'a Iteration>,
    pub knowledge: &'a [KnowledgeEntry],
    pub manual_guidance: Option<&'a str>,
    /// Interpreter the sandbox will invoke, named so generated code
    /// matches the runtime.
    pub interpreter: &'a str,
}

pub struct PromptAssembler;

impl PromptAssembler {
    /// System + user prompt for scanner generation.
    pub fn scanner_prompts(ctx: &PromptContext<'_>) -> (String, String) {
        let system = format!(
            "You are the scanner author for an autonomous trading-strategy \
             laboratory. You write complete, self-contained {} programs that \
             scan historical market data and emit candidate trade signals as \
             JSON. Respond with a short rationale followed by exactly one \
             fenced code block.",
            ctx.interpreter
        );

        let mut user = String::new();
        render_charter(&mut user, ctx.agent);
        render_knowledge(&mut user, ctx.knowledge);
        render_previous(&mut user, ctx.previous);
        render_guidance(&mut user, ctx.manual_guidance);
        user.push_str(DATA_SCHEMA);
        user.push_str("\n\n");
        user.push_str(ANTI_LOOKAHEAD_CONTRACT);

        (system, user)
    }

    /// System + user prompt for executor generation. Requires a previous
    /// iteration; its template comparison is rendered verbatim.
    pub fn executor_prompts(ctx: &PromptContext<'_>) -> (String, String) {
        let system = format!(
            "You are the executor author for an autonomous trading-strategy \
             laboratory. You write complete, self-contained {} programs that \
             turn candidate signals into simulated trades with explicit exit \
             management. Respond with a short rationale followed by exactly \
             one fenced code block.",
            ctx.interpreter
        );

        let mut user = String::new();
        render_charter(&mut user, ctx.agent);
        render_knowledge(&mut user, ctx.knowledge);
        render_previous(&mut user, ctx.previous);
        render_guidance(&mut user, ctx.manual_guidance);
        user.push_str(EXECUTOR_CONTRACT);
        user.push_str("\n\n");
        user.push_str(ANTI_LOOKAHEAD_CONTRACT);

        (system, user)
    }

    /// System + user prompt for the structured expert analysis.
    pub fn analysis_prompts(
        ctx: &PromptContext<'_>,
        iteration: &Iteration,
        report: &BacktestReport,
    ) -> (String, String) {
        let system = "You are a veteran trading-strategy reviewer. Respond with \
                      exactly one JSON object matching the requested schema, \
                      fenced or bare, and nothing else."
            .to_string();

        let mut user = String::new();
        render_charter(&mut user, ctx.agent);
        render_knowledge(&mut user, ctx.knowledge);

        let _ = writeln!(user, "## Backtest under review\n");
        let _ = writeln!(user, "Iteration: {}", iteration.iteration_number);
        let _ = writeln!(user, "Signals found: {}", iteration.signals_found);
        if iteration.signals_found == 0 {
            let _ = writeln!(
                user,
                "NOTE: the scanner emitted ZERO signals. Diagnose why the \
                 filter came up empty and what to loosen."
            );
        }
        user.push('\n');
        render_template_table(&mut user, report);

        user.push_str(
            "\n## Required response schema\n\n\
             {\n  \"overall_assessment\": text,\n  \"pattern_quality\": {\"signal_clarity\": text, \"market_conditions\": text, \"edge_strength\": text},\n  \"execution_analysis\": {\n    \"template_comparison\": text,\n    \"exit_timing_issues\": [text],\n    \"stop_loss_effectiveness\": text,\n    \"take_profit_effectiveness\": text,\n    \"suggested_improvements\": [text]\n  },\n  \"recommendations\": {\"scanning\": [text], \"execution\": [text], \"risk_management\": [text]}\n}\n",
        );

        (system, user)
    }
}

fn render_charter(out: &mut String, agent: &Agent) {
    let _ = writeln!(out, "## Agent charter\n");
    let _ = writeln!(out, "Instructions: {}", agent.instructions);
    let p = &agent.personality;
    let _ = writeln!(
        out,
        "Personality: risk={}, style={}, patterns=[{}], conditions=[{}]",
        p.risk_tolerance.as_str(),
        p.trading_style.as_str(),
        p.pattern_focus.join(", "),
        p.market_conditions.join(", "),
    );
    let _ = writeln!(
        out,
        "Discovery mode: {}\n",
        if agent.discovery_mode { "on (template-library executors only)" } else { "off" }
    );
}

fn render_knowledge(out: &mut String, knowledge: &[KnowledgeEntry]) {
    if knowledge.is_empty() {
        return;
    }
    let _ = writeln!(out, "## Accumulated knowledge\n");
    for entry in knowledge.iter().take(KNOWLEDGE_CAP as usize) {
        let tag = entry
            .pattern_tag
            .as_deref()
            .map(|t| format!(" [{t}]"))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "- [{}]{} (confidence {:.2}, validated {}x): {}",
            entry.kind.as_str(),
            tag,
            entry.confidence,
            entry.times_validated,
            entry.insight
        );
    }
    out.push('\n');
}

fn render_previous(out: &mut String, previous: Option<&Iteration>) {
    let Some(prev) = previous else {
        return;
    };
    let _ = writeln!(out, "## Previous iteration ({})\n", prev.iteration_number);
    let _ = writeln!(out, "Signals found: {}", prev.signals_found);
    if let Some(winner) = &prev.winning_template {
        let _ = writeln!(out, "Winning template: {winner}");
    }
    if let Some(report) = &prev.backtest_results {
        render_template_table(out, report);
    }
    if let Some(analysis) = &prev.expert_analysis {
        if !analysis.overall_assessment.is_empty() {
            let _ = writeln!(out, "Expert assessment: {}", analysis.overall_assessment);
        }
        if !analysis.execution_analysis.template_comparison.is_empty() {
            let _ = writeln!(
                out,
                "Template notes: {}",
                analysis.execution_analysis.template_comparison
            );
        }
    }
    if !prev.refinements_suggested.is_empty() {
        let _ = writeln!(out, "Suggested refinements:");
        for refinement in &prev.refinements_suggested {
            let _ = writeln!(out, "- {refinement}");
        }
    }
    if let Some(source) = &prev.scan_source {
        let _ = writeln!(out, "\nPrevious scanner source:\n```\n{source}\n```");
    }
    if let Some(source) = &prev.executor_source {
        let _ = writeln!(out, "\nPrevious executor source:\n```\n{source}\n```");
    }
    out.push('\n');
}

fn render_guidance(out: &mut String, guidance: Option<&str>) {
    let Some(guidance) = guidance else {
        return;
    };
    let _ = writeln!(out, "## MANUAL GUIDANCE FROM OPERATOR\n");
    let _ = writeln!(
        out,
        "PRIORITISE the following over any accumulated knowledge above:\n"
    );
    let _ = writeln!(out, "{guidance}\n");
}

/// Renders the per-template comparison with literal template tags.
fn render_template_table(out: &mut String, report: &BacktestReport) {
    let _ = writeln!(
        out,
        "Template comparison ({} signals evaluated):",
        report.signals_evaluated
    );
    let _ = writeln!(
        out,
        "| template | trades | win rate | total $ | profit factor | sharpe |"
    );
    let _ = writeln!(out, "|---|---|---|---|---|---|");
    for m in &report.per_template {
        let pf = if m.profit_factor.is_finite() {
            format!("{:.2}", m.profit_factor)
        } else {
            "inf".to_string()
        };
        let _ = writeln!(
            out,
            "| {} | {} | {:.1}% | {:.2} | {} | {:.2} |",
            m.template,
            m.total_trades,
            m.win_rate * 100.0,
            m.total_return,
            pf,
            m.sharpe_ratio,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        Agent, BacktestReport, Iteration, KnowledgeEntry, KnowledgeKind, Personality,
        TemplateMetrics,
    };
    use uuid::Uuid;

    fn agent() -> Agent {
        Agent::new("a", "Find VWAP bounces", Personality::default())
    }

    fn ctx<'a>(
        agent: &'a Agent,
        previous: Option<&'a Iteration>,
        knowledge: &'a [KnowledgeEntry],
        guidance: Option<&'a str>,
    ) -> PromptContext<'a> {
        PromptContext {
            agent,
            previous,
            knowledge,
            manual_guidance: guidance,
            interpreter: "python3",
        }
    }

    fn report() -> BacktestReport {
        BacktestReport::new(
            3,
            vec![
                TemplateMetrics::from_trades("atr_adaptive", vec![]),
                TemplateMetrics::from_trades("conservative", vec![]),
            ],
        )
    }

    #[test]
    fn test_identical_inputs_identical_prompts() {
        let agent = agent();
        let knowledge = vec![KnowledgeEntry::new(
            agent.id,
            KnowledgeKind::Insight,
            "x",
            0.6,
            1,
        )];
        let a = PromptAssembler::scanner_prompts(&ctx(&agent, None, &knowledge, None));
        let b = PromptAssembler::scanner_prompts(&ctx(&agent, None, &knowledge, None));
        assert_eq!(a, b);
    }

    #[test]
    fn test_anti_lookahead_in_both_code_prompts() {
        let agent = agent();
        let (_, scanner) = PromptAssembler::scanner_prompts(&ctx(&agent, None, &[], None));
        let (_, executor) = PromptAssembler::executor_prompts(&ctx(&agent, None, &[], None));
        assert!(scanner.contains("Sequential data contract (MANDATORY)"));
        assert!(executor.contains("Sequential data contract (MANDATORY)"));
        assert!(scanner.contains("FORBIDDEN"));
    }

    #[test]
    fn test_guidance_is_demarcated_and_prioritised() {
        let agent = agent();
        let (_, user) =
            PromptAssembler::scanner_prompts(&ctx(&agent, None, &[], Some("only scan tech")));
        assert!(user.contains("MANUAL GUIDANCE FROM OPERATOR"));
        assert!(user.contains("PRIORITISE"));
        assert!(user.contains("only scan tech"));
    }

    #[test]
    fn test_executor_prompt_carries_previous_table_and_winner() {
        let agent = agent();
        let mut prev = Iteration::open(agent.id, 1);
        prev.signals_found = 3;
        prev.backtest_results = Some(report());
        prev.winning_template = Some("atr_adaptive".to_string());

        let (_, user) = PromptAssembler::executor_prompts(&ctx(&agent, Some(&prev), &[], None));
        assert!(user.contains("Winning template: atr_adaptive"));
        assert!(user.contains("| conservative |"));
        assert!(user.contains("Template comparison"));
    }

    #[test]
    fn test_knowledge_capped_at_forty() {
        let agent = agent();
        let knowledge: Vec<KnowledgeEntry> = (0..60)
            .map(|i| {
                KnowledgeEntry::new(agent.id, KnowledgeKind::Insight, format!("lesson {i}"), 0.5, 1)
            })
            .collect();
        let (_, user) = PromptAssembler::scanner_prompts(&ctx(&agent, None, &knowledge, None));
        assert!(user.contains("lesson 39"));
        assert!(!user.contains("lesson 40"));
    }

    #[test]
    fn test_zero_signal_note_in_analysis_prompt() {
        let agent = agent();
        let iteration = Iteration::open(agent.id, 2);
        let (_, user) =
            PromptAssembler::analysis_prompts(&ctx(&agent, None, &[], None), &iteration, &report());
        assert!(user.contains("ZERO signals"));
        assert!(user.contains("Required response schema"));
    }
}
