//! Output formatting for `committee` commands
//!
//! Supports two modes: human-readable tables (default) and JSON.

use clap::ValueEnum;
use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL};
use committee_core::{CommitteeDecision, Exclusion, ExclusionReason};
use committee_workflow::ExecutionPlan;
use serde::Serialize;

/// Output mode for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

fn table<I, T>(header: I) -> Table
where
    I: IntoIterator<Item = T>,
    T: Into<Cell>,
{
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.into_iter().map(Into::into).collect::<Vec<Cell>>());
    table
}

fn print_json<T: Serialize>(item: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(item)?);
    Ok(())
}

fn describe(reason: &ExclusionReason) -> String {
    match reason {
        ExclusionReason::FilteredOut => "filtered out by focus".to_string(),
        ExclusionReason::Disabled => "disabled".to_string(),
        ExclusionReason::DependencyFailed(dep) => format!("dependency '{dep}' failed"),
        ExclusionReason::Failed(message) => format!("failed: {message}"),
        ExclusionReason::TimedOut => "timed out".to_string(),
        ExclusionReason::DeadlineExceeded => "run deadline exceeded".to_string(),
        ExclusionReason::Cancelled => "cancelled".to_string(),
    }
}

fn print_exclusions(excluded: &[Exclusion]) {
    if excluded.is_empty() {
        return;
    }
    let mut excluded_table = table(["Excluded", "Reason"]);
    for exclusion in excluded {
        excluded_table.add_row(vec![exclusion.worker.clone(), describe(&exclusion.reason)]);
    }
    println!("{excluded_table}");
}

/// Print the waves of an execution plan
pub fn print_plan(plan: &ExecutionPlan, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(plan);
    }

    let mut waves = table(["Wave", "Workers"]);
    for (index, wave) in plan.waves.iter().enumerate() {
        waves.add_row(vec![index.to_string(), wave.join(", ")]);
    }
    println!("{waves}");
    print_exclusions(&plan.skipped);
    Ok(())
}

/// Print a committee decision
pub fn print_decision(decision: &CommitteeDecision, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(decision);
    }

    let title = match &decision.company_name {
        Some(name) => format!("{} ({name})", decision.subject),
        None => decision.subject.clone(),
    };

    let mut summary = table(["Committee decision", title.as_str()]);
    summary
        .add_row(vec!["Recommendation".to_string(), decision.recommendation.to_string()])
        .add_row(vec![
            "Weighted score".to_string(),
            format!("{:.2} / 10", decision.weighted_score),
        ])
        .add_row(vec![
            "Consensus".to_string(),
            format!(
                "{:.1}%{}",
                decision.consensus_level,
                if decision.has_consensus() { "" } else { " (no consensus)" }
            ),
        ])
        .add_row(vec!["Sentiment".to_string(), decision.final_sentiment.to_string()]);
    if let Some(target) = decision.target_range {
        summary.add_row(vec![
            "Target range".to_string(),
            format!("{:.2} / {:.2} / {:.2}", target.low, target.mid, target.high),
        ]);
    }
    summary.add_row(vec![
        "Debate".to_string(),
        format!(
            "{} round(s), stopped: {:?}{}",
            decision.debate_summary.rounds_completed,
            decision.debate_summary.stop_reason,
            if decision.debate_summary.stalemate { " (stalemate)" } else { "" }
        ),
    ]);
    println!("{summary}");

    let mut opinions = table(["Worker", "Role", "Score", "Confidence", "Sentiment", "Summary"]);
    for opinion in decision.opinions.values() {
        opinions.add_row(vec![
            Cell::new(&opinion.worker),
            Cell::new(opinion.capability),
            Cell::new(format!("{:.1}", opinion.score)),
            Cell::new(format!("{:.0}%", opinion.confidence)),
            Cell::new(opinion.sentiment),
            Cell::new(&opinion.summary),
        ]);
    }
    println!("{opinions}");

    if !decision.debate.is_empty() {
        let mut rounds = table(["Round", "Challenges", "Revised", "Stale", "Moderator"]);
        for exchange in &decision.debate {
            let revised: Vec<&str> = exchange
                .responses
                .iter()
                .filter(|r| r.changed)
                .map(|r| r.worker.as_str())
                .collect();
            rounds.add_row(vec![
                exchange.round.to_string(),
                exchange
                    .challenges
                    .iter()
                    .map(|c| format!("{}: {}", c.target, c.argument))
                    .collect::<Vec<_>>()
                    .join("\n"),
                revised.join(", "),
                exchange.stale_workers().join(", "),
                exchange
                    .moderator_note
                    .as_ref()
                    .map(|n| n.summary.clone())
                    .unwrap_or_default(),
            ]);
        }
        println!("{rounds}");
    }

    let mut views = table(["Key strengths", "Key risks"]);
    let rows = decision.key_strengths.len().max(decision.key_risks.len());
    for i in 0..rows {
        views.add_row(vec![
            decision.key_strengths.get(i).cloned().unwrap_or_default(),
            decision.key_risks.get(i).cloned().unwrap_or_default(),
        ]);
    }
    if rows > 0 {
        println!("{views}");
    }

    for change in &decision.score_changes {
        println!(
            "score change: {} {:.1} -> {:.1} ({:+.1})",
            change.worker,
            change.initial,
            change.final_score,
            change.delta()
        );
    }
    for disagreement in &decision.disagreements {
        println!("disagreement: {disagreement}");
    }
    for concern in &decision.debate_summary.remaining_concerns {
        println!("open concern: {concern}");
    }

    print_exclusions(&decision.excluded);
    Ok(())
}
