// Colored terminal output for analysis reports.
//
// Handles all terminal-specific formatting. main.rs delegates here after a
// run has produced a `Report`.

use colored::Colorize;

use super::json::Report;
use crate::config::Config;
use crate::pipeline::decision::Decision;
use crate::scoring::ReasonCategory;

/// Print the whole report: summary, riskiest posts, accounts, bursts.
pub fn display_report(report: &Report, top: usize) {
    display_summary(report);
    display_top_posts(report, top);
    display_accounts(report, top);
    display_coordination_events(report);
}

fn display_summary(report: &Report) {
    let s = &report.summary;
    println!(
        "\n{}",
        format!("=== Risk Report ({} posts) ===", s.total_posts).bold()
    );
    println!();
    println!(
        "  {} auto-action  {} queue-review  {} no-action",
        s.auto_actions.to_string().red().bold(),
        s.queue_review.to_string().yellow(),
        s.no_action.to_string().green(),
    );
    println!(
        "  Duplicates: {}  |  Coordinated: {} posts in {} bursts  |  Suspicious accounts: {}",
        s.duplicate_posts, s.coordinated_posts, s.coordination_events, s.suspicious_accounts
    );
    if s.embedding_failures > 0 {
        println!(
            "  {} {} posts could not be embedded (scored with neutral similarity)",
            "!".yellow(),
            s.embedding_failures
        );
    }

    if let Some(risk) = &report.analysis.risk {
        println!(
            "  Risk: min {:.1}  p50 {:.1}  p90 {:.1}  max {:.1}",
            risk.min, risk.p50, risk.p90, risk.max
        );
    }

    let reasons: Vec<String> = report
        .analysis
        .reasons
        .iter()
        .filter(|r| r.share > 0.0)
        .map(|r| format!("{} {:.0}%", r.reason_category, r.share * 100.0))
        .collect();
    if !reasons.is_empty() {
        println!("  Reasons: {}", reasons.join(", "));
    }
}

fn display_top_posts(report: &Report, top: usize) {
    if report.posts.is_empty() {
        println!("\nNo posts in batch.");
        return;
    }

    let mut ranked: Vec<_> = report.posts.iter().collect();
    ranked.sort_by(|a, b| b.scored.risk_score.total_cmp(&a.scored.risk_score));

    println!("\n{}", format!("=== Top {} posts by risk ===", top.min(ranked.len())).bold());
    println!();
    println!(
        "  {:>4}  {:<14} {:>6}  {:>5}  {:<13}  {:<20}",
        "Rank".dimmed(),
        "Post".dimmed(),
        "Risk".dimmed(),
        "Conf".dimmed(),
        "Decision".dimmed(),
        "Reason".dimmed(),
    );
    println!("  {}", "-".repeat(72).dimmed());

    for (i, p) in ranked.iter().take(top).enumerate() {
        let s = &p.scored;
        println!(
            "  {:>4}. {:<14} {:>6.1}  {:>5.2}  {:<13}  {}",
            i + 1,
            super::truncate_chars(s.post.post_id.as_str(), 14),
            s.risk_score,
            s.confidence,
            colorize_decision(p.decision),
            colorize_reason(s.reason_category),
        );
        println!(
            "        @{} {}",
            s.post.account_id,
            super::truncate_chars(&s.post.text, 100).dimmed()
        );
        for line in &s.explanations {
            println!("        - {line}");
        }
    }
}

fn display_accounts(report: &Report, top: usize) {
    if report.accounts.is_empty() {
        return;
    }

    println!("\n{}", "=== Accounts ===".bold());
    println!();
    for row in report.accounts.iter().take(top) {
        let heuristic = report
            .account_heuristics
            .iter()
            .find(|h| h.account_id == row.account_id);
        let flags = heuristic
            .map(|h| {
                h.flags
                    .iter()
                    .map(|f| f.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        let marker = match heuristic {
            Some(h) if h.suspicious => "!!".red().bold(),
            _ => "  ".normal(),
        };
        let trend = row
            .risk_trend
            .map(|t| format!("  trend {t:.1}"))
            .unwrap_or_default();

        println!(
            "  {} @{:<24} max {:>5.1}  avg {:>5.1}  posts {:>3}{}  {}",
            marker,
            row.account_id,
            row.max_risk,
            row.avg_risk,
            row.post_count,
            trend,
            flags.dimmed()
        );
    }
}

fn display_coordination_events(report: &Report) {
    if report.coordination_events.is_empty() {
        return;
    }

    println!(
        "\n{}",
        format!(
            "=== Coordination bursts ({}) ===",
            report.coordination_events.len()
        )
        .bold()
    );
    println!();
    for event in &report.coordination_events {
        println!(
            "  {:<5} {} - {}  {} posts",
            event.narrative.to_string().cyan(),
            event.window_start.format("%Y-%m-%d %H:%M"),
            event.window_end.format("%H:%M"),
            event.count,
        );
    }
    println!();
}

/// Print the effective configuration.
pub fn display_config(config: &Config) {
    let p = &config.pipeline;
    println!("\n{}", "=== Configuration ===".bold());
    println!("  Embedder: {:?}", config.embedder_backend);
    println!("  Model dir: {}", config.model_dir.display());
    println!(
        "  Similarity threshold: {}  |  Window: {} min  |  Min burst posts: {}",
        p.similarity_threshold, p.window_minutes, p.min_burst_posts
    );
    println!(
        "  Min cluster size: {}  |  Top-k: {}  |  EWMA alpha: {}",
        p.min_cluster_size,
        p.top_k,
        p.ewma_alpha
            .map(|a| a.to_string())
            .unwrap_or_else(|| "off".to_string())
    );
    println!(
        "  Weights: sim_max {}  sim_mean {}  cluster_size_norm {}  coordination_score {}  account_age_norm {}",
        p.weights.sim_max,
        p.weights.sim_mean,
        p.weights.cluster_size_norm,
        p.weights.coordination_score,
        p.weights.account_age_norm
    );
    println!(
        "  Max batch size: {}  |  Deadline: {}",
        p.max_batch_size,
        p.deadline_secs
            .map(|s| format!("{s}s"))
            .unwrap_or_else(|| "none".to_string())
    );
}

fn colorize_decision(decision: Decision) -> colored::ColoredString {
    match decision {
        Decision::AutoAction => decision.as_str().red().bold(),
        Decision::QueueReview => decision.as_str().yellow(),
        Decision::NoAction => decision.as_str().green(),
    }
}

fn colorize_reason(reason: ReasonCategory) -> colored::ColoredString {
    match reason {
        ReasonCategory::Coordination => reason.interpretation().red(),
        ReasonCategory::CopyPaste => reason.interpretation().bright_red(),
        ReasonCategory::NewAccount => reason.interpretation().yellow(),
        ReasonCategory::Baseline => reason.interpretation().dimmed(),
    }
}
