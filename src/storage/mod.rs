//! Persistence layer.
//!
//! Writes the optimization artifacts to an output directory: the best
//! prompt (latest and versioned copies), the raw JSON report, a markdown
//! summary and the experiment summary. Writes are best-effort; a failed
//! file is logged and skipped.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::OptimizerSettings;
use crate::engine::optimizer::{OptimizationReport, StopReason};
use crate::engine::template::BASE_PROMPT;
use crate::types::{IterationResult, Metrics};

pub const BEST_PROMPT_FILE: &str = "BEST_PROMPT.txt";
pub const DATA_FILE: &str = "optimization_data.json";
pub const REPORT_FILE: &str = "OPTIMIZATION_REPORT.md";

// ---------------------------------------------------------------------------
// Report documents
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct Summary {
    pub baseline_accuracy: String,
    pub final_accuracy: String,
    pub accuracy_improvement: String,
    pub baseline_profit: String,
    pub final_profit: String,
    pub profit_improvement: String,
    pub total_iterations: usize,
    pub prompt_length_change: String,
    pub stop_reason: StopReason,
}

#[derive(Debug, Serialize)]
pub struct OptimizationData<'a> {
    pub timestamp: DateTime<Utc>,
    pub config: &'a OptimizerSettings,
    pub summary: Summary,
    pub iterations: &'a [IterationResult],
}

#[derive(Debug, Serialize)]
pub struct Improvement {
    pub accuracy: f64,
    pub profit: f64,
}

#[derive(Debug, Serialize)]
pub struct ExperimentSummary<'a> {
    pub name: &'a str,
    pub timestamp: DateTime<Utc>,
    pub config: &'a OptimizerSettings,
    pub iterations: &'a [IterationResult],
    pub final_accuracy: f64,
    pub final_profit: f64,
    pub improvement: Improvement,
}

fn baseline_metrics(report: &OptimizationReport) -> Metrics {
    report.baseline().map(IterationResult::metrics).unwrap_or_default()
}

fn prompt_length_change(report: &OptimizationReport) -> i64 {
    report.best_prompt.chars().count() as i64 - BASE_PROMPT.chars().count() as i64
}

pub fn summary(report: &OptimizationReport) -> Summary {
    let baseline = baseline_metrics(report);
    let best = report.best;
    Summary {
        baseline_accuracy: format!("{:.1}%", baseline.accuracy),
        final_accuracy: format!("{:.1}%", best.accuracy),
        accuracy_improvement: format!("{:+.1}%", best.accuracy - baseline.accuracy),
        baseline_profit: format!("{:.2}", baseline.profit),
        final_profit: format!("{:.2}", best.profit),
        profit_improvement: format!("{:+.2}", best.profit - baseline.profit),
        total_iterations: report.rounds(),
        prompt_length_change: format!("{:+} chars", prompt_length_change(report)),
        stop_reason: report.stop_reason,
    }
}

/// Experiment summary: last round against the first.
pub fn experiment_summary(report: &OptimizationReport) -> ExperimentSummary<'_> {
    let first = report.baseline().map(IterationResult::metrics).unwrap_or_default();
    let last = report.last().map(IterationResult::metrics).unwrap_or_default();
    let improvement = if report.iterations.len() > 1 {
        Improvement {
            accuracy: last.accuracy - first.accuracy,
            profit: last.profit - first.profit,
        }
    } else {
        Improvement { accuracy: 0.0, profit: 0.0 }
    };

    ExperimentSummary {
        name: &report.experiment_name,
        timestamp: report.finished_at,
        config: &report.settings,
        iterations: &report.iterations,
        final_accuracy: last.accuracy,
        final_profit: last.profit,
        improvement,
    }
}

/// `prompt_<YYYYmmdd_HHMMSS>_<acc>acc_<profit>profit.txt`, with `.` → `p`
/// and `-` → `neg` in the profit.
pub fn versioned_prompt_name(at: DateTime<Utc>, best: &Metrics) -> String {
    let profit = format!("{:.2}", best.profit).replace('.', "p").replace('-', "neg");
    format!(
        "prompt_{}_{:.0}acc_{}profit.txt",
        at.format("%Y%m%d_%H%M%S"),
        best.accuracy,
        profit
    )
}

pub fn markdown_report(report: &OptimizationReport) -> String {
    let baseline = baseline_metrics(report);
    let best = report.best;
    let base_len = BASE_PROMPT.chars().count();
    let best_len = report.best_prompt.chars().count();

    let mut md = format!(
        "# Prompt Optimization Report\n\
         Generated: {generated}\n\
         Experiment: {name}\n\
         Stop reason: {stop:?}\n\
         \n\
         ## Summary\n\
         \n\
         | Metric | Baseline | Final | Change |\n\
         |--------|----------|-------|--------|\n\
         | Accuracy | {b_acc:.1}% | {f_acc:.1}% | {d_acc:+.1}% |\n\
         | Profit Score | {b_profit:.2} | {f_profit:.2} | {d_profit:+.2} |\n\
         | Prompt Length | {base_len} | {best_len} | {d_len:+} |\n\
         \n\
         ## Iterations\n\
         \n",
        generated = report.finished_at.format("%Y-%m-%d %H:%M:%S"),
        name = report.experiment_name,
        stop = report.stop_reason,
        b_acc = baseline.accuracy,
        f_acc = best.accuracy,
        d_acc = best.accuracy - baseline.accuracy,
        b_profit = baseline.profit,
        f_profit = best.profit,
        d_profit = best.profit - baseline.profit,
        d_len = prompt_length_change(report),
    );

    for it in &report.iterations {
        let title = if it.iteration == 0 {
            "Baseline".to_string()
        } else {
            format!("Iteration {}", it.iteration)
        };
        let changes = if it.changes_made.is_empty() {
            "None".to_string()
        } else {
            it.changes_made.join(", ")
        };
        md.push_str(&format!(
            "### {title}\n\
             - Accuracy: {:.1}%\n\
             - Profit: {:.2}\n\
             - Predictions: {}/{}\n\
             - Changes: {changes}\n",
            it.accuracy, it.profit_score, it.correct_predictions, it.total_predictions,
        ));
        for t in &it.per_topic {
            md.push_str(&format!(
                "  - {}: {:.1}% over {} predictions ({} tests)\n",
                t.topic, t.metrics.accuracy, t.metrics.total, t.tests
            ));
        }
        md.push('\n');
    }

    md.push_str(&format!(
        "## How to Use\n\nCopy the optimized prompt from `{BEST_PROMPT_FILE}` into the relationship finder's system prompt.\n"
    ));
    md
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

fn write_artifact(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
    debug!(path = %path.display(), bytes = contents.len(), "Artifact written");
    Ok(())
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("Failed to serialise report")
}

/// Write every artifact under `dir`, creating it if needed. Returns the
/// paths actually written; failures are logged and skipped.
pub fn save_all(report: &OptimizationReport, dir: &Path) -> Vec<PathBuf> {
    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!(dir = %dir.display(), error = %e, "Could not create output directory");
        return Vec::new();
    }

    let data = OptimizationData {
        timestamp: report.finished_at,
        config: &report.settings,
        summary: summary(report),
        iterations: &report.iterations,
    };

    let artifacts: Vec<(PathBuf, Result<String>)> = vec![
        (dir.join(BEST_PROMPT_FILE), Ok(report.best_prompt.clone())),
        (
            dir.join(versioned_prompt_name(report.finished_at, &report.best)),
            Ok(report.best_prompt.clone()),
        ),
        (dir.join(DATA_FILE), to_json(&data)),
        (dir.join(REPORT_FILE), Ok(markdown_report(report))),
        (
            dir.join(format!("experiment_{}.json", report.experiment_name)),
            to_json(&experiment_summary(report)),
        ),
    ];

    let mut written = Vec::new();
    for (path, contents) in artifacts {
        match contents.and_then(|c| write_artifact(&path, &c)) {
            Ok(()) => {
                info!(path = %path.display(), "Saved");
                written.push(path);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Artifact not saved"),
        }
    }

    written
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
