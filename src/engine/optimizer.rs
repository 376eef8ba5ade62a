//! Optimization loop.
//!
//! Fetches (or reloads) the market sets, scores the baseline prompt, then
//! runs up to `max_iterations` rounds of feedback synthesis, optional
//! model rewrite and re-testing, keeping the best prompt seen. Every round
//! appends one `IterationResult` to the log.
//!
//! Everything runs on a single path, one call at a time.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::evaluator::{Judgement, Scorer};
use super::feedback::{self, Mutation, PromptMutator};
use super::runner::PromptRunner;
use super::template::{self, Sections, BASE_PROMPT};
use crate::config::{MarketsConfig, OptimizerSettings};
use crate::dataset::{self, DatasetStore};
use crate::llm::ChatModel;
use crate::platforms::{self, MarketSets, MarketSource};
use crate::storage;
use crate::types::{IterationResult, Metrics, OptimizerError, Prediction, TestResult, TopicMetrics};

/// Topics with fewer markets than this are skipped by the test battery.
const MIN_MARKETS_FOR_TEST: usize = 3;

/// Good/bad predictions sampled into each `IterationResult`.
const SAMPLED_EXAMPLES: usize = 3;

// ---------------------------------------------------------------------------
// Phases & outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    LoadingData,
    BaselineTest,
    Optimizing,
    SynthesizeFeedback,
    MaybeMutate,
    ReTest,
    Score,
    CheckTarget,
    SaveResults,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::LoadingData => "LOADING_DATA",
            Phase::BaselineTest => "BASELINE_TEST",
            Phase::Optimizing => "OPTIMIZING",
            Phase::SynthesizeFeedback => "SYNTHESIZE_FEEDBACK",
            Phase::MaybeMutate => "MAYBE_MUTATE",
            Phase::ReTest => "RE_TEST",
            Phase::Score => "SCORE",
            Phase::CheckTarget => "CHECK_TARGET",
            Phase::SaveResults => "SAVE_RESULTS",
            Phase::Done => "DONE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    BaselineMetTargets,
    TargetReached,
    BudgetExhausted,
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct OptimizationReport {
    pub experiment_name: String,
    pub settings: OptimizerSettings,
    pub iterations: Vec<IterationResult>,
    pub best_prompt: String,
    pub best: Metrics,
    pub stop_reason: StopReason,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl OptimizationReport {
    pub fn baseline(&self) -> Option<&IterationResult> {
        self.iterations.first()
    }

    pub fn last(&self) -> Option<&IterationResult> {
        self.iterations.last()
    }

    /// Optimization rounds run after the baseline.
    pub fn rounds(&self) -> usize {
        self.iterations.len().saturating_sub(1)
    }
}

// ---------------------------------------------------------------------------
// Test battery
// ---------------------------------------------------------------------------

/// Results of one prompt over every qualifying topic.
#[derive(Debug, Clone, Default)]
pub struct Battery {
    pub results: Vec<TestResult>,
    /// Held with profit above the few-shot threshold.
    pub good: Vec<Prediction>,
    /// Did not hold.
    pub bad: Vec<Prediction>,
}

impl Battery {
    pub fn predictions(&self) -> impl Iterator<Item = &Prediction> {
        self.results.iter().flat_map(|r| r.predictions.iter())
    }

    pub fn metrics(&self) -> Metrics {
        Metrics::from_predictions(self.predictions())
    }

    /// Metrics per topic, in battery order.
    pub fn per_topic(&self) -> Vec<TopicMetrics> {
        let mut out: Vec<TopicMetrics> = Vec::new();
        for result in &self.results {
            if out.last().map(|t| t.topic != result.topic).unwrap_or(true) {
                let of_topic: Vec<&TestResult> =
                    self.results.iter().filter(|r| r.topic == result.topic).collect();
                out.push(TopicMetrics {
                    topic: result.topic.clone(),
                    tests: of_topic.len(),
                    metrics: Metrics::from_predictions(of_topic.iter().flat_map(|r| r.predictions.iter())),
                });
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Optimizer
// ---------------------------------------------------------------------------

pub struct Optimizer {
    settings: OptimizerSettings,
    runner: PromptRunner,
    scorer: Box<dyn Scorer>,
    mutator: PromptMutator,
}

impl Optimizer {
    pub fn new(settings: OptimizerSettings, model: Arc<dyn ChatModel>, scorer: Box<dyn Scorer>) -> Self {
        let runner = PromptRunner::new(Arc::clone(&model), &settings.model);
        let mutator = PromptMutator::new(model, &settings.mutation_model);
        Self {
            settings,
            runner,
            scorer,
            mutator,
        }
    }

    pub fn settings(&self) -> &OptimizerSettings {
        &self.settings
    }

    /// Build the market sets: from the ground-truth dataset when one is
    /// given and loads, otherwise by fetching resolved markets per topic.
    ///
    /// Dataset problems only downgrade to a live fetch. A fetch error, or
    /// no qualifying topic, is fatal.
    pub async fn load_markets(
        &self,
        source: &dyn MarketSource,
        markets: &MarketsConfig,
        dataset: Option<(&dyn DatasetStore, &str)>,
    ) -> Result<MarketSets> {
        enter(Phase::LoadingData);

        if let Some((store, name)) = dataset {
            match store.load(name).await {
                Ok(Some(examples)) => {
                    let sets = dataset::market_sets_from_examples(&examples);
                    if !sets.is_empty() {
                        info!(
                            dataset = name,
                            examples = examples.len(),
                            topics = sets.len(),
                            markets = sets.total_markets(),
                            "Loaded market sets from dataset"
                        );
                        return Ok(sets);
                    }
                    warn!(dataset = name, "Dataset has no usable examples, fetching fresh markets");
                }
                Ok(None) => {
                    warn!(dataset = name, "Dataset not found (run create-dataset first), fetching fresh markets");
                }
                Err(e) => {
                    warn!(dataset = name, error = %e, "Dataset load failed, fetching fresh markets");
                }
            }
        }

        let sets = platforms::fetch_grouped(
            source,
            &markets.topics,
            markets.fetch_limit,
            markets.min_markets_per_topic,
        )
        .await?;

        if sets.is_empty() {
            return Err(OptimizerError::NoQualifyingTopics.into());
        }

        for group in sets.iter().take(3) {
            for m in group.markets.iter().take(2) {
                debug!(topic = %group.topic, market = %m, "Sample market");
            }
        }

        Ok(sets)
    }

    /// Run the `prompt` template with `sections` for the first
    /// `tests_per_topic` markets of every topic and judge each returned
    /// prediction.
    ///
    /// Predictions naming a market outside the candidate set are dropped.
    /// A scorer error drops that prediction only.
    pub async fn test_prompt(&self, prompt: &str, sections: &Sections, sets: &MarketSets) -> Battery {
        let mut battery = Battery::default();
        let mut test_num = 0usize;

        for group in sets.iter() {
            let markets = &group.markets;
            if markets.len() < MIN_MARKETS_FOR_TEST {
                continue;
            }

            debug!(topic = %group.topic, markets = markets.len(), "Testing topic");

            for source in markets.iter().take(self.settings.tests_per_topic) {
                test_num += 1;
                let candidates: Vec<_> = markets
                    .iter()
                    .filter(|m| m.id != source.id)
                    .take(self.settings.candidates_per_test)
                    .cloned()
                    .collect();

                let raw = self.runner.run(prompt, sections, source, &candidates).await;
                let mut predictions = Vec::with_capacity(raw.len());

                for pred in raw {
                    let Some(related) = candidates.iter().find(|c| c.id == pred.market_id) else {
                        debug!(market_id = %pred.market_id, "Prediction names unknown candidate, skipping");
                        continue;
                    };

                    let case = Judgement {
                        source,
                        related,
                        relationship: &pred.relationship,
                        reasoning: &pred.reasoning,
                    };
                    let verdict = match self.scorer.score(&case).await {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(
                                topic = %group.topic,
                                source_id = %source.id,
                                related_id = %related.id,
                                error = %e,
                                "Could not score prediction, skipping"
                            );
                            continue;
                        }
                    };

                    let prediction = Prediction {
                        source: source.clone(),
                        related: related.clone(),
                        relationship: pred.relationship,
                        reasoning: pred.reasoning,
                        held: verdict.held,
                        profit: verdict.profit,
                    };

                    if prediction.is_good() {
                        battery.good.push(prediction.clone());
                    } else if !prediction.held {
                        battery.bad.push(prediction.clone());
                    }
                    predictions.push(prediction);
                }

                let correct = predictions.iter().filter(|p| p.held).count();
                info!(
                    test = test_num,
                    topic = %group.topic,
                    source_id = %source.id,
                    predictions = predictions.len(),
                    correct,
                    "Test complete"
                );

                battery.results.push(TestResult {
                    topic: group.topic.clone(),
                    source: source.clone(),
                    predictions,
                });
            }
        }

        battery
    }

    /// Run the baseline and optimization rounds over `sets`.
    pub async fn optimize(&self, sets: &MarketSets) -> Result<OptimizationReport> {
        if sets.is_empty() {
            return Err(OptimizerError::NoQualifyingTopics.into());
        }

        let started_at = Utc::now();
        let experiment_name = format!("opt_{}", started_at.format("%Y%m%d_%H%M%S"));
        let s = &self.settings;
        info!(experiment = %experiment_name, topics = sets.len(), "Starting optimization");

        // Baseline
        enter(Phase::BaselineTest);
        let baseline_prompt = template::blank_sections(BASE_PROMPT);
        let battery = self.test_prompt(BASE_PROMPT, &Sections::default(), sets).await;
        let metrics = battery.metrics();
        info!(
            iteration = 0,
            accuracy = metrics.accuracy,
            profit = metrics.profit,
            good = battery.good.len(),
            bad = battery.bad.len(),
            "Baseline: {metrics}"
        );

        let mut log = vec![checkpoint(
            0,
            "baseline".into(),
            &baseline_prompt,
            &battery,
            vec!["Initial baseline test".into()],
        )];

        let mut best_prompt = baseline_prompt;
        let mut best = metrics;
        let mut previous = metrics;
        let mut good = battery.good;
        let mut bad = battery.bad;

        let stop_reason = if metrics.meets(s.target_accuracy, s.target_profit) {
            info!("Baseline already meets targets");
            StopReason::BaselineMetTargets
        } else {
            enter(Phase::Optimizing);
            let mut reason = StopReason::BudgetExhausted;

            for iteration in 1..=s.max_iterations {
                info!(iteration, "Starting optimization round");
                let mut changes = Vec::new();

                enter(Phase::SynthesizeFeedback);
                let few_shot = feedback::build_few_shot(&good, s.few_shot_examples);
                if few_shot.is_empty() {
                    warn!(iteration, "No good examples to add");
                } else {
                    let n = feedback::few_shot_count(&good, s.few_shot_examples);
                    changes.push(format!("Added {n} few-shot examples"));
                }

                let warnings = feedback::build_warnings(&bad);
                if warnings.is_empty() {
                    warn!(iteration, "No warnings to add");
                } else {
                    let k = feedback::warning_label_count(&bad);
                    changes.push(format!("Added warnings for {k} relationship types"));
                }

                // Section tokens stay in the template until the runner fills
                // them alongside the source tokens.
                let sections = Sections::new(few_shot, warnings);
                let mut candidate = BASE_PROMPT.to_string();

                if feedback::should_mutate(iteration, previous.accuracy) {
                    enter(Phase::MaybeMutate);
                    match self
                        .mutator
                        .mutate(&candidate, &sections, previous.accuracy, previous.profit, &bad)
                        .await
                    {
                        Mutation::Applied(mutated) => {
                            candidate = mutated;
                            changes.push("Applied LLM-based prompt mutation".into());
                        }
                        Mutation::Discarded => {
                            warn!(iteration, "Mutation discarded, keeping synthesized prompt");
                            changes.push("Discarded LLM mutation (kept previous prompt)".into());
                        }
                    }
                }

                enter(Phase::ReTest);
                let battery = self.test_prompt(&candidate, &sections, sets).await;
                let prompt = sections.render(&candidate);

                enter(Phase::Score);
                let metrics = battery.metrics();
                info!(
                    iteration,
                    accuracy = metrics.accuracy,
                    profit = metrics.profit,
                    accuracy_change = metrics.accuracy - best.accuracy,
                    profit_change = metrics.profit - best.profit,
                    "Round {iteration}: {metrics}"
                );

                log.push(checkpoint(
                    iteration,
                    format!("iteration_{iteration}"),
                    &prompt,
                    &battery,
                    changes,
                ));

                if improves(&metrics, &best) {
                    info!(iteration, accuracy = metrics.accuracy, profit = metrics.profit, "New best prompt");
                    best_prompt = prompt;
                    best = metrics;
                }

                previous = metrics;
                good = battery.good;
                bad = battery.bad;

                enter(Phase::CheckTarget);
                if metrics.meets(s.target_accuracy, s.target_profit) {
                    info!(
                        iteration,
                        target_accuracy = s.target_accuracy,
                        target_profit = s.target_profit,
                        "Reached target accuracy and profit"
                    );
                    reason = StopReason::TargetReached;
                    break;
                }
            }

            reason
        };

        Ok(OptimizationReport {
            experiment_name,
            settings: self.settings.clone(),
            iterations: log,
            best_prompt,
            best,
            stop_reason,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Optimize, then persist every artifact under `output_dir`.
    pub async fn run(&self, sets: &MarketSets, output_dir: &Path) -> Result<(OptimizationReport, Vec<PathBuf>)> {
        let report = self.optimize(sets).await?;

        enter(Phase::SaveResults);
        let written = storage::save_all(&report, output_dir);

        enter(Phase::Done);
        info!(
            experiment = %report.experiment_name,
            stop_reason = ?report.stop_reason,
            best_accuracy = report.best.accuracy,
            best_profit = report.best.profit,
            rounds = report.rounds(),
            files = written.len(),
            "Optimization complete"
        );
        Ok((report, written))
    }
}

/// Lexicographic: accuracy first, profit breaks ties.
pub fn improves(candidate: &Metrics, best: &Metrics) -> bool {
    candidate.accuracy > best.accuracy
        || (candidate.accuracy == best.accuracy && candidate.profit > best.profit)
}

fn enter(phase: Phase) {
    debug!(%phase, "Phase transition");
}

fn checkpoint(
    iteration: u32,
    prompt_name: String,
    prompt: &str,
    battery: &Battery,
    changes_made: Vec<String>,
) -> IterationResult {
    let metrics = battery.metrics();
    IterationResult {
        iteration,
        prompt_name,
        prompt_length: prompt.chars().count(),
        accuracy: metrics.accuracy,
        profit_score: metrics.profit,
        total_predictions: metrics.total,
        correct_predictions: metrics.correct,
        per_topic: battery.per_topic(),
        good_examples: battery.good.iter().take(SAMPLED_EXAMPLES).cloned().collect(),
        bad_examples: battery.bad.iter().take(SAMPLED_EXAMPLES).cloned().collect(),
        changes_made,
        timestamp: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
