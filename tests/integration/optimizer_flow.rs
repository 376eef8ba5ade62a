use std::sync::Arc;

use relation_optimizer::config::{MarketsConfig, OptimizerSettings};
use relation_optimizer::dataset::{build_examples, DatasetStore, UploadOutcome};
use relation_optimizer::engine::evaluator::{build_scorer, EvaluationStrategy, RuleTable};
use relation_optimizer::engine::optimizer::{Optimizer, StopReason};
use relation_optimizer::engine::template::{blank_sections, BASE_PROMPT};
use relation_optimizer::platforms::MarketSets;
use relation_optimizer::storage::{BEST_PROMPT_FILE, DATA_FILE, REPORT_FILE};

use crate::mock_llm::{related, ScriptedModel};
use crate::mock_source::{five_markets, resolved, MemoryStore, MockMarketSource};

const REWRITE: &str = "- IMPLIES: the related market resolving YES forces the source to YES. \
- CONTRADICTS: the two markets cannot both resolve YES. \
- WEAK_SIGNAL: use only when nothing stronger applies.";

fn one_test_settings() -> OptimizerSettings {
    OptimizerSettings {
        tests_per_topic: 1,
        ..OptimizerSettings::default()
    }
}

fn one_topic() -> MarketSets {
    let mut sets = MarketSets::new();
    sets.insert("Bitcoin", five_markets());
    sets
}

fn markets_config(topics: &[&str]) -> MarketsConfig {
    MarketsConfig {
        topics: topics.iter().map(|t| t.to_string()).collect(),
        fetch_limit: 100,
        min_markets_per_topic: 3,
        ..MarketsConfig::default()
    }
}

fn temp_dir() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("relation_optimizer_it_{}", uuid::Uuid::new_v4()))
}

// ---------------------------------------------------------------------------
// Optimization loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn baseline_meeting_targets_stops_immediately() {
    let model = Arc::new(ScriptedModel::repeating(related(&[("M1", "IMPLIES")])));
    let optimizer = Optimizer::new(one_test_settings(), model.clone(), Box::new(RuleTable));

    let report = optimizer.optimize(&one_topic()).await.unwrap();

    assert_eq!(report.stop_reason, StopReason::BaselineMetTargets);
    assert_eq!(report.iterations.len(), 1);
    assert_eq!(report.rounds(), 0);
    assert_eq!(report.best.accuracy, 100.0);
    assert!((report.best.profit - 0.6).abs() < 1e-9);
    assert_eq!(report.best_prompt, blank_sections(BASE_PROMPT));

    let baseline = report.baseline().unwrap();
    assert_eq!(baseline.changes_made, vec!["Initial baseline test".to_string()]);
    assert_eq!(baseline.per_topic.len(), 1);
    assert_eq!(baseline.per_topic[0].topic, "Bitcoin");
    assert_eq!(baseline.per_topic[0].metrics.accuracy, 100.0);

    assert_eq!(model.analysis_requests().len(), 1);
    assert_eq!(model.text_calls(), 0);
}

#[tokio::test]
async fn stops_as_soon_as_round_meets_targets() {
    let model = Arc::new(ScriptedModel::new(vec![
        // Baseline: 1/5 held, profit -0.1
        related(&[
            ("M3", "CONTRADICTS"),
            ("M3", "WEAK_SIGNAL"),
            ("M4", "WEAK_SIGNAL"),
            ("M3", "WEAK_SIGNAL"),
            ("M4", "WEAK_SIGNAL"),
        ]),
        // Round 1: 1/2 held, profit 0.1
        related(&[("M1", "CONDITIONED_ON"), ("M4", "WEAK_SIGNAL")]),
        // Round 2: 4/5 held, profit 0.4
        related(&[
            ("M1", "IMPLIES"),
            ("M2", "IMPLIES"),
            ("M1", "IMPLIES"),
            ("M2", "CONDITIONED_ON"),
            ("M3", "WEAK_SIGNAL"),
        ]),
    ]));
    let optimizer = Optimizer::new(one_test_settings(), model.clone(), Box::new(RuleTable));

    let report = optimizer.optimize(&one_topic()).await.unwrap();

    assert_eq!(report.stop_reason, StopReason::TargetReached);
    assert_eq!(report.iterations.len(), 3);
    assert_eq!(model.analysis_requests().len(), 3);
    assert_eq!(report.best.accuracy, 80.0);
    assert!((report.best.profit - 0.4).abs() < 1e-9);

    let accuracies: Vec<f64> = report.iterations.iter().map(|r| r.accuracy).collect();
    assert_eq!(accuracies, vec![20.0, 50.0, 80.0]);

    // Round 1 mutates (baseline under the floor), round 2 always does.
    // The scripted rewrite is too short, so both are discarded.
    assert_eq!(model.text_calls(), 2);
    assert_eq!(
        report.iterations[1].changes_made,
        vec![
            "Added 1 few-shot examples".to_string(),
            "Added warnings for 1 relationship types".to_string(),
            "Discarded LLM mutation (kept previous prompt)".to_string(),
        ]
    );

    // Synthesized sections reach the analysis prompt
    let round_one = &model.analysis_requests()[1];
    assert!(round_one.system.contains("PROVEN EXAMPLES"));
    assert!(round_one.system.contains("AVOID THESE MISTAKES"));
    assert_eq!(report.best_prompt.chars().count(), report.iterations[2].prompt_length);
}

#[tokio::test]
async fn accepted_rewrite_is_used_for_the_next_battery() {
    let settings = OptimizerSettings {
        max_iterations: 1,
        ..one_test_settings()
    };
    // Nothing predicted: 0% baseline, so round 1 mutates.
    let model = Arc::new(ScriptedModel::new(vec![]).with_text_reply(REWRITE));
    let optimizer = Optimizer::new(settings, model.clone(), Box::new(RuleTable));

    let report = optimizer.optimize(&one_topic()).await.unwrap();

    assert_eq!(report.stop_reason, StopReason::BudgetExhausted);
    assert_eq!(report.iterations.len(), 2);
    assert_eq!(
        report.iterations[1].changes_made,
        vec!["Applied LLM-based prompt mutation".to_string()]
    );

    let requests = model.analysis_requests();
    assert_eq!(requests.len(), 2);
    assert!(!requests[0].system.contains("the two markets cannot both resolve YES"));
    assert!(requests[1].system.contains("the two markets cannot both resolve YES"));
    assert!(requests[1].system.contains("Relationship Types:"));
    assert!(requests[1].system.contains("Return JSON"));

    // No improvement over an empty baseline, so the baseline stays best
    assert_eq!(report.best_prompt, blank_sections(BASE_PROMPT));
}

#[tokio::test]
async fn accepted_rewrite_keeps_feedback_sections() {
    let settings = OptimizerSettings {
        max_iterations: 1,
        ..one_test_settings()
    };
    // 1 of 3 held: below the mutation floor, with one good and two bad.
    let model = Arc::new(
        ScriptedModel::repeating(related(&[
            ("M1", "IMPLIES"),
            ("M3", "WEAK_SIGNAL"),
            ("M4", "WEAK_SIGNAL"),
        ]))
        .with_text_reply(REWRITE),
    );
    let optimizer = Optimizer::new(settings, model.clone(), Box::new(RuleTable));

    let report = optimizer.optimize(&one_topic()).await.unwrap();

    assert_eq!(
        report.iterations[1].changes_made,
        vec![
            "Added 1 few-shot examples".to_string(),
            "Added warnings for 1 relationship types".to_string(),
            "Applied LLM-based prompt mutation".to_string(),
        ]
    );

    let round_one = &model.analysis_requests()[1].system;
    let rewrite_at = round_one.find("the two markets cannot both resolve YES").unwrap();
    let examples_at = round_one.find("PROVEN EXAMPLES").unwrap();
    let warnings_at = round_one.find("AVOID THESE MISTAKES").unwrap();
    assert!(rewrite_at < examples_at && examples_at < warnings_at);
    assert!(!round_one.contains("{few_shot_section}"));
}

#[tokio::test]
async fn judge_outage_falls_back_to_rule_table() {
    let model = Arc::new(ScriptedModel::repeating(related(&[("M1", "IMPLIES"), ("M3", "CONTRADICTS")])).failing_judge());
    let scorer = build_scorer(EvaluationStrategy::Judge, model.clone(), "judge-model");
    let optimizer = Optimizer::new(one_test_settings(), model.clone(), scorer);

    let report = optimizer.optimize(&one_topic()).await.unwrap();

    assert_eq!(model.judge_calls(), 2);
    assert_eq!(report.stop_reason, StopReason::BaselineMetTargets);
    assert_eq!(report.best.accuracy, 100.0);
    assert!((report.best.profit - 0.65).abs() < 1e-9);
}

#[tokio::test]
async fn run_writes_all_artifacts() {
    let model = Arc::new(ScriptedModel::repeating(related(&[("M1", "IMPLIES")])));
    let optimizer = Optimizer::new(one_test_settings(), model, Box::new(RuleTable));
    let dir = temp_dir();

    let (report, written) = optimizer.run(&one_topic(), &dir).await.unwrap();

    assert_eq!(written.len(), 5);
    assert!(written.iter().all(|p| p.exists()));

    let best = std::fs::read_to_string(dir.join(BEST_PROMPT_FILE)).unwrap();
    assert_eq!(best, report.best_prompt);

    let data: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.join(DATA_FILE)).unwrap()).unwrap();
    assert_eq!(data["iterations"].as_array().unwrap().len(), 1);
    assert_eq!(data["config"]["tests_per_topic"], 1);

    let markdown = std::fs::read_to_string(dir.join(REPORT_FILE)).unwrap();
    assert!(markdown.contains("100.0%"));

    let _ = std::fs::remove_dir_all(&dir);
}

// ---------------------------------------------------------------------------
// Market loading
// ---------------------------------------------------------------------------

#[tokio::test]
async fn load_markets_skips_thin_topics() {
    let source = MockMarketSource::new(vec![
        ("Bitcoin", five_markets()),
        ("Fed", vec![resolved("F0", 0.9), resolved("F1", 0.1)]),
    ]);
    let optimizer = Optimizer::new(
        one_test_settings(),
        Arc::new(ScriptedModel::new(vec![])),
        Box::new(RuleTable),
    );

    let sets = optimizer
        .load_markets(&source, &markets_config(&["Bitcoin", "Fed"]), None)
        .await
        .unwrap();

    assert_eq!(sets.len(), 1);
    assert_eq!(sets.get("Bitcoin").unwrap().len(), 5);
    assert!(sets.get("Fed").is_none());
}

#[tokio::test]
async fn load_markets_fails_without_qualifying_topics() {
    let source = MockMarketSource::new(vec![("Fed", vec![resolved("F0", 0.9)])]);
    let optimizer = Optimizer::new(
        one_test_settings(),
        Arc::new(ScriptedModel::new(vec![])),
        Box::new(RuleTable),
    );

    let err = optimizer
        .load_markets(&source, &markets_config(&["Fed"]), None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("No topics"));
}

#[tokio::test]
async fn load_markets_escalates_fetch_errors() {
    let source = MockMarketSource::new(vec![("Bitcoin", five_markets())]);
    source.set_error("connection refused");
    let optimizer = Optimizer::new(
        one_test_settings(),
        Arc::new(ScriptedModel::new(vec![])),
        Box::new(RuleTable),
    );

    let err = optimizer
        .load_markets(&source, &markets_config(&["Bitcoin"]), None)
        .await
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("Bitcoin"));
    assert!(msg.contains("connection refused"));
}

#[tokio::test]
async fn dataset_replaces_live_fetch_once_uploaded() {
    let source = MockMarketSource::new(vec![("Bitcoin", five_markets())]);
    let store = MemoryStore::default();
    let optimizer = Optimizer::new(
        one_test_settings(),
        Arc::new(ScriptedModel::new(vec![])),
        Box::new(RuleTable),
    );
    let cfg = markets_config(&["Bitcoin"]);

    // Missing dataset: live fetch
    let fetched = optimizer
        .load_markets(&source, &cfg, Some((&store as &dyn DatasetStore, "ground-truth")))
        .await
        .unwrap();
    assert_eq!(source.calls(), 1);

    let examples = build_examples(&fetched, 1, 10);
    assert_eq!(examples.len(), 1);
    assert_eq!(
        store.upload("ground-truth", &examples).await.unwrap(),
        UploadOutcome::Created { count: 1 }
    );
    assert_eq!(
        store.upload("ground-truth", &examples).await.unwrap(),
        UploadOutcome::AlreadyExists
    );

    // Uploaded dataset: no fetch, same battery
    source.set_error("should not be called");
    let loaded = optimizer
        .load_markets(&source, &cfg, Some((&store as &dyn DatasetStore, "ground-truth")))
        .await
        .unwrap();
    assert_eq!(source.calls(), 1);

    let ids: Vec<&str> = loaded.get("Bitcoin").unwrap().iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["M0", "M1", "M2", "M3", "M4"]);
}
