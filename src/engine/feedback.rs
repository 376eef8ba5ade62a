//! Feedback synthesis.
//!
//! Turns the last round's judged predictions into prompt text: a few-shot
//! block of validated examples, a warnings block of repeated mistakes, and
//! an optional model rewrite of the relationship definitions.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::template::{self, Sections};
use crate::llm::{ChatModel, ChatRequest};
use crate::types::{truncate_chars, Prediction, Relationship};

const FEW_SHOT_HEADING: &str = "PROVEN EXAMPLES (validated against real outcomes):";
const WARNINGS_HEADING: &str = "AVOID THESE MISTAKES:";

const FEW_SHOT_QUESTION_CHARS: usize = 80;
const WARNING_QUESTION_CHARS: usize = 40;

const MUTATION_PROMPT_CHARS: usize = 2000;
const MUTATION_FAILURE_EXEMPLARS: usize = 5;
const MUTATION_QUESTION_CHARS: usize = 100;
const MUTATION_TEMPERATURE: f32 = 0.8;
const MUTATION_MAX_TOKENS: u32 = 1500;

const MUTATION_SYSTEM: &str = "You are a prompt engineering expert. Output only the improved text, no explanations. Make substantial improvements.";

/// Accuracy (percent) below which the first round is already mutated.
pub const MUTATION_ACCURACY_FLOOR: f64 = 40.0;

// ---------------------------------------------------------------------------
// Few-shot and warnings blocks
// ---------------------------------------------------------------------------

/// Render up to `max_examples` good predictions. Empty when there are none.
pub fn build_few_shot(good: &[Prediction], max_examples: usize) -> String {
    let examples: Vec<&Prediction> = good.iter().filter(|p| p.is_good()).take(max_examples).collect();
    if examples.is_empty() {
        return String::new();
    }

    let mut lines = vec![FEW_SHOT_HEADING.to_string()];
    for (i, p) in examples.iter().enumerate() {
        lines.push(format!(
            "\nExample {}:\nSource: \"{}\"\nRelated: \"{}\"\nRelationship: {}\nReasoning: {}\n✓ Source→{}, Related→{}",
            i + 1,
            truncate_chars(&p.source.question, FEW_SHOT_QUESTION_CHARS),
            truncate_chars(&p.related.question, FEW_SHOT_QUESTION_CHARS),
            p.relationship,
            p.reasoning,
            p.source.outcome,
            p.related.outcome,
        ));
    }
    lines.join("\n")
}

/// Number of few-shot examples `build_few_shot` would render.
pub fn few_shot_count(good: &[Prediction], max_examples: usize) -> usize {
    good.iter().filter(|p| p.is_good()).take(max_examples).count()
}

/// Failed predictions grouped by label, in first-seen order.
fn group_failures(bad: &[Prediction]) -> Vec<(&Relationship, Vec<&Prediction>)> {
    let mut groups: Vec<(&Relationship, Vec<&Prediction>)> = Vec::new();
    for p in bad.iter().filter(|p| !p.held) {
        match groups.iter_mut().find(|(label, _)| **label == p.relationship) {
            Some((_, members)) => members.push(p),
            None => groups.push((&p.relationship, vec![p])),
        }
    }
    groups
}

/// Render failure counts per label with one representative each. Empty
/// when there are no failures.
pub fn build_warnings(bad: &[Prediction]) -> String {
    let groups = group_failures(bad);
    if groups.is_empty() {
        return String::new();
    }

    let mut lines = vec![WARNINGS_HEADING.to_string()];
    for (label, members) in &groups {
        lines.push(format!("- {}: {} wrong predictions", label, members.len()));
        if let Some(ex) = members.first() {
            lines.push(format!(
                "  Bad: \"{}\" → \"{}\"",
                truncate_chars(&ex.source.question, WARNING_QUESTION_CHARS),
                truncate_chars(&ex.related.question, WARNING_QUESTION_CHARS),
            ));
            lines.push(format!(
                "  Reality: Source={}, Related={}",
                ex.source.outcome, ex.related.outcome
            ));
        }
    }
    lines.join("\n")
}

/// Distinct relationship labels among failed predictions.
pub fn warning_label_count(bad: &[Prediction]) -> usize {
    group_failures(bad).len()
}

/// Whether a round gets a model rewrite: from round 2 on, or earlier when
/// the previous round scored below the accuracy floor.
pub fn should_mutate(iteration: u32, previous_accuracy: f64) -> bool {
    iteration >= 2 || previous_accuracy < MUTATION_ACCURACY_FLOOR
}

// ---------------------------------------------------------------------------
// Model-driven mutation
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct FailureExemplar<'a> {
    source: String,
    related: String,
    predicted: &'a Relationship,
    source_outcome: crate::types::Outcome,
    related_outcome: crate::types::Outcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// The rewrite was spliced in.
    Applied(String),
    /// The call failed or the rewrite was unusable; keep the prompt.
    Discarded,
}

pub struct PromptMutator {
    model: Arc<dyn ChatModel>,
    model_id: String,
}

impl PromptMutator {
    pub fn new(model: Arc<dyn ChatModel>, model_id: impl Into<String>) -> Self {
        Self {
            model,
            model_id: model_id.into(),
        }
    }

    pub fn build_request(&self, prompt: &str, accuracy: f64, profit: f64, bad: &[Prediction]) -> ChatRequest {
        let failures: Vec<FailureExemplar<'_>> = bad
            .iter()
            .take(MUTATION_FAILURE_EXEMPLARS)
            .map(|p| FailureExemplar {
                source: truncate_chars(&p.source.question, MUTATION_QUESTION_CHARS),
                related: truncate_chars(&p.related.question, MUTATION_QUESTION_CHARS),
                predicted: &p.relationship,
                source_outcome: p.source.outcome,
                related_outcome: p.related.outcome,
            })
            .collect();
        let failures_json = serde_json::to_string_pretty(&failures).unwrap_or_else(|_| "[]".into());

        let user = format!(
            r#"You are a prompt engineering expert. Analyze and SIGNIFICANTLY improve this prompt.

CURRENT PROMPT:
{prompt}

CURRENT PERFORMANCE:
- Accuracy: {accuracy:.1}%
- Profit Score: {profit:.2}

FAILURE EXAMPLES (predictions that were WRONG):
{failures_json}

TASK: Rewrite the relationship type definitions to be MORE PRECISE and ACTIONABLE.

Requirements:
1. Add specific criteria for WHEN to use each relationship type
2. Add explicit warnings for WHEN NOT to use each type
3. Include concrete examples or patterns
4. Make the definitions more rigorous to reduce false positives
5. Add a confidence threshold guideline

Return the improved "Relationship Types:" section with substantially enhanced definitions.
Be specific, add bullet points, and make it noticeably better than the original."#,
            prompt = truncate_chars(prompt, MUTATION_PROMPT_CHARS),
        );

        ChatRequest::new(&self.model_id, MUTATION_SYSTEM, user)
            .temperature(MUTATION_TEMPERATURE)
            .max_tokens(MUTATION_MAX_TOKENS)
    }

    /// Ask the mutation model for new relationship definitions and splice
    /// them into the `prompt` template. The model sees the prompt with
    /// `sections` rendered in; the splice works on the template itself so
    /// its section tokens survive. Never returns a half-substituted prompt.
    pub async fn mutate(
        &self,
        prompt: &str,
        sections: &Sections,
        accuracy: f64,
        profit: f64,
        bad: &[Prediction],
    ) -> Mutation {
        let request = self.build_request(&sections.render(prompt), accuracy, profit, bad);

        let rewrite = match self.model.complete(&request).await {
            Ok(text) => text,
            Err(e) => {
                warn!(model = %self.model_id, error = %e, "Mutation call failed, keeping prompt");
                return Mutation::Discarded;
            }
        };

        match template::splice_relationship_section(prompt, &rewrite) {
            Some(mutated) => {
                info!(
                    model = %self.model_id,
                    before = prompt.chars().count(),
                    after = mutated.chars().count(),
                    "Prompt mutated"
                );
                Mutation::Applied(mutated)
            }
            None => {
                warn!(
                    model = %self.model_id,
                    rewrite_chars = rewrite.chars().count(),
                    "Mutation unusable (too short or markers missing), keeping prompt"
                );
                Mutation::Discarded
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
