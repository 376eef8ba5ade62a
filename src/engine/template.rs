//! Relationship-finding prompt template.
//!
//! The template embeds a JSON example with literal braces, so filling it
//! is an exact reserved-token pass rather than general string formatting:
//! only the tokens below are recognised, each occurrence is replaced once,
//! and substituted text is never rescanned.

use crate::types::Market;

// ---------------------------------------------------------------------------
// Reserved tokens
// ---------------------------------------------------------------------------

pub const SOURCE_QUESTION: &str = "{source_question}";
pub const SOURCE_YES: &str = "{source_yes}";
pub const SOURCE_NO: &str = "{source_no}";
pub const SOURCE_DESCRIPTION: &str = "{source_description}";
pub const FEW_SHOT_SECTION: &str = "{few_shot_section}";
pub const WARNINGS_SECTION: &str = "{warnings_section}";

pub const RESERVED_TOKENS: &[&str] = &[
    SOURCE_QUESTION,
    SOURCE_YES,
    SOURCE_NO,
    SOURCE_DESCRIPTION,
    FEW_SHOT_SECTION,
    WARNINGS_SECTION,
];

/// Start of the relationship definitions that mutation may rewrite.
pub const RELATIONSHIP_MARKER: &str = "Relationship Types:";
/// Start of the output-format instructions, which mutation never touches.
pub const RETURN_MARKER: &str = "Return JSON";

/// Rewrites shorter than this are treated as failed mutations.
pub const MIN_REWRITE_CHARS: usize = 100;

pub const BASE_PROMPT: &str = r#"You are a strategic prediction market analyst finding ACTIONABLE related bets.

Source Market:
- Question: {source_question}
- Current Odds: {source_yes}% YES / {source_no}% NO
- Description: {source_description}

YOUR GOAL: Find markets where betting strategy changes based on beliefs about the source market.

GOOD Related Markets:
✓ Markets with hedging opportunities (opposite positions reduce risk)
✓ Markets with arbitrage potential (related but mispriced)
✓ Markets with causal relationships (one outcome affects another)
✓ Markets with competitive odds (10-90% range, not extreme long shots)
✓ Markets where information advantage transfers

BAD Related Markets:
✗ Extreme long shots (<5% or >95%) - no trading opportunity
✗ Same exact market in different words (redundant)
✗ Weak correlations without clear reasoning
✗ Markets from the same multi-outcome event (just partitions)

Relationship Types:
- IMPLIES: If this market YES → source YES
- CONTRADICTS: If source YES → this market NO more likely
- SUBEVENT: This event directly causes/prevents source outcome
- CONDITIONED_ON: Source outcome is prerequisite for this market
- WEAK_SIGNAL: Correlated indicator (only if odds are interesting)

{few_shot_section}

{warnings_section}

Return JSON:
{
  "related": [
    {
      "marketId": "id",
      "relationship": "IMPLIES|CONTRADICTS|SUBEVENT|CONDITIONED_ON|WEAK_SIGNAL",
      "reasoning": "Brief explanation"
    }
  ]
}

Return empty array if no good opportunities: {"related": []}"#;

// ---------------------------------------------------------------------------
// Substitution
// ---------------------------------------------------------------------------

/// Replace the given reserved tokens in a single left-to-right pass.
///
/// Tokens not listed in `values`, and any other brace sequence, are copied
/// through untouched.
pub fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match values.iter().find(|(token, _)| tail.starts_with(token)) {
            Some((token, value)) => {
                out.push_str(value);
                rest = &tail[token.len()..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// Feedback text for the two section tokens of a candidate prompt.
///
/// Sections stay separate from the template until `fill_source`, so their
/// text (market questions, model reasoning) is substituted in the same
/// pass as the source tokens and never scanned for tokens itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sections {
    pub few_shot: String,
    pub warnings: String,
}

impl Sections {
    pub fn new(few_shot: impl Into<String>, warnings: impl Into<String>) -> Self {
        Self {
            few_shot: few_shot.into(),
            warnings: warnings.into(),
        }
    }

    /// The template with both sections in place and the source tokens left
    /// for the runner. Used for logging and the saved prompt.
    pub fn render(&self, template: &str) -> String {
        bake_sections(template, &self.few_shot, &self.warnings)
    }
}

/// Bake the feedback sections into a template, leaving the source tokens
/// untouched.
pub fn bake_sections(template: &str, few_shot: &str, warnings: &str) -> String {
    fill(template, &[(FEW_SHOT_SECTION, few_shot), (WARNINGS_SECTION, warnings)])
}

/// Resolve both feedback sections to nothing.
pub fn blank_sections(template: &str) -> String {
    bake_sections(template, "", "")
}

/// Fill all six reserved tokens in one pass: the source market plus the
/// feedback sections.
pub fn fill_source(template: &str, source: &Market, sections: &Sections) -> String {
    let yes = source.yes_price.to_string();
    let no = source.no_price.to_string();
    fill(
        template,
        &[
            (SOURCE_QUESTION, &source.question),
            (SOURCE_YES, &yes),
            (SOURCE_NO, &no),
            (SOURCE_DESCRIPTION, &source.description),
            (FEW_SHOT_SECTION, &sections.few_shot),
            (WARNINGS_SECTION, &sections.warnings),
        ],
    )
}

// ---------------------------------------------------------------------------
// Mutation splice
// ---------------------------------------------------------------------------

/// Replace the text strictly between `Relationship Types:` and the first
/// `Return JSON` after it with `rewrite`.
///
/// Returns `None` (prompt unchanged) when the rewrite body is shorter than
/// `MIN_REWRITE_CHARS` or either marker is missing or out of order. A
/// leading `Relationship Types:` echoed by the model is dropped so the
/// marker is not doubled, and the length check applies to what is left.
/// Section tokens in the replaced span are kept, in order, after the new
/// definitions.
pub fn splice_relationship_section(prompt: &str, rewrite: &str) -> Option<String> {
    let trimmed = rewrite.trim();
    let body = trimmed
        .strip_prefix(RELATIONSHIP_MARKER)
        .unwrap_or(trimmed)
        .trim();
    if body.chars().count() < MIN_REWRITE_CHARS {
        return None;
    }

    let start = prompt.find(RELATIONSHIP_MARKER)?;
    let body_start = start + RELATIONSHIP_MARKER.len();
    let end = body_start + prompt[body_start..].find(RETURN_MARKER)?;

    let replaced = &prompt[body_start..end];
    let kept: String = [FEW_SHOT_SECTION, WARNINGS_SECTION]
        .iter()
        .filter(|token| replaced.contains(**token))
        .map(|token| format!("{token}\n\n"))
        .collect();

    Some(format!(
        "{}\n{}\n\n{}{}",
        &prompt[..body_start],
        body,
        kept,
        &prompt[end..]
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
