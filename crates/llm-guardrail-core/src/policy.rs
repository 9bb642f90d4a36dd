//! Action derivation and substitution answer selection.

use crate::model::{Action, ConfigSet, ResponseTemplate, RiskCategory, RiskLevel};
use serde::Serialize;

/// Built-in answer used when no template matches.
pub const DEFAULT_ANSWER: &str =
    "Sorry, I can't help with that request. Please rephrase or ask about something else.";

/// Where a substitution answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerSource {
    Knowledge,
    Template,
    Default,
}

/// Action for an aggregated risk level.
pub fn derive_action(config_set: &ConfigSet, level: RiskLevel) -> Action {
    config_set.action_policy.action_for(level)
}

/// Pick the most specific template for the hit categories and level.
///
/// Lookup order, first hit wins:
/// 1. exact `(category, level)` for each hit category in order
/// 2. `(category, *)`
/// 3. `(*, level)`
/// 4. `(*, *)`
/// 5. [`DEFAULT_ANSWER`]
pub fn select_template(
    templates: &[ResponseTemplate],
    categories: &[RiskCategory],
    level: RiskLevel,
) -> (String, AnswerSource) {
    let find = |cat: Option<RiskCategory>, lvl: Option<RiskLevel>| {
        templates
            .iter()
            .find(|t| t.category == cat && t.risk_level == lvl)
    };

    let found = categories
        .iter()
        .find_map(|c| find(Some(*c), Some(level)))
        .or_else(|| categories.iter().find_map(|c| find(Some(*c), None)))
        .or_else(|| find(None, Some(level)))
        .or_else(|| find(None, None));

    match found {
        Some(t) => (t.content.clone(), AnswerSource::Template),
        None => (DEFAULT_ANSWER.to_string(), AnswerSource::Default),
    }
}
