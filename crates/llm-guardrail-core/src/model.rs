//! Domain model for tenants, credentials and protection templates.
//!
//! All records here are owned by the external admin layer. The guardrail core
//! only reads them, through [`crate::store::ConfigStore`], and treats them as
//! immutable for the lifetime of a request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::GuardrailError;

// ---------------------------------------------------------------------------
// Risk vocabulary
// ---------------------------------------------------------------------------

/// Ordered risk severity. `Ord` follows declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    NoRisk,
    LowRisk,
    MediumRisk,
    HighRisk,
}

impl Default for RiskLevel {
    fn default() -> Self {
        RiskLevel::NoRisk
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::NoRisk => "no_risk",
            RiskLevel::LowRisk => "low_risk",
            RiskLevel::MediumRisk => "medium_risk",
            RiskLevel::HighRisk => "high_risk",
        };
        f.write_str(s)
    }
}

/// Detection dimension reported by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// Prompt attacks and jailbreaks.
    Security,
    /// Content compliance (S1-S8, S10-S12).
    Compliance,
    /// Sensitive data leakage.
    Data,
}

/// The twelve toggleable risk categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskCategory {
    #[serde(rename = "S1")]
    GeneralPolitical,
    #[serde(rename = "S2")]
    SensitivePolitical,
    #[serde(rename = "S3")]
    InsultNationalSymbols,
    #[serde(rename = "S4")]
    HarmToMinors,
    #[serde(rename = "S5")]
    ViolentCrime,
    #[serde(rename = "S6")]
    NonViolentCrime,
    #[serde(rename = "S7")]
    Pornography,
    #[serde(rename = "S8")]
    HateDiscrimination,
    #[serde(rename = "S9")]
    PromptAttack,
    #[serde(rename = "S10")]
    SelfHarm,
    #[serde(rename = "S11")]
    Profanity,
    #[serde(rename = "S12")]
    PrivacyInvasion,
}

impl RiskCategory {
    pub const ALL: [RiskCategory; 12] = [
        RiskCategory::GeneralPolitical,
        RiskCategory::SensitivePolitical,
        RiskCategory::InsultNationalSymbols,
        RiskCategory::HarmToMinors,
        RiskCategory::ViolentCrime,
        RiskCategory::NonViolentCrime,
        RiskCategory::Pornography,
        RiskCategory::HateDiscrimination,
        RiskCategory::PromptAttack,
        RiskCategory::SelfHarm,
        RiskCategory::Profanity,
        RiskCategory::PrivacyInvasion,
    ];

    /// Short code used on the wire (`S1`..`S12`).
    pub fn code(self) -> &'static str {
        match self {
            RiskCategory::GeneralPolitical => "S1",
            RiskCategory::SensitivePolitical => "S2",
            RiskCategory::InsultNationalSymbols => "S3",
            RiskCategory::HarmToMinors => "S4",
            RiskCategory::ViolentCrime => "S5",
            RiskCategory::NonViolentCrime => "S6",
            RiskCategory::Pornography => "S7",
            RiskCategory::HateDiscrimination => "S8",
            RiskCategory::PromptAttack => "S9",
            RiskCategory::SelfHarm => "S10",
            RiskCategory::Profanity => "S11",
            RiskCategory::PrivacyInvasion => "S12",
        }
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            RiskCategory::GeneralPolitical => "General Political Topics",
            RiskCategory::SensitivePolitical => "Sensitive Political Topics",
            RiskCategory::InsultNationalSymbols => "Insult to National Symbols or Leaders",
            RiskCategory::HarmToMinors => "Harm to Minors",
            RiskCategory::ViolentCrime => "Violent Crime",
            RiskCategory::NonViolentCrime => "Non-Violent Crime",
            RiskCategory::Pornography => "Pornography",
            RiskCategory::HateDiscrimination => "Hate & Discrimination",
            RiskCategory::PromptAttack => "Prompt Attacks",
            RiskCategory::SelfHarm => "Self-Harm",
            RiskCategory::Profanity => "Profanity",
            RiskCategory::PrivacyInvasion => "Privacy Invasion",
        }
    }

    /// Parse a code (`S5`) or a full name, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        let v = value.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.code().eq_ignore_ascii_case(v) || c.name().eq_ignore_ascii_case(v))
    }

    /// The dimension this category is reported under.
    pub fn dimension(self) -> Dimension {
        match self {
            RiskCategory::PromptAttack => Dimension::Security,
            _ => Dimension::Compliance,
        }
    }
}

/// Which side of the model call is being screened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Input => "input",
            Direction::Output => "output",
        })
    }
}

/// Named operating point of a protection template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitivityTier {
    High,
    Medium,
    Low,
}

impl Default for SensitivityTier {
    fn default() -> Self {
        SensitivityTier::Medium
    }
}

/// Confidence cut points per tier.
///
/// Higher sensitivity accepts lower model confidence as risk, so
/// `high <= medium <= low` must hold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensitivityThresholds {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl Default for SensitivityThresholds {
    fn default() -> Self {
        Self {
            high: 0.40,
            medium: 0.60,
            low: 0.95,
        }
    }
}

impl SensitivityThresholds {
    /// Threshold for the given tier.
    pub fn for_tier(&self, tier: SensitivityTier) -> f64 {
        match tier {
            SensitivityTier::High => self.high,
            SensitivityTier::Medium => self.medium,
            SensitivityTier::Low => self.low,
        }
    }

    /// Check ordering and range.
    pub fn validate(&self) -> Result<(), GuardrailError> {
        for v in [self.high, self.medium, self.low] {
            if !(0.0..=1.0).contains(&v) {
                return Err(GuardrailError::Config(format!(
                    "sensitivity threshold {v} outside [0, 1]"
                )));
            }
        }
        if !(self.high <= self.medium && self.medium <= self.low) {
            return Err(GuardrailError::Config(format!(
                "thresholds must satisfy high <= medium <= low (got {} / {} / {})",
                self.high, self.medium, self.low
            )));
        }
        Ok(())
    }
}

/// Suggested handling of a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Pass,
    Replace,
    Reject,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Pass => "pass",
            Action::Replace => "replace",
            Action::Reject => "reject",
        })
    }
}

/// Per-level action mapping of a protection template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPolicy {
    pub low: Action,
    pub medium: Action,
    pub high: Action,
}

impl Default for ActionPolicy {
    fn default() -> Self {
        Self {
            low: Action::Replace,
            medium: Action::Replace,
            high: Action::Reject,
        }
    }
}

impl ActionPolicy {
    /// `no_risk` always passes.
    pub fn action_for(&self, level: RiskLevel) -> Action {
        match level {
            RiskLevel::NoRisk => Action::Pass,
            RiskLevel::LowRisk => self.low,
            RiskLevel::MediumRisk => self.medium,
            RiskLevel::HighRisk => self.high,
        }
    }
}

/// What to do when the classifier cannot be reached.
///
/// Defaults to `FailClosed`: the request is blocked rather than silently
/// passed unscreened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionFailurePolicy {
    FailClosed,
    FailOpen,
}

impl Default for DetectionFailurePolicy {
    fn default() -> Self {
        DetectionFailurePolicy::FailClosed
    }
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

/// Organization account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default = "default_true")]
    pub verified: bool,
    /// Requests per second across all keys; 0 means unlimited.
    #[serde(default)]
    pub rate_limit_rps: u32,
}

/// Credential bound to a tenant. Only the digest of the key is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub tenant_id: String,
    pub key_digest: String,
    #[serde(default)]
    pub config_set_id: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Protection template and attached resources
// ---------------------------------------------------------------------------

/// Protection template: category toggles, thresholds and action policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSet {
    pub id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
    /// Categories switched off for this template. Empty means all enabled.
    #[serde(default)]
    pub disabled_categories: BTreeSet<RiskCategory>,
    #[serde(default)]
    pub thresholds: SensitivityThresholds,
    #[serde(default)]
    pub active_tier: SensitivityTier,
    #[serde(default)]
    pub action_policy: ActionPolicy,
    #[serde(default)]
    pub on_detection_unavailable: DetectionFailurePolicy,
    /// Minimum cosine similarity for a knowledge answer.
    #[serde(default = "default_similarity_floor")]
    pub knowledge_similarity_floor: f32,
}

impl ConfigSet {
    pub fn is_enabled(&self, category: RiskCategory) -> bool {
        !self.disabled_categories.contains(&category)
    }

    /// Threshold of the currently active tier.
    pub fn active_threshold(&self) -> f64 {
        self.thresholds.for_tier(self.active_tier)
    }
}

/// Keyword list that forces `no_risk` on match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhitelistEntry {
    pub id: String,
    pub tenant_id: String,
    /// `None` means tenant-global.
    #[serde(default)]
    pub config_set_id: Option<String>,
    pub name: String,
    pub keywords: Vec<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// Keyword list that short-circuits to a configured severity on match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub config_set_id: Option<String>,
    pub name: String,
    pub keywords: Vec<String>,
    #[serde(default = "default_blacklist_severity")]
    pub severity: RiskLevel,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// Canned substitution text keyed by category and level.
///
/// `None` in either key acts as a wildcard during lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseTemplate {
    pub id: String,
    pub config_set_id: String,
    #[serde(default)]
    pub category: Option<RiskCategory>,
    #[serde(default)]
    pub risk_level: Option<RiskLevel>,
    pub content: String,
}

/// Question/answer pair with a precomputed embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub config_set_id: Option<String>,
    #[serde(default)]
    pub is_global: bool,
    #[serde(default)]
    pub category: Option<RiskCategory>,
    pub question: String,
    pub answer: String,
    pub embedding: Vec<f32>,
}

/// Span rewrite applied to DLP matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AnonymizationMethod {
    /// Substitute a fixed string.
    Replace { with: String },
    /// Keep the first/last characters and mask the rest.
    Mask {
        #[serde(default = "default_mask_char")]
        mask_char: char,
        #[serde(default)]
        keep_prefix: usize,
        #[serde(default)]
        keep_suffix: usize,
    },
    /// Replace with a truncated SHA-256 digest.
    Hash,
    /// Delete the span.
    Remove,
}

/// Named sensitive-data pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSecurityEntityType {
    pub id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub config_set_id: Option<String>,
    #[serde(default)]
    pub is_global: bool,
    /// Short code reported as the category (e.g. `ID_CARD`).
    pub code: String,
    #[serde(default)]
    pub name: String,
    pub pattern: String,
    pub risk_level: RiskLevel,
    pub anonymization: AnonymizationMethod,
    #[serde(default = "default_true")]
    pub check_input: bool,
    #[serde(default = "default_true")]
    pub check_output: bool,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// Sliding-window ban rule of a protection template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanPolicy {
    pub config_set_id: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_blacklist_severity")]
    pub trigger_risk_level: RiskLevel,
    pub trigger_count: u32,
    pub time_window_minutes: u32,
    pub ban_duration_minutes: u32,
}

/// Active or expired ban of an end user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BannedUser {
    pub tenant_id: String,
    pub end_user_id: String,
    pub banned_until: DateTime<Utc>,
    pub reason: String,
}

impl BannedUser {
    /// Expiry is lazy: a record past its `banned_until` is ignored.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.banned_until > now
    }
}

/// Reasoning-field convention of an upstream provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Generic OpenAI-compatible server (`reasoning_content` or `reasoning`).
    OpenAi,
    /// `reasoning_content`.
    DeepSeek,
    /// `reasoning`.
    OpenRouter,
}

impl Default for ProviderKind {
    fn default() -> Self {
        ProviderKind::OpenAi
    }
}

/// Target model used in gateway mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamModelConfig {
    pub id: String,
    pub tenant_id: String,
    /// Model name clients request.
    pub model_name: String,
    /// Model name sent upstream; defaults to `model_name`.
    #[serde(default)]
    pub upstream_model_name: Option<String>,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default = "default_true")]
    pub block_on_input_risk: bool,
    #[serde(default = "default_true")]
    pub block_on_output_risk: bool,
    #[serde(default = "default_true")]
    pub enable_reasoning_detection: bool,
    /// Characters accumulated between output detections.
    #[serde(default = "default_stream_chunk_size")]
    pub stream_chunk_size: usize,
}

impl UpstreamModelConfig {
    pub fn target_model(&self) -> &str {
        self.upstream_model_name
            .as_deref()
            .unwrap_or(&self.model_name)
    }
}

fn default_true() -> bool {
    true
}

fn default_blacklist_severity() -> RiskLevel {
    RiskLevel::HighRisk
}

fn default_similarity_floor() -> f32 {
    0.70
}

fn default_mask_char() -> char {
    '*'
}

fn default_stream_chunk_size() -> usize {
    50
}
