//! Deterministic sensitive-data scanner.
//!
//! Each [`DataSecurityEntityType`] contributes a regex, a risk level and an
//! anonymization method. Results are not confidence-gated. Anonymization is
//! independent of the block decision: a passing request can still have its
//! spans rewritten.

use crate::error::GuardrailError;
use crate::model::{AnonymizationMethod, DataSecurityEntityType, Direction, RiskLevel};
use regex::Regex;
use sha2::{Digest, Sha256};

const HASH_PREFIX_LEN: usize = 16;

struct CompiledEntity {
    code: String,
    regex: Regex,
    risk_level: RiskLevel,
    method: AnonymizationMethod,
    check_input: bool,
    check_output: bool,
}

impl CompiledEntity {
    fn applies_to(&self, direction: Direction) -> bool {
        match direction {
            Direction::Input => self.check_input,
            Direction::Output => self.check_output,
        }
    }
}

/// Outcome of a DLP scan.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DlpOutcome {
    pub risk_level: RiskLevel,
    /// Entity codes that matched, in first-match order without duplicates.
    pub categories: Vec<String>,
    /// Rewritten text, present only when something matched.
    pub anonymized_text: Option<String>,
}

impl DlpOutcome {
    pub fn is_hit(&self) -> bool {
        !self.categories.is_empty()
    }
}

/// Compiled entity types of one config snapshot.
pub struct DlpScanner {
    entities: Vec<CompiledEntity>,
}

impl std::fmt::Debug for DlpScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entities.iter().map(|e| &e.code))
            .finish()
    }
}

impl DlpScanner {
    pub fn compile(entity_types: &[DataSecurityEntityType]) -> Result<Self, GuardrailError> {
        let entities = entity_types
            .iter()
            .filter(|e| e.active)
            .map(|e| {
                let regex = Regex::new(&e.pattern).map_err(|err| {
                    GuardrailError::Config(format!("entity type '{}': {err}", e.code))
                })?;
                Ok(CompiledEntity {
                    code: e.code.clone(),
                    regex,
                    risk_level: e.risk_level,
                    method: e.anonymization.clone(),
                    check_input: e.check_input,
                    check_output: e.check_output,
                })
            })
            .collect::<Result<Vec<_>, GuardrailError>>()?;
        Ok(Self { entities })
    }

    pub fn empty() -> Self {
        Self {
            entities: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Scan `text` for entities enabled in `direction`.
    pub fn scan(&self, text: &str, direction: Direction) -> DlpOutcome {
        // (start, end, entity index)
        let mut spans: Vec<(usize, usize, usize)> = Vec::new();
        for (idx, entity) in self.entities.iter().enumerate() {
            if !entity.applies_to(direction) {
                continue;
            }
            for m in entity.regex.find_iter(text) {
                if m.start() < m.end() {
                    spans.push((m.start(), m.end(), idx));
                }
            }
        }
        if spans.is_empty() {
            return DlpOutcome::default();
        }

        // Earliest start wins; on ties the longer span wins.
        spans.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        let mut risk_level = RiskLevel::NoRisk;
        let mut categories: Vec<String> = Vec::new();

        for (start, end, idx) in spans {
            if start < cursor {
                continue;
            }
            let entity = &self.entities[idx];
            out.push_str(&text[cursor..start]);
            out.push_str(&anonymize(&text[start..end], &entity.method));
            cursor = end;

            risk_level = risk_level.max(entity.risk_level);
            if !categories.contains(&entity.code) {
                categories.push(entity.code.clone());
            }
        }
        out.push_str(&text[cursor..]);

        DlpOutcome {
            risk_level,
            categories,
            anonymized_text: Some(out),
        }
    }
}

/// Rewrite one matched span.
pub fn anonymize(span: &str, method: &AnonymizationMethod) -> String {
    match method {
        AnonymizationMethod::Replace { with } => with.clone(),
        AnonymizationMethod::Remove => String::new(),
        AnonymizationMethod::Hash => {
            let digest = hex::encode(Sha256::digest(span.as_bytes()));
            digest[..HASH_PREFIX_LEN].to_string()
        }
        AnonymizationMethod::Mask {
            mask_char,
            keep_prefix,
            keep_suffix,
        } => {
            let chars: Vec<char> = span.chars().collect();
            let n = chars.len();
            if keep_prefix + keep_suffix >= n {
                return std::iter::repeat(*mask_char).take(n).collect();
            }
            chars
                .iter()
                .enumerate()
                .map(|(i, c)| {
                    if i < *keep_prefix || i >= n - keep_suffix {
                        *c
                    } else {
                        *mask_char
                    }
                })
                .collect()
        }
    }
}
