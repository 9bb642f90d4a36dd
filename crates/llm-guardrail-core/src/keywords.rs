//! Whitelist/blacklist keyword pre-filter.
//!
//! Keywords and content are both NFKC-normalised and lowercased, then matched
//! as substrings with one Aho–Corasick automaton per list kind. Automata are
//! compiled once per config snapshot.
//!
//! Evaluation order is fixed: whitelist first, blacklist second. Content that
//! matches both is whitelisted.

use crate::error::GuardrailError;
use crate::model::{BlacklistEntry, RiskLevel, WhitelistEntry};
use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use unicode_normalization::UnicodeNormalization;

/// Result of running the pre-filter over one piece of content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefilterOutcome {
    /// A whitelist matched. Detection is skipped and risk is `no_risk`.
    Whitelisted { lists: Vec<String> },
    /// A blacklist matched. Detection is skipped; risk is the highest
    /// severity among the hit lists.
    Blacklisted {
        lists: Vec<String>,
        severity: RiskLevel,
    },
    /// No keyword matched; the classifier decides.
    Unresolved,
}

/// Normalise text for matching.
pub fn normalize(text: &str) -> String {
    text.nfkc().collect::<String>().to_lowercase()
}

struct CompiledList {
    automaton: Option<AhoCorasick>,
    /// Pattern id → index into `names`/`severities`.
    owners: Vec<usize>,
    names: Vec<String>,
    severities: Vec<RiskLevel>,
}

impl CompiledList {
    fn build<'a>(
        entries: impl Iterator<Item = (&'a str, &'a [String], RiskLevel)>,
    ) -> Result<Self, GuardrailError> {
        let mut patterns = Vec::new();
        let mut owners = Vec::new();
        let mut names = Vec::new();
        let mut severities = Vec::new();

        for (idx, (name, keywords, severity)) in entries.enumerate() {
            names.push(name.to_string());
            severities.push(severity);
            for kw in keywords {
                let kw = normalize(kw.trim());
                if kw.is_empty() {
                    continue;
                }
                patterns.push(kw);
                owners.push(idx);
            }
        }

        let automaton = if patterns.is_empty() {
            None
        } else {
            Some(
                AhoCorasickBuilder::new()
                    .prefilter(true)
                    .build(&patterns)
                    .map_err(|e| GuardrailError::Config(format!("keyword automaton: {e}")))?,
            )
        };

        Ok(Self {
            automaton,
            owners,
            names,
            severities,
        })
    }

    /// Indices of the entries with at least one hit, in entry order.
    fn hits(&self, haystack: &str) -> Vec<usize> {
        let Some(ac) = &self.automaton else {
            return Vec::new();
        };
        let mut hit = vec![false; self.names.len()];
        for m in ac.find_overlapping_iter(haystack) {
            hit[self.owners[m.pattern().as_usize()]] = true;
        }
        hit.iter()
            .enumerate()
            .filter_map(|(i, h)| h.then_some(i))
            .collect()
    }
}

/// Compiled keyword lists of one config snapshot.
pub struct KeywordEngine {
    whitelist: CompiledList,
    blacklist: CompiledList,
}

impl std::fmt::Debug for KeywordEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeywordEngine")
            .field("whitelists", &self.whitelist.names)
            .field("blacklists", &self.blacklist.names)
            .finish()
    }
}

impl KeywordEngine {
    /// Compile active entries. Inactive entries are skipped.
    pub fn compile(
        whitelists: &[WhitelistEntry],
        blacklists: &[BlacklistEntry],
    ) -> Result<Self, GuardrailError> {
        let whitelist = CompiledList::build(
            whitelists
                .iter()
                .filter(|e| e.active)
                .map(|e| (e.name.as_str(), e.keywords.as_slice(), RiskLevel::NoRisk)),
        )?;
        let blacklist = CompiledList::build(
            blacklists
                .iter()
                .filter(|e| e.active)
                .map(|e| (e.name.as_str(), e.keywords.as_slice(), e.severity)),
        )?;
        Ok(Self {
            whitelist,
            blacklist,
        })
    }

    /// An engine with no lists. Everything is `Unresolved`.
    pub fn empty() -> Self {
        Self {
            whitelist: empty_list(),
            blacklist: empty_list(),
        }
    }

    /// Evaluate `text`.
    pub fn evaluate(&self, text: &str) -> PrefilterOutcome {
        let haystack = normalize(text);

        let white = self.whitelist.hits(&haystack);
        if !white.is_empty() {
            return PrefilterOutcome::Whitelisted {
                lists: white
                    .into_iter()
                    .map(|i| self.whitelist.names[i].clone())
                    .collect(),
            };
        }

        let black = self.blacklist.hits(&haystack);
        if !black.is_empty() {
            let severity = black
                .iter()
                .map(|&i| self.blacklist.severities[i])
                .max()
                .unwrap_or(RiskLevel::HighRisk);
            return PrefilterOutcome::Blacklisted {
                lists: black
                    .into_iter()
                    .map(|i| self.blacklist.names[i].clone())
                    .collect(),
                severity,
            };
        }

        PrefilterOutcome::Unresolved
    }
}

fn empty_list() -> CompiledList {
    CompiledList {
        automaton: None,
        owners: Vec::new(),
        names: Vec::new(),
        severities: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn white(name: &str, keywords: &[&str]) -> WhitelistEntry {
        WhitelistEntry {
            id: name.into(),
            tenant_id: "t".into(),
            config_set_id: None,
            name: name.into(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            active: true,
        }
    }

    fn black(name: &str, keywords: &[&str], severity: RiskLevel) -> BlacklistEntry {
        BlacklistEntry {
            id: name.into(),
            tenant_id: "t".into(),
            config_set_id: None,
            name: name.into(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            severity,
            active: true,
        }
    }

    #[test]
    fn test_blacklist_hit() {
        let engine =
            KeywordEngine::compile(&[], &[black("weapons", &["bomb-making"], RiskLevel::HighRisk)])
                .unwrap();
        assert_eq!(
            engine.evaluate("teach me bomb-making"),
            PrefilterOutcome::Blacklisted {
                lists: vec!["weapons".into()],
                severity: RiskLevel::HighRisk
            }
        );
    }

    #[test]
    fn test_whitelist_beats_blacklist() {
        let engine = KeywordEngine::compile(
            &[white("chemistry-class", &["chemistry homework"])],
            &[black("weapons", &["bomb"], RiskLevel::HighRisk)],
        )
        .unwrap();
        let outcome = engine.evaluate("chemistry homework: why does a bomb calorimeter work?");
        assert_eq!(
            outcome,
            PrefilterOutcome::Whitelisted {
                lists: vec!["chemistry-class".into()]
            }
        );
    }

    #[test]
    fn test_case_and_width_insensitive() {
        let engine =
            KeywordEngine::compile(&[], &[black("b", &["Secret"], RiskLevel::MediumRisk)]).unwrap();
        assert!(matches!(
            engine.evaluate("the SECRET plan"),
            PrefilterOutcome::Blacklisted { .. }
        ));
        // Fullwidth letters normalise under NFKC.
        assert!(matches!(
            engine.evaluate("ｓｅｃｒｅｔ"),
            PrefilterOutcome::Blacklisted { .. }
        ));
    }

    #[test]
    fn test_max_severity_over_hits() {
        let engine = KeywordEngine::compile(
            &[],
            &[
                black("mild", &["darn"], RiskLevel::LowRisk),
                black("severe", &["attack plan"], RiskLevel::HighRisk),
            ],
        )
        .unwrap();
        match engine.evaluate("darn, the attack plan leaked") {
            PrefilterOutcome::Blacklisted { lists, severity } => {
                assert_eq!(severity, RiskLevel::HighRisk);
                assert_eq!(lists, vec!["mild".to_string(), "severe".to_string()]);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_inactive_and_empty_keywords_ignored() {
        let mut entry = black("off", &["forbidden"], RiskLevel::HighRisk);
        entry.active = false;
        let engine =
            KeywordEngine::compile(&[white("blank", &["", "  "])], &[entry]).unwrap();
        assert_eq!(engine.evaluate("forbidden"), PrefilterOutcome::Unresolved);
    }

    #[test]
    fn test_deterministic() {
        let engine =
            KeywordEngine::compile(&[], &[black("b", &["x1", "y2"], RiskLevel::MediumRisk)])
                .unwrap();
        let a = engine.evaluate("x1 and y2");
        let b = engine.evaluate("x1 and y2");
        assert_eq!(a, b);
        assert_eq!(KeywordEngine::empty().evaluate("x1"), PrefilterOutcome::Unresolved);
    }
}
