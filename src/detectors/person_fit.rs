//! IRT person-fit checks.
//!
//! Observed correctness is compared with a two-parameter logistic model
//! `P = 1 / (1 + e^{-a(θ - b)})`, per scored section:
//!
//! - **Flat variability**: the mean squared standardized residual `V` is
//!   unusually small. `z_var = (V - 1) / SE(V)` with the exact standard error
//!   under the model.
//! - **Hard-item over-performance**: correct rate on items the model gives
//!   less than `probability_of_correctness_threshold` exceeds that threshold
//!   and the count is `deviation_from_mean_sigma` standard errors above
//!   expectation.
//! - **Misfit**: the standardized log-likelihood `lz` is strongly negative.
//!
//! Wrong-to-right erasures concentrated on hard items raise the confidence of
//! any person-fit flag on the candidate.

use crate::config::PersonFitConfig;
use crate::detectors::revision::RevisionSummary;
use crate::flag::{
    Abstention, AbstentionReason, DetectorKind, DetectorOutput, Evidence, Flag, FlagKind,
};
use crate::response::{CandidateSession, ResponseEvent};
use crate::stats::{logistic, margin_confidence};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Probabilities are kept this far from 0 and 1.
const P_EPSILON: f64 = 1e-6;

/// Confidence added when erasures point the same way.
const ERASURE_BOOST: f64 = 0.1;

/// Externally estimated abilities (θ) keyed by candidate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AbilityEstimates {
    abilities: BTreeMap<String, f64>,
}

impl AbilityEstimates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, candidate_id: &str, theta: f64) {
        self.abilities.insert(candidate_id.to_string(), theta);
    }

    /// Finite ability of a candidate.
    pub fn get(&self, candidate_id: &str) -> Option<f64> {
        self.abilities
            .get(candidate_id)
            .copied()
            .filter(|theta| theta.is_finite())
    }

    pub fn len(&self) -> usize {
        self.abilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.abilities.is_empty()
    }
}

impl FromIterator<(String, f64)> for AbilityEstimates {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self {
            abilities: iter.into_iter().collect(),
        }
    }
}

/// IRT parameters of one item.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ItemParameter {
    /// b-parameter.
    pub difficulty: f64,
    /// a-parameter.
    #[serde(default = "default_discrimination")]
    pub discrimination: f64,
}

fn default_discrimination() -> f64 {
    1.0
}

impl ItemParameter {
    pub fn new(difficulty: f64, discrimination: f64) -> Self {
        Self {
            difficulty,
            discrimination,
        }
    }

    /// Probability of a correct answer at ability `theta`.
    pub fn probability(&self, theta: f64) -> f64 {
        logistic(self.discrimination * (theta - self.difficulty)).clamp(P_EPSILON, 1.0 - P_EPSILON)
    }
}

/// Item parameters that override the difficulty carried on events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemParameters {
    items: BTreeMap<String, ItemParameter>,
}

impl ItemParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, item_id: &str, parameter: ItemParameter) {
        self.items.insert(item_id.to_string(), parameter);
    }

    /// Parameters for an event's item, falling back to its own difficulty.
    pub fn for_event(&self, event: &ResponseEvent) -> ItemParameter {
        self.items
            .get(&event.item_id)
            .copied()
            .unwrap_or(ItemParameter::new(event.item_difficulty, 1.0))
    }
}

/// Person-fit condition that fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PersonFitTrigger {
    FlatVariability,
    HardItemOverperformance,
    Misfit,
}

/// Evidence for a person-fit flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonFitEvidence {
    pub section: String,
    pub scored_items: usize,
    pub ability: f64,
    /// Mean squared standardized residual.
    pub variance: f64,
    pub variance_z: Option<f64>,
    /// `lz` statistic.
    pub person_fit_stat: Option<f64>,
    pub hard_items: usize,
    pub hard_correct: usize,
    pub hard_expected: f64,
    pub hard_z: Option<f64>,
    pub triggers: Vec<PersonFitTrigger>,
    pub wr_te_ratio: Option<f64>,
    pub hard_item_wr: usize,
    /// Confidence raised by wrong-to-right erasures on hard items.
    pub erasure_boost: bool,
}

/// Section-level statistics.
#[derive(Debug, Clone, PartialEq)]
struct SectionFit {
    scored_items: usize,
    variance: f64,
    variance_z: Option<f64>,
    lz: Option<f64>,
    hard_items: usize,
    hard_correct: usize,
    hard_expected: f64,
    hard_z: Option<f64>,
}

/// Person-fit detector.
pub struct PersonFitDetector<'a> {
    config: &'a PersonFitConfig,
}

impl<'a> PersonFitDetector<'a> {
    pub fn new(config: &'a PersonFitConfig) -> Self {
        Self { config }
    }

    /// Check every section of a session. `revisions` supplies the erasure
    /// tallies used for the confidence boost.
    pub fn detect(
        &self,
        session: &CandidateSession,
        ability: Option<f64>,
        parameters: &ItemParameters,
        revisions: Option<&RevisionSummary>,
    ) -> DetectorOutput {
        let mut output = DetectorOutput::new();
        let Some(theta) = ability else {
            output.abstain(Abstention::for_candidate(
                DetectorKind::PersonFit,
                &session.candidate_id,
                "person-fit",
                AbstentionReason::MissingAbility,
            ));
            return output;
        };

        let mut sections: BTreeMap<&str, Vec<&ResponseEvent>> = BTreeMap::new();
        for event in session.final_answers() {
            if !event.is_omitted() {
                sections.entry(event.section()).or_default().push(event);
            }
        }

        let wr_te_ratio = revisions.and_then(|r| r.wr_te_ratio);
        let hard_item_wr = revisions.map_or(0, |r| r.hard_item_wr);
        let erasure_boost = wr_te_ratio.map_or(false, |ratio| {
            ratio >= self.config.wr_te_ratio_threshold && hard_item_wr > 0
        });

        for (section, events) in sections {
            if events.len() < self.config.min_items_per_section {
                output.abstain(Abstention::for_candidate(
                    DetectorKind::PersonFit,
                    &session.candidate_id,
                    format!("person-fit/{}", section),
                    AbstentionReason::InsufficientData {
                        required: self.config.min_items_per_section,
                        available: events.len(),
                    },
                ));
                continue;
            }

            let fit = self.section_fit(theta, &events, parameters);
            self.record_abstentions(session, section, &fit, &mut output);

            let sigma = self.config.deviation_from_mean_sigma;
            let p_threshold = self.config.probability_of_correctness_threshold;
            let mut triggers = Vec::new();
            let mut confidence: f64 = 0.0;

            if let Some(z) = fit.variance_z.filter(|&z| z <= -sigma) {
                triggers.push(PersonFitTrigger::FlatVariability);
                confidence = confidence.max(margin_confidence(-z, sigma));
            }
            if let Some(z) = fit.hard_z {
                let rate = fit.hard_correct as f64 / fit.hard_items as f64;
                if rate > p_threshold && z >= sigma {
                    triggers.push(PersonFitTrigger::HardItemOverperformance);
                    confidence = confidence.max(margin_confidence(z, sigma));
                }
            }
            if let Some(lz) = fit.lz.filter(|&lz| lz <= -sigma) {
                triggers.push(PersonFitTrigger::Misfit);
                confidence = confidence.max(margin_confidence(-lz, sigma));
            }

            if triggers.is_empty() {
                continue;
            }
            if erasure_boost {
                confidence += ERASURE_BOOST;
            }

            let last_ms = events.iter().map(|e| e.timestamp_ms).max().unwrap_or(0);
            let flag = Flag::for_candidate(
                FlagKind::PersonFit,
                &session.candidate_id,
                confidence,
                section,
                Evidence::PersonFit(PersonFitEvidence {
                    section: section.to_string(),
                    scored_items: fit.scored_items,
                    ability: theta,
                    variance: fit.variance,
                    variance_z: fit.variance_z,
                    person_fit_stat: fit.lz,
                    hard_items: fit.hard_items,
                    hard_correct: fit.hard_correct,
                    hard_expected: fit.hard_expected,
                    hard_z: fit.hard_z,
                    triggers,
                    wr_te_ratio,
                    hard_item_wr,
                    erasure_boost,
                }),
            )
            .with_session(&session.session_id)
            .observed_at(last_ms);
            output.flag(flag);
        }

        log::debug!(
            "Person-fit: candidate={}, theta={:.3}, flags={}",
            session.candidate_id,
            theta,
            output.flags.len()
        );
        output
    }

    fn section_fit(
        &self,
        theta: f64,
        events: &[&ResponseEvent],
        parameters: &ItemParameters,
    ) -> SectionFit {
        let n = events.len() as f64;
        let mut sum_z2 = 0.0;
        let mut var_z2 = 0.0;
        let mut l0 = 0.0;
        let mut l_expected = 0.0;
        let mut l_variance = 0.0;
        let mut hard_items = 0;
        let mut hard_correct = 0;
        let mut hard_expected = 0.0;
        let mut hard_variance = 0.0;

        for event in events {
            let p = parameters.for_event(event).probability(theta);
            let q = 1.0 - p;
            let x = if event.is_correct { 1.0 } else { 0.0 };

            sum_z2 += (x - p) * (x - p) / (p * q);
            var_z2 += q * q / p + p * p / q - 1.0;

            l0 += x * p.ln() + (1.0 - x) * q.ln();
            l_expected += p * p.ln() + q * q.ln();
            l_variance += p * q * (p / q).ln().powi(2);

            if p < self.config.probability_of_correctness_threshold {
                hard_items += 1;
                hard_expected += p;
                hard_variance += p * q;
                if event.is_correct {
                    hard_correct += 1;
                }
            }
        }

        let variance = sum_z2 / n;
        let se = var_z2.max(0.0).sqrt() / n;
        let variance_z = (se > 0.0).then(|| (variance - 1.0) / se);
        let lz = (l_variance > 0.0).then(|| (l0 - l_expected) / l_variance.sqrt());
        let hard_z = (hard_items >= self.config.min_hard_items && hard_variance > 0.0)
            .then(|| (hard_correct as f64 - hard_expected) / hard_variance.sqrt());

        SectionFit {
            scored_items: events.len(),
            variance,
            variance_z,
            lz,
            hard_items,
            hard_correct,
            hard_expected,
            hard_z,
        }
    }

    fn record_abstentions(
        &self,
        session: &CandidateSession,
        section: &str,
        fit: &SectionFit,
        output: &mut DetectorOutput,
    ) {
        if fit.variance_z.is_none() {
            output.abstain(Abstention::for_candidate(
                DetectorKind::PersonFit,
                &session.candidate_id,
                format!("variance/{}", section),
                AbstentionReason::DegenerateDistribution {
                    detail: "zero residual variance".to_string(),
                },
            ));
        }
        if fit.lz.is_none() {
            output.abstain(Abstention::for_candidate(
                DetectorKind::PersonFit,
                &session.candidate_id,
                format!("lz/{}", section),
                AbstentionReason::DegenerateDistribution {
                    detail: "zero log-likelihood variance".to_string(),
                },
            ));
        }
        if fit.hard_items < self.config.min_hard_items {
            output.abstain(Abstention::for_candidate(
                DetectorKind::PersonFit,
                &session.candidate_id,
                format!("hard-items/{}", section),
                AbstentionReason::InsufficientData {
                    required: self.config.min_hard_items,
                    available: fit.hard_items,
                },
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::revision::TransitionCounts;
    use approx::assert_relative_eq;

    fn session(items: &[(f64, bool)]) -> CandidateSession {
        let events = items
            .iter()
            .enumerate()
            .map(|(i, &(b, correct))| {
                ResponseEvent::new("A001", "S1", &format!("Q{}", i + 1), "A", correct, i as u64 * 30_000, 20_000)
                    .with_difficulty(b)
            })
            .collect();
        CandidateSession::frozen("T1", "A001", "S1", events)
    }

    /// Easy items right, hard items wrong, no noise.
    fn guttman(n: usize) -> CandidateSession {
        let items: Vec<(f64, bool)> = (0..n)
            .map(|i| if i % 2 == 0 { (-1.0, true) } else { (1.0, false) })
            .collect();
        session(&items)
    }

    #[test]
    fn test_probability() {
        let param = ItemParameter::new(0.0, 1.0);
        assert_relative_eq!(param.probability(0.0), 0.5);
        assert!(ItemParameter::new(1.0, 1.0).probability(-1.0) < 0.3);
        assert!(ItemParameter::new(0.0, 1.0).probability(100.0) < 1.0);
    }

    #[test]
    fn test_missing_ability_abstains() {
        let config = PersonFitConfig::default();
        let output =
            PersonFitDetector::new(&config).detect(&guttman(20), None, &ItemParameters::new(), None);
        assert!(output.flags.is_empty());
        assert_eq!(output.abstentions[0].reason, AbstentionReason::MissingAbility);
    }

    #[test]
    fn test_too_few_items_abstains() {
        let config = PersonFitConfig::default();
        let output = PersonFitDetector::new(&config).detect(
            &guttman(4),
            Some(0.0),
            &ItemParameters::new(),
            None,
        );
        assert!(output.flags.is_empty());
        assert_eq!(
            output.abstentions[0].reason,
            AbstentionReason::InsufficientData {
                required: 5,
                available: 4
            }
        );
    }

    #[test]
    fn test_flat_pattern_flagged() {
        let config = PersonFitConfig::default();
        let output = PersonFitDetector::new(&config).detect(
            &guttman(20),
            Some(0.0),
            &ItemParameters::new(),
            None,
        );
        assert_eq!(output.flags.len(), 1);
        match &output.flags[0].evidence {
            Evidence::PersonFit(e) => {
                assert!(e.triggers.contains(&PersonFitTrigger::FlatVariability));
                assert!(e.variance < 0.5);
                assert_eq!(e.section, "all");
            }
            other => panic!("unexpected evidence: {other:?}"),
        }
    }

    #[test]
    fn test_hard_item_overperformance() {
        let config = PersonFitConfig::default();
        let mut items = vec![(1.0, true); 8];
        items.extend([(-2.0, true); 4]);
        let output = PersonFitDetector::new(&config).detect(
            &session(&items),
            Some(-1.0),
            &ItemParameters::new(),
            None,
        );
        assert_eq!(output.flags.len(), 1);
        match &output.flags[0].evidence {
            Evidence::PersonFit(e) => {
                assert!(e.triggers.contains(&PersonFitTrigger::HardItemOverperformance));
                assert_eq!(e.hard_items, 8);
                assert_eq!(e.hard_correct, 8);
                assert!(e.hard_z.unwrap() > 2.0);
            }
            other => panic!("unexpected evidence: {other:?}"),
        }
    }

    #[test]
    fn test_item_parameters_override_event_difficulty() {
        let config = PersonFitConfig::default();
        // Events say easy; parameters say hard
        let items = vec![(-2.0, true); 8];
        let mut params = ItemParameters::new();
        for i in 1..=8 {
            params.insert(&format!("Q{}", i), ItemParameter::new(1.5, 1.0));
        }
        let detector = PersonFitDetector::new(&config);
        let without = detector.detect(&session(&items), Some(-1.0), &ItemParameters::new(), None);
        let with = detector.detect(&session(&items), Some(-1.0), &params, None);
        assert!(without.flags.is_empty());
        assert_eq!(with.flags.len(), 1);
    }

    #[test]
    fn test_erasure_boost() {
        let config = PersonFitConfig::default();
        let revisions = RevisionSummary {
            transitions: TransitionCounts {
                wr: 4,
                ww: 0,
                rw: 0,
                rr: 0,
            },
            wr_te_ratio: Some(1.0),
            hard_item_wr: 3,
            ..RevisionSummary::default()
        };
        let detector = PersonFitDetector::new(&config);
        let s = guttman(20);
        let plain = detector.detect(&s, Some(0.0), &ItemParameters::new(), None);
        let boosted = detector.detect(&s, Some(0.0), &ItemParameters::new(), Some(&revisions));
        let plain = &plain.flags[0];
        let boosted = &boosted.flags[0];
        assert!(boosted.confidence > plain.confidence || boosted.confidence == 1.0);
        match &boosted.evidence {
            Evidence::PersonFit(e) => assert!(e.erasure_boost),
            other => panic!("unexpected evidence: {other:?}"),
        }
    }

    #[test]
    fn test_typical_pattern_not_flagged() {
        let config = PersonFitConfig::default();
        // Mixed outcomes roughly in line with P = 0.5
        let items: Vec<(f64, bool)> = (0..20).map(|i| (0.0, i % 2 == 0)).collect();
        let output = PersonFitDetector::new(&config).detect(
            &session(&items),
            Some(0.0),
            &ItemParameters::new(),
            None,
        );
        assert!(output.flags.is_empty());
    }

    #[test]
    fn test_sections_checked_separately() {
        let config = PersonFitConfig::default();
        let mut s = guttman(20);
        for (i, event) in s.events.iter_mut().enumerate() {
            event.section = Some(if i < 17 { "math" } else { "verbal" }.to_string());
        }
        let output =
            PersonFitDetector::new(&config).detect(&s, Some(0.0), &ItemParameters::new(), None);
        assert!(output
            .abstentions
            .iter()
            .any(|a| a.statistic == "person-fit/verbal"));
        assert!(output.flags.iter().all(|f| match &f.evidence {
            Evidence::PersonFit(e) => e.section == "math",
            _ => false,
        }));
    }
}
