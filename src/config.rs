//! Detection configuration.
//!
//! One immutable [`DetectionConfig`] is supplied per detection run. It is
//! produced by an external settings surface, validated once, and then passed
//! by reference into every detector.

use crate::error::ConfigError;
use crate::flag::FlagKind;
use crate::detectors::similarity::SimilarityMetric;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Master configuration for a detection run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Response-time checks.
    pub timing: TimingConfig,

    /// Answer-change checks.
    pub revision: RevisionConfig,

    /// Repeating answer-choice checks.
    pub sequential: SequentialConfig,

    /// IRT residual checks.
    pub person_fit: PersonFitConfig,

    /// Cross-candidate answer similarity.
    pub similarity: SimilarityConfig,

    /// Risk scoring and deduplication.
    pub aggregation: AggregationConfig,
}

/// Timing detector configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Responses faster than this are rapid guesses (0 disables).
    pub rapid_guessing_threshold_seconds: f64,

    /// Pre-knowledge when OS < -threshold.
    pub item_pre_knowledge_os_threshold: f64,

    /// Harvesting when OS > threshold.
    pub item_harvesting_os_threshold: f64,

    /// Flagged responses needed inside one window.
    pub anomaly_successive_count: u32,

    /// Sliding window width.
    pub anomaly_time_interval_seconds: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            rapid_guessing_threshold_seconds: 5.0,
            item_pre_knowledge_os_threshold: 3.0,
            item_harvesting_os_threshold: 4.0,
            anomaly_successive_count: 5,
            anomaly_time_interval_seconds: 60.0,
        }
    }
}

/// Revision pattern detector configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RevisionConfig {
    /// Consecutive revisions closer than this are rapid.
    pub rapid_revision_seconds: f64,

    /// Percent of attempted items revised before the candidate is flagged.
    pub answer_change_percentage_threshold: f64,

    /// Items with difficulty above this count as hard for WR tallies.
    pub hard_item_difficulty: f64,
}

impl Default for RevisionConfig {
    fn default() -> Self {
        Self {
            rapid_revision_seconds: 3.0,
            answer_change_percentage_threshold: 30.0,
            hard_item_difficulty: 1.0,
        }
    }
}

/// Sequential pattern detector configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequentialConfig {
    /// Minimum run length; also the largest cycle period searched.
    pub pattern_length: usize,

    /// Z-score that lifts a pattern into the high band.
    pub z_score_threshold: f64,
}

impl Default for SequentialConfig {
    fn default() -> Self {
        Self {
            pattern_length: 6,
            z_score_threshold: 2.5,
        }
    }
}

/// Person-fit detector configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonFitConfig {
    /// Standard errors a statistic must move before it counts.
    pub deviation_from_mean_sigma: f64,

    /// Items the model gives less than this chance are hard for the candidate.
    pub probability_of_correctness_threshold: f64,

    /// Wrong-to-right share of all erasures that raises suspicion.
    pub wr_te_ratio_threshold: f64,

    /// Scored items needed per section.
    pub min_items_per_section: usize,

    /// Hard items needed for the over-performance check.
    pub min_hard_items: usize,
}

impl Default for PersonFitConfig {
    fn default() -> Self {
        Self {
            deviation_from_mean_sigma: 2.0,
            probability_of_correctness_threshold: 0.3,
            wr_te_ratio_threshold: 0.75,
            min_items_per_section: 5,
            min_hard_items: 3,
        }
    }
}

/// Pairwise similarity configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Per-metric flag thresholds. Metrics without an entry never fire.
    pub thresholds: BTreeMap<SimilarityMetric, f64>,

    /// Aligned items a pair needs before any metric is computed. Pairs with
    /// identical answer sequences skip this check.
    pub min_common_items: usize,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        let thresholds = BTreeMap::from([
            (SimilarityMetric::IdenticalIncorrect, 0.65),
            (SimilarityMetric::LongestRun, 15.0),
            (SimilarityMetric::LongestIncorrectRun, 6.0),
            (SimilarityMetric::LongestIncorrectRunWithOmissions, 8.0),
            (SimilarityMetric::JointMatch, 0.9),
            (SimilarityMetric::G2, 60.0),
        ]);
        Self {
            thresholds,
            min_common_items: 10,
        }
    }
}

impl SimilarityConfig {
    pub fn threshold(&self, metric: SimilarityMetric) -> Option<f64> {
        self.thresholds.get(&metric).copied()
    }
}

/// Aggregation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Weight of each flag kind in the risk score (0.0 - 1.0).
    pub weights: BTreeMap<FlagKind, f64>,

    /// Width of the event-clock slots in which repeated observations of
    /// the same flag collapse into one.
    pub dedup_window_ms: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        let weights = BTreeMap::from([
            (FlagKind::PairwiseSimilarity, 1.0),
            (FlagKind::PersonFit, 0.9),
            (FlagKind::PreKnowledge, 0.85),
            (FlagKind::TimeWindowAnomaly, 0.8),
            (FlagKind::Harvesting, 0.8),
            (FlagKind::SequentialPattern, 0.75),
            (FlagKind::RapidGuessing, 0.6),
            (FlagKind::FlipFlop, 0.5),
            (FlagKind::AnswerChange, 0.5),
            (FlagKind::RapidRevision, 0.4),
        ]);
        Self {
            weights,
            dedup_window_ms: 30_000,
        }
    }
}

impl AggregationConfig {
    /// Weight of a kind; kinds without an entry weigh 0.5.
    pub fn weight(&self, kind: FlagKind) -> f64 {
        self.weights.get(&kind).copied().unwrap_or(0.5)
    }
}

impl DetectionConfig {
    /// Parse from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Load(e.to_string()))
    }

    /// Load from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigError::Load(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json(&json)
    }

    /// Serialize to pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Check every field against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.timing;
        non_negative("timing.rapid_guessing_threshold_seconds", t.rapid_guessing_threshold_seconds)?;
        non_negative("timing.item_pre_knowledge_os_threshold", t.item_pre_knowledge_os_threshold)?;
        non_negative("timing.item_harvesting_os_threshold", t.item_harvesting_os_threshold)?;
        non_negative("timing.anomaly_time_interval_seconds", t.anomaly_time_interval_seconds)?;
        if t.anomaly_successive_count < 1 {
            return Err(ConfigError::TooSmall {
                field: "timing.anomaly_successive_count",
                value: t.anomaly_successive_count as usize,
                min: 1,
            });
        }

        let r = &self.revision;
        non_negative("revision.rapid_revision_seconds", r.rapid_revision_seconds)?;
        bounded(
            "revision.answer_change_percentage_threshold",
            r.answer_change_percentage_threshold,
            0.0,
            100.0,
        )?;
        finite("revision.hard_item_difficulty", r.hard_item_difficulty)?;

        let s = &self.sequential;
        if s.pattern_length < 2 {
            return Err(ConfigError::TooSmall {
                field: "sequential.pattern_length",
                value: s.pattern_length,
                min: 2,
            });
        }
        non_negative("sequential.z_score_threshold", s.z_score_threshold)?;

        let p = &self.person_fit;
        non_negative("person_fit.deviation_from_mean_sigma", p.deviation_from_mean_sigma)?;
        bounded(
            "person_fit.probability_of_correctness_threshold",
            p.probability_of_correctness_threshold,
            0.0,
            1.0,
        )?;
        bounded("person_fit.wr_te_ratio_threshold", p.wr_te_ratio_threshold, 0.0, 1.0)?;
        if p.min_items_per_section < 2 {
            return Err(ConfigError::TooSmall {
                field: "person_fit.min_items_per_section",
                value: p.min_items_per_section,
                min: 2,
            });
        }

        for (metric, threshold) in &self.similarity.thresholds {
            let field = format!("similarity.thresholds.{}", metric.as_str());
            if metric.is_rate() {
                bounded(&field, *threshold, 0.0, 1.0)?;
            } else {
                non_negative(&field, *threshold)?;
            }
        }
        if self.similarity.min_common_items < 2 {
            return Err(ConfigError::TooSmall {
                field: "similarity.min_common_items",
                value: self.similarity.min_common_items,
                min: 2,
            });
        }

        for (kind, weight) in &self.aggregation.weights {
            bounded(&format!("aggregation.weights.{}", kind.as_str()), *weight, 0.0, 1.0)?;
        }

        Ok(())
    }
}

fn finite(field: &str, value: f64) -> Result<(), ConfigError> {
    bounded(field, value, f64::MIN, f64::MAX)
}

fn non_negative(field: &str, value: f64) -> Result<(), ConfigError> {
    bounded(field, value, 0.0, f64::MAX)
}

fn bounded(field: &str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    // NaN fails both comparisons
    if value >= min && value <= max {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field: field.to_string(),
            value,
            min,
            max,
        })
    }
}
