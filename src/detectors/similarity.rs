//! Pairwise answer similarity and collusion clusters.
//!
//! Every unordered pair of candidates in a test is aligned on the items both
//! were presented (in the first candidate's presentation order) and scored
//! with six independent metrics:
//!
//! | Metric | Legacy name | Value |
//! |--------|-------------|-------|
//! | `identical-incorrect` | JI1I2 | identical wrong answers / jointly wrong items |
//! | `longest-run` | STRINGL | longest stretch of identical answers |
//! | `longest-incorrect-run` | STRINGI1 | longest stretch of identical wrong answers |
//! | `longest-incorrect-run-with-omissions` | STRINGI2 | as above, joint omissions extend the stretch |
//! | `joint-match` | TJOINT | identical answers / jointly answered items |
//! | `g2` | g2 | likelihood-ratio statistic of the joint choice table |
//!
//! A pair is flagged when any metric reaches its threshold. Two candidates
//! with identical full answer sequences are always flagged, with the
//! shared-wrong-answer rate pinned at 1.0 and saturated confidence, however
//! short the sequences or high the thresholds. Pair scoring runs
//! in parallel; flagged pairs are then merged into clusters by a sequential
//! union-find pass.

use crate::config::SimilarityConfig;
use crate::flag::{
    Abstention, AbstentionReason, DetectorKind, DetectorOutput, Evidence, Flag, FlagKind,
};
use crate::response::{CandidateSession, ResponseEvent};
use crate::stats::margin_confidence;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Smallest cluster that gets its own flag.
const MIN_CLUSTER_FLAG_SIZE: usize = 3;

/// Pairwise similarity statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SimilarityMetric {
    IdenticalIncorrect,
    LongestRun,
    LongestIncorrectRun,
    LongestIncorrectRunWithOmissions,
    JointMatch,
    G2,
}

impl SimilarityMetric {
    pub const ALL: [SimilarityMetric; 6] = [
        SimilarityMetric::IdenticalIncorrect,
        SimilarityMetric::LongestRun,
        SimilarityMetric::LongestIncorrectRun,
        SimilarityMetric::LongestIncorrectRunWithOmissions,
        SimilarityMetric::JointMatch,
        SimilarityMetric::G2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SimilarityMetric::IdenticalIncorrect => "identical-incorrect",
            SimilarityMetric::LongestRun => "longest-run",
            SimilarityMetric::LongestIncorrectRun => "longest-incorrect-run",
            SimilarityMetric::LongestIncorrectRunWithOmissions => {
                "longest-incorrect-run-with-omissions"
            }
            SimilarityMetric::JointMatch => "joint-match",
            SimilarityMetric::G2 => "g2",
        }
    }

    /// Name used by the dashboard.
    pub fn legacy_name(&self) -> &'static str {
        match self {
            SimilarityMetric::IdenticalIncorrect => "JI1I2",
            SimilarityMetric::LongestRun => "STRINGL",
            SimilarityMetric::LongestIncorrectRun => "STRINGI1",
            SimilarityMetric::LongestIncorrectRunWithOmissions => "STRINGI2",
            SimilarityMetric::JointMatch => "TJOINT",
            SimilarityMetric::G2 => "g2",
        }
    }

    /// Whether values are fractions in [0, 1].
    pub fn is_rate(&self) -> bool {
        matches!(
            self,
            SimilarityMetric::IdenticalIncorrect | SimilarityMetric::JointMatch
        )
    }
}

/// One metric of one pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub metric: SimilarityMetric,
    /// `None` when the metric abstained.
    pub value: Option<f64>,
    pub threshold: Option<f64>,
    pub fired: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abstention: Option<AbstentionReason>,
}

/// Evidence for a pairwise-similarity flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairEvidence {
    pub candidate_a: String,
    pub candidate_b: String,
    pub common_items: usize,
    pub metrics: Vec<MetricValue>,
    pub fired: Vec<SimilarityMetric>,
    /// Both candidates gave the same final answer on every item.
    #[serde(default)]
    pub identical_sequences: bool,
    pub cluster_id: Option<usize>,
    pub cluster_members: Vec<String>,
}

/// Evidence for a similarity-cluster flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterEvidence {
    pub cluster_id: usize,
    pub members: Vec<String>,
    pub flagged_pairs: usize,
    pub fired: Vec<SimilarityMetric>,
}

/// Candidates linked by flagged pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimilarityCluster {
    pub id: usize,
    pub members: Vec<String>,
}

/// Test-level similarity counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimilaritySummary {
    pub pairs_evaluated: usize,
    /// Pairs skipped for too few common items.
    pub pairs_abstained: usize,
    pub flagged_pairs: usize,
    /// Distinct pairs flagged by any metric other than g2.
    pub primary_statistics_count: usize,
    /// Pairs flagged by g2.
    pub g2_count: usize,
    /// Pairs flagged per metric.
    pub metric_counts: BTreeMap<SimilarityMetric, usize>,
    pub clusters: Vec<SimilarityCluster>,
}

/// Output of the similarity detector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimilarityOutcome {
    pub output: DetectorOutput,
    pub summary: SimilaritySummary,
}

/// Scored pair before clustering.
#[derive(Debug, Clone)]
struct PairScore {
    a: usize,
    b: usize,
    common_items: usize,
    metrics: Vec<MetricValue>,
    identical: bool,
}

impl PairScore {
    fn fired(&self) -> Vec<SimilarityMetric> {
        self.metrics
            .iter()
            .filter(|m| m.fired)
            .map(|m| m.metric)
            .collect()
    }

    fn confidence(&self) -> f64 {
        if self.identical {
            return 1.0;
        }
        self.metrics
            .iter()
            .filter(|m| m.fired)
            .filter_map(|m| Some(margin_confidence(m.value?, m.threshold?)))
            .fold(0.0, f64::max)
    }
}

/// Disjoint-set forest with path halving and union by size.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    pub fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    pub fn union(&mut self, a: usize, b: usize) {
        let (mut ra, mut rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        if self.size[ra] < self.size[rb] {
            std::mem::swap(&mut ra, &mut rb);
        }
        self.parent[rb] = ra;
        self.size[ra] += self.size[rb];
    }

    /// Root lookup without path compression.
    fn find_readonly(&self, mut x: usize) -> usize {
        while self.parent[x] != x {
            x = self.parent[x];
        }
        x
    }
}

/// Pairwise similarity detector.
pub struct SimilarityDetector<'a> {
    config: &'a SimilarityConfig,
}

impl<'a> SimilarityDetector<'a> {
    pub fn new(config: &'a SimilarityConfig) -> Self {
        Self { config }
    }

    /// Score every pair of sessions in one test.
    pub fn detect(&self, sessions: &[CandidateSession]) -> SimilarityOutcome {
        let finals: Vec<Vec<&ResponseEvent>> =
            sessions.iter().map(|s| s.final_answers()).collect();
        let pairs: Vec<(usize, usize)> = (0..sessions.len())
            .flat_map(|a| (a + 1..sessions.len()).map(move |b| (a, b)))
            .collect();

        let scored: Vec<Option<PairScore>> = pairs
            .par_iter()
            .map(|&(a, b)| self.score_pair(a, b, &finals[a], &finals[b]))
            .collect();

        let mut output = DetectorOutput::new();
        let mut summary = SimilaritySummary {
            pairs_evaluated: pairs.len(),
            ..SimilaritySummary::default()
        };
        let mut flagged: Vec<PairScore> = Vec::new();

        for (&(a, b), score) in pairs.iter().zip(scored) {
            let subjects = pair_subjects(&sessions[a], &sessions[b]);
            let Some(score) = score else {
                summary.pairs_abstained += 1;
                output.abstain(Abstention::new(
                    DetectorKind::Similarity,
                    subjects,
                    "pair",
                    AbstentionReason::InsufficientData {
                        required: self.config.min_common_items,
                        available: common_item_count(&finals[a], &finals[b]),
                    },
                ));
                continue;
            };

            for metric in &score.metrics {
                if let Some(reason) = &metric.abstention {
                    output.abstain(Abstention::new(
                        DetectorKind::Similarity,
                        subjects.clone(),
                        metric.metric.as_str(),
                        reason.clone(),
                    ));
                }
            }

            let fired = score.fired();
            if fired.is_empty() {
                continue;
            }
            summary.flagged_pairs += 1;
            for metric in &fired {
                *summary.metric_counts.entry(*metric).or_insert(0) += 1;
            }
            if fired.iter().any(|m| *m != SimilarityMetric::G2) {
                summary.primary_statistics_count += 1;
            }
            if fired.contains(&SimilarityMetric::G2) {
                summary.g2_count += 1;
            }
            flagged.push(score);
        }

        // Single-writer merge
        let mut forest = UnionFind::new(sessions.len());
        for pair in &flagged {
            forest.union(pair.a, pair.b);
        }
        let clusters = build_clusters(sessions, &flagged, &mut forest);

        for pair in &flagged {
            let root = forest.find(pair.a);
            let cluster = clusters.iter().find(|c| c.root == root);
            let (cluster_id, cluster_members) = match cluster {
                Some(c) => (Some(c.cluster.id), c.cluster.members.clone()),
                None => (None, Vec::new()),
            };
            let subjects = pair_subjects(&sessions[pair.a], &sessions[pair.b]);
            output.flag(Flag::new(
                FlagKind::PairwiseSimilarity,
                subjects.clone(),
                pair.confidence(),
                "pair",
                Evidence::PairwiseSimilarity(PairEvidence {
                    candidate_a: subjects[0].clone(),
                    candidate_b: subjects[1].clone(),
                    common_items: pair.common_items,
                    metrics: pair.metrics.clone(),
                    fired: pair.fired(),
                    identical_sequences: pair.identical,
                    cluster_id,
                    cluster_members,
                }),
            ));
        }

        for entry in &clusters {
            if entry.cluster.members.len() < MIN_CLUSTER_FLAG_SIZE {
                continue;
            }
            let members_pairs: Vec<&PairScore> = flagged
                .iter()
                .filter(|p| forest.find_readonly(p.a) == entry.root)
                .collect();
            let confidence = members_pairs
                .iter()
                .map(|p| p.confidence())
                .fold(0.0, f64::max);
            let fired: BTreeSet<SimilarityMetric> =
                members_pairs.iter().flat_map(|p| p.fired()).collect();
            output.flag(Flag::new(
                FlagKind::PairwiseSimilarity,
                entry.cluster.members.clone(),
                confidence,
                "cluster",
                Evidence::SimilarityCluster(ClusterEvidence {
                    cluster_id: entry.cluster.id,
                    members: entry.cluster.members.clone(),
                    flagged_pairs: members_pairs.len(),
                    fired: fired.into_iter().collect(),
                }),
            ));
        }

        summary.clusters = clusters.into_iter().map(|c| c.cluster).collect();

        log::debug!(
            "Similarity: candidates={}, pairs={}, flagged={}, primary={}, g2={}, clusters={}",
            sessions.len(),
            summary.pairs_evaluated,
            summary.flagged_pairs,
            summary.primary_statistics_count,
            summary.g2_count,
            summary.clusters.len()
        );

        SimilarityOutcome { output, summary }
    }

    /// Align two candidates and compute every metric. `None` when the pair
    /// shares too few items and their answer sequences differ.
    fn score_pair(
        &self,
        a: usize,
        b: usize,
        finals_a: &[&ResponseEvent],
        finals_b: &[&ResponseEvent],
    ) -> Option<PairScore> {
        let aligned = align(finals_a, finals_b);
        let identical = identical_sequences(finals_a, finals_b, &aligned);
        if aligned.len() < self.config.min_common_items && !identical {
            return None;
        }

        let metrics: Vec<MetricValue> = SimilarityMetric::ALL
            .iter()
            .map(|&metric| {
                let threshold = self.config.threshold(metric);
                if identical && metric == SimilarityMetric::IdenticalIncorrect {
                    return MetricValue {
                        metric,
                        value: Some(1.0),
                        threshold,
                        fired: true,
                        abstention: None,
                    };
                }
                match compute_metric(metric, &aligned) {
                    Ok(value) => MetricValue {
                        metric,
                        value: Some(value),
                        threshold,
                        fired: threshold.map_or(false, |t| value >= t),
                        abstention: None,
                    },
                    Err(reason) => MetricValue {
                        metric,
                        value: None,
                        threshold,
                        fired: false,
                        abstention: Some(reason),
                    },
                }
            })
            .collect();

        log::trace!(
            "Pair {}-{}: common={}, metrics={:?}",
            finals_a.first().map_or("", |e| e.candidate_id.as_str()),
            finals_b.first().map_or("", |e| e.candidate_id.as_str()),
            aligned.len(),
            metrics.iter().map(|m| m.value).collect::<Vec<_>>()
        );

        Some(PairScore {
            a,
            b,
            common_items: aligned.len(),
            metrics,
            identical,
        })
    }
}

struct ClusterEntry {
    root: usize,
    cluster: SimilarityCluster,
}

/// Clusters of two or more candidates, numbered by their smallest member id.
fn build_clusters(
    sessions: &[CandidateSession],
    flagged: &[PairScore],
    forest: &mut UnionFind,
) -> Vec<ClusterEntry> {
    let mut by_root: BTreeMap<usize, BTreeSet<String>> = BTreeMap::new();
    for pair in flagged {
        let root = forest.find(pair.a);
        let members = by_root.entry(root).or_default();
        members.insert(sessions[pair.a].candidate_id.clone());
        members.insert(sessions[pair.b].candidate_id.clone());
    }

    let mut entries: Vec<ClusterEntry> = by_root
        .into_iter()
        .map(|(root, members)| ClusterEntry {
            root,
            cluster: SimilarityCluster {
                id: 0,
                members: members.into_iter().collect(),
            },
        })
        .collect();
    entries.sort_by(|x, y| x.cluster.members.cmp(&y.cluster.members));
    for (id, entry) in entries.iter_mut().enumerate() {
        entry.cluster.id = id;
    }
    entries
}

fn pair_subjects(a: &CandidateSession, b: &CandidateSession) -> Vec<String> {
    let mut subjects = vec![a.candidate_id.clone(), b.candidate_id.clone()];
    subjects.sort();
    subjects
}

/// Items both candidates were presented, in the first candidate's order.
fn align<'e>(
    finals_a: &[&'e ResponseEvent],
    finals_b: &[&'e ResponseEvent],
) -> Vec<(&'e ResponseEvent, &'e ResponseEvent)> {
    let by_item: HashMap<&str, &ResponseEvent> =
        finals_b.iter().map(|e| (e.item_id.as_str(), *e)).collect();
    finals_a
        .iter()
        .filter_map(|a| by_item.get(a.item_id.as_str()).map(|b| (*a, *b)))
        .collect()
}

/// Same items, same final choices, same omissions.
fn identical_sequences(
    finals_a: &[&ResponseEvent],
    finals_b: &[&ResponseEvent],
    aligned: &Aligned<'_>,
) -> bool {
    !aligned.is_empty()
        && aligned.len() == finals_a.len()
        && aligned.len() == finals_b.len()
        && aligned.iter().all(|(a, b)| a.choice == b.choice)
}

fn common_item_count(finals_a: &[&ResponseEvent], finals_b: &[&ResponseEvent]) -> usize {
    align(finals_a, finals_b).len()
}

type Aligned<'e> = [(&'e ResponseEvent, &'e ResponseEvent)];

fn compute_metric(
    metric: SimilarityMetric,
    aligned: &Aligned<'_>,
) -> std::result::Result<f64, AbstentionReason> {
    match metric {
        SimilarityMetric::IdenticalIncorrect => identical_incorrect_rate(aligned),
        SimilarityMetric::LongestRun => Ok(longest_run(aligned, |a, b| {
            a.choice.is_some() && a.choice == b.choice
        })),
        SimilarityMetric::LongestIncorrectRun => {
            Ok(longest_run(aligned, |a, b| identical_incorrect(a, b)))
        }
        SimilarityMetric::LongestIncorrectRunWithOmissions => Ok(longest_run(aligned, |a, b| {
            identical_incorrect(a, b) || (a.is_omitted() && b.is_omitted())
        })),
        SimilarityMetric::JointMatch => joint_match_rate(aligned),
        SimilarityMetric::G2 => g2(aligned),
    }
}

fn jointly_answered(a: &ResponseEvent, b: &ResponseEvent) -> bool {
    !a.is_omitted() && !b.is_omitted()
}

fn identical_incorrect(a: &ResponseEvent, b: &ResponseEvent) -> bool {
    jointly_answered(a, b) && !a.is_correct && !b.is_correct && a.choice == b.choice
}

fn identical_incorrect_rate(aligned: &Aligned<'_>) -> std::result::Result<f64, AbstentionReason> {
    let jointly_wrong = aligned
        .iter()
        .filter(|(a, b)| jointly_answered(a, b) && !a.is_correct && !b.is_correct)
        .count();
    if jointly_wrong == 0 {
        return Err(AbstentionReason::DegenerateDistribution {
            detail: "no jointly wrong items".to_string(),
        });
    }
    let identical = aligned
        .iter()
        .filter(|(a, b)| identical_incorrect(a, b))
        .count();
    Ok(identical as f64 / jointly_wrong as f64)
}

fn joint_match_rate(aligned: &Aligned<'_>) -> std::result::Result<f64, AbstentionReason> {
    let answered = aligned
        .iter()
        .filter(|(a, b)| jointly_answered(a, b))
        .count();
    if answered == 0 {
        return Err(AbstentionReason::DegenerateDistribution {
            detail: "no jointly answered items".to_string(),
        });
    }
    let identical = aligned
        .iter()
        .filter(|(a, b)| jointly_answered(a, b) && a.choice == b.choice)
        .count();
    Ok(identical as f64 / answered as f64)
}

fn longest_run(
    aligned: &Aligned<'_>,
    extends: impl Fn(&ResponseEvent, &ResponseEvent) -> bool,
) -> f64 {
    let mut best = 0usize;
    let mut current = 0usize;
    for (a, b) in aligned {
        if extends(a, b) {
            current += 1;
            best = best.max(current);
        } else {
            current = 0;
        }
    }
    best as f64
}

/// `G = 2 Σ O ln(O / E)` over the choice-by-choice contingency table.
fn g2(aligned: &Aligned<'_>) -> std::result::Result<f64, AbstentionReason> {
    let mut cells: BTreeMap<(&str, &str), f64> = BTreeMap::new();
    let mut rows: BTreeMap<&str, f64> = BTreeMap::new();
    let mut cols: BTreeMap<&str, f64> = BTreeMap::new();
    for (a, b) in aligned {
        if let (Some(ca), Some(cb)) = (a.choice.as_deref(), b.choice.as_deref()) {
            *cells.entry((ca, cb)).or_insert(0.0) += 1.0;
            *rows.entry(ca).or_insert(0.0) += 1.0;
            *cols.entry(cb).or_insert(0.0) += 1.0;
        }
    }
    let n: f64 = rows.values().sum();
    if n == 0.0 || rows.len() < 2 || cols.len() < 2 {
        return Err(AbstentionReason::DegenerateDistribution {
            detail: format!("{}x{} contingency table", rows.len(), cols.len()),
        });
    }

    let mut g = 0.0;
    for ((ca, cb), observed) in &cells {
        let expected = rows[ca] * cols[cb] / n;
        g += observed * (observed / expected).ln();
    }
    Ok(2.0 * g)
}
