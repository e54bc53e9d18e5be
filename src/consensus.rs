//! Aggregation over repeated annotations of the same input.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::feature::{Feature, FeatureData};
use crate::prediction::Prediction;

pub const DEFAULT_CONSENSUS_THRESHOLD: f64 = 0.5;

/// Successful samples of one multi-sample annotation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MultiSampleResult {
    pub samples: Vec<Vec<FeatureData>>,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl MultiSampleResult {
    pub fn new(samples: Vec<Vec<FeatureData>>) -> Self {
        Self {
            samples,
            ..Default::default()
        }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Fraction of samples that detected each binary feature.
    pub fn detection_rates(&self) -> BTreeMap<String, f64> {
        self.binary_votes()
            .into_iter()
            .map(|(name, votes)| (name, rate(&votes)))
            .collect()
    }

    /// Shannon entropy (bits) of each binary feature's detected split.
    pub fn detection_entropy(&self) -> BTreeMap<String, f64> {
        self.binary_votes()
            .into_iter()
            .map(|(name, votes)| {
                let p = rate(&votes);
                let entropy = -[p, 1.0 - p]
                    .iter()
                    .filter(|&&x| x > 0.0)
                    .map(|&x| x * x.log2())
                    .sum::<f64>();
                (name, entropy)
            })
            .collect()
    }

    /// Label counts for each classification feature.
    pub fn label_distribution(&self) -> BTreeMap<String, BTreeMap<String, usize>> {
        let mut out: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
        for data in self.samples.iter().flatten() {
            if let Some(label) = data.label() {
                *out.entry(data.name().to_string())
                    .or_default()
                    .entry(label.to_string())
                    .or_default() += 1;
            }
        }
        out
    }

    /// One aggregated `FeatureData` per feature, in first-seen order.
    ///
    /// Binary features are detected when their rate reaches `threshold`;
    /// classification takes the plurality label and text the most common
    /// value, ties going to the earliest sample.
    pub fn consensus(&self, threshold: f64) -> Vec<FeatureData> {
        self.feature_order()
            .into_iter()
            .filter_map(|feature| {
                let predictions: Vec<&Prediction> = self
                    .samples
                    .iter()
                    .flatten()
                    .filter(|d| d.feature.name == feature.name)
                    .map(|d| &d.prediction)
                    .collect();
                consensus_prediction(&predictions, threshold).map(|p| FeatureData::new(feature.clone(), p))
            })
            .collect()
    }

    fn feature_order(&self) -> Vec<&Feature> {
        let mut order: Vec<&Feature> = Vec::new();
        for data in self.samples.iter().flatten() {
            if !order.iter().any(|f| f.name == data.feature.name) {
                order.push(&data.feature);
            }
        }
        order
    }

    fn binary_votes(&self) -> BTreeMap<String, Vec<bool>> {
        let mut votes: BTreeMap<String, Vec<bool>> = BTreeMap::new();
        for data in self.samples.iter().flatten() {
            if let Some(detected) = data.detected() {
                votes.entry(data.name().to_string()).or_default().push(detected);
            }
        }
        votes
    }
}

fn rate(votes: &[bool]) -> f64 {
    if votes.is_empty() {
        return 0.0;
    }
    votes.iter().filter(|&&v| v).count() as f64 / votes.len() as f64
}

fn consensus_prediction(predictions: &[&Prediction], threshold: f64) -> Option<Prediction> {
    match predictions.first()? {
        Prediction::Binary { .. } => {
            let votes: Vec<(bool, &str)> = predictions
                .iter()
                .filter_map(|p| match p {
                    Prediction::Binary {
                        detected,
                        rationale,
                    } => Some((*detected, rationale.as_str())),
                    _ => None,
                })
                .collect();
            let detected_votes: Vec<bool> = votes.iter().map(|(d, _)| *d).collect();
            let detected = rate(&detected_votes) >= threshold;
            let rationale = most_common(votes.iter().filter(|(d, _)| *d == detected).map(|(_, r)| *r))
                .unwrap_or_default();
            Some(Prediction::Binary {
                detected,
                rationale: rationale.to_string(),
            })
        }
        Prediction::Classification { .. } => {
            let votes: Vec<(&str, &str)> = predictions
                .iter()
                .filter_map(|p| match p {
                    Prediction::Classification { label, rationale } => Some((label.as_str(), rationale.as_str())),
                    _ => None,
                })
                .collect();
            let label = most_common(votes.iter().map(|(l, _)| *l))?;
            let rationale =
                most_common(votes.iter().filter(|(l, _)| *l == label).map(|(_, r)| *r)).unwrap_or_default();
            Some(Prediction::Classification {
                label: label.to_string(),
                rationale: rationale.to_string(),
            })
        }
        Prediction::Text { .. } => {
            let text = most_common(predictions.iter().filter_map(|p| match p {
                Prediction::Text { text } => Some(text.as_str()),
                _ => None,
            }))?;
            Some(Prediction::Text {
                text: text.to_string(),
            })
        }
    }
}

/// Most frequent value; ties go to the value seen first.
fn most_common<'a>(values: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut counts: Vec<(&'a str, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(v, _)| *v == value) {
            Some((_, n)) => *n += 1,
            None => counts.push((value, 1)),
        }
    }
    let mut best: Option<(&'a str, usize)> = None;
    for (value, n) in counts {
        if best.map_or(true, |(_, top)| n > top) {
            best = Some((value, n));
        }
    }
    best.map(|(v, _)| v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary(name: &str, detected: bool, rationale: &str) -> FeatureData {
        FeatureData::new(
            Feature::binary(name, "d"),
            Prediction::Binary {
                detected,
                rationale: rationale.to_string(),
            },
        )
    }

    fn label(name: &str, label: &str, rationale: &str) -> FeatureData {
        FeatureData::new(
            Feature::classification(name, "d", ["a", "b", "c"]),
            Prediction::Classification {
                label: label.to_string(),
                rationale: rationale.to_string(),
            },
        )
    }

    fn sample_result() -> MultiSampleResult {
        MultiSampleResult::new(vec![
            vec![binary("loop", true, "repeated ls"), label("kind", "b", "first")],
            vec![binary("loop", true, "repeated ls"), label("kind", "a", "second")],
            vec![binary("loop", false, "no loop"), label("kind", "b", "third")],
            vec![binary("loop", true, "three retries"), label("kind", "a", "fourth")],
        ])
    }

    #[test]
    fn detection_rate_and_entropy() {
        let result = sample_result();
        assert_eq!(result.detection_rates()["loop"], 0.75);
        let h = result.detection_entropy()["loop"];
        let expected = -(0.75f64 * 0.75f64.log2() + 0.25f64 * 0.25f64.log2());
        assert!((h - expected).abs() < 1e-12);
    }

    #[test]
    fn unanimous_vote_has_zero_entropy() {
        let result = MultiSampleResult::new(vec![vec![binary("x", false, "")], vec![binary("x", false, "")]]);
        assert_eq!(result.detection_entropy()["x"], 0.0);
    }

    #[test]
    fn consensus_uses_threshold_and_agreeing_rationale() {
        let consensus = sample_result().consensus(DEFAULT_CONSENSUS_THRESHOLD);
        assert_eq!(consensus.len(), 2);
        assert_eq!(consensus[0].name(), "loop");
        assert_eq!(
            consensus[0].prediction,
            Prediction::Binary {
                detected: true,
                rationale: "repeated ls".to_string()
            }
        );

        let strict = sample_result().consensus(0.8);
        assert_eq!(
            strict[0].prediction,
            Prediction::Binary {
                detected: false,
                rationale: "no loop".to_string()
            }
        );
    }

    #[test]
    fn classification_tie_goes_to_first_seen_label() {
        let consensus = sample_result().consensus(DEFAULT_CONSENSUS_THRESHOLD);
        assert_eq!(
            consensus[1].prediction,
            Prediction::Classification {
                label: "b".to_string(),
                rationale: "first".to_string()
            }
        );
        let dist = sample_result().label_distribution();
        assert_eq!(dist["kind"]["a"], 2);
        assert_eq!(dist["kind"]["b"], 2);
    }

    #[test]
    fn empty_result_has_no_consensus() {
        let empty = MultiSampleResult::default();
        assert!(empty.consensus(0.5).is_empty());
        assert!(empty.detection_rates().is_empty());
    }
}
