use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::db;
use crate::error::CoreError;

pub type ComponentScores = BTreeMap<String, f64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBand {
    /// Inclusive lower bound on the subject total; the band runs up to the
    /// next band's minimum (or without bound for the top band).
    pub min: f64,
    pub grade: String,
    pub remark: String,
}

/// Non-overlapping, total-based bands covering `[0, inf)`, highest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradingScale {
    bands: Vec<GradeBand>,
}

impl GradingScale {
    pub fn new(mut bands: Vec<GradeBand>) -> Result<Self, CoreError> {
        if bands.is_empty() {
            return Err(CoreError::validation("grading scale needs at least one band"));
        }
        for b in &bands {
            if !b.min.is_finite() || b.min < 0.0 {
                return Err(CoreError::validation(format!(
                    "band {} has an invalid minimum",
                    b.grade
                )));
            }
            if b.grade.trim().is_empty() {
                return Err(CoreError::validation("band grade must not be empty"));
            }
        }
        bands.sort_by(|a, b| b.min.partial_cmp(&a.min).unwrap_or(Ordering::Equal));
        if bands.windows(2).any(|w| w[0].min == w[1].min) {
            return Err(CoreError::validation("band minimums must be unique"));
        }
        if bands.last().map(|b| b.min) != Some(0.0) {
            return Err(CoreError::validation("the lowest band must start at 0"));
        }
        Ok(Self { bands })
    }

    pub fn bands(&self) -> &[GradeBand] {
        &self.bands
    }

    pub fn band_for(&self, total: f64) -> &GradeBand {
        self.bands
            .iter()
            .find(|b| total >= b.min)
            .unwrap_or(&self.bands[self.bands.len() - 1])
    }
}

impl Default for GradingScale {
    fn default() -> Self {
        let band = |min: f64, grade: &str, remark: &str| GradeBand {
            min,
            grade: grade.to_string(),
            remark: remark.to_string(),
        };
        Self {
            bands: vec![
                band(80.0, "A", "Excellent"),
                band(70.0, "B", "Very Good"),
                band(60.0, "C", "Good"),
                band(50.0, "D", "Fair"),
                band(40.0, "E", "Poor"),
                band(0.0, "F", "Fail"),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryScore {
    pub total: f64,
    pub grade: String,
    pub remark: String,
}

pub fn compute_entry(scores: &ComponentScores, scale: &GradingScale) -> Result<EntryScore, CoreError> {
    let mut total = 0.0;
    for (metric, value) in scores {
        if !value.is_finite() || *value < 0.0 {
            return Err(CoreError::InvalidScore {
                metric: metric.clone(),
                value: *value,
            });
        }
        total += value;
    }
    let band = scale.band_for(total);
    Ok(EntryScore {
        total,
        grade: band.grade.clone(),
        remark: band.remark.clone(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectEntry {
    pub subject_label: String,
    pub component_scores: ComponentScores,
    pub total: f64,
    pub grade: String,
    pub remark: String,
}

impl SubjectEntry {
    pub fn compute(
        subject_label: &str,
        component_scores: ComponentScores,
        scale: &GradingScale,
    ) -> Result<Self, CoreError> {
        let score = compute_entry(&component_scores, scale)?;
        Ok(Self {
            subject_label: subject_label.to_string(),
            component_scores,
            total: score.total,
            grade: score.grade,
            remark: score.remark,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordTotals {
    pub total_score: f64,
    pub average_score: f64,
}

/// Averages are unweighted unless the school configured subject weights;
/// subjects without a configured weight count once.
pub fn aggregate(entries: &[SubjectEntry], weights: &BTreeMap<String, f64>) -> RecordTotals {
    let total_score: f64 = entries.iter().map(|e| e.total).sum();
    if entries.is_empty() {
        return RecordTotals {
            total_score,
            average_score: 0.0,
        };
    }

    let average_score = if weights.is_empty() {
        total_score / entries.len() as f64
    } else {
        let mut weighted = 0.0;
        let mut denom = 0.0;
        for e in entries {
            let w = weights.get(&e.subject_label).copied().unwrap_or(1.0);
            weighted += e.total * w;
            denom += w;
        }
        if denom > 0.0 {
            weighted / denom
        } else {
            0.0
        }
    };

    RecordTotals {
        total_score,
        average_score: round_2_decimals(average_score),
    }
}

pub fn round_2_decimals(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Competition ("1224") ranking, highest value first. The returned positions
/// line up with `values`.
pub fn competition_positions(values: &[f64]) -> Vec<i64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| {
        values[b]
            .partial_cmp(&values[a])
            .unwrap_or(Ordering::Equal)
    });

    let mut positions = vec![0_i64; values.len()];
    let mut prev: Option<f64> = None;
    let mut current = 0_i64;
    for (rank, &idx) in order.iter().enumerate() {
        if prev != Some(values[idx]) {
            current = rank as i64 + 1;
            prev = Some(values[idx]);
        }
        positions[idx] = current;
    }
    positions
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradingConfig {
    pub scale: GradingScale,
    pub subject_weights: BTreeMap<String, f64>,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            scale: GradingScale::default(),
            subject_weights: BTreeMap::new(),
        }
    }
}

impl GradingConfig {
    pub fn to_json(&self) -> Value {
        json!({
            "bands": self.scale.bands(),
            "subjectWeights": self.subject_weights,
        })
    }

    /// Applies a `{bands?, subjectWeights?}` patch on top of this config.
    pub fn merge_patch(&mut self, patch: &serde_json::Map<String, Value>) -> Result<(), CoreError> {
        for (k, v) in patch {
            match k.as_str() {
                "bands" => {
                    let bands: Vec<GradeBand> = serde_json::from_value(v.clone())
                        .map_err(|e| CoreError::validation(format!("bands: {e}")))?;
                    self.scale = GradingScale::new(bands)?;
                }
                "subjectWeights" => {
                    let weights: BTreeMap<String, f64> = serde_json::from_value(v.clone())
                        .map_err(|e| CoreError::validation(format!("subjectWeights: {e}")))?;
                    if let Some((subject, _)) =
                        weights.iter().find(|(_, w)| !w.is_finite() || **w < 0.0)
                    {
                        return Err(CoreError::validation(format!(
                            "weight for {subject} must be >= 0"
                        )));
                    }
                    self.subject_weights = weights;
                }
                other => {
                    return Err(CoreError::validation(format!(
                        "unknown grading field: {other}"
                    )))
                }
            }
        }
        Ok(())
    }
}

pub fn settings_key(school_id: &str) -> String {
    format!("school.{school_id}.grading")
}

pub fn load_config(conn: &Connection, school_id: &str) -> anyhow::Result<GradingConfig> {
    let mut config = GradingConfig::default();
    if let Some(saved) = db::settings_get_json(conn, &settings_key(school_id))? {
        if let Some(saved_obj) = saved.as_object() {
            // A malformed stored value falls back to defaults rather than blocking grading.
            let mut candidate = config.clone();
            if candidate.merge_patch(saved_obj).is_ok() {
                config = candidate;
            } else {
                tracing::warn!(school_id, "ignoring malformed stored grading config");
            }
        }
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(values: &[(&str, f64)]) -> ComponentScores {
        values.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn total_is_sum_of_components() {
        let s = scores(&[("ca1", 12.5), ("ca2", 14.0), ("exam", 55.0)]);
        let out = compute_entry(&s, &GradingScale::default()).expect("compute");
        assert_eq!(out.total, 81.5);
        assert_eq!(out.grade, "A");
        assert_eq!(out.remark, "Excellent");
    }

    #[test]
    fn negative_component_is_rejected() {
        let s = scores(&[("ca1", 10.0), ("exam", -1.0)]);
        let e = compute_entry(&s, &GradingScale::default()).unwrap_err();
        assert_eq!(e.code(), "invalid_score");
    }

    #[test]
    fn default_band_edges() {
        let scale = GradingScale::default();
        let grade = |t: f64| scale.band_for(t).grade.clone();
        assert_eq!(grade(0.0), "F");
        assert_eq!(grade(39.99), "F");
        assert_eq!(grade(40.0), "E");
        assert_eq!(grade(59.5), "D");
        assert_eq!(grade(60.0), "C");
        assert_eq!(grade(79.99), "B");
        assert_eq!(grade(80.0), "A");
        assert_eq!(grade(250.0), "A");
    }

    #[test]
    fn bands_are_monotonic_over_totals() {
        let scale = GradingScale::default();
        let mut last_min = 0.0;
        for t in 0..=240 {
            let total = t as f64 * 0.5;
            let band = scale.band_for(total);
            assert!(band.min <= total);
            assert!(band.min >= last_min, "band dropped at {total}");
            last_min = band.min;
        }
    }

    #[test]
    fn custom_scale_requires_zero_floor_and_unique_minimums() {
        let band = |min: f64, g: &str| GradeBand {
            min,
            grade: g.to_string(),
            remark: String::new(),
        };
        assert!(GradingScale::new(vec![band(50.0, "P"), band(10.0, "F")]).is_err());
        assert!(GradingScale::new(vec![band(50.0, "P"), band(50.0, "Q"), band(0.0, "F")]).is_err());
        let scale = GradingScale::new(vec![band(0.0, "F"), band(50.0, "P")]).expect("valid");
        assert_eq!(scale.band_for(75.0).grade, "P");
        assert_eq!(scale.band_for(49.0).grade, "F");
    }

    #[test]
    fn aggregate_handles_empty_and_weights() {
        let scale = GradingScale::default();
        assert_eq!(aggregate(&[], &BTreeMap::new()).average_score, 0.0);

        let maths = SubjectEntry::compute("Mathematics", scores(&[("exam", 90.0)]), &scale)
            .expect("maths");
        let english = SubjectEntry::compute("English", scores(&[("exam", 60.0)]), &scale)
            .expect("english");
        let entries = vec![maths, english];

        let plain = aggregate(&entries, &BTreeMap::new());
        assert_eq!(plain.total_score, 150.0);
        assert_eq!(plain.average_score, 75.0);

        let mut weights = BTreeMap::new();
        weights.insert("Mathematics".to_string(), 2.0);
        let weighted = aggregate(&entries, &weights);
        assert_eq!(weighted.total_score, 150.0);
        assert_eq!(weighted.average_score, 80.0);
    }

    #[test]
    fn competition_ranking_skips_after_ties() {
        assert_eq!(competition_positions(&[90.0, 90.0, 80.0]), vec![1, 1, 3]);
        assert_eq!(competition_positions(&[92.0, 99.0]), vec![2, 1]);
        assert_eq!(
            competition_positions(&[50.0, 70.0, 70.0, 70.0, 60.0]),
            vec![5, 1, 1, 1, 4]
        );
        assert!(competition_positions(&[]).is_empty());
    }

    #[test]
    fn patch_rejects_unknown_fields() {
        let mut cfg = GradingConfig::default();
        let patch = json!({ "colour": "red" });
        let e = cfg
            .merge_patch(patch.as_object().expect("object"))
            .unwrap_err();
        assert_eq!(e.code(), "validation_failed");
    }
}
