//! Pretrained tree-ensemble model saved with XGBoost's `save_model("*.json")`.
//!
//! Only what scoring needs is read: the tree arrays, the base score and the
//! objective name. Missing values (NaN) follow each split's default branch.
//!
//! Evaluation runs in `f32` like XGBoost's own predictor: features are
//! narrowed before each comparison and the margin is accumulated in `f32`, so
//! rows sitting exactly on a split value take the same branch as in training.

use std::fs;
use std::path::Path;

use ndarray::ArrayView2;
use serde::Deserialize;
use tracing::{debug, info};

use crate::errors::{ScanError, ScanResult};
use crate::schema::FEATURE_COLUMNS;

/// Anything that turns a feature matrix (rows in [`FEATURE_COLUMNS`] order)
/// into one score per row.
pub trait ScoringModel: Send + Sync {
    fn predict(&self, features: ArrayView2<f64>) -> ScanResult<Vec<f64>>;
}

#[derive(Deserialize)]
struct BoosterDocument {
    learner: LearnerDoc,
}

#[derive(Deserialize)]
struct LearnerDoc {
    #[serde(default)]
    feature_names: Vec<String>,
    gradient_booster: GradientBoosterDoc,
    learner_model_param: LearnerParamDoc,
    objective: ObjectiveDoc,
}

#[derive(Deserialize)]
struct GradientBoosterDoc {
    model: TreeModelDoc,
}

#[derive(Deserialize)]
struct TreeModelDoc {
    trees: Vec<TreeDoc>,
}

#[derive(Deserialize)]
struct TreeDoc {
    left_children: Vec<i64>,
    right_children: Vec<i64>,
    split_indices: Vec<i64>,
    split_conditions: Vec<f32>,
    default_left: Vec<Flag>,
}

/// Older exports write `default_left` as 0/1, newer ones as booleans.
#[derive(Deserialize, Clone, Copy)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Int(i64),
}

impl Flag {
    fn is_set(self) -> bool {
        match self {
            Flag::Bool(b) => b,
            Flag::Int(i) => i != 0,
        }
    }
}

#[derive(Deserialize)]
struct LearnerParamDoc {
    base_score: String,
    #[serde(default)]
    num_feature: Option<String>,
}

#[derive(Deserialize)]
struct ObjectiveDoc {
    name: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Node {
    Leaf(f32),
    Split {
        feature: usize,
        threshold: f32,
        left: usize,
        right: usize,
        default_left: bool,
    },
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn from_doc(doc: TreeDoc, n_features: usize) -> Result<Self, String> {
        let n = doc.left_children.len();
        if [
            doc.right_children.len(),
            doc.split_indices.len(),
            doc.split_conditions.len(),
            doc.default_left.len(),
        ]
        .iter()
        .any(|&len| len != n)
        {
            return Err("tree arrays have different lengths".into());
        }
        if n == 0 {
            return Err("empty tree".into());
        }

        let child = |c: i64| -> Result<usize, String> {
            usize::try_from(c)
                .ok()
                .filter(|&c| c < n)
                .ok_or_else(|| format!("child index {} out of range", c))
        };

        let mut nodes = Vec::with_capacity(n);
        for i in 0..n {
            if doc.left_children[i] == -1 {
                nodes.push(Node::Leaf(doc.split_conditions[i]));
                continue;
            }
            let feature = usize::try_from(doc.split_indices[i])
                .ok()
                .filter(|&f| f < n_features)
                .ok_or_else(|| format!("split on unknown feature {}", doc.split_indices[i]))?;
            nodes.push(Node::Split {
                feature,
                threshold: doc.split_conditions[i],
                left: child(doc.left_children[i])?,
                right: child(doc.right_children[i])?,
                default_left: doc.default_left[i].is_set(),
            });
        }
        Ok(Tree { nodes })
    }

    fn leaf_value(&self, row: &[f64]) -> f32 {
        let mut idx = 0;
        // a well-formed tree reaches a leaf in fewer steps than it has nodes
        for _ in 0..=self.nodes.len() {
            match self.nodes[idx] {
                Node::Leaf(value) => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    default_left,
                } => {
                    let value = row[feature] as f32;
                    let go_left = if value.is_nan() { default_left } else { value < threshold };
                    idx = if go_left { left } else { right };
                }
            }
        }
        f32::NAN
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Objective {
    Logistic,
    Identity,
}

impl Objective {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "binary:logistic" | "reg:logistic" => Some(Objective::Logistic),
            "reg:squarederror" | "reg:linear" | "binary:logitraw" => Some(Objective::Identity),
            _ => None,
        }
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Gradient-boosted tree ensemble.
#[derive(Debug, Clone)]
pub struct XgbBooster {
    trees: Vec<Tree>,
    base_margin: f32,
    objective: Objective,
}

impl XgbBooster {
    pub fn load(path: &Path) -> ScanResult<Self> {
        info!("Loading model from {}", path.display());
        let load_error = |reason: String| ScanError::ModelLoad {
            path: path.to_path_buf(),
            reason,
        };
        let text = fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
        let booster = Self::from_json(&text).map_err(|e| match e {
            ScanError::ModelLoad { reason, .. } => load_error(reason),
            other => other,
        })?;
        info!("Model has {} trees", booster.trees.len());
        Ok(booster)
    }

    pub fn from_json(text: &str) -> ScanResult<Self> {
        let load_error = |reason: String| ScanError::ModelLoad {
            path: Default::default(),
            reason,
        };
        let doc: BoosterDocument = serde_json::from_str(text).map_err(|e| load_error(e.to_string()))?;
        let learner = doc.learner;

        if !learner.feature_names.is_empty() && learner.feature_names != FEATURE_COLUMNS {
            return Err(ScanError::ModelSchema(format!(
                "model features {:?} do not match the feature table",
                learner.feature_names
            )));
        }
        if let Some(n) = learner.learner_model_param.num_feature.as_deref() {
            if n.parse::<usize>().ok() != Some(FEATURE_COLUMNS.len()) {
                return Err(ScanError::ModelSchema(format!(
                    "model expects {} features, feature table has {}",
                    n,
                    FEATURE_COLUMNS.len()
                )));
            }
        }

        let objective = Objective::parse(&learner.objective.name)
            .ok_or_else(|| load_error(format!("unsupported objective {}", learner.objective.name)))?;
        let base_score: f32 = learner
            .learner_model_param
            .base_score
            .trim_matches(|c| c == '[' || c == ']')
            .parse()
            .map_err(|_| load_error(format!("bad base_score {}", learner.learner_model_param.base_score)))?;
        let base_margin = match objective {
            Objective::Logistic if base_score > 0.0 && base_score < 1.0 => (base_score / (1.0 - base_score)).ln(),
            Objective::Logistic => return Err(load_error(format!("base_score {} is not a probability", base_score))),
            Objective::Identity => base_score,
        };

        let trees = learner
            .gradient_booster
            .model
            .trees
            .into_iter()
            .map(|t| Tree::from_doc(t, FEATURE_COLUMNS.len()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(load_error)?;
        debug!("Parsed {} trees, objective {:?}", trees.len(), objective);

        Ok(XgbBooster {
            trees,
            base_margin,
            objective,
        })
    }

    fn score_row(&self, row: &[f64]) -> f64 {
        let margin = self
            .trees
            .iter()
            .fold(self.base_margin, |acc, t| acc + t.leaf_value(row));
        let score = match self.objective {
            Objective::Logistic => sigmoid(margin),
            Objective::Identity => margin,
        };
        f64::from(score)
    }
}

impl ScoringModel for XgbBooster {
    fn predict(&self, features: ArrayView2<f64>) -> ScanResult<Vec<f64>> {
        if features.ncols() != FEATURE_COLUMNS.len() {
            return Err(ScanError::ModelSchema(format!(
                "feature matrix has {} columns, expected {}",
                features.ncols(),
                FEATURE_COLUMNS.len()
            )));
        }
        Ok(features
            .rows()
            .into_iter()
            .map(|row| self.score_row(&row.to_vec()))
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ndarray::Array2;

    /// Two stumps: energy below -5 adds 1.0, a 6mer seed adds 0.5.
    pub(crate) fn stump_model_json() -> String {
        serde_json::json!({
            "learner": {
                "gradient_booster": {
                    "model": {
                        "trees": [
                            {
                                "left_children": [1, -1, -1],
                                "right_children": [2, -1, -1],
                                "split_indices": [0, 0, 0],
                                "split_conditions": [-5.0, 1.0, -1.0],
                                "default_left": [0, 0, 0]
                            },
                            {
                                "left_children": [1, -1, -1],
                                "right_children": [2, -1, -1],
                                "split_indices": [6, 0, 0],
                                "split_conditions": [0.5, 0.0, 0.5],
                                "default_left": [true, false, false]
                            }
                        ]
                    },
                    "name": "gbtree"
                },
                "learner_model_param": { "base_score": "[5E-1]", "num_feature": "25" },
                "objective": { "name": "binary:logistic" }
            },
            "version": [2, 0, 3]
        })
        .to_string()
    }

    fn row(energy: f64, seed_6mer: f64) -> Vec<f64> {
        let mut r = vec![0.0; FEATURE_COLUMNS.len()];
        r[0] = energy;
        r[6] = seed_6mer;
        r
    }

    #[test]
    fn stumps_sum_before_sigmoid() {
        let model = XgbBooster::from_json(&stump_model_json()).unwrap();
        let rows = [row(-8.0, 1.0), row(-1.0, 0.0)].concat();
        let x = Array2::from_shape_vec((2, FEATURE_COLUMNS.len()), rows).unwrap();

        let scores = model.predict(x.view()).unwrap();
        assert!((scores[0] - f64::from(sigmoid(1.5))).abs() < 1e-7);
        assert!((scores[1] - f64::from(sigmoid(-1.0))).abs() < 1e-7);
    }

    #[test]
    fn missing_values_take_default_branch() {
        let model = XgbBooster::from_json(&stump_model_json()).unwrap();
        let x = Array2::from_shape_vec((1, FEATURE_COLUMNS.len()), row(f64::NAN, f64::NAN)).unwrap();
        // energy defaults right (-1.0), seed defaults left (0.0)
        let scores = model.predict(x.view()).unwrap();
        assert!((scores[0] - f64::from(sigmoid(-1.0))).abs() < 1e-7);
    }

    #[test]
    fn split_values_compare_in_single_precision() {
        let third = 1.0f32 / 3.0;
        let doc = serde_json::json!({
            "learner": {
                "gradient_booster": {
                    "model": {
                        "trees": [{
                            "left_children": [1, -1, -1],
                            "right_children": [2, -1, -1],
                            "split_indices": [23, 0, 0],
                            "split_conditions": [third, -0.5, 1.5],
                            "default_left": [false, false, false]
                        }]
                    }
                },
                "learner_model_param": { "base_score": "0", "num_feature": "25" },
                "objective": { "name": "reg:squarederror" }
            }
        });
        let model = XgbBooster::from_json(&doc.to_string()).unwrap();

        // an AU fraction of 1/3 is below the f32 threshold in f64, equal to it in f32
        let mut r = vec![0.0; FEATURE_COLUMNS.len()];
        r[23] = 1.0 / 3.0;
        assert!(r[23] < f64::from(third));
        let x = Array2::from_shape_vec((1, FEATURE_COLUMNS.len()), r).unwrap();
        assert_eq!(model.predict(x.view()).unwrap(), vec![1.5]);
    }

    #[test]
    fn wrong_width_is_a_schema_error() {
        let model = XgbBooster::from_json(&stump_model_json()).unwrap();
        let x = Array2::<f64>::zeros((1, 3));
        assert!(matches!(model.predict(x.view()), Err(ScanError::ModelSchema(_))));
    }

    #[test]
    fn mismatched_feature_names_fail_fast() {
        let mut doc: serde_json::Value = serde_json::from_str(&stump_model_json()).unwrap();
        doc["learner"]["feature_names"] = serde_json::json!(["a", "b"]);
        let result = XgbBooster::from_json(&doc.to_string());
        assert!(matches!(result, Err(ScanError::ModelSchema(_))));
    }

    #[test]
    fn broken_artifact_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        fs::write(&path, "{\"learner\": {}}").unwrap();
        match XgbBooster::load(&path) {
            Err(ScanError::ModelLoad { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }
}
