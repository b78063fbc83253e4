use std::collections::HashMap;

use ndarray::Array2;
use polars::df;
use polars::prelude::*;
use tracing::{debug, info};

use crate::errors::{ScanError, ScanResult};
use crate::helper_functions::str_values;
use crate::models::{MutationState, ScoredPair};
use crate::prediction_tools::xgboost_model::ScoringModel;
use crate::schema::{FEATURE_COLUMNS, ID_COLUMN, IN_MRE_COLUMN, STATE_COLUMN};

/// Model score of one (variant, microRNA, state) feature row.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRow {
    pub pair_id: String,
    pub state: MutationState,
    pub in_mre: bool,
    pub score: f64,
}

/// Selects the model columns in schema order; nulls become NaN.
pub fn feature_matrix(df: &DataFrame) -> ScanResult<Array2<f64>> {
    let mut x = Array2::<f64>::zeros((df.height(), FEATURE_COLUMNS.len()));
    for (j, name) in FEATURE_COLUMNS.iter().enumerate() {
        let col = df
            .column(name)
            .map_err(|_| ScanError::MissingFeature(name.to_string()))?
            .cast(&DataType::Float64)?;
        for (i, v) in col.f64()?.into_iter().enumerate() {
            x[[i, j]] = v.unwrap_or(f64::NAN);
        }
    }
    Ok(x)
}

fn bool_values(df: &DataFrame, name: &str) -> ScanResult<Vec<bool>> {
    let col = df
        .column(name)
        .map_err(|_| ScanError::MissingFeature(name.to_string()))?
        .cast(&DataType::Boolean)?;
    Ok(col.bool()?.into_iter().map(|v| v.unwrap_or(false)).collect())
}

pub fn score_rows(df: &DataFrame, model: &dyn ScoringModel) -> ScanResult<Vec<ScoredRow>> {
    let x = feature_matrix(df)?;
    let scores = model.predict(x.view())?;
    let ids = str_values(df, ID_COLUMN)?;
    let mutated = bool_values(df, STATE_COLUMN)?;
    let in_mre = bool_values(df, IN_MRE_COLUMN)?;

    Ok(ids
        .into_iter()
        .zip(mutated)
        .zip(in_mre)
        .zip(scores)
        .map(|(((pair_id, mutated), in_mre), score)| ScoredRow {
            pair_id,
            state: if mutated {
                MutationState::Mutant
            } else {
                MutationState::WildType
            },
            in_mre,
            score,
        })
        .collect())
}

pub fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

#[derive(Default)]
struct PairSlot {
    wt: Option<f64>,
    mutant: Option<f64>,
    in_mre: bool,
}

/// Wild-type vs mutant score per pair, in first-seen order. Pairs missing
/// either state are dropped.
pub fn pivot_scores(rows: Vec<ScoredRow>) -> Vec<ScoredPair> {
    let mut order: Vec<String> = Vec::new();
    let mut slots: HashMap<String, PairSlot> = HashMap::new();

    for row in rows {
        let slot = slots.entry(row.pair_id.clone()).or_insert_with(|| {
            order.push(row.pair_id.clone());
            PairSlot::default()
        });
        match row.state {
            MutationState::WildType => slot.wt = Some(row.score),
            MutationState::Mutant => slot.mutant = Some(row.score),
        }
        slot.in_mre |= row.in_mre;
    }

    order
        .into_iter()
        .filter_map(|id| {
            let slot = slots.remove(&id)?;
            let (wt_score, mut_score) = (slot.wt?, slot.mutant?);
            Some(ScoredPair {
                pred_difference: round3(mut_score - wt_score),
                id,
                wt_score,
                mut_score,
                in_mre: slot.in_mre,
            })
        })
        .collect()
}

pub fn passes_filter(pair: &ScoredPair, threshold: f64, mre_filter: bool) -> bool {
    pair.pred_difference.abs() >= threshold && (!mre_filter || pair.in_mre)
}

/// Scores a feature table and keeps the pairs whose score moves enough.
pub fn differential_scores(
    df: &DataFrame,
    model: &dyn ScoringModel,
    threshold: f64,
    mre_filter: bool,
) -> ScanResult<Vec<ScoredPair>> {
    let rows = score_rows(df, model)?;
    let pairs = pivot_scores(rows);
    let total = pairs.len();
    let kept: Vec<ScoredPair> = pairs
        .into_iter()
        .filter(|p| passes_filter(p, threshold, mre_filter))
        .collect();
    debug!("{} of {} pairs pass |difference| >= {}", kept.len(), total, threshold);
    Ok(kept)
}

pub fn results_frame(pairs: &[ScoredPair]) -> PolarsResult<DataFrame> {
    df![
        "id" => pairs.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
        "wt_prediction" => pairs.iter().map(|p| p.wt_score).collect::<Vec<_>>(),
        "mut_prediction" => pairs.iter().map(|p| p.mut_score).collect::<Vec<_>>(),
        "pred_difference" => pairs.iter().map(|p| p.pred_difference).collect::<Vec<_>>(),
        "wt_binary" => pairs.iter().map(ScoredPair::wt_binary).collect::<Vec<_>>(),
        "mut_binary" => pairs.iter().map(ScoredPair::mut_binary).collect::<Vec<_>>(),
        "binary_difference" => pairs.iter().map(ScoredPair::binary_difference).collect::<Vec<_>>(),
        IN_MRE_COLUMN => pairs.iter().map(|p| p.in_mre).collect::<Vec<_>>(),
    ]
}

pub fn log_summary(pairs: &[ScoredPair]) {
    let gained = pairs.iter().filter(|p| p.binary_difference() > 0).count();
    let lost = pairs.iter().filter(|p| p.binary_difference() < 0).count();
    info!(
        "{} significant pairs ({} gained binding, {} lost binding)",
        pairs.len(),
        gained,
        lost
    );
}
