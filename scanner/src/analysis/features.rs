//! Binding-site features derived from folding output.
//!
//! Every feature is computed from the microRNA-side alignment string (one bit
//! per microRNA base, `1` where the base is paired) plus the transcript window
//! the structure was folded on.

use std::collections::HashMap;
use std::sync::OnceLock;

use polars::prelude::*;
use regex::Regex;
use tracing::{debug, warn};

use crate::data_handling::reference_tables::{MirnaCatalog, TaSpsTable};
use crate::models::{DuplexResult, MutationState, SequenceWindow};
use crate::schema::{FEATURE_COLUMNS, ID_COLUMN, IN_MRE_COLUMN, STATE_COLUMN};

const SEED: std::ops::Range<usize> = 1..7;
const SEED_WITH_8: std::ops::Range<usize> = 1..8;
const COMPENSATORY: std::ops::Range<usize> = 12..17;
const SUPPLEMENTARY: std::ops::Range<usize> = 12..16;
const SUPPLEMENTARY_2: std::ops::Range<usize> = 16..21;

fn consecutive_match() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("1{9,}").expect("static pattern"))
}

/// Bit string as long as the microRNA: zeros for unmatched 5' bases, one bit
/// per structure character over the matched span, zeros for the rest.
pub fn alignment_string(mirna_len: usize, mirna_start: usize, mirna_dot_bracket: &str) -> String {
    let mut bits: String = "0".repeat(mirna_start.min(mirna_len));
    bits.extend(
        mirna_dot_bracket
            .chars()
            .map(|c| if c == '(' || c == ')' { '1' } else { '0' }),
    );
    bits.truncate(mirna_len);
    while bits.len() < mirna_len {
        bits.push('0');
    }
    bits
}

fn count_in(bits: &str, range: std::ops::Range<usize>, bit: char) -> usize {
    let end = range.end.min(bits.len());
    bits.get(range.start.min(end)..end)
        .map_or(0, |s| s.chars().filter(|&c| c == bit).count())
}

/// No unpaired position inside `range`, clipped to the alignment. A range
/// past the end of a short microRNA is empty and so counts as paired.
fn fully_paired(bits: &str, range: std::ops::Range<usize>) -> bool {
    !clipped(bits, range).contains('0')
}

/// Fraction of A/T/U bases, `None` for an empty sequence.
pub fn au_content(sequence: &str) -> Option<f64> {
    if sequence.is_empty() {
        return None;
    }
    let au = sequence
        .bytes()
        .filter(|b| matches!(b.to_ascii_uppercase(), b'A' | b'T' | b'U'))
        .count();
    Some(au as f64 / sequence.len() as f64)
}

/// The microRNA's 8-mer seed (positions 2-8) in RNA alphabet.
pub fn seed_8mer(mirna_sequence: &str) -> String {
    clipped(mirna_sequence, SEED_WITH_8).replace('T', "U")
}

fn clipped(s: &str, range: std::ops::Range<usize>) -> &str {
    let end = range.end.min(s.len());
    s.get(range.start.min(end)..end).unwrap_or_default()
}

/// Transcript span `[start, end)` predicted to pair with the microRNA.
pub fn mre_bounds(mrna_end: usize, mirna_start: usize, mirna_len: usize) -> (usize, usize) {
    let end = mrna_end + mirna_start;
    (end.saturating_sub(mirna_len), end)
}

/// Boolean site and seed-type flags of one alignment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SiteFlags {
    pub anchor_a: bool,
    pub seed_6mer: bool,
    pub match_8: bool,
    pub seed_6mer_1_mismatch: bool,
    pub compensatory: bool,
    pub supplementary: bool,
    pub supplementary_2: bool,
    pub empty_seed: bool,
    pub consecutive_9: bool,
    pub seed_8mer: bool,
    pub seed_7mer_a1: bool,
    pub seed_7mer_m8: bool,
    pub seed_compensatory: bool,
    pub seed_clash_2: bool,
    pub seed_clash_3: bool,
    pub seed_clash_4: bool,
    pub seed_clash_5: bool,
}

impl SiteFlags {
    pub fn from_alignment(bits: &str, mre_region: &str) -> Self {
        let anchor_a = mre_region.ends_with(['A', 'a']);
        let seed_6mer = fully_paired(bits, SEED);
        let match_8 = bits.as_bytes().get(7) == Some(&b'1');
        let seed_6mer_1_mismatch = count_in(bits, SEED, '0') == 1;
        let compensatory = fully_paired(bits, COMPENSATORY);
        let supplementary = fully_paired(bits, SUPPLEMENTARY);
        let supplementary_2 = fully_paired(bits, SUPPLEMENTARY_2);
        let empty_seed = count_in(bits, SEED_WITH_8, '1') == 0;
        let consecutive_9 = consecutive_match().is_match(bits);
        let basepairs = bits.bytes().filter(|&b| b == b'1').count();

        SiteFlags {
            anchor_a,
            seed_6mer,
            match_8,
            seed_6mer_1_mismatch,
            compensatory,
            supplementary,
            supplementary_2,
            empty_seed,
            consecutive_9,
            seed_8mer: anchor_a && seed_6mer && match_8,
            seed_7mer_a1: anchor_a && seed_6mer && !match_8,
            seed_7mer_m8: !anchor_a && seed_6mer && match_8 && !(supplementary || supplementary_2),
            seed_compensatory: compensatory && seed_6mer_1_mismatch && match_8,
            seed_clash_2: supplementary && seed_6mer && match_8,
            seed_clash_3: supplementary_2 && seed_6mer && match_8,
            seed_clash_4: empty_seed && consecutive_9,
            seed_clash_5: basepairs > 10 && !seed_6mer,
        }
    }
}

/// One (variant, microRNA, state) row ready for scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub pair_id: String,
    pub state: MutationState,
    pub alignment: String,
    pub mre_start: usize,
    pub mre_end: usize,
    pub in_mre: bool,
    pub pred_energy: f64,
    pub num_basepairs: usize,
    pub seed_basepairs: usize,
    pub ta_log10: Option<f64>,
    pub sps_mean: Option<f64>,
    pub conservation: Option<f64>,
    pub mre_au_content: Option<f64>,
    pub local_au_content: Option<f64>,
    pub flags: SiteFlags,
}

impl FeatureRow {
    /// Values in [`FEATURE_COLUMNS`] order.
    pub fn values(&self) -> [Option<f64>; FEATURE_COLUMNS.len()] {
        let f = &self.flags;
        let b = |v: bool| Some(f64::from(u8::from(v)));
        [
            Some(self.pred_energy),
            Some(self.num_basepairs as f64),
            Some(self.seed_basepairs as f64),
            self.ta_log10,
            self.sps_mean,
            b(f.anchor_a),
            b(f.seed_6mer),
            b(f.match_8),
            b(f.seed_6mer_1_mismatch),
            b(f.compensatory),
            b(f.supplementary),
            b(f.supplementary_2),
            b(f.empty_seed),
            b(f.consecutive_9),
            self.conservation,
            b(f.seed_8mer),
            b(f.seed_7mer_a1),
            b(f.seed_7mer_m8),
            b(f.seed_compensatory),
            b(f.seed_clash_2),
            b(f.seed_clash_3),
            b(f.seed_clash_4),
            b(f.seed_clash_5),
            self.mre_au_content,
            self.local_au_content,
        ]
    }
}

/// Derives the feature row of a single folding result.
pub fn feature_row(
    result: &DuplexResult,
    window: &SequenceWindow,
    mirna_sequence: &str,
    conservation: Option<f64>,
    ta_sps: &TaSpsTable,
) -> FeatureRow {
    let mirna_len = mirna_sequence.len();
    let transcript = window.sequence(result.state);

    let alignment = alignment_string(mirna_len, result.mirna_start, &result.mirna_dot_bracket);
    let (mre_start, mre_end) = mre_bounds(result.mrna_end, result.mirna_start, mirna_len);
    let mre_region = clipped(transcript, mre_start..mre_end);
    let offset = window.variant_offset();
    let covariates = ta_sps.lookup(&seed_8mer(mirna_sequence));

    FeatureRow {
        pair_id: result.pair_id(),
        state: result.state,
        mre_start,
        mre_end,
        in_mre: mre_start <= offset && offset < mre_end,
        pred_energy: result.pred_energy,
        num_basepairs: alignment.bytes().filter(|&b| b == b'1').count(),
        seed_basepairs: count_in(&alignment, SEED, '1'),
        ta_log10: covariates.ta_log10,
        sps_mean: covariates.sps_mean,
        conservation,
        mre_au_content: au_content(mre_region),
        local_au_content: au_content(transcript),
        flags: SiteFlags::from_alignment(&alignment, mre_region),
        alignment,
    }
}

/// Joins folding results back to their windows and microRNAs.
///
/// Results whose window or microRNA is unknown are dropped with a warning;
/// that only happens if the folding output names something that was never
/// submitted.
pub fn build_features(
    results: &[DuplexResult],
    windows: &HashMap<&str, &SequenceWindow>,
    catalog: &MirnaCatalog,
    ta_sps: &TaSpsTable,
) -> Vec<FeatureRow> {
    let rows: Vec<FeatureRow> = results
        .iter()
        .filter_map(|result| {
            let Some(window) = windows.get(result.mutation_id.as_str()) else {
                warn!("No window for folded variant {}", result.mutation_id);
                return None;
            };
            let Some(mirna) = catalog.get(&result.mirna_accession) else {
                warn!("Folded microRNA {} is not in the catalog", result.mirna_accession);
                return None;
            };
            Some(feature_row(result, window, &mirna.sequence, mirna.conservation, ta_sps))
        })
        .collect();
    debug!("Built {} feature rows from {} duplexes", rows.len(), results.len());
    rows
}

/// Feature table: id, state and MRE membership followed by the model columns.
pub fn feature_frame(rows: &[FeatureRow]) -> PolarsResult<DataFrame> {
    let mut columns: Vec<Column> = Vec::with_capacity(FEATURE_COLUMNS.len() + 6);
    columns.push(Column::new(
        ID_COLUMN.into(),
        rows.iter().map(|r| r.pair_id.as_str()).collect::<Vec<_>>(),
    ));
    columns.push(Column::new(
        STATE_COLUMN.into(),
        rows.iter().map(|r| r.state.is_mutated()).collect::<Vec<_>>(),
    ));
    columns.push(Column::new(
        IN_MRE_COLUMN.into(),
        rows.iter().map(|r| r.in_mre).collect::<Vec<_>>(),
    ));

    let values: Vec<_> = rows.iter().map(FeatureRow::values).collect();
    for (i, name) in FEATURE_COLUMNS.iter().enumerate() {
        columns.push(Column::new(
            (*name).into(),
            values.iter().map(|v| v[i]).collect::<Vec<Option<f64>>>(),
        ));
    }

    // inspection columns for --keep-features; the scorer selects by name
    columns.push(Column::new(
        "alignment_string".into(),
        rows.iter().map(|r| r.alignment.as_str()).collect::<Vec<_>>(),
    ));
    columns.push(Column::new(
        "mre_start".into(),
        rows.iter().map(|r| r.mre_start as u64).collect::<Vec<_>>(),
    ));
    columns.push(Column::new(
        "mre_end".into(),
        rows.iter().map(|r| r.mre_end as u64).collect::<Vec<_>>(),
    ));
    DataFrame::new(columns)
}
