//! Column layout the pretrained model was fitted on.
//!
//! The feature builder names its output columns after these entries and the
//! scorer selects exactly this list, in this order, before building the model
//! matrix. A missing column is an error, never a silently shifted matrix.

pub const FEATURE_COLUMNS: [&str; 25] = [
    "pred_energy",
    "pred_num_basepairs",
    "pred_seed_basepairs",
    "ta_log10",
    "sps_mean",
    "anchor_a",
    "6mer_seed",
    "match_8",
    "6mer_seed_1_mismatch",
    "compensatory_site",
    "supplementary_site",
    "supplementary_site_2",
    "empty_seed",
    "9_consecutive_match_anywhere",
    "mirna_conservation",
    "seed_8mer",
    "seed_7mer_a1",
    "seed_7mer_m8",
    "seed_compensatory",
    "seed_clash_2",
    "seed_clash_3",
    "seed_clash_4",
    "seed_clash_5",
    "mre_au_content",
    "local_au_content",
];

/// Identifier columns carried next to the features.
pub const ID_COLUMN: &str = "id";
pub const STATE_COLUMN: &str = "is_mutated";
pub const IN_MRE_COLUMN: &str = "is_mutation_in_mre";

/// Columns of the structured folding output, in file order.
pub const DUPLEX_COLUMNS: [&str; 10] = [
    "mutation_id",
    "mirna_accession",
    "mrna_dot_bracket_5to3",
    "mirna_dot_bracket_5to3",
    "mrna_start",
    "mrna_end",
    "mirna_start",
    "mirna_end",
    "pred_energy",
    "is_mutated",
];
