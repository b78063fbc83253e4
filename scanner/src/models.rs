use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::errors::ScanError;

/// A single point mutation as read from the variant table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub chrom: String,
    /// 1-based position of the first reference base.
    pub pos: u64,
    pub id: String,
    pub reference: String,
    pub alternate: String,
}

impl Variant {
    /// Rewrites `id` into the `{id}_{chr}_{pos}_{ref}_{alt}` key used everywhere downstream.
    pub fn with_augmented_id(mut self) -> Self {
        self.id = format!(
            "{}_{}_{}_{}_{}",
            self.id, self.chrom, self.pos, self.reference, self.alternate
        );
        self
    }

    pub fn ref_len(&self) -> u64 {
        self.reference.len() as u64
    }
}

/// Which side of the comparison a window, job or score belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MutationState {
    WildType,
    Mutant,
}

impl MutationState {
    pub const BOTH: [MutationState; 2] = [MutationState::WildType, MutationState::Mutant];

    /// Marker written into duplex batch headers and result rows.
    pub fn marker(self) -> &'static str {
        match self {
            MutationState::WildType => "wt",
            MutationState::Mutant => "mut",
        }
    }

    pub fn is_mutated(self) -> bool {
        matches!(self, MutationState::Mutant)
    }

    #[cfg(test)]
    pub fn swapped(self) -> Self {
        match self {
            MutationState::WildType => MutationState::Mutant,
            MutationState::Mutant => MutationState::WildType,
        }
    }
}

impl fmt::Display for MutationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

impl FromStr for MutationState {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "wt" => Ok(MutationState::WildType),
            // older batches were tagged "mt"
            "mut" | "mt" => Ok(MutationState::Mutant),
            other => Err(ScanError::DuplexParse(format!(
                "unknown mutation state marker '{}'",
                other
            ))),
        }
    }
}

/// Wild-type and mutant transcript windows around one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceWindow {
    pub variant_id: String,
    pub upstream: String,
    pub downstream: String,
    pub wild_type: String,
    pub mutant: String,
}

impl SequenceWindow {
    pub fn sequence(&self, state: MutationState) -> &str {
        match state {
            MutationState::WildType => &self.wild_type,
            MutationState::Mutant => &self.mutant,
        }
    }

    /// 0-based offset of the variant's first base inside either window.
    pub fn variant_offset(&self) -> usize {
        self.upstream.len()
    }
}

/// One entry of the microRNA catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct MicroRna {
    pub accession: String,
    pub sequence: String,
    pub conservation: Option<f64>,
}

/// A single folding request: one transcript window against one microRNA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplexJob<'a> {
    pub long_sequence: &'a str,
    pub short_sequence: &'a str,
    pub long_id: &'a str,
    pub short_id: &'a str,
    pub state: MutationState,
}

impl DuplexJob<'_> {
    /// FASTA-style header naming the job; parsed back by the output transform.
    pub fn header(&self) -> String {
        format!("{}-{}-{}", self.long_id, self.short_id, self.state.marker())
    }
}

/// Structured folding output for one job.
///
/// Coordinates are 0-based half-open: `mrna_start..mrna_end` on the transcript
/// window, `mirna_start..mirna_end` on the microRNA.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplexResult {
    pub mutation_id: String,
    pub mirna_accession: String,
    pub mrna_dot_bracket: String,
    pub mirna_dot_bracket: String,
    pub mrna_start: usize,
    pub mrna_end: usize,
    pub mirna_start: usize,
    pub mirna_end: usize,
    pub pred_energy: f64,
    #[serde(serialize_with = "serialize_state")]
    pub state: MutationState,
}

fn serialize_state<S: serde::Serializer>(state: &MutationState, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(state.marker())
}

impl DuplexResult {
    /// Neutral row for a job the folding tool produced no structure for.
    pub fn placeholder(mutation_id: &str, mirna_accession: &str, state: MutationState) -> Self {
        DuplexResult {
            mutation_id: mutation_id.to_string(),
            mirna_accession: mirna_accession.to_string(),
            mrna_dot_bracket: String::new(),
            mirna_dot_bracket: String::new(),
            mrna_start: 0,
            mrna_end: 0,
            mirna_start: 0,
            mirna_end: 0,
            pred_energy: 0.0,
            state,
        }
    }

    pub fn pair_id(&self) -> String {
        pair_id(&self.mutation_id, &self.mirna_accession)
    }
}

pub fn pair_id(mutation_id: &str, mirna_accession: &str) -> String {
    format!("{}_{}", mutation_id, mirna_accession)
}

/// Final per (variant, microRNA) comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPair {
    pub id: String,
    pub wt_score: f64,
    pub mut_score: f64,
    pub pred_difference: f64,
    pub in_mre: bool,
}

impl ScoredPair {
    pub fn wt_binary(&self) -> i32 {
        binary_call(self.wt_score)
    }

    pub fn mut_binary(&self) -> i32 {
        binary_call(self.mut_score)
    }

    pub fn binary_difference(&self) -> i32 {
        self.mut_binary() - self.wt_binary()
    }
}

fn binary_call(score: f64) -> i32 {
    i32::from(score > 0.5)
}
