use tracing::{debug, warn};

use crate::data_handling::genome::GenomeAccessor;
use crate::errors::{ScanError, ScanResult};
use crate::models::{SequenceWindow, Variant};

/// A variant excluded from analysis, with the reason it was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidVariant {
    pub id: String,
    pub reason: String,
}

/// Variants that passed the reference check, each with its windows.
#[derive(Debug, Default)]
pub struct WindowBatch {
    pub windows: Vec<(Variant, SequenceWindow)>,
    pub invalid: Vec<InvalidVariant>,
}

/// Observed reference bases at the variant, or `None` if they match the
/// declared allele. Positions past the chromosome end count as a mismatch.
pub fn reference_mismatch(genome: &GenomeAccessor, variant: &Variant) -> ScanResult<Option<String>> {
    let observed = if variant.ref_len() > 1 {
        match variant.pos.checked_add(variant.ref_len() - 1) {
            Some(end) => genome.nucleotides_in(&variant.chrom, variant.pos, end)?.to_string(),
            None => String::new(),
        }
    } else {
        match genome.nucleotide_at(&variant.chrom, variant.pos) {
            Ok(base) => base.to_string(),
            Err(ScanError::PositionOutOfRange { .. }) => String::new(),
            Err(e) => return Err(e),
        }
    };

    if observed.eq_ignore_ascii_case(&variant.reference) {
        Ok(None)
    } else {
        Ok(Some(observed))
    }
}

/// Upstream and downstream flanks of `flank` bases around the reference allele.
pub fn build_window(genome: &GenomeAccessor, variant: &Variant, flank: usize) -> ScanResult<SequenceWindow> {
    let n = flank as u64;
    let upstream_start = variant.pos.saturating_sub(n).max(1);
    let upstream = genome.nucleotides_in(&variant.chrom, upstream_start, variant.pos.saturating_sub(1))?;

    let out_of_range = || ScanError::PositionOutOfRange {
        chrom: variant.chrom.clone(),
        pos: variant.pos,
    };
    let downstream_start = variant.pos.checked_add(variant.ref_len()).ok_or_else(out_of_range)?;
    let downstream_end = downstream_start.checked_add(n).ok_or_else(out_of_range)? - 1;
    let downstream = genome.nucleotides_in(&variant.chrom, downstream_start, downstream_end)?;

    Ok(SequenceWindow {
        variant_id: variant.id.clone(),
        wild_type: format!("{}{}{}", upstream, variant.reference, downstream),
        mutant: format!("{}{}{}", upstream, variant.alternate, downstream),
        upstream: upstream.to_string(),
        downstream: downstream.to_string(),
    })
}

/// Reference-checks every variant and builds windows for the ones that pass.
///
/// Mismatches only narrow the working set; a missing chromosome file is
/// returned as an error because nothing on that chromosome can be analysed.
pub fn build_windows(genome: &GenomeAccessor, variants: Vec<Variant>, flank: usize) -> ScanResult<WindowBatch> {
    let mut batch = WindowBatch::default();

    for variant in variants {
        if let Some(observed) = reference_mismatch(genome, &variant)? {
            debug!(
                "Reference mismatch for {}: expected {}, found '{}'",
                variant.id, variant.reference, observed
            );
            batch.invalid.push(InvalidVariant {
                id: variant.id.clone(),
                reason: format!(
                    "reference mismatch: declared {}, genome has '{}'",
                    variant.reference, observed
                ),
            });
            continue;
        }
        let window = build_window(genome, &variant, flank)?;
        batch.windows.push((variant, window));
    }

    if !batch.invalid.is_empty() {
        warn!("{} variants failed the reference check", batch.invalid.len());
    }
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn genome_with(dir: &Path, chrom: &str, seq: &str) -> GenomeAccessor {
        let mut body = format!(">{}\n", chrom);
        for line in seq.as_bytes().chunks(10) {
            body.push_str(std::str::from_utf8(line).unwrap());
            body.push('\n');
        }
        fs::write(
            dir.join(format!("Homo_sapiens.GRCh37.dna.chromosome.{}.fa", chrom)),
            body,
        )
        .unwrap();
        GenomeAccessor::new(dir, "Homo_sapiens", "GRCh37")
    }

    fn variant(chrom: &str, pos: u64, reference: &str, alternate: &str) -> Variant {
        Variant {
            chrom: chrom.into(),
            pos,
            id: "rs1".into(),
            reference: reference.into(),
            alternate: alternate.into(),
        }
    }

    /// 96 filler bases, then CAT A GCA occupying positions 97..=103.
    fn chr1_sequence() -> String {
        format!("{}CATAGCA{}", "G".repeat(96), "T".repeat(20))
    }

    #[test]
    fn snv_windows_surround_the_allele() {
        let dir = tempfile::tempdir().unwrap();
        let genome = genome_with(dir.path(), "chr1", &chr1_sequence());

        let window = build_window(&genome, &variant("chr1", 100, "A", "G"), 3).unwrap();
        assert_eq!(window.wild_type, "CATAGCA");
        assert_eq!(window.mutant, "CATGGCA");
        assert_eq!(window.wild_type.len(), window.mutant.len());
        assert_eq!(window.variant_offset(), 3);
    }

    #[test]
    fn deletion_flanks_skip_the_reference_span() {
        let dir = tempfile::tempdir().unwrap();
        let genome = genome_with(dir.path(), "chr1", &chr1_sequence());

        let window = build_window(&genome, &variant("chr1", 100, "AG", "A"), 3).unwrap();
        assert_eq!(window.upstream, "CAT");
        assert_eq!(window.downstream, "CAT");
        assert_eq!(window.wild_type, "CATAGCAT");
        assert_eq!(window.mutant, "CATACAT");
    }

    #[test]
    fn upstream_is_clipped_at_chromosome_start() {
        let dir = tempfile::tempdir().unwrap();
        let genome = genome_with(dir.path(), "chr1", &chr1_sequence());

        let window = build_window(&genome, &variant("chr1", 2, "G", "A"), 5).unwrap();
        assert_eq!(window.upstream, "G");
        assert_eq!(window.wild_type, "GGGGGGG");
        assert_eq!(window.mutant, "GAGGGGG");
    }

    #[test]
    fn mismatches_are_reported_and_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let genome = genome_with(dir.path(), "chr1", &chr1_sequence());

        let batch = build_windows(
            &genome,
            vec![
                variant("chr1", 100, "A", "G"),
                variant("chr1", 100, "C", "G"),
                variant("chr1", 500, "A", "G"),
            ],
            3,
        )
        .unwrap();
        assert_eq!(batch.windows.len(), 1);
        assert_eq!(batch.invalid.len(), 2);
    }

    #[test]
    fn positions_at_the_u64_limit_are_rejected_without_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let genome = genome_with(dir.path(), "chr1", &chr1_sequence());

        let batch = build_windows(
            &genome,
            vec![
                variant("chr1", u64::MAX, "A", "G"),
                variant("chr1", u64::MAX - 1, "AG", "A"),
            ],
            3,
        )
        .unwrap();
        assert!(batch.windows.is_empty());
        assert_eq!(batch.invalid.len(), 2);

        assert!(matches!(
            build_window(&genome, &variant("chr1", u64::MAX, "A", "G"), 3),
            Err(ScanError::PositionOutOfRange { .. })
        ));
    }

    #[test]
    fn missing_chromosome_fails_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let genome = genome_with(dir.path(), "chr1", &chr1_sequence());
        let result = build_windows(&genome, vec![variant("chr9", 10, "A", "G")], 3);
        assert!(matches!(result, Err(ScanError::ChromosomeMissing { .. })));
    }
}
