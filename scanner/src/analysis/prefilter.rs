use tracing::info;

use crate::data_handling::reference_tables::MirnaLoci;
use crate::models::{SequenceWindow, Variant};

/// A variant lying inside an annotated microRNA gene.
#[derive(Debug, Clone)]
pub struct InMirnaVariant {
    pub window: SequenceWindow,
    pub mirna_accession: String,
}

/// Split of a chunk's windows into the two analysis cases.
#[derive(Debug, Default)]
pub struct CaseSplit {
    /// Case 1: folded against the whole catalog.
    pub candidates: Vec<(Variant, SequenceWindow)>,
    /// Case 2: the mutation hits a microRNA locus itself.
    pub in_mirna: Vec<InMirnaVariant>,
}

/// Every variant lands in exactly one of the two cases.
pub fn classify_variants(windows: Vec<(Variant, SequenceWindow)>, loci: &MirnaLoci) -> CaseSplit {
    let mut split = CaseSplit::default();
    for (variant, window) in windows {
        match loci.containing(&variant.chrom, variant.pos) {
            Some(accession) => split.in_mirna.push(InMirnaVariant {
                window,
                mirna_accession: accession.to_string(),
            }),
            None => split.candidates.push((variant, window)),
        }
    }
    if !split.in_mirna.is_empty() {
        info!("case 2 mutations: {}", split.in_mirna.len());
    }
    split
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_handling::reference_tables::MirnaLocus;

    fn entry(chrom: &str, pos: u64) -> (Variant, SequenceWindow) {
        let id = format!("v_{}_{}", chrom, pos);
        (
            Variant {
                chrom: chrom.into(),
                pos,
                id: id.clone(),
                reference: "A".into(),
                alternate: "G".into(),
            },
            SequenceWindow {
                variant_id: id,
                upstream: "CAT".into(),
                downstream: "GCA".into(),
                wild_type: "CATAGCA".into(),
                mutant: "CATGGCA".into(),
            },
        )
    }

    #[test]
    fn split_is_exclusive_and_exhaustive() {
        let mut loci = MirnaLoci::default();
        loci.insert(
            "1",
            MirnaLocus {
                start: 90,
                end: 110,
                accession: "MI0000001".into(),
            },
        );

        let input = vec![entry("1", 100), entry("1", 200), entry("2", 100)];
        let split = classify_variants(input, &loci);

        assert_eq!(split.in_mirna.len(), 1);
        assert_eq!(split.in_mirna[0].mirna_accession, "MI0000001");
        assert_eq!(split.in_mirna[0].window.variant_id, "v_1_100");
        let candidate_ids: Vec<_> = split.candidates.iter().map(|(v, _)| v.id.as_str()).collect();
        assert_eq!(candidate_ids, vec!["v_1_200", "v_2_100"]);
    }
}
