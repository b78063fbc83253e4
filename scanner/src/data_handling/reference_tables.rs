use std::collections::HashMap;
use std::path::PathBuf;

use polars::prelude::*;
use tracing::{error, info, warn};

use crate::errors::ScanResult;
use crate::helper_functions::{f64_values, i64_values, read_csv_with_dtypes, str_values};
use crate::models::MicroRna;

/// A reference table on disk that loads into a typed, read-only lookup.
pub trait Dataset {
    type Table;

    fn load(&self) -> ScanResult<Self::Table>;
}

/// Key columns are pinned to strings; inference only sees the first rows.
fn load_frame(kind: &str, path: &PathBuf, string_columns: &[&str]) -> PolarsResult<DataFrame> {
    info!("Reading {} from {}", kind, path.display());
    let dtypes: Vec<(&str, DataType)> = string_columns
        .iter()
        .map(|name| (*name, DataType::String))
        .collect();
    match read_csv_with_dtypes(path, &dtypes) {
        Ok(df) => Ok(df),
        Err(e) => {
            error!("Failed to read {} CSV: {}", kind, e);
            Err(e)
        }
    }
}

fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_names().iter().any(|c| c.as_str() == name)
}

pub struct MirnaCatalogSource {
    pub path: PathBuf,
}

/// All catalog microRNAs in file order, addressable by accession.
#[derive(Debug, Clone, Default)]
pub struct MirnaCatalog {
    entries: Vec<MicroRna>,
    by_accession: HashMap<String, usize>,
}

impl MirnaCatalog {
    pub fn new(mirnas: Vec<MicroRna>) -> Self {
        let mut catalog = MirnaCatalog::default();
        for mirna in mirnas {
            if catalog.by_accession.contains_key(&mirna.accession) {
                warn!("Duplicate catalog accession {}, keeping the first", mirna.accession);
                continue;
            }
            catalog
                .by_accession
                .insert(mirna.accession.clone(), catalog.entries.len());
            catalog.entries.push(mirna);
        }
        catalog
    }

    pub fn entries(&self) -> &[MicroRna] {
        &self.entries
    }

    pub fn get(&self, accession: &str) -> Option<&MicroRna> {
        self.by_accession.get(accession).map(|&i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Dataset for MirnaCatalogSource {
    type Table = MirnaCatalog;

    fn load(&self) -> ScanResult<MirnaCatalog> {
        let df = load_frame("microRNA catalog", &self.path, &["mirna_accession", "sequence"])?;
        let accessions = str_values(&df, "mirna_accession")?;
        let sequences = str_values(&df, "sequence")?;
        let conservation = if has_column(&df, "conservation") {
            f64_values(&df, "conservation")?
        } else {
            warn!("Catalog has no conservation column; all values will be null");
            vec![None; df.height()]
        };

        let mirnas = accessions
            .into_iter()
            .zip(sequences)
            .zip(conservation)
            .map(|((accession, sequence), conservation)| MicroRna {
                accession,
                sequence: sequence.trim().to_ascii_uppercase(),
                conservation,
            })
            .collect();
        let catalog = MirnaCatalog::new(mirnas);
        info!("Loaded {} microRNAs", catalog.len());
        Ok(catalog)
    }
}

pub struct TaSpsSource {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TaSps {
    pub ta_log10: Option<f64>,
    pub sps_mean: Option<f64>,
}

/// Site-abundance and seed-pairing-stability values keyed by microRNA seed.
#[derive(Debug, Clone, Default)]
pub struct TaSpsTable {
    by_seed: HashMap<String, TaSps>,
}

impl TaSpsTable {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, TaSps)>) -> Self {
        let mut by_seed = HashMap::new();
        for (seed, values) in pairs {
            by_seed.entry(seed).or_insert(values);
        }
        TaSpsTable { by_seed }
    }

    /// Missing seeds yield nulls, the same as a left join would.
    pub fn lookup(&self, seed: &str) -> TaSps {
        self.by_seed.get(seed).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_seed.len()
    }
}

impl Dataset for TaSpsSource {
    type Table = TaSpsTable;

    fn load(&self) -> ScanResult<TaSpsTable> {
        let df = load_frame("TA/SPS table", &self.path, &["seed_8mer"])?;
        let seeds = str_values(&df, "seed_8mer")?;
        let ta = f64_values(&df, "ta_log10")?;
        let sps = f64_values(&df, "sps_mean")?;

        let table = TaSpsTable::from_pairs(seeds.into_iter().zip(ta.into_iter().zip(sps)).map(
            |(seed, (ta_log10, sps_mean))| (seed, TaSps { ta_log10, sps_mean }),
        ));
        info!("Loaded TA/SPS values for {} seeds", table.len());
        Ok(table)
    }
}

pub struct MirnaLociSource {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirnaLocus {
    pub start: u64,
    pub end: u64,
    pub accession: String,
}

/// Genomic intervals of annotated microRNA genes, per chromosome.
#[derive(Debug, Clone, Default)]
pub struct MirnaLoci {
    by_chrom: HashMap<String, Vec<MirnaLocus>>,
}

impl MirnaLoci {
    pub fn insert(&mut self, chrom: &str, locus: MirnaLocus) {
        self.by_chrom.entry(chrom.to_string()).or_default().push(locus);
    }

    /// Accession of the first locus (in file order) containing `pos`, inclusive bounds.
    pub fn containing(&self, chrom: &str, pos: u64) -> Option<&str> {
        self.by_chrom
            .get(chrom)?
            .iter()
            .find(|l| l.start <= pos && pos <= l.end)
            .map(|l| l.accession.as_str())
    }

    pub fn len(&self) -> usize {
        self.by_chrom.values().map(Vec::len).sum()
    }
}

impl Dataset for MirnaLociSource {
    type Table = MirnaLoci;

    fn load(&self) -> ScanResult<MirnaLoci> {
        let df = load_frame("microRNA coordinates", &self.path, &["chr", "mirna_accession"])?;
        let chroms = str_values(&df, "chr")?;
        let starts = i64_values(&df, "start")?;
        let ends = i64_values(&df, "end")?;
        let accessions = str_values(&df, "mirna_accession")?;

        let mut loci = MirnaLoci::default();
        for (((chrom, start), end), accession) in chroms.iter().zip(starts).zip(ends).zip(accessions) {
            match (start, end) {
                (Some(start), Some(end)) if start >= 0 && end >= start => loci.insert(
                    chrom,
                    MirnaLocus {
                        start: start as u64,
                        end: end as u64,
                        accession,
                    },
                ),
                _ => warn!("Skipping microRNA locus {} with bad coordinates", accession),
            }
        }
        info!("Loaded {} microRNA loci", loci.len());
        Ok(loci)
    }
}
