use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{ScanError, ScanResult};

pub const DEFAULT_FLANK: usize = 30;
pub const DEFAULT_CHUNKSIZE: usize = 100;
pub const DEFAULT_THRESHOLD: f64 = 0.25;
pub const RUN_CONFIG_FILE: &str = "run_config.json";

/// Where the read-only reference data lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReferencePaths {
    pub genome_dir: PathBuf,
    pub species: String,
    pub assembly: String,
    pub mirna_catalog: PathBuf,
    pub mirna_coords: PathBuf,
    pub ta_sps: PathBuf,
    pub model: PathBuf,
    /// Folding binary; looked up on `PATH` when unset.
    pub rnaduplex: Option<PathBuf>,
}

impl Default for ReferencePaths {
    fn default() -> Self {
        ReferencePaths {
            genome_dir: PathBuf::from("data/fasta/grch37"),
            species: "Homo_sapiens".to_string(),
            assembly: "GRCh37".to_string(),
            mirna_catalog: PathBuf::from("data/mirna/mirna.csv"),
            mirna_coords: PathBuf::from("data/mirna_coordinates/grch37_coordinates.csv"),
            ta_sps: PathBuf::from("data/ta_sps/ta_sps.csv"),
            model: PathBuf::from("misc/models/model_with_no_close_proximity.json"),
            rnaduplex: None,
        }
    }
}

/// Fully resolved run configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanConfig {
    pub variants: PathBuf,
    pub output_dir: PathBuf,
    pub flank: usize,
    pub chunksize: usize,
    pub workers: usize,
    pub threshold: f64,
    pub skip_folding: bool,
    pub mre_filter: bool,
    pub keep_features: bool,
    pub start_row: Option<usize>,
    pub end_row: Option<usize>,
    pub references: ReferencePaths,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            variants: PathBuf::new(),
            output_dir: PathBuf::from("./results"),
            flank: DEFAULT_FLANK,
            chunksize: DEFAULT_CHUNKSIZE,
            workers: default_workers(),
            threshold: DEFAULT_THRESHOLD,
            skip_folding: false,
            mre_filter: false,
            keep_features: false,
            start_row: None,
            end_row: None,
            references: ReferencePaths::default(),
        }
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl ScanConfig {
    pub fn validate(&self) -> ScanResult<()> {
        if self.chunksize == 0 {
            return Err(ScanError::Config("chunksize must be positive".into()));
        }
        if self.workers == 0 {
            return Err(ScanError::Config("workers must be positive".into()));
        }
        if self.flank == 0 {
            return Err(ScanError::Config("flank must be positive".into()));
        }
        if !(self.threshold >= 0.0) {
            return Err(ScanError::Config(format!(
                "threshold must be a non-negative number, got {}",
                self.threshold
            )));
        }
        if let (Some(start), Some(end)) = (self.start_row, self.end_row) {
            if end < start {
                return Err(ScanError::Config(format!(
                    "end row {} precedes start row {}",
                    end, start
                )));
            }
        }
        Ok(())
    }

    /// Input file stem up to the first dot, e.g. `sample` for `sample.vcf.tsv`.
    pub fn vcf_id(&self) -> String {
        self.variants
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.split('.').next())
            .unwrap_or("variants")
            .to_string()
    }

    pub fn run_dir(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}", self.vcf_id(), self.chunksize))
    }

    pub fn write_json(&self, dir: &Path) -> ScanResult<PathBuf> {
        let path = dir.join(RUN_CONFIG_FILE);
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }
}
