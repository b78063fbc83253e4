use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::config::{
    default_workers, ReferencePaths, ScanConfig, DEFAULT_CHUNKSIZE, DEFAULT_FLANK, DEFAULT_THRESHOLD,
};

#[derive(Parser, Debug)]
#[command(version, about = "Score variants for their effect on microRNA binding", long_about = None)]
pub struct Args {
    #[arg(value_name = "VARIANTS", help = "Tab-separated variant table: chr, pos, id, ref, alt")]
    pub variants: PathBuf,

    #[arg(
        short = 'o',
        long = "output-dir",
        value_name = "DIR",
        default_value = "./results",
        help = "Directory the run folder is created in"
    )]
    pub output_dir: PathBuf,

    #[arg(
        short = 'c',
        long = "chunksize",
        value_name = "N",
        default_value_t = DEFAULT_CHUNKSIZE,
        help = "Variants per chunk"
    )]
    pub chunksize: usize,

    #[arg(
        short = 't',
        long = "workers",
        value_name = "THREADS",
        default_value_t = default_workers(),
        help = "Number of worker threads"
    )]
    pub workers: usize,

    #[arg(
        long = "flank",
        value_name = "NT",
        default_value_t = DEFAULT_FLANK,
        help = "Bases on each side of the variant"
    )]
    pub flank: usize,

    #[arg(
        long = "threshold",
        value_name = "FLOAT",
        default_value_t = DEFAULT_THRESHOLD,
        help = "Minimum |mut - wt| score difference to report"
    )]
    pub threshold: f64,

    #[arg(long = "skip-folding", action = ArgAction::SetTrue, help = "Stop after building windows")]
    pub skip_folding: bool,

    #[arg(
        long = "mre-filter",
        action = ArgAction::SetTrue,
        help = "Only report pairs whose variant lies inside the predicted MRE"
    )]
    pub mre_filter: bool,

    #[arg(long = "keep-features", action = ArgAction::SetTrue, help = "Write per-chunk feature tables")]
    pub keep_features: bool,

    #[arg(long = "start-row", value_name = "ROW", help = "First input row (0-based, inclusive)")]
    pub start_row: Option<usize>,

    #[arg(long = "end-row", value_name = "ROW", help = "Last input row (exclusive)")]
    pub end_row: Option<usize>,

    #[arg(long = "genome-dir", value_name = "DIR", default_value = "data/fasta/grch37")]
    pub genome_dir: PathBuf,

    #[arg(long = "species", default_value = "Homo_sapiens")]
    pub species: String,

    #[arg(long = "assembly", default_value = "GRCh37")]
    pub assembly: String,

    #[arg(long = "mirna-catalog", value_name = "PATH", default_value = "data/mirna/mirna.csv")]
    pub mirna_catalog: PathBuf,

    #[arg(
        long = "mirna-coords",
        value_name = "PATH",
        default_value = "data/mirna_coordinates/grch37_coordinates.csv"
    )]
    pub mirna_coords: PathBuf,

    #[arg(long = "ta-sps", value_name = "PATH", default_value = "data/ta_sps/ta_sps.csv")]
    pub ta_sps: PathBuf,

    #[arg(
        long = "model",
        value_name = "PATH",
        default_value = "misc/models/model_with_no_close_proximity.json"
    )]
    pub model: PathBuf,

    #[arg(long = "rnaduplex", value_name = "PATH", help = "RNAduplex binary (default: found on PATH)")]
    pub rnaduplex: Option<PathBuf>,

    #[arg(short = 'v', long = "verbose", action = ArgAction::SetTrue)]
    pub verbose: bool,
}

impl Args {
    pub fn into_config(self) -> ScanConfig {
        ScanConfig {
            variants: self.variants,
            output_dir: self.output_dir,
            flank: self.flank,
            chunksize: self.chunksize,
            workers: self.workers,
            threshold: self.threshold,
            skip_folding: self.skip_folding,
            mre_filter: self.mre_filter,
            keep_features: self.keep_features,
            start_row: self.start_row,
            end_row: self.end_row,
            references: ReferencePaths {
                genome_dir: self.genome_dir,
                species: self.species,
                assembly: self.assembly,
                mirna_catalog: self.mirna_catalog,
                mirna_coords: self.mirna_coords,
                ta_sps: self.ta_sps,
                model: self.model,
                rnaduplex: self.rnaduplex,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_config_defaults() {
        let args = Args::parse_from(["mirna_scanner", "sample.tsv"]);
        let config = args.into_config();
        let defaults = ScanConfig::default();
        assert_eq!(config.chunksize, defaults.chunksize);
        assert_eq!(config.flank, defaults.flank);
        assert_eq!(config.threshold, defaults.threshold);
        assert_eq!(config.references, defaults.references);
        assert!(!config.skip_folding);
    }

    #[test]
    fn flags_and_row_range_parse() {
        let args = Args::parse_from([
            "mirna_scanner",
            "sample.tsv",
            "--skip-folding",
            "--mre-filter",
            "--start-row",
            "10",
            "--end-row",
            "20",
            "-t",
            "2",
        ]);
        let config = args.into_config();
        assert!(config.skip_folding && config.mre_filter);
        assert_eq!((config.start_row, config.end_row), (Some(10), Some(20)));
        assert_eq!(config.workers, 2);
    }
}
