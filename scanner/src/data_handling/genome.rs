//! Random access into per-chromosome FASTA files.
//!
//! Each chromosome file holds one header line followed by sequence lines of a
//! single fixed width, so the byte offset of any 1-based position can be
//! computed directly instead of scanning:
//!
//! ```text
//! offset(pos) = header_end + (pos - 1) + (pos - 1) / line_width
//! ```
//!
//! Files are memory-mapped once and shared by every worker. Lookups are
//! memoized in a [`SequenceCache`] that lives as long as the accessor and is
//! never evicted: reference sequence does not change during a run.

use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use log::debug;
use memmap2::Mmap;

use crate::errors::{ScanError, ScanResult};

/// One mapped chromosome file.
pub struct ChromosomeFile {
    chrom: String,
    mmap: Mmap,
    seq_start: usize,
    line_width: usize,
}

impl ChromosomeFile {
    pub fn open(chrom: &str, path: &Path) -> ScanResult<Self> {
        let file = File::open(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ScanError::ChromosomeMissing {
                chrom: chrom.to_string(),
                path: path.to_path_buf(),
            },
            _ => ScanError::Io(e),
        })?;
        // reference files are read-only inputs for the lifetime of the run
        let mmap = unsafe { Mmap::map(&file)? };

        let malformed = |reason: &str| ScanError::MalformedFasta {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        let header_end = mmap
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| malformed("no sequence after header"))?;
        let seq_start = header_end + 1;
        let first_line = &mmap[seq_start..];
        let line_width = first_line
            .iter()
            .position(|&b| b == b'\n')
            .unwrap_or(first_line.len());

        if line_width == 0 {
            return Err(malformed("empty first sequence line"));
        }
        if first_line[..line_width].contains(&b'\r') {
            return Err(malformed("CRLF line endings are not supported"));
        }

        debug!(
            "Mapped chromosome {} ({} bytes, line width {})",
            chrom,
            mmap.len(),
            line_width
        );

        Ok(ChromosomeFile {
            chrom: chrom.to_string(),
            mmap,
            seq_start,
            line_width,
        })
    }

    /// Byte offset of a 1-based position; `None` for position 0 or when the
    /// offset does not fit in `usize`.
    fn offset(&self, pos: u64) -> Option<usize> {
        let p = usize::try_from(pos.checked_sub(1)?).ok()?;
        self.seq_start.checked_add(p)?.checked_add(p / self.line_width)
    }

    pub fn nucleotide_at(&self, pos: u64) -> ScanResult<char> {
        let out_of_range = || ScanError::PositionOutOfRange {
            chrom: self.chrom.clone(),
            pos,
        };
        match self.offset(pos).and_then(|at| self.mmap.get(at)) {
            Some(&b) if !b.is_ascii_whitespace() => Ok(b as char),
            _ => Err(out_of_range()),
        }
    }

    /// Bases in the inclusive 1-based interval `start..=end`, clipped to the
    /// chromosome. An empty interval (`end < start`) yields an empty string.
    pub fn nucleotides_in(&self, start: u64, end: u64) -> String {
        let start = start.max(1);
        if end < start {
            return String::new();
        }
        let len = self.mmap.len();
        let from = match self.offset(start) {
            Some(from) if from < len => from,
            _ => return String::new(),
        };
        let to = self
            .offset(end)
            .and_then(|at| at.checked_add(1))
            .map_or(len, |to| to.min(len));

        self.mmap[from..to]
            .iter()
            .filter(|b| !b.is_ascii_whitespace())
            .map(|&b| b as char)
            .collect()
    }
}

/// Memoized lookups, keyed by locus.
#[derive(Default)]
pub struct SequenceCache {
    nucleotides: DashMap<(String, u64), char>,
    intervals: DashMap<(String, u64, u64), Arc<str>>,
}

#[cfg(test)]
impl SequenceCache {
    pub fn len(&self) -> usize {
        self.nucleotides.len() + self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct GenomeAccessor {
    genome_dir: PathBuf,
    species: String,
    assembly: String,
    files: DashMap<String, Arc<ChromosomeFile>>,
    cache: SequenceCache,
}

impl GenomeAccessor {
    pub fn new(genome_dir: impl Into<PathBuf>, species: &str, assembly: &str) -> Self {
        GenomeAccessor {
            genome_dir: genome_dir.into(),
            species: species.to_string(),
            assembly: assembly.to_string(),
            files: DashMap::new(),
            cache: SequenceCache::default(),
        }
    }

    pub fn chromosome_path(&self, chrom: &str) -> PathBuf {
        self.genome_dir.join(format!(
            "{}.{}.dna.chromosome.{}.fa",
            self.species, self.assembly, chrom
        ))
    }

    #[cfg(test)]
    pub fn cache(&self) -> &SequenceCache {
        &self.cache
    }

    fn chromosome(&self, chrom: &str) -> ScanResult<Arc<ChromosomeFile>> {
        if let Some(file) = self.files.get(chrom) {
            return Ok(Arc::clone(file.value()));
        }
        let opened = Arc::new(ChromosomeFile::open(chrom, &self.chromosome_path(chrom))?);
        let entry = self.files.entry(chrom.to_string()).or_insert(opened);
        Ok(Arc::clone(entry.value()))
    }

    pub fn nucleotide_at(&self, chrom: &str, pos: u64) -> ScanResult<char> {
        let key = (chrom.to_string(), pos);
        if let Some(hit) = self.cache.nucleotides.get(&key) {
            return Ok(*hit.value());
        }
        let base = self.chromosome(chrom)?.nucleotide_at(pos)?;
        self.cache.nucleotides.insert(key, base);
        Ok(base)
    }

    pub fn nucleotides_in(&self, chrom: &str, start: u64, end: u64) -> ScanResult<Arc<str>> {
        let key = (chrom.to_string(), start, end);
        if let Some(hit) = self.cache.intervals.get(&key) {
            return Ok(Arc::clone(hit.value()));
        }
        let seq: Arc<str> = self.chromosome(chrom)?.nucleotides_in(start, end).into();
        self.cache.intervals.insert(key, Arc::clone(&seq));
        Ok(seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::fs;

    const SPECIES: &str = "Homo_sapiens";
    const ASSEMBLY: &str = "GRCh37";

    fn random_sequence(len: usize, seed: u64) -> String {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..len)
            .map(|_| b"ACGT"[rng.gen_range(0..4)] as char)
            .collect()
    }

    fn write_fasta(dir: &Path, chrom: &str, seq: &str, width: usize) {
        let mut body = format!(">{} dna:chromosome\n", chrom);
        for line in seq.as_bytes().chunks(width) {
            body.push_str(std::str::from_utf8(line).unwrap());
            body.push('\n');
        }
        let path = dir.join(format!("{}.{}.dna.chromosome.{}.fa", SPECIES, ASSEMBLY, chrom));
        fs::write(path, body).unwrap();
    }

    /// Reference answer: strip the header and all newlines, then index.
    fn naive_scan(dir: &Path, chrom: &str) -> Vec<char> {
        let path = dir.join(format!("{}.{}.dna.chromosome.{}.fa", SPECIES, ASSEMBLY, chrom));
        let text = fs::read_to_string(path).unwrap();
        text.lines().skip(1).flat_map(|l| l.chars()).collect()
    }

    #[test]
    fn single_bases_match_naive_scan() {
        let dir = tempfile::tempdir().unwrap();
        for (i, width) in [60usize, 7, 1].iter().enumerate() {
            let chrom = format!("{}", i + 1);
            write_fasta(dir.path(), &chrom, &random_sequence(503, i as u64), *width);
        }
        let genome = GenomeAccessor::new(dir.path(), SPECIES, ASSEMBLY);

        for chrom in ["1", "2", "3"] {
            let expected = naive_scan(dir.path(), chrom);
            for (idx, base) in expected.iter().enumerate() {
                assert_eq!(genome.nucleotide_at(chrom, idx as u64 + 1).unwrap(), *base);
            }
        }
    }

    #[test]
    fn intervals_match_naive_scan() {
        let dir = tempfile::tempdir().unwrap();
        write_fasta(dir.path(), "X", &random_sequence(250, 7), 13);
        let genome = GenomeAccessor::new(dir.path(), SPECIES, ASSEMBLY);
        let expected: String = naive_scan(dir.path(), "X").into_iter().collect();

        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let start = rng.gen_range(1..=250u64);
            let end = rng.gen_range(start..=250u64);
            let got = genome.nucleotides_in("X", start, end).unwrap();
            assert_eq!(&*got, &expected[(start - 1) as usize..end as usize]);
        }
    }

    #[test]
    fn empty_and_clipped_intervals() {
        let dir = tempfile::tempdir().unwrap();
        write_fasta(dir.path(), "1", "ACGTACGTAC", 4);
        let genome = GenomeAccessor::new(dir.path(), SPECIES, ASSEMBLY);

        assert_eq!(&*genome.nucleotides_in("1", 1, 0).unwrap(), "");
        assert_eq!(&*genome.nucleotides_in("1", 8, 20).unwrap(), "TAC");
        assert_eq!(&*genome.nucleotides_in("1", 30, 40).unwrap(), "");
    }

    #[test]
    fn missing_chromosome_and_bad_positions_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        write_fasta(dir.path(), "1", "ACGT", 60);
        let genome = GenomeAccessor::new(dir.path(), SPECIES, ASSEMBLY);

        assert!(matches!(
            genome.nucleotide_at("22", 1),
            Err(ScanError::ChromosomeMissing { .. })
        ));
        assert!(matches!(
            genome.nucleotide_at("1", 0),
            Err(ScanError::PositionOutOfRange { .. })
        ));
        assert!(matches!(
            genome.nucleotide_at("1", 5),
            Err(ScanError::PositionOutOfRange { .. })
        ));
    }

    #[test]
    fn positions_near_u64_max_are_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        write_fasta(dir.path(), "1", "ACGTACGT", 3);
        let genome = GenomeAccessor::new(dir.path(), SPECIES, ASSEMBLY);

        assert!(matches!(
            genome.nucleotide_at("1", u64::MAX),
            Err(ScanError::PositionOutOfRange { .. })
        ));
        assert_eq!(&*genome.nucleotides_in("1", u64::MAX - 3, u64::MAX).unwrap(), "");
        assert_eq!(&*genome.nucleotides_in("1", 6, u64::MAX).unwrap(), "CGT");
    }

    #[test]
    fn lookups_are_memoized() {
        let dir = tempfile::tempdir().unwrap();
        write_fasta(dir.path(), "1", "ACGTACGT", 60);
        let genome = GenomeAccessor::new(dir.path(), SPECIES, ASSEMBLY);
        assert!(genome.cache().is_empty());

        genome.nucleotide_at("1", 2).unwrap();
        genome.nucleotide_at("1", 2).unwrap();
        genome.nucleotides_in("1", 1, 3).unwrap();
        assert_eq!(genome.cache().len(), 2);
    }
}
