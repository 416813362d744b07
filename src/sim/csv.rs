use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::array::req::Cycle;
use crate::array::stats::ArrayStats;
use crate::cache::CacheStats;

/// Semicolon-separated stats dump, one quoted `"name";"value"` row per
/// counter, histogram buckets as indexed sub-rows. Dumps append, so a run
/// can snapshot repeatedly into one file.
pub struct CsvBackend {
    path: PathBuf,
}

impl CsvBackend {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut out = File::create(&path)?;
        writeln!(out, "# zline stats")?;
        Ok(Self { path })
    }

    pub fn dump(&self, name: &str, cache: &CacheStats, array: &ArrayStats) -> io::Result<()> {
        let mut out = BufWriter::new(OpenOptions::new().append(true).open(&self.path)?);
        writeln!(out, "\"{name}\"")?;
        writeln!(out, ";\"accesses\";\"{}\"", cache.accesses)?;
        writeln!(out, ";\"hits\";\"{}\"", cache.hits)?;
        writeln!(out, ";\"misses\";\"{}\"", cache.misses)?;
        writeln!(out, ";\"rangeMisses\";\"{}\"", cache.range_misses)?;
        for (counter, value) in array.named_counters() {
            writeln!(out, ";\"{counter}\";\"{value}\"")?;
        }
        writeln!(out, ";\"cacheLineUsedBytes\"")?;
        for (bytes, count) in array.cache_line_used_bytes.buckets().iter().enumerate() {
            writeln!(out, ";;\"{bytes}\";\"{count}\"")?;
        }
        out.flush()
    }
}

#[derive(Debug, Serialize)]
pub struct StatsRecord<'a> {
    pub cycle: Cycle,
    pub name: &'a str,
    pub cache: &'a CacheStats,
    pub array: &'a ArrayStats,
}

/// One JSON object per dump, newline-delimited.
pub struct JsonBackend {
    writer: BufWriter<File>,
}

impl JsonBackend {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
        })
    }

    pub fn dump(&mut self, record: &StatsRecord) -> io::Result<()> {
        let payload = serde_json::to_string(record)?;
        writeln!(self.writer, "{payload}")?;
        self.writer.flush()
    }
}
