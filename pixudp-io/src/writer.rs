//! Hit list writers.

use crate::Result;
use log::debug;
use pixudp_core::Hit;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Column header of a hit list.
#[must_use]
pub fn format_header(triggered: bool) -> String {
    let mut header = String::from(
        "# PackageID; Layer; Column; Row; TS; TS1; TS2; TriggerTS; TriggerID; ext. TS; ext. TS2; FIFO overflow",
    );
    if triggered {
        header.push_str("; triggertag; TriggerTable overflow");
    }
    header
}

/// Path of the hit list of one layer: `run.dat` becomes `run_l2.dat`.
#[must_use]
pub fn layer_path(path: &Path, layer: i16) -> PathBuf {
    match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) => path.with_file_name(format!(
            "{}_l{layer}.{}",
            stem.to_string_lossy(),
            ext.to_string_lossy()
        )),
        _ => {
            let mut name = path.as_os_str().to_owned();
            name.push(format!("_{layer}"));
            PathBuf::from(name)
        }
    }
}

fn write_line<W: Write>(out: &mut W, hit: &Hit) -> std::io::Result<()> {
    write!(
        out,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
        hit.package_id,
        hit.layer,
        hit.column,
        hit.row,
        hit.short_ts,
        hit.short_ts1,
        hit.short_ts2,
        hit.trigger_ts,
        hit.trigger_index,
        hit.ts,
        hit.ts2,
        u8::from(hit.fifo_overflow)
    )?;
    if hit.trigger_tag != -1 || hit.trigger_fifo_full {
        write!(
            out,
            "\t{}\t{}",
            hit.trigger_tag,
            u8::from(hit.trigger_fifo_full)
        )?;
    }
    writeln!(out)
}

/// Writer for tab-separated hit lists.
///
/// The header is written on creation; one line follows per hit.
pub struct HitListWriter<W: Write> {
    writer: W,
    hits_written: u64,
}

impl HitListWriter<BufWriter<File>> {
    /// Creates a hit list file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P, triggered: bool) -> Result<Self> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file), triggered)
    }
}

impl<W: Write> HitListWriter<W> {
    /// Wraps a writer and writes the header.
    ///
    /// # Errors
    /// Returns an error if the header cannot be written.
    pub fn new(mut writer: W, triggered: bool) -> Result<Self> {
        writeln!(writer, "{}", format_header(triggered))?;
        Ok(Self {
            writer,
            hits_written: 0,
        })
    }

    /// Writes one hit.
    ///
    /// # Errors
    /// Returns an error if the line cannot be written.
    pub fn write_hit(&mut self, hit: &Hit) -> Result<()> {
        write_line(&mut self.writer, hit)?;
        self.hits_written += 1;
        Ok(())
    }

    /// Writes a batch of hits.
    ///
    /// # Errors
    /// Returns an error if a line cannot be written.
    pub fn write_hits(&mut self, hits: &[Hit]) -> Result<()> {
        for hit in hits {
            self.write_hit(hit)?;
        }
        Ok(())
    }

    /// Flushes the writer.
    ///
    /// # Errors
    /// Returns an error if flushing fails.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Number of hits written so far.
    #[must_use]
    pub fn hits_written(&self) -> u64 {
        self.hits_written
    }

    /// Returns the inner writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Writes one hit list per layer next to a base path.
///
/// Files are created on the first hit of a layer, see [`layer_path`].
pub struct SplitHitWriter {
    base: PathBuf,
    triggered: bool,
    writers: BTreeMap<i16, HitListWriter<BufWriter<File>>>,
}

impl SplitHitWriter {
    /// Creates a split writer; no file is created yet.
    #[must_use]
    pub fn new<P: AsRef<Path>>(base: P, triggered: bool) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
            triggered,
            writers: BTreeMap::new(),
        }
    }

    /// Writes a batch of hits, each into the file of its layer.
    ///
    /// # Errors
    /// Returns an error if a file cannot be created or written.
    pub fn write_hits(&mut self, hits: &[Hit]) -> Result<()> {
        for hit in hits {
            let writer = match self.writers.entry(hit.layer) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let path = layer_path(&self.base, hit.layer);
                    debug!("Creating hit list {}", path.display());
                    entry.insert(HitListWriter::create(path, self.triggered)?)
                }
            };
            writer.write_hit(hit)?;
        }
        Ok(())
    }

    /// Flushes every open file.
    ///
    /// # Errors
    /// Returns an error if flushing fails.
    pub fn flush(&mut self) -> Result<()> {
        for writer in self.writers.values_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    /// Files written so far with their hit counts, by layer.
    #[must_use]
    pub fn outputs(&self) -> Vec<(PathBuf, u64)> {
        self.writers
            .iter()
            .map(|(&layer, writer)| (layer_path(&self.base, layer), writer.hits_written()))
            .collect()
    }

    /// Total number of hits written.
    #[must_use]
    pub fn hits_written(&self) -> u64 {
        self.writers.values().map(HitListWriter::hits_written).sum()
    }
}
