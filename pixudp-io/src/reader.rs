//! Memory-mapped capture readers and the hit list reader.
//!

use crate::{Error, Result};
use log::{debug, info, warn};
use memmap2::Mmap;
use pixudp_core::{Completion, Hit};
use pixudp_decode::{DecodeStats, DecoderConfig, PackageDecoder};
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// A memory-mapped file reader.
///
/// Uses memmap2 to efficiently access file contents without
/// loading the entire file into memory.
pub struct MappedFileReader {
    mmap: Mmap,
    path: PathBuf,
}

impl MappedFileReader {
    /// Opens a file for memory-mapped reading.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        // This is the standard safety contract for memory mapping.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            mmap,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Returns the file contents as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap[..]
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Returns true if the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Path the file was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns an iterator over packages of `size` bytes.
    ///
    /// The last package may be shorter.
    pub fn packages(&self, size: usize) -> impl Iterator<Item = &[u8]> {
        self.mmap.chunks(size.max(1))
    }
}

/// Hits and counters of one decoded capture.
#[derive(Debug, Clone)]
pub struct DecodedCapture {
    /// Capture file.
    pub path: PathBuf,
    /// Hits in emission order.
    pub hits: Vec<Hit>,
    /// Decoder counters.
    pub stats: DecodeStats,
}

/// A UDP capture file reader with memory-mapped I/O.
///
/// A capture is the concatenation of the UDP packages as received, each
/// [`DecoderConfig::package_size`] bytes long.
pub struct CaptureFileReader {
    reader: MappedFileReader,
    config: DecoderConfig,
}

impl CaptureFileReader {
    /// Opens a capture file for reading with default configuration.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = MappedFileReader::open(path)?;
        Ok(Self {
            reader,
            config: DecoderConfig::default(),
        })
    }

    /// Sets the decoder configuration.
    #[must_use]
    pub fn with_config(mut self, config: DecoderConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the decoder configuration.
    #[must_use]
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn file_size(&self) -> usize {
        self.reader.len()
    }

    /// Returns the number of packages in the file.
    #[must_use]
    pub fn package_count(&self) -> usize {
        self.reader.len().div_ceil(self.config.package_size())
    }

    fn validate(&self) -> Result<()> {
        if self.reader.len() % 8 != 0 {
            return Err(Error::InvalidFormat(format!(
                "file size {} is not a multiple of 8 (file: {})",
                self.reader.len(),
                self.reader.path.display()
            )));
        }
        Ok(())
    }

    /// Decodes the capture package by package, handing each batch of hits to
    /// `sink`.
    ///
    /// # Errors
    /// Returns an error if the file size is invalid.
    pub fn decode_each<F>(&self, mut sink: F) -> Result<DecodeStats>
    where
        F: FnMut(&[Hit]) -> Result<()>,
    {
        self.validate()?;

        let mut decoder = PackageDecoder::from_config(&self.config);
        for (index, package) in self
            .reader
            .packages(self.config.package_size())
            .enumerate()
        {
            let hits = decoder.decode_buffer(package);
            if !hits.is_empty() {
                sink(&hits)?;
            }
            if index % 10_000 == 0 {
                debug!(
                    "{}: package {index}, {} hits so far",
                    self.reader.path.display(),
                    decoder.stats().hits
                );
            }
        }

        let stats = *decoder.stats();
        if stats.aborted_buffers > 0 {
            warn!(
                "{}: {} packages aborted after too many empty words",
                self.reader.path.display(),
                stats.aborted_buffers
            );
        }
        info!(
            "{}: decoded {} hits from {} packages ({} discarded, {} protocol violations)",
            self.reader.path.display(),
            stats.hits,
            stats.buffers,
            stats.discarded,
            stats.protocol_violations
        );
        Ok(stats)
    }

    /// Reads and decodes all hits of the capture.
    ///
    /// # Errors
    /// Returns an error if the file size is invalid.
    pub fn read_hits(&self) -> Result<DecodedCapture> {
        let mut hits = Vec::new();
        let stats = self.decode_each(|batch| {
            hits.extend_from_slice(batch);
            Ok(())
        })?;
        Ok(DecodedCapture {
            path: self.reader.path.clone(),
            hits,
            stats,
        })
    }
}

/// Decodes several captures in parallel, one decoder per file.
///
/// Results are returned in input order.
pub fn decode_files<P>(paths: &[P], config: &DecoderConfig) -> Vec<Result<DecodedCapture>>
where
    P: AsRef<Path> + Sync,
{
    paths
        .par_iter()
        .map(|path| {
            CaptureFileReader::open(path)?
                .with_config(config.clone())
                .read_hits()
        })
        .collect()
}

/// Column of a hit list field, by header name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    PackageId,
    Layer,
    Column,
    Row,
    ShortTs,
    ShortTs1,
    ShortTs2,
    TriggerTs,
    TriggerId,
    Ts,
    Ts2,
    FifoOverflow,
    TriggerTag,
    TriggerTableOverflow,
    Unknown,
}

impl Field {
    fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "packageid" => Field::PackageId,
            "layer" => Field::Layer,
            "column" => Field::Column,
            "row" => Field::Row,
            "ts" => Field::ShortTs,
            "ts1" => Field::ShortTs1,
            "ts2" => Field::ShortTs2,
            "triggerts" => Field::TriggerTs,
            "triggerid" => Field::TriggerId,
            "ext. ts" => Field::Ts,
            "ext. ts2" => Field::Ts2,
            "fifo overflow" => Field::FifoOverflow,
            "triggertag" => Field::TriggerTag,
            "triggertable overflow" => Field::TriggerTableOverflow,
            other => {
                warn!("Unknown hit list field \"{other}\"");
                Field::Unknown
            }
        }
    }
}

fn narrow(value: i64, line: usize) -> Result<i16> {
    i16::try_from(value)
        .map_err(|_| Error::InvalidFormat(format!("value {value} out of range on line {line}")))
}

/// Reader for the tab-separated hit lists written by [`HitListWriter`].
///
/// The field order is taken from the `#` header line, so files with other
/// column orders can be read too.
///
/// [`HitListWriter`]: crate::HitListWriter
pub struct HitListReader;

impl HitListReader {
    /// Reads a hit list file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or a line is malformed.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Vec<Hit>> {
        let file = File::open(path)?;
        Self::parse(BufReader::new(file))
    }

    /// Parses a hit list.
    ///
    /// # Errors
    /// Returns an error if there is no header line or a line is malformed.
    pub fn parse<R: BufRead>(reader: R) -> Result<Vec<Hit>> {
        let mut fields: Option<Vec<Field>> = None;
        let mut hits = Vec::new();

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let number = index + 1;
            if line.trim().is_empty() {
                continue;
            }
            if let Some(header) = line.strip_prefix('#') {
                fields = Some(
                    header
                        .split(';')
                        .filter(|name| !name.trim().is_empty())
                        .map(Field::from_name)
                        .collect(),
                );
                continue;
            }

            let Some(fields) = fields.as_deref() else {
                return Err(Error::InvalidFormat(format!(
                    "data before header on line {number}"
                )));
            };
            hits.push(Self::parse_line(&line, fields, number)?);
        }
        Ok(hits)
    }

    fn parse_line(line: &str, fields: &[Field], number: usize) -> Result<Hit> {
        let mut hit = Hit::new(0);
        hit.completion = Completion::BYTE_MODE_COMPLETE;

        // lines without trigger tag are shorter than a triggered header
        for (field, text) in fields.iter().zip(line.split_whitespace()) {
            let value: i64 = text.parse().map_err(|_| {
                Error::InvalidFormat(format!("invalid number \"{text}\" on line {number}"))
            })?;
            match field {
                Field::PackageId => {
                    hit.package_id = i32::try_from(value).map_err(|_| {
                        Error::InvalidFormat(format!("package id {value} out of range on line {number}"))
                    })?;
                }
                Field::Layer => hit.layer = narrow(value, number)?,
                Field::Column => hit.column = narrow(value, number)?,
                Field::Row => hit.row = narrow(value, number)?,
                Field::ShortTs => hit.short_ts = narrow(value, number)?,
                Field::ShortTs1 => hit.short_ts1 = narrow(value, number)?,
                Field::ShortTs2 => hit.short_ts2 = narrow(value, number)?,
                Field::TriggerTs => hit.trigger_ts = value,
                Field::TriggerId => hit.trigger_index = value,
                Field::Ts => hit.ts = value,
                Field::Ts2 => hit.ts2 = value,
                Field::FifoOverflow => hit.fifo_overflow = value != 0,
                Field::TriggerTag => hit.trigger_tag = narrow(value, number)?,
                Field::TriggerTableOverflow => hit.trigger_fifo_full = value != 0,
                Field::Unknown => {}
            }
        }
        Ok(hit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixudp_decode::ReadoutMode;
    use std::io::Write;
    use tempfile::NamedTempFile;

    // two datamux hits on layer 1
    const HIT_WORDS: [u8; 48] = [
        0x11, 0, 0, 0, 0, 0x05, 0x00, 0x02, //
        0x12, 0, 0, 0, 0, 0x10, 0x60, 0x00, //
        0x13, 0x00, 0x70, 0, 0, 0, 0x04, 0x01, //
        0x11, 0, 0, 0, 0, 0x05, 0x00, 0x02, //
        0x12, 0, 0, 0, 0, 0x10, 0x60, 0x00, //
        0x13, 0x00, 0x70, 0, 0, 0, 0x04, 0x01,
    ];

    fn capture(packages: usize, package_size: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for _ in 0..packages {
            let mut package = vec![0u8; package_size];
            package[..HIT_WORDS.len()].copy_from_slice(&HIT_WORDS);
            file.write_all(&package).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_mapped_file_reader() {
        let mut file = NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..64).collect();
        file.write_all(&data).unwrap();
        file.flush().unwrap();

        let reader = MappedFileReader::open(file.path()).unwrap();
        assert_eq!(reader.len(), 64);
        assert!(!reader.is_empty());
        assert_eq!(reader.as_bytes(), &data[..]);
        let sizes: Vec<usize> = reader.packages(24).map(<[u8]>::len).collect();
        assert_eq!(sizes, vec![24, 24, 16]);
    }

    #[test]
    fn test_capture_reader_empty() {
        let file = NamedTempFile::new().unwrap();

        let reader = CaptureFileReader::open(file.path()).unwrap();
        assert_eq!(reader.file_size(), 0);
        assert_eq!(reader.package_count(), 0);

        let capture = reader.read_hits().unwrap();
        assert!(capture.hits.is_empty());
    }

    #[test]
    fn test_capture_reader_invalid_size() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 7]).unwrap(); // Not a multiple of 8
        file.flush().unwrap();

        let reader = CaptureFileReader::open(file.path()).unwrap();
        assert!(matches!(reader.read_hits(), Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_capture_reader_decodes_packages() {
        let file = capture(3, 1024);
        let config = DecoderConfig::new()
            .with_mode(ReadoutMode::Datamux)
            .with_udp_bug(false);
        let reader = CaptureFileReader::open(file.path())
            .unwrap()
            .with_config(config);

        assert_eq!(reader.package_count(), 3);
        let capture = reader.read_hits().unwrap();
        assert_eq!(capture.hits.len(), 6);
        assert_eq!(capture.stats.buffers, 3);
        assert_eq!(capture.stats.hits, 6);
        assert_eq!((capture.hits[0].column, capture.hits[0].row), (35, 73));
        assert_eq!(capture.path, file.path());
    }

    #[test]
    fn test_capture_reader_with_workaround_flushes_last_word() {
        let file = capture(2, 1280);
        let reader = CaptureFileReader::open(file.path()).unwrap();
        assert_eq!(reader.package_count(), 2);

        let mut batches = 0;
        let stats = reader
            .decode_each(|_| {
                batches += 1;
                Ok(())
            })
            .unwrap();
        // the last address of each package is flushed with its own package
        assert_eq!(stats.hits, 4);
        assert_eq!(batches, 2);
        assert_eq!(stats.unaligned, 0);
    }

    #[test]
    fn test_capture_reader_one_hit_per_package() {
        let mut file = NamedTempFile::new().unwrap();
        for id in 0..5u8 {
            let mut package = vec![0x80, 0x81, 0x82, 0x83, 0x84, 0x85, 0x00, id];
            package.extend_from_slice(&HIT_WORDS[..24]);
            package.resize(1280, 0);
            file.write_all(&package).unwrap();
        }
        file.flush().unwrap();

        let capture = CaptureFileReader::open(file.path())
            .unwrap()
            .read_hits()
            .unwrap();
        assert_eq!(capture.hits.len(), 5);
        assert_eq!(capture.stats.discarded, 0);
        let ids: Vec<i32> = capture.hits.iter().map(|h| h.package_id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_sink_error_stops_decoding() {
        let file = capture(3, 1024);
        let reader = CaptureFileReader::open(file.path())
            .unwrap()
            .with_config(DecoderConfig::new().with_udp_bug(false));
        let result = reader.decode_each(|_| Err(Error::InvalidFormat("full".into())));
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_files_in_parallel() {
        let files = [capture(1, 1024), capture(2, 1024)];
        let paths: Vec<&Path> = files.iter().map(NamedTempFile::path).collect();
        let config = DecoderConfig::new().with_udp_bug(false);

        let results = decode_files(&paths, &config);
        let counts: Vec<usize> = results
            .into_iter()
            .map(|r| r.unwrap().hits.len())
            .collect();
        assert_eq!(counts, vec![2, 4]);

        let missing = decode_files(&["/nonexistent/capture.bin"], &config);
        assert!(matches!(missing[0], Err(Error::Io(_))));
    }

    #[test]
    fn test_parse_hit_list() {
        let text = "# PackageID; Layer; Column; Row; TS; TS1; TS2; TriggerTS; TriggerID; ext. TS; ext. TS2; FIFO overflow; triggertag; TriggerTable overflow\n\
                    7\t1\t35\t73\t1\t-1\t16\t5\t2\t1025\t16\t0\n\
                    8\t0\t100\t300\t2\t-1\t85\t65\t7\t256\t10\t0\t34\t1\n";
        let hits = HitListReader::parse(text.as_bytes()).unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].package_id, 7);
        assert_eq!((hits[0].column, hits[0].row), (35, 73));
        assert_eq!(hits[0].ts, 1025);
        assert_eq!(hits[0].trigger_tag, -1);
        assert_eq!(hits[1].trigger_tag, 34);
        assert!(hits[1].trigger_fifo_full);
        assert!(hits[1].is_complete());
    }

    #[test]
    fn test_parse_hit_list_custom_order() {
        let text = "# Row; Column; Unused\n12 34 99\n";
        let hits = HitListReader::parse(text.as_bytes()).unwrap();
        assert_eq!((hits[0].column, hits[0].row), (34, 12));
    }

    #[test]
    fn test_parse_hit_list_errors() {
        assert!(HitListReader::parse("1\t2\n".as_bytes()).is_err());
        assert!(HitListReader::parse("# Row\nabc\n".as_bytes()).is_err());
        assert!(HitListReader::parse("# Row\n40000\n".as_bytes()).is_err());
    }
}
