//! Sharded on-disk storage for dataset splits.
//!
//! Each split lives in its own directory as an ordered sequence of shard
//! files holding length-prefixed records (see [`crate::codec`]), plus a
//! JSON manifest describing the shards:
//!
//! ```text
//! <root>/train/shard-00000.rec
//! <root>/train/shard-00001.rec
//! <root>/train/manifest.json
//! ```
//!
//! Shard order is taken from the index encoded in each file name, so a
//! split whose writer was interrupted before writing a manifest can still
//! be read up to its truncation point.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use ml_types::{Label, Record, RecordKind, SplitName};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codec::{self, FORMAT_VERSION, FRAME_HEADER_LEN, FrameRead};
use crate::config::StoreConfig;
use crate::error::{DatasetError, Result};
use crate::summary::ClassBalance;

/// Name of the per-split manifest file.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Extension of shard files.
pub const SHARD_EXTENSION: &str = "rec";

/// Permutes shard paths deterministically for `seed`.
///
/// Shuffled streams call this once per epoch with `seed + epoch`.
pub fn permute_shards(paths: &mut [PathBuf], seed: u64) {
    paths.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));
}

/// Returns the file name of the shard with the given index.
///
/// # Example
///
/// ```
/// use ml_dataset::{parse_shard_index, shard_file_name};
///
/// assert_eq!(shard_file_name(7), "shard-00007.rec");
/// assert_eq!(parse_shard_index("shard-00007.rec"), Some(7));
/// assert_eq!(parse_shard_index("manifest.json"), None);
/// ```
#[must_use]
pub fn shard_file_name(index: usize) -> String {
    format!("shard-{index:05}.{SHARD_EXTENSION}")
}

/// Parses the shard index out of a shard file name.
#[must_use]
pub fn parse_shard_index(file_name: &str) -> Option<usize> {
    let digits = file_name
        .strip_prefix("shard-")?
        .strip_suffix(SHARD_EXTENSION)?
        .strip_suffix('.')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Metadata for a single shard file.
///
/// # Example
///
/// ```
/// use ml_dataset::ShardMetadata;
///
/// let shard = ShardMetadata::new(0, 1000, "shard-00000.rec");
/// assert_eq!(shard.index, 0);
/// assert_eq!(shard.record_count, 1000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardMetadata {
    /// Shard index, as encoded in the file name.
    pub index: usize,

    /// Number of records in this shard.
    pub record_count: usize,

    /// Path of the shard file, relative to the split directory.
    pub path: PathBuf,

    /// CRC-32 of the whole file, as 8 lowercase hex digits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,

    /// Size in bytes.
    #[serde(default)]
    pub size_bytes: u64,
}

impl ShardMetadata {
    /// Creates new shard metadata.
    #[must_use]
    pub fn new(index: usize, record_count: usize, path: impl Into<PathBuf>) -> Self {
        Self {
            index,
            record_count,
            path: path.into(),
            checksum: None,
            size_bytes: 0,
        }
    }

    /// Sets the checksum.
    #[must_use]
    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    /// Sets the size in bytes.
    #[must_use]
    pub const fn with_size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = size_bytes;
        self
    }

    /// Returns true if this shard holds no records.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.record_count == 0
    }
}

/// Manifest for one split directory.
///
/// # Example
///
/// ```
/// use ml_dataset::{ShardManifest, ShardMetadata};
///
/// let mut manifest = ShardManifest::new("train");
/// manifest.add_shard(ShardMetadata::new(0, 100, "shard-00000.rec"));
/// manifest.add_shard(ShardMetadata::new(1, 50, "shard-00001.rec"));
///
/// assert_eq!(manifest.total_records, 150);
/// assert_eq!(manifest.locate_record(120), Some((1, 20)));
/// assert!(manifest.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardManifest {
    /// Split (or store) name.
    pub name: String,

    /// Record format version of the shards.
    pub version: u8,

    /// Shards in read order.
    pub shards: Vec<ShardMetadata>,

    /// Total record count across all shards.
    pub total_records: usize,

    /// Kind of record stored; `None` while the split is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<RecordKind>,

    /// Class balance of the stored records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ClassBalance>,

    /// Creation timestamp (Unix epoch seconds).
    #[serde(default)]
    pub created_at: u64,
}

impl ShardManifest {
    /// Creates a new empty manifest.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: FORMAT_VERSION,
            shards: Vec::new(),
            total_records: 0,
            kind: None,
            summary: None,
            created_at: 0,
        }
    }

    /// Sets the creation timestamp.
    #[must_use]
    pub const fn with_created_at(mut self, timestamp: u64) -> Self {
        self.created_at = timestamp;
        self
    }

    /// Adds a shard to the manifest.
    pub fn add_shard(&mut self, shard: ShardMetadata) {
        self.total_records += shard.record_count;
        self.shards.push(shard);
    }

    /// Returns the number of shards.
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Returns true if the split holds no records.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.total_records == 0
    }

    /// Computes the shard position and local record index for a global
    /// record index.
    ///
    /// Returns `None` if the index is out of bounds.
    #[must_use]
    pub fn locate_record(&self, global_index: usize) -> Option<(usize, usize)> {
        let mut offset = 0;
        for (position, shard) in self.shards.iter().enumerate() {
            if global_index < offset + shard.record_count {
                return Some((position, global_index - offset));
            }
            offset += shard.record_count;
        }
        None
    }

    /// Validates the manifest structure.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The name is empty or the format version is unknown
    /// - Total records doesn't match the sum of shard records
    /// - Shard indices are not strictly increasing
    /// - A shard path doesn't match its index
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(DatasetError::invalid_manifest("name cannot be empty"));
        }

        if self.version != FORMAT_VERSION {
            return Err(DatasetError::invalid_manifest(format!(
                "unsupported format version {}",
                self.version
            )));
        }

        let computed_total: usize = self.shards.iter().map(|s| s.record_count).sum();
        if computed_total != self.total_records {
            return Err(DatasetError::invalid_manifest(format!(
                "total_records mismatch: manifest says {}, shards sum to {}",
                self.total_records, computed_total
            )));
        }

        for pair in self.shards.windows(2) {
            if pair[1].index <= pair[0].index {
                return Err(DatasetError::invalid_manifest(format!(
                    "shard indices not increasing: {} then {}",
                    pair[0].index, pair[1].index
                )));
            }
        }

        for shard in &self.shards {
            if shard.path != Path::new(&shard_file_name(shard.index)) {
                return Err(DatasetError::invalid_manifest(format!(
                    "shard {} has unexpected path {}",
                    shard.index,
                    shard.path.display()
                )));
            }
        }

        Ok(())
    }

    /// Serializes the manifest to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(DatasetError::from)
    }

    /// Deserializes and validates a manifest from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization or validation fails.
    pub fn from_json(json: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_str(json)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Loads the manifest of a split directory, if one was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest exists but cannot be read or parsed.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(MANIFEST_FILE);
        match std::fs::read_to_string(&path) {
            Ok(json) => Self::from_json(&json).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically writes the manifest into a split directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let tmp = dir.join(format!("{MANIFEST_FILE}.tmp"));
        std::fs::write(&tmp, self.to_json()?)?;
        std::fs::rename(&tmp, dir.join(MANIFEST_FILE))?;
        Ok(())
    }
}

/// Byte position of one frame inside a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordLocation {
    /// Shard index.
    pub shard: usize,

    /// Offset of the frame header within the shard file.
    pub offset: u64,

    /// Frame length including the header.
    pub len: u64,
}

/// Sequential reader over one shard file.
///
/// Yields records in file order. A record that fails to decode yields a
/// [`DatasetError::CorruptRecord`] and reading continues with the next
/// frame. A frame that runs past the end of the file yields
/// [`DatasetError::TruncatedShard`] and ends the reader.
#[derive(Debug)]
pub struct ShardReader {
    path: PathBuf,
    shard: usize,
    reader: BufReader<File>,
    file_len: u64,
    offset: u64,
    frames_read: usize,
    done: bool,
}

impl ShardReader {
    /// Opens a shard file for reading.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::ShardNotFound`] if the file is missing.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::open(&path).map_err(|e| not_found_as_shard(e, &path))?;
        let file_len = file.metadata()?.len();
        let shard = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_shard_index)
            .unwrap_or(0);

        Ok(Self {
            path,
            shard,
            reader: BufReader::new(file),
            file_len,
            offset: 0,
            frames_read: 0,
            done: false,
        })
    }

    /// Returns the shard file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the shard index.
    #[must_use]
    pub const fn shard(&self) -> usize {
        self.shard
    }

    /// Returns the number of complete frames read so far.
    #[must_use]
    pub const fn frames_read(&self) -> usize {
        self.frames_read
    }

    /// Reads the next record together with its location.
    pub fn next_located(&mut self) -> Option<Result<(RecordLocation, Record)>> {
        if self.done {
            return None;
        }

        let start = self.offset;
        let remaining = self.file_len.saturating_sub(start);
        if remaining == 0 {
            self.done = true;
            return None;
        }

        match codec::read_frame(&mut self.reader, remaining) {
            Ok(FrameRead::Eof) => {
                self.done = true;
                None
            }
            Ok(FrameRead::Truncated {
                expected,
                available,
            }) => {
                self.done = true;
                warn!(
                    path = %self.path.display(),
                    offset = start,
                    expected,
                    available,
                    records = self.frames_read,
                    "Truncated shard"
                );
                Some(Err(DatasetError::truncated_shard(
                    self.path.clone(),
                    start,
                    self.frames_read,
                )))
            }
            Ok(FrameRead::Frame { body, crc }) => {
                let len = (FRAME_HEADER_LEN + body.len()) as u64;
                self.offset += len;
                self.frames_read += 1;
                let location = RecordLocation {
                    shard: self.shard,
                    offset: start,
                    len,
                };
                Some(codec::decode_body(&body, crc).map(|record| (location, record)))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e.into()))
            }
        }
    }
}

impl Iterator for ShardReader {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_located().map(|r| r.map(|(_, record)| record))
    }
}

/// Reader over every shard of a split, in shard order.
///
/// Record-level errors are yielded and skipped past; a truncated shard or
/// I/O failure is yielded once and ends the reader.
#[derive(Debug)]
pub struct SplitReader {
    pending: std::vec::IntoIter<PathBuf>,
    current: Option<ShardReader>,
    done: bool,
}

impl SplitReader {
    /// Creates a reader over the given shard files.
    #[must_use]
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            pending: paths.into_iter(),
            current: None,
            done: false,
        }
    }
}

impl Iterator for SplitReader {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }

            if self.current.is_none() {
                let path = self.pending.next()?;
                match ShardReader::open(path) {
                    Ok(reader) => self.current = Some(reader),
                    Err(err) => {
                        self.done = true;
                        return Some(Err(err));
                    }
                }
            }

            match self.current.as_mut()?.next() {
                Some(Ok(record)) => return Some(Ok(record)),
                Some(Err(err)) => {
                    if !err.is_record_level() {
                        self.done = true;
                    }
                    return Some(Err(err));
                }
                None => self.current = None,
            }
        }
    }
}

/// The shard files of one split directory.
#[derive(Debug, Clone)]
pub struct ShardSet {
    dir: PathBuf,
}

impl ShardSet {
    /// Opens an existing split directory.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::SplitNotFound`] if the directory is missing.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(DatasetError::split_not_found(dir.display().to_string()));
        }
        Ok(Self { dir })
    }

    /// Opens a split directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Returns the split directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Lists shard files as `(index, path)`, sorted by index.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn shard_paths(&self) -> Result<Vec<(usize, PathBuf)>> {
        let mut shards = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(index) = entry.file_name().to_str().and_then(parse_shard_index) {
                shards.push((index, entry.path()));
            }
        }
        shards.sort_unstable_by_key(|(index, _)| *index);
        Ok(shards)
    }

    /// Loads the manifest, if one was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest is unreadable or invalid.
    pub fn manifest(&self) -> Result<Option<ShardManifest>> {
        ShardManifest::load(&self.dir)
    }

    /// Returns a reader over every record of the set, in shard order.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    pub fn records(&self) -> Result<SplitReader> {
        let paths = self.shard_paths()?.into_iter().map(|(_, p)| p).collect();
        Ok(SplitReader::new(paths))
    }

    /// Reads the single record at `location`.
    ///
    /// # Errors
    ///
    /// Returns an error if the shard is missing, the frame is cut short, or
    /// the record fails to decode.
    pub fn read_at(&self, location: RecordLocation) -> Result<Record> {
        let path = self.dir.join(shard_file_name(location.shard));
        let mut file = File::open(&path).map_err(|e| not_found_as_shard(e, &path))?;
        file.seek(SeekFrom::Start(location.offset))?;

        let len = usize::try_from(location.len)
            .map_err(|_| DatasetError::corrupt_record("frame length overflows usize"))?;
        let mut frame = vec![0u8; len];
        file.read_exact(&mut frame).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                DatasetError::truncated_shard(path.clone(), location.offset, 0)
            } else {
                e.into()
            }
        })?;
        codec::decode(&frame)
    }

    /// Creates an appending writer for this set.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the existing
    /// manifest cannot be read.
    pub fn writer(&self, name: impl Into<String>, config: StoreConfig) -> Result<ShardWriter> {
        ShardWriter::new(self, name.into(), config)
    }

    /// Recomputes every shard checksum and compares it with the manifest.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::ChecksumMismatch`] on the first mismatch,
    /// [`DatasetError::ShardNotFound`] for a missing shard, and
    /// [`DatasetError::InvalidManifest`] if there is no manifest.
    pub fn verify(&self) -> Result<ShardManifest> {
        let manifest = self.manifest()?.ok_or_else(|| {
            DatasetError::invalid_manifest(format!("no manifest in {}", self.dir.display()))
        })?;

        for shard in &manifest.shards {
            let path = self.dir.join(&shard.path);
            let (actual, size) = checksum_file(&path)?;
            if let Some(expected) = &shard.checksum {
                if *expected != actual {
                    return Err(DatasetError::ChecksumMismatch {
                        shard: shard.path.display().to_string(),
                        expected: expected.clone(),
                        actual,
                    });
                }
            } else if size != shard.size_bytes {
                return Err(DatasetError::invalid_manifest(format!(
                    "{}: expected {} bytes, found {size}",
                    shard.path.display(),
                    shard.size_bytes
                )));
            }
        }

        debug!(dir = %self.dir.display(), shards = manifest.shard_count(), "Verified shards");
        Ok(manifest)
    }
}

struct OpenShard {
    index: usize,
    path: PathBuf,
    file: BufWriter<File>,
    bytes: u64,
    records: usize,
    hasher: crc32fast::Hasher,
}

/// Append-only writer that spreads records over rotating shard files.
///
/// A new shard is started when the next frame would push the current one
/// past [`StoreConfig::shard_size_bytes`]. Existing shards are never
/// rewritten: a writer on a populated set starts after the highest index.
/// [`ShardWriter::finish`] writes the manifest; a writer dropped without
/// finishing leaves readable shards but no manifest entries for them.
pub struct ShardWriter {
    dir: PathBuf,
    name: String,
    config: StoreConfig,
    next_index: usize,
    current: Option<OpenShard>,
    completed: Vec<ShardMetadata>,
    kind: Option<RecordKind>,
    labels: Vec<Label>,
    frame: Vec<u8>,
}

impl std::fmt::Debug for ShardWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardWriter")
            .field("dir", &self.dir)
            .field("name", &self.name)
            .field("next_index", &self.next_index)
            .field("completed", &self.completed.len())
            .finish_non_exhaustive()
    }
}

impl ShardWriter {
    fn new(set: &ShardSet, name: String, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let next_index = set
            .shard_paths()?
            .last()
            .map_or(0, |(index, _)| index + 1);
        let kind = set.manifest()?.and_then(|m| m.kind);

        Ok(Self {
            dir: set.dir.clone(),
            name,
            config,
            next_index,
            current: None,
            completed: Vec::new(),
            kind,
            labels: Vec::new(),
            frame: Vec::new(),
        })
    }

    /// Appends one record and returns where it was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the record kind differs from what the set
    /// already holds, the record cannot be encoded, or the write fails.
    pub fn append(&mut self, record: &Record) -> Result<RecordLocation> {
        match self.kind {
            Some(kind) if kind != record.kind() => {
                return Err(DatasetError::validation(format!(
                    "cannot append {} record {} to a {kind} split",
                    record.kind(),
                    record.id()
                )));
            }
            _ => self.kind = Some(record.kind()),
        }

        self.frame.clear();
        codec::encode_into(record, &mut self.frame)?;
        let frame_len = self.frame.len() as u64;

        let rotate = self.current.as_ref().is_some_and(|shard| {
            shard.bytes > 0 && shard.bytes + frame_len > self.config.shard_size_bytes
        });
        if rotate {
            self.close_current()?;
        }
        if self.current.is_none() {
            self.current = Some(self.open_next()?);
        }

        let Some(shard) = self.current.as_mut() else {
            return Err(DatasetError::io("no open shard"));
        };
        shard.file.write_all(&self.frame)?;
        shard.hasher.update(&self.frame);

        let location = RecordLocation {
            shard: shard.index,
            offset: shard.bytes,
            len: frame_len,
        };
        shard.bytes += frame_len;
        shard.records += 1;
        self.labels.push(record.label());
        Ok(location)
    }

    /// Appends every record of an iterator.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first append error.
    pub fn extend<I>(&mut self, records: I) -> Result<usize>
    where
        I: IntoIterator<Item = Record>,
    {
        let mut count = 0;
        for record in records {
            self.append(&record)?;
            count += 1;
        }
        Ok(count)
    }

    /// Flushes buffered bytes of the open shard to the OS.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(shard) = self.current.as_mut() {
            shard.file.flush()?;
        }
        Ok(())
    }

    /// Returns the number of records appended by this writer.
    #[must_use]
    pub fn records_written(&self) -> usize {
        self.labels.len()
    }

    /// Closes the open shard and writes the merged manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if a shard cannot be flushed or the manifest cannot
    /// be written.
    pub fn finish(mut self) -> Result<ShardManifest> {
        self.close_current()?;

        let mut manifest = ShardManifest::load(&self.dir)?
            .unwrap_or_else(|| ShardManifest::new(self.name.clone()));
        if manifest.kind.is_none() {
            manifest.kind = self.kind;
        }
        if manifest.created_at == 0 {
            manifest.created_at = unix_now();
        }

        let balance = ClassBalance::from_labels(self.labels.drain(..));
        manifest.summary = Some(match manifest.summary.take() {
            Some(existing) => existing.merge(&balance),
            None => balance,
        });
        for shard in self.completed.drain(..) {
            manifest.add_shard(shard);
        }

        manifest.validate()?;
        manifest.save(&self.dir)?;

        info!(
            split = %manifest.name,
            shards = manifest.shard_count(),
            records = manifest.total_records,
            "Wrote shard manifest"
        );
        Ok(manifest)
    }

    fn open_next(&mut self) -> Result<OpenShard> {
        let index = self.next_index;
        self.next_index += 1;
        let path = self.dir.join(shard_file_name(index));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;

        debug!(path = %path.display(), index, "Opened shard");
        Ok(OpenShard {
            index,
            path,
            file: BufWriter::new(file),
            bytes: 0,
            records: 0,
            hasher: crc32fast::Hasher::new(),
        })
    }

    fn close_current(&mut self) -> Result<()> {
        let Some(mut shard) = self.current.take() else {
            return Ok(());
        };
        shard.file.flush()?;
        if self.config.sync_on_finish {
            shard.file.get_ref().sync_all()?;
        }

        let checksum = format!("{:08x}", shard.hasher.finalize());
        debug!(
            path = %shard.path.display(),
            records = shard.records,
            bytes = shard.bytes,
            checksum = %checksum,
            "Closed shard"
        );
        self.completed.push(
            ShardMetadata::new(shard.index, shard.records, shard_file_name(shard.index))
                .with_checksum(checksum)
                .with_size(shard.bytes),
        );
        Ok(())
    }
}

/// Root of a sharded dataset: one [`ShardSet`] directory per split.
///
/// # Example
///
/// ```
/// use ml_dataset::{ShardedStore, StoreConfig};
/// use ml_types::{FeatureVector, Label, Record, SplitName};
///
/// let dir = tempfile::tempdir().unwrap();
/// let store = ShardedStore::new(dir.path(), StoreConfig::default()).unwrap();
///
/// let records = (0..3).map(|i| {
///     Record::from(FeatureVector::new(format!("f{i}"), vec![i as f32], Label::Class(0)).unwrap())
/// });
/// store.write(SplitName::Train, records).unwrap();
///
/// let read: Vec<_> = store.read(SplitName::Train).unwrap().collect();
/// assert_eq!(read.len(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct ShardedStore {
    root: PathBuf,
    config: StoreConfig,
}

impl ShardedStore {
    /// Opens a store root, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the directory
    /// cannot be created.
    pub fn new(root: impl Into<PathBuf>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root, config })
    }

    /// Opens an existing store root.
    ///
    /// # Errors
    ///
    /// Returns an error if the root directory does not exist.
    pub fn open(root: impl Into<PathBuf>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let root = root.into();
        if !root.is_dir() {
            return Err(DatasetError::io(format!(
                "store root not found: {}",
                root.display()
            )));
        }
        Ok(Self { root, config })
    }

    /// Returns the store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the store configuration.
    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the directory of a split.
    #[must_use]
    pub fn split_dir(&self, split: SplitName) -> PathBuf {
        self.root.join(split.as_str())
    }

    /// Returns true if the split directory exists.
    #[must_use]
    pub fn has_split(&self, split: SplitName) -> bool {
        self.split_dir(split).is_dir()
    }

    /// Opens the shard set of an existing split.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::SplitNotFound`] if the split was never written.
    pub fn shard_set(&self, split: SplitName) -> Result<ShardSet> {
        ShardSet::open(self.split_dir(split)).map_err(|err| match err {
            DatasetError::SplitNotFound(_) => DatasetError::split_not_found(split.as_str()),
            other => other,
        })
    }

    /// Creates an appending writer for a split.
    ///
    /// # Errors
    ///
    /// Returns an error if the split directory cannot be created.
    pub fn writer(&self, split: SplitName) -> Result<ShardWriter> {
        ShardSet::create(self.split_dir(split))?.writer(split.as_str(), self.config)
    }

    /// Appends records to a split and writes its manifest.
    ///
    /// # Errors
    ///
    /// Returns the first write error.
    pub fn write<I>(&self, split: SplitName, records: I) -> Result<ShardManifest>
    where
        I: IntoIterator<Item = Record>,
    {
        let mut writer = self.writer(split)?;
        writer.extend(records)?;
        writer.finish()
    }

    /// Returns a lazy reader over a split, in shard-then-offset order.
    ///
    /// Each call starts again from the first shard.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::SplitNotFound`] if the split is missing.
    pub fn read(&self, split: SplitName) -> Result<SplitReader> {
        self.shard_set(split)?.records()
    }

    /// Returns the shard files of a split in read order.
    ///
    /// With a seed, the order is a deterministic permutation of the
    /// file-name order.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::SplitNotFound`] if the split is missing.
    pub fn shard_order(&self, split: SplitName, seed: Option<u64>) -> Result<Vec<PathBuf>> {
        let mut paths: Vec<PathBuf> = self
            .shard_set(split)?
            .shard_paths()?
            .into_iter()
            .map(|(_, path)| path)
            .collect();
        if let Some(seed) = seed {
            permute_shards(&mut paths, seed);
        }
        Ok(paths)
    }

    /// Loads the manifest of a split, if one was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the split is missing or its manifest is invalid.
    pub fn manifest(&self, split: SplitName) -> Result<Option<ShardManifest>> {
        self.shard_set(split)?.manifest()
    }

    /// Returns the kind of record stored in a split.
    ///
    /// Uses the manifest when present, otherwise the first readable record.
    ///
    /// # Errors
    ///
    /// Returns an error if the split is missing.
    pub fn record_kind(&self, split: SplitName) -> Result<Option<RecordKind>> {
        if let Some(kind) = self.manifest(split)?.and_then(|m| m.kind) {
            return Ok(Some(kind));
        }
        Ok(self
            .read(split)?
            .find_map(|r| r.ok())
            .map(|record| record.kind()))
    }

    /// Verifies shard checksums of a split against its manifest.
    ///
    /// # Errors
    ///
    /// See [`ShardSet::verify`].
    pub fn verify(&self, split: SplitName) -> Result<ShardManifest> {
        self.shard_set(split)?.verify()
    }
}

fn not_found_as_shard(err: io::Error, path: &Path) -> DatasetError {
    if err.kind() == io::ErrorKind::NotFound {
        DatasetError::shard_not_found(path.display().to_string())
    } else {
        err.into()
    }
}

fn checksum_file(path: &Path) -> Result<(String, u64)> {
    let mut file = File::open(path).map_err(|e| not_found_as_shard(e, path))?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((format!("{:08x}", hasher.finalize()), size))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

#[cfg(test)]
mod tests {
    use ml_types::{Example, FeatureVector, ImageShape};

    use super::*;

    // Every record frames to 32 bytes
    const FRAME: u64 = 32;

    fn image(i: u8) -> Record {
        Record::from(
            Example::new(
                format!("r{i:02}"),
                ImageShape::new(2, 2, 1),
                vec![i; 4],
                Label::Class(u32::from(i % 2)),
            )
            .unwrap(),
        )
    }

    fn images(n: u8) -> Vec<Record> {
        (0..n).map(image).collect()
    }

    fn store(dir: &Path, shard_size: u64) -> ShardedStore {
        ShardedStore::new(dir, StoreConfig::default().with_shard_size(shard_size).without_sync())
            .unwrap()
    }

    #[test]
    fn frame_size_assumption() {
        assert_eq!(codec::encode(&image(0)).unwrap().len() as u64, FRAME);
    }

    #[test]
    fn shard_names() {
        assert_eq!(shard_file_name(0), "shard-00000.rec");
        assert_eq!(shard_file_name(123_456), "shard-123456.rec");
        assert_eq!(parse_shard_index("shard-00042.rec"), Some(42));
        assert_eq!(parse_shard_index("shard-.rec"), None);
        assert_eq!(parse_shard_index("shard-00042.rec.tmp"), None);
        assert_eq!(parse_shard_index("shard-4x.rec"), None);
    }

    #[test]
    fn manifest_add_and_locate() {
        let mut manifest = ShardManifest::new("train");
        manifest.add_shard(ShardMetadata::new(0, 100, shard_file_name(0)));
        manifest.add_shard(ShardMetadata::new(1, 200, shard_file_name(1)));
        manifest.add_shard(ShardMetadata::new(2, 50, shard_file_name(2)));

        assert_eq!(manifest.shard_count(), 3);
        assert_eq!(manifest.total_records, 350);
        assert_eq!(manifest.locate_record(0), Some((0, 0)));
        assert_eq!(manifest.locate_record(100), Some((1, 0)));
        assert_eq!(manifest.locate_record(349), Some((2, 49)));
        assert_eq!(manifest.locate_record(350), None);
    }

    #[test]
    fn manifest_validate_errors() {
        assert!(ShardManifest::new("").validate().is_err());

        let mut manifest = ShardManifest::new("train");
        manifest.add_shard(ShardMetadata::new(0, 10, shard_file_name(0)));
        manifest.total_records = 99;
        assert!(manifest.validate().is_err());

        let mut manifest = ShardManifest::new("train");
        manifest.add_shard(ShardMetadata::new(3, 10, shard_file_name(3)));
        manifest.add_shard(ShardMetadata::new(3, 10, shard_file_name(3)));
        assert!(manifest.validate().is_err());

        let mut manifest = ShardManifest::new("train");
        manifest.add_shard(ShardMetadata::new(0, 10, "elsewhere.rec"));
        assert!(manifest.validate().is_err());

        let mut manifest = ShardManifest::new("train");
        manifest.version = 99;
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn manifest_serialization() {
        let mut manifest = ShardManifest::new("test").with_created_at(1_234_567_890);
        manifest.add_shard(
            ShardMetadata::new(0, 100, shard_file_name(0))
                .with_checksum("deadbeef")
                .with_size(3200),
        );
        manifest.kind = Some(RecordKind::Image);

        let json = manifest.to_json().unwrap();
        assert_eq!(ShardManifest::from_json(&json).unwrap(), manifest);
    }

    #[test]
    fn manifest_save_load_atomic() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ShardManifest::load(dir.path()).unwrap().is_none());

        let manifest = ShardManifest::new("validation");
        manifest.save(dir.path()).unwrap();
        assert_eq!(ShardManifest::load(dir.path()).unwrap(), Some(manifest));
        assert!(!dir.path().join("manifest.json.tmp").exists());
    }

    #[test]
    fn write_rotates_shards() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 100);

        let manifest = store.write(SplitName::Train, images(10)).unwrap();
        let counts: Vec<usize> = manifest.shards.iter().map(|s| s.record_count).collect();
        assert_eq!(counts, vec![3, 3, 3, 1]);
        assert_eq!(manifest.total_records, 10);
        assert_eq!(manifest.kind, Some(RecordKind::Image));
        assert_eq!(manifest.shards[0].size_bytes, 3 * FRAME);

        let summary = manifest.summary.unwrap();
        assert_eq!(summary.count(Label::Class(0)), 5);
        assert_eq!(summary.count(Label::Class(1)), 5);
    }

    #[test]
    fn oversized_record_gets_own_shard() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 10);

        let manifest = store.write(SplitName::Train, images(3)).unwrap();
        assert_eq!(manifest.shard_count(), 3);
        assert!(manifest.shards.iter().all(|s| s.record_count == 1));
    }

    #[test]
    fn read_preserves_order_and_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 100);
        store.write(SplitName::Train, images(10)).unwrap();

        for _ in 0..2 {
            let ids: Vec<String> = store
                .read(SplitName::Train)
                .unwrap()
                .map(|r| r.unwrap().id().to_string())
                .collect();
            let expected: Vec<String> = (0..10).map(|i| format!("r{i:02}")).collect();
            assert_eq!(ids, expected);
        }
    }

    #[test]
    fn reopened_writer_appends_new_shards() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 100);
        store.write(SplitName::Train, images(4)).unwrap();
        let first = std::fs::read(store.split_dir(SplitName::Train).join(shard_file_name(0))).unwrap();

        let manifest = store
            .write(SplitName::Train, (10..12).map(image))
            .unwrap();
        assert_eq!(manifest.total_records, 6);
        assert_eq!(
            manifest.shards.iter().map(|s| s.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        let after = std::fs::read(store.split_dir(SplitName::Train).join(shard_file_name(0))).unwrap();
        assert_eq!(first, after);
        assert_eq!(store.read(SplitName::Train).unwrap().count(), 6);
    }

    #[test]
    fn mixed_kinds_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 1024);
        store.write(SplitName::Train, images(1)).unwrap();

        let mut writer = store.writer(SplitName::Train).unwrap();
        let fv = FeatureVector::new("f", vec![1.0], Label::Class(0)).unwrap();
        assert!(matches!(
            writer.append(&Record::from(fv)),
            Err(DatasetError::Validation(_))
        ));
    }

    #[test]
    fn empty_split_is_readable() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 1024);
        let manifest = store.write(SplitName::Unlabeled, Vec::new()).unwrap();
        assert!(manifest.is_empty());
        assert_eq!(store.read(SplitName::Unlabeled).unwrap().count(), 0);
    }

    #[test]
    fn missing_split_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 1024);
        assert!(matches!(
            store.read(SplitName::Validation),
            Err(DatasetError::SplitNotFound(name)) if name == "validation"
        ));
    }

    #[test]
    fn truncated_tail_yields_prior_records_then_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 1024);
        store.write(SplitName::Train, images(5)).unwrap();

        let path = store.split_dir(SplitName::Train).join(shard_file_name(0));
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(5 * FRAME - 5).unwrap();

        let results: Vec<Result<Record>> = store.read(SplitName::Train).unwrap().collect();
        assert_eq!(results.len(), 5);
        assert!(results[..4].iter().all(Result::is_ok));
        match &results[4] {
            Err(DatasetError::TruncatedShard {
                offset,
                records_read,
                ..
            }) => {
                assert_eq!(*offset, 4 * FRAME);
                assert_eq!(*records_read, 4);
            }
            other => panic!("expected truncated shard, got {other:?}"),
        }
    }

    #[test]
    fn overlong_length_prefix_is_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 1024);
        store.write(SplitName::Train, images(3)).unwrap();

        let path = store.split_dir(SplitName::Train).join(shard_file_name(0));
        let mut bytes = std::fs::read(&path).unwrap();
        let last = (2 * FRAME) as usize;
        bytes[last..last + 4].copy_from_slice(&1_000_000u32.to_le_bytes());
        std::fs::write(&path, bytes).unwrap();

        let results: Vec<Result<Record>> = store.read(SplitName::Train).unwrap().collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok() && results[1].is_ok());
        assert!(matches!(results[2], Err(DatasetError::TruncatedShard { .. })));
    }

    #[test]
    fn corrupt_record_is_skippable() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 1024);
        store.write(SplitName::Train, images(5)).unwrap();

        let path = store.split_dir(SplitName::Train).join(shard_file_name(0));
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[(2 * FRAME + 12) as usize] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let results: Vec<Result<Record>> = store.read(SplitName::Train).unwrap().collect();
        assert_eq!(results.len(), 5);
        assert!(matches!(results[2], Err(DatasetError::CorruptRecord { .. })));
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 4);
    }

    #[test]
    fn read_at_returns_located_record() {
        let dir = tempfile::tempdir().unwrap();
        let set = ShardSet::create(dir.path().join("cache")).unwrap();
        let mut writer = set
            .writer("cache", StoreConfig::default().with_shard_size(64).without_sync())
            .unwrap();
        let locations: Vec<RecordLocation> =
            images(5).iter().map(|r| writer.append(r).unwrap()).collect();
        writer.finish().unwrap();

        assert_eq!(locations[3].shard, 1);
        assert_eq!(locations[3].offset, FRAME);
        assert_eq!(set.read_at(locations[3]).unwrap(), image(3));

        let mut reader = ShardReader::open(set.dir().join(shard_file_name(1))).unwrap();
        let (location, record) = reader.next_located().unwrap().unwrap();
        assert_eq!(location, locations[2]);
        assert_eq!(record, image(2));
    }

    #[test]
    fn verify_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 1024);
        store.write(SplitName::Test, images(3)).unwrap();
        assert!(store.verify(SplitName::Test).is_ok());

        let path = store.split_dir(SplitName::Test).join(shard_file_name(0));
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[20] ^= 0x01;
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(
            store.verify(SplitName::Test),
            Err(DatasetError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn shard_order_seeded() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), FRAME);
        store.write(SplitName::Train, images(8)).unwrap();

        let natural = store.shard_order(SplitName::Train, None).unwrap();
        assert_eq!(natural.len(), 8);
        assert!(natural.windows(2).all(|w| w[0] < w[1]));

        let a = store.shard_order(SplitName::Train, Some(1)).unwrap();
        let b = store.shard_order(SplitName::Train, Some(1)).unwrap();
        assert_eq!(a, b);
        let mut sorted = a.clone();
        sorted.sort();
        assert_eq!(sorted, natural);
    }

    #[test]
    fn record_kind_without_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 1024);
        {
            let mut writer = store.writer(SplitName::Train).unwrap();
            writer.append(&image(1)).unwrap();
            writer.flush().unwrap();
        }
        assert!(store.manifest(SplitName::Train).unwrap().is_none());
        assert_eq!(
            store.record_kind(SplitName::Train).unwrap(),
            Some(RecordKind::Image)
        );
    }
}
