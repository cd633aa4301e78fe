//! Multi-archive reader: opens archives, tails them and answers queries.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::archive::ArchiveFile;
use crate::error::{ArchiveError, Result};
use crate::select::{
    has_archive_extension, AllStats, CombineType, RawSelector, StatSelector,
    DEFAULT_ARCHIVE_EXTENSIONS,
};
use crate::value::{ComboValue, StatValue};

/// Configuration for opening archives.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Read buffer per archive file in bytes. Default: 32 KiB.
    pub buffer_size: usize,
    /// Suffixes of the files picked up when a directory is opened.
    pub archive_extensions: Vec<String>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            buffer_size: 32 * 1024,
            archive_extensions: DEFAULT_ARCHIVE_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
        }
    }
}

impl ReaderConfig {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size,
            ..Self::default()
        }
    }
}

/// Reads one or more archives and runs selection queries over them.
#[derive(Debug)]
pub struct StatArchiveReader {
    archives: Vec<ArchiveFile>,
    closed: bool,
}

impl StatArchiveReader {
    /// Opens every archive in `paths`, in order. Directories expand to the
    /// archive files they contain, sorted by name.
    pub fn open<P: AsRef<Path>>(
        paths: &[P],
        selectors: &[Arc<dyn StatSelector>],
        config: ReaderConfig,
    ) -> Result<Self> {
        let mut archives = Vec::new();
        for path in archive_paths(paths, &config)? {
            archives.push(ArchiveFile::open(&path, selectors, &config)?);
        }
        Ok(Self::from_archives(archives))
    }

    /// Wraps archives that were opened individually.
    pub fn from_archives(archives: Vec<ArchiveFile>) -> Self {
        info!(archives = archives.len(), "archive reader opened");
        Self {
            archives,
            closed: false,
        }
    }

    /// Opens one archive, retaining all of its data.
    pub fn open_single(path: impl AsRef<Path>) -> Result<Self> {
        let selectors: Vec<Arc<dyn StatSelector>> = vec![Arc::new(AllStats)];
        Self::open(&[path.as_ref()], &selectors, ReaderConfig::default())
    }

    pub fn archives(&self) -> &[ArchiveFile] {
        &self.archives
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Absorbs bytes appended to the archives since the last read.
    ///
    /// Archives that cannot be resumed (gzip) are skipped. Fails with
    /// [`ArchiveError::NotUpdatable`] only when no archive can be updated.
    /// Returns `true` if any archive changed.
    pub fn update(&mut self) -> Result<bool> {
        if self.closed {
            return Err(ArchiveError::ReaderClosed);
        }
        if !self.archives.iter().any(ArchiveFile::is_updatable) {
            if let Some(first) = self.archives.first() {
                return Err(ArchiveError::NotUpdatable(first.path().to_path_buf()));
            }
        }
        let mut changed = false;
        let mut skipped = 0;
        for archive in &mut self.archives {
            if !archive.is_updatable() {
                skipped += 1;
                continue;
            }
            changed |= archive.update()?;
        }
        debug!(changed, skipped, "archive reader updated");
        Ok(changed)
    }

    /// Values matching `selector`, in archive order. Never fails for lack of
    /// matches; an empty vector is returned instead.
    pub fn matches(&self, selector: &dyn StatSelector) -> Result<Vec<Arc<dyn StatValue>>> {
        if selector.combine_type() == CombineType::Global {
            let raw = RawSelector::new(selector);
            let mut members = Vec::new();
            for archive in &self.archives {
                members.extend(archive.matches(&raw)?);
            }
            if members.is_empty() {
                return Ok(Vec::new());
            }
            return Ok(vec![Arc::new(ComboValue::new(members)?)]);
        }
        let mut out = Vec::new();
        for archive in &self.archives {
            out.extend(archive.matches(selector)?);
        }
        Ok(out)
    }

    /// Releases files and compacts decoded data. The reader can still be
    /// queried but never updated again.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        for archive in &mut self.archives {
            archive.close();
        }
        self.closed = true;
    }

    /// Approximate bytes held by decoded samples of all archives.
    pub fn memory_used(&self) -> usize {
        self.archives.iter().map(ArchiveFile::memory_used).sum()
    }
}

/// Expands directories in `paths` to the archive files they contain, sorted
/// by name. Other paths are passed through unchanged.
pub fn archive_paths<P: AsRef<Path>>(paths: &[P], config: &ReaderConfig) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for path in paths {
        let path = path.as_ref();
        if !path.is_dir() {
            out.push(path.to_path_buf());
            continue;
        }
        let mut found: Vec<PathBuf> = std::fs::read_dir(path)?
            .flatten()
            .map(|entry| entry.path())
            .filter(|p| p.is_file() && has_archive_extension(p, &config.archive_extensions))
            .collect();
        found.sort();
        out.extend(found);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::TypeCode;
    use crate::select::{NameMatcher, StatFilter};
    use crate::testutil::{two_instance_archive, ArchiveWriter, StatDef};
    use crate::value::Filter;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;

    /// A second archive of the same type, one instance, sampled a minute later.
    fn later_archive() -> Vec<u8> {
        let stats = [
            StatDef::counter("ops", TypeCode::Long),
            StatDef::gauge("threads", TypeCode::Int),
        ];
        ArchiveWriter::new()
            .header(1_700_000_060_000)
            .resource_type(0, "VMStats", &stats)
            .initialize(0, "vm-c", 13, 0, &[1_000, 8])
            .sample(1000, &[])
            .sample(1000, &[(0, &[(0, 50)])])
            .into_bytes()
    }

    fn write_archive(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn ops(combine: CombineType) -> StatFilter {
        StatFilter::new()
            .stat(NameMatcher::exact("ops"))
            .combine(combine)
    }

    #[test]
    fn test_end_to_end_single_archive() {
        let dir = TempDir::new().unwrap();
        let path = write_archive(&dir, "vm.gfs", &two_instance_archive());
        let reader = StatArchiveReader::open_single(&path).unwrap();

        let archive = &reader.archives()[0];
        assert_eq!(archive.instances().len(), 2);
        assert!(archive.instances().iter().all(|i| i.sample_count() == 5));

        let values = reader.matches(&ops(CombineType::None)).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(
            values[0].raw_snapshots().unwrap(),
            vec![10.0, 20.0, 40.0, 45.0, 70.0]
        );
        assert_eq!(values[0].filter(), Filter::PerSecond);
        assert_eq!(values[0].snapshots().unwrap(), vec![10.0, 10.0, 5.0, 10.0]);
        assert_eq!(values[1].snapshots().unwrap(), vec![0.0, 15.0, 30.0, 0.0]);

        let threads = reader
            .matches(&StatFilter::new().stat(NameMatcher::exact("threads")))
            .unwrap();
        assert_eq!(threads[1].raw_snapshots().unwrap(), vec![2.0, 2.0, 3.0, 3.0, 1.0]);
    }

    #[test]
    fn test_no_matches_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = write_archive(&dir, "vm.gfs", &two_instance_archive());
        let reader = StatArchiveReader::open_single(&path).unwrap();
        let filter = StatFilter::new().type_name(NameMatcher::exact("Missing"));
        assert!(reader.matches(&filter).unwrap().is_empty());
        let global = filter.combine(CombineType::Global);
        assert!(reader.matches(&global).unwrap().is_empty());
    }

    #[test]
    fn test_directory_and_combines() {
        let dir = TempDir::new().unwrap();
        write_archive(&dir, "a.gfs", &two_instance_archive());
        write_archive(&dir, "b.gfs", &later_archive());
        write_archive(&dir, "notes.txt", b"not an archive");

        let reader = StatArchiveReader::open(&[dir.path()], &[], ReaderConfig::default()).unwrap();
        assert_eq!(reader.archives().len(), 2);
        assert!(reader.archives()[0].path().ends_with("a.gfs"));

        assert_eq!(reader.matches(&ops(CombineType::None)).unwrap().len(), 3);

        let per_file = reader.matches(&ops(CombineType::File)).unwrap();
        assert_eq!(per_file.len(), 2);
        assert_eq!(
            per_file[0].raw_snapshots().unwrap(),
            vec![110.0, 120.0, 170.0, 205.0, 230.0]
        );
        assert_eq!(per_file[1].raw_snapshots().unwrap(), vec![1_000.0, 1_050.0]);

        let global = reader.matches(&ops(CombineType::Global)).unwrap();
        assert_eq!(global.len(), 1);
        assert_eq!(global[0].resources().len(), 3);
        let raw = global[0].raw_snapshots().unwrap();
        assert_eq!(raw.len(), 7);
        assert!(raw.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(raw[6], 230.0 + 1_050.0);
    }

    #[test]
    fn test_global_combine_of_mixed_stats_fails() {
        let dir = TempDir::new().unwrap();
        let path = write_archive(&dir, "vm.gfs", &two_instance_archive());
        let reader = StatArchiveReader::open_single(&path).unwrap();
        let all = StatFilter::new().combine(CombineType::Global);
        assert!(matches!(
            reader.matches(&all),
            Err(ArchiveError::IncompatibleCombination(_))
        ));
    }

    #[test]
    fn test_update_then_close() {
        let dir = TempDir::new().unwrap();
        let full = two_instance_archive();
        let split = full.len() - 20;
        let path = write_archive(&dir, "vm.gfs", &full[..split]);

        let mut reader = StatArchiveReader::open_single(&path).unwrap();
        let before = reader.archives()[0].samples_read();
        assert!(before < 5);

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&full[split..]).unwrap();
        file.flush().unwrap();

        assert!(reader.update().unwrap());
        assert_eq!(reader.archives()[0].samples_read(), 5);
        assert!(!reader.update().unwrap());

        reader.close();
        assert!(reader.is_closed());
        assert!(matches!(reader.update(), Err(ArchiveError::ReaderClosed)));
        assert_eq!(reader.matches(&ops(CombineType::None)).unwrap().len(), 2);
    }

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_update_skips_rolled_gzip_archive() {
        let dir = TempDir::new().unwrap();
        write_archive(&dir, "a-rolled.gfs.gz", &gzip(&later_archive()));
        let full = two_instance_archive();
        let split = full.len() - 20;
        let live = write_archive(&dir, "b-live.gfs", &full[..split]);

        let mut reader = StatArchiveReader::open(&[dir.path()], &[], ReaderConfig::default()).unwrap();
        assert_eq!(reader.archives().len(), 2);
        assert!(!reader.archives()[0].is_updatable());
        let before = reader.archives()[1].samples_read();
        assert!(before < 5);

        let mut file = OpenOptions::new().append(true).open(&live).unwrap();
        file.write_all(&full[split..]).unwrap();
        file.flush().unwrap();

        assert!(reader.update().unwrap());
        assert_eq!(reader.archives()[0].samples_read(), 2);
        assert_eq!(reader.archives()[1].samples_read(), 5);
    }

    #[test]
    fn test_update_with_only_gzip_archives_fails() {
        let dir = TempDir::new().unwrap();
        write_archive(&dir, "a.gfs.gz", &gzip(&two_instance_archive()));
        let mut reader = StatArchiveReader::open(&[dir.path()], &[], ReaderConfig::default()).unwrap();
        assert!(matches!(reader.update(), Err(ArchiveError::NotUpdatable(_))));
        assert_eq!(reader.archives()[0].samples_read(), 5);
    }

    #[test]
    fn test_missing_file_fails_open() {
        let dir = TempDir::new().unwrap();
        let err = StatArchiveReader::open_single(dir.path().join("absent.gfs")).unwrap_err();
        assert!(matches!(err, ArchiveError::Io(_)));
    }

    #[test]
    fn test_config_defaults() {
        let config = ReaderConfig::default();
        assert_eq!(config.buffer_size, 32 * 1024);
        assert_eq!(config.archive_extensions, vec![".gfs", ".gfs.gz"]);
        assert_eq!(ReaderConfig::new(4096).buffer_size, 4096);
    }
}
