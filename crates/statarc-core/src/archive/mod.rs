//! Token-stream decoder for one archive file.

mod header;

pub use header::ArchiveInfo;

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use flate2::read::MultiGzDecoder;
use tracing::{debug, info, warn};

use crate::codec::{is_end_of_stream, MarkReader};
use crate::error::{ArchiveError, Result};
use crate::format::*;
use crate::instance::ResourceInst;
use crate::reader::ReaderConfig;
use crate::schema::{ResourceType, StatDescriptor};
use crate::select::{AllStats, CombineType, StatSelector};
use crate::series::TimeStampSeries;
use crate::value::{ComboValue, SimpleValue, StatValue};

type Source = Box<dyn Read + Send>;

/// Reads a stat value using the wire width of its type code.
fn read_stat_value<R: Read>(input: &mut MarkReader<R>, code: TypeCode) -> io::Result<i64> {
    Ok(match code {
        TypeCode::Boolean | TypeCode::Byte | TypeCode::Char => input.read_i8()? as i64,
        TypeCode::WChar => input.read_u16()? as i64,
        TypeCode::Short => input.read_i16()? as i64,
        TypeCode::Int | TypeCode::Long | TypeCode::Float | TypeCode::Double => {
            input.read_compact_value()?
        }
    })
}

fn read_resource_inst_id<R: Read>(input: &mut MarkReader<R>) -> io::Result<i32> {
    let token = input.read_u8()?;
    Ok(match token {
        0..=MAX_BYTE_RESOURCE_INST_ID => token as i32,
        SHORT_RESOURCE_INST_ID_TOKEN => input.read_u16()? as i32,
        INT_RESOURCE_INST_ID_TOKEN => input.read_i32()?,
        ILLEGAL_RESOURCE_INST_ID_TOKEN => ILLEGAL_RESOURCE_INST_ID,
    })
}

fn read_time_delta<R: Read>(input: &mut MarkReader<R>) -> io::Result<i64> {
    let delta = input.read_u16()?;
    if delta == INT_TIMESTAMP_TOKEN {
        Ok(input.read_i32()? as i64)
    } else {
        Ok(delta as i64)
    }
}

/// Instance fields shared by CREATE and INITIALIZE.
struct InstanceHeader {
    id: i32,
    name: String,
    numeric_id: i64,
    rtype: Arc<ResourceType>,
}

/// One decoded archive file.
pub struct ArchiveFile {
    path: PathBuf,
    input: MarkReader<Source>,
    /// Selectors whose `archive_matches` accepted this file.
    selectors: Vec<Arc<dyn StatSelector>>,
    info: Option<Arc<ArchiveInfo>>,
    timestamps: Arc<RwLock<TimeStampSeries>>,
    types: BTreeMap<i32, Arc<ResourceType>>,
    /// Every instance ever created, in creation order.
    instances: Vec<Arc<ResourceInst>>,
    /// Index into `instances` of the instance currently owning each wire id.
    live: HashMap<i32, usize>,
    tokens_read: u64,
    samples_read: u64,
    file_combos: Mutex<Vec<Arc<ComboValue>>>,
    closed: bool,
}

impl std::fmt::Debug for ArchiveFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveFile")
            .field("path", &self.path)
            .field("types", &self.types.len())
            .field("instances", &self.instances.len())
            .field("tokens_read", &self.tokens_read)
            .field("samples_read", &self.samples_read)
            .field("closed", &self.closed)
            .finish()
    }
}

impl ArchiveFile {
    /// Opens and decodes `path`. Files ending in `.gz` are read through gzip
    /// and cannot be updated afterwards.
    pub fn open(
        path: &Path,
        selectors: &[Arc<dyn StatSelector>],
        config: &ReaderConfig,
    ) -> Result<Self> {
        let file = File::open(path)?;
        let buffered = BufReader::with_capacity(config.buffer_size, file);
        let compressed = path.extension().is_some_and(|ext| ext == "gz");
        let source: Source = if compressed {
            Box::new(MultiGzDecoder::new(buffered))
        } else {
            Box::new(buffered)
        };
        Self::from_source(path.to_path_buf(), source, !compressed, selectors)
    }

    /// Decodes an archive from any byte source. `path` names the archive for
    /// selectors and messages; `resumable` enables [`update`](Self::update).
    pub fn from_reader(
        path: impl Into<PathBuf>,
        reader: impl Read + Send + 'static,
        resumable: bool,
        selectors: &[Arc<dyn StatSelector>],
    ) -> Result<Self> {
        Self::from_source(path.into(), Box::new(reader), resumable, selectors)
    }

    fn from_source(
        path: PathBuf,
        source: Source,
        resumable: bool,
        selectors: &[Arc<dyn StatSelector>],
    ) -> Result<Self> {
        let selectors: Vec<Arc<dyn StatSelector>> = if selectors.is_empty() {
            vec![Arc::new(AllStats)]
        } else {
            selectors.to_vec()
        };
        let selectors = selectors
            .into_iter()
            .filter(|s| s.archive_matches(&path))
            .collect();

        let mut archive = Self {
            path,
            input: MarkReader::new(source, resumable),
            selectors,
            info: None,
            timestamps: Arc::new(RwLock::new(TimeStampSeries::new(0))),
            types: BTreeMap::new(),
            instances: Vec::new(),
            live: HashMap::new(),
            tokens_read: 0,
            samples_read: 0,
            file_combos: Mutex::new(Vec::new()),
            closed: false,
        };
        archive.read_tokens()?;
        info!(
            path = %archive.path.display(),
            version = archive.info.as_ref().map(|i| i.version),
            types = archive.types.len(),
            instances = archive.instances.len(),
            samples = archive.samples_read,
            "opened archive"
        );
        Ok(archive)
    }

    // ------------------------------------------------------------------
    // Token loop
    // ------------------------------------------------------------------

    /// Reads tokens until end of stream. Returns whether any token was absorbed.
    fn read_tokens(&mut self) -> Result<bool> {
        let mut absorbed = false;
        loop {
            self.input.mark();
            let token = match self.input.read_u8() {
                Ok(token) => token,
                Err(e) if is_end_of_stream(&e) => break,
                Err(e) => return Err(e.into()),
            };
            match self.read_token(token) {
                Ok(()) => {
                    self.tokens_read += 1;
                    absorbed = true;
                }
                Err(ArchiveError::Io(e)) if is_end_of_stream(&e) => {
                    if self.input.reset() {
                        debug!(
                            path = %self.path.display(),
                            token,
                            position = self.input.position(),
                            "archive ends mid-token, waiting for more data"
                        );
                    } else {
                        warn!(
                            path = %self.path.display(),
                            token,
                            position = self.input.position(),
                            "archive truncated mid-token"
                        );
                    }
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(absorbed)
    }

    /// Parses one token body completely before changing any table.
    fn read_token(&mut self, token: u8) -> Result<()> {
        match token {
            HEADER_TOKEN => self.read_header(),
            RESOURCE_TYPE_TOKEN => self.read_resource_type(),
            RESOURCE_INSTANCE_CREATE_TOKEN => self.read_instance(false),
            RESOURCE_INSTANCE_INITIALIZE_TOKEN => self.read_instance(true),
            RESOURCE_INSTANCE_DELETE_TOKEN => self.read_delete(),
            SAMPLE_TOKEN => self.read_sample(),
            other => Err(ArchiveError::UnknownToken {
                token: other,
                offset: self.input.position().saturating_sub(1),
            }),
        }
    }

    fn read_header(&mut self) -> Result<()> {
        let info = ArchiveInfo::read(&self.path, &mut self.input)?;
        debug!(
            path = %self.path.display(),
            version = info.version,
            start_time = info.start_time,
            "archive header"
        );
        for inst in &self.instances {
            inst.make_inactive();
        }
        self.types.clear();
        self.live.clear();
        self.timestamps = Arc::new(RwLock::new(TimeStampSeries::new(info.start_time)));
        self.info = Some(Arc::new(info));
        Ok(())
    }

    fn version(&self) -> u8 {
        self.info.as_ref().map_or(ARCHIVE_VERSION, |i| i.version)
    }

    fn wants(&self, predicate: impl Fn(&dyn StatSelector) -> bool) -> bool {
        self.selectors.iter().any(|s| predicate(s.as_ref()))
    }

    fn read_resource_type(&mut self) -> Result<()> {
        let id = self.input.read_i32()?;
        let name = self.input.read_utf()?;
        let description = self.input.read_utf()?;
        let stat_count = self.input.read_u16()? as usize;
        let with_larger_better = self.version() >= LARGER_BETTER_VERSION;
        let mut stats = Vec::with_capacity(stat_count);
        for offset in 0..stat_count {
            let stat_name = self.input.read_utf()?;
            let type_code = TypeCode::from_wire(self.input.read_i8()?)?;
            let is_counter = self.input.read_bool()?;
            let is_larger_better = if with_larger_better {
                self.input.read_bool()?
            } else {
                is_counter
            };
            stats.push(StatDescriptor {
                name: stat_name,
                offset,
                type_code,
                is_counter,
                is_larger_better,
                units: self.input.read_utf()?,
                description: self.input.read_utf()?,
            });
        }

        let load_type = self.wants(|s| s.type_matches(&name));
        let selectors = &self.selectors;
        let rtype = ResourceType::new(id, name.clone(), description, stats, load_type, |d| {
            selectors
                .iter()
                .any(|s| s.type_matches(&name) && s.stat_matches(&d.name))
        });
        debug!(
            id,
            name = %name,
            stats = rtype.stat_count(),
            loaded = rtype.is_loaded(),
            "resource type"
        );
        self.types.insert(id, Arc::new(rtype));
        Ok(())
    }

    fn read_instance_header(&mut self) -> Result<InstanceHeader> {
        let id = self.input.read_i32()?;
        let name = self.input.read_utf()?;
        let numeric_id = self.input.read_i64()?;
        let type_id = self.input.read_i32()?;
        let rtype = self
            .types
            .get(&type_id)
            .cloned()
            .ok_or(ArchiveError::UnknownResourceType(type_id))?;
        Ok(InstanceHeader {
            id,
            name,
            numeric_id,
            rtype,
        })
    }

    fn read_instance(&mut self, initialize: bool) -> Result<()> {
        let header = self.read_instance_header()?;
        let mut initial = Vec::new();
        if initialize {
            for offset in 0..header.rtype.stat_count() {
                if let Some(code) = header.rtype.type_code(offset) {
                    initial.push(read_stat_value(&mut self.input, code)?);
                }
            }
        }

        let loaded = header.rtype.descriptors().next().is_some()
            && header.rtype.name().is_some_and(|type_name| {
                self.wants(|s| {
                    s.type_matches(type_name) && s.instance_matches(&header.name, header.numeric_id)
                })
            });
        let archive = self.info.clone().ok_or(ArchiveError::MissingHeader)?;
        let inst = Arc::new(ResourceInst::new(
            archive,
            header.id,
            header.name,
            header.numeric_id,
            header.rtype,
            loaded,
            self.timestamps.clone(),
        ));
        for (offset, bits) in initial.into_iter().enumerate() {
            inst.initial_value(offset, bits)?;
        }
        debug!(id = inst.id(), name = %inst.name(), loaded, "resource instance created");

        if let Some(prev) = self.live.insert(header.id, self.instances.len()) {
            self.instances[prev].make_inactive();
        }
        self.instances.push(inst);
        Ok(())
    }

    fn read_delete(&mut self) -> Result<()> {
        let id = self.input.read_i32()?;
        let idx = self
            .live
            .remove(&id)
            .ok_or(ArchiveError::UnknownResourceInstance(id))?;
        self.instances[idx].make_inactive();
        debug!(id, "resource instance deleted");
        Ok(())
    }

    fn live_instance(&self, id: i32) -> Result<&Arc<ResourceInst>> {
        self.live
            .get(&id)
            .map(|&idx| &self.instances[idx])
            .ok_or(ArchiveError::UnknownResourceInstance(id))
    }

    fn read_sample(&mut self) -> Result<()> {
        let time_delta = read_time_delta(&mut self.input)?;
        let mut deltas = Vec::new();
        loop {
            let id = read_resource_inst_id(&mut self.input)?;
            if id == ILLEGAL_RESOURCE_INST_ID {
                break;
            }
            let inst = self.live_instance(id)?.clone();
            let rtype = inst.resource_type().clone();
            loop {
                let offset = self.input.read_u8()?;
                if offset == ILLEGAL_STAT_OFFSET {
                    break;
                }
                let offset = offset as usize;
                let code = rtype
                    .type_code(offset)
                    .ok_or(ArchiveError::StatOffsetOutOfRange {
                        offset,
                        stat_count: rtype.stat_count(),
                    })?;
                let delta = read_stat_value(&mut self.input, code)?;
                deltas.push((inst.clone(), offset, delta));
            }
        }

        let ts_idx = {
            let mut timestamps = self
                .timestamps
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            timestamps.add(time_delta);
            timestamps.len() - 1
        };
        for (inst, offset, delta) in deltas {
            inst.prepare_delta(offset, delta)?;
        }
        for &idx in self.live.values() {
            self.instances[idx].tick(ts_idx);
        }
        self.samples_read += 1;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Updates and lifecycle
    // ------------------------------------------------------------------

    /// Whether [`update`](Self::update) can absorb appended bytes.
    pub fn is_updatable(&self) -> bool {
        !self.closed && self.input.is_resumable()
    }

    /// Reads tokens appended since the last read.
    ///
    /// Returns `true` if anything new was absorbed.
    pub fn update(&mut self) -> Result<bool> {
        if self.closed {
            return Err(ArchiveError::ReaderClosed);
        }
        if !self.input.is_resumable() {
            return Err(ArchiveError::NotUpdatable(self.path.clone()));
        }
        let before = self.samples_read;
        let absorbed = self.read_tokens()?;
        if absorbed {
            self.file_combos
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
            debug!(
                path = %self.path.display(),
                tokens = self.tokens_read,
                new_samples = self.samples_read - before,
                "archive updated"
            );
        }
        Ok(absorbed)
    }

    /// Releases the input and drops data no selector retained.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.input = MarkReader::new(Box::new(io::empty()), false);
        self.instances.retain(|inst| inst.is_loaded());
        self.live.clear();
        self.instances.shrink_to_fit();
        self.types.retain(|_, t| !t.is_fully_unloaded());
        for inst in &self.instances {
            inst.shrink();
        }
        self.timestamps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .shrink();
        info!(
            path = %self.path.display(),
            instances = self.instances.len(),
            memory = self.memory_used(),
            "closed archive"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Header of the archive; `None` until a HEADER token was read.
    pub fn info(&self) -> Option<&Arc<ArchiveInfo>> {
        self.info.as_ref()
    }

    /// Resource types of the current header, by wire id.
    pub fn resource_types(&self) -> impl Iterator<Item = &Arc<ResourceType>> {
        self.types.values()
    }

    pub fn instances(&self) -> &[Arc<ResourceInst>] {
        &self.instances
    }

    /// Instance currently owning wire id `id`.
    pub fn instance(&self, id: i32) -> Option<&Arc<ResourceInst>> {
        self.live.get(&id).map(|&idx| &self.instances[idx])
    }

    pub fn tokens_read(&self) -> u64 {
        self.tokens_read
    }

    pub fn samples_read(&self) -> u64 {
        self.samples_read
    }

    pub fn timestamp_count(&self) -> usize {
        self.timestamps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Approximate bytes held by decoded samples.
    pub fn memory_used(&self) -> usize {
        let timestamps = self
            .timestamps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .memory_used();
        timestamps + self.instances.iter().map(|i| i.memory_used()).sum::<usize>()
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Every retained value accepted by `selector`, ignoring its combine type.
    pub fn raw_matches(&self, selector: &dyn StatSelector) -> Vec<Arc<dyn StatValue>> {
        if !selector.archive_matches(&self.path) {
            return Vec::new();
        }
        let mut out: Vec<Arc<dyn StatValue>> = Vec::new();
        for inst in self.instances.iter().filter(|i| i.is_loaded()) {
            let rtype = inst.resource_type();
            let Some(type_name) = rtype.name() else {
                continue;
            };
            if !selector.type_matches(type_name)
                || !selector.instance_matches(inst.name(), inst.numeric_id())
            {
                continue;
            }
            for descriptor in rtype.descriptors() {
                if selector.stat_matches(&descriptor.name) && inst.has_stat(descriptor.offset) {
                    out.push(Arc::new(SimpleValue::new(inst.clone(), descriptor.clone())));
                }
            }
        }
        out
    }

    /// Values matching `selector`. A file combine yields at most one value;
    /// a global combine is left to the reader and returns raw matches here.
    pub fn matches(&self, selector: &dyn StatSelector) -> Result<Vec<Arc<dyn StatValue>>> {
        let raw = self.raw_matches(selector);
        if selector.combine_type() != CombineType::File || raw.is_empty() {
            return Ok(raw);
        }
        Ok(vec![self.file_combo(raw)?])
    }

    /// Builds, or reuses, the combined value of `raw`.
    ///
    /// The merged series is memoized per archive; each call hands out a
    /// detached copy so filter changes stay with the caller.
    fn file_combo(&self, raw: Vec<Arc<dyn StatValue>>) -> Result<Arc<dyn StatValue>> {
        let resources: Vec<Arc<ResourceInst>> = raw.iter().flat_map(|v| v.resources()).collect();
        let stat = raw[0].descriptor().name.clone();
        let type_name = raw[0].type_name().to_string();
        let filter = raw[0].filter();

        let mut cache = self
            .file_combos
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let cached = cache.iter().find(|combo| {
            let members = combo.resources();
            combo.descriptor().name == stat
                && combo.type_name() == type_name
                && combo.base_filter() == filter
                && members.len() == resources.len()
                && members
                    .iter()
                    .all(|m| resources.iter().any(|r| Arc::ptr_eq(m, r)))
        });
        if let Some(combo) = cached {
            return Ok(Arc::new(combo.detached()));
        }
        let combo = ComboValue::new(raw)?;
        let detached = combo.detached();
        cache.push(Arc::new(combo));
        Ok(Arc::new(detached))
    }
}
