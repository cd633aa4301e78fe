//! Synthetic archive writer used by unit tests.

use std::collections::HashMap;
use std::io::Cursor;

use crate::archive::ArchiveFile;
use crate::format::*;

pub(crate) fn write_compact_value(out: &mut Vec<u8>, v: i64) {
    if (MIN_1BYTE_COMPACT_VALUE..=MAX_1BYTE_COMPACT_VALUE).contains(&v) {
        out.push(v as i8 as u8);
    } else if (MIN_2BYTE_COMPACT_VALUE..=MAX_2BYTE_COMPACT_VALUE).contains(&v) {
        out.push(COMPACT_VALUE_2_TOKEN as u8);
        out.extend_from_slice(&(v as i16).to_be_bytes());
    } else {
        let n = (3..=8usize)
            .find(|&n| {
                let bits = 8 * n as u32;
                bits == 64 || (v >= -(1i64 << (bits - 1)) && v < (1i64 << (bits - 1)))
            })
            .unwrap_or(8);
        out.push((COMPACT_VALUE_2_TOKEN as i64 + (n as i64 - 2)) as i8 as u8);
        out.extend_from_slice(&v.to_be_bytes()[8 - n..]);
    }
}

#[derive(Clone)]
pub(crate) struct StatDef {
    pub name: &'static str,
    pub type_code: TypeCode,
    pub counter: bool,
    pub units: &'static str,
}

impl StatDef {
    pub fn counter(name: &'static str, type_code: TypeCode) -> Self {
        Self {
            name,
            type_code,
            counter: true,
            units: "ops",
        }
    }

    pub fn gauge(name: &'static str, type_code: TypeCode) -> Self {
        Self {
            name,
            type_code,
            counter: false,
            units: "items",
        }
    }
}

/// Writes a token stream in archive format.
pub(crate) struct ArchiveWriter {
    buf: Vec<u8>,
    version: u8,
    type_codes: HashMap<i32, Vec<TypeCode>>,
    inst_types: HashMap<i32, i32>,
}

impl ArchiveWriter {
    pub fn new() -> Self {
        Self::with_version(ARCHIVE_VERSION)
    }

    pub fn with_version(version: u8) -> Self {
        Self {
            buf: Vec::new(),
            version,
            type_codes: HashMap::new(),
            inst_types: HashMap::new(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn utf(&mut self, s: &str) {
        self.buf.extend_from_slice(&(s.len() as u16).to_be_bytes());
        self.buf.extend_from_slice(s.as_bytes());
    }

    fn value(&mut self, type_code: TypeCode, v: i64) {
        match type_code {
            TypeCode::Boolean | TypeCode::Byte | TypeCode::Char => self.buf.push(v as i8 as u8),
            TypeCode::WChar => self.buf.extend_from_slice(&(v as u16).to_be_bytes()),
            TypeCode::Short => self.buf.extend_from_slice(&(v as i16).to_be_bytes()),
            _ => write_compact_value(&mut self.buf, v),
        }
    }

    fn inst_id(&mut self, id: i32) {
        if (0..=MAX_BYTE_RESOURCE_INST_ID as i32).contains(&id) {
            self.buf.push(id as u8);
        } else if (0..=u16::MAX as i32).contains(&id) {
            self.buf.push(SHORT_RESOURCE_INST_ID_TOKEN);
            self.buf.extend_from_slice(&(id as u16).to_be_bytes());
        } else {
            self.buf.push(INT_RESOURCE_INST_ID_TOKEN);
            self.buf.extend_from_slice(&id.to_be_bytes());
        }
    }

    pub fn header(mut self, start_time: i64) -> Self {
        self.buf.push(HEADER_TOKEN);
        self.buf.push(self.version);
        self.buf.extend_from_slice(&start_time.to_be_bytes());
        self.buf.extend_from_slice(&42i64.to_be_bytes());
        self.buf.extend_from_slice(&(start_time - 60_000).to_be_bytes());
        self.buf.extend_from_slice(&3_600_000i32.to_be_bytes());
        self.utf("CET");
        self.utf("/var/stats");
        self.utf("1.0.0");
        self.utf("Linux 6.1");
        self.utf("x86_64 test-host");
        self
    }

    pub fn resource_type(mut self, id: i32, name: &str, stats: &[StatDef]) -> Self {
        self.buf.push(RESOURCE_TYPE_TOKEN);
        self.buf.extend_from_slice(&id.to_be_bytes());
        self.utf(name);
        self.utf(&format!("{name} statistics"));
        self.buf.extend_from_slice(&(stats.len() as u16).to_be_bytes());
        for stat in stats {
            self.utf(stat.name);
            self.buf.push(stat.type_code.to_wire() as u8);
            self.buf.push(stat.counter as u8);
            if self.version >= LARGER_BETTER_VERSION {
                self.buf.push(stat.counter as u8);
            }
            self.utf(stat.units);
            self.utf(&format!("{} description", stat.name));
        }
        self.type_codes
            .insert(id, stats.iter().map(|s| s.type_code).collect());
        self
    }

    fn instance_fields(&mut self, id: i32, name: &str, numeric_id: i64, type_id: i32) {
        self.buf.extend_from_slice(&id.to_be_bytes());
        self.utf(name);
        self.buf.extend_from_slice(&numeric_id.to_be_bytes());
        self.buf.extend_from_slice(&type_id.to_be_bytes());
        self.inst_types.insert(id, type_id);
    }

    pub fn create(mut self, id: i32, name: &str, numeric_id: i64, type_id: i32) -> Self {
        self.buf.push(RESOURCE_INSTANCE_CREATE_TOKEN);
        self.instance_fields(id, name, numeric_id, type_id);
        self
    }

    pub fn initialize(
        mut self,
        id: i32,
        name: &str,
        numeric_id: i64,
        type_id: i32,
        initial: &[i64],
    ) -> Self {
        self.buf.push(RESOURCE_INSTANCE_INITIALIZE_TOKEN);
        self.instance_fields(id, name, numeric_id, type_id);
        let codes = self.type_codes[&type_id].clone();
        for (code, v) in codes.into_iter().zip(initial) {
            self.value(code, *v);
        }
        self
    }

    pub fn delete(mut self, id: i32) -> Self {
        self.buf.push(RESOURCE_INSTANCE_DELETE_TOKEN);
        self.buf.extend_from_slice(&id.to_be_bytes());
        self
    }

    /// Writes a SAMPLE: `changes` lists (instance id, [(stat offset, delta)]).
    pub fn sample(mut self, time_delta: i32, changes: &[(i32, &[(u8, i64)])]) -> Self {
        self.buf.push(SAMPLE_TOKEN);
        if (0..=MAX_SHORT_TIMESTAMP as i32).contains(&time_delta) {
            self.buf.extend_from_slice(&(time_delta as u16).to_be_bytes());
        } else {
            self.buf.extend_from_slice(&INT_TIMESTAMP_TOKEN.to_be_bytes());
            self.buf.extend_from_slice(&time_delta.to_be_bytes());
        }
        for (inst, stats) in changes {
            self.inst_id(*inst);
            let type_id = self.inst_types[inst];
            let codes = self.type_codes[&type_id].clone();
            for (offset, delta) in stats.iter() {
                self.buf.push(*offset);
                self.value(codes[*offset as usize], *delta);
            }
            self.buf.push(ILLEGAL_STAT_OFFSET);
        }
        self.buf.push(ILLEGAL_RESOURCE_INST_ID_TOKEN);
        self
    }

    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.buf.extend_from_slice(bytes);
        self
    }
}

/// The archive used by the end-to-end tests: one `VMStats` type with a
/// counter (`ops`) and a gauge (`threads`), two instances, five samples.
///
/// Sample times (ms after start): 1000, 2000, 4000, 5000, 7500.
/// `vm-a` ops: 10, 20, 40, 45, 70   threads: 5, 6, 6, 4, 4
/// `vm-b` ops: 100, 100, 130, 160, 160   threads: 2, 2, 3, 3, 1
pub(crate) fn two_instance_archive() -> Vec<u8> {
    let stats = [
        StatDef::counter("ops", TypeCode::Long),
        StatDef::gauge("threads", TypeCode::Int),
    ];
    ArchiveWriter::new()
        .header(1_700_000_000_000)
        .resource_type(0, "VMStats", &stats)
        .initialize(0, "vm-a", 11, 0, &[0, 5])
        .initialize(1, "vm-b", 12, 0, &[100, 2])
        .sample(1000, &[(0, &[(0, 10)])])
        .sample(1000, &[(0, &[(0, 10), (1, 1)])])
        .sample(2000, &[(0, &[(0, 20)]), (1, &[(0, 30), (1, 1)])])
        .sample(1000, &[(0, &[(0, 5), (1, -2)]), (1, &[(0, 30)])])
        .sample(2500, &[(0, &[(0, 25)]), (1, &[(1, -2)])])
        .into_bytes()
}

/// Decodes `bytes` as `test.gfs`, retaining everything.
pub(crate) fn decode_all(bytes: Vec<u8>) -> ArchiveFile {
    ArchiveFile::from_reader("test.gfs", Cursor::new(bytes), true, &[]).unwrap()
}
