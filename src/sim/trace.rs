use std::io::{self, Read};

use num_traits::FromPrimitive;

use crate::array::hash::mix64;
use crate::array::req::{AccessType, Cycle, MemReq, LINE_BITS};
use crate::sim::config::TrafficConfig;

/// Base of the synthetic address space; keeps generated line addresses well
/// away from 0, which the arrays treat as the invalid-slot marker.
const ADDR_BASE: u64 = 0x1000_0000;
const PC_BASE: u64 = 0x40_0000;

#[derive(Debug, Clone)]
enum PatternKind {
    Strided,
    Random,
}

/// Deterministic request generator; address, op and prefetch decisions all
/// derive from the request index, so a (pattern, seed) pair replays
/// identically.
#[derive(Debug, Clone)]
pub struct TrafficGen {
    cfg: TrafficConfig,
    kind: PatternKind,
}

impl TrafficGen {
    pub fn new(cfg: TrafficConfig) -> Self {
        let kind = match cfg.pattern.trim().to_ascii_lowercase().as_str() {
            "strided" => PatternKind::Strided,
            "random" | "random_access" => PatternKind::Random,
            other => panic!("unsupported traffic pattern '{other}' (expected strided|random)"),
        };
        Self { cfg, kind }
    }

    pub fn requests(&self) -> u64 {
        self.cfg.requests
    }

    pub fn request(&self, idx: u64, cycle: Cycle) -> MemReq {
        let bytes = self.cfg.req_bytes.max(1) as u64;
        let footprint = self.cfg.footprint.max(bytes);
        let offset = match self.kind {
            PatternKind::Strided => idx.wrapping_mul(self.cfg.stride.max(1)) % footprint,
            PatternKind::Random => mix64(self.cfg.seed ^ idx) % footprint,
        };
        // Keep each access inside one line-aligned chunk of `bytes`.
        let vaddr = ADDR_BASE + offset / bytes * bytes;
        let line_addr = vaddr >> LINE_BITS as u64;

        let is_store = decide(
            self.cfg.write_ratio,
            mix64(self.cfg.seed ^ idx ^ 0xD4D4_D4D4_D4D4_D4D4),
        );
        let is_prefetch = !is_store
            && decide(
                self.cfg.prefetch_ratio,
                mix64(self.cfg.seed ^ idx ^ 0xE5E5_E5E5_E5E5_E5E5),
            );

        let base = if is_prefetch {
            MemReq::hw_prefetch(line_addr, cycle)
        } else if is_store {
            MemReq::store(line_addr, cycle)
        } else {
            MemReq::load(line_addr, cycle)
        };
        base.with_bytes(vaddr, bytes as u16)
            .with_pc(PC_BASE + (idx % 256) * 4)
    }
}

fn decide(rate: f64, key: u64) -> bool {
    let clamped = rate.clamp(0.0, 1.0);
    if clamped <= 0.0 {
        return false;
    }
    if clamped >= 1.0 {
        return true;
    }
    let threshold = (clamped * (u64::MAX as f64)) as u64;
    key <= threshold
}

/// Fixed-width little-endian trace records:
/// `pc:u64 vaddr:u64 cycle:u64 size:u16 kind:u8 flags:u8 skip:u32`.
pub const TRACE_RECORD_BYTES: usize = 32;

pub struct TraceReader<R: Read> {
    inner: R,
}

impl<R: Read> TraceReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Next request, or `None` at a clean end of stream.
    pub fn next_req(&mut self) -> io::Result<Option<MemReq>> {
        let mut buf = [0u8; TRACE_RECORD_BYTES];
        match self.inner.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
        let pc = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let vaddr = u64::from_le_bytes(buf[8..16].try_into().unwrap());
        let cycle = u64::from_le_bytes(buf[16..24].try_into().unwrap());
        let size = u16::from_le_bytes(buf[24..26].try_into().unwrap());
        let kind = AccessType::from_u8(buf[26]).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bad access type {} in trace record", buf[26]),
            )
        })?;
        let flags = buf[27] as u32;
        let skip = u32::from_le_bytes(buf[28..32].try_into().unwrap());
        Ok(Some(MemReq {
            pc,
            line_addr: vaddr >> LINE_BITS as u64,
            vaddr,
            size,
            kind,
            cycle,
            flags,
            prefetch_skip: skip,
        }))
    }
}
