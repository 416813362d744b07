use num_derive::FromPrimitive;

/// Line address: physical byte address shifted right by `LINE_BITS`. A value
/// of zero marks an invalid (empty) slot, so real line addresses are nonzero.
pub type Address = u64;

pub type Cycle = u64;

/// log2 of the cache line size.
pub const LINE_BITS: u32 = 6;
pub const LINE_BYTES: u32 = 1 << LINE_BITS;

/// Integer encodings of a failed lookup, kept for stats dumps and trace
/// tooling that want the classic signed codes.
pub const FULLMISS: i32 = -1;
pub const OUTOFRANGEMISS: i32 = -2;

/// Request flag bits carried in `MemReq::flags`.
pub mod flags {
    pub const PREFETCH: u32 = 1 << 0;
    pub const SPECULATIVE: u32 = 1 << 1;
    pub const SW_SPECULATIVE: u32 = 1 << 2;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum AccessType {
    Gets = 0,
    Getx = 1,
    Puts = 2,
    Putx = 3,
}

/// Per-access descriptor consumed (never owned) by the arrays.
#[derive(Debug, Clone, Copy)]
pub struct MemReq {
    pub pc: u64,
    pub line_addr: Address,
    /// Byte-granular virtual address of the access; only meaningful when
    /// `size > 0`.
    pub vaddr: u64,
    pub size: u16,
    pub kind: AccessType,
    pub cycle: Cycle,
    pub flags: u32,
    /// Nonzero when a prefetch wants to skip this level: the request must not
    /// mutate replacement state here.
    pub prefetch_skip: u32,
}

impl MemReq {
    pub fn load(line_addr: Address, cycle: Cycle) -> Self {
        Self {
            pc: 0,
            line_addr,
            vaddr: 0,
            size: 0,
            kind: AccessType::Gets,
            cycle,
            flags: 0,
            prefetch_skip: 0,
        }
    }

    pub fn store(line_addr: Address, cycle: Cycle) -> Self {
        Self {
            kind: AccessType::Getx,
            ..Self::load(line_addr, cycle)
        }
    }

    pub fn hw_prefetch(line_addr: Address, cycle: Cycle) -> Self {
        Self {
            flags: flags::PREFETCH | flags::SPECULATIVE,
            ..Self::load(line_addr, cycle)
        }
    }

    pub fn with_bytes(mut self, vaddr: u64, size: u16) -> Self {
        self.vaddr = vaddr;
        self.size = size;
        self
    }

    pub fn with_pc(mut self, pc: u64) -> Self {
        self.pc = pc;
        self
    }

    pub fn line_base(&self) -> u64 {
        self.line_addr << LINE_BITS as u64
    }

    /// Hardware prefetch: prefetch-flagged but not software-speculative.
    pub fn is_hw_prefetch(&self) -> bool {
        self.flags & flags::PREFETCH != 0 && self.flags & flags::SW_SPECULATIVE == 0
    }

    /// Demand load: a GETS that is not a prefetch of any kind.
    pub fn is_demand_load(&self) -> bool {
        self.kind == AccessType::Gets && self.flags & flags::PREFETCH == 0
    }

    pub fn skips_level(&self) -> bool {
        self.prefetch_skip != 0
    }

    /// Only loads and stores drive the replacement policy.
    pub fn updates_replacement(&self) -> bool {
        matches!(self.kind, AccessType::Gets | AccessType::Getx)
    }
}
