use crate::array::hash::HashFamily;
use crate::array::mask;
use crate::array::repl::ReplPolicy;
use crate::array::req::{Address, Cycle, MemReq, FULLMISS, LINE_BITS, OUTOFRANGEMISS};
use crate::array::stats::ArrayStats;

/// One tag slot. `addr == 0` marks an empty slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineEntry {
    pub addr: Address,
    /// Cycle at which the line's data is (or becomes) available.
    pub avail_cycle: Cycle,
    /// Cycle at which the fill that produced this line began.
    pub start_cycle: Cycle,
    /// Set iff the last insert was a hardware prefetch and no demand access
    /// has consumed the line yet.
    pub prefetch: bool,
    pub pc: u64,
    pub access_mask: u64,
}

/// Outcome of a lookup. `OutOfRange` only occurs for variable-line arrays:
/// the line is resident in `prev_id` but the requested bytes fall outside
/// the stored sub-line extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Hit { line_id: u32, avail_cycle: Cycle },
    FullMiss,
    OutOfRange { prev_id: u32 },
}

impl Lookup {
    /// Classic signed encoding: the line id on a hit, a negative sentinel
    /// otherwise.
    pub fn code(self) -> i32 {
        match self {
            Lookup::Hit { line_id, .. } => line_id as i32,
            Lookup::FullMiss => FULLMISS,
            Lookup::OutOfRange { .. } => OUTOFRANGEMISS,
        }
    }

    pub fn is_hit(self) -> bool {
        matches!(self, Lookup::Hit { .. })
    }
}

/// Victim chosen by `preinsert`: the slot to overwrite and the address that
/// must be written back (0 when the slot was empty).
#[derive(Debug, Clone, Copy)]
pub struct Eviction {
    pub line_id: u32,
    pub wb_addr: Address,
}

/// Uniform three-step access protocol shared by all array organizations.
/// `lookup` mutates: availability reconciliation, access-mask recording and
/// telemetry all happen on what is nominally a read. `preinsert` must be
/// followed by `postinsert` for the same miss, with arbitrary intervening
/// lookups on other addresses allowed in between.
pub trait CacheArray {
    fn lookup(&mut self, line_addr: Address, req: Option<&MemReq>, update_replacement: bool)
        -> Lookup;

    fn preinsert(&mut self, line_addr: Address, req: &MemReq) -> Eviction;

    fn postinsert(&mut self, line_addr: Address, req: &MemReq, line_id: u32, resp_cycle: Cycle);

    fn stats(&self) -> &ArrayStats;
}

/// Availability reconciliation for a hit on a line that is already filled.
pub(crate) fn ready_hit(entry: &mut LineEntry, stats: &mut ArrayStats, req: &MemReq) -> Cycle {
    let avail = req.cycle;
    if entry.prefetch && req.is_demand_load() {
        stats.pref_hits += 1;
        stats.pref_saved_cyc += entry.avail_cycle - entry.start_cycle;
        entry.prefetch = false;
    } else if entry.prefetch && req.is_hw_prefetch() {
        stats.pref_hit_pref += 1;
    }
    avail
}

/// Availability reconciliation for a hit on an in-flight line, compensating
/// for out-of-order requests: a request older than the installing fill
/// rewrites the fill window as if it had started the fill itself.
pub(crate) fn inflight_hit(entry: &mut LineEntry, stats: &mut ArrayStats, req: &MemReq) -> Cycle {
    let avail;
    if req.cycle < entry.start_cycle {
        avail = entry.avail_cycle - (entry.start_cycle - req.cycle);
        entry.avail_cycle = avail;
        entry.start_cycle = req.cycle;
        if req.is_demand_load() {
            stats.pref_inaccurate_ooo += 1;
        }
    } else {
        avail = entry.avail_cycle;
    }
    if entry.prefetch && req.is_demand_load() {
        stats.pref_late_miss += 1;
        stats.pref_total_late_cyc += avail - req.cycle;
        stats.pref_saved_cyc += req.cycle - entry.start_cycle;
        entry.prefetch = false;
    } else if entry.prefetch && req.is_hw_prefetch() {
        stats.pref_hit_pref += 1;
    }
    avail
}

pub(crate) fn reconcile_hit(entry: &mut LineEntry, stats: &mut ArrayStats, req: &MemReq) -> Cycle {
    let avail = if req.cycle >= entry.avail_cycle {
        ready_hit(entry, stats, req)
    } else {
        inflight_hit(entry, stats, req)
    };
    if req.is_demand_load() {
        stats.hit_delay_cycles += avail - req.cycle;
    }
    avail
}

pub(crate) fn record_access_bytes(entry: &mut LineEntry, line_addr: Address, req: &MemReq) {
    if req.size > 0 {
        let offset = (req.vaddr - (line_addr << LINE_BITS as u64)) as u32;
        entry.access_mask = mask::set_accessed(entry.access_mask, offset, offset + req.size as u32);
    }
}

/// Overwrite `entry` with a freshly inserted line, crediting the usage
/// histogram and the prefetch accounting for the evicted occupant first.
pub(crate) fn install_entry(
    entry: &mut LineEntry,
    stats: &mut ArrayStats,
    line_addr: Address,
    req: &MemReq,
    resp_cycle: Cycle,
) {
    stats.note_evicted_mask(entry.access_mask);
    if req.is_hw_prefetch() {
        stats.pref_post_insert += 1;
    }
    if entry.prefetch {
        // A prefetched line dies without ever being demanded.
        stats.pref_early_miss += 1;
        if req.is_hw_prefetch() {
            stats.pref_replace_pref += 1;
        }
    }
    *entry = LineEntry {
        addr: line_addr,
        avail_cycle: resp_cycle,
        start_cycle: req.cycle,
        prefetch: req.is_hw_prefetch(),
        pc: req.pc,
        access_mask: 0,
    };
}

pub struct SetAssocArray {
    lines: Vec<LineEntry>,
    rp: Box<dyn ReplPolicy>,
    hf: Box<dyn HashFamily>,
    num_sets: u32,
    assoc: u32,
    set_mask: u64,
    stats: ArrayStats,
}

impl SetAssocArray {
    pub fn new(
        num_lines: u32,
        assoc: u32,
        rp: Box<dyn ReplPolicy>,
        hf: Box<dyn HashFamily>,
    ) -> Self {
        assert!(assoc > 0, "associativity must be nonzero");
        assert!(
            num_lines % assoc == 0,
            "{num_lines} lines is not a multiple of {assoc} ways"
        );
        let num_sets = num_lines / assoc;
        assert!(
            num_sets.is_power_of_two(),
            "number of sets must be a power of two, got {num_sets}"
        );
        Self {
            lines: vec![LineEntry::default(); num_lines as usize],
            rp,
            hf,
            num_sets,
            assoc,
            set_mask: (num_sets - 1) as u64,
            stats: ArrayStats::default(),
        }
    }

    pub fn num_sets(&self) -> u32 {
        self.num_sets
    }

    pub fn assoc(&self) -> u32 {
        self.assoc
    }

    fn set_base(&self, line_addr: Address) -> u32 {
        let set = (self.hf.hash(0, line_addr) & self.set_mask) as u32;
        set * self.assoc
    }

    pub fn entry(&self, line_id: u32) -> &LineEntry {
        &self.lines[line_id as usize]
    }
}

impl CacheArray for SetAssocArray {
    fn lookup(
        &mut self,
        line_addr: Address,
        req: Option<&MemReq>,
        update_replacement: bool,
    ) -> Lookup {
        if line_addr == 0 {
            panic!("lookup called with line address 0; upstream request is corrupt");
        }
        if req.is_some_and(MemReq::is_hw_prefetch) {
            self.stats.pref_accesses += 1;
        }
        let first = self.set_base(line_addr);
        for id in first..first + self.assoc {
            if self.lines[id as usize].addr != line_addr {
                continue;
            }
            let avail = self.lines[id as usize].avail_cycle;
            let Some(req) = req else {
                return Lookup::Hit {
                    line_id: id,
                    avail_cycle: avail,
                };
            };
            if req.skips_level() {
                return Lookup::Hit {
                    line_id: id,
                    avail_cycle: avail,
                };
            }
            if req.is_hw_prefetch() {
                self.stats.pref_in_cache += 1;
            }
            if update_replacement {
                self.rp.update(id, req);
            }
            let entry = &mut self.lines[id as usize];
            record_access_bytes(entry, line_addr, req);
            let avail = reconcile_hit(entry, &mut self.stats, req);
            return Lookup::Hit {
                line_id: id,
                avail_cycle: avail,
            };
        }
        if req.is_some_and(MemReq::is_hw_prefetch) {
            self.stats.pref_not_in_cache += 1;
        }
        Lookup::FullMiss
    }

    fn preinsert(&mut self, line_addr: Address, req: &MemReq) -> Eviction {
        let first = self.set_base(line_addr);
        let victim = self.rp.rank(req, &mut (first..first + self.assoc));
        Eviction {
            line_id: victim,
            wb_addr: self.lines[victim as usize].addr,
        }
    }

    fn postinsert(&mut self, line_addr: Address, req: &MemReq, line_id: u32, resp_cycle: Cycle) {
        self.rp.replaced(line_id);
        install_entry(
            &mut self.lines[line_id as usize],
            &mut self.stats,
            line_addr,
            req,
            resp_cycle,
        );
        self.rp.update(line_id, req);
    }

    fn stats(&self) -> &ArrayStats {
        &self.stats
    }
}
