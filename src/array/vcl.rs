use log::debug;

use crate::array::hash::HashFamily;
use crate::array::mask;
use crate::array::repl::ReplPolicy;
use crate::array::req::{Address, Cycle, MemReq, LINE_BITS};
use crate::array::set_assoc::{
    inflight_hit, install_entry, ready_hit, record_access_bytes, CacheArray, Eviction, LineEntry,
    Lookup,
};
use crate::array::stats::ArrayStats;

/// Victim descriptor produced by the variable-line preinsert stages and
/// consumed by the matching postinsert. `write_back` is 0 when the slot was
/// empty.
#[derive(Debug, Clone, Copy)]
pub struct ReplacementCandidate {
    pub array_idx: u32,
    pub write_back: Address,
    pub start_offset: u8,
    pub end_offset: u8,
    pub access_mask: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct VclEntry {
    line: LineEntry,
    start_offset: u8,
    block_size: u8,
}

impl VclEntry {
    fn holds(&self, line_addr: Address) -> bool {
        self.line.addr == line_addr
    }
}

/// Variable-cache-line array. Each way stores a sub-line `[start_offset,
/// start_offset + block_size)` of a 64-byte block; the trailing
/// `buffer_ways` store full lines in FIFO order and feed the sub-line ways
/// through demotion, sized from the access footprint observed while the
/// line sat in the buffer.
pub struct VclArray {
    entries: Vec<VclEntry>,
    rp: Box<dyn ReplPolicy>,
    hf: Box<dyn HashFamily>,
    num_sets: u32,
    assoc: u32,
    set_mask: u64,
    way_sizes: Vec<u8>,
    buffer_ways: Vec<u8>,
    /// Per-set rotor into `buffer_ways`: the next buffer victim. Advanced by
    /// the buffer-way postinsert, so one victim per placement, rotating with
    /// period `buffer_ways.len()`.
    fifo_next: Vec<usize>,
    stats: ArrayStats,
}

impl VclArray {
    pub fn new(
        num_lines: u32,
        way_sizes: Vec<u8>,
        buffer_ways: Vec<u8>,
        rp: Box<dyn ReplPolicy>,
        hf: Box<dyn HashFamily>,
    ) -> Self {
        let assoc = way_sizes.len() as u32;
        assert!(assoc > 0, "way size list must not be empty");
        assert!(
            num_lines % assoc == 0,
            "{num_lines} lines is not a multiple of {assoc} ways"
        );
        let num_sets = num_lines / assoc;
        assert!(
            num_sets.is_power_of_two(),
            "number of sets must be a power of two, got {num_sets}"
        );
        assert!(
            !buffer_ways.is_empty() && buffer_ways.len() < way_sizes.len(),
            "need at least one buffer way and one sub-line way"
        );
        assert!(
            buffer_ways.windows(2).all(|w| w[0] < w[1]),
            "buffer way indexes must be sorted and unique"
        );
        assert!(
            (*buffer_ways.last().unwrap() as u32) < assoc,
            "buffer way index out of range"
        );
        // Demotion ranks the contiguous id range of non-buffer ways, so the
        // buffer ways have to be the top way indexes.
        let expected_first = assoc - buffer_ways.len() as u32;
        assert!(
            buffer_ways
                .iter()
                .enumerate()
                .all(|(i, &w)| w as u32 == expected_first + i as u32),
            "buffer ways must occupy the highest way indexes"
        );
        for (w, &size) in way_sizes.iter().enumerate() {
            if buffer_ways.contains(&(w as u8)) {
                assert!(size == 64, "buffer way {w} must be full-line sized");
            } else {
                assert!(
                    (2..=63).contains(&size),
                    "sub-line way {w} size {size} out of range 2..=63"
                );
            }
        }
        Self {
            entries: vec![VclEntry::default(); num_lines as usize],
            rp,
            hf,
            num_sets,
            assoc,
            set_mask: (num_sets - 1) as u64,
            way_sizes,
            buffer_ways,
            fifo_next: vec![0; num_sets as usize],
            stats: ArrayStats::default(),
        }
    }

    fn set_base(&self, line_addr: Address) -> u32 {
        let set = (self.hf.hash(0, line_addr) & self.set_mask) as u32;
        set * self.assoc
    }

    fn in_extent(&self, id: u32, line_addr: Address, req: &MemReq) -> bool {
        if req.size == 0 {
            // No byte information; a tag match is all we can check.
            return true;
        }
        let entry = &self.entries[id as usize];
        let offset = req.vaddr - (line_addr << LINE_BITS as u64);
        let start = entry.start_offset as u64;
        offset >= start && offset + req.size as u64 <= start + entry.block_size as u64
    }

    pub fn sub_line(&self, line_id: u32) -> (u8, u8) {
        let e = &self.entries[line_id as usize];
        (e.start_offset, e.block_size)
    }

    pub fn entry(&self, line_id: u32) -> &LineEntry {
        &self.entries[line_id as usize].line
    }

    /// FIFO victim among this set's buffer ways. Read-only: the rotor
    /// advances when the placement actually happens, so repeated preinserts
    /// for the same miss agree.
    pub fn preinsert_buffer(&self, line_addr: Address, _req: &MemReq) -> ReplacementCandidate {
        let first = self.set_base(line_addr);
        let set = (first / self.assoc) as usize;
        let way = self.buffer_ways[self.fifo_next[set]];
        let idx = first + way as u32;
        let entry = &self.entries[idx as usize];
        ReplacementCandidate {
            array_idx: idx,
            write_back: entry.line.addr,
            start_offset: 0,
            end_offset: 63,
            access_mask: entry.line.access_mask,
        }
    }

    /// Demotion targets for the line leaving the buffer slot `buffer_idx`.
    /// One candidate per contiguous accessed run, largest runs first so they
    /// claim the large ways; an empty footprint demotes nothing and the
    /// line is simply dropped.
    pub fn preinsert_demote(&mut self, req: &MemReq, buffer_idx: u32) -> Vec<ReplacementCandidate> {
        let footprint = self.entries[buffer_idx as usize].line.access_mask;
        let mut blocks = mask::runs(footprint);
        if blocks.is_empty() {
            return Vec::new();
        }
        // Stable sort: equal lengths keep ascending-offset order.
        blocks.sort_by(|a, b| (b.1 - b.0).cmp(&(a.1 - a.0)));

        let first = buffer_idx - buffer_idx % self.assoc;
        let max_way = self.assoc - self.buffer_ways.len() as u32;
        let mut chosen: Vec<u32> = Vec::new();
        let mut out = Vec::with_capacity(blocks.len());
        for &(lo, hi) in &blocks {
            if chosen.len() as u32 == max_way {
                debug!(
                    "demotion out of ways in set {}; dropping run {}..={}",
                    first / self.assoc,
                    lo,
                    hi
                );
                break;
            }
            let len = hi - lo + 1;
            let target = self.rp.rank_for_size(
                req,
                &mut (first..first + max_way).filter(|id| !chosen.contains(id)),
                len,
                max_way,
            );
            chosen.push(target);

            let way = (target % self.assoc) as usize;
            let size = self.way_sizes[way].max(len).min(63);
            let mut start = lo.max(1);
            if start as u32 + size as u32 > 64 {
                start = 64 - size;
            }
            let entry = &self.entries[target as usize];
            out.push(ReplacementCandidate {
                array_idx: target,
                write_back: entry.line.addr,
                start_offset: start,
                end_offset: start + size - 1,
                access_mask: entry.line.access_mask,
            });
        }
        assert!(
            !out.is_empty(),
            "demotion of a nonempty footprint produced no candidate"
        );
        out
    }

    /// All resident entries of `line_addr` in its home set, as candidates
    /// carrying their extents and access masks. With `invalidate` the slots
    /// are cleared, so the caller can migrate the line elsewhere (the
    /// out-of-range refill path).
    pub fn get_all_entries(
        &mut self,
        line_addr: Address,
        _req: &MemReq,
        invalidate: bool,
    ) -> Vec<ReplacementCandidate> {
        debug_assert_ne!(line_addr, 0);
        let first = self.set_base(line_addr);
        let mut out = Vec::new();
        for id in first..first + self.assoc {
            if !self.entries[id as usize].holds(line_addr) {
                continue;
            }
            let e = &self.entries[id as usize];
            out.push(ReplacementCandidate {
                array_idx: id,
                write_back: e.line.addr,
                start_offset: e.start_offset,
                end_offset: e.start_offset + e.block_size.max(1) - 1,
                access_mask: e.line.access_mask,
            });
            if invalidate {
                self.entries[id as usize] = VclEntry::default();
                self.rp.replaced(id);
            }
        }
        out
    }

    /// Install a full line into a buffer slot. `moved` carries entries the
    /// caller migrated out of sub-line ways; their footprints seed the new
    /// buffer entry's access mask so demotion sizing survives the round
    /// trip.
    pub fn postinsert_full(
        &mut self,
        line_addr: Address,
        req: &MemReq,
        line_id: u32,
        moved: &[ReplacementCandidate],
        resp_cycle: Cycle,
    ) {
        self.rp.replaced(line_id);
        install_entry(
            &mut self.entries[line_id as usize].line,
            &mut self.stats,
            line_addr,
            req,
            resp_cycle,
        );
        let entry = &mut self.entries[line_id as usize];
        entry.line.access_mask = mask::union(moved.iter().map(|c| c.access_mask));
        entry.start_offset = 0;
        entry.block_size = 64;
        self.rp.update(line_id, req);

        let way = (line_id % self.assoc) as u8;
        if self.buffer_ways.contains(&way) {
            let set = (line_id / self.assoc) as usize;
            self.fifo_next[set] = (self.fifo_next[set] + 1) % self.buffer_ways.len();
        }
    }

    /// Install the demoted line's sub-lines into their target ways.
    pub fn postinsert_demote(
        &mut self,
        demoted_addr: Address,
        req: &MemReq,
        targets: &[ReplacementCandidate],
        resp_cycle: Cycle,
    ) {
        for t in targets {
            self.rp.replaced(t.array_idx);
            install_entry(
                &mut self.entries[t.array_idx as usize].line,
                &mut self.stats,
                demoted_addr,
                req,
                resp_cycle,
            );
            let entry = &mut self.entries[t.array_idx as usize];
            entry.start_offset = t.start_offset;
            entry.block_size = t.end_offset - t.start_offset + 1;
            self.rp.update(t.array_idx, req);
        }
    }
}

impl CacheArray for VclArray {
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
            if !self.entries[id as usize].holds(line_addr) {
                continue;
            }
            let avail = self.entries[id as usize].line.avail_cycle;
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
            if req.cycle >= avail {
                if !self.in_extent(id, line_addr, req) {
                    // Resident, but the stored sub-line does not cover the
                    // requested bytes. The caller refetches into a buffer
                    // way and migrates this slot.
                    if req.is_hw_prefetch() {
                        self.stats.pref_out_of_bounds_miss += 1;
                    }
                    return Lookup::OutOfRange { prev_id: id };
                }
                let entry = &mut self.entries[id as usize].line;
                record_access_bytes(entry, line_addr, req);
                let avail = ready_hit(entry, &mut self.stats, req);
                if req.is_demand_load() {
                    self.stats.hit_delay_cycles += avail - req.cycle;
                }
                return Lookup::Hit {
                    line_id: id,
                    avail_cycle: avail,
                };
            }
            // Still in flight: the fill lands in a full-width buffer way, so
            // there is no extent to violate.
            let entry = &mut self.entries[id as usize].line;
            record_access_bytes(entry, line_addr, req);
            let avail = inflight_hit(entry, &mut self.stats, req);
            if req.is_demand_load() {
                self.stats.hit_delay_cycles += avail - req.cycle;
            }
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
        let candidate = self.preinsert_buffer(line_addr, req);
        Eviction {
            line_id: candidate.array_idx,
            wb_addr: candidate.write_back,
        }
    }

    fn postinsert(&mut self, line_addr: Address, req: &MemReq, line_id: u32, resp_cycle: Cycle) {
        self.postinsert_full(line_addr, req, line_id, &[], resp_cycle);
    }

    fn stats(&self) -> &ArrayStats {
        &self.stats
    }
}
