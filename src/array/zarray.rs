use crate::array::hash::HashFamily;
use crate::array::repl::ReplPolicy;
use crate::array::req::{Address, Cycle, MemReq};
use crate::array::set_assoc::{
    install_entry, record_access_bytes, reconcile_hit, CacheArray, Eviction, LineEntry, Lookup,
};
use crate::array::stats::ArrayStats;

/// One node of the replacement BFS. `parent_idx` indexes the candidate
/// buffer (-1 for a seed), never a pointer, so the walk buffer stays a flat
/// arena.
#[derive(Debug, Clone, Copy)]
struct ZWalkInfo {
    pos: u32,
    line_id: u32,
    parent_idx: i32,
}

/// Skew-associative array. `ways` hash functions index one shared pool;
/// `lookup_array` maps physical positions to line ids and is the only state
/// the relocation chain permutes. Data slots are never copied.
pub struct ZArray {
    lines: Vec<LineEntry>,
    lookup_array: Vec<u32>,
    rp: Box<dyn ReplPolicy>,
    hf: Box<dyn HashFamily>,
    num_lines: u32,
    num_sets: u32,
    ways: u32,
    cands: u32,
    set_mask: u64,
    /// Physical positions recorded by `preinsert`, applied by `postinsert`.
    swap_array: Vec<u32>,
    last_cand_idx: u32,
    stats: ArrayStats,
}

impl ZArray {
    pub fn new(
        num_lines: u32,
        ways: u32,
        candidates: u32,
        rp: Box<dyn ReplPolicy>,
        hf: Box<dyn HashFamily>,
    ) -> Self {
        assert!(ways > 1, "a skew array needs at least 2 ways");
        assert!(
            candidates >= ways,
            "fewer candidates ({candidates}) than ways ({ways}) makes no sense"
        );
        assert!(
            num_lines % ways == 0,
            "{num_lines} lines is not a multiple of {ways} ways"
        );
        let num_sets = num_lines / ways;
        assert!(
            num_sets.is_power_of_two(),
            "number of sets must be a power of two, got {num_sets}"
        );
        Self {
            lines: vec![LineEntry::default(); num_lines as usize],
            // Start with the linear mapping; swaps progressively scramble it.
            lookup_array: (0..num_lines).collect(),
            rp,
            hf,
            num_lines,
            num_sets,
            ways,
            cands: candidates,
            set_mask: (num_sets - 1) as u64,
            swap_array: Vec::with_capacity((candidates / ways + 2) as usize),
            last_cand_idx: 0,
            stats: ArrayStats::default(),
        }
    }

    fn position(&self, way: u32, line_addr: Address) -> u32 {
        way * self.num_sets + (self.hf.hash(way, line_addr) & self.set_mask) as u32
    }

    /// Index of the winning candidate in the last `preinsert` walk; timing
    /// code uses it to schedule array accesses. Valid until the next
    /// `preinsert`.
    pub fn last_cand_idx(&self) -> u32 {
        self.last_cand_idx
    }

    /// Length of the pending relocation chain (number of slot moves + 1).
    pub fn swap_chain_len(&self) -> usize {
        self.swap_array.len()
    }

    /// The physical-position → line-id map. Always a permutation of
    /// `0..num_lines`.
    pub fn position_map(&self) -> &[u32] {
        &self.lookup_array
    }

    pub fn entry(&self, line_id: u32) -> &LineEntry {
        &self.lines[line_id as usize]
    }
}

impl CacheArray for ZArray {
    fn lookup(
        &mut self,
        line_addr: Address,
        req: Option<&MemReq>,
        update_replacement: bool,
    ) -> Lookup {
        // Line 0 is the empty-slot marker; a request for it would fake-hit
        // every invalid slot, so it can only come from a corrupt upstream.
        if line_addr == 0 {
            panic!("lookup called with line address 0; upstream request is corrupt");
        }
        if req.is_some_and(MemReq::is_hw_prefetch) {
            self.stats.pref_accesses += 1;
        }
        for w in 0..self.ways {
            let pos = self.position(w, line_addr);
            let id = self.lookup_array[pos as usize];
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
        let cands = self.cands as usize;
        let ways = self.ways as usize;
        let mut candidates: Vec<ZWalkInfo> = Vec::with_capacity(cands + ways);
        let mut all_valid = true;

        // Seeds: the incoming line's own positions, one per way.
        for w in 0..self.ways {
            let pos = self.position(w, line_addr);
            let line_id = self.lookup_array[pos as usize];
            candidates.push(ZWalkInfo {
                pos,
                line_id,
                parent_idx: -1,
            });
            all_valid &= self.lines[line_id as usize].addr != 0;
        }

        // Expand the fringe breadth-first. An invalid slot anywhere in the
        // tree is always the best victim, so stop growing once one shows up.
        let mut fringe_start = 0usize;
        while candidates.len() < cands && all_valid {
            let fringe_id = candidates[fringe_start].line_id;
            let fringe_addr = self.lines[fringe_id as usize].addr;
            debug_assert_ne!(fringe_addr, 0);
            for w in 0..self.ways {
                let pos = self.position(w, fringe_addr);
                let line_id = self.lookup_array[pos as usize];
                // A child that maps back to its own parent slot is a
                // self-loop, not a new reachable slot.
                if line_id != fringe_id {
                    candidates.push(ZWalkInfo {
                        pos,
                        line_id,
                        parent_idx: fringe_start as i32,
                    });
                    all_valid &= self.lines[line_id as usize].addr != 0;
                }
            }
            fringe_start += 1;
        }

        debug_assert!(!all_valid || candidates.len() >= cands);
        candidates.truncate(cands);

        let victim = self
            .rp
            .rank(req, &mut candidates.iter().map(|c| c.line_id));
        debug_assert!(victim < self.num_lines);

        // The chain must start from the *minimum* index holding the winning
        // line id, in case the walk looped back onto it.
        let min_idx = candidates
            .iter()
            .position(|c| c.line_id == victim)
            .expect("ranked line id not among candidates");
        self.last_cand_idx = min_idx as u32;

        self.swap_array.clear();
        let mut idx = min_idx as i32;
        let mut steps = 0usize;
        while idx >= 0 {
            self.swap_array.push(candidates[idx as usize].pos);
            idx = candidates[idx as usize].parent_idx;
            steps += 1;
            if steps > cands + ways {
                panic!("replacement chain did not terminate at a seed");
            }
        }

        Eviction {
            line_id: victim,
            wb_addr: self.lines[victim as usize].addr,
        }
    }

    fn postinsert(&mut self, line_addr: Address, req: &MemReq, line_id: u32, resp_cycle: Cycle) {
        // Apply the relocation chain to the position map; data slots stay
        // where they are.
        let chain = &self.swap_array;
        assert_eq!(
            self.lookup_array[chain[0] as usize], line_id,
            "relocation chain is stale; preinsert/postinsert got out of sync"
        );
        for i in 0..chain.len() - 1 {
            self.lookup_array[chain[i] as usize] = self.lookup_array[chain[i + 1] as usize];
        }
        // The chain was recorded walking from the victim back to a seed, so
        // the new line lands at the seed end.
        self.lookup_array[chain[chain.len() - 1] as usize] = line_id;
        self.stats.swaps += (chain.len() - 1) as u64;

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
