pub mod cc;

pub use cc::{CoherenceController, DirectFill};

use log::trace;

use crate::array::req::{Address, Cycle, MemReq};
use crate::array::set_assoc::{CacheArray, Eviction, Lookup};
use crate::array::stats::ArrayStats;
use crate::array::vcl::VclArray;
use crate::array::zarray::ZArray;
use crate::array::SetAssocArray;

/// The three array organizations behind one dispatch point. The virtual
/// surface is tiny and fixed at construction, so a sealed variant beats a
/// trait object here; the variable-line flow still needs to reach its
/// concrete type.
pub enum ArrayVariant {
    SetAssoc(SetAssocArray),
    Skew(ZArray),
    Vcl(VclArray),
}

impl CacheArray for ArrayVariant {
    fn lookup(
        &mut self,
        line_addr: Address,
        req: Option<&MemReq>,
        update_replacement: bool,
    ) -> Lookup {
        match self {
            ArrayVariant::SetAssoc(a) => a.lookup(line_addr, req, update_replacement),
            ArrayVariant::Skew(a) => a.lookup(line_addr, req, update_replacement),
            ArrayVariant::Vcl(a) => a.lookup(line_addr, req, update_replacement),
        }
    }

    fn preinsert(&mut self, line_addr: Address, req: &MemReq) -> Eviction {
        match self {
            ArrayVariant::SetAssoc(a) => a.preinsert(line_addr, req),
            ArrayVariant::Skew(a) => a.preinsert(line_addr, req),
            ArrayVariant::Vcl(a) => a.preinsert(line_addr, req),
        }
    }

    fn postinsert(&mut self, line_addr: Address, req: &MemReq, line_id: u32, resp_cycle: Cycle) {
        match self {
            ArrayVariant::SetAssoc(a) => a.postinsert(line_addr, req, line_id, resp_cycle),
            ArrayVariant::Skew(a) => a.postinsert(line_addr, req, line_id, resp_cycle),
            ArrayVariant::Vcl(a) => a.postinsert(line_addr, req, line_id, resp_cycle),
        }
    }

    fn stats(&self) -> &ArrayStats {
        match self {
            ArrayVariant::SetAssoc(a) => a.stats(),
            ArrayVariant::Skew(a) => a.stats(),
            ArrayVariant::Vcl(a) => a.stats(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct CacheStats {
    pub accesses: u64,
    pub hits: u64,
    pub misses: u64,
    pub range_misses: u64,
}

/// One cache level: an array, a coherence controller and the access
/// protocol gluing them together. Exclusive access per operation comes from
/// `&mut self`; callers that share a cache across threads wrap it in their
/// own lock for the duration of a full access.
pub struct Cache {
    name: String,
    array: ArrayVariant,
    cc: Box<dyn CoherenceController>,
    acc_lat: u32,
    stats: CacheStats,
}

impl Cache {
    pub fn new(
        name: impl Into<String>,
        array: ArrayVariant,
        cc: Box<dyn CoherenceController>,
        acc_lat: u32,
    ) -> Self {
        Self {
            name: name.into(),
            array,
            cc,
            acc_lat,
            stats: CacheStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn array_stats(&self) -> &ArrayStats {
        self.array.stats()
    }

    pub fn array(&self) -> &ArrayVariant {
        &self.array
    }

    pub fn array_mut(&mut self) -> &mut ArrayVariant {
        &mut self.array
    }

    /// Run one request through the lookup/preinsert/postinsert protocol and
    /// return its response cycle.
    pub fn access(&mut self, req: &MemReq) -> Cycle {
        let mut resp_cycle = req.cycle;
        if self.cc.start_access(req) {
            self.cc.end_access(req);
            return resp_cycle;
        }
        self.stats.accesses += 1;

        let update_replacement = req.updates_replacement();
        let outcome = self.array.lookup(req.line_addr, Some(req), update_replacement);
        match outcome {
            Lookup::Hit {
                line_id,
                avail_cycle,
            } if self.cc.is_valid(line_id) => {
                self.stats.hits += 1;
                resp_cycle = avail_cycle.max(req.cycle + self.acc_lat as Cycle);
                resp_cycle = self.cc.process_access(req, Some(line_id), resp_cycle);
            }
            Lookup::OutOfRange { prev_id } => {
                self.stats.misses += 1;
                self.stats.range_misses += 1;
                trace!(
                    "{}: line {:#x} resident in slot {} but bytes out of range",
                    self.name,
                    req.line_addr,
                    prev_id
                );
                resp_cycle = req.cycle + self.acc_lat as Cycle;
                if self.cc.should_allocate(req) {
                    resp_cycle = self.refill_wide(req, resp_cycle);
                } else {
                    resp_cycle = self.cc.process_access(req, None, resp_cycle);
                }
            }
            _ => {
                self.stats.misses += 1;
                resp_cycle = req.cycle + self.acc_lat as Cycle;
                if self.cc.should_allocate(req) {
                    resp_cycle = self.fill(req, resp_cycle);
                } else {
                    resp_cycle = self.cc.process_access(req, None, resp_cycle);
                }
            }
        }

        self.cc.end_access(req);
        resp_cycle
    }

    /// Allocate on a full miss.
    fn fill(&mut self, req: &MemReq, resp_cycle: Cycle) -> Cycle {
        if matches!(self.array, ArrayVariant::Vcl(_)) {
            return self.fill_vcl(req, resp_cycle, Vec::new());
        }
        let eviction = self.array.preinsert(req.line_addr, req);
        self.cc
            .process_eviction(req, eviction.wb_addr, eviction.line_id, resp_cycle);
        let resp_cycle = self.cc.process_access(req, None, resp_cycle);
        self.array
            .postinsert(req.line_addr, req, eviction.line_id, resp_cycle);
        resp_cycle
    }

    /// Re-fetch a resident-but-narrow line into a buffer way, migrating its
    /// current sub-line entries along.
    fn refill_wide(&mut self, req: &MemReq, resp_cycle: Cycle) -> Cycle {
        let moved = match &mut self.array {
            ArrayVariant::Vcl(array) => array.get_all_entries(req.line_addr, req, true),
            _ => unreachable!("out-of-range miss from a fixed-line array"),
        };
        self.fill_vcl(req, resp_cycle, moved)
    }

    fn fill_vcl(
        &mut self,
        req: &MemReq,
        resp_cycle: Cycle,
        moved: Vec<crate::array::vcl::ReplacementCandidate>,
    ) -> Cycle {
        let ArrayVariant::Vcl(array) = &mut self.array else {
            unreachable!("variable-line fill on a fixed-line array");
        };
        let buffer_victim = array.preinsert_buffer(req.line_addr, req);
        let demotions = array.preinsert_demote(req, buffer_victim.array_idx);
        for target in &demotions {
            self.cc
                .process_eviction(req, target.write_back, target.array_idx, resp_cycle);
        }
        let resp_cycle = self.cc.process_access(req, None, resp_cycle);

        let ArrayVariant::Vcl(array) = &mut self.array else {
            unreachable!();
        };
        array.postinsert_demote(buffer_victim.write_back, req, &demotions, resp_cycle);
        array.postinsert_full(
            req.line_addr,
            req,
            buffer_victim.array_idx,
            &moved,
            resp_cycle,
        );
        resp_cycle
    }
}
