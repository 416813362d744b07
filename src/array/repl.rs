use crate::array::req::MemReq;

/// Replacement policy callbacks. The arrays guarantee that `replaced` and a
/// following `update` bracket every insertion, and that `update` also fires
/// on replacement-updating hits.
pub trait ReplPolicy {
    /// An access touched `line_id`.
    fn update(&mut self, line_id: u32, req: &MemReq);

    /// `line_id` is about to be overwritten; reset its per-line state.
    fn replaced(&mut self, line_id: u32);

    /// Choose the victim among `cands`. The iterator is never empty.
    fn rank(&mut self, req: &MemReq, cands: &mut dyn Iterator<Item = u32>) -> u32;

    /// Variable-line variant: additionally receives the smallest useful way
    /// size in bytes and the number of ways eligible for the new sub-line.
    fn rank_for_size(
        &mut self,
        req: &MemReq,
        cands: &mut dyn Iterator<Item = u32>,
        min_bytes: u8,
        max_way: u32,
    ) -> u32 {
        let _ = (min_bytes, max_way);
        self.rank(req, cands)
    }
}

/// Least-recently-used over a global access stamp. Untouched (empty) lines
/// keep stamp zero and therefore always rank first.
#[derive(Debug)]
pub struct LruPolicy {
    stamp: u64,
    last_used: Vec<u64>,
}

impl LruPolicy {
    pub fn new(num_lines: u32) -> Self {
        Self {
            stamp: 0,
            last_used: vec![0; num_lines as usize],
        }
    }

    fn rank_min(&self, cands: &mut dyn Iterator<Item = u32>) -> u32 {
        let mut best = cands.next().expect("ranked an empty candidate set");
        let mut best_stamp = self.last_used[best as usize];
        for id in cands {
            let stamp = self.last_used[id as usize];
            // Strict comparison keeps the earliest candidate on ties.
            if stamp < best_stamp {
                best = id;
                best_stamp = stamp;
            }
        }
        best
    }
}

impl ReplPolicy for LruPolicy {
    fn update(&mut self, line_id: u32, _req: &MemReq) {
        self.stamp += 1;
        self.last_used[line_id as usize] = self.stamp;
    }

    fn replaced(&mut self, line_id: u32) {
        self.last_used[line_id as usize] = 0;
    }

    fn rank(&mut self, _req: &MemReq, cands: &mut dyn Iterator<Item = u32>) -> u32 {
        self.rank_min(cands)
    }
}

/// LRU that understands heterogeneous way sizes: candidates whose way can
/// hold the incoming sub-line are preferred; if none fits, fall back to
/// plain LRU over the permitted ways so large footprints still land
/// somewhere and get truncated by the array.
#[derive(Debug)]
pub struct VclLruPolicy {
    inner: LruPolicy,
    way_sizes: Vec<u8>,
}

impl VclLruPolicy {
    pub fn new(num_lines: u32, way_sizes: Vec<u8>) -> Self {
        assert!(!way_sizes.is_empty(), "way size list must not be empty");
        Self {
            inner: LruPolicy::new(num_lines),
            way_sizes,
        }
    }

    fn way_of(&self, line_id: u32) -> usize {
        line_id as usize % self.way_sizes.len()
    }
}

impl ReplPolicy for VclLruPolicy {
    fn update(&mut self, line_id: u32, req: &MemReq) {
        self.inner.update(line_id, req);
    }

    fn replaced(&mut self, line_id: u32) {
        self.inner.replaced(line_id);
    }

    fn rank(&mut self, req: &MemReq, cands: &mut dyn Iterator<Item = u32>) -> u32 {
        self.inner.rank(req, cands)
    }

    fn rank_for_size(
        &mut self,
        _req: &MemReq,
        cands: &mut dyn Iterator<Item = u32>,
        min_bytes: u8,
        max_way: u32,
    ) -> u32 {
        let permitted: Vec<u32> = cands
            .filter(|&id| (self.way_of(id) as u32) < max_way)
            .collect();
        assert!(
            !permitted.is_empty(),
            "no eligible way below index {max_way}"
        );
        let any_fits = permitted
            .iter()
            .any(|&id| self.way_sizes[self.way_of(id)] >= min_bytes);
        if any_fits {
            let mut fitting = permitted
                .iter()
                .copied()
                .filter(|&id| self.way_sizes[self.way_of(id)] >= min_bytes);
            self.inner.rank_min(&mut fitting)
        } else {
            self.inner.rank_min(&mut permitted.into_iter())
        }
    }
}
