//! Region-affinity routing.
//!
//! The router tracks, for every worker, how many bytes of region data it is
//! believed to hold, plus two recency lists: one per region (the workers
//! holding it) and one global.  Both lists keep the most recently used
//! worker at the front.

use std::collections::BTreeMap;

/// Where a job goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Route {
    pub worker: usize,
    /// The worker must be recreated before running the job: taking on the
    /// region would exceed its budget.
    pub reset: bool,
}

#[derive(Clone, Debug)]
pub struct Router {
    budget: u64,
    max_per_region: usize,
    sizes: Vec<u64>,
    by_region: BTreeMap<String, Vec<usize>>,
    recent: Vec<usize>,
}

impl Router {
    /// A router over `num_workers` workers (at least one), each allowed
    /// `budget` bytes of region data.
    pub fn new(num_workers: usize, budget: u64) -> Self {
        let num_workers = num_workers.max(1);
        Self {
            budget,
            max_per_region: num_workers.div_ceil(2),
            sizes: vec![0; num_workers],
            by_region: BTreeMap::new(),
            recent: Vec::with_capacity(num_workers),
        }
    }

    #[inline] pub fn num_workers(&self) -> usize { self.sizes.len() }

    #[inline] pub fn max_per_region(&self) -> usize { self.max_per_region }

    #[inline] pub fn budget(&self) -> u64 { self.budget }

    /// Tracked bytes per worker.
    #[inline] pub fn sizes(&self) -> &[u64] { &self.sizes }

    /// Workers holding `region`, most recently used first.
    pub fn holders(&self, region: &str) -> &[usize] {
        self.by_region.get(region).map_or(&[], |workers| workers.as_slice())
    }

    /// Workers in global recency order, most recently used first.  Workers
    /// never used are absent.
    #[inline] pub fn recent(&self) -> &[usize] { &self.recent }

    pub fn regions(&self) -> &BTreeMap<String, Vec<usize>> { &self.by_region }

    /// Pick a worker for a job on `region` whose data takes `size` bytes and
    /// update the tables.  `idle(w)` reports whether worker `w` has nothing
    /// queued.
    pub fn route(&mut self, region: &str, size: u64, idle: impl Fn(usize) -> bool) -> Route {
        let worker = self.select(region, size, &idle);
        let held = self.holders(region).contains(&worker);

        let mut reset = false;
        if !held {
            if self.sizes[worker].saturating_add(size) > self.budget {
                self.reset(worker);
                reset = true;
            }
            self.sizes[worker] = self.sizes[worker].saturating_add(size);
        }

        let holders = self.by_region.entry(region.to_string()).or_default();
        move_to_front(holders, worker);
        move_to_front(&mut self.recent, worker);
        Route { worker, reset }
    }

    fn select(&self, region: &str, size: u64, idle: &impl Fn(usize) -> bool) -> usize {
        let holders = self.holders(region);

        // Warm and free.
        if let Some(&w) = holders.iter().find(|&&w| idle(w)) {
            return w;
        }

        if holders.len() < self.max_per_region {
            let others: Vec<usize> = (0..self.num_workers()).filter(|w| !holders.contains(w)).collect();

            // Best fit, preferring to wait on a busy worker over evicting.
            let best_fit = |candidates: &mut dyn Iterator<Item = usize>| {
                candidates
                    .filter(|&w| self.sizes[w].saturating_add(size) <= self.budget)
                    .min_by_key(|&w| self.budget - self.sizes[w] - size)
            };
            if let Some(w) = best_fit(&mut others.iter().copied().filter(|&w| idle(w)))
                .or_else(|| best_fit(&mut others.iter().copied()))
            {
                return w;
            }

            // Nothing fits: evict the least recently used, never-used first.
            let lru = others.iter().copied().find(|w| !self.recent.contains(w))
                .or_else(|| self.recent.iter().rev().copied().find(|w| others.contains(w)));
            if let Some(w) = lru {
                return w;
            }
        }

        // Region is spread as far as allowed: queue behind the warmest holder.
        holders.first().copied().unwrap_or(0)
    }

    /// Forget everything about `worker`: its size and region associations.
    /// Called whenever the worker is recreated.
    pub fn reset(&mut self, worker: usize) {
        self.sizes[worker] = 0;
        self.by_region.retain(|_, workers| {
            workers.retain(|&w| w != worker);
            !workers.is_empty()
        });
    }
}

fn move_to_front(list: &mut Vec<usize>, worker: usize) {
    list.retain(|&w| w != worker);
    list.insert(0, worker);
}
