//! Read routing across a master pool and weighted replica pools.
//!
//! Selection is a pure function of the immutable weight list and a fresh
//! random draw, so routing needs no shared cursor and no locking.

/// A replica pool together with its read weight.
#[derive(Debug, Clone)]
pub struct WeightedPool<P> {
    pub pool: P,
    pub weight: u32,
}

impl<P> WeightedPool<P> {
    pub fn new(pool: P, weight: u32) -> Self {
        Self { pool, weight }
    }
}

/// The pools a cache was built with.
///
/// Writes always target `master`. Reads target a weighted-random replica when
/// replica reads are enabled and at least one replica has a positive weight,
/// otherwise the master.
#[derive(Debug, Clone)]
pub struct RouteSet<P> {
    master: P,
    replicas: Vec<WeightedPool<P>>,
    weights: Vec<u32>,
    read_from_replica: bool,
}

impl<P> RouteSet<P> {
    /// Route set with a master pool only.
    pub fn master_only(master: P) -> Self {
        Self {
            master,
            replicas: Vec::new(),
            weights: Vec::new(),
            read_from_replica: false,
        }
    }

    pub fn new(master: P, replicas: Vec<WeightedPool<P>>, read_from_replica: bool) -> Self {
        let weights = replicas.iter().map(|r| r.weight).collect();
        Self {
            master,
            replicas,
            weights,
            read_from_replica,
        }
    }

    /// The master pool.
    pub fn master(&self) -> &P {
        &self.master
    }

    /// Replica pools in configuration order.
    pub fn replicas(&self) -> &[WeightedPool<P>] {
        &self.replicas
    }

    pub fn read_from_replica(&self) -> bool {
        self.read_from_replica
    }

    /// Pool for write operations. Always the master.
    #[inline]
    pub fn write_pool(&self) -> &P {
        &self.master
    }

    /// Pool for a read operation.
    ///
    /// Falls back to the master when replica reads are off, when there are no
    /// replicas, or when no replica has a positive weight.
    pub fn read_pool(&self) -> &P {
        if !self.read_from_replica || self.replicas.is_empty() {
            return &self.master;
        }
        match random_index(&self.weights) {
            Some(index) => &self.replicas[index].pool,
            None => &self.master,
        }
    }
}

/// Draw an index with probability proportional to its weight.
///
/// Returns `None` when `weights` is empty or sums to zero. Zero-weight
/// entries are never selected.
pub fn random_index(weights: &[u32]) -> Option<usize> {
    let total: u64 = weights.iter().map(|&w| u64::from(w)).sum();
    if total == 0 {
        return None;
    }
    let r = fastrand::u64(0..total);
    let mut cumulative = 0u64;
    for (index, &weight) in weights.iter().enumerate() {
        cumulative += u64::from(weight);
        if cumulative > r {
            return Some(index);
        }
    }
    // Unreachable: r < total == final cumulative sum.
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draw(weights: &[u32], times: usize) -> Vec<usize> {
        let mut counts = vec![0usize; weights.len()];
        for _ in 0..times {
            let index = random_index(weights).expect("weights are positive");
            counts[index] += 1;
        }
        counts
    }

    #[test]
    fn test_equal_weights_are_uniform() {
        let counts = draw(&[100, 100, 100], 10_000);
        let ratio_1 = counts[1] as f64 / counts[0] as f64;
        let ratio_2 = counts[2] as f64 / counts[0] as f64;
        assert!((ratio_1 - 1.0).abs() <= 0.2, "ratio {ratio_1} ({counts:?})");
        assert!((ratio_2 - 1.0).abs() <= 0.2, "ratio {ratio_2} ({counts:?})");
    }

    #[test]
    fn test_weights_are_proportional() {
        let counts = draw(&[1, 2, 3], 10_000);
        let ratio_1 = counts[1] as f64 / counts[0] as f64;
        let ratio_2 = counts[2] as f64 / counts[0] as f64;
        assert!((ratio_1 - 2.0).abs() <= 0.2, "ratio {ratio_1} ({counts:?})");
        assert!((ratio_2 - 3.0).abs() <= 0.4, "ratio {ratio_2} ({counts:?})");
    }

    #[test]
    fn test_zero_weights() {
        assert_eq!(random_index(&[]), None);
        assert_eq!(random_index(&[0, 0]), None);
        for _ in 0..1_000 {
            assert_eq!(random_index(&[0, 5, 0]), Some(1));
        }
    }

    #[test]
    fn test_read_pool_without_replicas_is_master() {
        let routes = RouteSet::master_only("master");
        assert_eq!(*routes.read_pool(), "master");
        assert_eq!(*routes.write_pool(), "master");

        let routes = RouteSet::new("master", Vec::new(), true);
        assert_eq!(*routes.read_pool(), "master");
    }

    #[test]
    fn test_read_pool_respects_replica_flag() {
        let replicas = vec![WeightedPool::new("r1", 1), WeightedPool::new("r2", 1)];
        let routes = RouteSet::new("master", replicas.clone(), false);
        for _ in 0..100 {
            assert_eq!(*routes.read_pool(), "master");
        }

        let routes = RouteSet::new("master", replicas, true);
        for _ in 0..100 {
            assert_ne!(*routes.read_pool(), "master");
            assert_eq!(*routes.write_pool(), "master");
        }
    }

    #[test]
    fn test_read_pool_falls_back_when_weights_are_zero() {
        let routes = RouteSet::new("master", vec![WeightedPool::new("r1", 0)], true);
        assert_eq!(*routes.read_pool(), "master");
    }
}
