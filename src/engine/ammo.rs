use crate::engine::mt::{draw_below, Mt19937};
use anyhow::{bail, Result};
use rand::RngCore;

/// Fixed, non-empty pool of request targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ammunition {
    targets: Vec<String>,
}

impl Ammunition {
    pub fn new(targets: Vec<String>) -> Result<Self> {
        if targets.is_empty() {
            bail!("ammunition pool must contain at least one target");
        }
        Ok(Self { targets })
    }

    pub fn size(&self) -> usize {
        self.targets.len()
    }

    /// Panics when `index` is out of range; [`Sequencer`] only produces in-range indices.
    pub fn target(&self, index: usize) -> &str {
        &self.targets[index]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmmoPick {
    pub index: usize,
    pub target: String,
}

/// Seeded stream of picks from an [`Ammunition`] pool.
///
/// Each pick draws uniformly from `[0, random_limit)` and reduces the draw
/// modulo the pool size. The reduction is biased whenever the pool size does
/// not divide `random_limit`; it is kept as is so a seed always selects the
/// same targets.
#[derive(Debug, Clone)]
pub struct Sequencer<R = Mt19937> {
    pool: Ammunition,
    random_limit: u32,
    rng: R,
}

impl Sequencer<Mt19937> {
    pub fn seeded(pool: Ammunition, seed: u64, random_limit: u32) -> Result<Self> {
        Self::with_rng(pool, Mt19937::from_seed_u64(seed), random_limit)
    }
}

impl<R: RngCore> Sequencer<R> {
    pub fn with_rng(pool: Ammunition, rng: R, random_limit: u32) -> Result<Self> {
        if random_limit == 0 {
            bail!("random limit must be at least 1");
        }
        Ok(Self {
            pool,
            random_limit,
            rng,
        })
    }

    pub fn next_index(&mut self) -> usize {
        draw_below(&mut self.rng, self.random_limit) as usize % self.pool.size()
    }

    pub fn pick(&mut self) -> AmmoPick {
        let index = self.next_index();
        AmmoPick {
            index,
            target: self.pool.target(index).to_string(),
        }
    }
}

/// Endless; bound it with `take`.
impl<R: RngCore> Iterator for Sequencer<R> {
    type Item = AmmoPick;

    fn next(&mut self) -> Option<AmmoPick> {
        Some(self.pick())
    }
}
