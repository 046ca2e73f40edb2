//! Static configuration and the population topology derived from it. This
//! module only holds the numbers the core needs and validates them once at
//! startup; process bootstrap and transport wiring live in the binary.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::transport::Rank;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Config {
    pub safehouse_count: u32,
    pub winemaker_count: u32,
    pub student_count: u32,
    pub min_wine_volume: u64,
    pub max_wine_volume: u64,
}

impl Config {
    /// Fatal-at-startup validation; callers should abort with a nonzero
    /// exit status on error rather than entering the protocol loop.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.safehouse_count >= 1, "safehouse_count must be >= 1");
        anyhow::ensure!(self.winemaker_count >= 1, "winemaker_count must be >= 1");
        anyhow::ensure!(self.student_count >= 1, "student_count must be >= 1");
        anyhow::ensure!(self.min_wine_volume >= 1, "min_wine_volume must be >= 1");
        anyhow::ensure!(
            self.max_wine_volume >= self.min_wine_volume,
            "max_wine_volume ({}) must be >= min_wine_volume ({})",
            self.max_wine_volume,
            self.min_wine_volume
        );
        Ok(())
    }

    pub fn world_size(&self) -> u32 {
        self.winemaker_count + self.student_count
    }

    /// Winemakers occupy `[0, W)`.
    pub fn winemaker_ranks(&self) -> Range<Rank> {
        0..self.winemaker_count
    }

    /// Students occupy `[W, W+S)`.
    pub fn student_ranks(&self) -> Range<Rank> {
        self.winemaker_count..self.world_size()
    }

    /// `home_safehouse = rank mod H`.
    pub fn home_safehouse(&self, winemaker_rank: Rank) -> u32 {
        winemaker_rank % self.safehouse_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            safehouse_count: 2,
            winemaker_count: 3,
            student_count: 2,
            min_wine_volume: 1,
            max_wine_volume: 10,
        }
    }

    #[test]
    fn ranks_partition_the_world() {
        let config = sample();
        assert_eq!(config.winemaker_ranks(), 0..3);
        assert_eq!(config.student_ranks(), 3..5);
        assert_eq!(config.world_size(), 5);
    }

    #[test]
    fn home_safehouse_wraps_by_safehouse_count() {
        let config = sample();
        assert_eq!(config.home_safehouse(0), 0);
        assert_eq!(config.home_safehouse(1), 1);
        assert_eq!(config.home_safehouse(2), 0);
    }

    #[test]
    fn rejects_inverted_volume_bounds() {
        let mut config = sample();
        config.min_wine_volume = 10;
        config.max_wine_volume = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_populations() {
        let mut config = sample();
        config.winemaker_count = 0;
        assert!(config.validate().is_err());
    }
}
