//! The wine-volume oracle: random sampling of a bounded positive integer,
//! abstracted behind a trait so the protocol core never depends on `rand`
//! directly; only the one concrete implementation below does.

use rand::{Rng, SeedableRng};

pub trait VolumeOracle: Send {
    /// Returns a value in `[min, max]`.
    fn sample(&mut self) -> u64;
}

/// Uniform sampling over `[min, max]`, backed by any `rand::Rng`.
pub struct UniformVolumeOracle<R> {
    min: u64,
    max: u64,
    rng: R,
}

impl<R: Rng> UniformVolumeOracle<R> {
    pub fn new(min: u64, max: u64, rng: R) -> Self {
        assert!(min >= 1 && max >= min, "invalid volume bounds [{min}, {max}]");
        Self { min, max, rng }
    }
}

impl<R: Rng + Send> VolumeOracle for UniformVolumeOracle<R> {
    fn sample(&mut self) -> u64 {
        self.rng.gen_range(self.min..=self.max)
    }
}

impl UniformVolumeOracle<rand::rngs::StdRng> {
    /// `ThreadRng` is `!Send`, which `tokio::spawn`'s futures (and
    /// `VolumeOracle: Send`) rule out; `StdRng` seeded from the OS entropy
    /// source gives an equivalent, `Send` source of randomness per process.
    pub fn from_bounds(min: u64, max: u64) -> Self {
        Self::new(min, max, rand::rngs::StdRng::from_entropy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_stay_within_bounds() {
        let mut oracle = UniformVolumeOracle::new(3, 3, rand::rngs::StdRng::seed_from_u64(0));
        for _ in 0..50 {
            assert_eq!(oracle.sample(), 3);
        }

        let mut oracle = UniformVolumeOracle::new(1, 10, rand::rngs::StdRng::seed_from_u64(1));
        for _ in 0..200 {
            let v = oracle.sample();
            assert!((1..=10).contains(&v));
        }
    }
}
