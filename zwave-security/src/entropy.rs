//! Hardware/OS entropy sources used to seed the PRNG

use crate::constants::ENTROPY_SIZE;
use rand::RngCore;
use ring::rand::{SecureRandom, SystemRandom};
use zwave_core::{ZwError, ZwResult};

/// Source of seed material for [`Prng`](crate::prng::Prng)
#[cfg_attr(test, mockall::automock)]
pub trait EntropySource: Send {
    /// Fill `buf` with fresh entropy
    ///
    /// # Errors
    /// Returns `ZwError::Entropy` if the source cannot deliver.
    fn fill(&mut self, buf: &mut [u8; ENTROPY_SIZE]) -> ZwResult<()>;
}

/// Operating-system entropy through `ring`'s `SystemRandom`
pub struct SystemEntropy {
    rng: SystemRandom,
}

impl SystemEntropy {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }
}

impl Default for SystemEntropy {
    fn default() -> Self {
        Self::new()
    }
}

impl EntropySource for SystemEntropy {
    fn fill(&mut self, buf: &mut [u8; ENTROPY_SIZE]) -> ZwResult<()> {
        self.rng
            .fill(buf)
            .map_err(|_| ZwError::Entropy("system random source unavailable".to_string()))
    }
}

/// Entropy drawn from any `rand` generator
///
/// Lets tests and simulations run with a seeded generator.
pub struct RngEntropy<R: RngCore + Send> {
    rng: R,
}

impl<R: RngCore + Send> RngEntropy<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: RngCore + Send> EntropySource for RngEntropy<R> {
    fn fill(&mut self, buf: &mut [u8; ENTROPY_SIZE]) -> ZwResult<()> {
        self.rng
            .try_fill_bytes(buf)
            .map_err(|e| ZwError::Entropy(e.to_string()))
    }
}
