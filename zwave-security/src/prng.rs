//! AES-based pseudo-random generator
//!
//! The generator keeps a 16-byte inner state used as an AES key. Output and
//! state update encrypt different masking constants under that key, so
//! observed output says nothing about the next state.
//!
//! # Reseed
//! 32 bytes of entropy are split into two keys `K1`, `K2` and compressed
//! Davies-Meyer style:
//! ```text
//! H1 = AES(K1, H0) ^ H0        H0 = 0xA5 * 16
//! H2 = AES(K2, H1) ^ H1
//! state' = AES(state ^ H2, 0x36 * 16)
//! ```
//! Intermediates and the previous state are wiped.

use crate::cipher::{encrypt_block, xor_in_place, Block, BLOCK_SIZE};
use crate::constants::{
    ENTROPY_SIZE, NONCE_SIZE, PRNG_OUTPUT_CONSTANT, PRNG_RESEED_H0, PRNG_STATE_CONSTANT,
};
use crate::entropy::EntropySource;
use std::fmt;
use zeroize::Zeroize;
use zwave_core::{ZwError, ZwResult};

/// AES-based PRNG reseeded from an [`EntropySource`]
pub struct Prng {
    state: Block,
    source: Box<dyn EntropySource>,
}

impl Prng {
    /// Create a generator and seed it once
    ///
    /// # Errors
    /// Propagates the entropy source error.
    pub fn new(source: Box<dyn EntropySource>) -> ZwResult<Self> {
        UnseededPrng::new(source).seed().map_err(|(_, e)| e)
    }

    /// Mix fresh entropy into the inner state
    pub fn reseed(&mut self) -> ZwResult<()> {
        let mut entropy = [0u8; ENTROPY_SIZE];
        self.source.fill(&mut entropy)?;

        let mut k1 = [0u8; BLOCK_SIZE];
        let mut k2 = [0u8; BLOCK_SIZE];
        k1.copy_from_slice(&entropy[..BLOCK_SIZE]);
        k2.copy_from_slice(&entropy[BLOCK_SIZE..]);
        entropy.zeroize();

        let mut h1 = encrypt_block(&k1, &PRNG_RESEED_H0);
        xor_in_place(&mut h1, &PRNG_RESEED_H0);
        let mut h2 = encrypt_block(&k2, &h1);
        xor_in_place(&mut h2, &h1);

        xor_in_place(&mut self.state, &h2);
        let next = encrypt_block(&self.state, &PRNG_STATE_CONSTANT);
        self.state.zeroize();
        self.state = next;

        k1.zeroize();
        k2.zeroize();
        h1.zeroize();
        h2.zeroize();
        Ok(())
    }

    /// Produce up to 16 bytes of output
    ///
    /// The output is the first `out.len()` bytes of
    /// `AES(state, 0x5C * 16)`; the state then advances to
    /// `AES(state, 0x36 * 16)`.
    ///
    /// # Errors
    /// Returns `TooLarge` for requests above one block.
    pub fn generate(&mut self, out: &mut [u8]) -> ZwResult<()> {
        if out.len() > BLOCK_SIZE {
            return Err(ZwError::TooLarge {
                len: out.len(),
                max: BLOCK_SIZE,
            });
        }
        let mut block = encrypt_block(&self.state, &PRNG_OUTPUT_CONSTANT);
        out.copy_from_slice(&block[..out.len()]);
        block.zeroize();

        let next = encrypt_block(&self.state, &PRNG_STATE_CONSTANT);
        self.state.zeroize();
        self.state = next;
        Ok(())
    }

    /// Draw a fresh 8-byte nonce
    pub fn nonce(&mut self) -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        // NONCE_SIZE is below the block size, generate cannot fail here
        let _ = self.generate(&mut nonce);
        nonce
    }
}

/// A generator whose first seed draw has not succeeded yet
///
/// Lets a caller retry the draw on its own schedule without giving up the
/// entropy source.
pub struct UnseededPrng(Prng);

impl UnseededPrng {
    pub fn new(source: Box<dyn EntropySource>) -> Self {
        Self(Prng {
            state: [0u8; BLOCK_SIZE],
            source,
        })
    }

    /// Draw the first seed
    ///
    /// # Errors
    /// Hands the generator back together with the entropy error.
    pub fn seed(mut self) -> Result<Prng, (Self, ZwError)> {
        match self.0.reseed() {
            Ok(()) => Ok(self.0),
            Err(e) => Err((self, e)),
        }
    }
}

impl fmt::Debug for UnseededPrng {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnseededPrng").finish_non_exhaustive()
    }
}

impl Drop for Prng {
    fn drop(&mut self) {
        self.state.zeroize();
    }
}

impl fmt::Debug for Prng {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prng").finish_non_exhaustive()
    }
}
