//! Security 0 layer for Z-Wave
//!
//! This crate provides the cryptographic half of the security sublayer:
//! - AES-128 block primitive
//! - PRNG seeded from an entropy source
//! - Network key handling and subkey derivation
//! - Internal and external nonce tables
//! - Secured frame encoding, authentication and fragmentation

pub mod cipher;
pub mod constants;
pub mod entropy;
pub mod frame;
pub mod keys;
pub mod nonce;
pub mod prng;

pub use cipher::{decrypt_block, encrypt_block, Block, BLOCK_SIZE};
pub use entropy::{EntropySource, RngEntropy, SystemEntropy};
pub use frame::{
    compute_mac, encode_spp, ofb_apply, split_opp, Depacketed, Fragment, FragmentPlan, Framer,
    Mac, Reassembler, SecurityHeader, SequenceFlag, SppView, MAX_SPP_LEN, MIN_SPP_LEN,
};
pub use keys::{DerivedKeySet, KeySlot, KeyStore, NetworkKey};
pub use nonce::{InternalNonce, Nonce, NonceManager, NonceState};
pub use prng::{Prng, UnseededPrng};
