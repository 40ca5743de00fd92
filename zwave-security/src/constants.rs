//! Security 0 constants
//!
//! Masking constants, nonce sizes and frame geometry. These values are fixed
//! by the protocol and must not be changed.

/// Nonce length in bytes
pub const NONCE_SIZE: usize = 8;

/// MAC length in bytes
pub const MAC_SIZE: usize = 8;

/// Network key length in bytes
pub const KEY_SIZE: usize = 16;

/// Plaintext block used to derive the authentication key
pub const AUTH_KEY_CONSTANT: [u8; 16] = [0x55; 16];

/// Plaintext block used to derive the encryption key
pub const ENC_KEY_CONSTANT: [u8; 16] = [0xAA; 16];

/// PRNG output masking block
pub const PRNG_OUTPUT_CONSTANT: [u8; 16] = [0x5C; 16];

/// PRNG state update masking block
pub const PRNG_STATE_CONSTANT: [u8; 16] = [0x36; 16];

/// Initial chaining value of the reseed compression function
pub const PRNG_RESEED_H0: [u8; 16] = [0xA5; 16];

/// Bytes of hardware entropy drawn per reseed
pub const ENTROPY_SIZE: usize = 32;

/// Sequence flag: message is split across two frames
pub const SEQ_SEQUENCED: u8 = 0x10;

/// Sequence flag: this is the second frame of a split message
pub const SEQ_SECOND_FRAME: u8 = 0x20;

/// Sequence flag: 4-bit sequence counter
pub const SEQ_COUNTER_MASK: u8 = 0x0F;

/// Offset of the sender nonce inside a secured frame
pub const SPP_SENDER_NONCE_OFFSET: usize = 2;

/// Offset of the ciphertext inside a secured frame
pub const SPP_CIPHERTEXT_OFFSET: usize = SPP_SENDER_NONCE_OFFSET + NONCE_SIZE;

/// Fixed bytes of a secured frame around the ciphertext:
/// class + header + sender nonce + receiver nonce tag + MAC
pub const SPP_OVERHEAD: usize = 2 + NONCE_SIZE + 1 + MAC_SIZE;

/// Default lifetime of a locally generated nonce, in ticks
pub const INTERNAL_NONCE_LIFE: u64 = 15;

/// Default lifetime of a nonce received from a peer, in ticks
pub const EXTERNAL_NONCE_LIFE: u64 = 5;

/// Default capacity of the internal nonce table
pub const INTERNAL_NONCE_SLOTS: usize = 38;
