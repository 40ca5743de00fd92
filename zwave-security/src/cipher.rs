//! AES-128 single-block primitive
//!
//! Every other construction in this crate (PRNG, key derivation, CBC-MAC,
//! OFB) is assembled from these two functions one block at a time. No
//! chaining mode lives here.

use aes::Aes128;
use cipher::generic_array::GenericArray;
use cipher::{BlockDecrypt, BlockEncrypt, KeyInit};

/// AES block and key size in bytes
pub const BLOCK_SIZE: usize = 16;

/// One AES-128 block
pub type Block = [u8; BLOCK_SIZE];

/// Encrypt a single block with an AES-128 key
pub fn encrypt_block(key: &Block, plaintext: &Block) -> Block {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut block = GenericArray::clone_from_slice(plaintext);
    cipher.encrypt_block(&mut block);
    let mut out = [0u8; BLOCK_SIZE];
    out.copy_from_slice(&block);
    out
}

/// Decrypt a single block with an AES-128 key
pub fn decrypt_block(key: &Block, ciphertext: &Block) -> Block {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut block = GenericArray::clone_from_slice(ciphertext);
    cipher.decrypt_block(&mut block);
    let mut out = [0u8; BLOCK_SIZE];
    out.copy_from_slice(&block);
    out
}

/// XOR `other` into `block` in place
pub(crate) fn xor_in_place(block: &mut Block, other: &Block) {
    for (b, o) in block.iter_mut().zip(other.iter()) {
        *b ^= o;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex16(s: &str) -> Block {
        let mut out = [0u8; 16];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).unwrap();
        }
        out
    }

    #[test]
    fn test_fips197_vector() {
        // FIPS-197 appendix C.1
        let key = hex16("000102030405060708090a0b0c0d0e0f");
        let plaintext = hex16("00112233445566778899aabbccddeeff");
        let expected = hex16("69c4e0d86a7b0430d8cdb78070b4c55a");

        assert_eq!(encrypt_block(&key, &plaintext), expected);
        assert_eq!(decrypt_block(&key, &expected), plaintext);
    }

    #[test]
    fn test_xor_in_place() {
        let mut a = [0xFFu8; 16];
        xor_in_place(&mut a, &[0x0Fu8; 16]);
        assert_eq!(a, [0xF0u8; 16]);
    }
}
