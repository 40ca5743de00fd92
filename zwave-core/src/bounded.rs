//! Fixed-capacity byte buffers
//!
//! Payloads handled by the security sublayer are small and strictly bounded
//! by the radio frame size. `BoundedBuf` keeps them on the stack with the
//! capacity carried in the type, so every write is length-checked.

use crate::error::{ZwError, ZwResult};
use std::fmt;
use std::ops::Deref;

/// Maximum application data carried by one secured frame
pub const MAX_FRAGMENT_DATA: usize = 26;

/// Maximum application payload: two frames' worth of data
pub const MAX_OPP_LEN: usize = 2 * MAX_FRAGMENT_DATA;

/// Byte buffer with a compile-time capacity
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BoundedBuf<const N: usize> {
    data: [u8; N],
    len: usize,
}

/// Original Payload Package: the plaintext command to secure
pub type Opp = BoundedBuf<MAX_OPP_LEN>;

/// Plaintext data of a single secured frame
pub type FragmentBuf = BoundedBuf<MAX_FRAGMENT_DATA>;

impl<const N: usize> BoundedBuf<N> {
    /// Create an empty buffer
    pub const fn new() -> Self {
        Self { data: [0u8; N], len: 0 }
    }

    /// Create a buffer holding a copy of `bytes`
    ///
    /// # Errors
    /// Returns `TooLarge` if `bytes` does not fit.
    pub fn from_slice(bytes: &[u8]) -> ZwResult<Self> {
        let mut buf = Self::new();
        buf.extend_from_slice(bytes)?;
        Ok(buf)
    }

    /// Capacity in bytes
    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Remaining free space in bytes
    pub fn remaining(&self) -> usize {
        N - self.len
    }

    /// Append one byte
    pub fn push(&mut self, byte: u8) -> ZwResult<()> {
        if self.len == N {
            return Err(ZwError::TooLarge { len: N + 1, max: N });
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Append a slice; on overflow nothing is written
    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> ZwResult<()> {
        let new_len = self.len + bytes.len();
        if new_len > N {
            return Err(ZwError::TooLarge { len: new_len, max: N });
        }
        self.data[self.len..new_len].copy_from_slice(bytes);
        self.len = new_len;
        Ok(())
    }

    /// Drop the contents and wipe the backing storage
    pub fn clear(&mut self) {
        self.data = [0u8; N];
        self.len = 0;
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }
}

impl<const N: usize> Default for BoundedBuf<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Deref for BoundedBuf<N> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl<const N: usize> AsRef<[u8]> for BoundedBuf<N> {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl<const N: usize> TryFrom<&[u8]> for BoundedBuf<N> {
    type Error = ZwError;

    fn try_from(bytes: &[u8]) -> ZwResult<Self> {
        Self::from_slice(bytes)
    }
}

impl<const N: usize> fmt::Debug for BoundedBuf<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedBuf")
            .field("capacity", &N)
            .field("data", &self.as_slice())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_until_full() {
        let mut buf = BoundedBuf::<3>::new();
        buf.push(1).unwrap();
        buf.push(2).unwrap();
        buf.push(3).unwrap();
        assert_eq!(buf.push(4), Err(ZwError::TooLarge { len: 4, max: 3 }));
        assert_eq!(buf.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn test_extend_overflow_leaves_buffer_untouched() {
        let mut buf = BoundedBuf::<4>::from_slice(&[9, 9]).unwrap();
        assert!(buf.extend_from_slice(&[1, 2, 3]).is_err());
        assert_eq!(buf.as_slice(), &[9, 9]);
        assert_eq!(buf.remaining(), 2);
    }

    #[test]
    fn test_opp_bounds() {
        assert!(Opp::from_slice(&[0u8; MAX_OPP_LEN]).is_ok());
        assert_eq!(
            Opp::from_slice(&[0u8; MAX_OPP_LEN + 1]),
            Err(ZwError::TooLarge { len: 53, max: 52 })
        );
        assert!(FragmentBuf::from_slice(&[0u8; 27]).is_err());
    }

    #[test]
    fn test_clear() {
        let mut buf = FragmentBuf::from_slice(b"abc").unwrap();
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(&*buf, b"");
    }
}
