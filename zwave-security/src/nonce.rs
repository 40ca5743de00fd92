//! Nonce manager
//!
//! Two expiring pools:
//! - the *internal* table holds nonces this node generated and handed to a
//!   peer; an inbound secured frame names the one it used by its first byte
//!   (the receiver nonce tag), so first bytes of live entries are unique and
//!   never zero;
//! - the *external* slot holds the single unconsumed nonce received from a
//!   peer. Taking it invalidates it.
//!
//! Time is measured in ticks of the periodic ticker; callers pass the current
//! tick so the manager itself holds no clock.

use crate::constants::{
    EXTERNAL_NONCE_LIFE, INTERNAL_NONCE_LIFE, INTERNAL_NONCE_SLOTS, NONCE_SIZE,
};
use crate::prng::Prng;
use std::fmt;
use zeroize::Zeroize;
use zwave_core::{NodeId, ZwError, ZwResult};

/// Redraws allowed when a generated nonce has a zero or colliding tag
const MAX_DRAWS: usize = 64;

/// Nonce bytes
pub type Nonce = [u8; NONCE_SIZE];

/// Lifecycle of an internal nonce slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceState {
    /// Slot free
    Invalid,
    /// Generated, the report carrying it is still being transmitted
    Init,
    /// Delivered to the peer
    Valid,
}

/// Locally generated nonce
#[derive(Clone)]
pub struct InternalNonce {
    state: NonceState,
    owner: Option<NodeId>,
    expiry: u64,
    bytes: Nonce,
}

impl InternalNonce {
    const EMPTY: Self = Self {
        state: NonceState::Invalid,
        owner: None,
        expiry: 0,
        bytes: [0u8; NONCE_SIZE],
    };

    pub fn state(&self) -> NonceState {
        self.state
    }

    /// Node the nonce was handed to
    pub fn owner(&self) -> Option<NodeId> {
        self.owner
    }

    /// Tick at which the nonce stops being accepted
    pub fn expiry(&self) -> u64 {
        self.expiry
    }

    pub fn bytes(&self) -> &Nonce {
        &self.bytes
    }

    /// Receiver nonce tag (first byte)
    pub fn tag(&self) -> u8 {
        self.bytes[0]
    }

    fn in_use(&self) -> bool {
        self.state != NonceState::Invalid
    }

    fn is_expired(&self, now: u64) -> bool {
        now >= self.expiry
    }

    fn invalidate(&mut self) {
        self.bytes.zeroize();
        *self = Self::EMPTY;
    }
}

impl fmt::Debug for InternalNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalNonce")
            .field("state", &self.state)
            .field("owner", &self.owner)
            .field("expiry", &self.expiry)
            .field("tag", &format_args!("0x{:02X}", self.bytes[0]))
            .finish()
    }
}

/// Nonce received from a peer
#[derive(Clone)]
struct ExternalNonce {
    owner: NodeId,
    expiry: u64,
    bytes: Nonce,
}

/// Owner of the internal nonce table and the external nonce slot
pub struct NonceManager {
    internal: Vec<InternalNonce>,
    external: Option<ExternalNonce>,
    internal_life: u64,
    external_life: u64,
}

impl NonceManager {
    /// Create a manager with the default geometry (38 slots, 15/5 ticks)
    pub fn new() -> Self {
        Self::with_config(INTERNAL_NONCE_SLOTS, INTERNAL_NONCE_LIFE, EXTERNAL_NONCE_LIFE)
    }

    /// Create a manager
    ///
    /// # Arguments
    /// * `capacity` - Internal table slots
    /// * `internal_life` - Lifetime of generated nonces, in ticks
    /// * `external_life` - Lifetime of received nonces, in ticks
    pub fn with_config(capacity: usize, internal_life: u64, external_life: u64) -> Self {
        Self {
            internal: vec![InternalNonce::EMPTY; capacity],
            external: None,
            internal_life,
            external_life,
        }
    }

    /// Generate a nonce for `owner` and store it
    ///
    /// # Returns
    /// Index of the slot holding the new nonce
    ///
    /// # Errors
    /// - `InvalidData` if `state` is [`NonceState::Invalid`]
    /// - `Memory` if the table is full or no unique tag could be drawn
    pub fn gen_internal(
        &mut self,
        prng: &mut Prng,
        owner: NodeId,
        state: NonceState,
        now: u64,
    ) -> ZwResult<usize> {
        if state == NonceState::Invalid {
            return Err(ZwError::InvalidData(
                "Cannot generate a nonce in the Invalid state".to_string(),
            ));
        }

        let slot = self
            .internal
            .iter()
            .position(|n| !n.in_use() || n.is_expired(now))
            .ok_or(ZwError::Memory("internal nonce table full"))?;
        self.internal[slot].invalidate();

        for _ in 0..MAX_DRAWS {
            let mut bytes = prng.nonce();
            let tag = bytes[0];
            if tag == 0 || self.internal.iter().any(|n| n.in_use() && n.tag() == tag) {
                bytes.zeroize();
                continue;
            }
            self.internal[slot] = InternalNonce {
                state,
                owner: Some(owner),
                expiry: now + self.internal_life,
                bytes,
            };
            log::trace!("Generated nonce 0x{:02X} for node {} in slot {}", tag, owner, slot);
            return Ok(slot);
        }
        Err(ZwError::Memory("no unique nonce tag available"))
    }

    /// Slot contents by index
    pub fn internal(&self, slot: usize) -> Option<&InternalNonce> {
        self.internal.get(slot).filter(|n| n.in_use())
    }

    /// Look up the nonce a receiver tag refers to
    ///
    /// # Returns
    /// Slot index and nonce; the nonce stays in the table
    ///
    /// # Errors
    /// - `NonceNotFound` if no slot carries the tag
    /// - `Expired` if the nonce aged out
    pub fn get_internal(&self, tag: u8, now: u64) -> ZwResult<(usize, &InternalNonce)> {
        let (slot, nonce) = self
            .internal
            .iter()
            .enumerate()
            .find(|(_, n)| n.in_use() && n.tag() == tag)
            .ok_or(ZwError::NonceNotFound)?;
        if nonce.is_expired(now) {
            return Err(ZwError::Expired);
        }
        Ok((slot, nonce))
    }

    /// Consume a nonce after it authenticated a frame
    pub fn consume_internal(&mut self, slot: usize) {
        if let Some(nonce) = self.internal.get_mut(slot) {
            nonce.invalidate();
        }
    }

    /// Change the state of an occupied slot
    ///
    /// Returns `false` if the slot is free.
    pub fn set_internal_state(&mut self, slot: usize, state: NonceState) -> bool {
        match self.internal.get_mut(slot) {
            Some(nonce) if nonce.in_use() => {
                if state == NonceState::Invalid {
                    nonce.invalidate();
                } else {
                    nonce.state = state;
                }
                true
            }
            _ => false,
        }
    }

    /// Invalidate every nonce handed to `owner`
    ///
    /// # Returns
    /// Number of slots freed
    pub fn remove_internal(&mut self, owner: NodeId) -> usize {
        let mut removed = 0;
        for nonce in self.internal.iter_mut().filter(|n| n.owner == Some(owner)) {
            nonce.invalidate();
            removed += 1;
        }
        removed
    }

    /// Free every expired internal slot
    pub fn sweep_internal(&mut self, now: u64) -> usize {
        let mut swept = 0;
        for nonce in self
            .internal
            .iter_mut()
            .filter(|n| n.in_use() && n.is_expired(now))
        {
            nonce.invalidate();
            swept += 1;
        }
        swept
    }

    /// Number of occupied, unexpired slots
    pub fn live_internal(&self, now: u64) -> usize {
        self.internal
            .iter()
            .filter(|n| n.in_use() && !n.is_expired(now))
            .count()
    }

    /// Store a nonce received from `owner`
    ///
    /// A repeat of the currently stored, unconsumed nonce is ignored and does
    /// not refresh its expiry.
    ///
    /// # Returns
    /// `true` if the nonce was stored, `false` for a duplicate
    pub fn put_external(&mut self, bytes: Nonce, owner: NodeId, now: u64) -> bool {
        if let Some(current) = &self.external {
            if current.owner == owner && current.bytes == bytes && now < current.expiry {
                return false;
            }
        }
        self.clear_external();
        self.external = Some(ExternalNonce {
            owner,
            expiry: now + self.external_life,
            bytes,
        });
        true
    }

    /// Take the nonce received from `owner`, invalidating it
    ///
    /// # Errors
    /// - `NonceNotFound` if no nonce from `owner` is stored
    /// - `Expired` if it aged out (it is dropped as well)
    pub fn get_external(&mut self, owner: NodeId, now: u64) -> ZwResult<Nonce> {
        match &self.external {
            Some(nonce) if nonce.owner == owner => {
                let expired = now >= nonce.expiry;
                let bytes = nonce.bytes;
                self.clear_external();
                if expired { Err(ZwError::Expired) } else { Ok(bytes) }
            }
            _ => Err(ZwError::NonceNotFound),
        }
    }

    /// Whether an unconsumed, unexpired nonce from `owner` is stored
    pub fn has_external(&self, owner: NodeId, now: u64) -> bool {
        matches!(&self.external, Some(n) if n.owner == owner && now < n.expiry)
    }

    /// Drop any nonce held from `owner`
    ///
    /// Returns `true` if a nonce was dropped.
    pub fn discard_external(&mut self, owner: NodeId) -> bool {
        match &self.external {
            Some(nonce) if nonce.owner == owner => {
                self.clear_external();
                true
            }
            _ => false,
        }
    }

    /// Drop the external nonce if it has expired
    ///
    /// Returns `true` if a nonce was dropped.
    pub fn expire_external(&mut self, now: u64) -> bool {
        match &self.external {
            Some(nonce) if now >= nonce.expiry => {
                self.clear_external();
                true
            }
            _ => false,
        }
    }

    fn clear_external(&mut self) {
        if let Some(mut nonce) = self.external.take() {
            nonce.bytes.zeroize();
        }
    }
}

impl Default for NonceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NonceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NonceManager")
            .field("capacity", &self.internal.len())
            .field("occupied", &self.internal.iter().filter(|n| n.in_use()).count())
            .field("external", &self.external.as_ref().map(|n| n.owner))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::RngEntropy;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;

    fn prng() -> Prng {
        Prng::new(Box::new(RngEntropy::new(StdRng::seed_from_u64(99)))).unwrap()
    }

    fn node(id: u8) -> NodeId {
        NodeId::new(id).unwrap()
    }

    #[test]
    fn test_generate_and_lookup() {
        let mut prng = prng();
        let mut nonces = NonceManager::new();
        let slot = nonces
            .gen_internal(&mut prng, node(5), NonceState::Valid, 100)
            .unwrap();
        let tag = nonces.internal(slot).unwrap().tag();
        assert_ne!(tag, 0);

        let (found, nonce) = nonces.get_internal(tag, 100).unwrap();
        assert_eq!(found, slot);
        assert_eq!(nonce.owner(), Some(node(5)));
        assert_eq!(nonce.expiry(), 100 + INTERNAL_NONCE_LIFE);
    }

    #[test]
    fn test_tags_unique_when_table_full() {
        let mut prng = prng();
        let mut nonces = NonceManager::new();
        for i in 0..INTERNAL_NONCE_SLOTS {
            nonces
                .gen_internal(&mut prng, node((i % 200) as u8 + 1), NonceState::Valid, 0)
                .unwrap();
        }
        let tags: HashSet<u8> = (0..INTERNAL_NONCE_SLOTS)
            .map(|i| nonces.internal(i).unwrap().tag())
            .collect();
        assert_eq!(tags.len(), INTERNAL_NONCE_SLOTS);
        assert!(!tags.contains(&0));

        assert_eq!(
            nonces.gen_internal(&mut prng, node(1), NonceState::Valid, 0),
            Err(ZwError::Memory("internal nonce table full"))
        );
    }

    #[test]
    fn test_expired_slot_is_reused() {
        let mut prng = prng();
        let mut nonces = NonceManager::with_config(1, 15, 5);
        nonces.gen_internal(&mut prng, node(1), NonceState::Valid, 0).unwrap();
        assert!(nonces.gen_internal(&mut prng, node(2), NonceState::Valid, 14).is_err());
        let slot = nonces.gen_internal(&mut prng, node(2), NonceState::Valid, 15).unwrap();
        assert_eq!(nonces.internal(slot).unwrap().owner(), Some(node(2)));
    }

    #[test]
    fn test_internal_expiry() {
        let mut prng = prng();
        let mut nonces = NonceManager::new();
        let slot = nonces.gen_internal(&mut prng, node(3), NonceState::Valid, 10).unwrap();
        let tag = nonces.internal(slot).unwrap().tag();
        assert!(nonces.get_internal(tag, 24).is_ok());
        assert_eq!(nonces.get_internal(tag, 25).unwrap_err(), ZwError::Expired);
        assert_eq!(nonces.sweep_internal(25), 1);
        assert_eq!(nonces.get_internal(tag, 25).unwrap_err(), ZwError::NonceNotFound);
    }

    #[test]
    fn test_remove_internal_by_owner() {
        let mut prng = prng();
        let mut nonces = NonceManager::new();
        nonces.gen_internal(&mut prng, node(4), NonceState::Valid, 0).unwrap();
        nonces.gen_internal(&mut prng, node(4), NonceState::Init, 0).unwrap();
        nonces.gen_internal(&mut prng, node(9), NonceState::Valid, 0).unwrap();
        assert_eq!(nonces.remove_internal(node(4)), 2);
        assert_eq!(nonces.live_internal(0), 1);
    }

    #[test]
    fn test_consume_and_state_change() {
        let mut prng = prng();
        let mut nonces = NonceManager::new();
        let slot = nonces.gen_internal(&mut prng, node(4), NonceState::Init, 0).unwrap();
        assert!(nonces.set_internal_state(slot, NonceState::Valid));
        assert_eq!(nonces.internal(slot).unwrap().state(), NonceState::Valid);
        nonces.consume_internal(slot);
        assert!(nonces.internal(slot).is_none());
        assert!(!nonces.set_internal_state(slot, NonceState::Valid));
    }

    #[test]
    fn test_external_single_use() {
        let mut nonces = NonceManager::new();
        let bytes = [1, 2, 3, 4, 5, 6, 7, 8];
        assert!(nonces.put_external(bytes, node(7), 0));
        assert_eq!(nonces.get_external(node(7), 1).unwrap(), bytes);
        assert_eq!(nonces.get_external(node(7), 1), Err(ZwError::NonceNotFound));
    }

    #[test]
    fn test_external_owner_mismatch_keeps_nonce() {
        let mut nonces = NonceManager::new();
        nonces.put_external([9; 8], node(7), 0);
        assert_eq!(nonces.get_external(node(8), 0), Err(ZwError::NonceNotFound));
        assert!(nonces.has_external(node(7), 0));
    }

    #[test]
    fn test_external_expiry() {
        let mut nonces = NonceManager::new();
        nonces.put_external([9; 8], node(7), 10);
        assert!(!nonces.expire_external(14));
        assert!(nonces.expire_external(15));
        assert_eq!(nonces.get_external(node(7), 15), Err(ZwError::NonceNotFound));

        nonces.put_external([9; 8], node(7), 20);
        assert_eq!(nonces.get_external(node(7), 25), Err(ZwError::Expired));
    }

    #[test]
    fn test_external_duplicate_not_restored() {
        let mut nonces = NonceManager::new();
        assert!(nonces.put_external([5; 8], node(2), 0));
        assert!(!nonces.put_external([5; 8], node(2), 3));
        // expiry still counts from the first report
        assert_eq!(nonces.get_external(node(2), 5), Err(ZwError::Expired));

        assert!(nonces.put_external([5; 8], node(2), 6));
        assert!(nonces.put_external([6; 8], node(2), 7));
        assert_eq!(nonces.get_external(node(2), 7).unwrap(), [6; 8]);
    }

    #[test]
    fn test_discard_external_by_owner() {
        let mut nonces = NonceManager::new();
        nonces.put_external([4; 8], node(3), 0);
        assert!(!nonces.discard_external(node(4)));
        assert!(nonces.has_external(node(3), 0));
        assert!(nonces.discard_external(node(3)));
        assert!(!nonces.has_external(node(3), 0));
        assert!(!nonces.discard_external(node(3)));
    }
}
