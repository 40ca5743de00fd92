//! Secured frame construction and parsing
//!
//! Converts an Original Payload Package (plaintext command) into one or two
//! Secured Payload Packages and back.
//!
//! # Secured Frame Format
//! ```text
//! [0]          0x98 Security Command Class
//! [1]          security header (0x81, or 0xC1 when a second frame follows)
//! [2..10]      sender nonce (8 bytes)
//! [10..10+L]   ciphertext, L = 1 + data length; first byte is the sequence flag
//! [10+L]       receiver nonce tag (first byte of the receiver's nonce)
//! [11+L..19+L] MAC (8 bytes)
//! ```
//!
//! # Sequence Flag
//! Bit 4: split message, bit 5: second frame, bits 0-3: sequence counter.
//!
//! # MAC
//! CBC-MAC with the IV `sender_nonce || receiver_nonce` encrypted as the
//! first block, then the 16-byte blocks of
//! `header || sender id || receiver id || L || ciphertext` (zero padded).
//! The MAC is the first 8 bytes of the final block.
//!
//! # Encryption
//! AES-OFB over the plaintext with the same IV.

use crate::cipher::{encrypt_block, xor_in_place, Block, BLOCK_SIZE};
use crate::constants::{
    MAC_SIZE, NONCE_SIZE, SEQ_COUNTER_MASK, SEQ_SECOND_FRAME, SEQ_SEQUENCED,
    SPP_CIPHERTEXT_OFFSET, SPP_OVERHEAD, SPP_SENDER_NONCE_OFFSET,
};
use crate::keys::DerivedKeySet;
use crate::nonce::{Nonce, NonceManager};
use crate::prng::Prng;
use std::collections::HashMap;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;
use zwave_core::{
    COMMAND_CLASS_SECURITY, FragmentBuf, MAX_FRAGMENT_DATA, NodeId, Opp, SecurityCommand, ZwError,
    ZwResult,
};

/// Largest ciphertext of one frame: sequence flag plus fragment data
pub const MAX_CIPHERTEXT: usize = 1 + MAX_FRAGMENT_DATA;

/// Smallest well-formed secured frame (sequence flag only)
pub const MIN_SPP_LEN: usize = SPP_OVERHEAD + 1;

/// Largest secured frame
pub const MAX_SPP_LEN: usize = SPP_OVERHEAD + MAX_CIPHERTEXT;

/// Message authentication code
pub type Mac = [u8; MAC_SIZE];

/// Security header of a secured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityHeader {
    /// Plain encapsulation
    Encapsulation,
    /// Encapsulation asking the receiver to reply with a fresh nonce
    EncapsulationNonceGet,
}

impl SecurityHeader {
    pub fn id(&self) -> u8 {
        self.command().id()
    }

    pub fn command(&self) -> SecurityCommand {
        match self {
            SecurityHeader::Encapsulation => SecurityCommand::MessageEncapsulation,
            SecurityHeader::EncapsulationNonceGet => SecurityCommand::MessageEncapsulationNonceGet,
        }
    }

    pub fn from_id(id: u8) -> ZwResult<Self> {
        match SecurityCommand::from_id(id)? {
            SecurityCommand::MessageEncapsulation => Ok(SecurityHeader::Encapsulation),
            SecurityCommand::MessageEncapsulationNonceGet => {
                Ok(SecurityHeader::EncapsulationNonceGet)
            }
            other => Err(ZwError::InvalidData(format!(
                "Not a security header: {:?}",
                other
            ))),
        }
    }

    /// Whether the sender expects a nonce in return
    pub fn requests_nonce(&self) -> bool {
        matches!(self, SecurityHeader::EncapsulationNonceGet)
    }
}

/// Sequence flag byte (first plaintext byte of every secured frame)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceFlag(u8);

impl SequenceFlag {
    /// Flag of an unsplit message
    pub const SINGLE: Self = Self(0);

    /// Flag of the first frame of a split message
    pub fn first(counter: u8) -> Self {
        Self(SEQ_SEQUENCED | (counter & SEQ_COUNTER_MASK))
    }

    /// Flag of the second frame of a split message
    pub fn second(counter: u8) -> Self {
        Self(SEQ_SEQUENCED | SEQ_SECOND_FRAME | (counter & SEQ_COUNTER_MASK))
    }

    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    pub fn to_byte(&self) -> u8 {
        self.0
    }

    pub fn is_sequenced(&self) -> bool {
        self.0 & SEQ_SEQUENCED != 0
    }

    pub fn is_second_frame(&self) -> bool {
        self.0 & SEQ_SECOND_FRAME != 0
    }

    pub fn counter(&self) -> u8 {
        self.0 & SEQ_COUNTER_MASK
    }
}

fn iv(sender_nonce: &Nonce, receiver_nonce: &Nonce) -> Block {
    let mut iv = [0u8; BLOCK_SIZE];
    iv[..NONCE_SIZE].copy_from_slice(sender_nonce);
    iv[NONCE_SIZE..].copy_from_slice(receiver_nonce);
    iv
}

/// Compute the MAC of a secured frame
///
/// # Arguments
/// * `auth_key` - Authentication subkey
/// * `sender_nonce` / `receiver_nonce` - The two nonce halves of the IV
/// * `header` - Security header byte
/// * `src` / `dst` - Sender and receiver node ids
/// * `ciphertext` - Encrypted payload (sequence flag included)
pub fn compute_mac(
    auth_key: &Block,
    sender_nonce: &Nonce,
    receiver_nonce: &Nonce,
    header: u8,
    src: NodeId,
    dst: NodeId,
    ciphertext: &[u8],
) -> Mac {
    let mut auth_data = Vec::with_capacity(4 + ciphertext.len());
    auth_data.push(header);
    auth_data.push(src.as_u8());
    auth_data.push(dst.as_u8());
    auth_data.push(ciphertext.len() as u8);
    auth_data.extend_from_slice(ciphertext);

    let mut tag = encrypt_block(auth_key, &iv(sender_nonce, receiver_nonce));
    for chunk in auth_data.chunks(BLOCK_SIZE) {
        let mut block = [0u8; BLOCK_SIZE];
        block[..chunk.len()].copy_from_slice(chunk);
        xor_in_place(&mut tag, &block);
        tag = encrypt_block(auth_key, &tag);
    }

    let mut mac = [0u8; MAC_SIZE];
    mac.copy_from_slice(&tag[..MAC_SIZE]);
    mac
}

/// AES-OFB keystream applied in place (encryption and decryption alike)
pub fn ofb_apply(enc_key: &Block, sender_nonce: &Nonce, receiver_nonce: &Nonce, data: &mut [u8]) {
    let mut stream = iv(sender_nonce, receiver_nonce);
    for chunk in data.chunks_mut(BLOCK_SIZE) {
        stream = encrypt_block(enc_key, &stream);
        for (byte, key) in chunk.iter_mut().zip(stream.iter()) {
            *byte ^= key;
        }
    }
    stream.zeroize();
}

/// Encode one secured frame
///
/// # Arguments
/// * `keys` - Key set securing the frame
/// * `header` - Security header
/// * `sender_nonce` - Fresh nonce drawn by the sender
/// * `receiver_nonce` - Nonce received from the destination
/// * `src` / `dst` - Sender and receiver node ids
/// * `flag` - Sequence flag
/// * `data` - Fragment plaintext
pub fn encode_spp(
    keys: &DerivedKeySet,
    header: SecurityHeader,
    sender_nonce: &Nonce,
    receiver_nonce: &Nonce,
    src: NodeId,
    dst: NodeId,
    flag: SequenceFlag,
    data: &[u8],
) -> ZwResult<Vec<u8>> {
    if data.len() > MAX_FRAGMENT_DATA {
        return Err(ZwError::TooLarge {
            len: data.len(),
            max: MAX_FRAGMENT_DATA,
        });
    }

    let mut ciphertext = Vec::with_capacity(1 + data.len());
    ciphertext.push(flag.to_byte());
    ciphertext.extend_from_slice(data);
    ofb_apply(keys.enc_key(), sender_nonce, receiver_nonce, &mut ciphertext);

    let mac = compute_mac(
        keys.auth_key(),
        sender_nonce,
        receiver_nonce,
        header.id(),
        src,
        dst,
        &ciphertext,
    );

    let mut frame = Vec::with_capacity(SPP_OVERHEAD + ciphertext.len());
    frame.push(COMMAND_CLASS_SECURITY);
    frame.push(header.id());
    frame.extend_from_slice(sender_nonce);
    frame.extend_from_slice(&ciphertext);
    frame.push(receiver_nonce[0]);
    frame.extend_from_slice(&mac);
    Ok(frame)
}

/// Borrowed view of a secured frame's fields
#[derive(Debug, Clone, Copy)]
pub struct SppView<'a> {
    pub header: SecurityHeader,
    pub sender_nonce: &'a [u8; NONCE_SIZE],
    pub ciphertext: &'a [u8],
    pub receiver_tag: u8,
    pub mac: &'a [u8; MAC_SIZE],
}

impl<'a> SppView<'a> {
    /// Split a secured frame into its fields
    ///
    /// # Errors
    /// - `TooSmall` / `TooLarge` for frames outside the valid length range
    /// - `InvalidData` for a wrong command class or header
    pub fn parse(frame: &'a [u8]) -> ZwResult<Self> {
        if frame.len() < MIN_SPP_LEN {
            return Err(ZwError::TooSmall {
                len: frame.len(),
                min: MIN_SPP_LEN,
            });
        }
        if frame.len() > MAX_SPP_LEN {
            return Err(ZwError::TooLarge {
                len: frame.len(),
                max: MAX_SPP_LEN,
            });
        }
        if frame[0] != COMMAND_CLASS_SECURITY {
            return Err(ZwError::InvalidData(format!(
                "Not a security frame: command class 0x{:02X}",
                frame[0]
            )));
        }
        let header = SecurityHeader::from_id(frame[1])?;

        let ct_len = frame.len() - SPP_OVERHEAD;
        let ct_end = SPP_CIPHERTEXT_OFFSET + ct_len;
        let sender_nonce = frame[SPP_SENDER_NONCE_OFFSET..SPP_CIPHERTEXT_OFFSET]
            .try_into()
            .map_err(|_| ZwError::InvalidData("Truncated sender nonce".to_string()))?;
        let mac = frame[ct_end + 1..]
            .try_into()
            .map_err(|_| ZwError::InvalidData("Truncated MAC".to_string()))?;

        Ok(Self {
            header,
            sender_nonce,
            ciphertext: &frame[SPP_CIPHERTEXT_OFFSET..ct_end],
            receiver_tag: frame[ct_end],
            mac,
        })
    }
}

/// One frame's worth of a split plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    pub header: SecurityHeader,
    pub flag: SequenceFlag,
    pub data: FragmentBuf,
}

/// Frames an OPP is sent as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentPlan {
    pub first: Fragment,
    pub second: Option<Fragment>,
}

/// Split an OPP into at most two fragments
///
/// Payloads up to 26 bytes go out as one plain frame. Longer ones are sent as
/// a first frame of 26 bytes with the nonce-get header, followed by the
/// remainder, both tagged with `counter`.
///
/// # Errors
/// Returns `TooSmall` for an empty OPP.
pub fn split_opp(opp: &Opp, counter: u8) -> ZwResult<FragmentPlan> {
    if opp.is_empty() {
        return Err(ZwError::TooSmall { len: 0, min: 1 });
    }
    if opp.len() <= MAX_FRAGMENT_DATA {
        return Ok(FragmentPlan {
            first: Fragment {
                header: SecurityHeader::Encapsulation,
                flag: SequenceFlag::SINGLE,
                data: FragmentBuf::from_slice(opp)?,
            },
            second: None,
        });
    }
    Ok(FragmentPlan {
        first: Fragment {
            header: SecurityHeader::EncapsulationNonceGet,
            flag: SequenceFlag::first(counter),
            data: FragmentBuf::from_slice(&opp[..MAX_FRAGMENT_DATA])?,
        },
        second: Some(Fragment {
            header: SecurityHeader::Encapsulation,
            flag: SequenceFlag::second(counter),
            data: FragmentBuf::from_slice(&opp[MAX_FRAGMENT_DATA..])?,
        }),
    })
}

/// Result of decapsulating a secured frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Depacketed {
    /// A complete OPP
    Complete(Opp),
    /// First half of a split message buffered; waiting for the second
    FragmentPending,
}

#[derive(Debug, Clone)]
struct PendingFragment {
    node: NodeId,
    counter: u8,
    data: FragmentBuf,
}

/// Reassembly of split messages
///
/// One scratch slot: only one split message is in flight towards this node
/// at a time.
#[derive(Debug, Default)]
pub struct Reassembler {
    pending: Option<PendingFragment>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one authenticated fragment
    ///
    /// # Errors
    /// - `SeqNumber` for a second frame without a matching first frame; a
    ///   buffered first frame from the same node is discarded
    /// - `TooSmall` for an unsplit frame without data
    pub fn accept(
        &mut self,
        src: NodeId,
        flag: SequenceFlag,
        data: FragmentBuf,
    ) -> ZwResult<Depacketed> {
        if !flag.is_sequenced() {
            if data.is_empty() {
                return Err(ZwError::TooSmall { len: 0, min: 1 });
            }
            return Ok(Depacketed::Complete(Opp::from_slice(&data)?));
        }

        if !flag.is_second_frame() {
            self.pending = Some(PendingFragment {
                node: src,
                counter: flag.counter(),
                data,
            });
            return Ok(Depacketed::FragmentPending);
        }

        match self.pending.take_if(|p| p.node == src) {
            Some(first) if first.counter == flag.counter() => {
                let mut opp = Opp::from_slice(&first.data)?;
                opp.extend_from_slice(&data)?;
                Ok(Depacketed::Complete(opp))
            }
            Some(first) => {
                log::warn!(
                    "Second frame from node {} has sequence {} but first had {}",
                    src,
                    flag.counter(),
                    first.counter
                );
                Err(ZwError::SeqNumber)
            }
            None => Err(ZwError::SeqNumber),
        }
    }

    /// Whether a first frame from `node` is buffered
    pub fn is_pending(&self, node: NodeId) -> bool {
        matches!(&self.pending, Some(p) if p.node == node)
    }

    /// Drop a buffered first frame
    pub fn reset(&mut self) {
        if let Some(pending) = self.pending.take() {
            log::debug!("Discarded first frame from node {}", pending.node);
        }
    }
}

/// Secured-frame codec with per-node sequencing state
#[derive(Debug, Default)]
pub struct Framer {
    reassembler: Reassembler,
    send_counters: HashMap<NodeId, u8>,
}

impl Framer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next 4-bit send counter for split messages towards `node`
    pub fn next_sequence(&mut self, node: NodeId) -> u8 {
        let counter = self.send_counters.entry(node).or_insert(0);
        let current = *counter;
        *counter = (current + 1) & SEQ_COUNTER_MASK;
        current
    }

    /// Secure one fragment with a fresh sender nonce
    pub fn packet(
        &self,
        keys: &DerivedKeySet,
        prng: &mut Prng,
        fragment: &Fragment,
        receiver_nonce: &Nonce,
        src: NodeId,
        dst: NodeId,
    ) -> ZwResult<Vec<u8>> {
        let mut sender_nonce = prng.nonce();
        let frame = encode_spp(
            keys,
            fragment.header,
            &sender_nonce,
            receiver_nonce,
            src,
            dst,
            fragment.flag,
            &fragment.data,
        );
        sender_nonce.zeroize();
        frame
    }

    /// Authenticate and decrypt a secured frame from `src`
    ///
    /// The internal nonce named by the receiver tag must have been handed to
    /// `src`. Nonce table and sequencing state are only touched after the MAC
    /// verified; a rejected frame leaves both unchanged.
    ///
    /// # Errors
    /// - `NonceNotFound` / `Expired` for an unknown, foreign or stale nonce
    /// - `Auth` for a MAC mismatch
    /// - `SeqNumber` for a mismatched second frame
    /// - length and format errors from [`SppView::parse`]
    pub fn depacket(
        &mut self,
        keys: &DerivedKeySet,
        nonces: &mut NonceManager,
        src: NodeId,
        own: NodeId,
        frame: &[u8],
        now: u64,
    ) -> ZwResult<Depacketed> {
        let spp = SppView::parse(frame)?;

        let (slot, nonce) = nonces.get_internal(spp.receiver_tag, now)?;
        if nonce.owner() != Some(src) {
            return Err(ZwError::NonceNotFound);
        }
        let mut receiver_nonce = *nonce.bytes();

        let mac = compute_mac(
            keys.auth_key(),
            spp.sender_nonce,
            &receiver_nonce,
            spp.header.id(),
            src,
            own,
            spp.ciphertext,
        );
        if !bool::from(mac[..].ct_eq(&spp.mac[..])) {
            receiver_nonce.zeroize();
            return Err(ZwError::Auth);
        }
        nonces.consume_internal(slot);

        let mut plaintext = spp.ciphertext.to_vec();
        ofb_apply(keys.enc_key(), spp.sender_nonce, &receiver_nonce, &mut plaintext);
        receiver_nonce.zeroize();

        let flag = SequenceFlag::from_byte(plaintext[0]);
        let data = FragmentBuf::from_slice(&plaintext[1..]);
        plaintext.zeroize();
        self.reassembler.accept(src, flag, data?)
    }

    pub fn reassembler(&self) -> &Reassembler {
        &self.reassembler
    }

    /// Forget any half-received split message
    pub fn discard_pending(&mut self) {
        self.reassembler.reset();
    }
}
