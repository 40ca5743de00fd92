//! Security Command Class constants
//!
//! Command identifiers are the second byte of every Security Command Class
//! frame, following the command class byte `0x98`.

use crate::error::{ZwError, ZwResult};

/// Security Command Class identifier (first byte of every security frame)
pub const COMMAND_CLASS_SECURITY: u8 = 0x98;

/// Security scheme bit for Security 0
///
/// In the scheme byte carried by `SCHEME_GET`/`SCHEME_REPORT`/`SCHEME_INHERIT`
/// this bit is *cleared* when Security 0 is offered. The remaining bits are
/// reserved and ignored.
pub const SCHEME_0_BIT: u8 = 0x01;

/// Scheme byte advertising Security 0 support
pub const SCHEMES_SUPPORTED: u8 = 0x00;

/// Security Command Class commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityCommand {
    /// Ask which command classes are supported securely
    CommandsSupportedGet,
    /// List of securely supported command classes
    CommandsSupportedReport,
    /// Controller asks the joining node which schemes it supports
    SchemeGet,
    /// Scheme answer (plain during inclusion, encapsulated for inherit)
    SchemeReport,
    /// Network key delivery, encapsulated under the all-zero key
    NetworkKeySet,
    /// Proof that the joining node installed the network key
    NetworkKeyVerify,
    /// Controller-to-controller scheme inheritance
    SchemeInherit,
    /// Request for a fresh nonce
    NonceGet,
    /// Nonce answer carrying 8 nonce bytes
    NonceReport,
    /// Secured payload
    MessageEncapsulation,
    /// Secured payload that also requests a fresh nonce from the receiver
    MessageEncapsulationNonceGet,
}

impl SecurityCommand {
    /// Wire identifier of the command
    pub const fn id(&self) -> u8 {
        match self {
            SecurityCommand::CommandsSupportedGet => 0x02,
            SecurityCommand::CommandsSupportedReport => 0x03,
            SecurityCommand::SchemeGet => 0x04,
            SecurityCommand::SchemeReport => 0x05,
            SecurityCommand::NetworkKeySet => 0x06,
            SecurityCommand::NetworkKeyVerify => 0x07,
            SecurityCommand::SchemeInherit => 0x08,
            SecurityCommand::NonceGet => 0x40,
            SecurityCommand::NonceReport => 0x80,
            SecurityCommand::MessageEncapsulation => 0x81,
            SecurityCommand::MessageEncapsulationNonceGet => 0xC1,
        }
    }

    /// Decode a command identifier
    pub fn from_id(id: u8) -> ZwResult<Self> {
        match id {
            0x02 => Ok(SecurityCommand::CommandsSupportedGet),
            0x03 => Ok(SecurityCommand::CommandsSupportedReport),
            0x04 => Ok(SecurityCommand::SchemeGet),
            0x05 => Ok(SecurityCommand::SchemeReport),
            0x06 => Ok(SecurityCommand::NetworkKeySet),
            0x07 => Ok(SecurityCommand::NetworkKeyVerify),
            0x08 => Ok(SecurityCommand::SchemeInherit),
            0x40 => Ok(SecurityCommand::NonceGet),
            0x80 => Ok(SecurityCommand::NonceReport),
            0x81 => Ok(SecurityCommand::MessageEncapsulation),
            0xC1 => Ok(SecurityCommand::MessageEncapsulationNonceGet),
            _ => Err(ZwError::InvalidData(format!(
                "Unknown security command: 0x{:02X}",
                id
            ))),
        }
    }

    /// Parse the command of a Security Command Class frame
    ///
    /// # Errors
    /// Returns `TooSmall` for frames shorter than two bytes and
    /// `InvalidData` for frames of another command class.
    pub fn of_frame(frame: &[u8]) -> ZwResult<Self> {
        if frame.len() < 2 {
            return Err(ZwError::TooSmall { len: frame.len(), min: 2 });
        }
        if frame[0] != COMMAND_CLASS_SECURITY {
            return Err(ZwError::InvalidData(format!(
                "Not a security frame: command class 0x{:02X}",
                frame[0]
            )));
        }
        Self::from_id(frame[1])
    }

    /// Whether the command is an encapsulated (secured) payload
    pub fn is_encapsulation(&self) -> bool {
        matches!(
            self,
            SecurityCommand::MessageEncapsulation | SecurityCommand::MessageEncapsulationNonceGet
        )
    }

    /// Two-byte frame header `[0x98, id]`
    pub const fn header(&self) -> [u8; 2] {
        [COMMAND_CLASS_SECURITY, self.id()]
    }
}

/// Whether a scheme byte offers Security 0
pub fn offers_scheme_0(schemes: u8) -> bool {
    schemes & SCHEME_0_BIT == 0
}
