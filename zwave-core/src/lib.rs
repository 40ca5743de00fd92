//! Core types and utilities for the Z-Wave security sublayer
//!
//! This crate provides the error type, node addressing, bounded payload
//! buffers, transmit-completion tokens and the Security Command Class
//! constants shared by every other crate in the workspace.

pub mod bounded;
pub mod command_class;
pub mod error;
pub mod node_id;
pub mod tx;

pub use bounded::{BoundedBuf, FragmentBuf, Opp, MAX_FRAGMENT_DATA, MAX_OPP_LEN};
pub use command_class::{
    offers_scheme_0, SecurityCommand, COMMAND_CLASS_SECURITY, SCHEMES_SUPPORTED, SCHEME_0_BIT,
};
pub use error::{ZwError, ZwResult};
pub use node_id::NodeId;
pub use tx::{TxStatus, TxToken};
