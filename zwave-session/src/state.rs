//! States of the three security state machines
//!
//! # Transmission
//! ```text
//! Idle -> WaitNonceGetTxStatus -> WaitExternalNonce -> WaitSppTxStatus -> Idle
//!                                         ^                  |
//!                                         +------------------+  (second fragment)
//! ```
//!
//! # Included node
//! ```text
//! Idle -> WaitSchemeGet -> WaitNetworkKey -> WaitSchemeInherit -> Idle
//! ```
//!
//! # Adding node
//! ```text
//! Idle -> [Delayed] -> WaitScheme -> WaitVerify -> WaitInheritReport -> Idle
//! ```
//!
//! Every state may fall back to `Idle` on completion, timeout or failure.

use std::fmt;
use zwave_core::{ZwError, ZwResult};

fn invalid_transition<S: fmt::Debug>(machine: &str, from: S, to: S) -> ZwError {
    ZwError::InvalidState(format!(
        "Invalid {} transition: {:?} -> {:?}",
        machine, from, to
    ))
}

/// Transmission state machine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxState {
    /// Nothing in flight
    #[default]
    Idle,
    /// Nonce request handed to the transport
    WaitNonceGetTxStatus,
    /// Nonce request delivered, waiting for the nonce report
    WaitExternalNonce,
    /// Secured frame handed to the transport
    WaitSppTxStatus,
}

impl TxState {
    pub fn is_idle(&self) -> bool {
        matches!(self, TxState::Idle)
    }

    /// Validate a state transition
    ///
    /// # Errors
    /// Returns `InvalidState` for a transition the machine never makes.
    pub fn validate_transition(&self, new_state: TxState) -> ZwResult<()> {
        use TxState::*;
        let valid = matches!(
            (*self, new_state),
            (_, Idle)
                | (Idle, WaitNonceGetTxStatus)
                | (WaitNonceGetTxStatus, WaitExternalNonce)
                // nonce report overtook the transmit status
                | (WaitNonceGetTxStatus, WaitSppTxStatus)
                | (WaitExternalNonce, WaitSppTxStatus)
                | (WaitSppTxStatus, WaitExternalNonce)
                | (WaitSppTxStatus, WaitSppTxStatus)
        );
        if valid {
            Ok(())
        } else {
            Err(invalid_transition("tx", *self, new_state))
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxState::Idle => "Idle",
            TxState::WaitNonceGetTxStatus => "WaitNonceGetTxStatus",
            TxState::WaitExternalNonce => "WaitExternalNonce",
            TxState::WaitSppTxStatus => "WaitSppTxStatus",
        }
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Included-node state machine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IncludedState {
    #[default]
    Idle,
    /// Unsecured inclusion done, waiting for the controller's scheme get
    WaitSchemeGet,
    /// Scheme reported, waiting for the network key
    WaitNetworkKey,
    /// Key verified, waiting for scheme inheritance (controllers only)
    WaitSchemeInherit,
}

impl IncludedState {
    pub fn is_idle(&self) -> bool {
        matches!(self, IncludedState::Idle)
    }

    /// Whether inbound frames are authenticated under the bootstrap key
    pub fn uses_bootstrap_key(&self) -> bool {
        matches!(
            self,
            IncludedState::WaitSchemeGet | IncludedState::WaitNetworkKey
        )
    }

    /// Validate a state transition
    ///
    /// # Errors
    /// Returns `InvalidState` for a transition the machine never makes.
    pub fn validate_transition(&self, new_state: IncludedState) -> ZwResult<()> {
        use IncludedState::*;
        let valid = matches!(
            (*self, new_state),
            (_, Idle)
                | (Idle, WaitSchemeGet)
                | (WaitSchemeGet, WaitNetworkKey)
                | (WaitNetworkKey, WaitSchemeInherit)
        );
        if valid {
            Ok(())
        } else {
            Err(invalid_transition("included-node", *self, new_state))
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IncludedState::Idle => "Idle",
            IncludedState::WaitSchemeGet => "WaitSchemeGet",
            IncludedState::WaitNetworkKey => "WaitNetworkKey",
            IncludedState::WaitSchemeInherit => "WaitSchemeInherit",
        }
    }
}

impl fmt::Display for IncludedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Adding-node state machine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddingState {
    #[default]
    Idle,
    /// Start requested with an initial delay
    Delayed,
    /// Scheme get sent, waiting for the joining node's scheme report
    WaitScheme,
    /// Network key sent, waiting for its verification
    WaitVerify,
    /// Scheme inheritance sent, waiting for the report (controllers only)
    WaitInheritReport,
}

impl AddingState {
    pub fn is_idle(&self) -> bool {
        matches!(self, AddingState::Idle)
    }

    /// Validate a state transition
    ///
    /// # Errors
    /// Returns `InvalidState` for a transition the machine never makes.
    pub fn validate_transition(&self, new_state: AddingState) -> ZwResult<()> {
        use AddingState::*;
        let valid = matches!(
            (*self, new_state),
            (_, Idle)
                | (Idle, Delayed)
                | (Idle, WaitScheme)
                | (Delayed, WaitScheme)
                | (WaitScheme, WaitVerify)
                | (WaitVerify, WaitInheritReport)
        );
        if valid {
            Ok(())
        } else {
            Err(invalid_transition("adding-node", *self, new_state))
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AddingState::Idle => "Idle",
            AddingState::Delayed => "Delayed",
            AddingState::WaitScheme => "WaitScheme",
            AddingState::WaitVerify => "WaitVerify",
            AddingState::WaitInheritReport => "WaitInheritReport",
        }
    }
}

impl fmt::Display for AddingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_transitions() {
        assert!(TxState::Idle
            .validate_transition(TxState::WaitNonceGetTxStatus)
            .is_ok());
        assert!(TxState::WaitSppTxStatus
            .validate_transition(TxState::WaitExternalNonce)
            .is_ok());
        assert!(TxState::WaitExternalNonce.validate_transition(TxState::Idle).is_ok());
        assert!(matches!(
            TxState::Idle.validate_transition(TxState::WaitSppTxStatus),
            Err(ZwError::InvalidState(_))
        ));
    }

    #[test]
    fn test_included_transitions() {
        let state = IncludedState::default();
        assert!(state.is_idle());
        assert!(state.validate_transition(IncludedState::WaitSchemeGet).is_ok());
        assert!(state
            .validate_transition(IncludedState::WaitNetworkKey)
            .is_err());
        assert!(IncludedState::WaitNetworkKey.uses_bootstrap_key());
        assert!(!IncludedState::WaitSchemeInherit.uses_bootstrap_key());
    }

    #[test]
    fn test_adding_transitions() {
        assert!(AddingState::Idle.validate_transition(AddingState::Delayed).is_ok());
        assert!(AddingState::Delayed
            .validate_transition(AddingState::WaitScheme)
            .is_ok());
        assert!(AddingState::WaitScheme
            .validate_transition(AddingState::WaitInheritReport)
            .is_err());
        assert_eq!(AddingState::WaitVerify.to_string(), "WaitVerify");
    }
}
