//! Security layer statistics

use zwave_core::ZwError;

/// Counters kept by a security context
///
/// Query with [`SecurityContext::statistics`](crate::SecurityContext::statistics).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityStatistics {
    /// Secured frames handed to the transport
    pub frames_secured: u64,
    /// Secured frames authenticated and decrypted
    pub frames_decoded: u64,
    /// Frames dropped for a MAC mismatch
    pub auth_failures: u64,
    /// Second frames dropped for a sequence mismatch
    pub sequence_errors: u64,
    /// Frames naming an unknown, foreign or expired nonce
    pub nonce_failures: u64,
    /// Nonce requests answered
    pub nonce_requests_served: u64,
    /// Nonce request and handshake timeouts
    pub timeouts: u64,
    /// Frames the transport refused or failed to deliver
    pub transmit_failures: u64,
    /// Secure sends refused because the queue was full
    pub queue_full: u64,
}

impl SecurityStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset all counters to zero
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn increment_frames_secured(&mut self) {
        self.frames_secured += 1;
    }

    pub fn increment_frames_decoded(&mut self) {
        self.frames_decoded += 1;
    }

    pub fn increment_nonce_requests_served(&mut self) {
        self.nonce_requests_served += 1;
    }

    pub fn increment_timeouts(&mut self) {
        self.timeouts += 1;
    }

    pub fn increment_transmit_failures(&mut self) {
        self.transmit_failures += 1;
    }

    pub fn increment_queue_full(&mut self) {
        self.queue_full += 1;
    }

    /// Count a rejected inbound secured frame under its failure kind
    pub fn record_rejection(&mut self, error: &ZwError) {
        match error {
            ZwError::Auth => self.auth_failures += 1,
            ZwError::SeqNumber => self.sequence_errors += 1,
            ZwError::NonceNotFound | ZwError::Expired => self.nonce_failures += 1,
            _ => {}
        }
    }

    /// Share of inbound secured frames that were rejected, in percent
    pub fn rejection_rate(&self) -> f64 {
        let rejected = self.auth_failures + self.sequence_errors + self.nonce_failures;
        let total = rejected + self.frames_decoded;
        if total == 0 {
            0.0
        } else {
            (rejected as f64 / total as f64) * 100.0
        }
    }
}
