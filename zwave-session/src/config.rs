//! Security context configuration
//!
//! # Usage Example
//!
//! ```rust
//! use zwave_session::SecurityConfig;
//!
//! let config = SecurityConfig::builder()
//!     .node_id(5)
//!     .controller(false)
//!     .secure_command_classes(vec![0x25, 0x62])
//!     .build()
//!     .unwrap();
//! assert_eq!(config.node_id, 5);
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use zwave_core::{NodeId, ZwError, ZwResult};

/// Configuration of a [`SecurityContext`](crate::SecurityContext)
///
/// Tick-based values are counted in ticks of `tick_period_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Own node id
    pub node_id: u8,
    /// Whether this node is a controller (takes part in scheme inheritance)
    pub is_controller: bool,
    /// Time to wait for a nonce report after a nonce request
    pub nonce_request_timeout_ms: u64,
    /// Time to wait for each inclusion handshake step
    pub inclusion_timeout_ms: u64,
    /// Ticker period
    pub tick_period_ms: u64,
    /// Lifetime of nonces handed to peers
    pub internal_nonce_life_ticks: u64,
    /// Lifetime of a nonce received from a peer
    pub external_nonce_life_ticks: u64,
    /// Ticks between sweeps of the internal nonce table
    pub nonce_sweep_interval_ticks: u64,
    /// Internal nonce table slots
    pub nonce_table_capacity: usize,
    /// Outbound queue capacity, in-flight request included
    pub queue_capacity: usize,
    /// Attempts at seeding the PRNG before giving up
    pub entropy_retries: u32,
    /// Delay after the first failed seed attempt; grows linearly
    pub entropy_backoff_ms: u64,
    /// Command classes listed in a commands-supported report
    pub secure_command_classes: Vec<u8>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            is_controller: true,
            nonce_request_timeout_ms: 10_000,
            inclusion_timeout_ms: 10_000,
            tick_period_ms: 200,
            internal_nonce_life_ticks: 15,
            external_nonce_life_ticks: 5,
            nonce_sweep_interval_ticks: 5,
            nonce_table_capacity: 38,
            queue_capacity: 8,
            entropy_retries: 3,
            entropy_backoff_ms: 20,
            secure_command_classes: Vec::new(),
        }
    }
}

impl SecurityConfig {
    pub fn builder() -> SecurityConfigBuilder {
        SecurityConfigBuilder::new()
    }

    /// Check the configuration for values the context cannot run with
    ///
    /// # Errors
    /// Returns `InvalidData` naming the first offending field.
    pub fn validate(&self) -> ZwResult<()> {
        NodeId::new(self.node_id)?;
        let non_zero: [(&str, u64); 9] = [
            ("nonce_request_timeout_ms", self.nonce_request_timeout_ms),
            ("inclusion_timeout_ms", self.inclusion_timeout_ms),
            ("tick_period_ms", self.tick_period_ms),
            ("internal_nonce_life_ticks", self.internal_nonce_life_ticks),
            ("external_nonce_life_ticks", self.external_nonce_life_ticks),
            ("nonce_sweep_interval_ticks", self.nonce_sweep_interval_ticks),
            ("nonce_table_capacity", self.nonce_table_capacity as u64),
            ("queue_capacity", self.queue_capacity as u64),
            ("entropy_retries", u64::from(self.entropy_retries)),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(ZwError::InvalidData(format!("{} must not be zero", name)));
            }
        }
        Ok(())
    }

    /// Own node id
    ///
    /// # Errors
    /// Returns `InvalidData` if `node_id` is out of range.
    pub fn own_node(&self) -> ZwResult<NodeId> {
        NodeId::new(self.node_id)
    }

    pub fn nonce_request_timeout(&self) -> Duration {
        Duration::from_millis(self.nonce_request_timeout_ms)
    }

    pub fn inclusion_timeout(&self) -> Duration {
        Duration::from_millis(self.inclusion_timeout_ms)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    pub fn entropy_backoff(&self) -> Duration {
        Duration::from_millis(self.entropy_backoff_ms)
    }
}

/// Fluent builder for [`SecurityConfig`]
#[derive(Debug, Clone, Default)]
pub struct SecurityConfigBuilder {
    config: SecurityConfig,
}

impl SecurityConfigBuilder {
    /// Create a builder starting from the defaults
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_id(mut self, node_id: u8) -> Self {
        self.config.node_id = node_id;
        self
    }

    pub fn controller(mut self, is_controller: bool) -> Self {
        self.config.is_controller = is_controller;
        self
    }

    pub fn nonce_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.nonce_request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn inclusion_timeout(mut self, timeout: Duration) -> Self {
        self.config.inclusion_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn tick_period(mut self, period: Duration) -> Self {
        self.config.tick_period_ms = period.as_millis() as u64;
        self
    }

    /// Lifetimes of internal and external nonces, in ticks
    pub fn nonce_lifetimes(mut self, internal_ticks: u64, external_ticks: u64) -> Self {
        self.config.internal_nonce_life_ticks = internal_ticks;
        self.config.external_nonce_life_ticks = external_ticks;
        self
    }

    pub fn nonce_sweep_interval(mut self, ticks: u64) -> Self {
        self.config.nonce_sweep_interval_ticks = ticks;
        self
    }

    pub fn nonce_table_capacity(mut self, slots: usize) -> Self {
        self.config.nonce_table_capacity = slots;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Seed attempts and initial backoff for the PRNG
    pub fn entropy_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.config.entropy_retries = attempts;
        self.config.entropy_backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn secure_command_classes(mut self, classes: Vec<u8>) -> Self {
        self.config.secure_command_classes = classes;
        self
    }

    /// Validate and return the configuration
    ///
    /// # Errors
    /// See [`SecurityConfig::validate`].
    pub fn build(self) -> ZwResult<SecurityConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SecurityConfig::default();
        assert_eq!(config.node_id, 1);
        assert!(config.is_controller);
        assert_eq!(config.nonce_request_timeout(), Duration::from_secs(10));
        assert_eq!(config.tick_period(), Duration::from_millis(200));
        assert_eq!(config.nonce_table_capacity, 38);
        assert_eq!(config.queue_capacity, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = SecurityConfig::builder()
            .node_id(12)
            .controller(false)
            .inclusion_timeout(Duration::from_secs(3))
            .nonce_lifetimes(20, 4)
            .queue_capacity(2)
            .build()
            .unwrap();
        assert_eq!(config.own_node().unwrap().as_u8(), 12);
        assert!(!config.is_controller);
        assert_eq!(config.inclusion_timeout_ms, 3000);
        assert_eq!(config.internal_nonce_life_ticks, 20);
        assert_eq!(config.external_nonce_life_ticks, 4);
        assert_eq!(config.queue_capacity, 2);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(SecurityConfig::builder().node_id(0).build().is_err());
        assert!(SecurityConfig::builder().node_id(233).build().is_err());
        assert!(SecurityConfig::builder().queue_capacity(0).build().is_err());
        let err = SecurityConfig::builder()
            .tick_period(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, ZwError::InvalidData(msg) if msg.contains("tick_period_ms")));
    }
}
