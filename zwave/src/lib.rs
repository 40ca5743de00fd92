//! zwave_rs - Rust implementation of the Z-Wave Security 0 sublayer
//!
//! # Architecture
//!
//! This library is organized as a workspace with multiple crates:
//!
//! - `zwave-core`: Error type, node ids, bounded buffers, command class constants
//! - `zwave-security`: AES primitive, PRNG, keys, nonces, secured frame codec
//! - `zwave-transport`: Frame transport seam and a tokio channel transport
//! - `zwave-session`: Security context and its state machines
//!
//! # Implementation Status
//!
//! ## ✅ 已完成
//! - 安全封装（AES-OFB 加密、CBC-MAC 认证）
//! - nonce 管理（内部/外部 nonce、过期清理）
//! - 分帧与重组
//! - 安全发送状态机
//! - 安全入网（被加入节点与添加节点）
//! - 事件、统计、配置
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use zwave::session::{SecurityConfig, SecurityContext};
//! use zwave::transport::{ChannelSettings, ChannelTransport};
//!
//! # async fn run() -> zwave::ZwResult<()> {
//! let (transport, mut frames) = ChannelTransport::new(ChannelSettings::default());
//! let context = SecurityContext::builder(Arc::new(transport))
//!     .config(SecurityConfig::builder().node_id(1).build()?)
//!     .build()
//!     .await?;
//! context.generate_network_key()?;
//! context.secure_send(zwave::NodeId::new(2)?, &[0x25, 0x01, 0xFF])?;
//! let _nonce_get = frames.recv().await;
//! # Ok(())
//! # }
//! ```

// Re-export core types
pub use zwave_core::{NodeId, Opp, TxStatus, TxToken, ZwError, ZwResult};

// Re-export security primitives
pub mod security {
    pub use zwave_security::*;
}

// Re-export transport API
pub mod transport {
    pub use zwave_transport::*;
}

// Re-export session API
pub mod session {
    pub use zwave_session::*;
}
