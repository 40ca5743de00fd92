//! Security context for the Z-Wave Security 0 sublayer
//!
//! This crate drives the secure transmission, included-node and adding-node
//! state machines on top of the primitives in `zwave-security`.
//!
//! # 功能
//!
//! ## 安全传输
//! - [x] 发送队列（容量 8，含进行中的请求）
//! - [x] NONCE_GET / NONCE_REPORT 握手与超时
//! - [x] 超过 26 字节的负载分两帧发送
//! - [x] 入站帧分发（认证、解密、重组）
//!
//! ## 安全入网
//! - [x] 被加入节点状态机（Scheme Get/Report、Network Key Set/Verify、Scheme Inherit）
//! - [x] 添加节点状态机（含控制器继承）
//! - [x] 安全命令类列表交换
//!
//! ## 通用功能
//! - [x] 事件监听器
//! - [x] 统计信息
//! - [x] 周期计时器（nonce 过期与清理）

pub mod adding;
pub mod config;
pub mod context;
pub mod engine;
pub mod events;
pub mod inclusion;
pub mod resources;
pub mod state;
pub mod statistics;
pub mod ticker;
pub mod timer;
pub mod tx;

pub use adding::{AddingNodeEvent, AddingNodeMachine};
pub use config::{SecurityConfig, SecurityConfigBuilder};
pub use context::{SecurityContext, SecurityContextBuilder};
pub use engine::{Engine, Inbound};
pub use events::{
    CallbackEventListener, ChannelEventListener, SecurityEvent, SecurityEventListener, SendOrigin,
};
pub use inclusion::{IncludedNodeEvent, IncludedNodeMachine};
pub use state::{AddingState, IncludedState, TxState};
pub use statistics::SecurityStatistics;
pub use timer::{TimerCommand, TimerKind};
pub use tx::{SendOutcome, TxMachine, TxRequest};
