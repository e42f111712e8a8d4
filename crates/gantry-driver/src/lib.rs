//! # Gantry Driver
//!
//! 运动指令同步管线：把外部运动内核规划出的块编码成线缆指令发给 MCU，
//! 并在 MCU 确认执行到对应的同步 ID 后才执行主机侧的副作用。
//!
//! ```text
//!  程序文件 ──► PlannerAdapter ──units──► Controller ──bytes──► Link ──► MCU
//!                    │                        ▲                          │
//!                    └─enqueue─► CommandQueue ┘◄── release(id) ◄─ 上报 ──┘
//! ```
//!
//! ## 模块
//!
//! - `queue`: 按同步 ID 延迟执行的命令队列
//! - `planner`: 运动内核适配（编码、计时、程序生命周期）
//! - `controller`: MCU 上报处理、发送调度与运行周期
//! - `homing`: 回零程序生成
//! - `runtime`: `mio` 事件循环与跨线程请求
//! - `state`: 机床状态存储（快照 + 变化通知）
//! - `session`: 状态观察者会话

mod builder;
pub mod config;
pub mod controller;
mod error;
pub mod homing;
pub mod kernel;
pub mod planner;
pub mod queue;
pub mod resolver;
pub mod runtime;
pub mod session;
pub mod state;
pub mod sync_var;

pub use builder::ControllerBuilder;
pub use config::{
    AxisHoming, ControllerConfig, HomingMode, KernelKind, LinkSettings, PlannerSettings,
    RuntimeSettings,
};
pub use controller::{Controller, Cycle};
pub use error::DriverError;
pub use kernel::{Block, KernelConfig, KernelError, MotionKernel, ReplayKernel, Units};
pub use planner::{Deferred, EndCallback, PlannerAdapter, ProgramSource};
pub use queue::CommandQueue;
pub use resolver::{FsResolver, PathResolver};
pub use runtime::{Attached, Request, Runtime, RuntimeHandle};
pub use session::SessionRegistry;
pub use state::{MachineStatus, StateChange, StateStore, StateView};
pub use sync_var::SyncVar;
