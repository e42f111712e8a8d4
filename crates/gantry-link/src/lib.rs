//! # Gantry Link
//!
//! 主机与运动控制 MCU 之间的串口链路管理
//!
//! ## 模块
//!
//! - `transport`: 字节流与连接器抽象（`Transport` / `Connector` trait）
//! - `tty`: 基于 termios 的串口实现
//! - `reset`: MCU 复位线（sysfs GPIO）
//! - `backoff`: 指数退避计算
//! - `link`: 链路状态机（打开、错误分类、重连、存活检测）
//!
//! ## 时间模型
//!
//! 链路本身不持有任何计时器线程。所有截止时间由 [`Link::next_deadline`]
//! 暴露给外部事件循环，到期后调用 [`Link::on_timer`]，所有方法都显式接收
//! `now: Instant`，便于在测试中推进虚拟时间。

pub mod backoff;
pub mod error;
pub mod link;
pub mod reset;
pub mod transport;
pub mod tty;

pub use backoff::Backoff;
pub use error::{ErrorClass, LinkError, classify};
pub use link::{Link, LinkConfig, LinkEvent, LinkState};
pub use reset::{NoReset, ResetLine, SysfsGpio};
pub use transport::{Connector, Transport};
pub use tty::TtyConnector;
