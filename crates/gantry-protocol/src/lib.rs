//! # Gantry Protocol
//!
//! 主机与运动控制 MCU 之间的串口文本协议（无硬件依赖）
//!
//! ## 模块
//!
//! - `axis`: 轴标识与轴向量
//! - `float`: 打包浮点编码（f32 小端 + base64）
//! - `command`: 指令构建（行运动、同步变量、暂停、寻边等）
//! - `report`: MCU 上报解析（每行一个 JSON 对象）
//! - `line`: 字节流到完整行的切分
//!
//! ## 传输单元
//!
//! 主机发往 MCU 的每个单元以同步 ID 开头：
//!
//! ```text
//! #id=<id>\n<指令体>\n
//! ```
//!
//! 指令体为空时只发送 `#id=<id>\n`。

pub mod axis;
pub mod command;
pub mod float;
pub mod line;
pub mod report;

pub use axis::{Axis, AxisVector};
pub use float::{decode_float, encode_float};
pub use line::LineBuffer;
pub use report::{LogLevel, LogRecord, McuMessage, Update};

/// 协议层错误
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Non-finite value cannot be encoded: {0}")]
    NonFinite(f64),

    #[error("Invalid packed float: {0:?}")]
    InvalidFloat(String),

    #[error("Too many segment times: expected at most {max}, got {actual}")]
    TooManyTimes { max: usize, actual: usize },

    #[error("Invalid value for field {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Malformed report: {0}")]
    MalformedReport(String),
}
