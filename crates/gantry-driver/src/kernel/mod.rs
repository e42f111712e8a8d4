//! 运动内核边界
//!
//! 轨迹规划本身由外部内核完成（对本 crate 不透明）。内核把程序文本规划成
//! 带同步 ID 的运动块（[`Block`]），由 [`PlannerAdapter`](crate::planner::PlannerAdapter)
//! 编码成线缆指令。
//!
//! 内核通过两个钩子回调主机：
//! - **变量解析**（[`VarResolver`]）：程序中 `_name` 形式的变量取值
//! - **日志**（[`KernelLogger`]）：`<L><n>:<file>:<line>:<col>:<msg>` 格式的日志行

pub mod block;
pub mod log;
pub mod replay;

pub use block::{
    Block, DwellBlock, InputBlock, LineBlock, OutputBlock, PauseBlock, SeekBlock, SetBlock,
};
pub use replay::ReplayKernel;

use gantry_protocol::AxisVector;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// 内核错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KernelError {
    /// 程序加载失败（语法错误、文件格式错误）
    #[error("Load failed: {0}")]
    Load(String),

    /// 规划过程中的运行时错误，原样转给操作员
    #[error("{0}")]
    Runtime(String),

    /// 未加载程序
    #[error("No program loaded")]
    NotLoaded,
}

/// 单位制
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Units {
    Metric,
    Imperial,
}

/// 变量解析钩子：`(name, units) -> value`
pub type VarResolver = Box<dyn Fn(&str, Units) -> f64>;

/// 日志钩子：接收一行原始日志
pub type KernelLogger = Box<dyn Fn(&str)>;

/// 交给内核的规划配置
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct KernelConfig {
    pub default_units: Units,
    pub max_vel: AxisVector,
    pub max_accel: AxisVector,
    pub max_jerk: AxisVector,
    pub rapid_auto_off: bool,
    pub max_blend_error: f64,
    pub max_merge_error: f64,
    pub max_arc_error: f64,
    pub junction_accel: f64,
    /// 软限位（`max ≤ min` 的轴不限位，表现为 ±∞）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_soft_limit: Option<AxisVector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_soft_limit: Option<AxisVector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program_start: Option<String>,
    /// G 代码替换（`M6` 换刀、`M2`/`M30` 程序结束）
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, String>,
}

/// 运动内核能力
///
/// 语义：
/// - `load()`：加载程序文本，之后 `next()` 逐块输出
/// - `has_more()`：是否还有待输出的块（可能因等待同步而暂时为 false）
/// - `set_active(id)`：MCU 已执行到 `id`，内核据此释放后续规划
/// - `synchronize(result)`：把 MCU 反馈值（如探针结果）交给内核
/// - `restart(id, position)`：从已确认的 ID 和位置重新规划
pub trait MotionKernel {
    fn load(&mut self, name: &str, program: &str, config: &KernelConfig)
    -> Result<(), KernelError>;

    fn has_more(&self) -> bool;

    fn next(&mut self) -> Result<Option<Block>, KernelError>;

    fn set_resolver(&mut self, resolver: Option<VarResolver>);

    fn set_logger(&mut self, logger: Option<KernelLogger>);

    fn restart(&mut self, id: u32, position: &AxisVector) -> Result<(), KernelError>;

    fn stop(&mut self) -> Result<(), KernelError>;

    fn set_position(&mut self, position: &AxisVector);

    fn set_active(&mut self, id: u32);

    fn synchronize(&mut self, result: &Value);

    fn is_running(&self) -> bool;
}
