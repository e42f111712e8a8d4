//! 回零程序生成
//!
//! 回零本身是一段 G 代码（MDI），交给运动内核规划。速度与距离通过
//! `#<_<axis>_*>` 变量在规划时从状态中解析，生成程序前先写入状态。
//!
//! 开关回零：
//!
//! ```text
//! G28.2 x0 F[#<_x_search_velocity>]          标记未回零，设置搜索速度
//! G38.6 x[#<_x_home_travel>]                 寻找开关
//! G38.8 x[#<_x_latch_backoff>] F[...]        退出开关
//! G38.6 x[#<_x_latch_backoff> * -8]          慢速锁存
//! G91 G0 G53 x[#<_x_zero_backoff>]           退离
//! G90 G28.3 x[#<_x_home_position>]           标记已回零并设置绝对位置
//! G4 P1.0
//! ```
//!
//! 堵转回零省略锁存两步。

use crate::config::{AxisHoming, HomingMode};
use crate::error::DriverError;
use crate::state::StateStore;
use gantry_protocol::Axis;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::{error, info};

/// 全部回零时的顺序（先抬 Z）
pub const HOME_ALL_ORDER: [Axis; 6] = [Axis::Z, Axis::X, Axis::Y, Axis::A, Axis::B, Axis::C];

/// 生成的回零程序及其依赖的状态变量
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HomingPlan {
    pub program: String,
    pub vars: Vec<(String, Value)>,
}

/// 生成回零程序
///
/// `axis` 为 `None` 时回零所有轴，跳过未使能或手动回零的轴；无法回零的轴
/// 记录错误后跳过。手动回零的轴需要 `position`。
pub fn homing_plan(
    state: &StateStore,
    settings: &BTreeMap<Axis, AxisHoming>,
    axis: Option<Axis>,
    position: Option<f64>,
) -> Result<HomingPlan, DriverError> {
    let axes: &[Axis] = match &axis {
        Some(axis) => std::slice::from_ref(axis),
        None => &HOME_ALL_ORDER,
    };
    let defaults = AxisHoming::default();
    let mut plan = HomingPlan::default();

    for &axis in axes {
        let homing = settings.get(&axis).unwrap_or(&defaults);
        if axes.len() > 1 && (!state.is_axis_enabled(axis) || homing.mode == HomingMode::Manual) {
            continue;
        }

        if let Some(reason) = home_fail_reason(state, axis, homing.mode) {
            error!(
                target: "operator",
                "Cannot home {} axis: {}",
                axis.as_char().to_ascii_uppercase(),
                reason
            );
            continue;
        }

        if homing.mode == HomingMode::Manual {
            let position = position
                .ok_or_else(|| DriverError::InvalidRequest("Position not set".to_string()))?;
            let _ = writeln!(plan.program, "G28.3 {axis}{position:.6}");
            continue;
        }

        info!(target: "operator", "Homing {} axis", axis);
        plan.vars.extend(axis_vars(state, axis, homing));
        plan.program.push_str(&procedure(axis, homing.mode));
    }

    Ok(plan)
}

/// 无法回零的原因
pub fn home_fail_reason(state: &StateStore, axis: Axis, mode: HomingMode) -> Option<&'static str> {
    let Some(motor) = state.find_motor(axis) else {
        return Some("Not mapped to motor");
    };
    if !state.get_bool(&format!("{motor}me")) {
        return Some("Motor disabled");
    }
    if mode != HomingMode::Manual {
        let (min, max) = soft_limits(state, axis);
        if max <= min {
            return Some("max-soft-limit must be greater than min-soft-limit");
        }
    }
    None
}

fn soft_limits(state: &StateStore, axis: Axis) -> (f64, f64) {
    (
        state.get_f64(&format!("{axis}tn"), 0.0),
        state.get_f64(&format!("{axis}tm"), 0.0),
    )
}

/// 回零程序引用的 `<axis>_*` 变量
///
/// 搜索行程为软限位范围的 1.5 倍，朝回零端方向；回零位置为该端的软限位。
fn axis_vars(state: &StateStore, axis: Axis, homing: &AxisHoming) -> Vec<(String, Value)> {
    let (min, max) = soft_limits(state, axis);
    let travel = 1.5 * (max - min);
    let (home_travel, home_position) = if homing.mode.is_min() {
        (-travel, min)
    } else {
        (travel, max)
    };

    [
        ("homing_mode", json!(homing.mode.as_str())),
        ("search_velocity", json!(homing.search_velocity)),
        ("latch_velocity", json!(homing.latch_velocity)),
        ("latch_backoff", json!(homing.latch_backoff)),
        ("zero_backoff", json!(homing.zero_backoff)),
        ("home_travel", json!(home_travel)),
        ("home_position", json!(home_position)),
    ]
    .into_iter()
    .map(|(name, value)| (format!("{axis}_{name}"), value))
    .collect()
}

fn procedure(axis: Axis, mode: HomingMode) -> String {
    let var = |name: &str| format!("#<_{axis}_{name}>");
    let mut out = String::new();
    let _ = writeln!(out, "G28.2 {axis}0 F[{}]", var("search_velocity"));
    let _ = writeln!(out, "G38.6 {axis}[{}]", var("home_travel"));
    if !mode.is_stall() {
        let _ = writeln!(
            out,
            "G38.8 {axis}[{}] F[{}]",
            var("latch_backoff"),
            var("latch_velocity")
        );
        let _ = writeln!(out, "G38.6 {axis}[{} * -8]", var("latch_backoff"));
    }
    let _ = writeln!(out, "G91 G0 G53 {axis}[{}]", var("zero_backoff"));
    let _ = writeln!(out, "G90 G28.3 {axis}[{}]", var("home_position"));
    out.push_str("G4 P1.0\n");
    out
}
