//! 控制器配置
//!
//! 从 TOML 文件加载，所有字段都有默认值，缺失的表或字段使用默认值：
//!
//! ```toml
//! [link]
//! device = "/dev/ttyAMA0"
//! baud = 230400
//! reset_gpio = 27
//!
//! [planner]
//! kernel = "replay"
//! max_deviation = 0.05
//! tool_type = "PWM Spindle"
//!
//! [firmware]
//! require = ">=1.0.0"
//!
//! [homing.z]
//! mode = "switch-max"
//! search_velocity = 500
//! ```

use crate::error::DriverError;
use gantry_link::LinkConfig;
use gantry_protocol::Axis;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 串口链路设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    pub device: PathBuf,
    pub baud: u32,
    pub rtscts: bool,
    /// MCU 复位引脚（sysfs GPIO 编号），`None` 表示不控制复位
    pub reset_gpio: Option<u32>,
    pub liveness_timeout_secs: f64,
    pub reconnect_base_secs: f64,
    pub reconnect_max_secs: f64,
    pub error_backoff_base_ms: u64,
    pub error_backoff_max_exponent: u32,
    /// 连续暂时性错误上限，超过后断开重连
    pub max_transient_errors: u32,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/ttyAMA0"),
            baud: 230400,
            rtscts: true,
            reset_gpio: Some(27),
            liveness_timeout_secs: 10.0,
            reconnect_base_secs: 5.0,
            reconnect_max_secs: 60.0,
            error_backoff_base_ms: 100,
            error_backoff_max_exponent: 6,
            max_transient_errors: 10,
        }
    }
}

impl LinkSettings {
    pub fn link_config(&self) -> Result<LinkConfig, DriverError> {
        let secs = |name: &str, v: f64| {
            Duration::try_from_secs_f64(v)
                .map_err(|_| DriverError::Config(format!("link.{name} must be >= 0, got {v}")))
        };
        let config = LinkConfig {
            liveness_timeout: secs("liveness_timeout_secs", self.liveness_timeout_secs)?,
            reconnect_base: secs("reconnect_base_secs", self.reconnect_base_secs)?,
            reconnect_max: secs("reconnect_max_secs", self.reconnect_max_secs)?,
            error_backoff_base: Duration::from_millis(self.error_backoff_base_ms),
            error_backoff_max_exponent: self.error_backoff_max_exponent,
            max_transient_errors: self.max_transient_errors,
        };
        if config.reconnect_max < config.reconnect_base {
            return Err(DriverError::Config(
                "link.reconnect_max_secs must not be below reconnect_base_secs".to_string(),
            ));
        }
        if config.liveness_timeout.is_zero() {
            return Err(DriverError::Config(
                "link.liveness_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(config)
    }
}

/// 运动内核类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KernelKind {
    /// 离线块流回放
    Replay,
}

/// 规划设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerSettings {
    /// 未配置时启动失败
    pub kernel: Option<KernelKind>,
    pub tool_type: Option<String>,
    pub rapid_auto_off: bool,
    pub max_deviation: f64,
    pub junction_accel: f64,
    pub program_start: Option<String>,
    pub tool_change: Option<String>,
    pub program_end: Option<String>,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            kernel: None,
            tool_type: None,
            rapid_auto_off: false,
            max_deviation: 0.1,
            junction_accel: 200000.0,
            program_start: None,
            tool_change: None,
            program_end: None,
        }
    }
}

/// 固件兼容性
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirmwareSettings {
    /// semver 版本要求，例如 `">=1.0.0, <2"`
    pub require: Option<String>,
}

impl FirmwareSettings {
    pub fn requirement(&self) -> Result<Option<semver::VersionReq>, DriverError> {
        self.require
            .as_deref()
            .map(|req| {
                semver::VersionReq::parse(req)
                    .map_err(|e| DriverError::Config(format!("firmware.require {req:?}: {e}")))
            })
            .transpose()
    }
}

/// 回零方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HomingMode {
    /// 手动指定位置（`G28.3`）
    #[default]
    Manual,
    SwitchMin,
    SwitchMax,
    StallMin,
    StallMax,
}

impl HomingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            HomingMode::Manual => "manual",
            HomingMode::SwitchMin => "switch-min",
            HomingMode::SwitchMax => "switch-max",
            HomingMode::StallMin => "stall-min",
            HomingMode::StallMax => "stall-max",
        }
    }

    /// 堵转检测回零（没有锁存步骤）
    pub fn is_stall(self) -> bool {
        matches!(self, HomingMode::StallMin | HomingMode::StallMax)
    }

    /// 向最小端寻找
    pub fn is_min(self) -> bool {
        matches!(self, HomingMode::SwitchMin | HomingMode::StallMin)
    }
}

/// 单轴回零参数（速度 mm/min，距离 mm）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisHoming {
    pub mode: HomingMode,
    pub search_velocity: f64,
    pub latch_velocity: f64,
    pub latch_backoff: f64,
    pub zero_backoff: f64,
}

impl Default for AxisHoming {
    fn default() -> Self {
        Self {
            mode: HomingMode::Manual,
            search_velocity: 500.0,
            latch_velocity: 100.0,
            latch_backoff: 5.0,
            zero_backoff: 1.0,
        }
    }
}

/// 事件循环设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// 程序文件根目录
    pub upload_dir: PathBuf,
    /// 会话空闲超时
    pub session_idle_secs: u64,
    /// 进度上报周期
    pub time_tick_ms: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("upload"),
            session_idle_secs: 300,
            time_tick_ms: 1000,
        }
    }
}

impl RuntimeSettings {
    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }

    pub fn time_tick(&self) -> Duration {
        Duration::from_millis(self.time_tick_ms.max(1))
    }
}

/// 控制器完整配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub link: LinkSettings,
    pub planner: PlannerSettings,
    pub firmware: FirmwareSettings,
    pub runtime: RuntimeSettings,
    /// 按轴的回零参数，未配置的轴为手动回零
    pub homing: BTreeMap<Axis, AxisHoming>,
}

impl ControllerConfig {
    pub fn from_toml(text: &str) -> Result<Self, DriverError> {
        toml::from_str(text).map_err(|e| DriverError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, DriverError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&text)
    }

    pub fn to_toml(&self) -> Result<String, DriverError> {
        toml::to_string_pretty(self).map_err(|e| DriverError::Config(e.to_string()))
    }
}
