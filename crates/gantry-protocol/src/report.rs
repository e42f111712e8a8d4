//! MCU 上报解析
//!
//! MCU 每行发送一个 JSON 对象，按出现的键区分消息类型：
//!
//! | 键          | 类型                         |
//! |-------------|------------------------------|
//! | `variables` | 变量表重载                   |
//! | `msg`       | 日志记录（带级别/位置/代码） |
//! | `firmware`  | 固件重启通知                 |
//! | 其它        | 状态增量更新                 |

use crate::{Axis, ProtocolError};
use serde_json::{Map, Value};

/// MCU 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn parse(s: &str) -> LogLevel {
        match s {
            "debug" => LogLevel::Debug,
            "warning" => LogLevel::Warning,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// MCU 告警代码：机床进入报警状态
pub const CODE_MACHINE_ALARMED: i64 = 11;

/// MCU 日志记录
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub msg: String,
    pub location: Option<String>,
    pub code: Option<i64>,
}

impl LogRecord {
    /// 是否需要按错误处理（错误级别，或机床报警警告）
    pub fn is_fatal(&self) -> bool {
        self.level == LogLevel::Error
            || (self.level == LogLevel::Warning && self.code == Some(CODE_MACHINE_ALARMED))
    }
}

/// 状态增量更新
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    pub values: Map<String, Value>,
}

impl Update {
    /// 最近执行完成的同步 ID
    pub fn id(&self) -> Option<u32> {
        self.values
            .get("id")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
    }

    /// 运动内核需要的反馈值
    pub fn result(&self) -> Option<&Value> {
        self.values.get("result")
    }

    /// 已结束的点动编号（`jd`）
    pub fn jog_done(&self) -> Option<u16> {
        self.values
            .get("jd")
            .and_then(Value::as_u64)
            .and_then(|v| u16::try_from(v).ok())
    }

    /// 机床状态（`xx`）
    pub fn machine_state(&self) -> Option<&str> {
        self.values.get("xx").and_then(Value::as_str)
    }

    /// 暂停原因（`pr`）
    pub fn pause_reason(&self) -> Option<&str> {
        self.values.get("pr").and_then(Value::as_str)
    }

    /// 电机驱动故障标志（`<n>df`）
    pub fn motor_flags(&self) -> impl Iterator<Item = (u8, u32)> + '_ {
        (0..MOTOR_COUNT).filter_map(|motor| {
            self.values
                .get(&format!("{motor}df"))
                .and_then(Value::as_u64)
                .map(|flags| (motor, flags as u32))
        })
    }
}

/// MCU → 主机消息
#[derive(Debug, Clone, PartialEq)]
pub enum McuMessage {
    Variables(Map<String, Value>),
    Log(LogRecord),
    Firmware(Value),
    Update(Update),
}

impl McuMessage {
    /// 解析一行上报
    pub fn parse(line: &str) -> Result<McuMessage, ProtocolError> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| ProtocolError::MalformedReport(format!("{e}: {line}")))?;
        let Value::Object(mut map) = value else {
            return Err(ProtocolError::MalformedReport(format!(
                "expected object: {line}"
            )));
        };

        if let Some(vars) = map.remove("variables") {
            return match vars {
                Value::Object(vars) => Ok(McuMessage::Variables(vars)),
                _ => Err(ProtocolError::MalformedReport(
                    "variables is not an object".to_string(),
                )),
            };
        }

        if let Some(msg) = map.get("msg") {
            let msg = match msg {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Ok(McuMessage::Log(LogRecord {
                level: LogLevel::parse(map.get("level").and_then(Value::as_str).unwrap_or("info")),
                msg,
                location: map.get("where").and_then(Value::as_str).map(str::to_string),
                code: map.get("code").and_then(Value::as_i64),
            }));
        }

        if let Some(firmware) = map.remove("firmware") {
            return Ok(McuMessage::Firmware(firmware));
        }

        Ok(McuMessage::Update(Update { values: map }))
    }

    /// 固件版本（`firmware` 可为版本字符串或带 `version` 字段的对象）
    pub fn firmware_version(&self) -> Option<&str> {
        match self {
            McuMessage::Firmware(Value::String(v)) => Some(v.as_str()),
            McuMessage::Firmware(Value::Object(o)) => o.get("version").and_then(Value::as_str),
            _ => None,
        }
    }
}

// ============================================================================
// DRV8711 驱动故障标志
// ============================================================================

/// 电机数量
pub const MOTOR_COUNT: u8 = 4;

pub const DRV8711_STATUS_OTS: u32 = 1 << 0;
pub const DRV8711_STATUS_AOCP: u32 = 1 << 1;
pub const DRV8711_STATUS_BOCP: u32 = 1 << 2;
pub const DRV8711_STATUS_APDF: u32 = 1 << 3;
pub const DRV8711_STATUS_BPDF: u32 = 1 << 4;
pub const DRV8711_STATUS_UVLO: u32 = 1 << 5;
pub const DRV8711_STATUS_STD: u32 = 1 << 6;
pub const DRV8711_STATUS_STDLAT: u32 = 1 << 7;
pub const DRV8711_COMM_ERROR: u32 = 1 << 8;

/// 堵转与堵转锁存不参与故障判断
pub const DRV8711_MASK: u32 = !(DRV8711_STATUS_STD | DRV8711_STATUS_STDLAT);

/// 硬件故障位（过温、过流、驱动故障）
pub const DRV8711_FAULT_MASK: u32 = 0x1f;

const DRV8711_NAMES: [(u32, &str); 9] = [
    (DRV8711_STATUS_OTS, "over temp"),
    (DRV8711_STATUS_AOCP, "over current a"),
    (DRV8711_STATUS_BOCP, "over current b"),
    (DRV8711_STATUS_APDF, "driver fault a"),
    (DRV8711_STATUS_BPDF, "driver fault b"),
    (DRV8711_STATUS_UVLO, "undervoltage"),
    (DRV8711_STATUS_STD, "stall"),
    (DRV8711_STATUS_STDLAT, "stall latch"),
    (DRV8711_COMM_ERROR, "comm error"),
];

/// 故障标志转可读字符串，例如 `"over temp, undervoltage"`
pub fn driver_flags_to_string(flags: u32) -> String {
    DRV8711_NAMES
        .iter()
        .filter(|(bit, _)| flags & bit != 0)
        .map(|(_, name)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// 轴位置变量名（`xp`、`yp` ...）
pub fn position_var(axis: Axis) -> String {
    format!("{}p", axis.as_char())
}
