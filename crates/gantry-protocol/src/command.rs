//! 指令构建
//!
//! 每个函数返回一条指令体（不含换行）。运动类指令由 [`frame_unit`] 加上
//! 同步 ID 头后发送；控制类指令（`c`/`h`/`D` 等）直接发送。

use crate::float::encode_float;
use crate::{Axis, AxisVector, ProtocolError};
use std::fmt::Write as _;

// ============================================================================
// 指令字符
// ============================================================================

pub const SET_SYNC: char = '#';
pub const SET: char = '$';
pub const SET_AXIS: char = 'a';
pub const LINE: char = 'l';
pub const SYNC_SPEED: char = '%';
pub const SPEED: char = 'p';
pub const DWELL: char = 'd';
pub const INPUT: char = 'I';
pub const OUTPUT: char = 'O';
pub const SEEK: char = 's';
pub const PAUSE: char = 'P';
pub const JOG: char = 'j';

// ============================================================================
// 控制指令（无参数）
// ============================================================================

pub const RESUME: &str = "c";
pub const HELP: &str = "h";
pub const DUMP: &str = "D";
pub const REBOOT: &str = "R";
pub const ESTOP: &str = "E";
pub const CLEAR: &str = "C";
pub const STOP: &str = "S";
pub const UNPAUSE: &str = "U";
pub const FLUSH: &str = "F";

/// 行指令最多携带的分段时间数
pub const MAX_SEGMENT_TIMES: usize = 7;

/// 同步变量的取值
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncValue {
    Int(i64),
    Float(f64),
}

impl From<i64> for SyncValue {
    fn from(v: i64) -> Self {
        SyncValue::Int(v)
    }
}

impl From<u32> for SyncValue {
    fn from(v: u32) -> Self {
        SyncValue::Int(v as i64)
    }
}

impl From<bool> for SyncValue {
    fn from(v: bool) -> Self {
        SyncValue::Int(v as i64)
    }
}

impl From<f64> for SyncValue {
    fn from(v: f64) -> Self {
        SyncValue::Float(v)
    }
}

/// `#name=value`：随运动流同步执行的变量赋值
pub fn set_sync(name: &str, value: impl Into<SyncValue>) -> Result<String, ProtocolError> {
    let mut out = format!("{SET_SYNC}{name}=");
    match value.into() {
        SyncValue::Int(v) => {
            let _ = write!(out, "{v}");
        },
        SyncValue::Float(v) => out.push_str(&encode_float(v)?),
    }
    Ok(out)
}

/// `$name=value`：立即生效的配置变量
pub fn set(name: &str, value: impl std::fmt::Display) -> String {
    format!("{SET}{name}={value}")
}

/// `a<axis><pos>`：设置轴位置（回零标定）
pub fn set_axis(axis: Axis, position: f64) -> Result<String, ProtocolError> {
    Ok(format!("{SET_AXIS}{}{}", axis.as_char(), encode_float(position)?))
}

/// 行运动指令
///
/// `times` 为各分段时间（毫秒），线缆上以分钟编码，零值分段省略。
/// `speeds` 为 `(距离, 主轴转速)` 对，每一对单独一行 `%`。
pub fn line(
    target: &AxisVector,
    exit_vel: f64,
    max_accel: f64,
    max_jerk: f64,
    times: &[f64],
    speeds: &[(f64, f64)],
) -> Result<String, ProtocolError> {
    if times.len() > MAX_SEGMENT_TIMES {
        return Err(ProtocolError::TooManyTimes {
            max: MAX_SEGMENT_TIMES,
            actual: times.len(),
        });
    }

    let mut out = String::with_capacity(64);
    out.push(LINE);
    out.push_str(&encode_float(exit_vel)?);
    out.push_str(&encode_float(max_accel)?);
    out.push_str(&encode_float(max_jerk)?);

    for (axis, value) in target {
        out.push(axis.as_char());
        out.push_str(&encode_float(*value)?);
    }

    for (i, t) in times.iter().enumerate() {
        if *t != 0.0 {
            let _ = write!(out, "{i}");
            out.push_str(&encode_float(t / 60000.0)?);
        }
    }

    for (dist, speed) in speeds {
        out.push('\n');
        out.push_str(&sync_speed(*dist, *speed)?);
    }

    Ok(out)
}

/// `%<dist><speed>`：沿路径在指定距离处切换主轴转速
pub fn sync_speed(dist: f64, speed: f64) -> Result<String, ProtocolError> {
    Ok(format!("{SYNC_SPEED}{}{}", encode_float(dist)?, encode_float(speed)?))
}

/// `p<speed>`：主轴转速
pub fn speed(value: f64) -> Result<String, ProtocolError> {
    Ok(format!("{SPEED}{}", encode_float(value)?))
}

/// `d<seconds>`：暂停等待
pub fn dwell(seconds: f64) -> Result<String, ProtocolError> {
    if seconds < 0.0 {
        return Err(ProtocolError::InvalidValue {
            field: "dwell".to_string(),
            value: seconds.to_string(),
        });
    }
    Ok(format!("{DWELL}{}", encode_float(seconds)?))
}

/// 输入端口
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputPort {
    Digital(u8),
    Analog(u8),
}

impl std::str::FromStr for InputPort {
    type Err = ProtocolError;

    /// 解析 `digital-<n>` / `analog-<n>`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidValue {
            field: "input port".to_string(),
            value: s.to_string(),
        };
        let (kind, index) = s.split_once('-').ok_or_else(invalid)?;
        let index: u8 = index.parse().map_err(|_| invalid())?;
        if index > 9 {
            return Err(invalid());
        }
        match kind {
            "digital" => Ok(InputPort::Digital(index)),
            "analog" => Ok(InputPort::Analog(index)),
            _ => Err(invalid()),
        }
    }
}

/// 输入等待模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InputMode {
    Immediate = 0,
    Rise = 1,
    Fall = 2,
    High = 3,
    Low = 4,
}

impl std::str::FromStr for InputMode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "immediate" => Ok(InputMode::Immediate),
            "rise" => Ok(InputMode::Rise),
            "fall" => Ok(InputMode::Fall),
            "high" => Ok(InputMode::High),
            "low" => Ok(InputMode::Low),
            _ => Err(ProtocolError::InvalidValue {
                field: "input mode".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// `I<d|a><n><mode><timeout>`：等待输入
pub fn input(port: InputPort, mode: InputMode, timeout: f64) -> Result<String, ProtocolError> {
    let (kind, index) = match port {
        InputPort::Digital(n) => ('d', n),
        InputPort::Analog(n) => ('a', n),
    };
    Ok(format!(
        "{INPUT}{kind}{index}{}{}",
        mode as u8,
        encode_float(timeout)?
    ))
}

/// `O<port><value>`：数字输出
pub fn output(port: u8, value: u8) -> String {
    format!("{OUTPUT}{port}{value}")
}

/// 寻边开关标志
pub const SEEK_ACTIVE: u8 = 1 << 0;
pub const SEEK_ERROR: u8 = 1 << 1;

/// `s<switch hex><flags hex>`：探针/限位寻边
///
/// `active` 为寻找开关触发（否则寻找释放），`error` 为未找到时报错。
pub fn seek(switch: u8, active: bool, error: bool) -> String {
    let mut flags = 0;
    if active {
        flags |= SEEK_ACTIVE;
    }
    if error {
        flags |= SEEK_ERROR;
    }
    format!("{SEEK}{switch:x}{flags:x}")
}

/// 暂停类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseKind {
    /// 操作员立即暂停（只由主机发出）
    User,
    Program,
    Optional,
    PalletChange,
}

impl PauseKind {
    fn code(self) -> u8 {
        match self {
            PauseKind::User => 0,
            PauseKind::Program | PauseKind::PalletChange => 1,
            PauseKind::Optional => 2,
        }
    }
}

impl std::str::FromStr for PauseKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "program" => Ok(PauseKind::Program),
            "optional" => Ok(PauseKind::Optional),
            "pallet-change" => Ok(PauseKind::PalletChange),
            _ => Err(ProtocolError::InvalidValue {
                field: "pause type".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// `j<id><axis><v>…`：点动
///
/// 每轴速度为最大速度的比例（-1..=1），`id` 为十进制点动编号，
/// MCU 结束点动后以 `jd` 上报。
pub fn jog(id: u16, axes: &AxisVector) -> Result<String, ProtocolError> {
    let mut out = format!("{JOG}{id}");
    for (axis, velocity) in axes {
        if !(-1.0..=1.0).contains(velocity) {
            return Err(ProtocolError::InvalidValue {
                field: format!("{axis} jog velocity"),
                value: velocity.to_string(),
            });
        }
        out.push(axis.as_char());
        out.push_str(&encode_float(*velocity)?);
    }
    Ok(out)
}

/// `P<type>`：程序暂停
pub fn pause(kind: PauseKind) -> String {
    format!("{PAUSE}{}", kind.code())
}

/// 加上同步 ID 头，组成一个完整的发送单元
///
/// 指令体为空时只发送 `#id=<id>\n`。
pub fn frame_unit(id: u32, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        format!("{SET_SYNC}id={id}\n")
    } else {
        format!("{SET_SYNC}id={id}\n{body}\n")
    }
}

/// 控制指令加上换行
pub fn frame_control(body: &str) -> String {
    format!("{}\n", body.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(pairs: &[(Axis, f64)]) -> AxisVector {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_set_sync() {
        assert_eq!(set_sync("id", 42u32).unwrap(), "#id=42");
        assert_eq!(set_sync("0h", true).unwrap(), "#0h=1");
        assert_eq!(set_sync("if", 0.5).unwrap(), "#if=:AAAAPw");
        assert!(set_sync("if", f64::NAN).is_err());
    }

    #[test]
    fn test_set_axis() {
        assert_eq!(set_axis(Axis::Z, 1.0).unwrap(), "az:AACAPw");
    }

    #[test]
    fn test_line_encoding() {
        let t = target(&[(Axis::Y, 0.5), (Axis::X, 1.0)]);
        let encoded = line(&t, 0.0, 1.0, 100.0, &[60000.0, 0.0, 30000.0], &[]).unwrap();
        assert_eq!(
            encoded,
            "l:AAAAAA:AACAPw:AADIQgx:AACAPwy:AAAAPw0:AACAPw2:AAAAPw"
        );
    }

    #[test]
    fn test_line_with_speeds() {
        let t = target(&[(Axis::X, 1.0)]);
        let encoded = line(&t, 0.0, 0.0, 0.0, &[], &[(0.5, 100.0)]).unwrap();
        let mut lines = encoded.lines();
        assert_eq!(lines.next(), Some("l:AAAAAA:AAAAAA:AAAAAAx:AACAPw"));
        assert_eq!(lines.next(), Some("%:AAAAPw:AADIQg"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_line_rejects_too_many_times() {
        let t = target(&[(Axis::X, 1.0)]);
        assert!(matches!(
            line(&t, 0.0, 0.0, 0.0, &[1.0; 8], &[]),
            Err(ProtocolError::TooManyTimes { max: 7, actual: 8 })
        ));
    }

    #[test]
    fn test_seek_flags() {
        assert_eq!(seek(1, true, true), "s13");
        assert_eq!(seek(11, false, true), "sb2");
        assert_eq!(seek(2, false, false), "s20");
    }

    #[test]
    fn test_input_and_output() {
        let port: InputPort = "digital-1".parse().unwrap();
        let mode: InputMode = "rise".parse().unwrap();
        assert_eq!(input(port, mode, 1.0).unwrap(), "Id11:AACAPw");
        assert!("serial-1".parse::<InputPort>().is_err());
        assert!("digital-x".parse::<InputPort>().is_err());
        assert!("sideways".parse::<InputMode>().is_err());
        assert_eq!(output(2, 1), "O21");
    }

    #[test]
    fn test_pause() {
        assert_eq!(pause("program".parse().unwrap()), "P1");
        assert_eq!(pause("optional".parse().unwrap()), "P2");
        assert_eq!(pause("pallet-change".parse().unwrap()), "P1");
        assert_eq!(pause(PauseKind::User), "P0");
        assert!("user".parse::<PauseKind>().is_err());
        assert!("forever".parse::<PauseKind>().is_err());
    }

    #[test]
    fn test_jog() {
        let axes = target(&[(Axis::Y, -0.5), (Axis::X, 1.0)]);
        assert_eq!(jog(7, &axes).unwrap(), "j7x:AACAPwy:AAAAvw");
        assert_eq!(jog(1, &AxisVector::new()).unwrap(), "j1");
        assert!(jog(2, &target(&[(Axis::Z, 1.5)])).is_err());
    }

    #[test]
    fn test_dwell_rejects_negative() {
        assert_eq!(dwell(0.5).unwrap(), "d:AAAAPw");
        assert!(dwell(-1.0).is_err());
    }

    #[test]
    fn test_frame_unit() {
        assert_eq!(frame_unit(3, ""), "#id=3\n");
        assert_eq!(frame_unit(4, "d:AAAAPw"), "#id=4\nd:AAAAPw\n");
        assert_eq!(frame_control(HELP), "h\n");
    }
}
