//! 同步变量
//!
//! 内核 `set` 块的变量名在解码时校验，映射到固定的枚举：
//!
//! | 名称           | 变体                 | 处理                              |
//! |----------------|----------------------|-----------------------------------|
//! | `message`      | `Message`            | 确认后提示操作员                  |
//! | `line`/`tool`  | `Line`/`Tool`        | 确认后写入状态                    |
//! | `speed`        | `Speed`              | 确认后写入状态 + 主轴转速指令     |
//! | `_feed`        | `Feed`               | 确认后写入状态 + `#if=1/feed`     |
//! | `_x`           | `AxisPosition`       | 不排队（位置由 MCU 上报）         |
//! | `_x_home`      | `AxisHome`           | 确认后写入状态 + 轴位置标定       |
//! | `_x_homed`     | `AxisHomed`          | 确认后写入状态 + 电机回零标志     |
//! | `_<其它>`      | `Other`              | 确认后写入状态                    |

use crate::error::DriverError;
use gantry_protocol::Axis;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncVar {
    Message,
    Line,
    Tool,
    Speed,
    Feed,
    AxisPosition(Axis),
    AxisHome(Axis),
    AxisHomed(Axis),
    Other(String),
}

impl SyncVar {
    pub fn parse(name: &str) -> Result<SyncVar, DriverError> {
        match name {
            "message" => return Ok(SyncVar::Message),
            "line" => return Ok(SyncVar::Line),
            "tool" => return Ok(SyncVar::Tool),
            "speed" => return Ok(SyncVar::Speed),
            _ => {},
        }

        let Some(rest) = name.strip_prefix('_') else {
            return Err(DriverError::InvalidBlock(format!(
                "unknown variable {name:?}"
            )));
        };
        if rest.is_empty() {
            return Err(DriverError::InvalidBlock("empty variable name".to_string()));
        }
        if rest == "feed" {
            return Ok(SyncVar::Feed);
        }

        let mut chars = rest.chars();
        if let Some(axis) = chars.next().and_then(Axis::from_char)
            && rest.as_bytes()[0].is_ascii_lowercase()
        {
            match chars.as_str() {
                "" => return Ok(SyncVar::AxisPosition(axis)),
                "_home" => return Ok(SyncVar::AxisHome(axis)),
                "_homed" => return Ok(SyncVar::AxisHomed(axis)),
                _ => {},
            }
        }

        Ok(SyncVar::Other(rest.to_string()))
    }

    /// 确认后写入状态时使用的键名
    pub fn state_key(&self) -> String {
        match self {
            SyncVar::Message => "message".to_string(),
            SyncVar::Line => "line".to_string(),
            SyncVar::Tool => "tool".to_string(),
            SyncVar::Speed => "speed".to_string(),
            SyncVar::Feed => "feed".to_string(),
            SyncVar::AxisPosition(axis) => axis.to_string(),
            SyncVar::AxisHome(axis) => format!("{axis}_home"),
            SyncVar::AxisHomed(axis) => format!("{axis}_homed"),
            SyncVar::Other(name) => name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(SyncVar::parse("message").unwrap(), SyncVar::Message);
        assert_eq!(SyncVar::parse("speed").unwrap(), SyncVar::Speed);
        assert_eq!(SyncVar::parse("_feed").unwrap(), SyncVar::Feed);
        assert_eq!(SyncVar::parse("_z").unwrap(), SyncVar::AxisPosition(Axis::Z));
        assert_eq!(SyncVar::parse("_a_home").unwrap(), SyncVar::AxisHome(Axis::A));
        assert_eq!(SyncVar::parse("_y_homed").unwrap(), SyncVar::AxisHomed(Axis::Y));
        assert_eq!(
            SyncVar::parse("_x_offset").unwrap(),
            SyncVar::Other("x_offset".to_string())
        );
        assert_eq!(
            SyncVar::parse("_metric").unwrap(),
            SyncVar::Other("metric".to_string())
        );
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(SyncVar::parse("coolant").is_err());
        assert!(SyncVar::parse("_").is_err());
    }

    #[test]
    fn test_state_key() {
        assert_eq!(SyncVar::AxisHome(Axis::B).state_key(), "b_home");
        assert_eq!(SyncVar::Other("units".into()).state_key(), "units");
    }
}
