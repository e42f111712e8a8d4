//! 运动块
//!
//! 内核输出的 JSON 对象，按 `type` 字段区分：
//!
//! ```json
//! {"type": "line", "id": 3, "target": {"x": 10}, "exit-vel": 0,
//!  "max-accel": 1000, "max-jerk": 50000, "times": [12.5, 0, 12.5]}
//! ```

use gantry_protocol::AxisVector;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 直线运动
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LineBlock {
    pub id: u32,
    pub target: AxisVector,
    pub exit_vel: f64,
    pub max_accel: f64,
    pub max_jerk: f64,
    /// 各分段时间（毫秒）
    pub times: Vec<f64>,
    /// 沿路径的主轴转速切换 `(距离, 转速)`
    #[serde(default)]
    pub speeds: Vec<(f64, f64)>,
    /// 程序第一段（无需计时）
    #[serde(default)]
    pub first: bool,
    /// 寻边运动（时长不可预知，不计时）
    #[serde(default)]
    pub seeking: bool,
}

/// 变量赋值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetBlock {
    pub id: u32,
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DwellBlock {
    pub id: u32,
    pub seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputBlock {
    pub id: u32,
    pub port: String,
    pub mode: String,
    pub timeout: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputBlock {
    pub id: u32,
    pub port: u8,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeekBlock {
    pub id: u32,
    pub switch: String,
    pub active: bool,
    pub error: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PauseBlock {
    pub id: u32,
    pub pause_type: String,
}

/// 内核输出的运动块
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Block {
    Line(LineBlock),
    Set(SetBlock),
    Dwell(DwellBlock),
    Input(InputBlock),
    Output(OutputBlock),
    Seek(SeekBlock),
    Pause(PauseBlock),
    End { id: u32 },
    Start { id: u32 },
}

impl Block {
    pub fn id(&self) -> u32 {
        match self {
            Block::Line(b) => b.id,
            Block::Set(b) => b.id,
            Block::Dwell(b) => b.id,
            Block::Input(b) => b.id,
            Block::Output(b) => b.id,
            Block::Seek(b) => b.id,
            Block::Pause(b) => b.id,
            Block::End { id } | Block::Start { id } => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Block::Line(_) => "line",
            Block::Set(_) => "set",
            Block::Dwell(_) => "dwell",
            Block::Input(_) => "input",
            Block::Output(_) => "output",
            Block::Seek(_) => "seek",
            Block::Pause(_) => "pause",
            Block::End { .. } => "end",
            Block::Start { .. } => "start",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_protocol::Axis;

    #[test]
    fn test_parse_line_block() {
        let block: Block = serde_json::from_str(
            r#"{"type": "line", "id": 3, "target": {"x": 10, "y": -1.5},
                "exit-vel": 0, "max-accel": 1000, "max-jerk": 50000,
                "times": [12.5, 0, 12.5], "first": true}"#,
        )
        .unwrap();

        let Block::Line(line) = &block else {
            panic!("expected line");
        };
        assert_eq!(block.id(), 3);
        assert_eq!(line.target[&Axis::Y], -1.5);
        assert!(line.first);
        assert!(!line.seeking);
        assert!(line.speeds.is_empty());
    }

    #[test]
    fn test_parse_other_blocks() {
        let end: Block = serde_json::from_str(r#"{"type": "end", "id": 9}"#).unwrap();
        assert_eq!(end, Block::End { id: 9 });
        assert_eq!(end.kind(), "end");

        let pause: Block =
            serde_json::from_str(r#"{"type": "pause", "id": 2, "pause-type": "optional"}"#)
                .unwrap();
        assert_eq!(pause.kind(), "pause");

        let set: Block =
            serde_json::from_str(r#"{"type": "set", "id": 4, "name": "tool", "value": 2}"#)
                .unwrap();
        assert_eq!(set.id(), 4);

        assert!(serde_json::from_str::<Block>(r#"{"type": "warp", "id": 1}"#).is_err());
    }
}
