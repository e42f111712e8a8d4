//! 驱动层错误类型定义

use crate::kernel::KernelError;
use gantry_link::LinkError;
use gantry_protocol::ProtocolError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 协议编码/解析错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 串口链路错误
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// 运动内核错误
    #[error("Motion kernel error: {0}")]
    Kernel(#[from] KernelError),

    /// 未配置运动内核（启动期配置错误）
    #[error("No motion kernel available: {0}")]
    KernelUnavailable(String),

    /// 运动块内容无效
    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    /// 当前状态不允许该操作（例如程序运行中再次加载）
    #[error("Machine busy: {0}")]
    Busy(String),

    /// 与当前运行周期冲突（点动与其它周期互斥）
    #[error("Cannot enter {requested} cycle while in {active} cycle")]
    CycleConflict {
        requested: &'static str,
        active: &'static str,
    },

    /// 操作员请求参数无效
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// 配置错误
    #[error("Config error: {0}")]
    Config(String),

    /// 文件读取错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 会话不存在（已过期或从未注册）
    #[error("Unknown session {0}")]
    UnknownSession(u32),

    /// 事件循环已退出
    #[error("Runtime stopped")]
    RuntimeStopped,
}

#[cfg(test)]
mod tests {
    use super::DriverError;
    use crate::kernel::KernelError;
    use gantry_protocol::ProtocolError;

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::Protocol(ProtocolError::NonFinite(f64::NAN));
        assert!(format!("{err}").contains("Non-finite"));

        let err = DriverError::Kernel(KernelError::Runtime("Arc radius too small".into()));
        assert!(format!("{err}").contains("Arc radius too small"));

        let err = DriverError::KernelUnavailable("none configured".into());
        assert!(format!("{err}").starts_with("No motion kernel"));

        let err = DriverError::CycleConflict {
            requested: "jogging",
            active: "running",
        };
        assert_eq!(err.to_string(), "Cannot enter jogging cycle while in running cycle");
    }

    #[test]
    fn test_from_conversions() {
        let err: DriverError = ProtocolError::MalformedReport("x".into()).into();
        assert!(matches!(err, DriverError::Protocol(_)));

        let err: DriverError = std::io::Error::other("disk").into();
        assert!(matches!(err, DriverError::Io(_)));
    }
}
