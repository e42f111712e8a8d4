//! 链路错误与分类

use std::io;
use std::time::Duration;
use thiserror::Error;

/// 链路错误
#[derive(Error, Debug)]
pub enum LinkError {
    /// 底层 IO 错误
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),

    /// 链路未打开
    #[error("Link not open")]
    NotOpen,

    /// 超过存活超时没有任何读写
    #[error("No activity for {0:?}")]
    LivenessTimeout(Duration),

    /// 连续暂时性错误超过上限
    #[error("{errors} consecutive transient errors, last: {last}")]
    RetriesExhausted { errors: u32, last: String },
}

/// IO 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 暂时性错误：本方向短暂退避后重试
    Transient,
    /// 致命错误：关闭连接并重连
    Fatal,
}

/// 判断 IO 错误是否致命
///
/// 资源忙（`EBUSY`）、IO 错误（`EIO`）以及设备消失（`ENODEV`/`ENXIO`）为致命错误，
/// 其余一律按暂时性处理。
pub fn classify(err: &io::Error) -> ErrorClass {
    match err.raw_os_error() {
        Some(libc::EBUSY) | Some(libc::EIO) | Some(libc::ENODEV) | Some(libc::ENXIO) => {
            ErrorClass::Fatal
        },
        Some(_) => ErrorClass::Transient,
        None => match err.kind() {
            io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected => ErrorClass::Fatal,
            _ => ErrorClass::Transient,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_errno() {
        assert_eq!(
            classify(&io::Error::from_raw_os_error(libc::EIO)),
            ErrorClass::Fatal
        );
        assert_eq!(
            classify(&io::Error::from_raw_os_error(libc::EBUSY)),
            ErrorClass::Fatal
        );
        assert_eq!(
            classify(&io::Error::from_raw_os_error(libc::EINTR)),
            ErrorClass::Transient
        );
        assert_eq!(
            classify(&io::Error::from_raw_os_error(libc::EAGAIN)),
            ErrorClass::Transient
        );
    }

    #[test]
    fn test_classify_kind() {
        assert_eq!(
            classify(&io::Error::from(io::ErrorKind::BrokenPipe)),
            ErrorClass::Fatal
        );
        assert_eq!(
            classify(&io::Error::other("glitch")),
            ErrorClass::Transient
        );
    }
}
