//! 字节流抽象
//!
//! 语义：
//! - `read()` / `write()`：非阻塞，无数据或无空间时返回 `WouldBlock`
//! - `discard_output()`：丢弃尚未发出的输出（急停时使用）
//! - `raw_fd()`：供事件循环注册就绪通知；内存实现可以返回 `None`

use std::io;
use std::os::fd::RawFd;

/// 已打开的字节流，由 [`Link`](crate::Link) 独占持有
pub trait Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    fn discard_output(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn raw_fd(&self) -> Option<RawFd> {
        None
    }
}

/// 打开字节流的工厂，每次（重）连接调用一次
pub trait Connector {
    fn open(&mut self) -> io::Result<Box<dyn Transport>>;

    /// 用于日志的设备描述
    fn describe(&self) -> String;
}
