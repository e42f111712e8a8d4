//! 串口实现（termios 原始模式，非阻塞）

use crate::transport::{Connector, Transport};
use nix::sys::termios::{
    self, BaudRate, ControlFlags, FlushArg, SetArg, cfmakeraw, cfsetspeed, tcgetattr, tcsetattr,
};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use tracing::debug;

/// 串口连接器
#[derive(Debug, Clone)]
pub struct TtyConnector {
    path: PathBuf,
    baud: u32,
    rtscts: bool,
}

impl TtyConnector {
    pub fn new(path: impl Into<PathBuf>, baud: u32, rtscts: bool) -> Self {
        Self {
            path: path.into(),
            baud,
            rtscts,
        }
    }
}

fn baud_rate(baud: u32) -> io::Result<BaudRate> {
    Ok(match baud {
        9600 => BaudRate::B9600,
        19200 => BaudRate::B19200,
        38400 => BaudRate::B38400,
        57600 => BaudRate::B57600,
        115200 => BaudRate::B115200,
        230400 => BaudRate::B230400,
        460800 => BaudRate::B460800,
        921600 => BaudRate::B921600,
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Unsupported baud rate: {baud}"),
            ));
        },
    })
}

impl Connector for TtyConnector {
    fn open(&mut self) -> io::Result<Box<dyn Transport>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(&self.path)?;

        let mut attrs = tcgetattr(&file)?;
        cfmakeraw(&mut attrs);
        cfsetspeed(&mut attrs, baud_rate(self.baud)?)?;
        attrs.control_flags.insert(ControlFlags::CLOCAL | ControlFlags::CREAD);
        if self.rtscts {
            attrs.control_flags.insert(ControlFlags::CRTSCTS);
        } else {
            attrs.control_flags.remove(ControlFlags::CRTSCTS);
        }
        tcsetattr(&file, SetArg::TCSANOW, &attrs)?;
        termios::tcflush(&file, FlushArg::TCIOFLUSH)?;

        debug!(
            "Opened {} at {} baud (rtscts={})",
            self.path.display(),
            self.baud,
            self.rtscts
        );
        Ok(Box::new(TtyTransport { file }))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// 已打开的串口
pub struct TtyTransport {
    file: File,
}

impl Transport for TtyTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.file.write(data)
    }

    fn discard_output(&mut self) -> io::Result<()> {
        termios::tcflush(&self.file, FlushArg::TCOFLUSH)?;
        Ok(())
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.file.as_raw_fd())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baud_rate_mapping() {
        assert!(baud_rate(115200).is_ok());
        assert!(baud_rate(230400).is_ok());
        assert_eq!(
            baud_rate(12345).unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
    }

    #[test]
    fn test_open_missing_device() {
        let mut connector = TtyConnector::new("/dev/does-not-exist-gantry", 115200, true);
        assert!(connector.open().is_err());
        assert_eq!(connector.describe(), "/dev/does-not-exist-gantry");
    }
}
