//! MCU 复位线
//!
//! `open()` 时先拉低复位线再释放，让 MCU 从已知状态启动。

use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::debug;

/// 抽象复位线
pub trait ResetLine {
    /// 保持复位
    fn assert(&mut self) -> io::Result<()>;

    /// 释放复位
    fn release(&mut self) -> io::Result<()>;
}

/// 无复位线（测试或外部复位的硬件）
#[derive(Debug, Default, Clone, Copy)]
pub struct NoReset;

impl ResetLine for NoReset {
    fn assert(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn release(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// sysfs GPIO 复位线
///
/// 复位时引脚配置为输出低电平；释放时切回输入（高阻），由板上上拉释放复位。
#[derive(Debug, Clone)]
pub struct SysfsGpio {
    root: PathBuf,
    pin: u32,
}

impl SysfsGpio {
    pub fn new(pin: u32) -> Self {
        Self::with_root("/sys/class/gpio", pin)
    }

    pub fn with_root(root: impl Into<PathBuf>, pin: u32) -> Self {
        Self {
            root: root.into(),
            pin,
        }
    }

    fn pin_dir(&self) -> PathBuf {
        self.root.join(format!("gpio{}", self.pin))
    }

    fn export(&self) -> io::Result<()> {
        if !self.pin_dir().exists() {
            fs::write(self.root.join("export"), self.pin.to_string())?;
        }
        Ok(())
    }
}

impl ResetLine for SysfsGpio {
    fn assert(&mut self) -> io::Result<()> {
        self.export()?;
        let dir = self.pin_dir();
        fs::write(dir.join("direction"), "out")?;
        fs::write(dir.join("value"), "0")?;
        debug!("GPIO {} reset asserted", self.pin);
        Ok(())
    }

    fn release(&mut self) -> io::Result<()> {
        self.export()?;
        fs::write(self.pin_dir().join("direction"), "in")?;
        debug!("GPIO {} reset released", self.pin);
        Ok(())
    }
}
