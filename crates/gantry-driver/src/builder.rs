//! Builder 模式实现
//!
//! 从 [`ControllerConfig`] 组装 [`Controller`]，各协作者都可以单独替换（测试中用于注入模拟实现）。

use crate::config::{ControllerConfig, KernelKind};
use crate::controller::Controller;
use crate::error::DriverError;
use crate::kernel::{MotionKernel, ReplayKernel};
use crate::planner::PlannerAdapter;
use crate::resolver::{FsResolver, PathResolver};
use crate::state::StateStore;
use gantry_link::{Connector, Link, NoReset, ResetLine, SysfsGpio, TtyConnector};
use std::time::Instant;
use tracing::info;

/// Controller Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use gantry_driver::{ControllerBuilder, ControllerConfig};
/// use std::time::Instant;
///
/// let config = ControllerConfig::load("gantry.toml").unwrap();
/// let controller = ControllerBuilder::new(config).build(Instant::now()).unwrap();
/// ```
pub struct ControllerBuilder {
    config: ControllerConfig,
    connector: Option<Box<dyn Connector>>,
    reset_line: Option<Box<dyn ResetLine>>,
    kernel: Option<Box<dyn MotionKernel>>,
    resolver: Option<Box<dyn PathResolver>>,
}

impl ControllerBuilder {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            connector: None,
            reset_line: None,
            kernel: None,
            resolver: None,
        }
    }

    /// 替换串口连接器（默认按 `[link]` 打开 tty）
    pub fn connector(mut self, connector: Box<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// 替换 MCU 复位线（默认按 `link.reset_gpio` 使用 sysfs GPIO）
    pub fn reset_line(mut self, reset_line: Box<dyn ResetLine>) -> Self {
        self.reset_line = Some(reset_line);
        self
    }

    /// 替换运动内核（默认按 `planner.kernel` 选择）
    pub fn kernel(mut self, kernel: Box<dyn MotionKernel>) -> Self {
        self.kernel = Some(kernel);
        self
    }

    /// 替换程序路径解析（默认以 `runtime.upload_dir` 为根）
    pub fn resolver(mut self, resolver: Box<dyn PathResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn build(self, now: Instant) -> Result<Controller, DriverError> {
        let config = self.config;
        let link_config = config.link.link_config()?;
        let firmware_req = config.firmware.requirement()?;

        let kernel: Box<dyn MotionKernel> = match self.kernel {
            Some(kernel) => kernel,
            None => match config.planner.kernel {
                Some(KernelKind::Replay) => Box::new(ReplayKernel::new()),
                None => {
                    return Err(DriverError::KernelUnavailable(
                        "planner.kernel is not configured".to_string(),
                    ));
                },
            },
        };

        let connector: Box<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None => Box::new(TtyConnector::new(
                config.link.device.clone(),
                config.link.baud,
                config.link.rtscts,
            )),
        };

        let reset_line: Box<dyn ResetLine> = match (self.reset_line, config.link.reset_gpio) {
            (Some(reset_line), _) => reset_line,
            (None, Some(pin)) => Box::new(SysfsGpio::new(pin)),
            (None, None) => Box::new(NoReset),
        };

        let resolver: Box<dyn PathResolver> = match self.resolver {
            Some(resolver) => resolver,
            None => Box::new(FsResolver::new(config.runtime.upload_dir.clone())),
        };

        info!("Controller on {}", connector.describe());

        let link = Link::new(connector, reset_line, link_config, now);
        let state = StateStore::new();
        let planner = PlannerAdapter::new(kernel, config.planner, &state);
        Ok(Controller::new(
            link,
            planner,
            state,
            resolver,
            firmware_req,
            config.homing,
        ))
    }
}
