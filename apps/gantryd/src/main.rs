//! gantryd 主入口
//!
//! 打开 MCU 串口，加载配置中的运动内核，运行事件循环直到 Ctrl+C。

mod singleton;

use anyhow::{Context, Result};
use clap::Parser;
use gantry_driver::{ControllerBuilder, ControllerConfig, Runtime};
use singleton::SingletonLock;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Gantry 运动控制守护进程
#[derive(Parser, Debug)]
#[command(name = "gantryd")]
#[command(about = "Gantry motion controller bridge", long_about = None)]
struct Args {
    /// 配置文件（TOML）
    ///
    /// 默认: `<config_dir>/gantry/gantry.toml`，不存在时使用内置默认值
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 串口设备（覆盖 `link.device`）
    #[arg(long)]
    device: Option<PathBuf>,

    /// 波特率（覆盖 `link.baud`）
    #[arg(long)]
    baud: Option<u32>,

    /// 程序上传目录（覆盖 `runtime.upload_dir`）
    #[arg(long)]
    upload_dir: Option<PathBuf>,

    /// 启动后立即运行的程序（相对上传目录）
    #[arg(long)]
    run: Option<String>,

    /// 日志目录（每日轮转）；不指定时只输出到终端
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// 锁文件路径
    ///
    /// 默认: XDG_RUNTIME_DIR 或系统临时目录下的 `gantryd.lock`
    #[arg(long)]
    lock_file: Option<PathBuf>,

    /// 打印生效配置后退出
    #[arg(long)]
    print_config: bool,
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("gantry").join("gantry.toml"))
}

fn default_lock_file() -> PathBuf {
    dirs::runtime_dir()
        .filter(|dir| dir.exists())
        .unwrap_or_else(std::env::temp_dir)
        .join("gantryd.lock")
}

fn load_config(args: &Args) -> Result<ControllerConfig> {
    let mut config = match &args.config {
        Some(path) => ControllerConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => ControllerConfig::load(&path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => ControllerConfig::default(),
        },
    };

    if let Some(device) = &args.device {
        config.link.device = device.clone();
    }
    if let Some(baud) = args.baud {
        config.link.baud = baud;
    }
    if let Some(upload_dir) = &args.upload_dir {
        config.runtime.upload_dir = upload_dir.clone();
    }
    Ok(config)
}

/// 终端输出 + 可选的每日轮转文件
///
/// 返回的 guard 必须存活到进程退出，否则文件日志会丢失尾部。
fn init_logging(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::from_default_env()
        .add_directive("gantry=info".parse()?)
        .add_directive("operator=info".parse()?);

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log dir {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "gantryd.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Ok(Some(guard))
        },
        None => {
            registry.init();
            Ok(None)
        },
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let _log_guard = init_logging(args.log_dir.as_deref())?;

    let lock_file = args.lock_file.clone().unwrap_or_else(default_lock_file);
    let _lock = SingletonLock::try_lock(&lock_file)
        .with_context(|| format!("Failed to acquire lock {}", lock_file.display()))?;

    info!("gantryd {} starting", env!("CARGO_PKG_VERSION"));
    info!("  Device: {} @ {}", config.link.device.display(), config.link.baud);
    info!("  Upload dir: {}", config.runtime.upload_dir.display());
    info!("  Lock file: {}", lock_file.display());

    let runtime_settings = config.runtime.clone();
    let controller = ControllerBuilder::new(config)
        .build(Instant::now())
        .context("Failed to create controller")?;
    let (runtime, handle) = Runtime::new(controller, &runtime_settings)?;

    let shutdown = handle.clone();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, shutting down");
        let _ = shutdown.shutdown();
    })
    .context("Failed to set signal handler")?;

    if let Some(path) = args.run.clone() {
        let handle = handle.clone();
        std::thread::spawn(move || match handle.start(&path) {
            Ok(()) => info!("Started {}", path),
            Err(e) => error!("Failed to start {}: {}", path, e),
        });
    }

    runtime.run()?;
    info!("gantryd stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gantry.toml");
        std::fs::write(&path, "[link]\ndevice = \"/dev/ttyS1\"\nbaud = 115200\n").unwrap();

        let args = Args::parse_from([
            "gantryd",
            "--config",
            path.to_str().unwrap(),
            "--baud",
            "460800",
            "--upload-dir",
            "/srv/gcode",
        ]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.link.device, PathBuf::from("/dev/ttyS1"));
        assert_eq!(config.link.baud, 460800);
        assert_eq!(config.runtime.upload_dir, PathBuf::from("/srv/gcode"));
    }

    #[test]
    fn test_missing_config_file_is_error() {
        let args = Args::parse_from(["gantryd", "--config", "/nonexistent/gantry.toml"]);
        assert!(load_config(&args).is_err());
    }
}
