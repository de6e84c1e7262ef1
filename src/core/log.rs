//! 日志系统模块
//!
//! 基于 `tracing` 提供结构化的日志记录功能。
//!
//! RHI 只在创建、销毁和容量失败时输出诊断信息，
//! 逐帧的录制与提交最多记录到 `trace` 级别，日志从不参与控制流。
//!
//! # 使用示例
//!
//! ```no_run
//! use dist_rhi::core::{config::LogLevel, log};
//!
//! // 仅控制台输出
//! log::init_logger(LogLevel::Info, false, None).unwrap();
//!
//! // 结构化日志
//! tracing::info!(pools = 2, cmds = 1, "Ring created");
//! ```

use std::path::Path;

use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use super::config::LogLevel;
use super::error::{DistRhiError, Result};

/// 默认日志文件名
const DEFAULT_LOG_FILE: &str = "distrhi.log";

/// 初始化日志系统
///
/// 每个进程只能成功调用一次；重复调用返回 `DistRhiError::Log`，不会 panic。
///
/// # 参数
///
/// * `level` - 日志级别（`RUST_LOG` 环境变量优先）
/// * `file_output` - 是否同时输出到文件
/// * `log_file_path` - 日志文件路径（可选，默认为 "distrhi.log"）
pub fn init_logger(level: LogLevel, file_output: bool, log_file_path: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_ansi(true);

    let result = if file_output {
        let log_path = log_file_path.unwrap_or(DEFAULT_LOG_FILE);
        let path = Path::new(log_path);
        let directory = path.parent().unwrap_or(Path::new("."));
        let filename = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(DEFAULT_LOG_FILE);

        // 每天滚动
        let file_appender = RollingFileAppender::new(Rotation::DAILY, directory, filename);

        let file_layer = fmt::layer()
            .with_target(true)
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .try_init()
    };

    result.map_err(|e| DistRhiError::Log(e.to_string()))
}

/// RHI 核心日志 - Info 级别
#[macro_export]
macro_rules! rhi_info {
    ($($arg:tt)*) => {
        tracing::info!(target: "distrhi::rhi", $($arg)*)
    };
}

/// RHI 核心日志 - Warn 级别
#[macro_export]
macro_rules! rhi_warn {
    ($($arg:tt)*) => {
        tracing::warn!(target: "distrhi::rhi", $($arg)*)
    };
}

/// RHI 核心日志 - Error 级别
#[macro_export]
macro_rules! rhi_error {
    ($($arg:tt)*) => {
        tracing::error!(target: "distrhi::rhi", $($arg)*)
    };
}

/// RHI 核心日志 - Debug 级别
#[macro_export]
macro_rules! rhi_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "distrhi::rhi", $($arg)*)
    };
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(Level::from(LogLevel::Info), Level::INFO);
        assert_eq!(Level::from(LogLevel::Error), Level::ERROR);
        assert_eq!(LogLevel::Debug.as_filter(), "debug");
    }
}
