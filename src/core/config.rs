//! 配置管理模块
//!
//! 提供 RHI 驱动程序配置的加载、解析和管理功能。
//! 支持从 TOML 配置文件加载，也支持命令行参数覆盖。
//!
//! # 配置文件格式 (config.toml)
//!
//! ```toml
//! [renderer]
//! name = "DistRHI"
//! backend = "headless"          # 或 "dx12"
//! enable_gpu_based_validation = false
//! cbv_srv_uav_heap_size = 16384
//! sampler_heap_size = 2048
//!
//! [frame]
//! pool_count = 2                # 同时在飞的帧数
//! cmd_per_pool_count = 1
//! frame_count = 120
//!
//! [swapchain]
//! width = 800
//! height = 600
//! image_count = 2
//! vsync = true
//!
//! [headless]
//! gpu_latency_ms = 2
//! descriptor_increment = 32
//!
//! [logging]
//! level = "info"
//! file_output = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::{ConfigError, Result};
use crate::renderer::ring::{MAX_GPU_CMDS_PER_POOL, MAX_GPU_CMD_POOLS_PER_RING};

/// 驱动程序配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// 渲染器配置
    #[serde(default)]
    pub renderer: RendererConfig,

    /// 帧循环配置
    #[serde(default)]
    pub frame: FrameConfig,

    /// 交换链配置
    #[serde(default)]
    pub swapchain: SwapChainConfig,

    /// headless 后端配置
    #[serde(default)]
    pub headless: HeadlessConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 渲染器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    /// 渲染器名称（用于日志）
    #[serde(default = "default_name")]
    pub name: String,

    /// 图形后端选择
    #[serde(default = "default_backend")]
    pub backend: GraphicsBackend,

    /// 是否开启调试层
    #[serde(default)]
    pub enable_gpu_based_validation: bool,

    /// CBV/SRV/UAV 堆容量
    #[serde(default = "default_cbv_srv_uav_heap_size")]
    pub cbv_srv_uav_heap_size: u32,

    /// 采样器堆容量
    #[serde(default = "default_sampler_heap_size")]
    pub sampler_heap_size: u32,
}

/// 帧循环配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameConfig {
    /// 命令环中的池数量（同时在飞的帧数）
    #[serde(default = "default_pool_count")]
    pub pool_count: u32,

    /// 每个池中的命令列表数量
    #[serde(default = "default_cmd_per_pool_count")]
    pub cmd_per_pool_count: u32,

    /// 驱动程序运行的帧数
    #[serde(default = "default_frame_count")]
    pub frame_count: u32,
}

/// 交换链配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapChainConfig {
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    /// 后备缓冲数量
    #[serde(default = "default_image_count")]
    pub image_count: u32,

    /// 垂直同步
    #[serde(default = "default_vsync")]
    pub vsync: bool,
}

/// headless 后端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadlessConfig {
    /// 模拟 GPU 完成一次提交所需的时间（毫秒），0 表示立即完成
    #[serde(default = "default_gpu_latency_ms")]
    pub gpu_latency_ms: u64,

    /// 模拟的描述符大小
    #[serde(default = "default_descriptor_increment")]
    pub descriptor_increment: u32,
}

/// 图形后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphicsBackend {
    /// 软件模拟后端，不需要 GPU
    Headless,
    /// DirectX 12 后端（仅 Windows）
    Dx12,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件路径
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

// 默认值函数
fn default_name() -> String { "DistRHI".to_string() }
fn default_backend() -> GraphicsBackend { GraphicsBackend::Headless }
fn default_cbv_srv_uav_heap_size() -> u32 { 16384 }
fn default_sampler_heap_size() -> u32 { 2048 }
fn default_pool_count() -> u32 { 2 }
fn default_cmd_per_pool_count() -> u32 { 1 }
fn default_frame_count() -> u32 { 120 }
fn default_width() -> u32 { 800 }
fn default_height() -> u32 { 600 }
fn default_image_count() -> u32 { 2 }
fn default_vsync() -> bool { true }
fn default_gpu_latency_ms() -> u64 { 2 }
fn default_descriptor_increment() -> u32 { 32 }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_log_file() -> String { "distrhi.log".to_string() }

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            backend: default_backend(),
            enable_gpu_based_validation: false,
            cbv_srv_uav_heap_size: default_cbv_srv_uav_heap_size(),
            sampler_heap_size: default_sampler_heap_size(),
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            pool_count: default_pool_count(),
            cmd_per_pool_count: default_cmd_per_pool_count(),
            frame_count: default_frame_count(),
        }
    }
}

impl Default for SwapChainConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            image_count: default_image_count(),
            vsync: default_vsync(),
        }
    }
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            gpu_latency_ms: default_gpu_latency_ms(),
            descriptor_increment: default_descriptor_increment(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_file: default_log_file(),
        }
    }
}

impl Config {
    /// 从配置文件加载
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path_str.clone()))?;

        Self::from_toml_str(&contents)
    }

    /// 从 TOML 字符串解析
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()).into())
    }

    /// 从配置文件加载，如果文件不存在或无法解析则使用默认配置
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// 从命令行参数覆盖配置
    ///
    /// 支持的参数：
    /// - `--dx12` / `--headless`: 选择图形后端
    /// - `--frames <n>`: 运行的帧数
    /// - `--pools <n>`: 命令环中的池数量
    /// - `--cmds <n>`: 每个池的命令列表数量
    /// - `--latency-ms <n>`: headless 后端模拟的 GPU 延迟
    /// - `--validation`: 开启调试层
    pub fn apply_args<I>(&mut self, args: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();

        if args.iter().any(|a| a == "--dx12") {
            self.renderer.backend = GraphicsBackend::Dx12;
        }
        if args.iter().any(|a| a == "--headless") {
            self.renderer.backend = GraphicsBackend::Headless;
        }
        if args.iter().any(|a| a == "--validation") {
            self.renderer.enable_gpu_based_validation = true;
        }

        if let Some(frames) = parse_flag(&args, "--frames") {
            self.frame.frame_count = frames;
        }
        if let Some(pools) = parse_flag(&args, "--pools") {
            self.frame.pool_count = pools;
        }
        if let Some(cmds) = parse_flag(&args, "--cmds") {
            self.frame.cmd_per_pool_count = cmds;
        }
        if let Some(latency) = parse_flag(&args, "--latency-ms") {
            self.headless.gpu_latency_ms = latency;
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.frame.pool_count == 0 || self.frame.pool_count > MAX_GPU_CMD_POOLS_PER_RING {
            return Err(invalid(
                "frame.pool_count",
                format!("must be in 1..={}", MAX_GPU_CMD_POOLS_PER_RING),
            ));
        }

        if self.frame.cmd_per_pool_count == 0 || self.frame.cmd_per_pool_count > MAX_GPU_CMDS_PER_POOL {
            return Err(invalid(
                "frame.cmd_per_pool_count",
                format!("must be in 1..={}", MAX_GPU_CMDS_PER_POOL),
            ));
        }

        if self.renderer.cbv_srv_uav_heap_size == 0 || self.renderer.sampler_heap_size == 0 {
            return Err(invalid(
                "renderer.*_heap_size",
                "descriptor heap sizes must be greater than 0".to_string(),
            ));
        }

        if self.swapchain.width == 0 || self.swapchain.height == 0 {
            return Err(invalid(
                "swapchain.width/height",
                "dimensions must be greater than 0".to_string(),
            ));
        }

        if !(2..=16).contains(&self.swapchain.image_count) {
            return Err(invalid(
                "swapchain.image_count",
                "must be in 2..=16".to_string(),
            ));
        }

        if self.headless.descriptor_increment == 0 {
            return Err(invalid(
                "headless.descriptor_increment",
                "must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_flag<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    let idx = args.iter().position(|a| a == flag)?;
    args.get(idx + 1)?.parse().ok()
}

fn invalid(field: &str, reason: String) -> super::error::DistRhiError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason,
    }
    .into()
}

impl GraphicsBackend {
    /// 获取后端名称
    pub fn name(&self) -> &'static str {
        match self {
            GraphicsBackend::Headless => "Headless",
            GraphicsBackend::Dx12 => "DirectX 12",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.frame.pool_count, 2);
        assert_eq!(config.frame.cmd_per_pool_count, 1);
        assert_eq!(config.renderer.cbv_srv_uav_heap_size, 16384);
        assert_eq!(config.renderer.sampler_heap_size, 2048);
        assert_eq!(config.renderer.backend, GraphicsBackend::Headless);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.frame.pool_count = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.frame.pool_count = MAX_GPU_CMD_POOLS_PER_RING + 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.frame.cmd_per_pool_count = MAX_GPU_CMDS_PER_POOL + 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.swapchain.image_count = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = Config::from_toml_str(
            r#"
            [frame]
            pool_count = 3

            [renderer]
            backend = "dx12"
            "#,
        )
        .unwrap();
        assert_eq!(config.frame.pool_count, 3);
        assert_eq!(config.frame.cmd_per_pool_count, 1);
        assert_eq!(config.renderer.backend, GraphicsBackend::Dx12);
        assert_eq!(config.swapchain.width, 800);
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        config.apply_args(["dist_rhi", "--dx12", "--frames", "10", "--pools", "3", "--latency-ms", "0"]);
        assert_eq!(config.renderer.backend, GraphicsBackend::Dx12);
        assert_eq!(config.frame.frame_count, 10);
        assert_eq!(config.frame.pool_count, 3);
        assert_eq!(config.headless.gpu_latency_ms, 0);

        // 无法解析的值保持原样
        config.apply_args(["--cmds", "many"]);
        assert_eq!(config.frame.cmd_per_pool_count, 1);
    }

    #[test]
    fn test_config_from_missing_file() {
        assert!(Config::from_file("definitely/not/here.toml").is_err());
        let config = Config::from_file_or_default("definitely/not/here.toml");
        assert_eq!(config.frame.pool_count, 2);
    }
}
