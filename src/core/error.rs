//! 错误处理模块
//!
//! 定义了 RHI 中使用的统一错误类型，使用 `thiserror` 提供友好的错误消息。
//!
//! # 设计原则
//!
//! - 使用 `thiserror` 自动实现 `Error` trait 与 `From` 转换
//! - 设备级失败（设备、分配器、交换链创建）以 `Err` 返回，不使用空句柄
//! - 容量类错误（描述符堆耗尽、环形缓冲区过小）是可恢复的错误
//! - 误用类错误（在未打开的命令列表上录制等）不在本层检测

use thiserror::Error;

/// RHI 统一的 Result 类型
pub type Result<T> = std::result::Result<T, DistRhiError>;

/// DistRHI 的错误类型
#[derive(Debug, Error)]
pub enum DistRhiError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// 图形 API 错误
    #[error("Graphics error: {0}")]
    Graphics(#[from] GraphicsError),

    /// 容量错误
    #[error("Capacity error: {0}")]
    Capacity(#[from] CapacityError),

    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 日志系统错误
    #[error("Log error: {0}")]
    Log(String),

    /// 初始化错误
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// 参数无效
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// 当前后端未实现的功能
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// 配置相关的错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 配置文件未找到
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    /// 配置文件解析失败
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// 配置值无效
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 图形 API 相关的错误
#[derive(Debug, Error)]
pub enum GraphicsError {
    /// 适配器 / 工厂创建失败
    #[error("Context creation failed: {0}")]
    ContextCreation(String),

    /// 设备创建失败
    #[error("Device creation failed: {0}")]
    DeviceCreation(String),

    /// 交换链错误
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// 着色器编译失败
    #[error("Shader compilation failed: {0}")]
    ShaderCompilation(String),

    /// 资源创建失败
    #[error("Resource creation failed: {0}")]
    ResourceCreation(String),

    /// 渲染命令执行失败
    #[error("Command execution failed: {0}")]
    CommandExecution(String),

    /// Fence 信号或等待失败
    #[error("Synchronization failed: {0}")]
    Synchronization(String),
}

/// 容量相关的错误
///
/// 长时间运行的程序可以预见这类错误，调用方可以选择释放资源后重试。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapacityError {
    /// 描述符堆剩余槽位不足
    #[error("Descriptor heap '{heap}' exhausted: requested {requested}, used {used} of {capacity}")]
    DescriptorHeapExhausted {
        heap: &'static str,
        requested: u32,
        used: u32,
        capacity: u32,
    },

    /// 环形缓冲区容纳不下单次请求
    #[error("Ring buffer too small: requested {requested} bytes, capacity {capacity} bytes")]
    RingBufferTooSmall { requested: u64, capacity: u64 },
}

impl DistRhiError {
    /// 是否为容量错误
    pub fn is_capacity(&self) -> bool {
        matches!(self, DistRhiError::Capacity(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err: DistRhiError = GraphicsError::DeviceCreation("no adapter".into()).into();
        assert_eq!(err.to_string(), "Graphics error: Device creation failed: no adapter");

        let err: DistRhiError = ConfigError::InvalidValue {
            field: "frame.pool_count".into(),
            reason: "must be positive".into(),
        }
        .into();
        assert!(err.to_string().contains("frame.pool_count"));
    }

    #[test]
    fn test_capacity_error() {
        let err: DistRhiError = CapacityError::DescriptorHeapExhausted {
            heap: "cbv_srv_uav",
            requested: 8,
            used: 16380,
            capacity: 16384,
        }
        .into();
        assert!(err.is_capacity());
        assert!(err.to_string().contains("requested 8"));
    }
}
