//! 图形后端模块
//!
//! 本模块封装了不同图形 API 的底层实现，包括：
//! - DirectX 12：Windows 平台的原生后端
//! - Headless：不需要 GPU 的软件后端，用于测试与无窗口环境
//!
//! 两个后端都实现了 `backend` 中的能力接口，
//! `renderer` 中的逻辑对它们一视同仁。

pub mod backend;
pub mod headless;
#[cfg(target_os = "windows")]
pub mod dx12;

pub use backend::GraphicsApi;
#[cfg(target_os = "windows")]
pub use dx12::Dx12Api;
pub use headless::HeadlessApi;
