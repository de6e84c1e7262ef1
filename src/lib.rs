//! DistRHI - 轻量渲染硬件接口
//!
//! DistRHI 在 DirectX 12 之上提供一层很薄的渲染硬件接口，
//! 核心是按帧轮转的命令环（`GpuCmdRing`）、fence 与队列同步、
//! 描述符堆与描述符集分配、资源屏障转换以及交换链的获取与呈现。
//! 同一套逻辑也运行在不需要 GPU 的 headless 后端上。
//!
//! # 模块结构
//!
//! - `core`: 核心功能模块（日志、配置、错误处理）
//! - `gfx`: 图形后端（能力接口、DirectX 12、headless）
//! - `renderer`: 与后端无关的 RHI 对象
//!
//! # 使用示例
//!
//! ```no_run
//! use dist_rhi::gfx::HeadlessApi;
//! use dist_rhi::renderer::ring::{GpuCmdRing, GpuCmdRingDesc};
//! use dist_rhi::renderer::sync::QueueDesc;
//! use dist_rhi::renderer::{Renderer, RendererDesc};
//!
//! let renderer = Renderer::<HeadlessApi>::new("demo", &RendererDesc::default(), None)?;
//! let queue = renderer.init_queue(&QueueDesc::default())?;
//! let mut ring = GpuCmdRing::new(&renderer, &queue, &GpuCmdRingDesc::default())?;
//!
//! if let Some(element) = ring.next_element(true, 1) {
//!     element.fence.wait()?;
//!     element.pool.reset()?;
//! }
//! # Ok::<(), dist_rhi::core::DistRhiError>(())
//! ```

pub mod core;
pub mod gfx;
pub mod renderer;
