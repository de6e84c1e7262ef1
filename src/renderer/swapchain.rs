//! 交换链
//!
//! 原生交换链在每次呈现后自行轮转后备缓冲，`acquire_next_image`
//! 只是把当前索引透传出来，不保证该图像上一次的呈现已经完成。
//! 复用每帧命令资源前仍需通过命令环的 fence 同步。

use raw_window_handle::RawWindowHandle;

use crate::core::error::{DistRhiError, Result};
use crate::gfx::backend::{GraphicsApi, GraphicsDevice, SwapChainRaw};

use super::barrier::ResourceState;
use super::sync::Queue;
use super::target::{ClearValue, ImageFormat, RenderTarget, RenderTargetDesc};
use super::Renderer;

/// 呈现目标
#[derive(Debug, Clone, Copy)]
pub enum SurfaceHandle {
    /// 原生窗口
    Window(RawWindowHandle),
    /// 没有窗口，仅 headless 后端支持
    Offscreen,
}

/// 交换链描述
#[derive(Debug, Clone, Copy)]
pub struct SwapChainDesc {
    pub surface: SurfaceHandle,
    pub width: u32,
    pub height: u32,
    pub image_count: u32,
    pub color_format: ImageFormat,
    pub enable_vsync: bool,
}

/// 交换链
pub struct SwapChain<A: GraphicsApi> {
    render_targets: Vec<RenderTarget<A>>,
    raw: A::SwapChain,
    vsync: bool,
}

impl<A: GraphicsApi> SwapChain<A> {
    /// 当前后备缓冲索引
    pub fn acquire_next_image(&self) -> u32 {
        self.raw.current_image_index()
    }

    pub fn render_target(&self, index: u32) -> Option<&RenderTarget<A>> {
        self.render_targets.get(index as usize)
    }

    pub fn image_count(&self) -> u32 {
        self.render_targets.len() as u32
    }

    pub fn vsync(&self) -> bool {
        self.vsync
    }

    pub fn raw(&self) -> &A::SwapChain {
        &self.raw
    }
}

impl<A: GraphicsApi> Renderer<A> {
    /// 在队列上创建交换链，并为每个后备缓冲包装一个渲染目标
    pub fn init_swap_chain(&self, queue: &Queue<A>, desc: &SwapChainDesc) -> Result<SwapChain<A>> {
        if desc.width == 0 || desc.height == 0 {
            return Err(DistRhiError::InvalidArgument(format!(
                "swapchain extent {}x{} is empty",
                desc.width, desc.height
            )));
        }
        if desc.image_count < 2 {
            return Err(DistRhiError::InvalidArgument(format!(
                "swapchain needs at least 2 images, got {}",
                desc.image_count
            )));
        }
        if desc.color_format.is_depth() || desc.color_format == ImageFormat::Undefined {
            return Err(DistRhiError::InvalidArgument(format!(
                "{:?} is not a presentable format",
                desc.color_format
            )));
        }

        let raw = self.device.create_swap_chain(queue.raw(), desc)?;
        let target_desc = RenderTargetDesc {
            width: desc.width,
            height: desc.height,
            format: desc.color_format,
            clear_value: ClearValue::default(),
            start_state: ResourceState::PRESENT,
        };
        let render_targets: Vec<_> = raw
            .render_targets()?
            .into_iter()
            .map(|rt| RenderTarget::from_raw(rt, target_desc))
            .collect();

        crate::rhi_info!(
            "Swapchain created: {}x{}, {} images, vsync {}",
            desc.width,
            desc.height,
            render_targets.len(),
            desc.enable_vsync
        );

        Ok(SwapChain {
            render_targets,
            raw,
            vsync: desc.enable_vsync,
        })
    }
}
