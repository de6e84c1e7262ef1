//! 渲染器模块
//!
//! 本模块是与图形 API 无关的一层：命令环、fence 协议、描述符分配、
//! 屏障转换以及资源对象都写在这里，只通过 `gfx::backend` 中的 trait
//! 访问原生对象，因此同一份逻辑可以运行在 DX12 和 headless 后端上。
//!
//! # 架构设计
//!
//! - `RendererContext`：适配器与工厂，每个进程一个，可在多个渲染器之间共享
//! - `Renderer`：设备以及两个着色器可见的描述符堆
//! - 其他对象（队列、命令池、缓冲区等）由应用持有，drop 即释放
//!
//! # 销毁顺序
//!
//! 先排空队列，再按 描述符堆 → 设备 → 适配器 的顺序释放，
//! `Renderer` 的字段声明顺序即为这个顺序。

use std::sync::Arc;

use crate::core::error::Result;
use crate::gfx::backend::{AdapterContext, GraphicsApi, GraphicsDevice};

pub mod barrier;
pub mod command;
pub mod descriptor;
pub mod pipeline;
pub mod resource;
pub mod ring;
pub mod ring_buffer;
pub mod swapchain;
pub mod sync;
pub mod target;

use descriptor::{DescriptorHeap, DescriptorHeapDesc};
use sync::{Fence, Queue, QueueDesc};

/// 默认 CBV/SRV/UAV 堆容量
pub const DEFAULT_CBV_SRV_UAV_HEAP_SIZE: u32 = 16384;

/// 默认采样器堆容量
pub const DEFAULT_SAMPLER_HEAP_SIZE: u32 = 2048;

/// 设备功能级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum FeatureLevel {
    Level11_0,
    #[default]
    Level12_0,
    Level12_1,
    Level12_2,
}

/// 适配器创建描述
#[derive(Debug, Clone, Copy, Default)]
pub struct RendererContextDesc {
    pub feature_level: FeatureLevel,
    /// 开启调试层与 GPU 验证
    pub enable_gpu_based_validation: bool,
}

/// 适配器信息
#[derive(Debug, Clone, Default)]
pub struct GpuDesc {
    pub name: String,
    pub vendor_id: u32,
    pub device_id: u32,
    pub dedicated_video_memory: u64,
    pub feature_level: FeatureLevel,
}

/// 适配器上下文
pub struct RendererContext<A: GraphicsApi> {
    raw: A::Context,
}

impl<A: GraphicsApi> RendererContext<A> {
    /// 选择适配器并按需开启调试层
    pub fn new(desc: &RendererContextDesc) -> Result<Self> {
        let raw = A::Context::create(desc)?;
        let gpu = raw.gpu_desc();
        crate::rhi_info!(
            "{} adapter selected: {} (vendor {:#06x}, device {:#06x}, {} MB)",
            A::NAME,
            gpu.name,
            gpu.vendor_id,
            gpu.device_id,
            gpu.dedicated_video_memory / (1024 * 1024)
        );
        Ok(Self { raw })
    }

    /// 包装一个已按后端方式配置好的上下文
    pub fn from_raw(raw: A::Context) -> Self {
        Self { raw }
    }

    pub fn gpu_desc(&self) -> &GpuDesc {
        self.raw.gpu_desc()
    }

    pub fn raw(&self) -> &A::Context {
        &self.raw
    }
}

/// 渲染器创建描述
#[derive(Debug, Clone, Copy)]
pub struct RendererDesc {
    /// 未共享上下文时用于创建自己的上下文
    pub context: RendererContextDesc,
    pub cbv_srv_uav_heap_size: u32,
    pub sampler_heap_size: u32,
}

impl Default for RendererDesc {
    fn default() -> Self {
        Self {
            context: RendererContextDesc::default(),
            cbv_srv_uav_heap_size: DEFAULT_CBV_SRV_UAV_HEAP_SIZE,
            sampler_heap_size: DEFAULT_SAMPLER_HEAP_SIZE,
        }
    }
}

/// 渲染器
pub struct Renderer<A: GraphicsApi> {
    pub(crate) cbv_srv_uav_heap: Arc<DescriptorHeap<A>>,
    pub(crate) sampler_heap: Arc<DescriptorHeap<A>>,
    pub(crate) device: A::Device,
    context: Arc<RendererContext<A>>,
    name: String,
}

impl<A: GraphicsApi> Renderer<A> {
    /// 创建渲染器
    ///
    /// 没有传入共享上下文时按 `desc.context` 创建一个。
    pub fn new(name: &str, desc: &RendererDesc, context: Option<Arc<RendererContext<A>>>) -> Result<Self> {
        let context = match context {
            Some(context) => context,
            None => Arc::new(RendererContext::new(&desc.context)?),
        };

        let device = context.raw().create_device()?;
        let cbv_srv_uav_heap = Arc::new(DescriptorHeap::new(
            &device,
            DescriptorHeapDesc::cbv_srv_uav(desc.cbv_srv_uav_heap_size),
        )?);
        let sampler_heap = Arc::new(DescriptorHeap::new(
            &device,
            DescriptorHeapDesc::sampler(desc.sampler_heap_size),
        )?);

        crate::rhi_info!(
            "Renderer '{}' initialized on {} ({} CBV/SRV/UAV, {} sampler descriptors)",
            name,
            A::NAME,
            desc.cbv_srv_uav_heap_size,
            desc.sampler_heap_size
        );

        Ok(Self {
            cbv_srv_uav_heap,
            sampler_heap,
            device,
            context,
            name: name.to_string(),
        })
    }

    /// 释放渲染器
    ///
    /// 调用前应先用 `Queue::wait_idle` 排空所有队列。
    pub fn shutdown(self) {
        let cbv = self.cbv_srv_uav_heap.stats();
        let sampler = self.sampler_heap.stats();
        crate::rhi_info!(
            "Renderer '{}' shut down (descriptors used: {}/{} CBV/SRV/UAV, {}/{} sampler)",
            self.name,
            cbv.used,
            cbv.capacity,
            sampler.used,
            sampler.capacity
        );
    }

    /// 创建 fence，初始值为 0
    pub fn init_fence(&self) -> Result<Fence<A>> {
        Ok(Fence::new(self.device.create_fence(0)?))
    }

    /// 创建命令队列
    pub fn init_queue(&self, desc: &QueueDesc) -> Result<Queue<A>> {
        let raw = self.device.create_queue(desc.ty)?;
        tracing::debug!(queue_type = desc.ty.name(), "Queue created");
        Ok(Queue::new(raw, desc.ty))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &Arc<RendererContext<A>> {
        &self.context
    }

    pub fn gpu_desc(&self) -> &GpuDesc {
        self.context.gpu_desc()
    }

    pub fn cbv_srv_uav_heap(&self) -> &DescriptorHeap<A> {
        &self.cbv_srv_uav_heap
    }

    pub fn sampler_heap(&self) -> &DescriptorHeap<A> {
        &self.sampler_heap
    }

    pub fn device(&self) -> &A::Device {
        &self.device
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use crate::gfx::headless::HeadlessApi;

    pub(crate) fn headless_renderer() -> Renderer<HeadlessApi> {
        Renderer::new("test", &RendererDesc::default(), None).unwrap()
    }

    pub(crate) fn headless_renderer_with_heaps(cbv_srv_uav: u32, sampler: u32) -> Renderer<HeadlessApi> {
        let desc = RendererDesc {
            cbv_srv_uav_heap_size: cbv_srv_uav,
            sampler_heap_size: sampler,
            ..RendererDesc::default()
        };
        Renderer::new("test", &desc, None).unwrap()
    }
}
