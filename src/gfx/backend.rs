//! 图形后端的统一抽象接口
//!
//! 本模块定义了所有图形后端（DirectX 12、headless 等）必须实现的能力接口。
//! 命令环、fence 协议、描述符偏移计算和屏障转换都只依赖这些 trait，
//! 因此可以在不同后端之间复用，不需要修改上层逻辑。
//!
//! # 设计原则
//!
//! - `GraphicsApi` 是一组关联类型，每个后端提供一个零大小的标记类型
//! - 原生对象由后端结构体持有，上层只通过 trait 方法访问
//! - 所有创建函数返回 `Result`，失败时携带原生错误信息

use std::fmt::Debug;
use std::ops::BitOr;
use std::ptr::NonNull;

use crate::core::error::Result;
use crate::renderer::barrier::ResourceState;
use crate::renderer::descriptor::{DescriptorHeapDesc, DescriptorHeapType};
use crate::renderer::pipeline::{GraphicsPipelineDesc, PipelineLayoutDesc, ShaderDesc};
use crate::renderer::resource::BufferDesc;
use crate::renderer::swapchain::SwapChainDesc;
use crate::renderer::sync::QueueType;
use crate::renderer::target::RenderTargetDesc;
use crate::renderer::{GpuDesc, RendererContextDesc};

/// 一个图形 API 后端的类型族
pub trait GraphicsApi: Sized + 'static {
    /// 后端名称（用于日志）
    const NAME: &'static str;

    type Context: AdapterContext<Self>;
    type Device: GraphicsDevice<Self>;
    type Queue: CommandQueue<Self>;
    type Fence: NativeFence;
    type CmdAllocator: CommandAllocator;
    type CmdList: CommandList<Self>;
    type DescriptorHeap: DescriptorHeapRaw;
    type Buffer: BufferRaw;
    type RenderTarget: RenderTargetRaw;
    type Shader;
    type PipelineLayout;
    type Pipeline;
    type SwapChain: SwapChainRaw<Self>;

    /// 原生资源状态掩码
    type ResourceStates: Copy + Debug + PartialEq + BitOr<Output = Self::ResourceStates>;

    /// 空状态掩码对应的原生状态
    const COMMON_STATE: Self::ResourceStates;

    /// 单个抽象状态位对应的原生状态
    fn native_state(bit: ResourceState) -> Self::ResourceStates;
}

/// 适配器与工厂，每个进程创建一次
pub trait AdapterContext<A: GraphicsApi>: Sized {
    /// 选择高性能适配器，按需开启调试层
    fn create(desc: &RendererContextDesc) -> Result<Self>;

    /// 在选中的适配器上创建设备
    fn create_device(&self) -> Result<A::Device>;

    /// 适配器信息
    fn gpu_desc(&self) -> &GpuDesc;
}

/// 设备：所有原生对象的创建入口
pub trait GraphicsDevice<A: GraphicsApi> {
    fn create_queue(&self, ty: QueueType) -> Result<A::Queue>;

    fn create_fence(&self, initial_value: u64) -> Result<A::Fence>;

    fn create_cmd_allocator(&self, ty: QueueType) -> Result<A::CmdAllocator>;

    /// 创建的命令列表处于关闭状态
    fn create_cmd_list(&self, ty: QueueType, allocator: &A::CmdAllocator) -> Result<A::CmdList>;

    fn create_descriptor_heap(&self, desc: &DescriptorHeapDesc) -> Result<A::DescriptorHeap>;

    /// 单个描述符的大小（字节）
    fn descriptor_increment_size(&self, ty: DescriptorHeapType) -> u32;

    fn create_buffer(
        &self,
        desc: &BufferDesc,
        heap: MemoryHeap,
        initial_state: A::ResourceStates,
    ) -> Result<A::Buffer>;

    /// 在 `dest` 处写入一个常量缓冲区视图，起点为缓冲区内 `offset` 字节
    fn create_constant_buffer_view(
        &self,
        buffer: &A::Buffer,
        offset: u64,
        size_in_bytes: u32,
        dest: CpuDescriptorHandle,
    );

    fn create_render_target(
        &self,
        desc: &RenderTargetDesc,
        initial_state: A::ResourceStates,
    ) -> Result<A::RenderTarget>;

    fn create_pipeline_layout(&self, desc: &PipelineLayoutDesc) -> Result<A::PipelineLayout>;

    fn create_shader(&self, desc: &ShaderDesc) -> Result<A::Shader>;

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc<'_, A>) -> Result<A::Pipeline>;

    fn create_swap_chain(&self, queue: &A::Queue, desc: &SwapChainDesc) -> Result<A::SwapChain>;
}

/// 命令队列
pub trait CommandQueue<A: GraphicsApi> {
    /// 按提交顺序执行已关闭的命令列表
    fn execute(&self, lists: &[&A::CmdList]) -> Result<()>;

    /// 在队列中排入一次 fence 信号
    fn signal(&self, fence: &A::Fence, value: u64) -> Result<()>;
}

/// 原生 fence
pub trait NativeFence {
    /// 设备报告的已完成值
    fn completed_value(&self) -> u64;

    /// 注册唤醒并阻塞，直到完成值达到 `value`
    fn wait_for(&self, value: u64) -> Result<()>;
}

/// 命令分配器
pub trait CommandAllocator: Clone {
    /// 重置分配器；调用前必须确认 GPU 已执行完毕
    fn reset(&self) -> Result<()>;
}

/// 原生命令列表
pub trait CommandList<A: GraphicsApi> {
    fn reset(&mut self, allocator: &A::CmdAllocator) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    fn set_descriptor_heaps(&mut self, heaps: &[&A::DescriptorHeap]);

    /// 一次原生调用中提交全部屏障
    fn resource_barriers(&mut self, barriers: &[TransitionBarrier<'_, A>]);

    fn set_render_targets(&mut self, colors: &[CpuDescriptorHandle], depth_stencil: Option<CpuDescriptorHandle>);

    fn clear_render_target(&mut self, view: CpuDescriptorHandle, color: [f32; 4]);

    /// 只清除深度
    fn clear_depth(&mut self, view: CpuDescriptorHandle, depth: f32);

    fn set_viewport(&mut self, viewport: Viewport);

    fn set_scissor(&mut self, rect: ScissorRect);

    /// 绑定管线状态、根签名以及三角形列表拓扑
    fn bind_pipeline(&mut self, pipeline: &A::Pipeline);

    fn set_vertex_buffers(&mut self, views: &[VertexBufferView]);

    fn set_root_descriptor_table(&mut self, root_parameter_index: u32, handle: GpuDescriptorHandle);

    fn draw(&mut self, vertex_count: u32, first_vertex: u32);
}

/// 原生描述符堆
pub trait DescriptorHeapRaw {
    fn cpu_start(&self) -> CpuDescriptorHandle;

    /// 仅着色器可见的堆有 GPU 句柄
    fn gpu_start(&self) -> Option<GpuDescriptorHandle>;
}

/// 原生缓冲区
pub trait BufferRaw {
    /// 映射整个缓冲区，返回起始地址
    ///
    /// # Safety
    ///
    /// 返回的指针在 `unmap` 之前有效，且只能访问 `size` 字节。
    unsafe fn map(&self) -> Result<NonNull<u8>>;

    fn unmap(&self);

    fn gpu_address(&self) -> u64;
}

/// 原生渲染目标
pub trait RenderTargetRaw {
    /// RTV 或 DSV 句柄
    fn view(&self) -> CpuDescriptorHandle;
}

/// 原生交换链
pub trait SwapChainRaw<A: GraphicsApi> {
    fn image_count(&self) -> u32;

    /// 当前后备缓冲索引，原生交换链自行轮转
    fn current_image_index(&self) -> u32;

    /// 取出全部后备缓冲的渲染目标
    fn render_targets(&self) -> Result<Vec<A::RenderTarget>>;

    fn present(&self, sync_interval: u32) -> Result<()>;
}

/// 缓冲区所在的内存堆
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryHeap {
    /// 仅 GPU 可访问
    Default,
    /// CPU 写、GPU 读
    Upload,
}

/// CPU 描述符句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CpuDescriptorHandle {
    pub ptr: usize,
}

/// GPU 描述符句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuDescriptorHandle {
    pub ptr: u64,
}

impl CpuDescriptorHandle {
    /// 偏移 `slots` 个描述符
    pub fn offset(self, slots: u32, increment: u32) -> Self {
        Self {
            ptr: self.ptr + slots as usize * increment as usize,
        }
    }
}

impl GpuDescriptorHandle {
    /// 偏移 `slots` 个描述符
    pub fn offset(self, slots: u32, increment: u32) -> Self {
        Self {
            ptr: self.ptr + slots as u64 * increment as u64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

/// 裁剪矩形，右下角不包含
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBufferView {
    pub buffer_location: u64,
    pub size_in_bytes: u32,
    pub stride_in_bytes: u32,
}

/// 屏障作用的资源
pub enum BarrierResource<'a, A: GraphicsApi> {
    Buffer(&'a A::Buffer),
    RenderTarget(&'a A::RenderTarget),
}

/// 已转换为原生状态的过渡屏障
pub struct TransitionBarrier<'a, A: GraphicsApi> {
    pub resource: BarrierResource<'a, A>,
    pub before: A::ResourceStates,
    pub after: A::ResourceStates,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_offset() {
        let cpu = CpuDescriptorHandle { ptr: 1000 };
        assert_eq!(cpu.offset(3, 32).ptr, 1096);

        let gpu = GpuDescriptorHandle { ptr: 1 << 40 };
        assert_eq!(gpu.offset(2, 64).ptr, (1 << 40) + 128);
    }
}
