//! Headless 图形后端
//!
//! 不需要 GPU 的软件实现：命令列表只记录命令，缓冲区是主机内存，
//! fence 由一条可配置的“时间线”推进。它实现了与 DX12 后端相同的能力接口，
//! 因此命令环、fence 协议和描述符计算可以在任何平台上运行和测试。
//!
//! # 完成模式
//!
//! - `Immediate`：信号立即完成
//! - `Deferred`：信号挂起，直到调用 `retire` / `retire_all`
//! - `Latency(d)`：后台线程在提交 `d` 之后完成信号，模拟 GPU 延迟

use std::time::Duration;

use bitflags::bitflags;

use crate::core::error::Result;
use crate::gfx::backend::{AdapterContext, GraphicsApi};
use crate::renderer::barrier::ResourceState;
use crate::renderer::{GpuDesc, RendererContextDesc};

mod command;
mod device;
mod queue;

pub use command::{HeadlessCmdAllocator, HeadlessCmdList, RecordedBarrier, RecordedCommand};
pub use device::{
    ConstantBufferView, HeadlessBuffer, HeadlessDescriptorHeap, HeadlessDevice, HeadlessPipeline,
    HeadlessPipelineLayout, HeadlessRenderTarget, HeadlessShader, HeadlessSwapChain,
};
pub use queue::{HeadlessFence, HeadlessQueue};

bitflags! {
    /// 原生资源状态，取值与 D3D12_RESOURCE_STATES 相同
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HeadlessState: u32 {
        const COMMON = 0;
        const VERTEX_AND_CONSTANT_BUFFER = 0x1;
        const INDEX_BUFFER = 0x2;
        const RENDER_TARGET = 0x4;
        const DEPTH_WRITE = 0x10;
        const NON_PIXEL_SHADER_RESOURCE = 0x40;
        const PIXEL_SHADER_RESOURCE = 0x80;
        const INDIRECT_ARGUMENT = 0x200;
        const COPY_DEST = 0x400;
        const COPY_SOURCE = 0x800;
        const GENERIC_READ = 0x1 | 0x2 | 0x40 | 0x80 | 0x200 | 0x800;
        const PRESENT = 0;
    }
}

const STATE_TABLE: [(ResourceState, HeadlessState); 8] = [
    (ResourceState::RENDER_TARGET, HeadlessState::RENDER_TARGET),
    (ResourceState::PRESENT, HeadlessState::PRESENT),
    (
        ResourceState::SHADER_RESOURCE,
        HeadlessState::PIXEL_SHADER_RESOURCE.union(HeadlessState::NON_PIXEL_SHADER_RESOURCE),
    ),
    (ResourceState::VERTEX_AND_CONSTANT_BUFFER, HeadlessState::VERTEX_AND_CONSTANT_BUFFER),
    (ResourceState::GENERIC_READ, HeadlessState::GENERIC_READ),
    (ResourceState::DEPTH_WRITE, HeadlessState::DEPTH_WRITE),
    (ResourceState::COPY_DEST, HeadlessState::COPY_DEST),
    (ResourceState::COPY_SOURCE, HeadlessState::COPY_SOURCE),
];

/// Headless 后端类型族
pub struct HeadlessApi;

impl GraphicsApi for HeadlessApi {
    const NAME: &'static str = "Headless";

    type Context = HeadlessContext;
    type Device = HeadlessDevice;
    type Queue = HeadlessQueue;
    type Fence = HeadlessFence;
    type CmdAllocator = HeadlessCmdAllocator;
    type CmdList = HeadlessCmdList;
    type DescriptorHeap = HeadlessDescriptorHeap;
    type Buffer = HeadlessBuffer;
    type RenderTarget = HeadlessRenderTarget;
    type Shader = HeadlessShader;
    type PipelineLayout = HeadlessPipelineLayout;
    type Pipeline = HeadlessPipeline;
    type SwapChain = HeadlessSwapChain;

    type ResourceStates = HeadlessState;

    const COMMON_STATE: HeadlessState = HeadlessState::COMMON;

    fn native_state(bit: ResourceState) -> HeadlessState {
        STATE_TABLE
            .iter()
            .find(|(state, _)| *state == bit)
            .map(|(_, native)| *native)
            .unwrap_or(HeadlessState::COMMON)
    }
}

/// 信号完成方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeadlessCompletion {
    #[default]
    Immediate,
    Deferred,
    Latency(Duration),
}

/// Headless 设备选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadlessOptions {
    /// 新建队列的完成方式
    pub completion: HeadlessCompletion,
    /// 所有堆类型的描述符大小
    pub descriptor_increment: u32,
}

impl Default for HeadlessOptions {
    fn default() -> Self {
        Self {
            completion: HeadlessCompletion::Immediate,
            descriptor_increment: 32,
        }
    }
}

/// Headless 适配器上下文
pub struct HeadlessContext {
    options: HeadlessOptions,
    gpu: GpuDesc,
}

impl HeadlessContext {
    pub fn with_options(options: HeadlessOptions) -> Self {
        Self {
            options,
            gpu: GpuDesc {
                name: "DistRhi Headless Adapter".to_string(),
                ..GpuDesc::default()
            },
        }
    }

    pub fn options(&self) -> &HeadlessOptions {
        &self.options
    }
}

impl AdapterContext<HeadlessApi> for HeadlessContext {
    fn create(desc: &RendererContextDesc) -> Result<Self> {
        let mut context = Self::with_options(HeadlessOptions::default());
        context.gpu.feature_level = desc.feature_level;
        if desc.enable_gpu_based_validation {
            tracing::debug!("GPU based validation has no effect on the headless backend");
        }
        Ok(context)
    }

    fn create_device(&self) -> Result<HeadlessDevice> {
        Ok(HeadlessDevice::new(self.options))
    }

    fn gpu_desc(&self) -> &GpuDesc {
        &self.gpu
    }
}
