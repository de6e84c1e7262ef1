//! DirectX 12 图形后端
//!
//! 用 `windows` crate 实现 `gfx::backend` 中的全部能力接口：
//! - `context`：DXGI 工厂、适配器选择与调试层
//! - `device`：设备以及缓冲区、渲染目标、根签名、管线、交换链的创建
//! - `command`：命令队列、fence、命令分配器与命令列表
//! - `descriptor`：描述符堆
//! - `convert`：抽象枚举到 D3D12/DXGI 枚举的转换
//!
//! 所有 HRESULT 失败都转换为 `GraphicsError`，不会 panic。

use windows::Win32::Graphics::Direct3D12::*;

use crate::core::error::{DistRhiError, GraphicsError};
use crate::gfx::backend::GraphicsApi;
use crate::renderer::barrier::ResourceState;

pub mod command;
pub mod context;
pub mod convert;
pub mod descriptor;
pub mod device;

pub use command::{Dx12CmdAllocator, Dx12CmdList, Dx12Fence, Dx12Queue};
pub use context::Dx12Context;
pub use descriptor::Dx12DescriptorHeap;
pub use device::{
    Dx12Buffer, Dx12Device, Dx12Pipeline, Dx12PipelineLayout, Dx12RenderTarget, Dx12Shader, Dx12SwapChain,
};

const STATE_TABLE: [(ResourceState, D3D12_RESOURCE_STATES); 8] = [
    (ResourceState::RENDER_TARGET, D3D12_RESOURCE_STATE_RENDER_TARGET),
    (ResourceState::PRESENT, D3D12_RESOURCE_STATE_PRESENT),
    (
        ResourceState::SHADER_RESOURCE,
        D3D12_RESOURCE_STATES(
            D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE.0 | D3D12_RESOURCE_STATE_NON_PIXEL_SHADER_RESOURCE.0,
        ),
    ),
    (
        ResourceState::VERTEX_AND_CONSTANT_BUFFER,
        D3D12_RESOURCE_STATE_VERTEX_AND_CONSTANT_BUFFER,
    ),
    (ResourceState::GENERIC_READ, D3D12_RESOURCE_STATE_GENERIC_READ),
    (ResourceState::DEPTH_WRITE, D3D12_RESOURCE_STATE_DEPTH_WRITE),
    (ResourceState::COPY_DEST, D3D12_RESOURCE_STATE_COPY_DEST),
    (ResourceState::COPY_SOURCE, D3D12_RESOURCE_STATE_COPY_SOURCE),
];

/// DirectX 12 后端类型族
pub struct Dx12Api;

impl GraphicsApi for Dx12Api {
    const NAME: &'static str = "DirectX 12";

    type Context = Dx12Context;
    type Device = Dx12Device;
    type Queue = Dx12Queue;
    type Fence = Dx12Fence;
    type CmdAllocator = Dx12CmdAllocator;
    type CmdList = Dx12CmdList;
    type DescriptorHeap = Dx12DescriptorHeap;
    type Buffer = Dx12Buffer;
    type RenderTarget = Dx12RenderTarget;
    type Shader = Dx12Shader;
    type PipelineLayout = Dx12PipelineLayout;
    type Pipeline = Dx12Pipeline;
    type SwapChain = Dx12SwapChain;

    type ResourceStates = D3D12_RESOURCE_STATES;

    const COMMON_STATE: D3D12_RESOURCE_STATES = D3D12_RESOURCE_STATE_COMMON;

    fn native_state(bit: ResourceState) -> D3D12_RESOURCE_STATES {
        STATE_TABLE
            .iter()
            .find(|(state, _)| *state == bit)
            .map(|(_, native)| *native)
            .unwrap_or(D3D12_RESOURCE_STATE_COMMON)
    }
}

/// 原生对象创建失败
pub(crate) fn creation_error(what: &str, error: windows::core::Error) -> DistRhiError {
    GraphicsError::ResourceCreation(format!("Failed to create {}: {} ({:?})", what, error.message(), error.code()))
        .into()
}

/// 命令录制或提交失败
pub(crate) fn execution_error(what: &str, error: windows::core::Error) -> DistRhiError {
    GraphicsError::CommandExecution(format!("{} failed: {} ({:?})", what, error.message(), error.code())).into()
}

/// fence 或事件操作失败
pub(crate) fn sync_error(what: &str, error: windows::core::Error) -> DistRhiError {
    GraphicsError::Synchronization(format!("{} failed: {} ({:?})", what, error.message(), error.code())).into()
}
