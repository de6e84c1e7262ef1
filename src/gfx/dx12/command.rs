//! DirectX 12 队列、fence 与命令列表

use std::mem::ManuallyDrop;

use windows::Win32::Foundation::{CloseHandle, HANDLE, RECT};
use windows::Win32::Graphics::Direct3D::D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::System::Threading::{CreateEventA, WaitForSingleObject, INFINITE};

use crate::core::error::Result;
use crate::gfx::backend::{
    BarrierResource, CommandAllocator, CommandList, CommandQueue, CpuDescriptorHandle, GpuDescriptorHandle,
    NativeFence, ScissorRect, TransitionBarrier, VertexBufferView, Viewport,
};

use super::{execution_error, sync_error, Dx12Api, Dx12DescriptorHeap, Dx12Pipeline};

/// 命令队列
pub struct Dx12Queue {
    queue: ID3D12CommandQueue,
}

unsafe impl Send for Dx12Queue {}
unsafe impl Sync for Dx12Queue {}

impl Dx12Queue {
    pub(crate) fn new(queue: ID3D12CommandQueue) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &ID3D12CommandQueue {
        &self.queue
    }
}

impl CommandQueue<Dx12Api> for Dx12Queue {
    fn execute(&self, lists: &[&Dx12CmdList]) -> Result<()> {
        let lists: Vec<Option<ID3D12CommandList>> = lists.iter().map(|list| Some(list.list.clone().into())).collect();
        unsafe { self.queue.ExecuteCommandLists(&lists) };
        Ok(())
    }

    fn signal(&self, fence: &Dx12Fence, value: u64) -> Result<()> {
        unsafe { self.queue.Signal(&fence.fence, value) }.map_err(|e| sync_error("Signal", e))
    }
}

/// fence 与等待用的事件
pub struct Dx12Fence {
    fence: ID3D12Fence,
    event: HANDLE,
}

unsafe impl Send for Dx12Fence {}
unsafe impl Sync for Dx12Fence {}

impl Dx12Fence {
    pub(crate) fn new(fence: ID3D12Fence) -> Result<Self> {
        let event = unsafe { CreateEventA(None, false, false, None) }.map_err(|e| sync_error("CreateEvent", e))?;
        Ok(Self { fence, event })
    }

    pub fn fence(&self) -> &ID3D12Fence {
        &self.fence
    }
}

impl NativeFence for Dx12Fence {
    fn completed_value(&self) -> u64 {
        unsafe { self.fence.GetCompletedValue() }
    }

    fn wait_for(&self, value: u64) -> Result<()> {
        unsafe {
            if self.fence.GetCompletedValue() >= value {
                return Ok(());
            }
            self.fence
                .SetEventOnCompletion(value, self.event)
                .map_err(|e| sync_error("SetEventOnCompletion", e))?;
            WaitForSingleObject(self.event, INFINITE);
        }
        Ok(())
    }
}

impl Drop for Dx12Fence {
    fn drop(&mut self) {
        if let Err(e) = unsafe { CloseHandle(self.event) } {
            tracing::warn!("Failed to close fence event: {}", e.message());
        }
    }
}

/// 命令分配器
#[derive(Clone)]
pub struct Dx12CmdAllocator {
    allocator: ID3D12CommandAllocator,
}

unsafe impl Send for Dx12CmdAllocator {}
unsafe impl Sync for Dx12CmdAllocator {}

impl Dx12CmdAllocator {
    pub(crate) fn new(allocator: ID3D12CommandAllocator) -> Self {
        Self { allocator }
    }

    pub fn allocator(&self) -> &ID3D12CommandAllocator {
        &self.allocator
    }
}

impl CommandAllocator for Dx12CmdAllocator {
    fn reset(&self) -> Result<()> {
        unsafe { self.allocator.Reset() }.map_err(|e| execution_error("ID3D12CommandAllocator::Reset", e))
    }
}

/// 图形命令列表
pub struct Dx12CmdList {
    list: ID3D12GraphicsCommandList,
}

unsafe impl Send for Dx12CmdList {}

impl Dx12CmdList {
    pub(crate) fn new(list: ID3D12GraphicsCommandList) -> Self {
        Self { list }
    }

    pub fn list(&self) -> &ID3D12GraphicsCommandList {
        &self.list
    }
}

fn cpu_handle(handle: CpuDescriptorHandle) -> D3D12_CPU_DESCRIPTOR_HANDLE {
    D3D12_CPU_DESCRIPTOR_HANDLE { ptr: handle.ptr }
}

impl CommandList<Dx12Api> for Dx12CmdList {
    fn reset(&mut self, allocator: &Dx12CmdAllocator) -> Result<()> {
        unsafe { self.list.Reset(&allocator.allocator, None) }
            .map_err(|e| execution_error("ID3D12GraphicsCommandList::Reset", e))
    }

    fn close(&mut self) -> Result<()> {
        unsafe { self.list.Close() }.map_err(|e| execution_error("ID3D12GraphicsCommandList::Close", e))
    }

    fn set_descriptor_heaps(&mut self, heaps: &[&Dx12DescriptorHeap]) {
        let heaps: Vec<Option<ID3D12DescriptorHeap>> = heaps.iter().map(|heap| Some(heap.heap().clone())).collect();
        unsafe { self.list.SetDescriptorHeaps(&heaps) };
    }

    fn resource_barriers(&mut self, barriers: &[TransitionBarrier<'_, Dx12Api>]) {
        let native: Vec<D3D12_RESOURCE_BARRIER> = barriers
            .iter()
            .map(|barrier| {
                let resource = match barrier.resource {
                    BarrierResource::Buffer(buffer) => buffer.resource().clone(),
                    BarrierResource::RenderTarget(target) => target.resource().clone(),
                };
                D3D12_RESOURCE_BARRIER {
                    Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
                    Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
                    Anonymous: D3D12_RESOURCE_BARRIER_0 {
                        Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                            pResource: ManuallyDrop::new(Some(resource)),
                            Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                            StateBefore: barrier.before,
                            StateAfter: barrier.after,
                        }),
                    },
                }
            })
            .collect();

        unsafe {
            self.list.ResourceBarrier(&native);
            // 释放屏障持有的资源引用
            for barrier in native {
                let transition = ManuallyDrop::into_inner(barrier.Anonymous.Transition);
                drop(ManuallyDrop::into_inner(transition.pResource));
            }
        }
    }

    fn set_render_targets(&mut self, colors: &[CpuDescriptorHandle], depth_stencil: Option<CpuDescriptorHandle>) {
        let colors: Vec<D3D12_CPU_DESCRIPTOR_HANDLE> = colors.iter().copied().map(cpu_handle).collect();
        let depth_stencil = depth_stencil.map(cpu_handle);
        unsafe {
            self.list.OMSetRenderTargets(
                colors.len() as u32,
                (!colors.is_empty()).then(|| colors.as_ptr()),
                false,
                depth_stencil.as_ref().map(|handle| handle as *const _),
            );
        }
    }

    fn clear_render_target(&mut self, view: CpuDescriptorHandle, color: [f32; 4]) {
        unsafe { self.list.ClearRenderTargetView(cpu_handle(view), &color, None) };
    }

    fn clear_depth(&mut self, view: CpuDescriptorHandle, depth: f32) {
        unsafe {
            self.list
                .ClearDepthStencilView(cpu_handle(view), D3D12_CLEAR_FLAG_DEPTH, depth, 0, None);
        }
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        let viewport = D3D12_VIEWPORT {
            TopLeftX: viewport.x,
            TopLeftY: viewport.y,
            Width: viewport.width,
            Height: viewport.height,
            MinDepth: viewport.min_depth,
            MaxDepth: viewport.max_depth,
        };
        unsafe { self.list.RSSetViewports(&[viewport]) };
    }

    fn set_scissor(&mut self, rect: ScissorRect) {
        let rect = RECT {
            left: rect.left,
            top: rect.top,
            right: rect.right,
            bottom: rect.bottom,
        };
        unsafe { self.list.RSSetScissorRects(&[rect]) };
    }

    fn bind_pipeline(&mut self, pipeline: &Dx12Pipeline) {
        unsafe {
            self.list.SetGraphicsRootSignature(pipeline.root_signature());
            self.list.SetPipelineState(pipeline.pso());
            self.list.IASetPrimitiveTopology(D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
        }
    }

    fn set_vertex_buffers(&mut self, views: &[VertexBufferView]) {
        let views: Vec<D3D12_VERTEX_BUFFER_VIEW> = views
            .iter()
            .map(|view| D3D12_VERTEX_BUFFER_VIEW {
                BufferLocation: view.buffer_location,
                SizeInBytes: view.size_in_bytes,
                StrideInBytes: view.stride_in_bytes,
            })
            .collect();
        unsafe { self.list.IASetVertexBuffers(0, Some(&views)) };
    }

    fn set_root_descriptor_table(&mut self, root_parameter_index: u32, handle: GpuDescriptorHandle) {
        unsafe {
            self.list
                .SetGraphicsRootDescriptorTable(root_parameter_index, D3D12_GPU_DESCRIPTOR_HANDLE { ptr: handle.ptr });
        }
    }

    fn draw(&mut self, vertex_count: u32, first_vertex: u32) {
        unsafe { self.list.DrawInstanced(vertex_count, 1, first_vertex, 0) };
    }
}
