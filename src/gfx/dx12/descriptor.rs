//! DirectX 12 描述符堆
//!
//! 封装 ID3D12DescriptorHeap，只负责创建和报告起始句柄，
//! 槽位分配由 `renderer::descriptor` 负责。

use windows::Win32::Graphics::Direct3D12::*;

use crate::core::error::Result;
use crate::gfx::backend::{CpuDescriptorHandle, DescriptorHeapRaw, GpuDescriptorHandle};
use crate::renderer::descriptor::DescriptorHeapDesc;

use super::{convert, creation_error};

/// DX12 描述符堆
pub struct Dx12DescriptorHeap {
    heap: ID3D12DescriptorHeap,
    cpu_start: usize,
    /// 仅着色器可见的堆
    gpu_start: Option<u64>,
}

// DX12 堆是线程安全的
unsafe impl Send for Dx12DescriptorHeap {}
unsafe impl Sync for Dx12DescriptorHeap {}

impl Dx12DescriptorHeap {
    pub(crate) fn new(device: &ID3D12Device, desc: &DescriptorHeapDesc) -> Result<Self> {
        let flags = if desc.shader_visible {
            D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
        } else {
            D3D12_DESCRIPTOR_HEAP_FLAG_NONE
        };

        let heap_desc = D3D12_DESCRIPTOR_HEAP_DESC {
            Type: convert::descriptor_heap_type(desc.ty),
            NumDescriptors: desc.capacity,
            Flags: flags,
            NodeMask: 0,
        };

        unsafe {
            let heap: ID3D12DescriptorHeap = device
                .CreateDescriptorHeap(&heap_desc)
                .map_err(|e| creation_error(&format!("{} descriptor heap", desc.ty.name()), e))?;

            let cpu_start = heap.GetCPUDescriptorHandleForHeapStart().ptr;
            let gpu_start = desc
                .shader_visible
                .then(|| heap.GetGPUDescriptorHandleForHeapStart().ptr);

            Ok(Self {
                heap,
                cpu_start,
                gpu_start,
            })
        }
    }

    pub fn heap(&self) -> &ID3D12DescriptorHeap {
        &self.heap
    }
}

impl DescriptorHeapRaw for Dx12DescriptorHeap {
    fn cpu_start(&self) -> CpuDescriptorHandle {
        CpuDescriptorHandle { ptr: self.cpu_start }
    }

    fn gpu_start(&self) -> Option<GpuDescriptorHandle> {
        self.gpu_start.map(|ptr| GpuDescriptorHandle { ptr })
    }
}
