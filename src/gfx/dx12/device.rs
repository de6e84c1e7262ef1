//! DirectX 12 设备与资源
//!
//! 设备是所有原生对象的创建入口。缓冲区、渲染目标等资源都使用
//! 提交资源（CreateCommittedResource），每个渲染目标持有自己的小 RTV/DSV 堆。

use std::ffi::CString;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

use raw_window_handle::RawWindowHandle;
use windows::core::{Interface, PCSTR};
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Direct3D::Fxc::{D3DCompile, D3DCOMPILE_DEBUG, D3DCOMPILE_SKIP_OPTIMIZATION};
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;

use crate::core::error::{DistRhiError, GraphicsError, Result};
use crate::gfx::backend::{
    BufferRaw, CpuDescriptorHandle, GraphicsDevice, MemoryHeap, RenderTargetRaw, SwapChainRaw,
};
use crate::renderer::descriptor::{DescriptorHeapDesc, DescriptorHeapType};
use crate::renderer::pipeline::{
    GraphicsPipelineDesc, PipelineLayoutDesc, RootParameterKind, ShaderDesc, ShaderSource,
};
use crate::renderer::resource::BufferDesc;
use crate::renderer::swapchain::{SurfaceHandle, SwapChainDesc};
use crate::renderer::sync::QueueType;
use crate::renderer::target::{ClearValue, RenderTargetDesc};

use super::command::{Dx12CmdAllocator, Dx12CmdList, Dx12Fence, Dx12Queue};
use super::{convert, creation_error, execution_error, Dx12Api, Dx12DescriptorHeap};

/// D3D12 设备
pub struct Dx12Device {
    device: ID3D12Device,
    factory: IDXGIFactory4,
}

// D3D12 设备是自由线程的
unsafe impl Send for Dx12Device {}
unsafe impl Sync for Dx12Device {}

fn set_name(object: &ID3D12Object, name: &str) {
    let wide: Vec<u16> = name.encode_utf16().chain(Some(0)).collect();
    let _ = unsafe { object.SetName(windows::core::PCWSTR(wide.as_ptr())) };
}

fn buffer_resource_desc(size: u64) -> D3D12_RESOURCE_DESC {
    D3D12_RESOURCE_DESC {
        Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
        Width: size,
        Height: 1,
        DepthOrArraySize: 1,
        MipLevels: 1,
        SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
        Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
        ..Default::default()
    }
}

/// 读取编译器或序列化器输出的错误信息
fn blob_message(blob: &Option<ID3DBlob>) -> String {
    match blob {
        Some(blob) => unsafe {
            let bytes = std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize());
            String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string()
        },
        None => String::new(),
    }
}

fn blob_bytes(blob: &ID3DBlob) -> Vec<u8> {
    unsafe { std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize()).to_vec() }
}

fn compile_stage(name: &str, source: &str, entry: &str, target: &str) -> Result<Vec<u8>> {
    let entry_c = CString::new(entry)
        .map_err(|_| DistRhiError::InvalidArgument(format!("shader entry '{}' contains a NUL byte", entry)))?;
    let target_c = CString::new(target)
        .map_err(|_| DistRhiError::InvalidArgument(format!("shader target '{}' contains a NUL byte", target)))?;

    let flags = if cfg!(debug_assertions) {
        D3DCOMPILE_DEBUG | D3DCOMPILE_SKIP_OPTIMIZATION
    } else {
        0
    };

    let mut code: Option<ID3DBlob> = None;
    let mut errors: Option<ID3DBlob> = None;
    let result = unsafe {
        D3DCompile(
            source.as_ptr() as _,
            source.len(),
            None,
            None,
            None,
            PCSTR(entry_c.as_ptr() as *const u8),
            PCSTR(target_c.as_ptr() as *const u8),
            flags,
            0,
            &mut code,
            Some(&mut errors),
        )
    };

    if let Err(e) = result {
        let message = blob_message(&errors);
        return Err(GraphicsError::ShaderCompilation(format!(
            "{} ({}:{}): {}",
            name,
            entry,
            target,
            if message.is_empty() { e.message().to_string() } else { message }
        ))
        .into());
    }

    code.map(|blob| blob_bytes(&blob)).ok_or_else(|| {
        GraphicsError::ShaderCompilation(format!("{} ({}): compiler returned no bytecode", name, entry)).into()
    })
}

impl Dx12Device {
    pub(crate) fn new(device: ID3D12Device, factory: IDXGIFactory4) -> Self {
        Self { device, factory }
    }

    pub fn device(&self) -> &ID3D12Device {
        &self.device
    }

    fn view_heap(&self, ty: DescriptorHeapType, count: u32) -> Result<ID3D12DescriptorHeap> {
        let desc = D3D12_DESCRIPTOR_HEAP_DESC {
            Type: convert::descriptor_heap_type(ty),
            NumDescriptors: count,
            Flags: D3D12_DESCRIPTOR_HEAP_FLAG_NONE,
            NodeMask: 0,
        };
        unsafe { self.device.CreateDescriptorHeap(&desc) }
            .map_err(|e| creation_error(&format!("{} heap", ty.name()), e))
    }
}

impl GraphicsDevice<Dx12Api> for Dx12Device {
    fn create_queue(&self, ty: QueueType) -> Result<Dx12Queue> {
        let desc = D3D12_COMMAND_QUEUE_DESC {
            Type: convert::command_list_type(ty),
            Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
            ..Default::default()
        };
        let queue: ID3D12CommandQueue = unsafe { self.device.CreateCommandQueue(&desc) }
            .map_err(|e| creation_error("command queue", e))?;
        Ok(Dx12Queue::new(queue))
    }

    fn create_fence(&self, initial_value: u64) -> Result<Dx12Fence> {
        let fence: ID3D12Fence = unsafe { self.device.CreateFence(initial_value, D3D12_FENCE_FLAG_NONE) }
            .map_err(|e| creation_error("fence", e))?;
        Dx12Fence::new(fence)
    }

    fn create_cmd_allocator(&self, ty: QueueType) -> Result<Dx12CmdAllocator> {
        let allocator: ID3D12CommandAllocator =
            unsafe { self.device.CreateCommandAllocator(convert::command_list_type(ty)) }
                .map_err(|e| creation_error("command allocator", e))?;
        Ok(Dx12CmdAllocator::new(allocator))
    }

    fn create_cmd_list(&self, ty: QueueType, allocator: &Dx12CmdAllocator) -> Result<Dx12CmdList> {
        unsafe {
            let list: ID3D12GraphicsCommandList = self
                .device
                .CreateCommandList(0, convert::command_list_type(ty), allocator.allocator(), None)
                .map_err(|e| creation_error("command list", e))?;
            // 新建的命令列表处于打开状态，先关闭
            list.Close().map_err(|e| execution_error("initial Close", e))?;
            Ok(Dx12CmdList::new(list))
        }
    }

    fn create_descriptor_heap(&self, desc: &DescriptorHeapDesc) -> Result<Dx12DescriptorHeap> {
        Dx12DescriptorHeap::new(&self.device, desc)
    }

    fn descriptor_increment_size(&self, ty: DescriptorHeapType) -> u32 {
        unsafe {
            self.device
                .GetDescriptorHandleIncrementSize(convert::descriptor_heap_type(ty))
        }
    }

    fn create_buffer(&self, desc: &BufferDesc, heap: MemoryHeap, initial_state: D3D12_RESOURCE_STATES) -> Result<Dx12Buffer> {
        let heap_props = D3D12_HEAP_PROPERTIES {
            Type: match heap {
                MemoryHeap::Default => D3D12_HEAP_TYPE_DEFAULT,
                MemoryHeap::Upload => D3D12_HEAP_TYPE_UPLOAD,
            },
            ..Default::default()
        };
        let resource_desc = buffer_resource_desc(desc.size);

        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            self.device.CreateCommittedResource(
                &heap_props,
                D3D12_HEAP_FLAG_NONE,
                &resource_desc,
                initial_state,
                None,
                &mut resource,
            )
        }
        .map_err(|e| creation_error("buffer", e))?;
        let resource = resource
            .ok_or_else(|| DistRhiError::Graphics(GraphicsError::ResourceCreation("buffer was not returned".to_string())))?;

        if let Some(name) = &desc.name {
            if let Ok(object) = resource.cast::<ID3D12Object>() {
                set_name(&object, name);
            }
        }

        let gpu_address = unsafe { resource.GetGPUVirtualAddress() };
        Ok(Dx12Buffer {
            resource,
            heap,
            gpu_address,
        })
    }

    fn create_constant_buffer_view(
        &self,
        buffer: &Dx12Buffer,
        offset: u64,
        size_in_bytes: u32,
        dest: CpuDescriptorHandle,
    ) {
        let desc = D3D12_CONSTANT_BUFFER_VIEW_DESC {
            BufferLocation: buffer.gpu_address + offset,
            SizeInBytes: size_in_bytes,
        };
        unsafe {
            self.device
                .CreateConstantBufferView(Some(&desc), D3D12_CPU_DESCRIPTOR_HANDLE { ptr: dest.ptr });
        }
    }

    fn create_render_target(&self, desc: &RenderTargetDesc, initial_state: D3D12_RESOURCE_STATES) -> Result<Dx12RenderTarget> {
        let format = convert::format(desc.format);
        let is_depth = desc.format.is_depth();

        let heap_props = D3D12_HEAP_PROPERTIES {
            Type: D3D12_HEAP_TYPE_DEFAULT,
            ..Default::default()
        };
        let resource_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            Width: desc.width as u64,
            Height: desc.height,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: format,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
            Flags: if is_depth {
                D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL
            } else {
                D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET
            },
            ..Default::default()
        };

        let clear_value = match desc.clear_value {
            ClearValue::Color(color) => D3D12_CLEAR_VALUE {
                Format: format,
                Anonymous: D3D12_CLEAR_VALUE_0 { Color: color },
            },
            ClearValue::DepthStencil { depth, stencil } => D3D12_CLEAR_VALUE {
                Format: format,
                Anonymous: D3D12_CLEAR_VALUE_0 {
                    DepthStencil: D3D12_DEPTH_STENCIL_VALUE {
                        Depth: depth,
                        Stencil: stencil,
                    },
                },
            },
        };

        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            self.device.CreateCommittedResource(
                &heap_props,
                D3D12_HEAP_FLAG_NONE,
                &resource_desc,
                initial_state,
                Some(&clear_value),
                &mut resource,
            )
        }
        .map_err(|e| creation_error("render target", e))?;
        let resource = resource.ok_or_else(|| {
            DistRhiError::Graphics(GraphicsError::ResourceCreation("render target was not returned".to_string()))
        })?;

        let heap_type = if is_depth {
            DescriptorHeapType::Dsv
        } else {
            DescriptorHeapType::Rtv
        };
        let view_heap = self.view_heap(heap_type, 1)?;
        let view = unsafe { view_heap.GetCPUDescriptorHandleForHeapStart() };
        unsafe {
            if is_depth {
                self.device.CreateDepthStencilView(&resource, None, view);
            } else {
                self.device.CreateRenderTargetView(&resource, None, view);
            }
        }

        Ok(Dx12RenderTarget {
            resource,
            _view_heap: view_heap,
            view: CpuDescriptorHandle { ptr: view.ptr },
        })
    }

    fn create_pipeline_layout(&self, desc: &PipelineLayoutDesc) -> Result<Dx12PipelineLayout> {
        // 范围数组必须在序列化之前保持存活
        let tables: Vec<Vec<D3D12_DESCRIPTOR_RANGE>> = desc
            .parameters
            .iter()
            .map(|parameter| match &parameter.kind {
                RootParameterKind::DescriptorTable { ranges } => ranges
                    .iter()
                    .map(|range| D3D12_DESCRIPTOR_RANGE {
                        RangeType: convert::descriptor_range_type(range.ty),
                        NumDescriptors: range.count,
                        BaseShaderRegister: range.binding,
                        RegisterSpace: 0,
                        OffsetInDescriptorsFromTableStart: D3D12_DESCRIPTOR_RANGE_OFFSET_APPEND,
                    })
                    .collect(),
                RootParameterKind::ConstantBuffer { .. } => Vec::new(),
            })
            .collect();

        let parameters: Vec<D3D12_ROOT_PARAMETER> = desc
            .parameters
            .iter()
            .zip(&tables)
            .map(|(parameter, ranges)| match &parameter.kind {
                RootParameterKind::ConstantBuffer { binding } => D3D12_ROOT_PARAMETER {
                    ParameterType: D3D12_ROOT_PARAMETER_TYPE_CBV,
                    Anonymous: D3D12_ROOT_PARAMETER_0 {
                        Descriptor: D3D12_ROOT_DESCRIPTOR {
                            ShaderRegister: *binding,
                            RegisterSpace: 0,
                        },
                    },
                    ShaderVisibility: convert::shader_visibility(parameter.visibility),
                },
                RootParameterKind::DescriptorTable { .. } => D3D12_ROOT_PARAMETER {
                    ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
                    Anonymous: D3D12_ROOT_PARAMETER_0 {
                        DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                            NumDescriptorRanges: ranges.len() as u32,
                            pDescriptorRanges: ranges.as_ptr(),
                        },
                    },
                    ShaderVisibility: convert::shader_visibility(parameter.visibility),
                },
            })
            .collect();

        let root_desc = D3D12_ROOT_SIGNATURE_DESC {
            NumParameters: parameters.len() as u32,
            pParameters: parameters.as_ptr(),
            NumStaticSamplers: 0,
            pStaticSamplers: std::ptr::null(),
            Flags: D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT,
        };

        unsafe {
            let mut signature: Option<ID3DBlob> = None;
            let mut errors: Option<ID3DBlob> = None;
            if let Err(e) =
                D3D12SerializeRootSignature(&root_desc, D3D_ROOT_SIGNATURE_VERSION_1, &mut signature, Some(&mut errors))
            {
                let message = blob_message(&errors);
                return Err(GraphicsError::ResourceCreation(format!(
                    "Failed to serialize root signature: {}",
                    if message.is_empty() { e.message().to_string() } else { message }
                ))
                .into());
            }
            let signature = signature.ok_or_else(|| {
                DistRhiError::Graphics(GraphicsError::ResourceCreation("root signature blob is empty".to_string()))
            })?;

            let root_signature: ID3D12RootSignature = self
                .device
                .CreateRootSignature(
                    0,
                    std::slice::from_raw_parts(signature.GetBufferPointer() as _, signature.GetBufferSize()),
                )
                .map_err(|e| creation_error("root signature", e))?;

            Ok(Dx12PipelineLayout { root_signature })
        }
    }

    fn create_shader(&self, desc: &ShaderDesc) -> Result<Dx12Shader> {
        let (vertex, pixel) = match &desc.source {
            ShaderSource::Bytecode { vertex, pixel } => (vertex.clone(), pixel.clone()),
            ShaderSource::Hlsl {
                source,
                vs_entry,
                ps_entry,
            } => (
                compile_stage(&desc.name, source, vs_entry, "vs_5_0")?,
                compile_stage(&desc.name, source, ps_entry, "ps_5_0")?,
            ),
        };
        Ok(Dx12Shader { vertex, pixel })
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc<'_, Dx12Api>) -> Result<Dx12Pipeline> {
        let root_signature = desc.layout.raw().root_signature.clone();
        let shader = desc.shader.raw();

        let semantics: Vec<CString> = desc
            .vertex_layout
            .attribs
            .iter()
            .map(|attrib| CString::new(attrib.semantic.as_str()))
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| DistRhiError::InvalidArgument("vertex semantic contains a NUL byte".to_string()))?;
        let input_elements: Vec<D3D12_INPUT_ELEMENT_DESC> = desc
            .vertex_layout
            .attribs
            .iter()
            .zip(&semantics)
            .map(|(attrib, semantic)| D3D12_INPUT_ELEMENT_DESC {
                SemanticName: PCSTR(semantic.as_ptr() as *const u8),
                SemanticIndex: 0,
                Format: convert::format(attrib.format),
                InputSlot: attrib.binding,
                AlignedByteOffset: attrib.offset,
                InputSlotClass: D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            })
            .collect();

        let depth = desc.depth.unwrap_or_default();
        let mut pso_desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC::default();
        pso_desc.pRootSignature = ManuallyDrop::new(Some(root_signature.clone()));
        pso_desc.VS = D3D12_SHADER_BYTECODE {
            pShaderBytecode: shader.vertex.as_ptr() as _,
            BytecodeLength: shader.vertex.len(),
        };
        pso_desc.PS = D3D12_SHADER_BYTECODE {
            pShaderBytecode: shader.pixel.as_ptr() as _,
            BytecodeLength: shader.pixel.len(),
        };
        pso_desc.BlendState.RenderTarget[0] = D3D12_RENDER_TARGET_BLEND_DESC {
            BlendEnable: false.into(),
            LogicOpEnable: false.into(),
            RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
            ..Default::default()
        };
        pso_desc.RasterizerState = D3D12_RASTERIZER_DESC {
            FillMode: convert::fill_mode(desc.rasterizer.fill_mode),
            CullMode: convert::cull_mode(desc.rasterizer.cull_mode),
            DepthClipEnable: true.into(),
            ..Default::default()
        };
        pso_desc.DepthStencilState = D3D12_DEPTH_STENCIL_DESC {
            DepthEnable: depth.depth_test.into(),
            DepthWriteMask: if depth.depth_write {
                D3D12_DEPTH_WRITE_MASK_ALL
            } else {
                D3D12_DEPTH_WRITE_MASK_ZERO
            },
            DepthFunc: convert::comparison_func(depth.depth_func),
            StencilEnable: false.into(),
            StencilReadMask: 0xFF,
            StencilWriteMask: 0xFF,
            FrontFace: D3D12_DEPTH_STENCILOP_DESC::default(),
            BackFace: D3D12_DEPTH_STENCILOP_DESC::default(),
        };
        pso_desc.SampleMask = u32::MAX;
        pso_desc.InputLayout = D3D12_INPUT_LAYOUT_DESC {
            pInputElementDescs: input_elements.as_ptr(),
            NumElements: input_elements.len() as u32,
        };
        pso_desc.PrimitiveTopologyType = D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE;
        pso_desc.NumRenderTargets = desc.color_formats.len() as u32;
        for (slot, format) in desc.color_formats.iter().enumerate() {
            pso_desc.RTVFormats[slot] = convert::format(*format);
        }
        pso_desc.DSVFormat = convert::format(desc.depth_stencil_format);
        pso_desc.SampleDesc.Count = 1;

        let pso = unsafe { self.device.CreateGraphicsPipelineState(&pso_desc) };
        unsafe { ManuallyDrop::drop(&mut pso_desc.pRootSignature) };
        let pso: ID3D12PipelineState = pso.map_err(|e| creation_error("graphics pipeline", e))?;

        Ok(Dx12Pipeline { pso, root_signature })
    }

    fn create_swap_chain(&self, queue: &Dx12Queue, desc: &SwapChainDesc) -> Result<Dx12SwapChain> {
        let hwnd = match desc.surface {
            SurfaceHandle::Window(RawWindowHandle::Win32(handle)) => HWND(handle.hwnd.get() as *mut core::ffi::c_void),
            SurfaceHandle::Window(_) => {
                return Err(GraphicsError::SwapchainError("expected a Win32 window handle".to_string()).into())
            }
            SurfaceHandle::Offscreen => {
                return Err(GraphicsError::SwapchainError(
                    "the DirectX 12 backend needs a window to present to".to_string(),
                )
                .into())
            }
        };

        let format = convert::format(desc.color_format);
        let swap_chain_desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: desc.width,
            Height: desc.height,
            Format: format,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                ..Default::default()
            },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: desc.image_count,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            ..Default::default()
        };

        let swap_chain: IDXGISwapChain1 = unsafe {
            self.factory
                .CreateSwapChainForHwnd(queue.queue(), hwnd, &swap_chain_desc, None, None)
        }
        .map_err(|e| GraphicsError::SwapchainError(format!("Failed to create swap chain: {}", e.message())))?;
        let swap_chain: IDXGISwapChain3 = swap_chain
            .cast()
            .map_err(|e| GraphicsError::SwapchainError(format!("IDXGISwapChain3 unavailable: {}", e.message())))?;

        let rtv_heap = self.view_heap(DescriptorHeapType::Rtv, desc.image_count)?;
        let rtv_increment = self.descriptor_increment_size(DescriptorHeapType::Rtv);
        let rtv_start = unsafe { rtv_heap.GetCPUDescriptorHandleForHeapStart() };
        for i in 0..desc.image_count {
            let surface: ID3D12Resource = unsafe { swap_chain.GetBuffer(i) }
                .map_err(|e| GraphicsError::SwapchainError(format!("GetBuffer({}) failed: {}", i, e.message())))?;
            let handle = D3D12_CPU_DESCRIPTOR_HANDLE {
                ptr: rtv_start.ptr + (i as usize * rtv_increment as usize),
            };
            unsafe { self.device.CreateRenderTargetView(&surface, None, handle) };
        }

        Ok(Dx12SwapChain {
            swap_chain,
            rtv_heap,
            rtv_increment,
            image_count: desc.image_count,
        })
    }
}

/// 提交资源形式的缓冲区
pub struct Dx12Buffer {
    resource: ID3D12Resource,
    heap: MemoryHeap,
    gpu_address: u64,
}

unsafe impl Send for Dx12Buffer {}
unsafe impl Sync for Dx12Buffer {}

impl Dx12Buffer {
    pub fn resource(&self) -> &ID3D12Resource {
        &self.resource
    }
}

impl BufferRaw for Dx12Buffer {
    unsafe fn map(&self) -> Result<NonNull<u8>> {
        if self.heap == MemoryHeap::Default {
            return Err(GraphicsError::ResourceCreation("buffers on the default heap cannot be mapped".to_string()).into());
        }
        let mut data = std::ptr::null_mut();
        self.resource
            .Map(0, None, Some(&mut data))
            .map_err(|e| execution_error("ID3D12Resource::Map", e))?;
        NonNull::new(data as *mut u8)
            .ok_or_else(|| GraphicsError::ResourceCreation("Map returned a null pointer".to_string()).into())
    }

    fn unmap(&self) {
        unsafe { self.resource.Unmap(0, None) };
    }

    fn gpu_address(&self) -> u64 {
        self.gpu_address
    }
}

/// 渲染目标或深度目标，连同它的视图
pub struct Dx12RenderTarget {
    resource: ID3D12Resource,
    _view_heap: ID3D12DescriptorHeap,
    view: CpuDescriptorHandle,
}

unsafe impl Send for Dx12RenderTarget {}
unsafe impl Sync for Dx12RenderTarget {}

impl Dx12RenderTarget {
    pub fn resource(&self) -> &ID3D12Resource {
        &self.resource
    }
}

impl RenderTargetRaw for Dx12RenderTarget {
    fn view(&self) -> CpuDescriptorHandle {
        self.view
    }
}

/// 编译后的顶点与像素着色器字节码
pub struct Dx12Shader {
    vertex: Vec<u8>,
    pixel: Vec<u8>,
}

/// 根签名
pub struct Dx12PipelineLayout {
    root_signature: ID3D12RootSignature,
}

unsafe impl Send for Dx12PipelineLayout {}
unsafe impl Sync for Dx12PipelineLayout {}

/// 管线状态对象及其根签名
pub struct Dx12Pipeline {
    pso: ID3D12PipelineState,
    root_signature: ID3D12RootSignature,
}

unsafe impl Send for Dx12Pipeline {}
unsafe impl Sync for Dx12Pipeline {}

impl Dx12Pipeline {
    pub fn pso(&self) -> &ID3D12PipelineState {
        &self.pso
    }

    pub fn root_signature(&self) -> &ID3D12RootSignature {
        &self.root_signature
    }
}

/// 翻转模型交换链
pub struct Dx12SwapChain {
    swap_chain: IDXGISwapChain3,
    rtv_heap: ID3D12DescriptorHeap,
    rtv_increment: u32,
    image_count: u32,
}

unsafe impl Send for Dx12SwapChain {}
unsafe impl Sync for Dx12SwapChain {}

impl SwapChainRaw<Dx12Api> for Dx12SwapChain {
    fn image_count(&self) -> u32 {
        self.image_count
    }

    fn current_image_index(&self) -> u32 {
        unsafe { self.swap_chain.GetCurrentBackBufferIndex() }
    }

    fn render_targets(&self) -> Result<Vec<Dx12RenderTarget>> {
        let start = unsafe { self.rtv_heap.GetCPUDescriptorHandleForHeapStart() };
        (0..self.image_count)
            .map(|i| -> Result<Dx12RenderTarget> {
                let resource: ID3D12Resource = unsafe { self.swap_chain.GetBuffer(i) }
                    .map_err(|e| GraphicsError::SwapchainError(format!("GetBuffer({}) failed: {}", i, e.message())))?;
                Ok(Dx12RenderTarget {
                    resource,
                    _view_heap: self.rtv_heap.clone(),
                    view: CpuDescriptorHandle {
                        ptr: start.ptr + i as usize * self.rtv_increment as usize,
                    },
                })
            })
            .collect()
    }

    fn present(&self, sync_interval: u32) -> Result<()> {
        unsafe { self.swap_chain.Present(sync_interval, DXGI_PRESENT(0)) }
            .ok()
            .map_err(|e| GraphicsError::SwapchainError(format!("Present failed: {}", e.message())).into())
    }
}
