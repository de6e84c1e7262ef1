//! Headless 设备与资源
//!
//! 描述符句柄是互不重叠的伪地址，缓冲区是清零的主机内存，
//! 常量缓冲区视图按 CPU 句柄记录下来供检查。

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::{
    BufferRaw, CpuDescriptorHandle, DescriptorHeapRaw, GpuDescriptorHandle, GraphicsDevice, MemoryHeap,
    RenderTargetRaw, SwapChainRaw,
};
use crate::renderer::descriptor::{DescriptorHeapDesc, DescriptorHeapType};
use crate::renderer::pipeline::{GraphicsPipelineDesc, PipelineLayoutDesc, ShaderDesc, ShaderSource};
use crate::renderer::resource::BufferDesc;
use crate::renderer::swapchain::SwapChainDesc;
use crate::renderer::sync::QueueType;
use crate::renderer::target::RenderTargetDesc;

use super::{
    HeadlessApi, HeadlessCmdAllocator, HeadlessCmdList, HeadlessFence, HeadlessOptions, HeadlessQueue,
    HeadlessState,
};

const CPU_ADDRESS_BASE: usize = 0x1000_0000;
const GPU_DESCRIPTOR_BASE: u64 = 1 << 40;
const GPU_MEMORY_BASE: u64 = 1 << 44;
/// 相邻伪分配之间的空隙
const ADDRESS_GAP: u64 = 0x1_0000;

/// 记录下来的常量缓冲区视图
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantBufferView {
    pub buffer_location: u64,
    pub size_in_bytes: u32,
}

/// Headless 设备
pub struct HeadlessDevice {
    options: HeadlessOptions,
    next_cpu: AtomicUsize,
    next_gpu_descriptor: AtomicU64,
    next_gpu_memory: AtomicU64,
    next_pipeline: AtomicU64,
    views: Mutex<HashMap<CpuDescriptorHandle, ConstantBufferView>>,
}

impl HeadlessDevice {
    pub(crate) fn new(options: HeadlessOptions) -> Self {
        Self {
            options,
            next_cpu: AtomicUsize::new(CPU_ADDRESS_BASE),
            next_gpu_descriptor: AtomicU64::new(GPU_DESCRIPTOR_BASE),
            next_gpu_memory: AtomicU64::new(GPU_MEMORY_BASE),
            next_pipeline: AtomicU64::new(1),
            views: Mutex::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &HeadlessOptions {
        &self.options
    }

    /// 最近写入 `handle` 的常量缓冲区视图
    pub fn constant_buffer_view(&self, handle: CpuDescriptorHandle) -> Option<ConstantBufferView> {
        self.views.lock().get(&handle).copied()
    }

    fn reserve_cpu(&self, bytes: u64) -> CpuDescriptorHandle {
        let ptr = self
            .next_cpu
            .fetch_add((bytes + ADDRESS_GAP) as usize, Ordering::Relaxed);
        CpuDescriptorHandle { ptr }
    }

    fn reserve_gpu_descriptors(&self, bytes: u64) -> GpuDescriptorHandle {
        let ptr = self
            .next_gpu_descriptor
            .fetch_add(bytes + ADDRESS_GAP, Ordering::Relaxed);
        GpuDescriptorHandle { ptr }
    }

    fn make_render_target(&self, desc: &RenderTargetDesc, initial_state: HeadlessState) -> HeadlessRenderTarget {
        HeadlessRenderTarget {
            view: self.reserve_cpu(self.options.descriptor_increment as u64),
            width: desc.width,
            height: desc.height,
            initial_state,
        }
    }
}

impl GraphicsDevice<HeadlessApi> for HeadlessDevice {
    fn create_queue(&self, _ty: QueueType) -> Result<HeadlessQueue> {
        Ok(HeadlessQueue::new(self.options.completion))
    }

    fn create_fence(&self, initial_value: u64) -> Result<HeadlessFence> {
        Ok(HeadlessFence::new(initial_value))
    }

    fn create_cmd_allocator(&self, _ty: QueueType) -> Result<HeadlessCmdAllocator> {
        Ok(HeadlessCmdAllocator::default())
    }

    fn create_cmd_list(&self, _ty: QueueType, _allocator: &HeadlessCmdAllocator) -> Result<HeadlessCmdList> {
        Ok(HeadlessCmdList::default())
    }

    fn create_descriptor_heap(&self, desc: &DescriptorHeapDesc) -> Result<HeadlessDescriptorHeap> {
        let bytes = desc.capacity as u64 * self.options.descriptor_increment as u64;
        let gpu_start = desc
            .shader_visible
            .then(|| self.reserve_gpu_descriptors(bytes));
        Ok(HeadlessDescriptorHeap {
            cpu_start: self.reserve_cpu(bytes),
            gpu_start,
            desc: desc.clone(),
        })
    }

    fn descriptor_increment_size(&self, _ty: DescriptorHeapType) -> u32 {
        self.options.descriptor_increment
    }

    fn create_buffer(&self, desc: &BufferDesc, heap: MemoryHeap, initial_state: HeadlessState) -> Result<HeadlessBuffer> {
        let gpu_address = self
            .next_gpu_memory
            .fetch_add(desc.size + ADDRESS_GAP, Ordering::Relaxed);
        Ok(HeadlessBuffer::new(desc.size, heap, initial_state, gpu_address))
    }

    fn create_constant_buffer_view(
        &self,
        buffer: &HeadlessBuffer,
        offset: u64,
        size_in_bytes: u32,
        dest: CpuDescriptorHandle,
    ) {
        self.views.lock().insert(
            dest,
            ConstantBufferView {
                buffer_location: buffer.gpu_address() + offset,
                size_in_bytes,
            },
        );
    }

    fn create_render_target(&self, desc: &RenderTargetDesc, initial_state: HeadlessState) -> Result<HeadlessRenderTarget> {
        Ok(self.make_render_target(desc, initial_state))
    }

    fn create_pipeline_layout(&self, desc: &PipelineLayoutDesc) -> Result<HeadlessPipelineLayout> {
        Ok(HeadlessPipelineLayout {
            parameter_count: desc.parameters.len() as u32,
        })
    }

    fn create_shader(&self, desc: &ShaderDesc) -> Result<HeadlessShader> {
        if let ShaderSource::Hlsl { source, .. } = &desc.source {
            if source.trim().is_empty() {
                return Err(GraphicsError::ShaderCompilation(format!("shader '{}' has no source", desc.name)).into());
            }
        }
        Ok(HeadlessShader {
            name: desc.name.clone(),
        })
    }

    fn create_graphics_pipeline(&self, _desc: &GraphicsPipelineDesc<'_, HeadlessApi>) -> Result<HeadlessPipeline> {
        Ok(HeadlessPipeline {
            id: self.next_pipeline.fetch_add(1, Ordering::Relaxed),
        })
    }

    fn create_swap_chain(&self, _queue: &HeadlessQueue, desc: &SwapChainDesc) -> Result<HeadlessSwapChain> {
        let target_desc = RenderTargetDesc::color(desc.width, desc.height, desc.color_format);
        let targets = (0..desc.image_count)
            .map(|_| self.make_render_target(&target_desc, HeadlessState::PRESENT))
            .collect();
        Ok(HeadlessSwapChain {
            targets,
            current: AtomicU32::new(0),
            presents: AtomicU64::new(0),
            last_sync: Mutex::new(None),
        })
    }
}

/// Headless 描述符堆
#[derive(Debug)]
pub struct HeadlessDescriptorHeap {
    cpu_start: CpuDescriptorHandle,
    gpu_start: Option<GpuDescriptorHandle>,
    desc: DescriptorHeapDesc,
}

impl HeadlessDescriptorHeap {
    pub fn desc(&self) -> &DescriptorHeapDesc {
        &self.desc
    }
}

impl DescriptorHeapRaw for HeadlessDescriptorHeap {
    fn cpu_start(&self) -> CpuDescriptorHandle {
        self.cpu_start
    }

    fn gpu_start(&self) -> Option<GpuDescriptorHandle> {
        self.gpu_start
    }
}

/// 主机内存上的缓冲区
pub struct HeadlessBuffer {
    memory: NonNull<[u8]>,
    heap: MemoryHeap,
    initial_state: HeadlessState,
    gpu_address: u64,
    map_depth: AtomicU32,
}

// 内存只通过 `map` 返回的指针访问，同步由调用方负责
unsafe impl Send for HeadlessBuffer {}
unsafe impl Sync for HeadlessBuffer {}

impl HeadlessBuffer {
    fn new(size: u64, heap: MemoryHeap, initial_state: HeadlessState, gpu_address: u64) -> Self {
        let memory = Box::into_raw(vec![0u8; size as usize].into_boxed_slice());
        Self {
            // Box::into_raw 不会返回空指针
            memory: unsafe { NonNull::new_unchecked(memory) },
            heap,
            initial_state,
            gpu_address,
            map_depth: AtomicU32::new(0),
        }
    }

    pub fn heap(&self) -> MemoryHeap {
        self.heap
    }

    pub fn initial_state(&self) -> HeadlessState {
        self.initial_state
    }

    /// 未配对的 `map` 次数
    pub fn map_depth(&self) -> u32 {
        self.map_depth.load(Ordering::Acquire)
    }

    /// 缓冲区内容的副本
    pub fn contents(&self) -> Vec<u8> {
        unsafe { self.memory.as_ref().to_vec() }
    }
}

impl BufferRaw for HeadlessBuffer {
    unsafe fn map(&self) -> Result<NonNull<u8>> {
        if self.heap == MemoryHeap::Default {
            return Err(GraphicsError::ResourceCreation(
                "buffers on the default heap cannot be mapped".to_string(),
            )
            .into());
        }
        self.map_depth.fetch_add(1, Ordering::AcqRel);
        Ok(self.memory.cast())
    }

    fn unmap(&self) {
        let _ = self
            .map_depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |depth| depth.checked_sub(1));
    }

    fn gpu_address(&self) -> u64 {
        self.gpu_address
    }
}

impl Drop for HeadlessBuffer {
    fn drop(&mut self) {
        // 由 `new` 中的 Box::into_raw 得到
        unsafe { drop(Box::from_raw(self.memory.as_ptr())) };
    }
}

/// Headless 渲染目标
#[derive(Debug, Clone)]
pub struct HeadlessRenderTarget {
    view: CpuDescriptorHandle,
    width: u32,
    height: u32,
    initial_state: HeadlessState,
}

impl HeadlessRenderTarget {
    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn initial_state(&self) -> HeadlessState {
        self.initial_state
    }
}

impl RenderTargetRaw for HeadlessRenderTarget {
    fn view(&self) -> CpuDescriptorHandle {
        self.view
    }
}

#[derive(Debug)]
pub struct HeadlessShader {
    name: String,
}

impl HeadlessShader {
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug)]
pub struct HeadlessPipelineLayout {
    parameter_count: u32,
}

impl HeadlessPipelineLayout {
    pub fn parameter_count(&self) -> u32 {
        self.parameter_count
    }
}

#[derive(Debug)]
pub struct HeadlessPipeline {
    id: u64,
}

impl HeadlessPipeline {
    /// 设备内唯一的编号
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Headless 交换链
///
/// 每次 present 后当前索引前进一位，与翻转模型的交换链一致。
pub struct HeadlessSwapChain {
    targets: Vec<HeadlessRenderTarget>,
    current: AtomicU32,
    presents: AtomicU64,
    last_sync: Mutex<Option<u32>>,
}

impl HeadlessSwapChain {
    pub fn present_count(&self) -> u64 {
        self.presents.load(Ordering::Acquire)
    }

    pub fn last_sync_interval(&self) -> Option<u32> {
        *self.last_sync.lock()
    }
}

impl SwapChainRaw<HeadlessApi> for HeadlessSwapChain {
    fn image_count(&self) -> u32 {
        self.targets.len() as u32
    }

    fn current_image_index(&self) -> u32 {
        self.current.load(Ordering::Acquire)
    }

    fn render_targets(&self) -> Result<Vec<HeadlessRenderTarget>> {
        Ok(self.targets.clone())
    }

    fn present(&self, sync_interval: u32) -> Result<()> {
        let count = self.image_count();
        let _ = self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |index| Some((index + 1) % count));
        self.presents.fetch_add(1, Ordering::AcqRel);
        *self.last_sync.lock() = Some(sync_interval);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::target::ImageFormat;

    #[test]
    fn test_heaps_do_not_overlap() {
        let device = HeadlessDevice::new(HeadlessOptions::default());
        let first = device
            .create_descriptor_heap(&DescriptorHeapDesc::cbv_srv_uav(100))
            .unwrap();
        let second = device
            .create_descriptor_heap(&DescriptorHeapDesc::cbv_srv_uav(100))
            .unwrap();

        let first_end = first.cpu_start().offset(100, device.descriptor_increment_size(DescriptorHeapType::CbvSrvUav));
        assert!(first_end.ptr <= second.cpu_start().ptr);
        assert!(first.gpu_start().is_some());
    }

    #[test]
    fn test_default_heap_buffer_cannot_map() {
        let device = HeadlessDevice::new(HeadlessOptions::default());
        let desc = BufferDesc::new(16, crate::renderer::resource::ResourceMemoryUsage::GpuOnly);
        let buffer = device
            .create_buffer(&desc, MemoryHeap::Default, HeadlessState::COMMON)
            .unwrap();
        assert!(unsafe { buffer.map() }.is_err());
        assert_eq!(buffer.map_depth(), 0);
    }

    #[test]
    fn test_swap_chain_rotates_on_present() {
        let device = HeadlessDevice::new(HeadlessOptions::default());
        let queue = device.create_queue(QueueType::Graphics).unwrap();
        let desc = SwapChainDesc {
            surface: crate::renderer::swapchain::SurfaceHandle::Offscreen,
            width: 8,
            height: 8,
            image_count: 2,
            color_format: ImageFormat::B8G8R8A8Unorm,
            enable_vsync: true,
        };
        let swap_chain = device.create_swap_chain(&queue, &desc).unwrap();
        assert_eq!(swap_chain.current_image_index(), 0);
        swap_chain.present(1).unwrap();
        assert_eq!(swap_chain.current_image_index(), 1);
        swap_chain.present(1).unwrap();
        assert_eq!(swap_chain.current_image_index(), 0);
        assert_eq!(swap_chain.last_sync_interval(), Some(1));
    }
}
