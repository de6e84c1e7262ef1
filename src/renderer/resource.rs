//! 资源管理模块
//!
//! 提供缓冲区的创建与 CPU 映射更新。
//!
//! # 设计原则
//!
//! - **按用途选堆**：`CpuToGpu` / `CpuOnly`，以及带初始数据的 `GpuOnly`，都放在上传堆，
//!   初始状态为 `GENERIC_READ`；其余放在默认堆
//! - **映射即更新**：`begin_update` 返回一个守卫，解引用为目标区间的字节切片，
//!   守卫结束时（`end` 或 drop）按需取消映射
//! - **GPU-only 缓冲区**：不能通过映射更新，需要暂存复制路径，目前返回 `Unsupported`

use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use bitflags::bitflags;
use bytemuck::Pod;

use crate::core::error::{DistRhiError, Result};
use crate::gfx::backend::{BufferRaw, GraphicsApi, GraphicsDevice, MemoryHeap};

use super::barrier::{to_native_state, ResourceState};
use super::Renderer;

/// 缓冲区内存用途
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResourceMemoryUsage {
    /// 仅 GPU 访问
    #[default]
    GpuOnly,
    /// CPU 暂存
    CpuOnly,
    /// CPU 写、GPU 读，适合每帧更新的数据
    CpuToGpu,
}

bitflags! {
    /// 缓冲区创建标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BufferCreationFlags: u32 {
        /// 创建时映射，直到销毁才取消映射
        const PERSISTENT_MAP = 1 << 0;
    }
}

/// 缓冲区内的一段字节区间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRange {
    pub offset: u64,
    pub size: u64,
}

impl BufferRange {
    /// 覆盖整个缓冲区
    pub fn whole<A: GraphicsApi>(buffer: &Buffer<A>) -> Self {
        Self {
            offset: 0,
            size: buffer.size(),
        }
    }
}

/// 缓冲区描述信息
#[derive(Debug, Clone)]
pub struct BufferDesc {
    /// 缓冲区大小（字节）
    pub size: u64,
    /// 结构步长，顶点缓冲区即顶点大小
    pub struct_stride: u32,
    pub memory_usage: ResourceMemoryUsage,
    pub flags: BufferCreationFlags,
    /// 默认堆上的初始状态
    pub start_state: ResourceState,
    /// 调试名称（可选）
    pub name: Option<String>,
}

impl BufferDesc {
    pub fn new(size: u64, memory_usage: ResourceMemoryUsage) -> Self {
        Self {
            size,
            struct_stride: 0,
            memory_usage,
            flags: BufferCreationFlags::empty(),
            start_state: ResourceState::UNDEFINED,
            name: None,
        }
    }

    pub fn with_stride(mut self, struct_stride: u32) -> Self {
        self.struct_stride = struct_stride;
        self
    }

    pub fn with_flags(mut self, flags: BufferCreationFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_start_state(mut self, state: ResourceState) -> Self {
        self.start_state = state;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// 缓冲区加载描述
#[derive(Debug, Clone)]
pub struct BufferLoadDesc<'a> {
    pub desc: BufferDesc,
    /// 初始数据，从偏移 0 开始写入
    pub data: Option<&'a [u8]>,
}

/// 缓冲区
pub struct Buffer<A: GraphicsApi> {
    raw: A::Buffer,
    desc: BufferDesc,
    heap: MemoryHeap,
    persistent: Option<NonNull<u8>>,
    gpu_address: u64,
}

// 持久映射的指针只在 `begin_update` 中通过 `&mut self` 访问
unsafe impl<A: GraphicsApi> Send for Buffer<A> where A::Buffer: Send {}
unsafe impl<A: GraphicsApi> Sync for Buffer<A> where A::Buffer: Sync {}

impl<A: GraphicsApi> Buffer<A> {
    pub fn size(&self) -> u64 {
        self.desc.size
    }

    pub fn struct_stride(&self) -> u32 {
        self.desc.struct_stride
    }

    pub fn memory_usage(&self) -> ResourceMemoryUsage {
        self.desc.memory_usage
    }

    pub fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    pub fn heap(&self) -> MemoryHeap {
        self.heap
    }

    pub fn is_persistently_mapped(&self) -> bool {
        self.persistent.is_some()
    }

    pub fn gpu_address(&self) -> u64 {
        self.gpu_address
    }

    pub fn raw(&self) -> &A::Buffer {
        &self.raw
    }

    /// 开始更新 `[dst_offset, dst_offset + len)`
    ///
    /// 持久映射的缓冲区直接返回映射区间，否则临时映射，守卫结束时取消映射。
    pub fn begin_update(&mut self, dst_offset: u64, len: u64) -> Result<BufferUpdate<'_, A>> {
        if self.desc.memory_usage == ResourceMemoryUsage::GpuOnly {
            return Err(DistRhiError::Unsupported(
                "updating a GPU-only buffer requires a staging copy".to_string(),
            ));
        }

        let end = dst_offset.checked_add(len).filter(|&end| end <= self.desc.size);
        if end.is_none() {
            return Err(DistRhiError::InvalidArgument(format!(
                "update range {}+{} exceeds buffer size {}",
                dst_offset, len, self.desc.size
            )));
        }

        let (base, needs_unmap) = match self.persistent {
            Some(ptr) => (ptr, false),
            None => (unsafe { self.raw.map()? }, true),
        };

        // 区间已检查在缓冲区范围内
        let data = unsafe {
            std::slice::from_raw_parts_mut(base.as_ptr().add(dst_offset as usize), len as usize)
        };

        Ok(BufferUpdate {
            raw: &self.raw,
            data,
            needs_unmap,
        })
    }

    /// 把 `data` 写到 `dst_offset`
    pub fn update(&mut self, dst_offset: u64, data: &[u8]) -> Result<()> {
        let mut update = self.begin_update(dst_offset, data.len() as u64)?;
        update.copy_from_slice(data);
        update.end();
        Ok(())
    }

    /// 把一个 POD 值写到 `dst_offset`
    pub fn update_pod<T: Pod>(&mut self, dst_offset: u64, value: &T) -> Result<()> {
        self.update(dst_offset, bytemuck::bytes_of(value))
    }
}

impl<A: GraphicsApi> Drop for Buffer<A> {
    fn drop(&mut self) {
        if self.persistent.take().is_some() {
            self.raw.unmap();
        }
    }
}

/// 一次进行中的缓冲区更新
///
/// 解引用为目标区间的字节切片。
pub struct BufferUpdate<'a, A: GraphicsApi> {
    raw: &'a A::Buffer,
    data: &'a mut [u8],
    needs_unmap: bool,
}

impl<'a, A: GraphicsApi> BufferUpdate<'a, A> {
    /// 结束更新
    pub fn end(self) {}
}

impl<'a, A: GraphicsApi> Deref for BufferUpdate<'a, A> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data
    }
}

impl<'a, A: GraphicsApi> DerefMut for BufferUpdate<'a, A> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.data
    }
}

impl<'a, A: GraphicsApi> Drop for BufferUpdate<'a, A> {
    fn drop(&mut self) {
        if self.needs_unmap {
            self.raw.unmap();
        }
    }
}

impl<A: GraphicsApi> Renderer<A> {
    /// 创建缓冲区并写入初始数据
    pub fn add_resource(&self, load: &BufferLoadDesc<'_>) -> Result<Buffer<A>> {
        let desc = &load.desc;
        if desc.size == 0 {
            return Err(DistRhiError::InvalidArgument("buffer size must be greater than 0".to_string()));
        }
        if let Some(data) = load.data {
            if data.len() as u64 > desc.size {
                return Err(DistRhiError::InvalidArgument(format!(
                    "initial data of {} bytes does not fit a {} byte buffer",
                    data.len(),
                    desc.size
                )));
            }
        }

        let upload = match desc.memory_usage {
            ResourceMemoryUsage::CpuToGpu | ResourceMemoryUsage::CpuOnly => true,
            ResourceMemoryUsage::GpuOnly => load.data.is_some(),
        };
        let (heap, state) = if upload {
            (MemoryHeap::Upload, ResourceState::GENERIC_READ)
        } else {
            (MemoryHeap::Default, desc.start_state)
        };

        let persistent_map = desc.flags.contains(BufferCreationFlags::PERSISTENT_MAP);
        if persistent_map && heap == MemoryHeap::Default {
            return Err(DistRhiError::InvalidArgument(
                "a buffer on the default heap cannot be persistently mapped".to_string(),
            ));
        }

        let raw = self
            .device
            .create_buffer(desc, heap, to_native_state::<A>(state))?;
        let gpu_address = raw.gpu_address();

        let persistent = if persistent_map {
            Some(unsafe { raw.map()? })
        } else {
            None
        };

        if let Some(data) = load.data {
            match persistent {
                Some(ptr) => unsafe {
                    std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr(), data.len());
                },
                None => unsafe {
                    let ptr = raw.map()?;
                    std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr(), data.len());
                    raw.unmap();
                },
            }
        }

        tracing::trace!(
            size = desc.size,
            usage = ?desc.memory_usage,
            heap = ?heap,
            persistent = persistent_map,
            "Buffer created"
        );

        Ok(Buffer {
            raw,
            desc: desc.clone(),
            heap,
            persistent,
            gpu_address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::{HeadlessApi, HeadlessState};
    use crate::renderer::test_util::headless_renderer;

    fn load(renderer: &Renderer<HeadlessApi>, desc: BufferDesc, data: Option<&[u8]>) -> Result<Buffer<HeadlessApi>> {
        renderer.add_resource(&BufferLoadDesc { desc, data })
    }

    #[test]
    fn test_heap_selection() {
        let renderer = headless_renderer();

        let upload = load(&renderer, BufferDesc::new(64, ResourceMemoryUsage::CpuToGpu), None).unwrap();
        assert_eq!(upload.heap(), MemoryHeap::Upload);
        assert_eq!(upload.raw().initial_state(), HeadlessState::GENERIC_READ);

        let gpu = load(
            &renderer,
            BufferDesc::new(64, ResourceMemoryUsage::GpuOnly)
                .with_start_state(ResourceState::VERTEX_AND_CONSTANT_BUFFER),
            None,
        )
        .unwrap();
        assert_eq!(gpu.heap(), MemoryHeap::Default);
        assert_eq!(gpu.raw().initial_state(), HeadlessState::VERTEX_AND_CONSTANT_BUFFER);

        let seeded = load(&renderer, BufferDesc::new(4, ResourceMemoryUsage::GpuOnly), Some(&[1, 2, 3, 4])).unwrap();
        assert_eq!(seeded.heap(), MemoryHeap::Upload);
        assert_eq!(seeded.raw().contents(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_update_round_trip() {
        let renderer = headless_renderer();
        let mut buffer = load(&renderer, BufferDesc::new(256, ResourceMemoryUsage::CpuToGpu), None).unwrap();
        let bytes: Vec<u8> = (0..48u8).collect();

        for _ in 0..2 {
            let mut update = buffer.begin_update(16, bytes.len() as u64).unwrap();
            update.copy_from_slice(&bytes);
            update.end();

            let readback = buffer.begin_update(16, bytes.len() as u64).unwrap();
            assert_eq!(&readback[..], &bytes[..]);
        }

        // 更新结束后不再处于映射状态
        assert_eq!(buffer.raw().map_depth(), 0);
        assert_eq!(&buffer.raw().contents()[..16], &[0u8; 16]);
    }

    #[test]
    fn test_persistent_buffer_stays_mapped() {
        let renderer = headless_renderer();
        let mut buffer = load(
            &renderer,
            BufferDesc::new(32, ResourceMemoryUsage::CpuToGpu).with_flags(BufferCreationFlags::PERSISTENT_MAP),
            Some(&[7; 8]),
        )
        .unwrap();
        assert!(buffer.is_persistently_mapped());
        assert_eq!(buffer.raw().map_depth(), 1);

        buffer.update_pod(8, &0xAABB_CCDDu32).unwrap();
        assert_eq!(buffer.raw().map_depth(), 1);
        assert_eq!(&buffer.raw().contents()[..12], &[7, 7, 7, 7, 7, 7, 7, 7, 0xDD, 0xCC, 0xBB, 0xAA]);
    }

    #[test]
    fn test_gpu_only_update_is_unsupported() {
        let renderer = headless_renderer();
        let mut buffer = load(&renderer, BufferDesc::new(16, ResourceMemoryUsage::GpuOnly), None).unwrap();
        assert!(matches!(buffer.begin_update(0, 4), Err(DistRhiError::Unsupported(_))));
    }

    #[test]
    fn test_invalid_buffers() {
        let renderer = headless_renderer();
        assert!(load(&renderer, BufferDesc::new(0, ResourceMemoryUsage::CpuToGpu), None).is_err());
        assert!(load(&renderer, BufferDesc::new(2, ResourceMemoryUsage::CpuToGpu), Some(&[0; 3])).is_err());
        assert!(load(
            &renderer,
            BufferDesc::new(16, ResourceMemoryUsage::GpuOnly).with_flags(BufferCreationFlags::PERSISTENT_MAP),
            None
        )
        .is_err());

        let mut buffer = load(&renderer, BufferDesc::new(16, ResourceMemoryUsage::CpuToGpu), None).unwrap();
        assert!(matches!(buffer.begin_update(12, 8), Err(DistRhiError::InvalidArgument(_))));
        assert!(matches!(buffer.begin_update(u64::MAX, 2), Err(DistRhiError::InvalidArgument(_))));
    }
}
