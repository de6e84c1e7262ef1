//! 常量缓冲区环形分配器
//!
//! 一个持久映射的 `CpuToGpu` 缓冲区，按 256 字节对齐逐段分出，
//! 走到末尾时回到 0。调用方需要保证被覆盖的区段已不再被 GPU 读取，
//! 通常让缓冲区容纳 `pool_count` 帧的数据即可。

use crate::core::error::{CapacityError, DistRhiError, Result};
use crate::gfx::backend::GraphicsApi;

use super::descriptor::{align_up, CONSTANT_BUFFER_ALIGNMENT};
use super::resource::{
    Buffer, BufferCreationFlags, BufferDesc, BufferLoadDesc, BufferRange, ResourceMemoryUsage,
};
use super::Renderer;

/// 分出的一段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingBufferOffset {
    pub offset: u64,
    /// 对齐后的大小
    pub size: u64,
}

impl RingBufferOffset {
    pub fn range(&self) -> BufferRange {
        BufferRange {
            offset: self.offset,
            size: self.size,
        }
    }
}

/// 常量缓冲区环
pub struct UniformRingBuffer<A: GraphicsApi> {
    buffer: Buffer<A>,
    max_size: u64,
    current_offset: u64,
}

impl<A: GraphicsApi> UniformRingBuffer<A> {
    /// 创建 `size` 字节的环，大小按 256 向上对齐
    pub fn new(renderer: &Renderer<A>, size: u64) -> Result<Self> {
        let max_size = align_up(size.max(1), CONSTANT_BUFFER_ALIGNMENT).ok_or_else(|| {
            DistRhiError::InvalidArgument(format!("uniform ring of {} bytes is too large", size))
        })?;
        let desc = BufferDesc::new(max_size, ResourceMemoryUsage::CpuToGpu)
            .with_flags(BufferCreationFlags::PERSISTENT_MAP)
            .with_name("UniformRingBuffer");
        let buffer = renderer.add_resource(&BufferLoadDesc { desc, data: None })?;

        Ok(Self {
            buffer,
            max_size,
            current_offset: 0,
        })
    }

    /// 分出 `size` 字节
    ///
    /// `alignment` 默认 256。对齐后的大小超过整个缓冲区时返回 `None`，
    /// 剩余空间不足时从 0 重新开始。
    pub fn get_offset(&mut self, size: u64, alignment: Option<u64>) -> Option<RingBufferOffset> {
        let alignment = alignment.unwrap_or(CONSTANT_BUFFER_ALIGNMENT);
        debug_assert!(alignment.is_power_of_two(), "alignment must be a power of two");

        let aligned = align_up(size, alignment)?;
        if aligned > self.max_size {
            return None;
        }

        let mut offset = align_up(self.current_offset, alignment).unwrap_or(self.max_size);
        if offset.checked_add(aligned).map_or(true, |end| end > self.max_size) {
            offset = 0;
        }
        self.current_offset = offset + aligned;

        Some(RingBufferOffset {
            offset,
            size: aligned,
        })
    }

    /// 与 `get_offset` 相同，但以错误的形式报告容量不足
    pub fn try_get_offset(&mut self, size: u64, alignment: Option<u64>) -> Result<RingBufferOffset> {
        self.get_offset(size, alignment).ok_or_else(|| {
            CapacityError::RingBufferTooSmall {
                requested: size,
                capacity: self.max_size,
            }
            .into()
        })
    }

    /// 回到缓冲区起点
    pub fn reset(&mut self) {
        self.current_offset = 0;
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub fn current_offset(&self) -> u64 {
        self.current_offset
    }

    pub fn buffer(&self) -> &Buffer<A> {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut Buffer<A> {
        &mut self.buffer
    }
}
