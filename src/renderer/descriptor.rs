//! 描述符管理模块
//!
//! 提供描述符堆与描述符集的分配和更新。
//!
//! # 设计原则
//!
//! - **线性分配**：每个堆是一个只增不减的表，用原子游标做 bump 分配，没有回收
//! - **可恢复的耗尽**：容量不足时返回 `CapacityError`，由调用方决定如何处理
//! - **按帧复制**：一个描述符集在堆中连续复制 `max_sets` 份，每帧写自己的一份
//! - **偏移而非指针**：调用方只看到槽位偏移，句柄由堆基址乘描述符大小得到
//!
//! # 偏移计算
//!
//! ```text
//! slot(set_index, entry, j) = base + set_index * stride + entry.offset + array_offset + j
//! cpu_handle               = heap_cpu_start + slot * increment
//! gpu_handle(set_index)    = heap_gpu_start + (base + set_index * stride) * increment
//! ```

use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::core::error::{CapacityError, DistRhiError, Result};
use crate::gfx::backend::{
    CpuDescriptorHandle, DescriptorHeapRaw, GpuDescriptorHandle, GraphicsApi, GraphicsDevice,
};

use super::resource::{Buffer, BufferRange};
use super::Renderer;

/// 常量缓冲区视图的大小对齐
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// 描述符堆类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapType {
    /// CBV / SRV / UAV
    CbvSrvUav,
    /// 采样器
    Sampler,
    /// 渲染目标视图
    Rtv,
    /// 深度模板视图
    Dsv,
}

impl DescriptorHeapType {
    pub fn name(&self) -> &'static str {
        match self {
            DescriptorHeapType::CbvSrvUav => "CBV/SRV/UAV",
            DescriptorHeapType::Sampler => "Sampler",
            DescriptorHeapType::Rtv => "RTV",
            DescriptorHeapType::Dsv => "DSV",
        }
    }
}

/// 描述符堆描述信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorHeapDesc {
    pub ty: DescriptorHeapType,
    /// 描述符数量
    pub capacity: u32,
    /// 是否着色器可见
    pub shader_visible: bool,
}

impl DescriptorHeapDesc {
    /// 着色器可见的 CBV/SRV/UAV 堆
    pub fn cbv_srv_uav(capacity: u32) -> Self {
        Self {
            ty: DescriptorHeapType::CbvSrvUav,
            capacity,
            shader_visible: true,
        }
    }

    /// 着色器可见的采样器堆
    pub fn sampler(capacity: u32) -> Self {
        Self {
            ty: DescriptorHeapType::Sampler,
            capacity,
            shader_visible: true,
        }
    }

    pub fn rtv(capacity: u32) -> Self {
        Self {
            ty: DescriptorHeapType::Rtv,
            capacity,
            shader_visible: false,
        }
    }

    pub fn dsv(capacity: u32) -> Self {
        Self {
            ty: DescriptorHeapType::Dsv,
            capacity,
            shader_visible: false,
        }
    }
}

/// 描述符堆统计信息
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DescriptorHeapStats {
    pub ty: DescriptorHeapType,
    /// 总容量
    pub capacity: u32,
    /// 已使用数量
    pub used: u32,
    /// 可用数量
    pub available: u32,
    /// 使用率 (0.0 - 1.0)
    pub usage_ratio: f32,
}

impl DescriptorHeapStats {
    pub fn new(ty: DescriptorHeapType, capacity: u32, used: u32) -> Self {
        let available = capacity.saturating_sub(used);
        let usage_ratio = if capacity > 0 {
            used as f32 / capacity as f32
        } else {
            0.0
        };

        Self {
            ty,
            capacity,
            used,
            available,
            usage_ratio,
        }
    }
}

/// 描述符堆
///
/// 固定容量的线性描述符表。分配游标是原子的，
/// 多个线程可以同时创建描述符集而不会得到重叠的区间。
pub struct DescriptorHeap<A: GraphicsApi> {
    raw: A::DescriptorHeap,
    desc: DescriptorHeapDesc,
    increment: u32,
    cursor: AtomicU32,
}

impl<A: GraphicsApi> DescriptorHeap<A> {
    /// 创建新的描述符堆
    ///
    /// 描述符大小只在创建时向设备查询一次。
    pub fn new(device: &A::Device, desc: DescriptorHeapDesc) -> Result<Self> {
        if desc.capacity == 0 {
            return Err(DistRhiError::InvalidArgument(format!(
                "{} descriptor heap capacity must be greater than 0",
                desc.ty.name()
            )));
        }

        let raw = device.create_descriptor_heap(&desc)?;
        let increment = device.descriptor_increment_size(desc.ty);

        tracing::debug!(
            heap = desc.ty.name(),
            capacity = desc.capacity,
            increment,
            shader_visible = desc.shader_visible,
            "Descriptor heap created"
        );

        Ok(Self {
            raw,
            desc,
            increment,
            cursor: AtomicU32::new(0),
        })
    }

    /// 分配 `count` 个连续槽位，返回起始偏移
    ///
    /// 容量不足时返回 `CapacityError::DescriptorHeapExhausted`，游标保持不变。
    pub fn allocate(&self, count: u32) -> Result<u32> {
        let capacity = self.desc.capacity;
        let result = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(count).filter(|&end| end <= capacity)
            });

        match result {
            Ok(offset) => Ok(offset),
            Err(used) => {
                crate::rhi_warn!(
                    heap = self.desc.ty.name(),
                    requested = count,
                    used,
                    capacity,
                    "Descriptor heap exhausted"
                );
                Err(CapacityError::DescriptorHeapExhausted {
                    heap: self.desc.ty.name(),
                    requested: count,
                    used,
                    capacity,
                }
                .into())
            }
        }
    }

    /// 已分配的槽位数
    pub fn used(&self) -> u32 {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> u32 {
        self.desc.capacity
    }

    pub fn heap_type(&self) -> DescriptorHeapType {
        self.desc.ty
    }

    pub fn is_shader_visible(&self) -> bool {
        self.desc.shader_visible
    }

    /// 单个描述符的大小
    pub fn increment(&self) -> u32 {
        self.increment
    }

    pub fn stats(&self) -> DescriptorHeapStats {
        DescriptorHeapStats::new(self.desc.ty, self.desc.capacity, self.used())
    }

    /// 第 `slot` 个槽位的 CPU 句柄
    pub fn cpu_handle(&self, slot: u32) -> CpuDescriptorHandle {
        self.raw.cpu_start().offset(slot, self.increment)
    }

    /// 第 `slot` 个槽位的 GPU 句柄，堆不是着色器可见时为 `None`
    pub fn gpu_handle(&self, slot: u32) -> Option<GpuDescriptorHandle> {
        self.raw.gpu_start().map(|start| start.offset(slot, self.increment))
    }

    pub fn raw(&self) -> &A::DescriptorHeap {
        &self.raw
    }
}

/// 描述符类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DescriptorType {
    #[default]
    Undefined,
    Sampler,
    Texture,
    UniformBuffer,
}

/// 布局中的一项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub ty: DescriptorType,
    /// 数组长度
    pub count: u32,
    /// 在一份描述符集内的槽位偏移
    pub offset: u32,
}

impl Descriptor {
    pub fn new(ty: DescriptorType, count: u32, offset: u32) -> Self {
        Self { ty, count, offset }
    }
}

/// 描述符集描述
#[derive(Debug, Clone)]
pub struct DescriptorSetDesc {
    /// 绑定到的根参数索引
    pub root_parameter_index: u32,
    /// 复制份数，通常等于在飞帧数
    pub max_sets: u32,
    pub descriptors: Vec<Descriptor>,
}

/// 一份描述符集所占的槽位数：所有布局项 `offset + count` 的最大值
///
/// 任一布局项越过 `u32` 范围时返回 `None`。
pub fn per_instance_descriptor_count(descriptors: &[Descriptor]) -> Option<u32> {
    descriptors
        .iter()
        .try_fold(0u32, |max, d| Some(max.max(d.offset.checked_add(d.count)?)))
}

/// 描述符集
///
/// 在共享堆中占据 `stride * max_sets` 个连续槽位。
#[derive(Debug, Clone)]
pub struct DescriptorSet {
    root_parameter_index: u32,
    base_offset: u32,
    stride: u32,
    max_sets: u32,
    descriptors: Arc<[Descriptor]>,
    heap_type: DescriptorHeapType,
    cpu_start: CpuDescriptorHandle,
    gpu_start: GpuDescriptorHandle,
    increment: u32,
}

impl DescriptorSet {
    pub fn root_parameter_index(&self) -> u32 {
        self.root_parameter_index
    }

    pub fn base_offset(&self) -> u32 {
        self.base_offset
    }

    /// 每份描述符集的槽位数
    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    pub fn heap_type(&self) -> DescriptorHeapType {
        self.heap_type
    }

    /// 第 `set_index` 份的起始槽位
    pub fn offset(&self, set_index: u32) -> u32 {
        self.base_offset + set_index * self.stride
    }

    /// 第 `set_index` 份占用的槽位区间
    pub fn instance_range(&self, set_index: u32) -> Range<u32> {
        let start = self.offset(set_index);
        start..start + self.stride
    }

    /// 第 `set_index` 份中偏移 `slot_in_set` 处的绝对槽位
    pub fn slot_of(&self, set_index: u32, slot_in_set: u32) -> u32 {
        self.offset(set_index) + slot_in_set
    }

    /// 写入用的 CPU 句柄
    pub fn cpu_handle(&self, set_index: u32, slot_in_set: u32) -> CpuDescriptorHandle {
        self.cpu_start
            .offset(self.slot_of(set_index, slot_in_set), self.increment)
    }

    /// 绑定用的 GPU 句柄
    pub fn gpu_handle(&self, set_index: u32) -> GpuDescriptorHandle {
        self.gpu_start.offset(self.offset(set_index), self.increment)
    }
}

/// 一次描述符写入
pub struct DescriptorData<'a, A: GraphicsApi> {
    /// 布局项索引
    pub index: u32,
    /// 数组内起始元素
    pub array_offset: u32,
    pub buffers: &'a [&'a Buffer<A>],
    /// 与 `buffers` 一一对应的视图区间，为空时视图覆盖整个缓冲区
    pub ranges: &'a [BufferRange],
}

impl<'a, A: GraphicsApi> DescriptorData<'a, A> {
    /// 从第 0 个元素开始写入整个缓冲区
    pub fn buffers(index: u32, buffers: &'a [&'a Buffer<A>]) -> Self {
        Self {
            index,
            array_offset: 0,
            buffers,
            ranges: &[],
        }
    }
}

impl<A: GraphicsApi> Renderer<A> {
    /// 在共享堆中创建描述符集
    ///
    /// 布局全部是采样器时从采样器堆分配，否则从 CBV/SRV/UAV 堆分配。
    pub fn add_descriptor_set(&self, desc: &DescriptorSetDesc) -> Result<DescriptorSet> {
        if desc.max_sets == 0 || desc.descriptors.is_empty() {
            return Err(DistRhiError::InvalidArgument(
                "descriptor set needs at least one descriptor and one set".to_string(),
            ));
        }

        let samplers = desc
            .descriptors
            .iter()
            .filter(|d| d.ty == DescriptorType::Sampler)
            .count();
        let heap = if samplers == desc.descriptors.len() {
            &self.sampler_heap
        } else if samplers == 0 {
            &self.cbv_srv_uav_heap
        } else {
            return Err(DistRhiError::InvalidArgument(
                "samplers cannot share a descriptor table with other descriptors".to_string(),
            ));
        };

        let gpu_start = heap.gpu_handle(0).ok_or_else(|| {
            DistRhiError::InvalidArgument(format!(
                "{} heap is not shader visible",
                heap.heap_type().name()
            ))
        })?;

        let (stride, total) = per_instance_descriptor_count(&desc.descriptors)
            .and_then(|stride| Some((stride, stride.checked_mul(desc.max_sets)?)))
            .ok_or_else(|| DistRhiError::InvalidArgument("descriptor set size overflows".to_string()))?;
        let base_offset = heap.allocate(total)?;

        tracing::debug!(
            heap = heap.heap_type().name(),
            base_offset,
            stride,
            max_sets = desc.max_sets,
            root_parameter_index = desc.root_parameter_index,
            "Descriptor set created"
        );

        Ok(DescriptorSet {
            root_parameter_index: desc.root_parameter_index,
            base_offset,
            stride,
            max_sets: desc.max_sets,
            descriptors: desc.descriptors.clone().into(),
            heap_type: heap.heap_type(),
            cpu_start: heap.cpu_handle(0),
            gpu_start,
            increment: heap.increment(),
        })
    }

    /// 写入第 `set_index` 份描述符集
    ///
    /// 目前只支持常量缓冲区，视图大小按 256 字节向上对齐。
    pub fn update_descriptor_set(
        &self,
        set_index: u32,
        set: &DescriptorSet,
        writes: &[DescriptorData<'_, A>],
    ) -> Result<()> {
        if set_index >= set.max_sets {
            return Err(DistRhiError::InvalidArgument(format!(
                "set index {} out of range (max_sets = {})",
                set_index, set.max_sets
            )));
        }

        for write in writes {
            let entry = set.descriptors.get(write.index as usize).ok_or_else(|| {
                DistRhiError::InvalidArgument(format!(
                    "descriptor index {} out of range ({} entries)",
                    write.index,
                    set.descriptors.len()
                ))
            })?;

            if entry.ty != DescriptorType::UniformBuffer {
                return Err(DistRhiError::Unsupported(format!(
                    "descriptor update for {:?}",
                    entry.ty
                )));
            }

            let end = write.array_offset as u64 + write.buffers.len() as u64;
            if end > entry.count as u64 {
                return Err(DistRhiError::InvalidArgument(format!(
                    "writing elements {}..{} of a descriptor with {} elements",
                    write.array_offset, end, entry.count
                )));
            }

            if !write.ranges.is_empty() && write.ranges.len() != write.buffers.len() {
                return Err(DistRhiError::InvalidArgument(format!(
                    "{} ranges given for {} buffers",
                    write.ranges.len(),
                    write.buffers.len()
                )));
            }

            for (j, buffer) in write.buffers.iter().enumerate() {
                let range = match write.ranges.get(j) {
                    Some(range) => *range,
                    None => BufferRange::whole(buffer),
                };
                if range.offset % CONSTANT_BUFFER_ALIGNMENT != 0
                    || range.offset.saturating_add(range.size) > buffer.size()
                {
                    return Err(DistRhiError::InvalidArgument(format!(
                        "view {}+{} is not a valid constant buffer range of a {} byte buffer",
                        range.offset,
                        range.size,
                        buffer.size()
                    )));
                }

                let slot_in_set = entry.offset + write.array_offset + j as u32;
                let handle = set.cpu_handle(set_index, slot_in_set);
                let size = align_up(range.size, CONSTANT_BUFFER_ALIGNMENT)
                    .and_then(|size| u32::try_from(size).ok())
                    .ok_or_else(|| {
                        DistRhiError::InvalidArgument(format!(
                            "constant buffer view of {} bytes is too large",
                            range.size
                        ))
                    })?;
                self.device
                    .create_constant_buffer_view(buffer.raw(), range.offset, size, handle);
            }
        }

        Ok(())
    }
}

/// 向上对齐到 `alignment`（2 的幂），溢出时返回 `None`
pub(crate) fn align_up(value: u64, alignment: u64) -> Option<u64> {
    debug_assert!(alignment.is_power_of_two());
    let mask = alignment - 1;
    value.checked_add(mask).map(|v| v & !mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::{HeadlessApi, RecordedCommand};
    use crate::renderer::resource::{BufferDesc, BufferLoadDesc, ResourceMemoryUsage};
    use crate::renderer::sync::QueueDesc;
    use crate::renderer::test_util::{headless_renderer, headless_renderer_with_heaps};
    use crate::renderer::RendererDesc;
    use std::collections::HashSet;
    use std::thread;

    fn uniform_set_desc(max_sets: u32) -> DescriptorSetDesc {
        DescriptorSetDesc {
            root_parameter_index: 0,
            max_sets,
            descriptors: vec![Descriptor::new(DescriptorType::UniformBuffer, 1, 0)],
        }
    }

    fn uniform_buffer(renderer: &Renderer<HeadlessApi>, size: u64) -> Buffer<HeadlessApi> {
        renderer
            .add_resource(&BufferLoadDesc {
                desc: BufferDesc::new(size, ResourceMemoryUsage::CpuToGpu),
                data: None,
            })
            .unwrap()
    }

    #[test]
    fn test_per_instance_count() {
        let layout = [
            Descriptor::new(DescriptorType::UniformBuffer, 2, 0),
            Descriptor::new(DescriptorType::UniformBuffer, 1, 5),
            Descriptor::new(DescriptorType::Texture, 3, 1),
        ];
        assert_eq!(per_instance_descriptor_count(&layout), Some(6));
        assert_eq!(per_instance_descriptor_count(&[]), Some(0));
    }

    #[test]
    fn test_overflowing_layout_is_rejected() {
        let layout = [Descriptor::new(DescriptorType::UniformBuffer, 2, u32::MAX)];
        assert_eq!(per_instance_descriptor_count(&layout), None);

        let renderer = headless_renderer();
        let err = renderer
            .add_descriptor_set(&DescriptorSetDesc {
                root_parameter_index: 0,
                max_sets: 1,
                descriptors: layout.to_vec(),
            })
            .unwrap_err();
        assert!(matches!(err, DistRhiError::InvalidArgument(_)));

        // stride 本身合法但乘以 max_sets 后溢出
        let err = renderer
            .add_descriptor_set(&DescriptorSetDesc {
                root_parameter_index: 0,
                max_sets: 3,
                descriptors: vec![Descriptor::new(DescriptorType::UniformBuffer, u32::MAX / 2, 0)],
            })
            .unwrap_err();
        assert!(matches!(err, DistRhiError::InvalidArgument(_)));
        assert_eq!(renderer.cbv_srv_uav_heap.used(), 0);
    }

    #[test]
    fn test_heap_allocation_is_linear() {
        let renderer = headless_renderer();
        let heap = &renderer.cbv_srv_uav_heap;
        assert_eq!(heap.allocate(4).unwrap(), 0);
        assert_eq!(heap.allocate(0).unwrap(), 4);
        assert_eq!(heap.allocate(3).unwrap(), 4);
        assert_eq!(heap.used(), 7);
        assert_eq!(heap.stats().available, heap.capacity() - 7);
    }

    #[test]
    fn test_heap_exhaustion_is_recoverable() {
        let renderer = headless_renderer_with_heaps(8, 4);
        let heap = &renderer.cbv_srv_uav_heap;

        assert_eq!(heap.allocate(6).unwrap(), 0);
        let err = heap.allocate(3).unwrap_err();
        assert!(matches!(
            err,
            DistRhiError::Capacity(CapacityError::DescriptorHeapExhausted {
                requested: 3,
                used: 6,
                capacity: 8,
                ..
            })
        ));
        // 失败不移动游标，剩余槽位仍可用到最后一个
        assert_eq!(heap.used(), 6);
        assert_eq!(heap.allocate(2).unwrap(), 6);
        assert!(heap.allocate(1).is_err());
    }

    #[test]
    fn test_add_descriptor_set_exhaustion() {
        let renderer = headless_renderer_with_heaps(5, 4);
        let set = renderer.add_descriptor_set(&uniform_set_desc(3)).unwrap();
        assert_eq!(set.base_offset(), 0);
        let err = renderer.add_descriptor_set(&uniform_set_desc(3)).unwrap_err();
        assert!(err.is_capacity());
    }

    #[test]
    fn test_concurrent_allocation_is_disjoint() {
        let renderer = headless_renderer();
        let heap = &renderer.cbv_srv_uav_heap;

        let ranges: Vec<Range<u32>> = thread::scope(|s| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        (0..50)
                            .map(|_| {
                                let start = heap.allocate(3).unwrap();
                                start..start + 3
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            workers.into_iter().flat_map(|w| w.join().unwrap()).collect()
        });

        let mut seen = HashSet::new();
        for range in ranges {
            for slot in range {
                assert!(seen.insert(slot), "slot {} handed out twice", slot);
            }
        }
        assert_eq!(heap.used(), 8 * 50 * 3);
    }

    #[test]
    fn test_set_instances_do_not_alias() {
        let renderer = headless_renderer();
        for stride_shape in 1..=4u32 {
            for max_sets in 1..=6u32 {
                let set = renderer
                    .add_descriptor_set(&DescriptorSetDesc {
                        root_parameter_index: 0,
                        max_sets,
                        descriptors: vec![
                            Descriptor::new(DescriptorType::UniformBuffer, 1, 0),
                            Descriptor::new(DescriptorType::UniformBuffer, stride_shape, 1),
                        ],
                    })
                    .unwrap();
                assert_eq!(set.stride(), stride_shape + 1);

                for a in 0..max_sets {
                    for b in 0..max_sets {
                        if a == b {
                            continue;
                        }
                        let ra = set.instance_range(a);
                        let rb = set.instance_range(b);
                        assert!(ra.end <= rb.start || rb.end <= ra.start);
                    }
                }
            }
        }
    }

    #[test]
    fn test_sets_do_not_overlap_each_other() {
        let renderer = headless_renderer();
        let first = renderer.add_descriptor_set(&uniform_set_desc(3)).unwrap();
        let second = renderer.add_descriptor_set(&uniform_set_desc(2)).unwrap();
        assert_eq!(first.instance_range(2).end, second.base_offset());
    }

    #[test]
    fn test_update_writes_expected_handles() {
        let renderer = headless_renderer();
        let set = renderer
            .add_descriptor_set(&DescriptorSetDesc {
                root_parameter_index: 1,
                max_sets: 3,
                descriptors: vec![
                    Descriptor::new(DescriptorType::UniformBuffer, 1, 0),
                    Descriptor::new(DescriptorType::UniformBuffer, 2, 1),
                ],
            })
            .unwrap();

        let a = uniform_buffer(&renderer, 64);
        let b = uniform_buffer(&renderer, 300);
        let c = uniform_buffer(&renderer, 256);

        renderer
            .update_descriptor_set(
                2,
                &set,
                &[
                    DescriptorData { index: 0, array_offset: 0, buffers: &[&a], ranges: &[] },
                    DescriptorData { index: 1, array_offset: 0, buffers: &[&b, &c], ranges: &[] },
                ],
            )
            .unwrap();

        let heap = &renderer.cbv_srv_uav_heap;
        let base = set.base_offset() + 2 * set.stride();

        let view = renderer.device.constant_buffer_view(heap.cpu_handle(base)).unwrap();
        assert_eq!(view.buffer_location, a.gpu_address());
        assert_eq!(view.size_in_bytes, 256);

        let view = renderer.device.constant_buffer_view(heap.cpu_handle(base + 1)).unwrap();
        assert_eq!(view.buffer_location, b.gpu_address());
        assert_eq!(view.size_in_bytes, 512);

        let view = renderer.device.constant_buffer_view(heap.cpu_handle(base + 2)).unwrap();
        assert_eq!(view.buffer_location, c.gpu_address());
        assert_eq!(view.size_in_bytes, 256);

        // 其他份没有被写入
        for set_index in 0..2 {
            for slot in set.instance_range(set_index) {
                assert!(renderer.device.constant_buffer_view(heap.cpu_handle(slot)).is_none());
            }
        }
    }

    #[test]
    fn test_update_with_sub_ranges() {
        let renderer = headless_renderer();
        let set = renderer.add_descriptor_set(&uniform_set_desc(1)).unwrap();
        let buffer = uniform_buffer(&renderer, 1024);

        renderer
            .update_descriptor_set(
                0,
                &set,
                &[DescriptorData {
                    index: 0,
                    array_offset: 0,
                    buffers: &[&buffer],
                    ranges: &[BufferRange { offset: 512, size: 100 }],
                }],
            )
            .unwrap();
        let view = renderer.device.constant_buffer_view(set.cpu_handle(0, 0)).unwrap();
        assert_eq!(view.buffer_location, buffer.gpu_address() + 512);
        assert_eq!(view.size_in_bytes, 256);

        let misaligned = renderer.update_descriptor_set(
            0,
            &set,
            &[DescriptorData {
                index: 0,
                array_offset: 0,
                buffers: &[&buffer],
                ranges: &[BufferRange { offset: 100, size: 16 }],
            }],
        );
        assert!(matches!(misaligned, Err(DistRhiError::InvalidArgument(_))));

        let past_end = renderer.update_descriptor_set(
            0,
            &set,
            &[DescriptorData {
                index: 0,
                array_offset: 0,
                buffers: &[&buffer],
                ranges: &[BufferRange { offset: 768, size: 512 }],
            }],
        );
        assert!(matches!(past_end, Err(DistRhiError::InvalidArgument(_))));
    }

    #[test]
    fn test_update_with_array_offset() {
        let renderer = headless_renderer();
        let set = renderer
            .add_descriptor_set(&DescriptorSetDesc {
                root_parameter_index: 0,
                max_sets: 2,
                descriptors: vec![Descriptor::new(DescriptorType::UniformBuffer, 4, 0)],
            })
            .unwrap();
        let buffer = uniform_buffer(&renderer, 16);

        renderer
            .update_descriptor_set(
                1,
                &set,
                &[DescriptorData { index: 0, array_offset: 3, buffers: &[&buffer], ranges: &[] }],
            )
            .unwrap();

        let handle = set.cpu_handle(1, 3);
        assert_eq!(handle, renderer.cbv_srv_uav_heap.cpu_handle(set.base_offset() + 4 + 3));
        assert!(renderer.device.constant_buffer_view(handle).is_some());
    }

    #[test]
    fn test_update_rejects_bad_writes() {
        let renderer = headless_renderer();
        let set = renderer.add_descriptor_set(&uniform_set_desc(2)).unwrap();
        let buffer = uniform_buffer(&renderer, 16);

        let out_of_range_set = renderer.update_descriptor_set(
            2,
            &set,
            &[DescriptorData { index: 0, array_offset: 0, buffers: &[&buffer], ranges: &[] }],
        );
        assert!(matches!(out_of_range_set, Err(DistRhiError::InvalidArgument(_))));

        let out_of_range_element = renderer.update_descriptor_set(
            0,
            &set,
            &[DescriptorData { index: 0, array_offset: 1, buffers: &[&buffer], ranges: &[] }],
        );
        assert!(matches!(out_of_range_element, Err(DistRhiError::InvalidArgument(_))));

        let texture_set = renderer
            .add_descriptor_set(&DescriptorSetDesc {
                root_parameter_index: 0,
                max_sets: 1,
                descriptors: vec![Descriptor::new(DescriptorType::Texture, 1, 0)],
            })
            .unwrap();
        let unsupported = renderer.update_descriptor_set(
            0,
            &texture_set,
            &[DescriptorData { index: 0, array_offset: 0, buffers: &[&buffer], ranges: &[] }],
        );
        assert!(matches!(unsupported, Err(DistRhiError::Unsupported(_))));
    }

    #[test]
    fn test_sampler_sets_use_sampler_heap() {
        let renderer = headless_renderer();
        let set = renderer
            .add_descriptor_set(&DescriptorSetDesc {
                root_parameter_index: 2,
                max_sets: 2,
                descriptors: vec![Descriptor::new(DescriptorType::Sampler, 2, 0)],
            })
            .unwrap();
        assert_eq!(set.heap_type(), DescriptorHeapType::Sampler);
        assert_eq!(renderer.sampler_heap.used(), 4);
        assert_eq!(renderer.cbv_srv_uav_heap.used(), 0);

        let mixed = renderer.add_descriptor_set(&DescriptorSetDesc {
            root_parameter_index: 0,
            max_sets: 1,
            descriptors: vec![
                Descriptor::new(DescriptorType::Sampler, 1, 0),
                Descriptor::new(DescriptorType::UniformBuffer, 1, 1),
            ],
        });
        assert!(mixed.is_err());
    }

    #[test]
    fn test_bind_uses_set_gpu_handle() {
        let renderer = headless_renderer();
        let queue = renderer.init_queue(&QueueDesc::default()).unwrap();
        let pool = renderer.init_cmd_pool(&queue).unwrap();
        let mut cmd = renderer.init_cmd(&pool).unwrap();

        let _padding = renderer.add_descriptor_set(&uniform_set_desc(1)).unwrap();
        let set = renderer
            .add_descriptor_set(&DescriptorSetDesc {
                root_parameter_index: 3,
                max_sets: 2,
                descriptors: vec![Descriptor::new(DescriptorType::UniformBuffer, 2, 0)],
            })
            .unwrap();

        cmd.begin().unwrap();
        cmd.bind_descriptor_set(&set, 1);
        cmd.end().unwrap();

        let expected = renderer
            .cbv_srv_uav_heap
            .gpu_handle(set.base_offset() + set.stride())
            .unwrap();
        assert!(cmd.raw().commands().contains(&RecordedCommand::SetRootDescriptorTable {
            root_parameter_index: 3,
            handle: expected,
        }));
    }

    #[test]
    fn test_independent_renderers_do_not_share_cursors() {
        let first = headless_renderer();
        let second = Renderer::<HeadlessApi>::new("second", &RendererDesc::default(), None).unwrap();
        first.add_descriptor_set(&uniform_set_desc(4)).unwrap();
        let set = second.add_descriptor_set(&uniform_set_desc(4)).unwrap();
        assert_eq!(set.base_offset(), 0);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), Some(0));
        assert_eq!(align_up(1, 256), Some(256));
        assert_eq!(align_up(256, 256), Some(256));
        assert_eq!(align_up(257, 256), Some(512));
        assert_eq!(align_up(u64::MAX - 255, 256), Some(u64::MAX - 255));
        assert_eq!(align_up(u64::MAX - 8, 256), None);
    }
}
