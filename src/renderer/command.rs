//! 命令池与命令缓冲
//!
//! `CmdPool` 包装一个原生命令分配器，`Cmd` 是从中分配的一个命令列表。
//!
//! # 设计原则
//!
//! - **创建即关闭**：`Cmd` 创建后处于关闭状态，`begin`/`end` 之间可以录制
//! - **池不跟踪存活**：`CmdPool::reset` 不检查 GPU 是否执行完毕，
//!   调用方必须先等待对应的 fence（命令环的使用流程保证这一点）
//! - **单线程录制**：同一时刻只能有一个线程向某个 `Cmd` 录制
//! - **无逐帧校验**：调用顺序错误只在 debug 构建中断言

use std::sync::Arc;

use crate::core::error::Result;
use crate::gfx::backend::{
    BarrierResource, CommandAllocator, CommandList, GraphicsApi, GraphicsDevice, RenderTargetRaw,
    ScissorRect, TransitionBarrier, VertexBufferView, Viewport,
};

use super::barrier::{to_native_state, BufferBarrier, RenderTargetBarrier};
use super::descriptor::{DescriptorHeap, DescriptorSet};
use super::pipeline::Pipeline;
use super::resource::Buffer;
use super::sync::{Queue, QueueType};
use super::target::{BindRenderTargetsDesc, LoadAction, RenderTarget, MAX_RENDER_TARGET_ATTACHMENTS};
use super::Renderer;

/// 命令池
pub struct CmdPool<A: GraphicsApi> {
    raw: A::CmdAllocator,
    queue_type: QueueType,
}

impl<A: GraphicsApi> CmdPool<A> {
    /// 重置分配器，使从中分配的所有命令列表失效
    ///
    /// 调用前必须确认这些命令列表已在 GPU 上执行完毕。
    pub fn reset(&self) -> Result<()> {
        self.raw.reset()
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    pub fn raw(&self) -> &A::CmdAllocator {
        &self.raw
    }
}

/// 命令缓冲
pub struct Cmd<A: GraphicsApi> {
    raw: A::CmdList,
    allocator: A::CmdAllocator,
    cbv_srv_uav_heap: Arc<DescriptorHeap<A>>,
    sampler_heap: Arc<DescriptorHeap<A>>,
    recording: bool,
}

impl<A: GraphicsApi> Cmd<A> {
    /// 开始录制，并绑定渲染器的两个着色器可见堆
    pub fn begin(&mut self) -> Result<()> {
        debug_assert!(!self.recording, "cmd is already recording");
        self.raw.reset(&self.allocator)?;
        self.raw
            .set_descriptor_heaps(&[self.cbv_srv_uav_heap.raw(), self.sampler_heap.raw()]);
        self.recording = true;
        Ok(())
    }

    /// 结束录制，命令列表变为可提交
    pub fn end(&mut self) -> Result<()> {
        debug_assert!(self.recording, "cmd is not recording");
        self.raw.close()?;
        self.recording = false;
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// 资源状态转换
    ///
    /// 所有屏障合并为一次原生调用，缓冲区屏障在前。
    pub fn resource_barrier(
        &mut self,
        buffer_barriers: &[BufferBarrier<'_, A>],
        render_target_barriers: &[RenderTargetBarrier<'_, A>],
    ) {
        debug_assert!(self.recording, "cmd is not recording");

        let buffers = buffer_barriers.iter().map(|b| TransitionBarrier {
            resource: BarrierResource::Buffer(b.buffer.raw()),
            before: to_native_state::<A>(b.current_state),
            after: to_native_state::<A>(b.new_state),
        });
        let targets = render_target_barriers.iter().map(|b| TransitionBarrier {
            resource: BarrierResource::RenderTarget(b.render_target.raw()),
            before: to_native_state::<A>(b.current_state),
            after: to_native_state::<A>(b.new_state),
        });
        let barriers: Vec<_> = buffers.chain(targets).collect();

        if !barriers.is_empty() {
            self.raw.resource_barriers(&barriers);
        }
    }

    /// 绑定渲染目标，`None` 解除绑定
    ///
    /// 加载动作为 `Clear` 的目标在绑定前清除。
    pub fn bind_render_targets(&mut self, desc: Option<&BindRenderTargetsDesc<'_, A>>) {
        debug_assert!(self.recording, "cmd is not recording");

        let Some(desc) = desc else {
            self.raw.set_render_targets(&[], None);
            return;
        };
        debug_assert!(
            desc.render_targets.len() <= MAX_RENDER_TARGET_ATTACHMENTS,
            "too many render targets"
        );

        let mut colors = Vec::with_capacity(desc.render_targets.len());
        for bind in &desc.render_targets {
            let view = bind.render_target.raw().view();
            if bind.load_action == LoadAction::Clear {
                self.raw.clear_render_target(view, bind.resolved_clear_color());
            }
            colors.push(view);
        }

        let depth = desc.depth_stencil.as_ref().map(|bind| {
            let view = bind.render_target.raw().view();
            if bind.load_action == LoadAction::Clear {
                self.raw.clear_depth(view, bind.resolved_clear_depth());
            }
            view
        });

        self.raw.set_render_targets(&colors, depth);
    }

    /// 用指定颜色清除颜色目标
    pub fn clear_render_target(&mut self, render_target: &RenderTarget<A>, color: [f32; 4]) {
        debug_assert!(self.recording, "cmd is not recording");
        self.raw.clear_render_target(render_target.raw().view(), color);
    }

    pub fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32, min_depth: f32, max_depth: f32) {
        debug_assert!(self.recording, "cmd is not recording");
        self.raw.set_viewport(Viewport {
            x,
            y,
            width,
            height,
            min_depth,
            max_depth,
        });
    }

    /// 裁剪矩形为 (x, y, x + width, y + height)
    pub fn set_scissor(&mut self, x: u32, y: u32, width: u32, height: u32) {
        debug_assert!(self.recording, "cmd is not recording");
        self.raw.set_scissor(ScissorRect {
            left: x as i32,
            top: y as i32,
            right: x.saturating_add(width) as i32,
            bottom: y.saturating_add(height) as i32,
        });
    }

    pub fn bind_pipeline(&mut self, pipeline: &Pipeline<A>) {
        debug_assert!(self.recording, "cmd is not recording");
        self.raw.bind_pipeline(pipeline.raw());
    }

    /// 从槽位 0 开始绑定顶点缓冲区，每个缓冲区的结构步长必须大于 0
    pub fn bind_vertex_buffers(&mut self, buffers: &[&Buffer<A>]) {
        debug_assert!(self.recording, "cmd is not recording");

        let views: Vec<VertexBufferView> = buffers
            .iter()
            .map(|buffer| {
                debug_assert!(buffer.struct_stride() > 0, "vertex buffer stride is 0");
                VertexBufferView {
                    buffer_location: buffer.gpu_address(),
                    size_in_bytes: buffer.size().min(u32::MAX as u64) as u32,
                    stride_in_bytes: buffer.struct_stride(),
                }
            })
            .collect();
        self.raw.set_vertex_buffers(&views);
    }

    /// 把第 `set_index` 份描述符集绑定到它的根参数
    ///
    /// 不检查该份是否已经写入。
    pub fn bind_descriptor_set(&mut self, set: &DescriptorSet, set_index: u32) {
        debug_assert!(self.recording, "cmd is not recording");
        debug_assert!(set_index < set.max_sets(), "set index out of range");
        self.raw
            .set_root_descriptor_table(set.root_parameter_index(), set.gpu_handle(set_index));
    }

    /// 单实例绘制
    pub fn draw(&mut self, vertex_count: u32, first_vertex: u32) {
        debug_assert!(self.recording, "cmd is not recording");
        self.raw.draw(vertex_count, first_vertex);
    }

    pub fn raw(&self) -> &A::CmdList {
        &self.raw
    }
}

impl<A: GraphicsApi> Renderer<A> {
    /// 为队列创建命令池
    pub fn init_cmd_pool(&self, queue: &Queue<A>) -> Result<CmdPool<A>> {
        let queue_type = queue.queue_type();
        let raw = self.device.create_cmd_allocator(queue_type)?;
        Ok(CmdPool { raw, queue_type })
    }

    /// 从命令池分配一个关闭状态的命令缓冲
    pub fn init_cmd(&self, pool: &CmdPool<A>) -> Result<Cmd<A>> {
        let raw = self.device.create_cmd_list(pool.queue_type, &pool.raw)?;
        Ok(Cmd {
            raw,
            allocator: pool.raw.clone(),
            cbv_srv_uav_heap: Arc::clone(&self.cbv_srv_uav_heap),
            sampler_heap: Arc::clone(&self.sampler_heap),
            recording: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::backend::{BufferRaw, DescriptorHeapRaw};
    use crate::gfx::headless::{HeadlessApi, HeadlessState, RecordedBarrier, RecordedCommand};
    use crate::renderer::barrier::ResourceState;
    use crate::renderer::resource::{BufferDesc, BufferLoadDesc, ResourceMemoryUsage};
    use crate::renderer::sync::QueueDesc;
    use crate::renderer::target::{BindDepthTargetDesc, BindRenderTargetDesc, ImageFormat, RenderTargetDesc};
    use crate::renderer::test_util::headless_renderer;

    fn views_of(targets: &[&RenderTarget<HeadlessApi>]) -> Vec<crate::gfx::backend::CpuDescriptorHandle> {
        targets.iter().map(|rt| rt.raw().view()).collect()
    }

    fn recording_cmd(renderer: &Renderer<HeadlessApi>) -> (CmdPool<HeadlessApi>, Cmd<HeadlessApi>) {
        let queue = renderer.init_queue(&QueueDesc::default()).unwrap();
        let pool = renderer.init_cmd_pool(&queue).unwrap();
        let mut cmd = renderer.init_cmd(&pool).unwrap();
        cmd.begin().unwrap();
        (pool, cmd)
    }

    #[test]
    fn test_begin_binds_both_heaps() {
        let renderer = headless_renderer();
        let (_pool, mut cmd) = recording_cmd(&renderer);
        assert!(cmd.is_recording());
        cmd.end().unwrap();
        assert!(!cmd.is_recording());

        let expected = vec![
            renderer.cbv_srv_uav_heap.raw().cpu_start(),
            renderer.sampler_heap.raw().cpu_start(),
        ];
        assert_eq!(cmd.raw().commands(), &[RecordedCommand::SetDescriptorHeaps(expected)]);
    }

    #[test]
    fn test_begin_resets_list_and_allocator() {
        let renderer = headless_renderer();
        let (pool, mut cmd) = recording_cmd(&renderer);
        cmd.draw(3, 0);
        cmd.end().unwrap();

        pool.reset().unwrap();
        cmd.begin().unwrap();
        cmd.end().unwrap();

        assert_eq!(pool.raw().reset_count(), 1);
        assert_eq!(cmd.raw().commands().len(), 1);
        assert_eq!(cmd.raw().reset_count(), 2);
    }

    #[test]
    fn test_barriers_are_batched() {
        let renderer = headless_renderer();
        let (_pool, mut cmd) = recording_cmd(&renderer);
        let target = renderer
            .add_render_target(&RenderTargetDesc::color(8, 8, ImageFormat::R8G8B8A8Unorm))
            .unwrap();
        let buffer = renderer
            .add_resource(&BufferLoadDesc {
                desc: BufferDesc::new(64, ResourceMemoryUsage::GpuOnly),
                data: None,
            })
            .unwrap();

        cmd.resource_barrier(
            &[BufferBarrier::new(
                &buffer,
                ResourceState::COPY_DEST,
                ResourceState::VERTEX_AND_CONSTANT_BUFFER,
            )],
            &[RenderTargetBarrier::new(
                &target,
                ResourceState::PRESENT,
                ResourceState::RENDER_TARGET,
            )],
        );
        cmd.resource_barrier(&[], &[]);
        cmd.end().unwrap();

        let commands = cmd.raw().commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(
            commands[1],
            RecordedCommand::ResourceBarriers(vec![
                RecordedBarrier {
                    resource: buffer.raw().gpu_address(),
                    before: HeadlessState::COPY_DEST,
                    after: HeadlessState::VERTEX_AND_CONSTANT_BUFFER,
                },
                RecordedBarrier {
                    resource: target.raw().view().ptr as u64,
                    before: HeadlessState::PRESENT,
                    after: HeadlessState::RENDER_TARGET,
                },
            ])
        );
    }

    #[test]
    fn test_bind_render_targets_clears_then_binds() {
        let renderer = headless_renderer();
        let (_pool, mut cmd) = recording_cmd(&renderer);
        let color = renderer
            .add_render_target(&RenderTargetDesc::color(8, 8, ImageFormat::R8G8B8A8Unorm))
            .unwrap();
        let kept = renderer
            .add_render_target(&RenderTargetDesc::color(8, 8, ImageFormat::R8G8B8A8Unorm))
            .unwrap();
        let depth = renderer.add_render_target(&RenderTargetDesc::depth(8, 8)).unwrap();

        let mut clear = BindRenderTargetDesc::clear(&color);
        clear.clear_value = Some([0.1, 0.1, 0.1, 1.0]);
        cmd.bind_render_targets(Some(&BindRenderTargetsDesc {
            render_targets: vec![clear, BindRenderTargetDesc::load(&kept)],
            depth_stencil: Some(BindDepthTargetDesc::clear(&depth)),
        }));
        cmd.bind_render_targets(None);
        cmd.end().unwrap();

        let commands = &cmd.raw().commands()[1..];
        assert_eq!(
            commands,
            &[
                RecordedCommand::ClearRenderTarget {
                    view: color.raw().view(),
                    color: [0.1, 0.1, 0.1, 1.0],
                },
                RecordedCommand::ClearDepth {
                    view: depth.raw().view(),
                    depth: 1.0,
                },
                RecordedCommand::SetRenderTargets {
                    colors: views_of(&[&color, &kept]),
                    depth_stencil: Some(depth.raw().view()),
                },
                RecordedCommand::SetRenderTargets {
                    colors: vec![],
                    depth_stencil: None,
                },
            ]
        );
    }

    #[test]
    fn test_scissor_uses_exclusive_corner() {
        let renderer = headless_renderer();
        let (_pool, mut cmd) = recording_cmd(&renderer);
        cmd.set_viewport(0.0, 0.0, 640.0, 480.0, 0.0, 1.0);
        cmd.set_scissor(10, 20, 100, 50);
        cmd.end().unwrap();

        assert_eq!(
            cmd.raw().commands()[2],
            RecordedCommand::SetScissor(ScissorRect {
                left: 10,
                top: 20,
                right: 110,
                bottom: 70,
            })
        );
    }

    #[test]
    fn test_vertex_buffer_views() {
        let renderer = headless_renderer();
        let (_pool, mut cmd) = recording_cmd(&renderer);
        let vertices = [0u8; 84];
        let buffer = renderer
            .add_resource(&BufferLoadDesc {
                desc: BufferDesc::new(84, ResourceMemoryUsage::GpuOnly).with_stride(28),
                data: Some(&vertices),
            })
            .unwrap();

        cmd.bind_vertex_buffers(&[&buffer]);
        cmd.draw(3, 0);
        cmd.end().unwrap();

        let commands = cmd.raw().commands();
        assert_eq!(
            commands[1],
            RecordedCommand::SetVertexBuffers(vec![VertexBufferView {
                buffer_location: buffer.gpu_address(),
                size_in_bytes: 84,
                stride_in_bytes: 28,
            }])
        );
        assert_eq!(
            commands[2],
            RecordedCommand::Draw {
                vertex_count: 3,
                first_vertex: 0,
            }
        );
    }
}
