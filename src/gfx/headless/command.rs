//! Headless 命令分配器与命令列表

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::{
    BarrierResource, BufferRaw, CommandAllocator, CommandList, CpuDescriptorHandle,
    DescriptorHeapRaw, GpuDescriptorHandle, RenderTargetRaw, ScissorRect, TransitionBarrier,
    VertexBufferView, Viewport,
};

use super::{HeadlessApi, HeadlessDescriptorHeap, HeadlessPipeline, HeadlessState};

/// 记录下来的一个屏障
///
/// 缓冲区以 GPU 地址标识，渲染目标以视图句柄标识。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedBarrier {
    pub resource: u64,
    pub before: HeadlessState,
    pub after: HeadlessState,
}

/// 记录下来的一条命令
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    SetDescriptorHeaps(Vec<CpuDescriptorHandle>),
    ResourceBarriers(Vec<RecordedBarrier>),
    SetRenderTargets {
        colors: Vec<CpuDescriptorHandle>,
        depth_stencil: Option<CpuDescriptorHandle>,
    },
    ClearRenderTarget {
        view: CpuDescriptorHandle,
        color: [f32; 4],
    },
    ClearDepth {
        view: CpuDescriptorHandle,
        depth: f32,
    },
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    BindPipeline(u64),
    SetVertexBuffers(Vec<VertexBufferView>),
    SetRootDescriptorTable {
        root_parameter_index: u32,
        handle: GpuDescriptorHandle,
    },
    Draw {
        vertex_count: u32,
        first_vertex: u32,
    },
}

/// 命令分配器，只统计重置次数
#[derive(Debug, Clone, Default)]
pub struct HeadlessCmdAllocator {
    resets: Arc<AtomicU32>,
}

impl HeadlessCmdAllocator {
    pub fn reset_count(&self) -> u32 {
        self.resets.load(Ordering::Acquire)
    }
}

impl CommandAllocator for HeadlessCmdAllocator {
    fn reset(&self) -> Result<()> {
        self.resets.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// 记录命令的命令列表
#[derive(Debug, Default)]
pub struct HeadlessCmdList {
    commands: Vec<RecordedCommand>,
    recording: bool,
    resets: u32,
}

impl HeadlessCmdList {
    /// 自上次重置以来记录的命令
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn reset_count(&self) -> u32 {
        self.resets
    }

    fn record(&mut self, command: RecordedCommand) {
        debug_assert!(self.recording, "recording into a closed command list");
        self.commands.push(command);
    }
}

impl CommandList<HeadlessApi> for HeadlessCmdList {
    fn reset(&mut self, _allocator: &HeadlessCmdAllocator) -> Result<()> {
        if self.recording {
            return Err(GraphicsError::CommandExecution(
                "cannot reset a command list that is still recording".to_string(),
            )
            .into());
        }
        self.commands.clear();
        self.recording = true;
        self.resets += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.recording {
            return Err(GraphicsError::CommandExecution("command list is already closed".to_string()).into());
        }
        self.recording = false;
        Ok(())
    }

    fn set_descriptor_heaps(&mut self, heaps: &[&HeadlessDescriptorHeap]) {
        let starts = heaps.iter().map(|heap| heap.cpu_start()).collect();
        self.record(RecordedCommand::SetDescriptorHeaps(starts));
    }

    fn resource_barriers(&mut self, barriers: &[TransitionBarrier<'_, HeadlessApi>]) {
        let recorded = barriers
            .iter()
            .map(|barrier| RecordedBarrier {
                resource: match barrier.resource {
                    BarrierResource::Buffer(buffer) => buffer.gpu_address(),
                    BarrierResource::RenderTarget(target) => target.view().ptr as u64,
                },
                before: barrier.before,
                after: barrier.after,
            })
            .collect();
        self.record(RecordedCommand::ResourceBarriers(recorded));
    }

    fn set_render_targets(&mut self, colors: &[CpuDescriptorHandle], depth_stencil: Option<CpuDescriptorHandle>) {
        self.record(RecordedCommand::SetRenderTargets {
            colors: colors.to_vec(),
            depth_stencil,
        });
    }

    fn clear_render_target(&mut self, view: CpuDescriptorHandle, color: [f32; 4]) {
        self.record(RecordedCommand::ClearRenderTarget { view, color });
    }

    fn clear_depth(&mut self, view: CpuDescriptorHandle, depth: f32) {
        self.record(RecordedCommand::ClearDepth { view, depth });
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.record(RecordedCommand::SetViewport(viewport));
    }

    fn set_scissor(&mut self, rect: ScissorRect) {
        self.record(RecordedCommand::SetScissor(rect));
    }

    fn bind_pipeline(&mut self, pipeline: &HeadlessPipeline) {
        self.record(RecordedCommand::BindPipeline(pipeline.id()));
    }

    fn set_vertex_buffers(&mut self, views: &[VertexBufferView]) {
        self.record(RecordedCommand::SetVertexBuffers(views.to_vec()));
    }

    fn set_root_descriptor_table(&mut self, root_parameter_index: u32, handle: GpuDescriptorHandle) {
        self.record(RecordedCommand::SetRootDescriptorTable {
            root_parameter_index,
            handle,
        });
    }

    fn draw(&mut self, vertex_count: u32, first_vertex: u32) {
        self.record(RecordedCommand::Draw {
            vertex_count,
            first_vertex,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_close_protocol() {
        let allocator = HeadlessCmdAllocator::default();
        let mut list = HeadlessCmdList::default();

        assert!(list.close().is_err());
        list.reset(&allocator).unwrap();
        assert!(list.reset(&allocator).is_err());
        list.draw(3, 0);
        list.close().unwrap();

        assert!(!list.is_recording());
        assert_eq!(list.commands().len(), 1);
        assert_eq!(list.reset_count(), 1);
    }
}
