//! GPU 命令环
//!
//! 预先分配 `pool_count × cmd_per_pool_count` 个 (命令池, 命令缓冲, fence) 三元组，
//! 每帧轮转一个池，把“下一个可用的”资源组交给应用。
//!
//! # 设计原则
//!
//! - **只管索引**：环本身不等待也不分配，等待 fence、重置池由调用方完成
//! - **池级 fence**：重置分配器会使其上所有命令列表失效，
//!   因此同一个池的上一帧必须整体完成后才能复用
//! - **有界在途帧**：池索引对 `pool_count` 取模，在途帧数不超过池数
//!
//! # 每帧流程
//!
//! ```text
//! element = ring.next_element(true, 1)
//! element.fence.wait()        // 上一次使用这个槽位的帧已完成
//! element.pool.reset()
//! cmd.begin() ... cmd.end()
//! queue.submit(cmds, Some(element.fence))
//! queue.present(...)
//! ```

use std::ops::Range;

use crate::core::error::{DistRhiError, Result};
use crate::gfx::backend::GraphicsApi;

use super::command::{Cmd, CmdPool};
use super::sync::{Fence, Queue};
use super::Renderer;

/// 一个环最多的命令池数
pub const MAX_GPU_CMD_POOLS_PER_RING: u32 = 64;

/// 每个命令池最多的命令缓冲数
pub const MAX_GPU_CMDS_PER_POOL: u32 = 4;

/// 命令环描述
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuCmdRingDesc {
    /// 池数，即最多在途帧数
    pub pool_count: u32,
    pub cmd_per_pool_count: u32,
}

impl Default for GpuCmdRingDesc {
    fn default() -> Self {
        Self {
            pool_count: 2,
            cmd_per_pool_count: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RingCursor {
    pool: u32,
    cmd: u32,
    fence: u32,
}

/// 一次获取得到的资源组
pub struct GpuCmdRingElement<'a, A: GraphicsApi> {
    pub pool: &'a CmdPool<A>,
    /// 连续的 `cmd_count` 个命令缓冲
    pub cmds: &'a mut [Cmd<A>],
    pub fence: &'a Fence<A>,
    pub pool_index: u32,
    pub cmd_range: Range<u32>,
    pub fence_index: u32,
}

/// GPU 命令环
pub struct GpuCmdRing<A: GraphicsApi> {
    cmds: Vec<Vec<Cmd<A>>>,
    fences: Vec<Vec<Fence<A>>>,
    pools: Vec<CmdPool<A>>,
    desc: GpuCmdRingDesc,
    cursor: Option<RingCursor>,
}

impl<A: GraphicsApi> GpuCmdRing<A> {
    /// 一次性创建所有池、命令缓冲和 fence
    pub fn new(renderer: &Renderer<A>, queue: &Queue<A>, desc: &GpuCmdRingDesc) -> Result<Self> {
        if desc.pool_count == 0 || desc.pool_count > MAX_GPU_CMD_POOLS_PER_RING {
            return Err(DistRhiError::InvalidArgument(format!(
                "pool_count must be in 1..={}, got {}",
                MAX_GPU_CMD_POOLS_PER_RING, desc.pool_count
            )));
        }
        if desc.cmd_per_pool_count == 0 || desc.cmd_per_pool_count > MAX_GPU_CMDS_PER_POOL {
            return Err(DistRhiError::InvalidArgument(format!(
                "cmd_per_pool_count must be in 1..={}, got {}",
                MAX_GPU_CMDS_PER_POOL, desc.cmd_per_pool_count
            )));
        }

        let mut pools = Vec::with_capacity(desc.pool_count as usize);
        let mut cmds = Vec::with_capacity(desc.pool_count as usize);
        let mut fences = Vec::with_capacity(desc.pool_count as usize);

        for _ in 0..desc.pool_count {
            let pool = renderer.init_cmd_pool(queue)?;
            let mut pool_cmds = Vec::with_capacity(desc.cmd_per_pool_count as usize);
            let mut pool_fences = Vec::with_capacity(desc.cmd_per_pool_count as usize);
            for _ in 0..desc.cmd_per_pool_count {
                pool_cmds.push(renderer.init_cmd(&pool)?);
                pool_fences.push(renderer.init_fence()?);
            }
            pools.push(pool);
            cmds.push(pool_cmds);
            fences.push(pool_fences);
        }

        crate::rhi_debug!(
            "GpuCmdRing created: {} pools x {} cmds",
            desc.pool_count,
            desc.cmd_per_pool_count
        );

        Ok(Self {
            cmds,
            fences,
            pools,
            desc: *desc,
            cursor: None,
        })
    }

    /// 获取下一组资源
    ///
    /// `cycle_pool` 为真时进入下一个池（新的一帧），并把命令和 fence 游标归零。
    /// 当前池剩余的命令缓冲不足 `cmd_count` 时返回 `None`，
    /// 第一次轮转之前请求也返回 `None`。
    ///
    /// 返回的 fence 必须在重置池或录制命令之前等待。
    pub fn next_element(&mut self, cycle_pool: bool, cmd_count: u32) -> Option<GpuCmdRingElement<'_, A>> {
        let cmd_per_pool = self.desc.cmd_per_pool_count;

        let mut cursor = if cycle_pool {
            let pool = match self.cursor {
                Some(cursor) => (cursor.pool + 1) % self.desc.pool_count,
                None => 0,
            };
            RingCursor { pool, cmd: 0, fence: 0 }
        } else {
            self.cursor?
        };
        self.cursor = Some(cursor);

        let cmd_end = cursor.cmd.checked_add(cmd_count)?;
        if cmd_end > cmd_per_pool || cursor.fence >= cmd_per_pool {
            tracing::trace!(
                pool = cursor.pool,
                cmd_index = cursor.cmd,
                cmd_count,
                "GpuCmdRing exhausted for this frame"
            );
            return None;
        }

        let pool_index = cursor.pool;
        let fence_index = cursor.fence;
        let cmd_range = cursor.cmd..cmd_end;

        cursor.cmd = cmd_end;
        cursor.fence += 1;
        self.cursor = Some(cursor);

        let p = pool_index as usize;
        Some(GpuCmdRingElement {
            pool: &self.pools[p],
            cmds: &mut self.cmds[p][cmd_range.start as usize..cmd_range.end as usize],
            fence: &self.fences[p][fence_index as usize],
            pool_index,
            cmd_range,
            fence_index,
        })
    }

    pub fn pool_count(&self) -> u32 {
        self.desc.pool_count
    }

    pub fn cmd_per_pool_count(&self) -> u32 {
        self.desc.cmd_per_pool_count
    }

    /// 某个槽位的 fence
    pub fn fence(&self, pool_index: u32, fence_index: u32) -> Option<&Fence<A>> {
        self.fences
            .get(pool_index as usize)
            .and_then(|fences| fences.get(fence_index as usize))
    }

    /// 等待所有槽位的 fence
    pub fn wait_all(&self) -> Result<()> {
        for fence in self.fences.iter().flatten() {
            fence.wait()?;
        }
        Ok(())
    }
}

impl<A: GraphicsApi> Drop for GpuCmdRing<A> {
    fn drop(&mut self) {
        if let Err(e) = self.wait_all() {
            crate::rhi_error!("GpuCmdRing teardown wait failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::backend::NativeFence;
    use crate::gfx::headless::{HeadlessApi, HeadlessCompletion};
    use crate::renderer::sync::{QueueDesc, QueueSubmitDesc};
    use crate::renderer::test_util::headless_renderer;
    use std::collections::HashSet;
    use std::time::Duration;

    fn setup() -> (Renderer<HeadlessApi>, Queue<HeadlessApi>) {
        let renderer = headless_renderer();
        let queue = renderer.init_queue(&QueueDesc::default()).unwrap();
        (renderer, queue)
    }

    fn desc(pool_count: u32, cmd_per_pool_count: u32) -> GpuCmdRingDesc {
        GpuCmdRingDesc {
            pool_count,
            cmd_per_pool_count,
        }
    }

    #[test]
    fn test_pool_index_wraps() {
        for pool_count in 1..=5 {
            let (renderer, queue) = setup();
            let mut ring = GpuCmdRing::new(&renderer, &queue, &desc(pool_count, 1)).unwrap();
            for n in 0..(pool_count * 3) {
                let element = ring.next_element(true, 1).unwrap();
                assert_eq!(element.pool_index, n % pool_count);
                assert_eq!(element.cmd_range, 0..1);
                assert_eq!(element.fence_index, 0);
            }
        }
    }

    #[test]
    fn test_outstanding_elements_use_distinct_pools() {
        let pool_count = 3;
        let (renderer, queue) = setup();
        let mut ring = GpuCmdRing::new(&renderer, &queue, &desc(pool_count, 1)).unwrap();

        // 连续 pool_count 次轮转中没有重复的池
        for start in 0..pool_count {
            let indices: HashSet<u32> = (0..pool_count)
                .map(|_| ring.next_element(true, 1).unwrap().pool_index)
                .collect();
            assert_eq!(indices.len(), pool_count as usize, "window starting at {}", start);
        }
    }

    #[test]
    fn test_cmd_capacity() {
        let (renderer, queue) = setup();
        let mut ring = GpuCmdRing::new(&renderer, &queue, &desc(2, 4)).unwrap();

        assert!(ring.next_element(true, 0).is_some());
        assert!(ring.next_element(true, 5).is_none());

        // 轮转时的空请求本身也占用 fence 槽位 0
        ring.next_element(true, 0).unwrap();
        let first = ring.next_element(false, 2).unwrap();
        assert_eq!(first.cmd_range, 0..2);
        assert_eq!(first.cmds.len(), 2);
        assert_eq!(first.fence_index, 1);
        let pool_index = first.pool_index;

        let second = ring.next_element(false, 2).unwrap();
        assert_eq!(second.cmd_range, 2..4);
        assert_eq!(second.fence_index, 2);
        assert_eq!(second.pool_index, pool_index);

        assert!(ring.next_element(false, 1).is_none());
    }

    #[test]
    fn test_oversized_request_after_cycle() {
        let (renderer, queue) = setup();
        let mut ring = GpuCmdRing::new(&renderer, &queue, &desc(2, 4)).unwrap();

        let element = ring.next_element(true, 0).unwrap();
        assert_eq!(element.cmd_range, 0..0);
        assert!(ring.next_element(false, 5).is_none());

        // 失败的请求不移动游标
        let element = ring.next_element(false, 4).unwrap();
        assert_eq!(element.cmd_range, 0..4);
        assert_eq!(element.fence_index, 1);
    }

    #[test]
    fn test_fence_advances_once_per_acquisition() {
        let (renderer, queue) = setup();
        let mut ring = GpuCmdRing::new(&renderer, &queue, &desc(1, 4)).unwrap();

        let element = ring.next_element(true, 3).unwrap();
        assert_eq!(element.cmd_range, 0..3);
        assert_eq!(element.fence_index, 0);

        let element = ring.next_element(false, 1).unwrap();
        assert_eq!(element.cmd_range, 3..4);
        assert_eq!(element.fence_index, 1);
    }

    #[test]
    fn test_zero_cmd_requests_are_bounded() {
        let (renderer, queue) = setup();
        let mut ring = GpuCmdRing::new(&renderer, &queue, &desc(1, 2)).unwrap();

        assert!(ring.next_element(true, 0).is_some());
        assert!(ring.next_element(false, 0).is_some());
        // fence 游标同样受 cmd_per_pool_count 限制
        assert!(ring.next_element(false, 0).is_none());
    }

    #[test]
    fn test_no_element_before_first_cycle() {
        let (renderer, queue) = setup();
        let mut ring = GpuCmdRing::new(&renderer, &queue, &desc(2, 1)).unwrap();
        assert!(ring.next_element(false, 1).is_none());

        let element = ring.next_element(true, 1).unwrap();
        assert_eq!(element.pool_index, 0);
    }

    #[test]
    fn test_invalid_ring_desc() {
        let (renderer, queue) = setup();
        for (pools, cmds) in [(0, 1), (1, 0), (MAX_GPU_CMD_POOLS_PER_RING + 1, 1), (1, MAX_GPU_CMDS_PER_POOL + 1)] {
            let result = GpuCmdRing::new(&renderer, &queue, &desc(pools, cmds));
            assert!(matches!(result, Err(DistRhiError::InvalidArgument(_))));
        }
        assert!(GpuCmdRing::new(&renderer, &queue, &desc(MAX_GPU_CMD_POOLS_PER_RING, MAX_GPU_CMDS_PER_POOL)).is_ok());
    }

    #[test]
    fn test_steady_frame_loop() {
        let (renderer, queue) = setup();
        queue.raw().set_completion(HeadlessCompletion::Deferred);
        let mut ring = GpuCmdRing::new(&renderer, &queue, &desc(2, 1)).unwrap();

        let mut pool_indices = Vec::new();
        for frame in 0..10u32 {
            // 让 N-2 帧的提交完成，N-1 帧保持在途
            if frame >= 2 {
                queue.raw().retire(1);
            }

            let element = ring.next_element(true, 1).unwrap();
            pool_indices.push(element.pool_index);

            let registrations = element.fence.raw().wait_registrations();
            element.fence.wait().unwrap();
            assert_eq!(element.fence.raw().wait_registrations(), registrations);

            element.pool.reset().unwrap();
            let cmd = &mut element.cmds[0];
            cmd.begin().unwrap();
            cmd.draw(3, 0);
            cmd.end().unwrap();

            queue
                .submit(&QueueSubmitDesc {
                    cmds: &[&element.cmds[0]],
                    signal_fence: Some(element.fence),
                })
                .unwrap();
        }

        let expected: Vec<u32> = (0..10).map(|n| n % 2).collect();
        assert_eq!(pool_indices, expected);

        queue.raw().retire_all();
        assert!(ring.wait_all().is_ok());
        assert_eq!(queue.raw().submitted_list_count(), 10);
    }

    #[test]
    fn test_drop_waits_for_in_flight_frames() {
        let (renderer, queue) = setup();
        queue
            .raw()
            .set_completion(HeadlessCompletion::Latency(Duration::from_millis(5)));
        let fence_handle;
        {
            let mut ring = GpuCmdRing::new(&renderer, &queue, &desc(2, 1)).unwrap();
            let element = ring.next_element(true, 1).unwrap();
            let cmd = &mut element.cmds[0];
            cmd.begin().unwrap();
            cmd.end().unwrap();
            queue
                .submit(&QueueSubmitDesc {
                    cmds: &[&element.cmds[0]],
                    signal_fence: Some(element.fence),
                })
                .unwrap();
            fence_handle = element.fence.raw().clone();
        }
        assert_eq!(fence_handle.completed_value(), 1);
    }
}
