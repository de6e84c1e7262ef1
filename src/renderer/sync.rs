//! GPU 同步机制模块
//!
//! 提供 CPU-GPU 同步原语：Fence 与 Queue。
//!
//! # 设计原则
//!
//! - **单调递增**：每次 `signal` 在队列中排入目标值加一的信号，排入成功后才记下新目标值
//! - **不做无谓等待**：设备已报告完成时 `wait` 直接返回，不注册系统等待
//! - **阻塞而非自旋**：未完成时注册唤醒并阻塞，没有超时
//!
//! # 使用场景
//!
//! 1. **帧同步**：命令环中每个槽位一个 fence，复用前先等待
//! 2. **排空队列**：关闭或重建资源前调用 `Queue::wait_idle`

use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::error::Result;
use crate::gfx::backend::{CommandQueue, GraphicsApi, NativeFence, SwapChainRaw};

use super::command::Cmd;
use super::swapchain::SwapChain;

/// Fence 值
///
/// 单调递增，CPU 可以等待 GPU 完成特定值对应的工作。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FenceValue(u64);

impl FenceValue {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Fence 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// 最近一次信号已完成（或从未信号过）
    Complete,
    /// 仍有未完成的信号
    Incomplete,
}

/// Fence
///
/// 包装一个原生完成计数器，并记录最近一次排入队列的目标值。
pub struct Fence<A: GraphicsApi> {
    raw: A::Fence,
    target: AtomicU64,
}

impl<A: GraphicsApi> Fence<A> {
    pub(crate) fn new(raw: A::Fence) -> Self {
        Self {
            raw,
            target: AtomicU64::new(0),
        }
    }

    /// 最近一次排入队列的目标值
    pub fn target_value(&self) -> FenceValue {
        FenceValue(self.target.load(Ordering::Acquire))
    }

    /// 设备报告的已完成值
    pub fn completed_value(&self) -> FenceValue {
        FenceValue(self.raw.completed_value())
    }

    pub fn status(&self) -> FenceStatus {
        if self.completed_value() >= self.target_value() {
            FenceStatus::Complete
        } else {
            FenceStatus::Incomplete
        }
    }

    /// 阻塞直到设备完成值达到目标值
    ///
    /// 已完成时直接返回，不会注册系统等待。
    pub fn wait(&self) -> Result<()> {
        let target = self.target.load(Ordering::Acquire);
        if self.raw.completed_value() < target {
            self.raw.wait_for(target)?;
        }
        Ok(())
    }

    /// 下一个目标值，尚未记录
    fn next_value(&self) -> u64 {
        self.target.load(Ordering::Acquire) + 1
    }

    /// 信号已排入队列后记录目标值
    fn commit(&self, value: u64) {
        self.target.fetch_max(value, Ordering::AcqRel);
    }

    pub fn raw(&self) -> &A::Fence {
        &self.raw
    }
}

/// 队列类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueType {
    /// 图形队列
    #[default]
    Graphics,
    /// 传输队列
    Transfer,
    /// 计算队列
    Compute,
}

impl QueueType {
    pub fn name(&self) -> &'static str {
        match self {
            QueueType::Graphics => "Graphics",
            QueueType::Transfer => "Transfer",
            QueueType::Compute => "Compute",
        }
    }
}

/// 队列创建描述
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueDesc {
    pub ty: QueueType,
}

/// 提交描述
pub struct QueueSubmitDesc<'a, A: GraphicsApi> {
    /// 已关闭的命令列表，按顺序执行
    pub cmds: &'a [&'a Cmd<A>],
    /// 执行完成后要信号的 fence
    pub signal_fence: Option<&'a Fence<A>>,
}

/// 呈现描述
pub struct QueuePresentDesc<'a, A: GraphicsApi> {
    pub swap_chain: &'a SwapChain<A>,
    pub index: u32,
}

/// 命令提交通道
///
/// 除原生句柄和类型外不持有任何状态，由应用独占。
pub struct Queue<A: GraphicsApi> {
    raw: A::Queue,
    ty: QueueType,
}

impl<A: GraphicsApi> Queue<A> {
    pub(crate) fn new(raw: A::Queue, ty: QueueType) -> Self {
        Self { raw, ty }
    }

    pub fn queue_type(&self) -> QueueType {
        self.ty
    }

    /// 在队列中排入 fence 下一个目标值的信号
    ///
    /// 原生信号失败时目标值保持不变，之后的 `wait` 不会等待一个永远不会到达的值。
    pub fn signal(&self, fence: &Fence<A>) -> Result<FenceValue> {
        let value = fence.next_value();
        self.raw.signal(fence.raw(), value)?;
        fence.commit(value);
        Ok(FenceValue(value))
    }

    /// 信号后等待，排空队列
    pub fn wait_idle(&self, fence: &Fence<A>) -> Result<()> {
        self.signal(fence)?;
        fence.wait()
    }

    /// 执行命令列表，若提供了 fence 则在其后排入信号
    pub fn submit(&self, desc: &QueueSubmitDesc<'_, A>) -> Result<()> {
        debug_assert!(
            desc.cmds.iter().all(|cmd| !cmd.is_recording()),
            "submitted cmd is still recording"
        );

        let lists: Vec<&A::CmdList> = desc.cmds.iter().map(|cmd| cmd.raw()).collect();
        self.raw.execute(&lists)?;

        if let Some(fence) = desc.signal_fence {
            self.signal(fence)?;
        }

        tracing::trace!(cmds = desc.cmds.len(), signaled = desc.signal_fence.is_some(), "Queue submit");
        Ok(())
    }

    /// 呈现交换链的当前图像
    pub fn present(&self, desc: &QueuePresentDesc<'_, A>) -> Result<()> {
        let sync_interval = if desc.swap_chain.vsync() { 1 } else { 0 };
        desc.swap_chain.raw().present(sync_interval)?;
        tracing::trace!(index = desc.index, sync_interval, "Queue present");
        Ok(())
    }

    pub fn raw(&self) -> &A::Queue {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::{DistRhiError, GraphicsError};
    use crate::gfx::headless::{HeadlessApi, HeadlessCompletion};
    use crate::renderer::test_util::headless_renderer;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fence_starts_complete() {
        let renderer = headless_renderer();
        let fence = renderer.init_fence().unwrap();
        assert_eq!(fence.target_value().value(), 0);
        assert_eq!(fence.status(), FenceStatus::Complete);
        fence.wait().unwrap();
        assert_eq!(fence.raw().wait_registrations(), 0);
    }

    #[test]
    fn test_signal_is_strictly_increasing() {
        let renderer = headless_renderer();
        let queue = renderer.init_queue(&QueueDesc::default()).unwrap();
        let fence = renderer.init_fence().unwrap();

        let mut last = fence.target_value();
        for _ in 0..32 {
            let value = queue.signal(&fence).unwrap();
            assert!(value > last);
            assert_eq!(fence.target_value(), value);
            last = value;
        }
    }

    #[test]
    fn test_failed_signal_keeps_target() {
        let renderer = headless_renderer();
        let queue = renderer.init_queue(&QueueDesc::default()).unwrap();
        queue.raw().set_completion(HeadlessCompletion::Deferred);
        let fence = renderer.init_fence().unwrap();

        queue.raw().fail_next_signals(1);
        let err = queue.signal(&fence).unwrap_err();
        assert!(matches!(
            err,
            DistRhiError::Graphics(GraphicsError::Synchronization(_))
        ));
        assert_eq!(fence.target_value().value(), 0);
        assert_eq!(fence.status(), FenceStatus::Complete);

        fence.wait().unwrap();
        assert_eq!(fence.raw().wait_registrations(), 0);

        let value = queue.signal(&fence).unwrap();
        assert_eq!(value.value(), 1);
        queue.raw().retire_all();
        fence.wait().unwrap();
        assert_eq!(fence.completed_value(), value);
    }

    #[test]
    fn test_failed_submit_signal_leaves_fence_waitable() {
        let renderer = headless_renderer();
        let queue = renderer.init_queue(&QueueDesc::default()).unwrap();
        let pool = renderer.init_cmd_pool(&queue).unwrap();
        let mut cmd = renderer.init_cmd(&pool).unwrap();
        let fence = renderer.init_fence().unwrap();

        cmd.begin().unwrap();
        cmd.end().unwrap();

        queue.raw().fail_next_signals(1);
        let result = queue.submit(&QueueSubmitDesc::<HeadlessApi> {
            cmds: &[&cmd],
            signal_fence: Some(&fence),
        });
        assert!(result.is_err());
        assert_eq!(fence.target_value().value(), 0);
        fence.wait().unwrap();

        queue.wait_idle(&fence).unwrap();
        assert_eq!(fence.completed_value().value(), 1);
    }

    #[test]
    fn test_wait_after_completion_does_not_block() {
        let renderer = headless_renderer();
        let queue = renderer.init_queue(&QueueDesc::default()).unwrap();
        queue.raw().set_completion(HeadlessCompletion::Deferred);
        let fence = renderer.init_fence().unwrap();

        queue.signal(&fence).unwrap();
        assert_eq!(fence.status(), FenceStatus::Incomplete);

        queue.raw().retire_all();
        assert_eq!(fence.status(), FenceStatus::Complete);
        fence.wait().unwrap();
        assert_eq!(fence.raw().wait_registrations(), 0);
    }

    #[test]
    fn test_wait_blocks_until_signaled() {
        let renderer = headless_renderer();
        let queue = renderer.init_queue(&QueueDesc::default()).unwrap();
        queue.raw().set_completion(HeadlessCompletion::Deferred);
        let fence = renderer.init_fence().unwrap();

        let value = queue.signal(&fence).unwrap();

        let timeline = queue.raw().clone();
        let gpu = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            timeline.retire_all();
        });

        fence.wait().unwrap();
        assert!(fence.completed_value() >= value);
        assert_eq!(fence.raw().wait_registrations(), 1);
        gpu.join().unwrap();
    }

    #[test]
    fn test_wait_idle_drains_latency_queue() {
        let renderer = headless_renderer();
        let queue = renderer.init_queue(&QueueDesc::default()).unwrap();
        queue
            .raw()
            .set_completion(HeadlessCompletion::Latency(Duration::from_millis(5)));
        let fence = renderer.init_fence().unwrap();

        for _ in 0..3 {
            queue.signal(&fence).unwrap();
        }
        queue.wait_idle(&fence).unwrap();
        assert_eq!(fence.target_value().value(), 4);
        assert_eq!(fence.completed_value().value(), 4);
    }

    #[test]
    fn test_submit_signals_fence() {
        let renderer = headless_renderer();
        let queue = renderer.init_queue(&QueueDesc::default()).unwrap();
        let pool = renderer.init_cmd_pool(&queue).unwrap();
        let mut cmd = renderer.init_cmd(&pool).unwrap();
        let fence = renderer.init_fence().unwrap();

        cmd.begin().unwrap();
        cmd.draw(3, 0);
        cmd.end().unwrap();

        queue
            .submit(&QueueSubmitDesc::<HeadlessApi> {
                cmds: &[&cmd],
                signal_fence: Some(&fence),
            })
            .unwrap();

        assert_eq!(fence.target_value().value(), 1);
        assert_eq!(fence.status(), FenceStatus::Complete);
        assert_eq!(queue.raw().submitted_list_count(), 1);
    }
}
