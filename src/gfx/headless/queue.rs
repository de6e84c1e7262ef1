//! Headless 队列与 fence
//!
//! 队列持有一条挂起信号的时间线。`Deferred` 模式下由测试手动推进，
//! `Latency` 模式下由后台线程按提交时间推进。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::{CommandQueue, NativeFence};

use super::{HeadlessApi, HeadlessCmdList, HeadlessCompletion, RecordedCommand};

/// 保留的已提交命令列表数
const SUBMISSION_HISTORY: usize = 64;

struct FenceShared {
    completed: Mutex<u64>,
    signaled: Condvar,
    wait_registrations: AtomicU64,
}

/// Headless fence
#[derive(Clone)]
pub struct HeadlessFence {
    shared: Arc<FenceShared>,
}

impl HeadlessFence {
    pub(crate) fn new(initial_value: u64) -> Self {
        Self {
            shared: Arc::new(FenceShared {
                completed: Mutex::new(initial_value),
                signaled: Condvar::new(),
                wait_registrations: AtomicU64::new(0),
            }),
        }
    }

    /// 阻塞等待的次数
    pub fn wait_registrations(&self) -> u64 {
        self.shared.wait_registrations.load(Ordering::Acquire)
    }

    /// 把完成值推进到 `value`，不会回退
    pub fn complete(&self, value: u64) {
        let mut completed = self.shared.completed.lock();
        if value > *completed {
            *completed = value;
        }
        drop(completed);
        self.shared.signaled.notify_all();
    }
}

impl NativeFence for HeadlessFence {
    fn completed_value(&self) -> u64 {
        *self.shared.completed.lock()
    }

    fn wait_for(&self, value: u64) -> Result<()> {
        self.shared.wait_registrations.fetch_add(1, Ordering::AcqRel);
        let mut completed = self.shared.completed.lock();
        while *completed < value {
            self.shared.signaled.wait(&mut completed);
        }
        Ok(())
    }
}

struct PendingSignal {
    fence: HeadlessFence,
    value: u64,
    due: Instant,
}

struct QueueState {
    completion: HeadlessCompletion,
    pending: VecDeque<PendingSignal>,
    history: VecDeque<Vec<RecordedCommand>>,
    submitted_lists: usize,
    /// 待注入的信号失败次数
    failing_signals: usize,
    shutdown: bool,
}

impl QueueState {
    fn retire(&mut self, count: usize) -> usize {
        let mut retired = 0;
        while retired < count {
            let Some(signal) = self.pending.pop_front() else {
                break;
            };
            signal.fence.complete(signal.value);
            retired += 1;
        }
        retired
    }
}

struct QueueShared {
    state: Mutex<QueueState>,
    changed: Condvar,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// 最后一个队列句柄释放时停止后台线程
struct WorkerGuard {
    shared: Arc<QueueShared>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.changed.notify_all();
        if let Some(worker) = self.shared.worker.lock().take() {
            if worker.join().is_err() {
                tracing::error!("Headless queue worker panicked");
            }
        }
    }
}

/// Headless 命令队列
///
/// 克隆得到的句柄共享同一条时间线。
#[derive(Clone)]
pub struct HeadlessQueue {
    shared: Arc<QueueShared>,
    _guard: Arc<WorkerGuard>,
}

impl HeadlessQueue {
    pub(crate) fn new(completion: HeadlessCompletion) -> Self {
        let shared = Arc::new(QueueShared {
            state: Mutex::new(QueueState {
                completion: HeadlessCompletion::Immediate,
                pending: VecDeque::new(),
                history: VecDeque::new(),
                submitted_lists: 0,
                failing_signals: 0,
                shutdown: false,
            }),
            changed: Condvar::new(),
            worker: Mutex::new(None),
        });
        let queue = Self {
            _guard: Arc::new(WorkerGuard {
                shared: Arc::clone(&shared),
            }),
            shared,
        };
        queue.set_completion(completion);
        queue
    }

    /// 切换完成方式
    ///
    /// 切换到 `Immediate` 时所有挂起的信号立即完成。
    pub fn set_completion(&self, completion: HeadlessCompletion) {
        let mut state = self.shared.state.lock();
        state.completion = completion;
        match completion {
            HeadlessCompletion::Immediate => {
                let pending = state.pending.len();
                state.retire(pending);
            }
            HeadlessCompletion::Latency(_) => self.ensure_worker(),
            HeadlessCompletion::Deferred => {}
        }
        drop(state);
        self.shared.changed.notify_all();
    }

    /// 按提交顺序完成最多 `count` 个挂起的信号，返回实际完成数
    pub fn retire(&self, count: usize) -> usize {
        self.shared.state.lock().retire(count)
    }

    /// 完成所有挂起的信号
    pub fn retire_all(&self) -> usize {
        let mut state = self.shared.state.lock();
        let pending = state.pending.len();
        state.retire(pending)
    }

    /// 让接下来的 `count` 次 `signal` 返回错误，模拟设备丢失等故障
    pub fn fail_next_signals(&self, count: usize) {
        self.shared.state.lock().failing_signals = count;
    }

    pub fn pending_signals(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// 已执行的命令列表总数
    pub fn submitted_list_count(&self) -> usize {
        self.shared.state.lock().submitted_lists
    }

    /// 最近执行的命令列表内容，最旧的在前
    pub fn recent_submissions(&self) -> Vec<Vec<RecordedCommand>> {
        self.shared.state.lock().history.iter().cloned().collect()
    }

    fn ensure_worker(&self) {
        let mut worker = self.shared.worker.lock();
        if worker.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        *worker = Some(thread::spawn(move || run_timeline(&shared)));
    }
}

/// `Latency` 模式的后台线程：到期的信号依次完成
fn run_timeline(shared: &QueueShared) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            let pending = state.pending.len();
            state.retire(pending);
            return;
        }

        let latency_mode = matches!(state.completion, HeadlessCompletion::Latency(_));
        match state.pending.front().map(|signal| signal.due) {
            Some(due) if latency_mode => {
                let now = Instant::now();
                if due <= now {
                    state.retire(1);
                } else {
                    shared.changed.wait_for(&mut state, due - now);
                }
            }
            _ => shared.changed.wait(&mut state),
        }
    }
}

impl CommandQueue<HeadlessApi> for HeadlessQueue {
    fn execute(&self, lists: &[&HeadlessCmdList]) -> Result<()> {
        if lists.iter().any(|list| list.is_recording()) {
            return Err(GraphicsError::CommandExecution(
                "submitted command list is still recording".to_string(),
            )
            .into());
        }

        let mut state = self.shared.state.lock();
        for list in lists {
            if state.history.len() == SUBMISSION_HISTORY {
                state.history.pop_front();
            }
            state.history.push_back(list.commands().to_vec());
            state.submitted_lists += 1;
        }
        Ok(())
    }

    fn signal(&self, fence: &HeadlessFence, value: u64) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.failing_signals > 0 {
            state.failing_signals -= 1;
            return Err(GraphicsError::Synchronization(format!(
                "headless queue rejected signal of value {}",
                value
            ))
            .into());
        }
        match state.completion {
            HeadlessCompletion::Immediate => fence.complete(value),
            HeadlessCompletion::Deferred => state.pending.push_back(PendingSignal {
                fence: fence.clone(),
                value,
                due: Instant::now(),
            }),
            HeadlessCompletion::Latency(latency) => {
                state.pending.push_back(PendingSignal {
                    fence: fence.clone(),
                    value,
                    due: Instant::now() + latency,
                });
                drop(state);
                self.shared.changed.notify_all();
            }
        }
        Ok(())
    }
}
