//! # 注册中心运行时
//!
//! ## 契约声明
//! * **显式构造：** 回调线程池与主机名均归属于 [`RegistryRuntime`] 实例，不存在任何全局静态线程池；
//!   多个注册中心可以共享同一个运行时，也可以各自持有。
//! * **显式拆除：** [`RegistryRuntime::shutdown`] 关闭任务队列并等待工作线程退出；`Drop` 时自动执行，可重复调用。
//!
//! ## 并发与错误语义
//! * 提交给线程池的任务若发生 panic，仅记录日志，工作线程继续服务后续任务；
//! * 运行时关闭后再提交的任务被丢弃并记录 `warn!`。

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{ConfigError, Result, panic_message};

/// 可执行的单次任务。
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// 任务执行器契约。
///
/// - 回调与监听器可以指定执行器，从重载线程卸载耗时逻辑；
/// - 若调用方需要串行执行，可传入单线程的 [`WorkerPool`]。
pub trait Executor: Send + Sync {
    fn execute(&self, task: Task);
}

/// 在调用线程上直接执行任务。
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, task: Task) {
        task();
    }
}

/// 固定大小的工作线程池。
///
/// # 教案级说明
/// - **意图 (Why)**：为“在执行器上运行回调”提供默认实现，避免调用方为每个回调自行创建线程；
/// - **流程 (How)**：所有工作线程共享一个无界 `crossbeam` 通道的接收端；关闭时丢弃发送端，
///   工作线程在队列耗尽后自然退出，随后被 `join`；
/// - **风险 (Trade-offs)**：队列无界，回调持续慢于产生速度时会堆积内存，调用方应保持回调轻量。
pub struct WorkerPool {
    name: String,
    sender: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// 启动 `size` 个名为 `{name}-{index}` 的工作线程。
    pub fn new<N: Into<String>>(name: N, size: usize) -> Result<Self> {
        let name = name.into();
        let size = size.max(1);
        let (sender, receiver) = unbounded::<Task>();
        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let receiver: Receiver<Task> = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || worker_loop(receiver))
                .map_err(ConfigError::runtime)?;
            workers.push(handle);
        }
        debug!(pool = %name, size, "worker pool started");
        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        })
    }

    pub fn is_running(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// 停止接收新任务，等待队列中已有任务执行完毕。
    pub fn shutdown(&self) {
        let sender = self.sender.lock().take();
        if sender.is_none() {
            return;
        }
        drop(sender);
        let workers = std::mem::take(&mut *self.workers.lock());
        let current = thread::current().id();
        for worker in workers {
            // 在池内任务中触发关闭时不能 join 自己。
            if worker.thread().id() == current {
                continue;
            }
            let _ = worker.join();
        }
        debug!(pool = %self.name, "worker pool stopped");
    }
}

fn worker_loop(receiver: Receiver<Task>) {
    while let Ok(task) = receiver.recv() {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
            warn!(panic = %panic_message(payload.as_ref()), "worker task panicked");
        }
    }
}

impl Executor for WorkerPool {
    fn execute(&self, task: Task) {
        let guard = self.sender.lock();
        match guard.as_ref() {
            Some(sender) => {
                if sender.send(task).is_err() {
                    warn!(pool = %self.name, "worker pool queue closed, task dropped");
                }
            }
            None => warn!(pool = %self.name, "worker pool stopped, task dropped"),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

/// 注册中心运行时：持有回调线程池与事件主机名。
#[derive(Debug)]
pub struct RegistryRuntime {
    pool: Arc<WorkerPool>,
    host: Arc<str>,
}

impl RegistryRuntime {
    /// 以本机主机名构造运行时。
    pub fn new(callback_workers: usize) -> Result<Self> {
        let host = gethostname::gethostname().to_string_lossy().into_owned();
        Self::with_host(callback_workers, host)
    }

    /// 指定主机名构造运行时，便于测试断言事件内容。
    pub fn with_host<H: Into<String>>(callback_workers: usize, host: H) -> Result<Self> {
        let pool = WorkerPool::new("spark-config-callback", callback_workers)?;
        Ok(Self {
            pool: Arc::new(pool),
            host: Arc::from(host.into()),
        })
    }

    /// 默认的异步执行器。
    pub fn executor(&self) -> Arc<dyn Executor> {
        self.pool.clone()
    }

    #[inline]
    pub fn host(&self) -> &Arc<str> {
        &self.host
    }

    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}

impl Drop for RegistryRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// 当前 Unix 毫秒时间戳；时钟回拨到纪元之前时返回 `0`。
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
