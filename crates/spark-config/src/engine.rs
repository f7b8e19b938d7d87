//! # 重载引擎
//!
//! ## 契约声明
//! * **单写者：** 当前快照只在重载周期内被整体替换；周期之间由互斥锁串行化，定时调度与手动
//!   [`reload_now`](ReloadEngine::reload_now) 不会重叠；
//! * **全有或全无：** 一个周期要么完成“合并 → 差异 → 发布 → 历史 → 分发 → 属性重评估”，
//!   要么整体跳过，不会发布半成品快照；
//! * **调度器不死：** 周期内的任何 panic 都被捕获并记录，调度线程继续按周期运行。
//!
//! ## 状态机
//! `Uninitialized → Steady(snapshot)`，在 `Steady` 上循环；`shutdown` 只停止调度线程。

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, Sender, bounded, select, tick};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::error::{ConfigError, Result, panic_message};
use crate::event::{ChangeEvent, EventHistory, EventStamp, diff};
use crate::listener::ListenerRouter;
use crate::merge::{NamedSource, SourceHealth, SourceMerger, validate_source_names};
use crate::property::PropertyFactory;
use crate::runtime::now_ms;
use crate::settings::RegistrySettings;
use crate::snapshot::Snapshot;

/// 一个成功发布的周期的摘要。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CycleReport {
    pub epoch: u64,
    pub events: usize,
    pub failed_sources: usize,
    pub properties_updated: usize,
    pub listener_panics: usize,
}

/// 一次重载周期的结论。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    Published(CycleReport),
    /// 周期被整体跳过，当前快照保持不变。
    Skipped(ConfigError),
}

impl CycleOutcome {
    pub fn report(&self) -> Option<&CycleReport> {
        match self {
            Self::Published(report) => Some(report),
            Self::Skipped(_) => None,
        }
    }

    pub fn is_published(&self) -> bool {
        matches!(self, Self::Published(_))
    }
}

struct Scheduler {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// 驱动周期性重载的引擎。
///
/// # 教案级说明
/// - **意图 (Why)**：把数据源合并、快照发布与变更分发收敛到唯一的写路径，读者只与不可变快照打交道；
/// - **流程 (How)**：
///   1. [`init`](Self::init) 同步执行首个周期，保证返回后读者能看到已填充的快照，然后启动调度线程；
///   2. 调度线程通过 `crossbeam_channel::tick` 计时，并与关停通道 `select!`，关停时立即退出；
///   3. 每个周期在单飞锁内完成，周期编号（epoch）由上一份快照递增得到；
/// - **风险 (Trade-offs)**：监听器与同步回调运行在重载线程上，耗时逻辑会推迟下一个周期，
///   应使用执行器变体卸载。
pub struct ReloadEngine {
    merger: SourceMerger,
    current: Arc<ArcSwap<Snapshot>>,
    history: EventHistory,
    listeners: ListenerRouter,
    properties: PropertyFactory,
    host: Arc<str>,
    period: Duration,
    flight: Mutex<()>,
    started: AtomicBool,
    scheduler: Mutex<Option<Scheduler>>,
}

impl ReloadEngine {
    /// 设置不合法或数据源名称重复、含 NUL 时返回 [`ConfigError::Settings`]。
    pub fn new(
        settings: &RegistrySettings,
        sources: Vec<NamedSource>,
        host: Arc<str>,
    ) -> Result<Self> {
        settings.validate()?;
        validate_source_names(&sources)?;
        let current = Arc::new(ArcSwap::from_pointee(Snapshot::default()));
        Ok(Self {
            merger: SourceMerger::new(sources, settings.fetch_timeout(), settings.failure_policy),
            properties: PropertyFactory::new(Arc::clone(&current)),
            current,
            history: EventHistory::new(settings.event_history),
            listeners: ListenerRouter::new(),
            host,
            period: settings.reload_period(),
            flight: Mutex::new(()),
            started: AtomicBool::new(false),
            scheduler: Mutex::new(None),
        })
    }

    /// 同步执行首个周期并启动调度线程。
    ///
    /// 首个周期即使所有数据源都失败也会发布（空）快照，使引擎离开 `Uninitialized`；
    /// 重复调用返回 [`ConfigError::AlreadyStarted`]。
    pub fn init(self: &Arc<Self>) -> Result<CycleOutcome> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ConfigError::AlreadyStarted);
        }
        let outcome = self.run_cycle(true);
        self.spawn_scheduler()?;
        info!(
            period_ms = self.period.as_millis() as u64,
            sources = self.merger.sources().len(),
            epoch = self.current.load().epoch(),
            "configuration registry started"
        );
        Ok(outcome)
    }

    /// 立即执行一个周期；与调度线程共享单飞锁。
    ///
    /// 同步监听器与回调运行在持锁的周期内，不得在其中调用本方法。
    pub fn reload_now(&self) -> CycleOutcome {
        self.run_cycle(false)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    pub fn history(&self) -> &EventHistory {
        &self.history
    }

    pub fn listeners(&self) -> &ListenerRouter {
        &self.listeners
    }

    pub fn properties(&self) -> &PropertyFactory {
        &self.properties
    }

    pub fn source_health(&self) -> Vec<SourceHealth> {
        self.merger.health()
    }

    /// 停止调度线程；进行中的周期会先完成。可重复调用。
    pub fn shutdown(&self) {
        let Some(scheduler) = self.scheduler.lock().take() else {
            return;
        };
        drop(scheduler.stop);
        // 监听器或回调在重载线程上触发关停时不能 join 自己。
        if scheduler.handle.thread().id() != thread::current().id() {
            let _ = scheduler.handle.join();
        }
        info!("configuration registry scheduler stopped");
    }

    fn run_cycle(&self, initial: bool) -> CycleOutcome {
        let _flight = self.flight.lock();
        let started = Instant::now();
        match catch_unwind(AssertUnwindSafe(|| self.cycle_locked(initial))) {
            Ok(outcome) => {
                if let CycleOutcome::Published(report) = &outcome {
                    debug!(
                        epoch = report.epoch,
                        events = report.events,
                        failed_sources = report.failed_sources,
                        properties_updated = report.properties_updated,
                        elapsed_us = started.elapsed().as_micros() as u64,
                        "reload cycle published"
                    );
                }
                outcome
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(panic = %message, "reload cycle panicked and was skipped");
                CycleOutcome::Skipped(ConfigError::runtime(format!("reload cycle panicked: {message}")))
            }
        }
    }

    fn cycle_locked(&self, initial: bool) -> CycleOutcome {
        let merged = self.merger.merge();
        if !initial && merged.all_failed() {
            let error = ConfigError::AllSourcesFailed {
                attempted: merged.attempted,
            };
            error!(error = %error, "reload cycle skipped, keeping current snapshot");
            return CycleOutcome::Skipped(error);
        }

        let previous = self.current.load_full();
        let epoch = previous.epoch() + 1;
        let published_at = now_ms();
        let next = Arc::new(Snapshot::new(epoch, published_at, merged.entries));
        let stamp = EventStamp::new(published_at, Arc::clone(&self.host));
        let events: Arc<[ChangeEvent]> = diff(&previous, &next, &stamp).into();

        self.current.store(Arc::clone(&next));
        self.history.append(&events);
        let listener_panics = self.listeners.dispatch(&events);
        let properties_updated = self.properties.reassess(&next, &events);

        CycleOutcome::Published(CycleReport {
            epoch,
            events: events.len(),
            failed_sources: merged.failed,
            properties_updated,
            listener_panics,
        })
    }

    fn spawn_scheduler(self: &Arc<Self>) -> Result<()> {
        let (stop, stopped) = bounded::<()>(0);
        let ticker = tick(self.period);
        let engine = Arc::downgrade(self);
        let handle = thread::Builder::new()
            .name("spark-config-reload".to_owned())
            .spawn(move || scheduler_loop(engine, ticker, stopped))
            .map_err(ConfigError::runtime)?;
        *self.scheduler.lock() = Some(Scheduler { stop, handle });
        Ok(())
    }
}

fn scheduler_loop(engine: Weak<ReloadEngine>, ticker: Receiver<Instant>, stopped: Receiver<()>) {
    loop {
        select! {
            recv(stopped) -> _ => break,
            recv(ticker) -> _ => {
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                engine.run_cycle(false);
            }
        }
    }
}

impl Drop for ReloadEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
