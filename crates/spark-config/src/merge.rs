//! 多源有序合并。
//!
//! # 教案式说明（Why）
//! - 多个数据源按注册顺序排列，越早注册优先级越高：同名键只保留第一个给出它的源；
//! - 任一数据源失败都只影响它本应贡献的键，其它健康源照常合并。
//!
//! # 契约定义（What）
//! - [`SourceMerger::merge`] 每次调用恰好拉取每个源一次，返回 [`MergeReport`]；
//! - 失败与超时记录在 [`SourceHealth`] 中，从不向上传播为 `Err`；
//! - 值为 `None` 的条目视为不存在，不占据键，后续源仍可提供该键。
//!
//! # 实现方式（How）
//! - 配置了超时时，所有源在各自的线程上并行拉取，结果经容量为 1 的通道回传；
//!   主流程按注册顺序以同一截止时间等待；
//! - 超时的拉取保留在该源的在途槽位中，下一个周期不再新建线程，而是在新的截止时间内继续等它，
//!   因此每个源同一时刻至多有一个未完成的拉取线程；
//! - 未配置超时时直接在调用线程上顺序拉取；
//! - 两种路径都用 `catch_unwind` 隔离数据源内部的 panic。

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{ConfigError, Result, panic_message};
use crate::raw::RawProperty;
use crate::runtime::now_ms;
use crate::settings::FailurePolicy;
use crate::source::{SourceProvider, SourceSnapshot};

/// 已注册的具名数据源。
#[derive(Clone)]
pub struct NamedSource {
    name: Cow<'static, str>,
    provider: Arc<dyn SourceProvider>,
}

impl NamedSource {
    pub fn new<N>(name: N, provider: Arc<dyn SourceProvider>) -> Self
    where
        N: Into<Cow<'static, str>>,
    {
        Self {
            name: name.into(),
            provider,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for NamedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedSource")
            .field("name", &self.name)
            .finish()
    }
}

/// 单个数据源的健康状况。
///
/// - `last_error` 为最近一个周期的错误，成功后清空；
/// - `consecutive_failures` 在成功时归零；
/// - 时间字段为 Unix 毫秒，`last_success_ms = None` 表示从未成功。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceHealth {
    pub name: String,
    pub last_error: Option<ConfigError>,
    pub consecutive_failures: u32,
    pub last_attempt_ms: Option<u64>,
    pub last_success_ms: Option<u64>,
    pub entries: usize,
}

impl SourceHealth {
    fn pending(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            last_error: None,
            consecutive_failures: 0,
            last_attempt_ms: None,
            last_success_ms: None,
            entries: 0,
        }
    }

    #[inline]
    pub fn is_healthy(&self) -> bool {
        self.last_error.is_none()
    }
}

/// 一次合并的结果。
#[derive(Debug, Default)]
pub struct MergeReport {
    pub entries: BTreeMap<String, RawProperty>,
    pub attempted: usize,
    pub failed: usize,
}

impl MergeReport {
    /// 至少注册了一个源且全部失败。
    pub fn all_failed(&self) -> bool {
        self.attempted > 0 && self.failed == self.attempted
    }
}

/// 有序多源合并器。
pub struct SourceMerger {
    sources: Vec<NamedSource>,
    timeout: Option<Duration>,
    policy: FailurePolicy,
    health: ArcSwap<Vec<SourceHealth>>,
    last_good: Mutex<HashMap<String, Arc<SourceSnapshot>>>,
    /// 按注册顺序排列，`Some` 表示该源上次的拉取超时且仍未返回。
    in_flight: Mutex<Vec<Option<PendingFetch>>>,
}

type PendingFetch = Receiver<Result<SourceSnapshot>>;

impl SourceMerger {
    pub fn new(sources: Vec<NamedSource>, timeout: Option<Duration>, policy: FailurePolicy) -> Self {
        let health = sources
            .iter()
            .map(|source| SourceHealth::pending(source.name()))
            .collect();
        let in_flight = sources.iter().map(|_| None).collect();
        Self {
            sources,
            timeout,
            policy,
            health: ArcSwap::from_pointee(health),
            last_good: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(in_flight),
        }
    }

    pub fn sources(&self) -> &[NamedSource] {
        &self.sources
    }

    /// 最近一次合并后的各源健康状况，顺序与注册顺序一致。
    pub fn health(&self) -> Vec<SourceHealth> {
        Vec::clone(&self.health.load())
    }

    /// 拉取所有数据源并按“先注册者胜出”合并。
    pub fn merge(&self) -> MergeReport {
        let attempted_at = now_ms();
        let outcomes = self.fetch_all();
        let previous = self.health.load_full();

        let mut report = MergeReport {
            attempted: self.sources.len(),
            ..MergeReport::default()
        };
        let mut health = Vec::with_capacity(self.sources.len());
        let mut last_good = self.last_good.lock();

        for (index, (source, outcome)) in self.sources.iter().zip(outcomes).enumerate() {
            let mut entry = previous
                .get(index)
                .cloned()
                .unwrap_or_else(|| SourceHealth::pending(source.name()));
            entry.last_attempt_ms = Some(attempted_at);

            let contribution = match outcome {
                Ok(snapshot) => {
                    entry.last_error = None;
                    entry.consecutive_failures = 0;
                    entry.last_success_ms = Some(attempted_at);
                    entry.entries = snapshot.len();
                    let snapshot = Arc::new(snapshot);
                    if self.policy == FailurePolicy::RetainLastGood {
                        last_good.insert(source.name().to_owned(), Arc::clone(&snapshot));
                    }
                    Some(snapshot)
                }
                Err(error) => {
                    report.failed += 1;
                    entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
                    warn!(
                        source = %source.name(),
                        error = %error,
                        consecutive_failures = entry.consecutive_failures,
                        "configuration source failed"
                    );
                    entry.last_error = Some(error);
                    match self.policy {
                        FailurePolicy::Skip => None,
                        FailurePolicy::RetainLastGood => {
                            let retained = last_good.get(source.name()).cloned();
                            if retained.is_some() {
                                debug!(source = %source.name(), "using last good contribution");
                            }
                            retained
                        }
                    }
                }
            };

            if let Some(snapshot) = contribution {
                contribute(&mut report.entries, source, &snapshot);
            }
            health.push(entry);
        }

        drop(last_good);
        self.health.store(Arc::new(health));
        report
    }

    fn fetch_all(&self) -> Vec<Result<SourceSnapshot>> {
        match self.timeout {
            None => self
                .sources
                .iter()
                .map(|source| fetch_guarded(source.name(), source.provider.as_ref()))
                .collect(),
            Some(timeout) => {
                let mut in_flight = self.in_flight.lock();
                let pending: Vec<_> = self
                    .sources
                    .iter()
                    .zip(in_flight.iter_mut())
                    .map(|(source, slot)| match slot.take() {
                        Some(receiver) => {
                            debug!(source = %source.name(), "previous fetch still in flight, waiting on it");
                            Ok(receiver)
                        }
                        None => spawn_fetch(source),
                    })
                    .collect();
                let deadline = Instant::now() + timeout;
                self.sources
                    .iter()
                    .zip(pending)
                    .zip(in_flight.iter_mut())
                    .map(|((source, receiver), slot)| {
                        let receiver = receiver?;
                        match receiver.recv_deadline(deadline) {
                            Ok(outcome) => outcome,
                            Err(RecvTimeoutError::Timeout) => {
                                *slot = Some(receiver);
                                Err(ConfigError::SourceTimeout {
                                    source_name: source.name.clone(),
                                    timeout,
                                })
                            }
                            Err(RecvTimeoutError::Disconnected) => Err(
                                ConfigError::source_unavailable(
                                    source.name.clone(),
                                    "fetch thread exited without a result",
                                ),
                            ),
                        }
                    })
                    .collect()
            }
        }
    }
}

/// 校验数据源名称：不得重复，也不得包含 NUL（名称会进入拉取线程名）。
pub(crate) fn validate_source_names(sources: &[NamedSource]) -> Result<()> {
    let mut seen = HashSet::new();
    for source in sources {
        if source.name().contains('\0') {
            return Err(ConfigError::settings(format!(
                "source name {:?} contains a NUL byte",
                source.name()
            )));
        }
        if !seen.insert(source.name()) {
            return Err(ConfigError::settings(format!(
                "duplicate source name `{}`",
                source.name()
            )));
        }
    }
    Ok(())
}

/// 把一个源的快照并入结果：已存在的键保持不变，值缺失的条目被忽略。
///
/// 映射键与属性名不一致的条目被拒绝并记录告警。
fn contribute(
    merged: &mut BTreeMap<String, RawProperty>,
    source: &NamedSource,
    snapshot: &SourceSnapshot,
) {
    for (key, raw) in snapshot {
        if key != raw.name() {
            warn!(
                source = %source.name(),
                key = %key,
                property = %raw.name(),
                "source entry key does not match property name, ignoring"
            );
            continue;
        }
        if !raw.is_present() || merged.contains_key(key) {
            continue;
        }
        merged.insert(
            raw.name().to_owned(),
            raw.clone().with_source(source.name.clone()),
        );
    }
}

fn fetch_guarded(name: &str, provider: &dyn SourceProvider) -> Result<SourceSnapshot> {
    match catch_unwind(AssertUnwindSafe(|| provider.load_snapshot())) {
        Ok(outcome) => outcome,
        Err(payload) => Err(ConfigError::source_unavailable(
            name.to_owned(),
            format!("provider panicked: {}", panic_message(payload.as_ref())),
        )),
    }
}

fn spawn_fetch(source: &NamedSource) -> Result<Receiver<Result<SourceSnapshot>>> {
    let (sender, receiver) = bounded(1);
    let provider = Arc::clone(&source.provider);
    let name = source.name.clone();
    thread::Builder::new()
        .name(format!("spark-config-fetch-{}", name.replace('\0', "")))
        .spawn(move || {
            let outcome = fetch_guarded(&name, provider.as_ref());
            // 合并器已被丢弃时接收端不复存在，发送失败可忽略。
            let _ = sender.send(outcome);
        })
        .map_err(|err| {
            ConfigError::source_unavailable(source.name.clone(), format!("spawn failed: {err}"))
        })?;
    Ok(receiver)
}
