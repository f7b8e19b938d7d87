use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{ConfigError, Result, panic_message};
use crate::raw::RawProperty;
use crate::runtime::Executor;
use crate::snapshot::Snapshot;

use super::{Binding, GroupKey, ParseOutcome, ReloadOutcome};

pub(crate) type Validator<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
pub(crate) type Callback<T> = Arc<dyn Fn(Option<&T>, Option<&T>) + Send + Sync>;

struct CallbackEntry<T> {
    callback: Callback<T>,
    executor: Option<Arc<dyn Executor>>,
}

impl<T> Clone for CallbackEntry<T> {
    fn clone(&self) -> Self {
        Self {
            callback: Arc::clone(&self.callback),
            executor: self.executor.clone(),
        }
    }
}

/// 当前被接受的值以及产生它的输入。
struct Accepted<T> {
    value: Option<Arc<T>>,
    inputs: Vec<RawProperty>,
}

/// 写路径的串行化状态。
#[derive(Default)]
struct AssessState {
    epoch: Option<u64>,
    /// 最近一次评估过的输入签名（无论是否被接受）。
    evaluated: Option<Vec<(String, String)>>,
}

fn signature(inputs: &[RawProperty]) -> Vec<(String, String)> {
    inputs
        .iter()
        .filter_map(|raw| Some((raw.name().to_owned(), raw.value()?.to_owned())))
        .collect()
}

/// 共享的“解析 + 校验 + 回调”单元。
///
/// # 教案级说明
/// - **意图 (Why)**：同一 `(选择器, 类型)` 的所有句柄共享本结构，每个周期只解析一次，
///   并确保所有订阅者观察到同一对 `(旧值, 新值)`；
/// - **契约 (What)**：
///   - 读取当前值无锁（`ArcSwap`）；
///   - 重新评估、注册校验器、创建时初始化在同一把互斥锁下串行执行，且快照纪元单调，
///     旧纪元的评估被忽略；
///   - 输入签名（按值比较）未变化时跳过解析；
///   - 候选值须通过全部校验器才会被接受，否则保留旧值；
///   - 回调只在值的转换被接受后触发，首次评估不触发回调；
/// - **流程 (How)**：锁内完成解析、校验与值替换，释放锁后再投递回调，
///   回调中注册校验器或读取句柄不会死锁；
/// - **风险 (Trade-offs)**：校验器与回调在锁外同样以 `catch_unwind` 隔离，但慢校验器会阻塞本组的重载。
pub struct ParserCallbackGroup<T> {
    key: GroupKey,
    binding: Box<dyn Binding<Value = T>>,
    accepted: ArcSwap<Accepted<T>>,
    validators: ArcSwap<Vec<Validator<T>>>,
    callbacks: ArcSwap<Vec<CallbackEntry<T>>>,
    state: Mutex<AssessState>,
}

impl<T> ParserCallbackGroup<T> {
    #[inline]
    pub fn key(&self) -> &GroupKey {
        &self.key
    }
}

impl<T: Send + Sync + 'static> ParserCallbackGroup<T> {
    pub(crate) fn new(binding: Box<dyn Binding<Value = T>>) -> Self {
        Self {
            key: binding.key(),
            binding,
            accepted: ArcSwap::from_pointee(Accepted {
                value: None,
                inputs: Vec::new(),
            }),
            validators: ArcSwap::from_pointee(Vec::new()),
            callbacks: ArcSwap::from_pointee(Vec::new()),
            state: Mutex::new(AssessState::default()),
        }
    }

    pub fn value(&self) -> Option<Arc<T>> {
        self.accepted.load().value.clone()
    }

    /// 产生当前值的原始输入（含溯源信息）。
    pub fn inputs(&self) -> Vec<RawProperty> {
        self.accepted.load().inputs.clone()
    }

    pub fn validator_count(&self) -> usize {
        self.validators.load().len()
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.load().len()
    }

    /// 注册校验器；当前值存在且不满足断言时返回错误，校验器列表保持不变。
    pub(crate) fn add_validator(&self, validator: Validator<T>) -> Result<()> {
        let _state = self.state.lock();
        if let Some(current) = self.accepted.load().value.as_deref() {
            if !guarded_validate(&validator, current) {
                return Err(ConfigError::ValidationRejected {
                    name: self.key.selector.id().into_owned(),
                });
            }
        }
        self.validators.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(Arc::clone(&validator));
            next
        });
        Ok(())
    }

    pub(crate) fn add_callback(&self, callback: Callback<T>, executor: Option<Arc<dyn Executor>>) {
        let entry = CallbackEntry { callback, executor };
        self.callbacks.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(entry.clone());
            next
        });
    }

    /// 以快照重新评估；`notify = false` 用于创建时的首次评估。
    pub(crate) fn assess(&self, snapshot: &Snapshot, notify: bool) -> ReloadOutcome {
        let (outcome, transition) = self.assess_locked(snapshot);
        if let (true, Some((old, new))) = (notify, transition) {
            self.fire(old, new);
        }
        outcome
    }

    #[allow(clippy::type_complexity)]
    fn assess_locked(
        &self,
        snapshot: &Snapshot,
    ) -> (ReloadOutcome, Option<(Option<Arc<T>>, Option<Arc<T>>)>) {
        let mut state = self.state.lock();
        if state.epoch.is_some_and(|seen| snapshot.epoch() < seen) {
            return (ReloadOutcome::Stale, None);
        }
        state.epoch = Some(snapshot.epoch());

        let inputs = self.key.selector.select(snapshot);
        let current = signature(&inputs);
        if state.evaluated.as_ref() == Some(&current) {
            return (ReloadOutcome::Unchanged, None);
        }
        state.evaluated = Some(current.clone());

        let previous = self.accepted.load_full();
        if signature(&previous.inputs) == current && previous.value.is_some() {
            // 回到了当前已接受的输入（例如上一轮候选被拒绝）。
            return (ReloadOutcome::Unchanged, None);
        }

        let candidate = match self.guarded_parse(&inputs) {
            ParseOutcome::Parsed(value) => Some(value),
            ParseOutcome::Absent => None,
            ParseOutcome::Failed(reason) => {
                warn!(property = %self.key, reason = %reason, "property parse failed, keeping previous value");
                return (ReloadOutcome::Failed(reason), None);
            }
        };

        if let Some(value) = &candidate {
            let validators = self.validators.load();
            if let Some(index) = validators.iter().position(|v| !guarded_validate(v, value)) {
                let reason = format!("validator {index} rejected the candidate");
                warn!(property = %self.key, reason = %reason, "property value rejected, keeping previous value");
                return (ReloadOutcome::Invalid(reason), None);
            }
        }

        if candidate.is_none() && previous.value.is_none() {
            self.accepted.store(Arc::new(Accepted {
                value: None,
                inputs,
            }));
            return (ReloadOutcome::Unchanged, None);
        }

        let outcome = if candidate.is_some() {
            ReloadOutcome::Accepted
        } else {
            ReloadOutcome::Cleared
        };
        let next = Arc::new(Accepted {
            value: candidate.map(Arc::new),
            inputs,
        });
        self.accepted.store(Arc::clone(&next));
        debug!(property = %self.key, epoch = snapshot.epoch(), "property value updated");
        (outcome, Some((previous.value.clone(), next.value.clone())))
    }

    fn guarded_parse(&self, inputs: &[RawProperty]) -> ParseOutcome<T> {
        match catch_unwind(AssertUnwindSafe(|| self.binding.parse(inputs))) {
            Ok(outcome) => outcome,
            Err(payload) => ParseOutcome::Failed(format!(
                "parser panicked: {}",
                panic_message(payload.as_ref())
            )),
        }
    }

    fn fire(&self, old: Option<Arc<T>>, new: Option<Arc<T>>) {
        let callbacks = self.callbacks.load_full();
        for (index, entry) in callbacks.iter().enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| match &entry.executor {
                Some(executor) => {
                    let callback = Arc::clone(&entry.callback);
                    let (old, new) = (old.clone(), new.clone());
                    executor.execute(Box::new(move || callback(old.as_deref(), new.as_deref())));
                }
                None => (entry.callback)(old.as_deref(), new.as_deref()),
            }));
            if let Err(payload) = outcome {
                warn!(
                    property = %self.key,
                    callback = index,
                    panic = %panic_message(payload.as_ref()),
                    "property callback panicked"
                );
            }
        }
    }
}

fn guarded_validate<T>(validator: &Validator<T>, value: &T) -> bool {
    // panic 的校验器视为拒绝。
    catch_unwind(AssertUnwindSafe(|| validator(value))).unwrap_or(false)
}

impl<T> fmt::Debug for ParserCallbackGroup<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserCallbackGroup")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// 与值类型无关的分组视图，供工厂统一路由重载。
pub(crate) trait ReloadTarget: Send + Sync {
    fn key(&self) -> &GroupKey;

    fn reassess(&self, snapshot: &Snapshot) -> ReloadOutcome;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Send + Sync + 'static> ReloadTarget for ParserCallbackGroup<T> {
    fn key(&self) -> &GroupKey {
        &self.key
    }

    fn reassess(&self, snapshot: &Snapshot) -> ReloadOutcome {
        self.assess(snapshot, true)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
