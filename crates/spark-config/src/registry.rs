use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::engine::{CycleOutcome, ReloadEngine};
use crate::error::Result;
use crate::event::ChangeEvent;
use crate::listener::ConfigListener;
use crate::merge::{NamedSource, SourceHealth, validate_source_names};
use crate::property::{
    Binding, JsonBinding, ListBinding, MultiMapBinding, ObjectBinding, Property, RangeBinding,
    Scalar, ScalarBinding, ValueRange,
};
use crate::raw::RawProperty;
use crate::runtime::{Executor, RegistryRuntime};
use crate::settings::RegistrySettings;
use crate::snapshot::Snapshot;
use crate::source::SourceProvider;

type PendingListener = (Option<Arc<dyn Executor>>, Arc<dyn ConfigListener>);

/// 注册中心构建器。
///
/// ### 契约说明（What）
/// - 数据源按 [`source`](Self::source) 的调用顺序确定优先级，名称不得重复；
/// - 未提供运行时时，[`build`](Self::build) 按设置中的 `callback_workers` 创建一个私有运行时，
///   并在注册中心关闭时一并关闭；共享运行时由调用方负责拆除。
#[derive(Default)]
pub struct RegistryBuilder {
    settings: RegistrySettings,
    sources: Vec<NamedSource>,
    listeners: Vec<PendingListener>,
    runtime: Option<Arc<RegistryRuntime>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn settings(mut self, settings: RegistrySettings) -> Self {
        self.settings = settings;
        self
    }

    /// 追加一个数据源；越早追加优先级越高。
    pub fn source<N, P>(self, name: N, provider: P) -> Self
    where
        N: Into<Cow<'static, str>>,
        P: SourceProvider,
    {
        self.shared_source(name, Arc::new(provider))
    }

    pub fn shared_source<N>(mut self, name: N, provider: Arc<dyn SourceProvider>) -> Self
    where
        N: Into<Cow<'static, str>>,
    {
        self.sources.push(NamedSource::new(name, provider));
        self
    }

    pub fn listener<L: ConfigListener>(mut self, listener: L) -> Self {
        self.listeners.push((None, Arc::new(listener)));
        self
    }

    pub fn listener_on<L: ConfigListener>(mut self, executor: Arc<dyn Executor>, listener: L) -> Self {
        self.listeners.push((Some(executor), Arc::new(listener)));
        self
    }

    pub fn runtime(mut self, runtime: Arc<RegistryRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<ConfigRegistry> {
        self.settings.validate()?;
        validate_source_names(&self.sources)?;

        let (runtime, owns_runtime) = match self.runtime {
            Some(runtime) => (runtime, false),
            None => (
                Arc::new(RegistryRuntime::new(self.settings.callback_workers)?),
                true,
            ),
        };
        let engine = Arc::new(ReloadEngine::new(
            &self.settings,
            self.sources,
            Arc::clone(runtime.host()),
        )?);
        for (executor, listener) in self.listeners {
            match executor {
                Some(executor) => engine.listeners().add_on(executor, listener),
                None => engine.listeners().add(listener),
            }
        }
        debug!(
            sources = engine.source_health().len(),
            listeners = engine.listeners().len(),
            "configuration registry built"
        );
        Ok(ConfigRegistry {
            engine,
            runtime,
            owns_runtime,
            settings: self.settings,
        })
    }
}

/// 实时配置注册中心。
///
/// # 教案级说明
/// - **意图 (Why)**：对业务暴露唯一入口：读取原始键值、创建强类型属性、订阅全局变更；
/// - **契约 (What)**：
///   - [`init`](Self::init) 返回前首个快照已发布，之后由后台线程按周期刷新；
///   - 所有读取方法无锁，可在任意线程并发调用；
///   - 属性可在 `init` 之前创建，此时为“无值”，首个周期发布后自动填充并触发回调；
/// - **风险 (Trade-offs)**：`Drop` 会停止调度线程，持有属性句柄的组件在注册中心释放后只能读到最后一次的值。
pub struct ConfigRegistry {
    engine: Arc<ReloadEngine>,
    runtime: Arc<RegistryRuntime>,
    owns_runtime: bool,
    settings: RegistrySettings,
}

impl ConfigRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// 同步合并并发布首个快照，然后启动周期调度。
    pub fn init(&self) -> Result<CycleOutcome> {
        self.engine.init()
    }

    /// 立即执行一个重载周期，不等待下一次调度。
    pub fn reload_now(&self) -> CycleOutcome {
        self.engine.reload_now()
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    pub fn runtime(&self) -> &Arc<RegistryRuntime> {
        &self.runtime
    }

    /// 默认的回调执行器（运行时的线程池）。
    pub fn executor(&self) -> Arc<dyn Executor> {
        self.runtime.executor()
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.engine.current()
    }

    pub fn get(&self, name: &str) -> Option<RawProperty> {
        self.engine.current().get(name).cloned()
    }

    pub fn value(&self, name: &str) -> Option<String> {
        self.engine.current().value(name).map(str::to_owned)
    }

    pub fn names_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.engine
            .current()
            .with_prefix(prefix)
            .map(|raw| raw.name().to_owned())
            .collect()
    }

    pub fn recent_events(&self) -> Vec<ChangeEvent> {
        self.engine.history().recent()
    }

    pub fn source_health(&self) -> Vec<SourceHealth> {
        self.engine.source_health()
    }

    pub fn add_listener<L: ConfigListener>(&self, listener: L) {
        self.engine.listeners().add(Arc::new(listener));
    }

    pub fn add_listener_on<L: ConfigListener>(&self, executor: Arc<dyn Executor>, listener: L) {
        self.engine.listeners().add_on(executor, Arc::new(listener));
    }

    /// 获取或创建任意绑定对应的属性。
    pub fn bind<B: Binding>(&self, binding: B) -> Result<Property<B::Value>> {
        self.engine.properties().bind(binding)
    }

    pub fn property<T: Scalar>(&self, name: &str) -> Result<Property<T>> {
        self.bind(ScalarBinding::<T>::new(name))
    }

    pub fn list_property<T: Scalar>(&self, name: &str) -> Result<Property<Vec<T>>> {
        self.bind(ListBinding::<T>::new(name))
    }

    pub fn multimap_property<T: Scalar>(
        &self,
        name: &str,
    ) -> Result<Property<BTreeMap<String, Vec<T>>>> {
        self.bind(MultiMapBinding::<T>::new(name))
    }

    pub fn range_property<T: Scalar + PartialOrd>(
        &self,
        name: &str,
    ) -> Result<Property<ValueRange<T>>> {
        self.bind(RangeBinding::<T>::new(name))
    }

    pub fn json_property<T, S>(&self, name: &str, shape: S) -> Result<Property<T>>
    where
        T: DeserializeOwned + Send + Sync + 'static,
        S: Into<Cow<'static, str>>,
    {
        self.bind(JsonBinding::<T>::new(name, shape))
    }

    pub fn object_property<T>(&self, binding: ObjectBinding<T>) -> Result<Property<T>>
    where
        T: Default + Send + Sync + 'static,
    {
        self.bind(binding)
    }

    /// 停止调度线程；私有运行时同时关闭。可重复调用。
    pub fn shutdown(&self) {
        self.engine.shutdown();
        if self.owns_runtime {
            self.runtime.shutdown();
        }
    }
}

impl Drop for ConfigRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ConfigRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigRegistry")
            .field("started", &self.engine.is_started())
            .field("epoch", &self.engine.current().epoch())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
