//! 端到端的重载周期测试。
//!
//! # 测试目标（Why）
//! - 以内存数据源驱动完整周期，验证事件、快照与属性回调的协同；
//! - 所有周期通过 `reload_now` 手动触发，调度周期设为一小时，避免计时带来的抖动。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use spark_config::{
    ChangeEvent, ChangeKind, ConfigError, ConfigRegistry, CycleOutcome, FnSource, MemorySource,
    RegistryRuntime, RegistrySettings, SourceProvider, SourceSnapshot,
};
use tracing_test::traced_test;

fn quiet_settings() -> RegistrySettings {
    RegistrySettings::default()
        .with_reload_period(Duration::from_secs(3600))
        .with_fetch_timeout(None)
}

fn registry_over(memory: &MemorySource) -> ConfigRegistry {
    ConfigRegistry::builder()
        .settings(quiet_settings())
        .runtime(Arc::new(
            RegistryRuntime::with_host(1, "node-1").expect("运行时应能启动"),
        ))
        .source("memory", memory.clone())
        .build()
        .expect("注册中心应能构建")
}

type Transitions<T> = Arc<Mutex<Vec<(Option<T>, Option<T>)>>>;

fn record<T: Clone + Send + Sync + 'static>(
    transitions: &Transitions<T>,
) -> impl Fn(Option<&T>, Option<&T>) + Send + Sync + 'static {
    let transitions = Arc::clone(transitions);
    move |old: Option<&T>, new: Option<&T>| transitions.lock().push((old.cloned(), new.cloned()))
}

#[test]
fn updated_value_fires_callback_once_with_old_and_new() {
    let memory = MemorySource::with_entries([("a", "1")]);
    let registry = registry_over(&memory);
    registry.init().expect("初始化");

    let a = registry.property::<i64>("a").expect("创建属性");
    assert_eq!(a.value().as_deref(), Some(&1));
    let transitions: Transitions<i64> = Arc::default();
    a.add_callback(record(&transitions));

    memory.set("a", "2");
    registry.reload_now();
    assert_eq!(a.value().as_deref(), Some(&2));
    assert_eq!(*transitions.lock(), [(Some(1), Some(2))]);

    registry.reload_now();
    assert_eq!(transitions.lock().len(), 1, "无变化的周期不得触发回调");
}

#[test]
fn removed_key_emits_event_and_clears_property() {
    let memory = MemorySource::with_entries([("b", "x")]);
    let registry = registry_over(&memory);
    registry.init().expect("初始化");

    let b = registry.property::<String>("b").expect("创建属性");
    let transitions: Transitions<String> = Arc::default();
    b.add_callback(record(&transitions));

    memory.remove("b");
    registry.reload_now();

    let events = registry.recent_events();
    let last = events.last().expect("应记录删除事件");
    assert_eq!(last.name(), "b");
    assert_eq!(last.kind(), ChangeKind::Removed);
    assert_eq!(last.old().and_then(|raw| raw.value()), Some("x"));
    assert_eq!(last.host(), "node-1");
    assert!(b.value().is_none());
    assert!(matches!(b.value_or_err(), Err(ConfigError::Absent { .. })));
    assert_eq!(*transitions.lock(), [(Some("x".to_owned()), None)]);
}

#[test]
fn listeners_receive_one_non_empty_batch_per_cycle() {
    let memory = MemorySource::with_entries([("keep", "1"), ("drop", "1"), ("bump", "1")]);
    let batches: Arc<Mutex<Vec<Vec<(String, ChangeKind)>>>> = Arc::default();
    let registry = {
        let batches = Arc::clone(&batches);
        ConfigRegistry::builder()
            .settings(quiet_settings())
            .source("memory", memory.clone())
            .listener(move |events: &[ChangeEvent]| {
                batches.lock().push(
                    events
                        .iter()
                        .map(|event| (event.name().to_owned(), event.kind()))
                        .collect(),
                );
            })
            .build()
            .expect("注册中心应能构建")
    };
    registry.init().expect("初始化");
    assert_eq!(batches.lock().len(), 1, "首个周期把所有键报告为新增");

    registry.reload_now();
    assert_eq!(batches.lock().len(), 1, "空批次不投递");

    memory.remove("drop");
    memory.set("bump", "2");
    memory.set("fresh", "1");
    registry.reload_now();
    let batches = batches.lock();
    assert_eq!(batches.len(), 2);
    assert_eq!(
        batches[1],
        [
            ("fresh".to_owned(), ChangeKind::Added),
            ("bump".to_owned(), ChangeKind::Updated),
            ("drop".to_owned(), ChangeKind::Removed),
        ]
    );
}

fn source_of(registry: &ConfigRegistry, name: &str) -> Option<String> {
    registry.get(name)?.source().map(str::to_owned)
}

#[test]
fn provenance_only_changes_republish_without_events() {
    let primary = MemorySource::new();
    let fallback = MemorySource::with_entries([("k", "v")]);
    let registry = ConfigRegistry::builder()
        .settings(quiet_settings())
        .source("primary", primary.clone())
        .source("fallback", fallback)
        .build()
        .expect("注册中心应能构建");
    registry.init().expect("初始化");
    assert_eq!(source_of(&registry, "k").as_deref(), Some("fallback"));
    let before = registry.recent_events().len();

    primary.set("k", "v");
    let outcome = registry.reload_now();
    assert_eq!(outcome.report().map(|report| report.events), Some(0));
    assert_eq!(registry.recent_events().len(), before);
    assert_eq!(source_of(&registry, "k").as_deref(), Some("primary"));
}

#[test]
#[traced_test]
fn failing_source_only_degrades_its_own_keys() {
    let broken = Arc::new(AtomicBool::new(false));
    let flaky = MemorySource::with_entries([("flaky.only", "1"), ("shared", "flaky")]);
    let stable = MemorySource::with_entries([("stable.only", "1"), ("shared", "stable")]);
    let flaky_source = {
        let broken = Arc::clone(&broken);
        let flaky = flaky.clone();
        FnSource::new(move || -> spark_config::Result<SourceSnapshot> {
            if broken.load(Ordering::SeqCst) {
                Err(ConfigError::source_unavailable("flaky", "connection refused"))
            } else {
                flaky.load_snapshot()
            }
        })
    };
    let registry = ConfigRegistry::builder()
        .settings(quiet_settings())
        .source("flaky", flaky_source)
        .source("stable", stable)
        .build()
        .expect("注册中心应能构建");
    registry.init().expect("初始化");
    assert_eq!(registry.value("shared").as_deref(), Some("flaky"));

    broken.store(true, Ordering::SeqCst);
    let outcome = registry.reload_now();
    assert_eq!(outcome.report().map(|report| report.failed_sources), Some(1));
    assert_eq!(registry.value("stable.only").as_deref(), Some("1"));
    assert_eq!(registry.value("shared").as_deref(), Some("stable"));
    assert!(registry.value("flaky.only").is_none());

    let health = registry.source_health();
    assert!(!health[0].is_healthy());
    assert!(health[1].is_healthy());
    assert!(logs_contain("configuration source failed"));
}

fn explode(_: &[ChangeEvent]) {
    panic!("listener exploded");
}

#[test]
#[traced_test]
fn panicking_listener_does_not_stop_property_refresh() {
    let memory = MemorySource::with_entries([("a", "1")]);
    let registry = ConfigRegistry::builder()
        .settings(quiet_settings())
        .source("memory", memory.clone())
        .listener(explode)
        .build()
        .expect("注册中心应能构建");
    registry.init().expect("初始化");
    let a = registry.property::<i32>("a").expect("创建属性");

    memory.set("a", "5");
    let outcome = registry.reload_now();
    assert_eq!(outcome.report().map(|report| report.listener_panics), Some(1));
    assert_eq!(a.value().as_deref(), Some(&5));
    assert!(logs_contain("configuration listener panicked"));
}

#[test]
fn all_sources_failing_skips_the_cycle() {
    let broken = Arc::new(AtomicBool::new(false));
    let source = {
        let broken = Arc::clone(&broken);
        FnSource::new(move || -> spark_config::Result<SourceSnapshot> {
            if broken.load(Ordering::SeqCst) {
                Err(ConfigError::source_unavailable("only", "down"))
            } else {
                Ok(spark_config::snapshot_of([("a", "1")]))
            }
        })
    };
    let registry = ConfigRegistry::builder()
        .settings(quiet_settings())
        .source("only", source)
        .build()
        .expect("注册中心应能构建");
    registry.init().expect("初始化");
    let epoch = registry.snapshot().epoch();

    broken.store(true, Ordering::SeqCst);
    assert!(matches!(
        registry.reload_now(),
        CycleOutcome::Skipped(ConfigError::AllSourcesFailed { .. })
    ));
    assert_eq!(registry.snapshot().epoch(), epoch);
    assert_eq!(registry.value("a").as_deref(), Some("1"));
}

#[test]
fn init_twice_is_rejected() {
    let registry = registry_over(&MemorySource::new());
    registry.init().expect("初始化");
    assert!(matches!(registry.init(), Err(ConfigError::AlreadyStarted)));
}
