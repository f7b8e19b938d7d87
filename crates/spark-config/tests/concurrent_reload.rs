//! 并发契约的压力测试：读者与重载并行，注册操作与进行中的重载交错。
//!
//! # 教案级说明
//! - **意图 (Why)**：读取路径无锁、写路径串行，两者叠加后仍需保证读者看不到被拒绝的值，
//!   且每次被接受的转换恰好送达每个回调一次；
//! - **策略 (How)**：写线程依次写入 `1..=ROUNDS`，偶数校验器拒绝所有奇数；读者线程持续读取，
//!   注册线程同时创建共享句柄、追加校验器与回调并绑定新键。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use spark_config::{ConfigRegistry, MemorySource, Property, RegistrySettings};

const ROUNDS: i64 = 400;
const READERS: usize = 4;

type Transitions = Arc<Mutex<Vec<(Option<i64>, Option<i64>)>>>;

fn record(handle: &Property<i64>) -> Transitions {
    let seen: Transitions = Arc::default();
    let sink = Arc::clone(&seen);
    handle.add_callback(move |old: Option<&i64>, new: Option<&i64>| {
        sink.lock().push((old.copied(), new.copied()));
    });
    seen
}

/// 相邻转换首尾衔接，每次恰好前进到下一个偶数，最后一次落在终值上。
fn assert_contiguous(transitions: &[(Option<i64>, Option<i64>)], last: i64) {
    for (old, new) in transitions {
        assert_eq!(old.map(|v| v + 2), *new, "转换跳过或重复: {transitions:?}");
    }
    for pair in transitions.windows(2) {
        assert_eq!(pair[0].1, pair[1].0, "转换链断开: {transitions:?}");
    }
    if let Some((_, end)) = transitions.last() {
        assert_eq!(*end, Some(last));
    }
}

#[test]
fn readers_and_registrations_interleave_with_reloads() {
    let memory = MemorySource::with_entries([("n", "0")]);
    let registry = ConfigRegistry::builder()
        .settings(
            RegistrySettings::default()
                .with_reload_period(Duration::from_secs(3600))
                .with_fetch_timeout(None)
                .with_callback_workers(1),
        )
        .source("memory", memory.clone())
        .build()
        .expect("注册中心应能构建");
    registry.init().expect("初始化");
    let n = registry.property::<i64>("n").expect("创建属性");
    n.add_validator(|v: &i64| *v % 2 == 0).expect("初始值为偶数");
    let baseline = record(&n);
    let done = AtomicBool::new(false);

    let late = thread::scope(|scope| {
        for _ in 0..READERS {
            let n = n.clone();
            let done = &done;
            scope.spawn(move || {
                let mut last = 0;
                while !done.load(Ordering::Acquire) {
                    let value = n.value().map(|v| *v).expect("值始终存在");
                    assert_eq!(value % 2, 0, "读到了被拒绝的值 {value}");
                    assert!(value >= last, "读到的值倒退: {last} -> {value}");
                    last = value;
                }
            });
        }

        let registering = scope.spawn(|| {
            let mut recorders = Vec::new();
            let mut index = 0usize;
            loop {
                let handle = registry.property::<i64>("n").expect("共享句柄");
                assert!(handle.shares_group_with(&n));
                handle
                    .add_validator(|v: &i64| *v >= 0)
                    .expect("当前值非负，注册应成功");
                recorders.push(record(&handle));
                registry
                    .property::<i64>(&format!("extra.{index}"))
                    .expect("绑定新键");
                index += 1;
                if done.load(Ordering::Acquire) {
                    break recorders;
                }
                thread::yield_now();
            }
        });

        for value in 1..=ROUNDS {
            memory.set("n", value.to_string());
            assert!(registry.reload_now().is_published());
        }
        done.store(true, Ordering::Release);
        registering.join().expect("注册线程不应 panic")
    });

    assert_eq!(n.value().as_deref(), Some(&ROUNDS));

    let baseline = baseline.lock();
    assert_eq!(baseline.len(), (ROUNDS / 2) as usize);
    assert_eq!(baseline.first(), Some(&(Some(0), Some(2))));
    assert_contiguous(&baseline, ROUNDS);

    for seen in &late {
        assert_contiguous(&seen.lock(), ROUNDS);
    }
    registry.shutdown();
}
