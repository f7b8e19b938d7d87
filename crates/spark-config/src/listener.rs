use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::warn;

use crate::error::panic_message;
use crate::event::ChangeEvent;
use crate::runtime::Executor;

/// 全局变更监听器。
///
/// ### 契约说明（What）
/// - 每个完成的重载周期最多调用一次，参数为该周期检测到的全部事件；
/// - 空批次不会触发调用；
/// - 实现内部的 panic 会被隔离，不影响其它监听器与属性刷新。
pub trait ConfigListener: Send + Sync + 'static {
    fn on_events(&self, events: &[ChangeEvent]);
}

impl<F> ConfigListener for F
where
    F: Fn(&[ChangeEvent]) + Send + Sync + 'static,
{
    fn on_events(&self, events: &[ChangeEvent]) {
        self(events)
    }
}

#[derive(Clone)]
struct Registration {
    listener: Arc<dyn ConfigListener>,
    executor: Option<Arc<dyn Executor>>,
}

/// 监听器路由：负责把一个周期的事件批次分发给所有全局监听器。
///
/// # 教案级说明
/// - **意图 (Why)**：监听器可在任意线程注册，而分发只发生在重载线程；列表使用写时复制，
///   分发期间的注册不会与遍历互相干扰；
/// - **流程 (How)**：按注册顺序逐个投递；指定了执行器的监听器拿到批次的共享副本并在执行器上运行，
///   其余在当前线程同步执行并以 `catch_unwind` 隔离。
#[derive(Default)]
pub struct ListenerRouter {
    listeners: ArcSwap<Vec<Registration>>,
}

impl ListenerRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册同步监听器（在重载线程上执行）。
    pub fn add(&self, listener: Arc<dyn ConfigListener>) {
        self.push(Registration {
            listener,
            executor: None,
        });
    }

    /// 注册在指定执行器上运行的监听器。
    pub fn add_on(&self, executor: Arc<dyn Executor>, listener: Arc<dyn ConfigListener>) {
        self.push(Registration {
            listener,
            executor: Some(executor),
        });
    }

    fn push(&self, registration: Registration) {
        self.listeners.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(registration.clone());
            next
        });
    }

    pub fn len(&self) -> usize {
        self.listeners.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.load().is_empty()
    }

    /// 分发一个周期的事件批次；返回在当前线程上发生 panic 的监听器数量。
    pub fn dispatch(&self, events: &Arc<[ChangeEvent]>) -> usize {
        if events.is_empty() {
            return 0;
        }
        let listeners = self.listeners.load_full();
        let mut failures = 0;
        for (index, registration) in listeners.iter().enumerate() {
            // `InlineExecutor` 会在当前线程直接执行，同样需要隔离。
            let outcome = catch_unwind(AssertUnwindSafe(|| match &registration.executor {
                Some(executor) => {
                    let listener = Arc::clone(&registration.listener);
                    let batch = Arc::clone(events);
                    executor.execute(Box::new(move || listener.on_events(&batch)));
                }
                None => registration.listener.on_events(events),
            }));
            if let Err(payload) = outcome {
                failures += 1;
                warn!(
                    listener = index,
                    panic = %panic_message(payload.as_ref()),
                    "configuration listener panicked"
                );
            }
        }
        failures
    }
}
