//! # spark-config
//!
//! 多源合并、周期热加载、强类型可观察的实时配置注册中心。
//!
//! ## 架构总览
//! 1. **数据源**（[`SourceProvider`]）按注册顺序排列，每个周期被拉取一次；
//! 2. **合并器**（[`SourceMerger`]）按“先注册者胜出”生成一份 [`Snapshot`]，失败源只影响自己的键；
//! 3. **重载引擎**（[`ReloadEngine`]）与上一份快照做差异，原子发布新快照，记录 [`ChangeEvent`]
//!    并分发给全局监听器；
//! 4. **强类型属性**（[`Property<T>`]）在相关键变化时重新解析与校验，通过后以 `(旧值, 新值)` 通知回调。
//!
//! ## 线程模型
//! - 读路径（快照、属性值）全部无锁，基于 `arc_swap`；
//! - 写路径只有重载线程，周期之间严格串行；
//! - 校验器、回调、监听器可在任意线程注册，列表采用写时复制。
//!
//! ## 快速上手
//! ```
//! use spark_config::{ConfigRegistry, MemorySource};
//!
//! let memory = MemorySource::with_entries([("server.port", "8080")]);
//! let registry = ConfigRegistry::builder()
//!     .source("memory", memory.clone())
//!     .build()?;
//! registry.init()?;
//!
//! let port = registry.property::<u16>("server.port")?;
//! assert_eq!(port.value().as_deref(), Some(&8080));
//!
//! memory.set("server.port", "9090");
//! registry.reload_now();
//! assert_eq!(port.value().as_deref(), Some(&9090));
//! # Ok::<(), spark_config::ConfigError>(())
//! ```

#![deny(unsafe_code)]

pub mod engine;
pub mod error;
pub mod event;
pub mod listener;
pub mod merge;
pub mod property;
pub mod raw;
pub mod registry;
pub mod runtime;
pub mod settings;
pub mod snapshot;
pub mod source;

pub use engine::{CycleOutcome, CycleReport, ReloadEngine};
pub use error::{ConfigError, ConfigErrorKind, Result};
pub use event::{ChangeEvent, ChangeKind, EventHistory, EventStamp, diff};
pub use listener::{ConfigListener, ListenerRouter};
pub use merge::{MergeReport, NamedSource, SourceHealth, SourceMerger};
pub use property::{
    Binding, GroupKey, JsonBinding, ListBinding, MultiMapBinding, ObjectBinding, ParseOutcome,
    Property, PropertyFactory, RangeBinding, ReloadOutcome, Scalar, ScalarBinding, Selector,
    TypeTag, ValueRange,
};
pub use raw::RawProperty;
pub use registry::{ConfigRegistry, RegistryBuilder};
pub use runtime::{Executor, InlineExecutor, RegistryRuntime, Task, WorkerPool};
pub use settings::{FailurePolicy, RegistrySettings};
pub use snapshot::Snapshot;
pub use source::{EnvSource, FnSource, MemorySource, SourceProvider, SourceSnapshot, snapshot_of};
