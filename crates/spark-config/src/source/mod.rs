//! 配置源契约与进程内的内建实现。
//!
//! # 设计目标概述
//! - 具体后端（文档库、协调服务、密钥库、KV 服务）的连接器不在本 crate 内，它们只需实现 [`SourceProvider`]；
//! - 本模块自带三个进程内实现：[`MemorySource`]（可原子替换的内存映射）、[`EnvSource`]（环境变量）、
//!   [`FnSource`]（闭包适配），覆盖嵌入式使用与测试场景。

mod env;
mod memory;

use std::collections::BTreeMap;
use std::fmt;

pub use env::EnvSource;
pub use memory::MemorySource;

use crate::error::Result;
use crate::raw::RawProperty;

/// 数据源一次拉取返回的全量映射。
pub type SourceSnapshot = BTreeMap<String, RawProperty>;

/// 配置源契约。
///
/// ### 设计目的（Why）
/// - 注册中心采用拉模式：每个周期主动调用 [`load_snapshot`](Self::load_snapshot)，
///   不要求数据源具备推送或流式能力；带推送能力的后端可在内部缓存并快速返回。
///
/// ### 契约说明（What）
/// - 返回完整快照而非增量；返回 `Err` 表示本周期不可用，注册中心会记录健康状态并跳过该源；
/// - 调用可能阻塞在 I/O 上，注册中心会在独立线程中执行并施加超时；
/// - 实现必须 `Send + Sync + 'static`，因为拉取发生在后台线程。
pub trait SourceProvider: Send + Sync + 'static {
    fn load_snapshot(&self) -> Result<SourceSnapshot>;
}

/// 由闭包实现的数据源。
pub struct FnSource<F> {
    load: F,
}

impl<F> FnSource<F>
where
    F: Fn() -> Result<SourceSnapshot> + Send + Sync + 'static,
{
    pub fn new(load: F) -> Self {
        Self { load }
    }
}

impl<F> SourceProvider for FnSource<F>
where
    F: Fn() -> Result<SourceSnapshot> + Send + Sync + 'static,
{
    fn load_snapshot(&self) -> Result<SourceSnapshot> {
        (self.load)()
    }
}

impl<F> fmt::Debug for FnSource<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnSource")
    }
}

/// 把 `(name, value)` 对收集成数据源快照。
pub fn snapshot_of<I, N, V>(pairs: I) -> SourceSnapshot
where
    I: IntoIterator<Item = (N, V)>,
    N: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(name, value)| {
            let raw = RawProperty::new(name, value);
            (raw.name().to_owned(), raw)
        })
        .collect()
}
