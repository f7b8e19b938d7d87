use std::sync::Arc;

use arc_swap::ArcSwap;

use super::{SourceProvider, SourceSnapshot, snapshot_of};
use crate::error::Result;
use crate::raw::RawProperty;

/// 基于 `ArcSwap` 的内存数据源。
///
/// # 教案级说明
/// - **意图 (Why)**：嵌入方或测试需要在运行时直接改写配置，再由下一个重载周期观察到；
/// - **契约 (What)**：`set`/`remove`/`replace` 以整表替换方式生效，`load_snapshot` 返回调用瞬间的稳定副本；
/// - **并发 (How)**：写方使用 `rcu` 在竞争下重试，读方无锁。克隆后的实例共享同一张表。
#[derive(Clone, Default)]
pub struct MemorySource {
    entries: Arc<ArcSwap<SourceSnapshot>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<I, N, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<String>,
    {
        let source = Self::new();
        source.replace(snapshot_of(pairs));
        source
    }

    pub fn set<N, V>(&self, name: N, value: V)
    where
        N: Into<String>,
        V: Into<String>,
    {
        self.set_raw(RawProperty::new(name, value));
    }

    /// 写入带子来源等溯源信息的条目。
    pub fn set_raw(&self, raw: RawProperty) {
        self.entries.rcu(|current| {
            let mut next = SourceSnapshot::clone(current);
            next.insert(raw.name().to_owned(), raw.clone());
            next
        });
    }

    pub fn remove(&self, name: &str) {
        self.entries.rcu(|current| {
            let mut next = SourceSnapshot::clone(current);
            next.remove(name);
            next
        });
    }

    pub fn replace(&self, entries: SourceSnapshot) {
        self.entries.store(Arc::new(entries));
    }

    pub fn clear(&self) {
        self.replace(SourceSnapshot::new());
    }
}

impl SourceProvider for MemorySource {
    fn load_snapshot(&self) -> Result<SourceSnapshot> {
        Ok(SourceSnapshot::clone(&self.entries.load()))
    }
}
