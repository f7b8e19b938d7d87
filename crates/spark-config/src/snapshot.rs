use std::collections::BTreeMap;
use std::collections::btree_map;

use crate::raw::RawProperty;

/// 一次重载周期合并出的完整、不可变配置视图。
///
/// ### 设计目的（Why）
/// - 读线程通过 `ArcSwap` 拿到整张快照的 `Arc`，写线程仅做整表替换，读路径无需加锁；
/// - 采用 [`BTreeMap`] 保持键有序，差异计算与日志输出均具备确定性。
///
/// ### 契约说明（What）
/// - 键唯一，条目值均为 `Some`（合并阶段会丢弃“不存在”的条目）；
/// - 发布后不再修改；`epoch` 单调递增，`published_at_ms` 为发布时刻的 Unix 毫秒。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    epoch: u64,
    published_at_ms: u64,
    entries: BTreeMap<String, RawProperty>,
}

impl Snapshot {
    /// 构造快照；`epoch = 0` 保留给初始化之前的空快照。
    pub fn new(epoch: u64, published_at_ms: u64, entries: BTreeMap<String, RawProperty>) -> Self {
        Self {
            epoch,
            published_at_ms,
            entries,
        }
    }

    /// 使用给定条目构造未编号的快照，主要用于测试与差异计算。
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = RawProperty>,
    {
        let entries = entries
            .into_iter()
            .map(|raw| (raw.name().to_owned(), raw))
            .collect();
        Self::new(0, 0, entries)
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[inline]
    pub fn published_at_ms(&self) -> u64 {
        self.published_at_ms
    }

    pub fn get(&self, name: &str) -> Option<&RawProperty> {
        self.entries.get(name)
    }

    /// 读取值字符串。
    pub fn value(&self, name: &str) -> Option<&str> {
        self.entries.get(name).and_then(RawProperty::value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, RawProperty> {
        self.entries.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.keys().map(String::as_str)
    }

    /// 按前缀返回条目，依赖 `BTreeMap` 的有序区间扫描。
    pub fn with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a RawProperty> + 'a {
        self.entries
            .range::<str, _>((std::ops::Bound::Included(prefix), std::ops::Bound::Unbounded))
            .take_while(move |(name, _)| name.starts_with(prefix))
            .map(|(_, raw)| raw)
    }
}
