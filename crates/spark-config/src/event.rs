//! 快照差异与变更事件。
//!
//! # 教案式说明
//! - **Why**：重载引擎每个周期只拿到全量快照，本模块把相邻两份快照转换为逐键的增量事件，
//!   供全局监听器与强类型属性层消费；
//! - **What**：[`diff`] 遍历新旧键的并集，输出 `Added`/`Updated`/`Removed`；[`EventHistory`]
//!   保留最近若干条事件用于排障；
//! - **How**：`Updated` 只比较值字符串，来源或子来源的单独变化不产生事件，避免数据源重新排序时引发通知风暴。

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::raw::RawProperty;
use crate::snapshot::Snapshot;

/// 变更类型。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Added,
    Removed,
    Updated,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Updated => "updated",
        })
    }
}

/// 单个键在相邻两份快照间的变化。
///
/// ### 契约说明（What）
/// - `Added`：`old` 为空、`new` 非空；
/// - `Removed`：`old` 非空、`new` 为空；
/// - `Updated`：两者均非空且值字符串不同；
/// - 构造函数按类型收紧参数，调用方无法拼出违反上述约束的事件。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    name: String,
    kind: ChangeKind,
    timestamp_ms: u64,
    host: Arc<str>,
    old: Option<RawProperty>,
    new: Option<RawProperty>,
}

impl ChangeEvent {
    pub fn added(new: RawProperty, stamp: &EventStamp) -> Self {
        Self::build(ChangeKind::Added, None, Some(new), stamp)
    }

    pub fn removed(old: RawProperty, stamp: &EventStamp) -> Self {
        Self::build(ChangeKind::Removed, Some(old), None, stamp)
    }

    pub fn updated(old: RawProperty, new: RawProperty, stamp: &EventStamp) -> Self {
        debug_assert!(!old.same_value(&new), "updated event requires differing values");
        Self::build(ChangeKind::Updated, Some(old), Some(new), stamp)
    }

    fn build(
        kind: ChangeKind,
        old: Option<RawProperty>,
        new: Option<RawProperty>,
        stamp: &EventStamp,
    ) -> Self {
        let name = new
            .as_ref()
            .or(old.as_ref())
            .map(|raw| raw.name().to_owned())
            .unwrap_or_default();
        Self {
            name,
            kind,
            timestamp_ms: stamp.timestamp_ms,
            host: Arc::clone(&stamp.host),
            old,
            new,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    #[inline]
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[inline]
    pub fn old(&self) -> Option<&RawProperty> {
        self.old.as_ref()
    }

    #[inline]
    pub fn new_value(&self) -> Option<&RawProperty> {
        self.new.as_ref()
    }
}

/// 同一周期内所有事件共享的时间戳与主机名。
#[derive(Clone, Debug)]
pub struct EventStamp {
    pub timestamp_ms: u64,
    pub host: Arc<str>,
}

impl EventStamp {
    pub fn new(timestamp_ms: u64, host: Arc<str>) -> Self {
        Self { timestamp_ms, host }
    }
}

/// 计算两份快照的差异。
///
/// # 教案式说明
/// - **契约 (What)**：输出顺序固定为“全部 Added → 全部 Updated → 全部 Removed”，组内按键的字典序；
///   同一键在一次调用中至多出现一次；
/// - **执行逻辑 (How)**：单次遍历新快照区分新增与更新，再遍历旧快照收集删除；
/// - **风险 (Trade-offs)**：跨键顺序仅为稳定性服务，不承诺业务语义。
pub fn diff(old: &Snapshot, new: &Snapshot, stamp: &EventStamp) -> Vec<ChangeEvent> {
    let mut added = Vec::new();
    let mut updated = Vec::new();
    for (name, current) in new.iter() {
        match old.get(name) {
            None => added.push(ChangeEvent::added(current.clone(), stamp)),
            Some(previous) if !previous.same_value(current) => {
                updated.push(ChangeEvent::updated(previous.clone(), current.clone(), stamp));
            }
            Some(_) => {}
        }
    }

    let removed = old
        .iter()
        .filter(|(name, _)| !new.contains(name))
        .map(|(_, previous)| ChangeEvent::removed(previous.clone(), stamp));

    added.extend(updated);
    added.extend(removed);
    added
}

/// 最近事件的有界环形缓冲。
///
/// ### 设计目的（Why）
/// - 运维排障时需要回看“最近发生过什么”，但不能无界增长；
/// - 写入只发生在重载线程，读取来自任意线程，因此采用 `ArcSwap` 整体替换：读者拿到的是一份稳定副本。
///
/// ### 契约说明（What）
/// - 超过容量时丢弃最旧的事件；容量为 `0` 时不保留任何事件。
pub struct EventHistory {
    capacity: usize,
    ring: ArcSwap<VecDeque<ChangeEvent>>,
}

impl EventHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ring: ArcSwap::from_pointee(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 追加一批事件。仅由重载线程调用。
    pub fn append(&self, events: &[ChangeEvent]) {
        if events.is_empty() || self.capacity == 0 {
            return;
        }
        let current = self.ring.load();
        let mut next = VecDeque::clone(&current);
        // 只保留本批次的尾部，避免先插入再逐条弹出。
        let skip = events.len().saturating_sub(self.capacity);
        for event in &events[skip..] {
            if next.len() == self.capacity {
                next.pop_front();
            }
            next.push_back(event.clone());
        }
        self.ring.store(Arc::new(next));
    }

    /// 按时间先后返回当前保留的事件。
    pub fn recent(&self) -> Vec<ChangeEvent> {
        self.ring.load().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ring.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.load().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp() -> EventStamp {
        EventStamp::new(42, Arc::from("test-host"))
    }

    #[test]
    fn diff_classifies_added_updated_removed() {
        let old = Snapshot::from_entries([
            RawProperty::new("keep", "1"),
            RawProperty::new("change", "a"),
            RawProperty::new("drop", "x"),
        ]);
        let new = Snapshot::from_entries([
            RawProperty::new("keep", "1"),
            RawProperty::new("change", "b"),
            RawProperty::new("fresh", "y"),
        ]);

        let events = diff(&old, &new, &stamp());
        let summary: Vec<_> = events.iter().map(|e| (e.name(), e.kind())).collect();
        assert_eq!(
            summary,
            [
                ("fresh", ChangeKind::Added),
                ("change", ChangeKind::Updated),
                ("drop", ChangeKind::Removed),
            ]
        );
        assert_eq!(events[1].old().and_then(RawProperty::value), Some("a"));
        assert_eq!(events[1].new_value().and_then(RawProperty::value), Some("b"));
        assert!(events[0].old().is_none());
        assert!(events[2].new_value().is_none());
        assert!(events.iter().all(|e| e.host() == "test-host" && e.timestamp_ms() == 42));
    }

    #[test]
    fn provenance_only_change_is_not_an_event() {
        let old = Snapshot::from_entries([RawProperty::new("a", "1").with_source("first")]);
        let new = Snapshot::from_entries([RawProperty::new("a", "1")
            .with_source("second")
            .with_origin("group-b")]);
        assert!(diff(&old, &new, &stamp()).is_empty());
    }

    #[test]
    fn history_drops_oldest_past_capacity() {
        let history = EventHistory::new(3);
        let stamp = stamp();
        let batch: Vec<_> = (0..5)
            .map(|i| ChangeEvent::added(RawProperty::new(format!("k{i}"), "v"), &stamp))
            .collect();
        history.append(&batch[..2]);
        history.append(&batch[2..]);
        let names: Vec<_> = history
            .recent()
            .iter()
            .map(|e| e.name().to_owned())
            .collect();
        assert_eq!(names, ["k2", "k3", "k4"]);
    }

    #[test]
    fn zero_capacity_history_keeps_nothing() {
        let history = EventHistory::new(0);
        history.append(&[ChangeEvent::added(RawProperty::new("a", "1"), &stamp())]);
        assert!(history.is_empty());
    }
}
