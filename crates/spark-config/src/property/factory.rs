use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::trace;

use crate::error::{ConfigError, Result};
use crate::event::ChangeEvent;
use crate::snapshot::Snapshot;

use super::group::ReloadTarget;
use super::{Binding, GroupKey, ParserCallbackGroup, Property, ReloadOutcome};

/// 属性分组的缓存与重载路由。
///
/// # 教案级说明
/// - **意图 (Why)**：同键的句柄必须共享同一个分组；分组在任意线程上按需创建，
///   重载线程只需遍历受影响的分组；
/// - **契约 (What)**：
///   - 同一键并发创建时只有一个分组胜出，失败方丢弃自己的候选并复用胜者；
///   - 键相同但值类型不同返回 [`ConfigError::TypeConflict`]；
/// - **流程 (How)**：候选分组先以当前快照完成首次评估再插入映射，读者拿到的分组必然已初始化；
///   插入后再评估一次，补上首次评估与插入之间可能发布的新快照。
pub struct PropertyFactory {
    groups: DashMap<GroupKey, Arc<dyn ReloadTarget>>,
    current: Arc<ArcSwap<Snapshot>>,
}

impl PropertyFactory {
    pub(crate) fn new(current: Arc<ArcSwap<Snapshot>>) -> Self {
        Self {
            groups: DashMap::new(),
            current,
        }
    }

    /// 获取或创建绑定对应的句柄。
    pub fn bind<B: Binding>(&self, binding: B) -> Result<Property<B::Value>> {
        let key = binding.key();
        let existing = self.groups.get(&key).map(|entry| Arc::clone(entry.value()));
        if let Some(existing) = existing {
            return downcast::<B::Value>(existing, &key).map(Property::new);
        }

        let group = Arc::new(ParserCallbackGroup::new(Box::new(binding)));
        group.assess(&self.current.load(), false);
        let candidate: Arc<dyn ReloadTarget> = group;
        let winner = match self.groups.entry(key.clone()) {
            Entry::Occupied(occupied) => Arc::clone(occupied.get()),
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(&candidate));
                trace!(property = %key, "property group created");
                candidate
            }
        };
        let typed = downcast::<B::Value>(winner, &key)?;
        typed.assess(&self.current.load(), true);
        Ok(Property::new(typed))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// 对受本批事件影响的分组重新评估；返回值发生转换的分组数量。
    pub(crate) fn reassess(&self, snapshot: &Snapshot, events: &[ChangeEvent]) -> usize {
        if events.is_empty() {
            return 0;
        }
        let targets: Vec<Arc<dyn ReloadTarget>> = self
            .groups
            .iter()
            .filter(|entry| {
                let selector = &entry.value().key().selector;
                events.iter().any(|event| selector.matches(event.name()))
            })
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        targets
            .iter()
            .filter(|target| {
                matches!(
                    target.reassess(snapshot),
                    ReloadOutcome::Accepted | ReloadOutcome::Cleared
                )
            })
            .count()
    }
}

fn downcast<T: Send + Sync + 'static>(
    target: Arc<dyn ReloadTarget>,
    key: &GroupKey,
) -> Result<Arc<ParserCallbackGroup<T>>> {
    target
        .into_any()
        .downcast::<ParserCallbackGroup<T>>()
        .map_err(|_| ConfigError::TypeConflict {
            name: key.selector.id().into_owned(),
            tag: key.tag.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventStamp;
    use crate::property::{JsonBinding, ScalarBinding};
    use crate::raw::RawProperty;
    use serde::Deserialize;

    fn factory_with(pairs: &[(&str, &str)]) -> (PropertyFactory, Arc<ArcSwap<Snapshot>>) {
        let snapshot = Snapshot::new(
            1,
            0,
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_owned(), RawProperty::new(*k, *v)))
                .collect(),
        );
        let current = Arc::new(ArcSwap::from_pointee(snapshot));
        (PropertyFactory::new(Arc::clone(&current)), current)
    }

    #[test]
    fn same_key_shares_one_group() {
        let (factory, _) = factory_with(&[("n", "3")]);
        let a = factory.bind(ScalarBinding::<i64>::new("n")).expect("首次绑定");
        let b = factory.bind(ScalarBinding::<i64>::new("n")).expect("再次绑定");
        let c = factory.bind(ScalarBinding::<u32>::new("n")).expect("不同类型标签");
        assert!(a.shares_group_with(&b));
        assert_eq!(factory.len(), 2);
        assert_eq!(a.value().as_deref(), Some(&3));
        assert_eq!(c.value().as_deref(), Some(&3));
    }

    #[derive(Debug, Deserialize)]
    struct Left {
        #[allow(dead_code)]
        a: u32,
    }

    #[derive(Debug, Deserialize)]
    struct Right {
        #[allow(dead_code)]
        b: u32,
    }

    #[test]
    fn conflicting_value_types_are_rejected() {
        let (factory, _) = factory_with(&[]);
        factory
            .bind(JsonBinding::<Left>::new("doc", "Doc"))
            .expect("首次绑定");
        let err = factory
            .bind(JsonBinding::<Right>::new("doc", "Doc"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::TypeConflict { .. }));
    }

    #[test]
    fn only_affected_groups_are_reassessed() {
        let (factory, current) = factory_with(&[("a", "1"), ("b", "1")]);
        let a = factory.bind(ScalarBinding::<i64>::new("a")).expect("绑定 a");
        let b = factory.bind(ScalarBinding::<i64>::new("b")).expect("绑定 b");

        let next = Snapshot::new(
            2,
            0,
            [("a", "2"), ("b", "2")]
                .into_iter()
                .map(|(k, v)| (k.to_owned(), RawProperty::new(k, v)))
                .collect(),
        );
        let stamp = EventStamp::new(0, Arc::from("h"));
        let events = vec![ChangeEvent::updated(
            RawProperty::new("a", "1"),
            RawProperty::new("a", "2"),
            &stamp,
        )];
        current.store(Arc::new(next.clone()));
        assert_eq!(factory.reassess(&next, &events), 1);
        assert_eq!(a.value().as_deref(), Some(&2));
        assert_eq!(b.value().as_deref(), Some(&1));
    }
}
