use std::fmt;
use std::sync::Arc;

use crate::error::{ConfigError, Result};
use crate::raw::RawProperty;
use crate::runtime::Executor;

use super::{ParserCallbackGroup, TypeTag};

/// 面向业务调用点的强类型属性句柄。
///
/// ### 契约说明（What）
/// - 句柄廉价克隆，所有克隆以及同键的其它句柄共享同一个 [`ParserCallbackGroup`]；
/// - [`value`](Self::value) 无锁返回最近一次被接受的值；
/// - 回调签名为 `(旧值, 新值)`，任一侧为 `None` 表示该侧“无值”。
pub struct Property<T> {
    group: Arc<ParserCallbackGroup<T>>,
}

impl<T> Clone for Property<T> {
    fn clone(&self) -> Self {
        Self {
            group: Arc::clone(&self.group),
        }
    }
}

impl<T: Send + Sync + 'static> Property<T> {
    pub(crate) fn new(group: Arc<ParserCallbackGroup<T>>) -> Self {
        Self { group }
    }

    /// 属性名（多属性绑定时为选择器标识）。
    pub fn name(&self) -> String {
        self.group.key().selector.id().into_owned()
    }

    pub fn tag(&self) -> &TypeTag {
        &self.group.key().tag
    }

    pub fn value(&self) -> Option<Arc<T>> {
        self.group.value()
    }

    /// 无值时返回 [`ConfigError::Absent`]。
    pub fn value_or_err(&self) -> Result<Arc<T>> {
        self.value().ok_or_else(|| ConfigError::Absent { name: self.name() })
    }

    pub fn value_or(&self, default: T) -> T
    where
        T: Clone,
    {
        self.value().map_or(default, |value| T::clone(&value))
    }

    /// 产生当前值的原始输入及其来源。
    pub fn inputs(&self) -> Vec<RawProperty> {
        self.group.inputs()
    }

    /// 注册校验器。
    ///
    /// 当前存在值且不满足断言时返回 [`ConfigError::ValidationRejected`]，校验器不会被保存；
    /// 当前无值时直接登记，之后的每个候选值都要经过它。
    pub fn add_validator<F>(&self, validator: F) -> Result<()>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.group.add_validator(Arc::new(validator))
    }

    /// 注册在重载线程上同步执行的回调。
    pub fn add_callback<F>(&self, callback: F)
    where
        F: Fn(Option<&T>, Option<&T>) + Send + Sync + 'static,
    {
        self.group.add_callback(Arc::new(callback), None);
    }

    /// 注册在指定执行器上运行的回调。
    pub fn add_callback_on<F>(&self, executor: Arc<dyn Executor>, callback: F)
    where
        F: Fn(Option<&T>, Option<&T>) + Send + Sync + 'static,
    {
        self.group.add_callback(Arc::new(callback), Some(executor));
    }

    /// 两个句柄是否共享同一个分组。
    pub fn shares_group_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.group, &other.group)
    }
}

impl<T> fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("key", self.group.key())
            .finish()
    }
}
