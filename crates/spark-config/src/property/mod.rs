//! 强类型属性框架。
//!
//! # 设计目标概述
//! - 业务代码通过 [`Property<T>`] 读取解析、校验后的值，并订阅变更；
//! - 同一 `(选择器, 类型标签)` 的所有句柄共享一个 [`ParserCallbackGroup`]：每个周期只解析一次，
//!   所有订阅者看到同一对 `(旧值, 新值)`；
//! - 类型身份由 [`TypeTag`] 枚举在创建时确定，而不是依赖运行期类型令牌。
//!
//! # 模块拆分
//! - `scalar`：标量、列表、多值映射、区间的文本解析；
//! - `json`：单个属性值承载 JSON 文档的绑定；
//! - `object`：按前缀或显式字段表把多条属性装配为结构体；
//! - `group`：共享的解析 + 校验 + 回调单元；
//! - `handle`：面向调用点的句柄；
//! - `factory`：按键缓存分组并把重载事件路由到分组。

mod factory;
mod group;
mod handle;
mod json;
mod object;
mod scalar;

use std::borrow::Cow;
use std::fmt;

pub use factory::PropertyFactory;
pub use group::ParserCallbackGroup;
pub use handle::Property;
pub use json::JsonBinding;
pub use object::ObjectBinding;
pub use scalar::{
    ListBinding, MultiMapBinding, RangeBinding, Scalar, ScalarBinding, ValueRange, parse_duration,
};

use crate::raw::RawProperty;
use crate::snapshot::Snapshot;

/// 目标类型的判别标签。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum TypeTag {
    String,
    Bool,
    I32,
    I64,
    U16,
    U32,
    U64,
    F64,
    Duration,
    List(Box<TypeTag>),
    MultiMap(Box<TypeTag>),
    Range(Box<TypeTag>),
    /// JSON 文档绑定，参数为调用方声明的结构名。
    Json(Cow<'static, str>),
    /// 字段绑定的对象，参数为调用方声明的结构名。
    Object(Cow<'static, str>),
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => f.write_str("string"),
            Self::Bool => f.write_str("bool"),
            Self::I32 => f.write_str("i32"),
            Self::I64 => f.write_str("i64"),
            Self::U16 => f.write_str("u16"),
            Self::U32 => f.write_str("u32"),
            Self::U64 => f.write_str("u64"),
            Self::F64 => f.write_str("f64"),
            Self::Duration => f.write_str("duration"),
            Self::List(inner) => write!(f, "list<{inner}>"),
            Self::MultiMap(inner) => write!(f, "multimap<{inner}>"),
            Self::Range(inner) => write!(f, "range<{inner}>"),
            Self::Json(shape) => write!(f, "json<{shape}>"),
            Self::Object(shape) => write!(f, "object<{shape}>"),
        }
    }
}

/// 一个绑定从快照中选取哪些原始属性。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Selector {
    /// 单个属性名。
    Exact(String),
    /// 所有以该前缀开头的属性。
    Prefix(String),
    /// 显式列出的属性名（已排序去重）。
    Names(Vec<String>),
}

impl Selector {
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();
        Self::Names(names)
    }

    /// 选择器的可读标识，同时作为句柄的 `name`。
    pub fn id(&self) -> Cow<'_, str> {
        match self {
            Self::Exact(name) => Cow::Borrowed(name),
            Self::Prefix(prefix) => Cow::Owned(format!("{prefix}*")),
            Self::Names(names) => Cow::Owned(names.join(",")),
        }
    }

    /// 某个键的变化是否可能影响本选择器。
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Exact(exact) => exact == name,
            Self::Prefix(prefix) => name.starts_with(prefix.as_str()),
            Self::Names(names) => names.binary_search_by(|n| n.as_str().cmp(name)).is_ok(),
        }
    }

    /// 从快照中取出当前输入，顺序确定。
    pub fn select(&self, snapshot: &Snapshot) -> Vec<RawProperty> {
        match self {
            Self::Exact(name) => snapshot.get(name).cloned().into_iter().collect(),
            Self::Prefix(prefix) => snapshot.with_prefix(prefix).cloned().collect(),
            Self::Names(names) => names
                .iter()
                .filter_map(|name| snapshot.get(name).cloned())
                .collect(),
        }
    }
}

/// 共享分组的键。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub selector: Selector,
    pub tag: TypeTag,
}

impl GroupKey {
    pub fn new(selector: Selector, tag: TypeTag) -> Self {
        Self { selector, tag }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.selector.id(), self.tag)
    }
}

/// 解析结果。
///
/// - `Parsed`：得到候选值，仍需经过校验；
/// - `Absent`：没有可用输入，属性变为“无值”；
/// - `Failed`：输入存在但无法转换，保留旧值。
#[derive(Clone, Debug, PartialEq)]
pub enum ParseOutcome<T> {
    Parsed(T),
    Absent,
    Failed(String),
}

impl<T> ParseOutcome<T> {
    pub fn from_result(result: Result<T, String>) -> Self {
        match result {
            Ok(value) => Self::Parsed(value),
            Err(reason) => Self::Failed(reason),
        }
    }
}

/// 一次重新评估的结论，用于日志与测试断言。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// 输入未变化，跳过解析与校验。
    Unchanged,
    /// 快照比已评估过的更旧，忽略。
    Stale,
    /// 新值被接受。
    Accepted,
    /// 输入消失，值被清空。
    Cleared,
    /// 校验器拒绝了候选值，旧值保留。
    Invalid(String),
    /// 解析失败，旧值保留。
    Failed(String),
}

/// 把一组原始属性映射为目标值的绑定描述。
///
/// ### 契约说明（What）
/// - [`key`](Self::key) 决定共享粒度：键相同的绑定必须产生同一 Rust 类型，否则注册时返回
///   [`ConfigError::TypeConflict`](crate::ConfigError::TypeConflict)；
/// - [`parse`](Self::parse) 只接收选择器选出的输入，必须是纯函数，不得有副作用。
pub trait Binding: Send + Sync + 'static {
    type Value: Send + Sync + 'static;

    fn key(&self) -> GroupKey;

    fn parse(&self, inputs: &[RawProperty]) -> ParseOutcome<Self::Value>;
}

/// 单属性绑定取第一条输入的值。
pub(crate) fn single_value(inputs: &[RawProperty]) -> Option<&str> {
    inputs.first().and_then(RawProperty::value)
}
