use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use crate::raw::RawProperty;

use super::{Binding, GroupKey, ParseOutcome, Selector, TypeTag, single_value};

/// 可从单个字符串解析的目标类型。
///
/// ### 契约说明（What）
/// - [`tag`](Self::tag) 必须对每个实现唯一，它参与分组键的计算；
/// - [`parse_scalar`](Self::parse_scalar) 的错误信息会原样写入日志。
pub trait Scalar: Sized + Send + Sync + 'static {
    fn tag() -> TypeTag;

    fn parse_scalar(text: &str) -> Result<Self, String>;
}

impl Scalar for String {
    fn tag() -> TypeTag {
        TypeTag::String
    }

    fn parse_scalar(text: &str) -> Result<Self, String> {
        Ok(text.to_owned())
    }
}

impl Scalar for bool {
    fn tag() -> TypeTag {
        TypeTag::Bool
    }

    fn parse_scalar(text: &str) -> Result<Self, String> {
        match text.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            other => Err(format!("`{other}` is not a boolean")),
        }
    }
}

macro_rules! numeric_scalar {
    ($($ty:ty => $tag:ident),* $(,)?) => {
        $(
            impl Scalar for $ty {
                fn tag() -> TypeTag {
                    TypeTag::$tag
                }

                fn parse_scalar(text: &str) -> Result<Self, String> {
                    text.trim()
                        .parse::<$ty>()
                        .map_err(|err| format!("`{text}` is not a valid {}: {err}", stringify!($ty)))
                }
            }
        )*
    };
}

numeric_scalar!(i32 => I32, i64 => I64, u16 => U16, u32 => U32, u64 => U64, f64 => F64);

impl Scalar for Duration {
    fn tag() -> TypeTag {
        TypeTag::Duration
    }

    fn parse_scalar(text: &str) -> Result<Self, String> {
        parse_duration(text)
    }
}

/// 解析形如 `250ms`、`30s`、`5m`、`2h`、`1d` 的时长；不带单位时按毫秒处理。
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let trimmed = text.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);
    if digits.is_empty() {
        return Err(format!("`{text}` does not start with a number"));
    }
    let amount: u64 = digits
        .parse()
        .map_err(|err| format!("`{text}` has an invalid amount: {err}"))?;
    let millis_per_unit: u64 = match unit.trim() {
        "" | "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        other => return Err(format!("`{other}` is not a duration unit")),
    };
    amount
        .checked_mul(millis_per_unit)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("`{text}` overflows"))
}

/// 单属性标量绑定。
pub struct ScalarBinding<T> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Scalar> ScalarBinding<T> {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            _marker: PhantomData,
        }
    }
}

impl<T: Scalar> Binding for ScalarBinding<T> {
    type Value = T;

    fn key(&self) -> GroupKey {
        GroupKey::new(Selector::Exact(self.name.clone()), T::tag())
    }

    fn parse(&self, inputs: &[RawProperty]) -> ParseOutcome<T> {
        match single_value(inputs) {
            Some(text) => ParseOutcome::from_result(T::parse_scalar(text)),
            None => ParseOutcome::Absent,
        }
    }
}

/// 逗号分隔的列表绑定：元素两端空白被去除，空元素被跳过。
pub struct ListBinding<T> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Scalar> ListBinding<T> {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            _marker: PhantomData,
        }
    }
}

impl<T: Scalar> Binding for ListBinding<T> {
    type Value = Vec<T>;

    fn key(&self) -> GroupKey {
        GroupKey::new(
            Selector::Exact(self.name.clone()),
            TypeTag::List(Box::new(T::tag())),
        )
    }

    fn parse(&self, inputs: &[RawProperty]) -> ParseOutcome<Vec<T>> {
        let Some(text) = single_value(inputs) else {
            return ParseOutcome::Absent;
        };
        ParseOutcome::from_result(
            list_items(text)
                .enumerate()
                .map(|(index, item)| {
                    T::parse_scalar(item).map_err(|reason| format!("item {index}: {reason}"))
                })
                .collect(),
        )
    }
}

fn list_items(text: &str) -> impl Iterator<Item = &str> {
    text.split(',').map(str::trim).filter(|item| !item.is_empty())
}

/// `k=v,k=v2` 形式的多值映射绑定；同一个键可出现多次，值按出现顺序保存。
pub struct MultiMapBinding<T> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Scalar> MultiMapBinding<T> {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            _marker: PhantomData,
        }
    }
}

impl<T: Scalar> Binding for MultiMapBinding<T> {
    type Value = BTreeMap<String, Vec<T>>;

    fn key(&self) -> GroupKey {
        GroupKey::new(
            Selector::Exact(self.name.clone()),
            TypeTag::MultiMap(Box::new(T::tag())),
        )
    }

    fn parse(&self, inputs: &[RawProperty]) -> ParseOutcome<Self::Value> {
        let Some(text) = single_value(inputs) else {
            return ParseOutcome::Absent;
        };
        let mut map: BTreeMap<String, Vec<T>> = BTreeMap::new();
        for entry in list_items(text) {
            let Some((key, value)) = entry.split_once('=') else {
                return ParseOutcome::Failed(format!("`{entry}` is not a key=value pair"));
            };
            let key = key.trim();
            if key.is_empty() {
                return ParseOutcome::Failed(format!("`{entry}` has an empty key"));
            }
            match T::parse_scalar(value.trim()) {
                Ok(parsed) => map.entry(key.to_owned()).or_default().push(parsed),
                Err(reason) => return ParseOutcome::Failed(format!("key `{key}`: {reason}")),
            }
        }
        ParseOutcome::Parsed(map)
    }
}

/// 闭区间 `[start, end]`。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValueRange<T> {
    pub start: T,
    pub end: T,
}

impl<T: PartialOrd> ValueRange<T> {
    pub fn contains(&self, value: &T) -> bool {
        &self.start <= value && value <= &self.end
    }
}

impl<T: fmt::Display> fmt::Display for ValueRange<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// `lo..hi` 形式的区间绑定，要求 `lo <= hi`。
pub struct RangeBinding<T> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Scalar + PartialOrd> RangeBinding<T> {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            _marker: PhantomData,
        }
    }
}

impl<T: Scalar + PartialOrd> Binding for RangeBinding<T> {
    type Value = ValueRange<T>;

    fn key(&self) -> GroupKey {
        GroupKey::new(
            Selector::Exact(self.name.clone()),
            TypeTag::Range(Box::new(T::tag())),
        )
    }

    fn parse(&self, inputs: &[RawProperty]) -> ParseOutcome<ValueRange<T>> {
        let Some(text) = single_value(inputs) else {
            return ParseOutcome::Absent;
        };
        let Some((start, end)) = text.split_once("..") else {
            return ParseOutcome::Failed(format!("`{text}` is not a `lo..hi` range"));
        };
        let bounds = T::parse_scalar(start).and_then(|start| Ok((start, T::parse_scalar(end)?)));
        match bounds {
            Ok((start, end)) if start <= end => ParseOutcome::Parsed(ValueRange { start, end }),
            Ok(_) => ParseOutcome::Failed(format!("`{text}` has lower bound above upper bound")),
            Err(reason) => ParseOutcome::Failed(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(value: &str) -> Vec<RawProperty> {
        vec![RawProperty::new("k", value)]
    }

    #[test]
    fn durations_accept_units_and_bare_millis() {
        assert_eq!(parse_duration("250"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration(" 30s "), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Ok(Duration::from_secs(300)));
        assert_eq!(parse_duration("1d"), Ok(Duration::from_secs(86_400)));
        assert!(parse_duration("ms").is_err());
        assert!(parse_duration("3w").is_err());
    }

    #[test]
    fn booleans_accept_common_spellings() {
        assert_eq!(bool::parse_scalar("ON"), Ok(true));
        assert_eq!(bool::parse_scalar("no"), Ok(false));
        assert!(bool::parse_scalar("maybe").is_err());
    }

    #[test]
    fn lists_trim_and_skip_empty_items() {
        let binding = ListBinding::<u32>::new("k");
        assert_eq!(binding.parse(&input(" 1, 2,,3 ")), ParseOutcome::Parsed(vec![1, 2, 3]));
        assert_eq!(binding.parse(&input("")), ParseOutcome::Parsed(Vec::new()));
        assert!(matches!(binding.parse(&input("1,x")), ParseOutcome::Failed(_)));
        assert_eq!(binding.parse(&[]), ParseOutcome::Absent);
    }

    #[test]
    fn multimaps_group_repeated_keys() {
        let binding = MultiMapBinding::<i64>::new("k");
        let ParseOutcome::Parsed(map) = binding.parse(&input("a=1, b=2, a=3")) else {
            panic!("应解析成功");
        };
        assert_eq!(map["a"], [1, 3]);
        assert_eq!(map["b"], [2]);
        assert!(matches!(binding.parse(&input("a")), ParseOutcome::Failed(_)));
        assert!(matches!(binding.parse(&input("=1")), ParseOutcome::Failed(_)));
    }

    #[test]
    fn ranges_require_ordered_bounds() {
        let binding = RangeBinding::<i32>::new("k");
        assert_eq!(
            binding.parse(&input("-5..10")),
            ParseOutcome::Parsed(ValueRange { start: -5, end: 10 })
        );
        assert!(matches!(binding.parse(&input("10..1")), ParseOutcome::Failed(_)));
        assert!(matches!(binding.parse(&input("1-2")), ParseOutcome::Failed(_)));
    }

    #[test]
    fn scalar_keys_distinguish_shapes() {
        assert_ne!(
            ScalarBinding::<u32>::new("k").key(),
            ListBinding::<u32>::new("k").key()
        );
    }
}
