use std::borrow::Cow;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use crate::raw::RawProperty;

use super::{Binding, GroupKey, ParseOutcome, Selector, TypeTag, single_value};

/// 单个属性值承载 JSON 文档，反序列化为 `T`。
///
/// `shape` 是调用方为 `T` 声明的结构名，它进入分组键；两个不同的 Rust 类型使用同一
/// `(name, shape)` 会在注册时得到类型冲突错误。
pub struct JsonBinding<T> {
    name: String,
    shape: Cow<'static, str>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonBinding<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    pub fn new<N, S>(name: N, shape: S) -> Self
    where
        N: Into<String>,
        S: Into<Cow<'static, str>>,
    {
        Self {
            name: name.into(),
            shape: shape.into(),
            _marker: PhantomData,
        }
    }
}

impl<T> Binding for JsonBinding<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    type Value = T;

    fn key(&self) -> GroupKey {
        GroupKey::new(
            Selector::Exact(self.name.clone()),
            TypeTag::Json(self.shape.clone()),
        )
    }

    fn parse(&self, inputs: &[RawProperty]) -> ParseOutcome<T> {
        match single_value(inputs) {
            Some(text) => ParseOutcome::from_result(
                serde_json::from_str(text).map_err(|err| format!("invalid json: {err}")),
            ),
            None => ParseOutcome::Absent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Limits {
        burst: u32,
        #[serde(default)]
        tags: Vec<String>,
    }

    #[test]
    fn documents_deserialize_into_target_type() {
        let binding = JsonBinding::<Limits>::new("limits", "Limits");
        let inputs = [RawProperty::new("limits", r#"{"burst": 5, "tags": ["a"]}"#)];
        assert_eq!(
            binding.parse(&inputs),
            ParseOutcome::Parsed(Limits {
                burst: 5,
                tags: vec!["a".into()],
            })
        );
        let broken = [RawProperty::new("limits", "{burst}")];
        assert!(matches!(binding.parse(&broken), ParseOutcome::Failed(_)));
    }
}
