use std::borrow::Cow;
use std::sync::Arc;

use crate::raw::RawProperty;

use super::{Binding, GroupKey, ParseOutcome, Scalar, Selector, TypeTag};

type ApplyField<T> = Arc<dyn Fn(&mut T, &str) -> Result<(), String> + Send + Sync>;

struct FieldBinding<T> {
    field: Cow<'static, str>,
    property: String,
    apply: ApplyField<T>,
}

enum Layout {
    Prefix(String),
    Explicit,
}

/// 把多条属性装配为一个结构体。
///
/// # 教案级说明
/// - **意图 (Why)**：业务上成组出现的配置（如 `db.host`/`db.port`）应作为一个整体原子地更新，
///   回调一次拿到完整的新对象，而不是逐字段收到通知；
/// - **契约 (What)**：
///   - 前缀模式下字段 `port` 绑定属性 `{prefix}port`；显式模式下由调用方逐个指定属性名；
///   - 未出现在快照中的字段保留 `T::default()` 的值，前缀下未声明的属性被忽略；
///   - 若所有已绑定属性都不存在，结果为“无值”；
///   - 任一字段解析失败，整个对象本周期保持旧值；
/// - **风险 (Trade-offs)**：分组键由“已绑定属性名集合 + 结构名”组成，属性集合相同而 setter 不同的两个绑定
///   会共享先注册者的字段表。
pub struct ObjectBinding<T> {
    shape: Cow<'static, str>,
    layout: Layout,
    fields: Vec<FieldBinding<T>>,
}

impl<T> ObjectBinding<T>
where
    T: Default + Send + Sync + 'static,
{
    /// 前缀模式：字段名拼接在前缀之后即为属性名。
    pub fn with_prefix<S, P>(shape: S, prefix: P) -> Self
    where
        S: Into<Cow<'static, str>>,
        P: Into<String>,
    {
        Self {
            shape: shape.into(),
            layout: Layout::Prefix(prefix.into()),
            fields: Vec::new(),
        }
    }

    /// 显式模式：每个字段通过 [`bind`](Self::bind) 指定完整属性名。
    pub fn explicit<S: Into<Cow<'static, str>>>(shape: S) -> Self {
        Self {
            shape: shape.into(),
            layout: Layout::Explicit,
            fields: Vec::new(),
        }
    }

    /// 声明一个字段；属性名由布局推导（显式模式下即字段名本身）。
    pub fn field<V, N, F>(self, field: N, setter: F) -> Self
    where
        V: Scalar,
        N: Into<Cow<'static, str>>,
        F: Fn(&mut T, V) + Send + Sync + 'static,
    {
        let field = field.into();
        let property = match &self.layout {
            Layout::Prefix(prefix) => format!("{prefix}{field}"),
            Layout::Explicit => field.to_string(),
        };
        self.bind(field, property, setter)
    }

    /// 声明一个字段并指定完整属性名。
    pub fn bind<V, N, P, F>(mut self, field: N, property: P, setter: F) -> Self
    where
        V: Scalar,
        N: Into<Cow<'static, str>>,
        P: Into<String>,
        F: Fn(&mut T, V) + Send + Sync + 'static,
    {
        let apply: ApplyField<T> = Arc::new(move |target: &mut T, text: &str| {
            setter(target, V::parse_scalar(text)?);
            Ok(())
        });
        self.fields.push(FieldBinding {
            field: field.into(),
            property: property.into(),
            apply,
        });
        self
    }
}

impl<T> Binding for ObjectBinding<T>
where
    T: Default + Send + Sync + 'static,
{
    type Value = T;

    fn key(&self) -> GroupKey {
        // 只选取已绑定的属性，前缀下的无关键变化不会触发重新装配。
        let selector = Selector::names(self.fields.iter().map(|f| f.property.clone()));
        GroupKey::new(selector, TypeTag::Object(self.shape.clone()))
    }

    fn parse(&self, inputs: &[RawProperty]) -> ParseOutcome<T> {
        let mut target = T::default();
        let mut bound = 0usize;
        for field in &self.fields {
            let Some(text) = inputs
                .iter()
                .find(|raw| raw.name() == field.property)
                .and_then(RawProperty::value)
            else {
                continue;
            };
            bound += 1;
            if let Err(reason) = (field.apply)(&mut target, text) {
                return ParseOutcome::Failed(format!(
                    "field `{}` from `{}`: {reason}",
                    field.field, field.property
                ));
            }
        }
        if bound == 0 {
            ParseOutcome::Absent
        } else {
            ParseOutcome::Parsed(target)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct Endpoint {
        host: String,
        port: u16,
        secure: bool,
    }

    fn endpoint_binding() -> ObjectBinding<Endpoint> {
        ObjectBinding::with_prefix("Endpoint", "db.")
            .field("host", |e: &mut Endpoint, v: String| e.host = v)
            .field("port", |e: &mut Endpoint, v: u16| e.port = v)
            .field("secure", |e: &mut Endpoint, v: bool| e.secure = v)
    }

    #[test]
    fn unbound_fields_keep_defaults() {
        let inputs = [
            RawProperty::new("db.host", "pg"),
            RawProperty::new("db.extra", "ignored"),
        ];
        assert_eq!(
            endpoint_binding().parse(&inputs),
            ParseOutcome::Parsed(Endpoint {
                host: "pg".into(),
                ..Endpoint::default()
            })
        );
    }

    #[test]
    fn no_bound_property_means_absent() {
        let inputs = [RawProperty::new("db.extra", "ignored")];
        assert_eq!(endpoint_binding().parse(&inputs), ParseOutcome::Absent);
    }

    #[test]
    fn field_failure_names_the_field() {
        let inputs = [RawProperty::new("db.port", "http")];
        let ParseOutcome::Failed(reason) = endpoint_binding().parse(&inputs) else {
            panic!("端口非法时应解析失败");
        };
        assert!(reason.contains("port"));
    }

    #[test]
    fn prefix_layout_selects_only_bound_properties() {
        assert_eq!(
            endpoint_binding().key().selector,
            Selector::Names(vec!["db.host".into(), "db.port".into(), "db.secure".into()])
        );
    }

    #[test]
    fn explicit_layout_selects_named_properties() {
        let binding = ObjectBinding::<Endpoint>::explicit("Endpoint")
            .bind("port", "service.port", |e: &mut Endpoint, v: u16| e.port = v)
            .bind("host", "service.host", |e: &mut Endpoint, v: String| e.host = v);
        assert_eq!(
            binding.key().selector,
            Selector::Names(vec!["service.host".into(), "service.port".into()])
        );
    }
}
