use std::borrow::Cow;
use std::fmt;

/// 单个配置键的原始值及其来源。
///
/// ### 设计目的（Why）
/// - 数据源与合并步骤之间只交换字符串，解析推迟到强类型属性层，避免来源对目标类型有任何假设；
/// - `source`/`origin` 保留溯源信息：前者为胜出的数据源名称，后者为源内的子来源（如分组、文件段）。
///
/// ### 契约说明（What）
/// - `value == None` 表示“不存在”，与空字符串 `Some("")` 严格区分；
/// - 结构体不可变，修改溯源信息需通过 `with_*` 生成新实例。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RawProperty {
    name: String,
    value: Option<String>,
    source: Option<Cow<'static, str>>,
    origin: Option<String>,
}

impl RawProperty {
    /// 构造携带值的原始属性。
    pub fn new<N, V>(name: N, value: V) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        Self {
            name: name.into(),
            value: Some(value.into()),
            source: None,
            origin: None,
        }
    }

    /// 构造一个“不存在”的占位属性。
    pub fn absent<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            value: None,
            source: None,
            origin: None,
        }
    }

    /// 附加子来源标识。
    pub fn with_origin<O: Into<String>>(mut self, origin: O) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// 附加数据源名称；合并阶段会用胜出源的名称覆盖它。
    pub fn with_source<S: Into<Cow<'static, str>>>(mut self, source: S) -> Self {
        self.source = Some(source.into());
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    #[inline]
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    #[inline]
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    #[inline]
    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }

    /// 仅比较值字符串；溯源变化不计入。
    #[inline]
    pub fn same_value(&self, other: &RawProperty) -> bool {
        self.value == other.value
    }
}

impl fmt::Display for RawProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}={}", self.name, value)?,
            None => write!(f, "{}=<absent>", self.name)?,
        }
        if let Some(source) = &self.source {
            write!(f, " [{source}")?;
            if let Some(origin) = &self.origin {
                write!(f, "/{origin}")?;
            }
            f.write_str("]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_is_distinct_from_empty() {
        let empty = RawProperty::new("a", "");
        let absent = RawProperty::absent("a");
        assert!(empty.is_present());
        assert!(!absent.is_present());
        assert!(!empty.same_value(&absent));
    }

    #[test]
    fn provenance_does_not_affect_value_equality() {
        let left = RawProperty::new("a", "1").with_source("file").with_origin("g1");
        let right = RawProperty::new("a", "1").with_source("remote");
        assert!(left.same_value(&right));
        assert_ne!(left, right);
        assert_eq!(left.to_string(), "a=1 [file/g1]");
    }
}
