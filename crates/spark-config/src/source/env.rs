use super::{SourceProvider, SourceSnapshot};
use crate::error::Result;
use crate::raw::RawProperty;

/// 读取带指定前缀的环境变量。
///
/// - 变量名去掉前缀后转为小写，`_` 替换为 `.`：`APP_DB_HOST` → `db.host`；
/// - 值非 UTF-8 的变量被忽略；
/// - 条目的 `origin` 记为原始变量名，便于溯源。
#[derive(Clone, Debug)]
pub struct EnvSource {
    prefix: String,
}

impl EnvSource {
    /// `prefix` 不含结尾下划线，例如 `"APP"`。
    pub fn new<P: Into<String>>(prefix: P) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn property_name(&self, variable: &str) -> Option<String> {
        let rest = variable.strip_prefix(self.prefix.as_str())?;
        let rest = rest.strip_prefix('_')?;
        if rest.is_empty() {
            return None;
        }
        Some(rest.to_ascii_lowercase().replace('_', "."))
    }

    pub(crate) fn collect<I>(&self, variables: I) -> SourceSnapshot
    where
        I: IntoIterator<Item = (String, String)>,
    {
        variables
            .into_iter()
            .filter_map(|(variable, value)| {
                let name = self.property_name(&variable)?;
                let raw = RawProperty::new(name.clone(), value).with_origin(variable);
                Some((name, raw))
            })
            .collect()
    }
}

impl SourceProvider for EnvSource {
    fn load_snapshot(&self) -> Result<SourceSnapshot> {
        Ok(self.collect(std::env::vars_os().filter_map(|(key, value)| {
            Some((key.into_string().ok()?, value.into_string().ok()?))
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_prefixed_variables_to_dotted_names() {
        let source = EnvSource::new("APP");
        let snapshot = source.collect([
            ("APP_DB_HOST".to_owned(), "db.local".to_owned()),
            ("APPLE".to_owned(), "fruit".to_owned()),
            ("APP_".to_owned(), "empty".to_owned()),
            ("OTHER_X".to_owned(), "1".to_owned()),
        ]);
        assert_eq!(snapshot.len(), 1);
        let raw = &snapshot["db.host"];
        assert_eq!(raw.value(), Some("db.local"));
        assert_eq!(raw.origin(), Some("APP_DB_HOST"));
    }
}
