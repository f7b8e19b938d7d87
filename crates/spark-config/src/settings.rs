use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// 数据源拉取失败时的处理策略。
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// 跳过失败源，本周期其独占的键会从快照中消失。
    #[default]
    Skip,
    /// 以该源最近一次成功的结果替代，保持“陈旧但安全”。
    RetainLastGood,
}

/// 注册中心设置。
///
/// ### 设计目的（Why）
/// - 由外部配置加载流程产出（TOML/JSON 等），注册中心本身不拥有文件格式；
/// - 时间字段统一以毫秒整数表达，避免引入额外的时长解析依赖。
///
/// ### 契约说明（What）
/// - `reload_period_ms` 必须大于 0；
/// - `fetch_timeout_ms = 0` 表示不限时，数据源调用直接在重载线程执行；
/// - `callback_workers` 至少为 1。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RegistrySettings {
    pub reload_period_ms: u64,
    pub event_history: usize,
    pub fetch_timeout_ms: u64,
    pub failure_policy: FailurePolicy,
    pub callback_workers: usize,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            reload_period_ms: 30_000,
            event_history: 256,
            fetch_timeout_ms: 5_000,
            failure_policy: FailurePolicy::Skip,
            callback_workers: 2,
        }
    }
}

impl RegistrySettings {
    /// 解析 TOML 文本并校验。
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: Self = toml::from_str(text).map_err(ConfigError::settings)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.reload_period_ms == 0 {
            return Err(ConfigError::settings("reload_period_ms must be greater than zero"));
        }
        if self.callback_workers == 0 {
            return Err(ConfigError::settings("callback_workers must be at least one"));
        }
        Ok(())
    }

    pub fn reload_period(&self) -> Duration {
        Duration::from_millis(self.reload_period_ms)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        (self.fetch_timeout_ms > 0).then(|| Duration::from_millis(self.fetch_timeout_ms))
    }

    pub fn with_reload_period(mut self, period: Duration) -> Self {
        self.reload_period_ms = period.as_millis() as u64;
        self
    }

    pub fn with_event_history(mut self, capacity: usize) -> Self {
        self.event_history = capacity;
        self
    }

    /// `None` 关闭超时。
    pub fn with_fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fetch_timeout_ms = timeout.map_or(0, |t| t.as_millis() as u64);
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_callback_workers(mut self, workers: usize) -> Self {
        self.callback_workers = workers;
        self
    }
}
