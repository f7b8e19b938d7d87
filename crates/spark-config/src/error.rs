//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为注册中心对外暴露的错误语义提供集中定义；
//! - 区分“注册期编程错误”（需立即抛给调用方）与“运行期运维状况”（仅记录日志、保留旧值）。
//!
//! ## 设计要求（What）
//! - 所有错误派生 `thiserror::Error`，可直接 `?` 传播；
//! - [`ConfigError::kind`] 返回稳定的 [`ConfigErrorKind`]，便于告警维度与测试断言。

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::property::TypeTag;

/// 注册中心统一错误类型。
///
/// # 教案式说明
/// - **意图 (Why)**：把数据源故障、注册期校验失败、类型冲突等分门别类，调用方据此决定是否重试；
/// - **契约 (What)**：
///   - `ValidationRejected` 与 `Absent` 是唯二会传到业务调用点的属性错误；
///   - 其余来源类错误只出现在 [`SourceHealth`](crate::SourceHealth) 与日志中，不会打断读取；
/// - **风险 (Trade-offs)**：`detail` 使用 `String` 保存上下文，换取可读性，代价是少量堆分配。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// 数据源拉取失败（返回错误或发生 panic）。
    #[error("configuration source `{source_name}` unavailable: {detail}")]
    SourceUnavailable {
        source_name: Cow<'static, str>,
        detail: String,
    },

    /// 数据源在限定时间内没有返回快照。
    #[error("configuration source `{source_name}` timed out after {timeout:?}")]
    SourceTimeout {
        source_name: Cow<'static, str>,
        timeout: Duration,
    },

    /// 本周期所有已注册数据源均失败，周期整体跳过。
    #[error("all {attempted} configuration sources failed")]
    AllSourcesFailed { attempted: usize },

    /// 注册校验器时当前值不满足断言。
    #[error("validator rejected the current value of `{name}`")]
    ValidationRejected { name: String },

    /// 属性当前没有值。
    #[error("property `{name}` has no value")]
    Absent { name: String },

    /// 同一 `(name, tag)` 被两个不同的 Rust 类型声明。
    #[error("property `{name}` is already bound as `{tag}` with a different value type")]
    TypeConflict { name: String, tag: TypeTag },

    /// 注册中心设置无法解析或不合法。
    #[error("invalid registry settings: {detail}")]
    Settings { detail: String },

    /// 调度器已在运行，重复 `init`。
    #[error("registry already started")]
    AlreadyStarted,

    /// 后台线程创建失败等运行时故障。
    #[error("registry runtime failure: {detail}")]
    Runtime { detail: String },
}

impl ConfigError {
    /// 返回错误类别。
    pub fn kind(&self) -> ConfigErrorKind {
        match self {
            Self::SourceUnavailable { .. } | Self::SourceTimeout { .. } => {
                ConfigErrorKind::SourceUnavailable
            }
            Self::AllSourcesFailed { .. } => ConfigErrorKind::MergeFailed,
            Self::ValidationRejected { .. } => ConfigErrorKind::InvalidArgument,
            Self::Absent { .. } => ConfigErrorKind::NoSuchElement,
            Self::TypeConflict { .. } => ConfigErrorKind::TypeConflict,
            Self::Settings { .. } => ConfigErrorKind::Settings,
            Self::AlreadyStarted | Self::Runtime { .. } => ConfigErrorKind::Runtime,
        }
    }

    /// 便捷构造：数据源不可用。
    pub fn source_unavailable<S, D>(source: S, detail: D) -> Self
    where
        S: Into<Cow<'static, str>>,
        D: fmt::Display,
    {
        Self::SourceUnavailable {
            source_name: source.into(),
            detail: detail.to_string(),
        }
    }

    pub(crate) fn settings<D: fmt::Display>(detail: D) -> Self {
        Self::Settings {
            detail: detail.to_string(),
        }
    }

    pub(crate) fn runtime<D: fmt::Display>(detail: D) -> Self {
        Self::Runtime {
            detail: detail.to_string(),
        }
    }
}

/// 错误类别，用于稳定的告警维度。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ConfigErrorKind {
    SourceUnavailable,
    MergeFailed,
    InvalidArgument,
    NoSuchElement,
    TypeConflict,
    Settings,
    Runtime,
}

impl fmt::Display for ConfigErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SourceUnavailable => "source_unavailable",
            Self::MergeFailed => "merge_failed",
            Self::InvalidArgument => "invalid_argument",
            Self::NoSuchElement => "no_such_element",
            Self::TypeConflict => "type_conflict",
            Self::Settings => "settings",
            Self::Runtime => "runtime",
        };
        f.write_str(name)
    }
}

/// crate 内统一的 `Result` 别名。
pub type Result<T, E = ConfigError> = std::result::Result<T, E>;

/// 把 `catch_unwind` 捕获的 panic 负载转为可读文本。
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        String::from("non-string panic payload")
    }
}

const _: fn() = || {
    fn assert_error_traits<T: std::error::Error + Send + Sync + 'static>() {}

    assert_error_traits::<ConfigError>();
};
