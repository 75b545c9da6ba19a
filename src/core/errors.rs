//! CM-prefixed error types with structured error codes.
//!
//! The taxonomy is flat and closed: every failure in the pipeline maps to one
//! variant. Recoverability and the default recovery strategy are methods on
//! the variant, not a class hierarchy.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, CmError>;

/// What the caller should do with a failure by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Retry with backoff; the condition is expected to clear.
    Retry,
    /// Fall back to the deterministic rule result.
    FallbackToRules,
    /// Use the partial result that was produced before the failure.
    UsePartial,
    /// Skip the affected item and continue.
    SkipItem,
    /// Warn, count, and continue.
    WarnAndContinue,
    /// No local recovery; the whole operation fails.
    Abort,
}

/// Top-level error type for CleanMaster.
#[derive(Debug, Error)]
pub enum CmError {
    #[error("[CM-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[CM-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[CM-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[CM-1101] bad rule {name}: {details}")]
    BadRule { name: String, details: String },

    #[error("[CM-2001] whitelist protects {path}")]
    WhitelistProtected { path: PathBuf },

    #[error("[CM-2002] access denied while scanning {path}")]
    AccessDenied { path: PathBuf },

    #[error("[CM-2003] size computation exceeded caps for {path}; partial sum {partial_bytes} bytes")]
    SizeComputationTimedOut { path: PathBuf, partial_bytes: u64 },

    #[error("[CM-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[CM-2102] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[CM-2103] malformed plan {plan_id}: {details}")]
    MalformedPlan { plan_id: String, details: String },

    #[error("[CM-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[CM-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[CM-3101] backup failed for {path}: {details}")]
    BackupFailed { path: PathBuf, details: String },

    #[error("[CM-3102] delete failed for {path}: {details}")]
    DeleteFailed { path: PathBuf, details: String },

    #[error("[CM-3103] directory not empty: {path}")]
    DirectoryNotEmpty { path: PathBuf },

    #[error("[CM-3104] disk full while writing {path}")]
    DiskFull { path: PathBuf },

    #[error("[CM-3105] file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("[CM-4001] LLM authentication failed: {details}")]
    LlmAuth { details: String },

    #[error("[CM-4002] LLM rate limited; retry after {retry_after_secs:?} s")]
    LlmRateLimited { retry_after_secs: Option<u64> },

    #[error("[CM-4003] LLM connection failure: {details}")]
    LlmConnection { details: String },

    #[error("[CM-4004] LLM request timed out after {elapsed_ms} ms")]
    LlmTimeout { elapsed_ms: u64 },

    #[error("[CM-4005] LLM quota exceeded for the day")]
    LlmQuotaExceeded,

    #[error("[CM-4006] LLM reply parse failure: {details}")]
    LlmParseError { details: String },

    #[error("[CM-4007] circuit open for endpoint {endpoint}")]
    CircuitOpen { endpoint: String },

    #[error("[CM-4008] LLM call budget exhausted: {details}")]
    BudgetExhausted { details: String },

    #[error("[CM-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl CmError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "CM-1001",
            Self::MissingConfig { .. } => "CM-1002",
            Self::ConfigParse { .. } => "CM-1003",
            Self::BadRule { .. } => "CM-1101",
            Self::WhitelistProtected { .. } => "CM-2001",
            Self::AccessDenied { .. } => "CM-2002",
            Self::SizeComputationTimedOut { .. } => "CM-2003",
            Self::Serialization { .. } => "CM-2101",
            Self::Sql { .. } => "CM-2102",
            Self::MalformedPlan { .. } => "CM-2103",
            Self::Io { .. } => "CM-3002",
            Self::ChannelClosed { .. } => "CM-3003",
            Self::BackupFailed { .. } => "CM-3101",
            Self::DeleteFailed { .. } => "CM-3102",
            Self::DirectoryNotEmpty { .. } => "CM-3103",
            Self::DiskFull { .. } => "CM-3104",
            Self::FileNotFound { .. } => "CM-3105",
            Self::LlmAuth { .. } => "CM-4001",
            Self::LlmRateLimited { .. } => "CM-4002",
            Self::LlmConnection { .. } => "CM-4003",
            Self::LlmTimeout { .. } => "CM-4004",
            Self::LlmQuotaExceeded => "CM-4005",
            Self::LlmParseError { .. } => "CM-4006",
            Self::CircuitOpen { .. } => "CM-4007",
            Self::BudgetExhausted { .. } => "CM-4008",
            Self::Runtime { .. } => "CM-3900",
        }
    }

    /// Whether local recovery is possible at all.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(
            self.recovery(),
            Recovery::Abort
        )
    }

    /// Default recovery strategy for this failure kind.
    #[must_use]
    pub const fn recovery(&self) -> Recovery {
        match self {
            Self::WhitelistProtected { .. } | Self::FileNotFound { .. } => Recovery::SkipItem,
            Self::AccessDenied { .. } | Self::BadRule { .. } => Recovery::WarnAndContinue,
            Self::SizeComputationTimedOut { .. } => Recovery::UsePartial,
            Self::LlmRateLimited { .. }
            | Self::LlmConnection { .. }
            | Self::LlmTimeout { .. }
            | Self::DeleteFailed { .. }
            | Self::DirectoryNotEmpty { .. }
            | Self::Io { .. } => Recovery::Retry,
            Self::LlmQuotaExceeded
            | Self::LlmParseError { .. }
            | Self::CircuitOpen { .. }
            | Self::BudgetExhausted { .. } => Recovery::FallbackToRules,
            Self::BackupFailed { .. } | Self::DiskFull { .. } => Recovery::SkipItem,
            Self::InvalidConfig { .. }
            | Self::MissingConfig { .. }
            | Self::ConfigParse { .. }
            | Self::Serialization { .. }
            | Self::Sql { .. }
            | Self::MalformedPlan { .. }
            | Self::ChannelClosed { .. }
            | Self::LlmAuth { .. }
            | Self::Runtime { .. } => Recovery::Abort,
        }
    }

    /// Short user-facing message keyed on the error kind. Localization is an
    /// external concern; this is the canonical English table.
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::WhitelistProtected { .. } => "item is protected and was skipped",
            Self::AccessDenied { .. } => "some entries could not be read",
            Self::SizeComputationTimedOut { .. } => "directory size is a partial estimate",
            Self::LlmAuth { .. } => "AI review is unavailable: check the API key",
            Self::LlmQuotaExceeded => "AI budget for today is spent; using rules only",
            Self::DiskFull { .. } => "the disk is full; free space and retry",
            Self::BackupFailed { .. } => "a backup could not be created",
            Self::DeleteFailed { .. } => "an item could not be deleted",
            Self::MalformedPlan { .. } => "the cleanup plan is corrupted",
            _ => "the operation could not be completed",
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<rusqlite::Error> for CmError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for CmError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for CmError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_errors() -> Vec<CmError> {
        vec![
            CmError::InvalidConfig {
                details: String::new(),
            },
            CmError::MissingConfig {
                path: PathBuf::new(),
            },
            CmError::ConfigParse {
                context: "",
                details: String::new(),
            },
            CmError::BadRule {
                name: String::new(),
                details: String::new(),
            },
            CmError::WhitelistProtected {
                path: PathBuf::new(),
            },
            CmError::AccessDenied {
                path: PathBuf::new(),
            },
            CmError::SizeComputationTimedOut {
                path: PathBuf::new(),
                partial_bytes: 0,
            },
            CmError::Serialization {
                context: "",
                details: String::new(),
            },
            CmError::Sql {
                context: "",
                details: String::new(),
            },
            CmError::MalformedPlan {
                plan_id: String::new(),
                details: String::new(),
            },
            CmError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            },
            CmError::ChannelClosed { component: "" },
            CmError::BackupFailed {
                path: PathBuf::new(),
                details: String::new(),
            },
            CmError::DeleteFailed {
                path: PathBuf::new(),
                details: String::new(),
            },
            CmError::DirectoryNotEmpty {
                path: PathBuf::new(),
            },
            CmError::DiskFull {
                path: PathBuf::new(),
            },
            CmError::FileNotFound {
                path: PathBuf::new(),
            },
            CmError::LlmAuth {
                details: String::new(),
            },
            CmError::LlmRateLimited {
                retry_after_secs: None,
            },
            CmError::LlmConnection {
                details: String::new(),
            },
            CmError::LlmTimeout { elapsed_ms: 0 },
            CmError::LlmQuotaExceeded,
            CmError::LlmParseError {
                details: String::new(),
            },
            CmError::CircuitOpen {
                endpoint: String::new(),
            },
            CmError::BudgetExhausted {
                details: String::new(),
            },
            CmError::Runtime {
                details: String::new(),
            },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let errors = sample_errors();
        let codes: Vec<&str> = errors.iter().map(CmError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn error_codes_have_cm_prefix() {
        for err in sample_errors() {
            assert!(
                err.code().starts_with("CM-"),
                "code {} must start with CM-",
                err.code()
            );
        }
    }

    #[test]
    fn error_display_includes_code() {
        let err = CmError::InvalidConfig {
            details: "bad value".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("CM-1001"), "display should carry the code: {msg}");
        assert!(msg.contains("bad value"), "display should carry details: {msg}");
    }

    #[test]
    fn recovery_strategies_match_taxonomy() {
        assert_eq!(
            CmError::WhitelistProtected {
                path: PathBuf::new()
            }
            .recovery(),
            Recovery::SkipItem
        );
        assert_eq!(
            CmError::SizeComputationTimedOut {
                path: PathBuf::new(),
                partial_bytes: 42
            }
            .recovery(),
            Recovery::UsePartial
        );
        assert_eq!(
            CmError::LlmRateLimited {
                retry_after_secs: Some(2)
            }
            .recovery(),
            Recovery::Retry
        );
        assert_eq!(CmError::LlmQuotaExceeded.recovery(), Recovery::FallbackToRules);
        assert_eq!(
            CmError::LlmAuth {
                details: String::new()
            }
            .recovery(),
            Recovery::Abort
        );
        assert_eq!(
            CmError::CircuitOpen {
                endpoint: "api".to_string()
            }
            .recovery(),
            Recovery::FallbackToRules
        );
    }

    #[test]
    fn auth_failure_is_not_recoverable() {
        assert!(
            !CmError::LlmAuth {
                details: String::new()
            }
            .is_recoverable()
        );
        assert!(
            CmError::DeleteFailed {
                path: PathBuf::new(),
                details: String::new()
            }
            .is_recoverable()
        );
    }

    #[test]
    fn io_convenience_constructor() {
        let err = CmError::io(
            "/tmp/test.txt",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.code(), "CM-3002");
        assert!(err.to_string().contains("/tmp/test.txt"));
    }

    #[test]
    fn from_rusqlite_error() {
        let sql_err =
            rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(1), Some("test".to_string()));
        let err: CmError = sql_err.into();
        assert_eq!(err.code(), "CM-2102");
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: CmError = json_err.into();
        assert_eq!(err.code(), "CM-2101");
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= invalid").unwrap_err();
        let err: CmError = toml_err.into();
        assert_eq!(err.code(), "CM-1003");
    }
}
