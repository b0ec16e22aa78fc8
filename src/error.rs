use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/**
 * 解包引擎错误类型 - 使用 miette 提供用户友好的错误诊断
 *
 * 压缩炸弹与磁盘保护属于控制流结果，不在此枚举中表达
 */
#[derive(Error, Debug, Diagnostic)]
pub enum UnpackError {
    #[error("IO error: {0}")]
    #[diagnostic(code(unpack::io_error))]
    Io(#[from] std::io::Error),

    #[error("Archive error: {message}")]
    #[diagnostic(
        code(unpack::archive_error),
        help("Ensure the archive file is not corrupted and is a supported format")
    )]
    Archive {
        message: String,
        path: Option<PathBuf>,
    },

    #[error("Unsupported archive format: {0}")]
    #[diagnostic(code(unpack::unsupported_format))]
    UnsupportedFormat(String),

    #[error("Archive requires a password")]
    #[diagnostic(
        code(unpack::password_required),
        help("Supply the archive password and retry the extraction")
    )]
    PasswordRequired,

    #[error("File task '{operation}' failed for {path:?} after {attempts} attempts")]
    #[diagnostic(
        code(unpack::task_failed),
        help("The storage backend did not respond; check that the output volume is reachable")
    )]
    TaskFailed {
        operation: &'static str,
        path: PathBuf,
        attempts: usize,
    },

    #[error("Operation interrupted")]
    #[diagnostic(code(unpack::interrupted))]
    Interrupted,

    #[error("Database error: {0}")]
    #[diagnostic(
        code(unpack::database_error),
        help("Check database connection and schema integrity")
    )]
    Database(String),

    #[error("Configuration error: {0}")]
    #[diagnostic(code(unpack::config_error))]
    Config(String),

    #[error("Validation error: {0}")]
    #[diagnostic(
        code(unpack::validation_error),
        help("Check that your input meets the required format and constraints")
    )]
    Validation(String),

    #[error("Internal error: {0}")]
    #[diagnostic(code(unpack::internal_error))]
    Internal(String),
}

impl UnpackError {
    /**
     * 为错误添加上下文信息
     */
    pub fn with_context(self, context: impl Into<String>) -> Self {
        let context = context.into();
        match self {
            UnpackError::Archive { message, path } => UnpackError::Archive {
                message: format!("{}: {}", context, message),
                path,
            },
            UnpackError::Database(message) => {
                UnpackError::Database(format!("{}: {}", context, message))
            }
            other => other,
        }
    }

    /**
     * 创建归档错误
     */
    pub fn archive_error(message: impl Into<String>, path: Option<PathBuf>) -> Self {
        UnpackError::Archive {
            message: message.into(),
            path,
        }
    }

    pub fn database_error(message: impl Into<String>) -> Self {
        UnpackError::Database(message.into())
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        UnpackError::Validation(message.into())
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        UnpackError::Internal(message.into())
    }

    pub fn task_failed(operation: &'static str, path: impl Into<PathBuf>, attempts: usize) -> Self {
        UnpackError::TaskFailed {
            operation,
            path: path.into(),
            attempts,
        }
    }

    /// 是否由取消引起（取消是干净的部分终止，不算故障）
    pub fn is_interrupted(&self) -> bool {
        matches!(self, UnpackError::Interrupted)
    }
}

impl From<sqlx::Error> for UnpackError {
    fn from(err: sqlx::Error) -> Self {
        UnpackError::Database(err.to_string())
    }
}

impl From<tokio::task::JoinError> for UnpackError {
    fn from(err: tokio::task::JoinError) -> Self {
        UnpackError::Internal(format!("blocking task failed: {}", err))
    }
}

impl From<zip::result::ZipError> for UnpackError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => UnpackError::Io(e),
            zip::result::ZipError::InvalidPassword => UnpackError::PasswordRequired,
            other => UnpackError::archive_error(other.to_string(), None),
        }
    }
}

pub type Result<T> = std::result::Result<T, UnpackError>;
