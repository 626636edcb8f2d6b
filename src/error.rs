//! Определения ошибок загрузчика модулей.

use thiserror::Error;

use crate::engine::Value;
use crate::modules::ModuleStatus;

/// Основной тип `Result` для библиотеки.
pub type LoaderResult<T> = Result<T, LoaderError>;

/// Перечисление всех возможных ошибок.
///
/// Ошибки клонируемые: они хранятся внутри разделяемых обещаний.
#[derive(Error, Debug, Clone)]
pub enum LoaderError {
    #[error("Compile error in {url}: {diagnostic}")]
    Compile { url: String, diagnostic: String },

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("Invalid state for {url} ({status:?}): {message}")]
    State {
        url: String,
        status: ModuleStatus,
        message: String,
    },

    /// Исключение, выброшенное телом модуля. Значение не оборачивается.
    #[error("Uncaught exception: {0}")]
    Exception(Value),

    #[error("Module not found: '{specifier}'{}", referrer_suffix(.referrer))]
    ModuleNotFound {
        specifier: String,
        referrer: Option<String>,
    },

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Module loader was dropped")]
    LoaderDropped,
}

fn referrer_suffix(referrer: &Option<String>) -> String {
    referrer
        .as_ref()
        .map(|r| format!(" imported from {}", r))
        .unwrap_or_default()
}

impl LoaderError {
    pub(crate) fn state(url: &str, status: ModuleStatus, message: impl Into<String>) -> Self {
        Self::State {
            url: url.to_string(),
            status,
            message: message.into(),
        }
    }

    /// Значение исключения, если ошибка — исключение модуля.
    pub fn exception(&self) -> Option<&Value> {
        match self {
            Self::Exception(value) => Some(value),
            _ => None,
        }
    }

    /// Представить ошибку как значение движка (для отклонения обещаний
    /// динамического импорта).
    pub fn into_exception(self) -> Value {
        match self {
            Self::Exception(value) => value,
            other => Value::Error(other.to_string()),
        }
    }
}

/// Ошибки связывания.
#[derive(Error, Debug, Clone)]
pub enum LinkError {
    #[error("linking error, unknown module (referrer {url})")]
    UnknownModule { url: String },

    #[error("linking error, '{specifier}' not in local cache of {url}")]
    NotInCache { url: String, specifier: String },

    #[error("linking error, dependency not resolved: '{specifier}' of {url}")]
    Unresolved { url: String, specifier: String },

    #[error("linking error, dependency '{specifier}' of {url} was rejected: {reason}")]
    Rejected {
        url: String,
        specifier: String,
        reason: Box<LoaderError>,
    },

    #[error("linking error, resolver failed for '{specifier}': {reason}")]
    Resolver {
        specifier: String,
        reason: Box<LoaderError>,
    },

    #[error("linking error, {url} cannot be linked in status {status:?}")]
    InvalidState { url: String, status: ModuleStatus },

    #[error("linking error in {url}: {reason}")]
    Engine { url: String, reason: Value },
}
