//! Ошибки парсера.

use super::token::{Span, Token};
use thiserror::Error;

/// Ошибка разбора исходного текста модуля.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Неожиданный токен.
    #[error("unexpected token: expected {expected}, found {found}")]
    UnexpectedToken {
        span: Span,
        expected: String,
        found: String,
    },

    /// Неожиданный конец ввода.
    #[error("unexpected end of input: {message}")]
    UnexpectedEof { span: Span, message: String },

    /// Незакрытая скобка.
    #[error("unclosed parenthesis")]
    UnclosedParen { span: Span },

    /// Ошибка лексера.
    #[error("unexpected character")]
    LexerError { span: Span },

    /// Слишком глубокая вложенность списков.
    #[error("nesting deeper than {limit} levels")]
    TooDeep { span: Span, limit: usize },

    /// Синтаксически корректная, но недопустимая в модуле форма.
    #[error("invalid form '{form}': {message}")]
    InvalidForm {
        span: Span,
        form: String,
        message: String,
    },
}

impl ParseError {
    /// Создать ошибку "неожиданный токен".
    pub fn unexpected_token(span: Span, expected: impl Into<String>, found: &Token) -> Self {
        Self::UnexpectedToken {
            span,
            expected: expected.into(),
            found: found.to_string(),
        }
    }

    /// Создать ошибку "неожиданный конец".
    pub fn unexpected_eof(span: Span, message: impl Into<String>) -> Self {
        Self::UnexpectedEof {
            span,
            message: message.into(),
        }
    }

    /// Создать ошибку "недопустимая форма".
    pub fn invalid_form(span: Span, form: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidForm {
            span,
            form: form.into(),
            message: message.into(),
        }
    }

    /// Получить позицию ошибки.
    pub fn span(&self) -> Span {
        match self {
            Self::UnexpectedToken { span, .. } => *span,
            Self::UnexpectedEof { span, .. } => *span,
            Self::UnclosedParen { span } => *span,
            Self::LexerError { span } => *span,
            Self::TooDeep { span, .. } => *span,
            Self::InvalidForm { span, .. } => *span,
        }
    }

    /// Диагностика вида `url:line:col: message`.
    pub fn diagnostic(&self, url: &str, source: &str) -> String {
        let (line, col) = self.span().line_col(source);
        format!("{}:{}:{}: {}", url, line, col, self)
    }
}
