//! Токены и позиции исходного текста модуля.

use serde::{Deserialize, Serialize};

/// Позиция в исходном коде.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    /// Начальная позиция (байт).
    pub start: usize,
    /// Конечная позиция (байт).
    pub end: usize,
}

impl Span {
    /// Создать новый Span.
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Объединить два Span.
    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Строка и колонка начала (обе с единицы) внутри `source`.
    pub fn line_col(&self, source: &str) -> (usize, usize) {
        let prefix = &source[..self.start.min(source.len())];
        let line = prefix.matches('\n').count() + 1;
        let col = prefix
            .rfind('\n')
            .map(|nl| prefix.len() - nl)
            .unwrap_or(prefix.len() + 1);
        (line, col)
    }
}

/// Значение с позицией.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub value: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(value: T, span: Span) -> Self {
        Self { value, span }
    }
}

/// Токены исходного текста модуля.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// `(`
    LParen,
    /// `)`
    RParen,

    /// Целое число
    Int(i64),
    /// Число с плавающей точкой
    Float(f64),
    /// Строковый литерал
    String(String),

    /// Идентификатор или имя формы (`import`, `dynamic-import`, ...)
    Ident(String),
    /// Ключевое слово вида `:as` (хранится без двоеточия)
    Keyword(String),
    /// Символ оператора (+, -, *, /, etc.)
    Symbol(String),

    /// Конец файла
    Eof,
}

impl Token {
    /// Проверить, является ли токен атомом (не скобкой).
    pub fn is_atom(&self) -> bool {
        matches!(
            self,
            Token::Int(_)
                | Token::Float(_)
                | Token::String(_)
                | Token::Ident(_)
                | Token::Keyword(_)
                | Token::Symbol(_)
        )
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Int(n) => write!(f, "{}", n),
            Token::Float(n) => write!(f, "{}", n),
            Token::String(s) => write!(f, "\"{}\"", s),
            Token::Ident(s) => write!(f, "{}", s),
            Token::Keyword(s) => write!(f, ":{}", s),
            Token::Symbol(s) => write!(f, "{}", s),
            Token::Eof => write!(f, "EOF"),
        }
    }
}
