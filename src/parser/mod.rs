//! Парсер исходного текста модулей ASG.
//!
//! Модуль — это последовательность S-выражений верхнего уровня.
//!
//! # Синтаксис
//!
//! ```lisp
//! (import "./math" square pi)    ; именованный импорт
//! (import "./util" :as util)     ; импорт пространства имён
//! (import "./side-effect")       ; импорт ради побочных эффектов
//! (export total)
//! (let total (+ (square 3) pi))
//! (print "total is" total)
//! (let lazy (dynamic-import (str "./" "lazy")))
//! (let here (get (import-meta) "url"))
//! ```

pub mod error;
pub mod lexer;
pub mod parser;
pub mod token;

pub use error::ParseError;
pub use lexer::Lexer;
pub use parser::{Atom, Parser, SExpr, MAX_NESTING_DEPTH};
pub use token::{Span, Spanned, Token};

/// Разобрать исходный текст модуля в список форм верхнего уровня.
///
/// # Пример
///
/// ```rust,ignore
/// use asg_linker::parser::parse_module;
///
/// let forms = parse_module("(let x 1) (export x)").unwrap();
/// assert_eq!(forms.len(), 2);
/// ```
pub fn parse_module(source: &str) -> Result<Vec<SExpr>, ParseError> {
    Parser::new(source).parse_all()
}
