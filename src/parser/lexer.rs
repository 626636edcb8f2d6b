//! Лексер исходного текста модуля.

use logos::Logos;

use super::error::ParseError;
use super::token::{Span, Spanned, Token};

/// Внутренние токены для logos.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r]+")] // Пропускаем пробелы
#[logos(skip r";[^\n]*")] // Пропускаем комментарии ; до конца строки
enum LogosToken {
    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    // Float (должен быть до Int для правильного приоритета)
    #[regex(r"-?[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r"0[xX][0-9a-fA-F]+", |lex| i64::from_str_radix(&lex.slice()[2..], 16).ok())]
    HexInt(i64),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| {
        let s = lex.slice();
        Some(unescape_string(&s[1..s.len()-1]))
    })]
    String(String),

    // :as, :only
    #[regex(r":[a-zA-Z_][a-zA-Z0-9_-]*", |lex| lex.slice()[1..].to_string())]
    Keyword(String),

    // Многосимвольные операторы сначала
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("==")]
    Eq,
    #[token("!=")]
    Ne,

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,

    // Идентификатор (включая имена форм с дефисом: dynamic-import)
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_-]*", |lex| lex.slice().to_string())]
    Ident(String),
}

/// Обработка escape-последовательностей в строке.
fn unescape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('t') => result.push('\t'),
            Some('r') => result.push('\r'),
            Some('\\') => result.push('\\'),
            Some('"') => result.push('"'),
            Some('0') => result.push('\0'),
            Some(other) => {
                result.push('\\');
                result.push(other);
            }
            None => result.push('\\'),
        }
    }

    result
}

/// Лексер исходного текста модуля.
pub struct Lexer<'a> {
    logos: logos::Lexer<'a, LogosToken>,
    source: &'a str,
    peeked: Option<Spanned<Token>>,
}

impl<'a> Lexer<'a> {
    /// Создать новый лексер.
    pub fn new(source: &'a str) -> Self {
        Self {
            logos: LogosToken::lexer(source),
            source,
            peeked: None,
        }
    }

    /// Получить следующий токен.
    pub fn next_token(&mut self) -> Result<Spanned<Token>, ParseError> {
        match self.peeked.take() {
            Some(token) => Ok(token),
            None => self.read_token(),
        }
    }

    /// Посмотреть на следующий токен без его потребления.
    pub fn peek_token(&mut self) -> Result<&Spanned<Token>, ParseError> {
        let token = match self.peeked.take() {
            Some(token) => token,
            None => self.read_token()?,
        };
        let token: &Spanned<Token> = self.peeked.insert(token);
        Ok(token)
    }

    fn read_token(&mut self) -> Result<Spanned<Token>, ParseError> {
        let Some(result) = self.logos.next() else {
            let pos = self.source.len();
            return Ok(Spanned::new(Token::Eof, Span::new(pos, pos)));
        };

        let span = Span::new(self.logos.span().start, self.logos.span().end);
        match result {
            Ok(logos_token) => Ok(Spanned::new(convert_token(logos_token), span)),
            Err(()) => Err(ParseError::LexerError { span }),
        }
    }
}

fn convert_token(logos_token: LogosToken) -> Token {
    let symbol = |s: &str| Token::Symbol(s.to_string());
    match logos_token {
        LogosToken::LParen => Token::LParen,
        LogosToken::RParen => Token::RParen,
        LogosToken::Int(n) | LogosToken::HexInt(n) => Token::Int(n),
        LogosToken::Float(f) => Token::Float(f),
        LogosToken::String(s) => Token::String(s),
        LogosToken::Keyword(s) => Token::Keyword(s),
        LogosToken::Ident(s) => Token::Ident(s),
        LogosToken::Plus => symbol("+"),
        LogosToken::Minus => symbol("-"),
        LogosToken::Star => symbol("*"),
        LogosToken::Slash => symbol("/"),
        LogosToken::Percent => symbol("%"),
        LogosToken::Lt => symbol("<"),
        LogosToken::Gt => symbol(">"),
        LogosToken::Le => symbol("<="),
        LogosToken::Ge => symbol(">="),
        LogosToken::Eq => symbol("=="),
        LogosToken::Ne => symbol("!="),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(source);
        let mut out = Vec::new();
        loop {
            let token = lexer.next_token().unwrap().value;
            if token == Token::Eof {
                return out;
            }
            out.push(token);
        }
    }

    #[test]
    fn test_lexer_import_form() {
        assert_eq!(
            tokens(r#"(import "./math" :as m)"#),
            vec![
                Token::LParen,
                Token::Ident("import".to_string()),
                Token::String("./math".to_string()),
                Token::Keyword("as".to_string()),
                Token::Ident("m".to_string()),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn test_lexer_dashed_ident() {
        assert_eq!(
            tokens("(dynamic-import x)")[1],
            Token::Ident("dynamic-import".to_string())
        );
    }

    #[test]
    fn test_lexer_comments_and_numbers() {
        assert_eq!(
            tokens("; header\n42 -7 3.5 0x10"),
            vec![Token::Int(42), Token::Int(-7), Token::Float(3.5), Token::Int(16)]
        );
    }

    #[test]
    fn test_lexer_string_escapes() {
        assert_eq!(
            tokens(r#""a\n\"b\"""#),
            vec![Token::String("a\n\"b\"".to_string())]
        );
    }

    #[test]
    fn test_lexer_rejects_stray_character() {
        let mut lexer = Lexer::new("(let x #)");
        let mut result = Ok(());
        for _ in 0..4 {
            if let Err(e) = lexer.next_token() {
                result = Err(e);
                break;
            }
        }
        assert!(matches!(result, Err(ParseError::LexerError { .. })));
    }
}
