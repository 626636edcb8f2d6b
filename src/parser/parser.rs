//! S-Expression парсер исходного текста модуля.

use super::error::ParseError;
use super::lexer::Lexer;
use super::token::{Span, Spanned, Token};

/// S-Expression — атом или список.
#[derive(Debug, Clone, PartialEq)]
pub enum SExpr {
    /// Атом — число, строка, идентификатор, ключевое слово, символ.
    Atom(Spanned<Atom>),
    /// Список — (expr expr ...)
    List(Spanned<Vec<SExpr>>),
}

/// Атомарное значение.
#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    Int(i64),
    Float(f64),
    String(String),
    Ident(String),
    /// `:as` без двоеточия.
    Keyword(String),
    Symbol(String),
}

impl SExpr {
    /// Получить Span выражения.
    pub fn span(&self) -> Span {
        match self {
            SExpr::Atom(spanned) => spanned.span,
            SExpr::List(spanned) => spanned.span,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, SExpr::List(_))
    }

    pub fn as_ident(&self) -> Option<&str> {
        match self {
            SExpr::Atom(Spanned {
                value: Atom::Ident(s),
                ..
            }) => Some(s),
            _ => None,
        }
    }

    pub fn as_keyword(&self) -> Option<&str> {
        match self {
            SExpr::Atom(Spanned {
                value: Atom::Keyword(s),
                ..
            }) => Some(s),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            SExpr::Atom(Spanned {
                value: Atom::Symbol(s),
                ..
            }) => Some(s),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            SExpr::Atom(Spanned {
                value: Atom::String(s),
                ..
            }) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[SExpr]> {
        match self {
            SExpr::List(Spanned { value, .. }) => Some(value),
            _ => None,
        }
    }

    /// Имя формы: первый элемент списка, если это идентификатор или символ.
    pub fn form_name(&self) -> Option<&str> {
        self.as_list()
            .and_then(|list| list.first())
            .and_then(|first| first.as_ident().or_else(|| first.as_symbol()))
    }
}

/// Максимальная вложенность списков в исходном тексте модуля.
pub const MAX_NESTING_DEPTH: usize = 1000;

/// Парсер S-Expression.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    depth: usize,
}

impl<'a> Parser<'a> {
    /// Создать новый парсер.
    pub fn new(source: &'a str) -> Self {
        Self {
            lexer: Lexer::new(source),
            depth: 0,
        }
    }

    /// Распарсить все S-выражения из исходника.
    pub fn parse_all(&mut self) -> Result<Vec<SExpr>, ParseError> {
        let mut exprs = Vec::new();

        while !matches!(self.lexer.peek_token()?.value, Token::Eof) {
            exprs.push(self.parse_sexpr()?);
        }

        Ok(exprs)
    }

    /// Распарсить одно S-выражение.
    pub fn parse_sexpr(&mut self) -> Result<SExpr, ParseError> {
        let token = self.lexer.next_token()?;
        let span = token.span;
        let atom = |value| Ok(SExpr::Atom(Spanned::new(value, span)));

        match token.value {
            Token::LParen => {
                // 256KB red zone, 8MB stack growth
                stacker::maybe_grow(256 * 1024, 8 * 1024 * 1024, || self.parse_list(span))
            }
            Token::Int(n) => atom(Atom::Int(n)),
            Token::Float(f) => atom(Atom::Float(f)),
            Token::String(ref s) => atom(Atom::String(s.clone())),
            Token::Ident(ref s) => atom(Atom::Ident(s.clone())),
            Token::Keyword(ref s) => atom(Atom::Keyword(s.clone())),
            Token::Symbol(ref s) => atom(Atom::Symbol(s.clone())),
            Token::RParen => Err(ParseError::unexpected_token(
                token.span,
                "expression",
                &Token::RParen,
            )),
            Token::Eof => Err(ParseError::unexpected_eof(token.span, "expected expression")),
        }
    }

    /// Распарсить список (после открывающей скобки).
    fn parse_list(&mut self, start_span: Span) -> Result<SExpr, ParseError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(ParseError::TooDeep {
                span: start_span,
                limit: MAX_NESTING_DEPTH,
            });
        }
        self.depth += 1;
        let result = self.parse_elements(start_span);
        self.depth -= 1;
        result
    }

    fn parse_elements(&mut self, start_span: Span) -> Result<SExpr, ParseError> {
        let mut elements = Vec::new();

        loop {
            match self.lexer.peek_token()?.value {
                Token::RParen => {
                    let end_token = self.lexer.next_token()?;
                    let span = start_span.merge(end_token.span);
                    return Ok(SExpr::List(Spanned::new(elements, span)));
                }
                Token::Eof => return Err(ParseError::UnclosedParen { span: start_span }),
                _ => elements.push(self.parse_sexpr()?),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_import_form() {
        let mut parser = Parser::new(r#"(import "./math" square pi)"#);
        let expr = parser.parse_sexpr().unwrap();
        assert_eq!(expr.form_name(), Some("import"));
        let list = expr.as_list().unwrap();
        assert_eq!(list[1].as_string(), Some("./math"));
        assert_eq!(list[3].as_ident(), Some("pi"));
    }

    #[test]
    fn test_parse_keyword_atom() {
        let mut parser = Parser::new(":as");
        assert_eq!(parser.parse_sexpr().unwrap().as_keyword(), Some("as"));
    }

    #[test]
    fn test_parse_nested() {
        let mut parser = Parser::new("(+ (* 2 3) 4)");
        let expr = parser.parse_sexpr().unwrap();
        let list = expr.as_list().unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].as_symbol(), Some("+"));
        assert!(list[1].is_list());
    }

    #[test]
    fn test_parse_all_top_level() {
        let mut parser = Parser::new("(let x 1)\n(export x)");
        assert_eq!(parser.parse_all().unwrap().len(), 2);
    }

    #[test]
    fn test_unclosed_paren() {
        let mut parser = Parser::new("(let x (+ 1 2)");
        assert!(matches!(
            parser.parse_all(),
            Err(ParseError::UnclosedParen { .. })
        ));
    }

    #[test]
    fn test_nesting_limit() {
        let depth = 10_000;
        let source = format!("{}1{}", "(do ".repeat(depth), ")".repeat(depth));
        let mut parser = Parser::new(&source);
        assert!(matches!(
            parser.parse_all(),
            Err(ParseError::TooDeep { limit: MAX_NESTING_DEPTH, .. })
        ));
    }

    #[test]
    fn test_nesting_within_limit() {
        let depth = MAX_NESTING_DEPTH;
        let source = format!("{}1{}", "(do ".repeat(depth), ")".repeat(depth));
        let forms = Parser::new(&source).parse_all().unwrap();
        assert_eq!(forms.len(), 1);
    }

    #[test]
    fn test_stray_rparen() {
        let mut parser = Parser::new(")");
        assert!(matches!(
            parser.parse_sexpr(),
            Err(ParseError::UnexpectedToken { .. })
        ));
    }
}
