//! Parser for the type-expression language used in task declarations.
//!
//! Grammar (unions bind loosest):
//!
//! ```text
//! union := item ('|' item)*
//! item  := 'str' | 'int' | 'float' | 'bool' | 'None' | 'Any'
//!        | 'Optional' '[' union ']'
//!        | 'list' '[' union ']'
//!        | 'tuple' '[' union (',' union)* ']'
//!        | 'Literal' '[' string (',' string)* ']'
//!        | 'Annotated' '[' union ',' extra ']'
//!        | identifier
//! extra := 'discriminator' '=' string
//!        | 'Field' '(' 'discriminator' '=' string ')'
//!        | string
//! ```
//!
//! Anything outside this grammar is a hard error; unsupported shapes are
//! rejected, never approximated.

use crate::annot::Annotation;
use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Pipe,
    Eq,
}

fn tokenize(expr: &str) -> Result<Vec<Token>, ConfigError> {
    let err = |reason: String| ConfigError::AnnotationParse {
        expr: expr.to_string(),
        reason,
    };
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '[' => {
                chars.next();
                tokens.push(Token::LBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::RBracket);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '|' => {
                chars.next();
                tokens.push(Token::Pipe);
            }
            '=' => {
                chars.next();
                tokens.push(Token::Eq);
            }
            '"' | '\'' => {
                let quote = c;
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == quote => break,
                        Some(ch) => s.push(ch),
                        None => return Err(err("unterminated string".into())),
                    }
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' || ch == '.' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(err(format!("unexpected character '{other}'"))),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    expr: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, reason: impl Into<String>) -> ConfigError {
        ConfigError::AnnotationParse {
            expr: self.expr.to_string(),
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, want: Token) -> Result<(), ConfigError> {
        match self.bump() {
            Some(tok) if tok == want => Ok(()),
            Some(tok) => Err(self.error(format!("expected {want:?}, found {tok:?}"))),
            None => Err(self.error(format!("expected {want:?}, found end of input"))),
        }
    }

    fn expect_string(&mut self) -> Result<String, ConfigError> {
        match self.bump() {
            Some(Token::Str(s)) => Ok(s),
            other => Err(self.error(format!("expected string literal, found {other:?}"))),
        }
    }

    fn parse_union(&mut self) -> Result<Annotation, ConfigError> {
        let mut branches = vec![self.parse_item()?];
        while self.peek() == Some(&Token::Pipe) {
            self.bump();
            branches.push(self.parse_item()?);
        }
        Ok(make_union(branches))
    }

    fn parse_item(&mut self) -> Result<Annotation, ConfigError> {
        let ident = match self.bump() {
            Some(Token::Ident(ident)) => ident,
            other => {
                return Err(self.error(format!("expected type, found {other:?}")));
            }
        };
        match ident.as_str() {
            "str" => Ok(Annotation::Str),
            "int" => Ok(Annotation::Int),
            "float" => Ok(Annotation::Float),
            "bool" => Ok(Annotation::Bool),
            "None" => Ok(Annotation::NoneType),
            "Any" => Ok(Annotation::Any),
            "Optional" => {
                self.expect(Token::LBracket)?;
                let inner = self.parse_union()?;
                self.expect(Token::RBracket)?;
                Ok(make_union(vec![inner, Annotation::NoneType]))
            }
            "list" => {
                self.expect(Token::LBracket)?;
                let item = self.parse_union()?;
                self.expect(Token::RBracket)?;
                Ok(Annotation::List(Box::new(item)))
            }
            "tuple" => {
                self.expect(Token::LBracket)?;
                let mut elems = vec![self.parse_union()?];
                while self.peek() == Some(&Token::Comma) {
                    self.bump();
                    elems.push(self.parse_union()?);
                }
                self.expect(Token::RBracket)?;
                Ok(Annotation::Tuple(elems))
            }
            "Literal" => {
                self.expect(Token::LBracket)?;
                let mut values = vec![self.expect_string()?];
                while self.peek() == Some(&Token::Comma) {
                    self.bump();
                    values.push(self.expect_string()?);
                }
                self.expect(Token::RBracket)?;
                Ok(Annotation::Literal(values))
            }
            "Annotated" => {
                self.expect(Token::LBracket)?;
                let inner = self.parse_union()?;
                self.expect(Token::Comma)?;
                let discriminator = self.parse_annotated_extra()?;
                self.expect(Token::RBracket)?;
                Ok(Annotation::Annotated {
                    inner: Box::new(inner),
                    discriminator,
                })
            }
            _ => Ok(Annotation::Reference(ident)),
        }
    }

    /// The metadata slot of `Annotated[...]`: either a discriminator
    /// declaration or an arbitrary string comment.
    fn parse_annotated_extra(&mut self) -> Result<Option<String>, ConfigError> {
        match self.bump() {
            Some(Token::Str(_)) => Ok(None),
            Some(Token::Ident(ident)) if ident == "discriminator" => {
                self.expect(Token::Eq)?;
                Ok(Some(self.expect_string()?))
            }
            Some(Token::Ident(ident)) if ident == "Field" => {
                self.expect(Token::LParen)?;
                match self.bump() {
                    Some(Token::Ident(kw)) if kw == "discriminator" => {}
                    other => {
                        return Err(self.error(format!(
                            "expected discriminator keyword in Field(...), found {other:?}"
                        )));
                    }
                }
                self.expect(Token::Eq)?;
                let value = self.expect_string()?;
                self.expect(Token::RParen)?;
                Ok(Some(value))
            }
            other => Err(self.error(format!(
                "unsupported Annotated metadata: {other:?}"
            ))),
        }
    }
}

/// Flatten nested unions, deduplicate branches, collapse singletons.
/// `int | int` is a plain `int`; `Optional[int | None]` stays two-branch.
fn make_union(branches: Vec<Annotation>) -> Annotation {
    let mut flat: Vec<Annotation> = Vec::new();
    for branch in branches {
        match branch {
            Annotation::Union(inner) => {
                for b in inner {
                    if !flat.contains(&b) {
                        flat.push(b);
                    }
                }
            }
            other => {
                if !flat.contains(&other) {
                    flat.push(other);
                }
            }
        }
    }
    if flat.len() == 1 {
        flat.remove(0)
    } else {
        Annotation::Union(flat)
    }
}

/// Parse one type-expression string into an annotation tree.
pub fn parse_annotation(expr: &str) -> Result<Annotation, ConfigError> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser {
        expr,
        tokens,
        pos: 0,
    };
    let annotation = parser.parse_union()?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.error("trailing input after annotation"));
    }
    Ok(annotation)
}
