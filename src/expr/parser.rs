//! Recursive-descent parser for alert expressions
//!
//! ```text
//! or      := and ("||" and)*
//! and     := cmp ("&&" cmp)*
//! cmp     := add (("==" | "!=" | ">" | ">=" | "<" | "<=") add)*
//! add     := mul (("+" | "-") mul)*
//! mul     := unary (("*" | "/") unary)*
//! unary   := ("!" | "-") unary | primary
//! primary := number | string | ident "(" args ")" | "(" or ")"
//! ```

use super::ast::{BinaryOp, Expr, Literal, UnaryOp};
use super::query::QueryRef;

/// Deepest nesting of parentheses, calls, unary operators and operator
/// chains an expression may have
pub const MAX_DEPTH: usize = 100;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Not,
    Op(BinaryOp),
}

/// Parse an expression string into an AST
pub fn parse_expr(input: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ParseError::EmptyExpression);
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_or()?;
    if let Some((pos, tok)) = parser.peek_with_pos() {
        return Err(ParseError::UnexpectedToken {
            pos,
            found: format!("{:?}", tok),
        });
    }
    Ok(expr)
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, ParseError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;
        match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            // Comment to end of line
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '(' => tokens.push((start, Token::LParen)),
            ')' => tokens.push((start, Token::RParen)),
            ',' => tokens.push((start, Token::Comma)),
            '+' => tokens.push((start, Token::Op(BinaryOp::Add))),
            '-' => tokens.push((start, Token::Op(BinaryOp::Sub))),
            '*' => tokens.push((start, Token::Op(BinaryOp::Mul))),
            '/' => tokens.push((start, Token::Op(BinaryOp::Div))),
            '"' => {
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(ParseError::UnterminatedString(start)),
                        Some('"') => break,
                        Some('\\') => {
                            let escaped = chars.get(i + 1).ok_or(ParseError::UnterminatedString(start))?;
                            s.push(*escaped);
                            i += 2;
                        }
                        Some(ch) => {
                            s.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push((start, Token::Str(s)));
            }
            '|' | '&' | '=' | '!' | '>' | '<' => {
                let next = chars.get(i + 1).copied();
                let (tok, width) = match (c, next) {
                    ('|', Some('|')) => (Token::Op(BinaryOp::Or), 2),
                    ('&', Some('&')) => (Token::Op(BinaryOp::And), 2),
                    ('=', Some('=')) => (Token::Op(BinaryOp::Eq), 2),
                    ('!', Some('=')) => (Token::Op(BinaryOp::NotEq), 2),
                    ('>', Some('=')) => (Token::Op(BinaryOp::GtEq), 2),
                    ('<', Some('=')) => (Token::Op(BinaryOp::LtEq), 2),
                    ('>', _) => (Token::Op(BinaryOp::Gt), 1),
                    ('<', _) => (Token::Op(BinaryOp::Lt), 1),
                    ('!', _) => (Token::Not, 1),
                    _ => return Err(ParseError::UnexpectedChar { pos: start, ch: c }),
                };
                tokens.push((start, tok));
                i += width;
                continue;
            }
            c if c.is_ascii_digit() || c == '.' => {
                while i < chars.len()
                    && (chars[i].is_ascii_digit()
                        || chars[i] == '.'
                        || ((chars[i] == 'e' || chars[i] == 'E') && i > start)
                        || ((chars[i] == '+' || chars[i] == '-')
                            && matches!(chars[i - 1], 'e' | 'E')
                            && i - 1 > start))
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| ParseError::InvalidNumber(text.clone()))?;
                tokens.push((start, Token::Number(n)));
                continue;
            }
            c if c.is_alphabetic() || c == '_' => {
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push((start, Token::Ident(chars[start..i].iter().collect())));
                continue;
            }
            other => return Err(ParseError::UnexpectedChar { pos: start, ch: other }),
        }
        i += 1;
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn descend(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ParseError::TooDeep(MAX_DEPTH));
        }
        Ok(())
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn peek_with_pos(&self) -> Option<(usize, &Token)> {
        self.tokens.get(self.pos).map(|(p, t)| (*p, t))
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParseError> {
        match self.peek_with_pos() {
            Some((_, tok)) if *tok == expected => {
                self.pos += 1;
                Ok(())
            }
            Some((pos, tok)) => Err(ParseError::UnexpectedToken {
                pos,
                found: format!("{:?}", tok),
            }),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    fn binary_level(
        &mut self,
        ops: &[BinaryOp],
        next: fn(&mut Parser) -> Result<Expr, ParseError>,
    ) -> Result<Expr, ParseError> {
        let entry = self.depth;
        let mut lhs = next(self)?;
        while let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            if !ops.contains(&op) {
                break;
            }
            self.pos += 1;
            // Each fold deepens the left-leaning tree
            self.descend()?;
            let rhs = next(self)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        self.depth = entry;
        Ok(lhs)
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(&[BinaryOp::Or], Parser::parse_and)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(&[BinaryOp::And], Parser::parse_cmp)
    }

    fn parse_cmp(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            &[
                BinaryOp::Eq,
                BinaryOp::NotEq,
                BinaryOp::Gt,
                BinaryOp::GtEq,
                BinaryOp::Lt,
                BinaryOp::LtEq,
            ],
            Parser::parse_add,
        )
    }

    fn parse_add(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(&[BinaryOp::Add, BinaryOp::Sub], Parser::parse_mul)
    }

    fn parse_mul(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(&[BinaryOp::Mul, BinaryOp::Div], Parser::parse_unary)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek() {
            Some(Token::Not) => UnaryOp::Not,
            Some(Token::Op(BinaryOp::Sub)) => UnaryOp::Neg,
            _ => return self.parse_primary(),
        };
        self.pos += 1;
        self.descend()?;
        let expr = self.parse_unary()?;
        self.depth -= 1;
        Ok(Expr::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let pos = self.peek_with_pos().map(|(p, _)| p).unwrap_or_default();
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Literal(Literal::Number(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Literal::String(s))),
            Some(Token::LParen) => {
                self.descend()?;
                let expr = self.parse_or()?;
                self.expect(Token::RParen)?;
                self.depth -= 1;
                Ok(expr)
            }
            Some(Token::Ident(name)) => {
                self.expect(Token::LParen)?;
                self.descend()?;
                let args = self.parse_args()?;
                self.depth -= 1;
                build_call(name, args)
            }
            Some(tok) => Err(ParseError::UnexpectedToken {
                pos,
                found: format!("{:?}", tok),
            }),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.parse_or()?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                Some(tok) => {
                    return Err(ParseError::UnexpectedToken {
                        pos: self.tokens[self.pos - 1].0,
                        found: format!("{:?}", tok),
                    })
                }
                None => return Err(ParseError::UnexpectedEnd),
            }
        }
    }
}

/// `q` and `alert` take string literals and become dedicated leaves
fn build_call(name: String, args: Vec<Expr>) -> Result<Expr, ParseError> {
    match name.as_str() {
        "q" => {
            let strings = string_args(&name, &args, 2, 3)?;
            let end = strings.get(2).map(String::as_str).unwrap_or("");
            Ok(Expr::Query(QueryRef::new(&strings[0], &strings[1], end)?))
        }
        "alert" => {
            let strings = string_args(&name, &args, 2, 2)?;
            Ok(Expr::AlertRef {
                alert: strings[0].clone(),
                severity: strings[1].clone(),
            })
        }
        _ => Ok(Expr::Call { func: name, args }),
    }
}

fn string_args(func: &str, args: &[Expr], min: usize, max: usize) -> Result<Vec<String>, ParseError> {
    if args.len() < min || args.len() > max {
        return Err(ParseError::Arity {
            func: func.to_string(),
            got: args.len(),
        });
    }
    args.iter()
        .map(|a| match a {
            Expr::Literal(Literal::String(s)) => Ok(s.clone()),
            other => Err(ParseError::ExpectedString {
                func: func.to_string(),
                found: other.to_string(),
            }),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("Empty expression")]
    EmptyExpression,

    #[error("Unexpected character '{ch}' at {pos}")]
    UnexpectedChar { pos: usize, ch: char },

    #[error("Unexpected token {found} at {pos}")]
    UnexpectedToken { pos: usize, found: String },

    #[error("Unexpected end of expression")]
    UnexpectedEnd,

    #[error("Unterminated string starting at {0}")]
    UnterminatedString(usize),

    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    #[error("Wrong number of arguments to {func}(): {got}")]
    Arity { func: String, got: usize },

    #[error("{func}() expects string arguments, found {found}")]
    ExpectedString { func: String, found: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Expression nested deeper than {0} levels")]
    TooDeep(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_threshold() {
        let expr = parse_expr(r#"avg(q("avg:c{a=*}", "5m", "")) > 0"#).unwrap();
        match &expr {
            Expr::Binary { op, lhs, rhs } => {
                assert_eq!(*op, BinaryOp::Gt);
                assert!(matches!(**rhs, Expr::Literal(Literal::Number(n)) if n == 0.0));
                match &**lhs {
                    Expr::Call { func, args } => {
                        assert_eq!(func, "avg");
                        assert!(matches!(args[0], Expr::Query(_)));
                    }
                    other => panic!("unexpected lhs: {:?}", other),
                }
            }
            other => panic!("unexpected expr: {:?}", other),
        }
        assert_eq!(expr.query_refs().len(), 1);
        assert_eq!(expr.query_refs()[0].query, "avg:c{a=*}");
    }

    #[test]
    fn test_parse_alert_ref() {
        let expr = parse_expr(r#"alert("a","crit")"#).unwrap();
        assert_eq!(expr.as_alert_ref(), Some(("a", "crit")));

        let nested = parse_expr(r#"alert("a", "crit") || alert("b", "warn")"#).unwrap();
        assert_eq!(nested.as_alert_ref(), None);
        assert_eq!(nested.alert_refs(), vec![("a", "crit"), ("b", "warn")]);
    }

    #[test]
    fn test_precedence() {
        let expr = parse_expr("1 + 2 * 3 > 6 && !0").unwrap();
        assert_eq!(expr.to_string(), "(((1 + (2 * 3)) > 6) && !0)");

        let expr = parse_expr("-(1 - 2) - 3").unwrap();
        assert_eq!(expr.to_string(), "(-(1 - 2) - 3)");
    }

    #[test]
    fn test_q_defaults_end_and_normalizes() {
        let expr = parse_expr(r#"q("avg:a{host=*,cpu=*}", "5m")"#).unwrap();
        match expr {
            Expr::Query(q) => {
                assert_eq!(q.cache_key(), r#"q("avg:a{cpu=*,host=*}", "5m", "")"#);
            }
            other => panic!("unexpected expr: {:?}", other),
        }
    }

    #[test]
    fn test_comments_and_whitespace() {
        let expr = parse_expr("# comment\n  1 >= 0.5 ").unwrap();
        assert_eq!(expr.to_string(), "(1 >= 0.5)");
    }

    #[test]
    fn test_errors() {
        assert_eq!(parse_expr("  "), Err(ParseError::EmptyExpression));
        assert_eq!(parse_expr("avg("), Err(ParseError::UnexpectedEnd));
        assert!(matches!(parse_expr("1 = 2"), Err(ParseError::UnexpectedChar { .. })));
        assert!(matches!(parse_expr(r#""abc"#), Err(ParseError::UnterminatedString(0))));
        assert!(matches!(parse_expr("1 2"), Err(ParseError::UnexpectedToken { .. })));
        assert!(matches!(
            parse_expr(r#"alert("a")"#),
            Err(ParseError::Arity { .. })
        ));
        assert!(matches!(
            parse_expr(r#"q(1, "5m")"#),
            Err(ParseError::ExpectedString { .. })
        ));
    }

    #[test]
    fn test_exponent_numbers() {
        assert_eq!(parse_expr("1e-3"), Ok(Expr::Literal(Literal::Number(0.001))));
        assert_eq!(parse_expr("2.5E+2"), Ok(Expr::Literal(Literal::Number(250.0))));
        assert_eq!(parse_expr("4e2"), Ok(Expr::Literal(Literal::Number(400.0))));

        // A sign not preceded by an exponent is still an operator
        assert!(matches!(
            parse_expr("1-2"),
            Ok(Expr::Binary {
                op: BinaryOp::Sub,
                ..
            })
        ));
        assert!(matches!(
            parse_expr("1e2-3"),
            Ok(Expr::Binary {
                op: BinaryOp::Sub,
                ..
            })
        ));
    }

    #[test]
    fn test_nesting_limit() {
        let parens = format!("{}1{}", "(".repeat(100_000), ")".repeat(100_000));
        assert_eq!(parse_expr(&parens), Err(ParseError::TooDeep(MAX_DEPTH)));

        let nots = format!("{}1", "!".repeat(100_000));
        assert_eq!(parse_expr(&nots), Err(ParseError::TooDeep(MAX_DEPTH)));

        let calls = format!("{}1{}", "abs(".repeat(100_000), ")".repeat(100_000));
        assert_eq!(parse_expr(&calls), Err(ParseError::TooDeep(MAX_DEPTH)));

        let chain = format!("1{}", "+1".repeat(100_000));
        assert_eq!(parse_expr(&chain), Err(ParseError::TooDeep(MAX_DEPTH)));

        // Realistic nesting is untouched
        let nested = format!("{}1{} > 0", "(".repeat(40), ")".repeat(40));
        assert!(parse_expr(&nested).is_ok());
        let sum = format!("1{}", " + 1".repeat(40));
        assert!(parse_expr(&sum).is_ok());
        assert!(parse_expr("!!-(abs(-1) + 2) * 3").is_ok());
    }
}
