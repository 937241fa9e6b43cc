use std::fmt;

use super::query::QueryRef;

/// Expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    /// `q("agg:metric{tags}", "start", "end")`
    Query(QueryRef),
    /// `alert("name", "severity")`, resolved against committed pass state
    AlertRef { alert: String, severity: String },
    Call { func: String, args: Vec<Expr> },
    Unary { op: UnaryOp, expr: Box<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Gt,
    GtEq,
    Lt,
    LtEq,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }

    pub fn apply(&self, a: f64, b: f64) -> f64 {
        let truth = |v: bool| if v { 1.0 } else { 0.0 };
        match self {
            BinaryOp::Or => truth(a != 0.0 || b != 0.0),
            BinaryOp::And => truth(a != 0.0 && b != 0.0),
            BinaryOp::Eq => truth(a == b),
            BinaryOp::NotEq => truth(a != b),
            BinaryOp::Gt => truth(a > b),
            BinaryOp::GtEq => truth(a >= b),
            BinaryOp::Lt => truth(a < b),
            BinaryOp::LtEq => truth(a <= b),
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
        }
    }
}

impl UnaryOp {
    pub fn apply(&self, v: f64) -> f64 {
        match self {
            UnaryOp::Not => {
                if v == 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            UnaryOp::Neg => -v,
        }
    }
}

impl Expr {
    /// Every backend query leaf, in source order
    pub fn query_refs(&self) -> Vec<&QueryRef> {
        let mut out = Vec::new();
        self.walk(&mut |e| {
            if let Expr::Query(q) = e {
                out.push(q);
            }
        });
        out
    }

    /// Every `alert(name, severity)` leaf as `(name, severity)`
    pub fn alert_refs(&self) -> Vec<(&str, &str)> {
        let mut out = Vec::new();
        self.walk(&mut |e| {
            if let Expr::AlertRef { alert, severity } = e {
                out.push((alert.as_str(), severity.as_str()));
            }
        });
        out
    }

    /// If the whole expression is a single `alert(...)` reference, return it
    pub fn as_alert_ref(&self) -> Option<(&str, &str)> {
        match self {
            Expr::AlertRef { alert, severity } => Some((alert, severity)),
            _ => None,
        }
    }

    fn walk<'a, F: FnMut(&'a Expr)>(&'a self, f: &mut F) {
        f(self);
        match self {
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.walk(f);
                }
            }
            Expr::Unary { expr, .. } => expr.walk(f),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.walk(f);
                rhs.walk(f);
            }
            Expr::Literal(_) | Expr::Query(_) | Expr::AlertRef { .. } => {}
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(Literal::Number(n)) => write!(f, "{}", n),
            Expr::Literal(Literal::String(s)) => write!(f, "{:?}", s),
            Expr::Query(q) => write!(f, "{}", q),
            Expr::AlertRef { alert, severity } => write!(f, "alert({:?}, {:?})", alert, severity),
            Expr::Call { func, args } => {
                write!(f, "{}(", func)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
            Expr::Unary { op, expr } => {
                let sym = match op {
                    UnaryOp::Not => "!",
                    UnaryOp::Neg => "-",
                };
                write!(f, "{}{}", sym, expr)
            }
            Expr::Binary { op, lhs, rhs } => write!(f, "({} {} {})", lhs, op.symbol(), rhs),
        }
    }
}
