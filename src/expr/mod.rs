//! Alert expression language: AST, parser, query normalization and a pure
//! group-producing evaluator

pub mod ast;
pub mod eval;
pub mod parser;
pub mod query;

pub use ast::{BinaryOp, Expr, Literal, UnaryOp};
pub use eval::{evaluate, Bindings, EvalError};
pub use parser::{parse_expr, ParseError};
pub use query::{normalize_query, MetricQuery, QueryRef};
