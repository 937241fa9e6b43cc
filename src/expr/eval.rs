//! Pure expression evaluation
//!
//! Evaluation never touches a backend or scheduler state. Every `q(...)` and
//! `alert(...)` leaf must already be resolved into [`Bindings`]; the adapter
//! in `sched` does that resolution before calling [`evaluate`].

use std::collections::HashMap;
use std::sync::Arc;

use super::ast::{BinaryOp, Expr, Literal, UnaryOp};
use super::query::QueryRef;
use crate::tags::{sort_groups, Group, Series};

/// Resolved leaf values for one expression
#[derive(Debug, Default, Clone)]
pub struct Bindings {
    queries: HashMap<String, Arc<Vec<Series>>>,
    alerts: HashMap<(String, String), Vec<Group>>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_query(&mut self, query: &QueryRef, series: Arc<Vec<Series>>) {
        self.queries.insert(query.cache_key(), series);
    }

    pub fn bind_alert(&mut self, alert: &str, severity: &str, groups: Vec<Group>) {
        self.alerts
            .insert((alert.to_string(), severity.to_string()), groups);
    }
}

/// Intermediate value during evaluation
#[derive(Debug, Clone)]
enum Value {
    Scalar(f64),
    Str,
    Series(Arc<Vec<Series>>),
    Number(Vec<Group>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Scalar(_) => "scalar",
            Value::Str => "string",
            Value::Series(_) => "series set",
            Value::Number(_) => "number set",
        }
    }
}

/// Evaluate an expression to an ordered list of groups.
///
/// A scalar result becomes a single group with an empty tag set.
pub fn evaluate(expr: &Expr, bindings: &Bindings) -> Result<Vec<Group>, EvalError> {
    let mut groups = match eval_value(expr, bindings)? {
        Value::Scalar(v) => vec![Group::new(Default::default(), v)],
        Value::Number(groups) => groups,
        other => {
            return Err(EvalError::TypeMismatch {
                context: "expression result".to_string(),
                expected: "number set",
                found: other.kind(),
            })
        }
    };
    sort_groups(&mut groups);
    Ok(groups)
}

fn eval_value(expr: &Expr, bindings: &Bindings) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(Literal::Number(n)) => Ok(Value::Scalar(*n)),
        Expr::Literal(Literal::String(_)) => Ok(Value::Str),
        Expr::Query(q) => bindings
            .queries
            .get(&q.cache_key())
            .cloned()
            .map(Value::Series)
            .ok_or_else(|| EvalError::UnboundQuery(q.cache_key())),
        Expr::AlertRef { alert, severity } => bindings
            .alerts
            .get(&(alert.clone(), severity.clone()))
            .cloned()
            .map(Value::Number)
            .ok_or_else(|| EvalError::UnboundAlert(format!("alert({:?}, {:?})", alert, severity))),
        Expr::Call { func, args } => eval_call(func, args, bindings),
        Expr::Unary { op, expr } => match eval_value(expr, bindings)? {
            Value::Scalar(v) => Ok(Value::Scalar(op.apply(v))),
            Value::Number(groups) => Ok(Value::Number(
                groups
                    .into_iter()
                    .map(|g| Group::new(g.tags, op.apply(g.value)))
                    .collect(),
            )),
            other => Err(EvalError::TypeMismatch {
                context: unary_context(*op),
                expected: "number",
                found: other.kind(),
            }),
        },
        Expr::Binary { op, lhs, rhs } => {
            let lhs = eval_value(lhs, bindings)?;
            let rhs = eval_value(rhs, bindings)?;
            eval_binary(*op, lhs, rhs)
        }
    }
}

fn unary_context(op: UnaryOp) -> String {
    match op {
        UnaryOp::Not => "operator !".to_string(),
        UnaryOp::Neg => "unary -".to_string(),
    }
}

fn eval_binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    match (lhs, rhs) {
        (Value::Scalar(a), Value::Scalar(b)) => Ok(Value::Scalar(op.apply(a, b))),
        (Value::Number(groups), Value::Scalar(b)) => Ok(Value::Number(
            groups
                .into_iter()
                .map(|g| Group::new(g.tags, op.apply(g.value, b)))
                .collect(),
        )),
        (Value::Scalar(a), Value::Number(groups)) => Ok(Value::Number(
            groups
                .into_iter()
                .map(|g| Group::new(g.tags, op.apply(a, g.value)))
                .collect(),
        )),
        (Value::Number(left), Value::Number(right)) => Ok(Value::Number(join(op, &left, &right))),
        (l, r) => {
            let bad = if matches!(l, Value::Scalar(_) | Value::Number(_)) { r } else { l };
            Err(EvalError::TypeMismatch {
                context: format!("operator {}", op.symbol()),
                expected: "number",
                found: bad.kind(),
            })
        }
    }
}

/// Pairwise join of two group sets on tag match; the result carries the union
/// of both tag sets. The first pair producing a given tag set wins.
fn join(op: BinaryOp, left: &[Group], right: &[Group]) -> Vec<Group> {
    let mut out: Vec<Group> = Vec::new();
    for l in left {
        for r in right {
            if !l.tags.matches(&r.tags) {
                continue;
            }
            let tags = l.tags.merge(&r.tags);
            if out.iter().any(|g| g.tags == tags) {
                continue;
            }
            out.push(Group::new(tags, op.apply(l.value, r.value)));
        }
    }
    out
}

/// Series reducers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reducer {
    Avg,
    Sum,
    Min,
    Max,
    First,
    Last,
    Len,
}

impl Reducer {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "avg" => Some(Reducer::Avg),
            "sum" => Some(Reducer::Sum),
            "min" => Some(Reducer::Min),
            "max" => Some(Reducer::Max),
            "first" => Some(Reducer::First),
            "last" => Some(Reducer::Last),
            "len" => Some(Reducer::Len),
            _ => None,
        }
    }

    /// `values` is never empty
    fn apply(&self, values: &[f64]) -> f64 {
        match self {
            Reducer::Avg => values.iter().sum::<f64>() / values.len() as f64,
            Reducer::Sum => values.iter().sum(),
            Reducer::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Reducer::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Reducer::First => values[0],
            Reducer::Last => values[values.len() - 1],
            Reducer::Len => values.len() as f64,
        }
    }
}

fn eval_call(func: &str, args: &[Expr], bindings: &Bindings) -> Result<Value, EvalError> {
    let reducer =
        Reducer::from_name(func).ok_or_else(|| EvalError::UnknownFunction(func.to_string()))?;

    if args.len() != 1 {
        return Err(EvalError::Arity {
            func: func.to_string(),
            expected: 1,
            got: args.len(),
        });
    }

    let series = match eval_value(&args[0], bindings)? {
        Value::Series(series) => series,
        other => {
            return Err(EvalError::TypeMismatch {
                context: format!("{}()", func),
                expected: "series set",
                found: other.kind(),
            })
        }
    };

    // Series without datapoints produce no group
    let groups = series
        .iter()
        .filter(|s| !s.dps.is_empty())
        .map(|s| {
            let values: Vec<f64> = s.values().collect();
            Group::new(s.tags.clone(), reducer.apply(&values))
        })
        .collect();

    Ok(Value::Number(groups))
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("{func}() takes {expected} argument(s), got {got}")]
    Arity {
        func: String,
        expected: usize,
        got: usize,
    },

    #[error("Type mismatch in {context}: expected {expected}, found {found}")]
    TypeMismatch {
        context: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("No result bound for {0}")]
    UnboundQuery(String),

    #[error("No result bound for {0}")]
    UnboundAlert(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse_expr;
    use crate::tags::TagSet;

    fn series(tags: &str, points: &[f64]) -> Series {
        let mut s = Series::new("m", tags.parse::<TagSet>().unwrap());
        for (i, p) in points.iter().enumerate() {
            s = s.with_point(i as i64, *p);
        }
        s
    }

    fn bind(expr: &Expr, data: Vec<Series>) -> Bindings {
        let mut bindings = Bindings::new();
        let data = Arc::new(data);
        for q in expr.query_refs() {
            bindings.bind_query(q, Arc::clone(&data));
        }
        bindings
    }

    #[test]
    fn test_reduce_and_threshold() {
        let expr = parse_expr(r#"avg(q("avg:c{a=*}", "5m", "")) > 1"#).unwrap();
        let bindings = bind(
            &expr,
            vec![series("{a=b}", &[1.0, 2.0, 3.0]), series("{a=c}", &[0.0, 1.0])],
        );
        let groups = evaluate(&expr, &bindings).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].tags.to_string(), "{a=b}");
        assert!(groups[0].is_truthy());
        assert!(!groups[1].is_truthy());
    }

    #[test]
    fn test_reducers() {
        let data = vec![series("{h=1}", &[4.0, 1.0, 7.0])];
        let cases = [
            ("sum", 12.0),
            ("min", 1.0),
            ("max", 7.0),
            ("first", 4.0),
            ("last", 7.0),
            ("len", 3.0),
        ];
        for (func, expected) in cases {
            let expr = parse_expr(&format!(r#"{}(q("sum:m", "1h"))"#, func)).unwrap();
            let groups = evaluate(&expr, &bind(&expr, data.clone())).unwrap();
            assert_eq!(groups[0].value, expected, "{}", func);
        }
    }

    #[test]
    fn test_empty_series_dropped() {
        let expr = parse_expr(r#"avg(q("avg:m{h=*}", "5m"))"#).unwrap();
        let groups = evaluate(&expr, &bind(&expr, vec![series("{h=1}", &[])])).unwrap();
        assert!(groups.is_empty());
    }

    #[test]
    fn test_join_on_matching_tags() {
        let left = vec![
            Group::new("{host=a,cpu=0}".parse().unwrap(), 5.0),
            Group::new("{host=b,cpu=0}".parse().unwrap(), 1.0),
        ];
        let right = vec![Group::new("{host=a}".parse().unwrap(), 2.0)];
        let joined = join(BinaryOp::Mul, &left, &right);
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].tags.to_string(), "{cpu=0,host=a}");
        assert_eq!(joined[0].value, 10.0);
    }

    #[test]
    fn test_scalar_result_is_single_untagged_group() {
        let expr = parse_expr("2 > 1").unwrap();
        let groups = evaluate(&expr, &Bindings::new()).unwrap();
        assert_eq!(groups, vec![Group::new(TagSet::new(), 1.0)]);
    }

    #[test]
    fn test_alert_binding() {
        let expr = parse_expr(r#"!alert("a", "crit")"#).unwrap();
        let mut bindings = Bindings::new();
        bindings.bind_alert("a", "crit", vec![Group::new("{h=1}".parse().unwrap(), 1.0)]);
        let groups = evaluate(&expr, &bindings).unwrap();
        assert_eq!(groups[0].value, 0.0);
    }

    #[test]
    fn test_errors() {
        let expr = parse_expr(r#"q("avg:m", "5m")"#).unwrap();
        assert!(matches!(
            evaluate(&expr, &bind(&expr, vec![])),
            Err(EvalError::TypeMismatch { .. })
        ));
        assert!(matches!(
            evaluate(&expr, &Bindings::new()),
            Err(EvalError::UnboundQuery(_))
        ));

        let expr = parse_expr("median(1)").unwrap();
        assert_eq!(
            evaluate(&expr, &Bindings::new()),
            Err(EvalError::UnknownFunction("median".to_string()))
        );

        let expr = parse_expr("avg(1)").unwrap();
        assert!(matches!(
            evaluate(&expr, &Bindings::new()),
            Err(EvalError::TypeMismatch { .. })
        ));
    }
}
