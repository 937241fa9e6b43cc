//! Expression result adapter
//!
//! Resolves the leaves of an alert's expression (backend queries through the
//! pass cache, `alert(...)` references through committed pass state) and
//! hands the bindings to the pure evaluator.

use futures::future::join_all;

use super::cache::QueryCache;
use super::error::{AlertError, ExprKind};
use super::graph::{CompiledAlert, Depends};
use super::state::StateReader;
use crate::alerts::Severity;
use crate::backend::QueryBackend;
use crate::expr::{evaluate, Bindings, EvalError, Expr};
use crate::tags::Group;

pub struct ResultAdapter<'a> {
    backend: &'a dyn QueryBackend,
    cache: &'a QueryCache,
    state: &'a dyn StateReader,
}

impl<'a> ResultAdapter<'a> {
    pub fn new(backend: &'a dyn QueryBackend, cache: &'a QueryCache, state: &'a dyn StateReader) -> Self {
        Self {
            backend,
            cache,
            state,
        }
    }

    /// Groups for one of the alert's expressions, ordered by tags.
    ///
    /// `None` when the alert has no such expression, or when its depends
    /// clause is a cross-alert reference (handled by the resolver instead).
    pub async fn evaluate(
        &self,
        alert: &CompiledAlert,
        kind: ExprKind,
    ) -> Result<Option<Vec<Group>>, AlertError> {
        let expr = match kind {
            ExprKind::Crit => alert.crit.as_ref(),
            ExprKind::Warn => alert.warn.as_ref(),
            ExprKind::Depends => match &alert.depends {
                Some(Depends::Expression(expr)) => Some(expr),
                Some(Depends::Alert { .. }) | None => None,
            },
        };

        match expr {
            Some(expr) => self.evaluate_expr(&alert.name, kind, expr).await.map(Some),
            None => Ok(None),
        }
    }

    /// Resolve every leaf of `expr` and evaluate it
    pub async fn evaluate_expr(
        &self,
        alert: &str,
        kind: ExprKind,
        expr: &Expr,
    ) -> Result<Vec<Group>, AlertError> {
        let mut bindings = Bindings::new();

        let mut queries = expr.query_refs();
        queries.sort_by_key(|q| q.cache_key());
        queries.dedup_by_key(|q| q.cache_key());

        let fetches = queries
            .iter()
            .map(|q| async move { (*q, self.cache.get_or_fetch(q, self.backend).await) });
        for (query, result) in join_all(fetches).await {
            let series = result.map_err(|source| AlertError::Backend {
                alert: alert.to_string(),
                kind,
                query: query.cache_key(),
                source,
            })?;
            bindings.bind_query(query, series);
        }

        for (name, severity) in expr.alert_refs() {
            let groups = self
                .alert_groups(name, severity)
                .map_err(|source| AlertError::Expression {
                    alert: alert.to_string(),
                    kind,
                    source,
                })?;
            bindings.bind_alert(name, severity, groups);
        }

        evaluate(expr, &bindings).map_err(|source| AlertError::Expression {
            alert: alert.to_string(),
            kind,
            source,
        })
    }

    /// One truthy group per committed instance of `name` at exactly
    /// `severity`; instances at any other severity produce nothing
    pub fn alert_groups(&self, name: &str, severity: &str) -> Result<Vec<Group>, EvalError> {
        let wanted: Severity = severity
            .parse()
            .map_err(|_| EvalError::UnboundAlert(format!("alert({:?}, {:?})", name, severity)))?;

        Ok(self
            .state
            .instances(name)
            .into_iter()
            .filter(|(_, s)| *s == wanted)
            .map(|(tags, _)| Group::new(tags, 1.0))
            .collect())
    }
}
