//! Alert dependency graph
//!
//! Every `alert(name, severity)` reference in an alert's crit, warn or
//! depends expression is an edge from that alert to `name`. The graph is
//! validated (references resolve, no cycles) before any query runs, and is
//! split into layers: an alert's layer is one past the deepest layer among
//! the alerts it references.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use super::error::{CycleError, ExprKind};
use crate::alerts::{AlertDefinition, Severity};
use crate::expr::{parse_expr, Expr, ParseError};

/// How an alert's depends clause applies
#[derive(Debug, Clone, PartialEq)]
pub enum Depends {
    /// Truthy groups suppress matching crit/warn groups of the same alert
    Expression(Expr),
    /// Matching instances of another alert at `severity` (or Unevaluated)
    /// block this alert's instances
    Alert { alert: String, severity: Severity },
}

/// Parsed alert definition
#[derive(Debug, Clone)]
pub struct CompiledAlert {
    pub name: String,
    pub crit: Option<Expr>,
    pub warn: Option<Expr>,
    pub depends: Option<Depends>,
    /// First parse failure, if any; such an alert evaluates to Unknown
    pub parse_error: Option<(ExprKind, ParseError)>,
}

impl CompiledAlert {
    pub fn compile(def: &AlertDefinition) -> Self {
        let mut parse_error = None;
        let mut parse = |kind: ExprKind, text: &Option<String>| -> Option<Expr> {
            let text = text.as_deref()?;
            match parse_expr(text) {
                Ok(expr) => Some(expr),
                Err(e) => {
                    parse_error.get_or_insert((kind, e));
                    None
                }
            }
        };

        let crit = parse(ExprKind::Crit, &def.crit);
        let warn = parse(ExprKind::Warn, &def.warn);
        let depends_expr = parse(ExprKind::Depends, &def.depends);

        let mut compiled = Self {
            name: def.name.clone(),
            crit,
            warn,
            depends: None,
            parse_error,
        };

        compiled.depends = depends_expr.map(|expr| match expr.as_alert_ref() {
            Some((alert, severity)) => match severity.parse::<Severity>() {
                Ok(severity) => Depends::Alert {
                    alert: alert.to_string(),
                    severity,
                },
                // Left as an expression; validation reports the bad severity
                Err(_) => Depends::Expression(expr),
            },
            None => Depends::Expression(expr),
        });

        compiled
    }

    /// Every `(alert, severity)` this alert reads, from all expressions
    pub fn references(&self) -> Vec<(&str, &str)> {
        let mut refs = Vec::new();
        for expr in [&self.crit, &self.warn].into_iter().flatten() {
            refs.extend(expr.alert_refs());
        }
        match &self.depends {
            Some(Depends::Expression(expr)) => refs.extend(expr.alert_refs()),
            Some(Depends::Alert { alert, severity }) => refs.push((alert.as_str(), severity.as_str())),
            None => {}
        }
        refs
    }
}

/// Validated, acyclic alert dependency graph
#[derive(Debug)]
pub struct DependencyGraph {
    alerts: BTreeMap<String, Arc<CompiledAlert>>,
    /// dependent -> alerts it references
    dependencies: BTreeMap<String, BTreeSet<String>>,
    layers: Vec<Vec<String>>,
}

impl DependencyGraph {
    /// Compile definitions, resolve references, reject cycles, compute layers
    pub fn build(definitions: &[AlertDefinition]) -> Result<Self, CycleError> {
        let mut alerts = BTreeMap::new();
        for def in definitions {
            let compiled = Arc::new(CompiledAlert::compile(def));
            if alerts.insert(def.name.clone(), compiled).is_some() {
                return Err(CycleError::DuplicateAlert(def.name.clone()));
            }
        }

        let mut dependencies: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (name, alert) in &alerts {
            let deps = dependencies.entry(name.clone()).or_default();
            for (reference, severity) in alert.references() {
                if !alerts.contains_key(reference) {
                    return Err(CycleError::UnresolvedReference {
                        alert: name.clone(),
                        reference: reference.to_string(),
                    });
                }
                if severity.parse::<Severity>().is_err() {
                    return Err(CycleError::InvalidSeverity {
                        alert: name.clone(),
                        reference: reference.to_string(),
                        severity: severity.to_string(),
                    });
                }
                deps.insert(reference.to_string());
            }
        }

        let mut graph = Self {
            alerts,
            dependencies,
            layers: Vec::new(),
        };
        graph.check_cycles()?;
        graph.layers = graph.compute_layers();

        tracing::debug!(
            alerts = graph.alerts.len(),
            layers = graph.layers.len(),
            "Built alert dependency graph"
        );
        Ok(graph)
    }

    /// Depth-first search with an explicit path so the reported cycle lists
    /// every alert on it, starting and ending with the same name
    fn check_cycles(&self) -> Result<(), CycleError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            node: &'a str,
            deps: &'a BTreeMap<String, BTreeSet<String>>,
            marks: &mut HashMap<&'a str, Mark>,
            path: &mut Vec<&'a str>,
        ) -> Result<(), CycleError> {
            match marks.get(node) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|n| *n == node).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
                    cycle.push(node.to_string());
                    return Err(CycleError::DependencyCycle { cycle });
                }
                None => {}
            }

            marks.insert(node, Mark::Visiting);
            path.push(node);
            if let Some(children) = deps.get(node) {
                for child in children {
                    visit(child, deps, marks, path)?;
                }
            }
            path.pop();
            marks.insert(node, Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        let mut path = Vec::new();
        for name in self.dependencies.keys() {
            visit(name, &self.dependencies, &mut marks, &mut path)?;
        }
        Ok(())
    }

    /// Kahn's algorithm, one layer per round; names sorted within a layer
    fn compute_layers(&self) -> Vec<Vec<String>> {
        let mut remaining: BTreeMap<&str, usize> = self
            .dependencies
            .iter()
            .map(|(name, deps)| (name.as_str(), deps.len()))
            .collect();

        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for (name, deps) in &self.dependencies {
            for dep in deps {
                dependents.entry(dep.as_str()).or_default().push(name.as_str());
            }
        }

        let mut layers = Vec::new();
        let mut ready: Vec<&str> = remaining
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(name, _)| *name)
            .collect();

        while !ready.is_empty() {
            let mut next = Vec::new();
            for name in &ready {
                remaining.remove(name);
                for dependent in dependents.get(name).into_iter().flatten() {
                    if let Some(count) = remaining.get_mut(dependent) {
                        *count -= 1;
                        if *count == 0 {
                            next.push(*dependent);
                        }
                    }
                }
            }
            ready.sort_unstable();
            layers.push(ready.iter().map(|s| s.to_string()).collect());
            next.sort_unstable();
            ready = next;
        }

        layers
    }

    /// Evaluation layers; every alert's dependencies sit in earlier layers
    pub fn layers(&self) -> &[Vec<String>] {
        &self.layers
    }

    pub fn get(&self, name: &str) -> Option<&Arc<CompiledAlert>> {
        self.alerts.get(name)
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(name: &str, depends: Option<&str>) -> AlertDefinition {
        let def = AlertDefinition::new(name).with_crit(r#"avg(q("avg:m{host=*}", "5m", "")) > 0"#);
        match depends {
            Some(d) => def.with_depends(d),
            None => def,
        }
    }

    #[test]
    fn test_layers_follow_dependencies() {
        let defs = vec![
            alert("d", Some(r#"alert("b", "crit")"#)),
            alert("c", None),
            alert("b", Some(r#"alert("a", "crit")"#)),
            alert("a", None),
        ];
        let graph = DependencyGraph::build(&defs).unwrap();

        assert_eq!(
            graph.layers(),
            &[
                vec!["a".to_string(), "c".to_string()],
                vec!["b".to_string()],
                vec!["d".to_string()],
            ]
        );
        assert_eq!(graph.len(), 4);
    }

    #[test]
    fn test_cross_alert_depends_is_typed() {
        let graph = DependencyGraph::build(&[
            alert("a", None),
            alert("b", Some(r#"alert("a", "warn")"#)),
        ])
        .unwrap();

        assert_eq!(
            graph.get("b").unwrap().depends,
            Some(Depends::Alert {
                alert: "a".to_string(),
                severity: Severity::Warning,
            })
        );
        assert!(matches!(
            graph.get("a").unwrap().depends,
            None
        ));
    }

    #[test]
    fn test_mutual_dependency_rejected() {
        let err = DependencyGraph::build(&[
            alert("x", Some(r#"alert("y", "crit")"#)),
            alert("y", Some(r#"alert("x", "crit")"#)),
        ])
        .unwrap_err();

        assert_eq!(
            err,
            CycleError::DependencyCycle {
                cycle: vec!["x".to_string(), "y".to_string(), "x".to_string()],
            }
        );
    }

    #[test]
    fn test_self_and_nested_references() {
        let err = DependencyGraph::build(&[alert("x", Some(r#"alert("x", "crit")"#))]).unwrap_err();
        assert!(matches!(err, CycleError::DependencyCycle { .. }));

        // A reference buried in crit is still an edge
        let defs = vec![
            AlertDefinition::new("p").with_crit(r#"alert("q", "crit") > 0"#),
            AlertDefinition::new("q").with_crit(r#"alert("p", "warn") > 0"#),
        ];
        assert!(matches!(
            DependencyGraph::build(&defs),
            Err(CycleError::DependencyCycle { .. })
        ));
    }

    #[test]
    fn test_unresolved_references() {
        let err = DependencyGraph::build(&[alert("b", Some(r#"alert("missing", "crit")"#))]).unwrap_err();
        assert_eq!(
            err,
            CycleError::UnresolvedReference {
                alert: "b".to_string(),
                reference: "missing".to_string(),
            }
        );

        let err = DependencyGraph::build(&[
            alert("a", None),
            alert("b", Some(r#"alert("a", "page")"#)),
        ])
        .unwrap_err();
        assert!(matches!(err, CycleError::InvalidSeverity { .. }));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = DependencyGraph::build(&[alert("a", None), alert("a", None)]).unwrap_err();
        assert_eq!(err, CycleError::DuplicateAlert("a".to_string()));
    }

    #[test]
    fn test_parse_errors_are_isolated() {
        let graph = DependencyGraph::build(&[
            AlertDefinition::new("bad").with_crit("avg(("),
            alert("good", None),
        ])
        .unwrap();

        let bad = graph.get("bad").unwrap();
        assert!(bad.crit.is_none());
        assert!(matches!(bad.parse_error, Some((ExprKind::Crit, _))));
        assert!(graph.get("good").unwrap().parse_error.is_none());
    }
}
