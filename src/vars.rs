//! Variable context: layered name resolution and `${name}` template
//! expansion.
//!
//! Lookup order is iteration → thread-group → plan → global, first
//! match wins. Undefined placeholders stay literal so the failure is
//! visible in downstream logs; `$${name}` escapes to a literal
//! `${name}`.

use crate::plan::{Plan, ThreadGroup, VariableScope};
use std::collections::HashMap;
use std::sync::Arc;

/// Read-only scope layers shared by every VU of a thread-group.
#[derive(Debug, Clone, Default)]
pub struct ScopeStack {
    global: Arc<HashMap<String, String>>,
    plan: Arc<HashMap<String, String>>,
    group: Arc<HashMap<String, String>>,
}

impl ScopeStack {
    pub fn for_group(plan: &Plan, group: &ThreadGroup) -> Self {
        let mut global = HashMap::new();
        let mut plan_scope = HashMap::new();
        for var in &plan.variables {
            match var.scope {
                VariableScope::Global => {
                    global.insert(var.name.clone(), var.value.clone());
                }
                // Plan-level declarations with thread_group scope still
                // live in the plan layer; group-local wins below.
                _ => {
                    plan_scope.insert(var.name.clone(), var.value.clone());
                }
            }
        }
        let group_scope = group
            .variables
            .iter()
            .map(|v| (v.name.clone(), v.value.clone()))
            .collect();
        Self {
            global: Arc::new(global),
            plan: Arc::new(plan_scope),
            group: Arc::new(group_scope),
        }
    }

    pub fn resolve<'a>(&'a self, name: &str, iteration: &'a IterationScope) -> Option<&'a str> {
        iteration
            .bindings
            .get(name)
            .or_else(|| self.group.get(name))
            .or_else(|| self.plan.get(name))
            .or_else(|| self.global.get(name))
            .map(String::as_str)
    }
}

/// Innermost layer, owned by one VU and discarded every loop iteration.
/// Holds the CSV row bindings and in-iteration extractions.
#[derive(Debug, Clone, Default)]
pub struct IterationScope {
    bindings: HashMap<String, String>,
}

impl IterationScope {
    pub fn new(bindings: HashMap<String, String>) -> Self {
        Self { bindings }
    }

    pub fn bind(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.bindings.insert(name.into(), value.into());
    }

    pub fn merge(&mut self, bindings: HashMap<String, String>) {
        self.bindings.extend(bindings);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.bindings.get(name).map(String::as_str)
    }
}

/// Single-pass `${name}` substitution over a template string.
pub fn expand(template: &str, scopes: &ScopeStack, iteration: &IterationScope) -> String {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        // `$${...}` escapes to a literal `${...}`.
        if bytes[i] == b'$' && template[i..].starts_with("$${") {
            match template[i + 2..].find('}') {
                Some(end) => {
                    out.push_str(&template[i + 1..i + 3 + end]);
                    i += 3 + end;
                }
                None => {
                    out.push_str(&template[i..]);
                    break;
                }
            }
            continue;
        }
        if bytes[i] == b'$' && template[i..].starts_with("${") {
            match template[i + 2..].find('}') {
                Some(end) => {
                    let name = &template[i + 2..i + 2 + end];
                    match scopes.resolve(name, iteration) {
                        Some(value) if !name.is_empty() => out.push_str(value),
                        // Undefined (or empty) name: keep the
                        // placeholder literal.
                        _ => out.push_str(&template[i..i + 3 + end]),
                    }
                    i += 3 + end;
                }
                None => {
                    out.push_str(&template[i..]);
                    break;
                }
            }
            continue;
        }
        let ch = template[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }

    out
}

/// Placeholder names appearing in a template, for CSV reference
/// scanning. Escaped placeholders are skipped.
pub fn placeholder_names(template: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = template;
    loop {
        let Some(pos) = rest.find("${") else { break };
        if pos > 0 && rest.as_bytes()[pos - 1] == b'$' {
            rest = &rest[pos + 2..];
            continue;
        }
        match rest[pos + 2..].find('}') {
            Some(end) => {
                let name = &rest[pos + 2..pos + 2 + end];
                if !name.is_empty() {
                    names.push(name);
                }
                rest = &rest[pos + 3 + end..];
            }
            None => break,
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Variable;

    fn stack(pairs: &[(&str, &str)]) -> ScopeStack {
        let plan = Plan {
            id: "p".into(),
            name: "p".into(),
            format_version: 1,
            thread_groups: Vec::new(),
            variables: pairs
                .iter()
                .map(|(k, v)| Variable {
                    id: format!("v-{k}"),
                    name: (*k).into(),
                    value: (*v).into(),
                    scope: VariableScope::Plan,
                })
                .collect(),
            csv_sources: Vec::new(),
        };
        let group = ThreadGroup {
            id: "g".into(),
            name: "g".into(),
            num_threads: 1,
            ramp_up_seconds: 0,
            loop_count: crate::plan::LoopPolicy::Infinite,
            requests: Vec::new(),
            enabled: true,
            variables: Vec::new(),
        };
        ScopeStack::for_group(&plan, &group)
    }

    #[test]
    fn substitutes_known_names() {
        let s = stack(&[("host", "example.com"), ("port", "8080")]);
        let iter = IterationScope::default();
        assert_eq!(
            expand("http://${host}:${port}/api", &s, &iter),
            "http://example.com:8080/api"
        );
    }

    #[test]
    fn undefined_names_stay_literal() {
        let s = stack(&[]);
        let iter = IterationScope::default();
        assert_eq!(expand("x=${missing}", &s, &iter), "x=${missing}");
    }

    #[test]
    fn escape_produces_literal_placeholder() {
        let s = stack(&[("name", "alice")]);
        let iter = IterationScope::default();
        assert_eq!(expand("$${name}", &s, &iter), "${name}");
        assert_eq!(expand("a $${name} b ${name}", &s, &iter), "a ${name} b alice");
    }

    #[test]
    fn unterminated_placeholder_is_left_alone() {
        let s = stack(&[("a", "1")]);
        let iter = IterationScope::default();
        assert_eq!(expand("x${a", &s, &iter), "x${a");
    }

    #[test]
    fn iteration_scope_shadows_outer_layers() {
        let s = stack(&[("token", "outer")]);
        let mut iter = IterationScope::default();
        assert_eq!(expand("${token}", &s, &iter), "outer");
        iter.bind("token", "inner");
        assert_eq!(expand("${token}", &s, &iter), "inner");
    }

    #[test]
    fn expansion_is_idempotent_without_placeholder_values() {
        let s = stack(&[("a", "alpha"), ("b", "beta")]);
        let iter = IterationScope::default();
        let once = expand("${a}/${b}/${missing}", &s, &iter);
        let twice = expand(&once, &s, &iter);
        assert_eq!(once, twice);
    }

    #[test]
    fn finds_placeholder_names() {
        assert_eq!(placeholder_names("${a} ${b} $${c}"), vec!["a", "b"]);
        assert!(placeholder_names("plain").is_empty());
    }

    #[test]
    fn multibyte_text_passes_through() {
        let s = stack(&[("who", "wörld")]);
        let iter = IterationScope::default();
        assert_eq!(expand("héllo ${who}™", &s, &iter), "héllo wörld™");
    }
}
