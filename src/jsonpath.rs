//! A deliberately small JSONPath dialect shared by assertion and
//! extractor rules: optional `$` root, dotted field access, `[n]`
//! numeric indexing, and a single-level `[*]`/`.*` wildcard over
//! arrays. A wildcard query yields one match per element; callers see
//! the matches as a JSON array.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Field(String),
    Index(usize),
    Wildcard,
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub values: Vec<Value>,
    /// Whether any wildcard segment participated; decides array vs
    /// scalar shape for consumers.
    pub wildcard: bool,
}

impl Selection {
    /// The selection folded into one JSON value: the single match for
    /// plain paths, an array of matches for wildcard paths, `None`
    /// when nothing matched a plain path.
    pub fn into_value(self) -> Option<Value> {
        if self.wildcard {
            Some(Value::Array(self.values))
        } else {
            self.values.into_iter().next()
        }
    }
}

pub fn parse(expr: &str) -> Result<Vec<Segment>, String> {
    let trimmed = expr.trim();
    let rest = trimmed.strip_prefix('$').unwrap_or(trimmed);
    let rest = rest.strip_prefix('.').unwrap_or(rest);
    if rest.is_empty() {
        return if trimmed.starts_with('$') {
            Ok(Vec::new())
        } else {
            Err("empty JSONPath expression".to_string())
        };
    }
    if rest.contains("..") {
        return Err(format!("recursive descent is not supported: '{expr}'"));
    }

    let mut segments = Vec::new();
    let mut field = String::new();
    let mut chars = rest.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !field.is_empty() {
                    push_field(&mut segments, &mut field);
                }
            }
            '[' => {
                if !field.is_empty() {
                    push_field(&mut segments, &mut field);
                }
                let mut inner = String::new();
                for ic in chars.by_ref() {
                    if ic == ']' {
                        break;
                    }
                    inner.push(ic);
                }
                if inner == "*" {
                    segments.push(Segment::Wildcard);
                } else {
                    let index: usize = inner
                        .parse()
                        .map_err(|_| format!("invalid array index '[{inner}]' in '{expr}'"))?;
                    segments.push(Segment::Index(index));
                }
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() {
        push_field(&mut segments, &mut field);
    }
    if segments.is_empty() {
        return Err(format!("empty JSONPath expression: '{expr}'"));
    }
    Ok(segments)
}

fn push_field(segments: &mut Vec<Segment>, field: &mut String) {
    if field == "*" {
        segments.push(Segment::Wildcard);
    } else {
        segments.push(Segment::Field(std::mem::take(field)));
    }
    field.clear();
}

/// Evaluates parsed segments against a root value.
pub fn select(root: &Value, segments: &[Segment]) -> Selection {
    let mut current = vec![root];
    let mut wildcard = false;

    for segment in segments {
        let mut next = Vec::new();
        match segment {
            Segment::Field(name) => {
                for value in current {
                    if let Value::Object(map) = value
                        && let Some(v) = map.get(name)
                    {
                        next.push(v);
                    }
                }
            }
            Segment::Index(i) => {
                for value in current {
                    if let Value::Array(items) = value
                        && let Some(v) = items.get(*i)
                    {
                        next.push(v);
                    }
                }
            }
            Segment::Wildcard => {
                wildcard = true;
                for value in current {
                    if let Value::Array(items) = value {
                        next.extend(items.iter());
                    }
                }
            }
        }
        current = next;
    }

    Selection {
        values: current.into_iter().cloned().collect(),
        wildcard,
    }
}

/// Parse + select in one step.
pub fn query(root: &Value, expr: &str) -> Result<Selection, String> {
    Ok(select(root, &parse(expr)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dotted_and_rooted_forms_are_equivalent() {
        let doc = json!({"data": {"token": "abc"}});
        for expr in ["$.data.token", "data.token"] {
            let v = query(&doc, expr).unwrap().into_value();
            assert_eq!(v, Some(json!("abc")), "expr {expr}");
        }
    }

    #[test]
    fn numeric_indexing() {
        let doc = json!({"users": [{"id": 1}, {"id": 2}]});
        let v = query(&doc, "$.users[1].id").unwrap().into_value();
        assert_eq!(v, Some(json!(2)));
    }

    #[test]
    fn wildcard_yields_array_of_matches() {
        let doc = json!({"items": [{"n": 1}, {"n": 2}, {"n": 3}]});
        let sel = query(&doc, "$.items[*].n").unwrap();
        assert!(sel.wildcard);
        assert_eq!(sel.into_value(), Some(json!([1, 2, 3])));
    }

    #[test]
    fn dot_star_is_a_wildcard() {
        let doc = json!({"items": [1, 2]});
        let v = query(&doc, "items.*").unwrap().into_value();
        assert_eq!(v, Some(json!([1, 2])));
    }

    #[test]
    fn missing_path_selects_nothing() {
        let doc = json!({"a": 1});
        let sel = query(&doc, "$.b.c").unwrap();
        assert_eq!(sel.into_value(), None);
    }

    #[test]
    fn wildcard_on_missing_yields_empty_array() {
        let doc = json!({"a": 1});
        let sel = query(&doc, "$.b[*]").unwrap();
        assert_eq!(sel.into_value(), Some(json!([])));
    }

    #[test]
    fn bare_root_selects_document() {
        let doc = json!({"a": 1});
        let sel = query(&doc, "$").unwrap();
        assert_eq!(sel.into_value(), Some(doc));
    }

    #[test]
    fn rejects_recursive_descent_and_bad_indexes() {
        assert!(parse("$..name").is_err());
        assert!(parse("$.a[x]").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn index_on_object_selects_nothing() {
        let doc = json!({"a": {"b": 1}});
        assert_eq!(query(&doc, "$.a[0]").unwrap().into_value(), None);
    }
}
