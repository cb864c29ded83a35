//! Assertion evaluation: scores a response against a request's rule
//! list, in list order. A request passes iff every outcome passed
//! (vacuously true with no rules).
//!
//! When the dispatch never produced a response, every rule fails
//! except the purely time-based one, which still computes against the
//! time to failure.

use crate::plan::{Assertion, AssertionRule};
use crate::types::{AssertionOutcome, ResponseView};

pub fn evaluate(assertions: &[Assertion], view: &ResponseView) -> (Vec<AssertionOutcome>, bool) {
    let outcomes: Vec<AssertionOutcome> = assertions
        .iter()
        .map(|a| evaluate_one(a, view))
        .collect();
    let all_passed = outcomes.iter().all(|o| o.passed);
    (outcomes, all_passed)
}

fn evaluate_one(assertion: &Assertion, view: &ResponseView) -> AssertionOutcome {
    if view.transport_failed && !matches!(assertion.rule, AssertionRule::ResponseTimeBelow { .. }) {
        return outcome(assertion, false, "no response (transport error)".into());
    }

    let (passed, message) = match &assertion.rule {
        AssertionRule::StatusCodeEquals { code } => (
            view.status == *code,
            format!("expected status {code}, got {}", view.status),
        ),
        AssertionRule::StatusCodeNotEquals { code } => (
            view.status != *code,
            format!("expected status other than {code}, got {}", view.status),
        ),
        AssertionRule::StatusCodeRange { min, max } => (
            (*min..=*max).contains(&view.status),
            format!("expected status in {min}..={max}, got {}", view.status),
        ),
        AssertionRule::BodyContains { needle } => {
            let body = String::from_utf8_lossy(view.body);
            (
                body.contains(needle.as_str()),
                format!("body does not contain '{needle}'"),
            )
        }
        AssertionRule::BodyNotContains { needle } => {
            let body = String::from_utf8_lossy(view.body);
            (
                !body.contains(needle.as_str()),
                format!("body contains '{needle}'"),
            )
        }
        AssertionRule::JsonPath { path, expected } => {
            return json_path_outcome(assertion, path, expected, view);
        }
        AssertionRule::ResponseTimeBelow { threshold_ms } => (
            view.elapsed_ms < *threshold_ms,
            format!("took {} ms, limit {threshold_ms} ms", view.elapsed_ms),
        ),
        AssertionRule::HeaderEquals { header, value } => match lookup(view, header) {
            Some(actual) => (
                actual == value,
                format!("header '{header}' is '{actual}', expected '{value}'"),
            ),
            None => (false, format!("header '{header}' is missing")),
        },
        AssertionRule::HeaderContains { header, substring } => match lookup(view, header) {
            Some(actual) => (
                actual.contains(substring.as_str()),
                format!("header '{header}' ('{actual}') does not contain '{substring}'"),
            ),
            None => (false, format!("header '{header}' is missing")),
        },
    };

    let message = if passed { "passed".to_string() } else { message };
    outcome(assertion, passed, message)
}

fn json_path_outcome(
    assertion: &Assertion,
    path: &str,
    expected: &serde_json::Value,
    view: &ResponseView,
) -> AssertionOutcome {
    let parsed: serde_json::Value = match serde_json::from_slice(view.body) {
        Ok(v) => v,
        Err(_) => return outcome(assertion, false, "body is not JSON".into()),
    };
    match crate::jsonpath::query(&parsed, path) {
        Ok(selection) => match selection.into_value() {
            Some(actual) if &actual == expected => outcome(assertion, true, "passed".into()),
            Some(actual) => outcome(
                assertion,
                false,
                format!("'{path}' is {actual}, expected {expected}"),
            ),
            None => outcome(assertion, false, format!("'{path}' matched nothing")),
        },
        Err(e) => outcome(assertion, false, e),
    }
}

fn lookup<'a>(view: &'a ResponseView, header: &str) -> Option<&'a String> {
    view.headers.get(&header.to_ascii_lowercase())
}

fn outcome(assertion: &Assertion, passed: bool, message: String) -> AssertionOutcome {
    AssertionOutcome {
        id: assertion.id.clone(),
        name: assertion.name.clone(),
        passed,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn assertion(rule: AssertionRule) -> Assertion {
        Assertion {
            id: "a1".into(),
            name: "check".into(),
            rule,
        }
    }

    fn view<'a>(
        status: u16,
        elapsed_ms: u64,
        headers: &'a HashMap<String, String>,
        body: &'a [u8],
    ) -> ResponseView<'a> {
        ResponseView {
            status,
            elapsed_ms,
            headers,
            body,
            transport_failed: false,
        }
    }

    #[test]
    fn status_rules() {
        let headers = HashMap::new();
        let v = view(200, 1, &headers, b"");
        assert!(evaluate_one(&assertion(AssertionRule::StatusCodeEquals { code: 200 }), &v).passed);
        assert!(
            !evaluate_one(&assertion(AssertionRule::StatusCodeEquals { code: 201 }), &v).passed
        );
        assert!(
            evaluate_one(
                &assertion(AssertionRule::StatusCodeNotEquals { code: 500 }),
                &v
            )
            .passed
        );
        // Range is inclusive on both ends.
        assert!(
            evaluate_one(
                &assertion(AssertionRule::StatusCodeRange { min: 200, max: 200 }),
                &v
            )
            .passed
        );
        assert!(
            !evaluate_one(
                &assertion(AssertionRule::StatusCodeRange { min: 201, max: 299 }),
                &v
            )
            .passed
        );
    }

    #[test]
    fn body_substring_rules_replace_invalid_utf8() {
        let headers = HashMap::new();
        let body = b"hello \xff world".to_vec();
        let v = view(200, 1, &headers, &body);
        assert!(
            evaluate_one(
                &assertion(AssertionRule::BodyContains {
                    needle: "world".into()
                }),
                &v
            )
            .passed
        );
        assert!(
            evaluate_one(
                &assertion(AssertionRule::BodyNotContains {
                    needle: "mars".into()
                }),
                &v
            )
            .passed
        );
    }

    #[test]
    fn json_path_structural_equality() {
        let headers = HashMap::new();
        let body = br#"{"user":{"id":7,"roles":["a","b"]}}"#.to_vec();
        let v = view(200, 1, &headers, &body);
        assert!(
            evaluate_one(
                &assertion(AssertionRule::JsonPath {
                    path: "$.user.id".into(),
                    expected: json!(7)
                }),
                &v
            )
            .passed
        );
        assert!(
            evaluate_one(
                &assertion(AssertionRule::JsonPath {
                    path: "$.user.roles[*]".into(),
                    expected: json!(["a", "b"])
                }),
                &v
            )
            .passed
        );
        let miss = evaluate_one(
            &assertion(AssertionRule::JsonPath {
                path: "$.user.id".into(),
                expected: json!(8),
            }),
            &v,
        );
        assert!(!miss.passed);
    }

    #[test]
    fn non_json_body_fails_json_path() {
        let headers = HashMap::new();
        let v = view(200, 1, &headers, b"<html>");
        let out = evaluate_one(
            &assertion(AssertionRule::JsonPath {
                path: "$.a".into(),
                expected: json!(1),
            }),
            &v,
        );
        assert!(!out.passed);
        assert_eq!(out.message, "body is not JSON");
    }

    #[test]
    fn header_rules_are_name_insensitive_value_sensitive() {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        let v = view(200, 1, &headers, b"");
        assert!(
            evaluate_one(
                &assertion(AssertionRule::HeaderEquals {
                    header: "Content-Type".into(),
                    value: "application/json".into()
                }),
                &v
            )
            .passed
        );
        assert!(
            !evaluate_one(
                &assertion(AssertionRule::HeaderEquals {
                    header: "Content-Type".into(),
                    value: "Application/JSON".into()
                }),
                &v
            )
            .passed
        );
        assert!(
            evaluate_one(
                &assertion(AssertionRule::HeaderContains {
                    header: "CONTENT-TYPE".into(),
                    substring: "json".into()
                }),
                &v
            )
            .passed
        );
    }

    #[test]
    fn transport_failure_fails_all_but_time() {
        let headers = HashMap::new();
        let v = ResponseView {
            status: 0,
            elapsed_ms: 12,
            headers: &headers,
            body: b"",
            transport_failed: true,
        };
        let rules = vec![
            assertion(AssertionRule::StatusCodeEquals { code: 200 }),
            assertion(AssertionRule::BodyContains { needle: "x".into() }),
            assertion(AssertionRule::ResponseTimeBelow { threshold_ms: 100 }),
        ];
        let (outcomes, all) = evaluate(&rules, &v);
        assert!(!all);
        assert!(!outcomes[0].passed);
        assert!(!outcomes[1].passed);
        assert!(outcomes[2].passed);
    }

    #[test]
    fn no_rules_is_vacuously_passing() {
        let headers = HashMap::new();
        let v = view(500, 1, &headers, b"");
        let (outcomes, all) = evaluate(&[], &v);
        assert!(outcomes.is_empty());
        assert!(all);
    }
}
