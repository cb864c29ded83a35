//! Extractor evaluation: pulls values out of a response into the VU's
//! iteration scope. A failed extraction records its outcome and binds
//! nothing; it never aborts the request pipeline.

use crate::plan::{Extractor, ExtractorRule};
use crate::types::{ExtractionOutcome, ResponseView};
use std::collections::HashMap;

pub fn evaluate(
    extractors: &[Extractor],
    view: &ResponseView,
) -> (Vec<ExtractionOutcome>, HashMap<String, String>) {
    let mut outcomes = Vec::with_capacity(extractors.len());
    let mut bindings = HashMap::new();

    for extractor in extractors {
        let outcome = evaluate_one(extractor, view);
        if outcome.success
            && let Some(value) = &outcome.value
        {
            bindings.insert(extractor.variable.clone(), value.clone());
        }
        outcomes.push(outcome);
    }

    (outcomes, bindings)
}

fn evaluate_one(extractor: &Extractor, view: &ResponseView) -> ExtractionOutcome {
    let result = match &extractor.rule {
        ExtractorRule::JsonPath { path } => extract_json_path(path, view),
        ExtractorRule::Regex { pattern, group } => extract_regex(pattern, *group, view),
        ExtractorRule::Header { header } => view
            .headers
            .get(&header.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| format!("header '{header}' is missing")),
    };

    match result {
        Ok(value) => ExtractionOutcome {
            id: extractor.id.clone(),
            name: extractor.name.clone(),
            variable: extractor.variable.clone(),
            success: true,
            value: Some(value),
            message: "extracted".into(),
        },
        Err(message) => ExtractionOutcome {
            id: extractor.id.clone(),
            name: extractor.name.clone(),
            variable: extractor.variable.clone(),
            success: false,
            value: None,
            message,
        },
    }
}

fn extract_json_path(path: &str, view: &ResponseView) -> Result<String, String> {
    let parsed: serde_json::Value =
        serde_json::from_slice(view.body).map_err(|_| "body is not JSON".to_string())?;
    let selection = crate::jsonpath::query(&parsed, path)?;
    match selection.into_value() {
        Some(value) => scalar_to_string(&value)
            .ok_or_else(|| format!("'{path}' selected a non-scalar value")),
        None => Err(format!("'{path}' matched nothing")),
    }
}

/// Strings bind unquoted; numbers and booleans bind their JSON text;
/// null, arrays, and objects are non-scalar.
fn scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn extract_regex(pattern: &str, group: usize, view: &ResponseView) -> Result<String, String> {
    let re = regex_lite::Regex::new(pattern).map_err(|e| format!("invalid regex: {e}"))?;
    let body = String::from_utf8_lossy(view.body);
    let captures = re
        .captures(&body)
        .ok_or_else(|| format!("pattern '{pattern}' found no match"))?;
    captures
        .get(group)
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| format!("pattern '{pattern}' has no capture group {group}"))
}
