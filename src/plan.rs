//! Test-plan data model: the declarative input the engine runs.
//!
//! Plans arrive as UTF-8 JSON (`.rmeter` files) carrying a
//! `format_version`. Unknown fields are tolerated for forward
//! compatibility; unknown rule variants fail deserialization, which is
//! treated as plan validation failure.

use crate::error::{EngineError, ErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

pub const PLAN_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    #[serde(default)]
    pub thread_groups: Vec<ThreadGroup>,
    #[serde(default)]
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub csv_sources: Vec<CsvSource>,
}

fn default_format_version() -> u32 {
    PLAN_FORMAT_VERSION
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadGroup {
    pub id: String,
    pub name: String,
    pub num_threads: u32,
    #[serde(default)]
    pub ramp_up_seconds: u64,
    pub loop_count: LoopPolicy,
    #[serde(default)]
    pub requests: Vec<Request>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub variables: Vec<Variable>,
}

fn default_true() -> bool {
    true
}

/// How many passes over the request list each virtual user makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LoopPolicy {
    Finite { count: u64 },
    Duration { seconds: u64 },
    Infinite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }

    pub fn to_reqwest(&self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Options => reqwest::Method::OPTIONS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub name: String,
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Option<BodyTemplate>,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
    #[serde(default)]
    pub extractors: Vec<Extractor>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Request body variants. Text bodies are template-expanded as a whole;
/// form pairs are expanded pair by pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BodyTemplate {
    JsonText { content: String },
    RawText { content: String },
    XmlText { content: String },
    FormPairs { pairs: Vec<(String, String)> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assertion {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub rule: AssertionRule,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssertionRule {
    StatusCodeEquals { code: u16 },
    StatusCodeNotEquals { code: u16 },
    StatusCodeRange { min: u16, max: u16 },
    BodyContains { needle: String },
    BodyNotContains { needle: String },
    JsonPath { path: String, expected: serde_json::Value },
    ResponseTimeBelow { threshold_ms: u64 },
    HeaderEquals { header: String, value: String },
    HeaderContains { header: String, substring: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Extractor {
    pub id: String,
    pub name: String,
    /// Variable the extracted value is bound to in the iteration scope.
    pub variable: String,
    #[serde(flatten)]
    pub rule: ExtractorRule,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExtractorRule {
    JsonPath { path: String },
    Regex { pattern: String, group: usize },
    Header { header: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableScope {
    Global,
    Plan,
    ThreadGroup,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    pub id: String,
    pub name: String,
    pub value: String,
    #[serde(default = "default_scope")]
    pub scope: VariableScope,
}

fn default_scope() -> VariableScope {
    VariableScope::Plan
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharingMode {
    AllThreads,
    PerThread,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvSource {
    pub id: String,
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub sharing_mode: SharingMode,
    #[serde(default)]
    pub recycle: bool,
}

impl Plan {
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        let plan: Plan = serde_json::from_str(json)
            .map_err(|e| EngineError::validation(format!("invalid plan JSON: {e}")))?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::validation(format!("cannot read plan file {}: {e}", path.display()))
        })?;
        Self::from_json_str(&content)
    }

    /// Groups that will actually run.
    pub fn enabled_groups(&self) -> impl Iterator<Item = &ThreadGroup> {
        self.thread_groups
            .iter()
            .filter(|g| g.enabled && g.requests.iter().any(|r| r.enabled))
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.enabled_groups().next().is_none() {
            return Err(EngineError::new(
                ErrorKind::PlanEmpty,
                "plan has no enabled thread-group with at least one enabled request",
            ));
        }

        let mut source_names = HashSet::new();
        for source in &self.csv_sources {
            if !source_names.insert(source.name.as_str()) {
                return Err(EngineError::validation(format!(
                    "duplicate CSV source name '{}'",
                    source.name
                )));
            }
            for (i, row) in source.rows.iter().enumerate() {
                if row.len() != source.columns.len() {
                    return Err(EngineError::validation(format!(
                        "CSV source '{}': row {} has {} cells, expected {}",
                        source.name,
                        i,
                        row.len(),
                        source.columns.len()
                    )));
                }
            }
        }

        for group in &self.thread_groups {
            group.validate()?;
        }
        Ok(())
    }
}

impl ThreadGroup {
    fn validate(&self) -> Result<(), EngineError> {
        if self.num_threads < 1 {
            return Err(EngineError::validation(format!(
                "thread-group '{}': num_threads must be at least 1",
                self.name
            )));
        }
        match self.loop_count {
            LoopPolicy::Finite { count } if count < 1 => {
                return Err(EngineError::validation(format!(
                    "thread-group '{}': finite loop count must be at least 1",
                    self.name
                )));
            }
            LoopPolicy::Duration { seconds } if seconds < 1 => {
                return Err(EngineError::validation(format!(
                    "thread-group '{}': loop duration must be at least 1 second",
                    self.name
                )));
            }
            _ => {}
        }
        for request in &self.requests {
            request.validate(&self.name)?;
        }
        Ok(())
    }
}

impl Request {
    fn validate(&self, group: &str) -> Result<(), EngineError> {
        for assertion in &self.assertions {
            match &assertion.rule {
                AssertionRule::StatusCodeRange { min, max } => {
                    if min > max || *min < 100 || *max > 599 {
                        return Err(EngineError::validation(format!(
                            "{group}/{}: status range {min}..={max} is outside [100,599] or inverted",
                            self.name
                        )));
                    }
                }
                AssertionRule::ResponseTimeBelow { threshold_ms } => {
                    if *threshold_ms == 0 {
                        return Err(EngineError::validation(format!(
                            "{group}/{}: response-time threshold must be positive",
                            self.name
                        )));
                    }
                }
                AssertionRule::JsonPath { path, .. } => {
                    crate::jsonpath::parse(path).map_err(|e| {
                        EngineError::validation(format!(
                            "{group}/{}: assertion '{}': {e}",
                            self.name, assertion.name
                        ))
                    })?;
                }
                _ => {}
            }
        }
        for extractor in &self.extractors {
            if extractor.variable.is_empty() {
                return Err(EngineError::validation(format!(
                    "{group}/{}: extractor '{}' has an empty variable name",
                    self.name, extractor.name
                )));
            }
            match &extractor.rule {
                ExtractorRule::JsonPath { path } => {
                    crate::jsonpath::parse(path).map_err(|e| {
                        EngineError::validation(format!(
                            "{group}/{}: extractor '{}': {e}",
                            self.name, extractor.name
                        ))
                    })?;
                }
                ExtractorRule::Regex { pattern, .. } => {
                    regex_lite::Regex::new(pattern).map_err(|e| {
                        EngineError::validation(format!(
                            "{group}/{}: extractor '{}': invalid regex: {e}",
                            self.name, extractor.name
                        ))
                    })?;
                }
                ExtractorRule::Header { .. } => {}
            }
        }
        Ok(())
    }

    /// Every template string of this request, for reference scanning.
    pub fn template_strings(&self) -> Vec<&str> {
        let mut out = vec![self.url.as_str()];
        for (name, value) in &self.headers {
            out.push(name.as_str());
            out.push(value.as_str());
        }
        match &self.body {
            Some(BodyTemplate::JsonText { content })
            | Some(BodyTemplate::RawText { content })
            | Some(BodyTemplate::XmlText { content }) => out.push(content.as_str()),
            Some(BodyTemplate::FormPairs { pairs }) => {
                for (k, v) in pairs {
                    out.push(k.as_str());
                    out.push(v.as_str());
                }
            }
            None => {}
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_plan_json() -> String {
        r#"{
            "id": "p1",
            "name": "smoke",
            "format_version": 1,
            "thread_groups": [{
                "id": "g1",
                "name": "main",
                "num_threads": 1,
                "loop_count": {"mode": "finite", "count": 3},
                "requests": [{
                    "id": "r1",
                    "name": "ok",
                    "method": "GET",
                    "url": "http://echo/ok"
                }]
            }]
        }"#
        .to_string()
    }

    #[test]
    fn parses_minimal_plan() {
        let plan = Plan::from_json_str(&minimal_plan_json()).unwrap();
        assert_eq!(plan.id, "p1");
        assert_eq!(plan.thread_groups.len(), 1);
        assert_eq!(
            plan.thread_groups[0].loop_count,
            LoopPolicy::Finite { count: 3 }
        );
        assert!(plan.thread_groups[0].enabled);
        assert!(plan.thread_groups[0].requests[0].enabled);
    }

    #[test]
    fn tolerates_unknown_fields() {
        let json = minimal_plan_json().replacen(
            "\"id\": \"p1\",",
            "\"id\": \"p1\", \"future_field\": {\"x\": 1},",
            1,
        );
        assert!(Plan::from_json_str(&json).is_ok());
    }

    #[test]
    fn unknown_assertion_type_fails() {
        let json = minimal_plan_json().replacen(
            "\"url\": \"http://echo/ok\"",
            r#""url": "http://echo/ok",
               "assertions": [{"id":"a1","name":"x","type":"levenshtein_below","max":3}]"#,
            1,
        );
        let err = Plan::from_json_str(&json).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn empty_plan_is_rejected() {
        let json = r#"{"id":"p","name":"empty","thread_groups":[]}"#;
        let err = Plan::from_json_str(json).unwrap_err();
        assert_eq!(err.kind, ErrorKind::PlanEmpty);
    }

    #[test]
    fn disabled_requests_make_plan_empty() {
        let json = minimal_plan_json().replacen(
            "\"url\": \"http://echo/ok\"",
            "\"url\": \"http://echo/ok\", \"enabled\": false",
            1,
        );
        let err = Plan::from_json_str(&json).unwrap_err();
        assert_eq!(err.kind, ErrorKind::PlanEmpty);
    }

    #[test]
    fn inverted_status_range_is_rejected() {
        let json = minimal_plan_json().replacen(
            "\"url\": \"http://echo/ok\"",
            r#""url": "http://echo/ok",
               "assertions": [{"id":"a1","name":"x","type":"status_code_range","min":400,"max":200}]"#,
            1,
        );
        let err = Plan::from_json_str(&json).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.message.contains("status range"));
    }

    #[test]
    fn ragged_csv_rows_are_rejected() {
        let json = minimal_plan_json().replacen(
            "\"thread_groups\"",
            r#""csv_sources": [{
                "id": "c1", "name": "users",
                "columns": ["username", "password"],
                "rows": [["alice", "pw1"], ["bob"]],
                "sharing_mode": "all_threads"
            }],
            "thread_groups""#,
            1,
        );
        let err = Plan::from_json_str(&json).unwrap_err();
        assert!(err.message.contains("row 1"));
    }

    #[test]
    fn assertion_rules_round_trip() {
        let assertion = Assertion {
            id: "a1".into(),
            name: "status is 200".into(),
            rule: AssertionRule::StatusCodeEquals { code: 200 },
        };
        let json = serde_json::to_string(&assertion).unwrap();
        assert!(json.contains("\"type\":\"status_code_equals\""));
        let back: Assertion = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            back.rule,
            AssertionRule::StatusCodeEquals { code: 200 }
        ));
    }

    #[test]
    fn zero_threads_rejected() {
        let json = minimal_plan_json().replacen("\"num_threads\": 1", "\"num_threads\": 0", 1);
        let err = Plan::from_json_str(&json).unwrap_err();
        assert!(err.message.contains("num_threads"));
    }
}
