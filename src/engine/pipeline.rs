//! Per-request pipeline: template expansion → dispatch → assertion and
//! extractor evaluation → result emission.
//!
//! Emits exactly one result record per executed request. Force-stop
//! drops the in-flight dispatch without emitting.

use crate::assertions;
use crate::extractors;
use crate::http::{self, BodyPayload, DispatchOutcome};
use crate::plan::{BodyTemplate, Request};
use crate::types::{BODY_RECORD_CAP, ResponseView, ResultRecord};
use crate::vars::{self, IterationScope, ScopeStack};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct PipelineContext {
    pub client: reqwest::Client,
    pub scopes: ScopeStack,
    pub group_name: String,
    pub result_tx: mpsc::Sender<ResultRecord>,
    pub kill: CancellationToken,
}

pub enum PipelineOutcome {
    /// Request ran (successfully or not) and its result was emitted.
    Completed { bindings: HashMap<String, String> },
    /// Killed mid-flight or the result channel is gone; no event.
    Aborted,
}

pub async fn execute(
    ctx: &PipelineContext,
    request: &Request,
    iteration: &IterationScope,
) -> PipelineOutcome {
    let timestamp = chrono::Utc::now();
    let url = vars::expand(&request.url, &ctx.scopes, iteration);
    let headers: Vec<(String, String)> = request
        .headers
        .iter()
        .map(|(name, value)| {
            (
                vars::expand(name, &ctx.scopes, iteration),
                vars::expand(value, &ctx.scopes, iteration),
            )
        })
        .collect();
    let body = request
        .body
        .as_ref()
        .map(|b| expand_body(b, &ctx.scopes, iteration));

    let dispatch = http::execute_request(
        &ctx.client,
        request.method.to_reqwest(),
        &url,
        &headers,
        body,
    );

    let outcome = tokio::select! {
        outcome = dispatch => outcome,
        _ = ctx.kill.cancelled() => return PipelineOutcome::Aborted,
    };

    let empty_headers = HashMap::new();
    let (view, response_headers, size, error) = match &outcome {
        DispatchOutcome::Response {
            response,
            elapsed_ms,
        } => (
            ResponseView {
                status: response.status,
                elapsed_ms: *elapsed_ms,
                headers: &response.headers,
                body: &response.body,
                transport_failed: false,
            },
            response.headers.clone(),
            response.size,
            None,
        ),
        DispatchOutcome::TransportError { error, elapsed_ms } => (
            ResponseView {
                status: 0,
                elapsed_ms: *elapsed_ms,
                headers: &empty_headers,
                body: &[],
                transport_failed: true,
            },
            HashMap::new(),
            0,
            Some(error.clone()),
        ),
    };

    let (assertion_outcomes, assertions_passed) = assertions::evaluate(&request.assertions, &view);
    let (extraction_outcomes, bindings) = extractors::evaluate(&request.extractors, &view);

    let body_snippet =
        String::from_utf8_lossy(&view.body[..view.body.len().min(BODY_RECORD_CAP)]).into_owned();

    let record = ResultRecord {
        request_id: request.id.clone(),
        request_name: request.name.clone(),
        group_name: ctx.group_name.clone(),
        timestamp,
        method: request.method.as_str().to_string(),
        url,
        status: view.status,
        elapsed_ms: view.elapsed_ms,
        response_size: size,
        headers: response_headers,
        body: body_snippet,
        assertions: assertion_outcomes,
        assertions_passed,
        extractions: extraction_outcomes,
        error,
    };

    // Bounded channel: block rather than drop so counts stay exact.
    if ctx.result_tx.send(record).await.is_err() {
        return PipelineOutcome::Aborted;
    }

    PipelineOutcome::Completed { bindings }
}

fn expand_body(
    template: &BodyTemplate,
    scopes: &ScopeStack,
    iteration: &IterationScope,
) -> BodyPayload {
    match template {
        BodyTemplate::JsonText { content } => BodyPayload::Text {
            content: vars::expand(content, scopes, iteration),
            content_type: "application/json",
        },
        BodyTemplate::RawText { content } => BodyPayload::Text {
            content: vars::expand(content, scopes, iteration),
            content_type: "text/plain",
        },
        BodyTemplate::XmlText { content } => BodyPayload::Text {
            content: vars::expand(content, scopes, iteration),
            content_type: "application/xml",
        },
        BodyTemplate::FormPairs { pairs } => BodyPayload::Form(
            pairs
                .iter()
                .map(|(k, v)| {
                    (
                        vars::expand(k, scopes, iteration),
                        vars::expand(v, scopes, iteration),
                    )
                })
                .collect(),
        ),
    }
}
