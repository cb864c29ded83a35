use crate::types::BODY_EVAL_CAP;
use reqwest::{Client, Method};
use std::collections::HashMap;
use std::time::Instant;

/// Fully resolved body ready to send.
#[derive(Debug, Clone)]
pub enum BodyPayload {
    Text {
        content: String,
        content_type: &'static str,
    },
    Form(Vec<(String, String)>),
}

/// Transport-level response. Header keys are lowercased; `body` is
/// capped at 1 MiB for assertion/extractor consumption while `size`
/// counts every byte received.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub size: u64,
}

#[derive(Debug)]
pub enum DispatchOutcome {
    Response {
        response: HttpResponse,
        elapsed_ms: u64,
    },
    TransportError {
        error: String,
        elapsed_ms: u64,
    },
}

/// Sends exactly one HTTP request. Transport failures (DNS, TCP, TLS,
/// timeout, body read) come back as `TransportError` with the time to
/// failure; they are data for the result record, not `Err`s.
pub async fn execute_request(
    client: &Client,
    method: Method,
    url: &str,
    headers: &[(String, String)],
    body: Option<BodyPayload>,
) -> DispatchOutcome {
    let start = Instant::now();

    let mut request = client.request(method, url);
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }
    if !has_header(headers, "user-agent") {
        request = request.header("User-Agent", "rmeter/1");
    }
    if !has_header(headers, "accept") {
        request = request.header("Accept", "*/*");
    }

    match body {
        Some(BodyPayload::Text {
            content,
            content_type,
        }) => {
            if !has_header(headers, "content-type") {
                request = request.header("Content-Type", content_type);
            }
            request = request.body(content);
        }
        Some(BodyPayload::Form(pairs)) => {
            request = request.form(&pairs);
        }
        None => {}
    }

    let response = match request.send().await {
        Ok(r) => r,
        Err(err) => {
            return DispatchOutcome::TransportError {
                error: err.to_string(),
                elapsed_ms: elapsed_ms(start),
            };
        }
    };

    let status = response.status().as_u16();
    let mut header_map: HashMap<String, String> = HashMap::new();
    for (name, value) in response.headers() {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        header_map
            .entry(name.as_str().to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    // Stream the body: keep up to the evaluation cap, drain (and count)
    // the rest so the connection can be reused.
    let mut response = response;
    let mut body_bytes: Vec<u8> = Vec::new();
    let mut size: u64 = 0;
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                size += chunk.len() as u64;
                if body_bytes.len() < BODY_EVAL_CAP {
                    let room = BODY_EVAL_CAP - body_bytes.len();
                    body_bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
                }
            }
            Ok(None) => break,
            Err(err) => {
                return DispatchOutcome::TransportError {
                    error: format!("body read failed: {err}"),
                    elapsed_ms: elapsed_ms(start),
                };
            }
        }
    }

    DispatchOutcome::Response {
        response: HttpResponse {
            status,
            headers: header_map,
            body: body_bytes,
            size,
        },
        elapsed_ms: elapsed_ms(start),
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

fn has_header(headers: &[(String, String)], name: &str) -> bool {
    headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_presence_is_case_insensitive() {
        let headers = vec![("User-Agent".to_string(), "custom/1".to_string())];
        assert!(has_header(&headers, "user-agent"));
        assert!(!has_header(&headers, "accept"));
    }
}
