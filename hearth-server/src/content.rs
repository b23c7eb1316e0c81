//! Content negotiation and the `$convert` operation.
//!
//! The platform speaks JSON only: `_format` wins over `Accept`, XML in any
//! spelling is refused with 406, and `$convert` normalizes a JSON resource
//! after checking the request media type.

use crate::AppState;
use crate::respond::error_response;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use hearth_core::{PlatformError, validation};
use serde_json::Value;
use std::sync::Arc;

/// Media types the platform can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    FhirJson,
    NdJson,
}

impl MediaType {
    pub fn mime_type(&self) -> &'static str {
        match self {
            MediaType::FhirJson => "application/fhir+json; charset=utf-8",
            MediaType::NdJson => "application/fhir+ndjson",
        }
    }
}

/// Decide the response media type from `_format` and `Accept`.
///
/// `_format` takes precedence when present; an unrecognized or XML value is
/// a 406. Without `_format`, the Accept header must name a JSON form or a
/// wildcard.
pub fn negotiate(format: Option<&str>, accept: Option<&str>) -> Result<MediaType, PlatformError> {
    if let Some(format) = format {
        return match format {
            "json" | "application/json" | "application/fhir+json" => Ok(MediaType::FhirJson),
            "xml" | "text/xml" | "application/xml" | "application/fhir+xml" => Err(
                PlatformError::NotAcceptable("XML is not supported; use JSON".to_string()),
            ),
            other => Err(PlatformError::NotAcceptable(format!(
                "unrecognized _format '{}'",
                other
            ))),
        };
    }

    let Some(accept) = accept else {
        return Ok(MediaType::FhirJson);
    };
    for media_type in accept.split(',') {
        let media_type = media_type.trim().split(';').next().unwrap_or("").trim();
        match media_type {
            "application/fhir+json" | "application/json" | "json" | "*/*" | "" => {
                return Ok(MediaType::FhirJson);
            }
            "application/fhir+ndjson" | "application/ndjson" => return Ok(MediaType::NdJson),
            _ => {}
        }
    }
    Err(PlatformError::NotAcceptable(format!(
        "none of the accepted media types are supported: {}",
        accept
    )))
}

fn format_param(query: Option<&str>) -> Option<String> {
    let query = query?;
    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=')
            && key == "_format"
        {
            return Some(
                value
                    .replace("%2F", "/")
                    .replace("%2f", "/")
                    .replace("%2B", "+")
                    .replace("%2b", "+"),
            );
        }
    }
    None
}

/// Middleware enforcing JSON negotiation on every request and stamping
/// FHIR responses with the FHIR media type. CDS Hooks responses stay plain
/// JSON per that protocol.
pub async fn negotiate_middleware(
    State(_state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let format = format_param(request.uri().query());
    let accept = request
        .headers()
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    if let Err(err) = negotiate(format.as_deref(), accept.as_deref()) {
        return error_response(&err);
    }

    let is_cds = request.uri().path().starts_with("/cds-services");
    let mut response = next.run(request).await;
    if !is_cds
        && response
            .headers()
            .get(header::CONTENT_TYPE)
            .is_some_and(|ct| ct.as_bytes() == b"application/json")
    {
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/fhir+json; charset=utf-8"),
        );
    }
    response
}

fn request_is_json(headers: &HeaderMap) -> Result<(), PlatformError> {
    let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    else {
        // absent Content-Type is treated as JSON
        return Ok(());
    };
    let essence = content_type.split(';').next().unwrap_or("").trim();
    match essence {
        "application/fhir+json" | "application/json" | "text/json" => Ok(()),
        other => Err(PlatformError::UnsupportedMedia(format!(
            "cannot convert from '{}'",
            other
        ))),
    }
}

/// POST /$convert — parse and re-emit a resource as canonical FHIR JSON.
pub async fn convert(
    State(_state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if let Err(err) = request_is_json(&headers) {
        return error_response(&err);
    }

    let resource: Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => return error_response(&PlatformError::InvalidJson(e)),
    };

    if let Err(outcome) = validation::ensure_valid(&resource) {
        return error_response(&PlatformError::Structure(
            outcome.issue[0]
                .diagnostics
                .clone()
                .unwrap_or_else(|| "invalid resource".to_string()),
        ));
    }

    Response::builder()
        .header(header::CONTENT_TYPE, MediaType::FhirJson.mime_type())
        .body(Body::from(resource.to_string()))
        .unwrap_or_else(|_| ().into_response())
}
