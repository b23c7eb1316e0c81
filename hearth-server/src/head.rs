//! HEAD middleware: answers HEAD by running the GET pipeline, forwarding
//! the headers, and dropping the body.
//!
//! An optional TTL cache keyed by a hash of the request coordinates
//! short-circuits repeated HEAD polls.

use crate::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const RESOURCE_TYPE_HEADER: &str = "x-fhir-resourcetype";
const RESOURCE_ID_HEADER: &str = "x-fhir-resourceid";

#[derive(Clone)]
struct CachedHead {
    status: StatusCode,
    headers: Vec<(HeaderName, HeaderValue)>,
    inserted: Instant,
}

/// Bounded TTL cache of HEAD responses, evicting in insertion order.
pub struct HeadCache {
    entries: Mutex<(HashMap<[u8; 32], CachedHead>, VecDeque<[u8; 32]>)>,
    ttl: Duration,
    capacity: usize,
    /// Derive Content-Length from the captured GET body
    pub set_content_length: bool,
    /// Add X-FHIR-ResourceType / X-FHIR-ResourceId from the parsed body
    pub add_resource_headers: bool,
}

impl HeadCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new((HashMap::new(), VecDeque::new())),
            ttl,
            capacity,
            set_content_length: true,
            add_resource_headers: true,
        }
    }

    fn key(method: &str, path_and_query: &str, headers: &HeaderMap) -> [u8; 32] {
        let header = |name: header::HeaderName| {
            headers
                .get(&name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string()
        };
        let mut hasher = Sha256::new();
        hasher.update(method);
        hasher.update(b"|");
        hasher.update(path_and_query);
        hasher.update(b"|");
        hasher.update(header(header::ACCEPT));
        hasher.update(b"|");
        hasher.update(header(header::IF_NONE_MATCH));
        hasher.update(b"|");
        hasher.update(header(header::IF_MODIFIED_SINCE));
        hasher.finalize().into()
    }

    fn get(&self, key: &[u8; 32]) -> Option<CachedHead> {
        let mut guard = self.entries.lock().unwrap();
        let (entries, _) = &mut *guard;
        match entries.get(key) {
            Some(entry) if entry.inserted.elapsed() < self.ttl => Some(entry.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn insert(&self, key: [u8; 32], entry: CachedHead) {
        let mut guard = self.entries.lock().unwrap();
        let (entries, order) = &mut *guard;
        while entries.len() >= self.capacity {
            match order.pop_front() {
                Some(oldest) => {
                    entries.remove(&oldest);
                }
                None => break,
            }
        }
        if entries.insert(key, entry).is_none() {
            order.push_back(key);
        }
    }
}

impl Default for HeadCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), 256)
    }
}

fn head_response(cached: &CachedHead) -> Response {
    let mut response = Response::builder().status(cached.status);
    if let Some(headers) = response.headers_mut() {
        for (name, value) in &cached.headers {
            headers.append(name.clone(), value.clone());
        }
    }
    response
        .body(Body::empty())
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Middleware rewriting HEAD to GET and shaping the captured response.
pub async fn head_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::HEAD {
        return next.run(request).await;
    }

    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_default();
    let key = HeadCache::key("HEAD", &path_and_query, request.headers());

    if let Some(cached) = state.head_cache.get(&key) {
        tracing::debug!(path = %path_and_query, "HEAD served from cache");
        return head_response(&cached);
    }

    *request.method_mut() = Method::GET;
    let response = next.run(request).await;

    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    let mut headers: Vec<(HeaderName, HeaderValue)> = parts
        .headers
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    if state.head_cache.set_content_length {
        headers.retain(|(name, _)| *name != header::CONTENT_LENGTH);
        if let Ok(value) = HeaderValue::from_str(&bytes.len().to_string()) {
            headers.push((header::CONTENT_LENGTH, value));
        }
    }

    if state.head_cache.add_resource_headers
        && let Ok(resource) = serde_json::from_slice::<Value>(&bytes)
    {
        if let Some(rt) = resource.get("resourceType").and_then(|v| v.as_str())
            && let Ok(value) = HeaderValue::from_str(rt)
        {
            headers.push((HeaderName::from_static(RESOURCE_TYPE_HEADER), value));
        }
        if let Some(id) = resource.get("id").and_then(|v| v.as_str())
            && let Ok(value) = HeaderValue::from_str(id)
        {
            headers.push((HeaderName::from_static(RESOURCE_ID_HEADER), value));
        }
    }

    let cached = CachedHead {
        status: parts.status,
        headers,
        inserted: Instant::now(),
    };
    state.head_cache.insert(key, cached.clone());
    head_response(&cached)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    #[test]
    fn test_key_varies_by_coordinates() {
        let headers = HeaderMap::new();
        let a = HeadCache::key("HEAD", "/Patient/p1", &headers);
        let b = HeadCache::key("HEAD", "/Patient/p2", &headers);
        assert_ne!(a, b);

        let mut with_accept = HeaderMap::new();
        with_accept.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        let c = HeadCache::key("HEAD", "/Patient/p1", &with_accept);
        assert_ne!(a, c);

        let d = HeadCache::key("HEAD", "/Patient/p1", &headers);
        assert_eq!(a, d);
    }

    #[test]
    fn test_cache_ttl_expiry() {
        let cache = HeadCache::new(Duration::from_millis(0), 16);
        let key = [0u8; 32];
        cache.insert(
            key,
            CachedHead {
                status: StatusCode::OK,
                headers: Vec::new(),
                inserted: Instant::now() - Duration::from_secs(1),
            },
        );
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn test_cache_capacity_eviction() {
        let cache = HeadCache::new(Duration::from_secs(60), 2);
        for i in 0u8..3 {
            let mut key = [0u8; 32];
            key[0] = i;
            cache.insert(
                key,
                CachedHead {
                    status: StatusCode::OK,
                    headers: Vec::new(),
                    inserted: Instant::now(),
                },
            );
        }
        // the first inserted key was evicted
        assert!(cache.get(&[0u8; 32]).is_none());
        let mut newest = [0u8; 32];
        newest[0] = 2;
        assert!(cache.get(&newest).is_some());
    }
}
