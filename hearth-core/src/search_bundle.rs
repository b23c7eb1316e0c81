//! Searchset Bundle composition.
//!
//! Builds cursor-paged searchset Bundles from caller-supplied resources and
//! appends reverse-include matches from a pluggable provider.

use crate::resource::{local_reference, resource_id_of, resource_type_of};
use serde_json::{Value, json};

/// Page shaping for a searchset Bundle.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub count: usize,
    pub total: Option<u64>,
    pub has_more: bool,
    /// Opaque token for the next page; empty means no next link.
    pub next_cursor: String,
}

/// Supplies resources that reference any of the given targets, for
/// `_revinclude` composition.
pub trait RevIncludeProvider {
    fn find_by_targets(&self, targets: &[String]) -> Vec<Value>;
}

/// Compose a searchset Bundle with self/next links.
///
/// Entry order mirrors `resources`. The next link is emitted only when the
/// page reports more results and carries a non-empty cursor.
pub fn search_bundle(resources: Vec<Value>, base_url: &str, query: &str, page: &SearchPage) -> Value {
    let entries: Vec<Value> = resources
        .into_iter()
        .map(|r| match_entry(r))
        .collect();

    let self_url = page_url(base_url, query, page.count, None);
    let mut links = vec![json!({"relation": "self", "url": self_url})];
    if page.has_more && !page.next_cursor.is_empty() {
        links.push(json!({
            "relation": "next",
            "url": page_url(base_url, query, page.count, Some(&page.next_cursor)),
        }));
    }

    let mut bundle = json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "link": links,
        "entry": entries,
    });
    if let Some(total) = page.total {
        bundle["total"] = json!(total);
    }
    bundle
}

/// Compose a searchset Bundle and append reverse includes.
///
/// Included resources are deduplicated against the match set and each other
/// and carry `search.mode = "include"`.
pub fn search_bundle_with_rev_includes(
    resources: Vec<Value>,
    base_url: &str,
    query: &str,
    page: &SearchPage,
    provider: &dyn RevIncludeProvider,
) -> Value {
    let targets: Vec<String> = resources.iter().map(local_reference).collect();
    let mut bundle = search_bundle(resources, base_url, query, page);

    let mut seen: Vec<String> = bundle["entry"]
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| e.get("fullUrl").and_then(|v| v.as_str()))
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();

    for included in provider.find_by_targets(&targets) {
        let full_url = local_reference(&included);
        if seen.contains(&full_url) {
            continue;
        }
        seen.push(full_url.clone());
        if let Some(entries) = bundle["entry"].as_array_mut() {
            entries.push(json!({
                "fullUrl": full_url,
                "resource": included,
                "search": {"mode": "include"},
            }));
        }
    }
    bundle
}

fn match_entry(resource: Value) -> Value {
    let full_url = format!(
        "{}/{}",
        resource_type_of(&resource).unwrap_or(""),
        resource_id_of(&resource).unwrap_or("")
    );
    json!({
        "fullUrl": full_url,
        "resource": resource,
        "search": {"mode": "match"},
    })
}

fn page_url(base_url: &str, query: &str, count: usize, cursor: Option<&str>) -> String {
    let mut url = if query.is_empty() {
        format!("{}?_count={}", base_url, count)
    } else {
        format!("{}?{}&_count={}", base_url, query, count)
    };
    if let Some(cursor) = cursor {
        url.push_str("&_pageToken=");
        url.push_str(cursor);
    }
    url
}
