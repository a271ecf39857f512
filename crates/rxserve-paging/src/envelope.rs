//! Response envelope and next-link construction.

use crate::request::PagedRequest;
use serde::{Deserialize, Serialize};

/// What a storage adapter hands back for one page.
///
/// Adapters fetch [`PagedRequest::fetch_hint`] rows; `from_probed` turns
/// the overfetch into the has-more flag, so a final page of exactly
/// `$top` items carries no next link. Pages serialize so cacheable list
/// queries can use them as payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: bool,
    pub total_count: Option<u64>,
}

impl<T> Page<T> {
    pub fn from_probed(mut items: Vec<T>, top: u64, total_count: Option<u64>) -> Self {
        let has_more = items.len() as u64 > top;
        items.truncate(top as usize);
        Self {
            items,
            has_more,
            total_count,
        }
    }
}

/// The OData-style paged response body.
#[derive(Debug, Clone, Serialize)]
pub struct PagedEnvelope<T> {
    #[serde(rename = "@odata.context")]
    pub context: String,
    #[serde(rename = "@odata.count", skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(rename = "@odata.nextLink", skip_serializing_if = "Option::is_none")]
    pub next_link: Option<String>,
    pub value: Vec<T>,
}

/// Builds the envelope for a page.
///
/// `path` is the request path without its query string. The next link is
/// present exactly when the adapter saw more rows beyond `skip + top`;
/// it re-emits the request with `$skip` advanced by `top`.
pub fn paged_envelope<T>(
    path: &str,
    set_name: &str,
    request: &PagedRequest,
    page: Page<T>,
) -> PagedEnvelope<T> {
    let next_link = page
        .has_more
        .then(|| next_link(path, request));

    PagedEnvelope {
        context: format!("{path}#{set_name}"),
        count: request.include_count.then_some(page.total_count).flatten(),
        next_link,
        value: page.items,
    }
}

fn next_link(path: &str, request: &PagedRequest) -> String {
    let mut link = format!(
        "{path}?$skip={}&$top={}",
        request.skip + request.top,
        request.top
    );
    if request.include_count {
        link.push_str("&$count=true");
    }
    if !request.order_by.is_empty() {
        let terms: Vec<String> = request.order_by.iter().map(|term| term.render()).collect();
        link.push_str("&$orderby=");
        link.push_str(&terms.join(","));
    }
    link
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::OrderBy;

    fn request(skip: u64, top: u64, include_count: bool) -> PagedRequest {
        PagedRequest {
            skip,
            top,
            include_count,
            order_by: vec![OrderBy {
                field: "orderDate".into(),
                descending: true,
            }],
        }
    }

    #[test]
    fn probe_overflow_sets_has_more_and_truncates() {
        let page = Page::from_probed((0..11).collect::<Vec<_>>(), 10, Some(150));
        assert!(page.has_more);
        assert_eq!(page.items.len(), 10);
    }

    #[test]
    fn exact_final_page_has_no_next_link() {
        let page = Page::from_probed((0..10).collect::<Vec<_>>(), 10, Some(30));
        assert!(!page.has_more);

        let envelope = paged_envelope("/api/v2/orders", "orders", &request(20, 10, true), page);
        assert!(envelope.next_link.is_none());
    }

    #[test]
    fn next_link_advances_skip_and_preserves_the_query() {
        let page = Page::from_probed((0..11).collect::<Vec<_>>(), 10, Some(150));
        let envelope = paged_envelope("/api/v2/orders", "orders", &request(20, 10, true), page);

        assert_eq!(envelope.count, Some(150));
        assert_eq!(envelope.value.len(), 10);
        assert_eq!(
            envelope.next_link.as_deref(),
            Some("/api/v2/orders?$skip=30&$top=10&$count=true&$orderby=orderDate desc")
        );
    }

    #[test]
    fn count_is_omitted_when_not_requested() {
        let page = Page::from_probed(vec![1, 2, 3], 10, Some(3));
        let envelope = paged_envelope("/api/v2/orders", "orders", &request(0, 10, false), page);
        assert_eq!(envelope.count, None);

        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json.get("@odata.count").is_none());
        assert_eq!(json["@odata.context"], "/api/v2/orders#orders");
        assert_eq!(json["value"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn multi_field_order_renders_every_term() {
        let mut req = request(0, 5, false);
        req.order_by.push(OrderBy {
            field: "status".into(),
            descending: false,
        });
        let page = Page::from_probed((0..6).collect::<Vec<_>>(), 5, None);
        let envelope = paged_envelope("/api/v2/orders", "orders", &req, page);
        assert_eq!(
            envelope.next_link.as_deref(),
            Some("/api/v2/orders?$skip=5&$top=5&$orderby=orderDate desc,status")
        );
    }
}
