//! OData-style paging protocol.
//!
//! Parses `$top` / `$skip` / `$count` / `$orderby` with clamping and
//! sort-field whitelisting, and builds the response envelope with its
//! next-link hypermedia. Adapters fetch one row past the page so the
//! final page, even when exactly full, never advertises a next page
//! that would be empty.

mod envelope;
mod request;

pub use envelope::{paged_envelope, Page, PagedEnvelope};
pub use request::{parse_paged_request, OrderBy, PagedRequest, PagingConfig, SortWhitelist};
