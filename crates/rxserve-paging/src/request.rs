//! Query-parameter parsing and clamping.

use rxserve_core::{FailureKind, FieldErrors};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Pagination knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct PagingConfig {
    /// `$top` when the caller omits it.
    pub default_page_size: u64,
    /// `$top` ceiling.
    pub max_page_size: u64,
    /// `$count` when the caller omits it.
    pub default_include_count: bool,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            max_page_size: 100,
            default_include_count: false,
        }
    }
}

/// One `$orderby` term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

impl OrderBy {
    /// Renders the term back into `$orderby` syntax.
    pub fn render(&self) -> String {
        if self.descending {
            format!("{} desc", self.field)
        } else {
            self.field.clone()
        }
    }
}

/// Sortable field names a collection advertises.
///
/// Sorting on anything else is refused: an unsanitized sort target is
/// both an injection surface and an unindexed-scan hazard.
#[derive(Debug, Clone)]
pub struct SortWhitelist {
    fields: Vec<&'static str>,
}

impl SortWhitelist {
    pub fn new(fields: impl IntoIterator<Item = &'static str>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    /// A collection with no sortable fields.
    pub fn empty() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn allows(&self, field: &str) -> bool {
        self.fields.contains(&field)
    }
}

/// A parsed, clamped page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagedRequest {
    pub skip: u64,
    pub top: u64,
    pub include_count: bool,
    /// Every parsed `$orderby` term in caller order. Adapters apply the
    /// first unless they advertise multi-field support.
    pub order_by: Vec<OrderBy>,
}

impl PagedRequest {
    /// The first sort term, the one adapters are required to honor.
    pub fn primary_order(&self) -> Option<&OrderBy> {
        self.order_by.first()
    }

    /// Rows an adapter should fetch: one past the page, so the presence
    /// of a following page is known without a second query.
    pub fn fetch_hint(&self) -> u64 {
        self.top + 1
    }
}

/// Parses the recognised parameters out of a query-string map.
///
/// `$top` is clamped to `[1, MaxPageSize]` and negative `$skip` becomes
/// 0; values that fail to parse at all are validation errors, as are
/// sort fields outside the whitelist.
pub fn parse_paged_request(
    params: &HashMap<String, String>,
    config: &PagingConfig,
    whitelist: &SortWhitelist,
) -> Result<PagedRequest, FailureKind> {
    let mut errors = FieldErrors::new();

    let top = match params.get("$top") {
        None => config.default_page_size,
        Some(raw) => match raw.parse::<i64>() {
            Ok(value) => value.clamp(1, config.max_page_size.min(i64::MAX as u64) as i64) as u64,
            Err(_) => {
                errors.push("$top", "must be an integer");
                config.default_page_size
            }
        },
    };

    let skip = match params.get("$skip") {
        None => 0,
        Some(raw) => match raw.parse::<i64>() {
            Ok(value) => value.max(0) as u64,
            Err(_) => {
                errors.push("$skip", "must be an integer");
                0
            }
        },
    };

    let include_count = match params.get("$count") {
        None => config.default_include_count,
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "true" => true,
            "false" => false,
            _ => {
                errors.push("$count", "must be 'true' or 'false'");
                config.default_include_count
            }
        },
    };

    let mut order_by = Vec::new();
    if let Some(raw) = params.get("$orderby") {
        for term in raw.split(',') {
            let mut tokens = term.split_whitespace();
            let Some(field) = tokens.next() else {
                errors.push("$orderby", "contains an empty term");
                continue;
            };
            let descending = match tokens.next() {
                None => false,
                Some(direction) if direction.eq_ignore_ascii_case("asc") => false,
                Some(direction) if direction.eq_ignore_ascii_case("desc") => true,
                Some(direction) => {
                    errors.push("$orderby", format!("unknown direction '{direction}'"));
                    false
                }
            };
            if tokens.next().is_some() {
                errors.push("$orderby", format!("malformed term '{}'", term.trim()));
                continue;
            }
            if !whitelist.allows(field) {
                errors.push("$orderby", format!("field '{field}' is not sortable"));
                continue;
            }
            order_by.push(OrderBy {
                field: field.to_string(),
                descending,
            });
        }
    }

    errors.into_result()?;

    Ok(PagedRequest {
        skip,
        top,
        include_count,
        order_by,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn orders_whitelist() -> SortWhitelist {
        SortWhitelist::new(["orderDate", "status"])
    }

    #[test]
    fn defaults_apply_when_parameters_are_absent() {
        let request =
            parse_paged_request(&params(&[]), &PagingConfig::default(), &orders_whitelist())
                .unwrap();
        assert_eq!(request.top, 20);
        assert_eq!(request.skip, 0);
        assert!(!request.include_count);
        assert!(request.order_by.is_empty());
    }

    #[test]
    fn top_is_clamped_into_range() {
        let config = PagingConfig::default();
        let whitelist = orders_whitelist();

        let over = parse_paged_request(&params(&[("$top", "5000")]), &config, &whitelist).unwrap();
        assert_eq!(over.top, 100);

        let zero = parse_paged_request(&params(&[("$top", "0")]), &config, &whitelist).unwrap();
        assert_eq!(zero.top, 1);

        let negative =
            parse_paged_request(&params(&[("$top", "-3")]), &config, &whitelist).unwrap();
        assert_eq!(negative.top, 1);
    }

    #[test]
    fn negative_skip_becomes_zero() {
        let request = parse_paged_request(
            &params(&[("$skip", "-10")]),
            &PagingConfig::default(),
            &orders_whitelist(),
        )
        .unwrap();
        assert_eq!(request.skip, 0);
    }

    #[test]
    fn unparsable_values_are_validation_errors() {
        let outcome = parse_paged_request(
            &params(&[("$top", "ten"), ("$count", "maybe")]),
            &PagingConfig::default(),
            &orders_whitelist(),
        );
        let Err(FailureKind::Validation(errors)) = outcome else {
            panic!("expected validation failure");
        };
        let fields: Vec<_> = errors.iter().map(|(field, _)| field).collect();
        assert!(fields.contains(&"$top"));
        assert!(fields.contains(&"$count"));
    }

    #[test]
    fn orderby_parses_direction_and_keeps_term_order() {
        let request = parse_paged_request(
            &params(&[("$orderby", "orderDate desc, status")]),
            &PagingConfig::default(),
            &orders_whitelist(),
        )
        .unwrap();

        assert_eq!(request.order_by.len(), 2);
        assert_eq!(
            request.primary_order(),
            Some(&OrderBy {
                field: "orderDate".into(),
                descending: true,
            })
        );
        assert!(!request.order_by[1].descending);
    }

    #[test]
    fn off_whitelist_sort_fields_are_rejected() {
        let outcome = parse_paged_request(
            &params(&[("$orderby", "ssn desc")]),
            &PagingConfig::default(),
            &orders_whitelist(),
        );
        let Err(FailureKind::Validation(errors)) = outcome else {
            panic!("expected validation failure");
        };
        let (_, messages) = errors.iter().next().unwrap();
        assert!(messages[0].contains("ssn"));
    }

    #[test]
    fn count_accepts_either_case() {
        let request = parse_paged_request(
            &params(&[("$count", "True")]),
            &PagingConfig::default(),
            &orders_whitelist(),
        )
        .unwrap();
        assert!(request.include_count);
    }

    #[test]
    fn fetch_hint_probes_one_past_the_page() {
        let request =
            parse_paged_request(&params(&[("$top", "10")]), &PagingConfig::default(), &orders_whitelist())
                .unwrap();
        assert_eq!(request.fetch_hint(), 11);
    }
}
