//! Request DTOs for the gateway API
//!
//! Turns query strings into facade requests.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::access::{QueryRequest, DEFAULT_PAGE_SIZE};
use crate::cache::{FilterSet, YearMonth};
use crate::error::DataError;
use crate::query::validate_column;

/// Prefix marking a free-form equality filter, e.g. `eq.status=open`.
pub const EQUALS_PREFIX: &str = "eq.";

/// Largest page a client may ask for.
pub const MAX_PAGE_SIZE: u32 = 500;

fn parse_param<T: FromStr>(
    params: &HashMap<String, String>,
    name: &str,
) -> Result<Option<T>, DataError> {
    params
        .get(name)
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.parse()
                .map_err(|_| DataError::InvalidRequest(format!("invalid {name}: '{v}'")))
        })
        .transpose()
}

/// Builds a [`QueryRequest`] for `dataset` from the query string of
/// `GET /datasets/:dataset`.
///
/// Recognized parameters: `page`, `page_size`, `date_from`, `date_to`
/// (`YYYY-MM-DD`), `reference_month` (`YYYY-MM`), `team`, and any number of
/// `eq.<column>`. Unknown parameters are ignored.
pub fn dataset_request(
    dataset: &str,
    params: &HashMap<String, String>,
) -> Result<QueryRequest, DataError> {
    let page = parse_param::<u32>(params, "page")?.unwrap_or(1);
    let page_size = parse_param::<u32>(params, "page_size")?.unwrap_or(DEFAULT_PAGE_SIZE);
    if page == 0 || page_size == 0 {
        return Err(DataError::InvalidRequest(
            "page and page_size start at 1".to_string(),
        ));
    }
    if page_size > MAX_PAGE_SIZE {
        return Err(DataError::InvalidRequest(format!(
            "page_size exceeds maximum of {MAX_PAGE_SIZE}"
        )));
    }

    let mut filters = FilterSet::new();
    if let Some(from) = parse_param::<NaiveDate>(params, "date_from")? {
        filters = filters.date_from(from);
    }
    if let Some(to) = parse_param::<NaiveDate>(params, "date_to")? {
        filters = filters.date_to(to);
    }
    if let Some(month) = parse_param::<YearMonth>(params, "reference_month")? {
        filters = filters.reference_month(month);
    }
    if let Some(team) = params.get("team").filter(|t| !t.is_empty()) {
        filters = filters.team(team.clone());
    }
    for (name, value) in params {
        if let Some(column) = name.strip_prefix(EQUALS_PREFIX) {
            validate_column(column)?;
            filters = filters.equals(column, value.clone());
        }
    }

    Ok(QueryRequest::new(dataset)
        .filters(filters)
        .page(page, page_size))
}

/// Query string of `GET /counts`.
#[derive(Debug, Clone, Deserialize)]
pub struct CountsParams {
    /// `YYYY-MM`
    pub month: YearMonth,
    /// Comma-separated dataset ids; every catalog dataset when absent
    #[serde(default)]
    pub datasets: Option<String>,
}

impl CountsParams {
    pub fn dataset_ids(&self) -> Option<Vec<String>> {
        self.datasets.as_ref().map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}
