//! REST Remote Store
//!
//! Talks to a PostgREST-style backend: `/auth/v1/user` for session identity,
//! `/rest/v1/<table>` for reads and writes. Pagination uses the `Range`
//! header and exact totals come back in `Content-Range`.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::Record;
use crate::error::DataError;
use crate::profile::Caller;
use crate::query::{Filter, QueryDescriptor, ID_COLUMN, UPDATED_AT_COLUMN};
use crate::remote::{Mutation, Page, ProfileRow, RemoteStore};

/// PostgREST code for "no rows" on a singular read.
const NO_ROWS_CODE: &str = "PGRST116";
/// Postgres code for an RLS refusal.
const INSUFFICIENT_PRIVILEGE_CODE: &str = "42501";

#[derive(Debug, Clone)]
pub struct RestStore {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct SessionUser {
    id: String,
}

/// Profile columns as the backend names them.
#[derive(Debug, Deserialize)]
struct WireProfile {
    perfil: String,
    secao_id: Option<String>,
    equipe_id: Option<String>,
    #[serde(default)]
    ativo: bool,
}

impl From<WireProfile> for ProfileRow {
    fn from(wire: WireProfile) -> Self {
        Self {
            role: wire.perfil,
            section_id: wire.secao_id,
            team_id: wire.equipe_id,
            active: wire.ativo,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct WireError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl RestStore {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authorized(&self, builder: RequestBuilder, caller: &Caller) -> RequestBuilder {
        let token = caller.access_token.as_deref().unwrap_or(&self.api_key);
        builder.header("apikey", &self.api_key).bearer_auth(token)
    }

    fn select_clause(query: &QueryDescriptor) -> String {
        match &query.join {
            Some(join) => format!("*,{}!inner({})", join.relation, join.columns.join(",")),
            None => "*".to_string(),
        }
    }

    fn query_params(query: &QueryDescriptor) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), Self::select_clause(query))];
        for filter in &query.filters {
            let (column, operand) = match filter {
                Filter::Eq { column, value } => (column, format!("eq.{value}")),
                Filter::Gte { column, value } => (column, format!("gte.{value}")),
                Filter::Lte { column, value } => (column, format!("lte.{value}")),
            };
            params.push((column.clone(), operand));
        }
        if !query.order.is_empty() {
            let order = query
                .order
                .iter()
                .map(|o| format!("{}.{}", o.column, if o.descending { "desc" } else { "asc" }))
                .collect::<Vec<_>>()
                .join(",");
            params.push(("order".to_string(), order));
        }
        params
    }

    async fn send(builder: RequestBuilder) -> Result<Response, DataError> {
        builder
            .send()
            .await
            .map_err(|e| DataError::Network(e.to_string()))
    }

    async fn fetch_window(
        &self,
        caller: &Caller,
        query: &QueryDescriptor,
        first: u64,
        last: u64,
    ) -> Result<(Vec<Record>, u64), DataError> {
        let request = self
            .client
            .get(self.table_url(&query.table))
            .query(&Self::query_params(query))
            .header("Range-Unit", "items")
            .header("Range", format!("{first}-{last}"))
            .header("Prefer", "count=exact");
        let response = Self::send(self.authorized(request, caller)).await?;

        let status = response.status();
        let content_range = response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| DataError::Network(e.to_string()))?;

        read_window(status, content_range.as_deref(), &body)
    }
}

/// Interprets the response to a ranged read as `(rows, exact total)`.
///
/// A window past the last row (416, or PGRST116 for a single-row read) is an
/// empty page; the total still comes from `Content-Range: */42`.
fn read_window(
    status: StatusCode,
    content_range: Option<&str>,
    body: &str,
) -> Result<(Vec<Record>, u64), DataError> {
    let total = content_range.and_then(parse_total);

    if !status.is_success() {
        let failure: WireError = serde_json::from_str(body).unwrap_or_default();
        if failure.code.as_deref() == Some(NO_ROWS_CODE)
            || status == StatusCode::RANGE_NOT_SATISFIABLE
        {
            return Ok((Vec::new(), total.unwrap_or(0)));
        }
        return Err(classify(status, failure, false));
    }

    let rows = parse_rows(body)?;
    let total = total.unwrap_or(rows.len() as u64);
    Ok((rows, total))
}

/// Maps a refused response onto the caller-facing taxonomy.
fn classify(status: StatusCode, failure: WireError, write: bool) -> DataError {
    let message = failure
        .message
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());

    if status == StatusCode::UNAUTHORIZED || message.contains("JWT") {
        return DataError::AuthExpired;
    }
    if status == StatusCode::FORBIDDEN
        || failure.code.as_deref() == Some(INSUFFICIENT_PRIVILEGE_CODE)
    {
        return DataError::PermissionDenied(message);
    }
    if status.is_server_error() {
        return DataError::Network(format!("backend returned {status}: {message}"));
    }
    if write {
        DataError::Mutation(message)
    } else {
        DataError::InvalidRequest(message)
    }
}

fn parse_rows(body: &str) -> Result<Vec<Record>, DataError> {
    let value: Value = serde_json::from_str(body).map_err(|e| DataError::Parse(e.to_string()))?;
    let Value::Array(items) = value else {
        return Err(DataError::Parse("expected a JSON array of rows".to_string()));
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(record) => Ok(record),
            other => Err(DataError::Parse(format!("row is not an object: {other}"))),
        })
        .collect()
}

/// Reads the total out of `Content-Range: 0-9/42` or `*/0`.
fn parse_total(content_range: &str) -> Option<u64> {
    content_range.rsplit('/').next()?.trim().parse().ok()
}

#[async_trait]
impl RemoteStore for RestStore {
    async fn identify(&self, access_token: &str) -> Result<String, DataError> {
        let request = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.api_key)
            .bearer_auth(access_token);
        let response = Self::send(request).await?;

        let status = response.status();
        if !status.is_success() {
            let failure = response.json::<WireError>().await.unwrap_or_default();
            return Err(match classify(status, failure, false) {
                DataError::InvalidRequest(_) | DataError::PermissionDenied(_) => {
                    DataError::AuthExpired
                }
                other => other,
            });
        }

        let user: SessionUser = response
            .json()
            .await
            .map_err(|e| DataError::Parse(e.to_string()))?;
        Ok(user.id)
    }

    async fn fetch_profile(&self, caller: &Caller) -> Result<Option<ProfileRow>, DataError> {
        let request = self
            .client
            .get(self.table_url("profiles"))
            .query(&[
                ("id", format!("eq.{}", caller.id)),
                ("select", "perfil,secao_id,equipe_id,ativo".to_string()),
            ]);
        let response = Self::send(self.authorized(request, caller)).await?;

        let status = response.status();
        if !status.is_success() {
            let failure = response.json::<WireError>().await.unwrap_or_default();
            if failure.code.as_deref() == Some(NO_ROWS_CODE) {
                return Ok(None);
            }
            return Err(classify(status, failure, false));
        }

        let rows: Vec<WireProfile> = response
            .json()
            .await
            .map_err(|e| DataError::Parse(e.to_string()))?;
        Ok(rows.into_iter().next().map(ProfileRow::from))
    }

    async fn fetch_page(
        &self,
        caller: &Caller,
        query: &QueryDescriptor,
    ) -> Result<Page, DataError> {
        let last = query.range.end.saturating_sub(1);
        let (rows, total) = self
            .fetch_window(caller, query, query.range.offset, last)
            .await?;
        debug!("Fetched {} rows of {} from {}", rows.len(), total, query.table);
        Ok(Page { rows, total })
    }

    async fn count(&self, caller: &Caller, query: &QueryDescriptor) -> Result<u64, DataError> {
        let (_, total) = self.fetch_window(caller, query, 0, 0).await?;
        Ok(total)
    }

    async fn apply(
        &self,
        caller: &Caller,
        table: &str,
        mutation: &Mutation,
    ) -> Result<(), DataError> {
        let url = self.table_url(table);
        let request = match mutation {
            Mutation::Create { record } => self.client.post(url).json(record),
            Mutation::Update { id, changes } => {
                let mut changes = changes.clone();
                changes.insert(
                    UPDATED_AT_COLUMN.to_string(),
                    Value::String(Utc::now().to_rfc3339()),
                );
                self.client
                    .patch(url)
                    .query(&[(ID_COLUMN, format!("eq.{id}"))])
                    .json(&changes)
            }
            Mutation::Delete { id } => self
                .client
                .delete(url)
                .query(&[(ID_COLUMN, format!("eq.{id}"))]),
        };
        let response = Self::send(self.authorized(request, caller)).await?;

        let status = response.status();
        if !status.is_success() {
            let failure = response.json::<WireError>().await.unwrap_or_default();
            let error = classify(status, failure, true);
            warn!("Write to {} refused: {}", table, error);
            return Err(error);
        }
        Ok(())
    }
}
