//! Cache Key Module
//!
//! Structured identity of one logical query: dataset, filters, page window
//! and caller. Equality and hashing are derived; the serialized string form
//! only exists to name and verify durable entries.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::DataError;

// == Year Month ==
/// A calendar month, written `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self, DataError> {
        if !(1..=12).contains(&month) {
            return Err(DataError::InvalidRequest(format!(
                "month out of range: {month}"
            )));
        }
        let candidate = Self { year, month };
        if candidate.bounds().is_none() {
            return Err(DataError::InvalidRequest(format!(
                "year out of range: {year}"
            )));
        }
        Ok(candidate)
    }

    /// Month containing the given date.
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// First and last calendar day, when both are representable.
    fn bounds(&self) -> Option<(NaiveDate, NaiveDate)> {
        let first = NaiveDate::from_ymd_opt(self.year, self.month, 1)?;
        let last = first
            .checked_add_months(Months::new(1))
            .and_then(|next| next.pred_opt())?;
        Some((first, last))
    }

    pub fn first_day(&self) -> NaiveDate {
        self.bounds().map(|(first, _)| first).unwrap_or_default()
    }

    pub fn last_day(&self) -> NaiveDate {
        self.bounds().map(|(_, last)| last).unwrap_or_default()
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DataError::InvalidRequest(format!("expected YYYY-MM, got '{s}'"));
        let (year, month) = s.split_once('-').ok_or_else(invalid)?;
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        Self::new(year, month)
    }
}

impl TryFrom<String> for YearMonth {
    type Error = DataError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<YearMonth> for String {
    fn from(value: YearMonth) -> Self {
        value.to_string()
    }
}

// == Filter Set ==
/// Caller-supplied filters for a dataset query.
///
/// Free-form equality filters live in a `BTreeMap` so two filter sets built in
/// a different insertion order serialize identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_month: Option<YearMonth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub equals: BTreeMap<String, String>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn date_from(mut self, date: NaiveDate) -> Self {
        self.date_from = Some(date);
        self
    }

    pub fn date_to(mut self, date: NaiveDate) -> Self {
        self.date_to = Some(date);
        self
    }

    pub fn reference_month(mut self, month: YearMonth) -> Self {
        self.reference_month = Some(month);
        self
    }

    pub fn team(mut self, team: impl Into<String>) -> Self {
        self.team = Some(team.into());
        self
    }

    pub fn equals(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.equals.insert(column.into(), value.into());
        self
    }

    pub fn has_explicit_range(&self) -> bool {
        self.date_from.is_some() || self.date_to.is_some()
    }
}

// == Cache Key ==
/// Identity of one logical, caller-scoped, paginated query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub dataset: String,
    pub filters: FilterSet,
    pub page: u32,
    pub page_size: u32,
    pub caller: String,
}

impl CacheKey {
    pub fn new(
        dataset: impl Into<String>,
        filters: FilterSet,
        page: u32,
        page_size: u32,
        caller: impl Into<String>,
    ) -> Self {
        Self {
            dataset: dataset.into(),
            filters,
            page,
            page_size,
            caller: caller.into(),
        }
    }

    // == Storage Key ==
    /// Canonical string form, stored inside each durable record.
    pub fn storage_key(&self) -> String {
        // Plain struct of strings, dates and a BTreeMap: serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parses the canonical string form back into a key.
    pub fn from_storage_key(raw: &str) -> Result<Self, DataError> {
        serde_json::from_str(raw).map_err(|e| DataError::Parse(e.to_string()))
    }

    // == Durable Name ==
    /// Name of the durable item holding this key's entry.
    ///
    /// `{prefix}{dataset}.{digest}`: the dataset segment lets invalidation
    /// find a dataset's items by name, the digest keeps names short and
    /// filesystem-safe.
    pub fn durable_name(&self, prefix: &str) -> String {
        let digest = Sha256::digest(self.storage_key().as_bytes());
        format!(
            "{}{}.{}",
            prefix,
            self.dataset,
            &hex::encode(digest)[..32]
        )
    }

    /// Durable name prefix shared by every item of one dataset.
    pub fn dataset_prefix(prefix: &str, dataset: &str) -> String {
        format!("{prefix}{dataset}.")
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[p{}x{}]@{}",
            self.dataset, self.page, self.page_size, self.caller
        )
    }
}
