//! Query Builder
//!
//! Turns (dataset, profile, filters, page) into a concrete, role-scoped,
//! ordered and paginated query description. Pure: identical inputs always
//! produce an identical descriptor.

use chrono::{Months, NaiveDate};
use serde::Serialize;
use tracing::debug;

use crate::cache::FilterSet;
use crate::error::DataError;
use crate::profile::{ProfileRecord, Role};
use crate::query::{DatasetCatalog, DatasetDescriptor, Scoping, CREATED_AT_COLUMN, SECTION_COLUMN, TEAM_COLUMN};

// == Query Descriptor ==
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryDescriptor {
    pub dataset: String,
    pub table: String,
    /// Parent record joined for scoping, if any
    pub join: Option<ParentJoin>,
    pub filters: Vec<Filter>,
    pub order: Vec<OrderBy>,
    pub range: PageRange,
}

/// Inner join to a parent record, projected alongside every row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParentJoin {
    pub relation: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Filter {
    Eq { column: String, value: String },
    Gte { column: String, value: String },
    Lte { column: String, value: String },
}

impl Filter {
    pub fn column(&self) -> &str {
        match self {
            Filter::Eq { column, .. } | Filter::Gte { column, .. } | Filter::Lte { column, .. } => {
                column
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

/// Half-open row window `[offset, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageRange {
    pub offset: u64,
    pub end: u64,
}

impl PageRange {
    /// Window for a 1-indexed page.
    pub fn for_page(page: u32, page_size: u32) -> Self {
        let size = page_size as u64;
        Self {
            offset: (page as u64 - 1) * size,
            end: page as u64 * size,
        }
    }

    pub fn limit(&self) -> u64 {
        self.end - self.offset
    }
}

/// Rejects column names that could smuggle operators into a remote query.
pub fn validate_column(column: &str) -> Result<(), DataError> {
    let valid = !column.is_empty()
        && column
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(DataError::InvalidRequest(format!(
            "invalid filter column '{column}'"
        )))
    }
}

// == Query Builder ==
#[derive(Debug, Clone, Copy)]
pub struct QueryBuilder<'a> {
    catalog: &'a DatasetCatalog,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(catalog: &'a DatasetCatalog) -> Self {
        Self { catalog }
    }

    // == Build ==
    /// Builds the query for one page of `dataset_id` as seen by `profile`.
    ///
    /// `today` anchors the default lookback window.
    ///
    /// # Errors
    /// - [`DataError::UnknownDataset`] if the dataset is not registered
    /// - [`DataError::InvalidRequest`] for a zero page, zero page size, or a
    ///   malformed equality column
    pub fn build(
        &self,
        dataset_id: &str,
        profile: &ProfileRecord,
        filters: &FilterSet,
        page: u32,
        page_size: u32,
        today: NaiveDate,
    ) -> Result<QueryDescriptor, DataError> {
        if page == 0 || page_size == 0 {
            return Err(DataError::InvalidRequest(
                "page and page size start at 1".to_string(),
            ));
        }
        let descriptor = self.catalog.get(dataset_id)?;

        let mut query = QueryDescriptor {
            dataset: descriptor.id.clone(),
            table: descriptor.table.clone(),
            join: match &descriptor.scoping {
                Scoping::Direct => None,
                Scoping::ViaParent { relation, columns } => Some(ParentJoin {
                    relation: relation.clone(),
                    columns: columns.clone(),
                }),
            },
            filters: Vec::new(),
            order: Vec::new(),
            range: PageRange::for_page(page, page_size),
        };

        apply_scope(&mut query, descriptor, &profile.role);
        apply_filters(&mut query, descriptor, filters, today)?;

        query.order = vec![
            OrderBy {
                column: descriptor.date_column.clone(),
                descending: true,
            },
            OrderBy {
                column: CREATED_AT_COLUMN.to_string(),
                descending: true,
            },
        ];

        Ok(query)
    }
}

// == Authorization Scoping ==
fn apply_scope(query: &mut QueryDescriptor, descriptor: &DatasetDescriptor, role: &Role) {
    match role {
        Role::Unscoped => {}
        Role::SectionScoped(section) => query.filters.push(Filter::Eq {
            column: descriptor.scope_column(SECTION_COLUMN),
            value: section.clone(),
        }),
        Role::TeamScoped(team) => query.filters.push(Filter::Eq {
            column: descriptor.scope_column(TEAM_COLUMN),
            value: team.clone(),
        }),
    }
}

// == Caller Filters ==
fn apply_filters(
    query: &mut QueryDescriptor,
    descriptor: &DatasetDescriptor,
    filters: &FilterSet,
    today: NaiveDate,
) -> Result<(), DataError> {
    let date_column = &descriptor.date_column;
    let lookback_start = today
        .checked_sub_months(Months::new(descriptor.lookback_months))
        .unwrap_or(NaiveDate::MIN);

    let (from, to) = if filters.has_explicit_range() {
        if let Some(month) = filters.reference_month {
            debug!(
                "Explicit date range overrides reference month {} on {}",
                month, descriptor.id
            );
        }
        (filters.date_from.unwrap_or(lookback_start), filters.date_to)
    } else if let Some(month) = filters.reference_month {
        (month.first_day(), Some(month.last_day()))
    } else {
        (lookback_start, None)
    };

    query.filters.push(Filter::Gte {
        column: date_column.clone(),
        value: iso_date(from),
    });
    if let Some(to) = to {
        query.filters.push(Filter::Lte {
            column: date_column.clone(),
            value: iso_date(to),
        });
    }

    if let Some(team) = &filters.team {
        query.filters.push(Filter::Eq {
            column: descriptor.scope_column(TEAM_COLUMN),
            value: team.clone(),
        });
    }

    for (column, value) in &filters.equals {
        validate_column(column)?;
        query.filters.push(Filter::Eq {
            column: column.clone(),
            value: value.clone(),
        });
    }

    Ok(())
}

fn iso_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::YearMonth;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    fn profile(role: Role) -> ProfileRecord {
        ProfileRecord {
            role,
            section_id: None,
            team_id: None,
            active: true,
        }
    }

    fn eq(column: &str, value: &str) -> Filter {
        Filter::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    fn gte(column: &str, value: &str) -> Filter {
        Filter::Gte {
            column: column.into(),
            value: value.into(),
        }
    }

    fn lte(column: &str, value: &str) -> Filter {
        Filter::Lte {
            column: column.into(),
            value: value.into(),
        }
    }

    #[test]
    fn test_section_scoped_default_lookback() {
        let catalog = DatasetCatalog::standard();
        let query = QueryBuilder::new(&catalog)
            .build(
                "occurrences",
                &profile(Role::SectionScoped("S1".into())),
                &FilterSet::new(),
                1,
                10,
                today(),
            )
            .unwrap();

        assert_eq!(query.table, "ocorrencias_aeronauticas");
        assert_eq!(
            query.filters,
            vec![
                eq("secao_id", "S1"),
                gte("data_ocorrencia", "2023-06-15"),
            ]
        );
        assert_eq!(query.range, PageRange { offset: 0, end: 10 });
    }

    #[test]
    fn test_exactly_one_scope_filter_per_role() {
        let catalog = DatasetCatalog::standard();
        let builder = QueryBuilder::new(&catalog);

        let unscoped = builder
            .build("trainingHours", &profile(Role::Unscoped), &FilterSet::new(), 1, 10, today())
            .unwrap();
        assert!(unscoped
            .filters
            .iter()
            .all(|f| f.column() != "secao_id" && f.column() != "equipe_id"));

        let team = builder
            .build(
                "trainingHours",
                &profile(Role::TeamScoped("T9".into())),
                &FilterSet::new(),
                1,
                10,
                today(),
            )
            .unwrap();
        assert_eq!(team.filters[0], eq("equipe_id", "T9"));
        assert!(team.filters.iter().all(|f| f.column() != "secao_id"));
    }

    #[test]
    fn test_indirect_scoping_goes_through_parent() {
        let catalog = DatasetCatalog::standard();
        let query = QueryBuilder::new(&catalog)
            .build(
                "fitnessTestResults",
                &profile(Role::SectionScoped("S1".into())),
                &FilterSet::new().team("T2"),
                1,
                20,
                today(),
            )
            .unwrap();

        let join = query.join.as_ref().unwrap();
        assert_eq!(join.relation, "taf_registros");
        assert!(query.filters.contains(&eq("taf_registros.secao_id", "S1")));
        assert!(query.filters.contains(&eq("taf_registros.equipe_id", "T2")));
        assert!(query.filters.contains(&gte("data_taf", "2023-06-15")));
    }

    #[test]
    fn test_explicit_range() {
        let catalog = DatasetCatalog::standard();
        let filters = FilterSet::new()
            .date_from(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
            .date_to(NaiveDate::from_ymd_opt(2024, 3, 31).unwrap());
        let query = QueryBuilder::new(&catalog)
            .build("responseTime", &profile(Role::Unscoped), &filters, 1, 10, today())
            .unwrap();

        assert_eq!(
            query.filters,
            vec![
                gte("data_referencia", "2024-01-01"),
                lte("data_referencia", "2024-03-31"),
            ]
        );
    }

    #[test]
    fn test_upper_bound_only_keeps_lookback() {
        let catalog = DatasetCatalog::standard();
        let filters = FilterSet::new().date_to(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        let query = QueryBuilder::new(&catalog)
            .build("responseTime", &profile(Role::Unscoped), &filters, 1, 10, today())
            .unwrap();

        assert_eq!(
            query.filters,
            vec![
                gte("data_referencia", "2023-06-15"),
                lte("data_referencia", "2024-02-01"),
            ]
        );
    }

    #[test]
    fn test_reference_month_replaces_lookback() {
        let catalog = DatasetCatalog::standard();
        let filters = FilterSet::new().reference_month(YearMonth::new(2024, 2).unwrap());
        let query = QueryBuilder::new(&catalog)
            .build("shiftSwaps", &profile(Role::Unscoped), &filters, 1, 10, today())
            .unwrap();

        assert_eq!(
            query.filters,
            vec![
                gte("data_referencia", "2024-02-01"),
                lte("data_referencia", "2024-02-29"),
            ]
        );
    }

    #[test]
    fn test_explicit_range_wins_over_reference_month() {
        let catalog = DatasetCatalog::standard();
        let filters = FilterSet::new()
            .date_from(NaiveDate::from_ymd_opt(2024, 4, 1).unwrap())
            .reference_month(YearMonth::new(2024, 2).unwrap());
        let query = QueryBuilder::new(&catalog)
            .build("shiftSwaps", &profile(Role::Unscoped), &filters, 1, 10, today())
            .unwrap();

        assert_eq!(query.filters, vec![gte("data_referencia", "2024-04-01")]);
    }

    #[test]
    fn test_ordering_and_pagination() {
        let catalog = DatasetCatalog::standard();
        let query = QueryBuilder::new(&catalog)
            .build("occurrences", &profile(Role::Unscoped), &FilterSet::new(), 3, 25, today())
            .unwrap();

        assert_eq!(
            query.order,
            vec![
                OrderBy {
                    column: "data_ocorrencia".into(),
                    descending: true
                },
                OrderBy {
                    column: "created_at".into(),
                    descending: true
                },
            ]
        );
        assert_eq!(query.range, PageRange { offset: 50, end: 75 });
        assert_eq!(query.range.limit(), 25);
    }

    #[test]
    fn test_equality_filters_are_ordered_and_validated() {
        let catalog = DatasetCatalog::standard();
        let builder = QueryBuilder::new(&catalog);
        let filters = FilterSet::new().equals("status", "open").equals("kind", "fire");

        let query = builder
            .build("occurrences", &profile(Role::Unscoped), &filters, 1, 10, today())
            .unwrap();
        assert_eq!(query.filters[1], eq("kind", "fire"));
        assert_eq!(query.filters[2], eq("status", "open"));

        let hostile = FilterSet::new().equals("id,or(1.eq.1)", "x");
        assert!(matches!(
            builder.build("occurrences", &profile(Role::Unscoped), &hostile, 1, 10, today()),
            Err(DataError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_build_is_deterministic() {
        let catalog = DatasetCatalog::standard();
        let builder = QueryBuilder::new(&catalog);
        let filters = FilterSet::new().team("T1").equals("a", "1");
        let p = profile(Role::SectionScoped("S1".into()));

        let first = builder.build("trainingHours", &p, &filters, 2, 10, today()).unwrap();
        let second = builder.build("trainingHours", &p, &filters, 2, 10, today()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_rejects_unknown_dataset_and_zero_page() {
        let catalog = DatasetCatalog::standard();
        let builder = QueryBuilder::new(&catalog);
        let p = profile(Role::Unscoped);

        assert_eq!(
            builder.build("ghost", &p, &FilterSet::new(), 1, 10, today()),
            Err(DataError::UnknownDataset("ghost".into()))
        );
        assert!(matches!(
            builder.build("occurrences", &p, &FilterSet::new(), 0, 10, today()),
            Err(DataError::InvalidRequest(_))
        ));
    }
}
