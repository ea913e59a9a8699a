//! Dataset Catalog
//!
//! Static metadata for every indicator dataset: which table backs it, which
//! column carries its reference date, and how rows are tied to a section or
//! team for authorization scoping.

use std::collections::BTreeMap;

use tracing::error;

use crate::error::DataError;

/// Column holding a row's section on the remote store.
pub const SECTION_COLUMN: &str = "secao_id";
/// Column holding a row's team on the remote store.
pub const TEAM_COLUMN: &str = "equipe_id";
/// Column used as the ordering tie-break.
pub const CREATED_AT_COLUMN: &str = "created_at";
/// Column stamped on updates.
pub const UPDATED_AT_COLUMN: &str = "updated_at";
/// Primary key column for mutations.
pub const ID_COLUMN: &str = "id";

/// Default lookback when the caller gives no date filter.
pub const DEFAULT_LOOKBACK_MONTHS: u32 = 12;

// == Scoping ==
/// Where the section/team columns used for authorization live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scoping {
    /// On the dataset's own table
    Direct,
    /// On a parent record reached through an inner join
    ViaParent {
        relation: String,
        columns: Vec<String>,
    },
}

// == Dataset Descriptor ==
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetDescriptor {
    pub id: String,
    pub table: String,
    pub date_column: String,
    pub scoping: Scoping,
    pub lookback_months: u32,
}

impl DatasetDescriptor {
    pub fn direct(id: &str, table: &str, date_column: &str) -> Self {
        Self {
            id: id.to_string(),
            table: table.to_string(),
            date_column: date_column.to_string(),
            scoping: Scoping::Direct,
            lookback_months: DEFAULT_LOOKBACK_MONTHS,
        }
    }

    pub fn via_parent(
        id: &str,
        table: &str,
        date_column: &str,
        relation: &str,
        columns: &[&str],
    ) -> Self {
        Self {
            scoping: Scoping::ViaParent {
                relation: relation.to_string(),
                columns: columns.iter().map(|c| c.to_string()).collect(),
            },
            ..Self::direct(id, table, date_column)
        }
    }

    pub fn with_lookback(mut self, months: u32) -> Self {
        self.lookback_months = months;
        self
    }

    /// Qualifies a scoping column (section or team) for this dataset.
    pub fn scope_column(&self, column: &str) -> String {
        match &self.scoping {
            Scoping::Direct => column.to_string(),
            Scoping::ViaParent { relation, .. } => format!("{relation}.{column}"),
        }
    }
}

// == Dataset Catalog ==
/// Registry of known datasets, keyed by dataset identifier.
#[derive(Debug, Clone, Default)]
pub struct DatasetCatalog {
    datasets: BTreeMap<String, DatasetDescriptor>,
}

impl DatasetCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The indicator datasets of the operational dashboard.
    pub fn standard() -> Self {
        let mut catalog = Self::new();
        for descriptor in [
            DatasetDescriptor::direct("occurrences", "ocorrencias_aeronauticas", "data_ocorrencia"),
            DatasetDescriptor::direct(
                "nonAeronauticalOccurrences",
                "ocorrencias_nao_aeronauticas",
                "data_ocorrencia",
            ),
            DatasetDescriptor::direct("fitnessTests", "taf_registros", "data_teste"),
            DatasetDescriptor::via_parent(
                "fitnessTestResults",
                "taf_resultados",
                "data_taf",
                "taf_registros",
                &["id", SECTION_COLUMN, TEAM_COLUMN, "data_teste"],
            ),
            DatasetDescriptor::direct("theoryExams", "ptr_ba_provas_teoricas", "data_referencia"),
            DatasetDescriptor::direct("trainingHours", "ptr_ba_horas_treinamento", "data_referencia"),
            DatasetDescriptor::direct("vehicleInspections", "inspecoes_viatura", "data"),
            DatasetDescriptor::direct("breathingApparatusTime", "tempo_epr", "data_referencia"),
            DatasetDescriptor::direct("responseTime", "tempo_resposta", "data_referencia"),
            DatasetDescriptor::direct(
                "extinguishingAgents",
                "controle_agentes_extintores",
                "data_referencia",
            ),
            DatasetDescriptor::direct("shiftSwaps", "controle_trocas", "data_referencia"),
            DatasetDescriptor::direct("tpVerification", "verificacao_tps", "data_referencia"),
            DatasetDescriptor::direct("tpSanitization", "higienizacao_tps", "data_referencia"),
            DatasetDescriptor::direct(
                "uniformsReceived",
                "controle_uniformes_recebidos",
                "data_referencia",
            ),
            DatasetDescriptor::direct(
                "accessoryActivities",
                "atividades_acessorias",
                "data_referencia",
            ),
        ] {
            catalog.register(descriptor);
        }
        catalog
    }

    /// Adds or replaces a dataset.
    pub fn register(&mut self, descriptor: DatasetDescriptor) {
        self.datasets.insert(descriptor.id.clone(), descriptor);
    }

    // == Get ==
    /// Looks up a dataset.
    ///
    /// An unknown identifier is a caller bug, logged at error level.
    pub fn get(&self, id: &str) -> Result<&DatasetDescriptor, DataError> {
        self.datasets.get(id).ok_or_else(|| {
            error!("Query for unregistered dataset '{}'", id);
            DataError::UnknownDataset(id.to_string())
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.datasets.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.datasets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_catalog() {
        let catalog = DatasetCatalog::standard();
        assert_eq!(catalog.len(), 15);

        let occurrences = catalog.get("occurrences").unwrap();
        assert_eq!(occurrences.date_column, "data_ocorrencia");
        assert_eq!(occurrences.scoping, Scoping::Direct);
        assert_eq!(occurrences.lookback_months, 12);

        let inspections = catalog.get("vehicleInspections").unwrap();
        assert_eq!(inspections.date_column, "data");
    }

    #[test]
    fn test_unknown_dataset() {
        let catalog = DatasetCatalog::standard();
        assert_eq!(
            catalog.get("nope").unwrap_err(),
            DataError::UnknownDataset("nope".to_string())
        );
    }

    #[test]
    fn test_scope_column_qualification() {
        let catalog = DatasetCatalog::standard();

        let direct = catalog.get("trainingHours").unwrap();
        assert_eq!(direct.scope_column(SECTION_COLUMN), "secao_id");

        let joined = catalog.get("fitnessTestResults").unwrap();
        assert_eq!(joined.scope_column(TEAM_COLUMN), "taf_registros.equipe_id");
    }

    #[test]
    fn test_register_replaces() {
        let mut catalog = DatasetCatalog::new();
        catalog.register(DatasetDescriptor::direct("x", "t1", "d"));
        catalog.register(DatasetDescriptor::direct("x", "t2", "d").with_lookback(3));

        let x = catalog.get("x").unwrap();
        assert_eq!(x.table, "t2");
        assert_eq!(x.lookback_months, 3);
        assert_eq!(catalog.ids().collect::<Vec<_>>(), vec!["x"]);
    }
}
