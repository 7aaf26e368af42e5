use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::db::{with_timeout, CompetencyCatalogRepository, StoreError};
use crate::types::CompetencyDefinition;

/// Immutable snapshot of the competency catalog in catalog order.
#[derive(Debug, Clone, Default)]
pub struct CompetencyCatalog {
    definitions: Vec<CompetencyDefinition>,
    by_id: HashMap<String, usize>,
    by_code: HashMap<String, usize>,
}

impl CompetencyCatalog {
    /// Later duplicates of an id are dropped so catalog order stays well defined.
    pub fn new(definitions: Vec<CompetencyDefinition>) -> Self {
        let mut kept = Vec::with_capacity(definitions.len());
        let mut by_id = HashMap::with_capacity(definitions.len());
        let mut by_code = HashMap::with_capacity(definitions.len());

        for definition in definitions {
            if by_id.contains_key(&definition.id) {
                tracing::warn!(competency_id = %definition.id, "duplicate competency id in catalog");
                continue;
            }
            let idx = kept.len();
            by_id.insert(definition.id.clone(), idx);
            by_code.entry(definition.code.clone()).or_insert(idx);
            kept.push(definition);
        }

        Self {
            definitions: kept,
            by_id,
            by_code,
        }
    }

    pub fn get(&self, competency_id: &str) -> Option<&CompetencyDefinition> {
        self.by_id.get(competency_id).map(|idx| &self.definitions[*idx])
    }

    pub fn get_by_code(&self, code: &str) -> Option<&CompetencyDefinition> {
        self.by_code.get(code).map(|idx| &self.definitions[*idx])
    }

    pub fn contains(&self, competency_id: &str) -> bool {
        self.by_id.contains_key(competency_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompetencyDefinition> {
        self.definitions.iter()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

/// Loads the catalog on first use and keeps it for the process lifetime.
/// `reload` is the only way to refresh it.
pub struct CatalogService {
    repository: Arc<dyn CompetencyCatalogRepository>,
    store_timeout: Duration,
    cached: RwLock<Option<Arc<CompetencyCatalog>>>,
}

impl CatalogService {
    pub fn new(repository: Arc<dyn CompetencyCatalogRepository>, store_timeout: Duration) -> Self {
        Self {
            repository,
            store_timeout,
            cached: RwLock::new(None),
        }
    }

    pub async fn catalog(&self) -> Result<Arc<CompetencyCatalog>, StoreError> {
        {
            let cached = self.cached.read().await;
            if let Some(ref catalog) = *cached {
                return Ok(Arc::clone(catalog));
            }
        }

        let mut cached = self.cached.write().await;
        if let Some(ref catalog) = *cached {
            return Ok(Arc::clone(catalog));
        }
        let catalog = self.load().await?;
        *cached = Some(Arc::clone(&catalog));
        Ok(catalog)
    }

    pub async fn reload(&self) -> Result<Arc<CompetencyCatalog>, StoreError> {
        let catalog = self.load().await?;
        let mut cached = self.cached.write().await;
        *cached = Some(Arc::clone(&catalog));
        tracing::info!(competencies = catalog.len(), "competency catalog reloaded");
        Ok(catalog)
    }

    async fn load(&self) -> Result<Arc<CompetencyCatalog>, StoreError> {
        let definitions =
            with_timeout("list_all", self.store_timeout, self.repository.list_all()).await?;
        let catalog = CompetencyCatalog::new(definitions);
        if catalog.is_empty() {
            tracing::warn!("competency catalog is empty; no questions will be allocated");
        } else {
            tracing::debug!(competencies = catalog.len(), "competency catalog loaded");
        }
        Ok(Arc::new(catalog))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::InMemoryCatalogRepository;

    fn definition(id: &str, code: &str) -> CompetencyDefinition {
        CompetencyDefinition {
            id: id.to_string(),
            code: code.to_string(),
            name: format!("Competency {id}"),
            description: None,
        }
    }

    #[test]
    fn test_catalog_lookup_and_order() {
        let catalog = CompetencyCatalog::new(vec![
            definition("b", "B"),
            definition("a", "A"),
            definition("b", "B2"),
        ]);
        assert_eq!(catalog.len(), 2);
        let ids: Vec<&str> = catalog.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(catalog.get_by_code("A").map(|d| d.id.as_str()), Some("a"));
        assert!(catalog.get_by_code("B2").is_none());
    }

    #[tokio::test]
    async fn test_catalog_is_loaded_once() {
        let repo = Arc::new(InMemoryCatalogRepository::new(vec![definition("a", "A")]));
        let service = CatalogService::new(repo.clone(), Duration::from_secs(1));

        service.catalog().await.unwrap();
        service.catalog().await.unwrap();
        assert_eq!(repo.loads(), 1);

        service.reload().await.unwrap();
        assert_eq!(repo.loads(), 2);
    }

    #[tokio::test]
    async fn test_empty_catalog_is_not_an_error() {
        let repo = Arc::new(InMemoryCatalogRepository::new(Vec::new()));
        let service = CatalogService::new(repo, Duration::from_secs(1));
        assert!(service.catalog().await.unwrap().is_empty());
    }
}
