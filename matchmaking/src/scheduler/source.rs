//! Read-only access to offer and demand records.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::entities::{DemandEntity, OfferEntity};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("entity source unavailable: {0}")]
    Unavailable(String),

    #[error("malformed entity record: {0}")]
    Malformed(String),
}

/// Entities created or updated after some instant.
#[derive(Debug, Clone, Default)]
pub struct ChangedEntities {
    pub offers: Vec<Arc<OfferEntity>>,
    pub demands: Vec<Arc<DemandEntity>>,
}

impl ChangedEntities {
    pub fn is_empty(&self) -> bool {
        self.offers.is_empty() && self.demands.is_empty()
    }
}

/// Where the scheduler reads entities from. Owned by the profile
/// management side; this crate never writes through it.
#[async_trait]
pub trait EntitySource: Send + Sync {
    async fn offers(&self) -> Result<Vec<Arc<OfferEntity>>, SourceError>;

    async fn demands(&self) -> Result<Vec<Arc<DemandEntity>>, SourceError>;

    async fn offer(&self, id: &str) -> Result<Option<Arc<OfferEntity>>, SourceError> {
        Ok(self.offers().await?.into_iter().find(|o| o.id == id))
    }

    async fn demand(&self, id: &str) -> Result<Option<Arc<DemandEntity>>, SourceError> {
        Ok(self.demands().await?.into_iter().find(|d| d.id == id))
    }

    /// Entities whose `updated_at` is strictly after `since`.
    async fn changed_since(&self, since: DateTime<Utc>) -> Result<ChangedEntities, SourceError> {
        Ok(ChangedEntities {
            offers: self
                .offers()
                .await?
                .into_iter()
                .filter(|o| o.updated_at > since)
                .collect(),
            demands: self
                .demands()
                .await?
                .into_iter()
                .filter(|d| d.updated_at > since)
                .collect(),
        })
    }
}

/// Entity store held in memory, keyed by id.
#[derive(Debug, Default)]
pub struct InMemoryEntitySource {
    offers: RwLock<BTreeMap<String, Arc<OfferEntity>>>,
    demands: RwLock<BTreeMap<String, Arc<DemandEntity>>>,
}

impl InMemoryEntitySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entities(offers: Vec<OfferEntity>, demands: Vec<DemandEntity>) -> Self {
        Self {
            offers: RwLock::new(
                offers
                    .into_iter()
                    .map(|o| (o.id.clone(), Arc::new(o)))
                    .collect(),
            ),
            demands: RwLock::new(
                demands
                    .into_iter()
                    .map(|d| (d.id.clone(), Arc::new(d)))
                    .collect(),
            ),
        }
    }

    pub async fn upsert_offer(&self, offer: OfferEntity) {
        self.offers
            .write()
            .await
            .insert(offer.id.clone(), Arc::new(offer));
    }

    pub async fn upsert_demand(&self, demand: DemandEntity) {
        self.demands
            .write()
            .await
            .insert(demand.id.clone(), Arc::new(demand));
    }

    pub async fn remove_offer(&self, id: &str) -> bool {
        self.offers.write().await.remove(id).is_some()
    }

    pub async fn remove_demand(&self, id: &str) -> bool {
        self.demands.write().await.remove(id).is_some()
    }
}

#[async_trait]
impl EntitySource for InMemoryEntitySource {
    async fn offers(&self) -> Result<Vec<Arc<OfferEntity>>, SourceError> {
        Ok(self.offers.read().await.values().cloned().collect())
    }

    async fn demands(&self) -> Result<Vec<Arc<DemandEntity>>, SourceError> {
        Ok(self.demands.read().await.values().cloned().collect())
    }

    async fn offer(&self, id: &str) -> Result<Option<Arc<OfferEntity>>, SourceError> {
        Ok(self.offers.read().await.get(id).cloned())
    }

    async fn demand(&self, id: &str) -> Result<Option<Arc<DemandEntity>>, SourceError> {
        Ok(self.demands.read().await.get(id).cloned())
    }
}
