//! Portfolio persistence boundary
//!
//! The core never touches chat storage; the only persistent record it
//! reaches (through tool calls) is the per-user portfolio. Currently
//! in-memory; can be replaced with a database-backed implementation.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockHolding {
    pub stock: String,
    pub holding: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub user_id: Uuid,
    pub stocks: Vec<StockHolding>,
}

/// Result of a portfolio write. `AlreadyApplied` means the idempotency key
/// was seen before and the write was acknowledged without re-applying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    AlreadyApplied,
    NotFound,
}

/// Trait for portfolio persistence
#[async_trait::async_trait]
pub trait PortfolioStore: Send + Sync {
    async fn load(&self, user_id: Uuid) -> Result<Option<PortfolioSnapshot>>;

    async fn add_stock(
        &self,
        user_id: Uuid,
        stock: &str,
        holding: i64,
        idempotency_key: Uuid,
    ) -> Result<WriteOutcome>;

    async fn delete_stock(
        &self,
        user_id: Uuid,
        stock: &str,
        idempotency_key: Uuid,
    ) -> Result<WriteOutcome>;
}

/// In-memory portfolio store for development
pub struct InMemoryPortfolioStore {
    portfolios: Arc<RwLock<HashMap<Uuid, PortfolioSnapshot>>>,
    applied_keys: Arc<RwLock<HashSet<Uuid>>>,
}

impl InMemoryPortfolioStore {
    pub fn new() -> Self {
        Self {
            portfolios: Arc::new(RwLock::new(HashMap::new())),
            applied_keys: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Seed a portfolio directly (test/bootstrap helper).
    pub async fn seed(&self, user_id: Uuid, stocks: Vec<StockHolding>) {
        let mut portfolios = self.portfolios.write().await;
        portfolios.insert(user_id, PortfolioSnapshot { user_id, stocks });
    }

    async fn claim_key(&self, idempotency_key: Uuid) -> bool {
        let mut keys = self.applied_keys.write().await;
        keys.insert(idempotency_key)
    }
}

impl Default for InMemoryPortfolioStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PortfolioStore for InMemoryPortfolioStore {
    async fn load(&self, user_id: Uuid) -> Result<Option<PortfolioSnapshot>> {
        let portfolios = self.portfolios.read().await;
        Ok(portfolios.get(&user_id).cloned())
    }

    async fn add_stock(
        &self,
        user_id: Uuid,
        stock: &str,
        holding: i64,
        idempotency_key: Uuid,
    ) -> Result<WriteOutcome> {
        if !self.claim_key(idempotency_key).await {
            return Ok(WriteOutcome::AlreadyApplied);
        }

        let mut portfolios = self.portfolios.write().await;
        let snapshot = portfolios
            .entry(user_id)
            .or_insert_with(|| PortfolioSnapshot {
                user_id,
                stocks: Vec::new(),
            });
        snapshot.stocks.push(StockHolding {
            stock: stock.to_string(),
            holding,
        });

        Ok(WriteOutcome::Applied)
    }

    async fn delete_stock(
        &self,
        user_id: Uuid,
        stock: &str,
        idempotency_key: Uuid,
    ) -> Result<WriteOutcome> {
        if !self.claim_key(idempotency_key).await {
            return Ok(WriteOutcome::AlreadyApplied);
        }

        let mut portfolios = self.portfolios.write().await;
        let Some(snapshot) = portfolios.get_mut(&user_id) else {
            return Ok(WriteOutcome::NotFound);
        };

        let before = snapshot.stocks.len();
        snapshot.stocks.retain(|entry| entry.stock != stock);

        if snapshot.stocks.len() == before {
            Ok(WriteOutcome::NotFound)
        } else {
            Ok(WriteOutcome::Applied)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_then_load_roundtrip() {
        let store = InMemoryPortfolioStore::new();
        let user_id = Uuid::new_v4();

        let outcome = store
            .add_stock(user_id, "ACME", 10, Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Applied);

        let snapshot = store.load(user_id).await.unwrap().unwrap();
        assert_eq!(snapshot.stocks.len(), 1);
        assert_eq!(snapshot.stocks[0].stock, "ACME");
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_is_not_reapplied() {
        let store = InMemoryPortfolioStore::new();
        let user_id = Uuid::new_v4();
        let key = Uuid::new_v4();

        assert_eq!(
            store.add_stock(user_id, "ACME", 10, key).await.unwrap(),
            WriteOutcome::Applied
        );
        assert_eq!(
            store.add_stock(user_id, "ACME", 10, key).await.unwrap(),
            WriteOutcome::AlreadyApplied
        );

        let snapshot = store.load(user_id).await.unwrap().unwrap();
        assert_eq!(snapshot.stocks.len(), 1);
    }

    #[tokio::test]
    async fn delete_missing_stock_reports_not_found() {
        let store = InMemoryPortfolioStore::new();
        let user_id = Uuid::new_v4();
        store
            .seed(
                user_id,
                vec![StockHolding {
                    stock: "ACME".to_string(),
                    holding: 5,
                }],
            )
            .await;

        assert_eq!(
            store
                .delete_stock(user_id, "WIDGETCO", Uuid::new_v4())
                .await
                .unwrap(),
            WriteOutcome::NotFound
        );
        assert_eq!(
            store
                .delete_stock(user_id, "ACME", Uuid::new_v4())
                .await
                .unwrap(),
            WriteOutcome::Applied
        );
    }
}
