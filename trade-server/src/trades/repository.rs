use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{Team, Trade};

/// Data-access boundary for trades and their participants
#[async_trait]
pub trait TradeRepository: Send + Sync {
    async fn insert(&self, trade: Trade) -> Result<Trade>;

    /// Trade with creator, recipients and items hydrated
    async fn get(&self, id: Uuid) -> Result<Option<Trade>>;

    async fn update(&self, trade: Trade) -> Result<Trade>;

    /// Email addresses of a team's owners
    async fn owner_emails(&self, team_id: Uuid) -> Result<Vec<String>>;
}

#[derive(Default)]
pub struct InMemoryTradeRepository {
    trades: RwLock<HashMap<Uuid, Trade>>,
    teams: RwLock<HashMap<Uuid, Team>>,
}

impl InMemoryTradeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn remember_teams(&self, trade: &Trade) {
        let mut teams = self.teams.write();
        for team in std::iter::once(&trade.creator).chain(trade.recipients.iter()) {
            teams.insert(team.id, team.clone());
        }
    }
}

#[async_trait]
impl TradeRepository for InMemoryTradeRepository {
    async fn insert(&self, trade: Trade) -> Result<Trade> {
        self.remember_teams(&trade);
        self.trades.write().insert(trade.id, trade.clone());
        Ok(trade)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Trade>> {
        Ok(self.trades.read().get(&id).cloned())
    }

    async fn update(&self, trade: Trade) -> Result<Trade> {
        let mut trades = self.trades.write();
        if !trades.contains_key(&trade.id) {
            anyhow::bail!("trade {} does not exist", trade.id);
        }
        trades.insert(trade.id, trade.clone());
        Ok(trade)
    }

    async fn owner_emails(&self, team_id: Uuid) -> Result<Vec<String>> {
        Ok(self.teams.read().get(&team_id).map(Team::owner_emails).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trades::model::fixtures;

    #[tokio::test]
    async fn insert_then_resolve_owners() {
        let repo = InMemoryTradeRepository::new();
        let trade = repo.insert(Trade::draft(fixtures::create_trade()).unwrap()).await.unwrap();

        let fetched = repo.get(trade.id).await.unwrap().unwrap();
        assert_eq!(fetched, trade);

        let emails = repo.owner_emails(trade.recipients[0].id).await.unwrap();
        assert_eq!(emails, vec!["bombers@example.com".to_string()]);
        assert!(repo.owner_emails(Uuid::new_v4()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_requires_existing_trade() {
        let repo = InMemoryTradeRepository::new();
        let trade = Trade::draft(fixtures::create_trade()).unwrap();
        assert!(repo.update(trade).await.is_err());
    }
}
