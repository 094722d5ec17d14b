//! Trade domain model and the data-access boundary.

mod model;
mod repository;

pub use model::{CreateTrade, ItemType, Owner, Team, Trade, TradeError, TradeItem, TradeStatus, UpdateStatus};
pub use repository::{InMemoryTradeRepository, TradeRepository};

#[cfg(test)]
pub(crate) use model::fixtures;
