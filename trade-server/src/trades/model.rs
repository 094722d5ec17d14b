use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Draft,
    Requested,
    Pending,
    Accepted,
    Rejected,
    Submitted,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Requested => "requested",
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Submitted => "submitted",
        }
    }

    pub fn can_transition_to(&self, next: TradeStatus) -> bool {
        use TradeStatus::*;
        matches!(
            (self, next),
            (Draft, Requested)
                | (Requested, Pending | Accepted | Rejected)
                | (Pending, Accepted | Rejected)
                | (Accepted, Submitted | Rejected)
        )
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub owners: Vec<Owner>,
}

impl Team {
    pub fn owner_emails(&self) -> Vec<String> {
        self.owners.iter().map(|o| o.email.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Player,
    Pick,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeItem {
    pub item_type: ItemType,
    pub item_id: Uuid,
    pub description: String,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
}

/// A trade with its participants hydrated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: Uuid,
    pub status: TradeStatus,
    pub creator: Team,
    pub recipients: Vec<Team>,
    #[serde(default)]
    pub items: Vec<TradeItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declined_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TradeError {
    #[error("Trade cannot move from {from} to {to}")]
    InvalidTransition { from: TradeStatus, to: TradeStatus },

    #[error("A trade needs at least one recipient team")]
    NoRecipients,

    #[error("Item {0} does not move between teams in this trade")]
    ForeignItem(Uuid),
}

/// Body of `POST /trades`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTrade {
    pub creator: Team,
    pub recipients: Vec<Team>,
    #[serde(default)]
    pub items: Vec<TradeItem>,
}

/// Body of `PATCH /trades/{id}/status`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatus {
    pub status: TradeStatus,
    #[serde(default)]
    pub declined_reason: Option<String>,
    #[serde(default)]
    pub accepted_by: Option<Uuid>,
}

impl Trade {
    /// New draft trade
    pub fn draft(request: CreateTrade) -> Result<Self, TradeError> {
        if request.recipients.is_empty() {
            return Err(TradeError::NoRecipients);
        }

        let team_ids: Vec<Uuid> = std::iter::once(request.creator.id)
            .chain(request.recipients.iter().map(|t| t.id))
            .collect();
        if let Some(item) = request
            .items
            .iter()
            .find(|item| !team_ids.contains(&item.sender_id) || !team_ids.contains(&item.recipient_id))
        {
            return Err(TradeError::ForeignItem(item.item_id));
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            status: TradeStatus::Draft,
            creator: request.creator,
            recipients: request.recipients,
            items: request.items,
            declined_reason: None,
            accepted_by: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn apply(&mut self, update: UpdateStatus) -> Result<(), TradeError> {
        if !self.status.can_transition_to(update.status) {
            return Err(TradeError::InvalidTransition { from: self.status, to: update.status });
        }

        match update.status {
            TradeStatus::Rejected => self.declined_reason = update.declined_reason,
            TradeStatus::Accepted => self.accepted_by = update.accepted_by,
            _ => {}
        }
        self.status = update.status;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn team_name(&self, team_id: Uuid) -> &str {
        std::iter::once(&self.creator)
            .chain(self.recipients.iter())
            .find(|t| t.id == team_id)
            .map(|t| t.name.as_str())
            .unwrap_or("unknown team")
    }

    pub fn recipient_names(&self) -> String {
        self.recipients.iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join(", ")
    }
}
