use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;
use trade_queue::{Job, JobError, Processor};

use super::parse_trade;
use crate::notify::SlackNotifier;
use crate::publishers::{AnnouncePayload, TRADE_ANNOUNCE};
use crate::trades::{ItemType, Trade};

/// Turns a submitted trade into a chat message and posts it
pub struct TradeAnnouncer {
    notifier: SlackNotifier,
}

impl TradeAnnouncer {
    pub fn new(notifier: SlackNotifier) -> Self {
        Self { notifier }
    }

    pub fn message(trade: &Trade) -> String {
        let mut text = format!("*Trade submitted*: {} with {}", trade.creator.name, trade.recipient_names());
        for item in &trade.items {
            let kind = match item.item_type {
                ItemType::Player => "player",
                ItemType::Pick => "pick",
            };
            text.push_str(&format!(
                "\n• {} receives {} ({kind}) from {}",
                trade.team_name(item.recipient_id),
                item.description,
                trade.team_name(item.sender_id),
            ));
        }
        text
    }
}

/// Processor for `trade_announce`
pub struct AnnounceTrade {
    announcer: TradeAnnouncer,
}

impl AnnounceTrade {
    pub fn new(announcer: TradeAnnouncer) -> Self {
        Self { announcer }
    }
}

#[async_trait]
impl Processor for AnnounceTrade {
    const JOB_NAME: &'static str = TRADE_ANNOUNCE;
    type Payload = AnnouncePayload;

    async fn process(&self, payload: AnnouncePayload, job: &Job) -> Result<Value, JobError> {
        let trade = parse_trade(&payload.trade)?;
        let text = TradeAnnouncer::message(&trade);

        let delivery = self
            .announcer
            .notifier
            .post(&text)
            .await
            .map_err(|e| JobError::retryable(e.to_string()))?;

        info!(job_id = %job.id, trade_id = %trade.id, ?delivery, "trade announced");
        Ok(json!({ "tradeId": trade.id, "delivery": format!("{delivery:?}").to_lowercase() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SlackConfig;
    use crate::trades::fixtures;
    use trade_queue::JobOptions;

    #[test]
    fn message_lists_every_item() {
        let trade = Trade::draft(fixtures::create_trade()).unwrap();
        let text = TradeAnnouncer::message(&trade);

        assert!(text.starts_with("*Trade submitted*: Aces with Bombers"));
        assert!(text.contains("Bombers receives Mookie Betts (player) from Aces"));
        assert!(text.contains("Aces receives 2027 round 2 major league pick (pick) from Bombers"));
    }

    #[tokio::test]
    async fn process_logs_without_webhook() {
        let trade = Trade::draft(fixtures::create_trade()).unwrap();
        let payload = AnnouncePayload { trade: serde_json::to_string(&trade).unwrap() };
        let job = Job::new(TRADE_ANNOUNCE, serde_json::to_value(&payload).unwrap(), JobOptions::default());

        let processor = AnnounceTrade::new(TradeAnnouncer::new(SlackNotifier::new(SlackConfig::default())));
        let result = processor.process(payload, &job).await.unwrap();
        assert_eq!(result["delivery"], "logged");
    }

    #[tokio::test]
    async fn malformed_trade_is_permanent() {
        let payload = AnnouncePayload { trade: "not json".into() };
        let job = Job::new(TRADE_ANNOUNCE, Value::Null, JobOptions::default());

        let processor = AnnounceTrade::new(TradeAnnouncer::new(SlackNotifier::new(SlackConfig::default())));
        let err = processor.process(payload, &job).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
