use axum::extract::rejection::PathRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use trade_queue::{Job, QueueError};
use uuid::Uuid;

use super::queued;
use super::trades::load;
use crate::app::AppState;
use crate::error::{map_path_rejection, AppError};
use crate::publishers::MailKind;
use crate::reporting::RequestInfo;
use crate::trades::{Trade, TradeStatus};

type Accepted = Result<(StatusCode, Json<Value>), AppError>;

pub(super) async fn request_mail(
    State(state): State<AppState>,
    request: RequestInfo,
    id: Result<Path<Uuid>, PathRejection>,
) -> Accepted {
    send_mail(&state, &request, id, MailKind::Request).await
}

pub(super) async fn declined_mail(
    State(state): State<AppState>,
    request: RequestInfo,
    id: Result<Path<Uuid>, PathRejection>,
) -> Accepted {
    send_mail(&state, &request, id, MailKind::Declined).await
}

pub(super) async fn accepted_mail(
    State(state): State<AppState>,
    request: RequestInfo,
    id: Result<Path<Uuid>, PathRejection>,
) -> Accepted {
    send_mail(&state, &request, id, MailKind::Accepted).await
}

pub(super) async fn announce(
    State(state): State<AppState>,
    request: RequestInfo,
    id: Result<Path<Uuid>, PathRejection>,
) -> Accepted {
    let Path(id) = id.map_err(map_path_rejection)?;
    let trade = load(&state, id).await?;
    require_status(&trade, TradeStatus::Submitted)?;

    let publisher = state.publishers.slack(None).await?;
    let job = match publisher.queue_trade_announcement(&trade).await {
        Ok(job) => job,
        Err(e) => return Err(enqueue_failed(&state, &request, &trade, e).await),
    };

    Ok(queued(publisher.queue_handle().name(), &[job]))
}

async fn send_mail(
    state: &AppState,
    request: &RequestInfo,
    id: Result<Path<Uuid>, PathRejection>,
    kind: MailKind,
) -> Accepted {
    let Path(id) = id.map_err(map_path_rejection)?;
    let trade = load(state, id).await?;
    require_status(&trade, kind.required_status())?;

    let recipients = recipients(state, &trade, kind).await?;
    if recipients.is_empty() {
        return Err(AppError::bad_request("No team owner on this trade has an email address"));
    }

    let publisher = state.publishers.email(None).await?;
    let mut jobs: Vec<Job> = Vec::with_capacity(recipients.len());
    for recipient in &recipients {
        match publisher.queue_mail(kind, &trade, recipient).await {
            Ok(job) => jobs.push(job),
            Err(e) => return Err(enqueue_failed(state, request, &trade, e).await),
        }
    }

    Ok(queued(publisher.queue_handle().name(), &jobs))
}

/// Owner addresses of the teams a mail goes to
async fn recipients(state: &AppState, trade: &Trade, kind: MailKind) -> Result<Vec<String>, AppError> {
    let teams: Vec<Uuid> = match kind {
        MailKind::Request => trade.recipients.iter().map(|t| t.id).collect(),
        MailKind::Declined => vec![trade.creator.id],
        MailKind::Accepted => std::iter::once(trade.creator.id)
            .chain(trade.recipients.iter().map(|t| t.id))
            .collect(),
    };

    let mut emails = Vec::new();
    for team in teams {
        for email in state.trades.owner_emails(team).await? {
            if !emails.contains(&email) {
                emails.push(email);
            }
        }
    }
    Ok(emails)
}

fn require_status(trade: &Trade, required: TradeStatus) -> Result<(), AppError> {
    if trade.status != required {
        return Err(AppError::bad_request(format!(
            "Trade {} is {}, it must be {required} for this notification",
            trade.id, trade.status
        )));
    }
    Ok(())
}

async fn enqueue_failed(state: &AppState, request: &RequestInfo, trade: &Trade, err: QueueError) -> AppError {
    let message = format!("failed to enqueue notification: {err}");
    state
        .reporter
        .report(&message, json!({ "tradeId": trade.id, "status": trade.status }), Some(request))
        .await;
    AppError::from(err)
}
