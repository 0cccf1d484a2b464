use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::config::Config;
use crate::gateway::{BookingGateway, GatewayError, Session};
use crate::model::{BookingRecord, BookingState, Epoch, Span};
use crate::observability;

use super::ObservationCache;
use super::schedule::{
    self, advance_date, confirm_due, expired, fmt_local_hhmm, normalize, repeat_due,
};
use super::window::{self, Plan};

/// Everything one reconciliation task may touch besides its own record:
/// the tick's immutable configuration snapshot, the gateway, and the
/// tick-scoped observation cache.
pub(crate) struct TaskContext {
    pub cfg: Arc<Config>,
    pub gateway: Arc<dyn BookingGateway>,
    pub cache: Arc<ObservationCache>,
}

/// Reconcile one record against the remote. All gateway errors are
/// converted into record state here; nothing propagates to the driver.
pub(crate) async fn reconcile_record(record: &mut BookingRecord, ctx: &TaskContext) {
    let now = schedule::now();

    if let Err(msg) = normalize(record, &ctx.cfg) {
        record.transition(BookingState::Failed, msg, now);
        return;
    }

    if record.state == BookingState::Cancel {
        cancel_requested(record, ctx, now).await;
        return;
    }

    if confirm_due(record, &ctx.cfg, now) {
        confirm(record, ctx, now).await;
        return;
    }

    // A blocked record is resolved before anything else: swap in the
    // fallback resource for a prompt re-attempt, or give up.
    if record.state == BookingState::Blocked {
        if record.fallback_resource.is_empty() {
            record.transition(BookingState::Failed, record.message.clone(), now);
        } else {
            let message = format!(
                "using fallback {} for {}",
                record.fallback_resource, record.resource
            );
            record.resource = std::mem::take(&mut record.fallback_resource);
            record.transition(BookingState::Retry, message, now);
        }
        return;
    }

    // Resting records (terminal, or still backing off) only regenerate or
    // age out.
    if record.state.is_terminal() || record.next_eligible > now {
        if repeat_due(record, now) {
            if let Some(next_date) =
                advance_date(record.epoch_start, record.repeat, &ctx.cfg.utc_offset)
            {
                record.clear_grant();
                record.date = next_date;
                record.retry_count = 0;
                record.transition(BookingState::Repeat, "booking is repeated", now);
            }
        } else if expired(record, now) {
            record.transition(BookingState::Delete, "booking marked for delete", now);
        }
        return;
    }

    if expired(record, now) {
        record.transition(BookingState::Delete, "booking marked for delete", now);
        return;
    }

    // Too late to book at all; a held reservation may still be moved below.
    if record.epoch_start < now && !record.has_reservation() {
        record.transition(BookingState::Failed, "booking in the past", now);
        return;
    }

    // Teams may ask for the booked time range as the default comment.
    let add_time = ctx
        .cfg
        .team(&record.team)
        .map(|policy| policy.add_time)
        .unwrap_or(false);
    if !record.user_comment && add_time {
        record.comment = format!(
            "{} - {}",
            fmt_local_hhmm(record.epoch_start, &ctx.cfg.utc_offset),
            fmt_local_hhmm(record.epoch_end, &ctx.cfg.utc_offset)
        );
    }
    let comment = format!("{}{}", ctx.cfg.prefix_for(&record.team), record.comment);

    let session = match ctx.gateway.authenticate(&record.credentials).await {
        Ok(session) => session,
        Err(e) => return gateway_failure(record, &e, &ctx.cfg, now),
    };

    let day = match ctx.cache.observe(&*ctx.gateway, &session, &record.date).await {
        Ok(day) => day,
        Err(e) => return gateway_failure(record, &e, &ctx.cfg, now),
    };

    let plan = window::resolve(record, &day, &ctx.cfg);
    execute_plan(record, plan, &session, &comment, ctx, now).await;
}

async fn execute_plan(
    record: &mut BookingRecord,
    plan: Plan,
    session: &Session,
    comment: &str,
    ctx: &TaskContext,
    now: Epoch,
) {
    match plan {
        Plan::Noop => {}
        Plan::Wait {
            message,
            next_eligible,
        } => {
            record.next_eligible = next_eligible;
            record.transition(BookingState::Waiting, message, now);
        }
        Plan::Fail { message } => {
            record.transition(BookingState::Failed, message, now);
        }
        Plan::Block {
            message,
            cancel_held,
            drop_grant,
        } => {
            if cancel_held {
                // Cancel-then-block: do not sit on a reservation we are
                // about to lose the window for.
                if let Err(e) = ctx
                    .gateway
                    .cancel_reservation(session, &record.external_id)
                    .await
                {
                    warn!(id = record.id, "cancel before block failed: {e}");
                }
            }
            if drop_grant {
                record.clear_grant();
            }
            record.transition(BookingState::Blocked, message, now);
        }
        Plan::Move { span } => {
            match ctx
                .gateway
                .move_reservation(session, &record.external_id, span, comment)
                .await
            {
                Ok(()) => granted(record, span, &ctx.cfg, now),
                Err(e) => gateway_failure(record, &e, &ctx.cfg, now),
            }
        }
        Plan::Create { span, resource_id } => {
            record.external_resource_id = resource_id;
            match ctx
                .gateway
                .create_reservation(session, &record.external_resource_id, span, comment)
                .await
            {
                Ok(external_id) => {
                    record.external_id = external_id;
                    granted(record, span, &ctx.cfg, now);
                }
                Err(e) => gateway_failure(record, &e, &ctx.cfg, now),
            }
        }
    }
}

/// The remote granted `span`: `Finished` when it is exactly what was asked
/// for, `Moving` when only the clipped window fit.
fn granted(record: &mut BookingRecord, span: Span, cfg: &Config, now: Epoch) {
    record.grant(span);
    record.retry_count = 0;
    let state = if span == record.desired_span() {
        BookingState::Finished
    } else {
        BookingState::Moving
    };
    let message = format!(
        "{}:{} - {}",
        state,
        fmt_local_hhmm(span.start, &cfg.utc_offset),
        fmt_local_hhmm(span.end, &cfg.utc_offset)
    );
    record.transition(state, message, now);
}

/// Convert a gateway error into record state: conflicts block, transient
/// failures retry up to the ceiling, validation fails for good, structural
/// surprises leave the record untouched for a verbatim retry once the
/// adapter catches up.
fn gateway_failure(record: &mut BookingRecord, err: &GatewayError, cfg: &Config, now: Epoch) {
    metrics::counter!(
        observability::GATEWAY_ERRORS_TOTAL,
        "kind" => observability::error_label(err)
    )
    .increment(1);

    match err {
        GatewayError::Conflict { .. } => {
            record.transition(BookingState::Blocked, err.to_string(), now);
        }
        GatewayError::Network(_) | GatewayError::Auth(_) => {
            if cfg.max_retry > 0 && record.retry_count >= cfg.max_retry {
                record.transition(
                    BookingState::Failed,
                    format!("retry limit reached: {err}"),
                    now,
                );
            } else {
                record.retry_count += 1;
                record.transition(BookingState::Retry, err.to_string(), now);
            }
        }
        GatewayError::Validation(_) => {
            record.transition(BookingState::Failed, err.to_string(), now);
        }
        GatewayError::Structural(_) => {
            error!(id = record.id, resource = %record.resource, "{err}");
        }
        GatewayError::Unimplemented(_) => {
            debug!(id = record.id, "{err}");
        }
    }
}

async fn cancel_requested(record: &mut BookingRecord, ctx: &TaskContext, now: Epoch) {
    if !record.has_reservation() {
        record.transition(BookingState::Canceled, "nothing to cancel", now);
        return;
    }
    let session = match ctx.gateway.authenticate(&record.credentials).await {
        Ok(session) => session,
        Err(e) => {
            warn!(id = record.id, "cancel postponed, login failed: {e}");
            return;
        }
    };
    match ctx
        .gateway
        .cancel_reservation(&session, &record.external_id)
        .await
    {
        Ok(()) => {
            record.clear_grant();
            record.transition(BookingState::Canceled, "reservation canceled", now);
        }
        Err(e) => {
            // Stay in Cancel; the next tick tries again.
            warn!(id = record.id, "cancel failed: {e}");
        }
    }
}

/// Attempted at most once per eligible tick; failure leaves the record
/// `Finished` so the next tick inside the window retries.
async fn confirm(record: &mut BookingRecord, ctx: &TaskContext, now: Epoch) {
    let session = match ctx.gateway.authenticate(&record.credentials).await {
        Ok(session) => session,
        Err(e) => {
            warn!(id = record.id, "confirmation postponed, login failed: {e}");
            return;
        }
    };
    match ctx
        .gateway
        .confirm_reservation(&session, &record.external_id)
        .await
    {
        Ok(()) => record.transition(BookingState::Confirmed, "booking confirmed", now),
        Err(GatewayError::Unimplemented(op)) => {
            debug!(id = record.id, "remote does not support {op}");
        }
        Err(e) => {
            warn!(id = record.id, "confirmation failed, staying finished: {e}");
        }
    }
}
