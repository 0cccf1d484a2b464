use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use crate::gateway::{GatewayError, NotificationGateway};
use crate::model::BookingRecord;
use crate::observability;

/// Groups newly changed, user-visible records and sends one combined
/// message per `(state, team, recipient)`. Strictly advisory: a failed
/// send is logged and never reverts the state change it announces.
pub struct Notifier {
    gateway: Arc<dyn NotificationGateway>,
}

impl Notifier {
    pub fn new(gateway: Arc<dyn NotificationGateway>) -> Self {
        Self { gateway }
    }

    pub async fn announce(&self, records: &[BookingRecord]) {
        let mut groups: BTreeMap<(String, String, String), Vec<&BookingRecord>> = BTreeMap::new();
        for record in records {
            if record.changed && record.state.is_user_visible() && !record.notify_to.is_empty() {
                groups
                    .entry((
                        record.state.to_string(),
                        record.team.clone(),
                        record.notify_to.clone(),
                    ))
                    .or_default()
                    .push(record);
            }
        }

        for ((state, team, recipient), group) in groups {
            let text = combined_message(&state, &group);
            match self.gateway.send(&team, &recipient, &text).await {
                Ok(()) => {
                    metrics::counter!(observability::NOTIFICATIONS_TOTAL).increment(1);
                }
                Err(e) => {
                    error!(team = %team, to = %recipient, "notification failed: {e}");
                }
            }
        }
    }
}

/// "Booking finished for Amalthea, Argus and Lynx at 2026-08-09 09:30 hour."
fn combined_message(state: &str, group: &[&BookingRecord]) -> String {
    let mut names = String::new();
    for (i, record) in group.iter().enumerate() {
        if i > 0 {
            names.push_str(if i == group.len() - 1 { " and " } else { ", " });
        }
        names.push_str(&record.resource);
    }
    let first = group[0];
    format!(
        "Booking {} for {} at {} {} hour.",
        state.to_lowercase(),
        names,
        first.date,
        first.time
    )
}

/// Transport of last resort: announcements go to the process log only.
/// Used until a chat transport is wired in.
pub struct LogNotificationGateway;

#[async_trait]
impl NotificationGateway for LogNotificationGateway {
    async fn send(&self, team: &str, recipient: &str, text: &str) -> Result<(), GatewayError> {
        tracing::info!(team = %team, to = %recipient, "{text}");
        Ok(())
    }
}
