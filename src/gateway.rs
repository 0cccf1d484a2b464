pub mod sim;

use async_trait::async_trait;

use crate::model::{Credentials, DaySchedule, Span};

/// Authenticated remote session. Opaque to the reconciliation core; the
/// gateway implementation owns whatever cookies or tokens live behind it.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user_id: i64,
}

/// Everything that can go wrong talking to the remote system, reduced to the
/// categories the reconciler reacts to differently.
#[derive(Debug, Clone)]
pub enum GatewayError {
    /// Transient transport failure — retried on the next eligible tick.
    Network(String),
    /// Login rejected or session expired — also transient.
    Auth(String),
    /// The remote refused because the slot is taken.
    Conflict { holder: String },
    /// The request itself is malformed — terminal, never retried.
    Validation(String),
    /// The remote's responses no longer match expectations; the record is
    /// left untouched so it is retried verbatim once the adapter is fixed.
    Structural(String),
    /// The remote has no such operation (e.g. confirmation).
    Unimplemented(&'static str),
}

impl GatewayError {
    /// Transient errors bump the retry counter instead of changing course.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Network(_) | GatewayError::Auth(_))
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::Network(e) => write!(f, "network error: {e}"),
            GatewayError::Auth(e) => write!(f, "authentication failed: {e}"),
            GatewayError::Conflict { holder } => write!(f, "slot held by {holder}"),
            GatewayError::Validation(e) => write!(f, "invalid request: {e}"),
            GatewayError::Structural(e) => write!(f, "unexpected remote response: {e}"),
            GatewayError::Unimplemented(op) => write!(f, "remote does not support {op}"),
        }
    }
}

impl std::error::Error for GatewayError {}

/// The remote booking system, reduced to the operations the reconciler
/// needs. Implementations own all session, transport and parsing detail;
/// the core never sees a byte of markup.
#[async_trait]
pub trait BookingGateway: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, GatewayError>;

    /// Observed schedule for every resource matching `resource_filter`
    /// (case-insensitive substring; empty matches all) on `date`.
    async fn query_schedule(
        &self,
        session: &Session,
        resource_filter: &str,
        date: &str,
    ) -> Result<DaySchedule, GatewayError>;

    /// Returns the external reservation id.
    async fn create_reservation(
        &self,
        session: &Session,
        resource_id: &str,
        span: Span,
        comment: &str,
    ) -> Result<String, GatewayError>;

    async fn move_reservation(
        &self,
        session: &Session,
        external_id: &str,
        span: Span,
        comment: &str,
    ) -> Result<(), GatewayError>;

    async fn cancel_reservation(
        &self,
        session: &Session,
        external_id: &str,
    ) -> Result<(), GatewayError>;

    async fn confirm_reservation(
        &self,
        session: &Session,
        external_id: &str,
    ) -> Result<(), GatewayError>;
}

/// Best-effort human notification channel. Failures are logged, never acted on.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn send(&self, team: &str, recipient: &str, text: &str) -> Result<(), GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(GatewayError::Network("connection reset".into()).is_transient());
        assert!(GatewayError::Auth("session expired".into()).is_transient());
        assert!(!GatewayError::Conflict { holder: "J. Doe".into() }.is_transient());
        assert!(!GatewayError::Validation("bad date".into()).is_transient());
        assert!(!GatewayError::Structural("markup changed".into()).is_transient());
        assert!(!GatewayError::Unimplemented("confirmation").is_transient());
    }
}
