//! In-memory stand-in for the remote booking system: seedable day
//! schedules, conflict detection on create/move, quarter-hour grid. Drives
//! the binary's dry-run mode and the test suite; the production scraping
//! adapter lives behind the same trait, out of tree.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::DateTime;
use tokio::sync::Mutex;

use crate::model::*;

use super::{BookingGateway, GatewayError, Session};

#[derive(Default)]
struct SimState {
    /// Date (`YYYY-MM-DD`) → observed schedule.
    days: HashMap<String, DaySchedule>,
    /// Reservation id → (date, resource external id).
    reservations: HashMap<String, (String, String)>,
    /// Errors injected by tests, consumed one per gateway call.
    injected: Vec<GatewayError>,
}

pub struct SimGateway {
    state: Mutex<SimState>,
    next_id: AtomicI64,
    confirm_supported: bool,
}

impl SimGateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            next_id: AtomicI64::new(1),
            confirm_supported: false,
        }
    }

    /// Like the real remote would one day: confirmation available.
    pub fn with_confirmation(mut self) -> Self {
        self.confirm_supported = true;
        self
    }

    /// Load seeded day schedules from a JSON file (an array of
    /// [`DaySchedule`]), for dry runs against a captured remote state.
    pub async fn load_days(&self, path: &Path) -> std::io::Result<()> {
        let raw = std::fs::read(path)?;
        let days: Vec<DaySchedule> = serde_json::from_slice(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut state = self.state.lock().await;
        for day in days {
            state.days.insert(day.date.clone(), day);
        }
        Ok(())
    }

    /// Seed one resource for one date, fenced into `[sunrise, sunset)` by
    /// the administrative night blocks the real remote shows.
    pub async fn seed_open_day(
        &self,
        date: &str,
        resource_id: &str,
        name: &str,
        sunrise: Epoch,
        sunset: Epoch,
    ) {
        let mut state = self.state.lock().await;
        let day = state.days.entry(date.to_string()).or_insert_with(|| DaySchedule {
            date: date.to_string(),
            resources: Vec::new(),
        });
        day.resources.push(ResourceDay {
            external_id: resource_id.to_string(),
            name: name.to_string(),
            slots: vec![
                Slot {
                    kind: SlotKind::Blocked,
                    span: Span::new(sunrise - 8 * HOUR, sunrise),
                    holder: String::new(),
                    external_id: String::new(),
                },
                Slot {
                    kind: SlotKind::Blocked,
                    span: Span::new(sunset, sunset + 8 * HOUR),
                    holder: String::new(),
                    external_id: String::new(),
                },
            ],
        });
    }

    /// Place a foreign reservation directly into the observed schedule.
    pub async fn seed_reservation(
        &self,
        date: &str,
        resource_id: &str,
        span: Span,
        holder: &str,
        external_id: &str,
    ) {
        let mut state = self.state.lock().await;
        if let Some(day) = state.days.get_mut(date)
            && let Some(resource) = day
                .resources
                .iter_mut()
                .find(|r| r.external_id == resource_id)
        {
            resource.slots.push(Slot {
                kind: SlotKind::Reservation,
                span,
                holder: holder.to_string(),
                external_id: external_id.to_string(),
            });
        }
        state
            .reservations
            .insert(external_id.to_string(), (date.to_string(), resource_id.to_string()));
    }

    /// Queue an error returned by the next gateway call (FIFO).
    pub async fn inject_failure(&self, err: GatewayError) {
        self.state.lock().await.injected.push(err);
    }

    /// The reservation ids currently held, for assertions.
    pub async fn reservation_ids(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut ids: Vec<String> = state.reservations.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn take_injected(state: &mut SimState) -> Option<GatewayError> {
        if state.injected.is_empty() {
            None
        } else {
            Some(state.injected.remove(0))
        }
    }

    fn date_of(span: &Span) -> Result<String, GatewayError> {
        DateTime::from_timestamp(span.start, 0)
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .ok_or_else(|| GatewayError::Validation("timestamp out of range".into()))
    }

    fn check_grid(span: &Span) -> Result<(), GatewayError> {
        if span.start % SLOT != 0 || span.end % SLOT != 0 {
            return Err(GatewayError::Validation(
                "slots are granted on the quarter hour only".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SimGateway {
    fn default() -> Self {
        Self::new()
    }
}

/// Reject when `span` overlaps any reservation other than `except`.
fn check_conflict(resource: &ResourceDay, span: &Span, except: &str) -> Result<(), GatewayError> {
    for slot in &resource.slots {
        if slot.kind == SlotKind::Reservation
            && slot.external_id != except
            && slot.span.overlaps(span)
        {
            let holder = if slot.holder.is_empty() {
                "another member".to_string()
            } else {
                slot.holder.clone()
            };
            return Err(GatewayError::Conflict { holder });
        }
    }
    Ok(())
}

#[async_trait]
impl BookingGateway for SimGateway {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, GatewayError> {
        let mut state = self.state.lock().await;
        if let Some(err) = Self::take_injected(&mut state) {
            return Err(err);
        }
        if credentials.username.is_empty() || credentials.password.is_empty() {
            return Err(GatewayError::Auth("missing credentials".into()));
        }
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(Session {
            token: format!("sim-session-{n}"),
            user_id: n,
        })
    }

    async fn query_schedule(
        &self,
        _session: &Session,
        resource_filter: &str,
        date: &str,
    ) -> Result<DaySchedule, GatewayError> {
        let mut state = self.state.lock().await;
        if let Some(err) = Self::take_injected(&mut state) {
            return Err(err);
        }
        let Some(day) = state.days.get(date) else {
            return Ok(DaySchedule {
                date: date.to_string(),
                resources: Vec::new(),
            });
        };
        if resource_filter.is_empty() {
            return Ok(day.clone());
        }
        let needle = resource_filter.to_lowercase();
        Ok(DaySchedule {
            date: day.date.clone(),
            resources: day
                .resources
                .iter()
                .filter(|r| r.name.to_lowercase().contains(&needle))
                .cloned()
                .collect(),
        })
    }

    async fn create_reservation(
        &self,
        _session: &Session,
        resource_id: &str,
        span: Span,
        _comment: &str,
    ) -> Result<String, GatewayError> {
        Self::check_grid(&span)?;
        let date = Self::date_of(&span)?;
        let mut state = self.state.lock().await;
        if let Some(err) = Self::take_injected(&mut state) {
            return Err(err);
        }

        let day = state
            .days
            .get_mut(&date)
            .ok_or_else(|| GatewayError::Validation(format!("no schedule for {date}")))?;
        let resource = day
            .resources
            .iter_mut()
            .find(|r| r.external_id == resource_id)
            .ok_or_else(|| GatewayError::Validation(format!("unknown resource {resource_id}")))?;
        check_conflict(resource, &span, "")?;

        let external_id = format!("sim-r{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        resource.slots.push(Slot {
            kind: SlotKind::Reservation,
            span,
            holder: "helmsman".into(),
            external_id: external_id.clone(),
        });
        state
            .reservations
            .insert(external_id.clone(), (date, resource_id.to_string()));
        Ok(external_id)
    }

    async fn move_reservation(
        &self,
        _session: &Session,
        external_id: &str,
        span: Span,
        _comment: &str,
    ) -> Result<(), GatewayError> {
        Self::check_grid(&span)?;
        let mut state = self.state.lock().await;
        if let Some(err) = Self::take_injected(&mut state) {
            return Err(err);
        }

        let (date, resource_id) = state
            .reservations
            .get(external_id)
            .cloned()
            .ok_or_else(|| GatewayError::Validation(format!("unknown reservation {external_id}")))?;
        let day = state
            .days
            .get_mut(&date)
            .ok_or_else(|| GatewayError::Validation(format!("no schedule for {date}")))?;
        let resource = day
            .resources
            .iter_mut()
            .find(|r| r.external_id == resource_id)
            .ok_or_else(|| GatewayError::Validation(format!("unknown resource {resource_id}")))?;
        check_conflict(resource, &span, external_id)?;

        if let Some(slot) = resource
            .slots
            .iter_mut()
            .find(|s| s.external_id == external_id)
        {
            slot.span = span;
        }
        Ok(())
    }

    async fn cancel_reservation(
        &self,
        _session: &Session,
        external_id: &str,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.lock().await;
        if let Some(err) = Self::take_injected(&mut state) {
            return Err(err);
        }
        let Some((date, resource_id)) = state.reservations.remove(external_id) else {
            return Ok(()); // already gone
        };
        if let Some(day) = state.days.get_mut(&date)
            && let Some(resource) = day
                .resources
                .iter_mut()
                .find(|r| r.external_id == resource_id)
        {
            resource.slots.retain(|s| s.external_id != external_id);
        }
        Ok(())
    }

    async fn confirm_reservation(
        &self,
        _session: &Session,
        external_id: &str,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.lock().await;
        if let Some(err) = Self::take_injected(&mut state) {
            return Err(err);
        }
        if !self.confirm_supported {
            return Err(GatewayError::Unimplemented("confirmation"));
        }
        if !state.reservations.contains_key(external_id) {
            return Err(GatewayError::Validation(format!(
                "unknown reservation {external_id}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Epoch = 20_000 * 24 * HOUR;

    fn creds() -> Credentials {
        Credentials {
            username: "alice".into(),
            password: "secret".into(),
        }
    }

    async fn open_sim() -> (SimGateway, Session, String) {
        let sim = SimGateway::new();
        let date = DateTime::from_timestamp(DAY, 0)
            .unwrap()
            .format("%Y-%m-%d")
            .to_string();
        sim.seed_open_day(&date, "17", "Lynx", DAY + 6 * HOUR, DAY + 22 * HOUR)
            .await;
        let session = sim.authenticate(&creds()).await.unwrap();
        (sim, session, date)
    }

    #[tokio::test]
    async fn create_then_observe() {
        let (sim, session, date) = open_sim().await;
        let span = Span::new(DAY + 9 * HOUR, DAY + 10 * HOUR);
        let id = sim
            .create_reservation(&session, "17", span, "[bot]")
            .await
            .unwrap();
        assert!(id.starts_with("sim-r"));

        let day = sim.query_schedule(&session, "", &date).await.unwrap();
        let resource = day.find_resource("lynx").unwrap();
        assert!(
            resource
                .slots
                .iter()
                .any(|s| s.kind == SlotKind::Reservation && s.external_id == id)
        );
    }

    #[tokio::test]
    async fn create_on_taken_slot_conflicts() {
        let (sim, session, date) = open_sim().await;
        let span = Span::new(DAY + 9 * HOUR, DAY + 10 * HOUR);
        sim.seed_reservation(&date, "17", span, "J. Doe", "foreign-1")
            .await;

        let result = sim
            .create_reservation(&session, "17", Span::new(DAY + 9 * HOUR, DAY + 11 * HOUR), "")
            .await;
        assert!(matches!(
            result,
            Err(GatewayError::Conflict { holder }) if holder == "J. Doe"
        ));
    }

    #[tokio::test]
    async fn move_checks_conflicts_but_not_against_itself() {
        let (sim, session, _date) = open_sim().await;
        let id = sim
            .create_reservation(&session, "17", Span::new(DAY + 9 * HOUR, DAY + 10 * HOUR), "")
            .await
            .unwrap();

        // Overlapping its own old window is fine.
        sim.move_reservation(
            &session,
            &id,
            Span::new(DAY + 9 * HOUR + 30 * MINUTE, DAY + 10 * HOUR + 30 * MINUTE),
            "",
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn off_grid_spans_are_rejected() {
        let (sim, session, _date) = open_sim().await;
        let result = sim
            .create_reservation(
                &session,
                "17",
                Span::new(DAY + 9 * HOUR + 7 * MINUTE, DAY + 10 * HOUR),
                "",
            )
            .await;
        assert!(matches!(result, Err(GatewayError::Validation(_))));
    }

    #[tokio::test]
    async fn cancel_removes_the_slot() {
        let (sim, session, date) = open_sim().await;
        let id = sim
            .create_reservation(&session, "17", Span::new(DAY + 9 * HOUR, DAY + 10 * HOUR), "")
            .await
            .unwrap();
        sim.cancel_reservation(&session, &id).await.unwrap();

        let day = sim.query_schedule(&session, "", &date).await.unwrap();
        let resource = day.find_resource("Lynx").unwrap();
        assert!(!resource.slots.iter().any(|s| s.external_id == id));
        assert!(sim.reservation_ids().await.is_empty());
    }

    #[tokio::test]
    async fn injected_failures_surface_once() {
        let (sim, session, date) = open_sim().await;
        sim.inject_failure(GatewayError::Network("connection reset".into()))
            .await;
        assert!(matches!(
            sim.query_schedule(&session, "", &date).await,
            Err(GatewayError::Network(_))
        ));
        assert!(sim.query_schedule(&session, "", &date).await.is_ok());
    }

    #[tokio::test]
    async fn confirmation_is_unimplemented_by_default() {
        let (sim, session, _date) = open_sim().await;
        assert!(matches!(
            sim.confirm_reservation(&session, "whatever").await,
            Err(GatewayError::Unimplemented(_))
        ));
    }

    #[tokio::test]
    async fn empty_credentials_rejected() {
        let sim = SimGateway::new();
        let result = sim.authenticate(&Credentials::default()).await;
        assert!(matches!(result, Err(GatewayError::Auth(_))));
    }
}
