use serde::{Deserialize, Serialize};

/// Unix seconds — the only time type.
pub type Epoch = i64;

pub const MINUTE: Epoch = 60;
pub const HOUR: Epoch = 3_600;
/// The remote grants quarter-hour slots only.
pub const SLOT: Epoch = 15 * MINUTE;

/// Half-open interval `[start, end)` in Unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Epoch,
    pub end: Epoch,
}

impl Span {
    pub fn new(start: Epoch, end: Epoch) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_min(&self) -> i64 {
        (self.end - self.start) / MINUTE
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Epoch) -> bool {
        self.start <= t && t < self.end
    }
}

/// Login material for the remote system, stored per request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Period after which a completed request regenerates a fresh future one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RepeatRule {
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl RepeatRule {
    pub fn is_none(&self) -> bool {
        matches!(self, RepeatRule::None)
    }
}

/// Reconciliation state of a request. New records start as `Pending`,
/// serialized as the empty string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BookingState {
    #[default]
    #[serde(rename = "")]
    Pending,
    /// The legal window is not open (or not wide enough) yet.
    Waiting,
    /// Re-attempt promptly, e.g. after a fallback swap.
    Retry,
    /// We hold a reservation, but only for a clipped part of the desired window.
    Moving,
    /// The exact desired window is booked.
    Finished,
    /// The reservation was confirmed with the remote.
    Confirmed,
    /// An operator asked for cancellation; consumed into `Canceled`.
    Cancel,
    Canceled,
    /// A foreign reservation (or an unknown resource) stands in the way.
    Blocked,
    Failed,
    /// Transient marker set when a repeat rule regenerates the request.
    Repeat,
    /// Purged on the next persistence write.
    Delete,
}

impl BookingState {
    /// States that are not reconciled further (short of repeat regeneration).
    pub fn is_terminal(&self) -> bool {
        use BookingState::*;
        matches!(self, Finished | Confirmed | Canceled | Failed)
    }

    /// States announced to humans when newly entered.
    pub fn is_user_visible(&self) -> bool {
        use BookingState::*;
        matches!(self, Finished | Blocked | Failed | Confirmed)
    }

    /// States that skip the post-tick cool-down so the next tick can act on
    /// them immediately.
    pub fn skips_cooldown(&self) -> bool {
        use BookingState::*;
        matches!(self, Blocked | Retry)
    }

    /// Transition table. Anything can be deleted, canceled, failed or
    /// regenerated; the narrower rows mirror how reconciliation actually
    /// moves records around.
    pub fn may_transition(&self, next: BookingState) -> bool {
        use BookingState::*;
        if *self == next {
            return true;
        }
        match next {
            Delete | Repeat | Canceled | Failed | Cancel => true,
            Confirmed => *self == Finished,
            Finished | Moving | Blocked => {
                matches!(self, Pending | Waiting | Retry | Moving | Repeat | Finished)
            }
            Waiting => matches!(self, Pending | Waiting | Retry | Moving | Repeat),
            Retry => matches!(self, Pending | Waiting | Retry | Moving | Repeat | Blocked),
            Pending => false,
        }
    }
}

impl std::fmt::Display for BookingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use BookingState::*;
        let s = match self {
            Pending => "New",
            Waiting => "Waiting",
            Retry => "Retry",
            Moving => "Moving",
            Finished => "Finished",
            Confirmed => "Confirmed",
            Cancel => "Cancel",
            Canceled => "Canceled",
            Blocked => "Blocked",
            Failed => "Failed",
            Repeat => "Repeat",
            Delete => "Delete",
        };
        f.write_str(s)
    }
}

/// One audit line; the record's `log` is append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: Epoch,
    pub state: BookingState,
    pub text: String,
}

/// Full reconciliation state of one booking request. The persisted fields
/// are the desired state plus whatever the last tick observed or decided;
/// the `epoch_*` fields are derived per tick and never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRecord {
    pub id: i64,
    pub team: String,
    pub resource: String,
    #[serde(default)]
    pub fallback_resource: String,
    /// `YYYY-MM-DD`.
    pub date: String,
    /// `HH:MM`, rounded to the quarter-hour grid during normalization.
    pub time: String,
    pub duration_min: i64,
    #[serde(flatten)]
    pub credentials: Credentials,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub repeat: RepeatRule,
    #[serde(default)]
    pub state: BookingState,
    /// Remote reservation id; empty until created.
    #[serde(default)]
    pub external_id: String,
    /// Remote id of the resource the reservation lives on.
    #[serde(default)]
    pub external_resource_id: String,
    /// One-sentence explanation of the most recent decision.
    #[serde(default)]
    pub message: String,
    /// Backoff deadline; the record is skipped while `now < next_eligible`.
    #[serde(default)]
    pub next_eligible: Epoch,
    #[serde(default)]
    pub retry_count: u32,
    /// True when the comment was supplied by the user (so it is never overwritten).
    #[serde(default)]
    pub user_comment: bool,
    /// Notification recipient; empty disables announcements for this record.
    #[serde(default)]
    pub notify_to: String,
    /// Actually granted start, if any.
    #[serde(default)]
    pub granted_start: Epoch,
    #[serde(default)]
    pub granted_duration_min: i64,
    #[serde(default)]
    pub log: Vec<LogEntry>,

    #[serde(skip)]
    pub epoch_date: Epoch,
    #[serde(skip)]
    pub epoch_start: Epoch,
    #[serde(skip)]
    pub epoch_end: Epoch,
    #[serde(skip)]
    pub changed: bool,
}

impl BookingRecord {
    pub fn desired_span(&self) -> Span {
        Span::new(self.epoch_start, self.epoch_end)
    }

    pub fn granted_span(&self) -> Option<Span> {
        if self.external_id.is_empty() || self.granted_duration_min <= 0 {
            return None;
        }
        Some(Span::new(
            self.granted_start,
            self.granted_start + self.granted_duration_min * MINUTE,
        ))
    }

    pub fn has_reservation(&self) -> bool {
        !self.external_id.is_empty()
    }

    /// Move to `next`, record the explanation, and append an audit line.
    pub fn transition(&mut self, next: BookingState, message: impl Into<String>, now: Epoch) {
        let message = message.into();
        if !self.state.may_transition(next) {
            tracing::warn!(
                from = %self.state,
                to = %next,
                id = self.id,
                "illegal state transition"
            );
            debug_assert!(false, "illegal transition {} -> {}", self.state, next);
        }
        self.state = next;
        self.message = message.clone();
        self.changed = true;
        self.log.push(LogEntry {
            at: now,
            state: next,
            text: message,
        });
    }

    /// Record the granted window after a successful create or move.
    pub fn grant(&mut self, span: Span) {
        self.granted_start = span.start;
        self.granted_duration_min = span.duration_min();
    }

    pub fn clear_grant(&mut self) {
        self.external_id.clear();
        self.granted_start = 0;
        self.granted_duration_min = 0;
    }
}

// ── Observed remote schedule ─────────────────────────────────────

/// What a slot on the remote grid stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotKind {
    /// Held by someone (possibly us) — attributable via `holder`/`external_id`.
    Reservation,
    /// Administrative no-book window; bounds the legal day window.
    Blocked,
    /// Resource closed for this range (e.g. out of service all day).
    NotAvailable,
}

/// One occupied interval on a resource's day grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub kind: SlotKind,
    pub span: Span,
    /// Opaque held-by label shown to humans on conflicts.
    #[serde(default)]
    pub holder: String,
    /// Remote reservation id; empty for rule slots.
    #[serde(default)]
    pub external_id: String,
}

/// Observed schedule of one resource for one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDay {
    pub external_id: String,
    pub name: String,
    #[serde(default)]
    pub slots: Vec<Slot>,
}

/// Observed schedule for one date — ephemeral, rebuilt on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySchedule {
    pub date: String,
    #[serde(default)]
    pub resources: Vec<ResourceDay>,
}

impl DaySchedule {
    /// Case-insensitive substring match, the way the remote lists names
    /// (`"Lynx (C2x)"` matches a request for `"lynx"`).
    pub fn find_resource(&self, name: &str) -> Option<&ResourceDay> {
        let needle = name.to_lowercase();
        self.resources
            .iter()
            .find(|r| r.name.to_lowercase().contains(&needle))
    }
}
