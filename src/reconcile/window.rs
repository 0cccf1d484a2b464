use crate::config::Config;
use crate::model::*;

use super::schedule::trunc_to_slot;

/// What the resolver wants done for one record, given one observed day.
/// Pure data — the task executes it against the gateway afterwards, so the
/// whole decision logic is testable against literal slot lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// The granted window already matches; nothing to do.
    Noop,
    /// The legal window is not open or not wide enough yet.
    Wait { message: String, next_eligible: Epoch },
    /// Terminal — never retried.
    Fail { message: String },
    /// A foreign reservation (or an unknown resource) is in the way.
    Block {
        message: String,
        /// Cancel the reservation we currently hold before blocking
        /// (a new conflict appeared mid-hold).
        cancel_held: bool,
        /// Forget our granted window; the reservation is gone or void.
        drop_grant: bool,
    },
    /// Move our existing reservation to the clipped window.
    Move { span: Span },
    /// Create a fresh reservation for the clipped window.
    Create { span: Span, resource_id: String },
}

/// The day's legal bounds for one resource, discovered from the observed
/// schedule rather than configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DayWindow {
    sunrise: Epoch,
    sunset: Epoch,
    /// The hard closing bound from administrative markers alone, before
    /// closures shrink `sunset` further.
    sunset_window: Epoch,
}

impl DayWindow {
    /// The remote has not published this date when no bounds are visible.
    fn is_open(&self) -> bool {
        self.sunrise != 0 && self.sunset != Epoch::MAX
    }
}

/// Scan the administrative markers around the desired start. `Blocked`
/// slots fence the legal day window from both sides; `NotAvailable` slots
/// pull the closing bound in and void an opening bound they precede.
fn day_window(resource: &ResourceDay, desired_start: Epoch) -> DayWindow {
    let mut sunrise: Epoch = 0;
    let mut sunset: Epoch = Epoch::MAX;
    let mut sunset_window: Epoch = Epoch::MAX;

    for slot in &resource.slots {
        match slot.kind {
            SlotKind::Blocked => {
                if slot.span.start > desired_start {
                    sunset = sunset.min(slot.span.start);
                    sunset_window = sunset;
                }
                if slot.span.end < desired_start {
                    sunrise = sunrise.max(slot.span.end);
                }
            }
            SlotKind::NotAvailable => {
                if slot.span.start < sunset {
                    sunset = slot.span.start;
                }
                if slot.span.start < sunrise {
                    sunrise = 0;
                }
            }
            SlotKind::Reservation => {}
        }
    }

    DayWindow {
        sunrise,
        sunset,
        sunset_window,
    }
}

/// Decide the legally bookable interval and any blocking conflict for one
/// record against one observed day. Requires the record's epoch fields to
/// be derived already.
pub fn resolve(record: &BookingRecord, day: &DaySchedule, cfg: &Config) -> Plan {
    let Some(resource) = day.find_resource(&record.resource) else {
        return Plan::Block {
            message: format!("resource not found: {}", record.resource),
            cancel_held: false,
            drop_grant: false,
        };
    };

    let desired = record.desired_span();
    let window = day_window(resource, desired.start);
    let min_duration = cfg.min_duration_min * MINUTE;

    // The remote publishes a date only `book_window` hours ahead; align the
    // retry with the moment it is expected to open.
    if !window.is_open() {
        return Plan::Wait {
            message: "date not published yet".into(),
            next_eligible: trunc_to_slot(
                record.epoch_date - cfg.book_window_hours * HOUR,
            ),
        };
    }

    // Clip the desired interval into the legal day window, keeping at least
    // the minimal duration inside it.
    let end = window.sunset.min(desired.end);
    let start = window.sunrise.max(desired.start.min(end - min_duration));

    if end - start < min_duration {
        return Plan::Wait {
            message: format!(
                "available window shorter than {} min",
                cfg.min_duration_min
            ),
            next_eligible: trunc_to_slot(
                window.sunrise - cfg.book_window_hours * HOUR + min_duration,
            ),
        };
    }

    // A request lying wholly past the hard closing bound can never be
    // granted in any recognizable form; clipping it would book an interval
    // the user did not ask for.
    if desired.start >= window.sunset_window {
        return Plan::Fail {
            message: "booking beyond sunset not allowed".into(),
        };
    }

    let clipped = Span::new(start, end);

    // Conflict precedence: any foreign reservation overlapping the clipped
    // window blocks us, even if the window is otherwise legal.
    for slot in &resource.slots {
        if slot.kind != SlotKind::Reservation || slot.external_id == record.external_id {
            continue;
        }
        if slot.span.overlaps(&clipped) {
            let holder = if slot.holder.is_empty() {
                "another member"
            } else {
                &slot.holder
            };
            return Plan::Block {
                message: format!("booking blocked by {holder}"),
                cancel_held: record.state == BookingState::Moving && record.has_reservation(),
                drop_grant: true,
            };
        }
    }

    // Our own reservation, if any, only needs attention when the granted
    // window drifted from what is legally bookable now.
    if record.has_reservation() {
        if let Some(own) = resource
            .slots
            .iter()
            .find(|s| s.kind == SlotKind::Reservation && s.external_id == record.external_id)
        {
            if own.span == clipped {
                return Plan::Noop;
            }
            return Plan::Move { span: clipped };
        }
    }

    Plan::Create {
        span: clipped,
        resource_id: resource.external_id.clone(),
    }
}
