use std::time::Duration;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

/// Per-team policy the reconciler consults while booking. Maintained by the
/// administrative surface; the driver only ever reads a snapshot of it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamPolicy {
    pub team: String,
    #[serde(default)]
    pub title: String,
    /// Comment prefix overriding the global one; empty falls back.
    #[serde(default)]
    pub prefix: String,
    /// Fill an empty comment with the booked time range.
    #[serde(default)]
    pub add_time: bool,
}

/// Immutable configuration snapshot for one tick. The driver clones this
/// out of shared state at tick start so an administrative update racing a
/// tick can never produce a torn read inside a task.
#[derive(Debug, Clone)]
pub struct Config {
    /// Minimal bookable duration in minutes; requests are clamped up to it.
    pub min_duration_min: i64,
    /// Maximal bookable duration in minutes; requests are clamped down to it.
    pub max_duration_min: i64,
    /// How many hours ahead of the day opening a request may be queued.
    pub book_window_hours: i64,
    /// Minutes before start at which a finished booking is confirmed; 0 disables.
    pub confirm_time_min: i64,
    /// Transient-failure ceiling before a record fails for good; 0 = unlimited.
    pub max_retry: u32,
    /// Tick alignment interval.
    pub refresh_interval: Duration,
    /// Upper bound on one record's reconciliation, covering all remote calls.
    pub task_timeout: Duration,
    /// Run exactly one tick and exit.
    pub single_run: bool,
    /// Global tag prepended to remote comments so our reservations are
    /// recognizable; teams may override it.
    pub comment_prefix: String,
    /// The club's UTC offset, applied when deriving absolute instants.
    pub utc_offset: FixedOffset,
    pub teams: Vec<TeamPolicy>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_duration_min: 60,
            max_duration_min: 120,
            book_window_hours: 48,
            confirm_time_min: 0,
            max_retry: 100,
            refresh_interval: Duration::from_secs(60),
            task_timeout: Duration::from_secs(120),
            single_run: false,
            comment_prefix: String::new(),
            utc_offset: FixedOffset::east_opt(0).expect("zero offset is valid"),
            teams: Vec::new(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl Config {
    /// Build a configuration from `HELMSMAN_*` environment variables,
    /// falling back to the defaults above.
    pub fn from_env() -> Self {
        let mut cfg = Config::default();
        if let Some(v) = env_parse("HELMSMAN_MIN_DURATION") {
            cfg.min_duration_min = v;
        }
        if let Some(v) = env_parse("HELMSMAN_MAX_DURATION") {
            cfg.max_duration_min = v;
        }
        if let Some(v) = env_parse("HELMSMAN_BOOK_WINDOW") {
            cfg.book_window_hours = v;
        }
        if let Some(v) = env_parse("HELMSMAN_CONFIRM_TIME") {
            cfg.confirm_time_min = v;
        }
        if let Some(v) = env_parse("HELMSMAN_MAX_RETRY") {
            cfg.max_retry = v;
        }
        if let Some(secs) = env_parse::<u64>("HELMSMAN_REFRESH_SECS") {
            cfg.refresh_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = env_parse::<u64>("HELMSMAN_TASK_TIMEOUT_SECS") {
            cfg.task_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(v) = env_parse("HELMSMAN_SINGLE_RUN") {
            cfg.single_run = v;
        }
        if let Ok(prefix) = std::env::var("HELMSMAN_PREFIX") {
            cfg.comment_prefix = prefix;
        }
        if let Ok(tz) = std::env::var("HELMSMAN_UTC_OFFSET") {
            match tz.parse::<FixedOffset>() {
                Ok(offset) => cfg.utc_offset = offset,
                Err(e) => tracing::error!("invalid HELMSMAN_UTC_OFFSET {tz:?}: {e}"),
            }
        }
        if let Ok(path) = std::env::var("HELMSMAN_TEAMS_FILE") {
            match load_teams(&path) {
                Ok(teams) => cfg.teams = teams,
                Err(e) => tracing::error!("cannot read teams file {path}: {e}"),
            }
        }
        cfg
    }

    pub fn team(&self, name: &str) -> Option<&TeamPolicy> {
        self.teams.iter().find(|t| t.team == name)
    }

    /// Team prefix when set, the global prefix otherwise.
    pub fn prefix_for(&self, team: &str) -> &str {
        match self.team(team) {
            Some(policy) if !policy.prefix.is_empty() => &policy.prefix,
            _ => &self.comment_prefix,
        }
    }
}

fn load_teams(path: &str) -> Result<Vec<TeamPolicy>, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.min_duration_min, 60);
        assert_eq!(cfg.max_duration_min, 120);
        assert_eq!(cfg.book_window_hours, 48);
        assert!(!cfg.single_run);
        assert_eq!(cfg.utc_offset.local_minus_utc(), 0);
    }

    #[test]
    fn prefix_falls_back_to_global() {
        let cfg = Config {
            comment_prefix: "[bot]".into(),
            teams: vec![
                TeamPolicy {
                    team: "blue".into(),
                    prefix: "[blue]".into(),
                    ..Default::default()
                },
                TeamPolicy {
                    team: "red".into(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        assert_eq!(cfg.prefix_for("blue"), "[blue]");
        assert_eq!(cfg.prefix_for("red"), "[bot]");
        assert_eq!(cfg.prefix_for("unknown"), "[bot]");
    }

    #[test]
    fn teams_deserialize_with_defaults() {
        let teams: Vec<TeamPolicy> =
            serde_json::from_str(r#"[{"team":"blue","add_time":true}]"#).unwrap();
        assert_eq!(teams.len(), 1);
        assert!(teams[0].add_time);
        assert!(teams[0].prefix.is_empty());
    }

    #[test]
    fn offset_parses() {
        let offset: FixedOffset = "+02:00".parse().unwrap();
        assert_eq!(offset.local_minus_utc(), 2 * 3600);
    }
}
