// src/notify/antiflutter.rs
use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use super::EventKind;

/// Cooldown gate to prevent notification spam, tracked per `(kind, subject)`.
/// - First alert for a subject always allowed.
/// - Inside cooldown, repeats for that subject are suppressed.
/// - State is updated explicitly via `record_alert` after a successful send.
#[derive(Debug, Clone)]
pub struct AntiFlutter {
    cooldown: ChronoDuration,
    last: HashMap<(EventKind, String), DateTime<Utc>>,
}

impl AntiFlutter {
    /// `cooldown_secs` < 0 is treated as 0 (no cooldown).
    pub fn new(cooldown_secs: i64) -> Self {
        Self {
            cooldown: ChronoDuration::seconds(cooldown_secs.max(0)),
            last: HashMap::new(),
        }
    }

    /// Check if we may alert at `now`. Does NOT mutate state.
    pub fn should_alert(&self, kind: EventKind, subject: &str, now: DateTime<Utc>) -> bool {
        match self.last.get(&(kind, subject.to_string())) {
            None => true,
            Some(ts) => now.signed_duration_since(*ts) >= self.cooldown,
        }
    }

    pub fn record_alert(&mut self, kind: EventKind, subject: &str, now: DateTime<Utc>) {
        self.last.insert((kind, subject.to_string()), now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn inside_cooldown_blocked_then_passes() {
        let mut af = AntiFlutter::new(10_800);
        let t0 = Utc.with_ymd_and_hms(2025, 9, 6, 9, 0, 0).unwrap();
        assert!(af.should_alert(EventKind::AgentEliminated, "ada", t0));
        af.record_alert(EventKind::AgentEliminated, "ada", t0);

        let t1 = t0 + ChronoDuration::seconds(120);
        assert!(!af.should_alert(EventKind::AgentEliminated, "ada", t1));
        assert!(af.should_alert(EventKind::MissionAbandoned, "ada", t1));

        let t_after = t0 + ChronoDuration::seconds(10_800 + 5);
        assert!(af.should_alert(EventKind::AgentEliminated, "ada", t_after));
    }
}
