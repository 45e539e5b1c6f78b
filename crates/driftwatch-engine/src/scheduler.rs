//! Adaptive poll cadence: young events are polled often, old ones rarely.

use std::time::Duration;

use chrono::{DateTime, Utc};

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;

/// Floor on the time between two polls of one event, whatever the tier.
pub const MIN_COOLDOWN: Duration = Duration::from_secs(15 * MINUTE);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollTier {
    /// Exclusive upper bound on event age; `None` for the final tier.
    pub max_age: Option<Duration>,
    pub interval: Duration,
    pub label: &'static str,
}

pub const TIERS: [PollTier; 5] = [
    PollTier {
        max_age: Some(Duration::from_secs(6 * HOUR)),
        interval: Duration::from_secs(30 * MINUTE),
        label: "breaking",
    },
    PollTier {
        max_age: Some(Duration::from_secs(24 * HOUR)),
        interval: Duration::from_secs(2 * HOUR),
        label: "developing",
    },
    PollTier {
        max_age: Some(Duration::from_secs(3 * 24 * HOUR)),
        interval: Duration::from_secs(6 * HOUR),
        label: "stabilizing",
    },
    PollTier {
        max_age: Some(Duration::from_secs(7 * 24 * HOUR)),
        interval: Duration::from_secs(12 * HOUR),
        label: "cooling",
    },
    PollTier {
        max_age: None,
        interval: Duration::from_secs(24 * HOUR),
        label: "maintenance",
    },
];

/// Non-negative span from `earlier` to `later`; clock skew clamps to zero.
fn elapsed(earlier: DateTime<Utc>, later: DateTime<Utc>) -> Duration {
    (later - earlier).to_std().unwrap_or(Duration::ZERO)
}

/// The first tier whose max age exceeds the event's age.
pub fn tier_for(created_at: DateTime<Utc>, now: DateTime<Utc>) -> &'static PollTier {
    let age = elapsed(created_at, now);
    TIERS
        .iter()
        .find(|t| t.max_age.map_or(true, |max| age < max))
        .unwrap_or(&TIERS[TIERS.len() - 1])
}

pub fn polling_interval(created_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    tier_for(created_at, now).interval
}

/// True when the event was never polled, or the time since the last poll is
/// at least `max(tier interval, MIN_COOLDOWN)`.
pub fn is_due_for_poll(
    created_at: DateTime<Utc>,
    last_polled_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    let Some(last) = last_polled_at else {
        return true;
    };
    let required = polling_interval(created_at, now).max(MIN_COOLDOWN);
    elapsed(last, now) >= required
}
