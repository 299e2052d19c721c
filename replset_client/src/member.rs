use std::{collections::BTreeMap, fmt, time::Duration};

use tokio::time::Instant;

use crate::ServerAddress;

/// Labels attached to a member, or a set of labels a read preference asks for.
pub type TagSet = BTreeMap<String, String>;

/// Weight given to the newest round trip sample.
const RTT_ALPHA: f64 = 0.2;

/// One replica-set member as last seen by the [`TopologyMonitor`](crate::TopologyMonitor).
///
/// Members are only ever mutated by the monitor; callers receive them as part of an immutable
/// [`TopologySnapshot`](crate::TopologySnapshot).
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub address: ServerAddress,
    pub role: MemberRole,
    pub tags: TagSet,
    pub health: HealthStatus,
    /// Moving average of the `hello` round trip time.
    pub round_trip_time: Option<Duration>,
    /// Replica-set name the member reported.
    pub set_name: Option<String>,
    pub last_update: Option<Instant>,
}

impl Member {
    pub fn new(address: ServerAddress) -> Self {
        Self {
            address,
            role: MemberRole::default(),
            tags: TagSet::new(),
            health: HealthStatus::default(),
            round_trip_time: None,
            set_name: None,
            last_update: None,
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.health, HealthStatus::Healthy)
    }

    /// Returns `true` when every key/value pair of `tag_set` is present on this member.
    pub fn matches_tag_set(&self, tag_set: &TagSet) -> bool {
        tag_set
            .iter()
            .all(|(key, value)| self.tags.get(key) == Some(value))
    }

    pub(crate) fn record_round_trip(&mut self, sample: Duration) {
        self.round_trip_time = Some(match self.round_trip_time {
            Some(average) => average.mul_f64(1.0 - RTT_ALPHA) + sample.mul_f64(RTT_ALPHA),
            None => sample,
        });
    }

    pub(crate) fn mark_unhealthy(&mut self, error: String, now: Instant) {
        let since = match &self.health {
            HealthStatus::Unhealthy { since, .. } => *since,
            _ => now,
        };
        self.health = HealthStatus::Unhealthy {
            since,
            last_error: error,
        };
        self.last_update = Some(now);
    }
}

#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Hash)]
pub enum MemberRole {
    #[default]
    Unknown,
    Primary,
    Secondary,
    Arbiter,
    /// Hidden, starting up, recovering or otherwise not serving reads.
    Other,
}

impl MemberRole {
    pub fn is_data_bearing(self) -> bool {
        matches!(self, MemberRole::Primary | MemberRole::Secondary)
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemberRole::Unknown => "UNKNOWN",
            MemberRole::Primary => "PRIMARY",
            MemberRole::Secondary => "SECONDARY",
            MemberRole::Arbiter => "ARBITER",
            MemberRole::Other => "OTHER",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub enum HealthStatus {
    /// Never checked.
    #[default]
    Unknown,
    Healthy,
    Unhealthy { since: Instant, last_error: String },
}
