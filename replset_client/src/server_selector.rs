use std::{fmt, time::Duration};

use rand::{seq::IteratorRandom, Rng};

use crate::{error_chain_fmt, Member, ReadPreference, ReadPreferenceMode, TagSet, TopologySnapshot};

/// Default width of the latency window above the fastest candidate.
pub const DEFAULT_LOCAL_THRESHOLD: Duration = Duration::from_millis(15);

/// Picks a member for a [`ReadPreference`] out of a [`TopologySnapshot`].
///
/// Selection runs in three steps:
/// 1. Keep the healthy members whose role the mode allows.
/// 2. Keep the members matching the first tag set that matches anything.
/// 3. Keep the members within `local_threshold` of the fastest survivor and pick one at random,
///    which spreads load across equally close members.
///
/// The selector holds no state besides its threshold, so it is safe to share between tasks.
#[derive(Debug, Clone, Copy)]
pub struct ServerSelector {
    local_threshold: Duration,
}

impl Default for ServerSelector {
    fn default() -> Self {
        Self::new(DEFAULT_LOCAL_THRESHOLD)
    }
}

impl ServerSelector {
    pub fn new(local_threshold: Duration) -> Self {
        Self { local_threshold }
    }

    pub fn local_threshold(&self) -> Duration {
        self.local_threshold
    }

    /// Selects a member using the thread-local random number generator.
    pub fn select(
        &self,
        read_preference: &ReadPreference,
        snapshot: &TopologySnapshot,
    ) -> Result<Member, SelectionError> {
        self.select_with_rng(read_preference, snapshot, &mut rand::thread_rng())
    }

    pub fn select_with_rng<R: Rng + ?Sized>(
        &self,
        read_preference: &ReadPreference,
        snapshot: &TopologySnapshot,
        rng: &mut R,
    ) -> Result<Member, SelectionError> {
        if !snapshot
            .healthy_members()
            .any(|m| m.role.is_data_bearing())
        {
            tracing::debug!(
                "No healthy primary or secondary in topology version {}, {} member(s) known",
                snapshot.version,
                snapshot.members.len()
            );
            return Err(SelectionError::TopologyUnavailable);
        }

        let candidates = self.eligible_members(read_preference, snapshot);
        let no_match = || SelectionError::NoMatchingServer {
            mode: read_preference.mode(),
            tag_sets: read_preference.tag_sets().to_vec(),
        };

        let selected = self
            .within_latency_window(candidates)
            .into_iter()
            .choose(rng)
            .cloned()
            .ok_or_else(no_match)?;

        tracing::trace!(
            "Selected {} ({}) for {}",
            selected.address,
            selected.role,
            read_preference.mode()
        );
        Ok(selected)
    }

    /// Members satisfying the role and tag constraints, before latency narrowing.
    pub fn eligible_members<'a>(
        &self,
        read_preference: &ReadPreference,
        snapshot: &'a TopologySnapshot,
    ) -> Vec<&'a Member> {
        let tag_sets = read_preference.tag_sets();
        let secondaries = || snapshot.secondaries().collect::<Vec<_>>();

        match read_preference.mode() {
            ReadPreferenceMode::Primary => snapshot.primary().into_iter().collect(),
            ReadPreferenceMode::PrimaryPreferred => match snapshot.primary() {
                Some(primary) => vec![primary],
                None => filter_by_tag_sets(secondaries(), tag_sets),
            },
            ReadPreferenceMode::Secondary => filter_by_tag_sets(secondaries(), tag_sets),
            ReadPreferenceMode::SecondaryPreferred => {
                let secondaries = secondaries();
                if secondaries.is_empty() {
                    snapshot.primary().into_iter().collect()
                } else {
                    filter_by_tag_sets(secondaries, tag_sets)
                }
            }
            ReadPreferenceMode::Nearest => {
                let data_bearing = snapshot
                    .healthy_members()
                    .filter(|m| m.role.is_data_bearing())
                    .collect();
                filter_by_tag_sets(data_bearing, tag_sets)
            }
        }
    }

    /// Members without a round trip sample are treated as having zero latency.
    fn within_latency_window<'a>(&self, candidates: Vec<&'a Member>) -> Vec<&'a Member> {
        let rtt = |m: &Member| m.round_trip_time.unwrap_or_default();
        let fastest = match candidates.iter().map(|m| rtt(m)).min() {
            Some(fastest) => fastest,
            None => return candidates,
        };
        let ceiling = fastest.saturating_add(self.local_threshold);

        candidates
            .into_iter()
            .filter(|m| rtt(m) <= ceiling)
            .collect()
    }
}

/// Applies `tag_sets` in order; the first tag set matching any member decides the result.
fn filter_by_tag_sets<'a>(members: Vec<&'a Member>, tag_sets: &[TagSet]) -> Vec<&'a Member> {
    if tag_sets.is_empty() {
        return members;
    }

    for tag_set in tag_sets {
        let matching = members
            .iter()
            .copied()
            .filter(|m| m.matches_tag_set(tag_set))
            .collect::<Vec<_>>();
        if !matching.is_empty() {
            return matching;
        }
    }

    Vec::new()
}

#[derive(thiserror::Error, Clone, PartialEq)]
pub enum SelectionError {
    #[error("No member matches read preference `{mode}` with tag sets {tag_sets:?}")]
    NoMatchingServer {
        mode: ReadPreferenceMode,
        tag_sets: Vec<TagSet>,
    },
    #[error("No replica-set member is available")]
    TopologyUnavailable,
}

impl fmt::Debug for SelectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        error_chain_fmt(self, f)
    }
}
