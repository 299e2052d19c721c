use tokio::time::Instant;

use crate::{Member, MemberRole, ServerAddress};

/// Immutable view of the replica set at one point in time.
///
/// The [`TopologyMonitor`](crate::TopologyMonitor) replaces the published snapshot wholesale after
/// every refresh, so a reader always sees a consistent set of members.
#[derive(Debug, Clone, Default)]
pub struct TopologySnapshot {
    /// Zero until the first refresh completes, then incremented on every refresh.
    pub version: u64,
    pub set_name: Option<String>,
    /// Sorted by address.
    pub members: Vec<Member>,
    pub refreshed_at: Option<Instant>,
}

impl TopologySnapshot {
    pub fn new(version: u64, set_name: Option<String>, mut members: Vec<Member>) -> Self {
        members.sort_by(|a, b| a.address.cmp(&b.address));
        Self {
            version,
            set_name,
            members,
            refreshed_at: Some(Instant::now()),
        }
    }

    /// The snapshot published before any refresh: version 0, no refresh time, and every seed as
    /// an unknown member.
    pub(crate) fn unrefreshed(set_name: Option<String>, members: Vec<Member>) -> Self {
        Self {
            refreshed_at: None,
            ..Self::new(0, set_name, members)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn member(&self, address: &ServerAddress) -> Option<&Member> {
        self.members.iter().find(|m| &m.address == address)
    }

    pub fn healthy_members(&self) -> impl Iterator<Item = &Member> {
        self.members.iter().filter(|m| m.is_healthy())
    }

    /// The healthy primary, if there is one.
    pub fn primary(&self) -> Option<&Member> {
        self.healthy_members()
            .find(|m| m.role == MemberRole::Primary)
    }

    /// Healthy secondaries.
    pub fn secondaries(&self) -> impl Iterator<Item = &Member> {
        self.healthy_members()
            .filter(|m| m.role == MemberRole::Secondary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HealthStatus;

    fn member(host: &str, role: MemberRole, healthy: bool) -> Member {
        let mut member = Member::new(ServerAddress::new(host, 27017));
        member.role = role;
        if healthy {
            member.health = HealthStatus::Healthy;
        } else {
            member.mark_unhealthy("down".into(), Instant::now());
        }
        member
    }

    #[test]
    fn new_sorts_members_by_address() {
        let snapshot = TopologySnapshot::new(
            1,
            None,
            vec![
                member("c", MemberRole::Secondary, true),
                member("a", MemberRole::Primary, true),
                member("b", MemberRole::Secondary, true),
            ],
        );

        let hosts = snapshot
            .members
            .iter()
            .map(|m| m.address.host.as_str())
            .collect::<Vec<_>>();
        assert_eq!(hosts, vec!["a", "b", "c"]);
    }

    #[test]
    fn primary_and_secondaries_skip_unhealthy_members() {
        let snapshot = TopologySnapshot::new(
            1,
            None,
            vec![
                member("a", MemberRole::Primary, false),
                member("b", MemberRole::Secondary, true),
                member("c", MemberRole::Secondary, false),
            ],
        );

        assert!(snapshot.primary().is_none());
        assert_eq!(snapshot.secondaries().count(), 1);
        assert_eq!(snapshot.healthy_members().count(), 1);
    }

    #[test]
    fn default_snapshot_is_empty_and_unpublished() {
        let snapshot = TopologySnapshot::default();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.version, 0);
        assert!(snapshot.refreshed_at.is_none());
    }
}
