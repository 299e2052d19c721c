use std::collections::BTreeMap;

use bson::Document;
use serde::Deserialize;

use crate::{MemberRole, ServerAddress};

/// The parts of a `hello` reply the monitor cares about.
#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HelloReply {
    pub is_writable_primary: Option<bool>,
    /// Pre-4.4 spelling of `isWritablePrimary`.
    #[serde(rename = "ismaster")]
    pub is_master: Option<bool>,
    pub secondary: Option<bool>,
    pub arbiter_only: Option<bool>,
    pub hidden: Option<bool>,
    pub set_name: Option<String>,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub passives: Vec<String>,
    #[serde(default)]
    pub arbiters: Vec<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl HelloReply {
    pub fn from_document(document: Document) -> Result<Self, bson::de::Error> {
        bson::from_document(document)
    }

    pub fn role(&self) -> MemberRole {
        if self.set_name.is_none() {
            return MemberRole::Other;
        }
        if self.hidden.unwrap_or(false) {
            return MemberRole::Other;
        }
        if self.is_writable_primary.or(self.is_master).unwrap_or(false) {
            return MemberRole::Primary;
        }
        if self.secondary.unwrap_or(false) {
            return MemberRole::Secondary;
        }
        if self.arbiter_only.unwrap_or(false) {
            return MemberRole::Arbiter;
        }
        MemberRole::Other
    }

    /// Every member address this reply advertises. Unparsable entries are logged and skipped.
    pub fn advertised_members(&self) -> Vec<ServerAddress> {
        self.hosts
            .iter()
            .chain(self.passives.iter())
            .chain(self.arbiters.iter())
            .filter_map(|host| match ServerAddress::parse(host) {
                Ok(address) => Some(address),
                Err(e) => {
                    tracing::warn!("Ignoring advertised member `{}`. Caused by: {}", host, e);
                    None
                }
            })
            .collect()
    }
}
