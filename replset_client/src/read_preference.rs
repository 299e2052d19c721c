use std::{fmt, str::FromStr};

use bson::{doc, Bson, Document};

use crate::{error_chain_fmt, TagSet};

/// Which replica-set roles may serve a read.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ReadPreferenceMode {
    #[default]
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

impl fmt::Display for ReadPreferenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReadPreferenceMode::Primary => "primary",
            ReadPreferenceMode::PrimaryPreferred => "primaryPreferred",
            ReadPreferenceMode::Secondary => "secondary",
            ReadPreferenceMode::SecondaryPreferred => "secondaryPreferred",
            ReadPreferenceMode::Nearest => "nearest",
        };
        f.write_str(s)
    }
}

impl FromStr for ReadPreferenceMode {
    type Err = ReadPreferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "primary" => Ok(ReadPreferenceMode::Primary),
            "primarypreferred" => Ok(ReadPreferenceMode::PrimaryPreferred),
            "secondary" => Ok(ReadPreferenceMode::Secondary),
            "secondarypreferred" => Ok(ReadPreferenceMode::SecondaryPreferred),
            "nearest" => Ok(ReadPreferenceMode::Nearest),
            _ => Err(ReadPreferenceError::UnknownMode(s.to_string())),
        }
    }
}

/// A mode plus an ordered list of tag sets.
///
/// Tag sets are tried left to right and the first one matching any eligible member wins. An empty
/// tag set matches every member, so it is only allowed in the last position.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReadPreference {
    mode: ReadPreferenceMode,
    tag_sets: Vec<TagSet>,
}

impl ReadPreference {
    pub fn new(
        mode: ReadPreferenceMode,
        tag_sets: Vec<TagSet>,
    ) -> Result<Self, ReadPreferenceError> {
        if let Some(position) = tag_sets.iter().position(|t| t.is_empty()) {
            if position != tag_sets.len() - 1 {
                return Err(ReadPreferenceError::InvalidTagSets(format!(
                    "the empty tag set must be last, found at position {}",
                    position
                )));
            }
        }

        if mode == ReadPreferenceMode::Primary && tag_sets.iter().any(|t| !t.is_empty()) {
            return Err(ReadPreferenceError::InvalidTagSets(
                "tag sets can not be combined with the primary mode".to_string(),
            ));
        }

        Ok(Self { mode, tag_sets })
    }

    pub fn primary() -> Self {
        Self::default()
    }

    pub fn primary_preferred() -> Self {
        Self::with_mode(ReadPreferenceMode::PrimaryPreferred)
    }

    pub fn secondary() -> Self {
        Self::with_mode(ReadPreferenceMode::Secondary)
    }

    pub fn secondary_preferred() -> Self {
        Self::with_mode(ReadPreferenceMode::SecondaryPreferred)
    }

    pub fn nearest() -> Self {
        Self::with_mode(ReadPreferenceMode::Nearest)
    }

    fn with_mode(mode: ReadPreferenceMode) -> Self {
        Self {
            mode,
            tag_sets: Vec::new(),
        }
    }

    pub fn mode(&self) -> ReadPreferenceMode {
        self.mode
    }

    pub fn tag_sets(&self) -> &[TagSet] {
        &self.tag_sets
    }

    /// The `$readPreference` document attached to commands routed with this preference.
    pub fn to_document(&self) -> Document {
        let mut document = doc! { "mode": self.mode.to_string() };
        if !self.tag_sets.is_empty() {
            let tags = self
                .tag_sets
                .iter()
                .map(|tag_set| {
                    Bson::Document(
                        tag_set
                            .iter()
                            .map(|(k, v)| (k.clone(), Bson::String(v.clone())))
                            .collect(),
                    )
                })
                .collect::<Vec<_>>();
            document.insert("tags", tags);
        }
        document
    }
}

#[derive(thiserror::Error, Clone, PartialEq, Eq)]
pub enum ReadPreferenceError {
    #[error("Invalid tag sets: {0}")]
    InvalidTagSets(String),
    #[error("Unknown read preference mode `{0}`")]
    UnknownMode(String),
}

impl fmt::Debug for ReadPreferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        error_chain_fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> TagSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn new_accepts_trailing_empty_tag_set() {
        let pref = ReadPreference::new(
            ReadPreferenceMode::SecondaryPreferred,
            vec![tags(&[("nodeType", "analytics")]), TagSet::new()],
        )
        .unwrap();

        assert_eq!(pref.mode(), ReadPreferenceMode::SecondaryPreferred);
        assert_eq!(pref.tag_sets().len(), 2);
    }

    #[test]
    fn new_rejects_empty_tag_set_before_others() {
        let result = ReadPreference::new(
            ReadPreferenceMode::Nearest,
            vec![TagSet::new(), tags(&[("dc", "east")])],
        );

        assert!(matches!(
            result,
            Err(ReadPreferenceError::InvalidTagSets(_))
        ));
    }

    #[test]
    fn new_rejects_tags_with_primary_mode() {
        let result = ReadPreference::new(ReadPreferenceMode::Primary, vec![tags(&[("dc", "east")])]);
        assert!(result.is_err());

        // A lone empty tag set is harmless
        assert!(ReadPreference::new(ReadPreferenceMode::Primary, vec![TagSet::new()]).is_ok());
    }

    #[test]
    fn mode_parses_case_insensitively_and_displays_camel_case() {
        let mode: ReadPreferenceMode = "SECONDARYPREFERRED".parse().unwrap();
        assert_eq!(mode, ReadPreferenceMode::SecondaryPreferred);
        assert_eq!(mode.to_string(), "secondaryPreferred");
        assert!("fastest".parse::<ReadPreferenceMode>().is_err());
    }

    #[test]
    fn to_document_lists_tag_sets_in_order() {
        // Arrange
        let pref = ReadPreference::new(
            ReadPreferenceMode::Nearest,
            vec![tags(&[("dc", "east")]), TagSet::new()],
        )
        .unwrap();

        // Act
        let document = pref.to_document();

        // Assert
        assert_eq!(
            document,
            doc! { "mode": "nearest", "tags": [{ "dc": "east" }, {}] }
        );
        assert_eq!(ReadPreference::primary().to_document(), doc! { "mode": "primary" });
    }
}
