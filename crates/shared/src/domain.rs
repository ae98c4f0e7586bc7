use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(SessionId);
id_newtype!(DevId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Like,
    Dislike,
}

impl DecisionKind {
    /// Path segment under `/devs/{id}/` that records this decision.
    pub fn path_segment(self) -> &'static str {
        match self {
            Self::Like => "likes",
            Self::Dislike => "dislikes",
        }
    }
}

/// A developer profile as served by the directory backend.
///
/// Field names on the wire follow the backend documents (`_id`, `name`,
/// `avatar`). GitHub leaves `name` and `bio` null for many accounts, so
/// those decode as empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateProfile {
    #[serde(rename = "_id")]
    pub id: DevId,
    #[serde(rename = "name", default, deserialize_with = "null_as_empty")]
    pub display_name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub bio: String,
    #[serde(rename = "avatar", default, deserialize_with = "null_as_empty")]
    pub avatar_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionEvent {
    pub candidate_id: DevId,
    pub kind: DecisionKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchNotification {
    pub profile: CandidateProfile,
    pub received_at: DateTime<Utc>,
}

impl MatchNotification {
    pub fn new(profile: CandidateProfile) -> Self {
        Self {
            profile,
            received_at: Utc::now(),
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
