//! Hoster type tags and descriptors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// Wire-level type tags. Existing crawlers match on these strings, so they
// must stay stable.
pub const HOST_TYPE_GITHUB: &str = "github";
pub const HOST_TYPE_GITEA: &str = "gitea";
pub const HOST_TYPE_GITLAB: &str = "gitlab";

#[derive(Debug, Error)]
#[error("unknown hoster type: {0}")]
pub struct UnknownHosterType(pub String);

/// Kind of hosting platform a registered instance runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HosterType {
    Github,
    Gitea,
    Gitlab,
}

impl HosterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HosterType::Github => HOST_TYPE_GITHUB,
            HosterType::Gitea => HOST_TYPE_GITEA,
            HosterType::Gitlab => HOST_TYPE_GITLAB,
        }
    }
}

impl fmt::Display for HosterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HosterType {
    type Err = UnknownHosterType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            HOST_TYPE_GITHUB => Ok(HosterType::Github),
            HOST_TYPE_GITEA => Ok(HosterType::Gitea),
            HOST_TYPE_GITLAB => Ok(HosterType::Gitlab),
            other => Err(UnknownHosterType(other.to_string())),
        }
    }
}

/// A registered hosting service instance.
///
/// The serialized form doubles as the worker-facing `crawler` descriptor
/// handed out with every block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hoster {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: HosterType,
    pub landingpage_url: String,
    pub api_url: String,
    /// Opaque per-hoster crawler configuration (page sizes, throttles, ...).
    #[serde(default)]
    pub config: serde_json::Value,
}

impl Hoster {
    /// State-store key for this hoster.
    pub fn prefix(&self) -> String {
        self.id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_tags_roundtrip() {
        for (tag, kind) in [
            ("github", HosterType::Github),
            ("gitea", HosterType::Gitea),
            ("gitlab", HosterType::Gitlab),
        ] {
            assert_eq!(tag.parse::<HosterType>().unwrap(), kind);
            assert_eq!(kind.to_string(), tag);
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = "sourcehut".parse::<HosterType>().unwrap_err();
        assert!(err.to_string().contains("sourcehut"));
    }

    #[test]
    fn hoster_serializes_type_as_tag() {
        let hoster = Hoster {
            id: 3,
            kind: HosterType::Gitea,
            landingpage_url: "https://codeberg.org".to_string(),
            api_url: "https://codeberg.org/api/v1".to_string(),
            config: serde_json::json!({"per_page": 50}),
        };

        let json = serde_json::to_value(&hoster).unwrap();
        assert_eq!(json["type"], "gitea");
        assert_eq!(json["id"], 3);
        assert_eq!(json["config"]["per_page"], 50);
        assert_eq!(hoster.prefix(), "3");
    }
}
