use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{WorldgraphError, WorldgraphResult};

pub const MAX_WORLD_ID_LEN: usize = 64;

/// Who is calling. Every data-plane operation is attributed to one actor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub kind: ActorKind,
    /// The tenant whose worlds this actor may touch.
    pub tenant_id: String,
}

impl Actor {
    pub fn tenant(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            tenant_id: id.clone(),
            id,
            kind: ActorKind::Tenant,
        }
    }

    pub fn service_account(id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ActorKind::ServiceAccount,
            tenant_id: tenant_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    Tenant,
    ServiceAccount,
}

impl ActorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActorKind::Tenant => "tenant",
            ActorKind::ServiceAccount => "service_account",
        }
    }
}

/// Where a world's database lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DatabaseLocation {
    Remote {
        hostname: String,
        /// Access token for the remote database. Never serialized out.
        #[serde(default, skip_serializing)]
        token: String,
    },
    LocalFile {
        path: String,
    },
}

/// Metadata for one tenant world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct World {
    pub id: String,
    pub tenant_id: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<DatabaseLocation>,
}

impl World {
    pub fn new(id: impl Into<String>, tenant_id: impl Into<String>, label: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            label: label.into(),
            description: String::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
            location: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// World ids are used as file names and remote database names.
pub fn validate_world_id(id: &str) -> WorldgraphResult<()> {
    if id.is_empty() || id.len() > MAX_WORLD_ID_LEN {
        return Err(WorldgraphError::invalid(format!(
            "world id must be 1..={MAX_WORLD_ID_LEN} characters"
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(WorldgraphError::invalid(format!(
            "world id `{id}` may only contain ASCII letters, digits, `_` and `-`"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn accepts_reasonable_ids() {
        for id in ["w1", "my-world", "World_2", &"a".repeat(64)] {
            validate_world_id(id).unwrap();
        }
    }

    #[test]
    fn rejects_path_like_ids() {
        for id in ["", "../etc", "a/b", "has space", "dot.db", &"a".repeat(65)] {
            let err = validate_world_id(id).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput, "{id}");
        }
    }

    #[test]
    fn remote_token_is_not_serialized() {
        let location = DatabaseLocation::Remote {
            hostname: "w1-org.example.io".to_string(),
            token: "secret".to_string(),
        };
        let json = serde_json::to_string(&location).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("\"kind\":\"remote\""));
    }

    #[test]
    fn tenant_actor_owns_its_own_tenant() {
        let actor = Actor::tenant("t1");
        assert_eq!(actor.tenant_id, "t1");
        assert_eq!(actor.kind.as_str(), "tenant");
    }
}
