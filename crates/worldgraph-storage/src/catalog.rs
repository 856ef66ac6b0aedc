//! World metadata in the control-plane database.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use worldgraph_core::{
    validate_world_id, DatabaseLocation, SharedConnection, World, WorldgraphError, WorldgraphResult,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS worlds (
    id          TEXT PRIMARY KEY,
    tenant_id   TEXT NOT NULL,
    label       TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    deleted_at  TEXT,
    db_hostname TEXT,
    db_token    TEXT,
    db_path     TEXT
);
CREATE INDEX IF NOT EXISTS worlds_tenant_idx ON worlds(tenant_id);
";

const COLUMNS: &str =
    "id, tenant_id, label, description, created_at, updated_at, deleted_at, db_hostname, db_token, db_path";

pub struct WorldCatalog {
    conn: SharedConnection,
}

impl WorldCatalog {
    pub fn open(conn: SharedConnection) -> WorldgraphResult<Self> {
        conn.lock().execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Insert a new world. A live world with the same id is a Conflict; a
    /// soft-deleted one is replaced.
    pub fn insert(&self, world: &World) -> WorldgraphResult<()> {
        validate_world_id(&world.id)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let existing: Option<Option<String>> = tx
            .query_row(
                "SELECT deleted_at FROM worlds WHERE id = ?1",
                params![world.id],
                |row| row.get(0),
            )
            .optional()?;
        match existing {
            Some(None) => {
                return Err(WorldgraphError::conflict(format!(
                    "world `{}` already exists",
                    world.id
                )))
            }
            Some(Some(_)) => {
                tx.execute("DELETE FROM worlds WHERE id = ?1", params![world.id])?;
            }
            None => {}
        }
        let (hostname, token, path) = location_columns(world.location.as_ref());
        tx.execute(
            &format!("INSERT INTO worlds ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
            params![
                world.id,
                world.tenant_id,
                world.label,
                world.description,
                world.created_at.to_rfc3339(),
                world.updated_at.to_rfc3339(),
                world.deleted_at.map(|t| t.to_rfc3339()),
                hostname,
                token,
                path,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Live world by id. Soft-deleted worlds are NotFound.
    pub fn get(&self, world_id: &str) -> WorldgraphResult<World> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM worlds WHERE id = ?1 AND deleted_at IS NULL"),
            params![world_id],
            world_from_row,
        )
        .optional()?
        .ok_or_else(|| WorldgraphError::not_found(format!("world `{world_id}`")))
    }

    pub fn list_by_tenant(&self, tenant_id: &str) -> WorldgraphResult<Vec<World>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM worlds
             WHERE tenant_id = ?1 AND deleted_at IS NULL
             ORDER BY created_at, id"
        ))?;
        let rows = stmt.query_map(params![tenant_id], world_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn set_location(&self, world_id: &str, location: &DatabaseLocation) -> WorldgraphResult<()> {
        let (hostname, token, path) = location_columns(Some(location));
        let changed = self.conn.lock().execute(
            "UPDATE worlds SET db_hostname = ?2, db_token = ?3, db_path = ?4, updated_at = ?5
             WHERE id = ?1 AND deleted_at IS NULL",
            params![world_id, hostname, token, path, Utc::now().to_rfc3339()],
        )?;
        if changed == 0 {
            return Err(WorldgraphError::not_found(format!("world `{world_id}`")));
        }
        Ok(())
    }

    pub fn soft_delete(&self, world_id: &str) -> WorldgraphResult<()> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.lock().execute(
            "UPDATE worlds SET deleted_at = ?2, updated_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
            params![world_id, now],
        )?;
        if changed == 0 {
            return Err(WorldgraphError::not_found(format!("world `{world_id}`")));
        }
        Ok(())
    }
}

fn location_columns(
    location: Option<&DatabaseLocation>,
) -> (Option<String>, Option<String>, Option<String>) {
    match location {
        Some(DatabaseLocation::Remote { hostname, token }) => {
            (Some(hostname.clone()), Some(token.clone()), None)
        }
        Some(DatabaseLocation::LocalFile { path }) => (None, None, Some(path.clone())),
        None => (None, None, None),
    }
}

fn parse_time(raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn world_from_row(row: &Row<'_>) -> rusqlite::Result<World> {
    let hostname: Option<String> = row.get(7)?;
    let token: Option<String> = row.get(8)?;
    let path: Option<String> = row.get(9)?;
    let location = match (hostname, path) {
        (Some(hostname), _) => Some(DatabaseLocation::Remote {
            hostname,
            token: token.unwrap_or_default(),
        }),
        (None, Some(path)) => Some(DatabaseLocation::LocalFile { path }),
        (None, None) => None,
    };
    let deleted_at: Option<String> = row.get(6)?;
    Ok(World {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        label: row.get(2)?,
        description: row.get(3)?,
        created_at: parse_time(row.get(4)?)?,
        updated_at: parse_time(row.get(5)?)?,
        deleted_at: deleted_at.map(parse_time).transpose()?,
        location,
    })
}
