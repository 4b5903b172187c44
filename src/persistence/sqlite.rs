// ABOUTME: SQLite persistence backend (C3), the default deployment driver
// ABOUTME: Runtime-checked queries via sqlx::query/query_as — no compile-time DATABASE_URL needed
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use super::{MainKeyRow, NewInstance, NewKeyRecord, NewUser, Persistence};
use crate::errors::{KeeperError, KeeperResult};
use crate::model::{Instance, KeyRecord, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};

/// SQLite-backed persistence. Default for development, single-node deployments, and
/// the integration test suite (in-memory `:memory:` databases).
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Connect to `database_url` (e.g. `sqlite::memory:` or `sqlite:///var/lib/keeper/keeper.db`).
    pub async fn connect(database_url: &str) -> KeeperResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    fn row_to_instance(row: &sqlx::sqlite::SqliteRow) -> KeeperResult<Instance> {
        Ok(Instance {
            id: row.try_get("id")?,
            identifier: row.try_get("identifier")?,
            keeper_kind: row.try_get("keeper_kind")?,
            users: row.try_get("users")?,
            d_safe_level: row.try_get("d_safe_level")?,
            ips: row.try_get("ips")?,
            is_frozen: row.try_get::<i64, _>("is_frozen")? != 0,
            created_at: parse_timestamp(row.try_get("created_at")?)?,
        })
    }

    fn row_to_key(row: &sqlx::sqlite::SqliteRow) -> KeeperResult<KeyRecord> {
        let id: i64 = row.try_get("id")?;
        let rotation: i64 = row.try_get("rotation")?;
        Ok(KeyRecord {
            id: id as u64,
            identifier: row.try_get("identifier")?,
            length: row.try_get::<i64, _>("length")? as u32,
            algorithm: row.try_get("algorithm")?,
            rotation: rotation as u64,
            salt: row.try_get("salt")?,
            created_at: parse_timestamp(row.try_get("created_at")?)?,
        })
    }

    fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> KeeperResult<User> {
        let last_login: Option<String> = row.try_get("last_login")?;
        Ok(User {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            passwd_hash: row.try_get("passwd")?,
            level: row.try_get("level")?,
            is_frozen: row.try_get::<i64, _>("is_frozen")? != 0,
            last_login: last_login.map(|s| parse_timestamp(s)).transpose()?,
            last_ip: row.try_get("last_ip")?,
            created_at: parse_timestamp(row.try_get("created_at")?)?,
            updated_at: parse_timestamp(row.try_get("updated_at")?)?,
        })
    }
}

fn parse_timestamp(raw: String) -> KeeperResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| KeeperError::unknown(format!("corrupt timestamp {raw}: {e}")))
}

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS t_manager_instances (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identifier TEXT NOT NULL UNIQUE,
    is_frozen INTEGER NOT NULL DEFAULT 0,
    keeper TEXT NOT NULL,
    users TEXT NOT NULL DEFAULT '',
    d_safe_level INTEGER NOT NULL DEFAULT 0,
    ips TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS t_manager_users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    passwd TEXT NOT NULL,
    level INTEGER NOT NULL DEFAULT 1,
    is_frozen INTEGER NOT NULL DEFAULT 0,
    last_login TEXT,
    last_ip TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS t_safer_instances (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identifier TEXT NOT NULL UNIQUE,
    key BLOB NOT NULL
);
CREATE TABLE IF NOT EXISTS t_safer_keys (
    id INTEGER NOT NULL,
    identifier TEXT NOT NULL,
    length INTEGER NOT NULL,
    algorithm TEXT NOT NULL,
    rotation INTEGER NOT NULL,
    ss BLOB NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (id, identifier)
);
";

#[async_trait]
impl Persistence for SqlitePersistence {
    async fn migrate(&self) -> KeeperResult<()> {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn find_instance_by_identifier(
        &self,
        identifier: &str,
    ) -> KeeperResult<Option<Instance>> {
        let row = sqlx::query(
            "SELECT id, identifier, keeper AS keeper_kind, users, d_safe_level, ips, is_frozen, created_at \
             FROM t_manager_instances WHERE identifier = ?",
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_instance).transpose()
    }

    async fn create_instance_row(&self, new: NewInstance) -> KeeperResult<Instance> {
        let now = Utc::now().to_rfc3339();
        let existing = self.find_instance_by_identifier(&new.identifier).await?;
        if existing.is_some() {
            return Err(KeeperError::instance_exist(&new.identifier));
        }
        sqlx::query(
            "INSERT INTO t_manager_instances (identifier, is_frozen, keeper, users, d_safe_level, ips, created_at) \
             VALUES (?, 0, ?, ?, ?, ?, ?)",
        )
        .bind(&new.identifier)
        .bind(&new.keeper_kind)
        .bind(&new.users)
        .bind(new.d_safe_level)
        .bind(&new.ips)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        self.find_instance_by_identifier(&new.identifier)
            .await?
            .ok_or_else(|| KeeperError::unknown("instance vanished immediately after insert"))
    }

    async fn list_instances(&self) -> KeeperResult<Vec<Instance>> {
        let rows = sqlx::query(
            "SELECT id, identifier, keeper AS keeper_kind, users, d_safe_level, ips, is_frozen, created_at \
             FROM t_manager_instances ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_instance).collect()
    }

    async fn delete_instance_by_identifier(&self, identifier: &str) -> KeeperResult<()> {
        sqlx::query("DELETE FROM t_manager_instances WHERE identifier = ?")
            .bind(identifier)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_instance_frozen(&self, identifier: &str, frozen: bool) -> KeeperResult<()> {
        sqlx::query("UPDATE t_manager_instances SET is_frozen = ? WHERE identifier = ?")
            .bind(i64::from(frozen))
            .bind(identifier)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_instance_users(&self, identifier: &str, users: &str) -> KeeperResult<()> {
        sqlx::query("UPDATE t_manager_instances SET users = ? WHERE identifier = ?")
            .bind(users)
            .bind(identifier)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_main_key(&self, identifier: &str) -> KeeperResult<Option<MainKeyRow>> {
        let row = sqlx::query("SELECT key FROM t_safer_instances WHERE identifier = ?")
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| MainKeyRow {
            identifier: identifier.to_owned(),
            key: r.get::<Vec<u8>, _>("key"),
        }))
    }

    async fn create_main_key(&self, identifier: &str, key: &[u8]) -> KeeperResult<()> {
        sqlx::query("INSERT INTO t_safer_instances (identifier, key) VALUES (?, ?)")
            .bind(identifier)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_main_key(&self, identifier: &str) -> KeeperResult<()> {
        sqlx::query("DELETE FROM t_safer_instances WHERE identifier = ?")
            .bind(identifier)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_key_row(&self, new: NewKeyRecord) -> KeeperResult<()> {
        sqlx::query(
            "INSERT INTO t_safer_keys (id, identifier, length, algorithm, rotation, ss, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(new.id as i64)
        .bind(&new.identifier)
        .bind(i64::from(new.length))
        .bind(&new.algorithm)
        .bind(new.rotation as i64)
        .bind(&new.salt)
        .bind(new.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                KeeperError::invalid_request("key id already exists for this tenant")
            }
            _ => KeeperError::from(e),
        })?;
        Ok(())
    }

    async fn find_key(&self, identifier: &str, id: u64) -> KeeperResult<Option<KeyRecord>> {
        let row = sqlx::query(
            "SELECT id, identifier, length, algorithm, rotation, ss AS salt, created_at \
             FROM t_safer_keys WHERE identifier = ? AND id = ?",
        )
        .bind(identifier)
        .bind(id as i64)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_key).transpose()
    }

    async fn list_keys_for_tenant(
        &self,
        identifier: &str,
        offset: i64,
        limit: i64,
    ) -> KeeperResult<(Vec<KeyRecord>, i64)> {
        let total: i64 = sqlx::query("SELECT COUNT(*) AS c FROM t_safer_keys WHERE identifier = ?")
            .bind(identifier)
            .fetch_one(&self.pool)
            .await?
            .try_get("c")?;

        let offset = offset.max(0);
        let rows = if limit == 0 {
            sqlx::query(
                "SELECT id, identifier, length, algorithm, rotation, ss AS salt, created_at \
                 FROM t_safer_keys WHERE identifier = ? ORDER BY id ASC LIMIT -1 OFFSET ?",
            )
            .bind(identifier)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT id, identifier, length, algorithm, rotation, ss AS salt, created_at \
                 FROM t_safer_keys WHERE identifier = ? ORDER BY id ASC LIMIT ? OFFSET ?",
            )
            .bind(identifier)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?
        };
        let records = rows.iter().map(Self::row_to_key).collect::<KeeperResult<Vec<_>>>()?;
        Ok((records, total))
    }

    async fn delete_key(&self, identifier: &str, id: u64) -> KeeperResult<()> {
        sqlx::query("DELETE FROM t_safer_keys WHERE identifier = ? AND id = ?")
            .bind(identifier)
            .bind(id as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_all_keys_for_tenant(&self, identifier: &str) -> KeeperResult<()> {
        sqlx::query("DELETE FROM t_safer_keys WHERE identifier = ?")
            .bind(identifier)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn destroy_tenant(&self, identifier: &str) -> KeeperResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM t_safer_keys WHERE identifier = ?")
            .bind(identifier)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM t_safer_instances WHERE identifier = ?")
            .bind(identifier)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_user_by_name(&self, name: &str) -> KeeperResult<Option<User>> {
        let row = sqlx::query(
            "SELECT id, name, passwd, level, is_frozen, last_login, last_ip, created_at, updated_at \
             FROM t_manager_users WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_user).transpose()
    }

    async fn find_user_by_id(&self, id: i64) -> KeeperResult<Option<User>> {
        let row = sqlx::query(
            "SELECT id, name, passwd, level, is_frozen, last_login, last_ip, created_at, updated_at \
             FROM t_manager_users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_user).transpose()
    }

    async fn create_user(&self, new: NewUser) -> KeeperResult<User> {
        let now = Utc::now().to_rfc3339();
        let existing = self.find_user_by_name(&new.name).await?;
        if existing.is_some() {
            return Err(KeeperError::user_exist(&new.name));
        }
        sqlx::query(
            "INSERT INTO t_manager_users (name, passwd, level, is_frozen, created_at, updated_at) \
             VALUES (?, ?, ?, 0, ?, ?)",
        )
        .bind(&new.name)
        .bind(&new.passwd_hash)
        .bind(new.level)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        self.find_user_by_name(&new.name)
            .await?
            .ok_or_else(|| KeeperError::unknown("user vanished immediately after insert"))
    }

    async fn list_users(&self) -> KeeperResult<Vec<User>> {
        let rows = sqlx::query(
            "SELECT id, name, passwd, level, is_frozen, last_login, last_ip, created_at, updated_at \
             FROM t_manager_users ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_user).collect()
    }

    async fn update_user_frozen(&self, id: i64, frozen: bool) -> KeeperResult<()> {
        sqlx::query("UPDATE t_manager_users SET is_frozen = ?, updated_at = ? WHERE id = ?")
            .bind(i64::from(frozen))
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_password_hash(&self, id: i64, passwd_hash: &str) -> KeeperResult<()> {
        sqlx::query("UPDATE t_manager_users SET passwd = ?, updated_at = ? WHERE id = ?")
            .bind(passwd_hash)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn touch_login(&self, id: i64, ip: &str, at: DateTime<Utc>) -> KeeperResult<()> {
        sqlx::query("UPDATE t_manager_users SET last_login = ?, last_ip = ? WHERE id = ?")
            .bind(at.to_rfc3339())
            .bind(ip)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_db() -> SqlitePersistence {
        let backend = SqlitePersistence::connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite always connects");
        backend.migrate().await.expect("schema creation succeeds");
        backend
    }

    #[tokio::test]
    async fn s5_destroy_is_transactional_and_total() {
        let backend = memory_db().await;
        backend
            .create_instance_row(NewInstance {
                identifier: "A".to_owned(),
                keeper_kind: "safer".to_owned(),
                users: "1".to_owned(),
                d_safe_level: 0,
                ips: String::new(),
            })
            .await
            .expect("fresh identifier");
        backend.create_main_key("A", &[7u8; 32]).await.expect("fresh main key");
        for id in 1..=3u64 {
            backend
                .create_key_row(NewKeyRecord {
                    id,
                    identifier: "A".to_owned(),
                    length: 16,
                    algorithm: "aes-cbc".to_owned(),
                    rotation: 0,
                    salt: vec![0u8; 32],
                    created_at: Utc::now(),
                })
                .await
                .expect("fresh key id");
        }

        backend.destroy_tenant("A").await.expect("destroy succeeds");
        backend
            .delete_instance_by_identifier("A")
            .await
            .expect("delete succeeds");

        assert!(backend.find_main_key("A").await.expect("query succeeds").is_none());
        let (rows, total) = backend.list_keys_for_tenant("A", 0, 0).await.expect("query succeeds");
        assert!(rows.is_empty());
        assert_eq!(total, 0);
        assert!(backend
            .find_instance_by_identifier("A")
            .await
            .expect("query succeeds")
            .is_none());
    }

    #[tokio::test]
    async fn duplicate_key_id_is_rejected() {
        let backend = memory_db().await;
        let new = NewKeyRecord {
            id: 1,
            identifier: "A".to_owned(),
            length: 16,
            algorithm: "aes-cbc".to_owned(),
            rotation: 0,
            salt: vec![0u8; 32],
            created_at: Utc::now(),
        };
        backend.create_key_row(new.clone()).await.expect("first insert succeeds");
        let err = backend.create_key_row(new).await.unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::Request);
    }
}
