use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension};

use crate::models::{CoreError, CoreErrorKind, InstallationOptions, ManagerId};
use crate::persistence::{InstallationOptionsStore, MigrationStore, PersistenceResult};
use crate::settings::{SettingsStore, parse_bool};
use crate::sqlite::migrations::{SqliteMigration, current_schema_version, migration, migrations};

const MIGRATIONS_TABLE: &str = "pkgbridge_schema_migrations";

/// Settings and installation options in one SQLite file. A connection is
/// opened per call, so the store is cheap to share across tasks.
pub struct SqliteStore {
    database_path: PathBuf,
}

impl SqliteStore {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
        }
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn planned_migrations(&self, from_version: i64) -> Vec<&'static SqliteMigration> {
        migrations()
            .iter()
            .filter(|entry| entry.version > from_version)
            .collect()
    }

    pub fn migrate_to_latest(&self) -> PersistenceResult<()> {
        self.apply_migration(current_schema_version())
    }

    pub fn setting(&self, key: &str) -> PersistenceResult<Option<String>> {
        self.with_connection("setting", |connection| {
            ensure_schema_ready(connection)?;
            connection
                .query_row(
                    "SELECT value FROM app_settings WHERE key = ?1",
                    [key],
                    |row| row.get::<_, String>(0),
                )
                .optional()
        })
    }

    pub fn set_setting(&self, key: &str, value: &str) -> PersistenceResult<()> {
        self.with_connection("set_setting", |connection| {
            ensure_schema_ready(connection)?;
            connection.execute(
                "
INSERT INTO app_settings (key, value, updated_at_unix)
VALUES (?1, ?2, strftime('%s', 'now'))
ON CONFLICT(key) DO UPDATE SET
    value = excluded.value,
    updated_at_unix = excluded.updated_at_unix
",
                (key, value),
            )?;
            Ok(())
        })
    }

    pub fn remove_setting(&self, key: &str) -> PersistenceResult<()> {
        self.with_connection("remove_setting", |connection| {
            ensure_schema_ready(connection)?;
            connection.execute("DELETE FROM app_settings WHERE key = ?1", [key])?;
            Ok(())
        })
    }

    pub fn list_settings(&self) -> PersistenceResult<Vec<(String, String)>> {
        self.with_connection("list_settings", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement =
                connection.prepare("SELECT key, value FROM app_settings ORDER BY key")?;
            let rows = statement.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect()
        })
    }

    fn with_connection<T>(
        &self,
        operation_name: &str,
        operation: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> PersistenceResult<T> {
        let mut connection = open_connection(&self.database_path)
            .map_err(|error| storage_error(operation_name, error))?;
        operation(&mut connection).map_err(|error| storage_error(operation_name, error))
    }
}

impl MigrationStore for SqliteStore {
    fn current_version(&self) -> PersistenceResult<i64> {
        self.with_connection("current_version", |connection| {
            ensure_migrations_table(connection)?;
            read_current_version(connection)
        })
    }

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()> {
        if target_version < 0 || target_version > current_schema_version() {
            return Err(storage_error_text(
                "apply_migration",
                format!("invalid migration target version '{target_version}'"),
            ));
        }

        if target_version > 0 && migration(target_version).is_none() {
            return Err(storage_error_text(
                "apply_migration",
                format!("migration version '{target_version}' is not defined"),
            ));
        }

        self.with_connection("apply_migration", |connection| {
            ensure_migrations_table(connection)?;
            let current_version = read_current_version(connection)?;

            if target_version > current_version {
                for version in (current_version + 1)..=target_version {
                    apply_up_migration(connection, defined_migration(version)?)?;
                }
            } else if target_version < current_version {
                for version in ((target_version + 1)..=current_version).rev() {
                    apply_down_migration(connection, defined_migration(version)?)?;
                }
            } else {
                // Recorded versions with missing tables: the DDL is idempotent.
                for version in 1..=target_version {
                    connection.execute_batch(defined_migration(version)?.up_sql)?;
                }
            }

            Ok(())
        })
    }
}

impl SettingsStore for SqliteStore {
    fn get_bool(&self, key: &str) -> bool {
        self.get_string(key).is_some_and(|value| parse_bool(&value))
    }

    fn get_string(&self, key: &str) -> Option<String> {
        match self.setting(key) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(key, %error, "failed to read setting");
                None
            }
        }
    }
}

impl InstallationOptionsStore for SqliteStore {
    fn load_options(
        &self,
        manager: ManagerId,
        package_id: &str,
    ) -> PersistenceResult<Option<InstallationOptions>> {
        let raw = self.with_connection("load_options", |connection| {
            ensure_schema_ready(connection)?;
            connection
                .query_row(
                    "SELECT options_json FROM installation_options
                     WHERE manager_id = ?1 AND package_id = ?2",
                    (manager.as_str(), package_id),
                    |row| row.get::<_, String>(0),
                )
                .optional()
        })?;

        raw.map(|raw| InstallationOptions::from_json(&raw))
            .transpose()
    }

    fn save_options(
        &self,
        manager: ManagerId,
        package_id: &str,
        options: &InstallationOptions,
    ) -> PersistenceResult<()> {
        let raw = options.to_json()?;
        self.with_connection("save_options", |connection| {
            ensure_schema_ready(connection)?;
            connection.execute(
                "
INSERT INTO installation_options (manager_id, package_id, options_json, updated_at_unix)
VALUES (?1, ?2, ?3, strftime('%s', 'now'))
ON CONFLICT(manager_id, package_id) DO UPDATE SET
    options_json = excluded.options_json,
    updated_at_unix = excluded.updated_at_unix
",
                (manager.as_str(), package_id, raw.as_str()),
            )?;
            Ok(())
        })
    }

    fn remove_options(&self, manager: ManagerId, package_id: &str) -> PersistenceResult<()> {
        self.with_connection("remove_options", |connection| {
            ensure_schema_ready(connection)?;
            connection.execute(
                "DELETE FROM installation_options WHERE manager_id = ?1 AND package_id = ?2",
                (manager.as_str(), package_id),
            )?;
            Ok(())
        })
    }
}

fn open_connection(database_path: &Path) -> rusqlite::Result<Connection> {
    if let Some(parent) = database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|error| rusqlite::Error::ToSqlConversionFailure(Box::new(error)))?;
    }
    Connection::open(database_path)
}

fn ensure_migrations_table(connection: &Connection) -> rusqlite::Result<()> {
    connection.execute_batch(&format!(
        "
CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at_unix INTEGER NOT NULL
);
"
    ))?;
    Ok(())
}

fn ensure_schema_ready(connection: &Connection) -> rusqlite::Result<()> {
    ensure_migrations_table(connection)?;
    let version = read_current_version(connection)?;
    if version <= 0 {
        return Err(storage_error_sqlite(
            "database schema is not initialized; apply migrations before use",
        ));
    }
    Ok(())
}

fn read_current_version(connection: &Connection) -> rusqlite::Result<i64> {
    connection.query_row(
        &format!("SELECT COALESCE(MAX(version), 0) FROM {MIGRATIONS_TABLE}"),
        [],
        |row| row.get(0),
    )
}

fn defined_migration(version: i64) -> rusqlite::Result<&'static SqliteMigration> {
    migration(version).ok_or_else(|| {
        storage_error_sqlite(&format!("migration version '{version}' is not defined"))
    })
}

fn apply_up_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.up_sql)?;
    transaction.execute(
        &format!(
            "INSERT INTO {MIGRATIONS_TABLE} (version, name, applied_at_unix)
             VALUES (?1, ?2, strftime('%s', 'now'))"
        ),
        (migration.version, migration.name),
    )?;
    transaction.commit()?;
    Ok(())
}

fn apply_down_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.down_sql)?;
    transaction.execute(
        &format!("DELETE FROM {MIGRATIONS_TABLE} WHERE version = ?1"),
        [migration.version],
    )?;
    transaction.commit()?;
    Ok(())
}

fn storage_error(operation: &str, error: rusqlite::Error) -> CoreError {
    storage_error_text(operation, error.to_string())
}

fn storage_error_sqlite(message: &str) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(message.to_string())))
}

fn storage_error_text(operation: &str, message: impl AsRef<str>) -> CoreError {
    CoreError {
        manager: None,
        task: None,
        action: None,
        kind: CoreErrorKind::StorageFailure,
        message: format!("sqlite store '{operation}' failed: {}", message.as_ref()),
    }
}
