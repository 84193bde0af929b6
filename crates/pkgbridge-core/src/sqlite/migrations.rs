/// One schema step. Versions start at 1 and have no gaps.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SqliteMigration {
    pub version: i64,
    pub name: &'static str,
    pub up_sql: &'static str,
    pub down_sql: &'static str,
}

const MIGRATIONS: &[SqliteMigration] = &[
    // Manager toggles and executable overrides, e.g. `DisableWinGet`.
    SqliteMigration {
        version: 1,
        name: "app_settings",
        up_sql: "
CREATE TABLE IF NOT EXISTS app_settings (
    key TEXT PRIMARY KEY NOT NULL CHECK (length(key) > 0),
    value TEXT NOT NULL,
    updated_at_unix INTEGER NOT NULL
);",
        down_sql: "DROP TABLE IF EXISTS app_settings;",
    },
    // Options the user chose per package, stored as their serde JSON.
    SqliteMigration {
        version: 2,
        name: "installation_options",
        up_sql: "
CREATE TABLE IF NOT EXISTS installation_options (
    manager_id TEXT NOT NULL,
    package_id TEXT NOT NULL,
    options_json TEXT NOT NULL CHECK (json_valid(options_json)),
    updated_at_unix INTEGER NOT NULL,
    PRIMARY KEY (manager_id, package_id)
);",
        down_sql: "DROP TABLE IF EXISTS installation_options;",
    },
];

pub fn migrations() -> &'static [SqliteMigration] {
    MIGRATIONS
}

pub fn migration(version: i64) -> Option<&'static SqliteMigration> {
    let index = usize::try_from(version.checked_sub(1)?).ok()?;
    MIGRATIONS.get(index)
}

pub fn current_schema_version() -> i64 {
    MIGRATIONS.len() as i64
}
