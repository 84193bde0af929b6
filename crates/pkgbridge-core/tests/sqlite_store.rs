use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use pkgbridge_core::models::{
    Architecture, CoreErrorKind, InstallationOptions, ManagerId, PackageScope,
};
use pkgbridge_core::persistence::{InstallationOptionsStore, MigrationStore};
use pkgbridge_core::settings::SettingsStore;
use pkgbridge_core::sqlite::{SqliteStore, current_schema_version};

fn test_db_path(test_name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("pkgbridge-{test_name}-{nanos}.sqlite3"))
}

fn migrated_store(test_name: &str) -> SqliteStore {
    let store = SqliteStore::new(test_db_path(test_name));
    store.migrate_to_latest().expect("migrations should apply");
    store
}

#[test]
fn fresh_database_starts_at_version_zero() {
    let store = SqliteStore::new(test_db_path("fresh"));

    assert_eq!(store.current_version().unwrap(), 0);
    assert_eq!(store.planned_migrations(0).len(), current_schema_version() as usize);
}

#[test]
fn migrations_apply_and_roll_back() {
    let store = migrated_store("rollback");
    assert_eq!(store.current_version().unwrap(), current_schema_version());

    store.migrate_to_latest().unwrap();
    assert_eq!(store.current_version().unwrap(), current_schema_version());

    store.apply_migration(0).unwrap();
    assert_eq!(store.current_version().unwrap(), 0);
}

#[test]
fn undefined_migration_target_is_a_storage_failure() {
    let store = SqliteStore::new(test_db_path("undefined"));
    let error = store
        .apply_migration(current_schema_version() + 1)
        .unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::StorageFailure);
}

#[test]
fn unmigrated_database_refuses_reads() {
    let store = SqliteStore::new(test_db_path("unmigrated"));
    let error = store.setting("DisableWinGet").unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::StorageFailure);
    assert!(error.message.contains("not initialized"));
    assert!(!store.get_bool("DisableWinGet"));
}

#[test]
fn settings_are_upserted_and_removed() {
    let store = migrated_store("settings");

    store.set_setting("DisableScoop", "true").unwrap();
    store
        .set_setting("WinGetExecutablePath", "C:\\tools\\winget.exe")
        .unwrap();
    assert!(store.get_bool("DisableScoop"));

    store.set_setting("DisableScoop", "false").unwrap();
    assert!(!store.get_bool("DisableScoop"));
    assert_eq!(
        store.list_settings().unwrap(),
        vec![
            ("DisableScoop".to_string(), "false".to_string()),
            (
                "WinGetExecutablePath".to_string(),
                "C:\\tools\\winget.exe".to_string()
            ),
        ]
    );

    store.remove_setting("WinGetExecutablePath").unwrap();
    assert_eq!(store.get_string("WinGetExecutablePath"), None);
}

#[test]
fn installation_options_survive_reopening() {
    let path = test_db_path("options");
    let options = InstallationOptions {
        skip_hash_check: true,
        run_as_administrator: true,
        version: Some("3.0.20".to_string()),
        architecture: Some(Architecture::X64),
        scope: Some(PackageScope::Global),
        custom_parameters: vec!["--no-upgrade".to_string()],
        ..InstallationOptions::default()
    };

    {
        let store = SqliteStore::new(&path);
        store.migrate_to_latest().unwrap();
        store
            .save_options(ManagerId::Winget, "VideoLAN.VLC", &options)
            .unwrap();
    }

    let reopened = SqliteStore::new(&path);
    assert_eq!(
        reopened
            .load_options(ManagerId::Winget, "VideoLAN.VLC")
            .unwrap(),
        Some(options)
    );
    assert_eq!(
        reopened
            .load_options(ManagerId::Chocolatey, "VideoLAN.VLC")
            .unwrap(),
        None
    );

    reopened
        .remove_options(ManagerId::Winget, "VideoLAN.VLC")
        .unwrap();
    assert_eq!(
        reopened
            .load_options(ManagerId::Winget, "VideoLAN.VLC")
            .unwrap(),
        None
    );
}
