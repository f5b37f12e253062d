//! Tests for backup and restore
//!
//! These tests verify:
//! - Restore returns the table to exactly the backed-up state
//! - The manifest describes the copy
//! - Damaged or mismatched backups are rejected before anything live changes
//! - Restore invalidates cached results and is audited

use std::fs;

use tempfile::TempDir;
use tsvdb::{
    BackupManifest, Conditions, Config, Database, Observers, Operation, Record, Table,
    TableOptions, TsvError,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_db() -> (TempDir, Database) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::open(
        Config::builder()
            .data_dir(temp_dir.path().join("data"))
            .observers(Observers::new())
            .build(),
    )
    .unwrap();
    (temp_dir, db)
}

fn seeded_users(db: &Database) -> Table {
    let users = db
        .create_table_with("users", ["id", "name", "city"], TableOptions::audited())
        .unwrap();
    users
        .insert_many(&[
            Record::from([("id", "1"), ("name", "Alice"), ("city", "Oslo")]),
            Record::from([("id", "2"), ("name", "Bob"), ("city", "Rome")]),
            Record::from([("id", "3"), ("name", "Carol"), ("city", "Oslo")]),
        ])
        .unwrap();
    users.create_index("city").unwrap();
    users
}

fn snapshot(table: &Table) -> Vec<Vec<String>> {
    table
        .all()
        .unwrap()
        .map(|row| row.unwrap().into_values())
        .collect()
}

// =============================================================================
// Round trip
// =============================================================================

#[test]
fn test_restore_returns_backed_up_state() {
    let (temp, db) = setup_temp_db();
    let users = seeded_users(&db);
    let backup_dir = temp.path().join("backup");

    users.backup(&backup_dir).unwrap();
    let backed_up = snapshot(&users);

    users.delete(&Conditions::eq("id", "1")).unwrap();
    users.insert(&Record::from([("id", "4"), ("name", "Dan")])).unwrap();
    users
        .update(&Conditions::eq("id", "2"), &Record::from([("city", "Paris")]))
        .unwrap();
    assert_ne!(snapshot(&users), backed_up);

    users.restore(&backup_dir).unwrap();

    assert_eq!(snapshot(&users), backed_up);
    assert_eq!(users.count(&Conditions::eq("city", "Oslo")).unwrap(), 2);
    assert!(users.query_one(&Conditions::eq("id", "4")).unwrap().is_none());
    assert!(users.stats().unwrap().has_index("city"));
}

#[test]
fn test_restored_state_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let data_dir = temp.path().join("data");
    let backup_dir = temp.path().join("backup");
    let config = || {
        Config::builder()
            .data_dir(&data_dir)
            .observers(Observers::new())
            .build()
    };

    let expected = {
        let db = Database::open(config()).unwrap();
        let users = seeded_users(&db);
        users.backup(&backup_dir).unwrap();
        let expected = snapshot(&users);
        users.delete(&Conditions::all()).unwrap();
        users.restore(&backup_dir).unwrap();
        expected
    };

    let db = Database::open(config()).unwrap();
    let users = db.open_table("users").unwrap();
    assert_eq!(snapshot(&users), expected);
}

#[test]
fn test_manifest_contents() {
    let (temp, db) = setup_temp_db();
    let users = seeded_users(&db);
    let backup_dir = temp.path().join("backup");

    let manifest = users.backup(&backup_dir).unwrap();

    assert_eq!(manifest.table, "users");
    assert_eq!(manifest.columns, vec!["id", "name", "city"]);
    assert_eq!(manifest.row_count, 3);
    assert_eq!(manifest.crate_version, tsvdb::VERSION);
    assert_eq!(
        manifest.data.len,
        fs::metadata(backup_dir.join("users.tsv")).unwrap().len()
    );
    assert!(backup_dir.join("users.idx").exists());
    assert_eq!(BackupManifest::load(&backup_dir, "users").unwrap(), manifest);
}

#[test]
fn test_backup_copy_is_plain_tsv() {
    let (temp, db) = setup_temp_db();
    let users = seeded_users(&db);
    let backup_dir = temp.path().join("backup");
    users.backup(&backup_dir).unwrap();

    let text = fs::read_to_string(backup_dir.join("users.tsv")).unwrap();
    assert!(text.starts_with("id\tname\tcity\n1\tAlice\tOslo\n"));
    assert_eq!(text.lines().count(), 4);
}

#[test]
fn test_restore_without_index_copy_rebuilds() {
    let (temp, db) = setup_temp_db();
    let users = seeded_users(&db);
    let backup_dir = temp.path().join("backup");
    users.backup(&backup_dir).unwrap();
    fs::remove_file(backup_dir.join("users.idx")).unwrap();

    users.delete(&Conditions::all()).unwrap();
    users.restore(&backup_dir).unwrap();

    let row = users.query_one(&Conditions::eq("id", "3")).unwrap().unwrap();
    assert_eq!(row.get("name"), Some("Carol"));
    assert_eq!(users.count(&Conditions::all()).unwrap(), 3);
}

// =============================================================================
// Verification
// =============================================================================

#[test]
fn test_tampered_backup_rejected() {
    let (temp, db) = setup_temp_db();
    let users = seeded_users(&db);
    let backup_dir = temp.path().join("backup");
    users.backup(&backup_dir).unwrap();

    // Same length, different content
    let path = backup_dir.join("users.tsv");
    let text = fs::read_to_string(&path).unwrap().replace("Alice", "Alicf");
    fs::write(&path, text).unwrap();

    users.delete(&Conditions::eq("id", "2")).unwrap();
    let live = snapshot(&users);

    assert!(matches!(users.restore(&backup_dir), Err(TsvError::Backup(_))));
    assert_eq!(snapshot(&users), live);
}

#[test]
fn test_missing_manifest_rejected() {
    let (temp, db) = setup_temp_db();
    let users = seeded_users(&db);
    let backup_dir = temp.path().join("backup");
    users.backup(&backup_dir).unwrap();
    fs::remove_file(backup_dir.join("users.manifest")).unwrap();

    assert!(matches!(users.restore(&backup_dir), Err(TsvError::Backup(_))));
    assert!(matches!(
        users.restore(temp.path().join("nowhere")),
        Err(TsvError::Backup(_))
    ));
    assert_eq!(users.count(&Conditions::all()).unwrap(), 3);
}

#[test]
fn test_backup_with_other_columns_rejected() {
    let (temp, db) = setup_temp_db();
    let users = seeded_users(&db);
    let backup_dir = temp.path().join("backup");

    let other_db = Database::open(
        Config::builder()
            .data_dir(temp.path().join("other"))
            .observers(Observers::new())
            .build(),
    )
    .unwrap();
    let other = other_db.create_table("users", ["id", "email"]).unwrap();
    other.insert(&Record::from([("id", "9"), ("email", "x@y")])).unwrap();
    other.backup(&backup_dir).unwrap();

    assert!(matches!(users.restore(&backup_dir), Err(TsvError::Backup(_))));
    assert_eq!(users.columns(), vec!["id", "name", "city"]);
    assert_eq!(users.count(&Conditions::all()).unwrap(), 3);
}

// =============================================================================
// Cache / Audit
// =============================================================================

#[test]
fn test_restore_invalidates_cache() {
    let (temp, db) = setup_temp_db();
    let users = seeded_users(&db);
    let backup_dir = temp.path().join("backup");
    users.backup(&backup_dir).unwrap();

    users.delete(&Conditions::eq("city", "Oslo")).unwrap();
    let oslo = Conditions::eq("city", "Oslo");
    assert!(users.query(&oslo).unwrap().is_empty());

    users.restore(&backup_dir).unwrap();
    assert_eq!(users.query(&oslo).unwrap().len(), 2);
}

#[test]
fn test_restore_is_audited() {
    let (temp, db) = setup_temp_db();
    let users = seeded_users(&db);
    let backup_dir = temp.path().join("backup");
    users.backup(&backup_dir).unwrap();

    users.restore(&backup_dir).unwrap();
    assert!(users.restore(temp.path().join("nowhere")).is_err());

    let tail = db.observers().audit.tail(2);
    assert_eq!(tail[0].operation, Operation::Restore);
    assert!(tail[0].success);
    assert_eq!(tail[1].operation, Operation::Restore);
    assert!(!tail[1].success);
}
