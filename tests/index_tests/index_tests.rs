//! Tests for index maintenance
//!
//! These tests verify:
//! - Indexed and unindexed queries agree
//! - Index buckets follow inserts, updates and deletes
//! - The index artifact is reused when current
//! - Stale, corrupt or missing artifacts are rebuilt silently
//! - Secondary index declarations survive rebuilds

use std::collections::BTreeSet;
use std::fs;

use tempfile::TempDir;
use tsvdb::{
    Conditions, Config, Database, IndexSyncStrategy, Observers, Record, Table, TableOptions,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn config(temp_dir: &TempDir) -> Config {
    Config::builder()
        .data_dir(temp_dir.path())
        .index_sync_strategy(IndexSyncStrategy::EveryWrite)
        .observers(Observers::new())
        .build()
}

fn open_db(temp_dir: &TempDir) -> Database {
    Database::open(config(temp_dir)).unwrap()
}

fn orders(count: usize) -> Vec<Record> {
    (0..count)
        .map(|i| {
            Record::from([
                ("id", format!("o{}", i)),
                ("customer", format!("c{}", i % 5)),
                ("status", if i % 2 == 0 { "open" } else { "closed" }.to_string()),
            ])
        })
        .collect()
}

fn id_set(table: &Table, conditions: &Conditions) -> BTreeSet<String> {
    table
        .query(conditions)
        .unwrap()
        .into_iter()
        .map(|row| row.get("id").unwrap().to_string())
        .collect()
}

fn mutate(table: &Table) {
    table.insert_many(&orders(60)).unwrap();
    table.delete(&Conditions::eq("customer", "c3")).unwrap();
    table
        .update(&Conditions::eq("id", "o10"), &Record::from([("customer", "c9")]))
        .unwrap();
    table.delete(&Conditions::eq("id", "o0")).unwrap();
    table.insert(&Record::from([("id", "late"), ("customer", "c1")])).unwrap();
}

// =============================================================================
// Equivalence
// =============================================================================

#[test]
fn test_index_equivalence() {
    let plain_dir = TempDir::new().unwrap();
    let indexed_dir = TempDir::new().unwrap();

    let plain_db = open_db(&plain_dir);
    let plain = plain_db.create_table("orders", ["id", "customer", "status"]).unwrap();

    let indexed_db = open_db(&indexed_dir);
    let indexed = indexed_db.create_table("orders", ["id", "customer", "status"]).unwrap();
    indexed.create_index("customer").unwrap();

    mutate(&plain);
    mutate(&indexed);

    for customer in ["c0", "c1", "c2", "c3", "c4", "c9"] {
        let conditions = Conditions::eq("customer", customer);
        assert_eq!(id_set(&plain, &conditions), id_set(&indexed, &conditions), "{}", customer);
        assert_eq!(plain.count(&conditions).unwrap(), indexed.count(&conditions).unwrap());
    }

    let mixed = Conditions::eq("customer", "c1").and("status", "open");
    assert_eq!(id_set(&plain, &mixed), id_set(&indexed, &mixed));
}

#[test]
fn test_create_index_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let db = open_db(&temp);
    let table = db.create_table("orders", ["id", "customer", "status"]).unwrap();
    table.insert_many(&orders(10)).unwrap();

    assert!(table.create_index("customer").unwrap());
    assert!(!table.create_index("customer").unwrap());
    assert!(!table.create_index("id").unwrap());
    assert!(table.create_index("nope").is_err());
}

#[test]
fn test_table_without_id_column() {
    let temp = TempDir::new().unwrap();
    let db = open_db(&temp);
    let kv = db.create_table("settings", ["key", "value"]).unwrap();
    kv.insert(&Record::from([("key", "a"), ("value", "1")])).unwrap();

    assert!(kv.stats().unwrap().indexed_columns.is_empty());
    let row = kv.query_one(&Conditions::eq("key", "a")).unwrap().unwrap();
    assert_eq!(row.get("value"), Some("1"));
}

// =============================================================================
// Artifact reuse / recovery
// =============================================================================

#[test]
fn test_secondary_index_survives_reopen() {
    let temp = TempDir::new().unwrap();
    {
        let db = open_db(&temp);
        let table = db.create_table("orders", ["id", "customer", "status"]).unwrap();
        table.insert_many(&orders(20)).unwrap();
        table.create_index("status").unwrap();
    }

    let db = open_db(&temp);
    let table = db.open_table("orders").unwrap();
    assert!(table.stats().unwrap().has_index("status"));
    assert_eq!(table.count(&Conditions::eq("status", "open")).unwrap(), 10);
}

#[test]
fn test_corrupt_index_rebuilt_on_open() {
    let temp = TempDir::new().unwrap();
    {
        let db = open_db(&temp);
        let table = db.create_table("orders", ["id", "customer", "status"]).unwrap();
        table.insert_many(&orders(20)).unwrap();
    }

    let index_path = temp.path().join("orders.idx");
    let mut bytes = fs::read(&index_path).unwrap();
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0xff;
    fs::write(&index_path, &bytes).unwrap();

    let db = open_db(&temp);
    let table = db.open_table("orders").unwrap();
    let row = table.query_one(&Conditions::eq("id", "o7")).unwrap().unwrap();
    assert_eq!(row.get("customer"), Some("c2"));
}

#[test]
fn test_garbage_index_rebuilt_on_open() {
    let temp = TempDir::new().unwrap();
    {
        let db = open_db(&temp);
        let table = db.create_table("orders", ["id", "customer", "status"]).unwrap();
        table.insert_many(&orders(5)).unwrap();
    }
    fs::write(temp.path().join("orders.idx"), b"definitely not an index").unwrap();

    let db = open_db(&temp);
    let table = db.open_table("orders").unwrap();
    assert_eq!(table.query(&Conditions::eq("id", "o3")).unwrap().len(), 1);
}

#[test]
fn test_missing_index_rebuilt_on_open() {
    let temp = TempDir::new().unwrap();
    {
        let db = open_db(&temp);
        let table = db.create_table("orders", ["id", "customer", "status"]).unwrap();
        table.insert_many(&orders(5)).unwrap();
    }
    fs::remove_file(temp.path().join("orders.idx")).unwrap();

    let db = open_db(&temp);
    let table = db.open_table("orders").unwrap();
    assert_eq!(table.query(&Conditions::eq("id", "o4")).unwrap().len(), 1);
    assert!(temp.path().join("orders.idx").exists());
}

#[test]
fn test_stale_index_after_external_edit() {
    let temp = TempDir::new().unwrap();
    {
        let db = open_db(&temp);
        let table = db.create_table("orders", ["id", "customer", "status"]).unwrap();
        table.insert_many(&orders(3)).unwrap();
        table.create_index("customer").unwrap();
    }

    // Rows reordered by hand: offsets in the old index are now wrong
    fs::write(
        temp.path().join("orders.tsv"),
        "id\tcustomer\tstatus\no2\tc2\topen\no0\tc0\topen\no1\tc1\tclosed\n",
    )
    .unwrap();

    let db = open_db(&temp);
    let table = db.open_table("orders").unwrap();
    let row = table.query_one(&Conditions::eq("id", "o0")).unwrap().unwrap();
    assert_eq!(row.get("customer"), Some("c0"));
    assert_eq!(id_set(&table, &Conditions::eq("customer", "c2")), BTreeSet::from(["o2".to_string()]));
    assert!(table.stats().unwrap().has_index("customer"));
}

#[test]
fn test_lagging_index_with_batched_sync() {
    let temp = TempDir::new().unwrap();
    let batched = |temp: &TempDir| {
        Database::open(
            Config::builder()
                .data_dir(temp.path())
                .index_sync_strategy(IndexSyncStrategy::EveryNWrites { count: 1000 })
                .observers(Observers::new())
                .build(),
        )
        .unwrap()
    };

    {
        let db = batched(&temp);
        let table = db.create_table("orders", ["id", "customer", "status"]).unwrap();
        table.insert_many(&orders(10)).unwrap();
        table.flush().unwrap();
        table.insert(&Record::from([("id", "extra"), ("customer", "c0")])).unwrap();
        // Simulate a crash: the handle never gets to persist the index
        std::mem::forget(table);
        std::mem::forget(db);
    }

    let db = batched(&temp);
    let table = db.open_table("orders").unwrap();
    assert_eq!(table.count(&Conditions::all()).unwrap(), 11);
    assert!(table.query_one(&Conditions::eq("id", "extra")).unwrap().is_some());
}

#[test]
fn test_failed_index_save_does_not_fail_landed_write() {
    let temp = TempDir::new().unwrap();
    {
        let db = open_db(&temp);
        let table = db
            .create_table_with("orders", ["id", "customer", "status"], TableOptions::audited())
            .unwrap();

        // A directory where the index temp file goes makes every save fail
        let blocker = temp.path().join("orders.idx.tmp");
        fs::create_dir(&blocker).unwrap();

        table.insert(&Record::from([("id", "o1"), ("customer", "c1")])).unwrap();
        assert_eq!(table.count(&Conditions::all()).unwrap(), 1);
        let entry = &db.observers().audit.tail(1)[0];
        assert!(entry.success);

        fs::remove_dir(&blocker).unwrap();
        table.flush().unwrap();
    }

    let db = open_db(&temp);
    let table = db.open_table("orders").unwrap();
    assert_eq!(table.count(&Conditions::all()).unwrap(), 1);
    assert!(table.query_one(&Conditions::eq("id", "o1")).unwrap().is_some());
}
