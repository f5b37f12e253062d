//! Tests for Transaction
//!
//! These tests verify:
//! - Commit applies every buffered mutation at once
//! - Errors, explicit aborts and dropped handles roll back fully
//! - Outside readers never see uncommitted state
//! - Only one transaction per table at a time
//! - Leftover working files are cleaned up on open

use std::fs;

use tempfile::TempDir;
use tsvdb::{Conditions, Config, Database, Observers, Record, Table, TsvError, TxnState};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_accounts() -> (TempDir, Database, Table) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::open(
        Config::builder()
            .data_dir(temp_dir.path())
            .lock_timeout_ms(50)
            .observers(Observers::new())
            .build(),
    )
    .unwrap();
    let accounts = db.create_table("accounts", ["id", "name", "balance"]).unwrap();
    accounts
        .insert_many(&[
            Record::from([("id", "1"), ("name", "Alice"), ("balance", "1000")]),
            Record::from([("id", "2"), ("name", "Bob"), ("balance", "1000")]),
        ])
        .unwrap();
    (temp_dir, db, accounts)
}

fn balance(table: &Table, id: &str) -> i64 {
    table
        .query_one(&Conditions::eq("id", id))
        .unwrap()
        .unwrap()
        .get("balance")
        .unwrap()
        .parse()
        .unwrap()
}

fn snapshot(table: &Table) -> Vec<Vec<String>> {
    table
        .all()
        .unwrap()
        .map(|row| row.unwrap().into_values())
        .collect()
}

// =============================================================================
// Commit
// =============================================================================

#[test]
fn test_transfer_commits_atomically() {
    let (_temp, _db, accounts) = setup_accounts();

    accounts
        .run_in_transaction(|tx| {
            let alice = tx.query_one(&Conditions::eq("id", "1"))?.unwrap();
            let debit: i64 = alice.get("balance").unwrap().parse().unwrap();
            tx.update(
                &Conditions::eq("id", "1"),
                &Record::from([("balance", (debit - 100).to_string())]),
            )?;

            let bob = tx.query_one(&Conditions::eq("id", "2"))?.unwrap();
            let credit: i64 = bob.get("balance").unwrap().parse().unwrap();
            tx.update(
                &Conditions::eq("id", "2"),
                &Record::from([("balance", (credit + 100).to_string())]),
            )?;
            Ok(())
        })
        .unwrap();

    assert_eq!(balance(&accounts, "1"), 900);
    assert_eq!(balance(&accounts, "2"), 1100);
}

#[test]
fn test_explicit_commit_and_state() {
    let (_temp, _db, accounts) = setup_accounts();

    let mut tx = accounts.transaction().unwrap();
    assert_eq!(tx.state(), TxnState::Open);
    tx.insert(&Record::from([("id", "3"), ("name", "Carol"), ("balance", "5")]))
        .unwrap();
    assert_eq!(tx.delete(&Conditions::eq("id", "1")).unwrap(), 1);
    assert_eq!(tx.count(&Conditions::all()).unwrap(), 2);
    tx.commit().unwrap();

    let ids: Vec<String> = snapshot(&accounts).into_iter().map(|v| v[0].clone()).collect();
    assert_eq!(ids, vec!["2", "3"]);
    assert!(accounts.query_one(&Conditions::eq("id", "3")).unwrap().is_some());
}

#[test]
fn test_commit_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let config = || {
        Config::builder()
            .data_dir(temp.path())
            .observers(Observers::new())
            .build()
    };
    {
        let db = Database::open(config()).unwrap();
        let table = db.create_table("items", ["id", "qty"]).unwrap();
        table
            .run_in_transaction(|tx| {
                tx.insert_many(&[
                    Record::from([("id", "a"), ("qty", "1")]),
                    Record::from([("id", "b"), ("qty", "2")]),
                ])
            })
            .unwrap();
    }

    let db = Database::open(config()).unwrap();
    let table = db.open_table("items").unwrap();
    assert_eq!(table.count(&Conditions::all()).unwrap(), 2);
    assert_eq!(
        table.query_one(&Conditions::eq("id", "b")).unwrap().unwrap().get("qty"),
        Some("2")
    );
}

// =============================================================================
// Rollback
// =============================================================================

#[test]
fn test_error_in_scope_rolls_back() {
    let (_temp, _db, accounts) = setup_accounts();
    let before = snapshot(&accounts);

    let result: Result<(), TsvError> = accounts.run_in_transaction(|tx| {
        tx.update(&Conditions::eq("id", "1"), &Record::from([("balance", "0")]))?;
        Err(TsvError::Rejected("insufficient funds".to_string()))
    });

    match result {
        Err(TsvError::TransactionAborted { source }) => {
            assert!(matches!(*source, TsvError::Rejected(_)));
        }
        other => panic!("expected TransactionAborted, got {:?}", other),
    }
    assert_eq!(snapshot(&accounts), before);
    assert_eq!(balance(&accounts, "1"), 1000);
}

#[test]
fn test_failing_operation_aborts_transaction() {
    let (_temp, _db, accounts) = setup_accounts();
    let before = snapshot(&accounts);

    let mut tx = accounts.transaction().unwrap();
    tx.update(&Conditions::eq("id", "1"), &Record::from([("balance", "1")]))
        .unwrap();

    let bad = tx.insert(&Record::from([("id", "3"), ("name", "tab\there")]));
    assert!(matches!(bad, Err(TsvError::TransactionAborted { .. })));
    assert_eq!(tx.state(), TxnState::Aborted);

    // The handle is closed; the table is untouched
    assert!(matches!(
        tx.count(&Conditions::all()),
        Err(TsvError::TransactionClosed)
    ));
    assert!(matches!(tx.commit(), Err(TsvError::TransactionClosed)));
    assert_eq!(snapshot(&accounts), before);
}

#[test]
fn test_error_from_operation_is_not_double_wrapped() {
    let (_temp, _db, accounts) = setup_accounts();

    let result = accounts.run_in_transaction(|tx| {
        tx.insert(&Record::from([("id", "3"), ("name", "bad\nname")]))
    });

    match result {
        Err(TsvError::TransactionAborted { source }) => {
            assert!(matches!(*source, TsvError::InvalidValue { .. }));
        }
        other => panic!("expected TransactionAborted, got {:?}", other),
    }
}

#[test]
fn test_explicit_abort() {
    let (_temp, _db, accounts) = setup_accounts();
    let before = snapshot(&accounts);

    let mut tx = accounts.transaction().unwrap();
    tx.delete(&Conditions::all()).unwrap();
    tx.abort();

    assert_eq!(snapshot(&accounts), before);
}

#[test]
fn test_drop_rolls_back() {
    let (temp, _db, accounts) = setup_accounts();
    let before = snapshot(&accounts);

    {
        let mut tx = accounts.transaction().unwrap();
        tx.delete(&Conditions::eq("id", "2")).unwrap();
    }

    assert_eq!(snapshot(&accounts), before);
    assert!(!temp.path().join("accounts.tsv.txn").exists());
    assert!(!temp.path().join("accounts.idx.txn").exists());
}

// =============================================================================
// Isolation / Locking
// =============================================================================

#[test]
fn test_outside_readers_see_committed_state_only() {
    let (_temp, _db, accounts) = setup_accounts();

    let mut tx = accounts.transaction().unwrap();
    tx.update(&Conditions::eq("id", "1"), &Record::from([("balance", "0")]))
        .unwrap();

    // Visible inside, invisible outside
    let inside = tx.query_one(&Conditions::eq("id", "1")).unwrap().unwrap();
    assert_eq!(inside.get("balance"), Some("0"));
    assert_eq!(balance(&accounts, "1"), 1000);

    tx.commit().unwrap();
    assert_eq!(balance(&accounts, "1"), 0);
}

#[test]
fn test_second_transaction_hits_lock_contention() {
    let (_temp, _db, accounts) = setup_accounts();

    let _tx = accounts.transaction().unwrap();
    let second = accounts.transaction();
    match second {
        Err(e) => {
            assert!(matches!(e, TsvError::LockContention { .. }));
            assert!(e.is_retryable());
        }
        Ok(_) => panic!("second transaction must not open"),
    }
}

#[test]
fn test_mutation_blocked_while_transaction_open() {
    let (_temp, _db, accounts) = setup_accounts();

    let tx = accounts.transaction().unwrap();
    let result = accounts.insert(&Record::from([("id", "9")]));
    assert!(matches!(result, Err(TsvError::LockContention { .. })));
    drop(tx);

    accounts.insert(&Record::from([("id", "9")])).unwrap();
}

// =============================================================================
// Recovery
// =============================================================================

#[test]
fn test_leftover_working_files_removed_on_open() {
    let temp = TempDir::new().unwrap();
    let config = || {
        Config::builder()
            .data_dir(temp.path())
            .observers(Observers::new())
            .build()
    };
    {
        let db = Database::open(config()).unwrap();
        let table = db.create_table("items", ["id"]).unwrap();
        table.insert(&Record::from([("id", "a")])).unwrap();
    }

    // A crash before the commit rename leaves the working copy behind
    fs::write(temp.path().join("items.tsv.txn"), "id\na\nuncommitted\n").unwrap();

    let db = Database::open(config()).unwrap();
    let table = db.open_table("items").unwrap();
    assert_eq!(table.count(&Conditions::all()).unwrap(), 1);
    assert!(!temp.path().join("items.tsv.txn").exists());
}
