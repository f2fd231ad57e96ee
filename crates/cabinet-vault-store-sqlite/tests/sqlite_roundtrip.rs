//! Backup and restore against real SQLite database files.

mod common;

use anyhow::Result;
use cabinet_vault_core::memory::MemoryGateway;
use cabinet_vault_core::model::{Consultation, Payment};
use cabinet_vault_core::{backup, restore, snapshot};
use cabinet_vault_core::{EncryptionKey, PersistenceGateway, VaultError};
use common::TestContext;

#[test]
fn backup_from_sqlite_restores_into_fresh_database() -> Result<()> {
    let ctx = TestContext::new()?;
    let key = EncryptionKey::generate();
    let source = ctx.open("source")?;
    common::seed(&source)?;

    let path = backup::run(&source, &key, &common::clock(), &ctx.backup_dir)?;
    assert!(path.ends_with("backup-2024-03-01.enc"));

    let target = ctx.open("target")?;
    let report = restore::run(&path, &key, &target)?;
    assert_eq!(report.patients, 3);
    assert_eq!(report.antecedents, 2);
    assert_eq!(report.payments, 1);

    assert_eq!(target.list_patients(true)?, source.list_patients(true)?);
    assert_eq!(target.list_consultations(true)?, source.list_consultations(true)?);
    assert_eq!(target.list_documents()?, source.list_documents()?);
    assert_eq!(target.list_payments()?[0].montant, "65,00");
    Ok(())
}

#[test]
fn restored_data_survives_reopen() -> Result<()> {
    let ctx = TestContext::new()?;
    let key = EncryptionKey::generate();
    let memory = MemoryGateway::new();
    restore::apply(&memory, &common::sample_snapshot())?;
    let path = backup::run(&memory, &key, &common::clock(), &ctx.backup_dir)?;

    {
        let gateway = cabinet_vault_store_sqlite::SqliteGateway::open(&ctx.db_path)?;
        restore::run(&path, &key, &gateway)?;
    }

    let reopened = cabinet_vault_store_sqlite::SqliteGateway::open(&ctx.db_path)?;
    let patients = reopened.list_patients(true)?;
    assert_eq!(patients.len(), 3);
    assert_eq!(patients[0].antecedents.len(), 2);
    Ok(())
}

#[test]
fn sqlite_snapshot_matches_memory_snapshot() -> Result<()> {
    let ctx = TestContext::new()?;
    let sqlite = ctx.open("compare")?;
    common::seed(&sqlite)?;
    let memory = MemoryGateway::new();
    restore::apply(&memory, &common::sample_snapshot())?;

    let clock = common::clock();
    let from_sqlite = snapshot::serialize(&snapshot::capture(&sqlite, &clock)?)?;
    let from_memory = snapshot::serialize(&snapshot::capture(&memory, &clock)?)?;
    assert_eq!(from_sqlite, from_memory);
    Ok(())
}

#[test]
fn constraint_failure_rolls_back_whole_restore() -> Result<()> {
    let ctx = TestContext::new()?;
    let gateway = ctx.open("atomic")?;
    common::seed(&gateway)?;
    let before = gateway.list_patients(true)?;

    // valid snapshot, but the two payments share an id
    let mut snapshot = common::sample_snapshot();
    let shared = Payment {
        id: "pay1".to_string(),
        consultation_id: "c2".to_string(),
        montant: "120,00".to_string(),
        methode: "Especes".to_string(),
    };
    snapshot.data.consultations.push(Consultation {
        id: "c2".to_string(),
        patient_id: "p2".to_string(),
        date: common::at(2024, 2, 22, 15, 0),
        montant: "120,00".to_string(),
        paiement: Some(shared.clone()),
    });
    snapshot.data.payments.push(shared);

    let err = restore::apply(&gateway, &snapshot).expect_err("duplicate payment id");
    assert!(matches!(err, VaultError::Transaction { .. }));
    assert_eq!(gateway.list_patients(true)?, before);
    assert_eq!(gateway.list_payments()?.len(), 1);
    Ok(())
}
