//! Fixtures for the SQLite gateway integration tests

use cabinet_vault_core::model::{Antecedent, Consultation, Document, Mutuelle, Patient, Payment};
use cabinet_vault_core::snapshot::{Snapshot, SnapshotData};
use cabinet_vault_core::{restore, FixedClock};
use cabinet_vault_store_sqlite::SqliteGateway;
use chrono::{DateTime, TimeZone, Utc};
use std::path::PathBuf;
use tempfile::TempDir;

/// Temporary directory holding a database file and a backup directory
#[allow(dead_code)]
pub struct TestContext {
    pub temp_dir: TempDir,
    pub db_path: PathBuf,
    pub backup_dir: PathBuf,
}

#[allow(dead_code)]
impl TestContext {
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = TempDir::new()?;
        let db_path = temp_dir.path().join("cabinet.sqlite3");
        let backup_dir = temp_dir.path().join("backup");
        Ok(Self {
            temp_dir,
            db_path,
            backup_dir,
        })
    }

    pub fn open(&self, name: &str) -> anyhow::Result<SqliteGateway> {
        SqliteGateway::open(&self.temp_dir.path().join(format!("{name}.sqlite3")))
    }
}

#[allow(dead_code)]
pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

#[allow(dead_code)]
pub fn clock() -> FixedClock {
    FixedClock::new(at(2024, 3, 1, 23, 0))
}

fn patient(id: &str, numero: &str, nom: &str) -> Patient {
    Patient {
        id: id.to_string(),
        numero: numero.to_string(),
        nom: nom.to_string(),
        prenom: "Test".to_string(),
        telephone: "0600112233".to_string(),
        email: format!("{id}@example.com"),
        ville: "Tanger".to_string(),
        secteur: None,
        cin: format!("K{numero}"),
        date_naissance: "1992-09-09".to_string(),
        mutuelle: Mutuelle {
            active: false,
            nom: String::new(),
        },
        antecedents: Vec::new(),
        consultations: Vec::new(),
        documents: Vec::new(),
    }
}

/// Three patients, P001 with two antecedents and a consultation paid
/// "65,00", plus one document without a patient.
#[allow(dead_code)]
pub fn sample_snapshot() -> Snapshot {
    let mut first = patient("p1", "P001", "El Amrani");
    first.antecedents = vec![
        Antecedent {
            id: "a1".to_string(),
            patient_id: "p1".to_string(),
            description: "Hypertension".to_string(),
        },
        Antecedent {
            id: "a2".to_string(),
            patient_id: "p1".to_string(),
            description: "Appendicectomie 2010".to_string(),
        },
    ];
    let payment = Payment {
        id: "pay1".to_string(),
        consultation_id: "c1".to_string(),
        montant: "65,00".to_string(),
        methode: "Carte".to_string(),
    };

    Snapshot::new(
        at(2024, 3, 1, 23, 0),
        SnapshotData {
            patients: vec![
                first,
                patient("p2", "P002", "Ouazzani"),
                patient("p3", "P003", "Benjelloun"),
            ],
            consultations: vec![Consultation {
                id: "c1".to_string(),
                patient_id: "p1".to_string(),
                date: at(2024, 2, 20, 11, 0),
                montant: "65,00".to_string(),
                paiement: Some(payment.clone()),
            }],
            documents: vec![Document {
                id: "d1".to_string(),
                patient_id: None,
                titre: "Inventaire".to_string(),
                contenu: "Compresses, seringues".to_string(),
                created_at: at(2024, 2, 21, 8, 0),
            }],
            payments: vec![payment],
        },
    )
}

/// Seed `gateway` with the sample snapshot
#[allow(dead_code)]
pub fn seed(gateway: &SqliteGateway) -> anyhow::Result<()> {
    restore::apply(gateway, &sample_snapshot())?;
    Ok(())
}
