use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use cabinet_vault_core::gateway::{
    GatewayError, GatewayTransaction, PersistenceGateway, TransactionFn,
};
use cabinet_vault_core::model::{
    Antecedent, Consultation, Document, Mutuelle, Patient, Payment,
};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, Row};

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS patients (
  id TEXT PRIMARY KEY,
  numero_patient TEXT NOT NULL UNIQUE,
  nom TEXT NOT NULL,
  prenom TEXT NOT NULL,
  telephone TEXT NOT NULL,
  email TEXT NOT NULL,
  ville TEXT NOT NULL,
  secteur TEXT,
  cin TEXT NOT NULL,
  date_naissance TEXT NOT NULL,
  mutuelle_active INTEGER NOT NULL CHECK (mutuelle_active IN (0, 1)),
  mutuelle_nom TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS antecedents (
  id TEXT PRIMARY KEY,
  patient_id TEXT NOT NULL,
  description TEXT NOT NULL,
  FOREIGN KEY (patient_id) REFERENCES patients(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS consultations (
  id TEXT PRIMARY KEY,
  patient_id TEXT NOT NULL,
  date TEXT NOT NULL,
  montant TEXT NOT NULL,
  FOREIGN KEY (patient_id) REFERENCES patients(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS paiements (
  id TEXT PRIMARY KEY,
  consultation_id TEXT NOT NULL UNIQUE,
  montant TEXT NOT NULL,
  methode TEXT NOT NULL,
  FOREIGN KEY (consultation_id) REFERENCES consultations(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS documents (
  id TEXT PRIMARY KEY,
  patient_id TEXT,
  titre TEXT NOT NULL,
  contenu TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_antecedents_patient ON antecedents(patient_id);
CREATE INDEX IF NOT EXISTS idx_consultations_patient ON consultations(patient_id);
CREATE INDEX IF NOT EXISTS idx_documents_patient ON documents(patient_id);
";

const SELECT_PATIENTS_SQL: &str = r"
SELECT id, numero_patient, nom, prenom, telephone, email, ville, secteur, cin,
       date_naissance, mutuelle_active, mutuelle_nom
FROM patients
ORDER BY rowid
";

const SELECT_CONSULTATIONS_SQL: &str = r"
SELECT c.id, c.patient_id, c.date, c.montant, p.id, p.montant, p.methode
FROM consultations c
LEFT JOIN paiements p ON p.consultation_id = c.id
ORDER BY c.rowid
";

/// Persistence Gateway over a single SQLite database file.
///
/// The connection sits behind a mutex; a transaction holds it for its whole
/// duration, which gives `run_transaction` exclusive write access.
pub struct SqliteGateway {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteGateway").finish_non_exhaustive()
    }
}

impl SqliteGateway {
    /// Open (or create) the database at `path`, configure pragmas and apply
    /// migrations.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened, configured or
    /// migrated.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;
        Self::configure(conn)
    }

    /// # Errors
    /// Returns an error when the in-memory database cannot be set up.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite database")?;
        Self::configure(conn)
    }

    fn configure(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        let gateway = Self {
            conn: Mutex::new(conn),
        };
        gateway.migrate()?;
        Ok(gateway)
    }

    /// Apply all forward migrations up to the latest schema version.
    ///
    /// # Errors
    /// Returns an error when a migration fails or the database was written
    /// by a newer schema.
    pub fn migrate(&self) -> Result<()> {
        let mut conn = self.conn.lock();
        conn.execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let version = current_schema_version(&conn)?;
        if version > LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected at most {LATEST_SCHEMA_VERSION}"
            ));
        }

        if version < 1 {
            let tx = conn.transaction().context("failed to begin migration v1")?;
            tx.execute_batch(MIGRATION_001_SQL).context("failed to create practice tables")?;
            tx.execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![1_i64, now_rfc3339()],
            )
            .context("failed to record migration version 1")?;
            tx.commit().context("failed to commit migration v1")?;
            tracing::info!("Applied sqlite schema migration v1");
        }

        Ok(())
    }

    /// # Errors
    /// Returns an error when schema metadata cannot be read.
    pub fn schema_version(&self) -> Result<i64> {
        current_schema_version(&self.conn.lock())
    }
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn now_rfc3339() -> String {
    format_timestamp(&Utc::now())
}

fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn gateway_error(err: rusqlite::Error) -> GatewayError {
    if let rusqlite::Error::SqliteFailure(failure, message) = &err {
        if failure.code == ErrorCode::ConstraintViolation {
            return GatewayError::Constraint(
                message.clone().unwrap_or_else(|| failure.to_string()),
            );
        }
    }
    GatewayError::backend(err)
}

fn patient_from_row(row: &Row<'_>) -> rusqlite::Result<Patient> {
    Ok(Patient {
        id: row.get(0)?,
        numero: row.get(1)?,
        nom: row.get(2)?,
        prenom: row.get(3)?,
        telephone: row.get(4)?,
        email: row.get(5)?,
        ville: row.get(6)?,
        secteur: row.get(7)?,
        cin: row.get(8)?,
        date_naissance: row.get(9)?,
        mutuelle: Mutuelle {
            active: row.get(10)?,
            nom: row.get(11)?,
        },
        antecedents: Vec::new(),
        consultations: Vec::new(),
        documents: Vec::new(),
    })
}

fn consultation_from_row(row: &Row<'_>) -> rusqlite::Result<Consultation> {
    let id: String = row.get(0)?;
    let payment_id: Option<String> = row.get(4)?;
    let paiement = match payment_id {
        Some(payment_id) => Some(Payment {
            id: payment_id,
            consultation_id: id.clone(),
            montant: row.get(5)?,
            methode: row.get(6)?,
        }),
        None => None,
    };
    Ok(Consultation {
        id,
        patient_id: row.get(1)?,
        date: parse_timestamp(row, 2)?,
        montant: row.get(3)?,
        paiement,
    })
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        titre: row.get(2)?,
        contenu: row.get(3)?,
        created_at: parse_timestamp(row, 4)?,
    })
}

fn load_documents(conn: &Connection) -> rusqlite::Result<Vec<Document>> {
    let mut stmt = conn.prepare(
        "SELECT id, patient_id, titre, contenu, created_at FROM documents ORDER BY rowid",
    )?;
    let rows = stmt.query_map([], document_from_row)?;
    rows.collect()
}

fn load_consultations(conn: &Connection) -> rusqlite::Result<Vec<Consultation>> {
    let mut stmt = conn.prepare(SELECT_CONSULTATIONS_SQL)?;
    let rows = stmt.query_map([], consultation_from_row)?;
    rows.collect()
}

fn load_antecedents(conn: &Connection) -> rusqlite::Result<Vec<Antecedent>> {
    let mut stmt =
        conn.prepare("SELECT id, patient_id, description FROM antecedents ORDER BY rowid")?;
    let rows = stmt.query_map([], |row| {
        Ok(Antecedent {
            id: row.get(0)?,
            patient_id: row.get(1)?,
            description: row.get(2)?,
        })
    })?;
    rows.collect()
}

fn group_by<T, F>(items: Vec<T>, key: F) -> HashMap<String, Vec<T>>
where
    F: Fn(&T) -> Option<String>,
{
    let mut grouped: HashMap<String, Vec<T>> = HashMap::new();
    for item in items {
        if let Some(k) = key(&item) {
            grouped.entry(k).or_default().push(item);
        }
    }
    grouped
}

impl PersistenceGateway for SqliteGateway {
    fn list_patients(&self, include_nested: bool) -> Result<Vec<Patient>, GatewayError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(SELECT_PATIENTS_SQL).map_err(gateway_error)?;
        let mut patients = stmt
            .query_map([], patient_from_row)
            .and_then(Iterator::collect::<rusqlite::Result<Vec<_>>>)
            .map_err(gateway_error)?;

        if include_nested {
            let mut antecedents =
                group_by(load_antecedents(&conn).map_err(gateway_error)?, |a| {
                    Some(a.patient_id.clone())
                });
            // nested consultations do not carry their payment
            let mut consultations = group_by(
                load_consultations(&conn).map_err(gateway_error)?,
                |c| Some(c.patient_id.clone()),
            );
            let mut documents =
                group_by(load_documents(&conn).map_err(gateway_error)?, |d| {
                    d.patient_id.clone()
                });

            for patient in &mut patients {
                patient.antecedents = antecedents.remove(&patient.id).unwrap_or_default();
                patient.consultations = consultations
                    .remove(&patient.id)
                    .unwrap_or_default()
                    .iter()
                    .map(Consultation::without_payment)
                    .collect();
                patient.documents = documents.remove(&patient.id).unwrap_or_default();
            }
        }

        Ok(patients)
    }

    fn list_consultations(&self, include_nested: bool) -> Result<Vec<Consultation>, GatewayError> {
        let conn = self.conn.lock();
        let consultations = load_consultations(&conn).map_err(gateway_error)?;
        if include_nested {
            return Ok(consultations);
        }
        Ok(consultations.iter().map(Consultation::without_payment).collect())
    }

    fn list_documents(&self) -> Result<Vec<Document>, GatewayError> {
        load_documents(&self.conn.lock()).map_err(gateway_error)
    }

    fn list_payments(&self) -> Result<Vec<Payment>, GatewayError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT id, consultation_id, montant, methode FROM paiements ORDER BY rowid")
            .map_err(gateway_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Payment {
                    id: row.get(0)?,
                    consultation_id: row.get(1)?,
                    montant: row.get(2)?,
                    methode: row.get(3)?,
                })
            })
            .map_err(gateway_error)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(gateway_error)
    }

    fn run_transaction(&self, apply: &mut TransactionFn<'_>) -> Result<(), GatewayError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(gateway_error)?;

        // dropping `tx` without commit rolls back
        apply(&mut SqliteTransaction { conn: &tx })?;

        tx.commit().map_err(gateway_error)
    }
}

struct SqliteTransaction<'a> {
    conn: &'a Connection,
}

impl SqliteTransaction<'_> {
    fn delete_all(&self, table: &str) -> Result<usize, GatewayError> {
        self.conn
            .execute(&format!("DELETE FROM {table}"), [])
            .map_err(gateway_error)
    }
}

impl GatewayTransaction for SqliteTransaction<'_> {
    fn delete_all_payments(&mut self) -> Result<usize, GatewayError> {
        self.delete_all("paiements")
    }

    fn delete_all_documents(&mut self) -> Result<usize, GatewayError> {
        self.delete_all("documents")
    }

    fn delete_all_consultations(&mut self) -> Result<usize, GatewayError> {
        self.delete_all("consultations")
    }

    fn delete_all_antecedents(&mut self) -> Result<usize, GatewayError> {
        self.delete_all("antecedents")
    }

    fn delete_all_patients(&mut self) -> Result<usize, GatewayError> {
        self.delete_all("patients")
    }

    fn create_patient_with_antecedents(
        &mut self,
        patient: &Patient,
        antecedents: &[Antecedent],
    ) -> Result<(), GatewayError> {
        self.conn
            .execute(
                "INSERT INTO patients(
                    id, numero_patient, nom, prenom, telephone, email, ville, secteur,
                    cin, date_naissance, mutuelle_active, mutuelle_nom
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    patient.id,
                    patient.numero,
                    patient.nom,
                    patient.prenom,
                    patient.telephone,
                    patient.email,
                    patient.ville,
                    patient.secteur,
                    patient.cin,
                    patient.date_naissance,
                    patient.mutuelle.active,
                    patient.mutuelle.nom,
                ],
            )
            .map_err(gateway_error)?;

        let mut stmt = self
            .conn
            .prepare_cached("INSERT INTO antecedents(id, patient_id, description) VALUES (?1, ?2, ?3)")
            .map_err(gateway_error)?;
        for antecedent in antecedents {
            stmt.execute(params![antecedent.id, patient.id, antecedent.description])
                .map_err(gateway_error)?;
        }
        Ok(())
    }

    fn create_consultation_with_payment(
        &mut self,
        consultation: &Consultation,
        payment: Option<&Payment>,
    ) -> Result<(), GatewayError> {
        self.conn
            .execute(
                "INSERT INTO consultations(id, patient_id, date, montant) VALUES (?1, ?2, ?3, ?4)",
                params![
                    consultation.id,
                    consultation.patient_id,
                    format_timestamp(&consultation.date),
                    consultation.montant,
                ],
            )
            .map_err(gateway_error)?;

        if let Some(payment) = payment {
            self.conn
                .execute(
                    "INSERT INTO paiements(id, consultation_id, montant, methode) VALUES (?1, ?2, ?3, ?4)",
                    params![payment.id, consultation.id, payment.montant, payment.methode],
                )
                .map_err(gateway_error)?;
        }
        Ok(())
    }

    fn create_documents_bulk(&mut self, documents: &[Document]) -> Result<usize, GatewayError> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "INSERT INTO documents(id, patient_id, titre, contenu, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .map_err(gateway_error)?;
        for document in documents {
            stmt.execute(params![
                document.id,
                document.patient_id,
                document.titre,
                document.contenu,
                format_timestamp(&document.created_at),
            ])
            .map_err(gateway_error)?;
        }
        Ok(documents.len())
    }
}
