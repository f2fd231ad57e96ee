//! Cabinet Vault - encrypted backup and restore for the practice database
//!
//! The write path captures every patient, consultation, document and payment
//! from a [`PersistenceGateway`], serializes them into a versioned
//! [`Snapshot`], seals it with AES-256-GCM and writes one artifact per day.
//! The read path opens an artifact and replaces the whole dataset inside a
//! single gateway transaction.
//!
//! Embedding code normally goes through [`Vault`], which owns the gateway and
//! the key and serializes backups against restores.

pub mod backup;
pub mod cipher;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod model;
pub mod restore;
pub mod schedule;
pub mod snapshot;
pub mod vault;

pub use cipher::{EncryptionKey, Envelope};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::VaultConfig;
pub use error::{ErrorCategory, VaultError};
pub use gateway::{GatewayError, GatewayTransaction, PersistenceGateway};
pub use memory::MemoryGateway;
pub use model::{Antecedent, Consultation, Document, Mutuelle, Patient, Payment};
pub use restore::RestoreReport;
pub use schedule::ScheduleTrigger;
pub use snapshot::{Snapshot, SnapshotData, SnapshotSummary};
pub use vault::Vault;
