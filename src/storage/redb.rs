//! ReDB storage implementation for the wallet service.
//!
//! Provides persistent storage for:
//! - DKG sessions and signing sessions (session-keyed state machines)
//! - Envelopes (encrypted share ciphertext, keyed by storage path)
//! - Signer records and policy documents
//! - Spend ledger / request counters (policy context aggregates)
//! - The hash-chained audit log
//!
//! Each table uses string or integer keys and JSON-serialized values.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{WalletError, WalletResult};

const DKG_SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("dkg_sessions");
const SIGNING_SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("signing_sessions");
const ENVELOPES: TableDefinition<&str, &[u8]> = TableDefinition::new("envelopes");
const SIGNER_RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("signer_records");
const POLICY_DOCUMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("policy_documents");
const SPEND_LEDGER: TableDefinition<&str, &[u8]> = TableDefinition::new("spend_ledger");
const REQUEST_COUNTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("request_counters");
const AUDIT_LOG: TableDefinition<u64, &[u8]> = TableDefinition::new("audit_log");

/// Storage wrapper for ReDB.
///
/// Thread-safe via internal Arc. Clone is cheap.
#[derive(Clone)]
pub struct Storage {
    db: Arc<Database>,
}

impl Storage {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> WalletResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path).map_err(|e| WalletError::Storage(e.to_string()))?;
        Self::init_tables(&db)?;

        tracing::info!(path = %path.display(), "opened storage database");

        Ok(Self { db: Arc::new(db) })
    }

    /// Open an in-memory database for testing.
    pub fn open_memory() -> WalletResult<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(|e| WalletError::Storage(e.to_string()))?;
        Self::init_tables(&db)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn init_tables(db: &Database) -> WalletResult<()> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(DKG_SESSIONS)?;
            let _ = write_txn.open_table(SIGNING_SESSIONS)?;
            let _ = write_txn.open_table(ENVELOPES)?;
            let _ = write_txn.open_table(SIGNER_RECORDS)?;
            let _ = write_txn.open_table(POLICY_DOCUMENTS)?;
            let _ = write_txn.open_table(SPEND_LEDGER)?;
            let _ = write_txn.open_table(REQUEST_COUNTERS)?;
            let _ = write_txn.open_table(AUDIT_LOG)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    // =========================================================================
    // DKG sessions
    // =========================================================================

    pub fn put_dkg_session<T: Serialize>(&self, session_id: &str, session: &T) -> WalletResult<()> {
        let value = serde_json::to_vec(session)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(DKG_SESSIONS)?;
            table.insert(session_id, value.as_slice())?;
        }
        write_txn.commit()?;
        tracing::debug!(session_id, "stored DKG session");
        Ok(())
    }

    pub fn get_dkg_session<T: DeserializeOwned>(&self, session_id: &str) -> WalletResult<Option<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DKG_SESSIONS)?;
        match table.get(session_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn delete_dkg_session(&self, session_id: &str) -> WalletResult<bool> {
        let write_txn = self.db.begin_write()?;
        let deleted = {
            let mut table = write_txn.open_table(DKG_SESSIONS)?;
            table.remove(session_id)?.is_some()
        };
        write_txn.commit()?;
        Ok(deleted)
    }

    /// Iterate all DKG session ids, used by the TTL sweep.
    pub fn list_dkg_session_ids(&self) -> WalletResult<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DKG_SESSIONS)?;
        Ok(table
            .iter()?
            .filter_map(|entry| entry.ok().map(|(k, _)| k.value().to_string()))
            .collect())
    }

    // =========================================================================
    // Signing sessions
    // =========================================================================

    pub fn put_signing_session<T: Serialize>(
        &self,
        session_id: &str,
        session: &T,
    ) -> WalletResult<()> {
        let value = serde_json::to_vec(session)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SIGNING_SESSIONS)?;
            table.insert(session_id, value.as_slice())?;
        }
        write_txn.commit()?;
        tracing::debug!(session_id, "stored signing session");
        Ok(())
    }

    pub fn get_signing_session<T: DeserializeOwned>(
        &self,
        session_id: &str,
    ) -> WalletResult<Option<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SIGNING_SESSIONS)?;
        match table.get(session_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn delete_signing_session(&self, session_id: &str) -> WalletResult<bool> {
        let write_txn = self.db.begin_write()?;
        let deleted = {
            let mut table = write_txn.open_table(SIGNING_SESSIONS)?;
            table.remove(session_id)?.is_some()
        };
        write_txn.commit()?;
        Ok(deleted)
    }

    pub fn list_signing_session_ids(&self) -> WalletResult<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SIGNING_SESSIONS)?;
        Ok(table
            .iter()?
            .filter_map(|entry| entry.ok().map(|(k, _)| k.value().to_string()))
            .collect())
    }

    // =========================================================================
    // Envelopes (encrypted share storage)
    // =========================================================================

    pub fn put_envelope<T: Serialize>(&self, path: &str, envelope: &T) -> WalletResult<()> {
        let value = serde_json::to_vec(envelope)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ENVELOPES)?;
            table.insert(path, value.as_slice())?;
        }
        write_txn.commit()?;
        tracing::debug!(path, "stored envelope");
        Ok(())
    }

    pub fn get_envelope<T: DeserializeOwned>(&self, path: &str) -> WalletResult<Option<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENVELOPES)?;
        match table.get(path)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn delete_envelope(&self, path: &str) -> WalletResult<bool> {
        let write_txn = self.db.begin_write()?;
        let deleted = {
            let mut table = write_txn.open_table(ENVELOPES)?;
            table.remove(path)?.is_some()
        };
        write_txn.commit()?;
        Ok(deleted)
    }

    // =========================================================================
    // Signer records
    // =========================================================================

    pub fn put_signer_record<T: Serialize>(&self, signer_id: &str, record: &T) -> WalletResult<()> {
        let value = serde_json::to_vec(record)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SIGNER_RECORDS)?;
            table.insert(signer_id, value.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_signer_record<T: DeserializeOwned>(&self, signer_id: &str) -> WalletResult<Option<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SIGNER_RECORDS)?;
        match table.get(signer_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Policy documents
    // =========================================================================

    pub fn put_policy_document<T: Serialize>(&self, signer_id: &str, doc: &T) -> WalletResult<()> {
        let value = serde_json::to_vec(doc)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(POLICY_DOCUMENTS)?;
            table.insert(signer_id, value.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_policy_document<T: DeserializeOwned>(&self, signer_id: &str) -> WalletResult<Option<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(POLICY_DOCUMENTS)?;
        match table.get(signer_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Spend ledger / request counters (policy context aggregates)
    //
    // Each signer maps to one JSON array of entries; appends are
    // read-modify-write under the write transaction. Volumes here are small
    // (bounded by one signer's request rate), so this is simpler than a
    // multimap table and matches the read pattern the Policy Context
    // Assembler needs (scan entries newer than a cutoff).
    // =========================================================================

    pub fn append_spend_entry<T: Serialize + DeserializeOwned>(
        &self,
        signer_id: &str,
        entry: &T,
    ) -> WalletResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SPEND_LEDGER)?;
            let mut entries: Vec<T> = match table.get(signer_id)? {
                Some(value) => serde_json::from_slice(value.value())?,
                None => Vec::new(),
            };
            entries.push(serde_json::from_value(serde_json::to_value(entry)?)?);
            let value = serde_json::to_vec(&entries)?;
            table.insert(signer_id, value.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_spend_entries<T: DeserializeOwned>(&self, signer_id: &str) -> WalletResult<Vec<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SPEND_LEDGER)?;
        match table.get(signer_id)? {
            Some(value) => Ok(serde_json::from_slice(value.value())?),
            None => Ok(Vec::new()),
        }
    }

    pub fn append_request_timestamp(&self, signer_id: &str, timestamp_secs: i64) -> WalletResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(REQUEST_COUNTERS)?;
            let mut entries: Vec<i64> = match table.get(signer_id)? {
                Some(value) => serde_json::from_slice(value.value())?,
                None => Vec::new(),
            };
            entries.push(timestamp_secs);
            let value = serde_json::to_vec(&entries)?;
            table.insert(signer_id, value.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_request_timestamps(&self, signer_id: &str) -> WalletResult<Vec<i64>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(REQUEST_COUNTERS)?;
        match table.get(signer_id)? {
            Some(value) => Ok(serde_json::from_slice(value.value())?),
            None => Ok(Vec::new()),
        }
    }

    // =========================================================================
    // Audit log
    // =========================================================================

    pub fn get_latest_audit_seq(&self) -> WalletResult<Option<u64>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUDIT_LOG)?;
        Ok(table.iter()?.last().transpose()?.map(|(k, _)| k.value()))
    }

    pub fn put_audit_entry<T>(&self, entry: &T) -> WalletResult<()>
    where
        T: Serialize + AsRef<crate::audit::AuditEntry>,
    {
        let audit_entry = entry.as_ref();
        let value = serde_json::to_vec(audit_entry)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(AUDIT_LOG)?;
            table.insert(audit_entry.seq, value.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_audit_entry(&self, seq: u64) -> WalletResult<Option<crate::audit::AuditEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUDIT_LOG)?;
        match table.get(seq)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }
}
