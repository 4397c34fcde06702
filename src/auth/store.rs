//! Credential persistence.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use tracing::warn;

use super::crypto::{self, KEY_BYTES};
use super::Credential;
use crate::db::Database;

const GMAIL_CREDENTIAL_SLOT: &str = "gmail";

pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<Credential>>;
    fn save(&self, credential: &Credential) -> Result<()>;
    fn delete(&self) -> Result<()>;
}

/// Credential encrypted with AES-256-GCM and kept in the SQLite
/// `credentials` table, so it survives restarts without sitting on disk in
/// the clear.
pub struct SqliteTokenStore {
    db: Mutex<Database>,
    encryption_key: [u8; KEY_BYTES],
}

impl SqliteTokenStore {
    pub fn new(db: Database, encryption_key: [u8; KEY_BYTES]) -> Self {
        Self {
            db: Mutex::new(db),
            encryption_key,
        }
    }

    pub fn open(db_path: &Path, encryption_key: [u8; KEY_BYTES]) -> Result<Self> {
        let db = Database::open(db_path)
            .with_context(|| format!("open credential database at {}", db_path.display()))?;
        Ok(Self::new(db, encryption_key))
    }

    fn with_db<T>(&self, f: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
        let db = self
            .db
            .lock()
            .map_err(|_| anyhow!("credential database lock poisoned"))?;
        f(&db)
    }
}

impl TokenStore for SqliteTokenStore {
    fn load(&self) -> Result<Option<Credential>> {
        self.with_db(|db| {
            let Some(row) = db
                .get_credential(GMAIL_CREDENTIAL_SLOT)
                .context("read stored gmail credential")?
            else {
                return Ok(None);
            };

            match crypto::open::<Credential>(&row.envelope, &self.encryption_key) {
                Ok(credential) => Ok(Some(credential)),
                Err(error) => {
                    warn!("discarding unreadable gmail credential: {error}");
                    db.delete_credential(GMAIL_CREDENTIAL_SLOT)
                        .context("delete unreadable gmail credential")?;
                    Ok(None)
                }
            }
        })
    }

    fn save(&self, credential: &Credential) -> Result<()> {
        let envelope =
            crypto::seal(credential, &self.encryption_key).context("encrypt gmail credential")?;
        self.with_db(|db| {
            db.put_credential(GMAIL_CREDENTIAL_SLOT, &envelope)
                .context("write gmail credential")
        })
    }

    fn delete(&self) -> Result<()> {
        self.with_db(|db| {
            db.delete_credential(GMAIL_CREDENTIAL_SLOT)
                .context("delete gmail credential")?;
            Ok(())
        })
    }
}

/// Process-local store, for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryTokenStore {
    credential: Mutex<Option<Credential>>,
}

impl MemoryTokenStore {
    pub fn new(credential: Option<Credential>) -> Self {
        Self {
            credential: Mutex::new(credential),
        }
    }

    fn slot(&self) -> Result<std::sync::MutexGuard<'_, Option<Credential>>> {
        self.credential
            .lock()
            .map_err(|_| anyhow!("memory token store lock poisoned"))
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<Credential>> {
        Ok(self.slot()?.clone())
    }

    fn save(&self, credential: &Credential) -> Result<()> {
        *self.slot()? = Some(credential.clone());
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        *self.slot()? = None;
        Ok(())
    }
}
