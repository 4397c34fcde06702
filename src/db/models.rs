use rusqlite::{Result as SqlResult, Row};
use serde::Serialize;

/// One persisted secret. `envelope` is ciphertext; the plaintext never
/// touches the database.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CredentialRow {
    pub slot: String,
    pub envelope: String,
    pub updated_at: String,
}

impl CredentialRow {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            slot: row.get("slot")?,
            envelope: row.get("envelope")?,
            updated_at: row.get("updated_at")?,
        })
    }
}
