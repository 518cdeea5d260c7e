//! Signed remote server list payload.

use core_crypto as crypto;
use serde::{Deserialize, Serialize};

use crate::entry::{parse_entries, ServerEntry};
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedServerList {
    /// Newline-delimited hex entries.
    pub data: String,
    pub signature_hex: String,
}

impl SignedServerList {
    pub fn sign(seed: &[u8; 32], data: impl Into<String>) -> Result<Self> {
        let data = data.into();
        let sig = crypto::ed25519::sign(seed, data.as_bytes()).map_err(|_| Error::BadSignature)?;
        Ok(Self { data, signature_hex: hex::encode(sig) })
    }

    pub fn from_json(json: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(json)?)
    }

    /// Check the signature against the pinned key and return the data lines.
    pub fn verify(&self, pk_hex: &str) -> Result<Vec<String>> {
        let pk = hex::decode(pk_hex.trim())?;
        let sig = hex::decode(self.signature_hex.trim())?;
        crypto::ed25519::verify(&pk, self.data.as_bytes(), &sig).map_err(|_| Error::BadSignature)?;
        Ok(self
            .data
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Verify and decode every entry.
    pub fn verified_entries(&self, pk_hex: &str) -> Result<Vec<ServerEntry>> {
        let lines = self.verify(pk_hex)?;
        parse_entries(&lines.join("\n"))
    }
}
