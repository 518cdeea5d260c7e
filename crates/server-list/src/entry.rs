//! Server entry record and its persisted line format.
//!
//! A line is the space-separated legacy prefix
//! `address web_port web_secret web_certificate` followed by a JSON object
//! carrying the extended transport credentials. Persisted and discovered
//! entries are the hex encoding of that line.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Certificates with this value mark entries the client must never use.
pub const DISABLED_CERTIFICATE: &str = "None";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerEntry {
    pub address: String,
    pub web_port: u16,
    pub web_secret: String,
    pub web_certificate: String,
    pub ssh_port: u16,
    pub ssh_username: String,
    pub ssh_password: String,
    pub ssh_host_key: String,
    pub ssh_obfuscated_port: u16,
    pub ssh_obfuscated_key: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Extended {
    #[serde(default)]
    ssh_port: u16,
    #[serde(default)]
    ssh_username: String,
    #[serde(default)]
    ssh_password: String,
    #[serde(default)]
    ssh_host_key: String,
    #[serde(default)]
    ssh_obfuscated_port: u16,
    #[serde(default)]
    ssh_obfuscated_key: String,
}

impl ServerEntry {
    pub fn new(address: impl Into<String>, web_port: u16, web_secret: impl Into<String>, web_certificate: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            web_port,
            web_secret: web_secret.into(),
            web_certificate: web_certificate.into(),
            ..Self::default()
        }
    }

    /// Overwrite every field with the values from `src`.
    pub fn copy_from(&mut self, src: &ServerEntry) {
        self.clone_from(src);
    }

    /// Legacy fields are space-delimited on the wire, so they may not contain spaces.
    pub fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            return Err(Error::Corrupt("empty server address".into()));
        }
        let legacy = [
            ("address", &self.address),
            ("web_secret", &self.web_secret),
            ("web_certificate", &self.web_certificate),
        ];
        for (name, value) in legacy {
            if value.contains(' ') {
                return Err(Error::FieldHasSpace(name));
            }
        }
        Ok(())
    }

    pub fn to_line(&self) -> Result<String> {
        self.validate()?;
        let ext = Extended {
            ssh_port: self.ssh_port,
            ssh_username: self.ssh_username.clone(),
            ssh_password: self.ssh_password.clone(),
            ssh_host_key: self.ssh_host_key.clone(),
            ssh_obfuscated_port: self.ssh_obfuscated_port,
            ssh_obfuscated_key: self.ssh_obfuscated_key.clone(),
        };
        Ok(format!(
            "{} {} {} {} {}",
            self.address,
            self.web_port,
            self.web_secret,
            self.web_certificate,
            serde_json::to_string(&ext)?
        ))
    }

    pub fn from_line(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n', '\0']);
        let mut parts = line.splitn(5, ' ');
        let address = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Corrupt("can't parse server address".into()))?;
        let port = parts
            .next()
            .ok_or_else(|| Error::Corrupt("can't parse web server port".into()))?;
        let web_port = port
            .trim()
            .parse::<u16>()
            .map_err(|_| Error::Corrupt(format!("bad web server port {port:?}")))?;
        let web_secret = parts
            .next()
            .ok_or_else(|| Error::Corrupt("can't parse web server secret".into()))?;
        let web_certificate = parts
            .next()
            .ok_or_else(|| Error::Corrupt("can't parse web server certificate".into()))?;

        let ext = match parts.next().map(str::trim).filter(|s| !s.is_empty()) {
            Some(json) => serde_json::from_str::<Extended>(json)?,
            None => {
                debug!(address, "extended values not present; using defaults");
                Extended::default()
            }
        };

        Ok(Self {
            address: address.to_string(),
            web_port,
            web_secret: web_secret.to_string(),
            web_certificate: web_certificate.to_string(),
            ssh_port: ext.ssh_port,
            ssh_username: ext.ssh_username,
            ssh_password: ext.ssh_password,
            ssh_host_key: ext.ssh_host_key,
            ssh_obfuscated_port: ext.ssh_obfuscated_port,
            ssh_obfuscated_key: ext.ssh_obfuscated_key,
        })
    }

    /// Hex-encoded line, as persisted and as carried in handshake `Server:` lines.
    pub fn encode(&self) -> Result<String> {
        Ok(hex::encode(self.to_line()?))
    }

    pub fn decode(encoded: &str) -> Result<Self> {
        let raw = hex::decode(encoded.trim())?;
        let line = String::from_utf8(raw).map_err(|_| Error::Corrupt("line is not utf-8".into()))?;
        Self::from_line(&line)
    }

    pub fn is_disabled(&self) -> bool {
        self.web_certificate == DISABLED_CERTIFICATE
    }
}

/// Parse a newline-delimited list of encoded entries. Blank lines are
/// skipped and disabled entries are dropped; any corrupt line fails the
/// whole list.
pub fn parse_entries(text: &str) -> Result<Vec<ServerEntry>> {
    let mut out = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let entry = ServerEntry::decode(line)?;
        if !entry.is_disabled() {
            out.push(entry);
        }
    }
    Ok(out)
}

pub fn encode_entries(entries: &[ServerEntry]) -> Result<String> {
    let mut out = String::new();
    for e in entries {
        out.push_str(&e.encode()?);
        out.push('\n');
    }
    Ok(out)
}
