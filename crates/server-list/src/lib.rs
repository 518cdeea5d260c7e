//! Candidate server list: entry codec, merge policy, persistence.

pub mod entry;
pub mod signed;
pub mod store;

pub use entry::{encode_entries, parse_entries, ServerEntry};
pub use signed::SignedServerList;
pub use store::{FileStorage, ListStorage, MemoryStorage, ServerStore};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("server entry is corrupt: {0}")]
    Corrupt(String),
    #[error("server entry hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("server entry extended values: {0}")]
    Json(#[from] serde_json::Error),
    #[error("server entry field {0} must not contain spaces")]
    FieldHasSpace(&'static str),
    #[error("corrupt embedded server list: {0}")]
    CorruptEmbedded(String),
    #[error("no servers found; the application is possibly corrupt")]
    Empty,
    #[error("signature verification failed")]
    BadSignature,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
