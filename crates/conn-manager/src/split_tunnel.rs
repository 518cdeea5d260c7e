//! Split-tunnel route list: zlib payload from the `connected` response,
//! written as plain text to a file an external routing component watches.

use flate2::read::ZlibDecoder;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const MAX_DECOMPRESSED_ROUTES: u64 = 10 * 1024 * 1024;

/// Inflate a route payload. Corrupt, oversized or non UTF-8 input yields
/// an empty route list.
pub fn decompress_routes(compressed: &[u8]) -> String {
    if compressed.is_empty() {
        return String::new();
    }
    let mut out = Vec::new();
    let mut rd = ZlibDecoder::new(compressed).take(MAX_DECOMPRESSED_ROUTES + 1);
    if let Err(e) = rd.read_to_end(&mut out) {
        warn!(error = %e, "split tunnel routes failed to decompress");
        return String::new();
    }
    if out.len() as u64 > MAX_DECOMPRESSED_ROUTES {
        warn!("split tunnel routes exceed size cap");
        return String::new();
    }
    String::from_utf8(out).unwrap_or_else(|_| {
        warn!("split tunnel routes are not utf-8");
        String::new()
    })
}

#[derive(Debug, Clone)]
pub struct RouteFile {
    path: PathBuf,
}

impl RouteFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the file wholesale.
    pub fn write(&self, routes: &str) -> io::Result<()> {
        fs::write(&self.path, routes)
    }

    /// Remove the file; absent is fine.
    pub fn remove(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}
