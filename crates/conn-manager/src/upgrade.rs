//! Replacing the running executable with a downloaded upgrade.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

/// Where the process binary lives and how to start it again.
pub trait UpgradeHost: Send + Sync {
    fn current_exe(&self) -> io::Result<PathBuf>;
    fn relaunch(&self, exe: &Path) -> io::Result<()>;
}

/// The real process: `std::env::current_exe` and a detached child with
/// the same arguments.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessUpgradeHost;

impl UpgradeHost for ProcessUpgradeHost {
    fn current_exe(&self) -> io::Result<PathBuf> {
        std::env::current_exe()
    }

    fn relaunch(&self, exe: &Path) -> io::Result<()> {
        Command::new(exe).args(std::env::args_os().skip(1)).spawn().map(|_| ())
    }
}

pub fn archive_path(exe: &Path) -> PathBuf {
    let mut s: OsString = exe.as_os_str().to_owned();
    s.push(".orig");
    PathBuf::from(s)
}

/// Move `exe` aside to its `.orig` archive and write `bytes` in its
/// place. On any failure the original is restored and the error returned.
pub fn pave(exe: &Path, bytes: &[u8]) -> io::Result<()> {
    let archive = archive_path(exe);
    match fs::remove_file(&archive) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
        _ => {}
    }
    let perms = fs::metadata(exe)?.permissions();
    fs::rename(exe, &archive)?;

    let written = (|| -> io::Result<()> {
        let mut f = File::create(exe)?;
        f.write_all(bytes)?;
        f.sync_all()?;
        fs::set_permissions(exe, perms)
    })();

    if let Err(e) = written {
        warn!(error = %e, exe = %exe.display(), "upgrade write failed; restoring original");
        let _ = fs::remove_file(exe);
        if let Err(re) = fs::rename(&archive, exe) {
            warn!(error = %re, "restoring original executable failed");
        }
        return Err(e);
    }
    info!(exe = %exe.display(), size = bytes.len(), "upgrade paved");
    Ok(())
}
