//! # soffice-auto
//!
//! Find the [LibreOffice](https://www.libreoffice.org/) `soffice` executable
//! so that callers can run headless document conversions without asking the
//! user to configure a path first.
//!
//! ## Search order
//!
//! On the first call to [`ensure_soffice`]:
//!
//! 1. `SOFFICE_PATH`: an explicit executable path. If it is set but does not
//!    point at a file, the search fails instead of silently picking another
//!    installation.
//! 2. Every directory on `PATH`, trying `soffice` then `libreoffice`
//!    (with `.exe` on Windows).
//! 3. Well-known install locations for the current OS (see table).
//!
//! The resolved path is cached for the lifetime of the process; a failed
//! search is not cached, so installing LibreOffice while a server is running
//! is picked up by the next conversion.
//!
//! | OS      | Locations checked                                               |
//! |---------|-----------------------------------------------------------------|
//! | macOS   | `/Applications/LibreOffice.app/…/soffice`, `~/Applications/…`  |
//! | Linux   | `/usr/bin`, `/usr/local/bin`, `/opt/libreoffice*/program`, snap |
//! | Windows | `%ProgramFiles%\LibreOffice\program\soffice.exe` (+ x86)        |
//!
//! ## Usage
//!
//! ```rust,no_run
//! let soffice = soffice_auto::ensure_soffice().expect("LibreOffice is not installed");
//! println!("using {}", soffice.display());
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use thiserror::Error;

// ── Public constants ─────────────────────────────────────────────────────────

/// Environment variable holding an explicit path to the `soffice` executable.
pub const SOFFICE_PATH_ENV: &str = "SOFFICE_PATH";

/// Executable names tried in each `PATH` directory, in order.
#[cfg(windows)]
const EXECUTABLE_NAMES: &[&str] = &["soffice.exe", "soffice.com", "libreoffice.exe"];
#[cfg(not(windows))]
const EXECUTABLE_NAMES: &[&str] = &["soffice", "libreoffice"];

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by soffice-auto lookups.
#[derive(Error, Debug)]
pub enum SofficeAutoError {
    /// `SOFFICE_PATH` (or an explicit path) does not point at a file.
    #[error("LibreOffice executable '{path}' does not exist")]
    ExplicitPathMissing { path: PathBuf },

    /// No installation was found anywhere in the search order.
    #[error("LibreOffice (soffice) not found; searched {} locations", searched.len())]
    NotFound { searched: Vec<PathBuf> },
}

impl SofficeAutoError {
    /// Every location that was checked, in search order.
    pub fn searched(&self) -> Vec<PathBuf> {
        match self {
            SofficeAutoError::ExplicitPathMissing { path } => vec![path.clone()],
            SofficeAutoError::NotFound { searched } => searched.clone(),
        }
    }
}

// ── Internal: platform install locations ─────────────────────────────────────

fn well_known_locations() -> Vec<PathBuf> {
    let mut out = Vec::new();

    match std::env::consts::OS {
        "macos" => {
            let bundle = Path::new("LibreOffice.app/Contents/MacOS/soffice");
            out.push(Path::new("/Applications").join(bundle));
            if let Some(home) = dirs::home_dir() {
                out.push(home.join("Applications").join(bundle));
            }
        }
        "windows" => {
            for var in ["ProgramFiles", "ProgramFiles(x86)", "ProgramW6432"] {
                if let Some(base) = std::env::var_os(var) {
                    out.push(
                        PathBuf::from(base)
                            .join("LibreOffice")
                            .join("program")
                            .join("soffice.exe"),
                    );
                }
            }
        }
        _ => {
            out.push(PathBuf::from("/usr/bin/soffice"));
            out.push(PathBuf::from("/usr/local/bin/soffice"));
            out.push(PathBuf::from("/usr/lib/libreoffice/program/soffice"));
            out.push(PathBuf::from("/snap/bin/libreoffice"));
            out.extend(opt_installations(Path::new("/opt")));
        }
    }

    out
}

/// `/opt/libreoffice7.6/program/soffice` style installs from the upstream
/// tarballs, highest version first.
fn opt_installations(root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("libreoffice"))
        })
        .collect();
    dirs.sort_by_cached_key(|d| std::cmp::Reverse(install_version(d)));

    dirs.into_iter()
        .map(|d| d.join("program").join("soffice"))
        .collect()
}

/// Numeric version of a `libreofficeX.Y` directory; `libreoffice` alone is 0.
fn install_version(dir: &Path) -> Vec<u64> {
    dir.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix("libreoffice"))
        .map(|v| v.split('.').map(|p| p.parse::<u64>().unwrap_or(0)).collect())
        .unwrap_or_default()
}

// ── Thread-safe singleton path cache ─────────────────────────────────────────

static RESOLVED_PATH: OnceLock<PathBuf> = OnceLock::new();

// ── Public API ───────────────────────────────────────────────────────────────

/// Returns the `soffice` executable, searching on first use.
///
/// Safe to call from multiple threads simultaneously; concurrent first calls
/// may each search, but they resolve to the same path.
pub fn ensure_soffice() -> Result<PathBuf, SofficeAutoError> {
    if let Some(path) = RESOLVED_PATH.get() {
        return Ok(path.clone());
    }

    let path = locate(
        std::env::var_os(SOFFICE_PATH_ENV),
        std::env::var_os("PATH"),
        &well_known_locations(),
    )?;

    let _ = RESOLVED_PATH.set(path.clone());

    Ok(path)
}

/// Returns `true` if an installation can be found right now.
pub fn is_soffice_available() -> bool {
    ensure_soffice().is_ok()
}

/// Validates an explicitly configured executable path.
///
/// Does not interact with the search order or the process-wide cache.
pub fn soffice_from_path(path: &Path) -> Result<PathBuf, SofficeAutoError> {
    if path.is_file() {
        Ok(path.to_path_buf())
    } else {
        Err(SofficeAutoError::ExplicitPathMissing {
            path: path.to_path_buf(),
        })
    }
}

// ── Internal helpers ─────────────────────────────────────────────────────────

fn locate(
    env_override: Option<OsString>,
    path_var: Option<OsString>,
    well_known: &[PathBuf],
) -> Result<PathBuf, SofficeAutoError> {
    // 1. Environment variable override.
    if let Some(explicit) = env_override.filter(|v| !v.is_empty()) {
        return soffice_from_path(Path::new(&explicit));
    }

    let mut searched = Vec::new();

    // 2. PATH lookup.
    if let Some(path_var) = path_var {
        for dir in std::env::split_paths(&path_var) {
            for name in EXECUTABLE_NAMES {
                let candidate = dir.join(name);
                if candidate.is_file() {
                    return Ok(candidate);
                }
                searched.push(candidate);
            }
        }
    }

    // 3. Well-known install locations.
    for candidate in well_known {
        if candidate.is_file() {
            return Ok(candidate.clone());
        }
        searched.push(candidate.clone());
    }

    Err(SofficeAutoError::NotFound { searched })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
