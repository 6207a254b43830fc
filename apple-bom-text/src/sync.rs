// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reconcile a payload directory against BOM text.
//!
//! Version control restores file content but not modes, ownership, or
//! empty directories. This module narrows the gap between an on-disk
//! payload tree and the metadata a `Bom.txt` declares: permission bits are
//! corrected, missing directories are recreated, and privileged runs also
//! fix owner and group. A missing regular file is unrecoverable from the
//! BOM alone and aborts the pass.

use {
    crate::{entry::BomEntry, BomResult, Error},
    log::{debug, info, warn},
    std::{
        ffi::CString,
        fs,
        io::BufReader,
        os::unix::{
            ffi::OsStrExt,
            fs::{MetadataExt, PermissionsExt},
        },
        path::Path,
    },
};

/// Behavior knobs for a reconciliation pass.
#[derive(Clone, Copy, Debug, Default)]
pub struct SyncOptions {
    /// Whether the caller runs with effective uid 0.
    ///
    /// Owner and group fixups are only attempted on privileged runs;
    /// unprivileged callers get permission-bit reconciliation only.
    pub privileged: bool,
}

/// Apply a BOM text file to a payload directory.
///
/// Entries are processed in file order, each independently. Returns the
/// number of changes made. The pass is not transactional: the first
/// missing regular file, I/O failure, or parse failure aborts immediately
/// and changes already applied to earlier entries stand.
pub fn sync_payload(
    bom_path: &Path,
    payload_dir: &Path,
    options: &SyncOptions,
) -> BomResult<u64> {
    if !bom_path.exists() {
        return Err(Error::MissingBomFile(bom_path.to_path_buf()));
    }

    let reader = BufReader::new(fs::File::open(bom_path)?);
    let mut changes = 0;

    for entry in crate::entry::parse_bom_text(reader)? {
        changes += apply_entry(&entry, payload_dir, options)?;
    }

    Ok(changes)
}

fn apply_entry(entry: &BomEntry, payload_dir: &Path, options: &SyncOptions) -> BomResult<u64> {
    if let Some(sibling) = entry.sidecar_sibling() {
        warn!(
            "file {} contains extended attributes or a resource fork for {}; \
             version control and package builds may not preserve extended attributes",
            entry.path, sibling
        );
        return Ok(0);
    }

    let target = payload_dir.join(&entry.path);
    let mut changes = 0;

    // Operate on symlinks themselves, never their targets.
    match fs::symlink_metadata(&target) {
        Ok(metadata) => {
            let current = metadata.permissions().mode() & 0o7777;

            if current != entry.mode.permissions() {
                if metadata.file_type().is_symlink() && !cfg!(target_os = "macos") {
                    // Only macOS can change the mode of a symlink itself.
                    debug!("skipping mode change of symlink {}", target.display());
                } else {
                    info!(
                        "changing mode of {} to {:o}",
                        target.display(),
                        entry.mode.permissions()
                    );
                    lchmod(&target, entry.mode.permissions())?;
                    changes += 1;
                }
            }
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            if entry.mode.is_directory() {
                info!(
                    "creating {} with mode {:o}",
                    target.display(),
                    entry.mode.permissions()
                );
                fs::create_dir(&target)?;
                fs::set_permissions(
                    &target,
                    fs::Permissions::from_mode(entry.mode.permissions()),
                )?;

                // Ownership of a freshly created directory is left to a
                // later privileged pass.
                return Ok(1);
            }

            return Err(Error::MissingPayloadFile(target));
        }
        Err(err) => return Err(err.into()),
    }

    if options.privileged {
        let metadata = fs::symlink_metadata(&target)?;

        if metadata.uid() != entry.owner_uid || metadata.gid() != entry.group_gid {
            info!(
                "changing owner/group of {} to {}/{}",
                target.display(),
                entry.owner_uid,
                entry.group_gid
            );
            lchown(&target, entry.owner_uid, entry.group_gid)?;
            changes += 1;
        }
    }

    Ok(changes)
}

fn path_cstring(path: &Path) -> std::io::Result<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path contains a NUL byte")
    })
}

#[cfg(target_os = "macos")]
fn lchmod(path: &Path, mode: u32) -> std::io::Result<()> {
    let path = path_cstring(path)?;

    let rc = unsafe { libc::lchmod(path.as_ptr(), mode as libc::mode_t) };

    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(target_os = "macos"))]
fn lchmod(path: &Path, mode: u32) -> std::io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

fn lchown(path: &Path, uid: u32, gid: u32) -> std::io::Result<()> {
    let path = path_cstring(path)?;

    let rc = unsafe { libc::lchown(path.as_ptr(), uid as libc::uid_t, gid as libc::gid_t) };

    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}
