// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Text bill-of-materials (`Bom.txt`) handling.
//!
//! Built Apple installer packages carry a *bill of materials*: a binary
//! manifest recording the mode, owner, and group of every path the package
//! installs. Version control systems do not preserve that metadata (nor
//! empty directories), so package projects persist a text rendition of the
//! BOM alongside the payload tree: the output of `/usr/bin/lsbom`, one
//! tab-separated record per path.
//!
//! This crate implements both halves of that round trip:
//!
//! * [entry] decodes and re-serializes the line-oriented text format.
//! * [sync] applies a decoded BOM against a working payload directory,
//!   recreating missing directories and fixing permission bits (and, on
//!   privileged runs, owner and group).

pub mod entry;
pub use entry::{has_non_default_ownership, parse_bom_text, BomEntry, EntryMode};
pub mod sync;
pub use sync::{sync_payload, SyncOptions};

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed BOM line {0}: {1}")]
    MalformedLine(u64, String),

    #[error("no BOM text file found at {0}")]
    MissingBomFile(PathBuf),

    #[error("file {0} is missing in payload")]
    MissingPayloadFile(PathBuf),
}

/// Result type for this crate.
pub type BomResult<T> = std::result::Result<T, Error>;
