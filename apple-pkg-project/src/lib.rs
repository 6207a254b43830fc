// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Build Apple installer packages from simple project directories.
//!
//! A package project is a directory with a `payload/` tree of files to
//! install, an optional `scripts/` directory of install scripts, and a
//! build settings file (`build-info.plist`, `.json`, or `.yaml`). The
//! layout is friendly to version control; a text bill of materials
//! (`Bom.txt`) records the payload metadata git cannot.
//!
//! Capabilities provided:
//!
//! * Creating template projects ([project::create_template_project]).
//! * Building packages with `pkgbuild` / `productbuild`, including
//!   signing, notarization, and stapling ([building::build_project]).
//! * Importing existing flat and bundle style packages into project
//!   form ([importing::import_pkg]).
//! * Keeping payload metadata in sync with `Bom.txt`
//!   ([project::PkgProject::sync_from_bom_text]).
//!
//! Operations that invoke Apple tooling require macOS.

pub mod bom;
pub mod build_info;
pub mod building;
pub mod error;
pub mod importing;
pub mod notarization;
pub mod process;
pub mod project;
pub mod stapling;

pub use error::{PkgProjectError, PkgResult};

/// Whether we run with effective uid 0.
///
/// Ownership-affecting operations behave differently for root.
pub fn running_as_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}
