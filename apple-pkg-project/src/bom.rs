// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Exporting package BOMs to text.

use {
    crate::{
        error::{PkgProjectError, PkgResult},
        process::{self, LSBOM, PKGUTIL},
        project::PkgProject,
    },
    log::{info, warn},
    std::{fs, io::Cursor, path::Path},
};

/// Export a binary BOM file to `Bom.txt` in the project directory.
///
/// The lister's output is validated line by line, then persisted verbatim
/// so the file round trips through the text codec without reordering.
pub fn export_bom_text(project: &PkgProject, bom_path: &Path) -> PkgResult<()> {
    let output = process::run_tool_capture(LSBOM, vec![bom_path.as_os_str().to_os_string()])?;
    process::check_success(LSBOM, &output)?;

    apple_bom_text::parse_bom_text(Cursor::new(&output.stdout))?;

    let destination = project.bom_text_path();
    info!("exporting bom info to {}", destination.display());
    fs::write(&destination, &output.stdout)?;

    Ok(())
}

/// Extract the BOM from a built flat package and export it as `Bom.txt`.
pub fn export_bom_from_pkg(project: &PkgProject, pkg_path: &Path) -> PkgResult<()> {
    info!("extracting bom file from {}", pkg_path.display());

    let output = process::run_tool_capture(
        PKGUTIL,
        vec!["--bom".into(), pkg_path.as_os_str().to_os_string()],
    )?;
    process::check_success(PKGUTIL, &output)?;

    let stdout = String::from_utf8(output.stdout).map_err(|_| {
        PkgProjectError::ToolFailure {
            tool: PKGUTIL,
            message: "--bom output is not UTF-8".to_string(),
        }
    })?;
    let bom_path = Path::new(stdout.trim());

    let res = export_bom_text(project, bom_path);
    remove_if_possible(bom_path);

    res
}

/// Remove a temporary file, warning instead of failing on error.
pub fn remove_if_possible(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        warn!("could not remove {}: {}", path.display(), err);
    }
}
