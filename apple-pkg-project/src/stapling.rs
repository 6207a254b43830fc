// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stapling notarization tickets to packages.

use {
    crate::{
        error::{PkgProjectError, PkgResult},
        process::{self, XCRUN},
    },
    log::info,
    std::path::Path,
};

/// Staple a notarization ticket to a package with `xcrun stapler`.
pub fn staple_package(pkg_path: &Path) -> PkgResult<()> {
    info!("stapling package");

    let output = process::run_tool_capture(
        XCRUN,
        vec![
            "stapler".into(),
            "staple".into(),
            pkg_path.as_os_str().to_os_string(),
        ],
    )?;

    if !output.status.success() {
        return Err(PkgProjectError::StapleFailure(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    info!("the staple and validate action worked!");

    Ok(())
}
