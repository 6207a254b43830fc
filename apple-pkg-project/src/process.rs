// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Running Apple's packaging tools.
//!
//! All operations that produce or dissect packages shell out to tools
//! shipped with macOS. Tools are invoked by absolute path; there is no
//! PATH searching.

use {
    crate::error::{PkgProjectError, PkgResult},
    log::{debug, info},
    std::{
        ffi::OsString,
        io::{BufRead, BufReader},
    },
};

pub const DITTO: &str = "/usr/bin/ditto";
pub const LSBOM: &str = "/usr/bin/lsbom";
pub const PKGBUILD: &str = "/usr/bin/pkgbuild";
pub const PKGUTIL: &str = "/usr/sbin/pkgutil";
pub const PRODUCTBUILD: &str = "/usr/bin/productbuild";
pub const XCRUN: &str = "/usr/bin/xcrun";

/// Run a tool, streaming its output to the log.
///
/// Fails if the tool cannot be spawned or exits non-zero.
pub fn run_tool(tool: &'static str, args: Vec<OsString>) -> PkgResult<()> {
    debug!("invoking {} with args: {:?}", tool, args);

    let command = duct::cmd(tool, args)
        .stderr_to_stdout()
        .unchecked()
        .reader()
        .map_err(|source| PkgProjectError::ToolRun { tool, source })?;

    {
        let reader = BufReader::new(&command);
        for line in reader.lines() {
            info!("{}> {}", tool, line?);
        }
    }

    let output = command
        .try_wait()?
        .ok_or_else(|| PkgProjectError::ToolFailure {
            tool,
            message: "did not exit".to_string(),
        })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(PkgProjectError::ToolFailure {
            tool,
            message: format!("exited with {}", output.status),
        })
    }
}

/// Run a tool, capturing stdout and stderr.
///
/// The caller inspects the returned [std::process::Output]; a non-zero
/// exit is not an error here since some tools report rich failure detail
/// on stdout.
pub fn run_tool_capture(
    tool: &'static str,
    args: Vec<OsString>,
) -> PkgResult<std::process::Output> {
    debug!("invoking {} with args: {:?}", tool, args);

    duct::cmd(tool, args)
        .stdout_capture()
        .stderr_capture()
        .unchecked()
        .run()
        .map_err(|source| PkgProjectError::ToolRun { tool, source })
}

/// Fail with the tool's stderr if its captured run exited non-zero.
pub fn check_success(tool: &'static str, output: &std::process::Output) -> PkgResult<()> {
    if output.status.success() {
        Ok(())
    } else {
        Err(PkgProjectError::ToolFailure {
            tool,
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
