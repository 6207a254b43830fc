// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error handling.

use {std::path::PathBuf, thiserror::Error};

/// Unified error type for package project operations.
#[derive(Debug, Error)]
pub enum PkgProjectError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("BOM text error: {0}")]
    BomText(#[from] apple_bom_text::Error),

    #[error("plist error: {0}")]
    Plist(#[from] plist::Error),

    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("XML error: {0}")]
    SerdeXml(#[from] serde_xml_rs::Error),

    #[error("multiple build-info files found in {0}; remove all but one")]
    MultipleBuildInfoFiles(PathBuf),

    #[error("no build-info file found in {0}")]
    NoBuildInfoFile(PathBuf),

    #[error("could not parse {path} as {format}: {message}")]
    BuildInfoInvalid {
        path: PathBuf,
        format: &'static str,
        message: String,
    },

    #[error("{path}: illegal value {value:?} for {key}; legal values are {legal:?}")]
    IllegalBuildInfoValue {
        path: PathBuf,
        key: &'static str,
        value: String,
        legal: &'static [&'static str],
    },

    #[error("project {0} contains neither a payload nor a scripts directory")]
    NoPayloadOrScripts(PathBuf),

    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("project directory {0} does not exist")]
    ProjectNotFound(PathBuf),

    #[error("{0} already exists; use --force to overwrite")]
    ProjectExists(PathBuf),

    #[error("error running {tool}: {source}")]
    ToolRun {
        tool: &'static str,
        source: std::io::Error,
    },

    #[error("{tool} failed: {message}")]
    ToolFailure {
        tool: &'static str,
        message: String,
    },

    #[error("signing requested but no signing identity configured")]
    SigningMissingIdentity,

    #[error("notarization requested but no username configured")]
    NotarizationMissingUsername,

    #[error("notarization requires a password, an API key, or a stored credential")]
    NotarizationMissingCredentials,

    #[error("unexpected output from notary tool: {0}")]
    NotaryUnexpectedOutput(String),

    #[error("notarization failed: {0}")]
    NotarizationFailed(String),

    #[error("stapling failed: {0}")]
    StapleFailure(String),

    #[error("expected exactly 1 component in package; found {0}")]
    ImportComponentCount(usize),

    #[error("cannot import bundle-style package with a Distribution file: {0}")]
    ImportBundleDistribution(PathBuf),

    #[error("unexpected structure in component property list: {0}")]
    ComponentPlistStructure(String),
}

/// Convenience `Result` alias.
pub type PkgResult<T> = std::result::Result<T, PkgProjectError>;
