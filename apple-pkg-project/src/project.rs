// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Package project directories.
//!
//! A project is a directory holding a `payload/` tree that becomes the
//! installed files, an optional `scripts/` directory of install scripts,
//! a build settings file, and an optional `Bom.txt` recording payload
//! metadata for version control round trips.

use {
    crate::{
        build_info::{BuildInfo, BuildInfoFormat, Ownership, BUILD_INFO_BASENAME},
        error::{PkgProjectError, PkgResult},
        running_as_root,
    },
    apple_bom_text::{sync_payload, SyncOptions},
    log::{info, warn},
    std::{
        fs,
        path::{Path, PathBuf},
    },
};

/// File recording payload metadata in text form.
pub const BOM_TEXT_FILE: &str = "Bom.txt";

/// Optional product requirements consumed by `productbuild`.
pub const REQUIREMENTS_PLIST: &str = "product-requirements.plist";

pub const PAYLOAD_DIR: &str = "payload";
pub const SCRIPTS_DIR: &str = "scripts";
pub const BUILD_DIR: &str = "build";

const GITIGNORE_DEFAULT: &str = "# .DS_Store files!\n.DS_Store\n\n# our build directory\nbuild/\n";

/// A package project directory.
#[derive(Clone, Debug)]
pub struct PkgProject {
    path: PathBuf,
}

impl PkgProject {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn payload_dir(&self) -> PathBuf {
        self.path.join(PAYLOAD_DIR)
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.path.join(SCRIPTS_DIR)
    }

    pub fn build_dir(&self) -> PathBuf {
        self.path.join(BUILD_DIR)
    }

    pub fn bom_text_path(&self) -> PathBuf {
        self.path.join(BOM_TEXT_FILE)
    }

    pub fn requirements_plist_path(&self) -> PathBuf {
        self.path.join(REQUIREMENTS_PLIST)
    }

    /// The payload directory, if present.
    pub fn existing_payload_dir(&self) -> Option<PathBuf> {
        let dir = self.payload_dir();

        dir.is_dir().then_some(dir)
    }

    /// The scripts directory, if present and not effectively empty.
    ///
    /// A scripts directory containing nothing, or only a `.DS_Store`
    /// dropping, is not part of the build.
    pub fn effective_scripts_dir(&self) -> PkgResult<Option<PathBuf>> {
        let dir = self.scripts_dir();

        if !dir.is_dir() {
            return Ok(None);
        }

        let mut meaningful = false;
        for entry in fs::read_dir(&dir)? {
            if entry?.file_name() != ".DS_Store" {
                meaningful = true;
                break;
            }
        }

        Ok(meaningful.then_some(dir))
    }

    /// Ensure the `build/` directory exists.
    pub fn ensure_build_dir(&self) -> PkgResult<PathBuf> {
        let dir = self.build_dir();

        if !dir.exists() {
            fs::create_dir(&dir)?;
        } else if !dir.is_dir() {
            return Err(PkgProjectError::NotADirectory(dir));
        }

        Ok(dir)
    }

    /// Whether `Bom.txt` declares ownership other than root/wheel.
    pub fn has_non_default_ownership(&self) -> bool {
        apple_bom_text::has_non_default_ownership(&self.bom_text_path())
    }

    /// Apply `Bom.txt` metadata to the payload directory.
    ///
    /// Returns the number of changes made. Ownership fixups only happen
    /// when running as root; a project declaring non-recommended
    /// ownership gets a warning otherwise.
    pub fn sync_from_bom_text(&self, format: Option<BuildInfoFormat>) -> PkgResult<u64> {
        let info =
            crate::build_info::resolve_build_info_or_default(&self.path, format)?;
        let privileged = running_as_root();

        if info.ownership != Ownership::Recommended && !privileged {
            warn!(
                "build-info ownership: {} might require running as root to \
                 properly sync owner and group for payload files",
                info.ownership
            );
        }

        let changes = sync_payload(
            &self.bom_text_path(),
            &self.payload_dir(),
            &SyncOptions { privileged },
        )?;

        if changes > 0 {
            info!("sync successful");
        } else {
            info!("sync successful: no changes needed");
        }

        Ok(changes)
    }
}

/// Create an empty package project with default settings.
///
/// An existing directory is only converted with `force`. The settings
/// file is written in `format`.
pub fn create_template_project(
    project_dir: &Path,
    format: BuildInfoFormat,
    force: bool,
) -> PkgResult<PkgProject> {
    if project_dir.exists() && !force {
        return Err(PkgProjectError::ProjectExists(project_dir.to_path_buf()));
    }

    if !project_dir.exists() {
        fs::create_dir(project_dir)?;
    }

    let project = PkgProject::new(project_dir);
    fs::create_dir(project.payload_dir())?;
    fs::create_dir(project.scripts_dir())?;
    fs::create_dir(project.build_dir())?;

    // The template keeps the ${version} placeholder in the name so the
    // settings file stays generic; it is expanded at resolve time.
    let info = BuildInfo::default_for_project(project_dir);
    write_build_info(&info, project_dir, format)?;
    create_default_gitignore(project_dir)?;

    info!("created new package project at {}", project_dir.display());

    Ok(project)
}

/// Write a settings file for `info` in the requested format.
pub fn write_build_info(
    info: &BuildInfo,
    project_dir: &Path,
    format: BuildInfoFormat,
) -> PkgResult<PathBuf> {
    write_build_info_file(&info.to_file(), project_dir, format)
}

/// Write an on-disk settings record in the requested format.
pub fn write_build_info_file(
    file: &crate::build_info::BuildInfoFile,
    project_dir: &Path,
    format: BuildInfoFormat,
) -> PkgResult<PathBuf> {
    let path = project_dir.join(format!(
        "{}.{}",
        BUILD_INFO_BASENAME,
        format.primary_extension()
    ));

    format.save(&path, file)?;

    Ok(path)
}

/// Create the default `.gitignore` for a new project.
pub fn create_default_gitignore(project_dir: &Path) -> PkgResult<()> {
    fs::write(project_dir.join(".gitignore"), GITIGNORE_DEFAULT)?;

    Ok(())
}
