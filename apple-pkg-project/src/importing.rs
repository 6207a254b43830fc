// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Importing existing packages into project form.
//!
//! Flat packages are expanded with `pkgutil --expand`; bundle-style
//! packages are dissected directly from their `Contents/` directory.
//! Either way the result is a project directory with a payload tree,
//! scripts, a settings file derived from the package's metadata, and a
//! `Bom.txt` capturing payload ownership and modes.

use {
    crate::{
        build_info::{BuildInfoFile, BuildInfoFormat},
        error::{PkgProjectError, PkgResult},
        process::{self, DITTO, PKGUTIL},
        project::{self, PkgProject, PAYLOAD_DIR, SCRIPTS_DIR},
        running_as_root,
    },
    log::{info, warn},
    serde::Deserialize,
    std::{
        fs,
        path::{Path, PathBuf},
    },
};

/// Script names recognized in bundle-style packages, by phase.
const PRE_SCRIPT_NAMES: &[&str] = &["preflight", "preinstall", "preupgrade"];
const POST_SCRIPT_NAMES: &[&str] = &["postflight", "postinstall", "postupgrade"];

/// Attributes of a flat package's `PackageInfo` root element.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PackageInfoAttrs {
    pub identifier: Option<String>,
    pub version: Option<String>,
    pub install_location: Option<String>,
    pub postinstall_action: Option<String>,
    pub preserve_xattr: Option<String>,
}

impl PackageInfoAttrs {
    pub fn parse_xml(xml: &str) -> PkgResult<Self> {
        Ok(serde_xml_rs::from_str(xml)?)
    }
}

/// Import an existing package as a new project directory.
///
/// Bundle-style packages are directories; anything else is treated as a
/// flat package.
pub fn import_pkg(
    pkg_path: &Path,
    project_dir: &Path,
    format: BuildInfoFormat,
) -> PkgResult<PkgProject> {
    if project_dir.exists() {
        return Err(PkgProjectError::ProjectExists(project_dir.to_path_buf()));
    }

    if pkg_path.is_dir() {
        import_bundle_pkg(pkg_path, project_dir, format)
    } else {
        import_flat_pkg(pkg_path, project_dir, format)
    }
}

fn import_flat_pkg(
    pkg_path: &Path,
    project_dir: &Path,
    format: BuildInfoFormat,
) -> PkgResult<PkgProject> {
    process::run_tool(
        PKGUTIL,
        vec![
            "--expand".into(),
            pkg_path.as_os_str().to_os_string(),
            project_dir.as_os_str().to_os_string(),
        ],
    )?;

    let project = PkgProject::new(project_dir);

    let distribution_style = hoist_distribution_component(project_dir)?;

    let bom_path = project_dir.join("Bom");
    crate::bom::export_bom_text(&project, &bom_path)?;
    crate::bom::remove_if_possible(&bom_path);

    let uppercase_scripts = project_dir.join("Scripts");
    if uppercase_scripts.exists() {
        fs::rename(uppercase_scripts, project.scripts_dir())?;
    }

    expand_flat_payload(project_dir)?;

    let attrs_path = project_dir.join("PackageInfo");
    let attrs = PackageInfoAttrs::parse_xml(&fs::read_to_string(&attrs_path)?)?;
    let mut file = build_info_from_package_info(&attrs, pkg_path, distribution_style);
    apply_bom_ownership(&project, &mut file);
    project::write_build_info_file(&file, project_dir, format)?;
    crate::bom::remove_if_possible(&attrs_path);

    finish_import(&project, format)?;

    Ok(project)
}

fn import_bundle_pkg(
    pkg_path: &Path,
    project_dir: &Path,
    format: BuildInfoFormat,
) -> PkgResult<PkgProject> {
    if let Some(dist) = find_dist_file(&pkg_path.join("Contents"))? {
        return Err(PkgProjectError::ImportBundleDistribution(dist));
    }

    fs::create_dir(project_dir)?;

    let project = PkgProject::new(project_dir);

    crate::bom::export_bom_text(&project, &pkg_path.join("Contents/Archive.bom"))?;

    let payload_dir = project.payload_dir();
    fs::create_dir(&payload_dir)?;
    process::run_tool(
        DITTO,
        vec![
            "-x".into(),
            pkg_path.join("Contents/Archive.pax.gz").into_os_string(),
            payload_dir.into_os_string(),
        ],
    )?;

    copy_bundle_scripts(pkg_path, project_dir)?;

    let info_plist = plist::Value::from_file(pkg_path.join("Contents/Info.plist"))?;
    let mut file = build_info_from_info_plist(&info_plist, pkg_path)?;
    apply_bom_ownership(&project, &mut file);
    project::write_build_info_file(&file, project_dir, format)?;

    finish_import(&project, format)?;

    Ok(project)
}

/// Handle an expanded distribution-style package.
///
/// Such a package must hold exactly one component package, whose pieces
/// get hoisted into the project directory. Returns whether a
/// `Distribution` file was present.
fn hoist_distribution_component(project_dir: &Path) -> PkgResult<bool> {
    if !project_dir.join("Distribution").exists() {
        return Ok(false);
    }

    let components: Vec<PathBuf> = fs::read_dir(project_dir)?
        .filter_map(|entry| {
            let path = entry.ok()?.path();

            (path.extension().map(|e| e == "pkg").unwrap_or(false)).then_some(path)
        })
        .collect();

    if components.len() != 1 {
        return Err(PkgProjectError::ImportComponentCount(components.len()));
    }

    let component = &components[0];
    for item in ["Bom", "PackageInfo", "Payload", "Scripts"] {
        let source = component.join(item);

        if source.exists() {
            fs::rename(source, project_dir.join(item))?;
        }
    }

    // Leftovers in the component directory are not a problem.
    let _ = fs::remove_dir(component);

    Ok(true)
}

/// Expand the cpio `Payload` archive into the payload directory.
fn expand_flat_payload(project_dir: &Path) -> PkgResult<()> {
    let payload_file = project_dir.join("Payload");
    if !payload_file.exists() {
        return Ok(());
    }

    let payload_archive = project_dir.join("Payload.cpio.gz");
    fs::rename(&payload_file, &payload_archive)?;

    let payload_dir = project_dir.join(PAYLOAD_DIR);
    fs::create_dir(&payload_dir)?;

    process::run_tool(
        DITTO,
        vec![
            "-x".into(),
            payload_archive.as_os_str().to_os_string(),
            payload_dir.into_os_string(),
        ],
    )?;

    crate::bom::remove_if_possible(&payload_archive);

    Ok(())
}

fn find_dist_file(contents_dir: &Path) -> PkgResult<Option<PathBuf>> {
    if !contents_dir.is_dir() {
        return Ok(None);
    }

    for entry in fs::read_dir(contents_dir)? {
        let path = entry?.path();

        if path.extension().map(|e| e == "dist").unwrap_or(false) {
            return Ok(Some(path));
        }
    }

    Ok(None)
}

/// Derive build settings from a flat package's `PackageInfo` attributes.
fn build_info_from_package_info(
    attrs: &PackageInfoAttrs,
    pkg_path: &Path,
    distribution_style: bool,
) -> BuildInfoFile {
    BuildInfoFile {
        name: Some(pkg_basename(pkg_path)),
        identifier: Some(attrs.identifier.clone().unwrap_or_default()),
        version: Some(attrs.version.clone().unwrap_or_else(|| "1.0".to_string())),
        install_location: Some(
            attrs
                .install_location
                .clone()
                .unwrap_or_else(|| "/".to_string()),
        ),
        postinstall_action: Some(
            attrs
                .postinstall_action
                .clone()
                .unwrap_or_else(|| "none".to_string()),
        ),
        preserve_xattr: Some(attrs.preserve_xattr.as_deref() == Some("true")),
        distribution_style: Some(distribution_style),
        ..Default::default()
    }
}

/// Derive build settings from a bundle package's `Info.plist`.
fn build_info_from_info_plist(value: &plist::Value, pkg_path: &Path) -> PkgResult<BuildInfoFile> {
    let dict = value.as_dictionary().ok_or_else(|| {
        PkgProjectError::ComponentPlistStructure("Info.plist is not a dict".to_string())
    })?;

    let string_key = |key: &str| {
        dict.get(key)
            .and_then(|v| v.as_string())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
    };

    let postinstall_action = match string_key("IFPkgFlagRestartAction").as_deref() {
        Some("RequireRestart") | Some("RecommendRestart") => "restart",
        Some("RequireLogout") | Some("RecommendLogout") => "logout",
        _ => "none",
    };

    Ok(BuildInfoFile {
        name: Some(pkg_basename(pkg_path)),
        identifier: Some(string_key("CFBundleIdentifier").unwrap_or_default()),
        version: Some(
            string_key("CFBundleShortVersionString")
                .or_else(|| string_key("CFBundleVersion"))
                .unwrap_or_else(|| "1.0".to_string()),
        ),
        install_location: Some(
            string_key("IFPkgFlagDefaultLocation").unwrap_or_else(|| "/".to_string()),
        ),
        postinstall_action: Some(postinstall_action.to_string()),
        ..Default::default()
    })
}

/// Mark ownership as `preserve` when `Bom.txt` has non-root owners.
fn apply_bom_ownership(project: &PkgProject, file: &mut BuildInfoFile) {
    if project.has_non_default_ownership() {
        file.ownership = Some("preserve".to_string());

        if !running_as_root() {
            warn!(
                "package contains non-default owner/group on some files; \
                 build-info ownership has been set to \"preserve\". \
                 Check the bom for accuracy and run --sync as root to apply \
                 the correct owner and group to payload files"
            );
        }
    }
}

/// Copy install scripts out of a bundle package's `Resources` directory.
///
/// Localizations and `package_version` stay behind. A lone pre or post
/// script gets renamed to the name flat packages support; multiple
/// scripts of one phase only produce a warning since they cannot be
/// expressed in a flat package.
fn copy_bundle_scripts(pkg_path: &Path, project_dir: &Path) -> PkgResult<()> {
    let resources_dir = pkg_path.join("Contents/Resources");
    if !resources_dir.is_dir() {
        return Ok(());
    }

    let mut items = Vec::new();
    for entry in fs::read_dir(&resources_dir)? {
        items.push(entry?.file_name().to_string_lossy().to_string());
    }

    let known: Vec<&str> = PRE_SCRIPT_NAMES
        .iter()
        .chain(POST_SCRIPT_NAMES.iter())
        .copied()
        .collect();

    if !items.iter().any(|item| known.contains(&item.as_str())) {
        return Ok(());
    }

    let scripts_dir = project_dir.join(SCRIPTS_DIR);
    fs::create_dir(&scripts_dir)?;

    for item in &items {
        if item.ends_with(".lproj") || item == "package_version" {
            continue;
        }

        let source = resources_dir.join(item);
        let dest = scripts_dir.join(item);

        if source.is_dir() {
            copy_dir_recursive(&source, &dest)?;
        } else {
            fs::copy(&source, &dest)?;
        }
    }

    for (kind, names) in [("pre", PRE_SCRIPT_NAMES), ("post", POST_SCRIPT_NAMES)] {
        let found: Vec<&str> = names
            .iter()
            .copied()
            .filter(|name| scripts_dir.join(name).exists())
            .collect();
        let supported_name = format!("{}install", kind);

        if found.len() == 1 && found[0] != supported_name {
            info!("renaming {} script to {}", found[0], supported_name);
            fs::rename(scripts_dir.join(found[0]), scripts_dir.join(&supported_name))?;
        } else if found.len() > 1 {
            warn!(
                "multiple {}* scripts found; flat packages support only '{}'",
                kind, supported_name
            );
        }
    }

    Ok(())
}

fn copy_dir_recursive(source: &Path, dest: &Path) -> PkgResult<()> {
    fs::create_dir_all(dest)?;

    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let dest_path = dest.join(entry.file_name());

        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &dest_path)?;
        } else {
            fs::copy(entry.path(), &dest_path)?;
        }
    }

    Ok(())
}

fn pkg_basename(pkg_path: &Path) -> String {
    pkg_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Common tail of both import flavors.
fn finish_import(project: &PkgProject, format: BuildInfoFormat) -> PkgResult<()> {
    project.sync_from_bom_text(Some(format))?;
    project::create_default_gitignore(project.path())?;

    info!(
        "created new package project at {}",
        project.path().display()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_package_info_attributes() -> PkgResult<()> {
        let attrs = PackageInfoAttrs::parse_xml(
            r#"<pkg-info overwrite-permissions="true" relocatable="false"
                identifier="com.example.app" postinstall-action="restart"
                version="4.2" install-location="/Applications"
                preserve-xattr="true" auth="root"/>"#,
        )?;

        assert_eq!(attrs.identifier.as_deref(), Some("com.example.app"));
        assert_eq!(attrs.version.as_deref(), Some("4.2"));
        assert_eq!(attrs.install_location.as_deref(), Some("/Applications"));
        assert_eq!(attrs.postinstall_action.as_deref(), Some("restart"));
        assert_eq!(attrs.preserve_xattr.as_deref(), Some("true"));

        Ok(())
    }

    #[test]
    fn package_info_settings_fall_back_to_defaults() {
        let file = build_info_from_package_info(
            &PackageInfoAttrs::default(),
            Path::new("/tmp/Example-1.0.pkg"),
            false,
        );

        assert_eq!(file.name.as_deref(), Some("Example-1.0.pkg"));
        assert_eq!(file.version.as_deref(), Some("1.0"));
        assert_eq!(file.install_location.as_deref(), Some("/"));
        assert_eq!(file.postinstall_action.as_deref(), Some("none"));
        assert_eq!(file.preserve_xattr, Some(false));
        assert_eq!(file.distribution_style, Some(false));
    }

    #[test]
    fn info_plist_restart_actions_map_to_postinstall() -> PkgResult<()> {
        let mut dict = plist::Dictionary::new();
        dict.insert(
            "CFBundleIdentifier".to_string(),
            plist::Value::from("com.example.bundle"),
        );
        dict.insert(
            "CFBundleShortVersionString".to_string(),
            plist::Value::from("2.0"),
        );
        dict.insert(
            "IFPkgFlagRestartAction".to_string(),
            plist::Value::from("RecommendRestart"),
        );

        let file = build_info_from_info_plist(
            &plist::Value::Dictionary(dict),
            Path::new("/tmp/Example.pkg"),
        )?;

        assert_eq!(file.identifier.as_deref(), Some("com.example.bundle"));
        assert_eq!(file.version.as_deref(), Some("2.0"));
        assert_eq!(file.postinstall_action.as_deref(), Some("restart"));
        assert_eq!(file.install_location.as_deref(), Some("/"));

        Ok(())
    }

    #[test]
    fn info_plist_version_falls_back_to_bundle_version() -> PkgResult<()> {
        let mut dict = plist::Dictionary::new();
        dict.insert("CFBundleVersion".to_string(), plist::Value::from("3.1.4"));

        let file = build_info_from_info_plist(
            &plist::Value::Dictionary(dict),
            Path::new("/tmp/Example.pkg"),
        )?;

        assert_eq!(file.version.as_deref(), Some("3.1.4"));
        assert_eq!(file.postinstall_action.as_deref(), Some("none"));

        Ok(())
    }

    #[test]
    fn hoist_requires_exactly_one_component() -> PkgResult<()> {
        let temp_dir = tempfile::tempdir()?;
        fs::write(temp_dir.path().join("Distribution"), "<installer-gui-script/>")?;
        fs::create_dir(temp_dir.path().join("first.pkg"))?;
        fs::create_dir(temp_dir.path().join("second.pkg"))?;

        let err = hoist_distribution_component(temp_dir.path()).unwrap_err();
        assert!(matches!(err, PkgProjectError::ImportComponentCount(2)));

        Ok(())
    }

    #[test]
    fn hoist_moves_component_pieces_up() -> PkgResult<()> {
        let temp_dir = tempfile::tempdir()?;
        fs::write(temp_dir.path().join("Distribution"), "<installer-gui-script/>")?;

        let component = temp_dir.path().join("example.pkg");
        fs::create_dir(&component)?;
        fs::write(component.join("Bom"), b"bom")?;
        fs::write(component.join("PackageInfo"), b"<pkg-info/>")?;
        fs::write(component.join("Payload"), b"payload")?;

        assert!(hoist_distribution_component(temp_dir.path())?);

        assert!(temp_dir.path().join("Bom").exists());
        assert!(temp_dir.path().join("PackageInfo").exists());
        assert!(temp_dir.path().join("Payload").exists());
        assert!(!component.exists());

        Ok(())
    }

    #[test]
    fn no_distribution_file_means_component_package() -> PkgResult<()> {
        let temp_dir = tempfile::tempdir()?;

        assert!(!hoist_distribution_component(temp_dir.path())?);

        Ok(())
    }

    #[test]
    fn lone_preflight_script_is_renamed() -> PkgResult<()> {
        let temp_dir = tempfile::tempdir()?;
        let pkg = temp_dir.path().join("Example.pkg");
        let resources = pkg.join("Contents/Resources");
        fs::create_dir_all(&resources)?;
        fs::write(resources.join("preflight"), "#!/bin/sh\n")?;
        fs::write(resources.join("postinstall"), "#!/bin/sh\n")?;
        fs::write(resources.join("package_version"), "1")?;
        fs::create_dir(resources.join("en.lproj"))?;

        let project_dir = temp_dir.path().join("project");
        fs::create_dir(&project_dir)?;
        copy_bundle_scripts(&pkg, &project_dir)?;

        let scripts = project_dir.join(SCRIPTS_DIR);
        assert!(scripts.join("preinstall").exists());
        assert!(!scripts.join("preflight").exists());
        assert!(scripts.join("postinstall").exists());
        assert!(!scripts.join("package_version").exists());
        assert!(!scripts.join("en.lproj").exists());

        Ok(())
    }

    #[test]
    fn resources_without_scripts_are_left_alone() -> PkgResult<()> {
        let temp_dir = tempfile::tempdir()?;
        let pkg = temp_dir.path().join("Example.pkg");
        let resources = pkg.join("Contents/Resources");
        fs::create_dir_all(&resources)?;
        fs::write(resources.join("ReadMe.rtf"), b"docs")?;

        let project_dir = temp_dir.path().join("project");
        fs::create_dir(&project_dir)?;
        copy_bundle_scripts(&pkg, &project_dir)?;

        assert!(!project_dir.join(SCRIPTS_DIR).exists());

        Ok(())
    }
}
