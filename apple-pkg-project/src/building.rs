// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Building packages with `pkgbuild` and `productbuild`.

use {
    crate::{
        build_info::{BuildInfo, BuildInfoFormat, Ownership, SigningInfo},
        error::{PkgProjectError, PkgResult},
        notarization::Notarizer,
        process::{self, PKGBUILD, PRODUCTBUILD},
        project::PkgProject,
        running_as_root,
        stapling::staple_package,
    },
    log::{info, warn},
    std::{
        ffi::OsString,
        fs,
        os::unix::fs::PermissionsExt,
        path::{Path, PathBuf},
    },
};

/// Install scripts recognized by `pkgbuild`.
pub const SUPPORTED_SCRIPT_NAMES: &[&str] = &["preinstall", "postinstall"];

/// Options controlling a package build.
#[derive(Clone, Debug, Default)]
pub struct BuildOptions {
    /// Pass `--quiet` to the packaging tools.
    pub quiet: bool,
    /// Export `Bom.txt` from the built package.
    pub export_bom_info: bool,
    /// Do not upload to the notary service even if configured.
    pub skip_notarization: bool,
    /// Do not staple the notarization ticket.
    pub skip_stapling: bool,
    /// Restrict build settings probing to one format.
    pub build_info_format: Option<BuildInfoFormat>,
}

/// Build the package for a project.
pub fn build_project(project: &PkgProject, options: &BuildOptions) -> PkgResult<()> {
    let info = crate::build_info::resolve_build_info(project.path(), options.build_info_format)?;

    if info.ownership != Ownership::Recommended && !running_as_root() {
        warn!(
            "build-info ownership: {} might require running as root to build this package",
            info.ownership
        );
    }

    let payload_dir = project.existing_payload_dir();
    let scripts_dir = project.effective_scripts_dir()?;

    if payload_dir.is_none() && scripts_dir.is_none() {
        return Err(PkgProjectError::NoPayloadOrScripts(
            project.path().to_path_buf(),
        ));
    }

    let build_dir = project.ensure_build_dir()?;
    let temp_dir = tempfile::Builder::new().prefix("pkgproject").tempdir()?;

    let component_plist = if let Some(payload) = payload_dir
        .as_deref()
        .filter(|_| info.suppress_bundle_relocation)
    {
        Some(make_component_property_list(
            payload,
            temp_dir.path(),
            options.quiet,
        )?)
    } else {
        None
    };

    let pkginfo_path = make_stub_package_info(&info, temp_dir.path())?;

    let output_path = build_dir.join(&info.name);
    if output_path.exists() {
        remove_path(&output_path)?;
    }

    if let Some(scripts) = &scripts_dir {
        prepare_scripts_dir(scripts)?;
    }

    run_pkgbuild(
        &info,
        payload_dir.as_deref(),
        scripts_dir.as_deref(),
        component_plist.as_deref(),
        &pkginfo_path,
        &output_path,
        options.quiet,
    )?;

    if options.export_bom_info {
        crate::bom::export_bom_from_pkg(project, &output_path)?;
    }

    if info.distribution_style {
        build_distribution_pkg(project, &info, &output_path, options.quiet)?;
    }

    if let Some(notarization) = &info.notarization_info {
        if !options.skip_notarization {
            let notarizer = Notarizer::new(notarization, &info.identifier)?;
            let request_uuid = notarizer.upload(&output_path)?;

            if !options.skip_stapling && notarizer.wait(&request_uuid)? {
                staple_package(&output_path)?;
            }
        }
    }

    Ok(())
}

/// Analyze the payload and disable bundle relocation.
///
/// Runs `pkgbuild --analyze` to produce a component property list, then
/// flips `BundleIsRelocatable` off for every bundle it found.
fn make_component_property_list(
    payload_dir: &Path,
    temp_dir: &Path,
    quiet: bool,
) -> PkgResult<PathBuf> {
    let component_plist = temp_dir.join("component.plist");

    let mut args: Vec<OsString> = Vec::new();
    if quiet {
        args.push("--quiet".into());
    }
    args.push("--analyze".into());
    args.push("--root".into());
    args.push(payload_dir.into());
    args.push(component_plist.as_os_str().to_os_string());

    process::run_tool(PKGBUILD, args)?;

    let mut value = plist::Value::from_file(&component_plist)?;
    suppress_relocation(&mut value)?;
    value.to_file_xml(&component_plist)?;

    Ok(component_plist)
}

/// Turn off `BundleIsRelocatable` in a component property list.
///
/// The property list is an array of dictionaries, one per discovered
/// bundle. Returns the number of bundles changed.
fn suppress_relocation(value: &mut plist::Value) -> PkgResult<u32> {
    let bundles = value.as_array_mut().ok_or_else(|| {
        PkgProjectError::ComponentPlistStructure("expected an array of bundles".to_string())
    })?;

    let mut changed = 0;

    for bundle in bundles {
        let dict = bundle.as_dictionary_mut().ok_or_else(|| {
            PkgProjectError::ComponentPlistStructure("bundle entry is not a dict".to_string())
        })?;

        if dict
            .get("BundleIsRelocatable")
            .and_then(|v| v.as_boolean())
            .unwrap_or(false)
        {
            let bundle_path = dict
                .get("RootRelativeBundlePath")
                .and_then(|v| v.as_string())
                .unwrap_or("<unknown>")
                .to_string();
            info!("turning off bundle relocation for {}", bundle_path);

            dict.insert("BundleIsRelocatable".to_string(), plist::Value::from(false));
            changed += 1;
        }
    }

    Ok(changed)
}

/// Write a stub `PackageInfo` file declaring install behavior.
fn make_stub_package_info(info: &BuildInfo, temp_dir: &Path) -> PkgResult<PathBuf> {
    let path = temp_dir.join("PackageInfo");

    fs::write(&path, stub_package_info_xml(info))?;

    Ok(path)
}

fn stub_package_info_xml(info: &BuildInfo) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\" standalone=\"no\"?>\
         <pkg-info postinstall-action=\"{}\" preserve-xattr=\"{}\"/>",
        info.postinstall_action, info.preserve_xattr
    )
}

/// Drop `.DS_Store` and ensure install scripts are executable.
fn prepare_scripts_dir(scripts_dir: &Path) -> PkgResult<()> {
    let ds_store = scripts_dir.join(".DS_Store");
    if ds_store.exists() {
        info!("removing .DS_Store file from the scripts folder");
        fs::remove_file(&ds_store)?;
    }

    for name in SUPPORTED_SCRIPT_NAMES {
        let script = scripts_dir.join(name);

        if let Ok(metadata) = script.metadata() {
            if metadata.permissions().mode() & 0o500 != 0o500 {
                info!("making {} script executable", name);
                fs::set_permissions(&script, fs::Permissions::from_mode(0o755))?;
            }
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_pkgbuild(
    info: &BuildInfo,
    payload_dir: Option<&Path>,
    scripts_dir: Option<&Path>,
    component_plist: Option<&Path>,
    pkginfo_path: &Path,
    output_path: &Path,
    quiet: bool,
) -> PkgResult<()> {
    let mut args: Vec<OsString> = vec![
        "--ownership".into(),
        info.ownership.to_string().into(),
        "--identifier".into(),
        info.identifier.clone().into(),
        "--version".into(),
        info.version.clone().into(),
        "--info".into(),
        pkginfo_path.into(),
    ];

    match payload_dir {
        Some(payload) => {
            args.push("--root".into());
            args.push(payload.into());

            if !info.install_location.is_empty() {
                args.push("--install-location".into());
                args.push(info.install_location.clone().into());
            }
        }
        None => {
            args.push("--nopayload".into());
        }
    }

    if let Some(component_plist) = component_plist {
        args.push("--component-plist".into());
        args.push(component_plist.into());
    }

    if let Some(scripts) = scripts_dir {
        args.push("--scripts".into());
        args.push(scripts.into());
    }

    if quiet {
        args.push("--quiet".into());
    }

    // Distribution-style builds sign the product archive instead of the
    // component package.
    if !info.distribution_style {
        if let Some(signing) = &info.signing_info {
            add_signing_args(&mut args, signing)?;
        }
    }

    args.push(output_path.into());

    process::run_tool(PKGBUILD, args)
}

/// Convert a component package into a distribution-style package.
///
/// The distribution package is built alongside the component package,
/// then replaces it.
fn build_distribution_pkg(
    project: &PkgProject,
    info: &BuildInfo,
    pkg_path: &Path,
    quiet: bool,
) -> PkgResult<()> {
    let dist_path = pkg_path.with_file_name(format!("Dist-{}", info.name));
    if dist_path.exists() {
        remove_path(&dist_path)?;
    }

    let mut args: Vec<OsString> = Vec::new();
    if quiet {
        args.push("--quiet".into());
    }

    if let Some(signing) = &info.signing_info {
        add_signing_args(&mut args, signing)?;
    }

    let requirements = project.requirements_plist_path();
    if requirements.exists() {
        args.push("--product".into());
        args.push(requirements.into());
    }

    args.push("--identifier".into());
    args.push(info.product_id().into());
    args.push("--version".into());
    args.push(info.version.clone().into());
    args.push("--package".into());
    args.push(pkg_path.into());
    args.push(dist_path.as_os_str().to_os_string());

    process::run_tool(PRODUCTBUILD, args)?;

    info!("removing component package {}", pkg_path.display());
    fs::remove_file(pkg_path)?;
    info!(
        "renaming distribution package {} to {}",
        dist_path.display(),
        pkg_path.display()
    );
    fs::rename(&dist_path, pkg_path)?;

    Ok(())
}

/// Add `--sign` and related arguments from signing settings.
fn add_signing_args(args: &mut Vec<OsString>, signing: &SigningInfo) -> PkgResult<()> {
    info!("adding package signing info to command");

    let identity = signing
        .identity
        .as_deref()
        .ok_or(PkgProjectError::SigningMissingIdentity)?;
    args.push("--sign".into());
    args.push(identity.into());

    if let Some(keychain) = &signing.keychain {
        args.push("--keychain".into());
        args.push(keychain.into());
    }

    if let Some(cert_names) = &signing.additional_cert_names {
        for cert_name in cert_names.as_slice() {
            args.push("--cert".into());
            args.push(cert_name.into());
        }
    }

    if let Some(timestamp) = signing.timestamp {
        if timestamp {
            args.push("--timestamp".into());
        } else {
            args.push("--timestamp=none".into());
        }
    }

    Ok(())
}

/// Remove a file or directory tree.
fn remove_path(path: &Path) -> PkgResult<()> {
    let metadata = fs::symlink_metadata(path)?;

    if metadata.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::build_info::{PostinstallAction, StringOrVec},
        std::path::Path,
    };

    fn args_as_strings(args: &[OsString]) -> Vec<String> {
        args.iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn stub_package_info_reflects_settings() {
        let mut info = BuildInfo::default_for_project(Path::new("/projects/app"));
        info.postinstall_action = PostinstallAction::Restart;
        info.preserve_xattr = true;

        assert_eq!(
            stub_package_info_xml(&info),
            "<?xml version=\"1.0\" encoding=\"utf-8\" standalone=\"no\"?>\
             <pkg-info postinstall-action=\"restart\" preserve-xattr=\"true\"/>"
        );
    }

    #[test]
    fn signing_args_require_identity() {
        let mut args = Vec::new();
        let err = add_signing_args(&mut args, &SigningInfo::default()).unwrap_err();
        assert!(matches!(err, PkgProjectError::SigningMissingIdentity));
    }

    #[test]
    fn signing_args_cover_all_settings() -> PkgResult<()> {
        let signing = SigningInfo {
            identity: Some("Developer ID Installer: Example".to_string()),
            keychain: Some("/Library/Keychains/build.keychain".to_string()),
            additional_cert_names: Some(StringOrVec::Vec(vec![
                "Intermediate CA".to_string(),
                "Root CA".to_string(),
            ])),
            timestamp: Some(false),
            ..Default::default()
        };

        let mut args = Vec::new();
        add_signing_args(&mut args, &signing)?;

        assert_eq!(
            args_as_strings(&args),
            vec![
                "--sign",
                "Developer ID Installer: Example",
                "--keychain",
                "/Library/Keychains/build.keychain",
                "--cert",
                "Intermediate CA",
                "--cert",
                "Root CA",
                "--timestamp=none",
            ]
        );

        Ok(())
    }

    #[test]
    fn suppress_relocation_flips_relocatable_bundles() -> PkgResult<()> {
        let mut dict = plist::Dictionary::new();
        dict.insert("BundleIsRelocatable".to_string(), plist::Value::from(true));
        dict.insert(
            "RootRelativeBundlePath".to_string(),
            plist::Value::from("Applications/Example.app"),
        );

        let mut other = plist::Dictionary::new();
        other.insert("BundleIsRelocatable".to_string(), plist::Value::from(false));

        let mut value = plist::Value::Array(vec![
            plist::Value::Dictionary(dict),
            plist::Value::Dictionary(other),
        ]);

        assert_eq!(suppress_relocation(&mut value)?, 1);

        for bundle in value.as_array().unwrap() {
            assert_eq!(
                bundle
                    .as_dictionary()
                    .unwrap()
                    .get("BundleIsRelocatable")
                    .and_then(|v| v.as_boolean()),
                Some(false)
            );
        }

        Ok(())
    }

    #[test]
    fn suppress_relocation_rejects_non_array_plist() {
        let mut value = plist::Value::Dictionary(plist::Dictionary::new());

        let err = suppress_relocation(&mut value).unwrap_err();
        assert!(matches!(err, PkgProjectError::ComponentPlistStructure(_)));
    }
}
