// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Build settings resolution.
//!
//! A project carries its build settings in a `build-info` file expressible
//! as XML plist, JSON, or YAML. Settings resolution starts from defaults
//! derived from the project directory name, overlays the settings file if
//! one exists, validates closed-set keys, and finally expands the
//! `${version}` placeholder in the package name.

use {
    crate::error::{PkgProjectError, PkgResult},
    serde::{Deserialize, Deserializer, Serialize},
    std::{
        collections::BTreeMap,
        fmt::{Display, Formatter},
        fs::File,
        io::{BufReader, BufWriter},
        path::{Path, PathBuf},
        str::FromStr,
    },
};

/// Base name of the build settings file, without extension.
pub const BUILD_INFO_BASENAME: &str = "build-info";

/// Serialization format of a build settings file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildInfoFormat {
    Plist,
    Json,
    Yaml,
}

impl BuildInfoFormat {
    /// File extensions recognized for this format, in probe order.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Self::Plist => &["plist"],
            Self::Json => &["json"],
            Self::Yaml => &["yaml", "yml"],
        }
    }

    /// The extension used when writing a new file of this format.
    pub fn primary_extension(&self) -> &'static str {
        self.extensions()[0]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Plist => "plist",
            Self::Json => "JSON",
            Self::Yaml => "YAML",
        }
    }

    /// All formats, in the order files are probed for.
    pub fn all() -> &'static [Self] {
        &[Self::Plist, Self::Json, Self::Yaml]
    }

    /// Deserialize a build settings file of this format.
    pub fn load(&self, path: &Path) -> PkgResult<BuildInfoFile> {
        let map_invalid = |message: String| PkgProjectError::BuildInfoInvalid {
            path: path.to_path_buf(),
            format: self.name(),
            message,
        };

        match self {
            Self::Plist => {
                plist::from_file(path).map_err(|e| map_invalid(format!("{}", e)))
            }
            Self::Json => {
                let reader = BufReader::new(File::open(path)?);
                serde_json::from_reader(reader).map_err(|e| map_invalid(format!("{}", e)))
            }
            Self::Yaml => {
                let reader = BufReader::new(File::open(path)?);
                serde_yaml::from_reader(reader).map_err(|e| map_invalid(format!("{}", e)))
            }
        }
    }

    /// Serialize a build settings file of this format.
    pub fn save(&self, path: &Path, file: &BuildInfoFile) -> PkgResult<()> {
        match self {
            Self::Plist => {
                plist::to_file_xml(path, file)?;
            }
            Self::Json => {
                let writer = BufWriter::new(File::create(path)?);
                serde_json::to_writer_pretty(writer, file)?;
            }
            Self::Yaml => {
                let writer = BufWriter::new(File::create(path)?);
                serde_yaml::to_writer(writer, file)?;
            }
        }

        Ok(())
    }
}

/// A value that is either a single string or a list of strings.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum StringOrVec {
    String(String),
    Vec(Vec<String>),
}

impl StringOrVec {
    pub fn as_slice(&self) -> Vec<&str> {
        match self {
            Self::String(s) => vec![s.as_str()],
            Self::Vec(v) => v.iter().map(|s| s.as_str()).collect(),
        }
    }
}

/// Versions are frequently written unquoted and parse as numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum Stringable {
    String(String),
    Integer(i64),
    Float(f64),
}

fn deserialize_stringable<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Stringable>::deserialize(deserializer)?.map(|v| match v {
        Stringable::String(s) => s,
        Stringable::Integer(i) => format!("{}", i),
        Stringable::Float(f) => format!("{}", f),
    }))
}

/// Code signing settings passed through to `pkgbuild` / `productbuild`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SigningInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keychain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_cert_names: Option<StringOrVec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<bool>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Notary service settings.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct NotarizationInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_issuer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asc_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_bundle_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staple_timeout: Option<u64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// On-disk representation of a build settings file.
///
/// All fields are optional. Unknown keys are carried in `extra` and
/// preserved across load/save round trips.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct BuildInfoFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_stringable",
        skip_serializing_if = "Option::is_none"
    )]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ownership: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postinstall_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preserve_xattr: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppress_bundle_relocation: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distribution_style: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_info: Option<SigningInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notarization_info: Option<NotarizationInfo>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// How `pkgbuild` should assign ownership of payload files.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ownership {
    Recommended,
    Preserve,
    PreserveOther,
}

impl Ownership {
    pub const LEGAL_VALUES: &'static [&'static str] =
        &["recommended", "preserve", "preserve-other"];
}

impl FromStr for Ownership {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recommended" => Ok(Self::Recommended),
            "preserve" => Ok(Self::Preserve),
            "preserve-other" => Ok(Self::PreserveOther),
            _ => Err(()),
        }
    }
}

impl Display for Ownership {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Recommended => "recommended",
            Self::Preserve => "preserve",
            Self::PreserveOther => "preserve-other",
        })
    }
}

/// User-visible action after package installation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PostinstallAction {
    None,
    Logout,
    Restart,
}

impl PostinstallAction {
    pub const LEGAL_VALUES: &'static [&'static str] = &["none", "logout", "restart"];
}

impl FromStr for PostinstallAction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "logout" => Ok(Self::Logout),
            "restart" => Ok(Self::Restart),
            _ => Err(()),
        }
    }
}

impl Display for PostinstallAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Logout => "logout",
            Self::Restart => "restart",
        })
    }
}

/// Fully resolved build settings.
#[derive(Clone, Debug)]
pub struct BuildInfo {
    pub name: String,
    pub identifier: String,
    pub version: String,
    pub ownership: Ownership,
    pub install_location: String,
    pub postinstall_action: PostinstallAction,
    pub preserve_xattr: bool,
    pub suppress_bundle_relocation: bool,
    pub distribution_style: bool,
    pub signing_info: Option<SigningInfo>,
    pub notarization_info: Option<NotarizationInfo>,
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl BuildInfo {
    /// Default settings for a project directory.
    ///
    /// The package name and identifier derive from the directory's base
    /// name with spaces removed.
    pub fn default_for_project(project_dir: &Path) -> Self {
        let basename = project_dir
            .file_name()
            .map(|n| n.to_string_lossy().replace(' ', ""))
            .unwrap_or_default();

        Self {
            name: format!("{}-${{version}}.pkg", basename),
            identifier: format!("com.github.munki.pkg.{}", basename),
            version: "1.0".to_string(),
            ownership: Ownership::Recommended,
            install_location: "/".to_string(),
            postinstall_action: PostinstallAction::None,
            preserve_xattr: false,
            suppress_bundle_relocation: true,
            distribution_style: false,
            signing_info: None,
            notarization_info: None,
            extra: BTreeMap::new(),
        }
    }

    /// Overlay settings from a file, validating closed-set keys.
    pub fn apply_file(&mut self, file: BuildInfoFile, path: &Path) -> PkgResult<()> {
        let illegal = |key, value: &str, legal| PkgProjectError::IllegalBuildInfoValue {
            path: path.to_path_buf(),
            key,
            value: value.to_string(),
            legal,
        };

        if let Some(v) = file.name {
            self.name = v;
        }
        if let Some(v) = file.identifier {
            self.identifier = v;
        }
        if let Some(v) = file.version {
            self.version = v;
        }
        if let Some(v) = file.ownership {
            self.ownership = Ownership::from_str(&v)
                .map_err(|_| illegal("ownership", &v, Ownership::LEGAL_VALUES))?;
        }
        if let Some(v) = file.install_location {
            self.install_location = v;
        }
        if let Some(v) = file.postinstall_action {
            self.postinstall_action = PostinstallAction::from_str(&v).map_err(|_| {
                illegal("postinstall_action", &v, PostinstallAction::LEGAL_VALUES)
            })?;
        }
        if let Some(v) = file.preserve_xattr {
            self.preserve_xattr = v;
        }
        if let Some(v) = file.suppress_bundle_relocation {
            self.suppress_bundle_relocation = v;
        }
        if let Some(v) = file.distribution_style {
            self.distribution_style = v;
        }
        if file.signing_info.is_some() {
            self.signing_info = file.signing_info;
        }
        if file.notarization_info.is_some() {
            self.notarization_info = file.notarization_info;
        }
        self.extra.extend(file.extra);

        Ok(())
    }

    /// Expand the `${version}` placeholder in the package name.
    ///
    /// Only the first occurrence is substituted.
    pub fn finalize(&mut self) {
        if self.name.contains("${version}") {
            self.name = self.name.replacen("${version}", &self.version, 1);
        }
    }

    /// The product identifier for distribution packages.
    ///
    /// A `product id` key in the settings file overrides the package
    /// identifier.
    pub fn product_id(&self) -> &str {
        self.extra
            .get("product id")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.identifier)
    }

    /// Convert to the on-disk representation.
    pub fn to_file(&self) -> BuildInfoFile {
        BuildInfoFile {
            name: Some(self.name.clone()),
            identifier: Some(self.identifier.clone()),
            version: Some(self.version.clone()),
            ownership: Some(self.ownership.to_string()),
            install_location: Some(self.install_location.clone()),
            postinstall_action: Some(self.postinstall_action.to_string()),
            preserve_xattr: Some(self.preserve_xattr),
            suppress_bundle_relocation: Some(self.suppress_bundle_relocation),
            distribution_style: Some(self.distribution_style),
            signing_info: self.signing_info.clone(),
            notarization_info: self.notarization_info.clone(),
            extra: self.extra.clone(),
        }
    }
}

/// Locate the build settings file in a project directory.
///
/// All recognized extensions are probed; finding more than one settings
/// file is fatal, since silently preferring one would mask the other.
pub fn find_build_info_file(
    project_dir: &Path,
) -> PkgResult<Option<(PathBuf, BuildInfoFormat)>> {
    let mut found = None;

    for format in BuildInfoFormat::all() {
        for ext in format.extensions() {
            let candidate = project_dir.join(format!("{}.{}", BUILD_INFO_BASENAME, ext));

            if candidate.exists() {
                if found.is_some() {
                    return Err(PkgProjectError::MultipleBuildInfoFiles(
                        project_dir.to_path_buf(),
                    ));
                }

                found = Some((candidate, *format));
            }
        }
    }

    Ok(found)
}

/// Resolve build settings for a project directory.
///
/// `format` restricts probing to a single format when set. A missing
/// settings file is fatal; use [resolve_build_info_or_default] where
/// defaults are an acceptable fallback.
pub fn resolve_build_info(
    project_dir: &Path,
    format: Option<BuildInfoFormat>,
) -> PkgResult<BuildInfo> {
    let mut info = BuildInfo::default_for_project(project_dir);

    let located = match format {
        Some(format) => {
            let candidate = project_dir.join(format!(
                "{}.{}",
                BUILD_INFO_BASENAME,
                format.primary_extension()
            ));

            candidate.exists().then(|| (candidate, format))
        }
        None => find_build_info_file(project_dir)?,
    };

    match located {
        Some((path, format)) => {
            let file = format.load(&path)?;
            info.apply_file(file, &path)?;
        }
        None => {
            return Err(PkgProjectError::NoBuildInfoFile(project_dir.to_path_buf()));
        }
    }

    info.finalize();

    Ok(info)
}

/// Like [resolve_build_info], but a missing settings file resolves to
/// defaults instead of failing. Parse and validation errors remain fatal.
pub fn resolve_build_info_or_default(
    project_dir: &Path,
    format: Option<BuildInfoFormat>,
) -> PkgResult<BuildInfo> {
    match resolve_build_info(project_dir, format) {
        Err(PkgProjectError::NoBuildInfoFile(_)) => {
            let mut info = BuildInfo::default_for_project(project_dir);
            info.finalize();

            Ok(info)
        }
        res => res,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_derive_from_directory_name() {
        let info = BuildInfo::default_for_project(Path::new("/projects/My App"));

        assert_eq!(info.name, "MyApp-${version}.pkg");
        assert_eq!(info.identifier, "com.github.munki.pkg.MyApp");
        assert_eq!(info.version, "1.0");
        assert_eq!(info.ownership, Ownership::Recommended);
        assert_eq!(info.install_location, "/");
        assert_eq!(info.postinstall_action, PostinstallAction::None);
        assert!(!info.preserve_xattr);
        assert!(info.suppress_bundle_relocation);
        assert!(!info.distribution_style);
    }

    #[test]
    fn name_templating_substitutes_version_once() {
        let mut info = BuildInfo::default_for_project(Path::new("/projects/app"));
        info.name = "app-${version}-${version}.pkg".to_string();
        info.version = "2.5".to_string();
        info.finalize();

        assert_eq!(info.name, "app-2.5-${version}.pkg");
    }

    #[test]
    fn resolves_from_json_file() -> PkgResult<()> {
        let temp_dir = tempfile::tempdir()?;
        std::fs::write(
            temp_dir.path().join("build-info.json"),
            r#"{"name": "custom-${version}.pkg", "version": 2.5, "distribution_style": true}"#,
        )?;

        let info = resolve_build_info(temp_dir.path(), None)?;
        assert_eq!(info.name, "custom-2.5.pkg");
        assert_eq!(info.version, "2.5");
        assert!(info.distribution_style);

        Ok(())
    }

    #[test]
    fn resolves_from_yaml_file() -> PkgResult<()> {
        let temp_dir = tempfile::tempdir()?;
        std::fs::write(
            temp_dir.path().join("build-info.yaml"),
            "identifier: org.example.tool\nversion: 3\nownership: preserve\n",
        )?;

        let info = resolve_build_info(temp_dir.path(), None)?;
        assert_eq!(info.identifier, "org.example.tool");
        assert_eq!(info.version, "3");
        assert_eq!(info.ownership, Ownership::Preserve);

        Ok(())
    }

    #[test]
    fn resolves_from_plist_file() -> PkgResult<()> {
        let temp_dir = tempfile::tempdir()?;
        std::fs::write(
            temp_dir.path().join("build-info.plist"),
            indoc::indoc! {r#"
                <?xml version="1.0" encoding="UTF-8"?>
                <!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
                <plist version="1.0">
                <dict>
                    <key>name</key>
                    <string>tool.pkg</string>
                    <key>postinstall_action</key>
                    <string>restart</string>
                </dict>
                </plist>
            "#},
        )?;

        let info = resolve_build_info(temp_dir.path(), None)?;
        assert_eq!(info.name, "tool.pkg");
        assert_eq!(info.postinstall_action, PostinstallAction::Restart);

        Ok(())
    }

    #[test]
    fn multiple_settings_files_are_fatal() -> std::io::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        std::fs::write(temp_dir.path().join("build-info.json"), "{}")?;
        std::fs::write(temp_dir.path().join("build-info.yaml"), "name: x.pkg\n")?;

        let err = resolve_build_info(temp_dir.path(), None).unwrap_err();
        assert!(matches!(err, PkgProjectError::MultipleBuildInfoFiles(_)));

        Ok(())
    }

    #[test]
    fn explicit_format_ignores_other_files() -> PkgResult<()> {
        let temp_dir = tempfile::tempdir()?;
        std::fs::write(
            temp_dir.path().join("build-info.json"),
            r#"{"name": "json.pkg"}"#,
        )?;
        std::fs::write(temp_dir.path().join("build-info.yaml"), "name: yaml.pkg\n")?;

        let info = resolve_build_info(temp_dir.path(), Some(BuildInfoFormat::Yaml))?;
        assert_eq!(info.name, "yaml.pkg");

        Ok(())
    }

    #[test]
    fn illegal_closed_set_value_is_fatal() -> std::io::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        std::fs::write(
            temp_dir.path().join("build-info.json"),
            r#"{"ownership": "everything"}"#,
        )?;

        let err = resolve_build_info(temp_dir.path(), None).unwrap_err();
        match err {
            PkgProjectError::IllegalBuildInfoValue { key, value, legal, .. } => {
                assert_eq!(key, "ownership");
                assert_eq!(value, "everything");
                assert_eq!(legal, Ownership::LEGAL_VALUES);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        Ok(())
    }

    #[test]
    fn malformed_file_is_a_parse_error() -> std::io::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        std::fs::write(temp_dir.path().join("build-info.json"), "{not json")?;

        let err = resolve_build_info(temp_dir.path(), None).unwrap_err();
        assert!(matches!(err, PkgProjectError::BuildInfoInvalid { .. }));

        Ok(())
    }

    #[test]
    fn unknown_keys_pass_through_round_trips() -> PkgResult<()> {
        let temp_dir = tempfile::tempdir()?;
        std::fs::write(
            temp_dir.path().join("build-info.json"),
            r#"{"identifier": "org.example.tool", "product id": "org.example.product"}"#,
        )?;

        let info = resolve_build_info(temp_dir.path(), None)?;
        assert_eq!(info.product_id(), "org.example.product");

        let file = info.to_file();
        assert!(file.extra.contains_key("product id"));

        Ok(())
    }

    #[test]
    fn unknown_nested_keys_survive_round_trips() -> PkgResult<()> {
        let temp_dir = tempfile::tempdir()?;
        std::fs::write(
            temp_dir.path().join("build-info.json"),
            r#"{"signing_info": {"identity": "Dev ID", "custom_flag": "keep-me"},
                "notarization_info": {"username": "dev@example.com",
                                      "password": "secret",
                                      "team_note": "ask infra"}}"#,
        )?;

        let info = resolve_build_info(temp_dir.path(), None)?;
        let file = info.to_file();

        let signing = file.signing_info.as_ref().unwrap();
        assert_eq!(
            signing.extra.get("custom_flag").and_then(|v| v.as_str()),
            Some("keep-me")
        );
        let notarization = file.notarization_info.as_ref().unwrap();
        assert_eq!(
            notarization.extra.get("team_note").and_then(|v| v.as_str()),
            Some("ask infra")
        );

        let serialized = serde_json::to_string(&file)?;
        assert!(serialized.contains("custom_flag"));
        assert!(serialized.contains("team_note"));

        Ok(())
    }

    #[test]
    fn signing_info_cert_names_accept_string_or_list() -> PkgResult<()> {
        let temp_dir = tempfile::tempdir()?;
        std::fs::write(
            temp_dir.path().join("build-info.json"),
            r#"{"signing_info": {"identity": "Dev ID", "additional_cert_names": "Extra CA"}}"#,
        )?;

        let info = resolve_build_info(temp_dir.path(), None)?;
        let signing = info.signing_info.unwrap();
        assert_eq!(
            signing.additional_cert_names.unwrap().as_slice(),
            vec!["Extra CA"]
        );

        Ok(())
    }

    #[test]
    fn missing_settings_file_is_fatal() -> std::io::Result<()> {
        let temp_dir = tempfile::tempdir()?;

        let err = resolve_build_info(temp_dir.path(), None).unwrap_err();
        assert!(matches!(err, PkgProjectError::NoBuildInfoFile(_)));

        Ok(())
    }

    #[test]
    fn default_fallback_resolves_without_settings_file() -> PkgResult<()> {
        let temp_dir = tempfile::tempdir()?;

        let info = resolve_build_info_or_default(temp_dir.path(), None)?;
        assert_eq!(info.version, "1.0");
        assert!(info.name.ends_with("-1.0.pkg"));

        Ok(())
    }
}
