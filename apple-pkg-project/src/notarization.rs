// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Notarizing built packages with Apple's notary service.
//!
//! Upload and status polling go through `xcrun altool` with XML output.
//! Waiting for notarization is bounded; hitting the timeout is not fatal
//! since the package can be stapled manually once the service catches up.

use {
    crate::{
        build_info::NotarizationInfo,
        error::{PkgProjectError, PkgResult},
        process::{self, XCRUN},
    },
    log::{error, info, warn},
    std::{ffi::OsString, io::Cursor, path::Path, thread::sleep, time::Duration},
};

/// How long to wait for notarization to complete, in seconds.
pub const DEFAULT_STAPLE_TIMEOUT: u64 = 300;

/// Base polling interval, in seconds. The interval grows by this amount
/// after every poll.
pub const STAPLE_SLEEP: u64 = 5;

/// Outcome of a notarization status poll.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NotarizationState {
    pub status: String,
    pub code: Option<i64>,
    pub message: String,
    pub log_url: String,
}

impl NotarizationState {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    /// The service reports transient conditions as `in progress` or an
    /// absent record; both mean "poll again".
    pub fn is_in_progress(&self) -> bool {
        self.status == "in progress" || self.status == "Unknown"
    }
}

/// Entity for performing notarization operations against a package.
#[derive(Debug)]
pub struct Notarizer<'a> {
    info: &'a NotarizationInfo,
    primary_bundle_id: String,
}

impl<'a> Notarizer<'a> {
    /// Construct a notarizer from build settings.
    ///
    /// Settings must carry a username and either a password or an API
    /// key + issuer pair.
    pub fn new(info: &'a NotarizationInfo, package_identifier: &str) -> PkgResult<Self> {
        if info.username.is_none() {
            return Err(PkgProjectError::NotarizationMissingUsername);
        }

        if info.password.is_none() && (info.api_key.is_none() || info.api_issuer.is_none()) {
            return Err(PkgProjectError::NotarizationMissingCredentials);
        }

        Ok(Self {
            primary_bundle_id: primary_bundle_id(info, package_identifier),
            info,
        })
    }

    fn username(&self) -> &str {
        // Presence verified in the constructor.
        self.info.username.as_deref().unwrap_or_default()
    }

    fn auth_args(&self) -> Vec<OsString> {
        if let Some(password) = &self.info.password {
            vec!["--password".into(), password.into()]
        } else {
            vec![
                "--apiKey".into(),
                self.info.api_key.as_deref().unwrap_or_default().into(),
                "--apiIssuer".into(),
                self.info.api_issuer.as_deref().unwrap_or_default().into(),
            ]
        }
    }

    /// Upload a package to the notary service.
    ///
    /// Returns the request UUID for status polling. Does not wait for
    /// the service to process the upload.
    pub fn upload(&self, pkg_path: &Path) -> PkgResult<String> {
        info!("uploading package to Apple notary service");

        let mut args: Vec<OsString> = vec![
            "altool".into(),
            "--notarize-app".into(),
            "--primary-bundle-id".into(),
            self.primary_bundle_id.clone().into(),
            "--username".into(),
            self.username().into(),
            "--output-format".into(),
            "xml".into(),
            "--file".into(),
            pkg_path.into(),
        ];
        if let Some(asc_provider) = &self.info.asc_provider {
            args.push("--asc-provider".into());
            args.push(asc_provider.into());
        }
        args.extend(self.auth_args());

        let output = process::run_tool_capture(XCRUN, args)?;
        let value = parse_altool_output(&output.stdout)?;

        if !output.status.success() {
            for message in product_error_messages(&value) {
                error!("altool: FAILURE {}", message);
            }

            return Err(PkgProjectError::NotarizationFailed(
                "upload rejected by notary service".to_string(),
            ));
        }

        let request_uuid = upload_request_uuid(&value).ok_or_else(|| {
            PkgProjectError::NotaryUnexpectedOutput(
                "upload response lacks a RequestUUID".to_string(),
            )
        })?;

        info!("altool: RequestUUID {}", request_uuid);
        if let Some(message) = success_message(&value) {
            info!("altool: SUCCESS {}", message);
        }

        Ok(request_uuid)
    }

    /// Poll the notary service for the state of a request.
    pub fn fetch_state(&self, request_uuid: &str) -> PkgResult<NotarizationState> {
        let mut args: Vec<OsString> = vec![
            "altool".into(),
            "--notarization-info".into(),
            request_uuid.into(),
            "--username".into(),
            self.username().into(),
            "--output-format".into(),
            "xml".into(),
        ];
        args.extend(self.auth_args());

        let output = process::run_tool_capture(XCRUN, args)?;
        let value = parse_altool_output(&output.stdout)?;

        if !output.status.success() {
            warn!(
                "altool: {}",
                success_message(&value).unwrap_or_else(|| "unexpected response".to_string())
            );

            return Ok(NotarizationState {
                status: "Unknown".to_string(),
                ..Default::default()
            });
        }

        Ok(state_from_response(&value))
    }

    /// Wait for notarization to complete.
    ///
    /// Polls with a linearly increasing interval until success, failure,
    /// or timeout. Returns whether the package can be stapled; a timeout
    /// yields `Ok(false)` rather than an error.
    pub fn wait(&self, request_uuid: &str) -> PkgResult<bool> {
        info!("getting notarization state");

        let timeout = self.info.staple_timeout.unwrap_or(DEFAULT_STAPLE_TIMEOUT);
        let mut waited = 0;
        let mut sleep_time = STAPLE_SLEEP;

        while waited < timeout {
            sleep(Duration::from_secs(sleep_time));
            waited += sleep_time;
            sleep_time += STAPLE_SLEEP;

            let state = self.fetch_state(request_uuid)?;

            if state.is_success() {
                info!("notarization successful. {}", state.message);
                return Ok(true);
            } else if state.is_in_progress() {
                info!(
                    "notarization state: {}; trying again in {} seconds",
                    state.status, sleep_time
                );
            } else {
                error!(
                    "notarization unsuccessful: status: {}; status code: {:?}; \
                     status message: {}; log: {}",
                    state.status, state.code, state.message, state.log_url
                );

                return Err(PkgProjectError::NotarizationFailed(state.status));
            }
        }

        warn!(
            "timeout exceeded when waiting for notarization to complete; \
             you can manually staple the package later if notarization succeeds"
        );

        Ok(false)
    }
}

/// The bundle id reported to the notary service.
///
/// Settings can override the package identifier. The service rejects
/// underscores, so they map to hyphens.
fn primary_bundle_id(info: &NotarizationInfo, package_identifier: &str) -> String {
    info.primary_bundle_id
        .as_deref()
        .unwrap_or(package_identifier)
        .replace('_', "-")
}

/// Parse `altool --output-format xml` output into a plist value.
///
/// API key authentication prepends a `Generated JWT` line before the
/// XML; it is stripped.
fn parse_altool_output(stdout: &[u8]) -> PkgResult<plist::Value> {
    let text = String::from_utf8_lossy(stdout);

    let payload = if text.starts_with("Generated JWT") {
        match text.split_once('\n') {
            Some((_, rest)) => rest.to_string(),
            None => String::new(),
        }
    } else {
        text.to_string()
    };

    plist::Value::from_reader(Cursor::new(payload.as_bytes()))
        .map_err(|_| PkgProjectError::NotaryUnexpectedOutput(payload))
}

fn success_message(value: &plist::Value) -> Option<String> {
    value
        .as_dictionary()?
        .get("success-message")?
        .as_string()
        .map(|s| s.to_string())
}

fn product_error_messages(value: &plist::Value) -> Vec<String> {
    value
        .as_dictionary()
        .and_then(|dict| dict.get("product-errors"))
        .and_then(|v| v.as_array())
        .map(|errors| {
            errors
                .iter()
                .map(|e| {
                    e.as_dictionary()
                        .and_then(|d| d.get("message"))
                        .and_then(|m| m.as_string())
                        .unwrap_or("UNKNOWN ERROR")
                        .to_string()
                })
                .collect()
        })
        .unwrap_or_default()
}

fn upload_request_uuid(value: &plist::Value) -> Option<String> {
    value
        .as_dictionary()?
        .get("notarization-upload")?
        .as_dictionary()?
        .get("RequestUUID")?
        .as_string()
        .map(|s| s.to_string())
}

fn state_from_response(value: &plist::Value) -> NotarizationState {
    let info = value
        .as_dictionary()
        .and_then(|dict| dict.get("notarization-info"))
        .and_then(|v| v.as_dictionary());

    let info = match info {
        Some(info) => info,
        None => {
            return NotarizationState {
                status: "Unknown".to_string(),
                ..Default::default()
            }
        }
    };

    NotarizationState {
        status: info
            .get("Status")
            .and_then(|v| v.as_string())
            .unwrap_or("Unknown")
            .to_string(),
        code: info.get("Status Code").and_then(|v| v.as_signed_integer()),
        message: info
            .get("Status Message")
            .and_then(|v| v.as_string())
            .unwrap_or_default()
            .to_string(),
        log_url: info
            .get("LogFileURL")
            .and_then(|v| v.as_string())
            .unwrap_or_default()
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPLOAD_RESPONSE: &str = indoc::indoc! {r#"
        <?xml version="1.0" encoding="UTF-8"?>
        <!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
        <plist version="1.0">
        <dict>
            <key>notarization-upload</key>
            <dict>
                <key>RequestUUID</key>
                <string>e3f6c2a1-0000-4c5e-9fb6-2d38e1ad6a41</string>
            </dict>
            <key>success-message</key>
            <string>No errors uploading package.</string>
        </dict>
        </plist>
    "#};

    const INFO_RESPONSE: &str = indoc::indoc! {r#"
        <?xml version="1.0" encoding="UTF-8"?>
        <!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
        <plist version="1.0">
        <dict>
            <key>notarization-info</key>
            <dict>
                <key>Status</key>
                <string>success</string>
                <key>Status Code</key>
                <integer>0</integer>
                <key>Status Message</key>
                <string>Package Approved</string>
                <key>LogFileURL</key>
                <string>https://osxapps-ssl.itunes.apple.com/log.json</string>
            </dict>
        </dict>
        </plist>
    "#};

    fn notarization_info() -> NotarizationInfo {
        NotarizationInfo {
            username: Some("dev@example.com".to_string()),
            password: Some("@keychain:altool".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn constructor_requires_username() {
        let info = NotarizationInfo {
            password: Some("secret".to_string()),
            ..Default::default()
        };

        let err = Notarizer::new(&info, "com.example.pkg").unwrap_err();
        assert!(matches!(err, PkgProjectError::NotarizationMissingUsername));
    }

    #[test]
    fn constructor_requires_credentials() {
        let info = NotarizationInfo {
            username: Some("dev@example.com".to_string()),
            api_key: Some("KEY123".to_string()),
            ..Default::default()
        };

        let err = Notarizer::new(&info, "com.example.pkg").unwrap_err();
        assert!(matches!(
            err,
            PkgProjectError::NotarizationMissingCredentials
        ));
    }

    #[test]
    fn api_key_pair_is_sufficient() -> PkgResult<()> {
        let info = NotarizationInfo {
            username: Some("dev@example.com".to_string()),
            api_key: Some("KEY123".to_string()),
            api_issuer: Some("ISSUER456".to_string()),
            ..Default::default()
        };

        let notarizer = Notarizer::new(&info, "com.example.pkg")?;
        let args: Vec<String> = notarizer
            .auth_args()
            .iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert_eq!(args, vec!["--apiKey", "KEY123", "--apiIssuer", "ISSUER456"]);

        Ok(())
    }

    #[test]
    fn bundle_id_replaces_underscores() {
        let info = notarization_info();
        assert_eq!(
            primary_bundle_id(&info, "com.example.my_tool"),
            "com.example.my-tool"
        );

        let info = NotarizationInfo {
            primary_bundle_id: Some("org.example.custom_id".to_string()),
            ..notarization_info()
        };
        assert_eq!(
            primary_bundle_id(&info, "com.example.my_tool"),
            "org.example.custom-id"
        );
    }

    #[test]
    fn parses_upload_response() -> PkgResult<()> {
        let value = parse_altool_output(UPLOAD_RESPONSE.as_bytes())?;

        assert_eq!(
            upload_request_uuid(&value).as_deref(),
            Some("e3f6c2a1-0000-4c5e-9fb6-2d38e1ad6a41")
        );
        assert_eq!(
            success_message(&value).as_deref(),
            Some("No errors uploading package.")
        );

        Ok(())
    }

    #[test]
    fn strips_generated_jwt_preamble() -> PkgResult<()> {
        let with_jwt = format!("Generated JWT: abc.def.ghi\n{}", UPLOAD_RESPONSE);

        let value = parse_altool_output(with_jwt.as_bytes())?;
        assert!(upload_request_uuid(&value).is_some());

        Ok(())
    }

    #[test]
    fn non_plist_output_is_an_error() {
        let err = parse_altool_output(b"some random failure text").unwrap_err();
        assert!(matches!(err, PkgProjectError::NotaryUnexpectedOutput(_)));
    }

    #[test]
    fn parses_notarization_state() -> PkgResult<()> {
        let value = parse_altool_output(INFO_RESPONSE.as_bytes())?;
        let state = state_from_response(&value);

        assert!(state.is_success());
        assert_eq!(state.code, Some(0));
        assert_eq!(state.message, "Package Approved");
        assert!(state.log_url.starts_with("https://"));

        Ok(())
    }

    #[test]
    fn missing_notarization_record_is_in_progress() -> PkgResult<()> {
        let value = parse_altool_output(UPLOAD_RESPONSE.as_bytes())?;
        let state = state_from_response(&value);

        assert_eq!(state.status, "Unknown");
        assert!(state.is_in_progress());

        Ok(())
    }
}
