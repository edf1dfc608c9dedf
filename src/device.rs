//! Target devices, login credentials and prompt classification.
//!
//! A [`Device`] is immutable once a batch starts. Credentials may be given
//! per device, in which case they override the batch-level credentials, but
//! only when both user and password are present.

use log::trace;
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::PlinkError;

/// Cisco-style prompt: `hostname#`, `hostname>` or `hostname(config-if)#`.
static PROMPT_PATTERN: Lazy<Regex> =
    Lazy::new(|| match Regex::new(r"^[A-Za-z0-9_-]+(\([^)]+\))?[#>]\s*$") {
        Ok(re) => re,
        Err(err) => panic!("invalid PROMPT_PATTERN regex: {err}"),
    });

/// Login credentials for one device session.
#[derive(Default, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub user: String,
    pub password: String,
    /// Password answered to the `enable` prompt. Never derived from `password`.
    #[serde(default, alias = "enablePassword", skip_serializing_if = "Option::is_none")]
    pub privileged_password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .field(
                "privileged_password",
                &self.privileged_password.as_ref().map(|_| "***"),
            )
            .finish()
    }
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            privileged_password: None,
        }
    }

    /// Sets the privileged-mode (`enable`) password.
    pub fn with_privileged_password(mut self, password: impl Into<String>) -> Self {
        self.privileged_password = Some(password.into());
        self
    }

    /// True when both user and password are non-empty.
    pub fn is_complete(&self) -> bool {
        !self.user.is_empty() && !self.password.is_empty()
    }

    /// Returns the privileged password or a validation error naming the device.
    pub fn require_privileged_password(&self, device: &Device) -> Result<&str, PlinkError> {
        match self.privileged_password.as_deref() {
            Some(pwd) if !pwd.is_empty() => Ok(pwd),
            _ => Err(PlinkError::Validation(format!(
                "enable mode requested but no privileged password for {}",
                device.display_name()
            ))),
        }
    }
}

/// A target network device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Network address, optionally with `:port`.
    #[serde(alias = "ip")]
    pub address: String,
    /// Human readable name, also used as the transcript log key.
    #[serde(default, alias = "hostname")]
    pub display_name: String,
    /// Per-device credentials overriding the batch credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

impl Device {
    /// Creates a device. An empty display name falls back to the address.
    pub fn new(address: impl Into<String>, display_name: impl Into<String>) -> Self {
        let address = address.into();
        let mut display_name = display_name.into();
        if display_name.is_empty() {
            display_name = address.clone();
        }
        Self {
            address,
            display_name,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Display name, or the address when no name was given.
    pub fn display_name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.address
        } else {
            &self.display_name
        }
    }

    /// Resolves the credentials used for this device.
    ///
    /// Device credentials win only when they are complete; otherwise the
    /// batch credentials apply unchanged.
    pub fn effective_credentials<'a>(&'a self, batch: &'a Credentials) -> &'a Credentials {
        match self.credentials.as_ref() {
            Some(own) if own.is_complete() => own,
            _ => batch,
        }
    }
}

/// Checks whether a single line is a device prompt.
///
/// The line is trimmed first; trailing content after `#`/`>` (such as an
/// echoed command) disqualifies it.
pub fn is_prompt(line: &str) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return false;
    }
    PROMPT_PATTERN.is_match(line)
}

/// Returns the last non-empty line of `output` if it is a prompt.
pub fn trailing_prompt(output: &str) -> Option<&str> {
    let last = output
        .split('\n')
        .map(|line| line.trim_end_matches(['\r', '\n', ' ']))
        .rfind(|line| !line.is_empty())?;
    trace!("Checking trailing line for prompt: {:?}", last);
    if is_prompt(last) { Some(last.trim()) } else { None }
}

/// True when the prompt indicates privileged mode (`#`).
pub fn is_privileged_prompt(prompt: &str) -> bool {
    prompt.trim_end().ends_with('#')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_and_mode_prompts_are_classified_as_prompts() {
        assert!(is_prompt("Router1#"));
        assert!(is_prompt("Router1(config)#"));
        assert!(is_prompt("core_sw-02>"));
        assert!(is_prompt("  Router1#  \r"));
    }

    #[test]
    fn prompt_followed_by_command_is_not_a_prompt() {
        assert!(!is_prompt("Router1# show run"));
        assert!(!is_prompt(""));
        assert!(!is_prompt("Building configuration..."));
        assert!(!is_prompt("Router 1#"));
    }

    #[test]
    fn trailing_prompt_skips_blank_tail_lines() {
        let output = "Cisco IOS\r\nRouter1>\r\n\r\n";
        assert_eq!(trailing_prompt(output), Some("Router1>"));
        assert_eq!(trailing_prompt("Password: "), None);
        assert_eq!(trailing_prompt(""), None);
    }

    #[test]
    fn privileged_prompt_ends_with_hash() {
        assert!(is_privileged_prompt("Router1#"));
        assert!(!is_privileged_prompt("Router1>"));
    }

    #[test]
    fn empty_display_name_falls_back_to_address() {
        let device = Device::new("10.0.0.1", "");
        assert_eq!(device.display_name(), "10.0.0.1");
        assert_eq!(device.display_name, "10.0.0.1");
    }

    #[test]
    fn device_credentials_override_only_when_complete() {
        let batch = Credentials::new("admin", "secret");
        let partial = Device::new("10.0.0.1", "r1").with_credentials(Credentials::new("ops", ""));
        assert_eq!(partial.effective_credentials(&batch).user, "admin");

        let full = Device::new("10.0.0.2", "r2").with_credentials(
            Credentials::new("ops", "pw").with_privileged_password("en"),
        );
        let creds = full.effective_credentials(&batch);
        assert_eq!(creds.user, "ops");
        assert_eq!(creds.privileged_password.as_deref(), Some("en"));
    }

    #[test]
    fn privileged_password_is_never_inferred_from_login_password() {
        let creds = Credentials::new("admin", "secret");
        let device = Device::new("10.0.0.1", "r1");
        assert!(matches!(
            creds.require_privileged_password(&device),
            Err(PlinkError::Validation(_))
        ));
    }

    #[test]
    fn debug_output_hides_passwords() {
        let creds = Credentials::new("admin", "secret").with_privileged_password("enpw");
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("secret"));
        assert!(!rendered.contains("enpw"));
    }

    #[test]
    fn device_deserializes_from_legacy_field_names() {
        let device: Device =
            serde_json::from_str(r#"{"ip":"10.1.1.1","hostname":"edge1"}"#).expect("parse");
        assert_eq!(device.address, "10.1.1.1");
        assert_eq!(device.display_name(), "edge1");
        assert!(device.credentials.is_none());
    }
}
