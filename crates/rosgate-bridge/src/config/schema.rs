use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use rosgate_core::{BridgeError, Result};

use crate::policy::{glob_to_regex, JwtValidator, VerificationPolicy};

/// Configuration block for one WebSocket endpoint (either role).
///
/// Unknown keys are tolerated: the host passes its whole system block through
/// and may carry keys this endpoint does not interpret.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    /// Wire encoding. Only `json` is supported.
    #[serde(default = "default_encoding")]
    pub encoding: String,

    /// Peer host. Client role only.
    #[serde(default)]
    pub host: Option<String>,

    /// Port to listen on (server) or dial (client).
    #[serde(default)]
    pub port: Option<u16>,

    /// `"none"` disables TLS; any other value (or absence) selects TLS.
    #[serde(default)]
    pub security: Option<String>,

    /// TLS certificate path (server: own cert; client: trusted peer cert).
    #[serde(default)]
    pub cert: Option<PathBuf>,

    /// TLS private key path (server role).
    #[serde(default)]
    pub key: Option<PathBuf>,

    /// Certificate/key file format.
    #[serde(default)]
    pub format: CertFormat,

    /// JWT admission policies (server role).
    #[serde(default)]
    pub authentication: Option<AuthConfig>,

    /// JWT offered as the WebSocket subprotocol (client role).
    #[serde(default)]
    pub token: Option<String>,

    /// Directory the configuration file was loaded from, when known.
    /// Relative `cert`/`key` paths resolve against it first.
    #[serde(skip)]
    config_dir: Option<PathBuf>,
}

fn default_encoding() -> String {
    "json".into()
}

impl EndpointConfig {
    pub fn validate(&self) -> Result<()> {
        if self.encoding != "json" {
            return Err(BridgeError::Config(format!(
                "unsupported encoding '{}': only 'json' is available",
                self.encoding
            )));
        }
        Ok(())
    }

    /// The WebSocket port. Logs and errors when absent.
    pub fn parse_port(&self) -> Result<u16> {
        match self.port {
            Some(port) => Ok(port),
            None => {
                tracing::error!("Configuration is missing the required 'port' parameter");
                Err(BridgeError::Config("missing 'port'".into()))
            }
        }
    }

    /// TLS unless `security: none`.
    pub fn use_security(&self) -> bool {
        !matches!(self.security.as_deref(), Some("none"))
    }

    /// Build the JWT validator from the `authentication` block, if present.
    pub fn jwt_validator(&self) -> Option<JwtValidator> {
        self.authentication.as_ref().map(AuthConfig::to_validator)
    }

    /// Record the directory the configuration file was loaded from.
    /// `load_from_file` does this automatically; hosts that hand a parsed
    /// block through can set it themselves.
    pub fn set_config_dir(&mut self, dir: impl Into<PathBuf>) {
        self.config_dir = Some(dir.into());
    }

    pub fn config_dir(&self) -> Option<&Path> {
        self.config_dir.as_deref()
    }

    /// Resolve a possibly-relative certificate/key path.
    ///
    /// Absolute paths are used as given; relative paths are tried against
    /// the directory the configuration was loaded from, then the current
    /// directory, then `$HOME`. On failure every checked path is logged.
    pub fn resolve_config_path(&self, path: &Path) -> Result<PathBuf> {
        if path.is_absolute() {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            tracing::error!("Failed to find the configured file '{}'", path.display());
            return Err(BridgeError::Config(format!(
                "no such file: {}",
                path.display()
            )));
        }

        let mut checked = Vec::new();

        if let Some(dir) = &self.config_dir {
            let relative_to_config = dir.join(path);
            if relative_to_config.exists() {
                return Ok(relative_to_config);
            }
            checked.push(relative_to_config);
        }

        let local = PathBuf::from(path);
        if local.exists() {
            return Ok(local);
        }
        checked.push(local);

        if let Some(home) = env::var_os("HOME") {
            let relative_to_home = PathBuf::from(home).join(path);
            if relative_to_home.exists() {
                return Ok(relative_to_home);
            }
            checked.push(relative_to_home);
        }

        tracing::error!(
            "Failed to find the configured file '{}'. Checked the following paths: {:?}",
            path.display(),
            checked
        );
        Err(BridgeError::Config(format!(
            "no such file: {}",
            path.display()
        )))
    }
}

/// Certificate and key file format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum CertFormat {
    #[default]
    #[serde(rename = "pem")]
    Pem,
    #[serde(rename = "asn.1")]
    Asn1,
}

/// The `authentication` block: one policy, or a `policies` list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AuthConfig {
    Policies { policies: Vec<PolicyConfig> },
    Single(PolicyConfig),
}

impl AuthConfig {
    pub fn to_validator(&self) -> JwtValidator {
        let mut validator = JwtValidator::new();
        match self {
            AuthConfig::Policies { policies } => {
                for p in policies {
                    validator.add_verification_policy(p.to_policy());
                }
            }
            AuthConfig::Single(p) => validator.add_verification_policy(p.to_policy()),
        }
        validator
    }
}

/// One verification policy: the signing secret plus claim rules written as
/// globs (translated to anchored regexes at parse time).
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    pub secret: String,

    /// Payload claim rules: claim name -> glob.
    #[serde(default)]
    pub rules: BTreeMap<String, String>,

    /// Header claim rules: claim name -> glob.
    #[serde(default)]
    pub header_rules: BTreeMap<String, String>,
}

impl PolicyConfig {
    fn to_policy(&self) -> VerificationPolicy {
        let rules = self
            .rules
            .iter()
            .map(|(claim, pattern)| (claim.clone(), glob_to_regex(pattern)))
            .collect();
        let header_rules = self
            .header_rules
            .iter()
            .map(|(claim, pattern)| (claim.clone(), glob_to_regex(pattern)))
            .collect();
        VerificationPolicy::new(rules, header_rules, self.secret.clone())
    }
}

