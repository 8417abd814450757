use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::trust::RevocationPolicy;
use crate::webauthn::{UserVerificationRequirement, WebAuthnSettings};

/// Environment variable naming a directory with a higher priority `Settings.toml`
pub const SETTINGS_DIR_ENV: &str = "WEBAUTHN_SETTINGS_DIR";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VerifierSettings {
    pub webauthn: WebAuthnSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl VerifierSettings {
    /// Load settings from configuration files and environment variables, then
    /// initialize logging at the configured level
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Settings file cannot be read or parsed
    /// - The resulting settings are invalid
    /// - Logger initialization fails
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let settings = Self::load_settings()?;
        settings.initialize_logging()?;
        Ok(settings)
    }

    /// Load and validate settings without touching the global logger
    ///
    /// Settings are loaded with the following priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Settings.toml in `WEBAUTHN_SETTINGS_DIR` (if specified and exists)
    /// 3. Settings.toml in current directory (if exists)
    /// 4. Default settings
    ///
    /// # Errors
    ///
    /// Returns an error if a settings file cannot be read or parsed, or if
    /// the resulting settings are invalid
    pub fn load_settings() -> Result<Self, Box<dyn std::error::Error>> {
        let mut settings = Self::load_base_settings()?;
        Self::apply_env_overrides(&mut settings);
        settings.webauthn.validate()?;
        Ok(settings)
    }

    /// Initialize `env_logger`, with `RUST_LOG` taking precedence over the
    /// configured level
    ///
    /// # Errors
    ///
    /// Returns an error if a global logger is already installed
    pub fn initialize_logging(&self) -> Result<(), Box<dyn std::error::Error>> {
        env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(self.logging.level.as_str()),
        )
        .try_init()?;
        Ok(())
    }

    fn load_base_settings() -> Result<Self, Box<dyn std::error::Error>> {
        // 1. Start with default settings
        let mut settings = Self::default();

        // 2. Settings.toml in current directory (lower priority)
        let default_config_path = Path::new("Settings.toml");
        if default_config_path.exists() {
            settings = Self::from_file(default_config_path)?;
            println!(
                "✓ Loaded base settings from {}",
                default_config_path.display()
            );
        }

        // 3. Settings.toml in WEBAUTHN_SETTINGS_DIR replaces it (higher priority)
        if let Ok(settings_dir) = std::env::var(SETTINGS_DIR_ENV) {
            let settings_path = Path::new(&settings_dir).join("Settings.toml");
            if settings_path.exists() {
                settings = Self::from_file(&settings_path)?;
                println!("✓ Overriding settings from {}", settings_path.display());
            } else {
                println!(
                    "ℹ {SETTINGS_DIR_ENV} set but no Settings.toml found at: {}",
                    settings_path.display()
                );
            }
        }

        Ok(settings)
    }

    /// Parse a settings file; missing keys take their defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let toml_content = fs::read_to_string(path)?;
        Ok(basic_toml::from_str(&toml_content)?)
    }

    /// Apply environment variable overrides to settings
    pub fn apply_env_overrides(settings: &mut Self) {
        Self::apply_webauthn_env_overrides(&mut settings.webauthn);
        Self::apply_logging_env_overrides(&mut settings.logging);
    }

    fn apply_webauthn_env_overrides(webauthn: &mut WebAuthnSettings) {
        if let Ok(rp_id) = std::env::var("WEBAUTHN_RP_ID") {
            webauthn.rp_id = rp_id;
        }
        if let Ok(rp_name) = std::env::var("WEBAUTHN_RP_NAME") {
            webauthn.rp_name = rp_name;
        }
        if let Ok(origins) = std::env::var("WEBAUTHN_RP_ORIGINS") {
            webauthn.rp_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(ToString::to_string)
                .collect();
        }
        if let Ok(value) = std::env::var("WEBAUTHN_USER_VERIFICATION") {
            match value.trim().to_ascii_lowercase().as_str() {
                "required" => webauthn.user_verification = UserVerificationRequirement::Required,
                "preferred" => webauthn.user_verification = UserVerificationRequirement::Preferred,
                "discouraged" => {
                    webauthn.user_verification = UserVerificationRequirement::Discouraged;
                }
                _ => eprintln!("⚠️  Ignoring unknown WEBAUTHN_USER_VERIFICATION value: {value}"),
            }
        }
        if let Ok(value) = std::env::var("WEBAUTHN_REVOCATION_POLICY") {
            match value.trim().to_ascii_lowercase().as_str() {
                "fail_closed" => webauthn.revocation.policy = RevocationPolicy::FailClosed,
                "fail_open" => webauthn.revocation.policy = RevocationPolicy::FailOpen,
                _ => eprintln!("⚠️  Ignoring unknown WEBAUTHN_REVOCATION_POLICY value: {value}"),
            }
        }
        Self::apply_bool_env_override(
            "WEBAUTHN_REVOCATION_ENABLED",
            &mut webauthn.revocation.enabled,
        );
        Self::apply_numeric_env_override(
            "WEBAUTHN_CRL_TIMEOUT_SECONDS",
            &mut webauthn.revocation.crl_timeout_seconds,
        );
        Self::apply_numeric_env_override("WEBAUTHN_TIMEOUT_SECONDS", &mut webauthn.timeout_seconds);
        Self::apply_bool_env_override(
            "WEBAUTHN_REQUIRE_METADATA",
            &mut webauthn.metadata.require_metadata_statement,
        );
        Self::apply_bool_env_override(
            "WEBAUTHN_REQUIRE_TRUST_ANCHOR",
            &mut webauthn.require_attestation_trust_anchor,
        );
    }

    /// Helper function to apply numeric environment variable overrides
    fn apply_numeric_env_override(env_var: &str, target: &mut u64) {
        if let Ok(value_str) = std::env::var(env_var) {
            if let Ok(value) = value_str.parse::<u64>() {
                *target = value;
            }
        }
    }

    fn apply_bool_env_override(env_var: &str, target: &mut bool) {
        if let Ok(value_str) = std::env::var(env_var) {
            if let Ok(value) = value_str.parse::<bool>() {
                *target = value;
            }
        }
    }

    /// Apply environment overrides for logging settings
    fn apply_logging_env_overrides(logging_settings: &mut LoggingSettings) {
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            logging_settings.level = log_level;
        }
    }
}
