//! Profile configuration store.
//!
//! Each profile is one JSON file at
//! `<config_dir>/benchling-webhook/<profile>/config.json`. The setup wizard
//! writes more fields than this crate reads; unknown fields are carried
//! through a load/save cycle untouched.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::arn::Arn;
use crate::error::{AppError, Result};

pub const DEFAULT_PROFILE: &str = "default";
pub const DEFAULT_STACK_NAME: &str = "BenchlingWebhookStack";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    /// The webhook runs inside the Quilt stack and is toggled by its
    /// `BenchlingWebhook` parameter.
    Integrated,
    /// The webhook has its own CDK stack.
    #[default]
    Standalone,
}

impl DeploymentMode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Integrated => "integrated",
            Self::Standalone => "standalone",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileConfig {
    #[serde(default)]
    pub deployment_mode: DeploymentMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quilt_stack_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aws_profile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub benchling_secret_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_url: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ProfileConfig {
    /// Stack the status and deploy logic should look at: the Quilt stack in
    /// integrated mode, the webhook's own stack otherwise.
    pub fn target_stack(&self) -> Result<String> {
        match self.deployment_mode {
            DeploymentMode::Integrated => self.quilt_stack_arn.clone().ok_or_else(|| {
                AppError::Profile("integrated mode requires quiltStackArn".to_string())
            }),
            DeploymentMode::Standalone => Ok(self
                .stack_name
                .clone()
                .unwrap_or_else(|| DEFAULT_STACK_NAME.to_string())),
        }
    }

    /// `--region` flag, then the stack ARN's region, then the profile, then
    /// `fallback` (environment / aws configure).
    pub fn resolve_region(&self, flag: Option<&str>, fallback: impl FnOnce() -> String) -> String {
        if let Some(r) = flag.filter(|r| !r.is_empty()) {
            return r.to_string();
        }
        let from_arn = self
            .target_stack()
            .ok()
            .and_then(|s| Arn::parse(&s).ok())
            .map(|a| a.region)
            .filter(|r| !r.is_empty());
        from_arn
            .or_else(|| self.region.clone().filter(|r| !r.is_empty()))
            .unwrap_or_else(fallback)
    }

    /// Set one field by its JSON key.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim().to_string();
        let opt = |v: String| if v.is_empty() { None } else { Some(v) };
        match key {
            "deploymentMode" => {
                self.deployment_mode = match value.as_str() {
                    "integrated" => DeploymentMode::Integrated,
                    "standalone" => DeploymentMode::Standalone,
                    other => {
                        return Err(AppError::Profile(format!(
                            "deploymentMode must be integrated or standalone, got '{}'",
                            other
                        )))
                    }
                }
            }
            "region"             => self.region = opt(value),
            "stackName"          => self.stack_name = opt(value),
            "quiltStackArn"      => {
                if !value.is_empty() {
                    Arn::parse(&value)?;
                }
                self.quilt_stack_arn = opt(value)
            }
            "awsProfile"         => self.aws_profile = opt(value),
            "benchlingSecretArn" => self.benchling_secret_arn = opt(value),
            "imageTag"           => self.image_tag = opt(value),
            "catalogUrl"         => self.catalog_url = opt(value),
            other => return Err(AppError::Profile(format!("unknown config key '{}'", other))),
        }
        Ok(())
    }
}

/// Directory of profiles.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    base: PathBuf,
}

impl ProfileStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// `<config_dir>/benchling-webhook`, falling back to `~/.config`.
    pub fn default_location() -> Self {
        let base = dirs::config_dir().unwrap_or_else(|| {
            PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/root".into())).join(".config")
        });
        Self::new(base.join("benchling-webhook"))
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn path(&self, profile: &str) -> PathBuf {
        self.base.join(profile).join(CONFIG_FILE)
    }

    pub fn exists(&self, profile: &str) -> bool {
        self.path(profile).exists()
    }

    pub fn load(&self, profile: &str) -> Result<ProfileConfig> {
        let path = self.path(profile);
        if !path.exists() {
            return Err(AppError::Profile(format!(
                "profile '{}' not found at {}; run setup first",
                profile,
                path.display()
            )));
        }
        let content = std::fs::read_to_string(&path)?;
        serde_json::from_str(&content)
            .map_err(|e| AppError::Profile(format!("bad {}: {}", path.display(), e)))
    }

    pub fn save(&self, profile: &str, config: &ProfileConfig) -> Result<()> {
        let path = self.path(profile);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(config)?;
        std::fs::write(&path, json)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    /// Profile names that have a config file, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.base.exists() {
            return Ok(vec![]);
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.base)? {
            let entry = entry?;
            if entry.path().join(CONFIG_FILE).exists() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUILT_ARN: &str = "arn:aws:cloudformation:eu-central-1:123456789012:stack/quilt-prod/0f1e2d3c";

    #[test]
    fn standalone_defaults_to_webhook_stack() {
        let cfg = ProfileConfig::default();
        assert_eq!(cfg.deployment_mode, DeploymentMode::Standalone);
        assert_eq!(cfg.target_stack().unwrap(), DEFAULT_STACK_NAME);
    }

    #[test]
    fn integrated_targets_quilt_stack() {
        let mut cfg = ProfileConfig::default();
        cfg.set("deploymentMode", "integrated").unwrap();
        assert!(cfg.target_stack().is_err());
        cfg.set("quiltStackArn", QUILT_ARN).unwrap();
        assert_eq!(cfg.target_stack().unwrap(), QUILT_ARN);
    }

    #[test]
    fn region_precedence() {
        let mut cfg = ProfileConfig { region: Some("us-west-2".into()), ..Default::default() };
        assert_eq!(cfg.resolve_region(Some("ap-south-1"), || "x".into()), "ap-south-1");
        assert_eq!(cfg.resolve_region(None, || "x".into()), "us-west-2");

        cfg.deployment_mode = DeploymentMode::Integrated;
        cfg.quilt_stack_arn = Some(QUILT_ARN.into());
        assert_eq!(cfg.resolve_region(None, || "x".into()), "eu-central-1");

        let empty = ProfileConfig::default();
        assert_eq!(empty.resolve_region(None, || "us-east-1".into()), "us-east-1");
    }

    #[test]
    fn set_rejects_bad_values() {
        let mut cfg = ProfileConfig::default();
        assert!(cfg.set("deploymentMode", "hybrid").is_err());
        assert!(cfg.set("quiltStackArn", "quilt-prod").is_err());
        assert!(cfg.set("colour", "blue").is_err());
        cfg.set("imageTag", "0.7.3").unwrap();
        assert_eq!(cfg.image_tag.as_deref(), Some("0.7.3"));
        cfg.set("imageTag", "").unwrap();
        assert!(cfg.image_tag.is_none());
    }

    #[test]
    fn save_load_keeps_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path());
        let path = store.path("dev");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            r#"{"deploymentMode":"standalone","stackName":"bw-dev","benchling":{"tenant":"acme"}}"#,
        )
        .unwrap();

        let mut cfg = store.load("dev").unwrap();
        assert_eq!(cfg.stack_name.as_deref(), Some("bw-dev"));
        cfg.set("region", "us-east-2").unwrap();
        store.save("dev", &cfg).unwrap();

        let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["benchling"]["tenant"], "acme");
        assert_eq!(raw["region"], "us-east-2");
    }

    #[test]
    fn missing_profile_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path());
        assert!(matches!(store.load("nope"), Err(AppError::Profile(_))));
    }

    #[test]
    fn lists_profiles_with_config() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path());
        store.save("staging", &ProfileConfig::default()).unwrap();
        store.save("default", &ProfileConfig::default()).unwrap();
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();
        assert_eq!(store.list().unwrap(), vec!["default", "staging"]);
        assert!(store.exists("staging"));
    }
}
