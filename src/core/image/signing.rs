//! Secure-boot signing hook
//!
//! Signing needs a known device and a policy file. Both are resolved before
//! any tool runs so an unknown name fails with the missing item spelled out.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BuildError, ImageError};
use crate::infra::process;
use crate::infra::toolchain::ToolCommand;

/// Devices with a secure-boot flow, mapped to their signing family
pub const KNOWN_DEVICES: &[(&str, &str)] = &[
    ("CY8C6247BZI-D54", "psoc6_01"),
    ("CY8C6347BZI-BLD53", "psoc6_01"),
    ("CYB0644ABZI-S2D44", "psoc6_02"),
    ("CY8C624ABZI-S2D44", "psoc6_02"),
    ("CYS0644ABZI-S2D44", "psoc6_02"),
    ("CY8C6245LQI-S3D72", "psoc6_03"),
    ("CYB06447BZI-BLD53", "psoc6_01"),
];

/// `[image.signing]` section of the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Device part number
    pub device: String,
    /// Policy file, relative to the project directory
    pub policy: PathBuf,
    /// External signing tool; without it the plan is resolved but nothing runs
    #[serde(default)]
    pub tool: Option<String>,
    /// Extra arguments for the tool
    #[serde(default)]
    pub args: Vec<String>,
}

/// A resolved signing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningPlan {
    pub device: String,
    pub family: String,
    pub policy: PathBuf,
    pub tool: Option<String>,
    pub args: Vec<String>,
}

/// Signing family of a device, matched case-insensitively
pub fn family_for(device: &str) -> Option<&'static str> {
    KNOWN_DEVICES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(device))
        .map(|(_, family)| *family)
}

/// Resolve the device and policy named in `config`
pub fn resolve(config: &SigningConfig, project_dir: &Path) -> Result<SigningPlan, ImageError> {
    let family = family_for(&config.device).ok_or_else(|| ImageError::MissingArtifact {
        item: format!("signing device mapping for '{}'", config.device),
    })?;
    let policy = project_dir.join(&config.policy);
    if !policy.is_file() {
        return Err(ImageError::MissingArtifact {
            item: format!("signing policy '{}'", policy.display()),
        });
    }
    Ok(SigningPlan {
        device: config.device.clone(),
        family: family.to_string(),
        policy,
        tool: config.tool.clone(),
        args: config.args.clone(),
    })
}

impl SigningPlan {
    /// Command signing `image` in place, if a tool is configured
    pub fn command(&self, image: &Path) -> Option<ToolCommand> {
        let tool = self.tool.as_ref()?;
        let mut command = vec![
            tool.clone(),
            "--family".to_string(),
            self.family.clone(),
            "--policy".to_string(),
            self.policy.display().to_string(),
            "--image".to_string(),
            image.display().to_string(),
        ];
        command.extend(self.args.iter().cloned());
        Some(command)
    }

    /// Run the signing tool on `image`; returns whether it ran
    pub async fn sign(&self, image: &Path) -> Result<bool, BuildError> {
        let Some(command) = self.command(image) else {
            tracing::info!(
                "No signing tool configured for {} ({}), image left unsigned",
                self.device,
                self.family
            );
            return Ok(false);
        };
        tracing::info!("Sign: {}", image.display());
        let out = process::run(&command, None).await?;
        if !out.success {
            return Err(BuildError::Tool {
                command: out.command.clone(),
                status: out.status(),
                output: out.output,
            });
        }
        Ok(true)
    }
}
