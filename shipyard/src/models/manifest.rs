//! Deployment manifest committed to the repository root

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};

/// Conventional manifest filenames; the first one present wins
pub const MANIFEST_FILES: &[&str] = &[
    "shipyard.json",
    "shipyard.yaml",
    "shipyard.yml",
    ".shipyard.json",
];

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub deploy: DeploySection,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploySection {
    #[serde(default, alias = "target")]
    pub provider: Option<String>,

    #[serde(default)]
    pub region: Option<String>,

    #[serde(default, deserialize_with = "deserialize_env")]
    pub env: HashMap<String, String>,

    #[serde(default)]
    pub port: Option<u16>,

    /// Health check path, e.g. `/healthz`
    #[serde(default)]
    pub healthcheck: Option<String>,

    #[serde(default)]
    pub custom_domain: Option<String>,

    #[serde(default)]
    pub subdomain: Option<String>,
}

/// Accept scalar env values of any type and keep them as strings
fn deserialize_env<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<HashMap<String, String>, D::Error> {
    let raw: HashMap<String, serde_json::Value> = HashMap::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => String::new(),
                serde_json::Value::Bool(_) | serde_json::Value::Number(_) => value.to_string(),
                _ => {
                    return Err(serde::de::Error::custom(format!(
                        "env value for {} must be a scalar",
                        key
                    )))
                }
            };
            Ok((key, value))
        })
        .collect()
}

impl Manifest {
    /// Parse manifest text, picking the format from the filename
    pub fn parse(file_name: &str, contents: &str) -> Result<Self, String> {
        if file_name.ends_with(".yaml") || file_name.ends_with(".yml") {
            serde_yaml::from_str(contents).map_err(|e| e.to_string())
        } else {
            serde_json::from_str(contents).map_err(|e| e.to_string())
        }
    }

    /// Locate and parse the manifest in `source_dir`.
    ///
    /// A manifest that fails to parse is logged and treated as absent.
    pub async fn load(source_dir: &Path) -> Option<(Manifest, PathBuf)> {
        for name in MANIFEST_FILES {
            let path = source_dir.join(name);
            let contents = match tokio::fs::read_to_string(&path).await {
                Ok(contents) => contents,
                Err(_) => continue,
            };

            debug!("Found deployment manifest: {}", path.display());
            return match Manifest::parse(name, &contents) {
                Ok(manifest) => Some((manifest, path)),
                Err(e) => {
                    warn!("Ignoring invalid manifest {}: {}", path.display(), e);
                    None
                }
            };
        }
        None
    }

    /// Custom domain precedence within the manifest: `customDomain` over `subdomain`
    pub fn domain(&self) -> Option<&str> {
        self.deploy
            .custom_domain
            .as_deref()
            .or(self.deploy.subdomain.as_deref())
            .filter(|d| !d.trim().is_empty())
    }
}
