use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::domain::{Dataset, DownloadSubset, GenomeRelease};
use crate::error::InstallerError;

pub const CONFIG_FILE_NAME: &str = "varfish-installer.json";
pub const DEFAULT_S3_ENDPOINT_URL: &str = "https://ceph-s3-public.cubi.bihealth.org";
pub const DEFAULT_S3_BUCKET: &str = "varfish-public";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub s3_endpoint_url: Option<String>,
    #[serde(default)]
    pub s3_bucket: Option<String>,
    #[serde(default)]
    pub base_dir: Option<String>,
    #[serde(default)]
    pub static_infix: Option<String>,
    #[serde(default)]
    pub subset: Option<DownloadSubset>,
    #[serde(default)]
    pub disable_ssl_verification: Option<bool>,
    #[serde(default)]
    pub datasets: Vec<String>,
    #[serde(default)]
    pub releases: Option<Vec<String>>,
    #[serde(default)]
    pub versions: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSettings {
    pub s3_endpoint_url: String,
    pub s3_bucket: String,
    pub static_infix: String,
    pub subset: DownloadSubset,
    pub disable_ssl_verification: bool,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub remote: RemoteSettings,
    pub base_dir: String,
    /// Empty means every known dataset.
    pub datasets: Vec<Dataset>,
    pub releases: Vec<GenomeRelease>,
    pub versions: BTreeMap<Dataset, String>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads the config at `path`, or the default file in the working directory,
    /// falling back to the per-user config directory.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, InstallerError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => default_config_path().ok_or(InstallerError::MissingConfig)?,
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| InstallerError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| InstallerError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, InstallerError> {
        let datasets = config
            .datasets
            .iter()
            .map(|value| value.parse::<Dataset>())
            .collect::<Result<Vec<_>, InstallerError>>()?;

        let releases = match config.releases {
            Some(values) => values
                .iter()
                .map(|value| value.parse::<GenomeRelease>())
                .collect::<Result<Vec<_>, InstallerError>>()?,
            None => GenomeRelease::ALL.to_vec(),
        };

        let versions = config
            .versions
            .into_iter()
            .map(|(name, version)| Ok((name.parse::<Dataset>()?, version)))
            .collect::<Result<BTreeMap<_, _>, InstallerError>>()?;

        Ok(ResolvedConfig {
            remote: RemoteSettings {
                s3_endpoint_url: config
                    .s3_endpoint_url
                    .unwrap_or_else(|| DEFAULT_S3_ENDPOINT_URL.to_string()),
                s3_bucket: config
                    .s3_bucket
                    .unwrap_or_else(|| DEFAULT_S3_BUCKET.to_string()),
                static_infix: config
                    .static_infix
                    .unwrap_or_else(|| "varfish-static".to_string()),
                subset: config.subset.unwrap_or_default(),
                disable_ssl_verification: config.disable_ssl_verification.unwrap_or(false),
            },
            base_dir: config.base_dir.unwrap_or_else(|| ".prod".to_string()),
            datasets,
            releases,
            versions,
        })
    }
}

fn default_config_path() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Some(local);
    }
    ProjectDirs::from("org", "varfish", "varfish-installer")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
        .filter(|path| path.exists())
}
