use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::InstallerError;
use crate::manifest::Manifest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum)]
pub enum GenomeRelease {
    #[serde(rename = "GRCh37")]
    #[value(name = "GRCh37", alias = "grch37")]
    Grch37,
    #[serde(rename = "GRCh38")]
    #[value(name = "GRCh38", alias = "grch38")]
    Grch38,
}

impl GenomeRelease {
    pub const ALL: [GenomeRelease; 2] = [GenomeRelease::Grch37, GenomeRelease::Grch38];

    pub fn as_str(&self) -> &'static str {
        match self {
            GenomeRelease::Grch37 => "GRCh37",
            GenomeRelease::Grch38 => "GRCh38",
        }
    }

    pub fn path_component(&self) -> &'static str {
        match self {
            GenomeRelease::Grch37 => "grch37",
            GenomeRelease::Grch38 => "grch38",
        }
    }
}

impl fmt::Display for GenomeRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GenomeRelease {
    type Err = InstallerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "grch37" => Ok(GenomeRelease::Grch37),
            "grch38" => Ok(GenomeRelease::Grch38),
            _ => Err(InstallerError::InvalidRelease(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DownloadSubset {
    #[default]
    Full,
    ReducedExomes,
    #[serde(rename = "reduced-dev")]
    #[value(name = "reduced-dev")]
    Development,
}

impl DownloadSubset {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadSubset::Full => "full",
            DownloadSubset::ReducedExomes => "reduced-exomes",
            DownloadSubset::Development => "reduced-dev",
        }
    }
}

impl fmt::Display for DownloadSubset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatasetCategory {
    Annonars,
    Mehari,
    Tracks,
    Worker,
    Viguno,
    CadaPrio,
}

impl DatasetCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetCategory::Annonars => "annonars",
            DatasetCategory::Mehari => "mehari",
            DatasetCategory::Tracks => "tracks",
            DatasetCategory::Worker => "worker",
            DatasetCategory::Viguno => "viguno",
            DatasetCategory::CadaPrio => "cada-prio",
        }
    }
}

impl fmt::Display for DatasetCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteSource {
    /// Public object storage bucket.
    S3,
    /// Release assets of a source hosting repository.
    GitHub { repo: &'static str },
}

/// Static facts about a dataset identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetInfo {
    pub category: DatasetCategory,
    pub release_specific: bool,
    pub source: RemoteSource,
    /// Directory name stem, the identifier without its category prefix.
    pub slug: &'static str,
    /// Tool that builds the dataset; second positional component of composite versions.
    pub tool: &'static str,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum Dataset {
    AnnonarsCadd,
    AnnonarsCons,
    AnnonarsDbnsfp,
    AnnonarsDbscnv,
    AnnonarsFunctional,
    AnnonarsGnomadExomes,
    AnnonarsGnomadGenomes,
    AnnonarsMtdna,
    AnnonarsSvExomes,
    AnnonarsSvGenomes,
    AnnonarsHelixmtdb,
    AnnonarsRegions,
    AnnonarsGenes,
    AnnonarsClinvar,
    MehariFreqs,
    MehariGenesXlink,
    MehariTranscripts,
    GenomeBrowserTracks,
    VarfishServerWorkerData,
    VigunoHpo,
    CadaPrio,
}

impl Dataset {
    pub const ALL: [Dataset; 21] = [
        Dataset::AnnonarsCadd,
        Dataset::AnnonarsCons,
        Dataset::AnnonarsDbnsfp,
        Dataset::AnnonarsDbscnv,
        Dataset::AnnonarsFunctional,
        Dataset::AnnonarsGnomadExomes,
        Dataset::AnnonarsGnomadGenomes,
        Dataset::AnnonarsMtdna,
        Dataset::AnnonarsSvExomes,
        Dataset::AnnonarsSvGenomes,
        Dataset::AnnonarsHelixmtdb,
        Dataset::AnnonarsRegions,
        Dataset::AnnonarsGenes,
        Dataset::AnnonarsClinvar,
        Dataset::MehariFreqs,
        Dataset::MehariGenesXlink,
        Dataset::MehariTranscripts,
        Dataset::GenomeBrowserTracks,
        Dataset::VarfishServerWorkerData,
        Dataset::VigunoHpo,
        Dataset::CadaPrio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dataset::AnnonarsCadd => "annonars-cadd",
            Dataset::AnnonarsCons => "annonars-cons",
            Dataset::AnnonarsDbnsfp => "annonars-dbnsfp",
            Dataset::AnnonarsDbscnv => "annonars-dbscnv",
            Dataset::AnnonarsFunctional => "annonars-functional",
            Dataset::AnnonarsGnomadExomes => "annonars-gnomad-exomes",
            Dataset::AnnonarsGnomadGenomes => "annonars-gnomad-genomes",
            Dataset::AnnonarsMtdna => "annonars-mtdna",
            Dataset::AnnonarsSvExomes => "annonars-sv-exomes",
            Dataset::AnnonarsSvGenomes => "annonars-sv-genomes",
            Dataset::AnnonarsHelixmtdb => "annonars-helixmtdb",
            Dataset::AnnonarsRegions => "annonars-regions",
            Dataset::AnnonarsGenes => "annonars-genes",
            Dataset::AnnonarsClinvar => "annonars-clinvar",
            Dataset::MehariFreqs => "mehari-freqs",
            Dataset::MehariGenesXlink => "mehari-genes-xlink",
            Dataset::MehariTranscripts => "mehari-transcripts",
            Dataset::GenomeBrowserTracks => "genome-browser-tracks",
            Dataset::VarfishServerWorkerData => "varfish-server-worker-data",
            Dataset::VigunoHpo => "viguno-hpo",
            Dataset::CadaPrio => "cada-prio",
        }
    }

    pub fn info(&self) -> DatasetInfo {
        use DatasetCategory::*;

        let annonars = |slug, release_specific| DatasetInfo {
            category: Annonars,
            release_specific,
            source: RemoteSource::S3,
            slug,
            tool: "annonars",
        };
        match self {
            Dataset::AnnonarsCadd => annonars("cadd", true),
            Dataset::AnnonarsCons => annonars("cons", true),
            Dataset::AnnonarsDbnsfp => annonars("dbnsfp", true),
            Dataset::AnnonarsDbscnv => annonars("dbscnv", true),
            Dataset::AnnonarsFunctional => annonars("functional", true),
            Dataset::AnnonarsGnomadExomes => annonars("gnomad-exomes", true),
            Dataset::AnnonarsGnomadGenomes => annonars("gnomad-genomes", true),
            Dataset::AnnonarsMtdna => annonars("mtdna", true),
            Dataset::AnnonarsSvExomes => annonars("sv-exomes", true),
            Dataset::AnnonarsSvGenomes => annonars("sv-genomes", true),
            Dataset::AnnonarsHelixmtdb => annonars("helixmtdb", true),
            Dataset::AnnonarsRegions => annonars("regions", true),
            Dataset::AnnonarsGenes => annonars("genes", false),
            Dataset::AnnonarsClinvar => DatasetInfo {
                source: RemoteSource::GitHub {
                    repo: "varfish-org/annonars-data-clinvar",
                },
                ..annonars("clinvar", true)
            },
            Dataset::MehariFreqs => DatasetInfo {
                category: Mehari,
                release_specific: true,
                source: RemoteSource::S3,
                slug: "freqs",
                tool: "mehari",
            },
            Dataset::MehariGenesXlink => DatasetInfo {
                category: Mehari,
                release_specific: false,
                source: RemoteSource::S3,
                slug: "genes-xlink",
                tool: "mehari",
            },
            Dataset::MehariTranscripts => DatasetInfo {
                category: Mehari,
                release_specific: true,
                source: RemoteSource::GitHub {
                    repo: "varfish-org/mehari-data-tx",
                },
                slug: "transcripts",
                tool: "mehari",
            },
            Dataset::GenomeBrowserTracks => DatasetInfo {
                category: Tracks,
                release_specific: true,
                source: RemoteSource::S3,
                slug: "genome-browser-tracks",
                tool: "varfish-db-downloader",
            },
            Dataset::VarfishServerWorkerData => DatasetInfo {
                category: Worker,
                release_specific: true,
                source: RemoteSource::S3,
                slug: "varfish-server-worker-data",
                tool: "varfish-server-worker",
            },
            Dataset::VigunoHpo => DatasetInfo {
                category: Viguno,
                release_specific: false,
                source: RemoteSource::S3,
                slug: "hpo",
                tool: "viguno",
            },
            Dataset::CadaPrio => DatasetInfo {
                category: CadaPrio,
                release_specific: false,
                source: RemoteSource::GitHub {
                    repo: "bihealth/cada-prio",
                },
                slug: "cada-prio",
                tool: "cada-prio",
            },
        }
    }

    pub fn category(&self) -> DatasetCategory {
        self.info().category
    }

    pub fn is_release_specific(&self) -> bool {
        self.info().release_specific
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Dataset {
    type Err = InstallerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Dataset::ALL
            .iter()
            .copied()
            .find(|dataset| dataset.as_str() == normalized)
            .ok_or_else(|| InstallerError::UnknownDataset(value.to_string()))
    }
}

/// Splits a composite version into upstream-name -> version pins.
///
/// Components are separated by `+`. A component is either `name=version` or a
/// bare version; bare components are keyed by position, first the dataset's
/// upstream slug and then the tool that built it.
pub fn parse_version(
    dataset: Dataset,
    raw: &str,
) -> Result<BTreeMap<String, String>, InstallerError> {
    let invalid = |message: String| InstallerError::InvalidVersion {
        dataset: dataset.to_string(),
        message,
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(invalid("empty version".to_string()));
    }
    // The raw version becomes a directory name and a URL path segment.
    if raw.contains(['/', '\\']) || raw.contains("..") {
        return Err(invalid(format!("{raw:?} is not a single path component")));
    }

    let info = dataset.info();
    let positional = [info.slug, info.tool];
    let mut parsed = BTreeMap::new();
    let mut bare = 0usize;
    for component in raw.split('+') {
        let (name, version) = match component.split_once('=') {
            Some((name, version)) => (name.trim().to_string(), version.trim().to_string()),
            None => {
                let name = positional.get(bare).ok_or_else(|| {
                    invalid(format!("too many unnamed components in {raw:?}"))
                })?;
                bare += 1;
                (name.to_string(), component.trim().to_string())
            }
        };
        if name.is_empty() || version.is_empty() {
            return Err(invalid(format!("empty component in {raw:?}")));
        }
        if parsed.insert(name.clone(), version).is_some() {
            return Err(invalid(format!("{name} pinned twice in {raw:?}")));
        }
    }
    Ok(parsed)
}

/// A dataset resolved against a release and version, optionally with its manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetDescriptor {
    pub dataset: Dataset,
    pub category: DatasetCategory,
    pub release: Option<GenomeRelease>,
    pub version_raw: String,
    pub version_parsed: BTreeMap<String, String>,
    pub manifest: Option<Manifest>,
}

impl DatasetDescriptor {
    pub fn new(
        dataset: Dataset,
        release: Option<GenomeRelease>,
        version: &str,
    ) -> Result<Self, InstallerError> {
        let release = match (dataset.is_release_specific(), release) {
            (true, None) => return Err(InstallerError::MissingRelease(dataset.to_string())),
            (true, Some(release)) => Some(release),
            (false, _) => None,
        };
        Ok(Self {
            dataset,
            category: dataset.category(),
            release,
            version_raw: version.trim().to_string(),
            version_parsed: parse_version(dataset, version)?,
            manifest: None,
        })
    }

    pub fn with_manifest(mut self, manifest: Manifest) -> Self {
        self.manifest = Some(manifest);
        self
    }

    pub fn key(&self) -> (Dataset, Option<GenomeRelease>) {
        (self.dataset, self.release)
    }

    /// Directory holding this dataset, e.g. `gnomad-exomes-grch37-4.1+0.33.0`.
    pub fn dir_name(&self) -> String {
        let slug = self.dataset.info().slug;
        match self.release {
            Some(release) => format!("{slug}-{}-{}", release.path_component(), self.version_raw),
            None => format!("{slug}-{}", self.version_raw),
        }
    }

    pub fn label(&self) -> String {
        match self.release {
            Some(release) => format!("{}@{release}", self.dataset),
            None => self.dataset.to_string(),
        }
    }
}

pub type DatasetCatalog = BTreeMap<(Dataset, Option<GenomeRelease>), DatasetDescriptor>;

/// Resolves requested datasets to descriptors, one per release for release-specific ones.
///
/// An empty `requested` selects every known dataset.
pub fn resolve_datasets(
    requested: &[Dataset],
    releases: &[GenomeRelease],
    versions: &BTreeMap<Dataset, String>,
) -> Result<DatasetCatalog, InstallerError> {
    let selected: Vec<Dataset> = if requested.is_empty() {
        Dataset::ALL.to_vec()
    } else {
        requested.to_vec()
    };

    let mut catalog = DatasetCatalog::new();
    for dataset in selected {
        let version = versions
            .get(&dataset)
            .ok_or_else(|| InstallerError::InvalidVersion {
                dataset: dataset.to_string(),
                message: "no version configured".to_string(),
            })?;
        if dataset.is_release_specific() {
            if releases.is_empty() {
                return Err(InstallerError::MissingRelease(dataset.to_string()));
            }
            for release in releases {
                let descriptor = DatasetDescriptor::new(dataset, Some(*release), version)?;
                catalog.insert(descriptor.key(), descriptor);
            }
        } else {
            let descriptor = DatasetDescriptor::new(dataset, None, version)?;
            catalog.insert(descriptor.key(), descriptor);
        }
    }
    Ok(catalog)
}
