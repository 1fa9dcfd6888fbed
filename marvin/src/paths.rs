//! Dataset path resolution and retrieval.
//!
//! Products are located by a template name (`mangacube`, `mangamap`, ...)
//! plus parameters such as `plate`, `ifu` and `drpver`. Templates are paths
//! relative to the archive root with `{name}` placeholders, matching the
//! archive's own directory layout so the same relative path works for the
//! local mirror and for downloads.

use crate::datamodel::{DataKind, Selectors};
use crate::error::{MarvinError, MarvinResult};
use crate::identifier::PlateIfu;
use crate::remote::RemoteError;
use crate::versions::VersionContext;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Template parameters, e.g. `plate -> 8485`.
pub type PathParams = BTreeMap<String, String>;

/// Build [`PathParams`] from pairs.
pub fn path_params<K: ToString, V: ToString>(pairs: &[(K, V)]) -> PathParams {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Template parameters locating a product file.
pub fn product_params(
    kind: DataKind,
    plateifu: PlateIfu,
    versions: &VersionContext,
    selectors: Option<&Selectors>,
) -> PathParams {
    let mut params = path_params(&[
        ("plate", plateifu.plate.to_string()),
        ("ifu", plateifu.ifu.to_string()),
        ("drpver", versions.drpver.clone()),
    ]);
    if kind.is_analysis() {
        params.insert("dapver".to_string(), versions.dapver.to_string());
        if let Some(sel) = selectors {
            params.insert("bintype".to_string(), sel.bintype.clone());
            params.insert("template".to_string(), sel.template.clone());
        }
    }
    params
}

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{(\w+)\}").expect("placeholder pattern is valid"));

/// Maps a template name and parameters to a local file.
pub trait PathResolver: Send + Sync {
    /// Local path if the file exists, `None` otherwise.
    ///
    /// Unknown templates and missing parameters are errors.
    fn resolve(&self, template: &str, params: &PathParams) -> MarvinResult<Option<PathBuf>>;
}

/// Fetches a dataset from the remote store into the local mirror.
pub trait Downloader: Send + Sync {
    /// Download and return the local path of the file.
    fn download(&self, template: &str, params: &PathParams) -> MarvinResult<PathBuf>;
}

/// Default archive layout.
pub fn default_templates() -> BTreeMap<String, String> {
    let analysis = "mangawork/manga/spectro/analysis/{drpver}/{dapver}/{bintype}-{template}/{plate}/{ifu}";
    [
        (
            "mangacube",
            "mangawork/manga/spectro/redux/{drpver}/{plate}/stack/manga-{plate}-{ifu}-LOGCUBE.fits.gz"
                .to_string(),
        ),
        (
            "mangamap",
            format!("{analysis}/manga-{{plate}}-{{ifu}}-MAPS-{{bintype}}-{{template}}.fits.gz"),
        ),
        (
            "mangadap",
            format!("{analysis}/manga-{{plate}}-{{ifu}}-LOGCUBE-{{bintype}}-{{template}}.fits.gz"),
        ),
        (
            "mangaffly",
            "mangawork/manga/sandbox/mangafirefly/{ver}/manga_firefly-{drpver}.fits".to_string(),
        ),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Resolves templates against a local archive root.
#[derive(Debug, Clone)]
pub struct TemplatePathResolver {
    base_dir: PathBuf,
    templates: BTreeMap<String, String>,
}

impl TemplatePathResolver {
    /// Resolver with the default archive layout rooted at `base_dir`.
    pub fn new(base_dir: &Path) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            templates: default_templates(),
        }
    }

    /// Add or replace a template.
    pub fn with_template(mut self, name: &str, pattern: &str) -> Self {
        self.templates.insert(name.to_string(), pattern.to_string());
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Archive-relative path of a dataset.
    pub fn relative_path(&self, template: &str, params: &PathParams) -> MarvinResult<String> {
        let pattern = self
            .templates
            .get(template)
            .ok_or_else(|| MarvinError::NotFound(format!("unknown path template {template}")))?;

        let mut missing = Vec::new();
        let path = PLACEHOLDER_RE.replace_all(pattern, |caps: &regex::Captures| {
            match params.get(&caps[1]) {
                Some(value) => value.clone(),
                None => {
                    missing.push(caps[1].to_string());
                    String::new()
                }
            }
        });
        if !missing.is_empty() {
            return Err(MarvinError::Identifier(format!(
                "path template {template} is missing parameters: {}",
                missing.join(", ")
            )));
        }
        Ok(path.into_owned())
    }

    /// Full local path, whether or not the file exists.
    pub fn full_path(&self, template: &str, params: &PathParams) -> MarvinResult<PathBuf> {
        Ok(self.base_dir.join(self.relative_path(template, params)?))
    }
}

impl PathResolver for TemplatePathResolver {
    fn resolve(&self, template: &str, params: &PathParams) -> MarvinResult<Option<PathBuf>> {
        let path = self.full_path(template, params)?;
        if path.is_file() {
            Ok(Some(path))
        } else {
            log::debug!("No local file at {}", path.display());
            Ok(None)
        }
    }
}

/// Downloads from the archive over HTTP into the local mirror.
pub struct HttpDownloader {
    sas_url: String,
    layout: TemplatePathResolver,
    agent: ureq::Agent,
}

impl HttpDownloader {
    /// # Arguments
    /// * `sas_url` - Archive base URL
    /// * `base_dir` - Local mirror root files are written under
    /// * `timeout` - Timeout for each download
    pub fn new(sas_url: &str, base_dir: &Path, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        Self {
            sas_url: sas_url.trim_end_matches('/').to_string(),
            layout: TemplatePathResolver::new(base_dir),
            agent: ureq::Agent::new_with_config(config),
        }
    }

    /// Use a custom archive layout.
    pub fn with_layout(mut self, layout: TemplatePathResolver) -> Self {
        self.layout = layout;
        self
    }
}

impl Downloader for HttpDownloader {
    fn download(&self, template: &str, params: &PathParams) -> MarvinResult<PathBuf> {
        let relative = self.layout.relative_path(template, params)?;
        let url = format!("{}/{}", self.sas_url, relative);
        let path = self.layout.base_dir().join(&relative);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        log::info!("Downloading {url}");
        let response = self.agent.get(&url).call().map_err(RemoteError::from)?;
        let status = response.status().as_u16();
        if status != 200 {
            return Err(RemoteError::ServerError {
                status,
                message: format!("download of {url} failed"),
            }
            .into());
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = path.with_file_name(format!("{file_name}.part"));
        let mut writer = BufWriter::new(File::create(&temp_path)?);
        let mut reader = response.into_body().into_reader();
        if let Err(e) = io::copy(&mut reader, &mut writer).and_then(|_| writer.flush()) {
            drop(writer);
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        drop(writer);

        fs::rename(&temp_path, &path)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn cube_params() -> PathParams {
        path_params(&[("drpver", "v2_0_1"), ("plate", "8485"), ("ifu", "1901")])
    }

    #[test]
    fn test_default_cube_path() {
        let resolver = TemplatePathResolver::new(Path::new("/sas"));
        let rel = resolver.relative_path("mangacube", &cube_params()).unwrap();
        assert_eq!(
            rel,
            "mangawork/manga/spectro/redux/v2_0_1/8485/stack/manga-8485-1901-LOGCUBE.fits.gz"
        );
    }

    #[test]
    fn test_default_maps_path() {
        let resolver = TemplatePathResolver::new(Path::new("/sas"));
        let mut params = cube_params();
        params.insert("dapver".to_string(), "2.0.2".to_string());
        params.insert("bintype".to_string(), "SPX".to_string());
        params.insert("template".to_string(), "GAU-MILESHC".to_string());
        let rel = resolver.relative_path("mangamap", &params).unwrap();
        assert!(rel.ends_with("SPX-GAU-MILESHC/8485/1901/manga-8485-1901-MAPS-SPX-GAU-MILESHC.fits.gz"));
    }

    #[test]
    fn test_missing_parameter_and_unknown_template() {
        let resolver = TemplatePathResolver::new(Path::new("/sas"));
        let params = path_params(&[("plate", "8485")]);
        let err = resolver.relative_path("mangacube", &params).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Identifier);
        assert!(err.to_string().contains("drpver"));

        let err = resolver.relative_path("nope", &params).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_resolve_only_existing_files() {
        let dir = TempDir::new().unwrap();
        let resolver =
            TemplatePathResolver::new(dir.path()).with_template("plain", "{plate}/{ifu}.fits");
        let params = cube_params();
        assert_eq!(resolver.resolve("plain", &params).unwrap(), None);

        let path = dir.path().join("8485").join("1901.fits");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"x").unwrap();
        assert_eq!(resolver.resolve("plain", &params).unwrap(), Some(path));
    }
}
