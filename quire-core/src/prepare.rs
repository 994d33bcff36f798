//! Site preparation: turn a source tree into a [`SiteModel`].

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::{CONFIG_DIR, ConfigError, SiteConfig};
use crate::markdown::PageMeta;
use crate::scanner::{ScanError, SiteScanner};
use crate::site::{Page, SiteModel};

#[derive(Debug, Error)]
pub enum PrepareError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),
    #[error("Failed to read {}: {source}", path.display())]
    ReadPage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid front matter in {}: {source}", path.display())]
    Frontmatter {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Site preparation aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrepareOptions {
    pub is_prod: bool,
}

/// Builds a complete site model from a source tree.
///
/// Implementations do blocking file IO; async callers should run them on a
/// blocking thread.
pub trait SitePreparer: Send + Sync {
    fn prepare(&self, source_dir: &Path, options: PrepareOptions) -> Result<SiteModel, PrepareError>;
}

/// Reads configuration and pages straight from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsPreparer;

impl SitePreparer for FsPreparer {
    fn prepare(&self, source_dir: &Path, options: PrepareOptions) -> Result<SiteModel, PrepareError> {
        let config = SiteConfig::load(source_dir)?;

        let mut pages = Vec::new();
        for relative in SiteScanner::new(source_dir).scan()? {
            let path = source_dir.join(&relative);
            let content = std::fs::read_to_string(&path).map_err(|source| PrepareError::ReadPage {
                path: path.clone(),
                source,
            })?;
            let meta = PageMeta::extract(&content)
                .map_err(|source| PrepareError::Frontmatter { path, source })?;

            pages.push(Page::new(relative, meta));
        }

        tracing::debug!(
            source = %source_dir.display(),
            pages = pages.len(),
            "Prepared site model"
        );

        let template = resolve_template(source_dir, options);
        Ok(SiteModel::new(source_dir.to_path_buf(), config, pages).with_dev_template(template))
    }
}

/// `.vuepress/templates/dev.html` (or `ssr.html` for production) if the
/// site ships one.
fn resolve_template(source_dir: &Path, options: PrepareOptions) -> Option<PathBuf> {
    let name = if options.is_prod { "ssr.html" } else { "dev.html" };
    let path = source_dir.join(CONFIG_DIR).join("templates").join(name);
    path.is_file().then_some(path)
}
