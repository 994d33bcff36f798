use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Directory under the source root holding configuration, components,
/// templates and public assets.
pub const CONFIG_DIR: &str = ".vuepress";

/// Accepted configuration files, in lookup order.
pub const CONFIG_FILES: [&str; 3] = ["config.js", "config.yml", "config.toml"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("{} is not supported, use config.toml or config.yml instead", .0.display())]
    UnsupportedFormat(PathBuf),
    #[error("base must start with a slash, got {0:?}")]
    InvalidBase(String),
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SiteConfig {
    pub title: Option<String>,
    pub description: Option<String>,
    /// Public path prefix, always starts and ends with `/` once loaded.
    pub base: String,
    pub port: Option<u16>,
    pub host: Option<String>,
    pub head: Vec<HeadTag>,
    pub configure_bundle: Option<ConfigureBundle>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            title: None,
            description: None,
            base: "/".to_string(),
            port: None,
            host: None,
            head: Vec::new(),
            configure_bundle: None,
        }
    }
}

impl SiteConfig {
    /// Load the site configuration for a source tree.
    ///
    /// A tree without any configuration file gets the defaults.
    pub fn load<P: AsRef<Path>>(source_dir: P) -> Result<Self, ConfigError> {
        let Some(path) = config_path(source_dir.as_ref()) else {
            return Ok(Self::default());
        };

        let mut config = Self::read(&path)?;
        config.base = normalize_base(&config.base)?;

        Ok(config)
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&data)?),
            Some("yml") | Some("yaml") => Ok(serde_yaml::from_str(&data)?),
            _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

/// First configuration file that exists under `<source>/.vuepress`.
pub fn config_path(source_dir: &Path) -> Option<PathBuf> {
    CONFIG_FILES
        .iter()
        .map(|name| source_dir.join(CONFIG_DIR).join(name))
        .find(|path| path.is_file())
}

fn normalize_base(base: &str) -> Result<String, ConfigError> {
    if base.is_empty() {
        return Ok("/".to_string());
    }
    if !base.starts_with('/') {
        return Err(ConfigError::InvalidBase(base.to_string()));
    }
    if base.ends_with('/') {
        Ok(base.to_string())
    } else {
        Ok(format!("{base}/"))
    }
}

/// User overrides for the dev bundle, applied after everything else.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ConfigureBundle {
    /// Extra head tags appended after the site's own.
    pub head: Vec<HeadTag>,
    /// Globals exposed to the client as `window.__DEFINE__`.
    pub define: BTreeMap<String, serde_json::Value>,
    /// Entry document template, relative to the source root.
    pub template: Option<PathBuf>,
}

/// A tag injected into the document head, written as
/// `[tag, { attrs }]` or `[tag, { attrs }, innerHTML]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawHeadTag", into = "RawHeadTag")]
pub struct HeadTag {
    pub tag: String,
    pub attrs: BTreeMap<String, String>,
    pub inner_html: Option<String>,
}

const VOID_ELEMENTS: [&str; 5] = ["base", "link", "meta", "img", "br"];

impl HeadTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: BTreeMap::new(),
            inner_html: None,
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn render(&self) -> String {
        let mut html = format!("<{}", self.tag);
        for (name, value) in &self.attrs {
            html.push(' ');
            html.push_str(name);
            html.push_str("=\"");
            html.push_str(&html_escape::encode_double_quoted_attribute(value));
            html.push('"');
        }
        html.push('>');

        if let Some(inner) = &self.inner_html {
            html.push_str(inner);
        }
        if !VOID_ELEMENTS.contains(&self.tag.as_str()) {
            html.push_str(&format!("</{}>", self.tag));
        }

        html
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawHeadTag {
    WithContent(String, BTreeMap<String, String>, String),
    Attrs(String, BTreeMap<String, String>),
}

impl From<RawHeadTag> for HeadTag {
    fn from(raw: RawHeadTag) -> Self {
        match raw {
            RawHeadTag::WithContent(tag, attrs, inner) => Self {
                tag,
                attrs,
                inner_html: Some(inner),
            },
            RawHeadTag::Attrs(tag, attrs) => Self {
                tag,
                attrs,
                inner_html: None,
            },
        }
    }
}

impl From<HeadTag> for RawHeadTag {
    fn from(tag: HeadTag) -> Self {
        match tag.inner_html {
            Some(inner) => RawHeadTag::WithContent(tag.tag, tag.attrs, inner),
            None => RawHeadTag::Attrs(tag.tag, tag.attrs),
        }
    }
}
