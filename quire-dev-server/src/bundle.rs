//! Bundle configuration and the in-memory bundle the server answers from.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use quire_core::{ConfigureBundle, HeadTag, SiteModel};

/// Entry document, served for the base path itself.
pub const ENTRY_DOCUMENT: &str = "index.html";
pub const SITE_DATA_SCRIPT: &str = "assets/site-data.js";
pub const APP_SCRIPT: &str = "assets/app.js";
pub const HOT_CLIENT_SCRIPT: &str = "assets/hot-client.js";
/// Prefix of the per-page HTML fragments.
pub const PAGES_DIR: &str = "assets/pages";
/// Keeps fragment paths clear of the `.html` history fallback.
pub const FRAGMENT_SUFFIX: &str = ".frag";

/// Programmatic override, applied after the site's `configureBundle` table.
pub type BundleHook = Arc<dyn Fn(BundleConfig) -> BundleConfig + Send + Sync>;

/// Everything the compiler needs to know besides the pages themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleConfig {
    /// Public path every bundle file is served under.
    pub public_path: String,
    pub title: String,
    pub description: String,
    pub head: Vec<HeadTag>,
    /// Entry document template, `None` for the built-in one.
    pub template: Option<PathBuf>,
    /// Globals exposed to the client as `window.__DEFINE__`.
    pub define: BTreeMap<String, serde_json::Value>,
    /// Port of the hot-reload transport, `None` disables the hot client.
    pub hot_port: Option<u16>,
    /// Address logged after every compile.
    pub dev_log: Option<String>,
}

impl BundleConfig {
    pub fn from_site(model: &SiteModel) -> Self {
        Self {
            public_path: model.base().to_string(),
            title: model.title().to_string(),
            description: model.config.description.clone().unwrap_or_default(),
            head: model.head().to_vec(),
            template: model.dev_template.clone(),
            define: BTreeMap::new(),
            hot_port: None,
            dev_log: None,
        }
    }

    pub fn with_hot_port(mut self, port: u16) -> Self {
        self.hot_port = Some(port);
        self
    }

    pub fn with_dev_log(mut self, url: impl Into<String>) -> Self {
        self.dev_log = Some(url.into());
        self
    }

    /// Apply the site's `configureBundle` table and then `hook`.
    ///
    /// Head tags are appended, `define` entries replace existing keys and a
    /// template path is resolved against the source root.
    pub fn apply_user_config(
        mut self,
        patch: Option<&ConfigureBundle>,
        source_dir: &Path,
        hook: Option<&BundleHook>,
    ) -> Self {
        if let Some(patch) = patch {
            self.head.extend(patch.head.iter().cloned());
            self.define
                .extend(patch.define.iter().map(|(k, v)| (k.clone(), v.clone())));
            if let Some(template) = &patch.template {
                self.template = Some(source_dir.join(template));
            }
        }

        match hook {
            Some(hook) => hook(self),
            None => self,
        }
    }

    /// URL of a bundle file under the public path.
    pub fn asset_url(&self, path: &str) -> String {
        format!("{}{}", self.public_path, path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleFile {
    pub content: Vec<u8>,
    pub content_type: &'static str,
}

/// Compiled output, keyed by path relative to the public path.
#[derive(Debug, Clone, Default)]
pub struct Bundle {
    files: HashMap<String, BundleFile>,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<Vec<u8>>, content_type: &'static str) {
        self.files.insert(
            path.into(),
            BundleFile {
                content: content.into(),
                content_type,
            },
        );
    }

    /// Look up a file. An empty path is the entry document.
    pub fn get(&self, path: &str) -> Option<&BundleFile> {
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            self.files.get(ENTRY_DOCUMENT)
        } else {
            self.files.get(path)
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// The bundle currently being served. Swapped wholesale after each compile.
pub type BundleStore = Arc<ArcSwap<Bundle>>;

pub fn bundle_store(bundle: Bundle) -> BundleStore {
    Arc::new(ArcSwap::from_pointee(bundle))
}

/// Bundle path of the HTML fragment for a page route.
pub fn page_fragment_path(route: &str) -> String {
    let route = route.trim_start_matches('/');
    if route.is_empty() || route.ends_with('/') {
        format!("{PAGES_DIR}/{route}{ENTRY_DOCUMENT}{FRAGMENT_SUFFIX}")
    } else {
        format!("{PAGES_DIR}/{route}{FRAGMENT_SUFFIX}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_core::SiteConfig;

    fn model() -> SiteModel {
        let config = SiteConfig {
            title: Some("Docs".to_string()),
            description: Some("All about it".to_string()),
            base: "/docs/".to_string(),
            head: vec![HeadTag::new("link").attr("rel", "icon").attr("href", "/logo.png")],
            ..SiteConfig::default()
        };
        SiteModel::new(PathBuf::from("/site"), config, Vec::new())
    }

    #[test]
    fn test_from_site() {
        let config = BundleConfig::from_site(&model());

        assert_eq!(config.public_path, "/docs/");
        assert_eq!(config.title, "Docs");
        assert_eq!(config.description, "All about it");
        assert_eq!(config.head.len(), 1);
        assert_eq!(config.template, None);
        assert_eq!(config.hot_port, None);
        assert_eq!(config.asset_url(APP_SCRIPT), "/docs/assets/app.js");
    }

    #[test]
    fn test_user_config_applied_last() {
        let mut define = BTreeMap::new();
        define.insert("FEATURE".to_string(), serde_json::json!(true));
        let patch = ConfigureBundle {
            head: vec![HeadTag::new("meta").attr("name", "theme-color")],
            define,
            template: Some(PathBuf::from(".vuepress/custom.html")),
        };
        let hook: BundleHook = Arc::new(|mut config: BundleConfig| {
            config.title = format!("{} (dev)", config.title);
            config.define.insert("FEATURE".to_string(), serde_json::json!(false));
            config
        });

        let config = BundleConfig::from_site(&model())
            .with_hot_port(8081)
            .apply_user_config(Some(&patch), Path::new("/site"), Some(&hook));

        assert_eq!(config.head.len(), 2);
        assert_eq!(config.head[1].tag, "meta");
        assert_eq!(config.template, Some(PathBuf::from("/site/.vuepress/custom.html")));
        assert_eq!(config.title, "Docs (dev)");
        assert_eq!(config.define["FEATURE"], serde_json::json!(false));
        assert_eq!(config.hot_port, Some(8081));
    }

    #[test]
    fn test_bundle_lookup() {
        let mut bundle = Bundle::new();
        bundle.insert(ENTRY_DOCUMENT, "<html></html>", "text/html; charset=utf-8");
        bundle.insert(APP_SCRIPT, "console.log(1)", "application/javascript");

        assert_eq!(bundle.get("").unwrap().content, b"<html></html>");
        assert_eq!(bundle.get("/").unwrap().content_type, "text/html; charset=utf-8");
        assert!(bundle.get("assets/app.js").is_some());
        assert!(bundle.get("missing.js").is_none());
        assert_eq!(bundle.len(), 2);
    }

    #[test]
    fn test_page_fragment_path() {
        assert_eq!(page_fragment_path("/"), "assets/pages/index.html.frag");
        assert_eq!(page_fragment_path("/guide/"), "assets/pages/guide/index.html.frag");
        assert_eq!(
            page_fragment_path("/guide/install.html"),
            "assets/pages/guide/install.html.frag"
        );
    }
}
