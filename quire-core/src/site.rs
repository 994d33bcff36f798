use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::{HeadTag, SiteConfig};
use crate::markdown::{Header, PageMeta};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    /// Route relative to the base path, e.g. `/guide/` or `/guide/install.html`.
    pub path: String,
    pub title: String,
    /// Source file relative to the source root.
    pub relative_path: PathBuf,
    pub page_type: PageType,
    pub frontmatter: serde_json::Value,
    pub headers: Vec<Header>,
}

impl Page {
    pub fn new(relative_path: PathBuf, meta: PageMeta) -> Self {
        let page_type = PageType::from_path(&relative_path);
        let path = route_for(&relative_path);
        let title = meta.title.unwrap_or_else(|| {
            relative_path
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .unwrap_or_default()
        });

        Self {
            path,
            title,
            relative_path,
            page_type,
            frontmatter: meta.frontmatter,
            headers: meta.headers,
        }
    }

    /// Number of directories between the source root and this page.
    pub fn depth(&self) -> usize {
        self.relative_path.components().count().saturating_sub(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PageType {
    Home,
    Index,
    Regular,
}

impl PageType {
    fn from_path(relative_path: &Path) -> Self {
        let is_index = relative_path
            .file_name()
            .map(|name| {
                let name = name.to_string_lossy().to_lowercase();
                name == "readme.md" || name == "index.md"
            })
            .unwrap_or(false);

        match (is_index, relative_path.parent()) {
            (true, Some(parent)) if parent.as_os_str().is_empty() => PageType::Home,
            (true, _) => PageType::Index,
            _ => PageType::Regular,
        }
    }
}

/// Map a markdown file to its route: `README.md`/`index.md` become the
/// directory route, anything else `name.html`.
pub fn route_for(relative_path: &Path) -> String {
    let segments: Vec<String> = relative_path
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    let Some((file, dirs)) = segments.split_last() else {
        return "/".to_string();
    };

    let mut route = String::from("/");
    for dir in dirs {
        route.push_str(dir);
        route.push('/');
    }

    let lower = file.to_lowercase();
    if lower != "readme.md" && lower != "index.md" {
        let stem = file.strip_suffix(".md").unwrap_or(file);
        route.push_str(stem);
        route.push_str(".html");
    }

    route
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavItem {
    pub text: String,
    pub link: String,
}

/// The derived view of a source tree that drives bundling and serving.
///
/// Instances are never mutated after construction; a regeneration builds a
/// new one.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteModel {
    pub source_dir: PathBuf,
    pub config: SiteConfig,
    pub pages: Vec<Page>,
    pub navigation: Vec<NavItem>,
    /// Resolved entry document template, `None` for the built-in one.
    pub dev_template: Option<PathBuf>,
}

impl SiteModel {
    pub fn new(source_dir: PathBuf, config: SiteConfig, mut pages: Vec<Page>) -> Self {
        pages.sort_by(|a, b| a.path.cmp(&b.path));
        let navigation = build_navigation(&pages);

        Self {
            source_dir,
            config,
            pages,
            navigation,
            dev_template: None,
        }
    }

    pub fn with_dev_template(mut self, template: Option<PathBuf>) -> Self {
        self.dev_template = template;
        self
    }

    pub fn base(&self) -> &str {
        &self.config.base
    }

    pub fn head(&self) -> &[HeadTag] {
        &self.config.head
    }

    pub fn title(&self) -> &str {
        self.config.title.as_deref().unwrap_or("")
    }

    pub fn page(&self, path: &str) -> Option<&Page> {
        self.pages.iter().find(|page| page.path == path)
    }

    pub fn page_by_source(&self, relative_path: &Path) -> Option<&Page> {
        self.pages
            .iter()
            .find(|page| page.relative_path == relative_path)
    }

    /// Client-facing site data, serialized into the bundle.
    pub fn site_data(&self) -> SiteData<'_> {
        SiteData {
            title: self.title(),
            description: self.config.description.as_deref().unwrap_or(""),
            base: self.base(),
            pages: &self.pages,
            nav: &self.navigation,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SiteData<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub base: &'a str,
    pub pages: &'a [Page],
    pub nav: &'a [NavItem],
}

fn build_navigation(pages: &[Page]) -> Vec<NavItem> {
    let mut navigation: Vec<NavItem> = pages
        .iter()
        .filter(|page| match page.page_type {
            PageType::Regular => page.depth() == 0,
            PageType::Index => page.depth() == 1,
            PageType::Home => false,
        })
        .map(|page| NavItem {
            text: page.title.clone(),
            link: page.path.clone(),
        })
        .collect();

    navigation.sort_by(|a, b| a.link.cmp(&b.link));
    navigation
}
