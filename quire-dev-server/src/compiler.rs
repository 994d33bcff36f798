//! Turns the current site model into an in-memory [`Bundle`].
//!
//! The compiler recompiles whenever the coordinator installs a model or a
//! page's content changes on disk. While reading pages it tracks their
//! metadata; a page whose front matter or headings changed in place is
//! reported on the metadata channel so the coordinator regenerates the model.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use quire_core::markdown::split_frontmatter;
use quire_core::{
    EntryContext, MetadataStatus, MetadataTracker, PageMeta, SiteModel, TemplateError,
    TemplateRenderer, render_markdown,
};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::bundle::{
    APP_SCRIPT, Bundle, BundleConfig, BundleStore, ENTRY_DOCUMENT, HOT_CLIENT_SCRIPT,
    SITE_DATA_SCRIPT, bundle_store, page_fragment_path,
};
use crate::error::DevError;
use crate::hot::{HotReloader, hot_client_script};

const HTML: &str = "text/html; charset=utf-8";
const JAVASCRIPT: &str = "application/javascript; charset=utf-8";

#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Template(#[from] TemplateError),
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
    #[error("Failed to serialize site data: {0}")]
    SiteData(#[from] serde_json::Error),
    #[error("Compile aborted: {0}")]
    Aborted(String),
}

/// Rendered page bodies keyed by source path.
///
/// Emptied right before every regeneration, single entries are dropped when
/// their file changes.
#[derive(Debug, Default)]
pub struct RenderCache {
    pages: Mutex<HashMap<PathBuf, String>>,
}

impl RenderCache {
    pub fn get(&self, path: &Path) -> Option<String> {
        self.pages.lock().get(path).cloned()
    }

    pub fn insert(&self, path: PathBuf, html: String) {
        self.pages.lock().insert(path, html);
    }

    pub fn invalidate(&self, path: &Path) {
        self.pages.lock().remove(path);
    }

    pub fn clear(&self) {
        self.pages.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.pages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.lock().is_empty()
    }
}

pub struct Compiler {
    config: BundleConfig,
    store: BundleStore,
    cache: Arc<RenderCache>,
    tracker: Mutex<MetadataTracker>,
    metadata: mpsc::UnboundedSender<PathBuf>,
    hot: HotReloader,
    compiles: AtomicU64,
}

impl Compiler {
    pub fn new(config: BundleConfig, metadata: mpsc::UnboundedSender<PathBuf>, hot: HotReloader) -> Self {
        Self {
            config,
            store: bundle_store(Bundle::new()),
            cache: Arc::new(RenderCache::default()),
            tracker: Mutex::new(MetadataTracker::new()),
            metadata,
            hot,
            compiles: AtomicU64::new(0),
        }
    }

    /// Share a render cache created ahead of the compiler, so it can be
    /// flushed by the coordinator.
    pub fn with_cache(mut self, cache: Arc<RenderCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Where compiled bundles are published.
    pub fn store(&self) -> BundleStore {
        Arc::clone(&self.store)
    }

    pub fn cache(&self) -> Arc<RenderCache> {
        Arc::clone(&self.cache)
    }

    /// Compile a bundle for `model`. Does blocking file IO.
    pub fn compile(&self, model: &SiteModel) -> Result<Bundle, CompileError> {
        let renderer = match &self.config.template {
            Some(path) => TemplateRenderer::from_file(path)?,
            None => TemplateRenderer::builtin()?,
        };

        let mut bundle = Bundle::new();
        for page in &model.pages {
            let html = self.render_page(&model.source_dir, &page.relative_path)?;
            bundle.insert(page_fragment_path(&page.path), html, HTML);
        }

        self.tracker
            .lock()
            .retain(|path| model.page_by_source(path).is_some());

        let mut scripts = vec![
            self.config.asset_url(SITE_DATA_SCRIPT),
            self.config.asset_url(APP_SCRIPT),
        ];
        if let Some(port) = self.config.hot_port {
            bundle.insert(HOT_CLIENT_SCRIPT, hot_client_script(port), JAVASCRIPT);
            scripts.push(self.config.asset_url(HOT_CLIENT_SCRIPT));
        }

        let entry = EntryContext {
            title: self.config.title.clone(),
            description: self.config.description.clone(),
            head: self
                .config
                .head
                .iter()
                .map(|tag| tag.render())
                .collect::<Vec<_>>()
                .join("\n    "),
            base: self.config.public_path.clone(),
            scripts,
        };
        bundle.insert(ENTRY_DOCUMENT, renderer.render(&entry)?, HTML);

        // The server keeps its startup base, so the client must too
        let mut data = model.site_data();
        data.base = &self.config.public_path;
        let site_data = format!(
            "window.__SITE_DATA__ = {};\nwindow.__DEFINE__ = {};\n",
            serde_json::to_string(&data)?,
            serde_json::to_string(&self.config.define)?
        );
        bundle.insert(SITE_DATA_SCRIPT, site_data, JAVASCRIPT);
        bundle.insert(APP_SCRIPT, APP_JS, JAVASCRIPT);

        Ok(bundle)
    }

    fn render_page(&self, source_dir: &Path, relative: &Path) -> Result<String, CompileError> {
        if let Some(html) = self.cache.get(relative) {
            return Ok(html);
        }

        let path = source_dir.join(relative);
        let content = std::fs::read_to_string(&path).map_err(|source| CompileError::ReadPage {
            path: path.clone(),
            source,
        })?;
        let meta = PageMeta::extract(&content)
            .map_err(|source| CompileError::Frontmatter { path, source })?;

        if self.tracker.lock().observe(relative, &meta) == MetadataStatus::Changed {
            tracing::debug!(path = %relative.display(), "Front matter or headers changed");
            if self.metadata.send(relative.to_path_buf()).is_err() {
                tracing::debug!("Update coordinator is gone, dropping metadata change");
            }
        }

        let (_, body) = split_frontmatter(&content);
        let html = render_markdown(body);
        self.cache.insert(relative.to_path_buf(), html.clone());

        Ok(html)
    }

    /// Publish a bundle and tell connected clients to reload.
    pub fn install(&self, bundle: Bundle) {
        let files = bundle.len();
        self.store.store(Arc::new(bundle));
        self.hot.reload();

        let count = self.compiles.fetch_add(1, Ordering::SeqCst);
        match (&self.config.dev_log, count) {
            (Some(url), 0) => tracing::info!("Dev server listening at {url}"),
            (Some(url), _) => tracing::info!(files, "Recompiled, dev server listening at {url}"),
            (None, _) => tracing::debug!(files, "Recompiled"),
        }
    }

    /// [`Compiler::compile`] on the blocking pool.
    pub async fn compile_blocking(self: &Arc<Self>, model: Arc<SiteModel>) -> Result<Bundle, CompileError> {
        let compiler = Arc::clone(self);
        tokio::task::spawn_blocking(move || compiler.compile(&model))
            .await
            .unwrap_or_else(|e| Err(CompileError::Aborted(e.to_string())))
    }

    /// Compile and install the result.
    pub async fn rebuild(self: &Arc<Self>, model: Arc<SiteModel>) -> Result<(), DevError> {
        let bundle = self.compile_blocking(model).await?;
        self.install(bundle);
        Ok(())
    }

    /// Recompile on every installed model and every page edit.
    pub async fn run(
        self: Arc<Self>,
        mut models: watch::Receiver<Arc<SiteModel>>,
        mut content: mpsc::UnboundedReceiver<PathBuf>,
    ) {
        loop {
            tokio::select! {
                changed = models.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                Some(path) = content.recv() => {
                    self.cache.invalidate(&path);
                    while let Ok(path) = content.try_recv() {
                        self.cache.invalidate(&path);
                    }
                }
            }

            let model = Arc::clone(&models.borrow_and_update());
            if let Err(e) = self.rebuild(model).await {
                tracing::error!("{e}");
            }
        }

        tracing::debug!("Compiler stopped");
    }
}

/// Minimal client: navigation plus page fragments loaded on route change.
const APP_JS: &str = r#"(function () {
  var site = window.__SITE_DATA__;
  var app = document.getElementById('app');

  function fragmentUrl(path) {
    var route = path.slice(site.base.length);
    if (route === '' || route.endsWith('/')) {
      route += 'index.html';
    }
    return site.base + 'assets/pages/' + route + '.frag';
  }

  function renderNav() {
    var nav = document.createElement('nav');
    site.nav.forEach(function (item) {
      var link = document.createElement('a');
      link.href = site.base + item.link.slice(1);
      link.textContent = item.text;
      nav.appendChild(link);
    });
    return nav;
  }

  function load(path) {
    fetch(fragmentUrl(path)).then(function (res) {
      return res.ok ? res.text() : '<h1>404</h1>';
    }).then(function (html) {
      var main = document.createElement('main');
      main.innerHTML = html;
      app.replaceChildren(renderNav(), main);
    });
  }

  document.addEventListener('click', function (event) {
    var link = event.target.closest('a');
    if (link && link.origin === location.origin && link.pathname.indexOf(site.base) === 0) {
      event.preventDefault();
      history.pushState(null, '', link.pathname);
      load(link.pathname);
    }
  });
  window.addEventListener('popstate', function () {
    load(location.pathname);
  });

  load(location.pathname);
})();
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use quire_core::{FsPreparer, HeadTag, PrepareOptions, SitePreparer};
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn site() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join(".vuepress")).unwrap();
        fs::create_dir_all(root.join("guide")).unwrap();
        fs::write(
            root.join(".vuepress/config.toml"),
            "title = \"Docs\"\nbase = \"/docs/\"\nhead = [[\"link\", { rel = \"icon\", href = \"/logo.png\" }]]\n",
        )
        .unwrap();
        fs::write(root.join("README.md"), "# Welcome\n\nHello.\n").unwrap();
        fs::write(root.join("guide/intro.md"), "---\ntitle: Intro\n---\n## Setup\n").unwrap();
        dir
    }

    fn model(dir: &TempDir) -> SiteModel {
        FsPreparer.prepare(dir.path(), PrepareOptions::default()).unwrap()
    }

    fn compiler(model: &SiteModel) -> (Compiler, mpsc::UnboundedReceiver<PathBuf>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = BundleConfig::from_site(model).with_hot_port(8081);
        (Compiler::new(config, tx, HotReloader::new()), rx)
    }

    fn text(bundle: &Bundle, path: &str) -> String {
        String::from_utf8(bundle.get(path).unwrap().content.clone()).unwrap()
    }

    #[test]
    fn test_entry_document() {
        let dir = site();
        let model = model(&dir);
        let (compiler, _rx) = compiler(&model);

        let bundle = compiler.compile(&model).unwrap();
        let html = text(&bundle, ENTRY_DOCUMENT);

        assert!(html.contains("<title>Docs</title>"));
        assert!(html.contains(r#"<link href="/logo.png" rel="icon">"#));
        assert!(html.contains(r#"<script src="/docs/assets/site-data.js">"#));
        assert!(html.contains(r#"<script src="/docs/assets/app.js">"#));
        assert!(html.contains(r#"<script src="/docs/assets/hot-client.js">"#));
        assert!(text(&bundle, HOT_CLIENT_SCRIPT).contains(":8081/"));
    }

    #[test]
    fn test_pages_and_site_data() {
        let dir = site();
        let model = model(&dir);
        let (compiler, _rx) = compiler(&model);

        let bundle = compiler.compile(&model).unwrap();

        assert!(text(&bundle, "assets/pages/index.html.frag").contains("Hello."));
        assert!(text(&bundle, "assets/pages/guide/intro.html.frag").contains(r#"id="setup""#));

        let data = text(&bundle, SITE_DATA_SCRIPT);
        assert!(data.starts_with("window.__SITE_DATA__ = {"));
        assert!(data.contains(r#""base":"/docs/""#));
        assert!(data.contains("window.__DEFINE__ = {};"));
    }

    #[test]
    fn test_site_data_keeps_startup_base() {
        let dir = site();
        let (compiler, _rx) = compiler(&model(&dir));

        fs::write(dir.path().join(".vuepress/config.toml"), "title = \"Docs\"\nbase = \"/v2/\"\n").unwrap();
        let moved = model(&dir);
        assert_eq!(moved.base(), "/v2/");

        let bundle = compiler.compile(&moved).unwrap();
        let data = text(&bundle, SITE_DATA_SCRIPT);
        assert!(data.contains(r#""base":"/docs/""#));
        assert!(!data.contains("/v2/"));
    }

    #[test]
    fn test_custom_template() {
        let dir = site();
        let template = dir.path().join("entry.html");
        fs::write(&template, "<main>{{ title }}</main>").unwrap();
        let model = model(&dir);
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut config = BundleConfig::from_site(&model);
        config.template = Some(template);
        config.head.push(HeadTag::new("meta").attr("name", "x"));

        let bundle = Compiler::new(config, tx, HotReloader::new()).compile(&model).unwrap();
        assert_eq!(text(&bundle, ENTRY_DOCUMENT), "<main>Docs</main>");
        assert!(bundle.get(HOT_CLIENT_SCRIPT).is_none());
    }

    #[test]
    fn test_missing_template_fails() {
        let dir = site();
        let model = model(&dir);
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut config = BundleConfig::from_site(&model);
        config.template = Some(dir.path().join("nope.html"));

        let err = Compiler::new(config, tx, HotReloader::new()).compile(&model).unwrap_err();
        assert!(matches!(err, CompileError::Template(_)));
    }

    #[test]
    fn test_render_cache() {
        let dir = site();
        let model = model(&dir);
        let (compiler, _rx) = compiler(&model);
        compiler.compile(&model).unwrap();
        assert_eq!(compiler.cache().len(), 2);

        fs::write(dir.path().join("README.md"), "# Welcome\n\nChanged.\n").unwrap();
        let bundle = compiler.compile(&model).unwrap();
        assert!(text(&bundle, "assets/pages/index.html.frag").contains("Hello."));

        compiler.cache().invalidate(Path::new("README.md"));
        let bundle = compiler.compile(&model).unwrap();
        assert!(text(&bundle, "assets/pages/index.html.frag").contains("Changed."));
    }

    #[test]
    fn test_metadata_changes_are_reported() {
        let dir = site();
        let model = model(&dir);
        let (compiler, mut rx) = compiler(&model);
        compiler.compile(&model).unwrap();

        // Body only
        fs::write(dir.path().join("guide/intro.md"), "---\ntitle: Intro\n---\n## Setup\n\nMore.\n").unwrap();
        compiler.cache().invalidate(Path::new("guide/intro.md"));
        compiler.compile(&model).unwrap();
        assert!(rx.try_recv().is_err());

        fs::write(dir.path().join("guide/intro.md"), "---\ntitle: Start\n---\n## Setup\n").unwrap();
        compiler.cache().invalidate(Path::new("guide/intro.md"));
        compiler.compile(&model).unwrap();
        assert_eq!(rx.try_recv().unwrap(), PathBuf::from("guide/intro.md"));
    }

    #[tokio::test]
    async fn test_run_recompiles_on_new_model() {
        let dir = site();
        let first = Arc::new(model(&dir));
        let (compiler, _rx) = compiler(&first);
        let compiler = Arc::new(compiler);
        let mut reloads = compiler.hot.subscribe();

        let (model_tx, model_rx) = watch::channel(Arc::clone(&first));
        let (_content_tx, content_rx) = mpsc::unbounded_channel();
        tokio::spawn(Arc::clone(&compiler).run(model_rx, content_rx));

        fs::write(dir.path().join("about.md"), "# About\n").unwrap();
        model_tx.send_replace(Arc::new(model(&dir)));

        tokio::time::timeout(Duration::from_secs(5), reloads.recv())
            .await
            .expect("no reload after compile")
            .unwrap();
        assert!(compiler.store().load().get("assets/pages/about.html.frag").is_some());
    }

    #[tokio::test]
    async fn test_run_recompiles_on_content_change() {
        let dir = site();
        let model = Arc::new(model(&dir));
        let (compiler, _rx) = compiler(&model);
        let compiler = Arc::new(compiler);
        compiler.rebuild(Arc::clone(&model)).await.unwrap();
        let mut reloads = compiler.hot.subscribe();

        let (_model_tx, model_rx) = watch::channel(model);
        let (content_tx, content_rx) = mpsc::unbounded_channel();
        tokio::spawn(Arc::clone(&compiler).run(model_rx, content_rx));

        fs::write(dir.path().join("README.md"), "# Welcome\n\nEdited.\n").unwrap();
        content_tx.send(PathBuf::from("README.md")).unwrap();

        tokio::time::timeout(Duration::from_secs(5), reloads.recv())
            .await
            .expect("no reload after edit")
            .unwrap();
        let bundle = compiler.store().load_full();
        assert!(text(&bundle, "assets/pages/index.html.frag").contains("Edited."));
    }
}
