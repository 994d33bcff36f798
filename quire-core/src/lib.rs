pub mod config;
pub mod markdown;
pub mod metadata;
pub mod prepare;
pub mod scanner;
pub mod site;
pub mod template;

// Re-export main types
pub use config::{CONFIG_DIR, ConfigError, ConfigureBundle, HeadTag, SiteConfig};
pub use markdown::{Header, PageMeta, render_markdown};
pub use metadata::{MetadataStatus, MetadataTracker};
pub use prepare::{FsPreparer, PrepareError, PrepareOptions, SitePreparer};
pub use scanner::{ScanError, SiteScanner};
pub use site::{NavItem, Page, PageType, SiteModel};
pub use template::{EntryContext, TemplateError, TemplateRenderer};
