use std::path::Path;

use serde::Serialize;
use tera::{Context, Tera};
use thiserror::Error;

const ENTRY_TEMPLATE: &str = "entry.html";

/// Entry document used when the site does not ship its own dev template.
pub const DEFAULT_DEV_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width,initial-scale=1">
    <title>{{ title }}</title>
    {% if description %}<meta name="description" content="{{ description }}">{% endif %}
    {{ head | safe }}
  </head>
  <body>
    <div id="app"></div>
    {% for script in scripts %}<script src="{{ script | safe }}"></script>
    {% endfor %}
  </body>
</html>
"#;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template error: {0}")]
    Tera(#[from] tera::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Values available to the entry document template.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EntryContext {
    pub title: String,
    pub description: String,
    /// Pre-rendered head tags.
    pub head: String,
    pub base: String,
    pub scripts: Vec<String>,
}

pub struct TemplateRenderer {
    tera: Tera,
}

impl TemplateRenderer {
    pub fn builtin() -> Result<Self, TemplateError> {
        Self::from_source(DEFAULT_DEV_TEMPLATE)
    }

    pub fn from_file(path: &Path) -> Result<Self, TemplateError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_source(&source)
    }

    pub fn from_source(source: &str) -> Result<Self, TemplateError> {
        let mut tera = Tera::default();
        tera.add_raw_template(ENTRY_TEMPLATE, source)?;

        Ok(Self { tera })
    }

    /// Render the entry document
    pub fn render(&self, entry: &EntryContext) -> Result<String, TemplateError> {
        let context = Context::from_serialize(entry)?;
        Ok(self.tera.render(ENTRY_TEMPLATE, &context)?)
    }
}
