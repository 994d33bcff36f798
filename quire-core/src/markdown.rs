use std::sync::LazyLock;

use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd, html};
use serde::Serialize;
use syntect::highlighting::ThemeSet;
use syntect::html::highlighted_html_for_string;
use syntect::parsing::SyntaxSet;

// Initialize syntax highlighting resources once
static SYNTAX_SET: LazyLock<SyntaxSet> = LazyLock::new(SyntaxSet::load_defaults_newlines);
static THEME_SET: LazyLock<ThemeSet> = LazyLock::new(ThemeSet::load_defaults);

const HIGHLIGHT_THEME: &str = "base16-ocean.dark";

/// A level 2 or 3 heading, as listed in a page's table of contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Header {
    pub level: u32,
    pub title: String,
    pub slug: String,
}

/// Metadata pulled out of a markdown document without rendering it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageMeta {
    /// Front matter `title`, else the first `#` heading.
    pub title: Option<String>,
    pub frontmatter: serde_json::Value,
    pub headers: Vec<Header>,
}

impl PageMeta {
    pub fn extract(content: &str) -> Result<Self, serde_yaml::Error> {
        let (raw_frontmatter, body) = split_frontmatter(content);
        let frontmatter = match raw_frontmatter {
            Some(raw) => parse_frontmatter(raw)?,
            None => empty_object(),
        };

        let title = frontmatter
            .get("title")
            .and_then(|title| title.as_str())
            .map(str::to_string)
            .or_else(|| first_heading(body));

        Ok(Self {
            title,
            frontmatter,
            headers: extract_headers(body),
        })
    }
}

/// Split a document into its YAML front matter block and the markdown body.
pub fn split_frontmatter(content: &str) -> (Option<&str>, &str) {
    let Some(rest) = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))
    else {
        return (None, content);
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let body = &rest[offset + line.len()..];
            return (Some(&rest[..offset]), body);
        }
        offset += line.len();
    }

    // Unterminated block: treat the whole file as markdown
    (None, content)
}

fn parse_frontmatter(raw: &str) -> Result<serde_json::Value, serde_yaml::Error> {
    if raw.trim().is_empty() {
        return Ok(empty_object());
    }

    let value: serde_json::Value = serde_yaml::from_str(raw)?;
    if value.is_object() {
        Ok(value)
    } else {
        Ok(empty_object())
    }
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Collect level 2 and 3 headings in document order.
pub fn extract_headers(body: &str) -> Vec<Header> {
    headings(body)
        .into_iter()
        .filter(|(level, _)| matches!(level, HeadingLevel::H2 | HeadingLevel::H3))
        .map(|(level, title)| Header {
            level: level as u32,
            slug: slugify(&title),
            title,
        })
        .collect()
}

pub fn first_heading(body: &str) -> Option<String> {
    headings(body)
        .into_iter()
        .find(|(level, _)| *level == HeadingLevel::H1)
        .map(|(_, title)| title)
}

fn headings(body: &str) -> Vec<(HeadingLevel, String)> {
    let parser = Parser::new_ext(body, Options::all());

    let mut current: Option<HeadingLevel> = None;
    let mut text_buf = String::new();
    let mut headings = Vec::new();
    for event in parser {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                current = Some(level);
                text_buf.clear();
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some(level) = current.take() {
                    headings.push((level, text_buf.trim().to_string()));
                }
            }
            Event::Text(text) | Event::Code(text) => {
                if current.is_some() {
                    text_buf.push_str(&text);
                }
            }
            _ => continue,
        }
    }

    headings
}

/// Anchor slug for a heading: lowercase, punctuation and whitespace folded
/// into single dashes.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;

    for ch in text.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(ch.to_lowercase());
        } else {
            pending_dash = true;
        }
    }

    if slug.starts_with(|c: char| c.is_ascii_digit()) {
        slug.insert(0, '_');
    }

    slug
}

/// Render a markdown body to HTML, highlighting fenced code blocks.
pub fn render_markdown(body: &str) -> String {
    let parser = Parser::new_ext(body, Options::all());

    let events: Vec<Event> = parser.collect();
    let mut processed_events = Vec::with_capacity(events.len());
    let mut i = 0;

    while i < events.len() {
        match &events[i] {
            Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(lang))) => {
                // Collect all text events until the end of the code block
                let mut code_content = String::new();
                i += 1;

                while i < events.len() {
                    match &events[i] {
                        Event::End(TagEnd::CodeBlock) => break,
                        Event::Text(text) => code_content.push_str(text),
                        _ => {}
                    }
                    i += 1;
                }

                processed_events.push(Event::Html(highlight(lang, &code_content).into()));
            }
            Event::Start(Tag::Heading { level, id: None, classes, attrs })
                if matches!(level, HeadingLevel::H2 | HeadingLevel::H3) =>
            {
                // Give table-of-contents headings the same anchors as `extract_headers`
                let title = heading_text(&events[i + 1..]);
                processed_events.push(Event::Start(Tag::Heading {
                    level: *level,
                    id: Some(slugify(&title).into()),
                    classes: classes.clone(),
                    attrs: attrs.clone(),
                }));
            }
            event => processed_events.push(event.clone()),
        }
        i += 1;
    }

    let mut out = String::new();
    html::push_html(&mut out, processed_events.into_iter());

    out
}

fn heading_text(events: &[Event]) -> String {
    let mut text = String::new();
    for event in events {
        match event {
            Event::End(TagEnd::Heading(_)) => break,
            Event::Text(t) | Event::Code(t) => text.push_str(t),
            _ => {}
        }
    }
    text.trim().to_string()
}

fn highlight(lang: &str, code: &str) -> String {
    let syntax = SYNTAX_SET.find_syntax_by_token(lang).or_else(|| {
        // Fallback mappings for unsupported languages
        match lang {
            "vue" => SYNTAX_SET.find_syntax_by_name("HTML"),
            "toml" => SYNTAX_SET.find_syntax_by_name("YAML"),
            _ => None,
        }
    });

    let plain = || format!("<pre><code>{}</code></pre>", html_escape::encode_text(code));

    match (syntax, THEME_SET.themes.get(HIGHLIGHT_THEME)) {
        (Some(syntax), Some(theme)) => {
            highlighted_html_for_string(code, &SYNTAX_SET, syntax, theme).unwrap_or_else(|_| plain())
        }
        _ => plain(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_frontmatter() {
        let doc = "---\ntitle: Hello\n---\n# Body\n";
        let (frontmatter, body) = split_frontmatter(doc);
        assert_eq!(frontmatter, Some("title: Hello\n"));
        assert_eq!(body, "# Body\n");
    }

    #[test]
    fn test_split_without_frontmatter() {
        let doc = "# Just markdown\n---\n";
        assert_eq!(split_frontmatter(doc), (None, doc));
    }

    #[test]
    fn test_unterminated_frontmatter_is_body() {
        let doc = "---\ntitle: nope\n";
        assert_eq!(split_frontmatter(doc), (None, doc));
    }

    #[test]
    fn test_extract_meta_prefers_frontmatter_title() {
        let doc = "---\ntitle: From Matter\ntags: [a, b]\n---\n# Heading\n\n## Install\n\n### From `cargo`\n";
        let meta = PageMeta::extract(doc).unwrap();

        assert_eq!(meta.title.as_deref(), Some("From Matter"));
        assert_eq!(meta.frontmatter["tags"][1], "b");
        assert_eq!(
            meta.headers,
            vec![
                Header {
                    level: 2,
                    title: "Install".to_string(),
                    slug: "install".to_string(),
                },
                Header {
                    level: 3,
                    title: "From cargo".to_string(),
                    slug: "from-cargo".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_extract_meta_falls_back_to_heading() {
        let meta = PageMeta::extract("Intro text\n\n# Getting Started\n").unwrap();
        assert_eq!(meta.title.as_deref(), Some("Getting Started"));
        assert!(meta.frontmatter.as_object().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_frontmatter() {
        assert!(PageMeta::extract("---\ntitle: [unclosed\n---\n").is_err());
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  Spaced   out  "), "spaced-out");
        assert_eq!(slugify("2nd try"), "_2nd-try");
    }

    #[test]
    fn test_render_markdown_anchors_and_code() {
        let html = render_markdown("## Usage\n\n```unknown-lang\nlet a = <b>;\n```\n");
        assert!(html.contains(r#"<h2 id="usage">Usage</h2>"#));
        assert!(html.contains("let a = &lt;b&gt;;"));
    }
}
