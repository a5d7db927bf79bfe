//! Web tools: search (Brave API) and page fetch.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::base::{optional_i64, require_string, Tool};

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Redirect cap for fetches.
const MAX_REDIRECTS: usize = 5;
const FETCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);
const DEFAULT_MAX_CHARS: usize = 50_000;
const DEFAULT_RESULT_COUNT: i64 = 5;

// ─────────────────────────────────────────────
// web_search
// ─────────────────────────────────────────────

/// Searches the web through the Brave Search API.
pub struct WebSearchTool {
    api_key: Option<String>,
    client: Client,
}

impl WebSearchTool {
    /// `api_key` falls back to `BRAVE_API_KEY` when unset.
    pub fn new(api_key: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            api_key,
            client: Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .unwrap_or_default(),
        })
    }

    fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("BRAVE_API_KEY").ok())
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web. Returns a numbered list of results with titles, URLs, and snippets."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "count": {
                    "type": "integer",
                    "description": "Number of results (1-10, default 5)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let query = require_string(&params, "query")?;
        let count = optional_i64(&params, "count")
            .unwrap_or(DEFAULT_RESULT_COUNT)
            .clamp(1, 10);

        let api_key = self.resolve_api_key().ok_or_else(|| {
            anyhow::anyhow!("No search API key configured (set BRAVE_API_KEY)")
        })?;

        debug!(query = %query, count, "web search");

        let response = self
            .client
            .get("https://api.search.brave.com/res/v1/web/search")
            .header("X-Subscription-Token", &api_key)
            .query(&[("q", query.as_str()), ("count", &count.to_string())])
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Search request failed: {e}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Search API returned {status}: {body}");
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Unparseable search response: {e}"))?;

        let results = body["web"]["results"].as_array().cloned().unwrap_or_default();
        if results.is_empty() {
            return Ok("No results found.".to_string());
        }

        let lines: Vec<String> = results
            .iter()
            .enumerate()
            .map(|(i, r)| {
                format!(
                    "{}. {}\n   {}\n   {}",
                    i + 1,
                    r["title"].as_str().unwrap_or("(no title)"),
                    r["url"].as_str().unwrap_or(""),
                    r["description"].as_str().unwrap_or("")
                )
            })
            .collect();
        Ok(lines.join("\n\n"))
    }
}

// ─────────────────────────────────────────────
// web_fetch
// ─────────────────────────────────────────────

/// Fetches a page and returns its text, HTML crudely stripped.
pub struct WebFetchTool {
    client: Client,
}

impl WebFetchTool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            client: Client::builder()
                .user_agent(USER_AGENT)
                .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
                .timeout(FETCH_TIMEOUT)
                .build()
                .unwrap_or_default(),
        })
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a web page and return its main text content. Supports HTML and JSON."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The http(s) URL to fetch"
                },
                "max_chars": {
                    "type": "integer",
                    "description": "Maximum characters to return (default 50000)"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let url = require_string(&params, "url")?;
        let max_chars = optional_i64(&params, "max_chars")
            .map(|n| n.max(100) as usize)
            .unwrap_or(DEFAULT_MAX_CHARS);

        if !url.starts_with("http://") && !url.starts_with("https://") {
            anyhow::bail!("Invalid URL: only http and https are supported");
        }

        debug!(url = %url, "fetching page");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Fetch failed: {e}"))?;

        if !response.status().is_success() {
            anyhow::bail!("Fetch returned {}", response.status());
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read body: {e}"))?;

        let text = if content_type.contains("text/html") {
            strip_html(&body)
        } else {
            body
        };
        Ok(aisbot_core::utils::truncate_string(&text, max_chars))
    }
}

/// Minimal HTML-to-text: drops script/style blocks and tags, decodes the
/// handful of entities that actually show up in page text.
fn strip_html(html: &str) -> String {
    let without_blocks = drop_block(&drop_block(html, "script"), "style");

    let mut text = String::with_capacity(without_blocks.len() / 2);
    let mut in_tag = false;
    for c in without_blocks.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                text.push(' ');
            }
            c if !in_tag => text.push(c),
            _ => {}
        }
    }

    let decoded = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");

    // Collapse runs of whitespace, keeping paragraph breaks.
    let mut out = String::with_capacity(decoded.len());
    let mut last_was_space = false;
    let mut newlines = 0;
    for c in decoded.chars() {
        if c == '\n' {
            newlines += 1;
            if newlines <= 2 {
                out.push('\n');
            }
            last_was_space = true;
        } else if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
            newlines = 0;
        }
    }
    out.trim().to_string()
}

/// Remove `<tag …>…</tag>` blocks, case-insensitively. Lowercasing is
/// ASCII-only so byte offsets stay valid in the original string.
fn drop_block(html: &str, tag: &str) -> String {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut lower = html.to_string();
    lower.make_ascii_lowercase();
    let mut out = String::with_capacity(html.len());
    let mut pos = 0;
    while let Some(start) = lower[pos..].find(&open) {
        let start = pos + start;
        out.push_str(&html[pos..start]);
        match lower[start..].find(&close) {
            Some(end) => pos = start + end + close.len(),
            None => {
                pos = html.len();
                break;
            }
        }
    }
    out.push_str(&html[pos..]);
    out
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn args(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn strip_html_drops_tags_and_scripts() {
        let html = "<html><head><script>var x=1;</script><style>p{}</style></head>\
                    <body><h1>Title</h1><p>Hello &amp; goodbye</p></body></html>";
        let text = strip_html(html);
        assert!(text.contains("Title"));
        assert!(text.contains("Hello & goodbye"));
        assert!(!text.contains("var x"));
        assert!(!text.contains("p{}"));
    }

    #[tokio::test]
    async fn fetch_rejects_non_http_schemes() {
        let tool = WebFetchTool::new();
        let result = tool
            .execute(args(&[("url", json!("ftp://example.com/file"))]))
            .await;
        assert!(result.unwrap_err().to_string().contains("Invalid URL"));

        let result = tool
            .execute(args(&[("url", json!("file:///etc/passwd"))]))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn fetch_returns_page_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(
                    "<html><body><p>page body here</p></body></html>",
                    "text/html",
                ),
            )
            .mount(&server)
            .await;

        let tool = WebFetchTool::new();
        let result = tool
            .execute(args(&[("url", json!(format!("{}/page", server.uri())))]))
            .await
            .unwrap();
        assert!(result.contains("page body here"));
        assert!(!result.contains("<p>"));
    }

    #[tokio::test]
    async fn fetch_respects_max_chars() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/plain")
                    .set_body_string("z".repeat(5000)),
            )
            .mount(&server)
            .await;

        let tool = WebFetchTool::new();
        let result = tool
            .execute(args(&[
                ("url", json!(format!("{}/big", server.uri()))),
                ("max_chars", json!(500)),
            ]))
            .await
            .unwrap();
        assert!(result.chars().count() <= 500);
        assert!(result.ends_with("..."));
    }

    #[tokio::test]
    async fn search_without_key_is_an_error() {
        if std::env::var("BRAVE_API_KEY").is_ok() {
            return; // environment already configured; skip
        }
        let tool = WebSearchTool::new(None);
        let result = tool.execute(args(&[("query", json!("rust"))])).await;
        assert!(result.unwrap_err().to_string().contains("API key"));
    }
}
