//! Proxy and mock rule configuration, plus request-to-rule matching.
//!
//! Matching is deliberately plain: a rule applies when it is enabled, belongs
//! to the proxy that received the request, has the same method (ignoring
//! case) and the same path (ignoring any query string). The first such rule
//! in list order wins. There is no wildcard or `:param` support.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One HTTP listener: a local port and the default upstream it forwards to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    pub id: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MockMode {
    /// Expand a Mock.js-style template.
    #[default]
    Mock,
    /// Serve the configured data as-is.
    Custom,
    /// Serve a local file.
    File,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileDisposition {
    #[default]
    Inline,
    Attachment,
}

impl FileDisposition {
    pub fn as_str(self) -> &'static str {
        match self {
            FileDisposition::Inline => "inline",
            FileDisposition::Attachment => "attachment",
        }
    }
}

/// A method + path rule scoped to one proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockRule {
    pub id: String,
    pub proxy_id: String,
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: MockMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Value>,
    /// External JSON file, relative to the mock directory or workspace root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_path: Option<String>,
    /// Run the generator over the contents of `data_path` (mock mode only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_disposition: Option<FileDisposition>,
    /// Upstream override used when the rule has nothing to serve itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_content_type() -> String {
    "application/json".to_string()
}

fn default_true() -> bool {
    true
}

impl MockRule {
    /// An enabled mock-mode rule with no data yet.
    pub fn new(
        id: impl Into<String>,
        proxy_id: impl Into<String>,
        method: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            proxy_id: proxy_id.into(),
            method: method.into(),
            url: url.into(),
            content_type: default_content_type(),
            enabled: true,
            mode: MockMode::Mock,
            data: None,
            template: None,
            data_path: None,
            generate: None,
            file_path: None,
            file_disposition: None,
            target: None,
        }
    }

    /// Decide where this rule's response comes from.
    pub fn response_source(&self) -> ResponseSource {
        let data_path = non_empty(self.data_path.as_deref());
        match self.mode {
            MockMode::File => match non_empty(self.file_path.as_deref()) {
                Some(path) => ResponseSource::LocalFile {
                    path: path.to_string(),
                    disposition: self.file_disposition.unwrap_or_default(),
                },
                None => self.forward_or_none(),
            },
            MockMode::Custom => match (data_path, &self.data) {
                (Some(path), _) => ResponseSource::JsonFile {
                    path: path.to_string(),
                    generate: false,
                },
                (None, Some(data)) => ResponseSource::Static(data.clone()),
                (None, None) => self.forward_or_none(),
            },
            MockMode::Mock => match (data_path, self.template.as_ref().or(self.data.as_ref())) {
                (Some(path), _) => ResponseSource::JsonFile {
                    path: path.to_string(),
                    generate: self.generate.unwrap_or(true),
                },
                (None, Some(template)) => ResponseSource::Template(template.clone()),
                (None, None) => self.forward_or_none(),
            },
        }
    }

    fn forward_or_none(&self) -> ResponseSource {
        match non_empty(self.target.as_deref()) {
            Some(target) => ResponseSource::Forward {
                target: target.to_string(),
            },
            None => ResponseSource::None,
        }
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// Where a matched rule's response comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseSource {
    /// Inline data served verbatim.
    Static(Value),
    /// Inline template expanded by the generator.
    Template(Value),
    /// External JSON file, optionally expanded by the generator.
    JsonFile { path: String, generate: bool },
    /// Local file passthrough.
    LocalFile {
        path: String,
        disposition: FileDisposition,
    },
    /// No mock data, but the rule overrides the upstream target.
    Forward { target: String },
    /// Nothing to serve; use the listener's default upstream.
    None,
}

/// Persisted proxy/mock configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub proxy: Vec<ProxyConfig>,
    #[serde(default)]
    pub mock: Vec<MockRule>,
    /// Directory relative mock data paths resolve against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock_dir: Option<String>,
}

impl Settings {
    pub fn proxy(&self, id: &str) -> Option<&ProxyConfig> {
        self.proxy.iter().find(|p| p.id == id)
    }

    pub fn rules_for<'a>(&'a self, proxy_id: &'a str) -> impl Iterator<Item = &'a MockRule> + 'a {
        self.mock.iter().filter(move |r| r.proxy_id == proxy_id)
    }
}

/// Path component of a request target, without query string or fragment.
pub fn normalize_request_path(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    &path[..end]
}

/// First enabled rule of `proxy_id` matching `method` and `path`.
pub fn find_rule<'a>(
    rules: &'a [MockRule],
    proxy_id: &str,
    method: &str,
    path: &str,
) -> Option<&'a MockRule> {
    let path = normalize_request_path(path);
    rules
        .iter()
        .filter(|r| r.enabled && r.proxy_id == proxy_id)
        .find(|r| {
            r.method.eq_ignore_ascii_case(method) && normalize_request_path(r.url.trim()) == path
        })
}

/// Normalize an upstream target.
///
/// Empty targets yield `None`. A target without an `http://` or `https://`
/// scheme gets `http://` prepended. Trailing slashes are dropped so request
/// paths can be appended directly.
pub fn normalize_target(target: &str) -> Option<String> {
    let target = target.trim();
    if target.is_empty() {
        return None;
    }
    let lower = target.to_ascii_lowercase();
    let mut url = if lower.starts_with("http://") || lower.starts_with("https://") {
        target.to_string()
    } else {
        format!("http://{target}")
    };
    while url.ends_with('/') && !url.ends_with("://") {
        url.pop();
    }
    Some(url)
}

/// Inline rule data, decoding JSON that was stored as a string.
///
/// Configuration UIs often save templates as raw text; a string that looks
/// like a JSON object or array is parsed, anything else is returned as-is.
pub fn inline_json(value: &Value) -> Result<Value, serde_json::Error> {
    match value {
        Value::String(s) if s.trim_start().starts_with(['{', '[']) => serde_json::from_str(s),
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(id: &str, method: &str, url: &str) -> MockRule {
        MockRule::new(id, "p1", method, url)
    }

    #[test]
    fn test_normalize_request_path() {
        assert_eq!(normalize_request_path("/api/user?id=1"), "/api/user");
        assert_eq!(normalize_request_path("/api/user#top"), "/api/user");
        assert_eq!(normalize_request_path("/api/user"), "/api/user");
    }

    #[test]
    fn test_query_string_is_ignored() {
        let rules = vec![rule("a", "GET", "/api/user")];
        assert!(find_rule(&rules, "p1", "GET", "/api/user?id=1").is_some());
    }

    #[test]
    fn test_rule_url_query_noise_is_ignored() {
        let rules = vec![rule("a", "GET", "/api/user?debug=true")];
        assert!(find_rule(&rules, "p1", "GET", "/api/user").is_some());
    }

    #[test]
    fn test_first_match_wins() {
        let rules = vec![rule("first", "GET", "/x"), rule("second", "GET", "/x")];
        for _ in 0..5 {
            assert_eq!(find_rule(&rules, "p1", "GET", "/x").unwrap().id, "first");
        }
    }

    #[test]
    fn test_disabled_and_foreign_rules_skipped() {
        let mut disabled = rule("disabled", "GET", "/x");
        disabled.enabled = false;
        let mut foreign = rule("foreign", "GET", "/x");
        foreign.proxy_id = "p2".to_string();
        let rules = vec![disabled, foreign, rule("ok", "GET", "/x")];
        assert_eq!(find_rule(&rules, "p1", "GET", "/x").unwrap().id, "ok");
    }

    #[test]
    fn test_method_case_insensitive_path_exact() {
        let rules = vec![rule("a", "post", "/api/items")];
        assert!(find_rule(&rules, "p1", "POST", "/api/items").is_some());
        assert!(find_rule(&rules, "p1", "GET", "/api/items").is_none());
        assert!(find_rule(&rules, "p1", "POST", "/api/items/1").is_none());
        assert!(find_rule(&rules, "p1", "POST", "/api/Items").is_none());
    }

    #[test]
    fn test_normalize_target() {
        assert_eq!(
            normalize_target("localhost:4000").as_deref(),
            Some("http://localhost:4000")
        );
        assert_eq!(
            normalize_target(" https://api.example.com/ ").as_deref(),
            Some("https://api.example.com")
        );
        assert_eq!(
            normalize_target("HTTP://127.0.0.1:9000/base/").as_deref(),
            Some("HTTP://127.0.0.1:9000/base")
        );
        assert_eq!(normalize_target("   "), None);
        assert_eq!(normalize_target(""), None);
    }

    #[test]
    fn test_response_source_per_mode() {
        let mut r = rule("a", "GET", "/x");
        assert_eq!(r.response_source(), ResponseSource::None);

        r.template = Some(json!({"name": "@cname"}));
        assert_eq!(
            r.response_source(),
            ResponseSource::Template(json!({"name": "@cname"}))
        );

        r.data_path = Some("users.json".to_string());
        assert_eq!(
            r.response_source(),
            ResponseSource::JsonFile {
                path: "users.json".to_string(),
                generate: true
            }
        );

        r.mode = MockMode::Custom;
        assert_eq!(
            r.response_source(),
            ResponseSource::JsonFile {
                path: "users.json".to_string(),
                generate: false
            }
        );

        r.data_path = None;
        r.data = Some(json!([1, 2]));
        assert_eq!(r.response_source(), ResponseSource::Static(json!([1, 2])));

        r.mode = MockMode::File;
        r.file_path = Some("report.pdf".to_string());
        r.file_disposition = Some(FileDisposition::Attachment);
        assert_eq!(
            r.response_source(),
            ResponseSource::LocalFile {
                path: "report.pdf".to_string(),
                disposition: FileDisposition::Attachment
            }
        );
    }

    #[test]
    fn test_rule_without_data_forwards_to_own_target() {
        let mut r = rule("a", "GET", "/x");
        r.target = Some("staging:8080".to_string());
        assert_eq!(
            r.response_source(),
            ResponseSource::Forward {
                target: "staging:8080".to_string()
            }
        );
    }

    #[test]
    fn test_inline_json_decodes_strings() {
        assert_eq!(inline_json(&json!("{\"a\":1}")).unwrap(), json!({"a": 1}));
        assert_eq!(inline_json(&json!("plain")).unwrap(), json!("plain"));
        assert!(inline_json(&json!("{broken")).is_err());
    }

    #[test]
    fn test_settings_deserialize_with_defaults() {
        let json = r#"{
            "proxy": [{"id": "p1", "port": 8080, "target": "localhost:3000", "enabled": true}],
            "mock": [{"id": "m1", "proxyId": "p1", "url": "/api/user", "mode": "custom", "data": {"ok": true}}]
        }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        let rule = &settings.mock[0];
        assert_eq!(rule.method, "GET");
        assert_eq!(rule.content_type, "application/json");
        assert!(rule.enabled);
        assert_eq!(rule.mode, MockMode::Custom);
        assert_eq!(settings.proxy("p1").map(|p| p.port), Some(8080));
        assert_eq!(settings.rules_for("p1").count(), 1);
    }
}
