//! Rate limit rules configuration and matching.
//!
//! Rules are declared as `METHOD:PATH` endpoint patterns with a period and a
//! limit. `METHOD` is a method name (case-insensitive) or `*` for any method.
//! `PATH` is an exact path or a prefix ending in a single `*`; paths compare
//! ASCII case-insensitively. The bare pattern `*` matches every request.
//! Rules are evaluated in declaration order and the first match wins, so a
//! rule that is fully covered by an earlier one is never reached.

use axum::http::{HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::counter::Period;
use crate::error::{ContagemError, Result};

/// Default body of the quota-exceeded response.
const DEFAULT_QUOTA_MESSAGE: &str = "API calls quota exceeded!";
/// Default content type of the quota-exceeded response.
const DEFAULT_QUOTA_CONTENT_TYPE: &str = "text/plain";

/// A rate limit rule as written in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    /// Endpoint pattern, `METHOD:PATH`
    pub endpoint: String,
    /// Window length, e.g. `1m`
    pub period: String,
    /// Requests allowed per window
    pub limit: u64,
    /// Response sent once the limit is exceeded
    #[serde(default)]
    pub quota_exceeded_response: QuotaExceededConfig,
}

/// The quota-exceeded response as written in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuotaExceededConfig {
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default = "default_content")]
    pub content: String,
    /// Overrides the service-wide status code when set
    #[serde(default)]
    pub status_code: Option<u16>,
}

impl Default for QuotaExceededConfig {
    fn default() -> Self {
        Self {
            content_type: default_content_type(),
            content: default_content(),
            status_code: None,
        }
    }
}

fn default_content_type() -> String {
    DEFAULT_QUOTA_CONTENT_TYPE.to_string()
}

fn default_content() -> String {
    DEFAULT_QUOTA_MESSAGE.to_string()
}

/// A file holding a list of rules, either bare or under a `rules` key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RulesFile {
    pub rules: Vec<RuleConfig>,
}

impl RulesFile {
    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let fail = |e: serde_yaml::Error| {
            ContagemError::Config(format!("Failed to parse rate limit rules: {}", e))
        };

        // Pick the layout from the document's shape
        let document: serde_yaml::Value = serde_yaml::from_str(yaml).map_err(fail)?;
        if document.is_sequence() {
            let rules = serde_yaml::from_value(document).map_err(fail)?;
            return Ok(RulesFile { rules });
        }

        serde_yaml::from_value(document).map_err(fail)
    }
}

impl RuleConfig {
    pub fn new(endpoint: &str, period: &str, limit: u64) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            period: period.to_string(),
            limit,
            quota_exceeded_response: QuotaExceededConfig::default(),
        }
    }

    /// Set the body of the quota-exceeded response.
    pub fn with_quota_message(mut self, content_type: &str, content: &str) -> Self {
        self.quota_exceeded_response.content_type = content_type.to_string();
        self.quota_exceeded_response.content = content.to_string();
        self
    }

    /// Validate the rule. `index` is its position in the rule list and only
    /// used to point at the offending rule in error messages.
    pub fn compile(&self, index: usize, default_status: u16) -> Result<RateLimitRule> {
        let fail = |reason: String| {
            ContagemError::Config(format!(
                "rule #{} ('{}'): {}",
                index, self.endpoint, reason
            ))
        };

        let endpoint: EndpointPattern = self.endpoint.parse().map_err(fail)?;
        let period: Period = self.period.parse().map_err(fail)?;
        if self.limit == 0 {
            return Err(fail("limit must be greater than zero".to_string()));
        }

        let response = &self.quota_exceeded_response;
        let status_code = response.status_code.unwrap_or(default_status);
        let status = StatusCode::from_u16(status_code)
            .map_err(|_| fail(format!("invalid status code {}", status_code)))?;
        let content_type = HeaderValue::from_str(&response.content_type)
            .map_err(|_| fail(format!("invalid content type '{}'", response.content_type)))?;

        Ok(RateLimitRule {
            endpoint,
            period,
            limit: self.limit,
            quota_exceeded: QuotaExceededResponse {
                status,
                content_type,
                body: response.content.clone(),
            },
        })
    }
}

/// The response rendered for a request over its quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaExceededResponse {
    pub status: StatusCode,
    pub content_type: HeaderValue,
    pub body: String,
}

/// A validated rate limit rule.
#[derive(Debug, Clone)]
pub struct RateLimitRule {
    endpoint: EndpointPattern,
    period: Period,
    limit: u64,
    quota_exceeded: QuotaExceededResponse,
}

impl RateLimitRule {
    pub fn endpoint(&self) -> &EndpointPattern {
        &self.endpoint
    }

    pub fn period(&self) -> Period {
        self.period
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn quota_exceeded_response(&self) -> &QuotaExceededResponse {
        &self.quota_exceeded
    }
}

/// Path half of an endpoint pattern. Stored lowercased.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PathPattern {
    Exact(String),
    Prefix(String),
}

/// A parsed `METHOD:PATH` pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointPattern {
    /// `None` matches any method
    method: Option<Method>,
    path: PathPattern,
}

impl EndpointPattern {
    /// Whether a request with this method and path falls under the pattern.
    pub fn matches(&self, method: &Method, path: &str) -> bool {
        if let Some(ref expected) = self.method {
            if expected != method {
                return false;
            }
        }

        match &self.path {
            PathPattern::Exact(exact) => path.eq_ignore_ascii_case(exact),
            PathPattern::Prefix(prefix) => path
                .as_bytes()
                .get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix.as_bytes())),
        }
    }
}

impl std::str::FromStr for EndpointPattern {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let (method, path) = match s.split_once(':') {
            Some(parts) => parts,
            None if s == "*" => ("*", "*"),
            None => return Err(format!("endpoint '{}' must have the form METHOD:PATH", s)),
        };

        let method = match method.trim() {
            "*" => None,
            "" => return Err("endpoint method is empty".to_string()),
            name => Some(
                Method::from_bytes(name.to_ascii_uppercase().as_bytes())
                    .map_err(|_| format!("invalid method '{}'", name))?,
            ),
        };

        let path = path.trim().to_ascii_lowercase();
        let path = if path == "*" {
            PathPattern::Prefix(String::new())
        } else if !path.starts_with('/') {
            return Err(format!("path '{}' must start with '/'", path));
        } else if let Some(prefix) = path.strip_suffix('*') {
            if prefix.contains('*') {
                return Err(format!("path '{}' may only end with a single '*'", path));
            }
            PathPattern::Prefix(prefix.to_string())
        } else if path.contains('*') {
            return Err(format!("path '{}' may only use '*' as its last character", path));
        } else {
            PathPattern::Exact(path)
        };

        Ok(Self { method, path })
    }
}

impl fmt::Display for EndpointPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.method {
            Some(method) => write!(f, "{}:", method)?,
            None => f.write_str("*:")?,
        }
        match &self.path {
            PathPattern::Exact(path) => f.write_str(path),
            PathPattern::Prefix(prefix) => write!(f, "{}*", prefix),
        }
    }
}

/// Finds the rule that governs a request.
#[derive(Debug, Clone, Default)]
pub struct RuleMatcher {
    rules: Vec<Arc<RateLimitRule>>,
}

impl RuleMatcher {
    pub fn new(rules: Vec<Arc<RateLimitRule>>) -> Self {
        Self { rules }
    }

    /// Find the first rule, in declaration order, matching the request.
    pub fn find(&self, method: &Method, path: &str) -> Option<&Arc<RateLimitRule>> {
        self.rules
            .iter()
            .find(|rule| rule.endpoint.matches(method, path))
    }

    pub fn rules(&self) -> &[Arc<RateLimitRule>] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pattern(s: &str) -> EndpointPattern {
        s.parse().unwrap()
    }

    fn matcher(rules: &[(&str, u64)]) -> RuleMatcher {
        RuleMatcher::new(
            rules
                .iter()
                .enumerate()
                .map(|(i, (endpoint, limit))| {
                    Arc::new(RuleConfig::new(endpoint, "1m", *limit).compile(i, 429).unwrap())
                })
                .collect(),
        )
    }

    #[test]
    fn test_parse_rules_yaml() {
        let yaml = r#"
rules:
  - endpoint: "GET:/contador"
    period: 1m
    limit: 3
    quota_exceeded_response:
      content_type: application/text
      content: "Quota exceeded"
"#;
        let file = RulesFile::from_yaml(yaml).unwrap();
        assert_eq!(file.rules.len(), 1);

        let rule = file.rules[0].compile(0, 429).unwrap();
        assert_eq!(rule.limit(), 3);
        assert_eq!(rule.period().duration(), Duration::from_secs(60));
        assert_eq!(rule.quota_exceeded_response().body, "Quota exceeded");
        assert_eq!(rule.quota_exceeded_response().content_type, "application/text");
        assert_eq!(rule.quota_exceeded_response().status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_parse_bare_rule_list() {
        let yaml = r#"
- endpoint: "*:/api/*"
  period: 1h
  limit: 1000
- endpoint: "POST:/login"
  period: 5m
  limit: 5
  quota_exceeded_response:
    status_code: 503
"#;
        let file = RulesFile::from_yaml(yaml).unwrap();
        assert_eq!(file.rules.len(), 2);

        let login = file.rules[1].compile(1, 429).unwrap();
        assert_eq!(login.quota_exceeded_response().status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(login.quota_exceeded_response().body, DEFAULT_QUOTA_MESSAGE);
    }

    #[test]
    fn test_parse_rules_yaml_invalid() {
        let result = RulesFile::from_yaml("rules: 12");
        assert!(matches!(result, Err(ContagemError::Config(_))));
    }

    #[test]
    fn test_parse_rules_yaml_rejects_unknown_keys() {
        let misnamed_list = "rulez:\n  - endpoint: \"GET:/contador\"\n    period: 1m\n    limit: 3\n";
        match RulesFile::from_yaml(misnamed_list) {
            Err(ContagemError::Config(msg)) => assert!(msg.contains("rulez")),
            other => panic!("expected config error, got {:?}", other),
        }

        let misnamed_response = r#"
- endpoint: "GET:/contador"
  period: 1m
  limit: 3
  quota_exceded_response:
    content: custom
"#;
        match RulesFile::from_yaml(misnamed_response) {
            Err(ContagemError::Config(msg)) => assert!(msg.contains("quota_exceded_response")),
            other => panic!("expected config error, got {:?}", other),
        }

        let misnamed_field = r#"
rules:
  - endpoint: "GET:/contador"
    period: 1m
    limit: 3
    quota_exceeded_response:
      contnet: custom
"#;
        assert!(matches!(
            RulesFile::from_yaml(misnamed_field),
            Err(ContagemError::Config(_))
        ));
    }

    #[test]
    fn test_compile_rejects_bad_rules() {
        let zero = RuleConfig::new("GET:/contador", "1m", 0).compile(2, 429);
        match zero {
            Err(ContagemError::Config(msg)) => {
                assert!(msg.contains("rule #2"));
                assert!(msg.contains("limit"));
            }
            other => panic!("expected config error, got {:?}", other),
        }

        assert!(RuleConfig::new("GET:/contador", "soon", 1).compile(0, 429).is_err());
        assert!(RuleConfig::new("/contador", "1m", 1).compile(0, 429).is_err());
        assert!(RuleConfig::new("GET:contador", "1m", 1).compile(0, 429).is_err());
        assert!(RuleConfig::new("GET:/a*/b", "1m", 1).compile(0, 429).is_err());
        assert!(RuleConfig::new("GET:/a**", "1m", 1).compile(0, 429).is_err());
        assert!(RuleConfig::new("GE T:/a", "1m", 1).compile(0, 429).is_err());
        assert!(RuleConfig::new("GET:/a", "1m", 1).compile(0, 1000).is_err());

        let bad_type = RuleConfig::new("GET:/a", "1m", 1).with_quota_message("text/\nplain", "x");
        assert!(bad_type.compile(0, 429).is_err());
    }

    #[test]
    fn test_exact_pattern() {
        let p = pattern("GET:/contador");
        assert!(p.matches(&Method::GET, "/contador"));
        assert!(p.matches(&Method::GET, "/Contador"));
        assert!(!p.matches(&Method::GET, "/contador/1"));
        assert!(!p.matches(&Method::GET, "/contado"));
        assert!(!p.matches(&Method::POST, "/contador"));
    }

    #[test]
    fn test_wildcard_path_pattern() {
        let p = pattern("get:/api/*");
        assert!(p.matches(&Method::GET, "/api/"));
        assert!(p.matches(&Method::GET, "/api/contador"));
        assert!(p.matches(&Method::GET, "/API/v2/items"));
        assert!(!p.matches(&Method::GET, "/api"));
        assert!(!p.matches(&Method::DELETE, "/api/contador"));
    }

    #[test]
    fn test_wildcard_method_pattern() {
        let p = pattern("*:/contador");
        assert!(p.matches(&Method::GET, "/contador"));
        assert!(p.matches(&Method::PUT, "/contador"));

        let all = pattern("*");
        assert!(all.matches(&Method::OPTIONS, "/anything/at/all"));
        assert_eq!(all.to_string(), "*:*");
    }

    #[test]
    fn test_pattern_display_is_canonical() {
        assert_eq!(pattern(" get:/Contador ").to_string(), "GET:/contador");
        assert_eq!(pattern("*:/api/*").to_string(), "*:/api/*");
    }

    #[test]
    fn test_first_match_wins() {
        let matcher = matcher(&[("GET:/contador", 3), ("GET:/*", 100), ("GET:/contador", 50)]);

        let rule = matcher.find(&Method::GET, "/contador").unwrap();
        assert_eq!(rule.limit(), 3);

        let rule = matcher.find(&Method::GET, "/outro").unwrap();
        assert_eq!(rule.limit(), 100);
    }

    #[test]
    fn test_declaration_order_shadows_later_rules() {
        let matcher = matcher(&[("GET:/*", 100), ("GET:/contador", 3)]);

        let rule = matcher.find(&Method::GET, "/contador").unwrap();
        assert_eq!(rule.limit(), 100);
    }

    #[test]
    fn test_no_match() {
        let matcher = matcher(&[("GET:/contador", 3)]);

        assert!(matcher.find(&Method::POST, "/contador").is_none());
        assert!(matcher.find(&Method::GET, "/swagger/v1/swagger.json").is_none());
        assert!(!matcher.is_empty());
        assert!(RuleMatcher::default().is_empty());
        assert!(RuleMatcher::default().find(&Method::GET, "/contador").is_none());
    }
}
