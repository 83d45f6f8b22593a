//! Route domain types
//!
//! Input shapes for the rules a routing object declares. These mirror what an
//! author writes in a manifest; the graph builder validates them and turns them
//! into canonical matchers.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Path matching strategy for route selection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathMatch {
    /// Exact path match (e.g. "/api/users" matches only "/api/users")
    Exact(String),

    /// Prefix match (e.g. "/api" matches "/api/users")
    Prefix(String),

    /// RE2 regular expression over the whole path
    Regex(String),
}

impl PathMatch {
    pub fn pattern(&self) -> &str {
        match self {
            PathMatch::Exact(s) | PathMatch::Prefix(s) | PathMatch::Regex(s) => s,
        }
    }

    /// Lower ranks are more specific.
    pub fn rank(&self) -> u8 {
        match self {
            PathMatch::Exact(_) => 0,
            PathMatch::Regex(_) => 1,
            PathMatch::Prefix(_) => 2,
        }
    }
}

impl Default for PathMatch {
    fn default() -> Self {
        PathMatch::Prefix("/".to_string())
    }
}

impl fmt::Display for PathMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathMatch::Exact(s) => write!(f, "exact:{s}"),
            PathMatch::Prefix(s) => write!(f, "prefix:{s}"),
            PathMatch::Regex(s) => write!(f, "regex:{s}"),
        }
    }
}

/// Header condition as written by an author. Exactly one of the operators
/// must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderMatch {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub present: bool,
}

/// Canonical header matcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HeaderMatcher {
    Exact(String),
    Contains(String),
    Regex(String),
    Present,
}

impl HeaderMatch {
    pub fn exact(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), exact: Some(value.into()), ..Default::default() }
    }

    pub fn present(name: impl Into<String>) -> Self {
        Self { name: name.into(), present: true, ..Default::default() }
    }

    /// The single operator this condition declares, or `None` when zero or
    /// several are set.
    pub fn matcher(&self) -> Option<HeaderMatcher> {
        let mut found = Vec::with_capacity(1);
        if let Some(v) = &self.exact {
            found.push(HeaderMatcher::Exact(v.clone()));
        }
        if let Some(v) = &self.contains {
            found.push(HeaderMatcher::Contains(v.clone()));
        }
        if let Some(v) = &self.regex {
            found.push(HeaderMatcher::Regex(v.clone()));
        }
        if self.present {
            found.push(HeaderMatcher::Present);
        }
        if found.len() == 1 {
            found.pop()
        } else {
            None
        }
    }
}

/// Query parameter condition; the value is matched exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryParamMatch {
    pub name: String,
    pub value: String,
}

/// Conditions a request must satisfy for a rule to apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteMatch {
    /// Written as a one-key map, e.g. `path: {prefix: /api}`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "serde_yaml::with::singleton_map"
    )]
    pub path: Option<PathMatch>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<HeaderMatch>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query_params: Vec<QueryParamMatch>,
}

impl RouteMatch {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self { path: Some(PathMatch::Prefix(prefix.into())), ..Default::default() }
    }

    pub fn exact(path: impl Into<String>) -> Self {
        Self { path: Some(PathMatch::Exact(path.into())), ..Default::default() }
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Self { path: Some(PathMatch::Regex(pattern.into())), ..Default::default() }
    }

    pub fn with_header(mut self, header: HeaderMatch) -> Self {
        self.headers.push(header);
        self
    }

    pub fn with_query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.push(QueryParamMatch { name: name.into(), value: value.into() });
        self
    }
}

/// Reference to a backend service port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendRef {
    pub service: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
}

impl BackendRef {
    pub fn new(service: impl Into<String>, port: u16) -> Self {
        Self { service: service.into(), port, weight: None }
    }

    pub fn weighted(mut self, weight: u32) -> Self {
        self.weight = Some(weight);
        self
    }
}

/// Upstream load balancing strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LoadBalancerStrategy {
    #[default]
    RoundRobin,
    LeastRequest,
    Random,
}

impl LoadBalancerStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadBalancerStrategy::RoundRobin => "RoundRobin",
            LoadBalancerStrategy::LeastRequest => "LeastRequest",
            LoadBalancerStrategy::Random => "Random",
        }
    }
}

/// Timeout strings: `infinity`, or durations such as `30s`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default)]
    pub count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_try_timeout: Option<String>,
}

/// Header mutations applied to a request or response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadersPolicy {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub set: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<String>,
}

impl HeadersPolicy {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.remove.is_empty()
    }
}

/// One rule of a routing object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    #[serde(default, rename = "match")]
    pub matches: RouteMatch,
    #[serde(default)]
    pub backends: Vec<BackendRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_policy: Option<TimeoutPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default, skip_serializing_if = "HeadersPolicy::is_empty")]
    pub request_headers: HeadersPolicy,
    #[serde(default, skip_serializing_if = "HeadersPolicy::is_empty")]
    pub response_headers: HeadersPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_rewrite: Option<String>,
    #[serde(default)]
    pub load_balancer: LoadBalancerStrategy,
}

impl RouteRule {
    pub fn new(matches: RouteMatch, backends: Vec<BackendRef>) -> Self {
        Self { matches, backends, ..Default::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_match_requires_exactly_one_operator() {
        assert_eq!(HeaderMatch::exact("x", "1").matcher(), Some(HeaderMatcher::Exact("1".into())));
        assert_eq!(HeaderMatch::present("x").matcher(), Some(HeaderMatcher::Present));

        let mut both = HeaderMatch::exact("x", "1");
        both.present = true;
        assert_eq!(both.matcher(), None);
        assert_eq!(HeaderMatch { name: "x".into(), ..Default::default() }.matcher(), None);
    }

    #[test]
    fn rule_deserializes_from_yaml() {
        let yaml = r#"
match:
  path:
    prefix: /api
  headers:
    - name: x-canary
      present: true
  query_params:
    - name: debug
      value: "1"
backends:
  - service: api
    port: 8080
    weight: 90
timeout_policy:
  response: 30s
load_balancer: LeastRequest
"#;
        let rule: RouteRule = serde_yaml::from_str(yaml).expect("rule parses");
        assert_eq!(rule.matches.path, Some(PathMatch::Prefix("/api".into())));
        assert_eq!(rule.matches.headers[0].matcher(), Some(HeaderMatcher::Present));
        assert_eq!(rule.backends[0].weight, Some(90));
        assert_eq!(rule.load_balancer, LoadBalancerStrategy::LeastRequest);
    }

    #[test]
    fn path_match_accepts_each_map_form() {
        for (yaml, expected) in [
            ("path: {exact: /login}", PathMatch::Exact("/login".into())),
            ("path: {prefix: /}", PathMatch::Prefix("/".into())),
            ("path:\n  regex: \"^/v[0-9]+/\"", PathMatch::Regex("^/v[0-9]+/".into())),
        ] {
            let matches: RouteMatch = serde_yaml::from_str(yaml).expect("match parses");
            assert_eq!(matches.path, Some(expected));
        }

        let unset: RouteMatch = serde_yaml::from_str("headers: []").unwrap();
        assert_eq!(unset.path, None);
    }

    #[test]
    fn path_match_round_trips_through_json() {
        let matches = RouteMatch::prefix("/api");
        let json = serde_json::to_string(&matches).unwrap();
        assert_eq!(json, r#"{"path":{"prefix":"/api"}}"#);
        assert_eq!(serde_json::from_str::<RouteMatch>(&json).unwrap(), matches);
    }
}
