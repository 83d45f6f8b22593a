//! Canonical route matchers and the specificity order used inside a virtual
//! host.

use std::cmp::Ordering;
use std::fmt;

use crate::domain::{HeaderMatcher, PathMatch, QueryParamMatch, RouteMatch};

/// Validated, normalised form of a [`RouteMatch`]. Header names are
/// lowercased; header and query conditions are sorted so that two matches that
/// differ only in declaration order compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Matcher {
    pub path: PathMatch,
    pub headers: Vec<(String, HeaderMatcher)>,
    pub query_params: Vec<QueryParamMatch>,
}

impl Matcher {
    /// Build from an author's match. Callers validate first; a header with an
    /// ambiguous operator is dropped here.
    pub fn from_route_match(route_match: &RouteMatch) -> Self {
        let mut headers: Vec<(String, HeaderMatcher)> = route_match
            .headers
            .iter()
            .filter_map(|h| h.matcher().map(|m| (h.name.to_ascii_lowercase(), m)))
            .collect();
        headers.sort();
        headers.dedup();

        let mut query_params = route_match.query_params.clone();
        query_params.sort();
        query_params.dedup();

        Self { path: route_match.path.clone().unwrap_or_default(), headers, query_params }
    }

    /// Nest this matcher under an include's conditions.
    pub fn under(&self, parent: &Matcher) -> Self {
        let path = match (&parent.path, &self.path) {
            (PathMatch::Prefix(p), PathMatch::Prefix(c)) => PathMatch::Prefix(join_path(p, c)),
            (PathMatch::Prefix(p), PathMatch::Exact(c)) => PathMatch::Exact(join_path(p, c)),
            (PathMatch::Prefix(p), PathMatch::Regex(c)) => {
                // Regexes match the whole path, so a leading anchor is redundant
                // and would be unmatchable after the prefix.
                let prefix = p.trim_end_matches('/');
                let child = c.strip_prefix('^').unwrap_or(c);
                PathMatch::Regex(format!("{}{}", regex::escape(prefix), child))
            }
            // Includes only carry prefix conditions.
            (_, child) => child.clone(),
        };

        let mut headers = parent.headers.clone();
        headers.extend(self.headers.iter().cloned());
        headers.sort();
        headers.dedup();

        let mut query_params = parent.query_params.clone();
        query_params.extend(self.query_params.iter().cloned());
        query_params.sort();
        query_params.dedup();

        Self { path, headers, query_params }
    }

    /// Stable string identifying the match; two rules conflict when their
    /// keys are equal.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)?;
        for (name, matcher) in &self.headers {
            match matcher {
                HeaderMatcher::Exact(v) => write!(f, " header:{name}={v}")?,
                HeaderMatcher::Contains(v) => write!(f, " header:{name}~{v}")?,
                HeaderMatcher::Regex(v) => write!(f, " header:{name}=~{v}")?,
                HeaderMatcher::Present => write!(f, " header:{name}")?,
            }
        }
        for q in &self.query_params {
            write!(f, " query:{}={}", q.name, q.value)?;
        }
        Ok(())
    }
}

fn join_path(parent: &str, child: &str) -> String {
    let parent = parent.trim_end_matches('/');
    if child == "/" {
        if parent.is_empty() {
            "/".to_string()
        } else {
            parent.to_string()
        }
    } else {
        format!("{}{}", parent, child)
    }
}

/// Most specific first: exact before regex before prefix, longer patterns
/// first, then more header conditions, then more query conditions, then the
/// canonical key.
pub fn specificity_cmp(a: &Matcher, b: &Matcher) -> Ordering {
    a.path
        .rank()
        .cmp(&b.path.rank())
        .then_with(|| b.path.pattern().len().cmp(&a.path.pattern().len()))
        .then_with(|| b.headers.len().cmp(&a.headers.len()))
        .then_with(|| b.query_params.len().cmp(&a.query_params.len()))
        .then_with(|| a.key().cmp(&b.key()))
}
