//! Structural validation of routing objects. An object failing any check is
//! malformed: it is reported Invalid and never reaches the graph.

use regex::Regex;

use crate::domain::{HeadersPolicy, Include, PathMatch, RouteMatch, RouteRule, RoutingObject};
use crate::utils::{is_valid_header_name, is_valid_hostname, Timeout};

/// Validate a routing object, returning a human readable message on failure.
pub fn validate_object(object: &RoutingObject) -> Result<(), String> {
    if object.meta.name.is_empty() {
        return Err("name is required".to_string());
    }

    for hostname in &object.hostnames {
        if !is_valid_hostname(hostname) {
            return Err(format!("invalid hostname {:?}", hostname));
        }
    }

    if let Some(tls) = &object.tls {
        if object.hostnames.is_empty() {
            return Err("tls requires at least one hostname".to_string());
        }
        if tls.secret_name.is_empty() {
            return Err("tls.secret_name is required".to_string());
        }
        if let Some(version) = &tls.minimum_protocol_version {
            if !matches!(version.as_str(), "1.2" | "1.3") {
                return Err(format!("invalid tls.minimum_protocol_version {:?}", version));
            }
        }
    }

    if object.routes.is_empty() && object.includes.is_empty() {
        return Err("object declares no routes or includes".to_string());
    }

    for (index, rule) in object.routes.iter().enumerate() {
        validate_rule(rule).map_err(|e| format!("routes[{}]: {}", index, e))?;
    }

    for (index, include) in object.includes.iter().enumerate() {
        validate_include(include).map_err(|e| format!("includes[{}]: {}", index, e))?;
    }

    Ok(())
}

fn validate_rule(rule: &RouteRule) -> Result<(), String> {
    validate_match(&rule.matches)?;

    if rule.backends.is_empty() {
        return Err("at least one backend is required".to_string());
    }
    for backend in &rule.backends {
        if backend.service.is_empty() {
            return Err("backend service name is required".to_string());
        }
        if backend.port == 0 {
            return Err(format!("backend {} has port 0", backend.service));
        }
    }

    if let Some(policy) = &rule.timeout_policy {
        for value in [&policy.response, &policy.idle].into_iter().flatten() {
            Timeout::parse(value).map_err(|e| format!("timeout_policy: {}", e))?;
        }
    }
    if let Some(retry) = &rule.retry_policy {
        if let Some(value) = &retry.per_try_timeout {
            Timeout::parse(value).map_err(|e| format!("retry_policy: {}", e))?;
        }
    }

    validate_headers_policy(&rule.request_headers)?;
    validate_headers_policy(&rule.response_headers)?;

    if let Some(rewrite) = &rule.prefix_rewrite {
        if !rewrite.starts_with('/') {
            return Err(format!("prefix_rewrite {:?} must start with '/'", rewrite));
        }
    }

    Ok(())
}

fn validate_include(include: &Include) -> Result<(), String> {
    if include.name.is_empty() {
        return Err("include name is required".to_string());
    }
    if let Some(path) = &include.conditions.path {
        if !matches!(path, PathMatch::Prefix(_)) {
            return Err("include conditions only support a prefix path".to_string());
        }
    }
    validate_match(&include.conditions)
}

fn validate_match(route_match: &RouteMatch) -> Result<(), String> {
    match &route_match.path {
        Some(PathMatch::Exact(p)) | Some(PathMatch::Prefix(p)) if !p.starts_with('/') => {
            return Err(format!("path {:?} must start with '/'", p));
        }
        Some(PathMatch::Regex(pattern)) => {
            Regex::new(pattern).map_err(|e| format!("invalid path regex {:?}: {}", pattern, e))?;
        }
        _ => {}
    }

    for header in &route_match.headers {
        if !is_valid_header_name(&header.name) {
            return Err(format!("invalid header name {:?}", header.name));
        }
        if header.matcher().is_none() {
            return Err(format!("header {:?} must declare exactly one condition", header.name));
        }
        if let Some(pattern) = &header.regex {
            Regex::new(pattern)
                .map_err(|e| format!("invalid header regex {:?}: {}", pattern, e))?;
        }
    }

    for param in &route_match.query_params {
        if param.name.is_empty() {
            return Err("query parameter name is required".to_string());
        }
    }

    Ok(())
}

fn validate_headers_policy(policy: &HeadersPolicy) -> Result<(), String> {
    for name in policy.set.keys().chain(policy.remove.iter()) {
        if !is_valid_header_name(name) {
            return Err(format!("invalid header name {:?} in header policy", name));
        }
    }
    Ok(())
}
