//! Endpoint classification.
//!
//! # Responsibilities
//! - Decide whether a failed request is in scope for interception
//! - Decide whether a failure is an auth failure worth a refresh
//!
//! # Design Decisions
//! - Patterns match on whole path segments, anywhere in the path:
//!   `/refresh` matches `/auth/refresh` but `/me` does not match `/messages`
//! - The root pattern `/` matches only the root path
//! - Query strings are ignored

use crate::config::EndpointConfig;
use crate::http::request::ApiRequest;
use crate::http::response::TransportError;

/// A single endpoint pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<String>,
}

impl PathPattern {
    pub fn new(pattern: &str) -> Self {
        Self {
            segments: split_segments(pattern).map(str::to_string).collect(),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        let route = path.split(['?', '#']).next().unwrap_or("");
        let path_segments: Vec<&str> = split_segments(route).collect();

        if self.segments.is_empty() {
            return path_segments.is_empty();
        }
        if self.segments.len() > path_segments.len() {
            return false;
        }
        path_segments
            .windows(self.segments.len())
            .any(|window| window.iter().zip(&self.segments).all(|(a, b)| *a == b))
    }
}

fn compile(patterns: &[String]) -> Vec<PathPattern> {
    patterns.iter().map(|p| PathPattern::new(p)).collect()
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Skip, public and auth-exempt endpoint lists.
#[derive(Debug, Clone)]
pub struct EndpointRules {
    skip: Vec<PathPattern>,
    public: Vec<PathPattern>,
    auth_exempt: Vec<PathPattern>,
}

impl EndpointRules {
    pub fn from_config(config: &EndpointConfig) -> Self {
        Self {
            skip: compile(&config.skip),
            public: compile(&config.public),
            auth_exempt: compile(&config.auth_exempt),
        }
    }

    /// False for credential-lifecycle and public endpoints.
    pub fn should_intercept(&self, path: &str) -> bool {
        !self.public.iter().any(|p| p.matches(path)) && !self.skip.iter().any(|p| p.matches(path))
    }

    /// A 401 that did not come from the login flow itself.
    pub fn is_auth_failure(&self, request: &ApiRequest, error: &TransportError) -> bool {
        error.is_auth() && !self.auth_exempt.iter().any(|p| p.matches(&request.path))
    }
}

impl Default for EndpointRules {
    fn default() -> Self {
        Self::from_config(&EndpointConfig::default())
    }
}
