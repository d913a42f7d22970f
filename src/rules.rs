// src/rules.rs

//! Path-based rule registry for request pipelines.
//!
//! The registry is a plain value owned by the routing layer; registering a
//! rule takes `&mut RuleRegistry`, nothing is looked up globally.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tracing::debug;

use crate::algorithms::RateLimitResult;
use crate::error::{RateLimiterError, Result};
use crate::limiter::RateLimiter;

/// One `limit` per `window` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub limit: u64,
    pub window: Duration,
}

impl Quota {
    /// Parses `"5/60;10/300"`: `;`-separated `limit/window_seconds` pairs
    pub fn parse_list(spec: &str) -> Result<Vec<Quota>> {
        let quotas = spec
            .split(';')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Quota::parse_one)
            .collect::<Result<Vec<_>>>()?;

        if quotas.is_empty() {
            return Err(RateLimiterError::Configuration(format!(
                "empty quota spec: {:?}",
                spec
            )));
        }
        Ok(quotas)
    }

    fn parse_one(part: &str) -> Result<Quota> {
        let invalid = || RateLimiterError::Configuration(format!("invalid quota: {:?}", part));

        let (limit, window) = part.split_once('/').ok_or_else(invalid)?;
        let limit: u64 = limit.trim().parse().map_err(|_| invalid())?;
        let secs: u64 = window.trim().parse().map_err(|_| invalid())?;
        if limit == 0 || secs == 0 {
            return Err(invalid());
        }

        Ok(Quota {
            limit,
            window: Duration::from_secs(secs),
        })
    }
}

/// How a rule's path is matched
#[derive(Clone)]
pub enum PathPattern {
    Exact(String),
    /// `*` matches any run of characters, anchored at both ends
    Glob { source: String, regex: Regex },
    /// Patterns starting with `^` are used as regular expressions verbatim
    Regex(Regex),
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        let compile = |source: &str| {
            Regex::new(source).map_err(|e| {
                RateLimiterError::Configuration(format!("invalid path pattern {:?}: {}", pattern, e))
            })
        };

        if pattern.starts_with('^') {
            Ok(PathPattern::Regex(compile(pattern)?))
        } else if pattern.contains('*') {
            let body = pattern
                .split('*')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".*");
            Ok(PathPattern::Glob {
                source: pattern.to_string(),
                regex: compile(&format!("^{}$", body))?,
            })
        } else {
            Ok(PathPattern::Exact(pattern.to_string()))
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Exact(exact) => exact == path,
            PathPattern::Glob { regex, .. } | PathPattern::Regex(regex) => regex.is_match(path),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PathPattern::Exact(exact) => exact,
            PathPattern::Glob { source, .. } => source,
            PathPattern::Regex(regex) => regex.as_str(),
        }
    }
}

impl fmt::Debug for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PathPattern").field(&self.as_str()).finish()
    }
}

/// Derives the subject a rule limits from the caller's key, e.g. a user id
/// looked up from a client address
pub type KeyFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// A path pattern and the quotas enforced on it
#[derive(Clone)]
pub struct Rule {
    pub pattern: PathPattern,
    pub quotas: Vec<Quota>,
    /// Without one the caller's key is the subject
    pub key_fn: Option<KeyFn>,
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("pattern", &self.pattern)
            .field("quotas", &self.quotas)
            .field("key_fn", &self.key_fn.is_some())
            .finish()
    }
}

impl Rule {
    /// Subject the quotas are counted against
    pub fn subject(&self, key: &str) -> String {
        match &self.key_fn {
            Some(derive) => derive(key),
            None => key.to_string(),
        }
    }

    /// Storage key for one quota of this rule
    fn quota_key(&self, key: &str, quota: &Quota) -> String {
        format!(
            "{}|{}|{}/{}",
            key,
            self.pattern.as_str(),
            quota.limit,
            quota.window.as_secs()
        )
    }
}

/// Ordered rules; the first registered match wins
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    rules: Vec<Rule>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one quota for `pattern`, joining an existing rule with the same pattern
    pub fn add_rule(&mut self, pattern: &str, limit: u64, window: Duration) -> Result<&mut Self> {
        if limit == 0 || window.is_zero() {
            return Err(RateLimiterError::Configuration(format!(
                "rule {:?} needs a positive limit and window",
                pattern
            )));
        }
        self.push(pattern, vec![Quota { limit, window }])?;
        Ok(self)
    }

    /// Adds quotas written as `"5/60;10/300"`
    pub fn add_rules(&mut self, pattern: &str, spec: &str) -> Result<&mut Self> {
        let quotas = Quota::parse_list(spec)?;
        self.push(pattern, quotas)?;
        Ok(self)
    }

    fn push(&mut self, pattern: &str, quotas: Vec<Quota>) -> Result<()> {
        if let Some(rule) = self.rules.iter_mut().find(|r| r.pattern.as_str() == pattern) {
            rule.quotas.extend(quotas);
            return Ok(());
        }
        let pattern = PathPattern::parse(pattern)?;
        debug!(pattern = pattern.as_str(), "Registered rate limit rule");
        self.rules.push(Rule {
            pattern,
            quotas,
            key_fn: None,
        });
        Ok(())
    }

    /// Sets how the rule registered under `pattern` derives its subject key
    pub fn set_key_fn<F>(&mut self, pattern: &str, key_fn: F) -> Result<&mut Self>
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        let rule = self
            .rules
            .iter_mut()
            .find(|r| r.pattern.as_str() == pattern)
            .ok_or_else(|| {
                RateLimiterError::Configuration(format!("no rule registered for {:?}", pattern))
            })?;
        rule.key_fn = Some(Arc::new(key_fn));
        Ok(self)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn find_match(&self, path: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.pattern.matches(path))
    }

    /// Runs every quota of the rule matching `path` for `key`, or for the
    /// subject the rule's key function derives from it.
    ///
    /// `None` when no rule matches. Otherwise the first denial, or the allowed
    /// result with the fewest requests remaining.
    pub async fn check(
        &self,
        limiter: &RateLimiter,
        path: &str,
        key: &str,
    ) -> Result<Option<RateLimitResult>> {
        let Some(rule) = self.find_match(path) else {
            return Ok(None);
        };

        let subject = rule.subject(key);
        let mut tightest: Option<RateLimitResult> = None;
        for quota in &rule.quotas {
            let result = limiter
                .execute(&rule.quota_key(&subject, quota), quota.limit, quota.window)
                .await?;
            if !result.allowed {
                return Ok(Some(result));
            }
            let tighter = tightest
                .as_ref()
                .map_or(true, |current| result.remaining < current.remaining);
            if tighter {
                tightest = Some(result);
            }
        }
        Ok(tightest)
    }
}
