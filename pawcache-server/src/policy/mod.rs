//! Cache key policy
//!
//! A [`PolicyTable`] names every cached read route and every invalidating
//! write route. Reads declare how long entries live, how their key is
//! derived and which responses are worth keeping; writes declare which
//! resources they touch. Both sides are closed enums so the table can be
//! loaded from YAML, validated at startup and served back by the ops API.

mod context;
mod defaults;
mod invalidation;
mod template;

pub use context::{RequestContext, encode_segment, normalize_query};
pub use invalidation::{CoverageGap, ResolvedPatterns, SkippedPattern};
pub use template::KeyTemplate;

#[cfg(test)]
pub(crate) use context::test_context;

use crate::core::{CacheError, GlobPattern, Result};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::debug;

/// Resource families of the pet health API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    User,
    Pet,
    Analysis,
    Community,
    Stats,
}

impl Resource {
    pub const ALL: [Resource; 5] = [
        Resource::User,
        Resource::Pet,
        Resource::Analysis,
        Resource::Community,
        Resource::Stats,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::User => "user",
            Resource::Pet => "pet",
            Resource::Analysis => "analysis",
            Resource::Community => "community",
            Resource::Stats => "stats",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|resource| resource.as_str() == name)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a read route derives its cache key
///
/// The built-in strategies produce `user:<scope>:<resource>:~<METHOD><path>`
/// (plus the normalized query for `path_query_user`), or
/// `<resource>:~<METHOD><path>` for public `path` entries. The `~` marker
/// keeps them apart from template keys, since encoded identifiers never
/// contain it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum KeyStrategy {
    /// Public data: method and path only
    Path,
    /// Per-user data where the query never changes the response
    PathUser,
    /// Per-user data, query included
    #[default]
    PathQueryUser,
    /// Explicit layout with `{user}`, `{query}` and `{<path param>}` placeholders
    Template { template: KeyTemplate },
}

/// Which handler responses are stored
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheCondition {
    /// Any 2xx except 206, whose body depends on a `Range` header keys ignore
    #[default]
    Success,
    /// 200 only
    Ok,
    Statuses(Vec<u16>),
}

impl CacheCondition {
    pub fn allows(&self, status: StatusCode) -> bool {
        match self {
            CacheCondition::Success => {
                status.is_success() && status != StatusCode::PARTIAL_CONTENT
            }
            CacheCondition::Ok => status == StatusCode::OK,
            CacheCondition::Statuses(allowed) => allowed.contains(&status.as_u16()),
        }
    }
}

fn default_ttl_secs() -> u64 {
    300
}

/// Caching rules for one read route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadPolicy {
    pub resource: Resource,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default)]
    pub key: KeyStrategy,
    #[serde(default)]
    pub condition: CacheCondition,
}

impl ReadPolicy {
    pub fn new(resource: Resource, ttl_secs: u64) -> Self {
        Self {
            resource,
            ttl_secs,
            key: KeyStrategy::default(),
            condition: CacheCondition::default(),
        }
    }

    /// Use an explicit key template
    pub fn keyed(mut self, template: &str) -> Result<Self> {
        self.key = KeyStrategy::Template {
            template: KeyTemplate::parse(template)?,
        };
        Ok(self)
    }

    pub fn with_key(mut self, key: KeyStrategy) -> Self {
        self.key = key;
        self
    }

    pub fn with_condition(mut self, condition: CacheCondition) -> Self {
        self.condition = condition;
        self
    }

    /// Derive the cache key for a request
    ///
    /// A template placeholder the request cannot satisfy falls back to the
    /// `path_query_user` layout, which distinguishes every request shape.
    pub fn key_for(&self, ctx: &RequestContext) -> String {
        match &self.key {
            KeyStrategy::Path => format!("{}:~{}{}", self.resource, ctx.method, ctx.path),
            KeyStrategy::PathUser => self.scoped_path_key(ctx, ""),
            KeyStrategy::PathQueryUser => self.scoped_path_key(ctx, &ctx.query_suffix()),
            KeyStrategy::Template { template } => template
                .render(|name| match name {
                    "user" => Some(ctx.scope()),
                    "query" => Some(ctx.query_suffix()),
                    param => ctx.param(param),
                })
                .unwrap_or_else(|missing| {
                    debug!(
                        template = template.as_str(),
                        missing = %missing,
                        "Key placeholder unresolved, using path key"
                    );
                    self.scoped_path_key(ctx, &ctx.query_suffix())
                }),
        }
    }

    fn scoped_path_key(&self, ctx: &RequestContext, query: &str) -> String {
        format!(
            "user:{}:{}:~{}{}{}",
            ctx.scope(),
            self.resource,
            ctx.method,
            ctx.path,
            query
        )
    }
}

/// Invalidation rule for one write route
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRule {
    /// Resource generators to run
    #[serde(default)]
    pub invalidates: Vec<Resource>,
    /// Extra glob templates, resolved like generator templates
    #[serde(default)]
    pub patterns: Vec<KeyTemplate>,
}

impl WriteRule {
    pub fn new(invalidates: impl IntoIterator<Item = Resource>) -> Self {
        Self {
            invalidates: invalidates.into_iter().collect(),
            patterns: Vec::new(),
        }
    }

    pub fn with_pattern(mut self, template: &str) -> Result<Self> {
        self.patterns.push(KeyTemplate::parse(template)?);
        Ok(self)
    }
}

/// Every cached read route and invalidating write route, by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyTable {
    #[serde(default)]
    pub reads: BTreeMap<String, ReadPolicy>,
    #[serde(default)]
    pub writes: BTreeMap<String, WriteRule>,
}

impl Default for PolicyTable {
    fn default() -> Self {
        defaults::pet_health()
    }
}

impl PolicyTable {
    pub fn empty() -> Self {
        Self {
            reads: BTreeMap::new(),
            writes: BTreeMap::new(),
        }
    }

    pub fn with_read(mut self, name: impl Into<String>, policy: ReadPolicy) -> Self {
        self.reads.insert(name.into(), policy);
        self
    }

    pub fn with_write(mut self, name: impl Into<String>, rule: WriteRule) -> Self {
        self.writes.insert(name.into(), rule);
        self
    }

    pub fn read(&self, name: &str) -> Result<&ReadPolicy> {
        self.reads
            .get(name)
            .ok_or_else(|| CacheError::UnknownPolicy(format!("read route '{}'", name)))
    }

    pub fn write(&self, name: &str) -> Result<&WriteRule> {
        self.writes
            .get(name)
            .ok_or_else(|| CacheError::UnknownPolicy(format!("write route '{}'", name)))
    }

    /// Check TTLs, templates and invalidation coverage before the table is put to use
    ///
    /// A read whose resource some write names must be cleared by some write.
    /// Reads of resources no write names expire by TTL alone and are allowed.
    pub fn validate(&self) -> Result<()> {
        for (name, policy) in &self.reads {
            if name.is_empty() {
                return Err(CacheError::InvalidPolicy("read route with empty name".into()));
            }
            if policy.ttl_secs == 0 {
                return Err(CacheError::InvalidPolicy(format!(
                    "read route '{}': ttl_secs must be positive",
                    name
                )));
            }
            if let CacheCondition::Statuses(statuses) = &policy.condition {
                if statuses.is_empty() {
                    return Err(CacheError::InvalidPolicy(format!(
                        "read route '{}': status list is empty",
                        name
                    )));
                }
                if let Some(bad) = statuses.iter().find(|s| StatusCode::from_u16(**s).is_err()) {
                    return Err(CacheError::InvalidPolicy(format!(
                        "read route '{}': {} is not a status code",
                        name, bad
                    )));
                }
            }
        }

        for (name, rule) in &self.writes {
            if name.is_empty() {
                return Err(CacheError::InvalidPolicy("write route with empty name".into()));
            }
            if rule.invalidates.is_empty() && rule.patterns.is_empty() {
                return Err(CacheError::InvalidPolicy(format!(
                    "write route '{}' invalidates nothing",
                    name
                )));
            }
            for template in &rule.patterns {
                validate_pattern_template(template).map_err(|e| {
                    CacheError::InvalidPolicy(format!("write route '{}': {}", name, e))
                })?;
            }
        }

        let invalidated: HashSet<Resource> = self
            .writes
            .values()
            .flat_map(|rule| rule.invalidates.iter().copied())
            .collect();
        if let Some(gap) = self
            .coverage_gaps()
            .into_iter()
            .find(|gap| invalidated.contains(&gap.resource))
        {
            return Err(CacheError::InvalidPolicy(format!(
                "read route '{}': no write clears keys like '{}' although writes invalidate {}",
                gap.read, gap.sample_key, gap.resource
            )));
        }

        Ok(())
    }
}

/// Pattern templates may not use `{query}`, and must be valid globs once filled in
fn validate_pattern_template(template: &KeyTemplate) -> Result<()> {
    let rendered = template
        .render(|name| (name != "query").then(|| "x".to_string()))
        .map_err(|_| {
            CacheError::InvalidPolicy(format!(
                "pattern '{}' cannot use {{query}}",
                template
            ))
        })?;
    GlobPattern::compile(&rendered)?;
    Ok(())
}
