use super::{
    KeyStrategy, KeyTemplate, PolicyTable, ReadPolicy, RequestContext, Resource, WriteRule,
    normalize_query,
};
use crate::core::{GlobPattern, glob};
use axum::http::Method;
use serde::Serialize;
use std::collections::HashSet;
use tracing::error;

impl Resource {
    /// Pattern templates this resource's generator expands to
    ///
    /// Private keys live under `user:<scope>:`; a write made by one user can
    /// still need to clear other users' views of the same pet or analysis,
    /// hence the `user:*:` forms. The `~` patterns cover strategy-derived
    /// keys, which carry no identifiers to match on.
    ///
    /// Public `user` path keys (`user:~GET/..`) share their prefix with
    /// anonymous scopes (`user:~anon:..`, `user:~ip-..`); only the former
    /// continue with an upper-case method.
    pub fn pattern_templates(&self) -> &'static [&'static str] {
        match self {
            Resource::User => &["user:{user}:*", "user:~[A-Z]*"],
            Resource::Pet => &[
                "user:{user}:pets*",
                "user:*:pet:{petId}",
                "user:*:pet:{petId}:*",
                "user:*:pet:~*",
                "pet:~*",
            ],
            Resource::Analysis => &[
                "user:*:analysis:{analysisId}",
                "user:{user}:analyses*",
                "user:*:pet:{petId}:analyses*",
                "user:*:analysis:~*",
                "analysis:~*",
            ],
            Resource::Community => &["community:*", "user:*:community:~*"],
            Resource::Stats => &[
                "user:{user}:stats*",
                "user:*:pet:{petId}:stats*",
                "stats:*",
                "user:*:stats:~*",
            ],
        }
    }

    /// Identifiers a generator template may reference
    pub const IDENTIFIERS: [&'static str; 4] = ["user", "petId", "analysisId", "postId"];

    pub fn templates(&self) -> Vec<KeyTemplate> {
        self.pattern_templates()
            .iter()
            .filter_map(|source| match KeyTemplate::parse(source) {
                Ok(template) => Some(template),
                Err(e) => {
                    error!(resource = %self, error = %e, "Malformed generator template");
                    None
                }
            })
            .collect()
    }
}

/// A pattern template that could not be filled from the request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedPattern {
    pub template: String,
    pub missing: String,
}

/// Glob patterns ready for `delete_matching`, plus what had to be skipped
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedPatterns {
    pub patterns: Vec<String>,
    pub skipped: Vec<SkippedPattern>,
}

impl ResolvedPatterns {
    /// Resolve templates against a request, deduplicating in order
    ///
    /// Identifiers are key-encoded then glob-escaped, so a value like `*`
    /// only ever matches itself. `{user}` resolves only for authenticated
    /// requests and `{query}` never does.
    pub fn resolve<'a>(
        templates: impl IntoIterator<Item = &'a KeyTemplate>,
        ctx: &RequestContext,
    ) -> Self {
        let mut resolved = Self::default();
        let mut seen = HashSet::new();

        for template in templates {
            let rendered = template.render(|name| match name {
                "user" => ctx.user_id.as_ref().map(|_| glob::escape(&ctx.scope())),
                "query" => None,
                param => ctx.param(param).map(|value| glob::escape(&value)),
            });

            match rendered {
                Ok(pattern) => {
                    if seen.insert(pattern.clone()) {
                        resolved.patterns.push(pattern);
                    }
                }
                Err(missing) => resolved.skipped.push(SkippedPattern {
                    template: template.as_str().to_string(),
                    missing,
                }),
            }
        }

        resolved
    }
}

impl WriteRule {
    /// All templates the rule runs: generators first, then extra patterns
    pub fn templates(&self) -> Vec<KeyTemplate> {
        self.invalidates
            .iter()
            .flat_map(|resource| resource.templates())
            .chain(self.patterns.iter().cloned())
            .collect()
    }

    pub fn resolve(&self, ctx: &RequestContext) -> ResolvedPatterns {
        ResolvedPatterns::resolve(&self.templates(), ctx)
    }

    /// True when running the rule for `ctx` deletes `key`
    pub fn covers(&self, ctx: &RequestContext, key: &str) -> bool {
        self.resolve(ctx)
            .patterns
            .iter()
            .any(|pattern| GlobPattern::compile(pattern).is_ok_and(|glob| glob.matches(key)))
    }
}

/// A read route whose entries no write route clears
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageGap {
    pub read: String,
    pub resource: Resource,
    pub sample_key: String,
}

impl ReadPolicy {
    /// An authenticated request carrying every identifier the read or a
    /// generator could be keyed by
    fn sample_request(&self) -> RequestContext {
        let mut names: Vec<&str> = Resource::IDENTIFIERS
            .iter()
            .copied()
            .filter(|name| *name != "user")
            .collect();
        if let KeyStrategy::Template { template } = &self.key {
            names.extend(
                template
                    .placeholders()
                    .filter(|name| *name != "user" && *name != "query"),
            );
        }

        RequestContext {
            method: Method::GET,
            path: "/sample".to_string(),
            query: normalize_query("page=2"),
            params: names
                .into_iter()
                .map(|name| (name.to_string(), "42".to_string()))
                .collect(),
            user_id: Some("7".to_string()),
            client_ip: None,
        }
    }
}

impl PolicyTable {
    /// Reads that no write rule would clear
    ///
    /// Each read is keyed for a sample request, then every write rule is run
    /// for the same user and identifiers.
    pub fn coverage_gaps(&self) -> Vec<CoverageGap> {
        self.reads
            .iter()
            .filter_map(|(name, policy)| {
                let ctx = policy.sample_request();
                let key = policy.key_for(&ctx);
                let covered = self.writes.values().any(|rule| rule.covers(&ctx, &key));

                (!covered).then(|| CoverageGap {
                    read: name.clone(),
                    resource: policy.resource,
                    sample_key: key,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::GlobPattern;
    use crate::policy::test_context;

    #[test]
    fn test_generator_templates_are_well_formed() {
        for resource in Resource::ALL {
            assert_eq!(
                resource.templates().len(),
                resource.pattern_templates().len(),
                "{} has a malformed template",
                resource
            );
            for template in resource.templates() {
                let rendered = template.render(|_| Some("x".to_string())).unwrap();
                assert!(GlobPattern::compile(&rendered).is_ok(), "{}", template);
                for name in template.placeholders() {
                    assert!(
                        Resource::IDENTIFIERS.contains(&name),
                        "{} uses unknown placeholder {{{}}}",
                        resource,
                        name
                    );
                }
            }
        }
    }

    #[test]
    fn test_pet_update_composes_pet_and_owner_patterns() {
        let rule = WriteRule::new([Resource::Pet]);
        let ctx = test_context("/pets/42", "", &[("petId", "42")], Some("7"));

        let resolved = rule.resolve(&ctx);
        assert_eq!(
            resolved.patterns,
            vec![
                "user:7:pets*",
                "user:*:pet:42",
                "user:*:pet:42:*",
                "user:*:pet:~*",
                "pet:~*",
            ]
        );
        assert!(resolved.skipped.is_empty());
    }

    #[test]
    fn test_unresolvable_patterns_are_skipped() {
        let rule = WriteRule::new([Resource::Analysis]);
        let ctx = test_context("/analyses/9", "", &[("analysisId", "9")], Some("7"));

        let resolved = rule.resolve(&ctx);
        assert!(resolved.patterns.contains(&"user:*:analysis:9".to_string()));
        assert!(resolved.patterns.contains(&"user:7:analyses*".to_string()));
        assert_eq!(
            resolved.skipped,
            vec![SkippedPattern {
                template: "user:*:pet:{petId}:analyses*".into(),
                missing: "petId".into(),
            }]
        );
    }

    #[test]
    fn test_anonymous_writes_do_not_resolve_user() {
        let rule = WriteRule::new([Resource::User]);
        let ctx = test_context("/users/me", "", &[], None);

        let resolved = rule.resolve(&ctx);
        assert_eq!(resolved.patterns, vec!["user:~[A-Z]*"]);
        assert_eq!(resolved.skipped[0].missing, "user");
    }

    #[test]
    fn test_identifiers_cannot_widen_patterns() {
        let rule = WriteRule::new([Resource::Pet]);
        let ctx = test_context("/pets/*", "", &[("petId", "*")], Some("7"));

        let resolved = rule.resolve(&ctx);
        let pattern = GlobPattern::compile(&resolved.patterns[1]).unwrap();
        assert!(pattern.matches("user:7:pet:*"));
        assert!(!pattern.matches("user:7:pet:42"));
    }

    #[test]
    fn test_patterns_are_deduplicated() {
        let rule = WriteRule::new([Resource::Pet, Resource::Pet])
            .with_pattern("user:*:pet:{petId}")
            .unwrap();
        let ctx = test_context("/pets/42", "", &[("petId", "42")], Some("7"));

        let resolved = rule.resolve(&ctx);
        assert_eq!(resolved.patterns.len(), 5);
    }

    #[test]
    fn test_generators_cover_every_strategy() {
        let strategies = [KeyStrategy::Path, KeyStrategy::PathUser, KeyStrategy::PathQueryUser];
        let ctx = test_context("/things/42", "page=2", &[], Some("7"));

        for resource in Resource::ALL {
            let rule = WriteRule::new([resource]);
            for strategy in &strategies {
                let key = ReadPolicy::new(resource, 60)
                    .with_key(strategy.clone())
                    .key_for(&ctx);
                assert!(rule.covers(&ctx, &key), "{} leaves {} stale", resource, key);
            }
        }
    }

    #[test]
    fn test_public_user_keys_spare_anonymous_entries() {
        let rule = WriteRule::new([Resource::User]);
        let ctx = test_context("/users/7", "", &[], Some("7"));

        assert!(rule.covers(&ctx, "user:~GET/users/7"));
        assert!(!rule.covers(&ctx, "user:~anon:pet:~GET/pets"));
        assert!(!rule.covers(&ctx, "user:~ip-10.0.0.1:profile"));
    }

    #[test]
    fn test_coverage_gaps() {
        let table = PolicyTable::default();
        assert!(table.coverage_gaps().is_empty());

        let table = PolicyTable::empty()
            .with_read(
                "pet_detail",
                ReadPolicy::new(Resource::Pet, 60).keyed("pet:{petId}").unwrap(),
            )
            .with_read("feed", ReadPolicy::new(Resource::Community, 60))
            .with_write(
                "update_pet",
                WriteRule::default().with_pattern("pet:{petId}").unwrap(),
            );

        let gaps = table.coverage_gaps();
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].read, "feed");
        assert_eq!(gaps[0].resource, Resource::Community);
    }
}
