//! Candidate location resolution.

use crate::{ConfigurationError, MirrorRule, RegistryConfig};

/// Resolves references against a validated registry configuration.
///
/// Rules are kept most specific first: a longer prefix is applied before a
/// shorter one, and rules with equally long prefixes keep their declared order.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    rules: Vec<MirrorRule>,
}

impl Resolver {
    /// Validate the configuration and build a resolver from it.
    pub fn new(config: RegistryConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;

        let mut rules = config.registries;
        rules.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));

        Ok(Self { rules })
    }

    /// Whether any mirror rule is configured.
    pub fn is_mirroring(&self) -> bool {
        !self.rules.is_empty()
    }

    /// Produce the ordered candidate locations for a reference.
    ///
    /// The reference must not carry a URI scheme. The result is never empty:
    /// when no rule applies, it is exactly `[reference]`.
    pub fn resolve(&self, reference: &str) -> Vec<String> {
        let mut candidates: Vec<String> = Vec::new();

        for rule in &self.rules {
            let Some(rest) = strip_prefix(reference, &rule.prefix) else {
                continue;
            };

            for mirror in &rule.mirrors {
                let candidate = format!("{mirror}{rest}");
                if !candidates.contains(&candidate) {
                    candidates.push(candidate);
                }
            }
        }

        if candidates.is_empty() {
            candidates.push(reference.to_owned());
        }

        tracing::trace!(%reference, ?candidates, "Resolved reference");
        candidates
    }
}

/// Resolve a single reference against a configuration.
///
/// Validates the configuration on every call; prefer building a [`Resolver`]
/// once when resolving many references.
pub fn resolve(
    reference: &str,
    config: &RegistryConfig,
) -> Result<Vec<String>, ConfigurationError> {
    Ok(Resolver::new(config.clone())?.resolve(reference))
}

/// Strip `prefix` from `reference` if it ends on a component boundary.
///
/// A bare host prefix only continues with `/`, so `example.com` never matches
/// `example.com:5000/...`. A repository prefix may also continue with a tag or
/// digest.
fn strip_prefix<'r>(reference: &'r str, prefix: &str) -> Option<&'r str> {
    let rest = reference.strip_prefix(prefix)?;

    match rest.as_bytes().first() {
        None | Some(b'/') => Some(rest),
        Some(b':') | Some(b'@') if prefix.contains('/') => Some(rest),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(rules: Vec<MirrorRule>) -> Resolver {
        Resolver::new(RegistryConfig::new(rules)).unwrap()
    }

    #[test]
    fn empty_config_is_identity() {
        let resolver = Resolver::default();
        assert!(!resolver.is_mirroring());
        assert_eq!(
            resolver.resolve("registry.example.com/charts/foo:1.0"),
            vec!["registry.example.com/charts/foo:1.0"]
        );
    }

    #[test]
    fn unmatched_reference_is_identity() {
        let resolver = resolver(vec![MirrorRule::new(
            "registry.example.com",
            ["mirror.example.com"],
        )]);

        for reference in [
            "ghcr.io/org/chart:1.2.3",
            "registry.example.com.evil/charts/foo:1.0",
            "registry.example.com:5000/charts/foo:1.0",
            "other.example.com/registry.example.com/foo:1.0",
        ] {
            assert_eq!(resolver.resolve(reference), vec![reference]);
        }
    }

    #[test]
    fn mirrors_in_declared_order() {
        let resolver = resolver(vec![MirrorRule::new(
            "registry.example.com",
            ["mirror1.example.com", "mirror2.example.com"],
        )]);

        assert_eq!(
            resolver.resolve("registry.example.com/charts/foo:1.0"),
            vec![
                "mirror1.example.com/charts/foo:1.0",
                "mirror2.example.com/charts/foo:1.0",
            ]
        );
    }

    #[test]
    fn most_specific_rule_first() {
        let resolver = resolver(vec![
            MirrorRule::new("registry.example.com", ["mirror.example.com"]),
            MirrorRule::new(
                "registry.example.com/charts",
                ["charts.mirror.example.com/cache"],
            ),
            MirrorRule::new("ghcr.io", ["ghcr.mirror.example.com"]),
        ]);

        assert_eq!(
            resolver.resolve("registry.example.com/charts/foo:1.0"),
            vec![
                "charts.mirror.example.com/cache/foo:1.0",
                "mirror.example.com/charts/foo:1.0",
            ]
        );

        assert_eq!(
            resolver.resolve("registry.example.com/images/bar:2.0"),
            vec!["mirror.example.com/images/bar:2.0"]
        );
    }

    #[test]
    fn equal_specificity_keeps_declared_order() {
        let resolver = resolver(vec![
            MirrorRule::new("registry.example.com", ["first.example.com"]),
            MirrorRule::new("registry.example.com", ["second.example.com"]),
        ]);

        assert_eq!(
            resolver.resolve("registry.example.com/foo:1.0"),
            vec!["first.example.com/foo:1.0", "second.example.com/foo:1.0"]
        );
    }

    #[test]
    fn resolution_is_deterministic() {
        let config = RegistryConfig::new(vec![
            MirrorRule::new("a.example.com", ["m1.example.com", "m2.example.com"]),
            MirrorRule::new("a.example.com/x", ["m3.example.com/y"]),
        ]);

        let first = resolve("a.example.com/x/chart:1", &config).unwrap();
        for _ in 0..16 {
            assert_eq!(resolve("a.example.com/x/chart:1", &config).unwrap(), first);
        }
        assert_eq!(
            first,
            vec![
                "m3.example.com/y/chart:1",
                "m1.example.com/x/chart:1",
                "m2.example.com/x/chart:1",
            ]
        );
    }

    #[test]
    fn duplicate_candidates_are_dropped() {
        let resolver = resolver(vec![
            MirrorRule::new("registry.example.com/charts", ["mirror.example.com/charts"]),
            MirrorRule::new("registry.example.com", ["mirror.example.com"]),
        ]);

        assert_eq!(
            resolver.resolve("registry.example.com/charts/foo:1.0"),
            vec!["mirror.example.com/charts/foo:1.0"]
        );
    }

    #[test]
    fn upstream_fallback_is_explicit() {
        let resolver = resolver(vec![MirrorRule::new(
            "registry.example.com",
            ["mirror.example.com", "registry.example.com"],
        )]);

        assert_eq!(
            resolver.resolve("registry.example.com/charts/foo:1.0"),
            vec![
                "mirror.example.com/charts/foo:1.0",
                "registry.example.com/charts/foo:1.0",
            ]
        );
    }

    #[test]
    fn repository_prefix_matches_tag_and_digest() {
        let resolver = resolver(vec![MirrorRule::new(
            "registry.example.com/charts/foo",
            ["mirror.example.com/foo"],
        )]);

        assert_eq!(
            resolver.resolve("registry.example.com/charts/foo:1.0"),
            vec!["mirror.example.com/foo:1.0"]
        );
        assert_eq!(
            resolver.resolve("registry.example.com/charts/foo@sha256:abcd"),
            vec!["mirror.example.com/foo@sha256:abcd"]
        );
        assert_eq!(
            resolver.resolve("registry.example.com/charts/foobar:1.0"),
            vec!["registry.example.com/charts/foobar:1.0"]
        );
    }

    #[test]
    fn resolve_rejects_malformed_config() {
        let config = RegistryConfig::new(vec![MirrorRule::new(
            "registry.example.com",
            Vec::<String>::new(),
        )]);
        assert!(matches!(
            resolve("registry.example.com/foo:1", &config),
            Err(ConfigurationError::InvalidRule { .. })
        ));
    }
}
