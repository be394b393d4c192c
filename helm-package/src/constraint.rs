//! Dependency version constraints.
//!
//! Charts write constraints the way Helm accepts them: space or comma
//! separated comparators (`>=1.2.0 <2.0.0`), wildcards (`1.2.x`), tilde and
//! caret ranges, and alternatives joined by `||`. A bare version means that
//! exact version; a bare partial version like `1.2` means any `1.2.x`.

use std::fmt;

use semver::{Version, VersionReq};

/// A parsed version constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    raw: String,
    exact: Option<Version>,
    alternatives: Vec<VersionReq>,
}

/// Parse a version the way chart versions and registry tags are written:
/// an optional leading `v`, and `_` standing in for `+` in OCI tags.
pub fn parse_version(version: &str) -> Option<Version> {
    let version = version.trim();
    let version = version.strip_prefix('v').unwrap_or(version);
    Version::parse(&version.replace('_', "+")).ok()
}

/// Pin a comparator written without an operator.
///
/// A bare `1.2` means `1.2.x`, which is `=1.2` for `semver`. Wildcards already
/// carry their own meaning and are left alone.
fn pin_bare(comparator: String) -> String {
    let version = comparator.strip_prefix('v').unwrap_or(&comparator);
    let bare = version.starts_with(|c: char| c.is_ascii_digit());
    let wildcard = version.split('.').any(|part| matches!(part, "x" | "X" | "*"));

    if bare && !wildcard {
        format!("={version}")
    } else {
        comparator
    }
}

fn normalize(part: &str) -> String {
    let mut comparators: Vec<String> = Vec::new();
    let mut pending = String::new();

    for token in part
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
    {
        pending.push_str(token);
        if token.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^' | '!')) {
            continue;
        }
        comparators.push(pin_bare(std::mem::take(&mut pending)));
    }

    if !pending.is_empty() {
        comparators.push(pin_bare(pending));
    }

    comparators.join(", ")
}

impl Constraint {
    /// Parse a constraint. An empty constraint or `*` accepts any release.
    pub fn parse(raw: &str) -> Result<Self, semver::Error> {
        let trimmed = raw.trim();

        let exact = parse_version(trimmed.strip_prefix('=').unwrap_or(trimmed));
        if exact.is_some() {
            return Ok(Self {
                raw: raw.to_owned(),
                exact,
                alternatives: Vec::new(),
            });
        }

        let alternatives = if trimmed.is_empty() {
            vec![VersionReq::STAR]
        } else {
            trimmed
                .split("||")
                .map(|part| VersionReq::parse(&normalize(part)))
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok(Self {
            raw: raw.to_owned(),
            exact: None,
            alternatives,
        })
    }

    /// The version, when the constraint names exactly one.
    pub fn exact(&self) -> Option<&Version> {
        self.exact.as_ref()
    }

    /// Whether `version` satisfies the constraint.
    pub fn matches(&self, version: &Version) -> bool {
        match &self.exact {
            Some(exact) => exact == version,
            None => self.alternatives.iter().any(|req| req.matches(version)),
        }
    }

    /// The highest of `candidates` satisfying the constraint, with its parsed
    /// version. Candidates which are not versions are ignored.
    pub fn best<'c, I>(&self, candidates: I) -> Option<(&'c str, Version)>
    where
        I: IntoIterator<Item = &'c str>,
    {
        candidates
            .into_iter()
            .filter_map(|candidate| parse_version(candidate).map(|version| (candidate, version)))
            .filter(|(_, version)| self.matches(version))
            .max_by(|(_, a), (_, b)| a.cmp(b))
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
