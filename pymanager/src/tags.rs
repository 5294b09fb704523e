use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail, Error};
use serde::{de, Deserialize, Serialize};

use crate::installs::Install;

pub const DEFAULT_COMPANY: &str = "PythonCore";

/// Adornment on a numeric version component.
///
/// Prereleases order below the bare number, the threaded variant above it,
/// so `3.13a1 < 3.13 < 3.13t`.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone)]
pub enum Adornment {
    Alpha(u64),
    Beta(u64),
    Rc(u64),
    Final,
    Threaded,
}

impl Adornment {
    pub fn is_prerelease(&self) -> bool {
        matches!(
            self,
            Adornment::Alpha(_) | Adornment::Beta(_) | Adornment::Rc(_)
        )
    }
}

impl fmt::Display for Adornment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Adornment::Alpha(n) => write!(f, "a{}", n),
            Adornment::Beta(n) => write!(f, "b{}", n),
            Adornment::Rc(n) => write!(f, "rc{}", n),
            Adornment::Final => Ok(()),
            Adornment::Threaded => write!(f, "t"),
        }
    }
}

/// One dot-separated version component.  Anything that does not start
/// with a digit, or carries trailing junk, sorts lexicographically after
/// every parseable component.
#[derive(PartialEq, Eq, Hash, Debug, Clone)]
pub enum VersionPart {
    Num { value: u64, adorn: Adornment },
    Text(String),
}

impl VersionPart {
    fn parse(s: &str) -> VersionPart {
        let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return VersionPart::Text(s.to_string());
        }
        let value: u64 = match digits.parse() {
            Ok(v) => v,
            Err(_) => return VersionPart::Text(s.to_string()),
        };
        let rest = &s[digits.len()..];
        let adorn = if rest.is_empty() {
            Adornment::Final
        } else if rest == "t" {
            Adornment::Threaded
        } else {
            let (kind, num) = if let Some(n) = rest.strip_prefix("rc") {
                ("rc", n)
            } else if let Some(n) = rest.strip_prefix('a') {
                ("a", n)
            } else if let Some(n) = rest.strip_prefix('b') {
                ("b", n)
            } else {
                return VersionPart::Text(s.to_string());
            };
            match num.parse::<u64>() {
                Ok(n) => match kind {
                    "a" => Adornment::Alpha(n),
                    "b" => Adornment::Beta(n),
                    _ => Adornment::Rc(n),
                },
                Err(_) => return VersionPart::Text(s.to_string()),
            }
        };
        VersionPart::Num { value, adorn }
    }
}

impl PartialOrd for VersionPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionPart {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (
                VersionPart::Num { value, adorn },
                VersionPart::Num {
                    value: v2,
                    adorn: a2,
                },
            ) => value.cmp(v2).then_with(|| adorn.cmp(a2)),
            (VersionPart::Num { .. }, VersionPart::Text(_)) => Ordering::Less,
            (VersionPart::Text(_), VersionPart::Num { .. }) => Ordering::Greater,
            (VersionPart::Text(a), VersionPart::Text(b)) => a.cmp(b),
        }
    }
}

impl fmt::Display for VersionPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionPart::Num { value, adorn } => write!(f, "{}{}", value, adorn),
            VersionPart::Text(t) => write!(f, "{}", t),
        }
    }
}

/// A totally ordered runtime version, e.g. `3.13.1` or `3.14.0rc2`.
#[derive(PartialEq, Eq, Hash, Debug, Clone)]
pub struct Version {
    parts: Vec<VersionPart>,
}

impl Version {
    pub fn is_prerelease(&self) -> bool {
        self.parts.iter().any(|p| match p {
            VersionPart::Num { adorn, .. } => adorn.is_prerelease(),
            VersionPart::Text(_) => false,
        })
    }

    /// Returns the first `n` components in canonical form, e.g.
    /// `to_python_style(2)` of `3.13.1` is `3.13`.
    pub fn to_python_style(&self, n: usize) -> String {
        self.parts
            .iter()
            .take(n)
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(".")
    }

    pub fn parts(&self) -> &[VersionPart] {
        &self.parts
    }

    /// Componentwise prefix match.  The last component of the prefix
    /// matches any adornment when it is itself unadorned, so `3.0`
    /// matches `3.0a1` while `3.0a1` only matches itself.
    pub fn starts_with(&self, prefix: &Version) -> bool {
        if prefix.parts.len() > self.parts.len() {
            return false;
        }
        let last = prefix.parts.len() - 1;
        for (i, p) in prefix.parts.iter().enumerate() {
            let own = &self.parts[i];
            let matched = match (own, p) {
                (
                    VersionPart::Num { value, adorn },
                    VersionPart::Num {
                        value: pv,
                        adorn: pa,
                    },
                ) => {
                    value == pv
                        && (adorn == pa || (i == last && *pa == Adornment::Final))
                }
                (a, b) => a == b,
            };
            if !matched {
                return false;
            }
        }
        true
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            bail!("empty version");
        }
        if !s.starts_with(|c: char| c.is_ascii_digit()) {
            bail!("invalid version '{}'", s);
        }
        Ok(Version {
            parts: s.split('.').map(VersionPart::parse).collect(),
        })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        // missing tail components count as zero
        let zero = VersionPart::Num {
            value: 0,
            adorn: Adornment::Final,
        };
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            let a = self.parts.get(i).unwrap_or(&zero);
            let b = other.parts.get(i).unwrap_or(&zero);
            match a.cmp(b) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_python_style(self.parts.len()))
    }
}

impl Serialize for Version {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Version::from_str(&s).map_err(|err| de::Error::custom(err.to_string()))
    }
}

/// Sort key giving the resolver's preferred order: stable releases
/// newest-first, then prereleases newest-first.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct DescendingVersion(pub Version);

impl PartialOrd for DescendingVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DescendingVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .is_prerelease()
            .cmp(&other.0.is_prerelease())
            .then_with(|| other.0.cmp(&self.0))
    }
}

/// Sort key for companies: PythonCore first, then others
/// case-insensitively, with the `---` and empty placeholders last.
pub fn company_sort_key(company: &str) -> (u8, String) {
    if company.eq_ignore_ascii_case(DEFAULT_COMPANY) {
        (0, String::new())
    } else if company == "---" || company.is_empty() {
        (2, String::new())
    } else {
        (1, company.to_ascii_lowercase())
    }
}

/// A runtime tag: `VERSION[-PLATFORM]`, e.g. `3.13-64` or `3.14.0a1`.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct Tag {
    version: Version,
    platform: String,
}

impl Tag {
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Platform suffix including the leading dash, or the empty string.
    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// True when this tag's version components start with the request's
    /// and the platforms are compatible (no platform on the request
    /// matches anything).
    pub fn matches(&self, request: &Tag) -> bool {
        if !request.platform.is_empty()
            && !self.platform.eq_ignore_ascii_case(&request.platform)
        {
            return false;
        }
        self.version.starts_with(&request.version)
    }
}

impl FromStr for Tag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (version, platform) = match s.find('-') {
            Some(idx) => (&s[..idx], &s[idx..]),
            None => (s, ""),
        };
        Ok(Tag {
            version: version
                .parse()
                .map_err(|_| anyhow!("invalid tag '{}'", s))?,
            platform: platform.to_string(),
        })
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.version, self.platform)
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn eval(self, ord: Ordering) -> bool {
        match self {
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Le => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Ge => ord != Ordering::Less,
        }
    }
}

/// One element of a range: either a (prefix) tag match or an inequality
/// on the version part of the tag.
#[derive(Debug, Clone)]
enum RangeElement {
    Match {
        company: Option<String>,
        tag: Tag,
    },
    Compare {
        company: Option<String>,
        op: CompareOp,
        version: Version,
        platform: String,
    },
}

impl RangeElement {
    fn satisfied_by(&self, company: &str, tag: &Tag, loose_company: bool) -> bool {
        let company_ok = |want: &Option<String>| {
            if loose_company {
                return true;
            }
            match want {
                Some(c) => company.eq_ignore_ascii_case(c),
                None => company.eq_ignore_ascii_case(DEFAULT_COMPANY),
            }
        };
        match self {
            RangeElement::Match {
                company: want,
                tag: request,
            } => company_ok(want) && tag.matches(request),
            RangeElement::Compare {
                company: want,
                op,
                version,
                platform,
            } => {
                // comparators stay scoped to their company (canonical by
                // default) even when tag matching is loose, so `>3.10`
                // never drifts to another vendor's runtime
                let strict = match want {
                    Some(c) => company.eq_ignore_ascii_case(c),
                    None => company.eq_ignore_ascii_case(DEFAULT_COMPANY),
                };
                if !strict {
                    return false;
                }
                if !platform.is_empty() && !tag.platform().eq_ignore_ascii_case(platform) {
                    return false;
                }
                op.eval(tag.version().cmp(version))
            }
        }
    }
}

/// A filter over `(company, tag)` pairs: exact tags, prefixes,
/// comparators, or a comma separated disjunction of those.
#[derive(Debug, Clone)]
pub struct TagRange {
    source: String,
    elements: Vec<RangeElement>,
}

impl TagRange {
    pub fn satisfied_by(&self, company: &str, tag: &Tag) -> bool {
        self.elements
            .iter()
            .any(|e| e.satisfied_by(company, tag, false))
    }

    pub fn satisfied_by_loose(&self, company: &str, tag: &Tag, loose_company: bool) -> bool {
        self.elements
            .iter()
            .any(|e| e.satisfied_by(company, tag, loose_company))
    }

    /// The platform suffix the request pins, when every element agrees.
    pub fn requested_platform(&self) -> Option<&str> {
        let mut rv = None;
        for e in &self.elements {
            let plat = match e {
                RangeElement::Match { tag, .. } => tag.platform(),
                RangeElement::Compare { platform, .. } => platform.as_str(),
            };
            if plat.is_empty() {
                return None;
            }
            match rv {
                None => rv = Some(plat),
                Some(p) if p.eq_ignore_ascii_case(plat) => {}
                Some(_) => return None,
            }
        }
        rv
    }

    /// True when the request named a company with `Company\Tag` syntax.
    pub fn has_company(&self) -> bool {
        self.elements.iter().any(|e| match e {
            RangeElement::Match { company, .. } => company.is_some(),
            RangeElement::Compare { company, .. } => company.is_some(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for TagRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

fn parse_element(spec: &str) -> Result<RangeElement, Error> {
    let spec = spec.trim();
    let (company, rest) = match spec.split_once('\\') {
        Some((c, r)) => (Some(c.to_string()), r),
        None => (None, spec),
    };
    for (prefix, op) in [
        (">=", CompareOp::Ge),
        ("<=", CompareOp::Le),
        (">", CompareOp::Gt),
        ("<", CompareOp::Lt),
    ] {
        if let Some(operand) = rest.strip_prefix(prefix) {
            let tag: Tag = operand.trim().parse()?;
            return Ok(RangeElement::Compare {
                company,
                op,
                version: tag.version().clone(),
                platform: tag.platform().to_string(),
            });
        }
    }
    Ok(RangeElement::Match {
        company,
        tag: rest.parse()?,
    })
}

/// Parses a textual tag or range spec, e.g. `3.13-64`, `Company\3`,
/// `>=3.11,<3.13`.
pub fn tag_or_range(spec: &str) -> Result<TagRange, Error> {
    let elements = spec
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(parse_element)
        .collect::<Result<Vec<_>, _>>()?;
    if elements.is_empty() {
        bail!("empty tag filter '{}'", spec);
    }
    Ok(TagRange {
        source: spec.to_string(),
        elements,
    })
}

/// True if any of the install's `install-for` tags satisfies any range.
pub fn install_matches_any(install: &Install, ranges: &[TagRange], loose_company: bool) -> bool {
    if ranges.is_empty() {
        return true;
    }
    for raw in install.matchable_tags() {
        let tag: Tag = match raw.parse() {
            Ok(tag) => tag,
            Err(_) => continue,
        };
        if ranges
            .iter()
            .any(|r| r.satisfied_by_loose(&install.company, &tag, loose_company))
        {
            return true;
        }
    }
    false
}
