//! Package versions and version constraints as written in requirement
//! manifests.
//!
//! Ordering follows the public package index conventions: release segments
//! compare numerically with trailing zeros ignored, dev releases sort before
//! pre-releases, pre-releases before the final release, and post releases
//! after it. Local version labels (`+local`) are ignored.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PreKind {
    Alpha,
    Beta,
    Rc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PreKey {
    DevOnly,
    Pre(PreKind, u64),
    Final,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum DevKey {
    Dev(u64),
    Release,
}

/// A parsed package version.
///
/// # Examples
///
/// ```
/// use stowage_core::Version;
///
/// let a: Version = "1.4".parse().unwrap();
/// let b: Version = "1.4.0".parse().unwrap();
/// let rc: Version = "1.4rc1".parse().unwrap();
/// assert_eq!(a, b);
/// assert!(rc < a);
/// ```
#[derive(Debug, Clone)]
pub struct Version {
    epoch: u64,
    release: Vec<u64>,
    pre: Option<(PreKind, u64)>,
    post: Option<u64>,
    dev: Option<u64>,
    raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version {input:?}: {reason}")]
pub struct VersionError {
    pub input: String,
    pub reason: &'static str,
}

impl Version {
    /// Release segments, e.g. `[1, 4, 2]` for `1.4.2`.
    pub fn release(&self) -> &[u64] {
        &self.release
    }

    /// The version as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn from_release(epoch: u64, release: Vec<u64>) -> Self {
        let raw = release
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(".");
        Self {
            epoch,
            release,
            pre: None,
            post: None,
            dev: None,
            raw,
        }
    }

    /// Smallest final release above every version sharing `prefix`:
    /// `[1, 4]` becomes `1.5`. None when the last segment cannot grow.
    fn bump(epoch: u64, prefix: &[u64]) -> Option<Self> {
        let mut release = prefix.to_vec();
        if let Some(last) = release.last_mut() {
            *last = last.checked_add(1)?;
        }
        Some(Self::from_release(epoch, release))
    }

    fn has_prefix(&self, epoch: u64, prefix: &[u64]) -> bool {
        self.epoch == epoch
            && prefix
                .iter()
                .enumerate()
                .all(|(i, seg)| self.release.get(i).copied().unwrap_or(0) == *seg)
    }

    fn pre_key(&self) -> PreKey {
        match (self.pre, self.post, self.dev) {
            (None, None, Some(_)) => PreKey::DevOnly,
            (Some((kind, n)), _, _) => PreKey::Pre(kind, n),
            _ => PreKey::Final,
        }
    }

    fn dev_key(&self) -> DevKey {
        match self.dev {
            Some(n) => DevKey::Dev(n),
            None => DevKey::Release,
        }
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let err = |reason| VersionError {
            input: raw.to_owned(),
            reason,
        };

        let lower = raw.to_ascii_lowercase();
        let public = lower.split('+').next().unwrap_or_default();
        let public = public.strip_prefix('v').unwrap_or(public);

        let (epoch, mut cursor) = match public.split_once('!') {
            Some((e, rest)) => (e.parse::<u64>().map_err(|_| err("invalid epoch"))?, rest),
            None => (0_u64, public),
        };

        let mut release: Vec<u64> = Vec::new();
        loop {
            let digits = leading_digits(cursor);
            if digits.is_empty() {
                return Err(err("expected a release number"));
            }
            release.push(
                digits
                    .parse::<u64>()
                    .map_err(|_| err("release segment out of range"))?,
            );
            cursor = &cursor[digits.len()..];
            match cursor.strip_prefix('.') {
                Some(next) if next.starts_with(|c: char| c.is_ascii_digit()) => cursor = next,
                _ => break,
            }
        }

        let mut pre = None;
        let mut post = None;
        let mut dev = None;
        while !cursor.is_empty() {
            let had_dash = cursor.starts_with('-');
            let body = cursor.trim_start_matches(['.', '-', '_']);
            let label_len = body
                .find(|c: char| !c.is_ascii_alphabetic())
                .unwrap_or(body.len());
            let label = &body[..label_len];
            let number_part = body[label_len..].trim_start_matches(['.', '-', '_']);
            let digits = leading_digits(number_part);
            let number = if digits.is_empty() {
                0
            } else {
                digits
                    .parse::<u64>()
                    .map_err(|_| err("suffix number out of range"))?
            };

            match label {
                "a" | "alpha" if pre.is_none() => pre = Some((PreKind::Alpha, number)),
                "b" | "beta" if pre.is_none() => pre = Some((PreKind::Beta, number)),
                "c" | "rc" | "pre" | "preview" if pre.is_none() => {
                    pre = Some((PreKind::Rc, number))
                }
                "post" | "rev" | "r" if post.is_none() => post = Some(number),
                "dev" if dev.is_none() => dev = Some(number),
                "" if had_dash && !digits.is_empty() && post.is_none() => post = Some(number),
                _ => return Err(err("unrecognized suffix")),
            }
            cursor = &number_part[digits.len()..];
        }

        Ok(Self {
            epoch,
            release,
            pre,
            post,
            dev,
            raw: raw.to_owned(),
        })
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| cmp_release(&self.release, &other.release))
            .then_with(|| self.pre_key().cmp(&other.pre_key()))
            .then_with(|| self.post.cmp(&other.post))
            .then_with(|| self.dev_key().cmp(&other.dev_key()))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn cmp_release(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| {
            a.get(i)
                .copied()
                .unwrap_or(0)
                .cmp(&b.get(i).copied().unwrap_or(0))
        })
        .find(|o| *o != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

fn leading_digits(s: &str) -> &str {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    &s[..end]
}

/// Comparison operator of a version constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equal,
    NotEqual,
    GreaterEqual,
    LessEqual,
    Greater,
    Less,
    Compatible,
    Arbitrary,
}

impl Operator {
    /// Longest operators first so `===` is not read as `==`.
    const ALL: [(&'static str, Operator); 8] = [
        ("===", Operator::Arbitrary),
        ("~=", Operator::Compatible),
        ("==", Operator::Equal),
        ("!=", Operator::NotEqual),
        (">=", Operator::GreaterEqual),
        ("<=", Operator::LessEqual),
        (">", Operator::Greater),
        ("<", Operator::Less),
    ];

    pub fn as_str(self) -> &'static str {
        Self::ALL
            .iter()
            .find(|(_, op)| *op == self)
            .map(|(s, _)| *s)
            .unwrap_or("==")
    }
}

/// A single version constraint such as `>=1.2` or `==1.4.*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    pub op: Operator,
    /// Version text after the operator, including any `.*`
    pub raw: String,
    /// `==X.*` / `!=X.*` prefix match
    pub wildcard: bool,
    /// Parsed version; None only for an `===` target that is not a version
    pub version: Option<Version>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConstraintError {
    #[error("missing comparison operator in {0:?}")]
    MissingOperator(String),
    #[error("missing version in {0:?}")]
    MissingVersion(String),
    #[error("wildcard is only allowed as a trailing `.*` with == or != in {0:?}")]
    Wildcard(String),
    #[error("~= needs at least two release segments in {0:?}")]
    CompatibleTooShort(String),
    #[error(transparent)]
    Version(#[from] VersionError),
}

impl FromStr for Constraint {
    type Err = ConstraintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let (op, rest) = Operator::ALL
            .iter()
            .find_map(|(prefix, op)| text.strip_prefix(prefix).map(|rest| (*op, rest)))
            .ok_or_else(|| ConstraintError::MissingOperator(text.to_owned()))?;
        let raw = rest.trim();
        if raw.is_empty() {
            return Err(ConstraintError::MissingVersion(text.to_owned()));
        }

        if op == Operator::Arbitrary {
            return Ok(Self {
                op,
                raw: raw.to_owned(),
                wildcard: false,
                // arch-lint: allow(no-silent-result-drop) reason="=== accepts arbitrary strings that need not be versions"
                version: raw.parse().ok(),
            });
        }

        let (version_text, wildcard) = match raw.strip_suffix(".*") {
            Some(prefix) if matches!(op, Operator::Equal | Operator::NotEqual) => (prefix, true),
            _ => (raw, false),
        };
        if version_text.contains('*') {
            return Err(ConstraintError::Wildcard(text.to_owned()));
        }

        let version: Version = version_text.parse()?;
        if op == Operator::Compatible && version.release.len() < 2 {
            return Err(ConstraintError::CompatibleTooShort(text.to_owned()));
        }

        Ok(Self {
            op,
            raw: raw.to_owned(),
            wildcard,
            version: Some(version),
        })
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op.as_str(), self.raw)
    }
}

impl Constraint {
    /// Whether `candidate` satisfies this constraint.
    pub fn matches(&self, candidate: &Version) -> bool {
        let Some(version) = &self.version else {
            return self.op == Operator::Arbitrary && candidate.raw == self.raw;
        };
        match self.op {
            Operator::Equal if self.wildcard => {
                candidate.has_prefix(version.epoch, &version.release)
            }
            Operator::Equal => candidate == version,
            Operator::NotEqual if self.wildcard => {
                !candidate.has_prefix(version.epoch, &version.release)
            }
            Operator::NotEqual => candidate != version,
            Operator::GreaterEqual => candidate >= version,
            Operator::LessEqual => candidate <= version,
            Operator::Greater => candidate > version,
            Operator::Less => candidate < version,
            Operator::Compatible => {
                let prefix = &version.release[..version.release.len() - 1];
                candidate >= version && candidate.has_prefix(version.epoch, prefix)
            }
            Operator::Arbitrary => candidate.raw == self.raw,
        }
    }
}

#[derive(Debug, Clone)]
struct Bound {
    version: Version,
    inclusive: bool,
}

fn raise_lower(bound: Bound, lower: &mut Option<Bound>) {
    let replace = match lower.as_ref() {
        None => true,
        Some(cur) => {
            bound.version > cur.version
                || (bound.version == cur.version && cur.inclusive && !bound.inclusive)
        }
    };
    if replace {
        *lower = Some(bound);
    }
}

fn tighten_upper(bound: Bound, upper: &mut Option<Bound>) {
    let replace = match upper.as_ref() {
        None => true,
        Some(cur) => {
            bound.version < cur.version
                || (bound.version == cur.version && cur.inclusive && !bound.inclusive)
        }
    };
    if replace {
        *upper = Some(bound);
    }
}

/// Proves that some version can satisfy every constraint at once.
///
/// Returns a human-readable reason when the constraints admit no version.
pub fn check_satisfiable(constraints: &[Constraint]) -> Result<(), String> {
    let mut lower: Option<Bound> = None;
    let mut upper: Option<Bound> = None;
    let mut pin: Option<&Version> = None;
    let mut arbitrary: Option<&str> = None;

    for c in constraints {
        let Some(version) = &c.version else {
            match arbitrary {
                Some(prev) if prev != c.raw => {
                    return Err(format!("conflicting pins ==={prev} and {c}"));
                }
                _ => arbitrary = Some(&c.raw),
            }
            continue;
        };
        match c.op {
            Operator::Equal if c.wildcard => {
                raise_lower(
                    Bound {
                        version: Version::from_release(version.epoch, version.release.clone()),
                        inclusive: true,
                    },
                    &mut lower,
                );
                // A prefix ending in u64::MAX has no upper bound.
                if let Some(next) = Version::bump(version.epoch, &version.release) {
                    tighten_upper(
                        Bound {
                            version: next,
                            inclusive: false,
                        },
                        &mut upper,
                    );
                }
            }
            Operator::Equal | Operator::Arbitrary => match pin {
                Some(prev) if prev != version => {
                    return Err(format!("conflicting pins =={prev} and {c}"));
                }
                // An equal `===` pin keeps its text: candidates must match it verbatim.
                Some(_) if c.op != Operator::Arbitrary => {}
                _ => pin = Some(version),
            },
            Operator::GreaterEqual | Operator::Greater => raise_lower(
                Bound {
                    version: version.clone(),
                    inclusive: c.op == Operator::GreaterEqual,
                },
                &mut lower,
            ),
            Operator::LessEqual | Operator::Less => tighten_upper(
                Bound {
                    version: version.clone(),
                    inclusive: c.op == Operator::LessEqual,
                },
                &mut upper,
            ),
            Operator::Compatible => {
                raise_lower(
                    Bound {
                        version: version.clone(),
                        inclusive: true,
                    },
                    &mut lower,
                );
                let prefix = &version.release[..version.release.len() - 1];
                if let Some(next) = Version::bump(version.epoch, prefix) {
                    tighten_upper(
                        Bound {
                            version: next,
                            inclusive: false,
                        },
                        &mut upper,
                    );
                }
            }
            Operator::NotEqual => {}
        }
    }

    let candidate = match (pin, &lower, &upper) {
        (Some(p), _, _) => Some(p.clone()),
        (None, Some(lo), Some(hi)) => match lo.version.cmp(&hi.version) {
            Ordering::Greater => {
                return Err(format!(
                    "lower bound {} is above upper bound {}",
                    lo.version, hi.version
                ));
            }
            Ordering::Equal if !(lo.inclusive && hi.inclusive) => {
                return Err(format!("no version between bounds at {}", lo.version));
            }
            Ordering::Equal => Some(lo.version.clone()),
            Ordering::Less => None,
        },
        _ => None,
    };

    if let Some(candidate) = candidate {
        if let Some(unmet) = constraints
            .iter()
            .filter(|c| c.version.is_some())
            .find(|c| !c.matches(&candidate))
        {
            return Err(format!("{candidate} does not satisfy {unmet}"));
        }
    }

    Ok(())
}
