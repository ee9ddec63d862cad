//! Dependency specs and package version ordering
//!
//! Dependencies are written `name`, `name=1.2`, `name>=1.2-3` and so on.
//! Versions follow the `[epoch:]version[-release]` scheme and compare segment
//! by segment the way pacman does: numeric segments numerically, alphabetic
//! segments lexically, with `1.0a < 1.0 < 1.0.1`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PlannerError;

/// Comparison operator of a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DepMod {
    Any,
    Eq,
    Ge,
    Le,
    Gt,
    Lt,
}

impl DepMod {
    fn as_str(self) -> &'static str {
        match self {
            Self::Any => "",
            Self::Eq => "=",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Lt => "<",
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Any => true,
            Self::Eq => ordering == Ordering::Equal,
            Self::Ge => ordering != Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Lt => ordering == Ordering::Less,
        }
    }
}

/// A parsed dependency such as `glibc>=2.38`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DepSpec {
    pub name: String,
    pub modifier: DepMod,
    pub version: Option<String>,
}

impl DepSpec {
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        let Some(idx) = spec.find(['<', '>', '=']) else {
            return Self {
                name: spec.to_string(),
                modifier: DepMod::Any,
                version: None,
            };
        };

        let (name, rest) = spec.split_at(idx);
        let (modifier, version) = if let Some(v) = rest.strip_prefix(">=") {
            (DepMod::Ge, v)
        } else if let Some(v) = rest.strip_prefix("<=") {
            (DepMod::Le, v)
        } else if let Some(v) = rest.strip_prefix('=') {
            (DepMod::Eq, v)
        } else if let Some(v) = rest.strip_prefix('>') {
            (DepMod::Gt, v)
        } else if let Some(v) = rest.strip_prefix('<') {
            (DepMod::Lt, v)
        } else {
            (DepMod::Any, "")
        };

        Self {
            name: name.to_string(),
            modifier,
            version: (!version.is_empty()).then(|| version.to_string()),
        }
    }

    /// Whether a concrete version meets the constraint.
    pub fn version_matches(&self, version: &str) -> bool {
        match (&self.version, self.modifier) {
            (_, DepMod::Any) | (None, _) => true,
            (Some(wanted), modifier) => modifier.accepts(vercmp(version, wanted)),
        }
    }

    /// Whether a package with this name, version and `provides` list
    /// satisfies the dependency.
    ///
    /// An unversioned provide only satisfies unversioned dependencies.
    pub fn satisfied_by(&self, name: &str, version: &str, provides: &[String]) -> bool {
        if name == self.name && self.version_matches(version) {
            return true;
        }
        provides.iter().any(|provide| {
            let provide = DepSpec::parse(provide);
            if provide.name != self.name {
                return false;
            }
            match (&provide.version, self.modifier) {
                (_, DepMod::Any) => true,
                (Some(v), _) => self.version_matches(v),
                (None, _) => false,
            }
        })
    }
}

impl FromStr for DepSpec {
    type Err = PlannerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dep = Self::parse(s);
        if dep.name.is_empty() {
            return Err(PlannerError::general(format!("Invalid dependency: {:?}", s)));
        }
        Ok(dep)
    }
}

impl fmt::Display for DepSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(version) = &self.version {
            write!(f, "{}{}", self.modifier.as_str(), version)?;
        }
        Ok(())
    }
}

/// Split `[epoch:]version[-release]`.
fn parse_evr(evr: &str) -> (&str, &str, Option<&str>) {
    let (epoch, rest) = match evr.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) if evr.as_bytes()[idx] == b':' => (&evr[..idx], &evr[idx + 1..]),
        _ => ("0", evr),
    };
    let epoch = if epoch.is_empty() { "0" } else { epoch };
    match rest.rfind('-') {
        Some(idx) => (epoch, &rest[..idx], Some(&rest[idx + 1..])),
        None => (epoch, rest, None),
    }
}

fn trim_zeros(segment: &[u8]) -> &[u8] {
    let start = segment.iter().position(|b| *b != b'0').unwrap_or(segment.len());
    &segment[start..]
}

/// Segment-wise comparison of a single version component.
fn compare_segments(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }
    let (one, two) = (a.as_bytes(), b.as_bytes());
    let (mut i, mut j) = (0, 0);

    while i < one.len() && j < two.len() {
        let (sep_i, sep_j) = (i, j);
        while i < one.len() && !one[i].is_ascii_alphanumeric() {
            i += 1;
        }
        while j < two.len() && !two[j].is_ascii_alphanumeric() {
            j += 1;
        }
        if i >= one.len() || j >= two.len() {
            break;
        }
        if i - sep_i != j - sep_j {
            return (i - sep_i).cmp(&(j - sep_j));
        }

        let (start_i, start_j) = (i, j);
        let numeric = one[i].is_ascii_digit();
        if numeric {
            while i < one.len() && one[i].is_ascii_digit() {
                i += 1;
            }
            while j < two.len() && two[j].is_ascii_digit() {
                j += 1;
            }
        } else {
            while i < one.len() && one[i].is_ascii_alphabetic() {
                i += 1;
            }
            while j < two.len() && two[j].is_ascii_alphabetic() {
                j += 1;
            }
        }

        let (mut seg1, mut seg2) = (&one[start_i..i], &two[start_j..j]);
        // numeric vs alpha: numeric is newer
        if seg2.is_empty() {
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }
        if numeric {
            seg1 = trim_zeros(seg1);
            seg2 = trim_zeros(seg2);
            match seg1.len().cmp(&seg2.len()) {
                Ordering::Equal => {}
                other => return other,
            }
        }
        match seg1.cmp(seg2) {
            Ordering::Equal => {}
            other => return other,
        }
    }

    if i >= one.len() && j >= two.len() {
        return Ordering::Equal;
    }
    // leftover alpha is a pre-release, leftover anything else is newer
    if (i >= one.len() && !two[j].is_ascii_alphabetic())
        || (i < one.len() && one[i].is_ascii_alphabetic())
    {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

/// Compare two full package versions.
pub fn vercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }
    let (epoch_a, ver_a, rel_a) = parse_evr(a);
    let (epoch_b, ver_b, rel_b) = parse_evr(b);

    compare_segments(epoch_a, epoch_b)
        .then_with(|| compare_segments(ver_a, ver_b))
        .then_with(|| match (rel_a, rel_b) {
            (Some(ra), Some(rb)) => compare_segments(ra, rb),
            _ => Ordering::Equal,
        })
}
