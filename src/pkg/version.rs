//! Loose version ordering.
//!
//! A version string is split into numeric runs, lowercase alphabetic runs and
//! any other characters; dots only separate. Two versions made purely of
//! numbers compare numerically component by component. As soon as either
//! side contains a non-numeric component, both are compared as lists of
//! strings instead, with numbers zero-padded to eight digits so that `10`
//! still sorts after `9`.

use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Component {
    Num(u128),
    Str(String),
}

impl Component {
    fn as_padded_string(&self) -> String {
        match self {
            Component::Num(n) => format!("{:0>8}", n),
            Component::Str(s) => s.clone(),
        }
    }
}

/// A version compared component-wise with a string fallback.
///
/// ```rust
/// use zypperpkg::pkg::version::LooseVersion;
///
/// assert!(LooseVersion::new("1.10") > LooseVersion::new("1.9"));
/// assert!(LooseVersion::new("16.2") < LooseVersion::new("16.10"));
/// ```
#[derive(Debug, Clone)]
pub struct LooseVersion {
    vstring: String,
    components: Vec<Component>,
}

impl LooseVersion {
    pub fn new(vstring: impl Into<String>) -> Self {
        let vstring = vstring.into();
        let components = parse_components(&vstring);
        Self {
            vstring,
            components,
        }
    }

    /// The original version string.
    pub fn as_str(&self) -> &str {
        &self.vstring
    }

    fn is_numeric(&self) -> bool {
        self.components
            .iter()
            .all(|c| matches!(c, Component::Num(_)))
    }

    fn string_components(&self) -> Vec<String> {
        self.components.iter().map(Component::as_padded_string).collect()
    }
}

#[derive(PartialEq, Clone, Copy)]
enum Class {
    Digit,
    Lower,
    Dot,
    Other,
}

fn classify(c: char) -> Class {
    if c.is_ascii_digit() {
        Class::Digit
    } else if c.is_ascii_lowercase() {
        Class::Lower
    } else if c == '.' {
        Class::Dot
    } else {
        Class::Other
    }
}

fn parse_components(vstring: &str) -> Vec<Component> {
    let mut components = Vec::new();
    let mut current = String::new();
    let mut current_class: Option<Class> = None;

    let mut flush = |buf: &mut String, class: Option<Class>| {
        if buf.is_empty() {
            return;
        }
        match class {
            Some(Class::Digit) => match buf.parse::<u128>() {
                Ok(n) => components.push(Component::Num(n)),
                Err(_) => components.push(Component::Str(buf.clone())),
            },
            Some(Class::Dot) | None => {}
            Some(_) => components.push(Component::Str(buf.clone())),
        }
        buf.clear();
    };

    for c in vstring.chars() {
        let class = classify(c);
        // Dots never merge into a run.
        if Some(class) != current_class || class == Class::Dot {
            flush(&mut current, current_class);
            current_class = Some(class);
        }
        current.push(c);
    }
    flush(&mut current, current_class);
    components
}

impl Ord for LooseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.is_numeric() && other.is_numeric() {
            let lhs = self.components.iter().filter_map(|c| match c {
                Component::Num(n) => Some(*n),
                Component::Str(_) => None,
            });
            let rhs = other.components.iter().filter_map(|c| match c {
                Component::Num(n) => Some(*n),
                Component::Str(_) => None,
            });
            lhs.cmp(rhs)
        } else {
            self.string_components().cmp(&other.string_components())
        }
    }
}

impl PartialOrd for LooseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for LooseVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for LooseVersion {}

impl fmt::Display for LooseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.vstring)
    }
}

/// Sort version strings in ascending loose order.
///
/// The mixed numeric/string comparison is not transitive, so this uses an
/// insertion sort which tolerates that instead of `slice::sort_by`.
pub fn sort_versions(versions: &mut [String]) {
    for i in 1..versions.len() {
        let mut j = i;
        while j > 0
            && LooseVersion::new(versions[j - 1].as_str()) > LooseVersion::new(versions[j].as_str())
        {
            versions.swap(j - 1, j);
            j -= 1;
        }
    }
}

/// The greatest version by loose ordering.
pub fn max_version<'a, I>(versions: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a String>,
{
    versions
        .into_iter()
        .fold(None::<&'a String>, |best, candidate| match best {
            Some(b) if LooseVersion::new(b.as_str()) >= LooseVersion::new(candidate.as_str()) => {
                Some(b)
            }
            _ => Some(candidate),
        })
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_numeric_ordering() {
        assert!(LooseVersion::new("3.1.0") > LooseVersion::new("3.0.10"));
        assert!(LooseVersion::new("1.2") < LooseVersion::new("1.2.0"));
        assert_eq!(LooseVersion::new("1.02"), LooseVersion::new("1.2"));
    }

    #[test]
    fn test_string_fallback() {
        // "-" forces string comparison of every component
        assert!(LooseVersion::new("16.2-1.1") < LooseVersion::new("16.9-1.1"));
        assert!(LooseVersion::new("16.10-1.1") > LooseVersion::new("16.9-1.1"));
        assert!(LooseVersion::new("9.0.2103-150500.20.6.1") > LooseVersion::new("9.0.1572-150500.20.3.1"));
        assert!(LooseVersion::new("1.0a") > LooseVersion::new("1.0"));
    }

    #[test]
    fn test_sort_and_max() {
        let mut versions = vec![
            "17.2.6-1.2".to_string(),
            "16.2.3-1.1".to_string(),
            "17.2.5-1.2".to_string(),
        ];
        sort_versions(&mut versions);
        assert_eq!(versions, vec!["16.2.3-1.1", "17.2.5-1.2", "17.2.6-1.2"]);
        assert_eq!(max_version(&versions), Some("17.2.6-1.2"));
        assert_eq!(max_version(&Vec::<String>::new()), None);

        let mut versions = vec!["1.10-1.1".to_string(), "1.9-1.1".to_string()];
        sort_versions(&mut versions);
        assert_eq!(versions, vec!["1.9-1.1", "1.10-1.1"]);
        assert_eq!(max_version(&versions), Some("1.10-1.1"));
    }

    proptest! {
        #[test]
        fn prop_numeric_versions_order_like_tuples(a in proptest::collection::vec(0u32..500, 1..5),
                                                  b in proptest::collection::vec(0u32..500, 1..5)) {
            let va = a.iter().map(u32::to_string).collect::<Vec<_>>().join(".");
            let vb = b.iter().map(u32::to_string).collect::<Vec<_>>().join(".");
            prop_assert_eq!(LooseVersion::new(va).cmp(&LooseVersion::new(vb)), a.cmp(&b));
        }

        #[test]
        fn prop_sort_never_panics(mut versions in proptest::collection::vec("[0-9a-zA-Z.+~-]{0,8}", 0..12)) {
            sort_versions(&mut versions);
        }
    }
}
