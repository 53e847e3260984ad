//! RPM naming, query-format and version helpers.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const ARCHES_64: &[&str] = &["x86_64", "athlon", "amd64", "ia32e", "ia64", "geode"];
pub const ARCHES_32: &[&str] = &["i386", "i486", "i586", "i686"];
pub const ARCHES_PPC: &[&str] = &["ppc", "ppc64", "ppc64le", "ppc64iseries", "ppc64pseries"];
pub const ARCHES_S390: &[&str] = &["s390", "s390x"];
pub const ARCHES_SPARC: &[&str] = &[
    "sparc", "sparcv8", "sparcv9", "sparcv9v", "sparc64", "sparc64v",
];
pub const ARCHES_ALPHA: &[&str] = &[
    "alpha",
    "alphaev4",
    "alphaev45",
    "alphaev5",
    "alphaev56",
    "alphapca56",
    "alphaev6",
    "alphaev67",
    "alphaev68",
    "alphaev7",
];
pub const ARCHES_ARM_32: &[&str] = &[
    "armv5tel", "armv5tejl", "armv6l", "armv6hl", "armv7l", "armv7hl", "armv7hnl",
];
pub const ARCHES_ARM_64: &[&str] = &["aarch64"];
pub const ARCHES_SH: &[&str] = &["sh3", "sh4", "sh4a"];

/// Every architecture RPM reports, `noarch` excluded.
pub const ARCHES: &[&[&str]] = &[
    ARCHES_64,
    ARCHES_32,
    ARCHES_PPC,
    ARCHES_S390,
    ARCHES_SPARC,
    ARCHES_ALPHA,
    ARCHES_ARM_32,
    ARCHES_ARM_64,
    ARCHES_SH,
];

/// Query format producing one `_|-` separated record per package.
pub const QUERYFORMAT: &str =
    "%{NAME}_|-%{EPOCH}_|-%{VERSION}_|-%{RELEASE}_|-%{ARCH}_|-%{REPOID}_|-%{INSTALLTIME}";

/// Whether `arch` is a known RPM architecture.
pub fn is_known_arch(arch: &str) -> bool {
    ARCHES.iter().any(|group| group.contains(&arch))
}

/// Whether both the host and the package architecture are 32-bit x86.
pub fn check_32(arch: &str, osarch: &str) -> bool {
    ARCHES_32.contains(&osarch) && ARCHES_32.contains(&arch)
}

/// Append `.arch` to a name unless the arch is native to the host.
pub fn resolve_name(name: &str, arch: &str, osarch: &str) -> String {
    if !check_32(arch, osarch) && arch != osarch && arch != "noarch" {
        format!("{}.{}", name, arch)
    } else {
        name.to_string()
    }
}

/// Split `name.arch` into its parts when the suffix is a known arch.
///
/// ```rust
/// use zypperpkg::pkg::rpm::parse_arch;
///
/// assert_eq!(parse_arch("zsh.x86_64"), ("zsh".to_string(), Some("x86_64".to_string())));
/// assert_eq!(parse_arch("python3.11"), ("python3.11".to_string(), None));
/// ```
pub fn parse_arch(name: &str) -> (String, Option<String>) {
    match name.rsplit_once('.') {
        Some((base, arch)) if is_known_arch(arch) || arch == "noarch" => {
            (base.to_string(), Some(arch.to_string()))
        }
        _ => (name.to_string(), None),
    }
}

/// Strip the arch suffix when it is the host arch, `noarch`, or a 32-bit
/// arch on a 32-bit host.
pub fn normalize_name(name: &str, osarch: &str) -> String {
    let arch = match name.rsplit_once('.') {
        Some((_, arch)) => arch,
        None => return name.to_string(),
    };
    if !is_known_arch(arch) && arch != "noarch" {
        return name.to_string();
    }
    if arch == osarch || arch == "noarch" || check_32(arch, osarch) {
        name[..name.len() - arch.len() - 1].to_string()
    } else {
        name.to_string()
    }
}

/// One installed (or packaged) RPM as parsed from [`QUERYFORMAT`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkgInfo {
    pub name: String,
    /// `[epoch:]version[-release]`
    pub version: String,
    pub arch: String,
    pub repoid: String,
    pub install_date: Option<String>,
    pub install_date_time_t: Option<i64>,
}

/// Parse one [`QUERYFORMAT`] line. Returns `None` for malformed lines.
pub fn parse_pkginfo(line: &str, osarch: &str) -> Option<PkgInfo> {
    let fields: Vec<&str> = line.split("_|-").collect();
    let [name, epoch, version, release, arch, repoid, install_time] = fields.as_slice() else {
        return None;
    };

    let name = resolve_name(name, arch, osarch);
    let mut full_version = version.to_string();
    if !release.is_empty() {
        full_version = format!("{}-{}", full_version, release);
    }
    if *epoch != "(none)" && *epoch != "0" {
        full_version = format!("{}:{}", epoch, full_version);
    }

    let (install_date, install_date_time_t) = match install_time.parse::<i64>() {
        Ok(ts) if ts != 0 => (Some(iso_utc(ts, true)), Some(ts)),
        _ => (None, None),
    };

    Some(PkgInfo {
        name,
        version: full_version,
        arch: arch.to_string(),
        repoid: repoid.to_string(),
        install_date,
        install_date_time_t,
    })
}

/// Format a Unix timestamp as ISO-8601 UTC, optionally with a `Z` suffix.
pub fn iso_utc(ts: i64, zulu: bool) -> String {
    let formatted = DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.naive_utc().format("%Y-%m-%dT%H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string());
    if zulu {
        format!("{}Z", formatted)
    } else {
        formatted
    }
}

/// Split `[epoch:]version[-release]` into its three parts.
///
/// A missing or non-numeric epoch becomes `"0"`; a missing release is empty.
pub fn version_to_evr(verstring: &str) -> (String, String, String) {
    if verstring.is_empty() {
        return ("0".to_string(), String::new(), String::new());
    }
    let (epoch, rest) = match verstring.find(':') {
        Some(idx) => {
            let epoch = verstring[..idx]
                .parse::<u64>()
                .map(|e| e.to_string())
                .unwrap_or_else(|_| "0".to_string());
            (epoch, &verstring[idx + 1..])
        }
        None => ("0".to_string(), verstring),
    };
    match rest.find('-') {
        Some(idx) => (epoch, rest[..idx].to_string(), rest[idx + 1..].to_string()),
        None => (epoch, rest.to_string(), String::new()),
    }
}

/// Compare two version segments the way `rpmvercmp` does.
pub fn rpmvercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }
    let one = a.as_bytes();
    let two = b.as_bytes();
    let (mut i, mut j) = (0usize, 0usize);

    let is_sep = |c: u8| !c.is_ascii_alphanumeric() && c != b'~' && c != b'^';

    while i < one.len() || j < two.len() {
        while i < one.len() && is_sep(one[i]) {
            i += 1;
        }
        while j < two.len() && is_sep(two[j]) {
            j += 1;
        }

        // Tilde sorts before everything, even the end of the string.
        let c1 = one.get(i).copied();
        let c2 = two.get(j).copied();
        if c1 == Some(b'~') || c2 == Some(b'~') {
            if c1 != Some(b'~') {
                return Ordering::Greater;
            }
            if c2 != Some(b'~') {
                return Ordering::Less;
            }
            i += 1;
            j += 1;
            continue;
        }

        // Caret sorts after the end of the string but before anything else.
        if c1 == Some(b'^') || c2 == Some(b'^') {
            if c1.is_none() {
                return Ordering::Less;
            }
            if c2.is_none() {
                return Ordering::Greater;
            }
            if c1 != Some(b'^') {
                return Ordering::Greater;
            }
            if c2 != Some(b'^') {
                return Ordering::Less;
            }
            i += 1;
            j += 1;
            continue;
        }

        if i >= one.len() || j >= two.len() {
            break;
        }

        let start1 = i;
        let start2 = j;
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

        if start2 == j {
            // Numeric segments are newer than alphabetic ones.
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let mut seg1 = &one[start1..i];
        let mut seg2 = &two[start2..j];
        if numeric {
            while seg1.first() == Some(&b'0') {
                seg1 = &seg1[1..];
            }
            while seg2.first() == Some(&b'0') {
                seg2 = &seg2[1..];
            }
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

    match (i >= one.len(), j >= two.len()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        _ => Ordering::Greater,
    }
}

/// Compare two `(epoch, version, release)` labels.
pub fn label_compare(a: (&str, &str, &str), b: (&str, &str, &str)) -> Ordering {
    let epoch = |e: &str| e.parse::<u64>().unwrap_or(0);
    epoch(a.0)
        .cmp(&epoch(b.0))
        .then_with(|| rpmvercmp(a.1, b.1))
        .then_with(|| rpmvercmp(a.2, b.2))
}

/// Compare two full version strings, optionally ignoring the epoch.
pub fn version_cmp(ver1: &str, ver2: &str, ignore_epoch: bool) -> Ordering {
    let strip = |v: &str| -> String {
        if ignore_epoch {
            v.split_once(':').map(|(_, rest)| rest).unwrap_or(v).to_string()
        } else {
            v.to_string()
        }
    };
    let (e1, v1, r1) = version_to_evr(&strip(ver1));
    let (e2, v2, r2) = version_to_evr(&strip(ver2));
    label_compare((&e1, &v1, &r1), (&e2, &v2, &r2))
}
