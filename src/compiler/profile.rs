//! Profile-driven skip policy.
//!
//! A profile lists how often each method ran. Methods that account for only a sliver of the
//! samples are not worth the compile time and image space, so the [`ProfileGate`] tells the
//! driver to leave them to the interpreter.
//!
//! # Format
//!
//! ```text
//! 9000/800/200
//! Lcom/example/Main;.main/6000/120
//! Lcom/example/Util;.hash/3000/48
//! Lcom/example/Util;.rarely/10/300
//! ```
//!
//! The first line holds three sample counts whose sum is the total. Every other line is
//! `name/count/size`; the name may itself contain `/`. A profile that is missing, has a
//! malformed line or a zero total is treated as absent, and an absent profile never skips
//! anything.

use std::{
    fs,
    io::{BufRead, BufReader},
    path::Path,
};

use rustc_hash::FxHashMap;

use crate::compiler::options::ProfileOptions;

/// Usage data of one method.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileEntry {
    /// Fully qualified method name
    pub name: String,
    /// Number of samples that hit the method
    pub count: u32,
    /// Size of the method in code units
    pub size: u32,
    /// Share of all samples, in percent
    pub used_percent: f64,
    /// Cumulative share of all methods at least as hot as this one, in percent
    pub top_k_used_percent: f64,
}

impl ProfileEntry {
    /// Returns true if the method's share of samples reaches `percent`.
    #[must_use]
    pub fn is_above(&self, percent: f64) -> bool {
        self.used_percent >= percent
    }
}

/// A loaded profile, keyed by method name.
#[derive(Debug, Clone, Default)]
pub struct ProfileEntries {
    entries: FxHashMap<String, ProfileEntry>,
    total_samples: u64,
}

impl ProfileEntries {
    /// Reads a profile from a file.
    ///
    /// Returns `None` if the file does not exist, cannot be read or is malformed.
    #[must_use]
    pub fn load(path: &Path) -> Option<Self> {
        let file = match fs::File::open(path) {
            Ok(file) => file,
            Err(error) => {
                log::debug!("profile {} not loaded: {error}", path.display());
                return None;
            }
        };
        let profile = Self::from_reader(BufReader::new(file));
        if profile.is_none() {
            log::warn!("profile {} is malformed, ignoring it", path.display());
        }
        profile
    }

    /// Reads a profile from any buffered source.
    #[must_use]
    pub fn from_reader<R: BufRead>(reader: R) -> Option<Self> {
        let lines: std::io::Result<Vec<String>> = reader.lines().collect();
        let text = lines.ok()?.join("\n");
        Self::parse(&text)
    }

    /// Parses profile text.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let mut lines = text.lines();
        let total_samples = parse_summary(lines.next()?)?;
        if total_samples == 0 {
            return None;
        }

        let mut raw = Vec::new();
        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            raw.push(parse_entry(line)?);
        }
        raw.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let total = total_samples as f64;
        let mut entries = FxHashMap::default();
        let mut cumulative = 0u64;
        let mut group_start = 0;
        while group_start < raw.len() {
            let count = raw[group_start].1;
            let group_end = raw[group_start..]
                .iter()
                .position(|entry| entry.1 != count)
                .map_or(raw.len(), |len| group_start + len);

            cumulative += u64::from(count) * (group_end - group_start) as u64;
            let top_k_used_percent = cumulative as f64 * 100.0 / total;
            for (name, count, size) in raw[group_start..group_end].iter().cloned() {
                let entry = ProfileEntry {
                    name: name.clone(),
                    count,
                    size,
                    used_percent: f64::from(count) * 100.0 / total,
                    top_k_used_percent,
                };
                entries.insert(name, entry);
            }
            group_start = group_end;
        }

        Some(ProfileEntries {
            entries,
            total_samples,
        })
    }

    /// Returns the entry of a method.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ProfileEntry> {
        self.entries.get(name)
    }

    /// Number of methods in the profile.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the profile lists no methods.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of the summary sample counts.
    #[must_use]
    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }
}

fn parse_summary(line: &str) -> Option<u64> {
    let fields: Vec<&str> = line.trim().split('/').collect();
    if fields.len() != 3 {
        return None;
    }
    fields
        .iter()
        .try_fold(0u64, |sum, field| sum.checked_add(field.parse::<u64>().ok()?))
}

fn parse_entry(line: &str) -> Option<(String, u32, u32)> {
    let mut fields = line.rsplitn(3, '/');
    let size = fields.next()?.parse().ok()?;
    let count = fields.next()?.parse().ok()?;
    let name = fields.next()?;
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), count, size))
}

/// Decides whether a method is too cold to compile.
#[derive(Debug, Clone, Default)]
pub struct ProfileGate {
    profile: Option<ProfileEntries>,
    options: ProfileOptions,
}

impl ProfileGate {
    /// Creates a gate over an optional profile.
    #[must_use]
    pub fn new(profile: Option<ProfileEntries>, options: ProfileOptions) -> Self {
        Self { profile, options }
    }

    /// Creates a gate that never skips.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Creates a gate from a profile file, disabled if the file is missing or malformed.
    #[must_use]
    pub fn from_path(path: &Path, options: ProfileOptions) -> Self {
        Self::new(ProfileEntries::load(path), options)
    }

    /// Returns true if a profile is loaded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.profile.is_some()
    }

    /// The loaded profile, if any.
    #[must_use]
    pub fn profile(&self) -> Option<&ProfileEntries> {
        self.profile.as_ref()
    }

    /// Returns true if the method should not be compiled.
    ///
    /// Without a profile this is always false. With one, listed methods are skipped when their
    /// used-percent is below the threshold; unlisted methods only when `skip_unlisted` is set.
    #[must_use]
    pub fn should_skip(&self, method_name: &str) -> bool {
        let Some(profile) = &self.profile else {
            return false;
        };
        match profile.get(method_name) {
            Some(entry) => !entry.is_above(self.options.threshold_percent),
            None => self.options.skip_unlisted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const PROFILE: &str = "9000/800/200
Lcom/example/Main;.main/6000/120
Lcom/example/Util;.hash/3000/48
Lcom/example/Util;.a/500/10
Lcom/example/Util;.b/500/12
Lcom/example/Util;.rarely/10/300
";

    fn options(threshold_percent: f64) -> ProfileOptions {
        ProfileOptions {
            threshold_percent,
            skip_unlisted: false,
        }
    }

    #[test]
    fn test_parse_percentages() {
        let profile = ProfileEntries::parse(PROFILE).unwrap();
        assert_eq!(profile.total_samples(), 10_000);
        assert_eq!(profile.len(), 5);

        let main = profile.get("Lcom/example/Main;.main").unwrap();
        assert_eq!(main.count, 6000);
        assert_eq!(main.size, 120);
        assert!((main.used_percent - 60.0).abs() < 1e-9);
        assert!((main.top_k_used_percent - 60.0).abs() < 1e-9);

        let hash = profile.get("Lcom/example/Util;.hash").unwrap();
        assert!((hash.top_k_used_percent - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_equal_counts_share_top_k() {
        let profile = ProfileEntries::parse(PROFILE).unwrap();
        let a = profile.get("Lcom/example/Util;.a").unwrap();
        let b = profile.get("Lcom/example/Util;.b").unwrap();
        assert!((a.top_k_used_percent - 100.0).abs() < 1e-9);
        assert_eq!(a.top_k_used_percent, b.top_k_used_percent);
    }

    #[test]
    fn test_malformed_profiles_are_absent() {
        assert!(ProfileEntries::parse("").is_none());
        assert!(ProfileEntries::parse("1/2\nfoo/1/1").is_none());
        assert!(ProfileEntries::parse("0/0/0\nfoo/1/1").is_none());
        assert!(ProfileEntries::parse("10/0/0\nfoo/x/1").is_none());
        assert!(ProfileEntries::parse("10/0/0\nfoo").is_none());
        assert!(ProfileEntries::parse("10/0/0\n/1/1").is_none());
    }

    #[test]
    fn test_missing_file_is_absent() {
        let gate = ProfileGate::from_path(
            Path::new("/nonexistent/aotscope/profile.txt"),
            ProfileOptions::default(),
        );
        assert!(!gate.is_loaded());
        assert!(!gate.should_skip("Lcom/example/Util;.rarely"));
        assert!(!gate.should_skip(""));
    }

    #[test]
    fn test_from_reader() {
        let profile = ProfileEntries::from_reader(Cursor::new(PROFILE)).unwrap();
        assert_eq!(profile.len(), 5);
    }

    #[test]
    fn test_should_skip_below_threshold() {
        let gate = ProfileGate::new(ProfileEntries::parse(PROFILE), options(1.0));
        assert!(gate.is_loaded());
        assert!(!gate.should_skip("Lcom/example/Main;.main"));
        assert!(!gate.should_skip("Lcom/example/Util;.a"));
        assert!(gate.should_skip("Lcom/example/Util;.rarely"));
        assert!(!gate.should_skip("Lcom/example/Unknown;.x"));
    }

    #[test]
    fn test_skip_unlisted() {
        let gate = ProfileGate::new(
            ProfileEntries::parse(PROFILE),
            ProfileOptions {
                threshold_percent: 0.0,
                skip_unlisted: true,
            },
        );
        assert!(gate.should_skip("Lcom/example/Unknown;.x"));
        assert!(!gate.should_skip("Lcom/example/Util;.rarely"));
    }

    #[test]
    fn test_disabled_gate_never_skips() {
        let gate = ProfileGate::disabled();
        assert!(!gate.should_skip("anything"));
    }
}
