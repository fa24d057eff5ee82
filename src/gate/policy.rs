//! Command Policy Tables
//!
//! The allowlist and denylist the validator consults. Both are built once at
//! startup and never mutated afterwards; share them behind an `Arc`.
//!
//! The denylist is a substring heuristic. Alternate spacing, aliases or
//! encodings get past it, so treat it as a pre-filter and not as a security
//! boundary.

use std::collections::BTreeMap;

/// Default allowlist: command name and its informational argument template
const DEFAULT_ALLOWED: &[(&str, &[&str])] = &[
    ("ls", &["ls", "-la"]),
    ("pwd", &["pwd"]),
    ("date", &["date"]),
    ("whoami", &["whoami"]),
    ("echo", &["echo"]),
    ("cat", &["cat"]),
    ("head", &["head"]),
    ("tail", &["tail"]),
    ("grep", &["grep"]),
    ("find", &["find"]),
    ("ps", &["ps", "aux"]),
    ("top", &["top", "-n", "1"]),
    ("df", &["df", "-h"]),
    ("free", &["free", "-h"]),
    ("uname", &["uname", "-a"]),
    ("uptime", &["uptime"]),
    ("env", &["env"]),
    ("which", &["which"]),
    ("whereis", &["whereis"]),
    ("file", &["file"]),
    ("wc", &["wc"]),
    ("sort", &["sort"]),
    ("uniq", &["uniq"]),
    ("cut", &["cut"]),
    ("awk", &["awk"]),
    ("sed", &["sed"]),
    ("tr", &["tr"]),
    ("tee", &["tee"]),
    ("mkdir", &["mkdir"]),
    ("rmdir", &["rmdir"]),
    ("touch", &["touch"]),
    ("cp", &["cp"]),
    ("mv", &["mv"]),
    ("rm", &["rm"]),
    ("chmod", &["chmod"]),
    ("ln", &["ln"]),
    ("tar", &["tar"]),
    ("zip", &["zip"]),
    ("unzip", &["unzip"]),
    ("git", &["git"]),
    ("python", &["python"]),
    ("python3", &["python3"]),
    ("node", &["node"]),
    ("npm", &["npm"]),
    ("pip", &["pip"]),
    ("pip3", &["pip3"]),
    ("netstat", &["netstat"]),
    ("ss", &["ss"]),
    ("ping", &["ping"]),
    ("curl", &["curl"]),
    ("wget", &["wget"]),
    ("sleep", &["sleep"]),
    ("true", &["true"]),
    ("false", &["false"]),
];

/// Default denylist phrases, matched case-insensitively anywhere in the raw text
const DEFAULT_DENY_PATTERNS: &[&str] = &[
    "rm -rf",
    "rm -fr",
    "sudo ",
    "su -",
    "mkfs",
    "dd if=",
    ":(){",
    "chmod 777 /",
    "chown root",
    "> /dev/sd",
    "/etc/shadow",
    "shutdown",
    "reboot",
    "poweroff",
];

/// Immutable mapping from allowed command name to its argument template
///
/// Only the leading token of a request is checked against this set. The
/// template is informational: the executed argv is always the caller's own
/// token list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedCommandSet {
    commands: BTreeMap<String, Vec<String>>,
}

impl Default for AllowedCommandSet {
    fn default() -> Self {
        Self::from_entries(DEFAULT_ALLOWED.iter().map(|(name, template)| {
            (
                name.to_string(),
                template.iter().map(|s| s.to_string()).collect(),
            )
        }))
    }
}

impl AllowedCommandSet {
    /// Build a set from `(name, template)` pairs
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        Self {
            commands: entries.into_iter().collect(),
        }
    }

    /// Build a set of names whose template is just the name itself
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_entries(names.into_iter().map(|name| {
            let name = name.into();
            (name.clone(), vec![name])
        }))
    }

    /// Check if a command name is allowlisted
    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// Argument template stored for a command
    pub fn template(&self, name: &str) -> Option<&[String]> {
        self.commands.get(name).map(Vec::as_slice)
    }

    /// Allowed command names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.commands.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Immutable set of lowercase phrases that deny a command outright
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenyPatternSet {
    patterns: Vec<String>,
}

impl Default for DenyPatternSet {
    fn default() -> Self {
        Self::new(DEFAULT_DENY_PATTERNS.iter().copied())
    }
}

impl DenyPatternSet {
    /// Build a set; patterns are lowercased and empty ones dropped
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut patterns: Vec<String> = patterns
            .into_iter()
            .map(|p| p.as_ref().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        patterns.dedup();
        Self { patterns }
    }

    /// Return the first pattern contained in `raw`, ignoring case
    pub fn find_match(&self, raw: &str) -> Option<&str> {
        let haystack = raw.to_lowercase();
        self.patterns
            .iter()
            .find(|p| haystack.contains(p.as_str()))
            .map(String::as_str)
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Default allowlist as owned configuration entries
pub fn default_allowed_commands() -> BTreeMap<String, Vec<String>> {
    AllowedCommandSet::default().commands
}

/// Default denylist as owned configuration entries
pub fn default_deny_patterns() -> Vec<String> {
    DEFAULT_DENY_PATTERNS.iter().map(|s| s.to_string()).collect()
}
