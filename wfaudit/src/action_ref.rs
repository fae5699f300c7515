use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use anyhow::{bail, Result};
use serde::Serialize;

/// How the `@ref` portion of an action reference binds to history.
///
/// Only `FullSha` is immutable; everything else can move under the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefType {
    /// 40 hexadecimal characters.
    FullSha,
    /// 7 to 39 hexadecimal characters (abbreviated commit id).
    ShortSha,
    /// Tag or branch name.
    Symbolic,
}

impl fmt::Display for RefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefType::FullSha => write!(f, "full_sha"),
            RefType::ShortSha => write!(f, "short_sha"),
            RefType::Symbolic => write!(f, "symbolic"),
        }
    }
}

/// Parsed `owner/repo[/subpath]@ref` component reference.
///
/// Equality, ordering, and hashing ignore `raw` so that textual variants of
/// the same reference collapse together.
#[derive(Debug, Clone, Serialize)]
pub struct ActionRef {
    pub raw: String,
    pub owner: String,
    pub repo: String,
    pub subpath: Option<String>,
    pub git_ref: String,
    pub ref_type: RefType,
}

const ALLOWED_EXTRA: &[char] = &['-', '_', '.', '/'];

fn valid_segment(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || ALLOWED_EXTRA.contains(&c))
}

impl FromStr for ActionRef {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        let Some((name_part, git_ref)) = raw.split_once('@') else {
            bail!("missing '@' in action reference: {raw}");
        };

        let segments: Vec<&str> = name_part.split('/').collect();
        if segments.len() < 2 {
            bail!("expected owner/repo in action reference: {raw}");
        }
        if git_ref.is_empty() {
            bail!("empty ref in action reference: {raw}");
        }
        for segment in &segments {
            if !valid_segment(segment) {
                bail!("invalid characters in action reference segment {segment:?}: {raw}");
            }
        }
        if !valid_segment(git_ref) {
            bail!("invalid characters in ref {git_ref:?}: {raw}");
        }

        let owner = segments[0].to_string();
        let repo = segments[1].to_string();
        let subpath = if segments.len() > 2 {
            Some(segments[2..].join("/"))
        } else {
            None
        };

        Ok(Self {
            raw: raw.to_string(),
            owner,
            repo,
            subpath,
            git_ref: git_ref.to_string(),
            ref_type: classify_ref(git_ref),
        })
    }
}

impl fmt::Display for ActionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subpath {
            Some(p) => write!(f, "{}/{}/{}@{}", self.owner, self.repo, p, self.git_ref),
            None => write!(f, "{}/{}@{}", self.owner, self.repo, self.git_ref),
        }
    }
}

impl PartialEq for ActionRef {
    fn eq(&self, other: &Self) -> bool {
        self.dedup_key() == other.dedup_key()
    }
}

impl Eq for ActionRef {}

impl PartialOrd for ActionRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ActionRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dedup_key().cmp(&other.dedup_key())
    }
}

impl Hash for ActionRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.dedup_key().hash(state);
    }
}

impl ActionRef {
    /// Case-normalized identity used by the resolver's visited set.
    ///
    /// GitHub owner/repo names are case-insensitive; refs are not.
    pub fn dedup_key(&self) -> String {
        let mut key = format!(
            "{}/{}",
            self.owner.to_ascii_lowercase(),
            self.repo.to_ascii_lowercase()
        );
        if let Some(p) = &self.subpath {
            key.push('/');
            key.push_str(&p.to_ascii_lowercase());
        }
        key.push('@');
        key.push_str(&self.git_ref);
        key
    }

    /// Logical component identity: `owner/repo[/subpath]`, ignoring the ref.
    /// Two nodes with the same package name but different refs are the
    /// version-inconsistency signal.
    pub fn package_name(&self) -> String {
        match &self.subpath {
            Some(p) => format!("{}/{}/{}", self.owner, self.repo, p),
            None => format!("{}/{}", self.owner, self.repo),
        }
    }

    /// The ref with a leading `v` stripped, when it is symbolic and starts
    /// with a digit (a plausible version tag). `None` for pinned hashes and
    /// branch-like names.
    pub fn version(&self) -> Option<&str> {
        if self.ref_type != RefType::Symbolic {
            return None;
        }
        let without_v = self.git_ref.strip_prefix('v').unwrap_or(&self.git_ref);
        if without_v.starts_with(|c: char| c.is_ascii_digit()) {
            Some(without_v)
        } else {
            None
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.ref_type == RefType::FullSha
    }
}

fn classify_ref(git_ref: &str) -> RefType {
    let all_hex = git_ref.chars().all(|c| c.is_ascii_hexdigit());
    if all_hex && git_ref.len() == 40 {
        return RefType::FullSha;
    }
    // Short hashes must be unambiguous: long enough to not be a version tag,
    // short enough to not be a truncated full hash collision with a branch.
    if all_hex && (7..40).contains(&git_ref.len()) && git_ref.chars().any(|c| c.is_ascii_alphabetic())
    {
        return RefType::ShortSha;
    }
    RefType::Symbolic
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_action() {
        let ar: ActionRef = "actions/checkout@v4".parse().unwrap();
        assert_eq!(ar.owner, "actions");
        assert_eq!(ar.repo, "checkout");
        assert!(ar.subpath.is_none());
        assert_eq!(ar.git_ref, "v4");
        assert_eq!(ar.ref_type, RefType::Symbolic);
    }

    #[test]
    fn parse_action_with_subpath() {
        let ar: ActionRef = "google-github-actions/auth/slim@v2".parse().unwrap();
        assert_eq!(ar.owner, "google-github-actions");
        assert_eq!(ar.repo, "auth");
        assert_eq!(ar.subpath, Some("slim".to_string()));
        assert_eq!(ar.package_name(), "google-github-actions/auth/slim");
    }

    #[test]
    fn parse_full_sha_ref() {
        let sha = "b4ffde65f46336ab88eb53be808477a3936bae11";
        let ar: ActionRef = format!("actions/checkout@{sha}").parse().unwrap();
        assert_eq!(ar.ref_type, RefType::FullSha);
        assert!(ar.is_pinned());
    }

    #[test]
    fn parse_short_sha_ref() {
        let ar: ActionRef = "actions/checkout@b4ffde6".parse().unwrap();
        assert_eq!(ar.ref_type, RefType::ShortSha);
        assert!(!ar.is_pinned());
    }

    #[test]
    fn numeric_tag_is_symbolic_not_short_sha() {
        // all-digit strings are hex, but they read as version tags
        let ar: ActionRef = "some/action@20240101".parse().unwrap();
        assert_eq!(ar.ref_type, RefType::Symbolic);
    }

    #[test]
    fn forty_one_char_non_hex_is_symbolic() {
        let git_ref = "z".repeat(41);
        let ar: ActionRef = format!("actions/checkout@{git_ref}").parse().unwrap();
        assert_eq!(ar.ref_type, RefType::Symbolic);
    }

    #[test]
    fn version_strips_v_prefix() {
        let ar: ActionRef = "codecov/codecov-action@v3.1.0".parse().unwrap();
        assert_eq!(ar.version(), Some("3.1.0"));
    }

    #[test]
    fn version_none_for_branch_names() {
        let ar: ActionRef = "actions/checkout@main".parse().unwrap();
        assert_eq!(ar.version(), None);
    }

    #[test]
    fn version_none_for_pinned_hash() {
        let ar: ActionRef = "actions/checkout@b4ffde65f46336ab88eb53be808477a3936bae11"
            .parse()
            .unwrap();
        assert_eq!(ar.version(), None);
    }

    #[test]
    fn missing_at_sign_is_error() {
        assert!("actions/checkout".parse::<ActionRef>().is_err());
    }

    #[test]
    fn missing_repo_is_error() {
        assert!("actions@v4".parse::<ActionRef>().is_err());
    }

    #[test]
    fn empty_ref_is_error() {
        assert!("actions/checkout@".parse::<ActionRef>().is_err());
    }

    #[test]
    fn disallowed_characters_are_rejected() {
        assert!("act ions/checkout@v4".parse::<ActionRef>().is_err());
        assert!("actions/check$out@v4".parse::<ActionRef>().is_err());
    }

    #[test]
    fn dedup_key_is_case_insensitive_on_names() {
        let a: ActionRef = "Actions/Checkout@v4".parse().unwrap();
        let b: ActionRef = "actions/checkout@v4".parse().unwrap();
        assert_eq!(a.dedup_key(), b.dedup_key());
        assert_eq!(a, b);
    }

    #[test]
    fn dedup_key_is_case_sensitive_on_ref() {
        let a: ActionRef = "actions/checkout@Main".parse().unwrap();
        let b: ActionRef = "actions/checkout@main".parse().unwrap();
        assert_ne!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn same_package_different_refs_are_different() {
        let a: ActionRef = "acme/build-tool@v1".parse().unwrap();
        let b: ActionRef = "acme/build-tool@v2".parse().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.package_name(), b.package_name());
    }

    #[test]
    fn display_reparses_to_equal_structure() {
        for raw in [
            "actions/checkout@v4",
            "google-github-actions/auth/slim@v2",
            "org/repo/.github/workflows/ci.yml@main",
        ] {
            let first: ActionRef = raw.parse().unwrap();
            let second: ActionRef = first.to_string().parse().unwrap();
            assert_eq!(first, second);
            assert_eq!(first.to_string(), second.to_string());
        }
    }

    #[test]
    fn ordering_by_owner_then_repo() {
        let a: ActionRef = "actions/checkout@v4".parse().unwrap();
        let b: ActionRef = "codecov/codecov-action@v3".parse().unwrap();
        assert!(a < b);
    }
}
