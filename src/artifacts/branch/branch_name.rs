use crate::artifacts::branch::INVALID_BRANCH_NAME_REGEX;
use anyhow::Context;
use derive_new::new;

const REF_PREFIX: &str = "refs/heads/";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord, new)]
pub struct SymRefName(String);

impl SymRefName {
    pub fn is_detached_head(&self) -> bool {
        self.0.starts_with("HEAD")
    }

    pub fn as_ref_path(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SymRefName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct BranchName(String);

impl BranchName {
    pub fn try_parse(name: impl Into<String>) -> anyhow::Result<Self> {
        let name = name.into();
        if name.is_empty() {
            anyhow::bail!("branch name cannot be empty");
        }

        let re = regex::Regex::new(INVALID_BRANCH_NAME_REGEX)
            .with_context(|| format!("invalid branch name regex: {INVALID_BRANCH_NAME_REGEX}"))?;

        if re.is_match(&name) {
            anyhow::bail!("invalid branch name: {}", name);
        } else {
            Ok(Self(name))
        }
    }

    pub fn try_parse_sym_ref_name(sym_ref_name: &SymRefName) -> anyhow::Result<Self> {
        if !sym_ref_name.0.starts_with(REF_PREFIX) && !sym_ref_name.0.starts_with("HEAD") {
            anyhow::bail!(
                "symbolic ref name must start with '{}' or 'HEAD', got '{}'",
                REF_PREFIX,
                sym_ref_name.0
            );
        }

        let sym_ref_name = sym_ref_name.0.trim_start_matches(REF_PREFIX);
        Self::try_parse(sym_ref_name.to_string())
    }

    /// The symbolic ref path for this branch: `refs/heads/<name>`
    pub fn to_sym_ref_name(&self) -> SymRefName {
        SymRefName::new(format!("{}{}", REF_PREFIX, self.0))
    }
}

impl AsRef<str> for BranchName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BranchName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::proptest;

    proptest! {
        #[test]
        fn test_valid_branch_names_parse(branch_name in "[a-zA-Z0-9_-]+") {
            assert!(BranchName::try_parse(branch_name).is_ok());
        }

        #[test]
        fn test_branch_names_with_consecutive_dots_rejected(
            prefix in "[a-zA-Z0-9_-]+",
            suffix in "[a-zA-Z0-9_-]+"
        ) {
            let branch_name = format!("{}..{}", prefix, suffix);
            assert!(BranchName::try_parse(branch_name).is_err());
        }

        #[test]
        fn test_branch_names_ending_with_lock_rejected(prefix in "[a-zA-Z0-9_-]+") {
            let branch_name = format!("{}.lock", prefix);
            assert!(BranchName::try_parse(branch_name).is_err());
        }
    }

    #[test]
    fn test_sym_ref_round_trip() {
        let branch = BranchName::try_parse("feature/topic").unwrap();
        let sym_ref = branch.to_sym_ref_name();
        assert_eq!(sym_ref.as_ref_path(), "refs/heads/feature/topic");
        assert_eq!(
            BranchName::try_parse_sym_ref_name(&sym_ref).unwrap(),
            branch
        );
    }

    #[test]
    fn test_empty_branch_name_rejected() {
        assert!(BranchName::try_parse("").is_err());
    }
}
