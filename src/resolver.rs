//! Feature version resolution for package tokens.
//!
//! A feature build publishes its packages as `<major>.<minor>.<patch>-<affix>-SNAPSHOT`.
//! Dependent builds on the same branch share the affix, so a package requested
//! as `@ux-aspects/ux-aspects@1.8.8-SNAPSHOT` during a build with version
//! `3.1.4-new-feature-SNAPSHOT` is first looked up as
//! `@ux-aspects/ux-aspects@1.8.8-new-feature-SNAPSHOT`.

use regex::Regex;
use std::sync::OnceLock;

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d+\.\d+\.\d+-(.+)-SNAPSHOT$").expect("valid feature version regex")
    })
}

fn package_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^.+@\d+\.\d+\.\d+").expect("valid package token regex"))
}

/// Extract the feature affix from a build version.
///
/// Returns `None` unless the version has the exact shape
/// `<major>.<minor>.<patch>-<affix>-SNAPSHOT`.
pub fn feature_affix(version: &str) -> Option<&str> {
    version_regex()
        .captures(version)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Rewrite `token` so its version carries the build's feature affix.
///
/// Anything after `name@major.minor.patch` in the token is discarded and
/// replaced by `-<affix>-SNAPSHOT`. When either the build version or the
/// token does not have the expected shape, the token is returned unchanged.
pub fn resolve_feature_token(token: &str, version: Option<&str>) -> String {
    let Some(affix) = version.and_then(feature_affix) else {
        return token.to_string();
    };

    match package_regex().find(token) {
        Some(prefix) => format!("{}-{}-SNAPSHOT", prefix.as_str(), affix),
        None => token.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scoped_package_gets_affix() {
        assert_eq!(
            resolve_feature_token(
                "@ux-aspects/ux-aspects@1.8.8-SNAPSHOT",
                Some("3.1.4-new-feature-SNAPSHOT")
            ),
            "@ux-aspects/ux-aspects@1.8.8-new-feature-SNAPSHOT"
        );
    }

    #[test]
    fn test_original_suffix_is_discarded() {
        assert_eq!(
            resolve_feature_token("@scope/pkg@1.8.8-SNAPSHOT", Some("2.0.0-my-feature-SNAPSHOT")),
            "@scope/pkg@1.8.8-my-feature-SNAPSHOT"
        );
        assert_eq!(
            resolve_feature_token("pkg@1.2.3-rc.1", Some("2.0.0-x-SNAPSHOT")),
            "pkg@1.2.3-x-SNAPSHOT"
        );
        assert_eq!(
            resolve_feature_token("pkg@1.2.3", Some("2.0.0-x-SNAPSHOT")),
            "pkg@1.2.3-x-SNAPSHOT"
        );
    }

    #[test]
    fn test_version_without_affix_is_identity() {
        let token = "@scope/pkg@1.8.8-SNAPSHOT";
        assert_eq!(resolve_feature_token(token, None), token);
        assert_eq!(resolve_feature_token(token, Some("")), token);
        assert_eq!(resolve_feature_token(token, Some("1.0.0-SNAPSHOT")), token);
        assert_eq!(resolve_feature_token(token, Some("1.0.0")), token);
        assert_eq!(resolve_feature_token(token, Some("v1.0.0-x-SNAPSHOT")), token);
        assert_eq!(resolve_feature_token(token, Some("1.0.0-x-SNAPSHOT-1")), token);
    }

    #[test]
    fn test_token_without_version_is_identity() {
        let version = Some("2.0.0-my-feature-SNAPSHOT");
        assert_eq!(resolve_feature_token("left-pad", version), "left-pad");
        assert_eq!(resolve_feature_token("@scope/pkg", version), "@scope/pkg");
        assert_eq!(resolve_feature_token("pkg@latest", version), "pkg@latest");
        assert_eq!(resolve_feature_token("pkg@1.2", version), "pkg@1.2");
        assert_eq!(resolve_feature_token("@1.2.3", version), "@1.2.3");
    }

    #[test]
    fn test_feature_affix() {
        assert_eq!(feature_affix("3.1.4-new-feature-SNAPSHOT"), Some("new-feature"));
        assert_eq!(feature_affix("10.20.30-a-SNAPSHOT"), Some("a"));
        // Greedy capture keeps inner SNAPSHOT segments
        assert_eq!(
            feature_affix("1.0.0-x-SNAPSHOT-y-SNAPSHOT"),
            Some("x-SNAPSHOT-y")
        );
        assert_eq!(feature_affix("1.0.0--SNAPSHOT"), None);
        assert_eq!(feature_affix("1.0.0-SNAPSHOT"), None);
    }
}
