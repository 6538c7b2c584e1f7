//! Domain credibility scoring from a YAML configuration.

use serde::{Deserialize, Serialize};
use tracing::warn;

const DEFAULT_CONFIG_YAML: &str = include_str!("default_credibility.yaml");

/// TLD-suffix credibility rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TldPattern {
    pub suffix: String,
    pub score: f64,
}

/// A named group of domains sharing one credibility score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainGroup {
    pub name: String,
    pub score: f64,
    pub domains: Vec<String>,
}

/// Credibility table: domain groups first, TLD patterns second, default last.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredibilityConfig {
    pub default_score: f64,
    #[serde(default)]
    pub tld_patterns: Vec<TldPattern>,
    #[serde(default)]
    pub groups: Vec<DomainGroup>,
}

impl Default for CredibilityConfig {
    fn default() -> Self {
        Self::builtin()
    }
}

impl CredibilityConfig {
    /// The embedded default table.
    pub fn builtin() -> Self {
        serde_yaml::from_str(DEFAULT_CONFIG_YAML)
            .expect("embedded credibility config must parse")
    }

    /// Parse a table from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Load from a file, falling back to the builtin table on failure.
    pub fn load_or_builtin(path: &str) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match Self::from_yaml(&content) {
                Ok(config) => config,
                Err(error) => {
                    warn!(path, error = %error, "Invalid credibility config, using builtin");
                    Self::builtin()
                }
            },
            Err(error) => {
                warn!(path, error = %error, "Unreadable credibility config, using builtin");
                Self::builtin()
            }
        }
    }

    /// Credibility score for a host.
    ///
    /// Group domains match exactly or as a `.domain` suffix; TLD patterns
    /// match as host suffixes; anything else gets the default.
    pub fn score_for(&self, host: &str) -> f64 {
        let host = host.to_ascii_lowercase();
        for group in &self.groups {
            for domain in &group.domains {
                if host == *domain || host.ends_with(&format!(".{domain}")) {
                    return group.score;
                }
            }
        }
        for pattern in &self.tld_patterns {
            if host.ends_with(&pattern.suffix) {
                return pattern.score;
            }
        }
        self.default_score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn builtin_config_parses() {
        let config = CredibilityConfig::builtin();
        assert!(config.default_score > 0.0);
        assert!(!config.groups.is_empty());
        assert!(!config.tld_patterns.is_empty());
    }

    #[test]
    fn group_domains_match_exact_and_subdomain() {
        let config = CredibilityConfig::builtin();
        let base = config.score_for("wikipedia.org");
        assert_eq!(config.score_for("en.wikipedia.org"), base);
        assert!(base > config.default_score);
    }

    #[test]
    fn tld_patterns_apply_after_groups() {
        let config = CredibilityConfig::builtin();
        assert_eq!(config.score_for("cs.stanford.edu"), 0.85);
        assert_eq!(config.score_for("nasa.gov"), 0.80);
    }

    #[test]
    fn unknown_domains_get_default() {
        let config = CredibilityConfig::builtin();
        assert_eq!(config.score_for("random-blog.io"), config.default_score);
    }

    #[test]
    fn load_or_builtin_reads_override_from_disk() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "default_score: 0.42\ngroups:\n  - name: pinned\n    score: 0.95\n    domains: [pinned.example]\n"
        )
        .unwrap();

        let config = CredibilityConfig::load_or_builtin(file.path().to_str().unwrap());
        assert_eq!(config.default_score, 0.42);
        assert_eq!(config.score_for("pinned.example"), 0.95);
        assert_eq!(config.score_for("docs.pinned.example"), 0.95);
        // The override replaces the builtin table wholesale.
        assert!(config.tld_patterns.is_empty());
        assert_eq!(config.score_for("cs.stanford.edu"), 0.42);
    }

    #[test]
    fn load_or_builtin_falls_back_on_invalid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "default_score: [not, a, number]\n").unwrap();

        let config = CredibilityConfig::load_or_builtin(file.path().to_str().unwrap());
        let builtin = CredibilityConfig::builtin();
        assert_eq!(config.default_score, builtin.default_score);
        assert_eq!(config.groups.len(), builtin.groups.len());
    }

    #[test]
    fn load_or_builtin_falls_back_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-such-credibility.yaml");

        let config = CredibilityConfig::load_or_builtin(missing.to_str().unwrap());
        assert_eq!(config.default_score, CredibilityConfig::builtin().default_score);
    }

    #[test]
    fn suffix_match_requires_dot_boundary() {
        let config = CredibilityConfig::from_yaml(
            "default_score: 0.6\ngroups:\n  - name: g\n    score: 0.9\n    domains: [example.com]\n",
        )
        .unwrap();
        assert_eq!(config.score_for("notexample.com"), 0.6);
        assert_eq!(config.score_for("sub.example.com"), 0.9);
    }
}
