use anyhow::{Context, Result};
use regex::Regex;

const RELEASE_RULES: &[&str] = &[
    "^install/",
    "^modules/",
    r"^mails/en/.*\.txt$",
    r"^mails/en/.*\.tpl$",
    r"^mails/en/.*\.html$",
];

const RELEASE_BUNDLED_THEME_RULES: &[&str] =
    &["^themes/community-theme-default/", "^themes/niara/"];

const INSTALLATION_RULES: &[&str] = &[
    "^cache/",
    "^config/",
    "^img/",
    "^upload/",
    "^download/",
    "^translations/",
    "^mails/",
    "^override/",
    r"^\.htaccess$",
    r"^robots\.txt$",
];

const BUNDLED_THEME_PRIVATE_DIRS: &str = "^themes/(community-theme-default|niara)/(cache|lang|mails)/";
const BUNDLED_THEMES: &str = "^themes/(community-theme-default|niara)/";
const OTHER_THEME_DIRS: &str = "^themes/.+/";
const ALL_THEMES: &str = "^themes/";

/// Distribution files copied into otherwise filtered directories at install
/// time. They stay visible to the local scan but are left untouched even when
/// a release ships them.
pub const KEEP_RULES: &[&str] = &[
    r"^img/favicon\.ico$",
    r"^img/favicon_[0-9]+$",
    r"^img/logo\.jpg$",
    r"^img/logo_stores\.png$",
    r"^img/logo_invoice\.jpg$",
    r"^img/c/[0-9-]+_thumb\.jpg$",
    r"^img/s/[0-9]+\.jpg$",
    r"^img/t/[0-9]+\.jpg$",
    r"^img/cms/cms-img\.jpg$",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    Allow,
    Deny,
}

#[derive(Debug, Clone)]
pub struct FilterRule {
    action: FilterAction,
    pattern: Regex,
    literal_prefix: String,
}

impl FilterRule {
    pub fn new(action: FilterAction, pattern: &str) -> Result<Self> {
        let compiled = Regex::new(pattern)
            .with_context(|| format!("invalid path filter pattern '{pattern}'"))?;
        Ok(Self {
            action,
            pattern: compiled,
            literal_prefix: literal_prefix(pattern),
        })
    }

    pub fn allow(pattern: &str) -> Result<Self> {
        Self::new(FilterAction::Allow, pattern)
    }

    pub fn deny(pattern: &str) -> Result<Self> {
        Self::new(FilterAction::Deny, pattern)
    }

    pub fn action(&self) -> FilterAction {
        self.action
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.pattern.is_match(path)
    }
}

/// Ordered rules over relative, forward-slash separated paths. The first
/// matching rule decides; a path no rule matches is kept.
#[derive(Debug, Clone, Default)]
pub struct PathFilterSet {
    rules: Vec<FilterRule>,
}

impl PathFilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<FilterRule>) -> Self {
        Self { rules }
    }

    pub fn push(&mut self, rule: FilterRule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Action of the first rule matching `path`, if any.
    pub fn decision(&self, path: &str) -> Option<FilterAction> {
        self.rules
            .iter()
            .find(|rule| rule.is_match(path))
            .map(|rule| rule.action)
    }

    pub fn keep(&self, path: &str) -> bool {
        self.decision(path) != Some(FilterAction::Deny)
    }

    /// Whether a traversal has to enter `dir`. A denied directory is still
    /// entered when some allow rule can only match beneath it.
    pub fn may_descend(&self, dir: &str) -> bool {
        let dir_prefix = format!("{}/", dir.trim_end_matches('/'));
        if self.keep(&dir_prefix) {
            return true;
        }
        self.rules.iter().any(|rule| {
            rule.action == FilterAction::Allow && rule.literal_prefix.starts_with(&dir_prefix)
        })
    }

    /// Paths that never take part in a comparison. With `ignore_theme` the
    /// bundled themes are dropped as well. Keep files are dropped too, so a
    /// release never overwrites them.
    pub fn release(ignore_theme: bool) -> Result<Self> {
        let mut rules = deny_rules(RELEASE_RULES)?;
        if ignore_theme {
            rules.extend(deny_rules(RELEASE_BUNDLED_THEME_RULES)?);
        }
        rules.extend(deny_rules(KEEP_RULES)?);
        Ok(Self::with_rules(rules))
    }

    /// Local operational directories excluded from the scan, preceded by the
    /// keep rules.
    pub fn installation(ignore_theme: bool) -> Result<Self> {
        let mut rules = allow_rules(KEEP_RULES)?;
        rules.extend(deny_rules(INSTALLATION_RULES)?);
        if ignore_theme {
            rules.push(FilterRule::deny(ALL_THEMES)?);
        } else {
            rules.push(FilterRule::deny(BUNDLED_THEME_PRIVATE_DIRS)?);
            rules.push(FilterRule::allow(BUNDLED_THEMES)?);
            rules.push(FilterRule::deny(OTHER_THEME_DIRS)?);
        }
        Ok(Self::with_rules(rules))
    }
}

pub(crate) fn allow_rules(patterns: &[&str]) -> Result<Vec<FilterRule>> {
    patterns
        .iter()
        .map(|pattern| FilterRule::allow(pattern))
        .collect()
}

pub(crate) fn deny_rules(patterns: &[&str]) -> Result<Vec<FilterRule>> {
    patterns
        .iter()
        .map(|pattern| FilterRule::deny(pattern))
        .collect()
}

/// Leading literal text of an anchored pattern, e.g. `img/c/` for
/// `^img/c/[0-9-]+_thumb\.jpg$`. Unanchored patterns have none.
fn literal_prefix(pattern: &str) -> String {
    let Some(body) = pattern.strip_prefix('^') else {
        return String::new();
    };

    let mut prefix = String::new();
    let mut chars = body.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some(escaped) if escaped.is_ascii_punctuation() => prefix.push(escaped),
                _ => break,
            },
            '*' | '?' | '{' => {
                // the quantifier makes the previous literal optional
                prefix.pop();
                break;
            }
            '.' | '+' | '(' | ')' | '[' | ']' | '}' | '|' | '^' | '$' => break,
            other => prefix.push(other),
        }
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_prefix_stops_at_first_metacharacter() {
        assert_eq!(literal_prefix(r"^img/c/[0-9-]+_thumb\.jpg$"), "img/c/");
        assert_eq!(literal_prefix(r"^img/favicon\.ico$"), "img/favicon.ico");
        assert_eq!(literal_prefix("^themes/(a|b)/"), "themes/");
        assert_eq!(literal_prefix("^abc*"), "ab");
        assert_eq!(literal_prefix("themes/"), "");
    }
}
