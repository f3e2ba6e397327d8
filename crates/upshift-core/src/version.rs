use anyhow::{anyhow, Context, Result};
use regex::{NoExpand, Regex};

const VERSION_PLACEHOLDER: &str = "{version}";

/// Identifier of the installed release. A stamp `X-Y` was written by an
/// update to a moving target `Y` on top of installer version `X`.
pub fn installed_identifier(stamp: &str) -> &str {
    match stamp.split_once('-') {
        Some((_, identifier)) => identifier,
        None => stamp,
    }
}

pub fn is_stable_identifier(identifier: &str) -> bool {
    !identifier.is_empty() && identifier.chars().all(|ch| ch.is_ascii_digit() || ch == '.')
}

/// Version stamp to record after updating to `target` with the installer
/// files of `install_version`.
pub fn floating_version_stamp(install_version: &str, target: &str) -> String {
    if install_version == target {
        target.to_string()
    } else {
        format!("{install_version}-{target}")
    }
}

/// A declaration such as `define('_APP_VERSION_', '{version}')` that carries
/// a version inside a source file. Whitespace in the template matches any
/// run of whitespace.
#[derive(Debug, Clone)]
pub struct VersionDeclaration {
    template: String,
    pattern: Regex,
}

impl VersionDeclaration {
    pub fn new(template: &str) -> Result<Self> {
        let Some((head, tail)) = template.split_once(VERSION_PLACEHOLDER) else {
            return Err(anyhow!(
                "version declaration '{template}' lacks a {VERSION_PLACEHOLDER} placeholder"
            ));
        };
        if tail.contains(VERSION_PLACEHOLDER) {
            return Err(anyhow!(
                "version declaration '{template}' has more than one placeholder"
            ));
        }

        let source = format!(
            "{}(?P<version>[0-9A-Za-z._+-]+){}",
            template_regex(head),
            template_regex(tail)
        );
        let pattern = Regex::new(&source)
            .with_context(|| format!("invalid version declaration '{template}'"))?;
        Ok(Self {
            template: template.to_string(),
            pattern,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn parse(&self, text: &str) -> Option<String> {
        self.pattern
            .captures(text)
            .and_then(|captures| captures.name("version"))
            .map(|version| version.as_str().to_string())
    }

    pub fn render(&self, version: &str) -> String {
        self.template.replacen(VERSION_PLACEHOLDER, version, 1)
    }

    /// Replaces the first declaration in `text`; `None` when there is none.
    pub fn rewrite(&self, text: &str, version: &str) -> Option<String> {
        if !self.pattern.is_match(text) {
            return None;
        }
        let rendered = self.render(version);
        Some(self.pattern.replacen(text, 1, NoExpand(&rendered)).into_owned())
    }
}

fn template_regex(fragment: &str) -> String {
    let mut out = String::new();
    let mut in_whitespace = false;
    for ch in fragment.chars() {
        if ch.is_whitespace() {
            if !in_whitespace {
                out.push_str(r"\s*");
            }
            in_whitespace = true;
            continue;
        }
        in_whitespace = false;
        out.push_str(&regex::escape(&ch.to_string()));
    }
    out
}
