//! Parsing of provider CLI output

use std::sync::LazyLock;

use regex::Regex;

static HTTPS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://[A-Za-z0-9][A-Za-z0-9.-]*[A-Za-z0-9]").expect("Invalid regex pattern")
});

static BARE_HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9][A-Za-z0-9-]*(?:\.[A-Za-z0-9-]+)+\b").expect("Invalid regex pattern")
});

/// First `https://` URL in `text` whose host ends with `domain_suffix`
pub fn find_url(text: &str, domain_suffix: &str) -> Option<String> {
    HTTPS_URL
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .find(|url| url.ends_with(domain_suffix))
}

/// Like [`find_url`] but also accepts bare hostnames, which are given an
/// `https://` scheme
pub fn find_host_url(text: &str, domain_suffix: &str) -> Option<String> {
    find_url(text, domain_suffix).or_else(|| {
        BARE_HOST
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .find(|host| host.ends_with(domain_suffix))
            .map(|host| format!("https://{}", host))
    })
}

/// Whether a provisioning failure only says the resource already exists
pub fn is_already_exists(text: &str) -> bool {
    let text = text.to_lowercase();
    text.contains("already exists") || text.contains("already been taken")
}

/// Non-empty lines of a command output, in order
pub fn lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect()
}
