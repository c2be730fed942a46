//! `${VAR}` placeholder substitution for raw config text

use std::sync::LazyLock;

use regex::{Captures, Regex};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z0-9_]+)\}").expect("placeholder pattern is valid")
});

/// Replace every `${VAR}` with the value `lookup` returns for `VAR`.
///
/// Unknown variables become empty strings and are logged.
pub fn substitute_env(content: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    PLACEHOLDER
        .replace_all(content, |caps: &Captures<'_>| {
            let name = &caps[1];
            match lookup(name) {
                Some(value) => value,
                None => {
                    tracing::warn!(variable = name, "environment variable not set");
                    String::new()
                }
            }
        })
        .into_owned()
}
