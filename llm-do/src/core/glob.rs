//! Glob patterns for sandbox listings, compiled to anchored regexes.
//!
//! Supported syntax:
//! - `*` matches within one path component (no `/`)
//! - `**/` matches zero or more whole directories, so `**/*.png` also
//!   matches `a.png` at the root
//! - `**` elsewhere matches anything including `/`
//! - `?` matches one character other than `/`
//! - `[...]` character classes, with `[!...]` negation
//!
//! Everything else is literal. Braces are not expanded.

use regex::Regex;

use crate::error::{Error, Result};

/// Compile a glob pattern into a regex matching `/`-separated relative paths.
pub fn glob_to_regex(glob: &str) -> Result<Regex> {
    let pattern = glob_to_regex_string(glob)?;
    Regex::new(&pattern)
        .map_err(|err| Error::InvalidInput(format!("invalid glob pattern '{glob}': {err}")))
}

fn glob_to_regex_string(glob: &str) -> Result<String> {
    let chars: Vec<char> = glob.chars().collect();
    let mut regex = String::from("^");
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                let at_component_start = i == 0 || chars[i - 1] == '/';
                if at_component_start && chars.get(i + 2) == Some(&'/') {
                    regex.push_str("(?:[^/]*/)*");
                    i += 3;
                } else {
                    regex.push_str(".*");
                    i += 2;
                }
            }
            '*' => {
                regex.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                regex.push_str("[^/]");
                i += 1;
            }
            '[' => {
                let negated = chars.get(i + 1) == Some(&'!');
                let body_start = if negated { i + 2 } else { i + 1 };
                // A `]` right after the opening bracket is a literal member.
                let search_from = if chars.get(body_start) == Some(&']') {
                    body_start + 1
                } else {
                    body_start
                };
                let close = chars
                    .get(search_from..)
                    .and_then(|rest| rest.iter().position(|c| *c == ']'))
                    .map(|offset| search_from + offset)
                    .ok_or_else(|| {
                        Error::InvalidInput(format!(
                            "unclosed '[' at position {i} in glob pattern '{glob}'"
                        ))
                    })?;
                regex.push('[');
                if negated {
                    regex.push('^');
                }
                push_class_body(&mut regex, &chars[body_start..close]);
                regex.push(']');
                i = close + 1;
            }
            other => {
                regex.push_str(&regex::escape(&other.to_string()));
                i += 1;
            }
        }
    }

    regex.push('$');
    Ok(regex)
}

/// Copy a class body, escaping everything the regex engine would read as
/// class syntax. Only single `-` ranges keep their meaning.
fn push_class_body(regex: &mut String, body: &[char]) {
    for (k, c) in body.iter().enumerate() {
        match c {
            '\\' | '[' | ']' | '^' | '&' | '~' => {
                regex.push('\\');
                regex.push(*c);
            }
            '-' if k > 0 && body[k - 1] == '-' => regex.push_str("\\-"),
            _ => regex.push(*c),
        }
    }
}
