//! Search-box shorthand (`host:foo`, `mac:aa:bb`, ...) rewritten into
//! query-grammar form.

use crate::error::{QueryError, QueryResult};
use regex::{Captures, Regex};
use warden_store::{attrs, types};

const SHORTHAND: &str = r#"\b(host|id|version|mac|user):([^\s()'"]+)"#;

/// Rewrite every shorthand token in one pass, so a rewritten value is
/// never rewritten again.
pub fn rewrite(query: &str) -> QueryResult<String> {
    let regex = Regex::new(SHORTHAND).map_err(|e| QueryError::InvalidPattern {
        pattern: SHORTHAND.to_string(),
        message: e.to_string(),
    })?;

    let rewritten = regex.replace_all(query, |caps: &Captures<'_>| {
        let value = &caps[2];
        match &caps[1] {
            "host" => format!("{} contains '{}'", attrs::HOST, value),
            "id" => format!(
                "({} contains '{}' and {} = {})",
                attrs::SUBJECT,
                value,
                attrs::TYPE,
                types::CLIENT
            ),
            "version" => format!("{} contains '{}'", attrs::VERSION, value),
            "mac" => format!("{} contains '{}'", attrs::MAC, value),
            _ => format!("{} contains '{}'", attrs::USERNAMES, value),
        }
    });
    Ok(rewritten.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrites() {
        assert_eq!(
            rewrite("host:foo and mac:aa:bb").unwrap(),
            "Host contains 'foo' and MAC contains 'aa:bb'"
        );
        assert_eq!(
            rewrite("id:C.12ab").unwrap(),
            "(subject contains 'C.12ab' and type = Client)"
        );
        assert_eq!(
            rewrite("version:3.0 or user:alice").unwrap(),
            "Version contains '3.0' or Usernames contains 'alice'"
        );
    }

    #[test]
    fn test_value_is_not_rewritten_twice() {
        assert_eq!(rewrite("host:user:x").unwrap(), "Host contains 'user:x'");
    }

    #[test]
    fn test_words_ending_in_prefix_are_left_alone() {
        assert_eq!(rewrite("localhost:1").unwrap(), "localhost:1");
        assert_eq!(rewrite("Host contains foo").unwrap(), "Host contains foo");
    }
}
