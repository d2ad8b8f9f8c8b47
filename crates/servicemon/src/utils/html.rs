use std::sync::OnceLock;

use regex::{Captures, Regex};

/// Decodes the HTML character references that registry records embed in
/// access URLs (`&amp;` between query parameters being the usual one).
/// Unknown named references are left untouched.
#[must_use]
pub fn unescape(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }

    entity_regex()
        .replace_all(value, |captures: &Captures<'_>| {
            decode_entity(&captures[1]).unwrap_or_else(|| captures[0].to_string())
        })
        .into_owned()
}

fn decode_entity(body: &str) -> Option<String> {
    let decoded = match body {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        _ => {
            let code = if let Some(hex) = body
                .strip_prefix("#x")
                .or_else(|| body.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok()?
            } else if let Some(decimal) = body.strip_prefix('#') {
                decimal.parse::<u32>().ok()?
            } else {
                return None;
            };
            char::from_u32(code)?
        }
    };
    Some(decoded.to_string())
}

fn entity_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9A-Fa-f]{1,6}|[A-Za-z]{2,8});")
            .expect("html entity regex should compile")
    })
}

#[cfg(test)]
mod tests {
    use super::unescape;

    #[test]
    fn decodes_ampersands_in_access_urls() {
        assert_eq!(
            unescape("http://example.org/cone?CAT=csc&amp;VERB=1&amp;"),
            "http://example.org/cone?CAT=csc&VERB=1&"
        );
    }

    #[test]
    fn decodes_numeric_references() {
        assert_eq!(unescape("a&#38;b&#x3D;c"), "a&b=c");
    }

    #[test]
    fn leaves_unknown_and_bare_ampersands() {
        assert_eq!(unescape("a&bogus;b & c"), "a&bogus;b & c");
    }
}
