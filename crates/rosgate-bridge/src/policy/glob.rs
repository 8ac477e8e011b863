//! Glob-to-regex translation for policy rules.
//!
//! Used only at config-parse time: rule values in the `authentication` block
//! are written as globs (`client-*`) and compiled down to anchored regexes.

/// Translate a glob pattern to an anchored regex string.
///
/// `*` becomes `.*`, `?` becomes `.`, every other regex metacharacter is
/// escaped, and the result is anchored with `^...$`.
pub fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    for c in pattern.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' | '^' | '$' | '.' | '|' | '+' | '(' | ')' | '[' | ']' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcards_translate() {
        assert_eq!(glob_to_regex("client-*"), "^client-.*$");
        assert_eq!(glob_to_regex("c?ient"), "^c.ient$");
    }

    #[test]
    fn metacharacters_are_escaped() {
        assert_eq!(glob_to_regex("a.b+c"), r"^a\.b\+c$");
        assert_eq!(glob_to_regex("(x)[y]{z}"), r"^\(x\)\[y\]\{z\}$");
    }
}
