//! Glob-to-`LIKE` pattern translation.
//!
//! Key patterns use a reduced Redis glob syntax: `*` matches any sequence
//! (including the empty one) and `?` matches exactly one character. There are
//! no character classes or backslash escapes; every other character matches
//! itself. SQLite's own `LIKE` wildcards (`%`, `_`) and the escape character
//! are escaped so they too match themselves.

use std::fmt;

/// The escape character declared in the `LIKE … ESCAPE` clause.
pub const LIKE_ESCAPE: char = '\\';

/// A pattern ready to be bound to `key LIKE ?1 ESCAPE '\'`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikePattern(String);

impl LikePattern {
    /// Translate a glob into its `LIKE` equivalent.
    ///
    /// The translation is a single left-to-right pass, so an escaped character
    /// is never substituted a second time.
    pub fn from_glob(glob: &str) -> Self {
        let mut out = String::with_capacity(glob.len() * 2);
        for ch in glob.chars() {
            match ch {
                '%' | '_' | LIKE_ESCAPE => {
                    out.push(LIKE_ESCAPE);
                    out.push(ch);
                }
                '*' => out.push('%'),
                '?' => out.push('_'),
                other => out.push(other),
            }
        }
        Self(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LikePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
