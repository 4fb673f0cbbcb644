//! `?` placeholder scanning.
//!
//! A single pass over the UTF-8 bytes of a command finds the placeholders
//! that sit outside string literals, quoted identifiers and comments.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexState {
    Normal,
    /// Inside a quoted literal; `single` tells which quote closes it.
    String { single: bool },
    /// Backslash seen inside a literal.
    Escape { single: bool },
    SlashStarComment,
    /// `#`, `--` or `//` up to the end of the line.
    EolComment,
    Backtick,
}

/// Command text split at its placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    sql: String,
    param_positions: Vec<usize>,
}

impl ParsedQuery {
    /// Scan `sql`. With `no_backslash_escapes` a backslash is an ordinary
    /// character inside literals.
    pub fn parse(sql: &str, no_backslash_escapes: bool) -> Self {
        let query = sql.as_bytes();
        let mut param_positions = Vec::new();
        let mut state = LexState::Normal;
        let mut last = 0u8;

        for (i, &c) in query.iter().enumerate() {
            if let LexState::Escape { single } = state {
                state = LexState::String { single };
                last = c;
                continue;
            }

            match c {
                b'*' if state == LexState::Normal && last == b'/' => {
                    state = LexState::SlashStarComment;
                    // the opening star cannot also close the comment
                    last = 0;
                    continue;
                }
                b'/' if state == LexState::SlashStarComment && last == b'*' => {
                    state = LexState::Normal;
                    last = 0;
                    continue;
                }
                b'/' | b'-' if state == LexState::Normal && last == c => {
                    state = LexState::EolComment;
                }
                b'#' if state == LexState::Normal => state = LexState::EolComment,
                b'\n' if state == LexState::EolComment => state = LexState::Normal,
                b'"' | b'\'' => {
                    let single = c == b'\'';
                    match state {
                        LexState::Normal => state = LexState::String { single },
                        LexState::String { single: s } if s == single => {
                            state = LexState::Normal;
                        }
                        _ => {}
                    }
                }
                b'\\' if !no_backslash_escapes => {
                    if let LexState::String { single } = state {
                        state = LexState::Escape { single };
                    }
                }
                b'?' if state == LexState::Normal => param_positions.push(i),
                b'`' => match state {
                    LexState::Backtick => state = LexState::Normal,
                    LexState::Normal => state = LexState::Backtick,
                    _ => {}
                },
                _ => {}
            }
            last = c;
        }

        Self {
            sql: sql.to_string(),
            param_positions,
        }
    }

    /// The original text.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// The UTF-8 encoding sent on the wire.
    pub fn query(&self) -> &[u8] {
        self.sql.as_bytes()
    }

    /// Byte offsets of the placeholders, in order.
    pub fn param_positions(&self) -> &[usize] {
        &self.param_positions
    }

    pub fn param_count(&self) -> usize {
        self.param_positions.len()
    }

    /// Text between placeholders: `param_count() + 1` parts.
    pub fn parts(&self) -> impl Iterator<Item = &[u8]> + '_ {
        let query = self.query();
        let mut start = 0;
        let mut positions = self.param_positions.iter();
        std::iter::from_fn(move || {
            if start > query.len() {
                return None;
            }
            match positions.next() {
                Some(&pos) => {
                    let part = &query[start..pos];
                    start = pos + 1;
                    Some(part)
                }
                None => {
                    let part = &query[start..];
                    start = query.len() + 1;
                    Some(part)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positions(sql: &str) -> Vec<usize> {
        ParsedQuery::parse(sql, false).param_positions().to_vec()
    }

    #[test]
    fn test_plain_placeholders() {
        assert_eq!(positions("SELECT ?, ?"), vec![7, 10]);
        assert!(positions("SELECT 1").is_empty());
    }

    #[test]
    fn test_quoted_regions_are_skipped() {
        assert!(positions("SELECT '?'").is_empty());
        assert!(positions("SELECT \"?\"").is_empty());
        assert!(positions("SELECT `a?b` FROM t").is_empty());
        assert!(positions("SELECT 'it''s ?'").is_empty());
        assert_eq!(positions("SELECT '\"', ?"), vec![12]);
        assert_eq!(positions("SELECT \"'\", ?"), vec![12]);
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(positions("SELECT 1 -- ?\n, ?"), vec![16]);
        assert_eq!(positions("SELECT 1 # ?\n, ?"), vec![15]);
        assert_eq!(positions("SELECT /* ? */ ?"), vec![15]);
        assert!(positions("SELECT 1 // ?").is_empty());
        assert_eq!(positions("SELECT /*/ ? */ ?"), vec![16]);
    }

    #[test]
    fn test_backslash_escapes() {
        // the escaped quote does not close the literal
        assert!(positions("SELECT 'a\\' ?'").is_empty());
        // without backslash escapes it does
        let parsed = ParsedQuery::parse("SELECT 'a\\' ?", true);
        assert_eq!(parsed.param_positions(), &[12]);
    }

    #[test]
    fn test_positions_are_byte_offsets() {
        assert_eq!(positions("SELECT 'é', ?"), vec![13]);
    }

    #[test]
    fn test_parts() {
        let parsed = ParsedQuery::parse("INSERT INTO t VALUES (?, ?)", false);
        let parts: Vec<&[u8]> = parsed.parts().collect();
        assert_eq!(parts, vec![&b"INSERT INTO t VALUES ("[..], b", ", b")"]);
        assert_eq!(parsed.param_count(), 2);

        let parsed = ParsedQuery::parse("?", false);
        let parts: Vec<&[u8]> = parsed.parts().collect();
        assert_eq!(parts, vec![&b""[..], b""]);
    }
}
