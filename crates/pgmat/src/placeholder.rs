//! Named placeholder scanning.
//!
//! Commands carry named placeholders such as `@user_id`. This module finds
//! them in SQL text while skipping string literals, quoted identifiers,
//! dollar-quoted bodies and comments, and only matches whole identifiers:
//! `@id` never matches inside `@ids`.

use std::collections::HashMap;
use std::ops::Range;

/// A named placeholder found in SQL text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder<'a> {
    /// Byte range of the placeholder, prefix included.
    pub range: Range<usize>,
    /// Identifier after the prefix.
    pub name: &'a str,
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Returns the byte offset just past the dollar-quote tag starting at `start`
/// (`$$` or `$tag$`), or `None` if `start` does not open a dollar quote.
fn dollar_tag_end(sql: &str, start: usize) -> Option<usize> {
    let rest = &sql[start + 1..];
    let mut chars = rest.char_indices();
    match chars.next() {
        Some((_, '$')) => return Some(start + 2),
        Some((_, c)) if c.is_alphabetic() || c == '_' => {}
        _ => return None,
    }
    for (i, c) in chars {
        if c == '$' {
            return Some(start + 1 + i + 1);
        }
        if !is_ident_char(c) {
            return None;
        }
    }
    None
}

/// Scan `sql` for placeholders introduced by `prefix`.
pub fn scan(sql: &str, prefix: char) -> Vec<Placeholder<'_>> {
    let bytes_len = sql.len();
    let mut found = Vec::new();
    let mut prev: Option<char> = None;
    let mut i = 0;

    while i < bytes_len {
        let Some(c) = sql[i..].chars().next() else {
            break;
        };
        let next = sql[i + c.len_utf8()..].chars().next();

        // String literal; E'...' strings honour backslash escapes.
        if c == '\'' {
            let escapes = matches!(prev, Some('E' | 'e'))
                && !sql[..i - 1].chars().next_back().is_some_and(is_ident_char);
            let mut j = i + 1;
            let mut chars = sql[j..].chars();
            while let Some(ch) = chars.next() {
                j += ch.len_utf8();
                if escapes && ch == '\\' {
                    if let Some(esc) = chars.next() {
                        j += esc.len_utf8();
                    }
                    continue;
                }
                if ch == '\'' {
                    break;
                }
            }
            i = j;
            prev = Some('\'');
            continue;
        }

        // Quoted identifier.
        if c == '"' {
            i = sql[i + 1..].find('"').map_or(bytes_len, |p| i + 1 + p + 1);
            prev = Some('"');
            continue;
        }

        // Line comment.
        if c == '-' && next == Some('-') {
            i = sql[i..].find('\n').map_or(bytes_len, |p| i + p + 1);
            prev = Some('\n');
            continue;
        }

        // Block comment (Postgres allows nesting).
        if c == '/' && next == Some('*') {
            let mut depth = 0usize;
            let mut j = i;
            while j < bytes_len {
                if sql[j..].starts_with("/*") {
                    depth += 1;
                    j += 2;
                } else if sql[j..].starts_with("*/") {
                    depth -= 1;
                    j += 2;
                    if depth == 0 {
                        break;
                    }
                } else {
                    j += sql[j..].chars().next().map_or(1, char::len_utf8);
                }
            }
            i = j;
            prev = Some(' ');
            continue;
        }

        // Dollar-quoted body.
        if c == '$' && !prev.is_some_and(is_ident_char) {
            if let Some(tag_end) = dollar_tag_end(sql, i) {
                let tag = &sql[i..tag_end];
                i = sql[tag_end..]
                    .find(tag)
                    .map_or(bytes_len, |p| tag_end + p + tag.len());
                prev = Some('$');
                continue;
            }
        }

        if c == prefix
            && !prev.is_some_and(|p| is_ident_char(p) || p == prefix)
            && next.is_some_and(is_ident_char)
        {
            let start = i;
            let name_start = i + c.len_utf8();
            let name_end = sql[name_start..]
                .char_indices()
                .find(|&(_, ch)| !is_ident_char(ch))
                .map_or(bytes_len, |(p, _)| name_start + p);
            found.push(Placeholder {
                range: start..name_end,
                name: &sql[name_start..name_end],
            });
            i = name_end;
            prev = sql[..name_end].chars().next_back();
            continue;
        }

        prev = Some(c);
        i += c.len_utf8();
    }

    found
}

/// Replace the first whole-word occurrence of the placeholder `full_name`
/// (prefix included). Returns `None` when the placeholder does not occur.
pub fn replace_first(
    sql: &str,
    prefix: char,
    full_name: &str,
    replacement: &str,
) -> Option<String> {
    let name = full_name.strip_prefix(prefix)?;
    let hit = scan(sql, prefix).into_iter().find(|p| p.name == name)?;
    let mut out = String::with_capacity(sql.len() + replacement.len());
    out.push_str(&sql[..hit.range.start]);
    out.push_str(replacement);
    out.push_str(&sql[hit.range.end..]);
    Some(out)
}

/// Rewrite named placeholders into `$1, $2, ...`.
///
/// `names` lists the full (prefixed) parameter names available on the
/// command. Each referenced name gets one positional index, assigned in order
/// of first appearance; repeated references reuse it. Placeholders with no
/// matching parameter are left untouched. Returns the rewritten SQL and, for
/// each positional index, the position of the parameter in `names`.
pub fn to_positional(sql: &str, prefix: char, names: &[&str]) -> (String, Vec<usize>) {
    let lookup: HashMap<&str, usize> = names
        .iter()
        .enumerate()
        .map(|(i, n)| (n.strip_prefix(prefix).unwrap_or(n), i))
        .collect();

    let mut out = String::with_capacity(sql.len());
    let mut order: Vec<usize> = Vec::new();
    let mut assigned: HashMap<usize, usize> = HashMap::new();
    let mut last = 0;

    for p in scan(sql, prefix) {
        let Some(&param_idx) = lookup.get(p.name) else {
            continue;
        };
        let position = *assigned.entry(param_idx).or_insert_with(|| {
            order.push(param_idx);
            order.len()
        });
        out.push_str(&sql[last..p.range.start]);
        out.push('$');
        out.push_str(&position.to_string());
        last = p.range.end;
    }
    out.push_str(&sql[last..]);
    (out, order)
}

/// Substitute placeholders with caller-rendered text (used for diagnostics).
pub fn substitute<F>(sql: &str, prefix: char, mut render: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    let mut out = String::with_capacity(sql.len());
    let mut last = 0;
    for p in scan(sql, prefix) {
        let Some(text) = render(p.name) else {
            continue;
        };
        out.push_str(&sql[last..p.range.start]);
        out.push_str(&text);
        last = p.range.end;
    }
    out.push_str(&sql[last..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(sql: &str) -> Vec<&str> {
        scan(sql, '@').into_iter().map(|p| p.name).collect()
    }

    #[test]
    fn finds_simple_placeholders() {
        assert_eq!(
            names("SELECT * FROM t WHERE a = @a AND b IN (@ids)"),
            vec!["a", "ids"]
        );
    }

    #[test]
    fn skips_literals_identifiers_and_comments() {
        let sql = "SELECT '@x', \"@y\" -- @z\n FROM t /* @w /* @v */ */ WHERE c = @c";
        assert_eq!(names(sql), vec!["c"]);
    }

    #[test]
    fn skips_escape_strings() {
        assert_eq!(names(r"SELECT E'it\'s @x' , @y"), vec!["y"]);
    }

    #[test]
    fn skips_dollar_quoted_bodies() {
        let sql = "DO $body$ BEGIN PERFORM @inner; END $body$; SELECT @outer, $$ @q $$";
        assert_eq!(names(sql), vec!["outer"]);
    }

    #[test]
    fn ignores_operators_and_double_prefix() {
        assert_eq!(names("SELECT @@version, a @> b, @ 5, x@y"), Vec::<&str>::new());
    }

    #[test]
    fn colon_prefix_ignores_casts() {
        let found: Vec<_> = scan("SELECT :id::int, a::text", ':')
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(found, vec!["id"]);
    }

    #[test]
    fn replace_first_respects_word_boundaries() {
        let sql = "WHERE a IN (@ids) AND b = @id";
        assert_eq!(
            replace_first(sql, '@', "@id", "@id_0").as_deref(),
            Some("WHERE a IN (@ids) AND b = @id_0")
        );
        assert_eq!(replace_first(sql, '@', "@missing", "x"), None);
    }

    #[test]
    fn positional_reuses_indices_and_skips_unknown() {
        let (sql, order) = to_positional(
            "SELECT @b, @a, @b, @unknown",
            '@',
            &["@a", "@b", "@unused"],
        );
        assert_eq!(sql, "SELECT $1, $2, $1, @unknown");
        assert_eq!(order, vec![1, 0]);
    }

    #[test]
    fn substitute_renders_known_names() {
        let out = substitute("a = @a AND b = @b", '@', |n| (n == "a").then(|| "1".to_string()));
        assert_eq!(out, "a = 1 AND b = @b");
    }
}
