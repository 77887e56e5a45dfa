//! Reading and writing `.properties` files.
//!
//! Covers the parts of the format config files use: `#` and `!` comments,
//! `=`, `:` or whitespace separators, backslash escapes (including `\uXXXX`)
//! and continuation lines. Files are read as UTF-8.

use std::{fs, path::Path};

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;

/// Key/value pairs in file order
pub type PropertyMap = IndexMap<String, String>;

/// Parse properties text.
pub fn parse(val: &str) -> Result<PropertyMap> {
    let mut res = PropertyMap::new();
    let mut lines = val.lines().enumerate();
    while let Some((number, line)) = lines.next() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
            continue;
        }

        let mut logical = trimmed.to_owned();
        while ends_with_continuation(&logical) {
            logical.pop();
            match lines.next() {
                Some((_, next)) => logical.push_str(next.trim_start()),
                None => break,
            }
        }

        let (key, value) = split_entry(&logical);
        let key = unescape(key).with_context(|| format!("line {}", number + 1))?;
        let value = unescape(value).with_context(|| format!("line {}", number + 1))?;
        res.insert(key, value);
    }
    Ok(res)
}

/// Read a properties file. A missing file is empty.
pub fn read<P: AsRef<Path>>(path: P) -> Result<PropertyMap> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(PropertyMap::new());
    }
    let val = fs::read_to_string(path).with_context(|| format!("reading {path:?}"))?;
    parse(&val).with_context(|| format!("parsing {path:?}"))
}

/// Render properties, one per line, in map order.
pub fn render(properties: &PropertyMap) -> String {
    properties
        .iter()
        .map(|(k, v)| format!("{}={}\n", escape(k, true), escape(v, false)))
        .collect()
}

/// An odd number of trailing backslashes continues the line.
fn ends_with_continuation(line: &str) -> bool {
    line.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1
}

fn split_entry(line: &str) -> (&str, &str) {
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' => return (&line[..i], line[i + 1..].trim_start()),
            c if c.is_whitespace() => {
                let rest = line[i..].trim_start();
                let rest = rest
                    .strip_prefix(['=', ':'])
                    .map(str::trim_start)
                    .unwrap_or(rest);
                return (&line[..i], rest);
            }
            _ => {}
        }
    }
    (line, "")
}

fn unescape(val: &str) -> Result<String> {
    let mut res = String::with_capacity(val.len());
    let mut chars = val.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            res.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => res.push('\t'),
            Some('n') => res.push('\n'),
            Some('r') => res.push('\r'),
            Some('f') => res.push('\u{c}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                let code = u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32);
                match code {
                    Some(c) if hex.len() == 4 => res.push(c),
                    _ => bail!("invalid unicode escape `\\u{hex}`"),
                }
            }
            Some(other) => res.push(other),
            None => {}
        }
    }
    Ok(res)
}

fn escape(val: &str, is_key: bool) -> String {
    let mut res = String::with_capacity(val.len());
    for (i, c) in val.chars().enumerate() {
        match c {
            '\\' => res.push_str("\\\\"),
            '\n' => res.push_str("\\n"),
            '\r' => res.push_str("\\r"),
            '\t' => res.push_str("\\t"),
            '\u{c}' => res.push_str("\\f"),
            '=' | ':' | '#' | '!' if is_key => {
                res.push('\\');
                res.push(c);
            }
            ' ' if is_key || i == 0 => res.push_str("\\ "),
            c => res.push(c),
        }
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_separators_and_comments() -> Result<()> {
        let parsed = parse(
            "# comment\n\
             ! also a comment\n\
             a=1\n\
             b : 2\n\
             c 3\n\
             \n\
             d=\n",
        )?;
        let pairs: Vec<_> = parsed.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        assert_eq!(pairs, vec![("a", "1"), ("b", "2"), ("c", "3"), ("d", "")]);
        Ok(())
    }

    #[test]
    fn parse_escapes_and_continuations() -> Result<()> {
        let parsed = parse("url=jdbc\\:mysql://db\\\n    /orders\nkey\\ with\\ space=\\u00e9\\n\n")?;
        assert_eq!(parsed["url"], "jdbc:mysql://db/orders");
        assert_eq!(parsed["key with space"], "é\n");
        assert!(parse("bad=\\u12").is_err());
        Ok(())
    }

    #[test]
    fn render_escapes_what_parse_reads() -> Result<()> {
        let mut properties = PropertyMap::new();
        properties.insert("gateway.a=b".to_owned(), " leading space".to_owned());
        properties.insert("plain".to_owned(), "C:\\temp\nnext".to_owned());
        let rendered = render(&properties);
        assert_eq!(parse(&rendered)?, properties);
        Ok(())
    }

    #[test]
    fn missing_files_are_empty() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(read(dir.path().join("nope.properties"))?.is_empty());
        Ok(())
    }
}
