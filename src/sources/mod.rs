//! Source parsing, URL identity and inline citation markers.
//!
//! Agents emit sources either as strings (`"3. Title — https://…"`) or as
//! objects (`{title, url, snippet}`); both become [`CitedSource`]s here.
//! Inline markers are `[N]` or comma lists `[N, M]`.

pub mod consolidator;

pub use consolidator::{ConsolidationReport, SourceConsolidator};

use crate::types::{CitedSource, SourceRecord};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+(?:\s*,\s*\d+)*)\]").expect("valid marker regex"));

static LEADING_INDEX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:\[(\d+)\]|(\d+)[.)])\s*").expect("valid index regex")
});

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"']+"#).expect("valid url regex"));

const URL_TRAILING: &[char] = &['.', ',', ')', ';', ']'];

// ============= URL identity =============

/// Normalized dedup identity of a URL, or `None` when it is not an absolute
/// `https` URL.
///
/// Lowercases scheme and host, drops the fragment and strips a trailing `/`
/// from non-root paths. The query string is kept.
pub fn normalize_url(raw: &str) -> Option<String> {
    let mut parsed = url::Url::parse(raw.trim()).ok()?;
    if parsed.scheme() != "https" || parsed.host_str().is_none_or(str::is_empty) {
        return None;
    }
    parsed.set_fragment(None);
    let path = parsed.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        parsed.set_path(path.trim_end_matches('/'));
    }
    Some(parsed.to_string())
}

// ============= Parsing =============

/// Parses one free-form source line. `position` is the 1-based position in
/// the emitter's list, used when the line carries no explicit index.
pub fn parse_source_line(line: &str, position: usize) -> Option<CitedSource> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (local_index, rest) = match LEADING_INDEX_RE.captures(line) {
        Some(caps) => {
            let index = caps
                .get(1)
                .or_else(|| caps.get(2))
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(position);
            let consumed = caps.get(0).map(|m| m.end()).unwrap_or(0);
            (index, &line[consumed..])
        }
        None => (position, line),
    };

    let (url, title) = match URL_RE.find(rest) {
        Some(m) => {
            let url = m.as_str().trim_end_matches(URL_TRAILING).to_string();
            let title = format!("{}{}", &rest[..m.start()], &rest[m.end()..]);
            (Some(url), clean_title(&title))
        }
        None => (None, clean_title(rest)),
    };

    Some(CitedSource {
        local_index,
        record: SourceRecord {
            title,
            url,
            snippet: String::new(),
        },
    })
}

fn clean_title(title: &str) -> String {
    title
        .trim()
        .trim_matches(|c: char| c == '—' || c == '–' || c == '-' || c == ':' || c == '|')
        .trim()
        .trim_matches(|c: char| c == '(' || c == ')')
        .trim()
        .to_string()
}

/// Parses the `sources` entry of a structured result.
pub fn parse_source_entries(value: Option<&Value>) -> Vec<CitedSource> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };

    items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| {
            let position = i + 1;
            match item {
                Value::String(line) => parse_source_line(line, position),
                Value::Object(map) => {
                    let text = |key: &str| {
                        map.get(key)
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .trim()
                            .to_string()
                    };
                    let local_index = map
                        .get("index")
                        .or_else(|| map.get("id"))
                        .and_then(Value::as_u64)
                        .map(|n| n as usize)
                        .unwrap_or(position);
                    let url = Some(text("url")).filter(|u| !u.is_empty());
                    Some(CitedSource {
                        local_index,
                        record: SourceRecord {
                            title: text("title"),
                            url,
                            snippet: text("snippet"),
                        },
                    })
                }
                _ => None,
            }
        })
        .collect()
}

/// String items of a JSON array; anything else is ignored.
pub fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

// ============= Markers =============

/// Every number referenced by a marker in `text`, in order of appearance.
pub fn marker_indices(text: &str) -> Vec<usize> {
    MARKER_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .flat_map(|m| {
            m.as_str()
                .split(',')
                .filter_map(|n| n.trim().parse::<usize>().ok())
                .collect::<Vec<_>>()
        })
        .collect()
}

pub fn has_markers(text: &str) -> bool {
    MARKER_RE.is_match(text)
}

/// Rewrites every marker number through `map`.
///
/// Unmapped numbers are removed when `drop_on_miss` is set and kept verbatim
/// otherwise. An emptied marker disappears with one preceding space, and
/// identical adjacent markers collapse to one.
pub fn rewrite_markers<F>(text: &str, map: F, drop_on_miss: bool) -> String
where
    F: Fn(usize) -> Option<usize>,
{
    let mut out = String::with_capacity(text.len());
    let mut last_end = 0;
    let mut previous: Option<(String, usize)> = None;

    for caps in MARKER_RE.captures_iter(text) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&text[last_end..whole.start()]);
        last_end = whole.end();

        let mut numbers: Vec<usize> = Vec::new();
        for n in inner.as_str().split(',').filter_map(|n| n.trim().parse::<usize>().ok()) {
            let mapped = match map(n) {
                Some(g) => Some(g),
                None if drop_on_miss => None,
                None => Some(n),
            };
            if let Some(g) = mapped {
                if !numbers.contains(&g) {
                    numbers.push(g);
                }
            }
        }

        if numbers.is_empty() {
            if out.ends_with(' ') {
                out.pop();
            }
            continue;
        }

        let rendered = format!(
            "[{}]",
            numbers
                .iter()
                .map(usize::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
        if let Some((prev, len)) = &previous {
            if *prev == rendered && *len == out.len() {
                continue;
            }
        }
        out.push_str(&rendered);
        previous = Some((rendered, out.len()));
    }

    out.push_str(&text[last_end..]);
    out
}

/// Applies [`rewrite_markers`] to every string inside a JSON value.
pub fn rewrite_value<F>(value: &mut Value, map: &F, drop_on_miss: bool)
where
    F: Fn(usize) -> Option<usize>,
{
    match value {
        Value::String(s) => {
            if has_markers(s) {
                *s = rewrite_markers(s, map, drop_on_miss);
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_value(item, map, drop_on_miss);
            }
        }
        Value::Object(fields) => {
            for (_, field) in fields.iter_mut() {
                rewrite_value(field, map, drop_on_miss);
            }
        }
        _ => {}
    }
}

/// Collects every string inside a JSON value.
pub fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(fields) => fields.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("HTTPS://Example.COM/Path/#frag").as_deref(),
            Some("https://example.com/Path")
        );
        assert_eq!(
            normalize_url("https://example.com").as_deref(),
            Some("https://example.com/")
        );
        assert_eq!(
            normalize_url("https://example.com/a?q=1").as_deref(),
            Some("https://example.com/a?q=1")
        );
        assert_eq!(normalize_url("http://example.com/a"), None);
        assert_eq!(normalize_url("example.com/a"), None);
        assert_eq!(normalize_url(""), None);
    }

    #[test]
    fn test_parse_source_line_with_index() {
        let source = parse_source_line("3. Market Report — https://a.example/r.", 1).unwrap();
        assert_eq!(source.local_index, 3);
        assert_eq!(source.record.title, "Market Report");
        assert_eq!(source.record.url.as_deref(), Some("https://a.example/r"));

        let bracketed = parse_source_line("[2] Title - https://b.example/x)", 1).unwrap();
        assert_eq!(bracketed.local_index, 2);
        assert_eq!(bracketed.record.url.as_deref(), Some("https://b.example/x"));
    }

    #[test]
    fn test_parse_source_line_positional_and_bare() {
        let bare = parse_source_line("https://c.example/page", 4).unwrap();
        assert_eq!(bare.local_index, 4);
        assert_eq!(bare.record.title, "");

        let no_url = parse_source_line("Industry folklore", 2).unwrap();
        assert_eq!(no_url.local_index, 2);
        assert!(!no_url.record.has_url());
        assert!(parse_source_line("   ", 1).is_none());
    }

    #[test]
    fn test_parse_source_entries_mixed() {
        let value = json!([
            "1. A — https://a.example",
            {"title": "B", "url": "https://b.example", "snippet": "s"},
            {"title": "C", "index": 7},
            42
        ]);
        let parsed = parse_source_entries(Some(&value));
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[1].local_index, 2);
        assert_eq!(parsed[1].record.snippet, "s");
        assert_eq!(parsed[2].local_index, 7);
        assert!(parsed[2].record.url.is_none());
        assert!(parse_source_entries(None).is_empty());
    }

    #[test]
    fn test_marker_indices() {
        assert_eq!(marker_indices("a [1] b [2, 3] c [x]"), vec![1, 2, 3]);
        assert!(marker_indices("none").is_empty());
    }

    #[test]
    fn test_rewrite_markers_drop_and_collapse() {
        let map = |n: usize| match n {
            1 => Some(5),
            2 => Some(5),
            _ => None,
        };
        assert_eq!(rewrite_markers("growth [3].", map, true), "growth.");
        assert_eq!(rewrite_markers("a [1][2] b", map, true), "a [5] b");
        assert_eq!(rewrite_markers("a [1, 2, 3]", map, true), "a [5]");
        assert_eq!(rewrite_markers("a [3]", map, false), "a [3]");
        assert_eq!(rewrite_markers("no markers", map, true), "no markers");
    }

    #[test]
    fn test_rewrite_value_walks_nested_strings() {
        let mut value = json!({"summary": "x [1]", "findings": ["y [2]", {"z": "[9]"}]});
        rewrite_value(&mut value, &|n| if n < 3 { Some(n + 10) } else { None }, true);
        assert_eq!(value["summary"], "x [11]");
        assert_eq!(value["findings"][0], "y [12]");
        assert_eq!(value["findings"][1]["z"], "");
    }
}
