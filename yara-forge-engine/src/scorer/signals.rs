//! 规则级质量信号检测

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::{PatternDef, PatternKind};

/// hex 串中的无上界跳转：`[-]`、`[4-]`
static UNBOUNDED_JUMP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\s*\d*\s*-\s*\]").unwrap());

/// hex 串中通配字节占比超过该值视为过宽
const WILDCARD_RATIO: f64 = 0.5;

/// 支持的日期格式（按常见程度排列）
const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y", "%d/%m/%Y"];

/// 拆出模式值本体（不含修饰符）
fn pattern_value(body: &str) -> &str {
    let body = body.trim();
    match PatternKind::of_body(body) {
        PatternKind::Hex => body.find('}').map_or(body, |end| &body[..=end]),
        PatternKind::Regex | PatternKind::Text => {
            let delimiter = if body.starts_with('/') { '/' } else { '"' };
            let mut escaped = false;
            for (i, c) in body.char_indices().skip(1) {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == delimiter {
                    return &body[..=i];
                }
            }
            body
        }
    }
}

/// hex 串中的字节记号：`4D`、`??`、`?A`（跳转与分组符号除外）
fn hex_tokens(hex: &str) -> Vec<String> {
    let digits: String = hex
        .chars()
        .scan(0usize, |depth, c| {
            // 跳过 `[...]` 跳转内容
            match c {
                '[' => *depth += 1,
                ']' => {
                    *depth = depth.saturating_sub(1);
                    return Some(None);
                }
                _ => {}
            }
            if *depth > 0 {
                return Some(None);
            }
            Some(Some(c))
        })
        .flatten()
        .filter(|c| c.is_ascii_hexdigit() || *c == '?')
        .collect();
    digits
        .as_bytes()
        .chunks(2)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect()
}

/// 文本字面量的字节数（`\xNN` 与其它转义各计 1 字节）
fn text_len(literal: &str) -> usize {
    let inner = literal
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(literal);
    let mut len = 0;
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if chars.next() == Some('x') {
                chars.next();
                chars.next();
            }
            len += 1;
        } else {
            len += c.len_utf8();
        }
    }
    len
}

/// 是否包含过宽的通配
pub fn is_broad_wildcard(pattern: &PatternDef) -> bool {
    let value = pattern_value(&pattern.body);
    match pattern.kind() {
        PatternKind::Hex => {
            if UNBOUNDED_JUMP.is_match(value) {
                return true;
            }
            let tokens = hex_tokens(value);
            if tokens.is_empty() {
                return false;
            }
            let wildcards = tokens.iter().filter(|t| t.contains('?')).count();
            wildcards as f64 / tokens.len() as f64 > WILDCARD_RATIO
        }
        PatternKind::Regex => {
            let inner = value
                .strip_prefix('/')
                .and_then(|s| s.strip_suffix('/'))
                .unwrap_or(value);
            let unbounded = |s: &str| s == ".*" || s == ".+";
            let leading = inner.get(..2).is_some_and(unbounded);
            let trailing = inner.len() >= 2
                && inner.get(inner.len() - 2..).is_some_and(unbounded)
                && !inner[..inner.len() - 2].ends_with('\\');
            leading || trailing
        }
        PatternKind::Text => false,
    }
}

/// 模式长度是否低于阈值（正则不计）
pub fn is_short_pattern(pattern: &PatternDef, min_len: usize) -> bool {
    let value = pattern_value(&pattern.body);
    match pattern.kind() {
        PatternKind::Hex => hex_tokens(value).len() < min_len,
        PatternKind::Text => text_len(value) < min_len,
        PatternKind::Regex => false,
    }
}

/// 解析规则日期，支持常见格式；只有年月时按当月 1 日计
pub fn parse_rule_date(raw: &str) -> Option<NaiveDate> {
    let value = raw.trim();
    // 带时间部分的日期只取前 10 个字符
    let value = if value.len() > 10 {
        value.get(..10).unwrap_or(value)
    } else {
        value
    };
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Some(date);
        }
    }
    let month_only = format!("{}-01", value.replace('/', "-"));
    if let Ok(date) = NaiveDate::parse_from_str(&month_only, "%Y-%m-%d") {
        return Some(date);
    }
    None
}

/// 日期是否早于参考时间 max_age_days 天以上；无法解析的日期不视为陈旧
pub fn is_stale(date: &str, reference: DateTime<Utc>, max_age_days: i64) -> bool {
    match parse_rule_date(date) {
        Some(date) => (reference.date_naive() - date).num_days() > max_age_days,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn pattern(body: &str) -> PatternDef {
        PatternDef::new("$a", body)
    }

    #[test]
    fn unbounded_jumps_are_broad() {
        assert!(is_broad_wildcard(&pattern("{ 4D 5A [-] 50 45 }")));
        assert!(is_broad_wildcard(&pattern("{ 4D 5A [16-] 50 45 }")));
        assert!(!is_broad_wildcard(&pattern("{ 4D 5A [2-16] 50 45 }")));
    }

    #[test]
    fn mostly_wildcard_hex_is_broad() {
        assert!(is_broad_wildcard(&pattern("{ 4D ?? ?? ?? }")));
        assert!(!is_broad_wildcard(&pattern("{ 4D 5A ?? 00 }")));
    }

    #[test]
    fn leading_or_trailing_dot_star_regex_is_broad() {
        assert!(is_broad_wildcard(&pattern("/.*evil/ nocase")));
        assert!(is_broad_wildcard(&pattern("/evil.+/")));
        assert!(!is_broad_wildcard(&pattern("/evil.*payload/")));
        assert!(!is_broad_wildcard(&pattern(r"/evil\.*/")));
        assert!(!is_broad_wildcard(&pattern("\".*\"")));
    }

    #[test]
    fn short_patterns() {
        assert!(is_short_pattern(&pattern("\"MZ\" ascii"), 4));
        assert!(!is_short_pattern(&pattern("\"evil\""), 4));
        assert!(is_short_pattern(&pattern("\"\\x4D\\x5A\""), 4));
        assert!(is_short_pattern(&pattern("{ 4D 5A [2-4] 90 }"), 4));
        assert!(!is_short_pattern(&pattern("{ 4D 5A 90 00 }"), 4));
        assert!(!is_short_pattern(&pattern("/a/"), 4));
    }

    #[test]
    fn date_formats() {
        let expected = NaiveDate::from_ymd_opt(2021, 3, 4);
        assert_eq!(parse_rule_date("2021-03-04"), expected);
        assert_eq!(parse_rule_date("2021/03/04"), expected);
        assert_eq!(parse_rule_date("04.03.2021"), expected);
        assert_eq!(parse_rule_date("2021-03-04T10:00:00Z"), expected);
        assert_eq!(parse_rule_date("2021-03"), NaiveDate::from_ymd_opt(2021, 3, 1));
        assert_eq!(parse_rule_date("someday"), None);
    }

    #[test]
    fn staleness_is_relative_to_reference() {
        let reference = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert!(is_stale("2018-01-01", reference, 5 * 365));
        assert!(!is_stale("2023-06-01", reference, 5 * 365));
        assert!(!is_stale("unknown", reference, 5 * 365));
    }
}
