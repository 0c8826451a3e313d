//! 内容指纹
//! 对模式定义与条件做空白规范化后取 SHA-256；字符串与正则字面量内部保持原样

use sha2::{Digest, Sha256};

use crate::core::{Fingerprint, PatternDef, PatternKind};

/// 模式列表与条件之间的分隔行
const SECTION_SEPARATOR: &str = "\n--condition--\n";

/// 计算规则内容指纹：与规则名、元数据、模式声明顺序均无关
pub fn fingerprint(patterns: &[PatternDef], condition: &str) -> Fingerprint {
    let mut lines: Vec<String> = patterns
        .iter()
        .map(|p| format!("{}={}", p.identifier, canonical_pattern_body(&p.body)))
        .collect();
    lines.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(lines.join("\n").as_bytes());
    hasher.update(SECTION_SEPARATOR.as_bytes());
    hasher.update(canonical_condition(condition).as_bytes());
    Fingerprint(hex::encode(hasher.finalize()))
}

/// 模式体规范化：hex 串去空白转大写，其余部分折叠空白
pub fn canonical_pattern_body(body: &str) -> String {
    let body = body.trim();
    match PatternKind::of_body(body) {
        PatternKind::Hex => match body.find('}') {
            Some(close) => {
                let hex: String = body[..=close]
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .map(|c| c.to_ascii_uppercase())
                    .collect();
                let rest = collapse_whitespace(&body[close + 1..], false);
                if rest.is_empty() {
                    hex
                } else {
                    format!("{} {}", hex, rest)
                }
            }
            None => collapse_whitespace(body, false),
        },
        PatternKind::Regex => collapse_whitespace(body, true),
        PatternKind::Text => collapse_whitespace(body, false),
    }
}

/// 条件规范化：折叠空白，`matches` 之后的正则原样保留
pub fn canonical_condition(condition: &str) -> String {
    collapse_whitespace(condition, false)
}

/// 折叠连续空白为单个空格并去除首尾空白
/// leading_regex 为 true 时开头的 `/.../` 视为正则字面量
fn collapse_whitespace(text: &str, leading_regex: bool) -> String {
    let chars: Vec<char> = text.trim().chars().collect();
    let mut out = String::with_capacity(chars.len());
    let mut pending_space = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            i += 1;
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }

        let regex_start = c == '/' && ((leading_regex && i == 0) || out.trim_end().ends_with("matches"));
        if c == '"' || regex_start {
            let end = literal_end(&chars, i, c);
            out.extend(&chars[i..end]);
            i = end;
            continue;
        }

        out.push(c);
        i += 1;
    }
    out
}

/// 字面量结束位置（不含），未闭合时取到末尾
fn literal_end(chars: &[char], start: usize, delimiter: char) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == '\\' {
            i += 2;
            continue;
        }
        if chars[i] == delimiter {
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}
