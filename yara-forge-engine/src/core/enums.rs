use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// 元数据值，对应规则 meta 段的三种取值类型
/// Text 中保存的是已反转义的原始字符串，输出时再统一转义
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Integer(i64),
    Text(String),
    /// 反转义后不是 UTF-8（如 `\xe9`）或含未知转义的字符串，按源码中的转义形式原样输出
    Verbatim { escaped: String },
}

impl MetaValue {
    pub fn text(value: impl Into<String>) -> Self {
        MetaValue::Text(value.into())
    }

    /// 由字符串字面量内容（不含两侧引号）构造
    pub fn from_escaped(raw: &str) -> Self {
        match unescape_bytes(raw).map(String::from_utf8) {
            Some(Ok(text)) => MetaValue::Text(text),
            _ => MetaValue::Verbatim {
                escaped: raw.to_string(),
            },
        }
    }

    /// 取文本形式（数字/布尔转为字符串，Verbatim 中的非 UTF-8 字节替换为 U+FFFD）
    pub fn as_text(&self) -> String {
        match self {
            MetaValue::Text(s) => s.clone(),
            MetaValue::Verbatim { escaped } => match unescape_bytes(escaped) {
                Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                None => escaped.clone(),
            },
            MetaValue::Integer(n) => n.to_string(),
            MetaValue::Bool(b) => b.to_string(),
        }
    }

    /// 判断取值是否为"真"（true / 非零 / "true"、"yes"、"1"）
    pub fn is_truthy(&self) -> bool {
        match self {
            MetaValue::Bool(b) => *b,
            MetaValue::Integer(n) => *n != 0,
            MetaValue::Text(s) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "true" | "yes" | "1"
            ),
            MetaValue::Verbatim { .. } => false,
        }
    }

    /// 空字符串视为未声明
    pub fn is_blank(&self) -> bool {
        matches!(self, MetaValue::Text(s) if s.trim().is_empty())
    }
}

impl Display for MetaValue {
    /// 以规则语法输出（字符串带引号并转义）
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MetaValue::Text(s) => write!(f, "\"{}\"", escape_text(s)),
            MetaValue::Verbatim { escaped } => write!(f, "\"{}\"", escaped),
            MetaValue::Integer(n) => write!(f, "{}", n),
            MetaValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// 按规则语法反转义为字节：`\n` `\t` `\r` `\"` `\\` `\xNN`
/// 未知转义或不完整的 `\x` 返回 None
fn unescape_bytes(raw: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(raw.len());
    let mut buf = [0u8; 4];
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        let byte = match chars.next()? {
            'n' => b'\n',
            't' => b'\t',
            'r' => b'\r',
            '"' => b'"',
            '\\' => b'\\',
            'x' => {
                let hex: String = chars.by_ref().take(2).collect();
                if hex.len() != 2 {
                    return None;
                }
                u8::from_str_radix(&hex, 16).ok()?
            }
            _ => return None,
        };
        out.push(byte);
    }
    Some(out)
}

/// 规则语法字符串转义
pub fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 8);
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out
}

/// 模式定义类型，由模式体首字符决定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    Text,
    Hex,
    Regex,
}

impl PatternKind {
    pub fn of_body(body: &str) -> Self {
        match body.trim_start().chars().next() {
            Some('{') => PatternKind::Hex,
            Some('/') => PatternKind::Regex,
            _ => PatternKind::Text,
        }
    }
}

impl Display for PatternKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternKind::Text => write!(f, "text"),
            PatternKind::Hex => write!(f, "hex"),
            PatternKind::Regex => write!(f, "regex"),
        }
    }
}

/// 规则修饰符（private / global）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleModifiers {
    pub private: bool,
    pub global: bool,
}

impl Display for RuleModifiers {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.global {
            f.write_str("global ")?;
        }
        if self.private {
            f.write_str("private ")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodable_escapes_become_text() {
        assert_eq!(MetaValue::from_escaped(r#"a\tb \"q\" \x41"#), MetaValue::text("a\tb \"q\" A"));
        // \xc3\xa9 是 é 的 UTF-8 编码
        assert_eq!(MetaValue::from_escaped(r"caf\xc3\xa9"), MetaValue::text("café"));
    }

    #[test]
    fn undecodable_escapes_are_written_back_unchanged() {
        for raw in [r"caf\xe9", r"C:\q", r"bad\x4"] {
            let value = MetaValue::from_escaped(raw);
            assert!(matches!(value, MetaValue::Verbatim { .. }), "{}", raw);
            assert_eq!(value.to_string(), format!("\"{}\"", raw));
        }
        assert_eq!(MetaValue::from_escaped(r"caf\xe9").as_text(), "caf\u{FFFD}");
    }

    #[test]
    fn text_round_trips_through_escaping() {
        let value = MetaValue::from_escaped(r#"C:\\Windows\\ "x"\n"#);
        assert_eq!(value.as_text(), "C:\\Windows\\ \"x\"\n");
        assert_eq!(value.to_string(), r#""C:\\Windows\\ \"x\"\n""#);
    }
}
