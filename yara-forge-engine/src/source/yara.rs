//! YARA 规则文本解析器
//! 将规则文件文本拆解为 RawRule：修饰符、标签、meta、strings、condition、import
//! 只负责结构拆分，不校验条件表达式语义；模式体与条件原样保留

use crate::core::{MetaEntry, MetaValue, PatternDef, RawRule, RuleModifiers};
use crate::error::{CoreResult, ForgeError};

/// 预处理结果：去注释后的字符（与原文逐字符对齐）+ 字面量掩码
/// mask[i] 为 true 表示该字符属于字符串或正则字面量（含定界符）
struct Preprocessed {
    chars: Vec<char>,
    mask: Vec<bool>,
}

#[inline]
fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// 计算字符位置所在行号（1 起）
fn line_of(chars: &[char], pos: usize) -> usize {
    chars[..pos.min(chars.len())]
        .iter()
        .filter(|c| **c == '\n')
        .count()
        + 1
}

fn parse_error(chars: &[char], pos: usize, msg: impl AsRef<str>) -> ForgeError {
    ForgeError::RuleParseError(format!("line {}: {}", line_of(chars, pos), msg.as_ref()))
}

/// 从 start（引号位置）跳到闭合引号，返回闭合引号下标
fn skip_string(chars: &[char], start: usize) -> CoreResult<usize> {
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '"' => return Ok(i),
            '\n' => break,
            _ => i += 1,
        }
    }
    Err(parse_error(chars, start, "unterminated string literal"))
}

/// 从 start（斜杠位置）跳到正则闭合斜杠，返回闭合斜杠下标
fn skip_regex(chars: &[char], start: usize) -> CoreResult<usize> {
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '/' => return Ok(i),
            '\n' => break,
            _ => i += 1,
        }
    }
    Err(parse_error(chars, start, "unterminated regular expression"))
}

/// 去除注释并标记字面量
/// 注释替换为空格（保留换行），保证与原文逐字符对齐
fn preprocess(content: &str) -> CoreResult<Preprocessed> {
    let src: Vec<char> = content.chars().collect();
    let len = src.len();
    let mut chars = Vec::with_capacity(len);
    let mut mask = Vec::with_capacity(len);

    // 正则只能出现在 `=` 之后或 `matches` 关键字之后，其余 `/` 视为除号
    let mut prev_sig: Option<char> = None;
    let mut word = String::new();
    let mut last_word = String::new();

    let mut i = 0;
    while i < len {
        let c = src[i];
        let next = src.get(i + 1).copied();

        if c == '"' {
            let end = skip_string(&src, i)?;
            for ch in &src[i..=end] {
                chars.push(*ch);
                mask.push(true);
            }
            prev_sig = Some('"');
            word.clear();
            last_word.clear();
            i = end + 1;
            continue;
        }

        if c == '/' && next == Some('/') {
            while i < len && src[i] != '\n' {
                chars.push(' ');
                mask.push(false);
                i += 1;
            }
            continue;
        }

        if c == '/' && next == Some('*') {
            let start = i;
            i += 2;
            let mut closed = false;
            chars.push(' ');
            chars.push(' ');
            mask.push(false);
            mask.push(false);
            while i < len {
                if src[i] == '*' && src.get(i + 1) == Some(&'/') {
                    chars.push(' ');
                    chars.push(' ');
                    mask.push(false);
                    mask.push(false);
                    i += 2;
                    closed = true;
                    break;
                }
                chars.push(if src[i] == '\n' { '\n' } else { ' ' });
                mask.push(false);
                i += 1;
            }
            if !closed {
                return Err(parse_error(&src, start, "unterminated block comment"));
            }
            continue;
        }

        if c == '/' {
            let current_word = if word.is_empty() { &last_word } else { &word };
            if prev_sig == Some('=') || current_word == "matches" {
                let end = skip_regex(&src, i)?;
                for ch in &src[i..=end] {
                    chars.push(*ch);
                    mask.push(true);
                }
                prev_sig = Some('/');
                word.clear();
                last_word.clear();
                i = end + 1;
                continue;
            }
        }

        chars.push(c);
        mask.push(false);
        if is_ident_char(c) {
            word.push(c);
        } else if c.is_whitespace() {
            if !word.is_empty() {
                last_word = std::mem::take(&mut word);
            }
        } else {
            word.clear();
            last_word.clear();
        }
        if !c.is_whitespace() {
            prev_sig = Some(c);
        }
        i += 1;
    }

    Ok(Preprocessed { chars, mask })
}

fn skip_ws(chars: &[char], mut pos: usize) -> usize {
    while pos < chars.len() && chars[pos].is_whitespace() {
        pos += 1;
    }
    pos
}

fn read_word(chars: &[char], pos: usize) -> (String, usize) {
    let mut end = pos;
    while end < chars.len() && is_ident_char(chars[end]) {
        end += 1;
    }
    (chars[pos..end].iter().collect(), end)
}

/// 规则体中的段落
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Meta,
    Strings,
    Condition,
}

/// YARA 规则解析器
#[derive(Debug, Clone, Default)]
pub struct YaraParser;

impl YaraParser {
    pub fn new() -> Self {
        Self
    }

    /// 字节流解析，非 UTF-8 内容按有损方式转换（规则文件常见 Latin-1 注释）
    pub fn parse_bytes(&self, bytes: &[u8]) -> CoreResult<Vec<RawRule>> {
        self.parse_str(&String::from_utf8_lossy(bytes))
    }

    /// 解析一个规则文件的全部规则；任何结构错误都使整个文件解析失败
    pub fn parse_str(&self, content: &str) -> CoreResult<Vec<RawRule>> {
        let Preprocessed { chars, mask } = preprocess(content)?;
        let len = chars.len();

        let mut imports: Vec<String> = Vec::new();
        let mut rules: Vec<RawRule> = Vec::new();
        let mut pos = 0;

        loop {
            pos = skip_ws(&chars, pos);
            if pos >= len {
                break;
            }
            if mask[pos] {
                return Err(parse_error(&chars, pos, "unexpected literal at top level"));
            }

            let (word, end) = read_word(&chars, pos);
            match word.as_str() {
                "import" => {
                    let lit_start = skip_ws(&chars, end);
                    if lit_start >= len || chars[lit_start] != '"' {
                        return Err(parse_error(&chars, pos, "import expects a quoted module name"));
                    }
                    let lit_end = skip_string(&chars, lit_start)?;
                    let module: String = chars[lit_start + 1..lit_end].iter().collect();
                    if !imports.contains(&module) {
                        imports.push(module);
                    }
                    pos = lit_end + 1;
                }
                "include" => {
                    return Err(parse_error(
                        &chars,
                        pos,
                        "include directives are not supported",
                    ));
                }
                "private" | "global" | "rule" => {
                    let (rule, next) = self.parse_rule(&chars, &mask, pos)?;
                    rules.push(rule);
                    pos = next;
                }
                "" => {
                    return Err(parse_error(
                        &chars,
                        pos,
                        format!("unexpected character '{}'", chars[pos]),
                    ));
                }
                other => {
                    return Err(parse_error(&chars, pos, format!("unexpected token '{}'", other)));
                }
            }
        }

        // import 作用于整个文件
        for rule in &mut rules {
            rule.imports = imports.clone();
        }
        Ok(rules)
    }

    /// 解析单条规则，返回规则与其后的位置
    fn parse_rule(&self, chars: &[char], mask: &[bool], start: usize) -> CoreResult<(RawRule, usize)> {
        let len = chars.len();
        let mut modifiers = RuleModifiers::default();
        let mut pos = start;

        // 1. 修饰符 + rule 关键字
        loop {
            pos = skip_ws(chars, pos);
            let (word, end) = read_word(chars, pos);
            match word.as_str() {
                "private" => modifiers.private = true,
                "global" => modifiers.global = true,
                "rule" => {
                    pos = end;
                    break;
                }
                _ => return Err(parse_error(chars, pos, "expected 'rule' keyword")),
            }
            pos = end;
        }

        // 2. 规则名
        pos = skip_ws(chars, pos);
        let (name, end) = read_word(chars, pos);
        if name.is_empty() {
            return Err(parse_error(chars, pos, "missing rule name"));
        }
        pos = skip_ws(chars, end);

        // 3. 标签
        let mut tags = Vec::new();
        if pos < len && chars[pos] == ':' {
            pos += 1;
            loop {
                pos = skip_ws(chars, pos);
                if pos >= len || chars[pos] == '{' {
                    break;
                }
                let (tag, end) = read_word(chars, pos);
                if tag.is_empty() {
                    return Err(parse_error(
                        chars,
                        pos,
                        format!("invalid tag list for rule '{}'", name),
                    ));
                }
                tags.push(tag);
                pos = end;
            }
        }

        if pos >= len || chars[pos] != '{' {
            return Err(parse_error(chars, pos, format!("expected '{{' after rule '{}'", name)));
        }

        // 4. 匹配闭合花括号（跳过字面量，hex 串内的花括号成对出现）
        let open = pos;
        let mut depth = 0usize;
        let mut close = None;
        for i in open..len {
            if mask[i] {
                continue;
            }
            match chars[i] {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(i);
                        break;
                    }
                }
                _ => {}
            }
        }
        let close = close.ok_or_else(|| {
            parse_error(chars, open, format!("unbalanced braces in rule '{}'", name))
        })?;

        let body = &chars[open + 1..close];
        let body_mask = &mask[open + 1..close];
        let (meta, patterns, condition) = self
            .parse_body(body, body_mask)
            .map_err(|e| match e {
                ForgeError::RuleParseError(msg) => ForgeError::RuleParseError(format!(
                    "line {}: rule '{}': {}",
                    line_of(chars, open),
                    name,
                    msg
                )),
                other => other,
            })?;

        let rule = RawRule {
            name,
            modifiers,
            tags,
            meta,
            patterns,
            condition,
            imports: Vec::new(),
            file_path: String::new(),
        };
        Ok((rule, close + 1))
    }

    /// 拆分 meta / strings / condition 三段
    fn parse_body(
        &self,
        body: &[char],
        mask: &[bool],
    ) -> CoreResult<(Vec<MetaEntry>, Vec<PatternDef>, String)> {
        // (段落, 段头起始, 内容起始)
        let mut headers: Vec<(Section, usize, usize)> = Vec::new();
        let mut depth = 0usize;
        let mut i = 0;
        while i < body.len() {
            if mask[i] {
                i += 1;
                continue;
            }
            let c = body[i];
            match c {
                '{' => depth += 1,
                '}' => depth = depth.saturating_sub(1),
                _ => {}
            }
            let at_word_start = is_ident_char(c) && (i == 0 || !is_ident_char(body[i - 1]));
            if depth == 0 && at_word_start {
                let (word, end) = read_word(body, i);
                let section = match word.as_str() {
                    "meta" => Some(Section::Meta),
                    "strings" => Some(Section::Strings),
                    "condition" => Some(Section::Condition),
                    _ => None,
                };
                let colon = skip_ws(body, end);
                if let Some(section) = section {
                    if colon < body.len() && body[colon] == ':' && !mask[colon] {
                        headers.push((section, i, colon + 1));
                        if section == Section::Condition {
                            break;
                        }
                        i = colon + 1;
                        continue;
                    }
                }
                i = end;
                continue;
            }
            i += 1;
        }

        let Some(first) = headers.first() else {
            return Err(ForgeError::RuleParseError("missing condition section".to_string()));
        };
        let preamble: String = body[..first.1].iter().collect();
        if !preamble.trim().is_empty() {
            return Err(ForgeError::RuleParseError(format!(
                "unexpected content before first section: '{}'",
                preamble.trim()
            )));
        }

        let mut meta = Vec::new();
        let mut patterns = Vec::new();
        let mut condition = None;
        for (idx, (section, _, content_start)) in headers.iter().enumerate() {
            let content_end = headers.get(idx + 1).map_or(body.len(), |h| h.1);
            let text = &body[*content_start..content_end];
            let text_mask = &mask[*content_start..content_end];
            match section {
                Section::Meta => meta.extend(self.parse_meta(text, text_mask)?),
                Section::Strings => patterns.extend(self.parse_strings(text, text_mask)?),
                Section::Condition => {
                    let cond: String = text.iter().collect();
                    condition = Some(cond.trim().to_string());
                }
            }
        }

        let condition = condition
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ForgeError::RuleParseError("missing condition section".to_string()))?;
        Ok((meta, patterns, condition))
    }

    /// meta 段：key = "string" | 整数 | true/false
    fn parse_meta(&self, text: &[char], mask: &[bool]) -> CoreResult<Vec<MetaEntry>> {
        let mut entries = Vec::new();
        let mut pos = 0;
        loop {
            pos = skip_ws(text, pos);
            if pos >= text.len() {
                break;
            }
            let (key, end) = read_word(text, pos);
            if key.is_empty() {
                return Err(ForgeError::RuleParseError(format!(
                    "invalid meta key near '{}'",
                    text[pos]
                )));
            }
            pos = skip_ws(text, end);
            if pos >= text.len() || text[pos] != '=' {
                return Err(ForgeError::RuleParseError(format!(
                    "expected '=' after meta key '{}'",
                    key
                )));
            }
            pos = skip_ws(text, pos + 1);
            if pos >= text.len() {
                return Err(ForgeError::RuleParseError(format!("missing value for meta key '{}'", key)));
            }

            if text[pos] == '"' && mask[pos] {
                // 闭合引号由预处理保证存在
                let end = self.closing_quote(text, pos).ok_or_else(|| {
                    ForgeError::RuleParseError(format!("unterminated value for meta key '{}'", key))
                })?;
                let raw: String = text[pos + 1..end].iter().collect();
                entries.push(MetaEntry::new(key, MetaValue::from_escaped(&raw)));
                pos = end + 1;
            } else {
                let mut end = pos;
                while end < text.len() && !text[end].is_whitespace() {
                    end += 1;
                }
                let token: String = text[pos..end].iter().collect();
                let value = match token.as_str() {
                    "true" => MetaValue::Bool(true),
                    "false" => MetaValue::Bool(false),
                    _ => parse_integer(&token).map(MetaValue::Integer).ok_or_else(|| {
                        ForgeError::RuleParseError(format!(
                            "invalid value '{}' for meta key '{}'",
                            token, key
                        ))
                    })?,
                };
                entries.push(MetaEntry::new(key, value));
                pos = end;
            }
        }
        Ok(entries)
    }

    fn closing_quote(&self, text: &[char], open: usize) -> Option<usize> {
        let mut i = open + 1;
        while i < text.len() {
            match text[i] {
                '\\' => i += 2,
                '"' => return Some(i),
                _ => i += 1,
            }
        }
        None
    }

    /// strings 段：按顶层 `$` 切分为模式定义
    fn parse_strings(&self, text: &[char], mask: &[bool]) -> CoreResult<Vec<PatternDef>> {
        let mut starts = Vec::new();
        let mut depth = 0usize;
        for (i, c) in text.iter().enumerate() {
            if mask[i] {
                continue;
            }
            match c {
                '{' | '(' => depth += 1,
                '}' | ')' => depth = depth.saturating_sub(1),
                '$' if depth == 0 => starts.push(i),
                _ => {}
            }
        }

        let preamble_end = starts.first().copied().unwrap_or(text.len());
        let preamble: String = text[..preamble_end].iter().collect();
        if !preamble.trim().is_empty() {
            return Err(ForgeError::RuleParseError(format!(
                "unexpected content in strings section: '{}'",
                preamble.trim()
            )));
        }

        let mut patterns = Vec::with_capacity(starts.len());
        for (idx, start) in starts.iter().enumerate() {
            let end = starts.get(idx + 1).copied().unwrap_or(text.len());
            let (ident, ident_end) = read_word(text, start + 1);
            let identifier = format!("${}", ident);
            let eq = skip_ws(text, ident_end);
            if eq >= end || text[eq] != '=' {
                return Err(ForgeError::RuleParseError(format!(
                    "expected '=' after pattern identifier '{}'",
                    identifier
                )));
            }
            let body: String = text[eq + 1..end].iter().collect();
            patterns.push(PatternDef::new(identifier, body.trim()));
        }
        Ok(patterns)
    }
}

/// 解析十进制/十六进制整数（允许负号）
fn parse_integer(token: &str) -> Option<i64> {
    let (negative, digits) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    let value = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i64>().ok()?,
    };
    Some(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PatternKind;

    const SAMPLE: &str = r#"
import "pe"
import "math"

/* multi-line
   header comment with a } brace */
private rule Helper_Rule {
    condition:
        uint16(0) == 0x5A4D
}

rule APT_Sample_Loader : apt loader
{
    meta:
        description = "Detects the \"sample\" loader // not a comment"
        author = "Jane Doe"
        score = 75
        verified = true
    strings:
        $s1 = "cmd.exe /c" ascii wide // trailing comment
        $h1 = { 4D 5A ?? ?? [2-4] 50 45 }
        $r1 = /https?:\/\/[a-z]{3,}\.example\/x/ nocase
        $ = "anon"
    condition:
        Helper_Rule and pe.number_of_sections > 2 and
        2 of ($s*, $h1) and $r1
}
"#;

    #[test]
    fn parses_rules_with_all_sections() {
        let rules = YaraParser::new().parse_str(SAMPLE).unwrap();
        assert_eq!(rules.len(), 2);

        let helper = &rules[0];
        assert_eq!(helper.name, "Helper_Rule");
        assert!(helper.modifiers.private);
        assert!(helper.meta.is_empty());
        assert_eq!(helper.condition, "uint16(0) == 0x5A4D");

        let loader = &rules[1];
        assert_eq!(loader.name, "APT_Sample_Loader");
        assert_eq!(loader.tags, vec!["apt", "loader"]);
        assert_eq!(loader.imports, vec!["pe", "math"]);
        assert_eq!(
            loader.meta_value("description"),
            Some(&MetaValue::text("Detects the \"sample\" loader // not a comment"))
        );
        assert_eq!(loader.meta_value("score"), Some(&MetaValue::Integer(75)));
        assert_eq!(loader.meta_value("verified"), Some(&MetaValue::Bool(true)));

        assert_eq!(loader.patterns.len(), 4);
        assert_eq!(loader.patterns[0], PatternDef::new("$s1", "\"cmd.exe /c\" ascii wide"));
        assert_eq!(loader.patterns[1].kind(), PatternKind::Hex);
        assert_eq!(loader.patterns[2].kind(), PatternKind::Regex);
        assert_eq!(
            loader.patterns[2].body,
            r"/https?:\/\/[a-z]{3,}\.example\/x/ nocase"
        );
        assert!(loader.patterns[3].is_anonymous());
        assert!(loader.condition.starts_with("Helper_Rule and pe.number_of_sections > 2 and"));
        assert!(loader.condition.ends_with("2 of ($s*, $h1) and $r1"));
    }

    #[test]
    fn multiline_hex_strings_stay_in_one_pattern() {
        let text = r#"
rule Hex_Multi {
    strings:
        $h = {
            4D 5A 90 00
            03 00 00 00 }
        $t = "x"
    condition:
        all of them
}"#;
        let rules = YaraParser::new().parse_str(text).unwrap();
        assert_eq!(rules[0].patterns.len(), 2);
        assert!(rules[0].patterns[0].body.starts_with('{'));
        assert!(rules[0].patterns[0].body.ends_with('}'));
    }

    #[test]
    fn condition_with_matches_regex_and_braces() {
        let text = r#"
rule Cond_Regex {
    condition:
        pe.sections[0].name matches /\.t{1}ext}/
}"#;
        let rules = YaraParser::new().parse_str(text).unwrap();
        assert_eq!(rules[0].condition, r"pe.sections[0].name matches /\.t{1}ext}/");
    }

    #[test]
    fn unbalanced_braces_fail_the_file() {
        let text = "rule Broken { condition: true ";
        let err = YaraParser::new().parse_str(text).unwrap_err();
        assert!(matches!(err, ForgeError::RuleParseError(_)));
        assert!(err.to_string().contains("unbalanced braces"));
    }

    #[test]
    fn missing_condition_fails_the_file() {
        let text = "rule NoCond { strings: $a = \"x\" }";
        assert!(YaraParser::new().parse_str(text).is_err());
    }

    #[test]
    fn include_is_rejected() {
        let text = "include \"other.yar\"\nrule A { condition: true }";
        let err = YaraParser::new().parse_str(text).unwrap_err();
        assert!(err.to_string().contains("include"));
    }

    #[test]
    fn unterminated_string_reports_line() {
        let text = "rule A {\n meta:\n  author = \"oops\n condition: true }";
        let err = YaraParser::new().parse_str(text).unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn escaped_backslash_before_quote_in_meta() {
        let text = r#"rule Path { meta: path = "C:\\Windows\\" condition: true }"#;
        let rules = YaraParser::new().parse_str(text).unwrap();
        assert_eq!(rules[0].meta_value("path"), Some(&MetaValue::text(r"C:\Windows\")));
    }

    #[test]
    fn non_utf8_escapes_in_meta_are_kept_as_written() {
        let text = r#"rule Latin { meta: note = "caf\xe9" author = "J\xc3\xa9r\xc3\xb4me" condition: true }"#;
        let rules = YaraParser::new().parse_str(text).unwrap();
        let note = rules[0].meta_value("note").unwrap();
        assert_eq!(note.to_string(), r#""caf\xe9""#);
        assert_eq!(rules[0].meta_value("author"), Some(&MetaValue::text("Jérôme")));
    }

    #[test]
    fn negative_and_hex_integers() {
        assert_eq!(parse_integer("-5"), Some(-5));
        assert_eq!(parse_integer("0x1F"), Some(31));
        assert_eq!(parse_integer("abc"), None);
    }
}
