//! 规则包渲染为 YARA 文本
//! 除头部的生成时间行外，相同输入产生逐字节相同的输出

use std::fmt::Write;

use crate::core::{MetaEntry, MetaValue, NormalizedRule, RulePackage};

const INDENT: &str = "    ";
const BODY_INDENT: &str = "        ";

/// 头部中生成时间行的前缀（比较输出时可据此忽略该行）
pub const GENERATED_LINE_PREFIX: &str = " * Generated: ";

/// 标准字段按固定顺序展开为元数据条目，随后是透传元数据
pub fn standard_meta(rule: &NormalizedRule) -> Vec<MetaEntry> {
    let mut entries = Vec::with_capacity(5 + rule.extra_meta.len());
    if let Some(description) = &rule.description {
        entries.push(MetaEntry::new("description", MetaValue::text(description)));
    }
    entries.push(MetaEntry::new("author", MetaValue::text(&rule.author)));
    if let Some(reference) = &rule.reference {
        entries.push(MetaEntry::new("reference", MetaValue::text(reference)));
    }
    entries.push(MetaEntry::new("date", MetaValue::text(&rule.date)));
    // 集合级许可证放在包头部，规则级声明才写入规则
    if rule.declared.license {
        if let Some(license) = &rule.license {
            entries.push(MetaEntry::new("license", MetaValue::text(license)));
        }
    }
    entries.extend(rule.extra_meta.iter().cloned());
    entries
}

/// 流水线写入的质量与出处字段
pub fn system_meta(rule: &NormalizedRule) -> Vec<MetaEntry> {
    vec![
        MetaEntry::new("quality", MetaValue::Integer(i64::from(rule.score()))),
        MetaEntry::new("logic_hash", MetaValue::text(rule.fingerprint.as_str())),
        MetaEntry::new("source_collection", MetaValue::text(&rule.provenance.collection)),
        MetaEntry::new("source_url", MetaValue::text(&rule.provenance.collection_url)),
        MetaEntry::new("source_file", MetaValue::text(&rule.provenance.file_path)),
        MetaEntry::new(
            "imported",
            MetaValue::text(rule.provenance.retrieved_at.format("%Y-%m-%d").to_string()),
        ),
    ]
}

/// 条件多行时去掉公共缩进后统一缩进
fn reindent_condition(condition: &str) -> String {
    let mut lines = condition.trim().lines();
    let first = lines.next().unwrap_or_default().trim_end();
    let rest: Vec<&str> = lines.map(str::trim_end).collect();
    let common = rest
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    let mut out = format!("{}{}", BODY_INDENT, first);
    for line in rest {
        out.push('\n');
        if !line.trim().is_empty() {
            out.push_str(BODY_INDENT);
            out.push_str(line.get(common..).unwrap_or_else(|| line.trim_start()));
        }
    }
    out
}

/// 渲染单条规则
pub fn render_rule(rule: &NormalizedRule) -> String {
    let mut out = String::with_capacity(512);

    // String 写入不会失败
    let _ = write!(out, "{}rule {}", rule.modifiers, rule.canonical_name);
    if !rule.tags.is_empty() {
        let _ = write!(out, " : {}", rule.tags.join(" "));
    }
    out.push_str(" {\n");

    let _ = writeln!(out, "{}meta:", INDENT);
    for entry in standard_meta(rule).iter().chain(system_meta(rule).iter()) {
        let _ = writeln!(out, "{}{} = {}", BODY_INDENT, entry.key, entry.value);
    }

    if !rule.patterns.is_empty() {
        let _ = writeln!(out, "{}strings:", INDENT);
        for pattern in &rule.patterns {
            let _ = writeln!(out, "{}{} = {}", BODY_INDENT, pattern.identifier, pattern.body.trim());
        }
    }

    let _ = writeln!(out, "{}condition:", INDENT);
    out.push_str(&reindent_condition(&rule.condition));
    out.push_str("\n}\n");
    out
}

/// 注释块中的文本不能提前闭合注释
fn comment_safe(text: &str) -> String {
    text.replace("*/", "* /")
}

/// 头部注释块
pub fn render_header(package: &RulePackage) -> String {
    let mut out = String::with_capacity(1024);
    out.push_str("/*\n");
    let _ = writeln!(out, " * YARA Forge rule package");
    let _ = writeln!(out, " * Package: {}", package.tier);
    let _ = writeln!(out, " * Minimum score: {}", package.min_score);
    let _ = writeln!(
        out,
        "{}{}",
        GENERATED_LINE_PREFIX,
        package.generated_at.format("%Y-%m-%dT%H:%M:%SZ")
    );
    let _ = writeln!(out, " * Rules: {}", package.rule_count());

    if !package.collection_counts.is_empty() {
        out.push_str(" *\n * Collections:\n");
        for (collection, count) in &package.collection_counts {
            let _ = writeln!(out, " *   {}: {}", comment_safe(collection), count);
        }
    }

    if !package.licenses.is_empty() {
        out.push_str(" *\n * Licenses:\n");
        for license in &package.licenses {
            let _ = writeln!(out, " *\n *   --- {} ---", comment_safe(&license.collection));
            for line in comment_safe(&license.text).lines() {
                let line = line.trim_end();
                if line.is_empty() {
                    out.push_str(" *\n");
                } else {
                    let _ = writeln!(out, " *   {}", line);
                }
            }
        }
    }
    out.push_str(" */\n");
    out
}

/// 渲染完整规则包：头部、模块导入、全部规则
pub fn render_package(package: &RulePackage) -> String {
    let mut out = render_header(package);
    if !package.imports.is_empty() {
        out.push('\n');
        for module in &package.imports {
            let _ = writeln!(out, "import \"{}\"", module);
        }
    }
    for rule in &package.rules {
        out.push('\n');
        out.push_str(&render_rule(rule));
    }
    out
}
