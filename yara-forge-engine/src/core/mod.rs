mod collection;
mod enums;
mod normalized;
mod package;
mod pattern;
mod rule;

// 导出常用项
pub use collection::{FileParseResult, SourceCollection};
pub use enums::{escape_text, MetaValue, PatternKind, RuleModifiers};
pub use normalized::{DeclaredFields, Fingerprint, NormalizedRule, Provenance};
pub use package::{LicenseEntry, RulePackage};
pub use pattern::{MetaEntry, PatternDef};
pub use rule::RawRule;
