//! 规则源解析
//! 目前只有 YARA 文本一种格式

pub mod yara;

pub use yara::YaraParser;
