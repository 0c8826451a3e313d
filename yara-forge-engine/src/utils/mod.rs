// 日志预览格式化
pub mod log_format;

pub use log_format::{compress_name_list, preview_compact};
