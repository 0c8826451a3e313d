//! 输出：规则包文件 + 构建报告
pub mod build_report;
pub mod package_writer;

pub use build_report::{BuildReport, CollectionSummary, TierSummary};
pub use package_writer::{PackageWriter, TierWriteOutcome};

use std::fs;
use std::io;
use std::path::Path;

/// 原子写入：先写同目录下的隐藏临时文件 `.name.tmp`，再 rename 到目标路径
/// 读者只会看到旧文件或完整的新文件
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    write_atomic_with(path, |tmp| fs::write(tmp, content))
}

/// 写入或 rename 任一步失败都删除临时文件
fn write_atomic_with<F>(path: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&Path) -> io::Result<()>,
{
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "missing file name"))?;
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));

    let result = write(&tmp_path).and_then(|()| fs::rename(&tmp_path, path));
    if result.is_err() && tmp_path.is_file() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}
