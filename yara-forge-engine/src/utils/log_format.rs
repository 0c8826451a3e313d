use std::fmt::{self, Write};

// ======================== 核心：零堆分配字符串格式化========================
/// 空白字符折叠 + 截断 - 零堆分配的日志预览核心函数
/// 用于在日志中展示规则条件、模式体等多行文本
#[inline(always)]
pub fn preview_compact<'a>(s: &'a str, max_len: usize) -> impl fmt::Display + 'a {
    struct CompactView<'a> {
        source: &'a str,
        max_length: usize,
    }

    impl<'a> fmt::Display for CompactView<'a> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let mut char_count = 0;
            let mut last_was_whitespace = false;

            for ch in self.source.trim().chars() {
                if char_count >= self.max_length {
                    f.write_str("…")?;
                    break;
                }

                if ch.is_whitespace() {
                    if !last_was_whitespace {
                        f.write_str(" ")?;
                        char_count += 1;
                        last_was_whitespace = true;
                    }
                } else {
                    f.write_char(ch)?;
                    char_count += 1;
                    last_was_whitespace = false;
                }
            }
            Ok(())
        }
    }

    CompactView {
        source: s,
        max_length: max_len,
    }
}

// ======================== 衍生：名称列表日志格式化 ========================
/// 名称列表日志格式化
/// 格式：[name1, name2, ...] (total: N)
pub fn compress_name_list<'a, I>(names: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    const MAX_COUNT: usize = 5; // 最多显示5个名称
    const MAX_NAME_LEN: usize = 48;

    let mut total_count = 0;
    let mut result = String::with_capacity(MAX_COUNT * (MAX_NAME_LEN + 2) + 20);
    result.push('[');

    for name in names {
        if total_count < MAX_COUNT {
            if total_count > 0 {
                result.push_str(", ");
            }
            // String 写入不会失败
            let _ = write!(result, "{}", preview_compact(name, MAX_NAME_LEN));
        }
        total_count += 1;
    }

    if total_count == 0 {
        return "[empty]".to_string();
    }
    if total_count > MAX_COUNT {
        let _ = write!(result, ", … (total: {})", total_count);
    }
    result.push(']');

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_folds_whitespace_and_truncates() {
        let text = "  $a   and\n\t$b  ";
        assert_eq!(preview_compact(text, 100).to_string(), "$a and $b");
        assert_eq!(preview_compact(text, 4).to_string(), "$a a…");
    }

    #[test]
    fn name_list_is_capped() {
        let names = ["a", "b", "c", "d", "e", "f", "g"];
        assert_eq!(
            compress_name_list(names.iter().copied()),
            "[a, b, c, d, e, … (total: 7)]"
        );
        assert_eq!(compress_name_list(std::iter::empty()), "[empty]");
    }
}
