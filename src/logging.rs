//! 日志初始化
//! 控制台：默认 info，`--debug` 时 debug，RUST_LOG 环境变量优先
//! 日志文件：始终记录 debug 及以上级别，每行 `时间 - 来源 - 级别 - 消息`
//! 默认使用 env_logger（控制台与文件各一个 Logger）；启用 `tracing` feature 时改为
//! tracing-subscriber + tracing-appender，并通过 tracing-log 桥接 log 记录

/// 日志文件的默认文件名
pub const DEFAULT_LOG_FILE: &str = "yara-forge.log";

/// 默认过滤级别
pub fn default_filter(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}

#[cfg(not(feature = "tracing"))]
pub use self::env::{init_logger, TeeLogger};

#[cfg(not(feature = "tracing"))]
mod env {
    use env_logger::{Builder, Env, Logger, Target, WriteStyle};
    use log::{LevelFilter, Log, Metadata, Record};
    use std::fs::OpenOptions;
    use std::io::{self, Write};
    use std::path::Path;

    use super::default_filter;

    /// 日志文件时间格式（与控制台无关）
    const FILE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

    /// 文件中使用的级别名
    pub(super) fn level_name(level: log::Level) -> &'static str {
        match level {
            log::Level::Error => "ERROR",
            log::Level::Warn => "WARNING",
            log::Level::Info => "INFO",
            log::Level::Debug => "DEBUG",
            log::Level::Trace => "TRACE",
        }
    }

    /// 控制台 + 调试日志文件
    pub struct TeeLogger {
        console: Logger,
        file: Option<Logger>,
    }

    impl TeeLogger {
        pub fn new(debug: bool, log_file: Option<&Path>) -> io::Result<Self> {
            let console = Builder::from_env(Env::default().default_filter_or(default_filter(debug)))
                .target(Target::Stdout)
                .build();
            let file = match log_file {
                Some(path) => Some(file_logger(path)?),
                None => None,
            };
            Ok(Self { console, file })
        }

        /// 全局最大级别：两个目标中较宽的一个
        pub fn max_level(&self) -> LevelFilter {
            let file = self.file.as_ref().map_or(LevelFilter::Off, Logger::filter);
            self.console.filter().max(file)
        }
    }

    /// 追加写入的文件 Logger，固定 debug 级别
    fn file_logger(path: &Path) -> io::Result<Logger> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Builder::new()
            .filter_level(LevelFilter::Debug)
            .write_style(WriteStyle::Never)
            .format(|buf, record| {
                writeln!(
                    buf,
                    "{} - {} - {} - {}",
                    chrono::Local::now().format(FILE_TIME_FORMAT),
                    record.target(),
                    level_name(record.level()),
                    record.args()
                )
            })
            .target(Target::Pipe(Box::new(file)))
            .build())
    }

    impl Log for TeeLogger {
        fn enabled(&self, metadata: &Metadata) -> bool {
            self.console.enabled(metadata)
                || self.file.as_ref().is_some_and(|f| f.enabled(metadata))
        }

        fn log(&self, record: &Record) {
            self.console.log(record);
            if let Some(file) = &self.file {
                file.log(record);
            }
        }

        fn flush(&self) {
            self.console.flush();
            if let Some(file) = &self.file {
                file.flush();
            }
        }
    }

    /// 安装全局日志器，重复调用时忽略
    /// 日志文件无法打开时只输出到控制台
    pub fn init_logger(debug: bool, log_file: Option<&Path>) {
        let (logger, file_error) = match TeeLogger::new(debug, log_file) {
            Ok(logger) => (logger, None),
            Err(e) => match TeeLogger::new(debug, None) {
                Ok(logger) => (logger, Some(e)),
                Err(_) => return,
            },
        };
        let max_level = logger.max_level();
        if log::set_boxed_logger(Box::new(logger)).is_ok() {
            log::set_max_level(max_level);
        }
        if let (Some(e), Some(path)) = (file_error, log_file) {
            log::warn!("Cannot open log file {}: {}", path.display(), e);
        }
    }
}

#[cfg(feature = "tracing")]
pub fn init_logger(debug: bool, log_file: Option<&std::path::Path>) {
    use std::path::Path;
    use tracing_subscriber::filter::LevelFilter;
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let _ = tracing_log::LogTracer::init();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(debug)));
    let console_layer = fmt::layer().with_writer(std::io::stdout).with_filter(filter);

    let file_layer = log_file.map(|path| {
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let name = path.file_name().unwrap_or(path.as_os_str());
        fmt::layer()
            .with_ansi(false)
            .with_writer(tracing_appender::rolling::never(dir, name))
            .with_filter(LevelFilter::DEBUG)
    });

    if tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .is_ok()
    {
        tracing::debug!("tracing subscriber installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_selects_filter() {
        assert_eq!(default_filter(true), "debug");
        assert_eq!(default_filter(false), "info");
    }

    #[test]
    fn repeated_init_is_harmless() {
        init_logger(false, None);
        init_logger(true, None);
        log::info!("logger initialised twice");
    }

    #[cfg(not(feature = "tracing"))]
    #[test]
    fn file_level_names() {
        assert_eq!(env::level_name(log::Level::Warn), "WARNING");
        assert_eq!(env::level_name(log::Level::Debug), "DEBUG");
    }

    #[cfg(not(feature = "tracing"))]
    #[test]
    fn log_file_receives_debug_records_below_console_level() {
        use log::{Level, Log, Record};

        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join(DEFAULT_LOG_FILE);
        let logger = TeeLogger::new(false, Some(path.as_path())).unwrap();
        assert!(logger.max_level() >= log::LevelFilter::Debug);

        logger.log(
            &Record::builder()
                .level(Level::Debug)
                .target("yara_forge::collector")
                .args(format_args!("Parsed 3 rule(s) from a.yar"))
                .build(),
        );
        logger.log(
            &Record::builder()
                .level(Level::Warn)
                .target("yara_forge_engine::dedup")
                .args(format_args!("Renamed 1 rule(s)"))
                .build(),
        );
        logger.log(
            &Record::builder()
                .level(Level::Trace)
                .target("yara_forge_engine::normalizer")
                .args(format_args!("trace detail"))
                .build(),
        );
        logger.flush();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" - yara_forge::collector - DEBUG - Parsed 3 rule(s) from a.yar"));
        assert!(lines[1].ends_with(" - yara_forge_engine::dedup - WARNING - Renamed 1 rule(s)"));
        // 时间戳：YYYY-MM-DD HH:MM:SS,mmm
        let stamp = lines[0].split(" - ").next().unwrap();
        assert_eq!(stamp.len(), 23);
        assert_eq!(&stamp[19..20], ",");
    }
}
