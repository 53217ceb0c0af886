//! 日志初始化
//!
//! 控制台输出加可选的日志文件 `logs/tavr_analysis_YYYYmmdd_HHMMSS.log`。

use chrono::Local;
use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Mutex;
use tavr_core::Result;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// 日志选项
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// 日志级别（RUST_LOG 优先）
    pub level: String,
    /// 详细日志，强制 debug 级别
    pub verbose: bool,
    /// 日志文件目录，为None时只输出到控制台
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            verbose: false,
            log_dir: None,
        }
    }
}

/// 日志文件名
pub fn log_file_name() -> String {
    format!("tavr_analysis_{}.log", Local::now().format("%Y%m%d_%H%M%S"))
}

/// 初始化全局日志，返回日志文件路径
///
/// 重复调用时保留第一次安装的订阅者。
pub fn init_logging(options: &LoggingOptions) -> Result<Option<PathBuf>> {
    let level = if options.verbose { "debug" } else { options.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (file_layer, log_path) = match &options.log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let path = dir.join(log_file_name());
            let file = File::create(&path)?;
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(Mutex::new(file));
            (Some(layer), Some(path))
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("日志系统初始化完成，级别: {}", level);
        if let Some(path) = &log_path {
            tracing::info!("日志文件: {:?}", path);
        }
        Ok(log_path)
    } else {
        // 已存在全局订阅者，新建的日志文件不会被写入
        if let Some(path) = &log_path {
            let _ = fs::remove_file(path);
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_name() {
        let name = log_file_name();
        assert!(name.starts_with("tavr_analysis_"));
        assert!(name.ends_with(".log"));
        assert_eq!(name.len(), "tavr_analysis_20240101_120000.log".len());
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let options = LoggingOptions {
            log_dir: Some(dir.path().join("logs")),
            ..Default::default()
        };
        let first = init_logging(&options).unwrap();
        let second = init_logging(&options).unwrap();
        assert!(second.is_none());
        if let Some(path) = first {
            assert!(path.exists());
        }
    }
}
