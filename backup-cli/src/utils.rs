/// # 日志配置
///
/// 库代码只使用 `tracing` 宏，日志订阅者在 `main.rs` 中通过 `setup_logging()` 安装。
///
/// ## 日志配置选项
/// - `-v, --verbose`：启用详细日志模式（DEBUG 级别）
/// - `RUST_LOG`：标准的 Rust 日志级别控制，优先于 `--verbose`
/// - `LOPIC_BACKUP_LOG_FILE`：日志文件路径，设置后日志追加写入文件而非终端
///
/// ```bash
/// # 详细日志输出到终端
/// lopic-backup -v backup
///
/// # 日志输出到文件
/// LOPIC_BACKUP_LOG_FILE=backup.log lopic-backup restore 3
///
/// # 只看核心库的调试日志
/// RUST_LOG=backup_core=debug lopic-backup restore 3
/// ```
///
/// 终端输出不显示模块路径和时间戳；文件输出包含模块路径、线程名和行号。
pub fn setup_logging(verbose: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let log_file = std::env::var("LOPIC_BACKUP_LOG_FILE").ok().and_then(|path| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| eprintln!("无法打开日志文件 {path}: {e}，改为输出到终端"))
            .ok()
    });

    match log_file {
        Some(file) => fmt()
            .with_env_filter(env_filter)
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_names(true)
            .with_line_number(true)
            .init(),
        None => fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_names(false)
            .with_line_number(false)
            .without_time()
            .compact()
            .init(),
    }
}

/// 以 KB/MB/GB 显示字节数
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let size = bytes as f64;
    if size >= GB {
        format!("{:.1}GB", size / GB)
    } else if size >= MB {
        format!("{:.1}MB", size / MB)
    } else if size >= KB {
        format!("{:.1}KB", size / KB)
    } else {
        format!("{bytes}B")
    }
}
