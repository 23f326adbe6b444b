use backup_core::{Result, config::AppConfig};
use std::path::Path;
use tracing::{info, warn};

/// 生成默认配置文件并创建目录结构
pub async fn run_init(config_path: &Path, force: bool) -> Result<()> {
    info!("🗄️  Lopic 备份工具初始化");
    info!("========================");

    if config_path.exists() && !force {
        warn!("⚠️  配置文件已存在: {}", config_path.display());
        info!("如果您要重新初始化，请使用 --force 参数");
        info!("示例: lopic-backup init --force");
        return Ok(());
    }

    info!("📋 步骤 1: 创建配置文件");
    let config = AppConfig::default();
    config.save_to_file(config_path)?;
    info!("   ✅ 创建配置文件: {}", config_path.display());

    info!("📋 步骤 2: 创建目录结构");
    config.ensure_dirs()?;
    std::fs::create_dir_all(config.get_upload_dir())?;
    info!("   ✅ 创建目录结构:");
    info!("      - {}    (上传文件目录)", config.get_upload_dir().display());
    info!("      - {}    (备份存储目录)", config.get_backup_dir().display());
    info!("      - {}    (临时目录)", config.get_temp_dir().display());

    info!("🎉 初始化完成！");
    info!("💡 请根据实际部署修改配置文件中的 [database] 部分");
    info!("   然后运行: lopic-backup backup");
    Ok(())
}
