use crate::Result;
use crate::archive::ArchiveWriter;
use crate::constants::archive;
use std::fs;
use std::path::{Component, Path};
use walkdir::WalkDir;

/// 上传目录恢复结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRestoreOutcome {
    /// 归档中没有 `uploads/`，上传目录保持不变
    Skipped,
    /// 上传目录已被整体替换
    Replaced { files: usize },
}

/// 将上传目录下的所有普通文件写入归档的 `uploads/` 下，返回写入的文件数
///
/// 上传目录不存在时视为空目录。
pub fn write_upload_tree(writer: &mut ArchiveWriter, upload_root: &Path) -> Result<usize> {
    if !upload_root.exists() {
        tracing::warn!(
            "上传目录不存在，归档中将只包含数据库: {}",
            upload_root.display()
        );
        return Ok(0);
    }

    let mut files = 0;
    for entry in WalkDir::new(upload_root).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(upload_root)?;
        let entry_name = archive_entry_name(relative);
        writer.add_file(&entry_name, entry.path())?;
        files += 1;
    }

    tracing::info!("已打包上传目录: {} ({} 个文件)", upload_root.display(), files);
    Ok(files)
}

/// 归档内统一使用 `/` 分隔
fn archive_entry_name(relative: &Path) -> String {
    let mut name = String::from(archive::UPLOADS_DIR);
    for component in relative.components() {
        if let Component::Normal(part) = component {
            name.push('/');
            name.push_str(&part.to_string_lossy());
        }
    }
    name
}

/// 用解压目录中的 `uploads/` 整体替换上传目录
///
/// 解压目录中没有 `uploads/` 时不做任何修改。
pub fn restore_upload_tree(extract_dir: &Path, upload_root: &Path) -> Result<FileRestoreOutcome> {
    let source_root = extract_dir.join(archive::UPLOADS_DIR);
    if !source_root.is_dir() {
        tracing::info!("归档中没有上传文件，跳过文件恢复");
        return Ok(FileRestoreOutcome::Skipped);
    }

    if upload_root.exists() {
        tracing::warn!("删除现有上传目录: {}", upload_root.display());
        fs::remove_dir_all(upload_root)?;
    }
    fs::create_dir_all(upload_root)?;

    let mut files = 0;
    for entry in WalkDir::new(&source_root) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(&source_root)?;
        let target = upload_root.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            files += 1;
        }
    }

    tracing::info!("上传目录已恢复: {} ({} 个文件)", upload_root.display(), files);
    Ok(FileRestoreOutcome::Replaced { files })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::extract_archive;
    use crate::dialect::Dialect;
    use tempfile::tempdir;

    #[test]
    fn test_upload_tree_roundtrip_replaces_target() {
        let dir = tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        fs::create_dir_all(uploads.join("7/2024")).unwrap();
        fs::write(uploads.join("7/2024/cat.png"), b"cat").unwrap();
        fs::write(uploads.join("avatar.jpg"), b"avatar").unwrap();

        let archive_path = dir.path().join("backup.zip");
        let mut writer = ArchiveWriter::create(&archive_path).unwrap();
        writer.add_database_dump(Dialect::Sqlite, b"").unwrap();
        assert_eq!(write_upload_tree(&mut writer, &uploads).unwrap(), 2);
        writer.finish().unwrap();

        let target = dir.path().join("live");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("stale.txt"), b"old").unwrap();

        let extracted = extract_archive(&archive_path, &dir.path().join("temp")).unwrap();
        let outcome = restore_upload_tree(extracted.path(), &target).unwrap();

        assert_eq!(outcome, FileRestoreOutcome::Replaced { files: 2 });
        assert!(!target.join("stale.txt").exists());
        assert_eq!(fs::read(target.join("7/2024/cat.png")).unwrap(), b"cat");
        assert_eq!(fs::read(target.join("avatar.jpg")).unwrap(), b"avatar");
    }

    #[test]
    fn test_missing_upload_root_is_empty() {
        let dir = tempdir().unwrap();
        let archive_path = dir.path().join("backup.zip");
        let mut writer = ArchiveWriter::create(&archive_path).unwrap();
        writer.add_database_dump(Dialect::Sqlite, b"").unwrap();
        let files = write_upload_tree(&mut writer, &dir.path().join("missing")).unwrap();
        assert_eq!(files, 0);
        writer.finish().unwrap();
    }

    #[test]
    fn test_restore_without_uploads_is_noop() {
        let dir = tempdir().unwrap();
        let extract_dir = dir.path().join("extract");
        fs::create_dir_all(&extract_dir).unwrap();

        let target = dir.path().join("live");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("keep.png"), b"keep").unwrap();

        let outcome = restore_upload_tree(&extract_dir, &target).unwrap();
        assert_eq!(outcome, FileRestoreOutcome::Skipped);
        assert_eq!(fs::read(target.join("keep.png")).unwrap(), b"keep");
    }

    #[test]
    fn test_archive_entry_name_uses_forward_slashes() {
        let relative = Path::new("7").join("2024").join("cat.png");
        assert_eq!(archive_entry_name(&relative), "uploads/7/2024/cat.png");
    }
}
