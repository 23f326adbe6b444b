use crate::constants::archive;
use crate::{BackupError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// 上传内容的来源
#[derive(Debug, Clone)]
pub enum UploadSource {
    /// 已落盘的临时文件（如 multipart 解析结果）
    File(PathBuf),
    /// 内存中的完整内容
    Bytes(Vec<u8>),
}

/// 客户端上传的备份归档
#[derive(Debug, Clone)]
pub struct UploadedArchive {
    /// 客户端提供的文件名，只用于生成暂存文件名
    pub file_name: String,
    pub source: UploadSource,
}

impl UploadedArchive {
    pub fn from_file(file_name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            file_name: file_name.into(),
            source: UploadSource::File(path.into()),
        }
    }

    pub fn from_bytes(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            source: UploadSource::Bytes(bytes),
        }
    }

    /// 归档内容在恢复时才校验，这里只拒绝空上传
    pub(super) fn validate(&self) -> Result<()> {
        match &self.source {
            UploadSource::Bytes(bytes) if bytes.is_empty() => {
                Err(BackupError::InvalidUpload("上传内容为空".to_string()))
            }
            UploadSource::File(path) if path.as_os_str().is_empty() => {
                Err(BackupError::InvalidUpload("上传文件路径为空".to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// 只保留客户端文件名的最后一段；空名或 `.`/`..` 使用兜底文件名
pub(super) fn sanitize_file_name(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    match last {
        "" | "." | ".." => archive::FALLBACK_UPLOAD_NAME.to_string(),
        other => other.to_string(),
    }
}

pub(super) fn staging_file_name(task_id: i64, client_name: &str) -> String {
    format!(
        "{}{}_{}",
        archive::UPLOAD_STAGING_PREFIX,
        task_id,
        sanitize_file_name(client_name)
    )
}

/// 将上传内容写入暂存目录，失败时不留下半个文件
pub(super) async fn stage_upload(
    temp_dir: &Path,
    task_id: i64,
    upload: UploadedArchive,
) -> Result<PathBuf> {
    tokio::fs::create_dir_all(temp_dir).await?;
    let staged = temp_dir.join(staging_file_name(task_id, &upload.file_name));

    let written = match upload.source {
        UploadSource::File(source) => tokio::fs::copy(&source, &staged).await.map(|_| ()),
        UploadSource::Bytes(bytes) => tokio::fs::write(&staged, bytes).await,
    };

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&staged).await;
        return Err(e.into());
    }

    debug!("上传内容已暂存: {}", staged.display());
    Ok(staged)
}

/// 移动文件，跨设备时退化为复制后删除
pub(super) async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Err(e) = tokio::fs::rename(from, to).await {
        debug!("重命名失败，改为复制: {}", e);
        tokio::fs::copy(from, to).await?;
        tokio::fs::remove_file(from).await?;
    }
    Ok(())
}
