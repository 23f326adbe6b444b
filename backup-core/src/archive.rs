use crate::constants::archive;
use crate::dialect::Dialect;
use crate::{BackupError, Result};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// 备份归档写入器
///
/// 归档布局：根目录下一个 `database_<dialect>.sql`，以及 `uploads/` 下的上传文件树。
pub struct ArchiveWriter {
    writer: ZipWriter<File>,
    path: PathBuf,
    entries: usize,
}

impl ArchiveWriter {
    /// 在指定路径创建新的归档文件
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;

        Ok(Self {
            writer: ZipWriter::new(file),
            path: path.to_path_buf(),
            entries: 0,
        })
    }

    fn options(size_hint: u64) -> SimpleFileOptions {
        SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o644)
            .large_file(size_hint > u32::MAX as u64)
    }

    /// 写入数据库导出文件（位于归档根目录）
    pub fn add_database_dump(&mut self, dialect: Dialect, sql: &[u8]) -> Result<()> {
        self.writer
            .start_file(dialect.sql_file_name(), Self::options(sql.len() as u64))?;
        self.writer.write_all(sql)?;
        self.entries += 1;

        tracing::debug!(
            "已写入数据库导出: {} ({} 字节)",
            dialect.sql_file_name(),
            sql.len()
        );
        Ok(())
    }

    /// 以流式方式写入磁盘文件，返回写入的字节数
    pub fn add_file(&mut self, entry_name: &str, source: &Path) -> Result<u64> {
        let size = fs::metadata(source)?.len();
        self.writer.start_file(entry_name, Self::options(size))?;

        let mut input = File::open(source)?;
        let written = io::copy(&mut input, &mut self.writer)?;
        self.entries += 1;
        Ok(written)
    }

    /// 已写入的条目数
    pub fn entry_count(&self) -> usize {
        self.entries
    }

    /// 完成归档并返回归档文件在磁盘上的大小
    pub fn finish(self) -> Result<u64> {
        let file = self.writer.finish()?;
        file.sync_all()?;
        let size = fs::metadata(&self.path)?.len();

        tracing::debug!(
            "归档写入完成: {} ({} 个条目, {} 字节)",
            self.path.display(),
            self.entries,
            size
        );
        Ok(size)
    }
}

/// 解压后的归档，目录在值被丢弃时删除
#[derive(Debug)]
pub struct ExtractedArchive {
    dir: TempDir,
    files: usize,
}

impl ExtractedArchive {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// 解压出的普通文件数
    pub fn file_count(&self) -> usize {
        self.files
    }

    /// 归档是否包含 `uploads/` 目录
    pub fn has_uploads(&self) -> bool {
        self.path().join(archive::UPLOADS_DIR).is_dir()
    }
}

/// 将归档解压到 `scratch_parent` 下新建的临时目录
///
/// 任何条目解码后的名称逃逸出临时目录时整体失败，已解压的内容随临时目录一起删除。
pub fn extract_archive(archive_path: &Path, scratch_parent: &Path) -> Result<ExtractedArchive> {
    fs::create_dir_all(scratch_parent)?;
    let dir = tempfile::Builder::new()
        .prefix(archive::RESTORE_SCRATCH_PREFIX)
        .tempdir_in(scratch_parent)?;

    let files = unpack_into(archive_path, dir.path())?;
    tracing::info!(
        "归档解压完成: {} -> {} ({} 个文件)",
        archive_path.display(),
        dir.path().display(),
        files
    );

    Ok(ExtractedArchive { dir, files })
}

fn unpack_into(archive_path: &Path, dest: &Path) -> Result<usize> {
    let dest = dest.canonicalize()?;
    let file = File::open(archive_path)?;
    let mut zip = ZipArchive::new(file)?;
    let mut files = 0;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let name = decode_entry_name(entry.name_raw());
        let target = resolve_entry_path(&dest, &name)?;

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut output = File::create(&target)?;
        io::copy(&mut entry, &mut output)?;
        files += 1;
    }

    Ok(files)
}

/// 解码条目名：合法 UTF-8 原样使用，否则按 GBK 解码
pub fn decode_entry_name(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(name) => name.to_string(),
        Err(_) => {
            let (decoded, _, had_errors) = encoding_rs::GBK.decode(raw);
            if had_errors {
                tracing::warn!("条目名既不是 UTF-8 也不是合法 GBK，已替换无法解码的字节");
            }
            decoded.into_owned()
        }
    }
}

/// 计算条目在解压目录中的目标路径，拒绝绝对路径与任何 `..` 段
pub fn resolve_entry_path(dest: &Path, name: &str) -> Result<PathBuf> {
    let normalized = name.replace('\\', "/");
    if normalized.starts_with('/') {
        return Err(BackupError::zip_slip(name));
    }

    let mut relative = PathBuf::new();
    for part in normalized.split('/') {
        match part {
            "" | "." => continue,
            ".." => return Err(BackupError::zip_slip(name)),
            other => relative.push(other),
        }
    }

    // Windows 盘符等前缀在这里以非 Normal 组件出现
    if relative.as_os_str().is_empty()
        || !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
    {
        return Err(BackupError::zip_slip(name));
    }

    let target = dest.join(&relative);
    if !target.starts_with(dest) || target == dest {
        return Err(BackupError::zip_slip(name));
    }
    Ok(target)
}


#[cfg(test)]
mod tests {
    use super::test_support::build_stored_zip;
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_and_extract_archive() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.png");
        fs::write(&source, b"png-bytes").unwrap();

        let archive_path = dir.path().join("backup.zip");
        let mut writer = ArchiveWriter::create(&archive_path).unwrap();
        writer
            .add_database_dump(Dialect::Sqlite, b"INSERT INTO users VALUES (1);")
            .unwrap();
        writer.add_file("uploads/1/a.png", &source).unwrap();
        assert_eq!(writer.entry_count(), 2);
        let size = writer.finish().unwrap();
        assert_eq!(size, fs::metadata(&archive_path).unwrap().len());

        let scratch = dir.path().join("temp");
        let extracted = extract_archive(&archive_path, &scratch).unwrap();
        assert_eq!(extracted.file_count(), 2);
        assert!(extracted.has_uploads());
        assert_eq!(
            fs::read(extracted.path().join("uploads/1/a.png")).unwrap(),
            b"png-bytes"
        );
        assert_eq!(
            Dialect::detect_in_dir(extracted.path()).unwrap(),
            Dialect::Sqlite
        );

        let scratch_path = extracted.path().to_path_buf();
        drop(extracted);
        assert!(!scratch_path.exists());
    }

    #[test]
    fn test_resolve_entry_path_rejects_traversal() {
        let dir = tempdir().unwrap();
        let dest = dir.path().canonicalize().unwrap();

        for name in [
            "../evil.txt",
            "uploads/../../evil.txt",
            "/etc/passwd",
            "..\\evil.txt",
            "uploads/..",
            "",
        ] {
            let err = resolve_entry_path(&dest, name).unwrap_err();
            assert!(err.is_security(), "{name} 应被拒绝");
        }

        assert_eq!(
            resolve_entry_path(&dest, "uploads/./a..b.png").unwrap(),
            dest.join("uploads").join("a..b.png")
        );
    }

    #[test]
    fn test_extract_rejects_zip_slip_and_cleans_up() {
        // "图片" 的 GBK 编码，后接跳出目录的路径
        let mut gbk_traversal = vec![0xCD, 0xBC, 0xC6, 0xAC];
        gbk_traversal.extend_from_slice(b"/../../evil.txt");

        let cases: [(&[u8], bool, &str); 4] = [
            (b"../evil.txt", true, "../evil.txt"),
            (b"uploads/../../evil.txt", true, "uploads/../../evil.txt"),
            (b"/tmp/evil.txt", true, "/tmp/evil.txt"),
            (gbk_traversal.as_slice(), false, "图片/../../evil.txt"),
        ];

        for (raw_name, utf8_flag, decoded) in cases {
            let dir = tempdir().unwrap();
            let archive_path = dir.path().join("evil.zip");
            let bytes = build_stored_zip(
                &[(b"database_sqlite.sql", b"SELECT 1;"), (raw_name, b"pwned")],
                utf8_flag,
            );
            fs::write(&archive_path, bytes).unwrap();

            let scratch = dir.path().join("temp");
            let err = extract_archive(&archive_path, &scratch).unwrap_err();
            assert!(
                matches!(err, BackupError::ZipSlip(ref name) if name == decoded),
                "{decoded}: {err:?}"
            );

            assert!(!scratch.join("evil.txt").exists());
            assert!(!dir.path().join("evil.txt").exists());
            assert_eq!(fs::read_dir(&scratch).unwrap().count(), 0);
        }
    }

    #[test]
    fn test_decode_gbk_entry_name() {
        // "图片.png" 的 GBK 编码
        let gbk_name: &[u8] = &[0xCD, 0xBC, 0xC6, 0xAC, b'.', b'p', b'n', b'g'];
        assert_eq!(decode_entry_name(gbk_name), "图片.png");
        assert_eq!(decode_entry_name("图片.png".as_bytes()), "图片.png");

        let dir = tempdir().unwrap();
        let archive_path = dir.path().join("legacy.zip");
        let mut name = b"uploads/".to_vec();
        name.extend_from_slice(gbk_name);
        let bytes = build_stored_zip(&[(&name, b"legacy")], false);
        fs::write(&archive_path, bytes).unwrap();

        let extracted = extract_archive(&archive_path, &dir.path().join("temp")).unwrap();
        assert_eq!(
            fs::read(extracted.path().join("uploads").join("图片.png")).unwrap(),
            b"legacy"
        );
    }
}
