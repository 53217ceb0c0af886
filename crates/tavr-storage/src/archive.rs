//! 患者数据导出/导入与系统备份 (zip)

use crate::layout::{DataLayout, CONFIG_FILE};
use chrono::Local;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use tavr_core::{Result, TavrError};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// 备份清单文件名
pub const BACKUP_MANIFEST: &str = "BACKUP_MANIFEST.json";

const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// 压缩包操作结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    pub file_count: usize,
    /// 压缩包大小
    pub archive_bytes: u64,
}

impl ArchiveSummary {
    pub fn archive_megabytes(&self) -> f64 {
        self.archive_bytes as f64 / 1024.0 / 1024.0
    }
}

/// 备份信息，同时作为备份清单写入压缩包
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupInfo {
    /// 创建时间
    pub created_at: String,
    /// 备份文件数量
    pub file_count: usize,
    /// 备份数据大小（压缩前）
    pub total_size: u64,
    /// 文件清单
    pub files: Vec<BackupFileEntry>,
}

/// 备份文件条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupFileEntry {
    /// 压缩包内路径
    pub path: String,
    /// 文件大小
    pub size: u64,
    /// SHA-256
    pub hash: String,
}

fn zip_error(e: ZipError) -> TavrError {
    TavrError::storage(format!("压缩包错误: {}", e))
}

fn deflated() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

/// 相对路径转换为压缩包内名称（`/` 分隔）
fn archive_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// 复制数据并计算 SHA-256，返回 (字节数, 哈希)
fn copy_and_hash<R: Read, W: Write>(reader: &mut R, writer: &mut W) -> io::Result<(u64, String)> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        writer.write_all(&buffer[..n])?;
        total += n as u64;
    }
    Ok((total, format!("{:x}", hasher.finalize())))
}

fn add_file<W: Write + Seek>(zip: &mut ZipWriter<W>, source: &Path, name: &str) -> Result<BackupFileEntry> {
    let mut file = File::open(source)?;
    zip.start_file(name, deflated()).map_err(zip_error)?;
    let (size, hash) = copy_and_hash(&mut file, zip)?;
    debug!("写入压缩包: {} ({} 字节)", name, size);
    Ok(BackupFileEntry {
        path: name.to_string(),
        size,
        hash,
    })
}

/// 目录下所有文件，按路径排序
fn files_under(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

fn create_output(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(File::create(path)?)
}

impl DataLayout {
    /// 默认导出文件名 `export_<患者ID>_YYYYmmdd.zip`
    pub fn default_export_name(patient_id: &str) -> String {
        format!("export_{}_{}.zip", patient_id, Local::now().format("%Y%m%d"))
    }

    /// 默认备份文件名 `tavr_backup_YYYYmmdd_HHMMSS.zip`
    pub fn default_backup_name() -> String {
        format!("tavr_backup_{}.zip", Local::now().format("%Y%m%d_%H%M%S"))
    }

    /// 导出患者数据目录及相关结果文件
    pub fn export_patient(&self, patient_id: &str, output: Option<&Path>) -> Result<ArchiveSummary> {
        let patient_dir = self.patient_dir(patient_id)?;
        if !patient_dir.is_dir() {
            return Err(TavrError::not_found(format!("未找到患者 {} 的数据", patient_id)));
        }

        let output = match output {
            Some(path) => self.resolve(path),
            None => self.resolve(Self::default_export_name(patient_id)),
        };
        info!("导出患者数据: {} -> {:?}", patient_id, output);

        // 先列出文件再创建输出，输出文件本身不写入压缩包
        let mut entries: Vec<(PathBuf, String)> = files_under(&patient_dir)
            .into_iter()
            .filter(|path| *path != output)
            .filter_map(|path| {
                let name = archive_name(path.strip_prefix(self.base()).ok()?);
                Some((path, name))
            })
            .collect();

        let results_dir = self.results_dir();
        if results_dir.is_dir() {
            let mut results: Vec<PathBuf> = fs::read_dir(&results_dir)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file() && *p != output)
                .filter(|p| {
                    p.file_name()
                        .is_some_and(|n| n.to_string_lossy().contains(patient_id))
                })
                .collect();
            results.sort();
            for path in results {
                let Some(file_name) = path.file_name() else {
                    continue;
                };
                let name = format!("results/{}", file_name.to_string_lossy());
                entries.push((path, name));
            }
        }

        let mut zip = ZipWriter::new(create_output(&output)?);
        for (path, name) in &entries {
            add_file(&mut zip, path, name)?;
        }
        let file_count = entries.len();

        zip.finish().map_err(zip_error)?;
        let archive_bytes = fs::metadata(&output)?.len();
        info!("数据已导出到: {:?} ({} 个文件)", output, file_count);
        Ok(ArchiveSummary {
            path: output,
            file_count,
            archive_bytes,
        })
    }

    /// 导入压缩包内容到基础目录
    ///
    /// 任一条目路径越出基础目录时整个导入失败，不写入任何文件。
    pub fn import_archive(&self, file: &Path) -> Result<ArchiveSummary> {
        let file = self.resolve(file);
        if !file.is_file() {
            return Err(TavrError::not_found(format!("文件 {} 不存在", file.display())));
        }
        info!("导入患者数据: {:?}", file);

        let mut archive = ZipArchive::new(File::open(&file)?).map_err(zip_error)?;

        let mut targets = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let entry = archive.by_index(index).map_err(zip_error)?;
            let Some(relative) = entry.enclosed_name() else {
                return Err(TavrError::storage(format!("压缩包包含不安全的路径: {}", entry.name())));
            };
            if entry.is_dir() || relative == Path::new(BACKUP_MANIFEST) {
                continue;
            }
            targets.push((index, self.base().join(relative)));
        }

        for (index, target) in &targets {
            let mut entry = archive.by_index(*index).map_err(zip_error)?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(target)?;
            io::copy(&mut entry, &mut out)?;
            debug!("解压: {:?}", target);
        }

        info!("数据导入成功: {} 个文件", targets.len());
        Ok(ArchiveSummary {
            archive_bytes: fs::metadata(&file)?.len(),
            path: file,
            file_count: targets.len(),
        })
    }

    /// 备份 `data/`、`results/`、配置文件和根目录下的JSON文件
    pub fn backup(&self, output: Option<&Path>) -> Result<(ArchiveSummary, BackupInfo)> {
        let output = match output {
            Some(path) => self.resolve(path),
            None => self.resolve(Self::default_backup_name()),
        };
        info!("创建系统备份: {:?}", output);

        let mut sources: Vec<(PathBuf, String)> = Vec::new();
        for dir in [self.data_dir(), self.results_dir()] {
            for path in files_under(&dir) {
                if let Ok(relative) = path.strip_prefix(self.base()) {
                    let name = archive_name(relative);
                    sources.push((path, name));
                }
            }
        }
        let mut top_level: Vec<PathBuf> = fs::read_dir(self.base())?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .filter(|p| {
                p.file_name().is_some_and(|n| n == CONFIG_FILE)
                    || p.extension().is_some_and(|ext| ext == "json")
            })
            .collect();
        top_level.sort();
        for path in top_level {
            if let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) {
                sources.push((path, name));
            }
        }

        let mut zip = ZipWriter::new(create_output(&output)?);
        let mut files = Vec::with_capacity(sources.len());
        for (path, name) in &sources {
            if *path == output {
                continue;
            }
            match add_file(&mut zip, path, name) {
                Ok(entry) => files.push(entry),
                Err(TavrError::Io(e)) => warn!("跳过无法读取的文件 {:?}: {}", path, e),
                Err(e) => return Err(e),
            }
        }

        let info = BackupInfo {
            created_at: tavr_core::utils::display_timestamp(),
            file_count: files.len(),
            total_size: files.iter().map(|f| f.size).sum(),
            files,
        };
        zip.start_file(BACKUP_MANIFEST, deflated()).map_err(zip_error)?;
        zip.write_all(serde_json::to_string_pretty(&info)?.as_bytes())?;
        zip.finish().map_err(zip_error)?;

        let summary = ArchiveSummary {
            archive_bytes: fs::metadata(&output)?.len(),
            path: output,
            file_count: info.file_count,
        };
        info!(
            "备份完成: {:?} ({:.2} MB)",
            summary.path,
            summary.archive_megabytes()
        );
        Ok((summary, info))
    }

    /// 按备份清单校验压缩包内每个文件的大小和哈希，返回校验通过的文件数
    pub fn verify_backup(&self, file: &Path) -> Result<usize> {
        let file = self.resolve(file);
        let mut archive = ZipArchive::new(File::open(&file)?).map_err(zip_error)?;

        let manifest: BackupInfo = {
            let mut entry = archive.by_name(BACKUP_MANIFEST).map_err(|e| match e {
                ZipError::FileNotFound => TavrError::not_found(format!("备份清单缺失: {}", file.display())),
                other => zip_error(other),
            })?;
            let mut text = String::new();
            entry.read_to_string(&mut text)?;
            serde_json::from_str(&text)?
        };

        let expected: BTreeMap<&str, &BackupFileEntry> =
            manifest.files.iter().map(|f| (f.path.as_str(), f)).collect();
        let mut problems = Vec::new();
        for (path, entry) in &expected {
            match archive.by_name(path) {
                Ok(mut data) => {
                    let (size, hash) = copy_and_hash(&mut data, &mut io::sink())?;
                    if size != entry.size || hash != entry.hash {
                        problems.push(format!("校验失败: {}", path));
                    }
                }
                Err(ZipError::FileNotFound) => problems.push(format!("文件缺失: {}", path)),
                Err(e) => return Err(zip_error(e)),
            }
        }

        if problems.is_empty() {
            info!("备份校验通过: {} 个文件", expected.len());
            Ok(expected.len())
        } else {
            Err(TavrError::storage(problems.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated() -> (tempfile::TempDir, DataLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        layout.ensure_directories().unwrap();
        let patient = layout.patient_dir("P001").unwrap();
        fs::create_dir_all(patient.join("ct")).unwrap();
        fs::write(patient.join("metadata.json"), r#"{"name":"张三"}"#).unwrap();
        fs::write(patient.join("ct/slice_001.dcm"), vec![7u8; 4096]).unwrap();
        fs::write(layout.results_dir().join("P001_report.html"), b"<html></html>").unwrap();
        fs::write(layout.results_dir().join("P002_report.html"), b"other").unwrap();
        fs::write(layout.config_file(), "[General]\nlanguage = zh_CN\n").unwrap();
        (dir, layout)
    }

    fn entry_names(path: &Path) -> Vec<String> {
        let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_export_patient_contents() {
        let (dir, layout) = populated();
        let output = dir.path().join("out/p001.zip");
        let summary = layout.export_patient("P001", Some(&output)).unwrap();
        assert_eq!(summary.file_count, 3);
        assert_eq!(
            entry_names(&output),
            vec![
                "data/patients/P001/ct/slice_001.dcm",
                "data/patients/P001/metadata.json",
                "results/P001_report.html",
            ]
        );
    }

    #[test]
    fn test_export_into_results_skips_itself() {
        let (_dir, layout) = populated();
        let output = layout.results_dir().join("P001_export.zip");
        let summary = layout.export_patient("P001", Some(&output)).unwrap();
        assert_eq!(summary.file_count, 3);
        let names = entry_names(&output);
        assert!(!names.contains(&"results/P001_export.zip".to_string()));
        assert!(names.contains(&"results/P001_report.html".to_string()));

        // 再次导出时旧的压缩包同样被跳过
        let again = layout.export_patient("P001", Some(&output)).unwrap();
        assert_eq!(again.file_count, 3);
    }

    #[test]
    fn test_export_unknown_patient() {
        let (_dir, layout) = populated();
        assert!(matches!(
            layout.export_patient("P999", None),
            Err(TavrError::NotFound(_))
        ));
        assert!(layout.export_patient("../P001", None).is_err());
    }

    #[test]
    fn test_export_then_import_into_new_base() {
        let (dir, layout) = populated();
        let output = dir.path().join("p001.zip");
        layout.export_patient("P001", Some(&output)).unwrap();

        let target = tempfile::tempdir().unwrap();
        let fresh = DataLayout::new(target.path());
        let summary = fresh.import_archive(&output).unwrap();
        assert_eq!(summary.file_count, 3);
        let dcm = fs::read(fresh.patient_dir("P001").unwrap().join("ct/slice_001.dcm")).unwrap();
        assert_eq!(dcm, vec![7u8; 4096]);
        assert!(fresh.results_dir().join("P001_report.html").is_file());
        assert_eq!(fresh.list_patients().unwrap()[0].name, "张三");
    }

    #[test]
    fn test_import_rejects_escaping_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("evil.zip");
        {
            let mut zip = ZipWriter::new(File::create(&archive_path).unwrap());
            zip.start_file("data/ok.txt", deflated()).unwrap();
            zip.write_all(b"ok").unwrap();
            zip.start_file("../escaped.txt", deflated()).unwrap();
            zip.write_all(b"bad").unwrap();
            zip.finish().unwrap();
        }

        let base = dir.path().join("base");
        let layout = DataLayout::new(&base);
        let result = layout.import_archive(&archive_path);
        assert!(matches!(result, Err(TavrError::Storage(_))));
        assert!(!base.join("data/ok.txt").exists());
        assert!(!dir.path().join("escaped.txt").exists());
    }

    #[test]
    fn test_import_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        assert!(matches!(
            layout.import_archive(Path::new("missing.zip")),
            Err(TavrError::NotFound(_))
        ));
    }

    #[test]
    fn test_backup_manifest_and_verify() {
        let (dir, layout) = populated();
        fs::write(dir.path().join("extra.json"), b"{}").unwrap();
        let output = dir.path().join("backup.zip");
        let (summary, info) = layout.backup(Some(&output)).unwrap();

        assert_eq!(summary.file_count, info.files.len());
        let names = entry_names(&output);
        assert!(names.contains(&BACKUP_MANIFEST.to_string()));
        assert!(names.contains(&"config.ini".to_string()));
        assert!(names.contains(&"extra.json".to_string()));
        assert!(names.contains(&"results/P002_report.html".to_string()));

        let dcm = info
            .files
            .iter()
            .find(|f| f.path == "data/patients/P001/ct/slice_001.dcm")
            .unwrap();
        assert_eq!(dcm.size, 4096);
        assert_eq!(dcm.hash.len(), 64);

        assert_eq!(layout.verify_backup(&output).unwrap(), info.file_count);
    }

    #[test]
    fn test_verify_detects_missing_manifest() {
        let (dir, layout) = populated();
        let output = dir.path().join("export.zip");
        layout.export_patient("P001", Some(&output)).unwrap();
        assert!(matches!(
            layout.verify_backup(&output),
            Err(TavrError::NotFound(_))
        ));
    }

    #[test]
    fn test_copy_and_hash_known_digest() {
        let (size, hash) = copy_and_hash(&mut &b"abc"[..], &mut io::sink()).unwrap();
        assert_eq!(size, 3);
        assert_eq!(
            hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
