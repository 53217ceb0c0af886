//! 数据维护：缓存/日志清理、患者列表、使用统计、完整性检查

use crate::layout::DataLayout;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tavr_core::Result;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const UNKNOWN: &str = "未知";
const RECENT_FILE_LIMIT: usize = 5;
const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// 清理结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanReport {
    pub removed_files: usize,
    pub removed_bytes: u64,
}

impl CleanReport {
    pub fn removed_megabytes(&self) -> f64 {
        self.removed_bytes as f64 / 1024.0 / 1024.0
    }
}

/// 患者概要
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientSummary {
    pub patient_id: String,
    pub name: String,
    pub study_date: String,
}

/// 最近修改的文件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentFile {
    pub path: PathBuf,
    pub modified: DateTime<Local>,
}

impl RecentFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// 系统使用统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemStatistics {
    pub patient_count: usize,
    pub result_file_count: usize,
    /// 扩展名 -> 文件数，无扩展名记为空字符串
    pub file_types: BTreeMap<String, usize>,
    /// (目录名称, 字节数)，目录不存在时不列出
    pub disk_usage: Vec<(String, u64)>,
    pub recent_files: Vec<RecentFile>,
}

/// 完整性检查结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub issues: Vec<String>,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }
}

fn cutoff(days: u32) -> SystemTime {
    let age = Duration::from_secs(u64::from(days) * SECONDS_PER_DAY);
    SystemTime::now().checked_sub(age).unwrap_or(SystemTime::UNIX_EPOCH)
}

fn is_older_than(metadata: &fs::Metadata, cutoff: SystemTime) -> bool {
    metadata.modified().map(|t| t < cutoff).unwrap_or(false)
}

fn remove_if_older(path: &Path, cutoff: SystemTime, report: &mut CleanReport) {
    let metadata = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) => {
            debug!("读取文件信息失败 {:?}: {}", path, e);
            return;
        }
    };
    if !metadata.is_file() || !is_older_than(&metadata, cutoff) {
        return;
    }
    match fs::remove_file(path) {
        Ok(()) => {
            report.removed_files += 1;
            report.removed_bytes += metadata.len();
            debug!("删除文件: {:?}", path);
        }
        Err(e) => warn!("无法删除文件 {:?}: {}", path, e),
    }
}

/// 目录下所有文件的总字节数
fn directory_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// 目录的直接子文件
fn top_level_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    files
}

fn read_metadata_field(metadata: &serde_json::Value, key: &str) -> String {
    match metadata.get(key) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) | None => UNKNOWN.to_string(),
        Some(other) => other.to_string(),
    }
}

impl DataLayout {
    /// 清理 `days` 天前的缓存文件（递归）
    pub fn clean_cache(&self, days: u32) -> Result<CleanReport> {
        let dir = self.cache_dir();
        let mut report = CleanReport::default();
        if !dir.is_dir() {
            info!("缓存目录不存在");
            return Ok(report);
        }

        let cutoff = cutoff(days);
        for entry in WalkDir::new(&dir).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file() {
                remove_if_older(entry.path(), cutoff, &mut report);
            }
        }

        info!(
            "已删除 {} 个文件，释放 {:.2} MB 空间",
            report.removed_files,
            report.removed_megabytes()
        );
        Ok(report)
    }

    /// 清理 `days` 天前的日志文件 (`logs/*.log`)
    pub fn clean_logs(&self, days: u32) -> Result<CleanReport> {
        let dir = self.logs_dir();
        let mut report = CleanReport::default();
        if !dir.is_dir() {
            info!("日志目录不存在");
            return Ok(report);
        }

        let cutoff = cutoff(days);
        for path in top_level_files(&dir) {
            if path.extension().is_some_and(|ext| ext == "log") {
                remove_if_older(&path, cutoff, &mut report);
            }
        }

        info!("已删除 {} 个日志文件", report.removed_files);
        Ok(report)
    }

    /// 列出所有患者，按ID排序
    pub fn list_patients(&self) -> Result<Vec<PatientSummary>> {
        let dir = self.patients_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut patients = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let patient_id = entry.file_name().to_string_lossy().into_owned();
            let metadata_file = entry.path().join("metadata.json");

            let (name, study_date) = match fs::read_to_string(&metadata_file) {
                Ok(text) => match serde_json::from_str::<serde_json::Value>(&text) {
                    Ok(metadata) => (
                        read_metadata_field(&metadata, "name"),
                        read_metadata_field(&metadata, "study_date"),
                    ),
                    Err(e) => {
                        warn!("患者元数据格式错误 {:?}: {}", metadata_file, e);
                        (UNKNOWN.to_string(), UNKNOWN.to_string())
                    }
                },
                Err(_) => (UNKNOWN.to_string(), UNKNOWN.to_string()),
            };

            patients.push(PatientSummary {
                patient_id,
                name,
                study_date,
            });
        }

        patients.sort_by(|a, b| a.patient_id.cmp(&b.patient_id));
        Ok(patients)
    }

    /// 系统使用统计
    pub fn statistics(&self) -> Result<SystemStatistics> {
        let mut stats = SystemStatistics::default();

        let patients_dir = self.patients_dir();
        if patients_dir.is_dir() {
            stats.patient_count = fs::read_dir(&patients_dir)?.filter_map(|e| e.ok()).count();
        }

        let result_files = top_level_files(&self.results_dir());
        stats.result_file_count = result_files.len();
        for file in &result_files {
            let ext = file
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default();
            *stats.file_types.entry(ext).or_insert(0) += 1;
        }

        for (label, dir) in [
            ("数据目录", self.data_dir()),
            ("结果目录", self.results_dir()),
            ("缓存目录", self.cache_dir()),
            ("日志目录", self.logs_dir()),
        ] {
            if dir.is_dir() {
                stats.disk_usage.push((label.to_string(), directory_size(&dir)));
            }
        }

        let mut recent: Vec<RecentFile> = [self.results_dir(), self.logs_dir()]
            .iter()
            .flat_map(|dir| top_level_files(dir))
            .filter_map(|path| {
                let modified = fs::metadata(&path).and_then(|m| m.modified()).ok()?;
                Some(RecentFile {
                    path,
                    modified: DateTime::<Local>::from(modified),
                })
            })
            .collect();
        recent.sort_by(|a, b| b.modified.cmp(&a.modified));
        recent.truncate(RECENT_FILE_LIMIT);
        stats.recent_files = recent;

        Ok(stats)
    }

    /// 检查必需目录和配置文件
    pub fn check_integrity(&self) -> IntegrityReport {
        let mut issues = Vec::new();
        for dir in [
            self.data_dir(),
            self.results_dir(),
            self.logs_dir(),
            self.cache_dir(),
            self.resources_dir(),
        ] {
            if !dir.is_dir() {
                issues.push(format!("缺少目录: {}", dir.display()));
            }
        }
        if !self.config_file().is_file() {
            issues.push(format!("缺少文件: {}", crate::layout::CONFIG_FILE));
        }
        IntegrityReport { issues }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn age_file(path: &Path, days: u64) {
        let file = File::options().write(true).open(path).unwrap();
        let modified = SystemTime::now() - Duration::from_secs(days * SECONDS_PER_DAY);
        file.set_modified(modified).unwrap();
    }

    fn layout() -> (tempfile::TempDir, DataLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        layout.ensure_directories().unwrap();
        (dir, layout)
    }

    #[test]
    fn test_clean_cache_removes_only_old_files() {
        let (_dir, layout) = layout();
        let nested = layout.cache_dir().join("slices");
        fs::create_dir_all(&nested).unwrap();

        let old = nested.join("old.bin");
        fs::write(&old, vec![0u8; 2048]).unwrap();
        age_file(&old, 10);
        let fresh = layout.cache_dir().join("fresh.bin");
        fs::write(&fresh, b"fresh").unwrap();

        let report = layout.clean_cache(7).unwrap();
        assert_eq!(report.removed_files, 1);
        assert_eq!(report.removed_bytes, 2048);
        assert!(!old.exists());
        assert!(fresh.exists());
    }

    #[test]
    fn test_clean_missing_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        assert_eq!(layout.clean_cache(7).unwrap(), CleanReport::default());
        assert_eq!(layout.clean_logs(30).unwrap(), CleanReport::default());
    }

    #[test]
    fn test_clean_logs_only_log_extension() {
        let (_dir, layout) = layout();
        let old_log = layout.logs_dir().join("tavr_analysis_20200101_000000.log");
        let old_txt = layout.logs_dir().join("notes.txt");
        fs::write(&old_log, b"log").unwrap();
        fs::write(&old_txt, b"txt").unwrap();
        age_file(&old_log, 40);
        age_file(&old_txt, 40);

        let report = layout.clean_logs(30).unwrap();
        assert_eq!(report.removed_files, 1);
        assert!(!old_log.exists());
        assert!(old_txt.exists());
    }

    #[test]
    fn test_list_patients_with_metadata_fallback() {
        let (_dir, layout) = layout();
        let p1 = layout.patient_dir("P001").unwrap();
        let p2 = layout.patient_dir("P002").unwrap();
        fs::create_dir_all(&p1).unwrap();
        fs::create_dir_all(&p2).unwrap();
        fs::write(
            p1.join("metadata.json"),
            r#"{"name": "张三", "study_date": "2024-03-01"}"#,
        )
        .unwrap();

        let patients = layout.list_patients().unwrap();
        assert_eq!(patients.len(), 2);
        assert_eq!(patients[0].name, "张三");
        assert_eq!(patients[0].study_date, "2024-03-01");
        assert_eq!(patients[1].patient_id, "P002");
        assert_eq!(patients[1].name, "未知");
        assert_eq!(patients[1].study_date, "未知");
    }

    #[test]
    fn test_statistics() {
        let (_dir, layout) = layout();
        fs::create_dir_all(layout.patient_dir("P001").unwrap()).unwrap();
        fs::write(layout.results_dir().join("P001_report.html"), b"<html/>").unwrap();
        fs::write(layout.results_dir().join("P001.tavr"), b"{}").unwrap();
        fs::write(layout.results_dir().join("P001_mesh.obj"), b"v 0 0 0").unwrap();
        fs::write(layout.logs_dir().join("a.log"), b"x").unwrap();

        let stats = layout.statistics().unwrap();
        assert_eq!(stats.patient_count, 1);
        assert_eq!(stats.result_file_count, 3);
        assert_eq!(stats.file_types.get(".html"), Some(&1));
        assert_eq!(stats.file_types.get(".tavr"), Some(&1));
        assert_eq!(stats.disk_usage.len(), 4);
        assert_eq!(stats.recent_files.len(), 4);
    }

    #[test]
    fn test_check_integrity() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        let report = layout.check_integrity();
        assert_eq!(report.issues.len(), 6);

        layout.ensure_directories().unwrap();
        fs::write(layout.config_file(), "[General]\n").unwrap();
        assert!(layout.check_integrity().is_ok());
    }
}
