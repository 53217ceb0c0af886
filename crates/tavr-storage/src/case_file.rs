//! 病例文件 (`*.tavr`)
//!
//! JSON格式，只保存患者信息和保存时间；影像、分割和模拟数据不写入病例文件。

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tavr_core::{PatientInfo, Result, TavrError};
use tracing::info;

pub const CASE_EXTENSION: &str = "tavr";

/// 病例文件内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseFile {
    pub patient: PatientInfo,
    /// ISO-8601 保存时间
    pub timestamp: String,
}

impl CaseFile {
    /// 以当前时间创建病例
    pub fn new(patient: PatientInfo) -> Self {
        Self {
            patient,
            timestamp: Local::now().naive_local().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
        }
    }

    /// 默认文件名 `<患者ID>.tavr`
    pub fn default_file_name(patient_id: &str) -> String {
        format!("{}.{}", patient_id, CASE_EXTENSION)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!("病例已保存: {:?}", path);
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(TavrError::not_found(format!("病例文件不存在: {}", path.display())));
        }
        let text = std::fs::read_to_string(path)?;
        let case: CaseFile = serde_json::from_str(&text)?;
        if case.patient.age > tavr_core::MAX_PATIENT_AGE {
            return Err(TavrError::validation(format!("患者年龄超出范围: {}", case.patient.age)));
        }
        info!("打开病例: {:?}", path);
        Ok(case)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tavr_core::Sex;

    #[test]
    fn test_case_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CaseFile::default_file_name("P001"));
        let case = CaseFile::new(PatientInfo {
            id: "P001".to_string(),
            name: "王五".to_string(),
            age: 81,
            sex: Sex::Male,
        });
        case.save(&path).unwrap();
        let loaded = CaseFile::load(&path).unwrap();
        assert_eq!(loaded, case);

        let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["patient"]["sex"], "男");
        assert!(raw["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            CaseFile::load(dir.path().join("missing.tavr")),
            Err(TavrError::NotFound(_))
        ));

        let bad = dir.path().join("bad.tavr");
        std::fs::write(&bad, "{ not json").unwrap();
        assert!(matches!(CaseFile::load(&bad), Err(TavrError::Serialization(_))));

        let old = dir.path().join("old.tavr");
        std::fs::write(
            &old,
            r#"{"patient":{"id":"X","name":"","age":130,"sex":"女"},"timestamp":"2024-01-01T00:00:00"}"#,
        )
        .unwrap();
        assert!(matches!(CaseFile::load(&old), Err(TavrError::Validation(_))));
    }
}
