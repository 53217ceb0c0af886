//! 数据目录约定
//!
//! ```text
//! <base>/
//!   config.ini
//!   data/patients/<患者ID>/
//!   data/templates/
//!   results/  logs/  cache/  resources/
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tavr_core::utils::is_valid_patient_id;
use tavr_core::{Result, TavrError};
use tracing::{debug, info};

pub const CONFIG_FILE: &str = "config.ini";
pub const PATIENT_TEMPLATE: &str = "patient_template.json";

/// 数据目录布局
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    base: PathBuf,
}

/// 示例患者数据模板
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientTemplate {
    pub patient_id: String,
    pub patient_name: String,
    pub age: u8,
    pub sex: String,
    pub diagnosis: String,
    pub valve_parameters: ValveParameters,
}

/// 瓣膜解剖参数 (mm)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValveParameters {
    pub annulus_diameter: f64,
    pub sov_height: f64,
    pub stj_diameter: f64,
}

impl Default for PatientTemplate {
    fn default() -> Self {
        Self {
            patient_id: "SAMPLE001".to_string(),
            patient_name: "示例患者".to_string(),
            age: 75,
            sex: "男".to_string(),
            diagnosis: "重度主动脉瓣狭窄".to_string(),
            valve_parameters: ValveParameters {
                annulus_diameter: 24.5,
                sov_height: 12.0,
                stj_diameter: 28.0,
            },
        }
    }
}

impl DataLayout {
    pub fn new<P: AsRef<Path>>(base: P) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn data_dir(&self) -> PathBuf {
        self.base.join("data")
    }

    pub fn patients_dir(&self) -> PathBuf {
        self.data_dir().join("patients")
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.data_dir().join("templates")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.base.join("results")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base.join("logs")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.base.join("cache")
    }

    pub fn resources_dir(&self) -> PathBuf {
        self.base.join("resources")
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join(CONFIG_FILE)
    }

    /// 患者数据目录，患者ID必须可以安全地用作目录名
    pub fn patient_dir(&self, patient_id: &str) -> Result<PathBuf> {
        if !is_valid_patient_id(patient_id) {
            return Err(TavrError::validation(format!("无效的患者ID: {}", patient_id)));
        }
        Ok(self.patients_dir().join(patient_id))
    }

    /// 相对路径按基础目录解析
    pub fn resolve<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base.join(path)
        }
    }

    /// 系统必需的目录
    pub fn required_dirs(&self) -> Vec<PathBuf> {
        vec![
            self.data_dir(),
            self.patients_dir(),
            self.templates_dir(),
            self.results_dir(),
            self.logs_dir(),
            self.cache_dir(),
            self.resources_dir(),
        ]
    }

    /// 创建所有必需目录
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in self.required_dirs() {
            if !dir.is_dir() {
                std::fs::create_dir_all(&dir)?;
                debug!("创建目录: {:?}", dir);
            }
        }
        info!("目录结构已就绪: {:?}", self.base);
        Ok(())
    }

    /// 写入示例患者数据模板
    pub fn write_patient_template(&self) -> Result<PathBuf> {
        let dir = self.templates_dir();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(PATIENT_TEMPLATE);
        let json = serde_json::to_string_pretty(&PatientTemplate::default())?;
        std::fs::write(&path, json)?;
        info!("创建患者数据模板: {:?}", path);
        Ok(path)
    }
}
