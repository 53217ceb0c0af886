//! 核心数据模型定义

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 患者年龄上限
pub const MAX_PATIENT_AGE: u8 = 120;

/// 患者基本信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientInfo {
    pub id: String,   // 患者ID
    pub name: String, // 患者姓名
    pub age: u8,      // 年龄 (0-120)
    pub sex: Sex,     // 性别
}

impl Default for PatientInfo {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            age: 0,
            sex: Sex::Male,
        }
    }
}

/// 性别枚举，序列化为界面上显示的文字
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sex {
    #[serde(rename = "男", alias = "M", alias = "Male")]
    Male,
    #[serde(rename = "女", alias = "F", alias = "Female")]
    Female,
}

impl Sex {
    pub fn label(&self) -> &'static str {
        match self {
            Sex::Male => "男",
            Sex::Female => "女",
        }
    }

    /// 从DICOM PatientSex标签值转换
    pub fn from_dicom(code: &str) -> Option<Self> {
        match code.trim() {
            "M" => Some(Sex::Male),
            "F" => Some(Sex::Female),
            _ => None,
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for Sex {
    type Err = crate::TavrError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim() {
            "男" | "M" | "m" | "male" | "Male" => Ok(Sex::Male),
            "女" | "F" | "f" | "female" | "Female" => Ok(Sex::Female),
            other => Err(crate::TavrError::validation(format!("未知性别: {}", other))),
        }
    }
}

/// 影像基本信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub size: [usize; 3],   // 体素尺寸 (x, y, z)
    pub spacing: [f64; 3],  // 体素间距 (mm)
    pub origin: [f64; 3],   // 物理原点 (mm)
}

impl ImageInfo {
    pub fn voxel_count(&self) -> usize {
        self.size.iter().product()
    }

    /// 界面信息栏使用的摘要文本
    pub fn summary(&self) -> String {
        format!(
            "尺寸: {}×{}×{}\n体素大小: {:.2}×{:.2}×{:.2} mm",
            self.size[0], self.size[1], self.size[2],
            self.spacing[0], self.spacing[1], self.spacing[2]
        )
    }
}

/// 瓣膜类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValveType {
    #[serde(rename = "Edwards SAPIEN 3")]
    EdwardsSapien3,
    #[serde(rename = "Medtronic CoreValve")]
    MedtronicCoreValve,
    #[serde(rename = "Boston Scientific ACURATE")]
    BostonScientificAcurate,
}

impl ValveType {
    pub const ALL: [ValveType; 3] = [
        ValveType::EdwardsSapien3,
        ValveType::MedtronicCoreValve,
        ValveType::BostonScientificAcurate,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            ValveType::EdwardsSapien3 => "Edwards SAPIEN 3",
            ValveType::MedtronicCoreValve => "Medtronic CoreValve",
            ValveType::BostonScientificAcurate => "Boston Scientific ACURATE",
        }
    }
}

impl fmt::Display for ValveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl std::str::FromStr for ValveType {
    type Err = crate::TavrError;

    fn from_str(s: &str) -> crate::Result<Self> {
        let key = s.trim().to_ascii_lowercase();
        match key.as_str() {
            "edwards sapien 3" | "sapien3" | "sapien-3" | "edwards" => Ok(ValveType::EdwardsSapien3),
            "medtronic corevalve" | "corevalve" | "medtronic" => Ok(ValveType::MedtronicCoreValve),
            "boston scientific acurate" | "acurate" | "boston" => Ok(ValveType::BostonScientificAcurate),
            _ => Err(crate::TavrError::validation(format!("未知瓣膜类型: {}", s))),
        }
    }
}

/// 瓣膜尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValveSize {
    #[serde(rename = "23mm")]
    Mm23,
    #[serde(rename = "26mm")]
    Mm26,
    #[serde(rename = "29mm")]
    Mm29,
}

impl ValveSize {
    pub const ALL: [ValveSize; 3] = [ValveSize::Mm23, ValveSize::Mm26, ValveSize::Mm29];

    pub fn millimeters(&self) -> u32 {
        match self {
            ValveSize::Mm23 => 23,
            ValveSize::Mm26 => 26,
            ValveSize::Mm29 => 29,
        }
    }
}

impl fmt::Display for ValveSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}mm", self.millimeters())
    }
}

impl std::str::FromStr for ValveSize {
    type Err = crate::TavrError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().trim_end_matches("mm").trim() {
            "23" => Ok(ValveSize::Mm23),
            "26" => Ok(ValveSize::Mm26),
            "29" => Ok(ValveSize::Mm29),
            _ => Err(crate::TavrError::validation(format!("不支持的瓣膜尺寸: {}", s))),
        }
    }
}

/// 模拟结果指标名称
pub mod metrics {
    pub const MAX_VELOCITY: &str = "max_velocity";
    pub const MEAN_VELOCITY: &str = "mean_velocity";
    pub const REYNOLDS: &str = "reynolds";
    pub const PEAK_GRADIENT: &str = "peak_gradient";
    pub const MEAN_GRADIENT: &str = "mean_gradient";
    pub const EOA: &str = "eoa";
    pub const LEAK_VOLUME: &str = "leak_volume";
    pub const LEAK_FRACTION: &str = "leak_fraction";
    pub const MAX_STRESS: &str = "max_stress";
    pub const STRESS_CONCENTRATION: &str = "stress_concentration";
    pub const LCA_RISK: &str = "lca_risk";
    pub const RCA_RISK: &str = "rca_risk";
    pub const SOV_HEIGHT: &str = "sov_height";
    pub const VTC_DISTANCE: &str = "vtc_distance";
}

/// 模拟结果：指标名到数值的扁平映射
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub metrics: BTreeMap<String, f64>,
    pub valve_type: Option<ValveType>,
    pub valve_size: Option<ValveSize>,
}

impl SimulationResult {
    pub fn new(valve_type: ValveType, valve_size: ValveSize) -> Self {
        Self {
            metrics: BTreeMap::new(),
            valve_type: Some(valve_type),
            valve_size: Some(valve_size),
        }
    }

    /// 空结果表示模拟失败
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    pub fn get_or(&self, name: &str, default: f64) -> f64 {
        self.get(name).unwrap_or(default)
    }

    pub fn insert(&mut self, name: &str, value: f64) {
        self.metrics.insert(name.to_string(), value);
    }

    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        self.insert(name, value);
        self
    }
}
