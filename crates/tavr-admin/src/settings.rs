//! 配置管理
//!
//! 系统设置保存在 `config.ini` 中，分为 General、Simulation、Display、Advanced 四节。
//! 读取时依次叠加：默认值、配置文件、`TAVR_` 前缀的环境变量
//! （例如 `TAVR_SIMULATION__THREADS=8`）。

use chrono::Local;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tavr_core::{Result, TavrError};
use tracing::{debug, error, info};

/// 配置文件头部注释
const INI_HEADER: &str = "# TAVR FSI Analysis System Configuration\n# 系统默认配置文件\n";

/// 界面语言
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "zh_CN")]
    ZhCn,
    #[serde(rename = "en_US")]
    EnUs,
}

/// 求解器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Solver {
    Internal,
    Fluent,
    OpenFoam,
}

/// 3D视图背景
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Background {
    Black,
    White,
    Gradient,
}

/// 结果显示色图
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Colormap {
    Jet,
    Rainbow,
    Coolwarm,
    Viridis,
}

macro_rules! ini_display {
    ($ty:ty { $($variant:path => $text:literal),+ $(,)? }) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(match self {
                    $($variant => $text),+
                })
            }
        }
    };
}

ini_display!(Language { Language::ZhCn => "zh_CN", Language::EnUs => "en_US" });
ini_display!(Solver { Solver::Internal => "internal", Solver::Fluent => "fluent", Solver::OpenFoam => "openfoam" });
ini_display!(Background { Background::Black => "black", Background::White => "white", Background::Gradient => "gradient" });
ini_display!(Colormap {
    Colormap::Jet => "jet",
    Colormap::Rainbow => "rainbow",
    Colormap::Coolwarm => "coolwarm",
    Colormap::Viridis => "viridis",
});

/// 系统完整设置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub general: GeneralSettings,
    pub simulation: SimulationSettings,
    pub display: DisplaySettings,
    pub advanced: AdvancedSettings,
}

/// 常规设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// 工作目录
    pub work_directory: String,
    /// 自动保存
    pub auto_save: bool,
    /// 自动保存间隔（分钟，1-60）
    pub save_interval: u32,
    pub language: Language,
}

/// 模拟设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub solver: Solver,
    /// 并行线程数（1-32）
    pub threads: u32,
    /// 收敛残差（1e-6 - 1e-3）
    pub convergence_residual: f64,
    /// 最大迭代次数（100-10000）
    pub max_iterations: u32,
    /// 时间步长（秒，1e-4 - 1e-2）
    pub time_step: f64,
    /// 心动周期数（1-10）
    pub simulation_cycles: u32,
}

/// 显示设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    pub antialiasing: bool,
    pub transparency: bool,
    pub background: Background,
    pub velocity_colormap: Colormap,
    pub pressure_colormap: Colormap,
}

/// 高级设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedSettings {
    pub debug_mode: bool,
    pub verbose_logging: bool,
    /// 保存中间结果
    pub save_intermediate: bool,
    pub gpu_acceleration: bool,
    /// 缓存大小（MB，100-10000）
    pub cache_size: u32,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            work_directory: "./data".to_string(),
            auto_save: true,
            save_interval: 10,
            language: Language::ZhCn,
        }
    }
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            solver: Solver::Internal,
            threads: 4,
            convergence_residual: 1e-4,
            max_iterations: 1000,
            time_step: 0.001,
            simulation_cycles: 3,
        }
    }
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            antialiasing: true,
            transparency: true,
            background: Background::Gradient,
            velocity_colormap: Colormap::Jet,
            pressure_colormap: Colormap::Coolwarm,
        }
    }
}

impl Default for AdvancedSettings {
    fn default() -> Self {
        Self {
            debug_mode: false,
            verbose_logging: false,
            save_intermediate: false,
            gpu_acceleration: false,
            cache_size: 1000,
        }
    }
}

impl AppSettings {
    /// 从INI文本解析设置（不含环境变量）
    pub fn from_ini_str(text: &str) -> Result<Self> {
        Self::build(Some(text), false)
    }

    fn build(ini_text: Option<&str>, with_env: bool) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(text) = ini_text {
            builder = builder.add_source(File::from_str(&normalize_ini(text), FileFormat::Ini));
        }
        if with_env {
            builder = builder.add_source(
                Environment::with_prefix("TAVR")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        }
        let settings = builder
            .build()
            .map_err(|e| TavrError::config(format!("读取配置失败: {}", e)))?;
        settings
            .try_deserialize()
            .map_err(|e| TavrError::config(format!("解析配置失败: {}", e)))
    }

    /// 渲染为 `config.ini` 文本
    pub fn to_ini_string(&self) -> String {
        let g = &self.general;
        let s = &self.simulation;
        let d = &self.display;
        let a = &self.advanced;
        format!(
            "{INI_HEADER}
[General]
work_directory = {}
auto_save = {}
save_interval = {}
language = {}

[Simulation]
solver = {}
threads = {}
convergence_residual = {:e}
max_iterations = {}
time_step = {}
simulation_cycles = {}

[Display]
antialiasing = {}
transparency = {}
background = {}
velocity_colormap = {}
pressure_colormap = {}

[Advanced]
debug_mode = {}
verbose_logging = {}
save_intermediate = {}
gpu_acceleration = {}
cache_size = {}
",
            g.work_directory,
            g.auto_save,
            g.save_interval,
            g.language,
            s.solver,
            s.threads,
            s.convergence_residual,
            s.max_iterations,
            s.time_step,
            s.simulation_cycles,
            d.antialiasing,
            d.transparency,
            d.background,
            d.velocity_colormap,
            d.pressure_colormap,
            a.debug_mode,
            a.verbose_logging,
            a.save_intermediate,
            a.gpu_acceleration,
            a.cache_size,
        )
    }
}

/// 节名和键名统一为小写，注释行原样保留
fn normalize_ini(text: &str) -> String {
    text.lines()
        .map(|line| {
            let trimmed = line.trim();
            if trimmed.starts_with('[') {
                trimmed.to_ascii_lowercase()
            } else if trimmed.starts_with('#') || trimmed.starts_with(';') {
                line.to_string()
            } else if let Some((key, value)) = line.split_once('=') {
                format!("{} = {}", key.trim().to_ascii_lowercase(), value.trim())
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// 配置验证器
#[derive(Debug)]
pub struct SettingsValidator {
    /// 验证规则
    validation_rules: Vec<ValidationRule>,
}

/// 验证规则
#[derive(Debug)]
struct ValidationRule {
    /// 字段路径
    field_path: &'static str,
    /// 验证函数
    validator: fn(&AppSettings) -> bool,
    /// 错误消息
    error_message: &'static str,
}

impl Default for SettingsValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsValidator {
    pub fn new() -> Self {
        let validation_rules = vec![
            ValidationRule {
                field_path: "General.save_interval",
                validator: |s| (1..=60).contains(&s.general.save_interval),
                error_message: "保存间隔应在 1-60 分钟之间",
            },
            ValidationRule {
                field_path: "General.work_directory",
                validator: |s| !s.general.work_directory.trim().is_empty(),
                error_message: "工作目录不能为空",
            },
            ValidationRule {
                field_path: "Simulation.threads",
                validator: |s| (1..=32).contains(&s.simulation.threads),
                error_message: "线程数应在 1-32 之间",
            },
            ValidationRule {
                field_path: "Simulation.convergence_residual",
                validator: |s| (1e-6..=1e-3).contains(&s.simulation.convergence_residual),
                error_message: "收敛残差应在 1e-6 - 1e-3 之间",
            },
            ValidationRule {
                field_path: "Simulation.max_iterations",
                validator: |s| (100..=10000).contains(&s.simulation.max_iterations),
                error_message: "最大迭代次数应在 100-10000 之间",
            },
            ValidationRule {
                field_path: "Simulation.time_step",
                validator: |s| (1e-4..=1e-2).contains(&s.simulation.time_step),
                error_message: "时间步长应在 0.0001-0.01 秒之间",
            },
            ValidationRule {
                field_path: "Simulation.simulation_cycles",
                validator: |s| (1..=10).contains(&s.simulation.simulation_cycles),
                error_message: "心动周期数应在 1-10 之间",
            },
            ValidationRule {
                field_path: "Advanced.cache_size",
                validator: |s| (100..=10000).contains(&s.advanced.cache_size),
                error_message: "缓存大小应在 100-10000 MB 之间",
            },
        ];

        Self { validation_rules }
    }

    /// 验证设置，返回第一个不满足的规则
    pub fn validate(&self, settings: &AppSettings) -> Result<()> {
        for rule in &self.validation_rules {
            if !(rule.validator)(settings) {
                error!("配置验证失败: {}", rule.field_path);
                return Err(TavrError::config(format!("{}: {}", rule.field_path, rule.error_message)));
            }
        }
        debug!("配置验证通过");
        Ok(())
    }
}

/// 配置管理器
#[derive(Debug)]
pub struct SettingsManager {
    /// 配置文件路径
    config_path: PathBuf,
    /// 当前设置
    settings: AppSettings,
    validator: SettingsValidator,
}

impl SettingsManager {
    /// 加载配置：文件不存在时使用默认值
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        Self::load_with_env(config_path, true)
    }

    /// 加载配置，可选择是否读取环境变量覆盖
    pub fn load_with_env<P: AsRef<Path>>(config_path: P, with_env: bool) -> Result<Self> {
        let config_path = config_path.as_ref().to_path_buf();
        let text = if config_path.is_file() {
            Some(std::fs::read_to_string(&config_path)?)
        } else {
            debug!("配置文件不存在，使用默认配置: {:?}", config_path);
            None
        };

        let settings = AppSettings::build(text.as_deref(), with_env)?;
        let validator = SettingsValidator::new();
        validator.validate(&settings)?;

        info!("配置加载完成: {:?}", config_path);
        Ok(Self {
            config_path,
            settings,
            validator,
        })
    }

    /// 使用默认设置，不读取文件
    pub fn with_defaults<P: AsRef<Path>>(config_path: P) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            settings: AppSettings::default(),
            validator: SettingsValidator::new(),
        }
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// 更新设置并写入文件
    pub fn update(&mut self, settings: AppSettings) -> Result<()> {
        self.validator.validate(&settings)?;
        self.settings = settings;
        self.save()
    }

    /// 保存当前设置到文件
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.config_path, self.settings.to_ini_string())?;
        info!("配置已保存: {:?}", self.config_path);
        Ok(())
    }

    /// 恢复默认设置，已有配置文件先备份，返回备份路径
    pub fn reset(&mut self) -> Result<Option<PathBuf>> {
        let backup = if self.config_path.is_file() {
            let dir = self
                .config_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default();
            let backup = dir.join(format!(
                "config_backup_{}.ini",
                Local::now().format("%Y%m%d_%H%M%S")
            ));
            std::fs::copy(&self.config_path, &backup)?;
            info!("当前设置已备份到: {:?}", backup);
            Some(backup)
        } else {
            None
        };

        self.settings = AppSettings::default();
        self.save()?;
        info!("设置已重置为默认值");
        Ok(backup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ini_round_trip() {
        let defaults = AppSettings::default();
        let text = defaults.to_ini_string();
        assert!(text.starts_with("# TAVR FSI Analysis System Configuration"));
        assert!(text.contains("[Simulation]\nsolver = internal"));
        assert!(text.contains("convergence_residual = 1e-4"));
        let parsed = AppSettings::from_ini_str(&text).unwrap();
        assert_eq!(parsed, defaults);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed = AppSettings::from_ini_str("[Simulation]\nthreads = 8\n\n[Display]\nbackground = white\n").unwrap();
        assert_eq!(parsed.simulation.threads, 8);
        assert_eq!(parsed.simulation.simulation_cycles, 3);
        assert_eq!(parsed.display.background, Background::White);
        assert_eq!(parsed.general, GeneralSettings::default());
    }

    #[test]
    fn test_validator_rejects_out_of_range() {
        let validator = SettingsValidator::new();
        assert!(validator.validate(&AppSettings::default()).is_ok());

        let mut settings = AppSettings::default();
        settings.simulation.threads = 64;
        let err = validator.validate(&settings).unwrap_err();
        assert!(err.to_string().contains("Simulation.threads"));

        let mut settings = AppSettings::default();
        settings.simulation.convergence_residual = 0.1;
        assert!(validator.validate(&settings).is_err());
    }

    #[test]
    fn test_unknown_enum_value_is_error() {
        assert!(AppSettings::from_ini_str("[Simulation]\nsolver = ansys\n").is_err());
    }

    #[test]
    fn test_manager_missing_file_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ini");

        let mut manager = SettingsManager::load_with_env(&path, false).unwrap();
        assert_eq!(manager.settings(), &AppSettings::default());
        assert_eq!(manager.reset().unwrap(), None);
        assert!(path.is_file());

        let mut custom = AppSettings::default();
        custom.simulation.simulation_cycles = 5;
        custom.general.language = Language::EnUs;
        manager.update(custom.clone()).unwrap();

        let reloaded = SettingsManager::load_with_env(&path, false).unwrap();
        assert_eq!(reloaded.settings(), &custom);

        let backup = manager.reset().unwrap().unwrap();
        assert!(backup.file_name().unwrap().to_string_lossy().starts_with("config_backup_"));
        let backed_up = std::fs::read_to_string(&backup).unwrap();
        assert!(backed_up.contains("simulation_cycles = 5"));
        assert_eq!(manager.settings(), &AppSettings::default());
    }

    #[test]
    fn test_manager_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, "[Advanced]\ncache_size = 50\n").unwrap();
        assert!(SettingsManager::load_with_env(&path, false).is_err());

        let mut manager = SettingsManager::with_defaults(&path);
        assert!(manager.reset().unwrap().is_some());
        assert!(SettingsManager::load_with_env(&path, false).is_ok());
    }
}
