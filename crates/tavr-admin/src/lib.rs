//! # 系统管理模块
//!
//! 提供INI配置管理和日志初始化功能

pub mod logging;
pub mod settings;

pub use logging::{init_logging, LoggingOptions};
pub use settings::{
    AdvancedSettings, AppSettings, Background, Colormap, DisplaySettings, GeneralSettings, Language,
    SettingsManager, SettingsValidator, SimulationSettings, Solver,
};
