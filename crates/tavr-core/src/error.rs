//! 错误定义模块

use thiserror::Error;

/// TAVR系统统一错误类型
#[derive(Error, Debug)]
pub enum TavrError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("DICOM处理错误: {0}")]
    Dicom(String),

    #[error("DICOM解析错误: {0}")]
    DicomParse(String),

    #[error("图像处理错误: {0}")]
    Imaging(String),

    #[error("网格处理错误: {0}")]
    Mesh(String),

    #[error("分割编辑错误: {0}")]
    Editor(String),

    #[error("模拟错误: {0}")]
    Simulation(String),

    #[error("操作已取消")]
    Cancelled,

    #[error("报告错误: {0}")]
    Report(String),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("功能暂不支持: {0}")]
    Unsupported(String),

    #[error("无效状态转换: 从 {from} 到 {event}")]
    InvalidStateTransition { from: String, event: String },

    #[error("系统内部错误: {0}")]
    Internal(String),
}

impl TavrError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

/// TAVR系统统一结果类型
pub type Result<T> = std::result::Result<T, TavrError>;
