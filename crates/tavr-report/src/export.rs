//! 报告导出

use crate::html::{generate_html, ReportData};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tavr_core::{Result, TavrError};
use tracing::info;

/// 导出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Html,
    Pdf,
    Docx,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Html => "html",
            ReportFormat::Pdf => "pdf",
            ReportFormat::Docx => "docx",
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl std::str::FromStr for ReportFormat {
    type Err = TavrError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "html" | "htm" => Ok(ReportFormat::Html),
            "pdf" => Ok(ReportFormat::Pdf),
            "docx" | "word" => Ok(ReportFormat::Docx),
            other => Err(TavrError::validation(format!("未知的报告格式: {}", other))),
        }
    }
}

/// 导出报告到文件
pub fn export_report<P: AsRef<Path>>(data: &ReportData, path: P, format: ReportFormat) -> Result<()> {
    let path = path.as_ref();
    match format {
        ReportFormat::Html => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, generate_html(data))?;
            info!("报告已导出: {:?}", path);
            Ok(())
        }
        ReportFormat::Pdf => Err(TavrError::Unsupported("PDF导出功能将在后续版本中实现".to_string())),
        ReportFormat::Docx => Err(TavrError::Unsupported("Word导出功能将在后续版本中实现".to_string())),
    }
}
