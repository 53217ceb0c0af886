//! # 报告模块
//!
//! 模拟结果评估、HTML报告生成和报告导出。

pub mod assessment;
pub mod export;
pub mod html;

pub use assessment::{result_lines, Assessment, ClinicalSummary, LeakGrade, ReportMetrics};
pub use export::{export_report, ReportFormat};
pub use html::{generate_html, ReportData};
