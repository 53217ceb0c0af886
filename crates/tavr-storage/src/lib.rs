//! # 存储模块
//!
//! 负责病例文件、数据目录约定、日常维护以及数据导出/导入和系统备份。

pub mod archive;
pub mod case_file;
pub mod housekeeping;
pub mod layout;

pub use archive::{ArchiveSummary, BackupFileEntry, BackupInfo, BACKUP_MANIFEST};
pub use case_file::CaseFile;
pub use housekeeping::{CleanReport, IntegrityReport, PatientSummary, RecentFile, SystemStatistics};
pub use layout::DataLayout;
