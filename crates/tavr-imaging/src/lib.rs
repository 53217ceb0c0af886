//! # 影像处理模块
//!
//! 提供DICOM序列导入、窗宽窗位显示、自动分割、表面提取和网格处理功能。

pub mod mesh;
pub mod segmentation;
pub mod series;
pub mod surface;
pub mod volume;
pub mod window;

pub use mesh::{DecimateParams, DecimationResult, MeshParams, MeshQuality, PlanningMesh, QualityRating, SurfaceMesh};
pub use segmentation::{segment, smooth_mask, SegmentationOutcome, SegmentationParams};
pub use series::{DicomSeriesReader, ImportedSeries, SliceData};
pub use surface::extract_surface;
pub use volume::{CtVolume, Mask, Volume};
pub use window::{blend_mask, overlay_mask, render_overlay, WindowLevel, WindowPreset};
