//! 病例会话
//!
//! 界面操作的统一入口：每个操作调用影像处理、模拟和报告模块，
//! 推进病例状态机，并把错误记录日志后转换为 [`UserNotice`]。

use crate::editor::SegmentationEditor;
use crate::simulation::{spawn_simulation, SimulationConfig, SimulationHandle};
use crate::state_machine::{CaseEvent, CaseStage, CaseStateMachine};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tavr_admin::AppSettings;
use tavr_core::utils::{display_timestamp, generate_patient_id};
use tavr_core::{ImageInfo, PatientInfo, SimulationResult, TavrError, ValveSize, ValveType, MAX_PATIENT_AGE};
use tavr_imaging::{
    blend_mask, render_overlay, segment, smooth_mask, CtVolume, DicomSeriesReader, Mask, MeshParams,
    MeshQuality, PlanningMesh, SegmentationParams, WindowLevel,
};
use tavr_report::{export_report, generate_html, ReportData, ReportFormat};
use tavr_storage::CaseFile;
use thiserror::Error;
use tracing::{error, info, warn};

/// 平滑处理的高斯 sigma (mm)
pub const SMOOTHING_SIGMA_MM: f64 = 1.0;
pub const DEFAULT_OVERLAY_OPACITY: u8 = 50;

/// 提示级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// 显示给用户的提示
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{title}: {message}")]
pub struct UserNotice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
}

impl UserNotice {
    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            title: title.into(),
            message: message.into(),
        }
    }
}

/// 用户操作结果
pub type ActionResult<T> = std::result::Result<T, UserNotice>;

/// 记录错误并生成错误提示，如 `导入失败: ...`
fn failure(action: &str, err: TavrError) -> UserNotice {
    error!("{}: {}", action, err);
    UserNotice::error("错误", format!("{}: {}", action, err))
}

/// 病例会话
#[derive(Debug)]
pub struct CaseSession {
    settings: AppSettings,
    state_machine: CaseStateMachine,
    stage: CaseStage,
    patient: PatientInfo,
    volume: Option<CtVolume>,
    mask: Option<Mask>,
    mesh: Option<PlanningMesh>,
    simulation: Option<SimulationResult>,
    report: Option<(ReportData, String)>,
    segmentation_params: SegmentationParams,
    mesh_params: MeshParams,
    window: WindowLevel,
    overlay_opacity: u8,
    simulation_tick_scale: f64,
    simulation_seed: Option<u64>,
    status: String,
}

impl CaseSession {
    pub fn new(settings: AppSettings) -> Self {
        Self {
            settings,
            state_machine: CaseStateMachine::new(),
            stage: CaseStage::Empty,
            patient: PatientInfo::default(),
            volume: None,
            mask: None,
            mesh: None,
            simulation: None,
            report: None,
            segmentation_params: SegmentationParams::default(),
            mesh_params: MeshParams::default(),
            window: WindowLevel::default(),
            overlay_opacity: DEFAULT_OVERLAY_OPACITY,
            simulation_tick_scale: 1.0,
            simulation_seed: None,
            status: "就绪".to_string(),
        }
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn stage(&self) -> CaseStage {
        self.stage
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn patient(&self) -> &PatientInfo {
        &self.patient
    }

    pub fn volume(&self) -> Option<&CtVolume> {
        self.volume.as_ref()
    }

    pub fn image_info(&self) -> Option<ImageInfo> {
        self.volume.as_ref().map(|v| v.info())
    }

    pub fn mask(&self) -> Option<&Mask> {
        self.mask.as_ref()
    }

    pub fn mesh(&self) -> Option<&PlanningMesh> {
        self.mesh.as_ref()
    }

    pub fn simulation_result(&self) -> Option<&SimulationResult> {
        self.simulation.as_ref()
    }

    pub fn report_html(&self) -> Option<&str> {
        self.report.as_ref().map(|(_, html)| html.as_str())
    }

    pub fn window(&self) -> WindowLevel {
        self.window
    }

    pub fn set_window(&mut self, window: WindowLevel) {
        self.window = window;
    }

    pub fn set_overlay_opacity(&mut self, opacity: u8) {
        self.overlay_opacity = opacity.min(100);
    }

    pub fn set_segmentation_params(&mut self, params: SegmentationParams) {
        self.segmentation_params = params;
    }

    pub fn set_mesh_params(&mut self, params: MeshParams) {
        self.mesh_params = params;
    }

    /// 模拟节拍缩放和随机种子
    pub fn set_simulation_timing(&mut self, tick_scale: f64, seed: Option<u64>) {
        self.simulation_tick_scale = tick_scale;
        self.simulation_seed = seed;
    }

    fn update_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
        info!("{}", self.status);
    }

    /// 执行状态转换
    fn advance(&mut self, event: CaseEvent) {
        match self.state_machine.transition(self.stage, event) {
            Ok(next) => self.stage = next,
            Err(e) => warn!("{}", e),
        }
    }

    /// 检查当前阶段是否允许该操作
    fn require(&self, event: CaseEvent, message: &str) -> ActionResult<()> {
        if self.state_machine.can_transition(self.stage, event) {
            Ok(())
        } else {
            Err(UserNotice::warning("警告", message))
        }
    }

    /// 清除某阶段之后的数据
    fn discard_downstream(&mut self, keep: CaseStage) {
        if keep < CaseStage::ImageLoaded {
            self.volume = None;
        }
        if keep < CaseStage::Segmented {
            self.mask = None;
        }
        if keep < CaseStage::Meshed {
            self.mesh = None;
        }
        if keep < CaseStage::Simulated {
            self.simulation = None;
        }
        if keep < CaseStage::Reported {
            self.report = None;
        }
    }

    pub fn set_patient(&mut self, patient: PatientInfo) -> ActionResult<()> {
        if patient.age > MAX_PATIENT_AGE {
            return Err(UserNotice::warning(
                "警告",
                format!("患者年龄超出范围: {}", patient.age),
            ));
        }
        self.patient = patient;
        Ok(())
    }

    /// 从DICOM目录导入CT
    ///
    /// DICOM头中的患者ID、姓名和年龄只填充当前为空的字段，性别有值时直接采用。
    pub fn import_ct<P: AsRef<Path>>(&mut self, dir: P) -> ActionResult<ImageInfo> {
        self.update_status("正在导入CT数据...");
        let series = DicomSeriesReader::new()
            .read_directory(dir.as_ref())
            .map_err(|e| failure("导入失败", e))?;

        if self.patient.id.is_empty() {
            if let Some(id) = series.patient_id.clone() {
                self.patient.id = id;
            }
        }
        if self.patient.name.is_empty() {
            if let Some(name) = series.patient_name.clone() {
                self.patient.name = name;
            }
        }
        if self.patient.age == 0 {
            if let Some(age) = series.patient_age.filter(|a| *a <= MAX_PATIENT_AGE) {
                self.patient.age = age;
            }
        }
        if let Some(sex) = series.patient_sex {
            self.patient.sex = sex;
        }

        info!("序列 {}: {} 层", series.series_uid, series.slice_count);
        Ok(self.load_volume(series.volume))
    }

    /// 载入已在内存中的CT体数据
    pub fn load_volume(&mut self, volume: CtVolume) -> ImageInfo {
        let info = volume.info();
        self.discard_downstream(CaseStage::Empty);
        self.volume = Some(volume);
        self.advance(CaseEvent::ImageImported);
        self.update_status("CT数据导入成功");
        info
    }

    /// 自动分割，返回保留的体素数
    pub fn segment(&mut self) -> ActionResult<usize> {
        self.require(CaseEvent::Segmented, "请先导入CT数据")?;
        self.update_status("正在执行自动分割...");
        let Some(volume) = self.volume.as_ref() else {
            return Err(UserNotice::warning("警告", "请先导入CT数据"));
        };

        let outcome = segment(volume, &self.segmentation_params).map_err(|e| failure("分割失败", e))?;
        if outcome.voxel_count == 0 {
            warn!("阈值范围内没有找到连通区域");
        }
        let voxel_count = outcome.voxel_count;
        self.discard_downstream(CaseStage::ImageLoaded);
        self.mask = Some(outcome.mask);
        self.advance(CaseEvent::Segmented);
        self.update_status("自动分割完成");
        Ok(voxel_count)
    }

    /// 打开手动编辑器，编辑的是当前分割的副本
    pub fn open_editor(&self) -> ActionResult<SegmentationEditor> {
        self.require(CaseEvent::MaskEdited, "请先完成分割")?;
        let Some(mask) = self.mask.clone() else {
            return Err(UserNotice::warning("警告", "请先完成分割"));
        };
        SegmentationEditor::new(mask).map_err(|e| failure("打开编辑器失败", e))
    }

    /// 接受编辑结果
    pub fn apply_edit(&mut self, editor: SegmentationEditor) -> ActionResult<()> {
        self.require(CaseEvent::MaskEdited, "请先完成分割")?;
        let mask = editor.into_mask();
        if let Some(volume) = &self.volume {
            if !mask.same_geometry(volume) {
                return Err(failure(
                    "手动编辑失败",
                    TavrError::Editor("编辑结果与影像几何信息不一致".to_string()),
                ));
            }
        }
        self.discard_downstream(CaseStage::Segmented);
        self.mask = Some(mask);
        self.advance(CaseEvent::MaskEdited);
        self.update_status("手动编辑完成");
        Ok(())
    }

    pub fn smooth(&mut self) -> ActionResult<()> {
        self.require(CaseEvent::MaskSmoothed, "请先完成分割")?;
        self.update_status("正在平滑处理...");
        let Some(mask) = self.mask.as_ref() else {
            return Err(UserNotice::warning("警告", "请先完成分割"));
        };
        let smoothed = smooth_mask(mask, SMOOTHING_SIGMA_MM).map_err(|e| failure("平滑处理失败", e))?;
        self.discard_downstream(CaseStage::Segmented);
        self.mask = Some(smoothed);
        self.advance(CaseEvent::MaskSmoothed);
        self.update_status("平滑处理完成");
        Ok(())
    }

    pub fn generate_mesh(&mut self) -> ActionResult<MeshQuality> {
        self.require(CaseEvent::MeshGenerated, "请先完成分割")?;
        self.update_status("正在生成网格...");
        let Some(mask) = self.mask.as_ref() else {
            return Err(UserNotice::warning("警告", "请先完成分割"));
        };
        let mesh = PlanningMesh::generate(mask, &self.mesh_params).map_err(|e| failure("网格生成失败", e))?;
        let quality = mesh.quality();
        info!("{}", quality.summary().replace('\n', ", "));
        self.discard_downstream(CaseStage::Segmented);
        self.mesh = Some(mesh);
        self.advance(CaseEvent::MeshGenerated);
        self.update_status("网格生成完成");
        Ok(quality)
    }

    /// 启动模拟，需要在 tokio 运行时中调用
    pub fn start_simulation(&mut self, valve_type: ValveType, valve_size: ValveSize) -> ActionResult<SimulationHandle> {
        self.require(CaseEvent::SimulationCompleted, "请先生成网格")?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(failure(
                "模拟启动失败",
                TavrError::Internal("没有可用的异步运行时".to_string()),
            ));
        }
        let mut config = SimulationConfig::new(valve_type, valve_size)
            .with_cycles(self.settings.simulation.simulation_cycles)
            .with_tick_scale(self.simulation_tick_scale);
        if let Some(seed) = self.simulation_seed {
            config = config.with_seed(seed);
        }
        self.update_status(format!("开始模拟: {} {}", valve_type, valve_size));
        Ok(spawn_simulation(config))
    }

    /// 保存模拟结果并自动生成报告
    pub fn complete_simulation(&mut self, result: SimulationResult) -> ActionResult<()> {
        self.require(CaseEvent::SimulationCompleted, "请先生成网格")?;
        if result.is_empty() {
            return Err(failure(
                "模拟失败",
                TavrError::Simulation("未得到模拟结果".to_string()),
            ));
        }
        self.discard_downstream(CaseStage::Meshed);
        self.simulation = Some(result);
        self.advance(CaseEvent::SimulationCompleted);
        self.update_status("模拟完成");
        self.generate_report().map(|_| ())
    }

    pub fn generate_report(&mut self) -> ActionResult<&str> {
        let Some(simulation) = self.simulation.clone() else {
            return Err(UserNotice::warning("警告", "请先完成模拟"));
        };
        let data = ReportData {
            patient: self.patient.clone(),
            image: self.image_info(),
            simulation,
            timestamp: display_timestamp(),
        };
        let html = generate_html(&data);
        self.advance(CaseEvent::ReportGenerated);
        self.update_status("报告生成完成");
        let (_, html) = self.report.insert((data, html));
        Ok(html.as_str())
    }

    pub fn export_report<P: AsRef<Path>>(&self, path: P, format: ReportFormat) -> ActionResult<()> {
        let Some((data, _)) = &self.report else {
            return Err(UserNotice::warning("警告", "没有可导出的报告"));
        };
        match export_report(data, path.as_ref(), format) {
            Ok(()) => {
                info!("报告导出成功: {:?}", path.as_ref());
                Ok(())
            }
            Err(TavrError::Unsupported(message)) => Err(UserNotice::info("提示", message)),
            Err(e) => Err(failure("报告导出失败", e)),
        }
    }

    /// 新建病例，清空所有数据
    pub fn new_case(&mut self) {
        self.discard_downstream(CaseStage::Empty);
        self.patient = PatientInfo::default();
        self.advance(CaseEvent::Reset);
        self.update_status("新建病例");
    }

    /// 保存病例文件，未指定路径时保存到工作目录下的 `<患者ID>.tavr`
    pub fn save_case(&mut self, path: Option<&Path>) -> ActionResult<PathBuf> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let id = if self.patient.id.is_empty() {
                    generate_patient_id()
                } else {
                    self.patient.id.clone()
                };
                PathBuf::from(&self.settings.general.work_directory).join(CaseFile::default_file_name(&id))
            }
        };
        CaseFile::new(self.patient.clone())
            .save(&path)
            .map_err(|e| failure("保存病例失败", e))?;
        self.update_status(format!("病例已保存: {}", path.display()));
        Ok(path)
    }

    /// 打开病例文件，恢复患者信息
    pub fn open_case<P: AsRef<Path>>(&mut self, path: P) -> ActionResult<()> {
        let case = CaseFile::load(path.as_ref()).map_err(|e| failure("打开病例失败", e))?;
        self.new_case();
        self.patient = case.patient;
        self.update_status(format!("打开病例: {}", path.as_ref().display()));
        Ok(())
    }

    /// 查看器切片：窗宽窗位 + 按不透明度混合分割
    pub fn render_slice(&self, z: usize) -> ActionResult<Vec<[u8; 3]>> {
        let Some(volume) = &self.volume else {
            return Err(UserNotice::warning("警告", "请先导入CT数据"));
        };
        let render = || -> tavr_core::Result<Vec<[u8; 3]>> {
            let gray = self.window.render_slice(volume, z)?;
            match &self.mask {
                Some(mask) => blend_mask(&gray, mask.slice(z)?, self.overlay_opacity),
                None => Ok(gray.into_iter().map(|g| [g, g, g]).collect()),
            }
        };
        render().map_err(|e| failure("切片显示失败", e))
    }

    /// 编辑器切片：分割区域以固定颜色显示
    pub fn render_editor_slice(&self, editor: &SegmentationEditor) -> ActionResult<Vec<[u8; 3]>> {
        let Some(volume) = &self.volume else {
            return Err(UserNotice::warning("警告", "请先导入CT数据"));
        };
        render_overlay(&self.window, volume, Some(editor.mask()), editor.slice())
            .map_err(|e| failure("切片显示失败", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::CaseAction;
    use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
    use dicom::dictionary_std::tags;
    use dicom::object::{FileMetaTableBuilder, InMemDicomObject};
    use tavr_core::Sex;

    /// 写出一个 4×4 的CT切片（显式VR小端）
    fn write_dicom_slice(path: &std::path::Path, instance: i32, z: f64) {
        let sop_uid = format!("1.2.826.0.1.{}", instance);
        let mut obj = InMemDicomObject::new_empty();
        let mut put = |tag: Tag, vr: VR, value: PrimitiveValue| {
            obj.put(DataElement::new(tag, vr, value));
        };
        put(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from("1.2.840.10008.5.1.4.1.1.2"));
        put(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(sop_uid.as_str()));
        put(tags::PATIENT_NAME, VR::PN, PrimitiveValue::from("WANG^WU"));
        put(tags::PATIENT_ID, VR::LO, PrimitiveValue::from("CT0042"));
        put(tags::PATIENT_SEX, VR::CS, PrimitiveValue::from("F"));
        put(tags::PATIENT_AGE, VR::AS, PrimitiveValue::from("081Y"));
        put(tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.826.0.1"));
        put(tags::INSTANCE_NUMBER, VR::IS, PrimitiveValue::from(instance.to_string()));
        put(
            tags::IMAGE_POSITION_PATIENT,
            VR::DS,
            PrimitiveValue::from(format!("0\\0\\{}", z)),
        );
        put(tags::ROWS, VR::US, PrimitiveValue::from(4_u16));
        put(tags::COLUMNS, VR::US, PrimitiveValue::from(4_u16));
        put(tags::PIXEL_SPACING, VR::DS, PrimitiveValue::from("0.7\\0.7"));
        put(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16_u16));
        put(tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(0_u16));
        put(tags::RESCALE_INTERCEPT, VR::DS, PrimitiveValue::from("-1024"));
        put(tags::RESCALE_SLOPE, VR::DS, PrimitiveValue::from("1"));
        put(tags::PIXEL_DATA, VR::OW, PrimitiveValue::U16(vec![1324_u16; 16].into()));

        obj.with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax("1.2.840.10008.1.2.1")
                .media_storage_sop_class_uid("1.2.840.10008.5.1.4.1.1.2")
                .media_storage_sop_instance_uid(sop_uid.as_str()),
        )
        .unwrap()
        .write_to_file(path)
        .unwrap();
    }

    fn dicom_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (i, z) in [0.0, 1.25, 2.5].into_iter().enumerate() {
            write_dicom_slice(&dir.path().join(format!("IM{}", i)), i as i32 + 1, z);
        }
        dir
    }

    /// 背景 -100 HU，中心半径6体素的球体 300 HU
    fn phantom() -> CtVolume {
        let n = 24;
        let mut volume = CtVolume::new([n, n, n], [0.8, 0.8, 1.0], [0.0, 0.0, 0.0]).unwrap();
        let c = n as f64 / 2.0;
        for z in 0..n {
            for y in 0..n {
                for x in 0..n {
                    let d2 = (x as f64 - c).powi(2) + (y as f64 - c).powi(2) + (z as f64 - c).powi(2);
                    volume.set(x, y, z, if d2 <= 36.0 { 300 } else { -100 });
                }
            }
        }
        volume
    }

    fn session() -> CaseSession {
        let mut session = CaseSession::new(AppSettings::default());
        session.set_simulation_timing(0.0, Some(42));
        session
    }

    fn patient() -> PatientInfo {
        PatientInfo {
            id: "P001".to_string(),
            name: "张三".to_string(),
            age: 78,
            sex: Sex::Male,
        }
    }

    #[tokio::test]
    async fn test_full_pipeline() {
        let mut session = session();
        session.set_patient(patient()).unwrap();
        session.load_volume(phantom());
        assert_eq!(session.stage(), CaseStage::ImageLoaded);

        let voxels = session.segment().unwrap();
        assert!(voxels > 500);
        session.smooth().unwrap();
        let quality = session.generate_mesh().unwrap();
        assert!(quality.face_count > 0);
        assert_eq!(session.stage(), CaseStage::Meshed);

        let handle = session
            .start_simulation(ValveType::EdwardsSapien3, ValveSize::Mm26)
            .unwrap();
        let result = handle.wait().await.unwrap();
        session.complete_simulation(result).unwrap();

        assert_eq!(session.stage(), CaseStage::Reported);
        let html = session.report_html().unwrap();
        assert!(html.contains("张三"));
        assert!(html.contains("24×24×24"));
        assert!(CaseStateMachine::enabled_actions(session.stage()).contains(&CaseAction::ExportReport));
    }

    #[test]
    fn test_actions_before_prerequisites_warn() {
        let mut session = session();
        let notice = session.segment().unwrap_err();
        assert_eq!(notice.level, NoticeLevel::Warning);

        let notice = session.generate_report().unwrap_err();
        assert_eq!(notice.message, "请先完成模拟");

        let notice = session.export_report("r.html", ReportFormat::Html).unwrap_err();
        assert_eq!(notice.message, "没有可导出的报告");
        assert!(session.generate_mesh().is_err());
    }

    #[test]
    fn test_import_ct_fills_empty_patient_fields() {
        let dir = dicom_dir();
        let mut session = session();
        let info = session.import_ct(dir.path()).unwrap();

        assert_eq!(info.size, [4, 4, 3]);
        assert_eq!(info.spacing, [0.7, 0.7, 1.25]);
        assert_eq!(session.stage(), CaseStage::ImageLoaded);
        assert_eq!(session.volume().unwrap().get(1, 1, 1), Some(300));

        let patient = session.patient();
        assert_eq!(patient.id, "CT0042");
        assert_eq!(patient.name, "WANG WU");
        assert_eq!(patient.age, 81);
        assert_eq!(patient.sex, Sex::Female);
    }

    #[test]
    fn test_import_ct_keeps_entered_patient_fields() {
        let dir = dicom_dir();
        let mut session = session();
        session.set_patient(patient()).unwrap();
        session.import_ct(dir.path()).unwrap();

        let patient = session.patient();
        assert_eq!(patient.id, "P001");
        assert_eq!(patient.name, "张三");
        assert_eq!(patient.age, 78);
        // 性别以DICOM头为准
        assert_eq!(patient.sex, Sex::Female);
    }

    #[test]
    fn test_import_failure_becomes_error_notice() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session();
        let notice = session.import_ct(dir.path()).unwrap_err();
        assert_eq!(notice.level, NoticeLevel::Error);
        assert!(notice.message.starts_with("导入失败: "));
        assert_eq!(session.stage(), CaseStage::Empty);
    }

    #[test]
    fn test_reprocessing_discards_downstream() {
        let mut session = session();
        session.load_volume(phantom());
        session.segment().unwrap();
        session.generate_mesh().unwrap();
        assert!(session.mesh().is_some());

        session.segment().unwrap();
        assert_eq!(session.stage(), CaseStage::Segmented);
        assert!(session.mesh().is_none());

        session.load_volume(phantom());
        assert!(session.mask().is_none());
        assert_eq!(session.stage(), CaseStage::ImageLoaded);
    }

    #[test]
    fn test_editor_round_trip() {
        let mut session = session();
        session.load_volume(phantom());
        session.segment().unwrap();
        let before = session.mask().unwrap().foreground_count();

        let mut editor = session.open_editor().unwrap();
        editor.set_slice(0).unwrap();
        editor.press(2, 2);
        editor.release();
        assert_eq!(session.render_editor_slice(&editor).unwrap()[2 * 24 + 2], [255, 100, 100]);
        session.apply_edit(editor).unwrap();

        assert!(session.mask().unwrap().foreground_count() > before);
        assert_eq!(session.stage(), CaseStage::Segmented);
    }

    #[test]
    fn test_empty_simulation_result_is_failure() {
        let mut session = session();
        session.load_volume(phantom());
        session.segment().unwrap();
        session.generate_mesh().unwrap();
        let notice = session.complete_simulation(SimulationResult::default()).unwrap_err();
        assert!(notice.message.starts_with("模拟失败"));
        assert_eq!(session.stage(), CaseStage::Meshed);
    }

    #[test]
    fn test_start_simulation_without_runtime() {
        let mut session = session();
        session.load_volume(phantom());
        session.segment().unwrap();
        session.generate_mesh().unwrap();
        let notice = session
            .start_simulation(ValveType::BostonScientificAcurate, ValveSize::Mm23)
            .unwrap_err();
        assert_eq!(notice.level, NoticeLevel::Error);
    }

    #[test]
    fn test_save_and_open_case() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("P001.tavr");
        let mut session = session();
        session.set_patient(patient()).unwrap();
        session.load_volume(phantom());
        assert_eq!(session.save_case(Some(&path)).unwrap(), path);

        let mut other = CaseSession::new(AppSettings::default());
        other.open_case(&path).unwrap();
        assert_eq!(other.patient(), &patient());
        assert_eq!(other.stage(), CaseStage::Empty);

        let notice = other.open_case(dir.path().join("missing.tavr")).unwrap_err();
        assert!(notice.message.starts_with("打开病例失败"));
    }

    #[test]
    fn test_new_case_clears_everything() {
        let mut session = session();
        session.set_patient(patient()).unwrap();
        session.load_volume(phantom());
        session.segment().unwrap();
        session.new_case();
        assert_eq!(session.stage(), CaseStage::Empty);
        assert!(session.volume().is_none());
        assert!(session.mask().is_none());
        assert_eq!(session.patient(), &PatientInfo::default());
    }

    #[test]
    fn test_render_slice_blends_mask() {
        let mut session = session();
        session.load_volume(phantom());
        let plain = session.render_slice(12).unwrap();
        let center = 12 * 24 + 12;
        assert_eq!(plain[center][0], plain[center][1]);

        session.segment().unwrap();
        session.set_overlay_opacity(100);
        assert_eq!(session.render_slice(12).unwrap()[center], [255, 0, 0]);
        assert!(session.render_slice(99).is_err());
    }

    #[test]
    fn test_set_patient_rejects_age() {
        let mut session = session();
        let mut p = patient();
        p.age = 121;
        assert!(session.set_patient(p).is_err());
    }
}
