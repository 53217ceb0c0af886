//! 完整分析流程：导入 → 分割 → 平滑 → 网格 → 模拟 → 报告 → 病例文件

use crate::AnalyzeArgs;
use anyhow::{Context, Result};
use tavr_admin::AppSettings;
use tavr_core::utils::generate_patient_id;
use tavr_report::{result_lines, ReportFormat};
use tavr_storage::{CaseFile, DataLayout};
use tavr_workflow::{CaseSession, SimulationEvent};
use tracing::warn;

pub async fn run(layout: &DataLayout, settings: AppSettings, args: AnalyzeArgs) -> Result<()> {
    let save_intermediate = settings.advanced.save_intermediate;
    let mut session = CaseSession::new(settings);
    session.set_simulation_timing(if args.fast { 0.0 } else { 1.0 }, args.seed);

    let mut patient = session.patient().clone();
    if let Some(id) = args.patient_id {
        patient.id = id;
    }
    if let Some(name) = args.name {
        patient.name = name;
    }
    if let Some(age) = args.age {
        patient.age = age;
    }
    if let Some(sex) = args.sex {
        patient.sex = sex;
    }
    session.set_patient(patient)?;

    println!("[1/6] 导入CT数据: {}", args.dicom_dir.display());
    let info = session.import_ct(&args.dicom_dir)?;
    println!("{}", info.summary());
    if let Some(sex) = args.sex {
        // DICOM头中的性别不覆盖命令行参数
        let mut patient = session.patient().clone();
        patient.sex = sex;
        session.set_patient(patient)?;
    }

    println!("[2/6] 自动分割");
    let voxels = session.segment()?;
    println!("分割体素数: {}", voxels);

    println!("[3/6] 平滑处理");
    session.smooth()?;

    println!("[4/6] 生成网格");
    let quality = session.generate_mesh()?;
    println!("{}", quality.summary());

    println!("[5/6] 流固耦合模拟: {} {}", args.valve_type, args.valve_size);
    let mut handle = session.start_simulation(args.valve_type, args.valve_size)?;
    let token = handle.cancel_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，取消模拟");
            token.cancel();
        }
    });
    let result = handle
        .wait_with(|event| match event {
            SimulationEvent::StepChanged { name, .. } => println!("{}", name),
            SimulationEvent::Log(message) => println!("  {}", message),
            _ => {}
        })
        .await;
    interrupt.abort();
    let result = result.context("模拟未完成")?;
    session.complete_simulation(result)?;

    if let Some(simulation) = session.simulation_result() {
        for line in result_lines(simulation) {
            println!("{}", line);
        }
    }

    println!("[6/6] 保存结果");
    let output_dir = match args.output_dir {
        Some(dir) => layout.resolve(dir),
        None => layout.results_dir(),
    };
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("无法创建输出目录: {}", output_dir.display()))?;

    let id = match session.patient().id.as_str() {
        "" => generate_patient_id(),
        id => id.to_string(),
    };

    let report_path = output_dir.join(format!("{}_report.html", id));
    session.export_report(&report_path, ReportFormat::Html)?;
    println!("报告: {}", report_path.display());

    if save_intermediate {
        if let Some(mesh) = session.mesh() {
            let mesh_path = output_dir.join(format!("{}_mesh.obj", id));
            mesh.surface.write_obj(&mesh_path)?;
            println!("网格: {}", mesh_path.display());
        }
    }

    let case_path = output_dir.join(CaseFile::default_file_name(&id));
    session.save_case(Some(&case_path))?;
    println!("病例: {}", case_path.display());
    println!("分析完成！");
    Ok(())
}
