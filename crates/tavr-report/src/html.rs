//! HTML报告生成
//!
//! 报告内容完全由输入数据决定，相同输入得到相同输出。

use crate::assessment::{Assessment, ClinicalSummary, LeakGrade, ReportMetrics};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use tavr_core::utils::escape_html;
use tavr_core::{ImageInfo, PatientInfo, SimulationResult};

pub const SYSTEM_NAME: &str = "TAVR FSI Analysis System v1.0";

const STYLE: &str = r#"
        body { font-family: Arial, sans-serif; margin: 20px; }
        h1 { color: #2c3e50; border-bottom: 2px solid #3498db; }
        h2 { color: #34495e; margin-top: 20px; }
        table { border-collapse: collapse; width: 100%; margin: 10px 0; }
        th, td { border: 1px solid #ddd; padding: 8px; text-align: left; }
        th { background-color: #3498db; color: white; }
        .info-box { background-color: #ecf0f1; padding: 10px; margin: 10px 0; border-radius: 5px; }
        .warning { color: #e74c3c; font-weight: bold; }
        .success { color: #27ae60; font-weight: bold; }
"#;

const DISCLAIMER: &str = "本报告基于计算机模拟分析生成，仅供临床参考。最终治疗决策应结合患者具体情况、\
其他检查结果以及医生的临床经验综合判断。模拟结果可能存在一定误差，不能完全替代临床评估。";

/// 报告输入数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportData {
    pub patient: PatientInfo,
    pub image: Option<ImageInfo>,
    pub simulation: SimulationResult,
    pub timestamp: String,
}

/// 生成HTML报告
pub fn generate_html(data: &ReportData) -> String {
    let m = ReportMetrics::from_result(&data.simulation);
    let mut html = String::with_capacity(8 * 1024);

    // 写入 String 不会失败
    let _ = write_document(&mut html, data, &m);
    html
}

fn write_document(html: &mut String, data: &ReportData, m: &ReportMetrics) -> std::fmt::Result {
    writeln!(html, "<!DOCTYPE html>")?;
    writeln!(html, "<html>\n<head>\n    <meta charset=\"utf-8\">")?;
    writeln!(html, "    <title>TAVR术前流固耦合分析报告</title>")?;
    writeln!(html, "    <style>{}    </style>\n</head>\n<body>", STYLE)?;

    writeln!(html, "<h1>TAVR术前流固耦合分析报告</h1>")?;
    writeln!(html, "<div class=\"info-box\">")?;
    writeln!(html, "    <p><strong>生成时间:</strong> {}</p>", escape_html(&data.timestamp))?;
    writeln!(html, "    <p><strong>分析系统:</strong> {}</p>", SYSTEM_NAME)?;
    if let (Some(valve), Some(size)) = (data.simulation.valve_type, data.simulation.valve_size) {
        writeln!(html, "    <p><strong>模拟瓣膜:</strong> {} {}</p>", valve, size)?;
    }
    writeln!(html, "</div>")?;

    let patient = &data.patient;
    writeln!(html, "<h2>一、患者信息</h2>")?;
    writeln!(html, "<table>\n    <tr><th>项目</th><th>内容</th></tr>")?;
    writeln!(html, "    <tr><td>患者ID</td><td>{}</td></tr>", escape_html(&patient.id))?;
    writeln!(html, "    <tr><td>姓名</td><td>{}</td></tr>", escape_html(&patient.name))?;
    writeln!(html, "    <tr><td>年龄</td><td>{}岁</td></tr>", patient.age)?;
    writeln!(html, "    <tr><td>性别</td><td>{}</td></tr>", patient.sex)?;
    writeln!(html, "</table>")?;

    if let Some(image) = &data.image {
        writeln!(html, "<h2>二、影像学信息</h2>")?;
        writeln!(html, "<table>\n    <tr><th>参数</th><th>数值</th></tr>")?;
        writeln!(
            html,
            "    <tr><td>图像尺寸</td><td>{}×{}×{}</td></tr>",
            image.size[0], image.size[1], image.size[2]
        )?;
        writeln!(
            html,
            "    <tr><td>体素大小</td><td>{:.2}×{:.2}×{:.2} mm</td></tr>",
            image.spacing[0], image.spacing[1], image.spacing[2]
        )?;
        writeln!(html, "</table>")?;
    }

    writeln!(html, "<h2>三、模拟分析结果</h2>")?;
    write_hemodynamics(html, m)?;
    write_leak(html, m)?;
    write_coronary(html, m)?;
    write_conclusions(html, &ClinicalSummary::from_metrics(m))?;

    writeln!(html, "<h2>五、免责声明</h2>")?;
    writeln!(html, "<p style=\"font-size: 12px; color: #7f8c8d;\">{}</p>", DISCLAIMER)?;
    writeln!(html, "</body>\n</html>")
}

fn assessment_row(
    html: &mut String,
    name: &str,
    value: String,
    reference: &str,
    assessment: Assessment,
) -> std::fmt::Result {
    writeln!(
        html,
        "    <tr><td>{}</td><td>{}</td><td>{}</td><td class=\"{}\">{}</td></tr>",
        name,
        value,
        escape_html(reference),
        assessment.css_class(),
        assessment.label()
    )
}

fn write_hemodynamics(html: &mut String, m: &ReportMetrics) -> std::fmt::Result {
    writeln!(html, "<h3>3.1 血流动力学参数</h3>")?;
    writeln!(
        html,
        "<table>\n    <tr><th>参数</th><th>数值</th><th>参考范围</th><th>评估</th></tr>"
    )?;
    assessment_row(
        html,
        "峰值压差",
        format!("{:.1} mmHg", m.peak_gradient),
        "<40 mmHg",
        Assessment::peak_gradient(m.peak_gradient),
    )?;
    assessment_row(
        html,
        "平均压差",
        format!("{:.1} mmHg", m.mean_gradient),
        "<20 mmHg",
        Assessment::mean_gradient(m.mean_gradient),
    )?;
    assessment_row(
        html,
        "有效瓣口面积",
        format!("{:.2} cm²", m.eoa),
        ">1.5 cm²",
        Assessment::eoa(m.eoa),
    )?;
    writeln!(html, "</table>")
}

fn write_leak(html: &mut String, m: &ReportMetrics) -> std::fmt::Result {
    let grade = LeakGrade::from_fraction(m.leak_fraction);
    writeln!(html, "<h3>3.2 瓣周漏评估</h3>")?;
    writeln!(html, "<table>\n    <tr><th>参数</th><th>数值</th><th>分级</th></tr>")?;
    writeln!(
        html,
        "    <tr><td>反流量</td><td>{:.1} ml/beat</td><td rowspan=\"2\" class=\"{}\">{}</td></tr>",
        m.leak_volume,
        grade.css_class(),
        grade.label()
    )?;
    writeln!(html, "    <tr><td>反流分数</td><td>{:.1}%</td></tr>", m.leak_fraction)?;
    writeln!(html, "</table>")?;
    writeln!(html, "<p>{}</p>", grade.suggestion())
}

fn write_coronary(html: &mut String, m: &ReportMetrics) -> std::fmt::Result {
    writeln!(html, "<h3>3.3 冠脉阻塞风险评估</h3>")?;
    writeln!(html, "<table>\n    <tr><th>参数</th><th>数值</th><th>风险等级</th></tr>")?;
    for (name, risk) in [("左冠脉阻塞风险", m.lca_risk), ("右冠脉阻塞风险", m.rca_risk)] {
        let assessment = Assessment::coronary_risk(risk);
        writeln!(
            html,
            "    <tr><td>{}</td><td>{:.1}%</td><td class=\"{}\">{}</td></tr>",
            name,
            risk,
            assessment.css_class(),
            assessment.label()
        )?;
    }
    writeln!(html, "    <tr><td>SOV高度</td><td>{:.1} mm</td><td>-</td></tr>", m.sov_height)?;
    writeln!(html, "    <tr><td>VTC距离</td><td>{:.1} mm</td><td>-</td></tr>", m.vtc_distance)?;
    writeln!(html, "</table>")
}

fn write_conclusions(html: &mut String, summary: &ClinicalSummary) -> std::fmt::Result {
    writeln!(html, "<h2>四、结论与建议</h2>")?;
    writeln!(html, "<div class=\"info-box\">")?;
    writeln!(html, "<h3>主要发现:</h3>\n<ul>")?;
    for conclusion in &summary.conclusions {
        writeln!(html, "    <li>{}</li>", conclusion)?;
    }
    writeln!(html, "</ul>")?;
    if !summary.recommendations.is_empty() {
        writeln!(html, "<h3>临床建议:</h3>\n<ul>")?;
        for rec in &summary.recommendations {
            writeln!(html, "    <li>{}</li>", rec)?;
        }
        writeln!(html, "</ul>")?;
    }
    writeln!(html, "</div>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tavr_core::{metrics, Sex, ValveSize, ValveType};

    fn sample_data() -> ReportData {
        ReportData {
            patient: PatientInfo {
                id: "P001".to_string(),
                name: "<script>张三</script>".to_string(),
                age: 78,
                sex: Sex::Female,
            },
            image: Some(ImageInfo {
                size: [512, 512, 300],
                spacing: [0.5, 0.5, 0.7],
                origin: [0.0; 3],
            }),
            simulation: SimulationResult::new(ValveType::EdwardsSapien3, ValveSize::Mm26)
                .with_metric(metrics::LEAK_FRACTION, 22.0)
                .with_metric(metrics::PEAK_GRADIENT, 35.0),
            timestamp: "2024-05-01 10:00:00".to_string(),
        }
    }

    #[test]
    fn test_report_is_deterministic() {
        let data = sample_data();
        assert_eq!(generate_html(&data), generate_html(&data.clone()));
    }

    #[test]
    fn test_report_sections() {
        let html = generate_html(&sample_data());
        assert!(html.contains("一、患者信息"));
        assert!(html.contains("二、影像学信息"));
        assert!(html.contains("512×512×300"));
        assert!(html.contains("重度"));
        assert!(html.contains("血流动力学参数良好"));
        assert!(html.contains("存在中度以上瓣周漏风险"));
        assert!(html.contains("Edwards SAPIEN 3 26mm"));
        assert!(html.contains("78岁"));
        assert!(html.contains("&lt;40 mmHg"));
    }

    #[test]
    fn test_report_escapes_user_text() {
        let html = generate_html(&sample_data());
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;张三&lt;/script&gt;"));
    }

    #[test]
    fn test_report_without_image() {
        let mut data = sample_data();
        data.image = None;
        data.simulation = SimulationResult::default();
        let html = generate_html(&data);
        assert!(!html.contains("二、影像学信息"));
        assert!(html.contains("45.0 mmHg"));
        assert!(!html.contains("模拟瓣膜"));
    }
}
