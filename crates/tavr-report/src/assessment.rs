//! 模拟结果评估
//!
//! 缺失的指标使用默认值，评估阈值与结果面板一致。

use serde::{Deserialize, Serialize};
use tavr_core::metrics;
use tavr_core::SimulationResult;

/// 峰值压差正常上限 (mmHg)
pub const PEAK_GRADIENT_LIMIT: f64 = 40.0;
/// 平均压差正常上限 (mmHg)
pub const MEAN_GRADIENT_LIMIT: f64 = 20.0;
/// 有效瓣口面积正常下限 (cm²)
pub const EOA_LIMIT: f64 = 1.5;
/// 冠脉阻塞风险阈值 (%)
pub const CORONARY_RISK_LIMIT: f64 = 10.0;

/// 报告使用的指标，缺失项取默认值
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReportMetrics {
    pub peak_gradient: f64,
    pub mean_gradient: f64,
    pub eoa: f64,
    pub leak_volume: f64,
    pub leak_fraction: f64,
    pub lca_risk: f64,
    pub rca_risk: f64,
    pub sov_height: f64,
    pub vtc_distance: f64,
}

impl Default for ReportMetrics {
    fn default() -> Self {
        Self {
            peak_gradient: 45.0,
            mean_gradient: 25.0,
            eoa: 1.8,
            leak_volume: 12.0,
            leak_fraction: 8.0,
            lca_risk: 5.0,
            rca_risk: 3.0,
            sov_height: 12.5,
            vtc_distance: 10.2,
        }
    }
}

impl ReportMetrics {
    pub fn from_result(result: &SimulationResult) -> Self {
        let d = Self::default();
        Self {
            peak_gradient: result.get_or(metrics::PEAK_GRADIENT, d.peak_gradient),
            mean_gradient: result.get_or(metrics::MEAN_GRADIENT, d.mean_gradient),
            eoa: result.get_or(metrics::EOA, d.eoa),
            leak_volume: result.get_or(metrics::LEAK_VOLUME, d.leak_volume),
            leak_fraction: result.get_or(metrics::LEAK_FRACTION, d.leak_fraction),
            lca_risk: result.get_or(metrics::LCA_RISK, d.lca_risk),
            rca_risk: result.get_or(metrics::RCA_RISK, d.rca_risk),
            sov_height: result.get_or(metrics::SOV_HEIGHT, d.sov_height),
            vtc_distance: result.get_or(metrics::VTC_DISTANCE, d.vtc_distance),
        }
    }
}

/// 单项评估
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Assessment {
    Normal,
    Elevated,
    Reduced,
    LowRisk,
    HighRisk,
}

impl Assessment {
    pub fn label(&self) -> &'static str {
        match self {
            Assessment::Normal => "正常",
            Assessment::Elevated => "偏高",
            Assessment::Reduced => "偏小",
            Assessment::LowRisk => "低",
            Assessment::HighRisk => "高",
        }
    }

    pub fn is_favorable(&self) -> bool {
        matches!(self, Assessment::Normal | Assessment::LowRisk)
    }

    /// 报告中的样式类名
    pub fn css_class(&self) -> &'static str {
        if self.is_favorable() {
            "success"
        } else {
            "warning"
        }
    }

    pub fn peak_gradient(value: f64) -> Self {
        if value < PEAK_GRADIENT_LIMIT {
            Assessment::Normal
        } else {
            Assessment::Elevated
        }
    }

    pub fn mean_gradient(value: f64) -> Self {
        if value < MEAN_GRADIENT_LIMIT {
            Assessment::Normal
        } else {
            Assessment::Elevated
        }
    }

    pub fn eoa(value: f64) -> Self {
        if value > EOA_LIMIT {
            Assessment::Normal
        } else {
            Assessment::Reduced
        }
    }

    pub fn coronary_risk(value: f64) -> Self {
        if value < CORONARY_RISK_LIMIT {
            Assessment::LowRisk
        } else {
            Assessment::HighRisk
        }
    }
}

/// 瓣周漏分级（按反流分数）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeakGrade {
    NoneOrTrace,
    Mild,
    Moderate,
    Severe,
}

impl LeakGrade {
    pub fn from_fraction(leak_fraction: f64) -> Self {
        if leak_fraction < 5.0 {
            LeakGrade::NoneOrTrace
        } else if leak_fraction < 10.0 {
            LeakGrade::Mild
        } else if leak_fraction < 20.0 {
            LeakGrade::Moderate
        } else {
            LeakGrade::Severe
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LeakGrade::NoneOrTrace => "无/微量",
            LeakGrade::Mild => "轻度",
            LeakGrade::Moderate => "中度",
            LeakGrade::Severe => "重度",
        }
    }

    pub fn suggestion(&self) -> &'static str {
        match self {
            LeakGrade::NoneOrTrace => "瓣周漏在可接受范围内，预后良好。",
            LeakGrade::Mild => "存在轻度瓣周漏，建议密切随访。",
            LeakGrade::Moderate => "中度瓣周漏，可能需要调整瓣膜位置或尺寸。",
            LeakGrade::Severe => "重度瓣周漏，建议重新评估治疗方案。",
        }
    }

    pub fn css_class(&self) -> &'static str {
        match self {
            LeakGrade::NoneOrTrace => "success",
            _ => "warning",
        }
    }
}

/// 结论与临床建议
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalSummary {
    pub conclusions: Vec<String>,
    pub recommendations: Vec<String>,
}

impl ClinicalSummary {
    pub fn from_metrics(m: &ReportMetrics) -> Self {
        let mut conclusions = Vec::new();
        let mut recommendations = Vec::new();

        if m.peak_gradient < PEAK_GRADIENT_LIMIT {
            conclusions.push("血流动力学参数良好".to_string());
        } else {
            conclusions.push("存在跨瓣压差增高".to_string());
            recommendations.push("考虑选择更大尺寸瓣膜".to_string());
        }

        if m.leak_fraction < 10.0 {
            conclusions.push("瓣周漏风险低".to_string());
        } else {
            conclusions.push("存在中度以上瓣周漏风险".to_string());
            recommendations.push("建议优化瓣膜定位或选择其他型号".to_string());
        }

        if m.lca_risk < CORONARY_RISK_LIMIT && m.rca_risk < CORONARY_RISK_LIMIT {
            conclusions.push("冠脉阻塞风险低".to_string());
        } else {
            conclusions.push("存在冠脉阻塞风险".to_string());
            recommendations.push("术中需准备冠脉保护措施".to_string());
        }

        Self {
            conclusions,
            recommendations,
        }
    }
}

/// 结果面板的文本摘要，每行一个指标
pub fn result_lines(result: &SimulationResult) -> Vec<String> {
    let m = ReportMetrics::from_result(result);
    let leak = LeakGrade::from_fraction(m.leak_fraction);
    vec![
        format!("最大流速: {:.2} m/s", result.get_or(metrics::MAX_VELOCITY, 2.5)),
        format!("平均流速: {:.2} m/s", result.get_or(metrics::MEAN_VELOCITY, 1.2)),
        format!("雷诺数: {:.0}", result.get_or(metrics::REYNOLDS, 3500.0)),
        format!(
            "峰值压差: {:.1} mmHg ({})",
            m.peak_gradient,
            Assessment::peak_gradient(m.peak_gradient).label()
        ),
        format!(
            "平均压差: {:.1} mmHg ({})",
            m.mean_gradient,
            Assessment::mean_gradient(m.mean_gradient).label()
        ),
        format!("有效瓣口面积: {:.2} cm² ({})", m.eoa, Assessment::eoa(m.eoa).label()),
        format!("反流量: {:.1} ml/beat", m.leak_volume),
        format!("反流分数: {:.1}% ({})", m.leak_fraction, leak.label()),
        format!("最大应力: {:.1} MPa", result.get_or(metrics::MAX_STRESS, 8.5)),
        format!("应力集中系数: {:.1}", result.get_or(metrics::STRESS_CONCENTRATION, 2.1)),
        format!(
            "左冠脉阻塞风险: {:.1}% - {}风险",
            m.lca_risk,
            Assessment::coronary_risk(m.lca_risk).label()
        ),
        format!(
            "右冠脉阻塞风险: {:.1}% - {}风险",
            m.rca_risk,
            Assessment::coronary_risk(m.rca_risk).label()
        ),
        format!("SOV高度: {:.1} mm", m.sov_height),
        format!("VTC距离: {:.1} mm", m.vtc_distance),
    ]
}
