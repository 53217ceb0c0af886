//! 病例状态机
//!
//! 管理病例从导入影像到生成报告的阶段转换。重新处理（导入、分割、编辑、
//! 平滑、生成网格）会使下游阶段失效。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tavr_core::{Result, TavrError};

/// 病例处理阶段
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CaseStage {
    Empty,
    ImageLoaded,
    Segmented,
    Meshed,
    Simulated,
    Reported,
}

impl CaseStage {
    pub const ALL: [CaseStage; 6] = [
        CaseStage::Empty,
        CaseStage::ImageLoaded,
        CaseStage::Segmented,
        CaseStage::Meshed,
        CaseStage::Simulated,
        CaseStage::Reported,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            CaseStage::Empty => "未导入数据",
            CaseStage::ImageLoaded => "影像已导入",
            CaseStage::Segmented => "分割完成",
            CaseStage::Meshed => "网格已生成",
            CaseStage::Simulated => "模拟完成",
            CaseStage::Reported => "报告已生成",
        }
    }
}

impl fmt::Display for CaseStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 状态转换事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CaseEvent {
    ImageImported,
    Segmented,
    MaskEdited,
    MaskSmoothed,
    MeshGenerated,
    SimulationCompleted,
    ReportGenerated,
    Reset,
}

/// 界面上可用的操作
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CaseAction {
    NewCase,
    OpenCase,
    SaveCase,
    ImportCt,
    Segment,
    EditSegmentation,
    SmoothSegmentation,
    GenerateMesh,
    RunSimulation,
    GenerateReport,
    ExportReport,
}

/// 病例状态机
#[derive(Debug)]
pub struct CaseStateMachine {
    transitions: HashMap<(CaseStage, CaseEvent), CaseStage>,
}

impl CaseStateMachine {
    pub fn new() -> Self {
        use CaseEvent::*;
        use CaseStage::*;

        let mut transitions = HashMap::new();
        for from in CaseStage::ALL {
            transitions.insert((from, ImageImported), ImageLoaded);
            transitions.insert((from, Reset), Empty);
            if from >= ImageLoaded {
                transitions.insert((from, CaseEvent::Segmented), CaseStage::Segmented);
            }
            if from >= CaseStage::Segmented {
                transitions.insert((from, MaskEdited), CaseStage::Segmented);
                transitions.insert((from, MaskSmoothed), CaseStage::Segmented);
                transitions.insert((from, MeshGenerated), Meshed);
            }
            if from >= Meshed {
                transitions.insert((from, SimulationCompleted), Simulated);
            }
            if from >= Simulated {
                transitions.insert((from, ReportGenerated), Reported);
            }
        }

        Self { transitions }
    }

    pub fn can_transition(&self, from: CaseStage, event: CaseEvent) -> bool {
        self.transitions.contains_key(&(from, event))
    }

    pub fn transition(&self, from: CaseStage, event: CaseEvent) -> Result<CaseStage> {
        self.transitions
            .get(&(from, event))
            .copied()
            .ok_or_else(|| TavrError::InvalidStateTransition {
                from: format!("{:?}", from),
                event: format!("{:?}", event),
            })
    }

    pub fn possible_events(&self, current: CaseStage) -> Vec<CaseEvent> {
        self.transitions
            .keys()
            .filter(|(stage, _)| *stage == current)
            .map(|(_, event)| *event)
            .collect()
    }

    /// 当前阶段可启用的操作
    pub fn enabled_actions(stage: CaseStage) -> Vec<CaseAction> {
        use CaseAction::*;

        let mut actions = vec![NewCase, OpenCase, SaveCase, ImportCt];
        if stage >= CaseStage::ImageLoaded {
            actions.push(Segment);
        }
        if stage >= CaseStage::Segmented {
            actions.extend([EditSegmentation, SmoothSegmentation, GenerateMesh]);
        }
        if stage >= CaseStage::Meshed {
            actions.push(RunSimulation);
        }
        if stage >= CaseStage::Simulated {
            actions.extend([GenerateReport, ExportReport]);
        }
        actions
    }
}

impl Default for CaseStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_pipeline() {
        let sm = CaseStateMachine::new();
        let mut stage = CaseStage::Empty;
        for event in [
            CaseEvent::ImageImported,
            CaseEvent::Segmented,
            CaseEvent::MaskEdited,
            CaseEvent::MeshGenerated,
            CaseEvent::SimulationCompleted,
            CaseEvent::ReportGenerated,
        ] {
            stage = sm.transition(stage, event).unwrap();
        }
        assert_eq!(stage, CaseStage::Reported);
    }

    #[test]
    fn test_reprocessing_resets_downstream() {
        let sm = CaseStateMachine::new();
        assert_eq!(
            sm.transition(CaseStage::Reported, CaseEvent::Segmented).unwrap(),
            CaseStage::Segmented
        );
        assert_eq!(
            sm.transition(CaseStage::Simulated, CaseEvent::ImageImported).unwrap(),
            CaseStage::ImageLoaded
        );
        assert_eq!(
            sm.transition(CaseStage::Meshed, CaseEvent::MaskSmoothed).unwrap(),
            CaseStage::Segmented
        );
        assert_eq!(
            sm.transition(CaseStage::Reported, CaseEvent::Reset).unwrap(),
            CaseStage::Empty
        );
    }

    #[test]
    fn test_invalid_transitions() {
        let sm = CaseStateMachine::new();
        assert!(!sm.can_transition(CaseStage::Empty, CaseEvent::Segmented));
        assert!(!sm.can_transition(CaseStage::ImageLoaded, CaseEvent::MeshGenerated));
        assert!(matches!(
            sm.transition(CaseStage::Segmented, CaseEvent::SimulationCompleted),
            Err(TavrError::InvalidStateTransition { .. })
        ));
        assert!(!sm.can_transition(CaseStage::Meshed, CaseEvent::ReportGenerated));
    }

    #[test]
    fn test_enabled_actions() {
        let empty = CaseStateMachine::enabled_actions(CaseStage::Empty);
        assert!(empty.contains(&CaseAction::ImportCt));
        assert!(!empty.contains(&CaseAction::Segment));

        let meshed = CaseStateMachine::enabled_actions(CaseStage::Meshed);
        assert!(meshed.contains(&CaseAction::RunSimulation));
        assert!(!meshed.contains(&CaseAction::GenerateReport));

        let reported = CaseStateMachine::enabled_actions(CaseStage::Reported);
        assert!(reported.contains(&CaseAction::ExportReport));
    }

    #[test]
    fn test_possible_events_from_empty() {
        let sm = CaseStateMachine::new();
        let mut events = sm.possible_events(CaseStage::Empty);
        events.sort_by_key(|e| format!("{:?}", e));
        assert_eq!(events, vec![CaseEvent::ImageImported, CaseEvent::Reset]);
    }
}
