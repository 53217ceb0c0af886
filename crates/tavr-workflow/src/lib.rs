//! # TAVR 工作流模块
//!
//! 病例处理流程的编排：
//! - 分割编辑：画笔/橡皮擦与有界撤销历史
//! - 模拟任务：后台运行、进度事件、协作式取消
//! - 病例状态机：各处理阶段之间的转换规则
//! - 病例会话：用户操作的统一入口，错误转换为用户提示

pub mod editor;
pub mod history;
pub mod session;
pub mod simulation;
pub mod state_machine;

pub use editor::{BrushMode, SegmentationEditor};
pub use history::SnapshotHistory;
pub use session::{ActionResult, CaseSession, NoticeLevel, UserNotice};
pub use simulation::{spawn_simulation, SimulationConfig, SimulationEvent, SimulationHandle};
pub use state_machine::{CaseAction, CaseEvent, CaseStage, CaseStateMachine};
