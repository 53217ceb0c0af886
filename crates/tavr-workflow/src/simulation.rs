//! 流固耦合模拟任务
//!
//! 模拟在后台 tokio 任务中运行，按固定节拍推进 5 个步骤并通过通道报告
//! 进度。结果为常量加随机扰动，不涉及数值求解。每个节拍检查取消令牌；
//! 取消后只发送 [`SimulationEvent::Cancelled`]，不产生部分结果。

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::time::Duration;
use tavr_core::{metrics, Result, SimulationResult, TavrError, ValveSize, ValveType};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const STEP_COUNT: usize = 5;
const TICKS_PER_CYCLE: u32 = 13;
const EVENT_BUFFER: usize = 64;
const MAX_CYCLES: u32 = 10;

/// 模拟进度事件
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationEvent {
    /// 进入新步骤，index 从1开始
    StepChanged { index: usize, name: String },
    /// 总体进度和当前步骤进度（百分比）
    Progress { overall: u8, detail: u8 },
    Log(String),
    /// 模拟结束；结果为空表示失败
    Finished(SimulationResult),
    Cancelled,
}

/// 模拟参数
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub valve_type: ValveType,
    pub valve_size: ValveSize,
    /// 心动周期数（1-10）
    pub cycles: u32,
    /// 节拍时长缩放，1.0 为实际时长
    pub tick_scale: f64,
    /// 随机种子，为None时使用系统熵
    pub seed: Option<u64>,
}

impl SimulationConfig {
    pub fn new(valve_type: ValveType, valve_size: ValveSize) -> Self {
        Self {
            valve_type,
            valve_size,
            cycles: 3,
            tick_scale: 1.0,
            seed: None,
        }
    }

    pub fn with_cycles(mut self, cycles: u32) -> Self {
        self.cycles = cycles;
        self
    }

    pub fn with_tick_scale(mut self, scale: f64) -> Self {
        self.tick_scale = scale;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn tick(&self, millis: u64) -> Duration {
        let scale = if self.tick_scale.is_finite() && self.tick_scale > 0.0 {
            self.tick_scale
        } else {
            0.0
        };
        Duration::from_secs_f64(millis as f64 / 1000.0 * scale)
    }
}

/// 运行中的模拟任务
#[derive(Debug)]
pub struct SimulationHandle {
    id: Uuid,
    events: mpsc::Receiver<SimulationEvent>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SimulationHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 请求取消，任务在下一个节拍停止
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// 取消令牌的副本，可在其他任务中触发取消
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// 接收下一个事件，任务结束且事件读完后返回None
    pub async fn next_event(&mut self) -> Option<SimulationEvent> {
        self.events.recv().await
    }

    /// 读取所有事件直到结束，返回模拟结果
    pub async fn wait(mut self) -> Result<SimulationResult> {
        self.wait_with(|_| {}).await
    }

    /// 同 [`wait`](Self::wait)，每个事件先交给回调
    pub async fn wait_with(&mut self, mut on_event: impl FnMut(&SimulationEvent)) -> Result<SimulationResult> {
        while let Some(event) = self.events.recv().await {
            on_event(&event);
            match event {
                SimulationEvent::Finished(result) => return Ok(result),
                SimulationEvent::Cancelled => return Err(TavrError::Cancelled),
                _ => {}
            }
        }
        Err(TavrError::Simulation("模拟任务意外终止".to_string()))
    }
}

/// 启动模拟任务
pub fn spawn_simulation(config: SimulationConfig) -> SimulationHandle {
    let id = Uuid::new_v4();
    let (tx, events) = mpsc::channel(EVENT_BUFFER);
    let cancel = CancellationToken::new();
    let worker = SimulationWorker {
        config,
        tx,
        cancel: cancel.clone(),
    };

    info!("启动模拟任务 {}", id);
    let task = tokio::spawn(async move {
        worker.run().await;
    });

    SimulationHandle {
        id,
        events,
        cancel,
        task,
    }
}

struct SimulationWorker {
    config: SimulationConfig,
    tx: mpsc::Sender<SimulationEvent>,
    cancel: CancellationToken,
}

impl SimulationWorker {
    async fn run(self) {
        match self.execute().await {
            Ok(result) => {
                info!("模拟完成: {} 项指标", result.metrics.len());
                self.emit(SimulationEvent::Finished(result)).await;
            }
            Err(TavrError::Cancelled) => {
                warn!("模拟已取消");
                self.emit(SimulationEvent::Cancelled).await;
            }
            Err(e) => {
                error!("模拟失败: {}", e);
                self.emit(SimulationEvent::Log(format!("错误: {}", e))).await;
                self.emit(SimulationEvent::Finished(SimulationResult::default())).await;
            }
        }
    }

    async fn emit(&self, event: SimulationEvent) {
        // 接收端已关闭时丢弃事件
        let _ = self.tx.send(event).await;
    }

    /// 发送事件；接收端关闭视为取消
    async fn send(&self, event: SimulationEvent) -> Result<()> {
        self.tx.send(event).await.map_err(|_| TavrError::Cancelled)
    }

    async fn step(&self, index: usize, name: &str) -> Result<()> {
        self.send(SimulationEvent::StepChanged {
            index,
            name: format!("步骤{}/{}: {}", index, STEP_COUNT, name),
        })
        .await
    }

    async fn log(&self, message: impl Into<String>) -> Result<()> {
        self.send(SimulationEvent::Log(message.into())).await
    }

    /// 等待一个节拍并报告进度
    async fn tick(&self, millis: u64, overall: u32, detail: u32) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => return Err(TavrError::Cancelled),
            _ = tokio::time::sleep(self.config.tick(millis)) => {}
        }
        self.send(SimulationEvent::Progress {
            overall: overall.min(100) as u8,
            detail: detail.min(100) as u8,
        })
        .await
    }

    async fn execute(&self) -> Result<SimulationResult> {
        let cycles = self.config.cycles;
        if cycles == 0 || cycles > MAX_CYCLES {
            return Err(TavrError::Simulation(format!("心动周期数超出范围: {}", cycles)));
        }

        self.step(1, "网格预处理").await?;
        self.log("检查网格质量...").await?;
        for i in 0..10 {
            self.tick(100, i, i * 10).await?;
        }
        self.log("网格质量良好").await?;

        self.step(2, "设置边界条件").await?;
        self.log("应用生理性边界条件...").await?;
        for i in 10..20 {
            self.tick(100, i, (i - 10) * 10).await?;
        }
        self.log("边界条件设置完成").await?;

        self.step(3, "瓣膜植入模拟").await?;
        self.log(format!(
            "植入{} {}瓣膜...",
            self.config.valve_type, self.config.valve_size
        ))
        .await?;
        for i in 20..40 {
            self.tick(150, i, (i - 20) * 5).await?;
        }
        self.log("瓣膜植入完成").await?;

        self.step(4, "流固耦合计算").await?;
        self.log("开始FSI求解...").await?;
        let total_ticks = cycles * TICKS_PER_CYCLE;
        for cycle in 0..cycles {
            self.log(format!("计算第{}/{}个心动周期...", cycle + 1, cycles)).await?;
            for t in 0..TICKS_PER_CYCLE {
                let done = cycle * TICKS_PER_CYCLE + t;
                self.tick(200, 40 + done * 40 / total_ticks, t * 100 / TICKS_PER_CYCLE)
                    .await?;
            }
        }
        self.log("FSI计算收敛").await?;

        self.step(5, "后处理分析").await?;
        self.log("提取关键指标...").await?;
        for i in 80..100 {
            self.tick(100, i, (i - 80) * 5).await?;
        }

        let result = self.fabricate_result()?;
        self.send(SimulationEvent::Progress {
            overall: 100,
            detail: 100,
        })
        .await?;
        self.log("分析完成！").await?;
        Ok(result)
    }

    fn fabricate_result(&self) -> Result<SimulationResult> {
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut result = SimulationResult::new(self.config.valve_type, self.config.valve_size);
        let normal = [
            (metrics::MAX_VELOCITY, 2.5, 0.3),
            (metrics::MEAN_VELOCITY, 1.2, 0.1),
            (metrics::PEAK_GRADIENT, 45.0, 5.0),
            (metrics::MEAN_GRADIENT, 25.0, 3.0),
            (metrics::EOA, 1.8, 0.2),
            (metrics::LEAK_VOLUME, 12.0, 2.0),
            (metrics::LEAK_FRACTION, 8.0, 1.5),
            (metrics::MAX_STRESS, 8.5, 1.0),
            (metrics::STRESS_CONCENTRATION, 2.1, 0.2),
            (metrics::SOV_HEIGHT, 12.5, 0.5),
            (metrics::VTC_DISTANCE, 10.2, 0.3),
        ];
        for (name, mean, std_dev) in normal {
            let noise = Normal::new(0.0, std_dev)
                .map_err(|e| TavrError::Simulation(format!("{}: {}", name, e)))?;
            result.insert(name, mean + noise.sample(&mut rng));
        }

        result.insert(metrics::REYNOLDS, f64::from(3500 + rng.gen_range(-500..500)));
        result.insert(metrics::LCA_RISK, f64::from(5 + rng.gen_range(-2..3)));
        result.insert(metrics::RCA_RISK, f64::from(3 + rng.gen_range(-1..2)));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> SimulationConfig {
        SimulationConfig::new(ValveType::EdwardsSapien3, ValveSize::Mm26)
            .with_tick_scale(0.0)
            .with_seed(7)
    }

    #[tokio::test]
    async fn test_simulation_completes_with_all_metrics() {
        let mut handle = spawn_simulation(fast_config());
        let mut steps = Vec::new();
        let mut last_progress = 0;
        let result = handle
            .wait_with(|event| match event {
                SimulationEvent::StepChanged { index, .. } => steps.push(*index),
                SimulationEvent::Progress { overall, .. } => {
                    assert!(*overall >= last_progress);
                    last_progress = *overall;
                }
                _ => {}
            })
            .await
            .unwrap();

        assert_eq!(steps, vec![1, 2, 3, 4, 5]);
        assert_eq!(last_progress, 100);
        assert_eq!(result.metrics.len(), 14);
        assert_eq!(result.valve_type, Some(ValveType::EdwardsSapien3));
        let lca = result.get(metrics::LCA_RISK).unwrap();
        assert!((3.0..=7.0).contains(&lca) && lca.fract() == 0.0);
        let reynolds = result.get(metrics::REYNOLDS).unwrap();
        assert!((3000.0..4000.0).contains(&reynolds));
    }

    #[tokio::test]
    async fn test_seed_makes_results_reproducible() {
        let a = spawn_simulation(fast_config()).wait().await.unwrap();
        let b = spawn_simulation(fast_config()).wait().await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_cancel_emits_cancelled_without_result() {
        let config = SimulationConfig::new(ValveType::MedtronicCoreValve, ValveSize::Mm29)
            .with_tick_scale(10.0);
        let mut handle = spawn_simulation(config);
        handle.cancel();

        let mut events = Vec::new();
        while let Some(event) = handle.next_event().await {
            events.push(event);
        }
        assert_eq!(events.last(), Some(&SimulationEvent::Cancelled));
        assert!(!events
            .iter()
            .any(|e| matches!(e, SimulationEvent::Finished(_))));
    }

    #[tokio::test]
    async fn test_invalid_cycles_yield_empty_result() {
        let result = spawn_simulation(fast_config().with_cycles(0)).wait().await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_cycle_count_drives_log_messages() {
        let mut handle = spawn_simulation(fast_config().with_cycles(2));
        let mut cycle_logs = 0;
        handle
            .wait_with(|event| {
                if let SimulationEvent::Log(message) = event {
                    if message.starts_with("计算第") {
                        cycle_logs += 1;
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(cycle_logs, 2);
    }
}
