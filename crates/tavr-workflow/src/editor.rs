//! 分割结果手动编辑
//!
//! 在当前轴位切片上用圆形画笔涂抹（置1）或擦除（置0）。一次笔画由按下、
//! 若干次移动和松开组成，松开时把整个掩膜作为一个快照写入历史。

use crate::history::{SnapshotHistory, DEFAULT_CAPACITY};
use tavr_core::{Result, TavrError};
use tavr_imaging::Mask;
use tracing::debug;

pub const MIN_BRUSH_RADIUS: u32 = 1;
pub const MAX_BRUSH_RADIUS: u32 = 20;
pub const DEFAULT_BRUSH_RADIUS: u32 = 5;

/// 画笔模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrushMode {
    #[default]
    Paint,
    Erase,
}

impl BrushMode {
    fn value(&self) -> u8 {
        match self {
            BrushMode::Paint => 1,
            BrushMode::Erase => 0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BrushMode::Paint => "画笔",
            BrushMode::Erase => "橡皮擦",
        }
    }
}

/// 分割编辑器
#[derive(Debug, Clone)]
pub struct SegmentationEditor {
    mask: Mask,
    history: SnapshotHistory<Vec<u8>>,
    slice: usize,
    brush_radius: u32,
    mode: BrushMode,
    stroke_active: bool,
}

impl SegmentationEditor {
    pub fn new(mask: Mask) -> Result<Self> {
        Self::with_capacity(mask, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(mask: Mask, capacity: usize) -> Result<Self> {
        if mask.is_empty() {
            return Err(TavrError::Editor("分割掩膜为空".to_string()));
        }
        let history = SnapshotHistory::new(mask.data().to_vec(), capacity)?;
        Ok(Self {
            slice: mask.depth() / 2,
            mask,
            history,
            brush_radius: DEFAULT_BRUSH_RADIUS,
            mode: BrushMode::default(),
            stroke_active: false,
        })
    }

    pub fn mask(&self) -> &Mask {
        &self.mask
    }

    /// 结束编辑，返回编辑后的掩膜
    pub fn into_mask(self) -> Mask {
        self.mask
    }

    pub fn slice(&self) -> usize {
        self.slice
    }

    pub fn set_slice(&mut self, slice: usize) -> Result<()> {
        if slice >= self.mask.depth() {
            return Err(TavrError::Editor(format!(
                "切片索引超出范围: {} (共 {} 层)",
                slice,
                self.mask.depth()
            )));
        }
        self.slice = slice;
        Ok(())
    }

    pub fn brush_radius(&self) -> u32 {
        self.brush_radius
    }

    /// 设置画笔半径，限制在 1-20 像素
    pub fn set_brush_radius(&mut self, radius: u32) {
        self.brush_radius = radius.clamp(MIN_BRUSH_RADIUS, MAX_BRUSH_RADIUS);
    }

    pub fn mode(&self) -> BrushMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: BrushMode) {
        self.mode = mode;
    }

    pub fn is_stroke_active(&self) -> bool {
        self.stroke_active
    }

    /// 开始一次笔画
    pub fn press(&mut self, x: i64, y: i64) -> usize {
        self.stroke_active = true;
        self.dab(x, y)
    }

    /// 笔画中移动，未按下时忽略
    pub fn move_to(&mut self, x: i64, y: i64) -> usize {
        if !self.stroke_active {
            return 0;
        }
        self.dab(x, y)
    }

    /// 结束笔画并记录快照，未按下时返回 false
    pub fn release(&mut self) -> bool {
        if !self.stroke_active {
            return false;
        }
        self.stroke_active = false;
        self.history.push(self.mask.data().to_vec());
        debug!("记录编辑快照，历史长度 {}", self.history.len());
        true
    }

    /// 在当前切片上盖一个圆形笔触，返回改变的像素数
    ///
    /// 圆心在切片外时不做任何修改；超出切片的部分被裁剪。
    pub fn dab(&mut self, x: i64, y: i64) -> usize {
        let width = self.mask.width() as i64;
        let height = self.mask.height() as i64;
        if x < 0 || y < 0 || x >= width || y >= height {
            return 0;
        }

        let r = i64::from(self.brush_radius);
        let value = self.mode.value();
        let z = self.slice;
        let mut changed = 0;
        for py in (y - r).max(0)..=(y + r).min(height - 1) {
            for px in (x - r).max(0)..=(x + r).min(width - 1) {
                let (dx, dy) = (px - x, py - y);
                if dx * dx + dy * dy > r * r {
                    continue;
                }
                let (ux, uy) = (px as usize, py as usize);
                if self.mask.get(ux, uy, z) != Some(value) && self.mask.set(ux, uy, z, value) {
                    changed += 1;
                }
            }
        }
        changed
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// 撤销；有进行中的笔画时只放弃该笔画，不移动历史
    pub fn undo(&mut self) -> bool {
        if self.abandon_stroke() {
            return false;
        }
        match self.history.undo() {
            Some(snapshot) => {
                self.mask.data_mut().copy_from_slice(snapshot);
                true
            }
            None => false,
        }
    }

    /// 重做；有进行中的笔画时只放弃该笔画，不移动历史
    pub fn redo(&mut self) -> bool {
        if self.abandon_stroke() {
            return false;
        }
        match self.history.redo() {
            Some(snapshot) => {
                self.mask.data_mut().copy_from_slice(snapshot);
                true
            }
            None => false,
        }
    }

    /// 放弃进行中的笔画，返回是否有笔画被放弃
    fn abandon_stroke(&mut self) -> bool {
        if !self.stroke_active {
            return false;
        }
        self.stroke_active = false;
        self.restore_current();
        true
    }

    /// 未提交的笔画回退到当前快照
    fn restore_current(&mut self) {
        if let Some(snapshot) = self.history.current() {
            self.mask.data_mut().copy_from_slice(snapshot);
        }
    }
}
