//! 窗宽窗位
//!
//! 将 [level - width/2, level + width/2] 范围的HU值线性映射到 0-255 灰度。

use crate::volume::{CtVolume, Mask};
use serde::{Deserialize, Serialize};
use tavr_core::{Result, TavrError};

pub const MIN_LEVEL: f64 = -1000.0;
pub const MAX_LEVEL: f64 = 1000.0;
pub const MIN_WIDTH: f64 = 1.0;
pub const MAX_WIDTH: f64 = 2000.0;

/// 分割区域叠加颜色
pub const MASK_COLOR: [u8; 3] = [255, 100, 100];

/// 窗位预设
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowPreset {
    SoftTissue, // 软组织
    Bone,       // 骨窗
    Lung,       // 肺窗
    Custom,     // 自定义
}

impl WindowPreset {
    pub fn label(&self) -> &'static str {
        match self {
            WindowPreset::SoftTissue => "软组织",
            WindowPreset::Bone => "骨窗",
            WindowPreset::Lung => "肺窗",
            WindowPreset::Custom => "自定义",
        }
    }

    /// 预设对应的窗位/窗宽，自定义返回None
    pub fn window(&self) -> Option<WindowLevel> {
        match self {
            WindowPreset::SoftTissue => Some(WindowLevel::new(40.0, 400.0)),
            WindowPreset::Bone => Some(WindowLevel::new(300.0, 1500.0)),
            WindowPreset::Lung => Some(WindowLevel::new(-600.0, 1600.0)),
            WindowPreset::Custom => None,
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "软组织" => Some(WindowPreset::SoftTissue),
            "骨窗" => Some(WindowPreset::Bone),
            "肺窗" => Some(WindowPreset::Lung),
            "自定义" => Some(WindowPreset::Custom),
            _ => None,
        }
    }
}

/// 窗位/窗宽
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowLevel {
    pub level: f64,
    pub width: f64,
}

impl Default for WindowLevel {
    fn default() -> Self {
        Self::new(40.0, 400.0)
    }
}

impl WindowLevel {
    /// 创建窗位/窗宽，数值会被限制在界面允许的范围内
    pub fn new(level: f64, width: f64) -> Self {
        Self {
            level: level.clamp(MIN_LEVEL, MAX_LEVEL),
            width: width.clamp(MIN_WIDTH, MAX_WIDTH),
        }
    }

    pub fn min(&self) -> f64 {
        self.level - self.width / 2.0
    }

    pub fn max(&self) -> f64 {
        self.level + self.width / 2.0
    }

    /// 映射单个强度值到显示灰度
    pub fn map(&self, value: f64) -> u8 {
        let (min, max) = (self.min(), self.max());
        let clipped = value.clamp(min, max);
        ((clipped - min) / (max - min) * 255.0) as u8
    }

    /// 渲染轴位切片为8位灰度图
    pub fn render_slice(&self, volume: &CtVolume, z: usize) -> Result<Vec<u8>> {
        Ok(volume
            .slice(z)?
            .iter()
            .map(|&v| self.map(f64::from(v)))
            .collect())
    }
}

/// 将分割区域以固定颜色叠加到灰度图上（编辑器显示方式）
pub fn overlay_mask(gray: &[u8], mask: &[u8]) -> Result<Vec<[u8; 3]>> {
    check_lengths(gray, mask)?;
    Ok(gray
        .iter()
        .zip(mask)
        .map(|(&g, &m)| if m > 0 { MASK_COLOR } else { [g, g, g] })
        .collect())
}

/// 按不透明度混合分割区域（查看器显示方式），opacity 取 0-100
pub fn blend_mask(gray: &[u8], mask: &[u8], opacity: u8) -> Result<Vec<[u8; 3]>> {
    check_lengths(gray, mask)?;
    let alpha = f64::from(opacity.min(100)) / 100.0;
    Ok(gray
        .iter()
        .zip(mask)
        .map(|(&g, &m)| {
            if m > 0 {
                let mix = |c: u8| (f64::from(g) * (1.0 - alpha) + f64::from(c) * alpha).round() as u8;
                [mix(255), mix(0), mix(0)]
            } else {
                [g, g, g]
            }
        })
        .collect())
}

/// 渲染带分割叠加的切片
pub fn render_overlay(
    window: &WindowLevel,
    volume: &CtVolume,
    mask: Option<&Mask>,
    z: usize,
) -> Result<Vec<[u8; 3]>> {
    let gray = window.render_slice(volume, z)?;
    match mask {
        Some(mask) => {
            if !mask.same_geometry(volume) {
                return Err(TavrError::Imaging("分割掩膜与影像几何信息不一致".to_string()));
            }
            overlay_mask(&gray, mask.slice(z)?)
        }
        None => Ok(gray.into_iter().map(|g| [g, g, g]).collect()),
    }
}

fn check_lengths(gray: &[u8], mask: &[u8]) -> Result<()> {
    if gray.len() != mask.len() {
        return Err(TavrError::Imaging(format!(
            "切片尺寸不匹配: {} vs {}",
            gray.len(),
            mask.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::Volume;

    #[test]
    fn test_window_saturates_outside_range() {
        let w = WindowLevel::new(40.0, 400.0);
        assert_eq!(w.map(-1000.0), 0);
        assert_eq!(w.map(-160.0), 0);
        assert_eq!(w.map(240.0), 255);
        assert_eq!(w.map(3000.0), 255);
        assert_eq!(w.map(40.0), 127);
    }

    #[test]
    fn test_window_is_monotonic() {
        for preset in [WindowPreset::SoftTissue, WindowPreset::Bone, WindowPreset::Lung] {
            let w = preset.window().unwrap();
            let mut previous = 0u8;
            for hu in -1500..=1500 {
                let value = w.map(f64::from(hu));
                assert!(value >= previous, "{:?} 在 {} HU 处不单调", preset, hu);
                previous = value;
            }
        }
    }

    #[test]
    fn test_window_clamps_parameters() {
        let w = WindowLevel::new(5000.0, 0.0);
        assert_eq!(w.level, MAX_LEVEL);
        assert_eq!(w.width, MIN_WIDTH);
        assert_eq!(WindowPreset::Custom.window(), None);
        assert_eq!(WindowPreset::from_label("骨窗"), Some(WindowPreset::Bone));
    }

    #[test]
    fn test_overlay() {
        let ct: CtVolume = Volume::from_vec([2, 1, 1], [1.0; 3], [0.0; 3], vec![40, 40]).unwrap();
        let mut mask = Mask::like(&ct);
        mask.set(1, 0, 0, 1);
        let rgb = render_overlay(&WindowLevel::default(), &ct, Some(&mask), 0).unwrap();
        assert_eq!(rgb[0], [127, 127, 127]);
        assert_eq!(rgb[1], MASK_COLOR);

        let blended = blend_mask(&[100, 100], &[0, 1], 50).unwrap();
        assert_eq!(blended[0], [100, 100, 100]);
        assert_eq!(blended[1], [178, 50, 50]);
        assert!(overlay_mask(&[0, 0], &[1]).is_err());
    }
}
