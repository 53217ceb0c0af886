//! 自动分割
//!
//! 阈值分割、形态学开闭运算、最大连通域提取和高斯平滑。
//! 邻域均为6连通，体数据外部视为背景。

use crate::volume::{CtVolume, Mask};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tavr_core::{Result, TavrError};
use tracing::{debug, info};

const NEIGHBORS: [(isize, isize, isize); 6] = [
    (-1, 0, 0),
    (1, 0, 0),
    (0, -1, 0),
    (0, 1, 0),
    (0, 0, -1),
    (0, 0, 1),
];

/// 分割参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationParams {
    pub lower_threshold: i16,        // HU下限
    pub upper_threshold: i16,        // HU上限
    pub morphology_iterations: usize, // 开/闭运算迭代次数
}

impl Default for SegmentationParams {
    fn default() -> Self {
        Self {
            lower_threshold: 150,
            upper_threshold: 500,
            morphology_iterations: 2,
        }
    }
}

/// 分割结果
#[derive(Debug, Clone)]
pub struct SegmentationOutcome {
    pub mask: Mask,
    pub threshold_voxels: usize, // 阈值后的体素数
    pub component_count: usize,  // 形态学处理后的连通域个数
    pub voxel_count: usize,      // 最终保留的体素数
}

impl SegmentationOutcome {
    pub fn volume_mm3(&self) -> f64 {
        self.mask.foreground_volume_mm3()
    }
}

/// 执行完整的自动分割流程
pub fn segment(volume: &CtVolume, params: &SegmentationParams) -> Result<SegmentationOutcome> {
    if params.lower_threshold > params.upper_threshold {
        return Err(TavrError::validation(format!(
            "阈值范围无效: {} > {}",
            params.lower_threshold, params.upper_threshold
        )));
    }
    if volume.is_empty() {
        return Err(TavrError::Imaging("影像为空".to_string()));
    }

    info!(
        "开始自动分割，阈值 [{}, {}] HU",
        params.lower_threshold, params.upper_threshold
    );

    let binary = threshold(volume, params.lower_threshold, params.upper_threshold);
    let threshold_voxels = binary.foreground_count();
    debug!("阈值分割体素数: {}", threshold_voxels);

    let opened = opening(&binary, params.morphology_iterations);
    let closed = closing(&opened, params.morphology_iterations);
    let (mask, component_count) = largest_connected_component(&closed);
    let voxel_count = mask.foreground_count();

    info!(
        "自动分割完成: 连通域 {} 个，保留体素 {} 个",
        component_count, voxel_count
    );

    Ok(SegmentationOutcome {
        mask,
        threshold_voxels,
        component_count,
        voxel_count,
    })
}

/// 阈值分割：`lower <= v <= upper` 为前景
pub fn threshold(volume: &CtVolume, lower: i16, upper: i16) -> Mask {
    volume.map(|v| u8::from(v >= lower && v <= upper))
}

fn neighbor(mask: &Mask, x: usize, y: usize, z: usize, d: (isize, isize, isize)) -> Option<usize> {
    let nx = x.checked_add_signed(d.0)?;
    let ny = y.checked_add_signed(d.1)?;
    let nz = z.checked_add_signed(d.2)?;
    if mask.contains(nx, ny, nz) {
        Some(mask.index(nx, ny, nz))
    } else {
        None
    }
}

fn erode_once(mask: &Mask) -> Mask {
    let [nx, ny, nz] = mask.dims();
    let src = mask.data();
    let mut out = Mask::like(mask);
    let dst = out.data_mut();
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                let idx = mask.index(x, y, z);
                if src[idx] == 0 {
                    continue;
                }
                let keep = NEIGHBORS
                    .iter()
                    .all(|&d| neighbor(mask, x, y, z, d).map_or(false, |n| src[n] != 0));
                dst[idx] = u8::from(keep);
            }
        }
    }
    out
}

fn dilate_once(mask: &Mask) -> Mask {
    let [nx, ny, nz] = mask.dims();
    let src = mask.data();
    let mut out = Mask::like(mask);
    let dst = out.data_mut();
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                let idx = mask.index(x, y, z);
                let set = src[idx] != 0
                    || NEIGHBORS
                        .iter()
                        .any(|&d| neighbor(mask, x, y, z, d).map_or(false, |n| src[n] != 0));
                dst[idx] = u8::from(set);
            }
        }
    }
    out
}

pub fn erode(mask: &Mask, iterations: usize) -> Mask {
    (0..iterations).fold(mask.clone(), |m, _| erode_once(&m))
}

pub fn dilate(mask: &Mask, iterations: usize) -> Mask {
    (0..iterations).fold(mask.clone(), |m, _| dilate_once(&m))
}

/// 开运算：先腐蚀后膨胀，去除小的噪声点
pub fn opening(mask: &Mask, iterations: usize) -> Mask {
    dilate(&erode(mask, iterations), iterations)
}

/// 闭运算：先膨胀后腐蚀，填补小孔
pub fn closing(mask: &Mask, iterations: usize) -> Mask {
    erode(&dilate(mask, iterations), iterations)
}

/// 保留最大连通域，返回 (结果掩膜, 连通域个数)
pub fn largest_connected_component(mask: &Mask) -> (Mask, usize) {
    let [nx, ny, _] = mask.dims();
    let src = mask.data();
    let mut labels = vec![0u32; src.len()];
    let mut sizes: Vec<usize> = Vec::new();
    let mut queue = VecDeque::new();

    for start in 0..src.len() {
        if src[start] == 0 || labels[start] != 0 {
            continue;
        }
        sizes.push(0);
        let label = sizes.len() as u32;
        labels[start] = label;
        queue.push_back(start);

        while let Some(idx) = queue.pop_front() {
            sizes[label as usize - 1] += 1;
            let x = idx % nx;
            let y = (idx / nx) % ny;
            let z = idx / (nx * ny);
            for &d in &NEIGHBORS {
                if let Some(n) = neighbor(mask, x, y, z, d) {
                    if src[n] != 0 && labels[n] == 0 {
                        labels[n] = label;
                        queue.push_back(n);
                    }
                }
            }
        }
    }
    let mut out = Mask::like(mask);
    let largest = sizes
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(&a.0)))
        .map(|(i, _)| i as u32 + 1);

    if let Some(keep) = largest {
        for (dst, &label) in out.data_mut().iter_mut().zip(&labels) {
            *dst = u8::from(label == keep);
        }
    }
    (out, sizes.len())
}

fn gaussian_kernel(sigma_voxels: f64) -> Vec<f64> {
    let radius = (3.0 * sigma_voxels).ceil().max(1.0) as isize;
    let mut kernel: Vec<f64> = (-radius..=radius)
        .map(|i| (-((i * i) as f64) / (2.0 * sigma_voxels * sigma_voxels)).exp())
        .collect();
    let sum: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);
    kernel
}

fn convolve_axis(data: &[f64], dims: [usize; 3], axis: usize, kernel: &[f64]) -> Vec<f64> {
    let radius = (kernel.len() / 2) as isize;
    let stride = match axis {
        0 => 1,
        1 => dims[0],
        _ => dims[0] * dims[1],
    };
    let len = dims[axis] as isize;
    let mut out = vec![0.0; data.len()];
    for (idx, value) in out.iter_mut().enumerate() {
        let coord = ((idx / stride) % dims[axis]) as isize;
        let base = idx as isize - coord * stride as isize;
        *value = kernel
            .iter()
            .enumerate()
            .map(|(k, w)| {
                // 边界处复制边缘值
                let c = (coord + k as isize - radius).clamp(0, len - 1);
                w * data[(base + c * stride as isize) as usize]
            })
            .sum();
    }
    out
}

/// 高斯平滑掩膜，sigma 为物理单位 (mm)，结果以 0.5 重新二值化
pub fn smooth_mask(mask: &Mask, sigma_mm: f64) -> Result<Mask> {
    if !sigma_mm.is_finite() || sigma_mm <= 0.0 {
        return Err(TavrError::validation(format!("无效的平滑参数: {}", sigma_mm)));
    }
    let dims = mask.dims();
    let spacing = mask.spacing();
    let mut field: Vec<f64> = mask.data().iter().map(|&v| f64::from(u8::from(v != 0))).collect();

    for axis in 0..3 {
        if dims[axis] < 2 {
            continue;
        }
        let kernel = gaussian_kernel(sigma_mm / spacing[axis]);
        field = convolve_axis(&field, dims, axis, &kernel);
    }

    let binary = field
        .into_iter()
        .map(|v| u8::from(v >= 0.5 && v <= 1.0 + 1e-9))
        .collect();
    let smoothed = mask.with_data(binary)?;
    debug!(
        "掩膜平滑完成: {} -> {} 体素",
        mask.foreground_count(),
        smoothed.foreground_count()
    );
    Ok(smoothed)
}
