//! 三维体数据
//!
//! 体素按 z-y-x 顺序线性存储，切片 z 的数据是一段连续内存。

use tavr_core::{ImageInfo, Result, TavrError};

/// 三维体数据，带物理间距和原点
#[derive(Debug, Clone, PartialEq)]
pub struct Volume<T> {
    dims: [usize; 3],
    spacing: [f64; 3],
    origin: [f64; 3],
    data: Vec<T>,
}

/// CT影像（HU值）
pub type CtVolume = Volume<i16>;

/// 二值分割掩膜（0 或 1）
pub type Mask = Volume<u8>;

impl<T: Copy + Default> Volume<T> {
    /// 创建填充默认值的体数据
    pub fn new(dims: [usize; 3], spacing: [f64; 3], origin: [f64; 3]) -> Result<Self> {
        let len = dims.iter().product();
        Self::from_vec(dims, spacing, origin, vec![T::default(); len])
    }

    /// 从已有数据创建体数据
    pub fn from_vec(dims: [usize; 3], spacing: [f64; 3], origin: [f64; 3], data: Vec<T>) -> Result<Self> {
        let expected: usize = dims.iter().product();
        if data.len() != expected {
            return Err(TavrError::Imaging(format!(
                "体数据长度不匹配: 期望 {}，实际 {}",
                expected,
                data.len()
            )));
        }
        if spacing.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(TavrError::Imaging(format!("无效的体素间距: {:?}", spacing)));
        }
        Ok(Self {
            dims,
            spacing,
            origin,
            data,
        })
    }

    /// 创建与另一体数据几何信息相同的空体数据
    pub fn like<U>(other: &Volume<U>) -> Self {
        Self {
            dims: other.dims,
            spacing: other.spacing,
            origin: other.origin,
            data: vec![T::default(); other.data.len()],
        }
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    pub fn origin(&self) -> [f64; 3] {
        self.origin
    }

    pub fn width(&self) -> usize {
        self.dims[0]
    }

    pub fn height(&self) -> usize {
        self.dims[1]
    }

    pub fn depth(&self) -> usize {
        self.dims[2]
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        (z * self.dims[1] + y) * self.dims[0] + x
    }

    #[inline]
    pub fn contains(&self, x: usize, y: usize, z: usize) -> bool {
        x < self.dims[0] && y < self.dims[1] && z < self.dims[2]
    }

    pub fn get(&self, x: usize, y: usize, z: usize) -> Option<T> {
        if self.contains(x, y, z) {
            Some(self.data[self.index(x, y, z)])
        } else {
            None
        }
    }

    pub fn set(&mut self, x: usize, y: usize, z: usize, value: T) -> bool {
        if self.contains(x, y, z) {
            let idx = self.index(x, y, z);
            self.data[idx] = value;
            true
        } else {
            false
        }
    }

    fn slice_range(&self, z: usize) -> Result<std::ops::Range<usize>> {
        if z >= self.dims[2] {
            return Err(TavrError::Imaging(format!(
                "切片索引越界: {} (共 {} 层)",
                z, self.dims[2]
            )));
        }
        let plane = self.dims[0] * self.dims[1];
        Ok(z * plane..(z + 1) * plane)
    }

    /// 获取轴位切片
    pub fn slice(&self, z: usize) -> Result<&[T]> {
        let range = self.slice_range(z)?;
        Ok(&self.data[range])
    }

    /// 获取可变轴位切片
    pub fn slice_mut(&mut self, z: usize) -> Result<&mut [T]> {
        let range = self.slice_range(z)?;
        Ok(&mut self.data[range])
    }

    /// 逐体素转换，保留几何信息
    pub fn map<U: Copy + Default>(&self, f: impl Fn(T) -> U) -> Volume<U> {
        Volume {
            dims: self.dims,
            spacing: self.spacing,
            origin: self.origin,
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    /// 以相同几何信息替换数据
    pub fn with_data<U>(&self, data: Vec<U>) -> Result<Volume<U>> {
        if data.len() != self.data.len() {
            return Err(TavrError::Imaging("体数据长度不匹配".to_string()));
        }
        Ok(Volume {
            dims: self.dims,
            spacing: self.spacing,
            origin: self.origin,
            data,
        })
    }

    pub fn same_geometry<U>(&self, other: &Volume<U>) -> bool {
        self.dims == other.dims && self.spacing == other.spacing && self.origin == other.origin
    }

    /// 体素索引到物理坐标
    pub fn physical_point(&self, x: f64, y: f64, z: f64) -> [f64; 3] {
        [
            self.origin[0] + x * self.spacing[0],
            self.origin[1] + y * self.spacing[1],
            self.origin[2] + z * self.spacing[2],
        ]
    }

    pub fn info(&self) -> ImageInfo {
        ImageInfo {
            size: self.dims,
            spacing: self.spacing,
            origin: self.origin,
        }
    }
}

impl Mask {
    /// 前景体素数量
    pub fn foreground_count(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }

    /// 前景体积 (mm³)
    pub fn foreground_volume_mm3(&self) -> f64 {
        self.foreground_count() as f64 * self.spacing.iter().product::<f64>()
    }
}

impl CtVolume {
    /// 强度范围 (最小值, 最大值)
    pub fn intensity_range(&self) -> Option<(i16, i16)> {
        let min = self.data.iter().copied().min()?;
        let max = self.data.iter().copied().max()?;
        Some((min, max))
    }
}
