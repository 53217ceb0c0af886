//! 表面网格处理
//!
//! 网格简化（顶点聚类）、Laplacian平滑和质量统计。
//! 体网格单元不会生成，`PlanningMesh::cells` 始终为 `None`。

use crate::surface::extract_surface;
use crate::volume::Mask;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io::{BufWriter, Write};
use std::path::Path;
use tavr_core::{Result, TavrError};
use tracing::{debug, info};

const DEGENERATE_AREA: f64 = 1e-12;

/// 三角形表面网格
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SurfaceMesh {
    pub vertices: Vec<[f64; 3]>,
    pub faces: Vec<[usize; 3]>,
}

fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn norm(a: [f64; 3]) -> f64 {
    dot(a, a).sqrt()
}

impl SurfaceMesh {
    pub fn new(vertices: Vec<[f64; 3]>, faces: Vec<[usize; 3]>) -> Self {
        Self { vertices, faces }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    fn corners(&self, face: &[usize; 3]) -> [[f64; 3]; 3] {
        [self.vertices[face[0]], self.vertices[face[1]], self.vertices[face[2]]]
    }

    fn face_area(&self, face: &[usize; 3]) -> f64 {
        let [a, b, c] = self.corners(face);
        0.5 * norm(cross(sub(b, a), sub(c, a)))
    }

    /// 表面积 (mm²)
    pub fn surface_area(&self) -> f64 {
        self.faces.iter().map(|f| self.face_area(f)).sum()
    }

    /// 有向体积，法向朝外的闭合网格为正值 (mm³)
    pub fn signed_volume(&self) -> f64 {
        self.faces
            .iter()
            .map(|f| {
                let [a, b, c] = self.corners(f);
                dot(a, cross(b, c)) / 6.0
            })
            .sum()
    }

    pub fn bounding_box(&self) -> Option<([f64; 3], [f64; 3])> {
        let first = *self.vertices.first()?;
        Some(self.vertices.iter().fold((first, first), |(mut min, mut max), v| {
            for axis in 0..3 {
                min[axis] = min[axis].min(v[axis]);
                max[axis] = max[axis].max(v[axis]);
            }
            (min, max)
        }))
    }

    /// 每条边恰好被两个面片共享
    pub fn is_closed(&self) -> bool {
        let mut edges: HashMap<(usize, usize), usize> = HashMap::new();
        for f in &self.faces {
            for i in 0..3 {
                let (a, b) = (f[i], f[(i + 1) % 3]);
                *edges.entry((a.min(b), a.max(b))).or_default() += 1;
            }
        }
        !edges.is_empty() && edges.values().all(|&n| n == 2)
    }

    fn vertex_neighbors(&self) -> Vec<Vec<usize>> {
        let mut neighbors: Vec<HashSet<usize>> = vec![HashSet::new(); self.vertices.len()];
        for f in &self.faces {
            for i in 0..3 {
                let (a, b) = (f[i], f[(i + 1) % 3]);
                neighbors[a].insert(b);
                neighbors[b].insert(a);
            }
        }
        neighbors
            .into_iter()
            .map(|set| {
                let mut list: Vec<usize> = set.into_iter().collect();
                list.sort_unstable();
                list
            })
            .collect()
    }

    /// Laplacian平滑：v += λ (邻点均值 - v)
    pub fn smooth_laplacian(&mut self, iterations: usize, lambda: f64) {
        let neighbors = self.vertex_neighbors();
        for _ in 0..iterations {
            let previous = self.vertices.clone();
            for (i, adjacent) in neighbors.iter().enumerate() {
                if adjacent.is_empty() {
                    continue;
                }
                let mut mean = [0.0; 3];
                for &n in adjacent {
                    for axis in 0..3 {
                        mean[axis] += previous[n][axis];
                    }
                }
                for axis in 0..3 {
                    mean[axis] /= adjacent.len() as f64;
                    self.vertices[i][axis] = previous[i][axis] + lambda * (mean[axis] - previous[i][axis]);
                }
            }
        }
        debug!("Laplacian平滑完成: {} 次迭代, λ = {}", iterations, lambda);
    }

    /// 以给定单元尺寸做顶点聚类
    fn cluster(&self, cell_size: f64, min: [f64; 3]) -> SurfaceMesh {
        let mut cell_index: HashMap<[i64; 3], usize> = HashMap::new();
        let mut sums: Vec<([f64; 3], usize)> = Vec::new();
        let mut remap = Vec::with_capacity(self.vertices.len());

        for v in &self.vertices {
            let key = [
                ((v[0] - min[0]) / cell_size).floor() as i64,
                ((v[1] - min[1]) / cell_size).floor() as i64,
                ((v[2] - min[2]) / cell_size).floor() as i64,
            ];
            let id = *cell_index.entry(key).or_insert_with(|| {
                sums.push(([0.0; 3], 0));
                sums.len() - 1
            });
            let entry = &mut sums[id];
            for axis in 0..3 {
                entry.0[axis] += v[axis];
            }
            entry.1 += 1;
            remap.push(id);
        }

        let mut seen: HashSet<[usize; 3]> = HashSet::new();
        let mut faces = Vec::new();
        for f in &self.faces {
            let g = [remap[f[0]], remap[f[1]], remap[f[2]]];
            if g[0] == g[1] || g[1] == g[2] || g[0] == g[2] {
                continue;
            }
            let mut key = g;
            key.sort_unstable();
            if seen.insert(key) {
                faces.push(g);
            }
        }

        let vertices = sums
            .into_iter()
            .map(|(s, n)| [s[0] / n as f64, s[1] / n as f64, s[2] / n as f64])
            .collect();
        SurfaceMesh::new(vertices, faces).compact()
    }

    /// 去除未被引用的顶点
    fn compact(self) -> SurfaceMesh {
        let mut remap = vec![usize::MAX; self.vertices.len()];
        let mut vertices = Vec::new();
        let mut faces = Vec::with_capacity(self.faces.len());
        for f in &self.faces {
            let mut g = [0usize; 3];
            for i in 0..3 {
                if remap[f[i]] == usize::MAX {
                    remap[f[i]] = vertices.len();
                    vertices.push(self.vertices[f[i]]);
                }
                g[i] = remap[f[i]];
            }
            faces.push(g);
        }
        SurfaceMesh::new(vertices, faces)
    }

    /// 网格简化到目标面片数（顶点聚类，二分搜索聚类尺寸）
    pub fn decimate(&self, params: &DecimateParams) -> Result<DecimationResult> {
        let original_faces = self.face_count();
        let target = params.target_faces(original_faces);

        let (min, max) = self
            .bounding_box()
            .ok_or_else(|| TavrError::Mesh("网格为空，无法简化".to_string()))?;

        if target >= original_faces {
            return Ok(DecimationResult {
                mesh: self.clone(),
                original_faces,
                final_faces: original_faces,
                cell_size: 0.0,
            });
        }

        let diagonal = norm(sub(max, min)).max(f64::EPSILON);
        let (mut lo, mut hi) = (0.0, diagonal);
        // 没有满足目标的非空结果时保留原网格
        let mut best = self.clone();
        let mut best_size = 0.0;
        for _ in 0..params.search_iterations {
            let mid = 0.5 * (lo + hi);
            let candidate = self.cluster(mid, min);
            let faces = candidate.face_count();
            if faces <= target {
                hi = mid;
                if faces > 0 {
                    best = candidate;
                    best_size = mid;
                }
            } else {
                lo = mid;
            }
        }

        info!(
            "网格简化: {} -> {} 面片 (目标 {}, 聚类尺寸 {:.3} mm)",
            original_faces,
            best.face_count(),
            target,
            best_size
        );
        Ok(DecimationResult {
            final_faces: best.face_count(),
            mesh: best,
            original_faces,
            cell_size: best_size,
        })
    }

    /// 网格质量统计
    pub fn quality(&self) -> MeshQuality {
        let mut degenerate_faces = 0;
        let mut ratios = Vec::with_capacity(self.faces.len());
        for f in &self.faces {
            let [a, b, c] = self.corners(f);
            let area = self.face_area(f);
            if area < DEGENERATE_AREA {
                degenerate_faces += 1;
                continue;
            }
            let edges = [norm(sub(b, a)), norm(sub(c, b)), norm(sub(a, c))];
            let longest = edges.iter().copied().fold(0.0, f64::max);
            let perimeter: f64 = edges.iter().sum();
            // 正三角形为 1
            ratios.push(longest * perimeter / (4.0 * 3f64.sqrt() * area));
        }

        let (min_aspect_ratio, max_aspect_ratio, mean_aspect_ratio) = if ratios.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            let min = ratios.iter().copied().fold(f64::INFINITY, f64::min);
            let max = ratios.iter().copied().fold(0.0, f64::max);
            let mean = ratios.iter().sum::<f64>() / ratios.len() as f64;
            (min, max, mean)
        };

        let rating = QualityRating::classify(self.face_count(), degenerate_faces, mean_aspect_ratio);
        MeshQuality {
            vertex_count: self.vertex_count(),
            face_count: self.face_count(),
            surface_area: self.surface_area(),
            bounding_box: self.bounding_box(),
            min_aspect_ratio,
            max_aspect_ratio,
            mean_aspect_ratio,
            degenerate_faces,
            rating,
        }
    }

    /// 导出为 Wavefront OBJ
    pub fn write_obj<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = std::fs::File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "# TAVR surface mesh")?;
        writeln!(writer, "# vertices: {} faces: {}", self.vertex_count(), self.face_count())?;
        for v in &self.vertices {
            writeln!(writer, "v {:.6} {:.6} {:.6}", v[0], v[1], v[2])?;
        }
        for f in &self.faces {
            writeln!(writer, "f {} {} {}", f[0] + 1, f[1] + 1, f[2] + 1)?;
        }
        writer.flush()?;
        info!("网格已导出: {:?}", path.as_ref());
        Ok(())
    }
}

/// 简化参数
#[derive(Debug, Clone, PartialEq)]
pub struct DecimateParams {
    /// 目标面片数，为None时使用 `target_ratio`
    pub target_faces: Option<usize>,
    /// 保留面片比例 (0.0 - 1.0)
    pub target_ratio: f64,
    pub search_iterations: usize,
}

impl Default for DecimateParams {
    fn default() -> Self {
        Self {
            target_faces: None,
            target_ratio: 0.1,
            search_iterations: 24,
        }
    }
}

impl DecimateParams {
    pub fn with_target_ratio(ratio: f64) -> Self {
        Self {
            target_ratio: ratio.clamp(0.0, 1.0),
            ..Default::default()
        }
    }

    fn target_faces(&self, original: usize) -> usize {
        self.target_faces
            .unwrap_or_else(|| (original as f64 * self.target_ratio).round() as usize)
            .max(4)
    }
}

/// 简化结果
#[derive(Debug, Clone)]
pub struct DecimationResult {
    pub mesh: SurfaceMesh,
    pub original_faces: usize,
    pub final_faces: usize,
    pub cell_size: f64, // 聚类尺寸 (mm)
}

impl DecimationResult {
    pub fn reduction_ratio(&self) -> f64 {
        if self.original_faces == 0 {
            1.0
        } else {
            self.final_faces as f64 / self.original_faces as f64
        }
    }

    /// 被移除面片的百分比
    pub fn reduction_percent(&self) -> f64 {
        (1.0 - self.reduction_ratio()) * 100.0
    }
}

impl fmt::Display for DecimationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "网格简化: {} → {} 面片 (减少 {:.1}%)",
            self.original_faces,
            self.final_faces,
            self.reduction_percent()
        )
    }
}

/// 质量等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityRating {
    Good,
    Fair,
    Poor,
}

impl QualityRating {
    fn classify(faces: usize, degenerate: usize, mean_aspect_ratio: f64) -> Self {
        if faces == 0 || degenerate * 10 > faces {
            return QualityRating::Poor;
        }
        if degenerate == 0 && mean_aspect_ratio <= 2.0 {
            QualityRating::Good
        } else if mean_aspect_ratio <= 4.0 {
            QualityRating::Fair
        } else {
            QualityRating::Poor
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            QualityRating::Good => "良好",
            QualityRating::Fair => "一般",
            QualityRating::Poor => "较差",
        }
    }
}

/// 网格质量统计
#[derive(Debug, Clone, PartialEq)]
pub struct MeshQuality {
    pub vertex_count: usize,
    pub face_count: usize,
    pub surface_area: f64,
    pub bounding_box: Option<([f64; 3], [f64; 3])>,
    pub min_aspect_ratio: f64,
    pub max_aspect_ratio: f64,
    pub mean_aspect_ratio: f64,
    pub degenerate_faces: usize,
    pub rating: QualityRating,
}

impl MeshQuality {
    /// 网格信息栏文本
    pub fn summary(&self) -> String {
        format!(
            "顶点数: {}\n面片数: {}\n网格质量: {}",
            self.vertex_count,
            self.face_count,
            self.rating.label()
        )
    }
}

/// 网格生成参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshParams {
    pub element_size: f64, // 目标单元尺寸 (mm)，0.1 - 5.0
    pub decimate_ratio: f64,
    pub smoothing_iterations: usize,
    pub smoothing_lambda: f64,
}

impl Default for MeshParams {
    fn default() -> Self {
        Self {
            element_size: 1.0,
            decimate_ratio: 0.1,
            smoothing_iterations: 10,
            smoothing_lambda: 0.5,
        }
    }
}

impl MeshParams {
    pub fn validate(&self) -> Result<()> {
        if !(0.1..=5.0).contains(&self.element_size) {
            return Err(TavrError::validation(format!(
                "单元尺寸超出范围 (0.1-5.0 mm): {}",
                self.element_size
            )));
        }
        if !(0.0..=1.0).contains(&self.decimate_ratio) || self.decimate_ratio == 0.0 {
            return Err(TavrError::validation(format!("简化比例无效: {}", self.decimate_ratio)));
        }
        if !(0.0..=1.0).contains(&self.smoothing_lambda) {
            return Err(TavrError::validation(format!("平滑系数无效: {}", self.smoothing_lambda)));
        }
        Ok(())
    }
}

/// 规划网格：表面网格加（尚未生成的）体网格单元
#[derive(Debug, Clone)]
pub struct PlanningMesh {
    pub surface: SurfaceMesh,
    pub cells: Option<Vec<[usize; 4]>>,
    pub params: MeshParams,
    pub decimation: Option<(usize, usize)>, // (原始面片数, 简化后面片数)
}

impl PlanningMesh {
    /// 由分割掩膜生成网格：提取表面、简化、平滑
    pub fn generate(mask: &Mask, params: &MeshParams) -> Result<Self> {
        params.validate()?;
        info!("开始生成网格，单元尺寸 {:.1} mm", params.element_size);

        let surface = extract_surface(mask)?;
        let decimated = surface.decimate(&DecimateParams::with_target_ratio(params.decimate_ratio))?;
        info!("{}", decimated);

        let mut mesh = decimated.mesh;
        if mesh.is_empty() {
            return Err(TavrError::Mesh("网格简化后没有剩余面片".to_string()));
        }
        mesh.smooth_laplacian(params.smoothing_iterations, params.smoothing_lambda);

        Ok(Self {
            surface: mesh,
            cells: None,
            params: params.clone(),
            decimation: Some((decimated.original_faces, decimated.final_faces)),
        })
    }

    pub fn quality(&self) -> MeshQuality {
        self.surface.quality()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::Volume;

    fn sphere_mask(n: usize, radius: f64) -> Mask {
        let mut mask: Mask = Volume::new([n, n, n], [1.0; 3], [0.0; 3]).unwrap();
        let c = (n as f64 - 1.0) / 2.0;
        for z in 0..n {
            for y in 0..n {
                for x in 0..n {
                    let d = ((x as f64 - c).powi(2) + (y as f64 - c).powi(2) + (z as f64 - c).powi(2)).sqrt();
                    if d <= radius {
                        mask.set(x, y, z, 1);
                    }
                }
            }
        }
        mask
    }

    fn tetrahedron() -> SurfaceMesh {
        SurfaceMesh::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]],
        )
    }

    #[test]
    fn test_tetrahedron_measures() {
        let mesh = tetrahedron();
        assert!(mesh.is_closed());
        assert!((mesh.signed_volume() - 1.0 / 6.0).abs() < 1e-12);
        let quality = mesh.quality();
        assert_eq!(quality.degenerate_faces, 0);
        assert_eq!(quality.face_count, 4);
        assert!(quality.min_aspect_ratio >= 1.0 - 1e-9);
    }

    #[test]
    fn test_decimate_reaches_target() {
        let surface = extract_surface(&sphere_mask(20, 8.0)).unwrap();
        let result = surface.decimate(&DecimateParams::default()).unwrap();
        let target = (surface.face_count() as f64 * 0.1).round() as usize;
        assert!(result.final_faces > 0);
        assert!(result.final_faces <= target);
        assert!(result.reduction_percent() >= 85.0);
        assert_eq!(result.final_faces, result.mesh.face_count());
        for f in &result.mesh.faces {
            assert!(f[0] != f[1] && f[1] != f[2] && f[0] != f[2]);
        }
    }

    #[test]
    fn test_decimate_single_voxel_keeps_faces() {
        let mut mask: Mask = Volume::new([3, 3, 3], [1.0; 3], [0.0; 3]).unwrap();
        mask.set(1, 1, 1, 1);
        let surface = extract_surface(&mask).unwrap();
        assert_eq!(surface.face_count(), 12);

        let result = surface.decimate(&DecimateParams::default()).unwrap();
        assert_eq!(result.final_faces, 12);
        assert_eq!(result.mesh, surface);

        let mesh = PlanningMesh::generate(&mask, &MeshParams::default()).unwrap();
        assert_eq!(mesh.surface.face_count(), 12);
        assert!(mesh.surface.is_closed());
    }

    #[test]
    fn test_decimate_never_returns_empty_mesh() {
        let surface = extract_surface(&sphere_mask(10, 3.0)).unwrap();
        for ratio in [0.01, 0.05, 0.2, 0.5] {
            let result = surface.decimate(&DecimateParams::with_target_ratio(ratio)).unwrap();
            assert!(result.final_faces > 0, "比例 {} 得到空网格", ratio);
        }
    }

    #[test]
    fn test_laplacian_smoothing_shrinks_surface() {
        let mut mesh = extract_surface(&sphere_mask(12, 4.0)).unwrap();
        let before = mesh.signed_volume();
        let counts = (mesh.vertex_count(), mesh.face_count());
        mesh.smooth_laplacian(10, 0.5);
        assert_eq!((mesh.vertex_count(), mesh.face_count()), counts);
        assert!(mesh.signed_volume() < before);
        assert!(mesh.signed_volume() > 0.0);
    }

    #[test]
    fn test_planning_mesh_generation() {
        let mesh = PlanningMesh::generate(&sphere_mask(16, 6.0), &MeshParams::default()).unwrap();
        assert!(mesh.cells.is_none());
        assert!(!mesh.surface.is_empty());
        let quality = mesh.quality();
        assert!(quality.summary().starts_with("顶点数: "));

        let bad = MeshParams {
            element_size: 6.0,
            ..Default::default()
        };
        assert!(PlanningMesh::generate(&sphere_mask(8, 2.0), &bad).is_err());
    }

    #[test]
    fn test_write_obj() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh.obj");
        tetrahedron().write_obj(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().filter(|l| l.starts_with("v ")).count(), 4);
        assert!(text.contains("f 1 3 2"));
    }

    #[test]
    fn test_quality_rating() {
        assert_eq!(QualityRating::classify(100, 0, 1.4), QualityRating::Good);
        assert_eq!(QualityRating::classify(100, 1, 1.4), QualityRating::Fair);
        assert_eq!(QualityRating::classify(100, 20, 1.4), QualityRating::Poor);
        assert_eq!(QualityRating::Fair.label(), "一般");
    }
}
