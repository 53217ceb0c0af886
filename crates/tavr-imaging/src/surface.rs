//! 等值面提取（Surface Nets）
//!
//! 掩膜四周补一层背景后在 0.5 等值面上提取闭合表面：
//! 每个跨越等值面的单元放置一个顶点（各交叉边交点的平均），
//! 每条符号变化的采样边生成一个四边形并拆分为两个三角形。

use crate::mesh::SurfaceMesh;
use crate::volume::Mask;
use std::collections::HashMap;
use tavr_core::{Result, TavrError};
use tracing::{debug, info};

const ISO_LEVEL: f64 = 0.5;

/// 单元的12条边，以角点偏移表示
const CELL_EDGES: [([usize; 3], [usize; 3]); 12] = [
    ([0, 0, 0], [1, 0, 0]),
    ([0, 1, 0], [1, 1, 0]),
    ([0, 0, 1], [1, 0, 1]),
    ([0, 1, 1], [1, 1, 1]),
    ([0, 0, 0], [0, 1, 0]),
    ([1, 0, 0], [1, 1, 0]),
    ([0, 0, 1], [0, 1, 1]),
    ([1, 0, 1], [1, 1, 1]),
    ([0, 0, 0], [0, 0, 1]),
    ([1, 0, 0], [1, 0, 1]),
    ([0, 1, 0], [0, 1, 1]),
    ([1, 1, 0], [1, 1, 1]),
];

/// 补边后的采样网格，索引 p 对应原始体素 p - 1
struct PaddedField<'a> {
    mask: &'a Mask,
    dims: [usize; 3], // 采样点个数 = 原始尺寸 + 2
}

impl<'a> PaddedField<'a> {
    fn new(mask: &'a Mask) -> Self {
        let d = mask.dims();
        Self {
            mask,
            dims: [d[0] + 2, d[1] + 2, d[2] + 2],
        }
    }

    fn value(&self, p: [usize; 3]) -> f64 {
        if p.iter().zip(&self.dims).any(|(&c, &n)| c == 0 || c >= n - 1) {
            return 0.0;
        }
        match self.mask.get(p[0] - 1, p[1] - 1, p[2] - 1) {
            Some(v) if v != 0 => 1.0,
            _ => 0.0,
        }
    }

    fn inside(&self, p: [usize; 3]) -> bool {
        self.value(p) > ISO_LEVEL
    }
}

/// 从二值掩膜提取闭合表面，顶点为物理坐标
pub fn extract_surface(mask: &Mask) -> Result<SurfaceMesh> {
    if mask.foreground_count() == 0 {
        return Err(TavrError::Mesh("分割结果为空，无法提取表面".to_string()));
    }

    let field = PaddedField::new(mask);
    let cells = [field.dims[0] - 1, field.dims[1] - 1, field.dims[2] - 1];
    let spacing = mask.spacing();
    let origin = mask.origin();

    let mut cell_vertex: HashMap<[usize; 3], usize> = HashMap::new();
    let mut vertices: Vec<[f64; 3]> = Vec::new();

    for cz in 0..cells[2] {
        for cy in 0..cells[1] {
            for cx in 0..cells[0] {
                let base = [cx, cy, cz];
                let mut sum = [0.0f64; 3];
                let mut crossings = 0usize;

                for (a, b) in CELL_EDGES.iter() {
                    let pa = [base[0] + a[0], base[1] + a[1], base[2] + a[2]];
                    let pb = [base[0] + b[0], base[1] + b[1], base[2] + b[2]];
                    let (va, vb) = (field.value(pa), field.value(pb));
                    if (va > ISO_LEVEL) == (vb > ISO_LEVEL) {
                        continue;
                    }
                    let t = (ISO_LEVEL - va) / (vb - va);
                    for axis in 0..3 {
                        sum[axis] += pa[axis] as f64 + t * (pb[axis] as f64 - pa[axis] as f64);
                    }
                    crossings += 1;
                }

                if crossings == 0 {
                    continue;
                }

                let mut point = [0.0; 3];
                for axis in 0..3 {
                    // 补边坐标减1回到原始体素坐标
                    let index = sum[axis] / crossings as f64 - 1.0;
                    point[axis] = origin[axis] + index * spacing[axis];
                }
                cell_vertex.insert(base, vertices.len());
                vertices.push(point);
            }
        }
    }

    let mut faces: Vec<[usize; 3]> = Vec::new();
    for pz in 0..field.dims[2] {
        for py in 0..field.dims[1] {
            for px in 0..field.dims[0] {
                let p = [px, py, pz];
                let inside = field.inside(p);
                for axis in 0..3 {
                    let mut q = p;
                    q[axis] += 1;
                    if q[axis] >= field.dims[axis] || inside == field.inside(q) {
                        continue;
                    }
                    let quad = edge_quad(&cell_vertex, p, axis)?;
                    // 法向指向外部（从前景指向背景）
                    let quad = if inside {
                        quad
                    } else {
                        [quad[3], quad[2], quad[1], quad[0]]
                    };
                    faces.push([quad[0], quad[1], quad[2]]);
                    faces.push([quad[0], quad[2], quad[3]]);
                }
            }
        }
    }

    debug!("Surface Nets 单元顶点数: {}", cell_vertex.len());
    info!("表面提取完成: {} 个顶点, {} 个三角面片", vertices.len(), faces.len());
    Ok(SurfaceMesh::new(vertices, faces))
}

/// 共享采样边 (p, p + e_axis) 的四个单元的顶点，按右手法则绕 +axis 排列
fn edge_quad(cell_vertex: &HashMap<[usize; 3], usize>, p: [usize; 3], axis: usize) -> Result<[usize; 4]> {
    let u = (axis + 1) % 3;
    let v = (axis + 2) % 3;
    let offsets = [(1, 1), (0, 1), (0, 0), (1, 0)];
    let mut quad = [0usize; 4];
    for (slot, (du, dv)) in quad.iter_mut().zip(offsets) {
        let mut cell = p;
        cell[u] -= du;
        cell[v] -= dv;
        *slot = *cell_vertex
            .get(&cell)
            .ok_or_else(|| TavrError::Mesh(format!("缺少单元顶点: {:?}", cell)))?;
    }
    Ok(quad)
}
