//! DICOM序列读取
//!
//! 读取一个目录下的DICOM文件，按序列分组后组装为三维CT体数据。

use crate::volume::CtVolume;
use dicom::core::value::{PrimitiveValue, Value};
use dicom::dictionary_std::tags;
use dicom::object::{open_file, DefaultDicomObject};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tavr_core::{Result, Sex, TavrError};
use tracing::{debug, info, warn};

/// 支持解码的原生传输语法（小端，未压缩）
const NATIVE_TRANSFER_SYNTAXES: [&str; 2] = [
    "1.2.840.10008.1.2",   // Implicit VR Little Endian
    "1.2.840.10008.1.2.1", // Explicit VR Little Endian
];

/// 单个切片的数据
#[derive(Debug, Clone, PartialEq)]
pub struct SliceData {
    pub series_uid: String,
    pub instance_number: Option<i32>,
    pub position: Option<[f64; 3]>,
    pub rows: usize,
    pub columns: usize,
    pub pixel_spacing: [f64; 2], // [行间距, 列间距]
    pub slice_thickness: Option<f64>,
    pub rescale_slope: f64,
    pub rescale_intercept: f64,
    pub pixels: Vec<i32>, // 原始像素值
    pub patient_id: Option<String>,
    pub patient_name: Option<String>,
    pub patient_sex: Option<String>,
    pub patient_age: Option<String>,
}

impl SliceData {
    fn z(&self) -> Option<f64> {
        self.position.map(|p| p[2])
    }
}

/// 导入结果：CT体数据和从DICOM头读到的患者信息
#[derive(Debug, Clone)]
pub struct ImportedSeries {
    pub volume: CtVolume,
    pub series_uid: String,
    pub slice_count: usize,
    pub patient_id: Option<String>,
    pub patient_name: Option<String>,
    pub patient_sex: Option<Sex>,
    pub patient_age: Option<u8>,
}

/// DICOM序列读取器
#[derive(Debug, Default)]
pub struct DicomSeriesReader;

impl DicomSeriesReader {
    pub fn new() -> Self {
        Self
    }

    /// 读取目录中的DICOM序列（不递归子目录）
    pub fn read_directory<P: AsRef<Path>>(&self, dir: P) -> Result<ImportedSeries> {
        let dir = dir.as_ref();
        info!("开始读取DICOM目录: {:?}", dir);

        if !dir.is_dir() {
            return Err(TavrError::not_found(format!("DICOM目录不存在: {}", dir.display())));
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        files.sort();

        let mut slices = Vec::new();
        for path in &files {
            match Self::read_slice(path) {
                Ok(slice) => slices.push(slice),
                Err(e) => debug!("跳过文件 {:?}: {}", path, e),
            }
        }

        info!("目录中共 {} 个文件，可读取切片 {} 个", files.len(), slices.len());
        assemble_volume(slices)
    }

    /// 读取单个DICOM切片
    pub fn read_slice(path: &Path) -> Result<SliceData> {
        let obj = open_file(path)
            .map_err(|e| TavrError::DicomParse(format!("无法解析DICOM文件 {}: {}", path.display(), e)))?;

        check_transfer_syntax(obj.meta().transfer_syntax())?;

        let rows = Self::get_integer_element(&obj, tags::ROWS)
            .ok_or_else(|| TavrError::Dicom("缺少Rows标签".to_string()))? as usize;
        let columns = Self::get_integer_element(&obj, tags::COLUMNS)
            .ok_or_else(|| TavrError::Dicom("缺少Columns标签".to_string()))? as usize;
        let bits_allocated = Self::get_integer_element(&obj, tags::BITS_ALLOCATED).unwrap_or(16);
        let signed = Self::get_integer_element(&obj, tags::PIXEL_REPRESENTATION).unwrap_or(0) == 1;

        let pixel_spacing = match Self::get_floats_element(&obj, tags::PIXEL_SPACING) {
            Some(v) if v.len() >= 2 => [v[0], v[1]],
            _ => [1.0, 1.0],
        };
        let position = match Self::get_floats_element(&obj, tags::IMAGE_POSITION_PATIENT) {
            Some(v) if v.len() >= 3 => Some([v[0], v[1], v[2]]),
            _ => None,
        };

        let pixels = Self::decode_pixels(&obj, bits_allocated, signed)?;
        if pixels.len() < rows * columns {
            return Err(TavrError::Dicom(format!(
                "像素数据长度不足: 期望 {}，实际 {}",
                rows * columns,
                pixels.len()
            )));
        }

        Ok(SliceData {
            series_uid: Self::get_string_element(&obj, tags::SERIES_INSTANCE_UID).unwrap_or_default(),
            instance_number: Self::get_integer_element(&obj, tags::INSTANCE_NUMBER),
            position,
            rows,
            columns,
            pixel_spacing,
            slice_thickness: Self::get_floats_element(&obj, tags::SLICE_THICKNESS)
                .and_then(|v| v.first().copied()),
            rescale_slope: Self::get_floats_element(&obj, tags::RESCALE_SLOPE)
                .and_then(|v| v.first().copied())
                .unwrap_or(1.0),
            rescale_intercept: Self::get_floats_element(&obj, tags::RESCALE_INTERCEPT)
                .and_then(|v| v.first().copied())
                .unwrap_or(0.0),
            pixels: pixels.into_iter().take(rows * columns).collect(),
            patient_id: Self::get_string_element(&obj, tags::PATIENT_ID),
            patient_name: Self::get_string_element(&obj, tags::PATIENT_NAME),
            patient_sex: Self::get_string_element(&obj, tags::PATIENT_SEX),
            patient_age: Self::get_string_element(&obj, tags::PATIENT_AGE),
        })
    }

    /// 解码原生像素数据
    fn decode_pixels(obj: &DefaultDicomObject, bits_allocated: i32, signed: bool) -> Result<Vec<i32>> {
        let element = obj
            .element(tags::PIXEL_DATA)
            .map_err(|_| TavrError::Dicom("缺少像素数据".to_string()))?;

        match element.value() {
            Value::Primitive(PrimitiveValue::U16(values)) => Ok(values
                .iter()
                .map(|&v| if signed { i32::from(v as i16) } else { i32::from(v) })
                .collect()),
            Value::Primitive(PrimitiveValue::I16(values)) => Ok(values.iter().map(|&v| i32::from(v)).collect()),
            Value::Primitive(PrimitiveValue::U8(bytes)) => match bits_allocated {
                8 => Ok(bytes
                    .iter()
                    .map(|&v| if signed { i32::from(v as i8) } else { i32::from(v) })
                    .collect()),
                16 => Ok(bytes
                    .chunks_exact(2)
                    .map(|pair| {
                        let raw = u16::from_le_bytes([pair[0], pair[1]]);
                        if signed { i32::from(raw as i16) } else { i32::from(raw) }
                    })
                    .collect()),
                other => Err(TavrError::Unsupported(format!("不支持的位深: {}", other))),
            },
            Value::PixelSequence(_) => Err(TavrError::Unsupported("压缩像素数据暂不支持".to_string())),
            _ => Err(TavrError::Dicom("无法识别的像素数据格式".to_string())),
        }
    }

    /// 获取字符串类型元素的值
    fn get_string_element(obj: &DefaultDicomObject, tag: dicom::core::Tag) -> Option<String> {
        let element = obj.element(tag).ok()?;
        match element.to_str() {
            Ok(s) => {
                let s = s.trim().trim_end_matches('\0').to_string();
                if s.is_empty() {
                    None
                } else {
                    Some(s)
                }
            }
            Err(_) => {
                debug!("标签 {:?} 不是字符串类型", tag);
                None
            }
        }
    }

    /// 获取整数类型元素的值
    fn get_integer_element(obj: &DefaultDicomObject, tag: dicom::core::Tag) -> Option<i32> {
        obj.element(tag).ok()?.to_int::<i32>().ok()
    }

    /// 获取浮点数组类型元素的值（DS/FD等）
    fn get_floats_element(obj: &DefaultDicomObject, tag: dicom::core::Tag) -> Option<Vec<f64>> {
        obj.element(tag).ok()?.to_multi_float64().ok()
    }
}

/// 将切片组装为体数据
///
/// 选择切片最多的序列，按z坐标排序（缺失时按实例号），
/// 并用 `round(raw * slope + intercept)` 换算为HU值。
pub fn assemble_volume(slices: Vec<SliceData>) -> Result<ImportedSeries> {
    if slices.is_empty() {
        return Err(TavrError::not_found("目录中没有可读取的DICOM切片"));
    }

    let mut groups: HashMap<String, Vec<SliceData>> = HashMap::new();
    for slice in slices {
        groups.entry(slice.series_uid.clone()).or_default().push(slice);
    }

    let mut ordered: Vec<(String, Vec<SliceData>)> = groups.into_iter().collect();
    // 切片数相同时按UID排序，保证结果确定
    ordered.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(&b.0)));
    let mut ordered = ordered.into_iter();
    let (series_uid, mut series) = ordered
        .next()
        .ok_or_else(|| TavrError::not_found("目录中没有可读取的DICOM切片"))?;
    for (uid, other) in ordered {
        warn!("忽略序列 {} ({} 个切片)", uid, other.len());
    }

    let all_positioned = series.iter().all(|s| s.position.is_some());
    if all_positioned {
        series.sort_by(|a, b| a.z().unwrap_or(0.0).total_cmp(&b.z().unwrap_or(0.0)));
    } else {
        series.sort_by_key(|s| s.instance_number.unwrap_or(i32::MAX));
    }

    let first = &series[0];
    let (rows, columns) = (first.rows, first.columns);
    if let Some(bad) = series.iter().find(|s| s.rows != rows || s.columns != columns) {
        return Err(TavrError::Dicom(format!(
            "切片尺寸不一致: {}×{} vs {}×{}",
            columns, rows, bad.columns, bad.rows
        )));
    }

    let z_spacing = if all_positioned && series.len() > 1 {
        let total: f64 = series
            .windows(2)
            .map(|w| (w[1].z().unwrap_or(0.0) - w[0].z().unwrap_or(0.0)).abs())
            .sum();
        let mean = total / (series.len() - 1) as f64;
        if mean > 0.0 {
            mean
        } else {
            first.slice_thickness.filter(|t| *t > 0.0).unwrap_or(1.0)
        }
    } else {
        first.slice_thickness.filter(|t| *t > 0.0).unwrap_or(1.0)
    };

    // PixelSpacing 为 [行间距(y), 列间距(x)]
    let spacing = [
        positive_or_one(first.pixel_spacing[1]),
        positive_or_one(first.pixel_spacing[0]),
        z_spacing,
    ];
    let origin = first.position.unwrap_or([0.0; 3]);

    let mut data = Vec::with_capacity(rows * columns * series.len());
    for slice in &series {
        data.extend(slice.pixels.iter().map(|&raw| {
            let hu = (f64::from(raw) * slice.rescale_slope + slice.rescale_intercept).round();
            hu.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
        }));
    }

    let volume = CtVolume::from_vec([columns, rows, series.len()], spacing, origin, data)?;
    info!(
        "DICOM序列组装完成: {} ({}×{}×{})",
        series_uid,
        columns,
        rows,
        series.len()
    );

    Ok(ImportedSeries {
        series_uid,
        slice_count: series.len(),
        patient_id: first.patient_id.clone(),
        patient_name: first.patient_name.clone().map(|n| n.replace('^', " ").trim().to_string()),
        patient_sex: first.patient_sex.as_deref().and_then(Sex::from_dicom),
        patient_age: first.patient_age.as_deref().and_then(parse_dicom_age),
        volume,
    })
}

/// 只接受未压缩的小端传输语法
fn check_transfer_syntax(uid: &str) -> Result<()> {
    let uid = uid.trim_end_matches('\0').trim();
    if NATIVE_TRANSFER_SYNTAXES.contains(&uid) {
        Ok(())
    } else {
        Err(TavrError::Unsupported(format!("不支持的传输语法: {}", uid)))
    }
}

fn positive_or_one(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        1.0
    }
}

/// 解析DICOM年龄字符串，例如 "065Y"
fn parse_dicom_age(age: &str) -> Option<u8> {
    let age = age.trim();
    let (digits, unit) = age.split_at(age.find(|c: char| !c.is_ascii_digit()).unwrap_or(age.len()));
    let value: u32 = digits.parse().ok()?;
    let years = match unit {
        "" | "Y" => value,
        "M" => value / 12,
        "W" => value / 52,
        "D" => value / 365,
        _ => return None,
    };
    u8::try_from(years).ok().filter(|y| *y <= tavr_core::MAX_PATIENT_AGE)
}
