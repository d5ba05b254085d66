//! 中立表情の参照姿勢リソース
//!
//! 顔関節の角度は、正準化した頭座標系における中立表情からの変位として
//! 計測する。この参照点群は外部リソースとして一度だけ読み込み、以降は
//! 読み取り専用で共有する。

use anyhow::{bail, Context, Result};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// 顔関節ID → 中立表情での3D参照点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaxedFace {
    points: HashMap<u32, [f64; 3]>,
}

impl RelaxedFace {
    pub fn new(points: HashMap<u32, [f64; 3]>) -> Self {
        Self { points }
    }

    /// JSONファイルから読み込む。形式: {"1001": [x, y, z], ...}
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("参照姿勢ファイルを読めません: {:?}", path.as_ref()))?;
        let points: HashMap<u32, [f64; 3]> = serde_json::from_str(&content)?;
        Ok(Self { points })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.points)?;
        fs::write(path.as_ref(), json)
            .with_context(|| format!("参照姿勢ファイルを書けません: {:?}", path.as_ref()))?;
        Ok(())
    }

    /// 参照点を引く。対象の顔関節が未登録なら構成エラー
    pub fn point(&self, joint_id: u32) -> Result<Vector3<f64>> {
        match self.points.get(&joint_id) {
            Some(&[x, y, z]) => Ok(Vector3::new(x, y, z)),
            None => bail!("参照姿勢に顔関節 {} がありません", joint_id),
        }
    }

    pub fn contains(&self, joint_id: u32) -> bool {
        self.points.contains_key(&joint_id)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
