//! ポーズグラムの配列レイアウトと変形操作
//!
//! 行方向のレイアウトは {相対角ブロック, αブロック, βブロック, γブロック}
//! の順で、各ブロック内は骨格の行きがけ順。列はフレーム。行数などは常に
//! 骨格から導出し、ハードコードしない。

use anyhow::{bail, Result};
use ndarray::{Array2, Axis};

use crate::codec::angle_to_u8;
use crate::filter::interp_series;
use crate::skeleton::{Region, Skeleton};

/// ポーズグラムの行割り当て。骨格から一度だけ計算する
#[derive(Debug, Clone)]
pub struct GramLayout {
    /// 全関節数 (行きがけ順の各ブロック行数)
    pub joint_count: usize,
    /// 相対角ブロックの行数 (レベル3以上の関節数)
    pub relative_count: usize,
    /// 相対角ブロックの各行に対応するアリーナインデックス
    pub relative_rows: Vec<usize>,
    /// トリム時に残す先頭関節数 (体幹 + 両手 + 頭アンカー)
    pub trimmed_keep: usize,
}

impl GramLayout {
    pub fn of(skeleton: &Skeleton) -> Self {
        let relative_rows = skeleton.relative_joints();
        // 中立表情を基準に計測する顔ランドマークは行きがけ順の末尾に
        // まとまっている。トリムではその手前までを残す
        let trimmed_keep = skeleton
            .iter()
            .take_while(|(_, j)| !is_reference_measured(j.id))
            .count();
        Self {
            joint_count: skeleton.len(),
            relative_count: relative_rows.len(),
            relative_rows,
            trimmed_keep,
        }
    }

    /// 相対角ブロックを含む全行数
    pub fn total_rows(&self) -> usize {
        self.relative_count + self.joint_count * 3
    }

    /// 相対角ブロックを持たない変種の行数
    pub fn rows_without_relative(&self) -> usize {
        self.joint_count * 3
    }

    /// 行きがけ順 `i` 番目の関節の α/β/γ 行 (相対ブロックのオフセット込み)
    pub fn axis_rows(&self, joint_index: usize, with_relative: bool) -> [usize; 3] {
        let base = if with_relative { self.relative_count } else { 0 };
        [
            base + joint_index,
            base + self.joint_count + joint_index,
            base + self.joint_count * 2 + joint_index,
        ]
    }

    /// グラムの行数から相対角ブロックの有無を判定する
    pub fn has_relative_block(&self, rows: usize) -> Result<bool> {
        if rows == self.total_rows() {
            Ok(true)
        } else if rows == self.rows_without_relative() {
            Ok(false)
        } else {
            bail!(
                "ポーズグラムの行数 {} が不正です (期待: {} または {})",
                rows,
                self.total_rows(),
                self.rows_without_relative()
            );
        }
    }
}

/// 中立表情基準で計測する顔ランドマークか (頭アンカー2点を除く)
fn is_reference_measured(id: u32) -> bool {
    Region::of(id) == Region::Face
        && id != crate::skeleton::topology::FACE_FORWARD_ID
        && id != crate::skeleton::topology::FACE_UP_ID
}

/// デコーダへの入力グラム。量子化 (u8) と生角度 (ラジアン) の2形式
#[derive(Debug, Clone)]
pub enum Gram {
    Quantized(Array2<u8>),
    Signal(Array2<f64>),
}

impl Gram {
    pub fn rows(&self) -> usize {
        match self {
            Gram::Quantized(g) => g.shape()[0],
            Gram::Signal(g) => g.shape()[0],
        }
    }

    pub fn frames(&self) -> usize {
        match self {
            Gram::Quantized(g) => g.shape()[1],
            Gram::Signal(g) => g.shape()[1],
        }
    }

    /// 量子化形式へ揃える。生角度は絶対値を取ってから量子化する
    pub fn to_quantized(&self) -> Array2<u8> {
        match self {
            Gram::Quantized(g) => g.clone(),
            Gram::Signal(g) => g.mapv(|a| angle_to_u8(a.abs())),
        }
    }
}

/// 各行を線形補間してフレーム数を変える
fn resize_rows(gram: &Array2<f64>, new_frames: usize, factor: f64) -> Array2<f64> {
    let rows = gram.shape()[0];
    let frames = gram.shape()[1];
    let xs: Vec<f64> = (0..frames).map(|i| i as f64 * factor).collect();
    let mut out = Array2::zeros((rows, new_frames));
    for r in 0..rows {
        let ys: Vec<f64> = gram.row(r).to_vec();
        for j in 0..new_frames {
            out[[r, j]] = interp_series(j as f64, &xs, &ys);
        }
    }
    out
}

/// フレーム数を倍率で変更する (0.5 なら半分の長さ)
pub fn resize_by_factor(gram: &Array2<f64>, factor: f64) -> Result<Array2<f64>> {
    if factor <= 0.0 {
        bail!("リサイズ倍率は正である必要があります: {}", factor);
    }
    let new_frames = (gram.shape()[1] as f64 * factor).round() as usize;
    if new_frames == 0 {
        bail!("リサイズ後のフレーム数が0になります");
    }
    Ok(resize_rows(gram, new_frames, factor))
}

/// 目標のフレーム数に合わせてリサイズする
pub fn resize_to_frames(gram: &Array2<f64>, target_frames: usize) -> Result<Array2<f64>> {
    if target_frames == 0 {
        bail!("目標フレーム数は1以上である必要があります");
    }
    let factor = target_frames as f64 / gram.shape()[1] as f64;
    Ok(resize_rows(gram, target_frames, factor))
}

/// 相対角ブロックと中立表情基準の顔行を落とし、体幹 + 両手 + 頭アンカー
/// の α/β/γ ブロックだけを残す
pub fn trim(gram: &Array2<u8>, layout: &GramLayout) -> Result<Array2<u8>> {
    let with_rel = layout.has_relative_block(gram.shape()[0])?;
    let base = if with_rel { layout.relative_count } else { 0 };
    let keep = layout.trimmed_keep;
    let frames = gram.shape()[1];
    let mut out = Array2::zeros((keep * 3, frames));
    for block in 0..3 {
        let src_start = base + layout.joint_count * block;
        for r in 0..keep {
            out.row_mut(keep * block + r)
                .assign(&gram.index_axis(Axis(0), src_start + r));
        }
    }
    Ok(out)
}

/// トリム済みグラムをフルサイズの土台グラムへはめ戻す。フレーム数が
/// 違う場合はトリム済み側を土台に合わせてリサイズする
pub fn splice(trimmed: &Array2<u8>, carrier: &Array2<u8>, layout: &GramLayout) -> Result<Array2<u8>> {
    let keep = layout.trimmed_keep;
    if trimmed.shape()[0] != keep * 3 {
        bail!(
            "トリム済みグラムの行数 {} が不正です (期待: {})",
            trimmed.shape()[0],
            keep * 3
        );
    }
    let with_rel = layout.has_relative_block(carrier.shape()[0])?;
    let base = if with_rel { layout.relative_count } else { 0 };
    let frames = carrier.shape()[1];

    let trimmed = if trimmed.shape()[1] == frames {
        trimmed.clone()
    } else {
        let as_f64 = trimmed.mapv(|v| v as f64);
        resize_to_frames(&as_f64, frames)?.mapv(|v| v.round().clamp(0.0, 255.0) as u8)
    };

    let mut out = carrier.clone();
    for block in 0..3 {
        let dst_start = base + layout.joint_count * block;
        for r in 0..keep {
            out.row_mut(dst_start + r)
                .assign(&trimmed.index_axis(Axis(0), keep * block + r));
        }
    }
    Ok(out)
}
