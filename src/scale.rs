//! 体格スケール推定
//!
//! 両目領域の中心間距離から被写体の体格スケール (骨長比1あたりの
//! ピクセル数) を推定する。バッチでは退化フレームを前後から線形補間し、
//! ライブ (1フレーム) ではヒステリシス付きで直前の採用値を保持する。

use ndarray::Array3;

use crate::config::PipelineConfig;
use crate::filter::interp_series;
use crate::skeleton::topology::{LEFT_EYE_CLUSTER, RIGHT_EYE_CLUSTER};

/// 距離計算のゼロ除算保護
const DIST_EPS: f64 = 1e-5;
/// 目間距離の有効下限 (ピクセル)。これ未満は遮蔽・誤検出とみなす
const MIN_EYE_DISTANCE: f64 = 1.0;
/// バッチ補間のアンカーにするスケール候補の下限
const MIN_BATCH_CANDIDATE: f64 = 1.0;

/// 顔バッチからフレームごとのスケール候補を計算する
pub fn candidates_from_face(face: &Array3<f64>, eye_ratio: f64) -> Vec<f64> {
    let frames = face.shape()[0];
    let mut out = Vec::with_capacity(frames);
    for t in 0..frames {
        let left = cluster_center(face, t, &LEFT_EYE_CLUSTER);
        let right = cluster_center(face, t, &RIGHT_EYE_CLUSTER);
        let dx = left[0] - right[0];
        let dy = left[1] - right[1];
        let dz = left[2] - right[2];
        let distance = (dx * dx + dy * dy + dz * dz + DIST_EPS).sqrt();
        out.push(distance / eye_ratio);
    }
    out
}

fn cluster_center(face: &Array3<f64>, frame: usize, cluster: &[usize]) -> [f64; 3] {
    let mut center = [0.0; 3];
    for &idx in cluster {
        for a in 0..3 {
            center[a] += face[[frame, idx, a]];
        }
    }
    for a in &mut center {
        *a /= cluster.len() as f64;
    }
    center
}

/// バッチモードのスケール系列。退化候補 (下限未満) は有効フレームから
/// 線形補間し、有効フレームが皆無なら既定値で埋める
pub fn batch_scale(candidates: &[f64], fallback: f64) -> Vec<f64> {
    let anchors: Vec<usize> = candidates
        .iter()
        .enumerate()
        .filter(|(_, &c)| c >= MIN_BATCH_CANDIDATE)
        .map(|(i, _)| i)
        .collect();
    if anchors.is_empty() {
        return vec![fallback; candidates.len()];
    }
    let xs: Vec<f64> = anchors.iter().map(|&i| i as f64).collect();
    let ys: Vec<f64> = anchors.iter().map(|&i| candidates[i]).collect();
    candidates
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            if c >= MIN_BATCH_CANDIDATE {
                c
            } else {
                interp_series(i as f64, &xs, &ys)
            }
        })
        .collect()
}

/// ライブモードのヒステリシス付きスケール推定器
///
/// 直前に採用した値を保持し、新しい候補が有効かつ閾値を超えて変化した
/// ときだけ置き換える。フレームを跨いで使い回す (§ストリーミング状態)
#[derive(Debug, Clone)]
pub struct ScaleEstimator {
    last: Option<f64>,
    eye_ratio: f64,
    threshold: f64,
    fallback: f64,
}

impl ScaleEstimator {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            last: None,
            eye_ratio: config.eye_ratio,
            threshold: config.scale_threshold,
            fallback: config.fallback_scale,
        }
    }

    /// 外部から初期スケールを与える (較正済みの被写体など)
    pub fn seed(&mut self, scale: f64) {
        self.last = Some(scale);
    }

    /// 1フレーム分の候補でスケールを更新し、採用値を返す。
    /// `candidate` が None (顔未検出) または退化値なら直前値を保持し、
    /// 一度も採用がなければ既定値を採用する
    pub fn update(&mut self, candidate: Option<f64>) -> f64 {
        if let Some(c) = candidate {
            // 有効性は目間距離 (候補×比率) がピクセル下限を超えるかで判定
            let valid = c * self.eye_ratio > MIN_EYE_DISTANCE;
            if valid {
                match self.last {
                    None => self.last = Some(c),
                    Some(prev) if (prev - c).abs() > self.threshold => {
                        self.last = Some(c)
                    }
                    Some(_) => {}
                }
            }
        }
        match self.last {
            Some(s) => s,
            None => {
                self.last = Some(self.fallback);
                self.fallback
            }
        }
    }

    pub fn last(&self) -> Option<f64> {
        self.last
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
