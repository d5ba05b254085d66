//! ムーブメント: 骨格ツリーとフレームバッチ全体のオーケストレーション
//!
//! 順方向パス (`process`: ランドマーク → ポーズグラム) と逆方向パス
//! (`from_gram`: ポーズグラム → 復元座標) は同じレコード型の上で排他的に
//! 動く。各パスの先頭で全レコードを書き潰すため、前回パスの残留状態を
//! 引きずることはない。

use anyhow::{ensure, Result};
use nalgebra::{Matrix4, Vector3, Vector4};
use ndarray::{Array2, Array3};

use crate::codec;
use crate::config::PipelineConfig;
use crate::decode;
use crate::extract;
use crate::gram::{Gram, GramLayout};
use crate::landmark::MovementInput;
use crate::normalize;
use crate::orient;
use crate::relaxed_face::RelaxedFace;
use crate::scale::{self, ScaleEstimator};
use crate::skeleton::Skeleton;

/// 関節ごとの処理段階。動的な属性有無チェックの代わりに明示する
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Unprocessed,
    Extracted,
    Normalized,
    Rotated,
    Encoded,
}

/// 1関節分のフレームバッチレコード。パスのたびに全体を書き潰す
#[derive(Debug, Clone)]
pub struct JointTrack {
    pub state: TrackState,
    /// 抽出後の生データ (x, y, z, visibility)
    pub raw: Vec<Vector4<f64>>,
    /// 正規化座標 (同次、w=1)
    pub normed: Vec<Vector4<f64>>,
    /// 肩幅基準の比率正規化座標 (診断用出力)
    pub basic: Vec<Vector3<f64>>,
    /// 正準回転後の座標
    pub rotated: Vec<Vector3<f64>>,
    /// 頭座標系での回転後座標 (顔ランドマークのみ)
    pub face_rotated: Vec<Vector3<f64>>,
    /// フレームごとの回転行列 (肩関節 2/5 と顔基準 1001 のみ)
    pub rotations: Vec<Matrix4<f64>>,
    /// 回転後の再スケール係数 (同上)
    pub rot_scales: Vec<f64>,
    /// 手全体の深度符号 (手首基点のみ)
    pub depth_sign: Vec<f64>,
    pub alpha: Vec<f64>,
    pub beta: Vec<f64>,
    pub gamma: Vec<f64>,
    /// 相対角 (レベル3以上の関節)
    pub rel: Vec<f64>,
    /// 量子化した球面角 (α, β, γ)
    pub color: Vec<[u8; 3]>,
    /// 相対角の色符号化 (可視化用)
    pub relative_color: Vec<[u8; 3]>,
}

impl JointTrack {
    pub(crate) fn new_empty() -> Self {
        Self {
            state: TrackState::Unprocessed,
            raw: Vec::new(),
            normed: Vec::new(),
            basic: Vec::new(),
            rotated: Vec::new(),
            face_rotated: Vec::new(),
            rotations: Vec::new(),
            rot_scales: Vec::new(),
            depth_sign: Vec::new(),
            alpha: Vec::new(),
            beta: Vec::new(),
            gamma: Vec::new(),
            rel: Vec::new(),
            color: Vec::new(),
            relative_color: Vec::new(),
        }
    }

    /// パス開始時の全消去
    fn clear(&mut self) {
        *self = Self::new_empty();
    }
}

/// 1シーケンス分の処理状態
pub struct Movement {
    skeleton: Skeleton,
    relaxed_face: RelaxedFace,
    config: PipelineConfig,
    layout: GramLayout,
    frames: usize,
    /// フレームごとの体格スケール
    scale: Vec<f64>,
    /// フレームごとの肩幅 (比率正規化の分母)
    shoulder_width: Vec<f64>,
    /// ライブモードのヒステリシス状態 (フレームを跨いで保持)
    estimator: ScaleEstimator,
    tracks: Vec<JointTrack>,
}

impl Movement {
    pub fn new(
        skeleton: Skeleton,
        relaxed_face: RelaxedFace,
        config: PipelineConfig,
    ) -> Self {
        let layout = GramLayout::of(&skeleton);
        let tracks = (0..skeleton.len()).map(|_| JointTrack::new_empty()).collect();
        let estimator = ScaleEstimator::new(&config);
        Self {
            skeleton,
            relaxed_face,
            config,
            layout,
            frames: 0,
            scale: Vec::new(),
            shoulder_width: Vec::new(),
            estimator,
            tracks,
        }
    }

    /// 標準骨格と既定設定のムーブメント
    pub fn standard(relaxed_face: RelaxedFace) -> Result<Self> {
        Ok(Self::new(
            Skeleton::standard()?,
            relaxed_face,
            PipelineConfig::default(),
        ))
    }

    pub fn skeleton(&self) -> &Skeleton {
        &self.skeleton
    }

    pub fn layout(&self) -> &GramLayout {
        &self.layout
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn scale(&self) -> &[f64] {
        &self.scale
    }

    pub fn track(&self, joint_id: u32) -> Result<&JointTrack> {
        Ok(&self.tracks[self.skeleton.index_of(joint_id)?])
    }

    /// 外部から初期スケールを与える (ライブモードの較正済み被写体)
    pub fn seed_scale(&mut self, scale: f64) {
        self.estimator.seed(scale);
    }

    /// 順方向パス: ランドマークバッチから全関節の角度表現まで計算する
    pub fn process(&mut self, input: &MovementInput) -> Result<()> {
        input.validate()?;
        self.reset_tracks();
        self.frames = input.frames();

        extract::extract_pass(&self.skeleton, input, &mut self.tracks)?;
        self.scale = self.estimate_scale(input);
        self.shoulder_width =
            normalize::shoulder_width(&self.skeleton, &self.tracks)?;
        normalize::normalize_pass(
            &self.skeleton,
            &self.config,
            &self.scale,
            &self.shoulder_width,
            &mut self.tracks,
        )?;
        orient::orient_pass(
            &self.skeleton,
            &self.config,
            &self.scale,
            &mut self.tracks,
        )?;
        codec::encode_pass(
            &self.skeleton,
            &self.config,
            &self.relaxed_face,
            &mut self.tracks,
        )?;
        Ok(())
    }

    /// 逆方向パス: ポーズグラムから回転後座標と角度を復元する
    pub fn from_gram(&mut self, gram: &Gram) -> Result<()> {
        self.reset_tracks();
        self.frames = gram.frames();
        self.scale = Vec::new();
        self.shoulder_width = Vec::new();
        decode::decode_pass(
            &self.skeleton,
            &self.config,
            &self.relaxed_face,
            &self.layout,
            gram,
            &mut self.tracks,
        )
    }

    fn reset_tracks(&mut self) {
        for track in &mut self.tracks {
            track.clear();
        }
    }

    fn estimate_scale(&mut self, input: &MovementInput) -> Vec<f64> {
        let frames = input.frames();
        if !input.has_face() {
            if frames == 1 {
                return vec![self.estimator.update(None)];
            }
            return vec![self.config.fallback_scale; frames];
        }
        let candidates =
            scale::candidates_from_face(&input.face, self.config.eye_ratio);
        if frames == 1 {
            vec![self.estimator.update(Some(candidates[0]))]
        } else {
            scale::batch_scale(&candidates, self.config.fallback_scale)
        }
    }

    /// 量子化ポーズグラム (u8)
    pub fn posegram(&self) -> Result<Array2<u8>> {
        self.ensure_encoded()?;
        Ok(codec::assemble_quantized(
            &self.skeleton,
            &self.layout,
            &self.tracks,
            self.frames,
        ))
    }

    /// 生の角度ポーズグラム (ラジアン)
    pub fn posegram_signal(&self) -> Result<Array2<f64>> {
        self.ensure_encoded()?;
        Ok(codec::assemble_signal(
            &self.skeleton,
            &self.layout,
            &self.tracks,
            self.frames,
        ))
    }

    /// 可視化用RGBポーズグラム
    pub fn posegram_rgb(&self) -> Result<Array3<u8>> {
        self.ensure_encoded()?;
        Ok(codec::assemble_rgb(
            &self.skeleton,
            &self.layout,
            &self.tracks,
            self.frames,
        ))
    }

    /// 肩幅基準の比率正規化座標 (x, y, z ブロックを縦に連結)
    pub fn basic_normalization(&self) -> Result<Array2<f64>> {
        ensure!(
            self.tracks.iter().all(|t| !t.basic.is_empty()),
            "比率正規化座標がありません (process 未実行)"
        );
        let joints = self.skeleton.len();
        let mut out = Array2::zeros((joints * 3, self.frames));
        for (i, track) in self.tracks.iter().enumerate() {
            for (t, p) in track.basic.iter().enumerate() {
                out[[i, t]] = p.x;
                out[[joints + i, t]] = p.y;
                out[[joints * 2 + i, t]] = p.z;
            }
        }
        Ok(out)
    }

    fn ensure_encoded(&self) -> Result<()> {
        ensure!(
            self.tracks.iter().all(|t| t.state == TrackState::Encoded),
            "角度が未計算です (process または from_gram を先に実行)"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmark;
    use crate::skeleton::topology;
    use ndarray::Array3;
    use std::collections::HashMap;

    /// 合成した静止ポーズのランドマークバッチを作る。
    /// 肩幅があり、腕が左右へ伸びた単純な姿勢
    fn synthetic_input(frames: usize, with_face: bool) -> MovementInput {
        let mut pose = Array3::zeros((frames, landmark::POSE_LANDMARKS, landmark::POSE_VALUES));
        for t in 0..frames {
            let set = |pose: &mut Array3<f64>, idx: usize, x: f64, y: f64, z: f64| {
                pose[[t, idx, 0]] = x;
                pose[[t, idx, 1]] = y;
                pose[[t, idx, 2]] = z;
                pose[[t, idx, 3]] = 1.0;
            };
            // 肩・肘・手首 (左右)、腰、耳
            set(&mut pose, topology::POSE_RIGHT_SHOULDER, 300.0, 200.0, 10.0);
            set(&mut pose, topology::POSE_LEFT_SHOULDER, 400.0, 200.0, 10.0);
            set(&mut pose, 14, 260.0, 270.0, 12.0);
            set(&mut pose, 13, 440.0, 270.0, 12.0);
            set(&mut pose, 16, 240.0, 350.0, 14.0);
            set(&mut pose, 15, 460.0, 350.0, 14.0);
            set(&mut pose, topology::POSE_RIGHT_HIP, 310.0, 420.0, 8.0);
            set(&mut pose, topology::POSE_LEFT_HIP, 390.0, 420.0, 8.0);
            set(&mut pose, topology::POSE_RIGHT_EAR, 330.0, 100.0, 20.0);
            set(&mut pose, topology::POSE_LEFT_EAR, 370.0, 100.0, 20.0);
        }
        let mut input = MovementInput::from_pose(pose);
        if with_face {
            let mut face = Array3::zeros((frames, landmark::FACE_LANDMARKS, landmark::LANDMARK_VALUES));
            for t in 0..frames {
                for &idx in &topology::LEFT_EYE_CLUSTER {
                    face[[t, idx, 0]] = 360.0;
                    face[[t, idx, 1]] = 110.0;
                }
                for &idx in &topology::RIGHT_EYE_CLUSTER {
                    face[[t, idx, 0]] = 336.0;
                    face[[t, idx, 1]] = 110.0;
                }
                face[[t, topology::FACE_TEMPLE_RIGHT, 0]] = 320.0;
                face[[t, topology::FACE_TEMPLE_RIGHT, 1]] = 110.0;
                face[[t, topology::FACE_TEMPLE_LEFT, 0]] = 380.0;
                face[[t, topology::FACE_TEMPLE_LEFT, 1]] = 110.0;
            }
            input.face = face;
        }
        input
    }

    fn relaxed_face_fixture() -> RelaxedFace {
        let mut points = HashMap::new();
        for &(id, _) in &topology::FACE_JOINT_RATIOS {
            points.insert(id, [10.0, -5.0, 140.0]);
        }
        RelaxedFace::new(points)
    }

    #[test]
    fn test_missing_face_yields_constant_fallback_scale() {
        let mut mv = Movement::standard(relaxed_face_fixture()).unwrap();
        let input = synthetic_input(6, false);
        mv.process(&input).unwrap();
        assert_eq!(mv.scale(), &[98.0; 6]);
    }

    #[test]
    fn test_all_zero_face_yields_constant_fallback_scale() {
        let mut mv = Movement::standard(relaxed_face_fixture()).unwrap();
        let mut input = synthetic_input(5, false);
        input.face = Array3::zeros((5, landmark::FACE_LANDMARKS, landmark::LANDMARK_VALUES));
        mv.process(&input).unwrap();
        assert_eq!(mv.scale(), &[98.0; 5]);
    }

    #[test]
    fn test_process_reaches_encoded_state() {
        let mut mv = Movement::standard(relaxed_face_fixture()).unwrap();
        mv.process(&synthetic_input(4, true)).unwrap();
        assert!(mv.posegram().is_ok());
        let gram = mv.posegram().unwrap();
        assert_eq!(gram.shape(), &[455, 4]);
    }

    #[test]
    fn test_posegram_before_process_is_error() {
        let mv = Movement::standard(relaxed_face_fixture()).unwrap();
        assert!(mv.posegram().is_err());
    }

    #[test]
    fn test_bone_length_invariant_for_torso() {
        let mut mv = Movement::standard(relaxed_face_fixture()).unwrap();
        mv.process(&synthetic_input(6, true)).unwrap();
        let scale = mv.scale().to_vec();
        // 体幹チェーンの正規化座標は骨長比×スケールを (平滑化誤差内で) 保つ
        for id in [2u32, 3, 5, 6] {
            let joint = mv.skeleton().joint(mv.skeleton().index_of(id).unwrap());
            let parent_idx = joint.parent.unwrap();
            let parent_id = mv.skeleton().joint(parent_idx).id;
            let track = mv.track(id).unwrap();
            let parent = mv.track(parent_id).unwrap();
            for t in 0..6 {
                let d = track.normed[t].xyz() - parent.normed[t].xyz();
                let expected = joint.bone_ratio * scale[t];
                let err = (d.norm() - expected).abs() / expected;
                assert!(
                    err < 0.05,
                    "関節{} フレーム{}: 骨長誤差 {:.3}",
                    id,
                    t,
                    err
                );
            }
        }
    }

    #[test]
    fn test_encode_decode_angle_consistency() {
        let mut mv = Movement::standard(relaxed_face_fixture()).unwrap();
        mv.process(&synthetic_input(4, true)).unwrap();
        let gram = mv.posegram().unwrap();
        let original: Vec<(u32, Vec<f64>, Vec<f64>)> = [2u32, 3, 4, 6, 811]
            .iter()
            .map(|&id| {
                let tr = mv.track(id).unwrap();
                (id, tr.alpha.clone(), tr.rel.clone())
            })
            .collect();

        let mut decoded = Movement::standard(relaxed_face_fixture()).unwrap();
        decoded.from_gram(&Gram::Quantized(gram)).unwrap();
        let tolerance = std::f64::consts::PI / 128.0 * 1.5;
        for (id, alpha, rel) in original {
            let tr = decoded.track(id).unwrap();
            for t in 0..4 {
                assert!(
                    (tr.alpha[t] - alpha[t]).abs() < tolerance,
                    "関節{} フレーム{}: α {:.4} vs {:.4}",
                    id,
                    t,
                    tr.alpha[t],
                    alpha[t]
                );
                if !rel.is_empty() {
                    assert!(
                        (tr.rel[t] - rel[t]).abs() < tolerance * 4.0,
                        "関節{} フレーム{}: 相対角 {:.4} vs {:.4}",
                        id,
                        t,
                        tr.rel[t],
                        rel[t]
                    );
                }
            }
        }
    }

    #[test]
    fn test_passes_are_mutually_exclusive() {
        let mut mv = Movement::standard(relaxed_face_fixture()).unwrap();
        mv.process(&synthetic_input(3, true)).unwrap();
        let gram = mv.posegram().unwrap();
        // 逆方向パスで順方向の派生状態は消える
        mv.from_gram(&Gram::Quantized(gram)).unwrap();
        assert!(mv.track(2).unwrap().normed.is_empty());
        assert!(mv.scale().is_empty());
        assert!(!mv.track(2).unwrap().rotated.is_empty());
    }
}
