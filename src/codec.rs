//! 角度符号化
//!
//! 回転後座標から関節ごとの球面角 (α, β, γ) と相対角を計算し、8bit へ
//! 量子化してポーズグラムへ組み立てる。顔ランドマークは中立表情参照点
//! からの変位角を感度増幅して符号化する。

use anyhow::Result;
use nalgebra::Vector3;
use ndarray::{Array2, Array3};
use std::f64::consts::{FRAC_PI_2, PI};

use crate::config::PipelineConfig;
use crate::gram::GramLayout;
use crate::movement::{JointTrack, TrackState};
use crate::relaxed_face::RelaxedFace;
use crate::skeleton::topology::{
    FACE_FORWARD_ID, FACE_UP_ID, KNUCKLE_BASE_OFFSETS, LEFT_WRIST_ID,
    RIGHT_WRIST_ID,
};
use crate::skeleton::{Region, Skeleton};

/// 体幹・顔のベクトル長保護
const BODY_LEN_EPS: f64 = 1e-6;
/// 手のベクトル長保護
const HAND_LEN_EPS: f64 = 1e-5;
/// 相対角計算の分母保護
const REL_ANGLE_EPS: f64 = 1e-10;

/// 角度 [rad] → 8bit 量子化値。両端で飽和する
pub fn angle_to_u8(angle: f64) -> u8 {
    let v = angle * 128.0 / PI + 128.0;
    v.clamp(0.0, 255.0) as u8
}

/// 8bit 量子化値 → 角度 [rad]。`angle_to_u8` の代数的逆変換
pub fn u8_to_angle(value: u8) -> f64 {
    (value as f64 - 128.0) / 128.0 * PI
}

/// 相対角 → RGB。π/2 を境に色相を割り、曲げの向きを可視化する。
/// 数値デコードには使わない損失性の符号化
pub fn relative_angle_to_rgb(angle: f64) -> [u8; 3] {
    let r = (angle.sin() * 255.0).abs();
    if angle > FRAC_PI_2 {
        let g = (angle.cos() * 255.0).abs();
        [r as u8, g as u8, 0]
    } else {
        let b = (angle.cos() * 255.0).abs();
        [r as u8, 0, b as u8]
    }
}

/// 2ベクトル間の角度 [0, π]
pub fn angle_between(v1: &Vector3<f64>, v2: &Vector3<f64>) -> f64 {
    let denom = v1.norm() * v2.norm() + REL_ANGLE_EPS;
    (v1.dot(v2) / denom).clamp(-1.0, 1.0).acos()
}

/// 中立まわりの感度増幅: (a - π/2)・gain + π/2
pub fn amplify(angle: f64, gain: f64) -> f64 {
    (angle - FRAC_PI_2) * gain + FRAC_PI_2
}

/// 感度増幅の逆変換
pub fn deamplify(angle: f64, gain: f64) -> f64 {
    (angle - FRAC_PI_2) / gain + FRAC_PI_2
}

/// 符号化パス本体。回転後座標から全関節の角度・色を計算する
pub fn encode_pass(
    skeleton: &Skeleton,
    config: &PipelineConfig,
    relaxed_face: &RelaxedFace,
    tracks: &mut [JointTrack],
) -> Result<()> {
    for i in 0..skeleton.len() {
        let joint = skeleton.joint(i);
        let frames = tracks[i].rotated.len();
        let (alpha, beta, gamma) = if joint.parent.is_none() {
            (vec![0.0; frames], vec![0.0; frames], vec![0.0; frames])
        } else if is_reference_measured(joint.id) {
            reference_angles(config, relaxed_face, &tracks[i], joint.id)?
        } else {
            let parent = joint.parent.expect("非ルート関節は親を持つ");
            let eps = if Region::of(joint.id).is_hand() {
                HAND_LEN_EPS
            } else {
                BODY_LEN_EPS
            };
            spherical_angles(&tracks[i].rotated, &tracks[parent].rotated, eps)
        };

        let rel = if joint.level >= 3 {
            relative_angles(skeleton, tracks, i)?
        } else {
            vec![0.0; frames]
        };

        let color = alpha
            .iter()
            .zip(beta.iter().zip(gamma.iter()))
            .map(|(&a, (&b, &g))| [angle_to_u8(a), angle_to_u8(b), angle_to_u8(g)])
            .collect();
        let relative_color = rel.iter().map(|&a| relative_angle_to_rgb(a)).collect();

        let track = &mut tracks[i];
        track.alpha = alpha;
        track.beta = beta;
        track.gamma = gamma;
        track.rel = rel;
        track.color = color;
        track.relative_color = relative_color;
        track.state = TrackState::Encoded;
    }
    Ok(())
}

/// 中立表情を基準に計測する顔ランドマークか (頭アンカー2点を除く)
fn is_reference_measured(id: u32) -> bool {
    Region::of(id) == Region::Face && id != FACE_FORWARD_ID && id != FACE_UP_ID
}

/// 親へ向かう方向ベクトルの各軸成分から球面角を取る
fn spherical_angles(
    rotated: &[Vector3<f64>],
    parent_rotated: &[Vector3<f64>],
    eps: f64,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let frames = rotated.len();
    let mut alpha = Vec::with_capacity(frames);
    let mut beta = Vec::with_capacity(frames);
    let mut gamma = Vec::with_capacity(frames);
    for t in 0..frames {
        let d = rotated[t] - parent_rotated[t];
        let l = d.norm() + eps;
        alpha.push((d.x / l).clamp(-1.0, 1.0).acos());
        beta.push((d.y / l).clamp(-1.0, 1.0).acos());
        gamma.push((d.z / l).clamp(-1.0, 1.0).acos());
    }
    (alpha, beta, gamma)
}

/// 顔ランドマーク: 頭座標系での中立参照点からの変位角、感度増幅つき
fn reference_angles(
    config: &PipelineConfig,
    relaxed_face: &RelaxedFace,
    track: &JointTrack,
    id: u32,
) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>)> {
    let c = relaxed_face.point(id)?;
    let l = c.norm() + BODY_LEN_EPS;
    let frames = track.face_rotated.len();
    let mut alpha = Vec::with_capacity(frames);
    let mut beta = Vec::with_capacity(frames);
    let mut gamma = Vec::with_capacity(frames);
    for t in 0..frames {
        let d = track.face_rotated[t] - c;
        alpha.push(amplify((d.x / l).clamp(-1.0, 1.0).acos(), config.face_gain));
        beta.push(amplify((d.y / l).clamp(-1.0, 1.0).acos(), config.face_gain));
        gamma.push(amplify((d.z / l).clamp(-1.0, 1.0).acos(), config.face_gain));
    }
    Ok((alpha, beta, gamma))
}

/// 相対角: 自関節→親のベクトルと祖父→親のベクトルの角度。
/// 指の付け根は指ごとの角度を揃えるため、親の代わりに体幹の手首を使う
fn relative_angles(
    skeleton: &Skeleton,
    tracks: &[JointTrack],
    index: usize,
) -> Result<Vec<f64>> {
    let (pivot, reference) = relative_pivot(skeleton, index)?;
    let frames = tracks[index].rotated.len();
    let mut out = Vec::with_capacity(frames);
    for t in 0..frames {
        let v1 = tracks[index].rotated[t] - tracks[pivot].rotated[t];
        let v2 = tracks[reference].rotated[t] - tracks[pivot].rotated[t];
        out.push(angle_between(&v1, &v2));
    }
    Ok(out)
}

/// 相対角の基準点対 (支点, 参照点)。通常は (親, 祖父)、指の付け根は
/// (体幹手首, その親)
pub(crate) fn relative_pivot(
    skeleton: &Skeleton,
    index: usize,
) -> Result<(usize, usize)> {
    let joint = skeleton.joint(index);
    let region = Region::of(joint.id);
    if region.is_hand() {
        let offset = joint.id % 100;
        if KNUCKLE_BASE_OFFSETS.contains(&offset) {
            let wrist_id = if region == Region::RightHand {
                RIGHT_WRIST_ID
            } else {
                LEFT_WRIST_ID
            };
            let wrist = skeleton.index_of(wrist_id)?;
            let wrist_parent = skeleton
                .joint(wrist)
                .parent
                .expect("体幹手首は親を持つ");
            return Ok((wrist, wrist_parent));
        }
    }
    let parent = joint.parent.expect("レベル3以上の関節は親を持つ");
    let grandparent = skeleton.joint(parent).parent.expect("レベル3以上の関節は祖父を持つ");
    Ok((parent, grandparent))
}

/// 量子化ポーズグラムの組み立て:
/// {相対角, α, β, γ} ブロックを行きがけ順で縦に積む
pub fn assemble_quantized(
    skeleton: &Skeleton,
    layout: &GramLayout,
    tracks: &[JointTrack],
    frames: usize,
) -> Array2<u8> {
    let mut out = Array2::zeros((layout.total_rows(), frames));
    for (row, &ji) in layout.relative_rows.iter().enumerate() {
        for t in 0..frames {
            out[[row, t]] = angle_to_u8(tracks[ji].rel[t]);
        }
    }
    for i in 0..skeleton.len() {
        let rows = layout.axis_rows(i, true);
        for t in 0..frames {
            out[[rows[0], t]] = angle_to_u8(tracks[i].alpha[t]);
            out[[rows[1], t]] = angle_to_u8(tracks[i].beta[t]);
            out[[rows[2], t]] = angle_to_u8(tracks[i].gamma[t]);
        }
    }
    out
}

/// 生角度ポーズグラム (ラジアン)
pub fn assemble_signal(
    skeleton: &Skeleton,
    layout: &GramLayout,
    tracks: &[JointTrack],
    frames: usize,
) -> Array2<f64> {
    let mut out = Array2::zeros((layout.total_rows(), frames));
    for (row, &ji) in layout.relative_rows.iter().enumerate() {
        for t in 0..frames {
            out[[row, t]] = tracks[ji].rel[t];
        }
    }
    for i in 0..skeleton.len() {
        let rows = layout.axis_rows(i, true);
        for t in 0..frames {
            out[[rows[0], t]] = tracks[i].alpha[t];
            out[[rows[1], t]] = tracks[i].beta[t];
            out[[rows[2], t]] = tracks[i].gamma[t];
        }
    }
    out
}

/// 可視化用RGBポーズグラム。相対角ブロック + 関節ごとの (α, β, γ) を
/// RGB チャネルに割り当てた1ブロック
pub fn assemble_rgb(
    skeleton: &Skeleton,
    layout: &GramLayout,
    tracks: &[JointTrack],
    frames: usize,
) -> Array3<u8> {
    let rows = layout.relative_count + layout.joint_count;
    let mut out = Array3::zeros((rows, frames, 3));
    for (row, &ji) in layout.relative_rows.iter().enumerate() {
        for t in 0..frames {
            let rgb = relative_angle_to_rgb(tracks[ji].rel[t]);
            for ch in 0..3 {
                out[[row, t, ch]] = rgb[ch];
            }
        }
    }
    for i in 0..skeleton.len() {
        let row = layout.relative_count + i;
        for t in 0..frames {
            for ch in 0..3 {
                out[[row, t, ch]] = tracks[i].color[t][ch];
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize_round_trip_within_one_step() {
        // [0, π] の角度は 1/128π 以内で往復する
        let step = PI / 128.0;
        let mut angle = 0.0;
        while angle <= PI {
            let decoded = u8_to_angle(angle_to_u8(angle));
            assert!(
                (decoded - angle).abs() <= step + 1e-12,
                "angle = {}: decoded = {}",
                angle,
                decoded
            );
            angle += 0.013;
        }
    }

    #[test]
    fn test_quantize_saturates_at_both_ends() {
        assert_eq!(angle_to_u8(10.0), 255);
        assert_eq!(angle_to_u8(-10.0), 0);
    }

    #[test]
    fn test_amplify_round_trip() {
        let gain = 4.0;
        for angle in [0.3, FRAC_PI_2, 2.0] {
            let back = deamplify(amplify(angle, gain), gain);
            assert!((back - angle).abs() < 1e-12);
        }
    }

    #[test]
    fn test_relative_rgb_hue_split() {
        // π/2 未満は青成分、以上は緑成分
        let low = relative_angle_to_rgb(0.3);
        assert!(low[2] > 0 && low[1] == 0);
        let high = relative_angle_to_rgb(2.5);
        assert!(high[1] > 0 && high[2] == 0);
    }

    #[test]
    fn test_spherical_angles_on_axis() {
        let parent = vec![Vector3::zeros()];
        let child = vec![Vector3::new(10.0, 0.0, 0.0)];
        let (a, b, g) = spherical_angles(&child, &parent, BODY_LEN_EPS);
        assert!((a[0] - 0.0).abs() < 1e-3);
        assert!((b[0] - FRAC_PI_2).abs() < 1e-6);
        assert!((g[0] - FRAC_PI_2).abs() < 1e-6);
    }

    #[test]
    fn test_angle_between_orthogonal() {
        let v1 = Vector3::new(1.0, 0.0, 0.0);
        let v2 = Vector3::new(0.0, 1.0, 0.0);
        assert!((angle_between(&v1, &v2) - FRAC_PI_2).abs() < 1e-9);
    }

    #[test]
    fn test_knuckle_base_measures_against_torso_wrist() {
        let skeleton = Skeleton::standard().unwrap();
        let i405 = skeleton.index_of(405).unwrap();
        let (pivot, reference) = relative_pivot(&skeleton, i405).unwrap();
        assert_eq!(skeleton.joint(pivot).id, RIGHT_WRIST_ID);
        assert_eq!(skeleton.joint(reference).id, 3);
        // 通常の関節は (親, 祖父)
        let i402 = skeleton.index_of(402).unwrap();
        let (pivot, reference) = relative_pivot(&skeleton, i402).unwrap();
        assert_eq!(skeleton.joint(pivot).id, 401);
        assert_eq!(skeleton.joint(reference).id, 400);
    }
}
