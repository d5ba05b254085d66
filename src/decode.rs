//! ポーズグラム復号
//!
//! 符号化の逆変換。量子化値から角度を戻し、ルートから葉へ順に回転後
//! 座標を復元する。顔ランドマークは中立参照点まわりで復元したあと、
//! 復元済みの頭アンカーボーン (1001/1006) から導いた逆頭回転で体幹
//! 空間へ写し戻す。フレーム間に依存はなく、任意の順で処理できる。

use anyhow::Result;
use nalgebra::{Vector3, Vector4};
use ndarray::Array2;

use crate::codec::{
    amplify, angle_between, angle_to_u8, deamplify, relative_angle_to_rgb,
    u8_to_angle,
};
use crate::config::PipelineConfig;
use crate::gram::{Gram, GramLayout};
use crate::movement::{JointTrack, TrackState};
use crate::orient::face_rotation;
use crate::relaxed_face::RelaxedFace;
use crate::skeleton::topology::{
    FACE_ANCHOR_ID, FACE_FORWARD_ID, FACE_UP_ID,
};
use crate::skeleton::{Region, Skeleton};

/// ベクトル長・スケール係数の分母保護
const LEN_EPS: f64 = 1e-6;
/// 手領域の再導出で使う長さ保護
const HAND_LEN_EPS: f64 = 1e-5;

/// 復号パス本体
pub fn decode_pass(
    skeleton: &Skeleton,
    config: &PipelineConfig,
    relaxed_face: &RelaxedFace,
    layout: &GramLayout,
    gram: &Gram,
    tracks: &mut [JointTrack],
) -> Result<()> {
    let quantized = gram.to_quantized();
    let with_relative = layout.has_relative_block(quantized.shape()[0])?;
    let frames = quantized.shape()[1];
    let unit = config.canonical_unit();

    for i in 0..skeleton.len() {
        let joint = skeleton.joint(i);
        let rows = layout.axis_rows(i, with_relative);
        let mut alpha = dequantize_row(&quantized, rows[0]);
        let mut beta = dequantize_row(&quantized, rows[1]);
        let mut gamma = dequantize_row(&quantized, rows[2]);

        if joint.parent.is_none() {
            let track = &mut tracks[i];
            track.rotated = vec![Vector3::zeros(); frames];
            track.alpha = vec![0.0; frames];
            track.beta = vec![0.0; frames];
            track.gamma = vec![0.0; frames];
        } else if is_reference_measured(joint.id) {
            decode_face_joint(
                skeleton,
                config,
                relaxed_face,
                tracks,
                i,
                &mut alpha,
                &mut beta,
                &mut gamma,
            )?;
        } else {
            // 骨長比 × 正準単位のボーンを親の復元座標へ積む
            let parent = joint.parent.expect("非ルート関節は親を持つ");
            let l = joint.bone_ratio * unit;
            let rotated: Vec<Vector3<f64>> = (0..frames)
                .map(|t| {
                    tracks[parent].rotated[t]
                        + Vector3::new(
                            alpha[t].cos() * l,
                            beta[t].cos() * l,
                            gamma[t].cos() * l,
                        )
                })
                .collect();
            if Region::of(joint.id) == Region::Face {
                // 頭アンカー2点の中立参照点は定数として保持する
                tracks[i].face_rotated =
                    vec![relaxed_face.point(joint.id)?; frames];
            }
            tracks[i].rotated = rotated;
            // 骨長のある関節は復元座標から角度を再導出して整合を取る
            if joint.bone_ratio != 0.0 {
                let eps = if Region::of(joint.id).is_hand() {
                    HAND_LEN_EPS
                } else {
                    LEN_EPS
                };
                for t in 0..frames {
                    let d = tracks[i].rotated[t] - tracks[parent].rotated[t];
                    let len = d.norm() + eps;
                    alpha[t] = (d.x / len).clamp(-1.0, 1.0).acos();
                    beta[t] = (d.y / len).clamp(-1.0, 1.0).acos();
                    gamma[t] = (d.z / len).clamp(-1.0, 1.0).acos();
                }
            }
            let track = &mut tracks[i];
            track.alpha = alpha;
            track.beta = beta;
            track.gamma = gamma;
        }

        let rel = if joint.level >= 3 {
            decoded_relative_angles(skeleton, tracks, i)?
        } else {
            vec![0.0; frames]
        };
        let track = &mut tracks[i];
        track.color = track
            .alpha
            .iter()
            .zip(track.beta.iter().zip(track.gamma.iter()))
            .map(|(&a, (&b, &g))| [angle_to_u8(a), angle_to_u8(b), angle_to_u8(g)])
            .collect();
        track.relative_color = rel.iter().map(|&a| relative_angle_to_rgb(a)).collect();
        track.rel = rel;
        track.state = TrackState::Encoded;
    }
    Ok(())
}

fn dequantize_row(gram: &Array2<u8>, row: usize) -> Vec<f64> {
    gram.row(row).iter().map(|&v| u8_to_angle(v)).collect()
}

fn is_reference_measured(id: u32) -> bool {
    Region::of(id) == Region::Face && id != FACE_FORWARD_ID && id != FACE_UP_ID
}

/// 顔ランドマークの復元。中立参照点まわりに復元した点を、復元済み頭
/// アンカーボーンに合わせた逆頭回転で体幹空間へ写す
#[allow(clippy::too_many_arguments)]
fn decode_face_joint(
    skeleton: &Skeleton,
    config: &PipelineConfig,
    relaxed_face: &RelaxedFace,
    tracks: &mut [JointTrack],
    index: usize,
    alpha: &mut [f64],
    beta: &mut [f64],
    gamma: &mut [f64],
) -> Result<()> {
    let joint = skeleton.joint(index);
    let parent = joint.parent.expect("顔関節は親を持つ");
    let anchor = skeleton.index_of(FACE_ANCHOR_ID)?;
    let forward = skeleton.index_of(FACE_FORWARD_ID)?;
    let up = skeleton.index_of(FACE_UP_ID)?;
    let c = relaxed_face.point(joint.id)?;
    let c_forward = relaxed_face.point(FACE_FORWARD_ID)?;
    let c_up = relaxed_face.point(FACE_UP_ID)?;
    let l = c.norm() + LEN_EPS;
    let frames = alpha.len();

    // 感度増幅を戻してから参照点まわりに復元する
    let face_rotated: Vec<Vector3<f64>> = (0..frames)
        .map(|t| {
            let a = deamplify(alpha[t], config.face_gain);
            let b = deamplify(beta[t], config.face_gain);
            let g = deamplify(gamma[t], config.face_gain);
            c + Vector3::new(a.cos() * l, b.cos() * l, g.cos() * l)
        })
        .collect();

    let mut rotated = Vec::with_capacity(frames);
    for t in 0..frames {
        // 復元済みアンカーから頭の向きを導き、参照座標系を重ねる回転を解く
        let head_forward = tracks[forward].rotated[t] - tracks[anchor].rotated[t];
        let head_up = tracks[up].rotated[t] - tracks[anchor].rotated[t];
        let m = face_rotation(
            &homogeneous(&c_forward),
            &homogeneous(&head_forward),
            &homogeneous(&c_up),
            &homogeneous(&head_up),
        );
        let coeff = (head_forward.norm() / (c_forward.norm() + LEN_EPS)).abs();
        let mapped = (m * homogeneous(&face_rotated[t])).xyz() * coeff;
        rotated.push(tracks[parent].rotated[t] + mapped);
    }

    // 角度は参照点からの変位で再導出する (符号化と同一の計算)
    for t in 0..frames {
        let d = face_rotated[t] - c;
        alpha[t] = amplify((d.x / l).clamp(-1.0, 1.0).acos(), config.face_gain);
        beta[t] = amplify((d.y / l).clamp(-1.0, 1.0).acos(), config.face_gain);
        gamma[t] = amplify((d.z / l).clamp(-1.0, 1.0).acos(), config.face_gain);
    }

    let track = &mut tracks[index];
    track.face_rotated = face_rotated;
    track.rotated = rotated;
    track.alpha = alpha.to_vec();
    track.beta = beta.to_vec();
    track.gamma = gamma.to_vec();
    Ok(())
}

fn homogeneous(v: &Vector3<f64>) -> Vector4<f64> {
    Vector4::new(v.x, v.y, v.z, 1.0)
}

/// 相対角の再導出 (符号化側と同じ基準点対を使う)
fn decoded_relative_angles(
    skeleton: &Skeleton,
    tracks: &[JointTrack],
    index: usize,
) -> Result<Vec<f64>> {
    let (pivot, reference) = crate::codec::relative_pivot(skeleton, index)?;
    let frames = tracks[index].rotated.len();
    let mut out = Vec::with_capacity(frames);
    for t in 0..frames {
        let v1 = tracks[index].rotated[t] - tracks[pivot].rotated[t];
        let v2 = tracks[reference].rotated[t] - tracks[pivot].rotated[t];
        out.push(angle_between(&v1, &v2));
    }
    Ok(out)
}
