//! 正準方向化
//!
//! フレームごとに基準ボーンを固定軸へ合わせる剛体回転 (+スケール) を
//! 計算し、部分木全体へ同じ回転を伝播する。各軸の回転角は対象平面への
//! 射影同士の角度で独立に解き、符号は「適用して残差が増えたら反転する」
//! 2候補比較で曖昧性を除く。
//!
//! - 体幹: 肩ボーン (2/5) を水平軸へ。Y回転 → Z回転の合成
//! - 顔: 頭前方ベクトル (1001) を奥行き軸へ (X→Y)、第二基準 (1006) を
//!   上方向へ (Z)。頭ローカル座標系を確立する

use anyhow::Result;
use nalgebra::{Matrix4, Vector3, Vector4};

use crate::config::PipelineConfig;
use crate::movement::{JointTrack, TrackState};
use crate::skeleton::topology::{
    FACE_FORWARD_ID, FACE_UP_ID, LEFT_SHOULDER_ID, RIGHT_SHOULDER_ID,
};
use crate::skeleton::{Region, Skeleton};

/// 角度計算の分母保護
const ANGLE_EPS: f64 = 1e-10;
/// 再スケール係数の分母保護
const SCALE_EPS: f64 = 1e-6;

#[derive(Debug, Clone, Copy)]
enum Axis {
    X,
    Y,
    Z,
}

fn axis_rotation(axis: Axis, angle: f64) -> Matrix4<f64> {
    let (s, c) = angle.sin_cos();
    match axis {
        Axis::X => Matrix4::new(
            1.0, 0.0, 0.0, 0.0,
            0.0, c, -s, 0.0,
            0.0, s, c, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ),
        Axis::Y => Matrix4::new(
            c, 0.0, s, 0.0,
            0.0, 1.0, 0.0, 0.0,
            -s, 0.0, c, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ),
        Axis::Z => Matrix4::new(
            c, -s, 0.0, 0.0,
            s, c, 0.0, 0.0,
            0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ),
    }
}

/// 回転軸に直交する平面への射影
fn project(axis: Axis, v: &Vector4<f64>) -> [f64; 2] {
    match axis {
        Axis::X => [v.y, v.z],
        Axis::Y => [v.x, v.z],
        Axis::Z => [v.x, v.y],
    }
}

fn angle_2d(a: [f64; 2], b: [f64; 2]) -> f64 {
    let dot = a[0] * b[0] + a[1] * b[1];
    let denom = (a[0] * a[0] + a[1] * a[1]).sqrt()
        * (b[0] * b[0] + b[1] * b[1]).sqrt()
        + ANGLE_EPS;
    (dot / denom).clamp(-1.0, 1.0).acos()
}

/// 1軸回転を2候補 (±角度) で試し、目標への残差が小さい方を返す
fn best_axis_rotation(
    input: &Vector4<f64>,
    target: &Vector4<f64>,
    axis: Axis,
) -> (Vector4<f64>, Matrix4<f64>) {
    let angle = angle_2d(project(axis, input), project(axis, target));
    let m = axis_rotation(axis, angle);
    let rotated = m * input;
    let residual = angle_2d(project(axis, &rotated), project(axis, target));
    if angle < residual {
        let m = axis_rotation(axis, -angle);
        (m * input, m)
    } else {
        (rotated, m)
    }
}

/// 体幹の正準回転: Y回転 → Z回転で入力ベクトルを目標へ合わせる
pub fn torso_rotation(input: &Vector4<f64>, target: &Vector4<f64>) -> Matrix4<f64> {
    let (rotated, my) = best_axis_rotation(input, target, Axis::Y);
    let (_, mz) = best_axis_rotation(&rotated, target, Axis::Z);
    mz * my
}

/// 顔の正準回転: X→Y で前方ベクトルを合わせ、回転後の第二基準を
/// Z回転で上方向ベクトルへ合わせる
pub fn face_rotation(
    input: &Vector4<f64>,
    target: &Vector4<f64>,
    second: &Vector4<f64>,
    second_target: &Vector4<f64>,
) -> Matrix4<f64> {
    let (rotated, mx) = best_axis_rotation(input, target, Axis::X);
    let (_, my) = best_axis_rotation(&rotated, target, Axis::Y);
    let forward = my * mx;
    let second_rotated = forward * second;
    let (_, mz) = best_axis_rotation(&second_rotated, second_target, Axis::Z);
    mz * forward
}

/// 方向化パス本体
pub fn orient_pass(
    skeleton: &Skeleton,
    config: &PipelineConfig,
    scale: &[f64],
    tracks: &mut [JointTrack],
) -> Result<()> {
    let frames = scale.len();
    let right_shoulder = skeleton.index_of(RIGHT_SHOULDER_ID)?;
    let face_forward = if skeleton.contains(FACE_FORWARD_ID) {
        Some(skeleton.index_of(FACE_FORWARD_ID)?)
    } else {
        None
    };
    for i in 0..skeleton.len() {
        let joint = skeleton.joint(i);
        let id = joint.id;
        match Region::of(id) {
            Region::Root => {
                tracks[i].rotated = vec![Vector3::zeros(); frames];
            }
            Region::Face => {
                // 顔ランドマークは体幹空間 (右肩基準) と頭ローカル座標系の
                // 両方を持つ
                let rotated = apply_anchor(&tracks[right_shoulder], &tracks[i].normed);
                tracks[i].rotated = rotated;
                orient_face_joint(skeleton, config, scale, tracks, i, face_forward)?;
            }
            _ => {
                if id == RIGHT_SHOULDER_ID || id == LEFT_SHOULDER_ID {
                    let sign = if id == RIGHT_SHOULDER_ID { -1.0 } else { 1.0 };
                    anchor_rotation(config, scale, &mut tracks[i], joint.bone_ratio, sign);
                } else if let Some(anchor) = joint.orient_anchor {
                    let rotated = apply_anchor(&tracks[anchor], &tracks[i].normed);
                    tracks[i].rotated = rotated;
                } else {
                    // 方向化された先祖を持たない関節は固定オフセット
                    tracks[i].rotated = scale
                        .iter()
                        .map(|&s| Vector3::new(0.0, joint.bone_ratio * s, 0.0))
                        .collect();
                }
            }
        }
        tracks[i].state = TrackState::Rotated;
    }
    Ok(())
}

/// 肩関節の基準回転: 肩ボーンを水平軸 (±x) へ合わせ、目標長へ再スケール
fn anchor_rotation(
    config: &PipelineConfig,
    scale: &[f64],
    track: &mut JointTrack,
    bone_ratio: f64,
    sign: f64,
) {
    let frames = scale.len();
    let mut rotations = Vec::with_capacity(frames);
    let mut rot_scales = Vec::with_capacity(frames);
    let mut rotated = Vec::with_capacity(frames);
    for t in 0..frames {
        let target = Vector4::new(sign * bone_ratio * scale[t], 0.0, 0.0, 1.0);
        let m = torso_rotation(&track.normed[t], &target);
        let rc = m * track.normed[t];
        let coeff = (config.torso_target_len / (rc.x + SCALE_EPS)).abs();
        rotated.push(rc.xyz() * coeff);
        rotations.push(m);
        rot_scales.push(coeff);
    }
    track.rotated = rotated;
    track.rotations = rotations;
    track.rot_scales = rot_scales;
}

/// 先祖の回転 + スケールをそのまま適用する (剛体伝播)
fn apply_anchor(anchor: &JointTrack, normed: &[Vector4<f64>]) -> Vec<Vector3<f64>> {
    normed
        .iter()
        .enumerate()
        .map(|(t, p)| (anchor.rotations[t] * p).xyz() * anchor.rot_scales[t])
        .collect()
}

/// 顔ランドマークの頭ローカル座標系。前方基準 (1001) でフレームごとの
/// 回転を確立し、他の顔関節は同じ回転を親 (999) 相対の座標へ適用する
fn orient_face_joint(
    skeleton: &Skeleton,
    config: &PipelineConfig,
    scale: &[f64],
    tracks: &mut [JointTrack],
    index: usize,
    face_forward: Option<usize>,
) -> Result<()> {
    let Some(forward) = face_forward else {
        return Ok(());
    };
    let joint = skeleton.joint(index);
    let parent = joint.parent.expect("顔関節は親を持つ");
    let frames = scale.len();

    // 親 (頭アンカー) 相対の同次座標
    let head_origin: Vec<Vector4<f64>> = (0..frames)
        .map(|t| {
            let d = tracks[index].normed[t] - tracks[parent].normed[t];
            Vector4::new(d.x, d.y, d.z, 1.0)
        })
        .collect();

    if joint.id == FACE_FORWARD_ID {
        let second_index = skeleton.index_of(FACE_UP_ID)?;
        let second_parent = skeleton
            .joint(second_index)
            .parent
            .expect("顔関節は親を持つ");
        let mut rotations = Vec::with_capacity(frames);
        let mut rot_scales = Vec::with_capacity(frames);
        let mut face_rotated = Vec::with_capacity(frames);
        for t in 0..frames {
            let target = Vector4::new(0.0, 0.0, joint.bone_ratio * scale[t], 1.0);
            let d = tracks[second_index].normed[t] - tracks[second_parent].normed[t];
            let second = Vector4::new(d.x, d.y, d.z, 1.0);
            let second_target = Vector4::new(0.0, -1.0, 0.0, 1.0);
            let m = face_rotation(&head_origin[t], &target, &second, &second_target);
            let rc = m * head_origin[t];
            let coeff = (config.face_target_len / (rc.z + SCALE_EPS)).abs();
            face_rotated.push(rc.xyz() * coeff);
            rotations.push(m);
            rot_scales.push(coeff);
        }
        tracks[index].face_rotated = face_rotated;
        tracks[index].rotations = rotations;
        tracks[index].rot_scales = rot_scales;
    } else {
        let face_rotated = head_origin
            .iter()
            .enumerate()
            .map(|(t, p)| {
                (tracks[forward].rotations[t] * p).xyz() * tracks[forward].rot_scales[t]
            })
            .collect();
        tracks[index].face_rotated = face_rotated;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn approx_eq(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn test_aligned_input_yields_identity() {
        // 既に目標方向を向いたボーンには単位回転 (冪等性)
        let input = Vector4::new(-50.0, 0.0, 0.0, 1.0);
        let target = Vector4::new(-50.0, 0.0, 0.0, 1.0);
        let m = torso_rotation(&input, &target);
        let identity = Matrix4::identity();
        for r in 0..4 {
            for c in 0..4 {
                assert!(
                    approx_eq(m[(r, c)], identity[(r, c)], 1e-9),
                    "({}, {}): {}",
                    r,
                    c,
                    m[(r, c)]
                );
            }
        }
    }

    #[test]
    fn test_torso_rotation_aligns_to_target() {
        let input = Vector4::new(-40.0, 10.0, 20.0, 1.0);
        let target = Vector4::new(-50.0, 0.0, 0.0, 1.0);
        let m = torso_rotation(&input, &target);
        let rotated = m * input;
        // 横軸に乗り、y/z 成分は消える
        assert!(rotated.x < 0.0);
        assert!(approx_eq(rotated.y, 0.0, 1e-6), "y = {}", rotated.y);
        assert!(approx_eq(rotated.z, 0.0, 1e-6), "z = {}", rotated.z);
        // 剛体回転なので長さは保存される
        let len_in = (40.0f64 * 40.0 + 100.0 + 400.0).sqrt();
        assert!(approx_eq(rotated.xyz().norm(), len_in, 1e-9));
    }

    #[test]
    fn test_sign_disambiguation_picks_smaller_residual() {
        // どちらの符号でも解けるケースで、残差が増えない方を選ぶ
        let input = Vector4::new(0.0, 0.0, 30.0, 1.0);
        let target = Vector4::new(30.0, 0.0, 0.0, 1.0);
        let m = torso_rotation(&input, &target);
        let rotated = m * input;
        assert!(approx_eq(rotated.x, 30.0, 1e-6));
        assert!(approx_eq(rotated.z, 0.0, 1e-6));
    }

    #[test]
    fn test_face_rotation_establishes_head_frame() {
        // 前方ベクトルが斜め、第二基準が横を向いた頭
        let forward = Vector4::new(10.0, -5.0, 40.0, 1.0);
        let forward_target = Vector4::new(0.0, 0.0, 42.0, 1.0);
        let second = Vector4::new(-20.0, -25.0, 5.0, 1.0);
        let up_target = Vector4::new(0.0, -1.0, 0.0, 1.0);
        let m = face_rotation(&forward, &forward_target, &second, &up_target);
        let f = m * forward;
        // 前方は奥行き軸に乗る
        assert!(approx_eq(f.x, 0.0, 1e-6), "x = {}", f.x);
        assert!(approx_eq(f.y, 0.0, 1e-6), "y = {}", f.y);
        assert!(f.z > 0.0);
        // 第二基準は上方向 (-y) 側の半平面に入る
        let s = m * second;
        assert!(s.y < 0.0, "y = {}", s.y);
    }

    #[test]
    fn test_axis_rotation_quarter_turn() {
        let m = axis_rotation(Axis::Z, FRAC_PI_2);
        let v = m * Vector4::new(1.0, 0.0, 0.0, 1.0);
        assert!(approx_eq(v.x, 0.0, 1e-12));
        assert!(approx_eq(v.y, 1.0, 1e-12));
    }
}
