//! 座標正規化
//!
//! ルートから葉へ再帰的に、親からの相対位置を骨長拘束で3D復元する。
//! 横方向 (x, y) は生データの差分から取り、奥行き (z) は
//! `sqrt(|l² - dx² - dy²|)` で再構成して生の奥行き差分の符号に合わせる。
//! 体幹・手は各軸を移動平均で平滑化し、顔は欠測フレームを線形補間する。

use anyhow::Result;
use nalgebra::{Vector3, Vector4};

use crate::config::PipelineConfig;
use crate::filter::{interpolate_zeros, smooth_out};
use crate::movement::{JointTrack, TrackState};
use crate::skeleton::topology::{
    FACE_ANCHOR_ID, HAND_BASIC_OFFSETS, HAND_PROBE_OFFSET, HAND_TRIANGLE_BASES,
    LEFT_ELBOW_ID, LEFT_SHOULDER_ID, LEFT_WRIST_ID, RIGHT_ELBOW_ID,
    RIGHT_SHOULDER_ID, RIGHT_WRIST_ID,
};
use crate::skeleton::{Region, Skeleton};

/// 距離計算のゼロ除算保護
const DIST_EPS: f64 = 1e-5;

/// フレームごとの肩間3D距離。比率正規化出力の分母として先にキャッシュする
pub fn shoulder_width(skeleton: &Skeleton, tracks: &[JointTrack]) -> Result<Vec<f64>> {
    let right = &tracks[skeleton.index_of(RIGHT_SHOULDER_ID)?];
    let left = &tracks[skeleton.index_of(LEFT_SHOULDER_ID)?];
    Ok(right
        .raw
        .iter()
        .zip(left.raw.iter())
        .map(|(a, b)| dist3d(a, b))
        .collect())
}

fn dist3d(a: &Vector4<f64>, b: &Vector4<f64>) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    let dz = a.z - b.z;
    (dx * dx + dy * dy + dz * dz + DIST_EPS).sqrt()
}

/// 正規化パス本体。行きがけ順に親の結果へ積み上げる
pub fn normalize_pass(
    skeleton: &Skeleton,
    config: &PipelineConfig,
    scale: &[f64],
    shoulder_width: &[f64],
    tracks: &mut [JointTrack],
) -> Result<()> {
    let frames = scale.len();
    for i in 0..skeleton.len() {
        if tracks[i].state == TrackState::Normalized {
            // 手首基点の処理で先行計算済みの指付け根
            continue;
        }
        let joint = skeleton.joint(i);
        match Region::of(joint.id) {
            Region::Root => {
                tracks[i].normed = vec![Vector4::new(0.0, 0.0, 0.0, 1.0); frames];
            }
            Region::Torso => {
                let normed = torso_normed(skeleton, config, scale, tracks, i);
                tracks[i].normed = normed;
            }
            Region::RightHand | Region::LeftHand => {
                normalize_hand_joint(skeleton, config, scale, shoulder_width, tracks, i)?;
            }
            Region::FaceAnchor | Region::Face => {
                let normed = face_normed(skeleton, tracks, i, joint.id);
                tracks[i].normed = normed;
            }
        }
        tracks[i].basic = basic_coords(tracks, i, shoulder_width);
        tracks[i].state = TrackState::Normalized;
    }
    Ok(())
}

/// 肩幅基準の比率正規化座標 (診断用)
fn basic_coords(
    tracks: &[JointTrack],
    index: usize,
    shoulder_width: &[f64],
) -> Vec<Vector3<f64>> {
    let root = &tracks[0];
    tracks[index]
        .raw
        .iter()
        .zip(root.raw.iter())
        .zip(shoulder_width.iter())
        .map(|((p, r), &w)| Vector3::new(p.x - r.x, p.y - r.y, p.z - r.z) / w)
        .collect()
}

/// 体幹関節: 生の横差分 + 骨長拘束による奥行き復元
fn torso_normed(
    skeleton: &Skeleton,
    config: &PipelineConfig,
    scale: &[f64],
    tracks: &[JointTrack],
    index: usize,
) -> Vec<Vector4<f64>> {
    let joint = skeleton.joint(index);
    let parent = joint.parent.expect("体幹関節は親を持つ");
    let frames = scale.len();
    let mut xs = Vec::with_capacity(frames);
    let mut ys = Vec::with_capacity(frames);
    let mut zs = Vec::with_capacity(frames);
    for t in 0..frames {
        let raw = &tracks[index].raw[t];
        let praw = &tracks[parent].raw[t];
        let l = joint.bone_ratio * scale[t];
        let dx = raw.x - praw.x;
        let dy = raw.y - praw.y;
        let mut dz = (l * l - dx * dx - dy * dy).abs().sqrt();
        // 肘関節は親との差分ではなく生の奥行きそのものを符号基準にする
        let z_ref = if joint.id == RIGHT_ELBOW_ID || joint.id == LEFT_ELBOW_ID {
            raw.z
        } else {
            raw.z - praw.z
        };
        if z_ref < 0.0 {
            dz = -dz;
        }
        xs.push(dx);
        ys.push(dy);
        zs.push(dz);
    }
    smooth_axes(&mut xs, &mut ys, &mut zs, config.smooth_window);
    assemble_on_parent(&tracks[parent].normed, &xs, &ys, &zs)
}

/// 手の関節をまとめて処理する。手首基点 (x00) の訪問時に指の付け根と
/// 深度符号を先行計算し、残りの関節は符号を適用してから積み上げる
fn normalize_hand_joint(
    skeleton: &Skeleton,
    config: &PipelineConfig,
    scale: &[f64],
    shoulder_width: &[f64],
    tracks: &mut [JointTrack],
    index: usize,
) -> Result<()> {
    let joint = skeleton.joint(index);
    let base_id = (joint.id / 100) * 100;
    let wrist_id = if Region::of(joint.id) == Region::RightHand {
        RIGHT_WRIST_ID
    } else {
        LEFT_WRIST_ID
    };
    let base_index = skeleton.index_of(base_id)?;

    if joint.id == base_id {
        // 基点と指付け根は生の奥行き差分で符号決定する
        for &offset in &HAND_BASIC_OFFSETS {
            let ji = skeleton.index_of(base_id + offset)?;
            let normed = hand_basic_normed(skeleton, config, scale, tracks, ji, wrist_id)?;
            tracks[ji].normed = normed;
            tracks[ji].basic = basic_coords(tracks, ji, shoulder_width);
            tracks[ji].state = TrackState::Normalized;
        }
        tracks[base_index].depth_sign =
            hand_depth_sign(skeleton, scale, tracks, base_id, wrist_id)?;
        return Ok(());
    }

    // 指付け根は先行計算済み (state ガードで外側が飛ばす)
    let sign = tracks[base_index].depth_sign.clone();
    let parent = joint.parent.expect("手の関節は親を持つ");
    let frames = scale.len();
    let mut xs = Vec::with_capacity(frames);
    let mut ys = Vec::with_capacity(frames);
    let mut zs = Vec::with_capacity(frames);
    for t in 0..frames {
        let (x, y, mut z) =
            hand_bone_candidate(&tracks[index].raw[t], &tracks[parent].raw[t], joint.bone_ratio * scale[t]);
        z *= sign[t];
        xs.push(x);
        ys.push(y);
        zs.push(z);
    }
    smooth_axes(&mut xs, &mut ys, &mut zs, config.smooth_window);
    tracks[index].normed = assemble_on_parent(&tracks[parent].normed, &xs, &ys, &zs);
    Ok(())
}

/// 球面投影した骨ベクトル候補 (符号補正前、z は正)
fn hand_bone_candidate(raw: &Vector4<f64>, praw: &Vector4<f64>, l: f64) -> (f64, f64, f64) {
    let dx = raw.x - praw.x;
    let dy = raw.y - praw.y;
    let or3d = dist3d(raw, praw);
    let x = l * dx / or3d;
    let y = l * dy / or3d;
    let z = (l * l - x * x - y * y).abs().sqrt();
    (x, y, z)
}

/// 手首基点・指付け根の正規化。奥行き符号は体幹手首からの生差分で決める
fn hand_basic_normed(
    skeleton: &Skeleton,
    config: &PipelineConfig,
    scale: &[f64],
    tracks: &[JointTrack],
    index: usize,
    wrist_id: u32,
) -> Result<Vec<Vector4<f64>>> {
    let joint = skeleton.joint(index);
    let parent = joint.parent.expect("手の関節は親を持つ");
    let wrist = skeleton.index_of(wrist_id)?;
    let frames = scale.len();
    let mut xs = Vec::with_capacity(frames);
    let mut ys = Vec::with_capacity(frames);
    let mut zs = Vec::with_capacity(frames);
    for t in 0..frames {
        let raw = &tracks[index].raw[t];
        let (x, y, mut z) =
            hand_bone_candidate(raw, &tracks[parent].raw[t], joint.bone_ratio * scale[t]);
        if raw.z - tracks[wrist].raw[t].z < 0.0 {
            z = -z;
        }
        xs.push(x);
        ys.push(y);
        zs.push(z);
    }
    smooth_axes(&mut xs, &mut ys, &mut zs, config.smooth_window);
    Ok(assemble_on_parent(&tracks[parent].normed, &xs, &ys, &zs))
}

/// 検出器の左右反転曖昧性の補正符号。手のひらの基準三角形
/// (手首, 人差し指付け根, 小指付け根) の法線に対する中指プローブの
/// 射影符号で、手全体の奥行き反転を決める
fn hand_depth_sign(
    skeleton: &Skeleton,
    scale: &[f64],
    tracks: &[JointTrack],
    base_id: u32,
    wrist_id: u32,
) -> Result<Vec<f64>> {
    let p0 = skeleton.index_of(base_id)?;
    let p1 = skeleton.index_of(base_id + HAND_TRIANGLE_BASES[0])?;
    let p2 = skeleton.index_of(base_id + HAND_TRIANGLE_BASES[1])?;
    let probe = skeleton.index_of(base_id + HAND_PROBE_OFFSET)?;
    let probe_joint = skeleton.joint(probe);
    let probe_parent = probe_joint.parent.expect("プローブ関節は親を持つ");
    let frames = scale.len();
    let mut sign = Vec::with_capacity(frames);
    for t in 0..frames {
        let a = tracks[p0].normed[t].xyz();
        let u = tracks[p1].normed[t].xyz() - a;
        let v = tracks[p2].normed[t].xyz() - a;
        let normal = u.cross(&v);
        let (x, y, z) = hand_bone_candidate(
            &tracks[probe].raw[t],
            &tracks[probe_parent].raw[t],
            probe_joint.bone_ratio * scale[t],
        );
        let mut projection = Vector3::new(x, y, z).dot(&normal);
        if wrist_id == RIGHT_WRIST_ID {
            projection = -projection;
        }
        sign.push(if projection < 0.0 { -1.0 } else { 1.0 });
    }
    Ok(sign)
}

/// 顔関節: 生差分を欠測補間して親へ積む。頭アンカーの奥行きは親に固定
fn face_normed(
    skeleton: &Skeleton,
    tracks: &[JointTrack],
    index: usize,
    id: u32,
) -> Vec<Vector4<f64>> {
    let parent = skeleton.joint(index).parent.expect("顔関節は親を持つ");
    let frames = tracks[index].raw.len();
    let mut xs = Vec::with_capacity(frames);
    let mut ys = Vec::with_capacity(frames);
    let mut zs = Vec::with_capacity(frames);
    for t in 0..frames {
        let raw = &tracks[index].raw[t];
        let praw = &tracks[parent].raw[t];
        xs.push(raw.x - praw.x);
        ys.push(raw.y - praw.y);
        zs.push(raw.z - praw.z);
    }
    if frames > 1 {
        xs = interpolate_zeros(&xs);
        ys = interpolate_zeros(&ys);
        zs = interpolate_zeros(&zs);
    }
    let mut out = assemble_on_parent(&tracks[parent].normed, &xs, &ys, &zs);
    if id == FACE_ANCHOR_ID {
        // 顔は頭アンカー平面に平坦化する
        for p in &mut out {
            p.z = 0.0;
        }
    }
    out
}

fn smooth_axes(xs: &mut Vec<f64>, ys: &mut Vec<f64>, zs: &mut Vec<f64>, window: usize) {
    if xs.len() > 1 {
        *xs = smooth_out(xs, window);
        *ys = smooth_out(ys, window);
        *zs = smooth_out(zs, window);
    }
}

fn assemble_on_parent(
    parent_normed: &[Vector4<f64>],
    xs: &[f64],
    ys: &[f64],
    zs: &[f64],
) -> Vec<Vector4<f64>> {
    parent_normed
        .iter()
        .zip(xs.iter().zip(ys.iter().zip(zs.iter())))
        .map(|(p, (&x, (&y, &z)))| Vector4::new(p.x + x, p.y + y, p.z + z, 1.0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::JointTrack;

    fn setup(frames: usize) -> (Skeleton, Vec<JointTrack>) {
        let skeleton = Skeleton::standard().unwrap();
        let mut tracks: Vec<JointTrack> = (0..skeleton.len())
            .map(|_| JointTrack::new_empty())
            .collect();
        for track in &mut tracks {
            track.raw = vec![Vector4::zeros(); frames];
            track.state = TrackState::Extracted;
        }
        (skeleton, tracks)
    }

    fn set_raw(
        skeleton: &Skeleton,
        tracks: &mut [JointTrack],
        id: u32,
        t: usize,
        x: f64,
        y: f64,
        z: f64,
    ) {
        let i = skeleton.index_of(id).unwrap();
        tracks[i].raw[t] = Vector4::new(x, y, z, 1.0);
    }

    #[test]
    fn test_bone_length_constraint_single_frame() {
        let (skeleton, mut tracks) = setup(1);
        // ルート(肩中心)は原点、右肩は横へ40・下へ10
        set_raw(&skeleton, &mut tracks, 2, 0, -40.0, 10.0, 5.0);
        let scale = vec![100.0];
        let width = vec![80.0];
        normalize_pass(&skeleton, &PipelineConfig::default(), &scale, &width, &mut tracks)
            .unwrap();
        let i = skeleton.index_of(2).unwrap();
        let d = tracks[i].normed[0].xyz();
        // 骨長比0.5 × スケール100 = 50
        assert!((d.norm() - 50.0).abs() < 1e-9);
        assert_eq!(d.x, -40.0);
        assert_eq!(d.y, 10.0);
        assert!(d.z > 0.0);
    }

    #[test]
    fn test_depth_sign_follows_raw_difference() {
        let (skeleton, mut tracks) = setup(1);
        set_raw(&skeleton, &mut tracks, 2, 0, -40.0, 0.0, 0.0);
        // 肘 (3) は生の奥行きそのものが符号基準
        set_raw(&skeleton, &mut tracks, 3, 0, -60.0, 30.0, -8.0);
        let scale = vec![100.0];
        let width = vec![80.0];
        normalize_pass(&skeleton, &PipelineConfig::default(), &scale, &width, &mut tracks)
            .unwrap();
        let i2 = skeleton.index_of(2).unwrap();
        let i3 = skeleton.index_of(3).unwrap();
        let dz = tracks[i3].normed[0].z - tracks[i2].normed[0].z;
        assert!(dz < 0.0);
    }

    #[test]
    fn test_face_anchor_is_planar() {
        let (skeleton, mut tracks) = setup(1);
        set_raw(&skeleton, &mut tracks, 999, 0, 5.0, -60.0, 25.0);
        let scale = vec![100.0];
        let width = vec![80.0];
        normalize_pass(&skeleton, &PipelineConfig::default(), &scale, &width, &mut tracks)
            .unwrap();
        let i = skeleton.index_of(999).unwrap();
        assert_eq!(tracks[i].normed[0].z, 0.0);
        assert_eq!(tracks[i].normed[0].x, 5.0);
    }

    #[test]
    fn test_face_joint_gap_interpolation() {
        let (skeleton, mut tracks) = setup(3);
        for t in 0..3 {
            set_raw(&skeleton, &mut tracks, 999, t, 0.0, -60.0, 0.0);
        }
        // 中間フレームだけ欠測 (ゼロ)
        set_raw(&skeleton, &mut tracks, 1078, 0, 4.0, -70.0, 0.0);
        set_raw(&skeleton, &mut tracks, 1078, 2, 8.0, -74.0, 0.0);
        let scale = vec![100.0; 3];
        let width = vec![80.0; 3];
        normalize_pass(&skeleton, &PipelineConfig::default(), &scale, &width, &mut tracks)
            .unwrap();
        let i = skeleton.index_of(1078).unwrap();
        // 999 との差分 x: 4 → 補間 → 8
        let x1 = tracks[i].normed[1].x - tracks[skeleton.index_of(999).unwrap()].normed[1].x;
        assert!((x1 - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_hand_depth_sign_mirrors_entire_hand() {
        let (skeleton, mut tracks) = setup(1);
        // 体幹: 手首 (4) を適当な位置に
        set_raw(&skeleton, &mut tracks, 2, 0, -40.0, 0.0, 0.0);
        set_raw(&skeleton, &mut tracks, 3, 0, -60.0, 40.0, 5.0);
        set_raw(&skeleton, &mut tracks, 4, 0, -70.0, 90.0, 10.0);
        // 手のひら: 付け根三角形が手前向きになる配置
        set_raw(&skeleton, &mut tracks, 400, 0, -70.0, 90.0, 10.0);
        set_raw(&skeleton, &mut tracks, 405, 0, -75.0, 110.0, 12.0);
        set_raw(&skeleton, &mut tracks, 417, 0, -55.0, 108.0, 12.0);
        set_raw(&skeleton, &mut tracks, 409, 0, -70.0, 112.0, 12.0);
        set_raw(&skeleton, &mut tracks, 410, 0, -70.0, 122.0, 14.0);
        let scale = vec![100.0];
        let width = vec![80.0];
        normalize_pass(&skeleton, &PipelineConfig::default(), &scale, &width, &mut tracks)
            .unwrap();
        let base = skeleton.index_of(400).unwrap();
        assert_eq!(tracks[base].depth_sign.len(), 1);
        let s = tracks[base].depth_sign[0];
        assert!(s == 1.0 || s == -1.0);
        // 符号は付け根以外の手関節の奥行きに一貫して掛かる
        let i410 = skeleton.index_of(410).unwrap();
        let i409 = skeleton.index_of(409).unwrap();
        let dz = tracks[i410].normed[0].z - tracks[i409].normed[0].z;
        if s < 0.0 {
            assert!(dz <= 0.0);
        } else {
            assert!(dz >= 0.0);
        }
    }

    #[test]
    fn test_shoulder_width_cached() {
        let (skeleton, mut tracks) = setup(2);
        for t in 0..2 {
            set_raw(&skeleton, &mut tracks, 2, t, -40.0, 0.0, 0.0);
            set_raw(&skeleton, &mut tracks, 5, t, 40.0, 0.0, 0.0);
        }
        let w = shoulder_width(&skeleton, &tracks).unwrap();
        assert!((w[0] - 80.0).abs() < 1e-3);
    }
}
