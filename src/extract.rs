//! ランドマーク抽出
//!
//! プロバイダの4領域バッチを骨格の関節IDへ割り付け、関節ごとの生データ
//! 系列を作る。手は手首基点からの相対位置を体幹の手首関節へ繋ぎ直し、
//! 顔はこめかみ中心からの相対位置を耳由来の頭中心へ繋ぎ直す。未検出の
//! 領域はゼロデータとし、以降の段が失敗しないようにする。

use anyhow::{bail, Result};
use nalgebra::Vector4;
use ndarray::Array3;

use crate::landmark::MovementInput;
use crate::movement::{JointTrack, TrackState};
use crate::skeleton::topology::{
    HAND_THUMB_CMC, HAND_WRIST, LEFT_HAND_BASE, LEFT_WRIST_ID, POSE_LANDMARK_MAP,
    POSE_LEFT_EAR, POSE_LEFT_HIP, POSE_LEFT_SHOULDER, POSE_RIGHT_EAR,
    POSE_RIGHT_HIP, POSE_RIGHT_SHOULDER, FACE_TEMPLE_LEFT, FACE_TEMPLE_RIGHT,
    HIP_CENTER_ID, RIGHT_HAND_BASE, RIGHT_WRIST_ID,
};
use crate::skeleton::{Region, Skeleton};

/// 全関節の生データ系列を抽出する
pub fn extract_pass(
    skeleton: &Skeleton,
    input: &MovementInput,
    tracks: &mut [JointTrack],
) -> Result<()> {
    let frames = input.frames();
    for i in 0..skeleton.len() {
        let joint = skeleton.joint(i);
        let raw = match Region::of(joint.id) {
            Region::Root => {
                pose_pair_mean(&input.pose, POSE_LEFT_SHOULDER, POSE_RIGHT_SHOULDER)
            }
            Region::Torso => torso_datum(input, joint.id)?,
            Region::RightHand => hand_datum(
                skeleton,
                tracks,
                &input.right_hand,
                joint.id,
                RIGHT_HAND_BASE,
                RIGHT_WRIST_ID,
                frames,
            )?,
            Region::LeftHand => hand_datum(
                skeleton,
                tracks,
                &input.left_hand,
                joint.id,
                LEFT_HAND_BASE,
                LEFT_WRIST_ID,
                frames,
            )?,
            Region::FaceAnchor => {
                if input.has_face() {
                    // 頭中心は顔ランドマークより安定な耳のポーズ推定を使う
                    pose_pair_mean(&input.pose, POSE_LEFT_EAR, POSE_RIGHT_EAR)
                } else {
                    vec![Vector4::zeros(); frames]
                }
            }
            Region::Face => face_datum(input, joint.id, frames),
        };
        tracks[i].raw = raw;
        tracks[i].state = TrackState::Extracted;
    }
    Ok(())
}

/// ポーズの2ランドマークの平均 (4成分)
fn pose_pair_mean(pose: &Array3<f64>, a: usize, b: usize) -> Vec<Vector4<f64>> {
    let frames = pose.shape()[0];
    (0..frames)
        .map(|t| {
            Vector4::new(
                (pose[[t, a, 0]] + pose[[t, b, 0]]) * 0.5,
                (pose[[t, a, 1]] + pose[[t, b, 1]]) * 0.5,
                (pose[[t, a, 2]] + pose[[t, b, 2]]) * 0.5,
                (pose[[t, a, 3]] + pose[[t, b, 3]]) * 0.5,
            )
        })
        .collect()
}

fn pose_row(pose: &Array3<f64>, t: usize, idx: usize) -> Vector4<f64> {
    Vector4::new(
        pose[[t, idx, 0]],
        pose[[t, idx, 1]],
        pose[[t, idx, 2]],
        pose[[t, idx, 3]],
    )
}

/// 体幹・腕・腰の関節: 固定の変換表で直接参照する
fn torso_datum(input: &MovementInput, id: u32) -> Result<Vec<Vector4<f64>>> {
    if id == HIP_CENTER_ID {
        return Ok(pose_pair_mean(&input.pose, POSE_LEFT_HIP, POSE_RIGHT_HIP));
    }
    let Some(&(_, landmark)) = POSE_LANDMARK_MAP.iter().find(|&&(j, _)| j == id) else {
        bail!("体幹関節 {} に対応するランドマークがありません", id);
    };
    let frames = input.frames();
    Ok((0..frames).map(|t| pose_row(&input.pose, t, landmark)).collect())
}

/// 手の関節: 手首基点 (ランドマーク0,1の平均) からの相対位置を、
/// 既に抽出済みの体幹手首関節のデータへ繋ぎ直す
fn hand_datum(
    skeleton: &Skeleton,
    tracks: &[JointTrack],
    hand: &Array3<f64>,
    id: u32,
    base: u32,
    wrist_id: u32,
    frames: usize,
) -> Result<Vec<Vector4<f64>>> {
    if hand.shape()[0] == 0 {
        return Ok(vec![Vector4::zeros(); frames]);
    }
    let wrist_track = &tracks[skeleton.index_of(wrist_id)?];
    let landmark = (id - base) as usize;
    let mut out = Vec::with_capacity(frames);
    for t in 0..frames {
        let point = hand_row(hand, t, landmark);
        let wrist_base =
            (hand_row(hand, t, HAND_WRIST) + hand_row(hand, t, HAND_THUMB_CMC)) * 0.5;
        out.push(point - wrist_base + wrist_track.raw[t]);
    }
    Ok(out)
}

fn hand_row(hand: &Array3<f64>, t: usize, idx: usize) -> Vector4<f64> {
    Vector4::new(
        hand[[t, idx, 0]],
        hand[[t, idx, 1]],
        hand[[t, idx, 2]],
        hand[[t, idx, 3]],
    )
}

/// 顔ランドマーク: こめかみ中心からの相対位置を耳由来の頭中心へ繋ぎ直す
fn face_datum(input: &MovementInput, id: u32, frames: usize) -> Vec<Vector4<f64>> {
    if !input.has_face() {
        return vec![Vector4::zeros(); frames];
    }
    let landmark = (id - 1000) as usize;
    let mut out = Vec::with_capacity(frames);
    for t in 0..frames {
        let point = face_row(&input.face, t, landmark);
        let face_center = (face_row(&input.face, t, FACE_TEMPLE_RIGHT)
            + face_row(&input.face, t, FACE_TEMPLE_LEFT))
            * 0.5;
        let head = (pose_row(&input.pose, t, POSE_LEFT_EAR)
            + pose_row(&input.pose, t, POSE_RIGHT_EAR))
            * 0.5;
        out.push(point - face_center + head);
    }
    out
}

fn face_row(face: &Array3<f64>, t: usize, idx: usize) -> Vector4<f64> {
    Vector4::new(
        face[[t, idx, 0]],
        face[[t, idx, 1]],
        face[[t, idx, 2]],
        face[[t, idx, 3]],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmark::{self, MovementInput};
    use crate::movement::JointTrack;
    use ndarray::Array3;

    fn tracks_for(skeleton: &Skeleton) -> Vec<JointTrack> {
        (0..skeleton.len()).map(|_| JointTrack::new_empty()).collect()
    }

    fn input_with_pose(frames: usize) -> MovementInput {
        let mut pose =
            Array3::zeros((frames, landmark::POSE_LANDMARKS, landmark::POSE_VALUES));
        for t in 0..frames {
            pose[[t, POSE_LEFT_SHOULDER, 0]] = 400.0;
            pose[[t, POSE_LEFT_SHOULDER, 1]] = 200.0;
            pose[[t, POSE_RIGHT_SHOULDER, 0]] = 300.0;
            pose[[t, POSE_RIGHT_SHOULDER, 1]] = 200.0;
            pose[[t, 16, 0]] = 240.0;
            pose[[t, 16, 1]] = 350.0;
        }
        MovementInput::from_pose(pose)
    }

    #[test]
    fn test_root_is_shoulder_center() {
        let skeleton = Skeleton::standard().unwrap();
        let mut tracks = tracks_for(&skeleton);
        extract_pass(&skeleton, &input_with_pose(2), &mut tracks).unwrap();
        let root = &tracks[0];
        assert_eq!(root.raw[0].x, 350.0);
        assert_eq!(root.raw[0].y, 200.0);
    }

    #[test]
    fn test_missing_hand_region_yields_zero_datum() {
        let skeleton = Skeleton::standard().unwrap();
        let mut tracks = tracks_for(&skeleton);
        extract_pass(&skeleton, &input_with_pose(3), &mut tracks).unwrap();
        let idx = skeleton.index_of(405).unwrap();
        assert!(tracks[idx].raw.iter().all(|v| v.norm() == 0.0));
    }

    #[test]
    fn test_hand_reanchored_on_torso_wrist() {
        let skeleton = Skeleton::standard().unwrap();
        let mut tracks = tracks_for(&skeleton);
        let mut input = input_with_pose(1);
        let mut hand =
            Array3::zeros((1, landmark::HAND_LANDMARKS, landmark::LANDMARK_VALUES));
        // 手首基点 (0,1 の平均) = (100, 100)、人差し指付け根 = (110, 90)
        hand[[0, 0, 0]] = 100.0;
        hand[[0, 0, 1]] = 100.0;
        hand[[0, 1, 0]] = 100.0;
        hand[[0, 1, 1]] = 100.0;
        hand[[0, 5, 0]] = 110.0;
        hand[[0, 5, 1]] = 90.0;
        input.right_hand = hand;
        extract_pass(&skeleton, &input, &mut tracks).unwrap();
        // 手首相対 (+10, -10) が体幹手首 (240, 350) に繋がる
        let idx = skeleton.index_of(405).unwrap();
        assert_eq!(tracks[idx].raw[0].x, 250.0);
        assert_eq!(tracks[idx].raw[0].y, 340.0);
    }

    #[test]
    fn test_all_joints_extracted() {
        let skeleton = Skeleton::standard().unwrap();
        let mut tracks = tracks_for(&skeleton);
        extract_pass(&skeleton, &input_with_pose(2), &mut tracks).unwrap();
        assert!(tracks
            .iter()
            .all(|t| t.state == TrackState::Extracted && t.raw.len() == 2));
    }
}
