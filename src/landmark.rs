//! ランドマーク入力スキーマ
//!
//! プロバイダが返す4領域 (ポーズ・顔・左右の手) のフレームバッチ。
//! ポーズは 33点 × 7値 (x, y, z, visibility, world-x, world-y, world-z)、
//! 顔は 478点 (精細化なしなら468点) × 4値、手は各 21点 × 4値。
//! x/y はピクセル座標、z は画像幅でスケールし符号反転済み (カメラから
//! 遠いほど正)。未検出の領域は空配列で表し、該当フレームの関節はゼロ
//! データとして扱う。

use anyhow::{bail, Context, Result};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const POSE_LANDMARKS: usize = 33;
pub const POSE_VALUES: usize = 7;
pub const FACE_LANDMARKS: usize = 478;
pub const FACE_LANDMARKS_BASIC: usize = 468;
pub const HAND_LANDMARKS: usize = 21;
pub const LANDMARK_VALUES: usize = 4;

/// 4領域のランドマークバッチ。次元は (フレーム, 点, 値)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementInput {
    pub pose: Array3<f64>,
    pub face: Array3<f64>,
    pub right_hand: Array3<f64>,
    pub left_hand: Array3<f64>,
}

impl MovementInput {
    /// ポーズのみのバッチを作る。他領域は未検出扱い
    pub fn from_pose(pose: Array3<f64>) -> Self {
        Self {
            pose,
            face: empty_region(),
            right_hand: empty_region(),
            left_hand: empty_region(),
        }
    }

    pub fn frames(&self) -> usize {
        self.pose.shape()[0]
    }

    pub fn has_face(&self) -> bool {
        self.face.shape()[0] > 0
    }

    pub fn has_right_hand(&self) -> bool {
        self.right_hand.shape()[0] > 0
    }

    pub fn has_left_hand(&self) -> bool {
        self.left_hand.shape()[0] > 0
    }

    /// 形状とフレーム数の整合を検証する。不整合は入力エラー
    pub fn validate(&self) -> Result<()> {
        let frames = self.frames();
        if frames == 0 {
            bail!("ポーズ領域が空です (最低1フレーム必要)");
        }
        let pose_shape = self.pose.shape();
        if pose_shape[1] != POSE_LANDMARKS || pose_shape[2] != POSE_VALUES {
            bail!(
                "ポーズ形状が不正です: {:?} (期待: [T, {}, {}])",
                pose_shape, POSE_LANDMARKS, POSE_VALUES
            );
        }
        if self.has_face() {
            let s = self.face.shape();
            let points_ok = s[1] == FACE_LANDMARKS || s[1] == FACE_LANDMARKS_BASIC;
            if !points_ok || s[2] != LANDMARK_VALUES {
                bail!("顔形状が不正です: {:?}", s);
            }
            if s[0] != frames {
                bail!("顔のフレーム数 {} がポーズ {} と一致しません", s[0], frames);
            }
        }
        for (name, hand) in [("右手", &self.right_hand), ("左手", &self.left_hand)] {
            let s = hand.shape();
            if s[0] == 0 {
                continue;
            }
            if s[1] != HAND_LANDMARKS || s[2] != LANDMARK_VALUES {
                bail!("{}の形状が不正です: {:?}", name, s);
            }
            if s[0] != frames {
                bail!("{}のフレーム数 {} がポーズ {} と一致しません", name, s[0], frames);
            }
        }
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("ランドマークファイルを読めません: {:?}", path.as_ref()))?;
        let input: MovementInput = serde_json::from_str(&content)?;
        input.validate()?;
        Ok(input)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string(self)?;
        fs::write(path.as_ref(), json)
            .with_context(|| format!("ランドマークファイルを書けません: {:?}", path.as_ref()))?;
        Ok(())
    }
}

/// 未検出領域を表す空バッチ
pub fn empty_region() -> Array3<f64> {
    Array3::zeros((0, 0, 0))
}

/// プロバイダの正規化座標 (0..1) を入力スキーマの座標へ変換する。
/// z は画像幅でスケールして符号を反転する
pub fn scale_landmark(x: f64, y: f64, z: f64, visibility: f64, width: f64, height: f64) -> [f64; 4] {
    [x * width, y * height, -z * width, visibility]
}

/// ワールド座標 (メートル) を入力スキーマの単位へ変換する
pub fn scale_world_landmark(x: f64, y: f64, z: f64) -> [f64; 3] {
    [x * 100.0, y * 100.0, -z * 100.0]
}
