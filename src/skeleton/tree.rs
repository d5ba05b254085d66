//! アリーナ方式の骨格ツリー
//!
//! 関節は行きがけ順 (pre-order) の配列に格納し、親子関係はインデックスで
//! 持つ。親は必ず子より前に現れるため、ルートから葉への伝播は配列の
//! 先頭から順に処理するだけでよい。

use anyhow::{bail, Result};
use std::collections::HashMap;

use super::topology::{self, TopologyEntry};

/// 関節の所属領域。IDの名前空間で決まる
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Root,
    /// 体幹・腕・腰 (2〜7, 811)
    Torso,
    RightHand,
    LeftHand,
    /// 顔アンカー (999)
    FaceAnchor,
    /// 顔ランドマーク (1000番台)
    Face,
}

impl Region {
    pub fn of(id: u32) -> Region {
        match id {
            1 => Region::Root,
            400..=499 => Region::RightHand,
            700..=799 => Region::LeftHand,
            999 => Region::FaceAnchor,
            1000.. => Region::Face,
            _ => Region::Torso,
        }
    }

    /// 手領域か
    pub fn is_hand(self) -> bool {
        matches!(self, Region::RightHand | Region::LeftHand)
    }
}

/// 関節の静的定義
#[derive(Debug, Clone)]
pub struct JointDef {
    pub id: u32,
    /// 親のアリーナインデックス (ルートは None)
    pub parent: Option<usize>,
    /// 子のアリーナインデックス列 (定義順)
    pub children: Vec<usize>,
    /// 親までの骨長比 (構造上の接続点は 0)
    pub bone_ratio: f64,
    /// ルートからの深さ
    pub level: u32,
    /// 回転を継承する先祖 (肩関節 2/5) のアリーナインデックス
    pub orient_anchor: Option<usize>,
}

/// 行きがけ順アリーナの骨格
#[derive(Debug, Clone)]
pub struct Skeleton {
    joints: Vec<JointDef>,
    by_id: HashMap<u32, usize>,
}

impl Skeleton {
    /// 標準の全身骨格 (体幹 + 両手 + 顔)
    pub fn standard() -> Result<Self> {
        Self::from_entries(&topology::standard_entries())
    }

    /// トポロジーテーブルから構築する。未知の子IDや重複IDはエラー
    pub fn from_entries(entries: &[TopologyEntry]) -> Result<Self> {
        let table: HashMap<u32, &TopologyEntry> =
            entries.iter().map(|e| (e.0, e)).collect();
        if table.len() != entries.len() {
            bail!("トポロジーに重複した関節IDがあります");
        }
        let root_id = entries
            .first()
            .map(|e| e.0)
            .ok_or_else(|| anyhow::anyhow!("トポロジーが空です"))?;

        let mut joints: Vec<JointDef> = Vec::with_capacity(entries.len());
        let mut by_id: HashMap<u32, usize> = HashMap::with_capacity(entries.len());

        // 明示的なスタックで行きがけ順に展開
        let mut stack: Vec<(u32, Option<usize>)> = vec![(root_id, None)];
        while let Some((id, parent)) = stack.pop() {
            let Some(entry) = table.get(&id) else {
                bail!("未知の関節IDです: {}", id);
            };
            let children = &entry.1;
            let bone_ratio = entry.2;
            if by_id.contains_key(&id) {
                bail!("関節ID {} がツリー内に複数回現れます", id);
            }
            let index = joints.len();
            let level = parent.map_or(0, |p| joints[p].level + 1);
            // 肩関節自身が回転の基準。その下の全関節は同じ基準を継承する
            let orient_anchor = match parent {
                Some(p) => {
                    let pid = joints[p].id;
                    if pid == topology::RIGHT_SHOULDER_ID
                        || pid == topology::LEFT_SHOULDER_ID
                    {
                        Some(p)
                    } else {
                        joints[p].orient_anchor
                    }
                }
                None => None,
            };
            by_id.insert(id, index);
            if let Some(p) = parent {
                joints[p].children.push(index);
            }
            joints.push(JointDef {
                id,
                parent,
                children: Vec::new(),
                bone_ratio,
                level,
                orient_anchor,
            });
            // 子は定義順で辿りたいので逆順に積む
            for &child in children.iter().rev() {
                stack.push((child, Some(index)));
            }
        }

        if joints.len() != entries.len() {
            bail!(
                "ルートから到達できない関節があります ({}/{})",
                joints.len(),
                entries.len()
            );
        }
        Ok(Self { joints, by_id })
    }

    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    /// アリーナインデックスで関節定義を取得
    pub fn joint(&self, index: usize) -> &JointDef {
        &self.joints[index]
    }

    /// 関節IDからアリーナインデックスを引く。未知のIDはエラー
    pub fn index_of(&self, id: u32) -> Result<usize> {
        match self.by_id.get(&id) {
            Some(&i) => Ok(i),
            None => bail!("未知の関節IDです: {}", id),
        }
    }

    pub fn contains(&self, id: u32) -> bool {
        self.by_id.contains_key(&id)
    }

    /// 行きがけ順の全関節 (アリーナ順そのもの)
    pub fn iter(&self) -> impl Iterator<Item = (usize, &JointDef)> {
        self.joints.iter().enumerate()
    }

    /// 相対角を持つ関節 (レベル3以上) のインデックス列、行きがけ順
    pub fn relative_joints(&self) -> Vec<usize> {
        self.joints
            .iter()
            .enumerate()
            .filter(|(_, j)| j.level >= 3)
            .map(|(i, _)| i)
            .collect()
    }

    /// 指定関節が `ancestor_id` の子孫かどうか (親チェーンを辿る)
    pub fn is_descendant_of(&self, index: usize, ancestor_id: u32) -> bool {
        let mut cur = self.joints[index].parent;
        while let Some(p) = cur {
            if self.joints[p].id == ancestor_id {
                return true;
            }
            cur = self.joints[p].parent;
        }
        false
    }
}
