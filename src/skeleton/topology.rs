//! 骨格トポロジーの静的定義
//!
//! 関節IDの名前空間:
//! - 1: ルート(肩中心)
//! - 2〜7: 体幹・腕チェーン (右: 2,3,4 / 左: 5,6,7)
//! - 811: 腰中心
//! - 400番台: 右手 / 700番台: 左手 (各21関節)
//! - 999: 顔アンカー(頭中心) / 1000番台: 顔ランドマーク
//!
//! `bone_ratio` は親関節までの距離(体格比の単位)。値はキャリブレーション
//! 済みの定数で、0 は構造上の接続点(ルート・手首・顔の付け根)を表す。

pub const ROOT_ID: u32 = 1;
pub const RIGHT_SHOULDER_ID: u32 = 2;
pub const RIGHT_ELBOW_ID: u32 = 3;
pub const RIGHT_WRIST_ID: u32 = 4;
pub const LEFT_SHOULDER_ID: u32 = 5;
pub const LEFT_ELBOW_ID: u32 = 6;
pub const LEFT_WRIST_ID: u32 = 7;
pub const HIP_CENTER_ID: u32 = 811;
pub const FACE_ANCHOR_ID: u32 = 999;
pub const RIGHT_HAND_BASE: u32 = 400;
pub const LEFT_HAND_BASE: u32 = 700;

/// 顔回転の基準関節(頭前方ベクトル)
pub const FACE_FORWARD_ID: u32 = 1001;
/// 顔回転の第二基準関節(上方向の曖昧性解消)
pub const FACE_UP_ID: u32 = 1006;

/// 肩関節の骨長比
pub const SHOULDER_RATIO: f64 = 0.5;
/// 前腕(肘→手首)の骨長比。手首接続分を含めて較正済み
pub const FOREARM_RATIO: f64 = 0.8359 * 1.15;
/// 顔アンカー(肩中心→頭中心)の骨長比
pub const FACE_ANCHOR_RATIO: f64 = 0.6831011424110601 * 0.6;

/// 体幹関節ID → プロバイダのポーズランドマークインデックス
pub const POSE_LANDMARK_MAP: [(u32, usize); 6] = [
    (RIGHT_SHOULDER_ID, 12),
    (RIGHT_ELBOW_ID, 14),
    (RIGHT_WRIST_ID, 16),
    (LEFT_SHOULDER_ID, 11),
    (LEFT_ELBOW_ID, 13),
    (LEFT_WRIST_ID, 15),
];

// ポーズランドマークインデックス
pub const POSE_LEFT_SHOULDER: usize = 11;
pub const POSE_RIGHT_SHOULDER: usize = 12;
pub const POSE_LEFT_HIP: usize = 23;
pub const POSE_RIGHT_HIP: usize = 24;
pub const POSE_LEFT_EAR: usize = 7;
pub const POSE_RIGHT_EAR: usize = 8;

// 顔メッシュランドマークインデックス
pub const FACE_TEMPLE_RIGHT: usize = 234;
pub const FACE_TEMPLE_LEFT: usize = 454;
/// 左目領域の4点(目中心の平均に使用)
pub const LEFT_EYE_CLUSTER: [usize; 4] = [159, 143, 157, 149];
/// 右目領域の4点
pub const RIGHT_EYE_CLUSTER: [usize; 4] = [384, 386, 379, 372];

// 手のランドマークインデックス
pub const HAND_WRIST: usize = 0;
pub const HAND_THUMB_CMC: usize = 1;

/// 手の各セグメントの骨長比。オフセットは手首基点(x00)からの関節番号で、
/// 1〜4 が親指、5〜8 が人差し指、以降 4 本ずつ。左右共通。
pub const HAND_SEGMENT_RATIOS: [(u32, f64); 20] = [
    (1, 0.08268110413332652),
    (2, 0.09961941283842532),
    (3, 0.08202343020115353),
    (4, 0.06885685889325616),
    (5, 0.2381580797638288),
    (6, 0.1080568422968187),
    (7, 0.0674891818042084),
    (8, 0.061922013487949054),
    (9, 0.24202768593928028),
    (10, 0.11665001533944559),
    (11, 0.07430572174361719),
    (12, 0.06724562587722877),
    (13, 0.23954279196590356),
    (14, 0.10326888890666307),
    (15, 0.06621362662226549),
    (16, 0.06062183423175105),
    (17, 0.2327694272104333),
    (18, 0.08467279556321614),
    (19, 0.050094581739950565),
    (20, 0.04837138025087514),
];

/// 指の付け根関節のオフセット(x00 の直接の子)
pub const HAND_FINGER_BASES: [u32; 5] = [1, 5, 9, 13, 17];

/// 手首基点の訪問時に先行して正規化する関節のオフセット。
/// これらは生の奥行き差分で符号を決め、残りの手関節はプローブ由来の
/// 手全体符号を使う (親指の付け根 x01 は後者)
pub const HAND_BASIC_OFFSETS: [u32; 5] = [0, 5, 9, 13, 17];

/// 深度符号補正で基準三角形に使う2つの付け根(人差し指・小指)
pub const HAND_TRIANGLE_BASES: [u32; 2] = [5, 17];
/// 深度符号補正のプローブ関節(中指第2関節)のオフセット
pub const HAND_PROBE_OFFSET: u32 = 10;

/// 相対角の計測先を手首に置き換える付け根関節のオフセット
pub const KNUCKLE_BASE_OFFSETS: [u32; 4] = [5, 9, 13, 17];

/// 顔アンカー(999)の子関節とその骨長比。順序は正規順 (回転基準の
/// 1001/1006 が先頭、続いて口・目・眉の領域)。全て葉。
pub const FACE_JOINT_RATIOS: [(u32, f64); 86] = [
    (1001, 0.32189085527721384),
    (1006, 0.2650897399291037),
    (1078, 0.2750003234968581),
    (1191, 0.2768000368782006),
    (1080, 0.28226483576536127),
    (1081, 0.2871572000251397),
    (1082, 0.29181732605681954),
    (1013, 0.293626352455436),
    (1312, 0.29143372873223444),
    (1311, 0.28655662923730263),
    (1310, 0.28141732482869725),
    (1415, 0.27572722830198854),
    (1308, 0.273787070112275),
    (1324, 0.2779328925773773),
    (1318, 0.2837659364877235),
    (1402, 0.2885424736978461),
    (1317, 0.29277202838770633),
    (1014, 0.2944574936262247),
    (1087, 0.29286920220168927),
    (1178, 0.2885938155412595),
    (1088, 0.2840304016063443),
    (1095, 0.2788872712466281),
    (1061, 0.2755012725190071),
    (1185, 0.2817372869433164),
    (1040, 0.28760126970423205),
    (1039, 0.2917680441743019),
    (1037, 0.2956774702518987),
    (1000, 0.29897091464597064),
    (1267, 0.2959856206347846),
    (1269, 0.2917981411842897),
    (1270, 0.28705146430049505),
    (1409, 0.28071135385486734),
    (1291, 0.27447771124293135),
    (1375, 0.284910319057354),
    (1321, 0.2967900879787643),
    (1405, 0.30739146457514877),
    (1314, 0.3154737063906793),
    (1017, 0.3166101657726286),
    (1084, 0.31523370928650346),
    (1181, 0.30749741252221846),
    (1091, 0.296721165688954),
    (1146, 0.285274288355511),
    (1033, 0.2326844686592723),
    (1246, 0.23675017303874524),
    (1161, 0.23891048550538768),
    (1160, 0.23999936721547363),
    (1159, 0.23712780827823615),
    (1158, 0.2314336909788791),
    (1157, 0.2216385138802922),
    (1173, 0.21343592319192303),
    (1133, 0.2078742927906687),
    (1155, 0.20910977852901597),
    (1154, 0.21444723794969936),
    (1153, 0.22033872686503078),
    (1145, 0.22520962923738644),
    (1144, 0.2287705282735886),
    (1163, 0.23043039395196085),
    (1007, 0.23152953545672725),
    (1189, 0.22098866838439127),
    (1221, 0.23480325211637454),
    (1222, 0.250337951878886),
    (1223, 0.26024244049604595),
    (1224, 0.2634564530389425),
    (1225, 0.2603001463491855),
    (1362, 0.20838279855191433),
    (1398, 0.21373061929278836),
    (1384, 0.22211272164633708),
    (1385, 0.23229813659866475),
    (1386, 0.23857589829793993),
    (1387, 0.24217663670152922),
    (1388, 0.24167681437930302),
    (1466, 0.23979174819467683),
    (1263, 0.2360954653987609),
    (1249, 0.2348494014643371),
    (1390, 0.23327237906123913),
    (1373, 0.23106403176080104),
    (1374, 0.22633272875410823),
    (1380, 0.22107373959865928),
    (1381, 0.2147661372310292),
    (1382, 0.20938255376225964),
    (1413, 0.22233451176825544),
    (1441, 0.23628249569638507),
    (1442, 0.2529013338797679),
    (1443, 0.263330956428856),
    (1444, 0.2666212441678272),
    (1445, 0.26320590977526453),
];

/// トポロジーの1エントリ: (関節ID, 子関節ID列, 親までの骨長比)
pub type TopologyEntry = (u32, Vec<u32>, f64);

/// 片手のエントリを生成する。`base` は 400 または 700。
fn hand_entries(base: u32) -> Vec<TopologyEntry> {
    let mut entries = Vec::with_capacity(21);
    let bases: Vec<u32> = HAND_FINGER_BASES.iter().map(|o| base + o).collect();
    entries.push((base, bases, 0.0));
    for &(offset, ratio) in &HAND_SEGMENT_RATIOS {
        // 各指は4セグメントのチェーン。末端(4,8,..)は葉
        let children = if offset % 4 == 0 {
            vec![]
        } else {
            vec![base + offset + 1]
        };
        entries.push((base + offset, children, ratio));
    }
    entries
}

/// 標準の全身トポロジー(体幹 + 両手 + 顔、計137関節)
pub fn standard_entries() -> Vec<TopologyEntry> {
    let mut entries: Vec<TopologyEntry> = vec![
        (
            ROOT_ID,
            vec![RIGHT_SHOULDER_ID, LEFT_SHOULDER_ID, HIP_CENTER_ID, FACE_ANCHOR_ID],
            0.0,
        ),
        (RIGHT_SHOULDER_ID, vec![RIGHT_ELBOW_ID], SHOULDER_RATIO),
        (RIGHT_ELBOW_ID, vec![RIGHT_WRIST_ID], 0.86),
        (RIGHT_WRIST_ID, vec![RIGHT_HAND_BASE], FOREARM_RATIO),
        (LEFT_SHOULDER_ID, vec![LEFT_ELBOW_ID], SHOULDER_RATIO),
        (LEFT_ELBOW_ID, vec![LEFT_WRIST_ID], 0.86),
        (LEFT_WRIST_ID, vec![LEFT_HAND_BASE], FOREARM_RATIO),
        (HIP_CENTER_ID, vec![], 1.77),
        (
            FACE_ANCHOR_ID,
            FACE_JOINT_RATIOS.iter().map(|&(id, _)| id).collect(),
            FACE_ANCHOR_RATIO,
        ),
    ];
    entries.extend(hand_entries(RIGHT_HAND_BASE));
    entries.extend(hand_entries(LEFT_HAND_BASE));
    for &(id, ratio) in &FACE_JOINT_RATIOS {
        entries.push((id, vec![], ratio));
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_entry_count() {
        // 体幹9 + 両手42 + 顔86 = 137
        assert_eq!(standard_entries().len(), 137);
    }

    #[test]
    fn test_hand_entries_structure() {
        let entries = hand_entries(400);
        assert_eq!(entries.len(), 21);
        // 手首基点は5本の指の付け根を子に持つ
        assert_eq!(entries[0].0, 400);
        assert_eq!(entries[0].1, vec![401, 405, 409, 413, 417]);
        assert_eq!(entries[0].2, 0.0);
        // 指先は葉
        let tip = entries.iter().find(|e| e.0 == 408).unwrap();
        assert!(tip.1.is_empty());
        // 中間セグメントは次のセグメントへ続く
        let mid = entries.iter().find(|e| e.0 == 406).unwrap();
        assert_eq!(mid.1, vec![407]);
    }

    #[test]
    fn test_face_anchor_children_order() {
        // 回転基準の2関節が先頭
        assert_eq!(FACE_JOINT_RATIOS[0].0, FACE_FORWARD_ID);
        assert_eq!(FACE_JOINT_RATIOS[1].0, FACE_UP_ID);
    }

    #[test]
    fn test_pose_landmark_map_covers_torso_chain() {
        for id in 2..=7 {
            assert!(POSE_LANDMARK_MAP.iter().any(|&(j, _)| j == id));
        }
    }
}
