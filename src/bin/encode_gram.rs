use anyhow::{bail, Result};
use std::path::Path;

use posegram::{Config, Gram, Movement, MovementInput, RelaxedFace, Skeleton};

const CONFIG_PATH: &str = "config.toml";

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    // Usage: encode_gram <landmarks.json> <relaxed_face.json> <out.json> [--signal]
    if args.len() < 4 {
        println!("使い方: encode_gram <landmarks.json> <relaxed_face.json> <out.json> [--signal]");
        println!("  --signal  量子化せず生の角度 (ラジアン) で出力する");
        bail!("引数が足りません");
    }
    let as_signal = args.iter().any(|a| a == "--signal");

    let config = if Path::new(CONFIG_PATH).exists() {
        Config::load(CONFIG_PATH)?
    } else {
        Config::default()
    };

    println!("=== ポーズグラム符号化 ===");
    println!("入力: {}", args[1]);
    let input = MovementInput::load(&args[1])?;
    println!(
        "  フレーム数: {} (顔: {}, 右手: {}, 左手: {})",
        input.frames(),
        if input.has_face() { "あり" } else { "なし" },
        if input.has_right_hand() { "あり" } else { "なし" },
        if input.has_left_hand() { "あり" } else { "なし" },
    );

    let relaxed_face = RelaxedFace::load(&args[2])?;
    let mut movement = Movement::new(Skeleton::standard()?, relaxed_face, config.pipeline);
    movement.process(&input)?;

    let scale = movement.scale();
    let min = scale.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = scale.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    println!("  体格スケール: {:.1} 〜 {:.1}", min, max);

    let json = if as_signal {
        let gram = movement.posegram_signal()?;
        println!("  出力形状: {:?} (ラジアン)", gram.shape());
        serde_json::to_string(&gram)?
    } else {
        let gram = movement.posegram()?;
        println!("  出力形状: {:?} (量子化u8)", gram.shape());
        serde_json::to_string(&gram)?
    };
    std::fs::write(&args[3], json)?;
    println!("保存しました: {}", args[3]);

    // 往復検証: 量子化グラムを復号して角度の整合を確認する
    if !as_signal {
        let gram = movement.posegram()?;
        let mut decoded = Movement::new(
            Skeleton::standard()?,
            RelaxedFace::load(&args[2])?,
            Config::default().pipeline,
        );
        decoded.from_gram(&Gram::Quantized(gram))?;
        println!("復号検証: {} フレームを復元しました", decoded.frames());
    }
    Ok(())
}
