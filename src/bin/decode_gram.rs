use anyhow::{bail, Result};
use ndarray::Array2;
use std::path::Path;

use posegram::{Config, Gram, Movement, RelaxedFace, Skeleton};

const CONFIG_PATH: &str = "config.toml";

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    // Usage: decode_gram <gram.json> <relaxed_face.json> [out_signal.json]
    if args.len() < 3 {
        println!("使い方: decode_gram <gram.json> <relaxed_face.json> [out_signal.json]");
        bail!("引数が足りません");
    }

    let config = if Path::new(CONFIG_PATH).exists() {
        Config::load(CONFIG_PATH)?
    } else {
        Config::default()
    };

    println!("=== ポーズグラム復号 ===");
    let content = std::fs::read_to_string(&args[1])?;
    let gram: Array2<u8> = serde_json::from_str(&content)?;
    println!("入力形状: {:?}", gram.shape());

    let relaxed_face = RelaxedFace::load(&args[2])?;
    let mut movement = Movement::new(Skeleton::standard()?, relaxed_face, config.pipeline);
    movement.from_gram(&Gram::Quantized(gram))?;
    println!("復元フレーム数: {}", movement.frames());

    // 代表関節の復元座標を表示 (最初のフレーム)
    for id in [2u32, 4, 400, 999] {
        let track = movement.track(id)?;
        let p = track.rotated[0];
        println!(
            "  関節{:>4}: ({:>8.1}, {:>8.1}, {:>8.1})  α={:.3}",
            id, p.x, p.y, p.z, track.alpha[0]
        );
    }

    if let Some(out) = args.get(3) {
        let signal = movement.posegram_signal()?;
        std::fs::write(out, serde_json::to_string(&signal)?)?;
        println!("再導出シグナルを保存しました: {}", out);
    }
    Ok(())
}
