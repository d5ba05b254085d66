use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// パイプラインの較正定数
///
/// いずれも経験的に調整された値で、導出式は存在しない。既定値は較正済みの
/// 実測値なので通常は変更不要。
#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// 目間距離から体格スケールを求める比率
    #[serde(default = "default_eye_ratio")]
    pub eye_ratio: f64,
    /// 顔が検出できない場合の既定スケール (骨長比と同じ単位)
    #[serde(default = "default_fallback_scale")]
    pub fallback_scale: f64,
    /// ライブモードのスケール更新ヒステリシス閾値
    #[serde(default = "default_scale_threshold")]
    pub scale_threshold: f64,
    /// 座標平滑化の移動平均ウィンドウ幅 (フレーム数)
    #[serde(default = "default_smooth_window")]
    pub smooth_window: usize,
    /// 顔角度の感度増幅係数 (中立姿勢まわりのレンジ拡大)
    #[serde(default = "default_face_gain")]
    pub face_gain: f64,
    /// 正準化後の肩ボーンの目標長
    #[serde(default = "default_torso_target_len")]
    pub torso_target_len: f64,
    /// 正準化後の頭前方ベクトルの目標長
    #[serde(default = "default_face_target_len")]
    pub face_target_len: f64,
}

fn default_eye_ratio() -> f64 { 0.237 }
fn default_fallback_scale() -> f64 { 98.0 }
fn default_scale_threshold() -> f64 { 3.0 }
fn default_smooth_window() -> usize { 5 }
fn default_face_gain() -> f64 { 4.0 }
fn default_torso_target_len() -> f64 { 100.0 }
fn default_face_target_len() -> f64 { 150.0 }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            eye_ratio: default_eye_ratio(),
            fallback_scale: default_fallback_scale(),
            scale_threshold: default_scale_threshold(),
            smooth_window: default_smooth_window(),
            face_gain: default_face_gain(),
            torso_target_len: default_torso_target_len(),
            face_target_len: default_face_target_len(),
        }
    }
}

impl PipelineConfig {
    /// 正準空間での骨長比1あたりの長さ。肩ボーン(比0.5)が目標長に
    /// 届くよう再スケールされるため 目標長/0.5 に一致する
    pub fn canonical_unit(&self) -> f64 {
        self.torso_target_len / crate::skeleton::topology::SHOULDER_RATIO
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let c = PipelineConfig::default();
        assert_eq!(c.eye_ratio, 0.237);
        assert_eq!(c.fallback_scale, 98.0);
        assert_eq!(c.scale_threshold, 3.0);
        assert_eq!(c.smooth_window, 5);
        assert_eq!(c.face_gain, 4.0);
    }

    #[test]
    fn test_canonical_unit() {
        let c = PipelineConfig::default();
        assert_eq!(c.canonical_unit(), 200.0);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config =
            toml::from_str("[pipeline]\neye_ratio = 0.3\n").unwrap();
        assert_eq!(config.pipeline.eye_ratio, 0.3);
        assert_eq!(config.pipeline.smooth_window, 5);
    }

    #[test]
    fn test_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.pipeline.fallback_scale, 98.0);
    }
}
