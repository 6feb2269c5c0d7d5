use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::models::{Position2D, Region2D, Sensor, SensorLayout};

/// シナリオメタデータ
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScenarioMeta {
    pub version: String,
    pub name: String,
    pub description: String,
}

impl Default for ScenarioMeta {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            name: "reference".to_string(),
            description: "3基のセンサーによる単一ターゲット追跡".to_string(),
        }
    }
}

/// 追跡環境の設定
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EnvConfig {
    /// 時間刻み
    pub dt_s: f64,
    /// 連続ロストによる終了判定の閾値
    pub k_loss: u32,
    /// 1エピソードの最大ステップ数
    pub max_steps: u32,
    /// 乱数シード
    pub seed: u64,
    /// ターゲット生成領域
    pub spawn_rect: RegionRect,
    /// 速度成分の最大絶対値
    pub max_speed_component: f64,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            dt_s: 1.0,
            k_loss: 3,
            max_steps: 200,
            seed: 42,
            spawn_rect: RegionRect::default(),
            max_speed_component: 5.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegionRect {
    pub xmin: f64,
    pub xmax: f64,
    pub ymin: f64,
    pub ymax: f64,
}

impl Default for RegionRect {
    fn default() -> Self {
        Self {
            xmin: 0.0,
            xmax: 100.0,
            ymin: 0.0,
            ymax: 100.0,
        }
    }
}

impl RegionRect {
    pub fn to_region(&self) -> Region2D {
        Region2D::new(self.xmin, self.xmax, self.ymin, self.ymax)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PositionConfig {
    pub x: f64,
    pub y: f64,
}

/// センサー設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SensorConfig {
    pub id: u32,
    pub pos: PositionConfig,
    pub range: f64,
    #[serde(default)]
    pub address: Option<u16>,
}

/// 模擬デバイスの使用モード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MockMode {
    /// すべて実機
    None,
    /// LoRaのみ模擬
    Lora,
    /// センサーのみ模擬
    Sensor,
    /// LoRaとセンサーの両方を模擬
    Both,
}

impl MockMode {
    pub fn mocks_lora(&self) -> bool {
        matches!(self, MockMode::Lora | MockMode::Both)
    }

    pub fn mocks_sensor(&self) -> bool {
        matches!(self, MockMode::Sensor | MockMode::Both)
    }
}

impl FromStr for MockMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "0" => Ok(MockMode::None),
            "lora" | "1" => Ok(MockMode::Lora),
            "sensor" | "2" => Ok(MockMode::Sensor),
            "both" | "3" => Ok(MockMode::Both),
            _ => Err(format!("無効な模擬モード: {}. 利用可能: none, lora, sensor, both", s)),
        }
    }
}

/// シリアルリンク設定
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LinkConfig {
    /// LoRaモジュールのシリアルポート
    pub lora_port: String,
    /// ローカルセンサーのシリアルポート
    pub sensor_port: String,
    pub baudrate: u32,
    /// ポート読み取りタイムアウト（ミリ秒）
    pub read_timeout_ms: u64,
    /// 自ノードアドレス
    pub addr_local: u16,
    /// 送信先ノードアドレス
    pub addr_target: u16,
    /// 電源コマンドの送信元として受け付けるノード
    pub power_origin: u16,
    /// 受信待ちの全体タイムアウト（秒）
    pub reading_timeout_s: f64,
    pub mock: MockMode,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            lora_port: "/dev/ttyUSB0".to_string(),
            sensor_port: "/dev/ttyUSB1".to_string(),
            baudrate: 9600,
            read_timeout_ms: 100,
            addr_local: 1,
            addr_target: 10,
            power_origin: 9,
            reading_timeout_s: 3.0,
            mock: MockMode::None,
        }
    }
}

/// 方策の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    Fixed,
    Random,
    Nearest,
}

impl FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fixed" => Ok(PolicyKind::Fixed),
            "random" => Ok(PolicyKind::Random),
            "nearest" => Ok(PolicyKind::Nearest),
            _ => Err(format!("無効な方策: {}. 利用可能: fixed, random, nearest", s)),
        }
    }
}

/// 方策設定
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub kind: PolicyKind,
    /// Fixed方策で選択し続けるセンサー
    pub fixed_action: usize,
    pub seed: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            kind: PolicyKind::Nearest,
            fixed_action: 0,
            seed: 7,
        }
    }
}

/// 完全なシナリオ設定
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub meta: ScenarioMeta,
    pub env: EnvConfig,
    pub sensors: Vec<SensorConfig>,
    pub link: LinkConfig,
    pub policy: PolicyConfig,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        let sensors = [(0, 30.0, 50.0, 50.0, 10), (1, 60.0, 80.0, 50.0, 11), (2, 50.0, 30.0, 45.0, 12)]
            .into_iter()
            .map(|(id, x, y, range, address)| SensorConfig {
                id,
                pos: PositionConfig { x, y },
                range,
                address: Some(address),
            })
            .collect();

        Self {
            meta: ScenarioMeta::default(),
            env: EnvConfig::default(),
            sensors,
            link: LinkConfig::default(),
            policy: PolicyConfig::default(),
        }
    }
}

impl ScenarioConfig {
    /// YAMLファイルからシナリオ設定を読み込み
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();

        // ファイル存在チェック
        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.to_path_buf()));
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| ScenarioError::IoError(path.to_path_buf(), e))?;

        let config: ScenarioConfig = serde_yaml::from_str(&contents)
            .map_err(|e| ScenarioError::ParseError(path.to_path_buf(), e))?;

        config.validate()?;

        Ok(config)
    }

    /// 設定の検証
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if !is_positive(self.env.dt_s) {
            return Err(ScenarioError::ValidationError("dt_s must be positive".to_string()));
        }
        if self.env.k_loss == 0 {
            return Err(ScenarioError::ValidationError("k_loss must be at least 1".to_string()));
        }
        if self.env.max_steps == 0 {
            return Err(ScenarioError::ValidationError("max_steps must be at least 1".to_string()));
        }
        if !(self.env.max_speed_component.is_finite() && self.env.max_speed_component >= 0.0) {
            return Err(ScenarioError::ValidationError("max_speed_component must be finite and not negative".to_string()));
        }

        let rect = &self.env.spawn_rect;
        let finite_rect = [rect.xmin, rect.xmax, rect.ymin, rect.ymax].iter().all(|v| v.is_finite());
        if !finite_rect || rect.xmin >= rect.xmax || rect.ymin >= rect.ymax {
            return Err(ScenarioError::ValidationError("Invalid spawn_rect bounds".to_string()));
        }

        if self.sensors.is_empty() {
            return Err(ScenarioError::ValidationError("At least one sensor is required".to_string()));
        }

        let mut ids = HashSet::new();
        for sensor in &self.sensors {
            if !(sensor.range.is_finite() && sensor.range >= 0.0) {
                return Err(ScenarioError::ValidationError(
                    format!("Sensor {} has invalid range {}", sensor.id, sensor.range)
                ));
            }
            if !(sensor.pos.x.is_finite() && sensor.pos.y.is_finite()) {
                return Err(ScenarioError::ValidationError(
                    format!("Sensor {} has a non-finite position", sensor.id)
                ));
            }
            if !ids.insert(sensor.id) {
                return Err(ScenarioError::ValidationError(
                    format!("Duplicate sensor id {}", sensor.id)
                ));
            }
        }

        // 生成領域を一切カバーしない配置ではリセットが終了しない
        if !self.sensor_layout().intersects_region(&rect.to_region()) {
            return Err(ScenarioError::ValidationError(
                "No sensor covers any part of spawn_rect".to_string()
            ));
        }

        if self.policy.kind == PolicyKind::Fixed && self.policy.fixed_action >= self.sensors.len() {
            return Err(ScenarioError::ValidationError(
                format!("fixed_action {} is out of range (sensors: {})", self.policy.fixed_action, self.sensors.len())
            ));
        }

        if !is_positive(self.link.reading_timeout_s) {
            return Err(ScenarioError::ValidationError("reading_timeout_s must be positive".to_string()));
        }

        Ok(())
    }

    /// センサー配置を構築（設定の並び順が行動インデックスになる）
    pub fn sensor_layout(&self) -> SensorLayout {
        let sensors = self.sensors
            .iter()
            .map(|config| {
                let sensor = Sensor::new(config.id, Position2D::new(config.pos.x, config.pos.y), config.range);
                match config.address {
                    Some(address) => sensor.with_address(address),
                    None => sensor,
                }
            })
            .collect();
        SensorLayout::new(sensors)
    }

    /// シナリオの概要を表示
    pub fn print_summary(&self) {
        println!("=== シナリオ情報 ===");
        println!("名前: {}", self.meta.name);
        println!("説明: {}", self.meta.description);
        println!("バージョン: {}", self.meta.version);
        println!();

        println!("=== 環境設定 ===");
        println!("時間刻み: {:.3}", self.env.dt_s);
        println!("ロスト閾値: {}ステップ", self.env.k_loss);
        println!("最大ステップ数: {}", self.env.max_steps);
        println!("シード値: {}", self.env.seed);
        let rect = &self.env.spawn_rect;
        println!("生成領域: x=[{:.1}, {:.1}] y=[{:.1}, {:.1}]", rect.xmin, rect.xmax, rect.ymin, rect.ymax);
        println!();

        println!("=== センサー ===");
        for sensor in &self.sensors {
            let address = sensor.address.map(|a| a.to_string()).unwrap_or_else(|| "-".to_string());
            println!("  {}: ({:.1}, {:.1}) 範囲 {:.1} アドレス {}",
                     sensor.id, sensor.pos.x, sensor.pos.y, sensor.range, address);
        }
        println!();

        println!("=== リンク ===");
        println!("LoRa: {} / センサー: {} ({} baud)", self.link.lora_port, self.link.sensor_port, self.link.baudrate);
        println!("自ノード: {} / 送信先: {}", self.link.addr_local, self.link.addr_target);
        println!("模擬モード: {:?}", self.link.mock);
        println!("方策: {:?}", self.policy.kind);
    }
}

/// 有限かつ正の値か（NaN と無限大は不可）
fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// シナリオ読み込みエラー
#[derive(Debug)]
pub enum ScenarioError {
    FileNotFound(std::path::PathBuf),
    IoError(std::path::PathBuf, std::io::Error),
    ParseError(std::path::PathBuf, serde_yaml::Error),
    ValidationError(String),
}

impl std::fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScenarioError::FileNotFound(path) => {
                write!(f, "シナリオファイルが見つかりません: {}", path.display())
            }
            ScenarioError::IoError(path, err) => {
                write!(f, "ファイル読み込みエラー {}: {}", path.display(), err)
            }
            ScenarioError::ParseError(path, err) => {
                write!(f, "YAML解析エラー {}: {}", path.display(), err)
            }
            ScenarioError::ValidationError(msg) => {
                write!(f, "設定検証エラー: {}", msg)
            }
        }
    }
}

impl std::error::Error for ScenarioError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = ScenarioConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sensor_layout().len(), 3);
        assert_eq!(config.env.k_loss, 3);
        assert_eq!(config.env.max_steps, 200);
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
env:
  max_steps: 50
sensors:
  - id: 0
    pos: { x: 10.0, y: 10.0 }
    range: 20.0
link:
  mock: both
"#;
        let config: ScenarioConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.env.max_steps, 50);
        assert_eq!(config.env.k_loss, 3);
        assert_eq!(config.sensors.len(), 1);
        assert_eq!(config.sensors[0].address, None);
        assert_eq!(config.link.mock, MockMode::Both);
        assert_eq!(config.link.baudrate, 9600);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = ScenarioConfig::default();
        config.sensors[1].id = 0;
        assert!(matches!(config.validate(), Err(ScenarioError::ValidationError(_))));

        let mut config = ScenarioConfig::default();
        config.sensors.clear();
        assert!(config.validate().is_err());

        let mut config = ScenarioConfig::default();
        config.env.spawn_rect = RegionRect { xmin: 1000.0, xmax: 1100.0, ymin: 1000.0, ymax: 1100.0 };
        assert!(config.validate().is_err());

        let mut config = ScenarioConfig::default();
        config.policy.kind = PolicyKind::Fixed;
        config.policy.fixed_action = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_finite_values_rejected() {
        let mut config = ScenarioConfig::default();
        config.link.reading_timeout_s = f64::NAN;
        assert!(matches!(config.validate(), Err(ScenarioError::ValidationError(_))));

        let mut config = ScenarioConfig::default();
        config.link.reading_timeout_s = f64::INFINITY;
        assert!(config.validate().is_err());

        let mut config = ScenarioConfig::default();
        config.env.dt_s = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = ScenarioConfig::default();
        config.env.max_speed_component = f64::INFINITY;
        assert!(config.validate().is_err());

        let mut config = ScenarioConfig::default();
        config.sensors[0].range = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = ScenarioConfig::default();
        config.env.spawn_rect.xmax = f64::INFINITY;
        assert!(config.validate().is_err());

        // YAML の .nan / .inf も同じ扱い
        let yaml = "link:\n  reading_timeout_s: .nan\n";
        let config: ScenarioConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
        let yaml = "env:\n  dt_s: .inf\n";
        let config: ScenarioConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = ScenarioConfig::from_file("does/not/exist.yaml");
        assert!(matches!(result, Err(ScenarioError::FileNotFound(_))));
    }

    #[test]
    fn test_bundled_scenarios() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios");
        let reference = ScenarioConfig::from_file(dir.join("reference.yaml")).unwrap();
        assert_eq!(reference.sensor_layout(), ScenarioConfig::default().sensor_layout());
        let mock = ScenarioConfig::from_file(dir.join("mock_field.yaml")).unwrap();
        assert_eq!(mock.link.mock, MockMode::Both);
        assert_eq!(mock.policy.kind, PolicyKind::Random);
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!(MockMode::from_str("BOTH"), Ok(MockMode::Both));
        assert_eq!(MockMode::from_str("2"), Ok(MockMode::Sensor));
        assert!(MockMode::from_str("x").is_err());
        assert!(MockMode::Both.mocks_lora() && MockMode::Both.mocks_sensor());
        assert_eq!(PolicyKind::from_str("random"), Ok(PolicyKind::Random));
    }
}
