use crate::models::{
    common::{Position2D, Region2D},
    traits::ISensor,
};

/// センサー
///
/// 固定位置に設置された探知範囲付きのレーダー型センサーです。
/// 構築後は不変で、環境が所有し他のコンポーネントからは読み取り専用です。
#[derive(Debug, Clone, PartialEq)]
pub struct Sensor {
    /// センサーの一意識別子（行動インデックスと一致）
    pub id: u32,
    /// センサーの2次元位置
    pub position: Position2D,
    /// 探知範囲（円形半径、0以上）
    pub range: f64,
    /// 無線ノードアドレス（スケジューラ側リンクで使用）
    pub address: Option<u16>,
}

impl Sensor {
    /// 新しいセンサーを作成します
    pub fn new(id: u32, position: Position2D, range: f64) -> Self {
        Self {
            id,
            position,
            range,
            address: None,
        }
    }

    /// 無線ノードアドレスを設定
    pub fn with_address(mut self, address: u16) -> Self {
        self.address = Some(address);
        self
    }

    /// 近接ボーナスの計算
    ///
    /// 探知範囲内で中心に近いほど大きくなり、最大2.0、範囲外では0。
    pub fn proximity_bonus(&self, distance: f64) -> f64 {
        if self.range <= 0.0 {
            return 0.0;
        }
        ((self.range - distance) / self.range * 2.0).max(0.0)
    }
}

impl ISensor for Sensor {
    fn get_detection_range(&self) -> f64 {
        self.range
    }

    fn get_sensor_position(&self) -> Position2D {
        self.position
    }
}

/// センサー配置
///
/// 複数のセンサーを一括管理し、カバレッジ判定を提供します。
/// センサーのインデックスが行動（action）に対応します。
#[derive(Debug, Clone, PartialEq)]
pub struct SensorLayout {
    pub sensors: Vec<Sensor>,
}

impl SensorLayout {
    pub fn new(sensors: Vec<Sensor>) -> Self {
        Self { sensors }
    }

    /// 標準配置（3基）
    pub fn reference() -> Self {
        Self::new(vec![
            Sensor::new(0, Position2D::new(30.0, 50.0), 50.0),
            Sensor::new(1, Position2D::new(60.0, 80.0), 50.0),
            Sensor::new(2, Position2D::new(50.0, 30.0), 45.0),
        ])
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Sensor> {
        self.sensors.get(index)
    }

    /// 指定位置をカバーしているセンサーのインデックス一覧
    pub fn covering(&self, position: &Position2D) -> Vec<usize> {
        self.sensors
            .iter()
            .enumerate()
            .filter(|(_, sensor)| sensor.covers(position))
            .map(|(index, _)| index)
            .collect()
    }

    /// 指定位置が少なくとも1基のセンサーにカバーされているか
    pub fn is_covered(&self, position: &Position2D) -> bool {
        self.sensors.iter().any(|sensor| sensor.covers(position))
    }

    /// 領域と交差する探知範囲を持つセンサーが存在するか
    ///
    /// 存在しない場合、リセット時の棄却サンプリングは終了しません。
    pub fn intersects_region(&self, region: &Region2D) -> bool {
        self.sensors
            .iter()
            .any(|sensor| sensor.range > 0.0 && region.distance_to(&sensor.position) < sensor.range)
    }

    /// 無線アドレスからセンサーインデックスを逆引き
    pub fn index_of_address(&self, address: u16) -> Option<usize> {
        self.sensors.iter().position(|s| s.address == Some(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_covers_boundary() {
        let sensor = Sensor::new(0, Position2D::new(0.0, 0.0), 5.0);
        assert!(sensor.covers(&Position2D::new(3.0, 4.0)));
        assert!(!sensor.covers(&Position2D::new(3.0, 4.1)));
    }

    #[test]
    fn test_proximity_bonus() {
        let sensor = Sensor::new(0, Position2D::new(0.0, 0.0), 50.0);
        assert_eq!(sensor.proximity_bonus(0.0), 2.0);
        assert_eq!(sensor.proximity_bonus(25.0), 1.0);
        assert_eq!(sensor.proximity_bonus(60.0), 0.0);
    }

    #[test]
    fn test_reference_layout_coverage() {
        let layout = SensorLayout::reference();
        assert_eq!(layout.len(), 3);
        assert_eq!(layout.covering(&Position2D::new(30.0, 50.0)), vec![0, 1, 2]);
        assert!(!layout.is_covered(&Position2D::new(100.0, 0.0)));
        assert!(layout.intersects_region(&Region2D::new(0.0, 100.0, 0.0, 100.0)));
        assert!(!layout.intersects_region(&Region2D::new(500.0, 600.0, 500.0, 600.0)));
    }

    #[test]
    fn test_index_of_address() {
        let layout = SensorLayout::new(vec![
            Sensor::new(0, Position2D::new(0.0, 0.0), 10.0).with_address(10),
            Sensor::new(1, Position2D::new(5.0, 0.0), 10.0).with_address(11),
        ]);
        assert_eq!(layout.index_of_address(11), Some(1));
        assert_eq!(layout.index_of_address(99), None);
    }
}
