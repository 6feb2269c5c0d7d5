use crate::models::common::*;

/// 移動可能なエージェントのインターフェース
pub trait IMovable {
    /// 移動処理（オイラー積分）
    fn move_agent(&mut self, dt: f64);

    /// 現在位置の取得
    fn get_position(&self) -> Position2D;
}

/// センサーのインターフェース
pub trait ISensor {
    /// 探知範囲の取得
    fn get_detection_range(&self) -> f64;

    /// センサー位置の取得
    fn get_sensor_position(&self) -> Position2D;

    /// 指定位置までの距離
    fn distance_to(&self, position: &Position2D) -> f64 {
        self.get_sensor_position().distance(position)
    }

    /// 指定位置が探知範囲内かどうか（境界を含む）
    fn covers(&self, position: &Position2D) -> bool {
        self.distance_to(position) <= self.get_detection_range()
    }
}
