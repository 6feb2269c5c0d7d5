use crate::models::{
    common::{Position2D, Velocity2D},
    traits::IMovable,
};

/// ターゲット状態
///
/// 追跡対象の真の位置と等速直線運動の速度、連続ロスト数、
/// 直前に選択されたセンサー、最後に探知に成功した位置、経過ステップ数を保持します。
/// エピソードのリセット時に生成され、1ステップごとに環境から更新されます。
#[derive(Debug, Clone, PartialEq)]
pub struct TargetState {
    /// 真の位置
    pub position: Position2D,
    /// 速度ベクトル（エピソード中は一定）
    pub velocity: Velocity2D,
    /// 連続ロスト数
    pub consecutive_misses: u32,
    /// 直前に選択されたセンサーのインデックス
    pub last_action: usize,
    /// 最後に探知に成功した位置
    pub last_detected: Position2D,
    /// 経過ステップ数
    pub steps: u32,
}

impl TargetState {
    /// 新しいターゲット状態を作成します
    ///
    /// # 引数
    ///
    /// * `position` - 初期位置（少なくとも1基のセンサーにカバーされていること）
    /// * `velocity` - 等速直線運動の速度
    /// * `initial_action` - 初期位置をカバーするセンサーのインデックス
    pub fn new(position: Position2D, velocity: Velocity2D, initial_action: usize) -> Self {
        Self {
            position,
            velocity,
            consecutive_misses: 0,
            last_action: initial_action,
            last_detected: position,
            steps: 0,
        }
    }

    /// 探知成功の記録
    pub fn record_detection(&mut self) {
        self.consecutive_misses = 0;
        self.last_detected = self.position;
    }

    /// 探知失敗の記録
    ///
    /// # 戻り値
    ///
    /// 今回の失敗を加算する前の連続ロスト数
    pub fn record_miss(&mut self) -> u32 {
        let previous = self.consecutive_misses;
        self.consecutive_misses += 1;
        previous
    }
}

impl IMovable for TargetState {
    fn move_agent(&mut self, dt: f64) {
        // 等速直線運動
        self.position = self.position + self.velocity * dt;
        self.steps += 1;
    }

    fn get_position(&self) -> Position2D {
        self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_agent() {
        let mut target = TargetState::new(Position2D::new(50.0, 50.0), Velocity2D::new(1.0, -2.0), 0);
        target.move_agent(1.0);
        target.move_agent(1.0);
        assert_eq!(target.get_position(), Position2D::new(52.0, 46.0));
        assert_eq!(target.steps, 2);
        assert_eq!(target.last_detected, Position2D::new(50.0, 50.0));
    }

    #[test]
    fn test_miss_counter() {
        let mut target = TargetState::new(Position2D::new(0.0, 0.0), Velocity2D::new(0.0, 0.0), 1);
        assert_eq!(target.record_miss(), 0);
        assert_eq!(target.record_miss(), 1);
        target.record_detection();
        assert_eq!(target.consecutive_misses, 0);
    }
}
