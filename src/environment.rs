//! # Environment モジュール
//!
//! 移動ターゲットと固定センサー群による離散時間の追跡環境を提供します。
//!
//! 方策（Policy）が選んだセンサーのインデックスを受け取り、ターゲットを
//! 等速直線運動で1ステップ進め、選ばれたセンサーの探知判定・報酬計算・
//! 終了判定を行って観測を返します。
//!
//! ## 状態遷移
//!
//! - `reset()` : 任意の状態 → `Active`
//! - `step()`  : `Active` → `Active` または `Terminated`
//!
//! ## 報酬設計
//!
//! | 条件 | 報酬 |
//! |------|------|
//! | 探知成功 | +10.0 + 近接ボーナス（最大+2.0） |
//! | 1回目のロスト | -2.0 |
//! | 2回目のロスト | -5.0 |
//! | 3回目以降のロスト | -8.0 |
//! | 直前と同じセンサー | +2.0（加算） |
//! | センサー切り替え | -3.0（加算） |

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use crate::models::{IMovable, ISensor, Position2D, Region2D, SensorLayout, TargetState, Velocity2D};
use crate::scenario::{EnvConfig, ScenarioConfig};

/// 観測ベクトルの次元数
pub const OBS_DIM: usize = 6;

/// 探知成功時の基本報酬
pub const DETECTION_REWARD: f64 = 10.0;

/// 連続ロスト数（加算前、2で頭打ち）ごとの段階的ペナルティ
pub const MISS_PENALTIES: [f64; 3] = [-2.0, -5.0, -8.0];

/// 直前と同じセンサーを選んだ場合のボーナス
pub const STAY_BONUS: f64 = 2.0;

/// センサーを切り替えた場合のペナルティ
pub const SWITCH_PENALTY: f64 = -3.0;

/// 観測
///
/// `(x_t, y_t, x_{t-1}, y_{t-1}, last_sensor_id, lost_flag)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub x: f64,
    pub y: f64,
    pub prev_x: f64,
    pub prev_y: f64,
    pub last_sensor_id: usize,
    pub lost: bool,
}

impl Observation {
    /// 数値方策向けの固定長配列に変換
    pub fn to_array(&self) -> [f32; OBS_DIM] {
        [
            self.x as f32,
            self.y as f32,
            self.prev_x as f32,
            self.prev_y as f32,
            self.last_sensor_id as f32,
            if self.lost { 1.0 } else { 0.0 },
        ]
    }

    /// 現在位置
    pub fn position(&self) -> Position2D {
        Position2D::new(self.x, self.y)
    }

    /// 直前の（最後に探知された）位置
    pub fn previous_position(&self) -> Position2D {
        Position2D::new(self.prev_x, self.prev_y)
    }
}

/// ステップ付加情報
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepInfo {
    pub detect: bool,
    pub distance: f64,
    pub consecutive_misses: u32,
}

/// ステップ結果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepResult {
    pub observation: Observation,
    pub reward: f64,
    pub done: bool,
    pub info: StepInfo,
}

/// エピソードの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeState {
    Active,
    Terminated,
}

/// 環境パラメータ
#[derive(Debug, Clone, PartialEq)]
pub struct EnvParams {
    pub dt: f64,
    pub k_loss: u32,
    pub max_steps: u32,
    pub spawn_region: Region2D,
    pub max_speed_component: f64,
}

impl Default for EnvParams {
    fn default() -> Self {
        Self::from(&EnvConfig::default())
    }
}

impl From<&EnvConfig> for EnvParams {
    fn from(config: &EnvConfig) -> Self {
        Self {
            dt: config.dt_s,
            k_loss: config.k_loss,
            max_steps: config.max_steps,
            spawn_region: config.spawn_rect.to_region(),
            max_speed_component: config.max_speed_component,
        }
    }
}

/// 段階的報酬の計算
///
/// 探知の成否で基本報酬かロストペナルティのどちらか一方を選び、
/// センサーの維持・切り替えによる補正を必ず加算します。
///
/// # 引数
///
/// * `detect` - 探知に成功したか
/// * `proximity_bonus` - 探知成功時の近接ボーナス
/// * `misses_before` - 今回のステップ前の連続ロスト数
/// * `same_action` - 直前と同じセンサーを選んだか
pub fn shaped_reward(detect: bool, proximity_bonus: f64, misses_before: u32, same_action: bool) -> f64 {
    let base = if detect {
        DETECTION_REWARD + proximity_bonus
    } else {
        MISS_PENALTIES[(misses_before as usize).min(MISS_PENALTIES.len() - 1)]
    };

    let stability = if same_action { STAY_BONUS } else { SWITCH_PENALTY };

    base + stability
}

/// 環境の誤用（呼び出し側のプログラミングエラー）
#[derive(Debug, Clone, PartialEq)]
pub enum EnvError {
    /// センサー数の範囲外の行動
    InvalidAction { action: usize, sensor_count: usize },
    /// reset() 前の step()
    NotReset,
    /// 終了済みエピソードでの step()
    EpisodeTerminated,
}

impl std::fmt::Display for EnvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvError::InvalidAction { action, sensor_count } => {
                write!(f, "無効な行動 {} (センサー数: {})", action, sensor_count)
            }
            EnvError::NotReset => write!(f, "reset() が呼ばれる前に step() が呼ばれました"),
            EnvError::EpisodeTerminated => write!(f, "終了済みのエピソードで step() が呼ばれました"),
        }
    }
}

impl std::error::Error for EnvError {}

/// ターゲット追跡環境
pub struct TrackingEnv {
    pub params: EnvParams,
    pub layout: SensorLayout,
    rng: StdRng,
    target: Option<TargetState>,
    state: EpisodeState,
}

impl TrackingEnv {
    /// 新しい環境を作成します
    ///
    /// 初期状態は `Terminated` 扱いで、`reset()` によって最初のエピソードが開始されます。
    pub fn new(params: EnvParams, layout: SensorLayout, seed: u64) -> Self {
        Self {
            params,
            layout,
            rng: StdRng::seed_from_u64(seed),
            target: None,
            state: EpisodeState::Terminated,
        }
    }

    /// シナリオ設定から環境を作成
    pub fn from_scenario(scenario: &ScenarioConfig) -> Self {
        Self::new(EnvParams::from(&scenario.env), scenario.sensor_layout(), scenario.env.seed)
    }

    /// 行動空間の大きさ（センサー数）
    pub fn act_dim(&self) -> usize {
        self.layout.len()
    }

    pub fn state(&self) -> EpisodeState {
        self.state
    }

    pub fn target(&self) -> Option<&TargetState> {
        self.target.as_ref()
    }

    /// エピソードを開始します
    ///
    /// 生成領域から一様に初期位置を引き、どのセンサーにもカバーされない位置は
    /// 棄却して引き直します。速度は各成分を一様乱数で決め、初期の
    /// 「直前のセンサー」は初期位置をカバーするセンサーから無作為に選びます。
    pub fn reset(&mut self) -> Observation {
        let region = self.params.spawn_region;
        let mut draws = 0u32;

        let (position, covering) = loop {
            draws += 1;
            let position = Position2D::new(
                self.rng.gen_range(region.xmin..=region.xmax),
                self.rng.gen_range(region.ymin..=region.ymax),
            );
            let covering = self.layout.covering(&position);
            if !covering.is_empty() {
                break (position, covering);
            }
        };

        let speed = self.params.max_speed_component;
        let velocity = Velocity2D::new(
            self.rng.gen_range(-speed..=speed),
            self.rng.gen_range(-speed..=speed),
        );
        let initial_action = covering[self.rng.gen_range(0..covering.len())];

        debug!(
            "エピソード開始: 位置 ({:.2}, {:.2}) 速度 ({:.2}, {:.2}) センサー {} (抽選 {}回)",
            position.x, position.y, velocity.x, velocity.y, initial_action, draws
        );

        self.reset_to(position, velocity, initial_action)
    }

    /// 指定した初期状態でエピソードを開始します
    ///
    /// 初期観測の直前位置は `position - velocity * dt` です。
    pub fn reset_to(&mut self, position: Position2D, velocity: Velocity2D, initial_action: usize) -> Observation {
        let previous = position - velocity * self.params.dt;
        self.target = Some(TargetState::new(position, velocity, initial_action));
        self.state = EpisodeState::Active;

        Observation {
            x: position.x,
            y: position.y,
            prev_x: previous.x,
            prev_y: previous.y,
            last_sensor_id: initial_action,
            lost: false,
        }
    }

    /// 1ステップ進めます
    ///
    /// # 引数
    ///
    /// * `action` - 今回選択するセンサーのインデックス
    ///
    /// # 戻り値
    ///
    /// 観測・報酬・終了フラグ・付加情報。範囲外の行動や終了後の呼び出しはエラー。
    pub fn step(&mut self, action: usize) -> Result<StepResult, EnvError> {
        let sensor_count = self.layout.len();
        let sensor = self.layout
            .get(action)
            .ok_or(EnvError::InvalidAction { action, sensor_count })?;
        if self.state == EpisodeState::Terminated {
            return Err(if self.target.is_some() { EnvError::EpisodeTerminated } else { EnvError::NotReset });
        }
        let target = self.target.as_mut().ok_or(EnvError::NotReset)?;

        target.move_agent(self.params.dt);

        let position = target.get_position();
        let distance = sensor.distance_to(&position);
        let detect = sensor.covers(&position);
        let previous_action = target.last_action;
        let same_action = previous_action == action;

        let misses_before = if detect {
            let before = target.consecutive_misses;
            target.record_detection();
            before
        } else {
            target.record_miss()
        };

        let bonus = if detect { sensor.proximity_bonus(distance) } else { 0.0 };
        let reward = shaped_reward(detect, bonus, misses_before, same_action);

        let done = target.consecutive_misses >= self.params.k_loss || target.steps >= self.params.max_steps;

        let observation = Observation {
            x: position.x,
            y: position.y,
            prev_x: target.last_detected.x,
            prev_y: target.last_detected.y,
            last_sensor_id: previous_action,
            lost: !detect,
        };

        // 次の観測で last_sensor_id として現れる
        target.last_action = action;

        trace!(
            "ステップ {}: センサー {} 距離 {:.2} 探知 {} 報酬 {:.2}",
            target.steps, action, distance, detect, reward
        );

        let info = StepInfo {
            detect,
            distance,
            consecutive_misses: target.consecutive_misses,
        };

        if done {
            self.state = EpisodeState::Terminated;
            debug!("エピソード終了: {}ステップ 連続ロスト {}", target.steps, target.consecutive_misses);
        }

        Ok(StepResult { observation, reward, done, info })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sensor;

    fn single_sensor_env() -> TrackingEnv {
        let layout = SensorLayout::new(vec![Sensor::new(0, Position2D::new(0.0, 0.0), 10.0)]);
        TrackingEnv::new(EnvParams::default(), layout, 1)
    }

    fn two_sensor_env() -> TrackingEnv {
        let layout = SensorLayout::new(vec![
            Sensor::new(0, Position2D::new(0.0, 0.0), 10.0),
            Sensor::new(1, Position2D::new(100.0, 0.0), 10.0),
        ]);
        TrackingEnv::new(EnvParams::default(), layout, 1)
    }

    #[test]
    fn test_reset_is_covered() {
        let mut env = TrackingEnv::from_scenario(&ScenarioConfig::default());
        for _ in 0..200 {
            let obs = env.reset();
            assert!(env.layout.is_covered(&obs.position()));
            assert!(!obs.lost);
            assert!(env.layout.covering(&obs.position()).contains(&obs.last_sensor_id));
            let velocity = env.target().unwrap().velocity;
            assert!(velocity.x.abs() <= 5.0 && velocity.y.abs() <= 5.0);
        }
    }

    #[test]
    fn test_reset_observation_previous_position() {
        let mut env = single_sensor_env();
        let obs = env.reset_to(Position2D::new(1.0, 2.0), Velocity2D::new(0.5, -1.0), 0);
        assert_eq!(obs.to_array(), [1.0, 2.0, 0.5, 3.0, 0.0, 0.0]);
    }

    #[test]
    fn test_same_seed_same_episode() {
        let mut a = TrackingEnv::from_scenario(&ScenarioConfig::default());
        let mut b = TrackingEnv::from_scenario(&ScenarioConfig::default());
        assert_eq!(a.reset(), b.reset());
        assert_eq!(a.step(1), b.step(1));
    }

    #[test]
    fn test_detection_reward() {
        let mut env = single_sensor_env();
        env.reset_to(Position2D::new(0.0, 0.0), Velocity2D::new(5.0, 0.0), 0);
        let result = env.step(0).unwrap();
        assert!(result.info.detect);
        assert_eq!(result.info.distance, 5.0);
        // 10 + (10-5)/10*2 + 2
        assert!((result.reward - 13.0).abs() < 1e-9);
        assert!(!result.done);
        assert_eq!(result.observation.prev_x, 5.0);
        assert!(!result.observation.lost);
    }

    #[test]
    fn test_stepped_miss_penalty_and_termination() {
        let mut env = single_sensor_env();
        env.reset_to(Position2D::new(0.0, 0.0), Velocity2D::new(20.0, 0.0), 0);

        let first = env.step(0).unwrap();
        assert!(!first.info.detect);
        assert_eq!(first.reward, -2.0 + STAY_BONUS);
        assert_eq!(first.info.consecutive_misses, 1);
        assert!(first.observation.lost);
        // 最後に探知した位置は初期位置のまま
        assert_eq!(first.observation.previous_position(), Position2D::new(0.0, 0.0));

        let second = env.step(0).unwrap();
        assert_eq!(second.reward, -5.0 + STAY_BONUS);
        assert!(!second.done);

        let third = env.step(0).unwrap();
        assert_eq!(third.reward, -8.0 + STAY_BONUS);
        assert_eq!(third.info.consecutive_misses, 3);
        assert!(third.done);
        assert_eq!(env.state(), EpisodeState::Terminated);
        assert_eq!(env.step(0), Err(EnvError::EpisodeTerminated));
    }

    #[test]
    fn test_switch_penalty_is_additive() {
        let mut env = two_sensor_env();
        env.reset_to(Position2D::new(100.0, 0.0), Velocity2D::new(0.0, 0.0), 0);
        let switched = env.step(1).unwrap();
        assert!(switched.info.detect);
        assert_eq!(switched.reward, DETECTION_REWARD + 2.0 + SWITCH_PENALTY);
        assert_eq!(switched.observation.last_sensor_id, 0);

        let stayed = env.step(1).unwrap();
        assert_eq!(stayed.reward, DETECTION_REWARD + 2.0 + STAY_BONUS);

        let missed = env.step(0).unwrap();
        assert!(!missed.info.detect);
        assert_eq!(missed.reward, -2.0 + SWITCH_PENALTY);
    }

    #[test]
    fn test_last_sensor_id_lags_one_step() {
        let mut env = two_sensor_env();
        let reset = env.reset_to(Position2D::new(100.0, 0.0), Velocity2D::new(0.0, 0.0), 0);
        assert_eq!(reset.last_sensor_id, 0);

        // 観測には今回ではなく直前に選ばれたセンサーが入る
        assert_eq!(env.step(1).unwrap().observation.last_sensor_id, 0);
        assert_eq!(env.step(0).unwrap().observation.last_sensor_id, 1);
        assert_eq!(env.step(0).unwrap().observation.last_sensor_id, 0);
        assert_eq!(env.target().unwrap().last_action, 0);
    }

    #[test]
    fn test_miss_counter_resets_on_detection() {
        let mut env = two_sensor_env();
        env.reset_to(Position2D::new(0.0, 0.0), Velocity2D::new(0.0, 0.0), 0);
        assert_eq!(env.step(1).unwrap().info.consecutive_misses, 1);
        assert_eq!(env.step(1).unwrap().info.consecutive_misses, 2);
        assert_eq!(env.step(0).unwrap().info.consecutive_misses, 0);
        let after = env.step(1).unwrap();
        // カウンタが戻ったので再び最初の段階
        assert_eq!(after.reward, -2.0 + SWITCH_PENALTY);
    }

    #[test]
    fn test_invalid_action_and_not_reset() {
        let mut env = single_sensor_env();
        assert_eq!(env.step(0), Err(EnvError::NotReset));
        env.reset();
        assert_eq!(env.step(1), Err(EnvError::InvalidAction { action: 1, sensor_count: 1 }));
        // 無効な行動では状態が変化しない
        assert_eq!(env.target().unwrap().steps, 0);
    }

    #[test]
    fn test_fixed_policy_terminates_within_max_steps() {
        let mut env = TrackingEnv::from_scenario(&ScenarioConfig::default());
        for action in 0..env.act_dim() {
            env.reset();
            let mut steps = 0;
            loop {
                let result = env.step(action).expect("valid action");
                steps += 1;
                assert!(steps <= 200);
                if result.done {
                    break;
                }
            }
            assert!(steps <= env.params.max_steps);
        }
    }

    #[test]
    fn test_max_steps_termination() {
        let params = EnvParams { max_steps: 5, ..EnvParams::default() };
        let layout = SensorLayout::new(vec![Sensor::new(0, Position2D::new(0.0, 0.0), 10.0)]);
        let mut env = TrackingEnv::new(params, layout, 3);
        env.reset_to(Position2D::new(0.0, 0.0), Velocity2D::new(0.0, 0.0), 0);
        for _ in 0..4 {
            assert!(!env.step(0).unwrap().done);
        }
        assert!(env.step(0).unwrap().done);
    }

    #[test]
    fn test_shaped_reward_table() {
        assert_eq!(shaped_reward(false, 0.0, 0, true), 0.0);
        assert_eq!(shaped_reward(false, 0.0, 1, false), -8.0);
        assert_eq!(shaped_reward(false, 0.0, 7, true), -6.0);
        assert_eq!(shaped_reward(true, 1.5, 4, true), 13.5);
    }
}
