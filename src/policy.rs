//! # Policy モジュール
//!
//! 観測からセンサーを選択する意思決定コンポーネントのインターフェースと、
//! 学習を伴わないベースライン方策を提供します。
//!
//! 方策は呼び出し側が一度だけ構築し、スケジューリングループへ明示的に渡します。

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::environment::Observation;
use crate::models::{ISensor, Position2D, SensorLayout};
use crate::scenario::{PolicyConfig, PolicyKind};

/// 1ステップ分の遷移
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub observation: Observation,
    pub action: usize,
    pub reward: f64,
    pub next_observation: Observation,
    pub done: bool,
}

/// 方策のインターフェース
pub trait Policy {
    /// 方策名
    fn name(&self) -> &str;

    /// 観測からセンサーのインデックスを選択
    fn choose_action(&mut self, observation: &Observation) -> usize;

    /// 遷移による学習（学習しない方策では何もしない）
    fn update(&mut self, _transition: &Transition) {}
}

/// 常に同じセンサーを選ぶ方策
#[derive(Debug, Clone)]
pub struct FixedPolicy {
    pub action: usize,
}

impl FixedPolicy {
    pub fn new(action: usize) -> Self {
        Self { action }
    }
}

impl Policy for FixedPolicy {
    fn name(&self) -> &str {
        "fixed"
    }

    fn choose_action(&mut self, _observation: &Observation) -> usize {
        self.action
    }
}

/// 一様乱数でセンサーを選ぶ方策
#[derive(Debug)]
pub struct RandomPolicy {
    act_dim: usize,
    rng: StdRng,
}

impl RandomPolicy {
    pub fn new(act_dim: usize, seed: u64) -> Self {
        Self {
            act_dim,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Policy for RandomPolicy {
    fn name(&self) -> &str {
        "random"
    }

    fn choose_action(&mut self, _observation: &Observation) -> usize {
        self.rng.gen_range(0..self.act_dim)
    }
}

/// 最近傍センサー方策
///
/// 観測位置から一定速度を仮定して次の位置を予測し、その位置をカバーする
/// センサーのうち中心に最も近いものを選びます。カバーするセンサーがなければ
/// 予測位置に最も近いセンサーを選びます。
#[derive(Debug, Clone)]
pub struct NearestSensorPolicy {
    layout: SensorLayout,
}

impl NearestSensorPolicy {
    pub fn new(layout: SensorLayout) -> Self {
        Self { layout }
    }
}

impl Policy for NearestSensorPolicy {
    fn name(&self) -> &str {
        "nearest"
    }

    fn choose_action(&mut self, observation: &Observation) -> usize {
        let current = observation.position();
        let previous = observation.previous_position();
        // ロスト中は直前位置が古いので外挿しない
        let predicted = if observation.lost {
            current
        } else {
            let delta = current - previous;
            Position2D::new(current.x + delta.x, current.y + delta.y)
        };

        let covering = self.layout.covering(&predicted);
        let candidates: Vec<usize> = if covering.is_empty() {
            (0..self.layout.len()).collect()
        } else {
            covering
        };

        candidates
            .into_iter()
            .min_by(|&a, &b| {
                let da = self.layout.sensors[a].distance_to(&predicted);
                let db = self.layout.sensors[b].distance_to(&predicted);
                da.total_cmp(&db)
            })
            .unwrap_or(observation.last_sensor_id)
    }
}

/// 設定から方策を構築
pub fn build_policy(config: &PolicyConfig, layout: &SensorLayout) -> Box<dyn Policy> {
    match config.kind {
        PolicyKind::Fixed => Box::new(FixedPolicy::new(config.fixed_action)),
        PolicyKind::Random => Box::new(RandomPolicy::new(layout.len(), config.seed)),
        PolicyKind::Nearest => Box::new(NearestSensorPolicy::new(layout.clone())),
    }
}
