//! # Simulation モジュール
//!
//! 追跡環境と方策を組み合わせてエピソードを実行し、その記録と統計を提供します。
//!
//! ## 主要機能
//!
//! - **エピソード実行**: 観測 → 方策 → 環境ステップを終了まで繰り返す
//! - **記録**: 各ステップの位置、選択センサー、報酬、探知結果、距離、方位
//! - **評価**: 複数エピソードの平均ステップ報酬（平均・標準偏差）、探知率、
//!   ロスト発生率、センサー切り替え率
//!
//! ## 使用例
//!
//! ```rust
//! use trackloop::environment::TrackingEnv;
//! use trackloop::policy::FixedPolicy;
//! use trackloop::scenario::ScenarioConfig;
//! use trackloop::simulation::evaluate;
//!
//! let scenario = ScenarioConfig::default();
//! let mut env = TrackingEnv::from_scenario(&scenario);
//! let mut policy = FixedPolicy::new(0);
//! let summary = evaluate(&mut env, &mut policy, 5).expect("valid policy");
//! assert_eq!(summary.episodes, 5);
//! ```

use tracing::{debug, info};

use crate::environment::{EnvError, StepResult, TrackingEnv};
use crate::models::{math_utils, ISensor, Position2D};
use crate::policy::{Policy, Transition};

/// 1ステップ分の記録
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    pub step: u32,
    pub position: Position2D,
    pub action: usize,
    pub reward: f64,
    pub detect: bool,
    pub distance: f64,
    /// 探知時のセンサーから見たターゲット方位（度）
    pub bearing_deg: Option<f64>,
}

/// エピソード記録
#[derive(Debug, Clone, Default)]
pub struct EpisodeRecorder {
    pub records: Vec<StepRecord>,
}

impl EpisodeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// ステップ結果を記録
    pub fn record(&mut self, env: &TrackingEnv, action: usize, result: &StepResult) {
        let position = result.observation.position();
        let bearing_deg = if result.info.detect {
            env.layout.get(action).map(|sensor| {
                math_utils::normalize_angle((position - sensor.get_sensor_position()).angle_deg())
            })
        } else {
            None
        };

        self.records.push(StepRecord {
            step: self.records.len() as u32 + 1,
            position,
            action,
            reward: result.reward,
            detect: result.info.detect,
            distance: result.info.distance,
            bearing_deg,
        });
    }

    /// センサーごとの（選択回数, 探知成功回数）
    pub fn usage_by_sensor(&self, sensor_count: usize) -> Vec<(usize, usize)> {
        let mut usage = vec![(0, 0); sensor_count];
        for record in &self.records {
            if let Some(entry) = usage.get_mut(record.action) {
                entry.0 += 1;
                if record.detect {
                    entry.1 += 1;
                }
            }
        }
        usage
    }

    /// 記録の概要を表示
    pub fn print_summary(&self, sensor_count: usize) {
        let total_steps = self.records.len();
        let total_reward: f64 = self.records.iter().map(|r| r.reward).sum();
        let detects = self.records.iter().filter(|r| r.detect).count();

        println!("=== シミュレーション概要 ===");
        println!("総ステップ数: {}", total_steps);
        println!("総報酬: {:.2}", total_reward);
        if total_steps == 0 {
            return;
        }
        println!("平均ステップ報酬: {:.2}", total_reward / total_steps as f64);
        println!("探知率: {:.1}%", detects as f64 / total_steps as f64 * 100.0);
        println!();

        println!("センサー使用状況 ({}基):", sensor_count);
        for (sensor_id, (used, detected)) in self.usage_by_sensor(sensor_count).iter().enumerate() {
            let usage_rate = *used as f64 / total_steps as f64 * 100.0;
            print!("  センサー {}: {}回 ({:.1}%)", sensor_id, used, usage_rate);
            if *used > 0 {
                print!(" 探知 {}/{} ({:.1}%)", detected, used, *detected as f64 / *used as f64 * 100.0);
            }
            println!();
        }
    }
}

/// エピソード統計
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpisodeStats {
    pub total_reward: f64,
    pub steps: u32,
    pub detections: u32,
    pub switches: u32,
    /// 連続ロストが閾値に達して終了したか
    pub lost: bool,
}

impl EpisodeStats {
    pub fn average_step_reward(&self) -> f64 {
        if self.steps == 0 { 0.0 } else { self.total_reward / self.steps as f64 }
    }

    pub fn detect_rate(&self) -> f64 {
        if self.steps == 0 { 0.0 } else { self.detections as f64 / self.steps as f64 }
    }

    pub fn switch_rate(&self) -> f64 {
        if self.steps == 0 { 0.0 } else { self.switches as f64 / self.steps as f64 }
    }
}

/// 1エピソードを実行
///
/// 各遷移は `Policy::update` に渡されます。記録が不要な場合は `recorder` に `None` を渡します。
pub fn run_episode(
    env: &mut TrackingEnv,
    policy: &mut dyn Policy,
    mut recorder: Option<&mut EpisodeRecorder>,
) -> Result<EpisodeStats, EnvError> {
    let mut observation = env.reset();
    let mut stats = EpisodeStats {
        total_reward: 0.0,
        steps: 0,
        detections: 0,
        switches: 0,
        lost: false,
    };
    let mut previous_action: Option<usize> = None;

    loop {
        let action = policy.choose_action(&observation);
        let result = env.step(action)?;

        if previous_action.is_some_and(|previous| previous != action) {
            stats.switches += 1;
        }
        previous_action = Some(action);

        stats.steps += 1;
        stats.total_reward += result.reward;
        if result.info.detect {
            stats.detections += 1;
        }
        if result.info.consecutive_misses >= env.params.k_loss {
            stats.lost = true;
        }

        if let Some(recorder) = recorder.as_deref_mut() {
            recorder.record(env, action, &result);
        }

        policy.update(&Transition {
            observation,
            action,
            reward: result.reward,
            next_observation: result.observation,
            done: result.done,
        });

        observation = result.observation;
        if result.done {
            break;
        }
    }

    debug!(
        "エピソード完了: {}ステップ 総報酬 {:.2} 探知率 {:.3} ロスト {}",
        stats.steps, stats.total_reward, stats.detect_rate(), stats.lost
    );

    Ok(stats)
}

/// 評価結果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationSummary {
    pub episodes: usize,
    pub mean_avg_step_reward: f64,
    pub std_avg_step_reward: f64,
    pub mean_detect_rate: f64,
    /// ロストで終了したエピソードの割合
    pub loss_probability: f64,
    pub mean_switch_rate: f64,
}

impl EvaluationSummary {
    pub fn from_stats(stats: &[EpisodeStats]) -> Self {
        let n = stats.len();
        if n == 0 {
            return Self {
                episodes: 0,
                mean_avg_step_reward: 0.0,
                std_avg_step_reward: 0.0,
                mean_detect_rate: 0.0,
                loss_probability: 0.0,
                mean_switch_rate: 0.0,
            };
        }

        let count = n as f64;
        let mean = stats.iter().map(|s| s.average_step_reward()).sum::<f64>() / count;
        let variance = stats
            .iter()
            .map(|s| (s.average_step_reward() - mean).powi(2))
            .sum::<f64>() / count;

        Self {
            episodes: n,
            mean_avg_step_reward: mean,
            std_avg_step_reward: variance.sqrt(),
            mean_detect_rate: stats.iter().map(|s| s.detect_rate()).sum::<f64>() / count,
            loss_probability: stats.iter().filter(|s| s.lost).count() as f64 / count,
            mean_switch_rate: stats.iter().map(|s| s.switch_rate()).sum::<f64>() / count,
        }
    }

    pub fn print(&self) {
        println!("=== 評価結果 ({}エピソード) ===", self.episodes);
        println!("平均ステップ報酬: {:.3} (標準偏差 {:.3})", self.mean_avg_step_reward, self.std_avg_step_reward);
        println!("探知率: {:.1}%", self.mean_detect_rate * 100.0);
        println!("ロスト発生率: {:.1}%", self.loss_probability * 100.0);
        println!("切り替え率: {:.1}%", self.mean_switch_rate * 100.0);
    }
}

/// 複数エピソードで方策を評価
pub fn evaluate(
    env: &mut TrackingEnv,
    policy: &mut dyn Policy,
    episodes: usize,
) -> Result<EvaluationSummary, EnvError> {
    info!("=== 評価開始: 方策 {} / {}エピソード ===", policy.name(), episodes);

    let mut all_stats = Vec::with_capacity(episodes);
    for episode in 0..episodes {
        let stats = run_episode(env, policy, None)?;
        all_stats.push(stats);

        if (episode + 1) % 100 == 0 {
            let window = EvaluationSummary::from_stats(&all_stats[episode + 1 - 100..]);
            info!(
                "進行状況: {}/{} 直近100件 探知率 {:.3} ロスト率 {:.3} 切り替え率 {:.3}",
                episode + 1, episodes, window.mean_detect_rate, window.loss_probability, window.mean_switch_rate
            );
        }
    }

    let summary = EvaluationSummary::from_stats(&all_stats);
    info!("=== 評価完了: 平均ステップ報酬 {:.3} ===", summary.mean_avg_step_reward);
    Ok(summary)
}
