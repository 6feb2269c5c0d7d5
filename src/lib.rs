//! # trackloop
//!
//! センサースケジューリングの閉ループ追跡テストベッド。
//!
//! - [`environment`]: 2次元点目標と固定センサー群による追跡環境
//! - [`policy`]: センサー選択方策
//! - [`simulation`]: エピソード実行と評価統計
//! - [`link`]: LoRa無線・センサーとの行指向シリアル通信
//! - [`scenario`]: YAMLシナリオ設定
//! - [`logging`]: ログ出力の初期化

pub mod environment;
pub mod link;
pub mod logging;
pub mod models;
pub mod policy;
pub mod scenario;
pub mod simulation;
