// 基本的なデータ型と数学ユーティリティ
pub mod common;

// エージェントの基本インターフェース（trait）定義
pub mod traits;

// 各モデルの実装
pub mod target;
pub mod sensor;

// 便利な re-export
pub use common::*;
pub use traits::*;
pub use target::TargetState;
pub use sensor::{Sensor, SensorLayout};
