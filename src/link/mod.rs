//! シリアルリンク層
//!
//! トランスポート（実機シリアル・模擬デバイス）の上に、行指向のコマンド送受信、
//! LoRa無線の操作、センサーノード・スケジューラの現場ループを重ねます。

pub mod fake_device;
pub mod frame;
pub mod lora;
pub mod protocol;
pub mod relay;
pub mod serial;
pub mod transport;

pub use frame::{Measurement, Reading, TrackingReading};
pub use protocol::{ReadMode, ReadOptions, read_line, send_command};
pub use transport::{LinkError, LinkResult, Transport};
