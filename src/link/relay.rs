//! 現場ループ
//!
//! センサーノード側の中継ループ [`RelayNode`] と、スケジューラ側の
//! 無線ループ [`SchedulerLink`] を提供します。どちらもトランスポートを所有し、
//! ループを抜けると（エラー時を含め）Drop で閉じられます。

use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::fake_device::{spawn_peer, FakeSerial, LoraPeer, PeerEnd, SensorPeer, TrackingNodePeer};
use super::frame::{self, Measurement, TrackingReading};
use super::lora;
use super::protocol::{self, ReadOptions};
use super::serial::HardwareSerial;
use super::transport::{LinkResult, Transport};
use crate::environment::Observation;
use crate::models::{Position2D, SensorLayout};
use crate::policy::Policy;
use crate::scenario::LinkConfig;

/// サイクル間の待ち時間
pub const CYCLE_PAUSE: Duration = Duration::from_millis(50);

/// 模擬LoRaモジュールの電源コード送信周期
const FAKE_POWER_PERIOD: Duration = Duration::from_secs(1);

/// 模擬センサーノードの追跡データ送信周期
const FAKE_TRACKING_PERIOD: Duration = Duration::from_millis(500);

/// 動的に選ばれるトランスポート
pub type BoxedTransport = Box<dyn Transport + Send>;

/// LoRaポートを開く（模擬指定時は模擬LoRaモジュールを起動）
fn open_lora(link: &LinkConfig, emulate: impl FnOnce(PeerEnd)) -> LinkResult<BoxedTransport> {
    let read_timeout = Duration::from_millis(link.read_timeout_ms);
    if link.mock.mocks_lora() {
        let (host, peer) = FakeSerial::pair("lora", read_timeout);
        emulate(peer);
        info!("模擬LoRaモジュールを使用します");
        Ok(Box::new(host))
    } else {
        Ok(Box::new(HardwareSerial::open(&link.lora_port, link.baudrate, read_timeout)?))
    }
}

/// センサーノード用のトランスポート組（LoRa, センサー）を開く
pub fn open_relay_links(link: &LinkConfig) -> LinkResult<(BoxedTransport, BoxedTransport)> {
    let origin = link.power_origin;
    let lora = open_lora(link, |peer| {
        spawn_peer(peer, LoraPeer::new(origin, FAKE_POWER_PERIOD));
    })?;

    let read_timeout = Duration::from_millis(link.read_timeout_ms);
    let sensor: BoxedTransport = if link.mock.mocks_sensor() {
        let (host, peer) = FakeSerial::pair("sensor", read_timeout);
        spawn_peer(peer, SensorPeer::default());
        info!("模擬センサーを使用します");
        Box::new(host)
    } else {
        Box::new(HardwareSerial::open(&link.sensor_port, link.baudrate, read_timeout)?)
    };

    Ok((lora, sensor))
}

/// スケジューラ用のLoRaトランスポートを開く
///
/// 模擬時は `initial_sender` を送信元とする模擬センサーノードを起動します。
pub fn open_scheduler_link(link: &LinkConfig, initial_sender: u16, seed: u64) -> LinkResult<BoxedTransport> {
    open_lora(link, |peer| {
        spawn_peer(peer, TrackingNodePeer::new(initial_sender, FAKE_TRACKING_PERIOD, seed));
    })
}

/// 中継1サイクルの結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// 電源コードを受信しなかった
    NoPowerReading,
    /// 電源オフ指令
    PowerOff,
    /// センサーから有効な測定値が得られなかった
    NoMeasurement,
    /// 測定値を中継した
    Relayed(Measurement),
}

/// 中継ループの集計
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub cycles: u32,
    pub power_on: u32,
    pub relayed: u32,
    pub no_measurement: u32,
}

/// センサーノード側の中継ループ
///
/// 電源オン指令を受けるたびにローカルセンサーへ問い合わせ、
/// `角度,距離,自ノードアドレス` を送信先ノードへ中継します。
pub struct RelayNode<L: Transport, S: Transport> {
    lora: L,
    sensor: S,
    local_address: u16,
    target_address: u16,
    power_origin: u16,
    reading_timeout: Duration,
}

impl<L: Transport, S: Transport> RelayNode<L, S> {
    pub fn new(lora: L, sensor: S, link: &LinkConfig) -> Self {
        Self {
            lora,
            sensor,
            local_address: link.addr_local,
            target_address: link.addr_target,
            power_origin: link.power_origin,
            reading_timeout: lora::reading_timeout(link.reading_timeout_s),
        }
    }

    /// 自ノードアドレスを設定し、両方の受信バッファを破棄する
    pub fn setup(&mut self) -> LinkResult<()> {
        lora::configure_local_address(&mut self.lora, self.local_address)?;
        self.lora.clear_input_buffer()?;
        self.sensor.clear_input_buffer()?;
        Ok(())
    }

    /// ローカルセンサーに問い合わせ、最初の `角度,距離` 行を返す
    pub fn query_sensor(&mut self) -> LinkResult<Option<Measurement>> {
        let options = ReadOptions::end_marker().with_max_wait(Duration::from_secs(1));
        let lines = protocol::send_command(&mut self.sensor, frame::SENSOR_QUERY, Some(options))?;
        Ok(lines
            .unwrap_or_default()
            .iter()
            .find_map(|line| frame::parse_measurement(line)))
    }

    pub fn run_cycle(&mut self) -> LinkResult<RelayOutcome> {
        let power = lora::receive_power_reading(&mut self.lora, self.power_origin, self.reading_timeout)?;
        match power {
            None => return Ok(RelayOutcome::NoPowerReading),
            Some(false) => return Ok(RelayOutcome::PowerOff),
            Some(true) => {}
        }

        let Some(measurement) = self.query_sensor()? else {
            warn!("センサーから有効な測定値を受信できませんでした");
            return Ok(RelayOutcome::NoMeasurement);
        };
        info!("angle:{},distance:{}", measurement.angle, measurement.distance);

        let record = TrackingReading {
            angle: measurement.angle,
            distance: measurement.distance,
            origin: u32::from(self.local_address),
        };
        lora::send_tracking_update(&mut self.lora, &[record], self.target_address)?;
        Ok(RelayOutcome::Relayed(measurement))
    }

    /// 中継ループを実行する
    ///
    /// `cycles` が `None` の場合はトランスポート障害まで続けます。
    pub fn run(&mut self, cycles: Option<u32>) -> LinkResult<RelayStats> {
        self.setup()?;
        info!("中継ループ開始: 自ノード {} → 送信先 {}", self.local_address, self.target_address);

        let mut stats = RelayStats::default();
        while cycles.is_none_or(|limit| stats.cycles < limit) {
            let outcome = self.run_cycle()?;
            stats.cycles += 1;
            match outcome {
                RelayOutcome::NoPowerReading | RelayOutcome::PowerOff => {}
                RelayOutcome::NoMeasurement => {
                    stats.power_on += 1;
                    stats.no_measurement += 1;
                }
                RelayOutcome::Relayed(_) => {
                    stats.power_on += 1;
                    stats.relayed += 1;
                }
            }
            debug!("cycle {}: {:?}", stats.cycles, outcome);
            thread::sleep(CYCLE_PAUSE);
        }

        info!(
            "中継ループ終了: {}サイクル, 電源オン {}, 中継 {}",
            stats.cycles, stats.power_on, stats.relayed
        );
        Ok(stats)
    }
}

/// スケジューラの1回の判断
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleDecision {
    pub reading: TrackingReading,
    /// 推定した目標位置
    pub estimate: Position2D,
    /// 報告してきたセンサー
    pub reporter: usize,
    /// 次に電源オンするセンサー
    pub action: usize,
}

/// スケジューラ側の無線ループ
///
/// 追跡データを受信するたびに、報告したセンサーの位置と（距離, 方位角）から
/// 目標位置を推定し、方策が選んだセンサーへ電源オン指令を送ります。
pub struct SchedulerLink<T: Transport> {
    lora: T,
    layout: SensorLayout,
    policy: Box<dyn Policy>,
    reading_timeout: Duration,
    last_position: Position2D,
    last_action: usize,
}

impl<T: Transport> SchedulerLink<T> {
    pub fn new(
        lora: T,
        layout: SensorLayout,
        policy: Box<dyn Policy>,
        link: &LinkConfig,
        initial_position: Position2D,
    ) -> Self {
        Self {
            lora,
            layout,
            policy,
            reading_timeout: lora::reading_timeout(link.reading_timeout_s),
            last_position: initial_position,
            last_action: 0,
        }
    }

    /// 報告元センサーと推定位置
    pub fn estimate_position(&self, reading: &TrackingReading) -> Option<(usize, Position2D)> {
        let address = u16::try_from(reading.origin).ok()?;
        let index = self.layout.index_of_address(address)?;
        let sensor = self.layout.get(index)?;
        let estimate = Position2D::from_polar(sensor.position, f64::from(reading.distance), f64::from(reading.angle));
        Some((index, estimate))
    }

    /// 指定センサーへ電源オン指令を送る。アドレス未設定なら false
    fn power_on(&mut self, action: usize) -> LinkResult<bool> {
        let Some(address) = self.layout.get(action).and_then(|s| s.address) else {
            warn!("センサー {} に無線アドレスが設定されていません", action);
            return Ok(false);
        };
        lora::send_power_command(&mut self.lora, true, address)?;
        self.last_action = action;
        Ok(true)
    }

    /// 初期位置の観測から最初のセンサーを選び、電源オンする
    pub fn start(&mut self) -> LinkResult<usize> {
        let observation = Observation {
            x: self.last_position.x,
            y: self.last_position.y,
            prev_x: self.last_position.x,
            prev_y: self.last_position.y,
            last_sensor_id: self.last_action,
            lost: false,
        };
        let action = self.policy.choose_action(&observation);
        self.power_on(action)?;
        info!("初期センサー: {}", action);
        Ok(action)
    }

    pub fn run_cycle(&mut self) -> LinkResult<Option<ScheduleDecision>> {
        let Some(reading) = lora::receive_tracking_reading(&mut self.lora, self.reading_timeout)? else {
            return Ok(None);
        };

        let Some((reporter, estimate)) = self.estimate_position(&reading) else {
            warn!("未知の送信元からの追跡データ: {}", reading.origin);
            return Ok(None);
        };

        let observation = Observation {
            x: estimate.x,
            y: estimate.y,
            prev_x: self.last_position.x,
            prev_y: self.last_position.y,
            last_sensor_id: reporter,
            lost: false,
        };
        let action = self.policy.choose_action(&observation);
        if action == self.last_action {
            debug!("同じセンサーを継続: {}", action);
        }
        info!("the next sensor: {}", action);
        self.power_on(action)?;
        self.last_position = estimate;

        Ok(Some(ScheduleDecision {
            reading,
            estimate,
            reporter,
            action,
        }))
    }

    /// スケジューラループを実行する
    ///
    /// # 戻り値
    ///
    /// 判断を行ったサイクル数
    pub fn run(&mut self, cycles: Option<u32>) -> LinkResult<u32> {
        self.start()?;

        let mut count = 0;
        let mut decisions = 0;
        while cycles.is_none_or(|limit| count < limit) {
            count += 1;
            match self.run_cycle()? {
                Some(decision) => {
                    decisions += 1;
                    info!(
                        "推定位置 ({:.1}, {:.1}) 報告 {} → 選択 {}",
                        decision.estimate.x, decision.estimate.y, decision.reporter, decision.action
                    );
                }
                None => warn!("受信失敗、このサイクルをスキップ"),
            }
            thread::sleep(CYCLE_PAUSE);
        }
        Ok(decisions)
    }
}
