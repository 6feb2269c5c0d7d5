//! キューによる模擬シリアルデバイス
//!
//! ホスト側の [`FakeSerial`] と、対向機器を演じる [`PeerEnd`] の2つの端点を
//! 2本のチャネル（受信用・送信用）だけで接続します。対向機器の模擬ロジックは
//! 独立したバックグラウンドスレッドで動作し、ホスト側とフィールドを共有しません。
//! ホスト側が閉じられると送信チャネルが切断され、バックグラウンドスレッドも終了します。

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, trace};

use super::frame;
use super::transport::{LinkError, LinkResult, Transport};

/// 模擬シリアルポート（ホスト側）
pub struct FakeSerial {
    name: String,
    timeout: Duration,
    rx: Receiver<String>,
    pending: VecDeque<String>,
    tx: Option<Sender<String>>,
    write_buffer: Vec<u8>,
}

/// 模擬シリアルポートの対向端点
pub struct PeerEnd {
    pub name: String,
    inbound: Sender<String>,
    outbound: Receiver<String>,
}

/// ホストへ行を注入するためのハンドル（別スレッドへ渡せる）
#[derive(Clone)]
pub struct Injector {
    inbound: Sender<String>,
}

impl Injector {
    /// ホストの受信キューへ1行追加する。ホストが既に無い場合は false
    pub fn inject(&self, line: &str) -> bool {
        self.inbound.send(line.to_string()).is_ok()
    }
}

impl FakeSerial {
    /// 模擬ポートと対向端点の組を作成
    ///
    /// `timeout` は1行読み取りの待ち時間です。
    pub fn pair(name: &str, timeout: Duration) -> (FakeSerial, PeerEnd) {
        let (inbound_tx, inbound_rx) = mpsc::channel();
        let (outbound_tx, outbound_rx) = mpsc::channel();

        let host = FakeSerial {
            name: name.to_string(),
            timeout,
            rx: inbound_rx,
            pending: VecDeque::new(),
            tx: Some(outbound_tx),
            write_buffer: Vec::new(),
        };
        let peer = PeerEnd {
            name: name.to_string(),
            inbound: inbound_tx,
            outbound: outbound_rx,
        };
        (host, peer)
    }

    fn ensure_open(&self) -> LinkResult<()> {
        if self.tx.is_some() {
            Ok(())
        } else {
            Err(LinkError::Closed(self.name.clone()))
        }
    }

    /// 書き込みバッファの内容を1コマンドとして対向へ渡す
    fn emit(&mut self, raw: Vec<u8>) {
        let command = String::from_utf8_lossy(&raw).trim().to_string();
        if command.is_empty() {
            return;
        }
        debug!("[fake {} WRITE] {}", self.name, command);
        if let Some(tx) = &self.tx {
            if tx.send(command).is_err() {
                trace!("[fake {}] 対向が存在しません", self.name);
            }
        }
    }

    fn drain_channel(&mut self) {
        while let Ok(line) = self.rx.try_recv() {
            self.pending.push_back(line);
        }
    }
}

impl Transport for FakeSerial {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, data: &[u8]) -> LinkResult<()> {
        self.ensure_open()?;
        for &byte in data {
            self.write_buffer.push(byte);
            if byte == b'\n' {
                let raw = std::mem::take(&mut self.write_buffer);
                self.emit(raw);
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> LinkResult<()> {
        self.ensure_open()?;
        let raw = std::mem::take(&mut self.write_buffer);
        self.emit(raw);
        Ok(())
    }

    fn read_line(&mut self) -> LinkResult<Option<String>> {
        self.ensure_open()?;
        if let Some(line) = self.pending.pop_front() {
            return Ok(Some(line));
        }
        match self.rx.recv_timeout(self.timeout) {
            Ok(line) => Ok(Some(line)),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }

    fn bytes_available(&mut self) -> LinkResult<usize> {
        self.ensure_open()?;
        self.drain_channel();
        // 各行は改行付きで届いたものとして数える
        Ok(self.pending.iter().map(|line| line.len() + 1).sum())
    }

    fn clear_input_buffer(&mut self) -> LinkResult<()> {
        self.ensure_open()?;
        self.drain_channel();
        self.pending.clear();
        Ok(())
    }

    fn close(&mut self) {
        if self.tx.take().is_some() {
            debug!("[{}] closed", self.name);
        }
    }

    fn is_open(&self) -> bool {
        self.tx.is_some()
    }
}

impl Drop for FakeSerial {
    fn drop(&mut self) {
        self.close();
    }
}

/// 対向から見た受信イベント
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    Command(String),
    Idle,
    Disconnected,
}

impl PeerEnd {
    /// ホストの受信キューへ1行追加する
    pub fn inject(&self, line: &str) -> bool {
        self.inbound.send(line.to_string()).is_ok()
    }

    pub fn injector(&self) -> Injector {
        Injector {
            inbound: self.inbound.clone(),
        }
    }

    /// ホストからのコマンドを最大 `timeout` 待つ
    pub fn recv_command(&self, timeout: Duration) -> PeerEvent {
        match self.outbound.recv_timeout(timeout) {
            Ok(command) => PeerEvent::Command(command),
            Err(RecvTimeoutError::Timeout) => PeerEvent::Idle,
            Err(RecvTimeoutError::Disconnected) => PeerEvent::Disconnected,
        }
    }

    /// 既に届いているコマンドをすべて取り出す
    pub fn drain_commands(&self) -> Vec<String> {
        self.outbound.try_iter().collect()
    }
}

/// 対向機器の模擬ロジック
pub trait PeerEmulator: Send + 'static {
    /// 周期処理の間隔
    fn tick_interval(&self) -> Duration;

    /// 周期処理（自発的な送信など）
    fn on_tick(&mut self, _peer: &PeerEnd) {}

    /// ホストからのコマンド受信
    fn on_command(&mut self, command: &str, peer: &PeerEnd);
}

/// 模擬ロジックをバックグラウンドスレッドで起動
pub fn spawn_peer<P: PeerEmulator>(peer: PeerEnd, mut emulator: P) -> JoinHandle<()> {
    thread::spawn(move || {
        let interval = emulator.tick_interval();
        let mut next_tick = Instant::now();
        loop {
            let now = Instant::now();
            if now >= next_tick {
                emulator.on_tick(&peer);
                next_tick = now + interval;
            }

            match peer.recv_command(next_tick.saturating_duration_since(Instant::now())) {
                PeerEvent::Command(command) => emulator.on_command(&command, &peer),
                PeerEvent::Idle => {}
                PeerEvent::Disconnected => break,
            }
        }
        debug!("[fake {}] 模擬スレッド終了", peer.name);
    })
}

/// 模擬LoRaモジュール
///
/// 一定周期で電源コード行と送信元トレーラー行を送り、電源のオン・オフを交互に切り替えます。
/// 中継されてきた行はログに出力します。
pub struct LoraPeer {
    pub origin: u16,
    pub period: Duration,
    power: bool,
}

impl LoraPeer {
    pub fn new(origin: u16, period: Duration) -> Self {
        Self {
            origin,
            period,
            power: true,
        }
    }
}

impl PeerEmulator for LoraPeer {
    fn tick_interval(&self) -> Duration {
        self.period
    }

    fn on_tick(&mut self, peer: &PeerEnd) {
        peer.inject(&frame::format_power_code(self.power));
        peer.inject(&frame::format_origin_trailer(self.origin));
        self.power = !self.power;
    }

    fn on_command(&mut self, command: &str, peer: &PeerEnd) {
        info!("[FAKE LORA {} RECEIVED] {}", peer.name, command);
    }
}

/// 模擬センサー
///
/// 問い合わせコマンド `1` に対して測定値行と終端行を返します。
pub struct SensorPeer {
    pub angle: u32,
    pub distance: u32,
}

impl Default for SensorPeer {
    fn default() -> Self {
        Self {
            angle: 60,
            distance: 35,
        }
    }
}

impl PeerEmulator for SensorPeer {
    fn tick_interval(&self) -> Duration {
        Duration::from_millis(50)
    }

    fn on_command(&mut self, command: &str, peer: &PeerEnd) {
        info!("[FAKE SENSOR {} RECEIVED] {}", peer.name, command);
        if command == frame::SENSOR_QUERY {
            peer.inject(&frame::format_measurement(self.angle, self.distance));
            peer.inject(frame::END_MARKER);
        }
    }
}

/// 模擬センサーノード（スケジューラ側の受信用）
///
/// 一定周期で `角度,距離,送信元` 行を送ります。送信元は直近に送信先として
/// 設定されたアドレス（電源オン指令を受けたノード）です。
pub struct TrackingNodePeer {
    pub period: Duration,
    sender: u16,
    rng: StdRng,
}

impl TrackingNodePeer {
    pub fn new(initial_sender: u16, period: Duration, seed: u64) -> Self {
        Self {
            period,
            sender: initial_sender,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl PeerEmulator for TrackingNodePeer {
    fn tick_interval(&self) -> Duration {
        self.period
    }

    fn on_tick(&mut self, peer: &PeerEnd) {
        let reading = frame::TrackingReading {
            angle: self.rng.gen_range(0..=180),
            distance: self.rng.gen_range(0..=40),
            origin: u32::from(self.sender),
        };
        peer.inject(frame::format_tracking_line(&reading).trim_end());
    }

    fn on_command(&mut self, command: &str, peer: &PeerEnd) {
        debug!("[FAKE NODE {} RECEIVED] {}", peer.name, command);
        if let Some(address) = frame::parse_at_value(command, frame::KEY_TARGET_ADDRESS) {
            if let Ok(address) = address.parse() {
                self.sender = address;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_assembles_lines() {
        let (mut host, peer) = FakeSerial::pair("t", Duration::from_millis(10));
        for ch in "AT+CADDRSET=1\r\n".bytes() {
            host.write(&[ch]).unwrap();
        }
        host.write(b"1").unwrap();
        assert_eq!(peer.drain_commands(), vec!["AT+CADDRSET=1".to_string()]);
        host.flush().unwrap();
        assert_eq!(peer.drain_commands(), vec!["1".to_string()]);
    }

    #[test]
    fn test_read_and_clear() {
        let (mut host, peer) = FakeSerial::pair("t", Duration::from_millis(10));
        assert_eq!(host.read_line().unwrap(), None);
        peer.inject("60,35");
        peer.inject("END");
        assert_eq!(host.bytes_available().unwrap(), 10);
        assert_eq!(host.read_line().unwrap(), Some("60,35".to_string()));
        host.clear_input_buffer().unwrap();
        assert_eq!(host.bytes_available().unwrap(), 0);
    }

    #[test]
    fn test_close_disconnects_peer() {
        let (mut host, peer) = FakeSerial::pair("t", Duration::from_millis(10));
        host.close();
        assert!(!host.is_open());
        assert!(matches!(host.write(b"x"), Err(LinkError::Closed(_))));
        assert_eq!(peer.recv_command(Duration::from_millis(10)), PeerEvent::Disconnected);
    }

    #[test]
    fn test_sensor_peer_answers_query() {
        let (mut host, peer) = FakeSerial::pair("sensor", Duration::from_millis(200));
        let handle = spawn_peer(peer, SensorPeer::default());
        host.write(b"1").unwrap();
        host.flush().unwrap();
        assert_eq!(host.read_line().unwrap(), Some("60,35".to_string()));
        assert_eq!(host.read_line().unwrap(), Some("END".to_string()));
        drop(host);
        handle.join().unwrap();
    }

    #[test]
    fn test_lora_peer_toggles_power() {
        let (mut host, peer) = FakeSerial::pair("lora", Duration::from_millis(500));
        let handle = spawn_peer(peer, LoraPeer::new(9, Duration::from_millis(20)));
        let lines: Vec<String> = (0..4).filter_map(|_| host.read_line().unwrap()).collect();
        assert_eq!(lines, vec!["11", "from: 9", "10", "from: 9"]);
        host.close();
        handle.join().unwrap();
    }
}
