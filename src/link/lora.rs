//! LoRa無線モジュールの操作
//!
//! 自ノードアドレスの設定、受信モードへの切り替え、送信セッション
//! （送信先設定 → 送信モード → データ行 → 送信モード終了）と、
//! 追跡データ・電源コードの受信を提供します。

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::frame::{self, Reading, TrackingReading};
use super::protocol::{self, ReadOptions, DEFAULT_LINE_TIMEOUT};
use super::transport::{LinkResult, Transport};

/// 送信モード設定と終了前の待ち時間
pub const MODE_SWITCH_DELAY: Duration = Duration::from_millis(200);

/// 受信待ちの既定タイムアウト
pub const DEFAULT_READING_TIMEOUT: Duration = Duration::from_secs(3);

/// 秒数から受信待ちタイムアウトを作る
///
/// 正の有限値でない場合は警告を出して既定値を使います。
pub fn reading_timeout(seconds: f64) -> Duration {
    match Duration::try_from_secs_f64(seconds) {
        Ok(timeout) if !timeout.is_zero() => timeout,
        _ => {
            warn!("無効な受信タイムアウト {}秒、既定値 {:?} を使用します", seconds, DEFAULT_READING_TIMEOUT);
            DEFAULT_READING_TIMEOUT
        }
    }
}

/// 自ノードアドレスを設定する（応答は待たない）
pub fn configure_local_address<T: Transport + ?Sized>(transport: &mut T, local_address: u16) -> LinkResult<()> {
    let command = frame::format_at_command(frame::KEY_LOCAL_ADDRESS, &local_address.to_string());
    protocol::send_command(transport, &command, None)?;
    info!("[{}] 自ノードアドレスを設定: {}", transport.name(), local_address);
    Ok(())
}

/// 受信モードに切り替える（応答は待たない）
pub fn mode_receive<T: Transport + ?Sized>(transport: &mut T) -> LinkResult<()> {
    let command = frame::format_at_command(frame::KEY_RECEIVE, frame::RECEIVE_PARAMS);
    protocol::send_command(transport, &command, None)?;
    Ok(())
}

/// 送信セッション
///
/// 開始時に送信先アドレスと送信モードを設定し、終了時に必ず `+++` を送って
/// 受信モードへ戻します。`finish` を呼ばずに破棄された場合（途中のエラーによる
/// 早期リターンを含む）も Drop で終了シーケンスを送ります。
pub struct TransmitSession<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
    finished: bool,
}

impl<'a, T: Transport + ?Sized> TransmitSession<'a, T> {
    /// 送信モードに入る
    pub fn begin(transport: &'a mut T, target_address: u16) -> LinkResult<Self> {
        let set_target = frame::format_at_command(frame::KEY_TARGET_ADDRESS, &target_address.to_string());
        let set_transmit = frame::format_at_command(frame::KEY_TRANSMIT, frame::TRANSMIT_PARAMS);

        protocol::send_command(transport, &set_target, Some(ReadOptions::idle_timeout()))?;
        let mut session = Self { transport, finished: false };
        thread::sleep(MODE_SWITCH_DELAY);
        protocol::send_command(&mut *session.transport, &set_transmit, Some(ReadOptions::idle_timeout()))?;
        debug!("[{}] 送信モード開始: 送信先 {}", session.transport.name(), target_address);
        Ok(session)
    }

    /// 1行送信する（応答は待たない）
    pub fn send_line(&mut self, line: &str) -> LinkResult<()> {
        protocol::send_command(&mut *self.transport, line, None)?;
        Ok(())
    }

    /// 送信モードを終了する
    pub fn finish(mut self) -> LinkResult<()> {
        self.finished = true;
        Self::exit(&mut *self.transport)
    }

    fn exit(transport: &mut T) -> LinkResult<()> {
        thread::sleep(MODE_SWITCH_DELAY);
        protocol::send_command(transport, frame::EXIT_SEQUENCE, Some(ReadOptions::idle_timeout()))?;
        debug!("[{}] 送信モード終了", transport.name());
        Ok(())
    }
}

impl<T: Transport + ?Sized> Drop for TransmitSession<'_, T> {
    fn drop(&mut self) {
        if !self.finished {
            self.finished = true;
            if let Err(e) = Self::exit(&mut *self.transport) {
                error!("送信モード終了に失敗: {}", e);
            }
        }
    }
}

/// 追跡データを送信先ノードへ送る
///
/// 送信モードに入った後は、途中で失敗しても必ず終了シーケンスを送ります。
pub fn send_tracking_update<T: Transport + ?Sized>(
    transport: &mut T,
    records: &[TrackingReading],
    target_address: u16,
) -> LinkResult<()> {
    let mut session = TransmitSession::begin(transport, target_address)?;
    for record in records {
        session.send_line(&frame::format_tracking_line(record))?;
    }
    session.finish()?;
    info!("追跡データ {}件を送信先 {} へ送信", records.len(), target_address);
    Ok(())
}

/// 電源オン/オフ指令を送信先ノードへ送る
///
/// 無線の取りこぼし対策として同じコード行を2回送ります。
pub fn send_power_command<T: Transport + ?Sized>(
    transport: &mut T,
    on: bool,
    target_address: u16,
) -> LinkResult<()> {
    let line = format!("{}{}", frame::format_power_code(on), frame::LINE_TERMINATOR);
    let mut session = TransmitSession::begin(transport, target_address)?;
    session.send_line(&line)?;
    session.send_line(&line)?;
    session.finish()?;
    info!("電源{}指令を送信先 {} へ送信", if on { "オン" } else { "オフ" }, target_address);
    Ok(())
}

/// 全体の残り時間から1回の待ち受け時間を決める
fn next_wait(deadline: Instant) -> Option<Duration> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        None
    } else {
        Some(remaining.min(DEFAULT_LINE_TIMEOUT))
    }
}

/// 追跡データを受信する
///
/// 受信モードに切り替えた後、`<角度>,<距離>,<送信元>` に一致する行が届くまで待ちます。
/// 一致しない行は読み捨てます。
///
/// # 戻り値
///
/// 受信した追跡データ。全体タイムアウト時は `None`
pub fn receive_tracking_reading<T: Transport + ?Sized>(
    transport: &mut T,
    timeout: Duration,
) -> LinkResult<Option<TrackingReading>> {
    mode_receive(transport)?;

    let deadline = Instant::now() + timeout;
    while let Some(wait) = next_wait(deadline) {
        let Some(line) = protocol::read_line(transport, wait)? else {
            continue;
        };
        debug!("[{}] Line: {}", transport.name(), line);

        match frame::parse_tracking_line(&line) {
            Some(reading) => {
                info!("{}", Reading::Tracking(reading));
                transport.clear_input_buffer()?;
                return Ok(Some(reading));
            }
            None => debug!("[{}] 追跡データではない行を破棄: {}", transport.name(), line),
        }
    }

    warn!("[{}] 追跡データ受信タイムアウト", transport.name());
    Ok(None)
}

/// 電源コードを受信する
///
/// 受信モードに切り替えた後、2文字の電源コード行（機能番号 + オン/オフ）と、
/// それに続く `from: <送信元>` 行を待ちます。
///
/// # 戻り値
///
/// 電源オンなら `Some(true)`。タイムアウト、送信元の不一致、機能番号の不一致では `None`
pub fn receive_power_reading<T: Transport + ?Sized>(
    transport: &mut T,
    expected_origin: u16,
    timeout: Duration,
) -> LinkResult<Option<bool>> {
    mode_receive(transport)?;

    let deadline = Instant::now() + timeout;
    let mut code: Option<frame::PowerCode> = None;

    while let Some(wait) = next_wait(deadline) {
        let Some(line) = protocol::read_line(transport, wait)? else {
            continue;
        };
        debug!("[{}] Line: {}", transport.name(), line);

        let Some(power) = code else {
            // 電源コード行より前の行は読み捨てる
            code = frame::parse_power_code(&line);
            continue;
        };

        let Some(origin) = frame::parse_origin_trailer(&line) else {
            continue;
        };

        transport.clear_input_buffer()?;

        if origin != u32::from(expected_origin) {
            warn!("[{}] 送信元が一致しません: {} (期待値 {})", transport.name(), origin, expected_origin);
            return Ok(None);
        }
        if power.function != frame::POWER_FUNCTION {
            warn!("[{}] 機能番号が一致しません: {}", transport.name(), power.function);
            return Ok(None);
        }

        info!("{}", Reading::Power(power.on));
        return Ok(Some(power.on));
    }

    warn!("[{}] 電源コード受信タイムアウト", transport.name());
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::fake_device::{FakeSerial, PeerEnd};
    use crate::link::transport::LinkError;

    fn fake() -> (FakeSerial, PeerEnd) {
        FakeSerial::pair("lora", Duration::from_millis(50))
    }

    /// 対向が受け取ったコマンドから受信モード設定を除く
    fn sent_without_receive_mode(peer: &PeerEnd) -> Vec<String> {
        peer.drain_commands()
            .into_iter()
            .filter(|c| !c.starts_with("AT+CRXS"))
            .collect()
    }

    #[test]
    fn test_reading_timeout_falls_back() {
        assert_eq!(reading_timeout(0.5), Duration::from_millis(500));
        assert_eq!(reading_timeout(f64::NAN), DEFAULT_READING_TIMEOUT);
        assert_eq!(reading_timeout(f64::INFINITY), DEFAULT_READING_TIMEOUT);
        assert_eq!(reading_timeout(-1.0), DEFAULT_READING_TIMEOUT);
        assert_eq!(reading_timeout(0.0), DEFAULT_READING_TIMEOUT);
    }

    #[test]
    fn test_configure_local_address() {
        let (mut host, peer) = fake();
        configure_local_address(&mut host, 1).unwrap();
        configure_local_address(&mut host, 1).unwrap();
        assert_eq!(peer.drain_commands(), vec!["AT+CADDRSET=1", "AT+CADDRSET=1"]);
    }

    #[test]
    fn test_send_tracking_update_sequence() {
        let (mut host, peer) = fake();
        let records = [
            TrackingReading { angle: 60, distance: 35, origin: 1 },
            TrackingReading { angle: 61, distance: 34, origin: 1 },
        ];
        send_tracking_update(&mut host, &records, 10).unwrap();
        assert_eq!(
            peer.drain_commands(),
            vec![
                "AT+CTXADDRSET=10",
                "AT+CTX=470500000,5,0,1,21,1",
                "60,35,1",
                "61,34,1",
                "+++",
            ]
        );
    }

    #[test]
    fn test_exit_sent_when_session_aborts() {
        let (mut host, peer) = fake();
        {
            let mut session = TransmitSession::begin(&mut host, 10).unwrap();
            session.send_line("1,2,3\r\n").unwrap();
            // finish せずに破棄
        }
        let commands = peer.drain_commands();
        assert_eq!(commands.last().map(String::as_str), Some("+++"));
        assert_eq!(commands.iter().filter(|c| c.as_str() == "+++").count(), 1);
    }

    /// 指定回数の flush の後、最初の書き込みを1回だけ失敗させる
    struct FailingWrite {
        inner: FakeSerial,
        flushes: usize,
        fail_after_flushes: usize,
        failed: bool,
    }

    impl FailingWrite {
        fn new(inner: FakeSerial, fail_after_flushes: usize) -> Self {
            Self { inner, flushes: 0, fail_after_flushes, failed: false }
        }
    }

    impl Transport for FailingWrite {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn write(&mut self, data: &[u8]) -> LinkResult<()> {
            if !self.failed && self.flushes >= self.fail_after_flushes {
                self.failed = true;
                return Err(LinkError::Io {
                    port: self.inner.name().to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "write failed"),
                });
            }
            self.inner.write(data)
        }

        fn flush(&mut self) -> LinkResult<()> {
            self.flushes += 1;
            self.inner.flush()
        }

        fn read_line(&mut self) -> LinkResult<Option<String>> {
            self.inner.read_line()
        }

        fn bytes_available(&mut self) -> LinkResult<usize> {
            self.inner.bytes_available()
        }

        fn clear_input_buffer(&mut self) -> LinkResult<()> {
            self.inner.clear_input_buffer()
        }

        fn close(&mut self) {
            self.inner.close()
        }

        fn is_open(&self) -> bool {
            self.inner.is_open()
        }
    }

    #[test]
    fn test_exit_sent_after_write_failure() {
        let (host, peer) = fake();
        // 送信先設定と送信モード設定の2コマンドの後、最初のデータ行で失敗する
        let mut link = FailingWrite::new(host, 2);
        let records = [
            TrackingReading { angle: 60, distance: 35, origin: 1 },
            TrackingReading { angle: 61, distance: 34, origin: 1 },
        ];

        let result = send_tracking_update(&mut link, &records, 10);

        assert!(matches!(result, Err(LinkError::Io { .. })));
        assert_eq!(
            peer.drain_commands(),
            vec!["AT+CTXADDRSET=10", "AT+CTX=470500000,5,0,1,21,1", "+++"]
        );
    }

    #[test]
    fn test_send_power_command() {
        let (mut host, peer) = fake();
        send_power_command(&mut host, true, 11).unwrap();
        assert_eq!(
            peer.drain_commands(),
            vec!["AT+CTXADDRSET=11", "AT+CTX=470500000,5,0,1,21,1", "11", "11", "+++"]
        );
    }

    #[test]
    fn test_receive_tracking_reading() {
        let (mut host, peer) = fake();
        peer.inject("OnRxDone");
        peer.inject("45,12,3");
        let reading = receive_tracking_reading(&mut host, Duration::from_secs(1)).unwrap();
        assert_eq!(reading, Some(TrackingReading { angle: 45, distance: 12, origin: 3 }));
        assert_eq!(peer.drain_commands(), vec!["AT+CRXS=470500000,5,0,1,1"]);
    }

    #[test]
    fn test_receive_tracking_reading_garbage_times_out() {
        let (mut host, peer) = fake();
        peer.inject("garbage");
        let start = Instant::now();
        let reading = receive_tracking_reading(&mut host, Duration::from_millis(400)).unwrap();
        assert_eq!(reading, None);
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[test]
    fn test_receive_power_reading() {
        let (mut host, peer) = fake();
        peer.inject("rssi = -120");
        peer.inject("11");
        peer.inject("Recv:");
        peer.inject("from: 9");
        assert_eq!(receive_power_reading(&mut host, 9, Duration::from_secs(1)).unwrap(), Some(true));

        peer.inject("10");
        peer.inject("from: 9");
        assert_eq!(receive_power_reading(&mut host, 9, Duration::from_secs(1)).unwrap(), Some(false));
        assert!(sent_without_receive_mode(&peer).is_empty());
    }

    #[test]
    fn test_receive_power_reading_mismatch() {
        let (mut host, peer) = fake();
        peer.inject("11");
        peer.inject("from: 4");
        assert_eq!(receive_power_reading(&mut host, 9, Duration::from_secs(1)).unwrap(), None);

        peer.inject("01");
        peer.inject("from: 9");
        assert_eq!(receive_power_reading(&mut host, 9, Duration::from_secs(1)).unwrap(), None);
    }

    #[test]
    fn test_receive_power_reading_timeout() {
        let (mut host, peer) = fake();
        peer.inject("11");
        assert_eq!(receive_power_reading(&mut host, 9, Duration::from_millis(300)).unwrap(), None);
    }
}
