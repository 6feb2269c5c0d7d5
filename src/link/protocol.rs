//! 半二重・行指向のコマンド送受信
//!
//! コマンドは1文字ずつ小さな間隔を空けて送信します（組込み側の入力バッファ対策で、
//! 実機互換のために必要）。応答は終端マーカー方式か無通信タイムアウト方式で収集し、
//! どちらの方式でも全体タイムアウトに達した時点で、それまでの部分応答を返します。
//!
//! 待機はすべてスリープ付きのポーリングで、呼び出し側のスレッドをブロックします。
//! タイムアウトはエラーではなく `None` や部分応答で表されます。

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use super::frame::END_MARKER;
use super::transport::{LinkResult, Transport};

/// 文字間の送信間隔
pub const CHAR_DELAY: Duration = Duration::from_millis(5);

/// 応答収集時のポーリング間隔
pub const COLLECT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// 1行待ち受け時のポーリング間隔
pub const READ_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 1行待ち受けの既定タイムアウト
pub const DEFAULT_LINE_TIMEOUT: Duration = Duration::from_secs(1);

/// 応答収集の終了方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// `END` 行を受信したら終了
    EndMarker,
    /// 最後の受信（または送信完了）から一定時間無通信なら終了
    IdleTimeout,
}

/// 応答収集の設定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadOptions {
    pub mode: ReadMode,
    /// 全体タイムアウト（ソフトタイムアウト）
    pub max_wait: Duration,
    /// 無通信判定の間隔（IdleTimeout のみ）
    pub idle_gap: Duration,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            mode: ReadMode::IdleTimeout,
            max_wait: Duration::from_secs(3),
            idle_gap: Duration::from_millis(200),
        }
    }
}

impl ReadOptions {
    pub fn idle_timeout() -> Self {
        Self::default()
    }

    pub fn end_marker() -> Self {
        Self {
            mode: ReadMode::EndMarker,
            ..Self::default()
        }
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_idle_gap(mut self, idle_gap: Duration) -> Self {
        self.idle_gap = idle_gap;
        self
    }
}

/// コマンドを送信し、必要なら応答を収集する
///
/// # 引数
///
/// * `transport` - 送受信に使うトランスポート
/// * `command` - 送信するテキスト（終端を含めて呼び出し側が用意する）
/// * `collect` - 応答を収集する場合の設定。`None` なら送信後すぐに戻る
///
/// # 戻り値
///
/// 収集しない場合は `Ok(None)`。収集する場合は受信した行（前後の空白を除去、
/// 空行は除外、終端マーカー方式ではマーカー行を含む）。全体タイムアウトでも
/// 部分応答を返します。トランスポート障害のみエラーになります。
pub fn send_command<T: Transport + ?Sized>(
    transport: &mut T,
    command: &str,
    collect: Option<ReadOptions>,
) -> LinkResult<Option<Vec<String>>> {
    let mut buf = [0u8; 4];
    for ch in command.chars() {
        transport.write(ch.encode_utf8(&mut buf).as_bytes())?;
        thread::sleep(CHAR_DELAY);
    }
    transport.flush()?;
    debug!("[{}] Sent command: {}", transport.name(), command.trim_end());

    let Some(options) = collect else {
        return Ok(None);
    };

    let mut responses = Vec::new();
    let start = Instant::now();
    let mut last_activity = start;

    loop {
        if transport.bytes_available()? > 0 {
            if let Some(line) = transport.read_line()? {
                let line = line.trim();
                if !line.is_empty() {
                    trace!("[{}] Received: {}", transport.name(), line);
                    responses.push(line.to_string());
                    last_activity = Instant::now();
                    if options.mode == ReadMode::EndMarker && line == END_MARKER {
                        break;
                    }
                }
            }
        }

        if options.mode == ReadMode::IdleTimeout && last_activity.elapsed() > options.idle_gap {
            break;
        }

        if start.elapsed() > options.max_wait {
            warn!("[{}] Read timeout ({}行受信済み)", transport.name(), responses.len());
            break;
        }

        thread::sleep(COLLECT_POLL_INTERVAL);
    }

    Ok(Some(responses))
}

/// 空でない1行を最大 `timeout` 待つ
///
/// # 戻り値
///
/// 受信した行（前後の空白を除去）。タイムアウト時は `None`
pub fn read_line<T: Transport + ?Sized>(transport: &mut T, timeout: Duration) -> LinkResult<Option<String>> {
    let start = Instant::now();
    loop {
        if transport.bytes_available()? > 0 {
            if let Some(line) = transport.read_line()? {
                let line = line.trim();
                if !line.is_empty() {
                    return Ok(Some(line.to_string()));
                }
            }
        }
        if start.elapsed() > timeout {
            return Ok(None);
        }
        thread::sleep(READ_POLL_INTERVAL);
    }
}
