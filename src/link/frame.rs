//! 行プロトコルのワイヤフォーマット
//!
//! 実機との相互運用のため、以下の形式をバイト単位で再現します。
//!
//! - すべての行は ASCII で `\r\n` 終端
//! - 設定コマンド: `AT+<KEY>=<value>\r\n`
//! - 追跡データ: `<角度>,<距離>,<送信元>\r\n` または `<角度>,<距離>\r\n`
//! - バースト終端: `END`
//! - 送信モード終了: `+++\r\n`

/// 行終端
pub const LINE_TERMINATOR: &str = "\r\n";

/// 複数行応答の終端マーカー
pub const END_MARKER: &str = "END";

/// 送信モード終了シーケンス
pub const EXIT_SEQUENCE: &str = "+++\r\n";

/// ローカルセンサーへの測定要求
pub const SENSOR_QUERY: &str = "1";

/// 自ノードアドレス設定
pub const KEY_LOCAL_ADDRESS: &str = "CADDRSET";
/// 送信先アドレス設定
pub const KEY_TARGET_ADDRESS: &str = "CTXADDRSET";
/// 受信モード設定
pub const KEY_RECEIVE: &str = "CRXS";
/// 送信モード設定
pub const KEY_TRANSMIT: &str = "CTX";

/// 受信モードの無線パラメータ（周波数Hz, 帯域, 符号化率, ...）
pub const RECEIVE_PARAMS: &str = "470500000,5,0,1,1";
/// 送信モードの無線パラメータ
pub const TRANSMIT_PARAMS: &str = "470500000,5,0,1,21,1";

/// 電源コードの機能番号
pub const POWER_FUNCTION: u8 = 1;

/// 送信元トレーラー行の接頭辞
const ORIGIN_PREFIX: &str = "from:";

/// 追跡データ（角度, 距離, 送信元）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackingReading {
    pub angle: u32,
    pub distance: u32,
    pub origin: u32,
}

/// センサー測定値（角度, 距離）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    pub angle: u32,
    pub distance: u32,
}

/// 電源コード（機能番号 + オン/オフビット）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerCode {
    pub function: u8,
    pub on: bool,
}

/// 受信した測定結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reading {
    Tracking(TrackingReading),
    Power(bool),
}

impl std::fmt::Display for Reading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reading::Tracking(r) => write!(f, "recv: {},{} from:{}", r.angle, r.distance, r.origin),
            Reading::Power(on) => write!(f, "on/off: {}", if *on { "on" } else { "off" }),
        }
    }
}

/// `AT+<KEY>=<value>\r\n`
pub fn format_at_command(key: &str, value: &str) -> String {
    format!("AT+{}={}{}", key, value, LINE_TERMINATOR)
}

/// 設定コマンド行から値部分を取り出す（終端は無視）
pub fn parse_at_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.trim_end()
        .strip_prefix("AT+")?
        .strip_prefix(key)?
        .strip_prefix('=')
}

/// `<角度>,<距離>,<送信元>\r\n`
pub fn format_tracking_line(reading: &TrackingReading) -> String {
    format!("{},{},{}{}", reading.angle, reading.distance, reading.origin, LINE_TERMINATOR)
}

/// `<角度>,<距離>`（終端なし、センサー応答の1行）
pub fn format_measurement(angle: u32, distance: u32) -> String {
    format!("{},{}", angle, distance)
}

/// `1<0|1>`（終端なし）
pub fn format_power_code(on: bool) -> String {
    format!("{}{}", POWER_FUNCTION, u8::from(on))
}

/// `from: <送信元>`
pub fn format_origin_trailer(origin: u16) -> String {
    format!("{} {}", ORIGIN_PREFIX, origin)
}

/// カンマ区切りの非負整数フィールドを厳密に解析する
///
/// 各フィールドは1文字以上の数字のみ。符号や空白は不可。
fn parse_fields<const N: usize>(line: &str) -> Option<[u32; N]> {
    let mut fields = [0u32; N];
    let mut parts = line.split(',');
    for field in fields.iter_mut() {
        let part = parts.next()?;
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *field = part.parse().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(fields)
}

/// `<int>,<int>,<int>` を解析
pub fn parse_tracking_line(line: &str) -> Option<TrackingReading> {
    let [angle, distance, origin] = parse_fields::<3>(line.trim())?;
    Some(TrackingReading { angle, distance, origin })
}

/// `<int>,<int>` を解析
pub fn parse_measurement(line: &str) -> Option<Measurement> {
    let [angle, distance] = parse_fields::<2>(line.trim())?;
    Some(Measurement { angle, distance })
}

/// 2文字の電源コード（数字1文字 + `0`/`1`）を解析
pub fn parse_power_code(line: &str) -> Option<PowerCode> {
    match line.trim().as_bytes() {
        [function @ b'0'..=b'9', bit @ (b'0' | b'1')] => Some(PowerCode {
            function: function - b'0',
            on: *bit == b'1',
        }),
        _ => None,
    }
}

/// `from: <送信元>` を解析
pub fn parse_origin_trailer(line: &str) -> Option<u32> {
    let value = line.trim().strip_prefix(ORIGIN_PREFIX)?.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}
