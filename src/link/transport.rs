//! バイトストリーム・トランスポートの抽象化
//!
//! 実機シリアルポートとキューによる模擬デバイスを同一のインターフェースで扱います。
//! どちらを使うかは構築時に決まり、実行時の型判定は行いません。

use std::io;

/// リンク層のエラー
///
/// タイムアウトはエラーではなく `Ok(None)` や部分応答として表現されます。
/// ここに含まれるのはセッションを継続できない致命的な障害のみです。
#[derive(Debug)]
pub enum LinkError {
    /// デバイスを開けなかった
    Open { port: String, reason: String },
    /// 入出力エラー（デバイス取り外しなど）
    Io { port: String, source: io::Error },
    /// 閉じたトランスポートへの操作
    Closed(String),
}

impl std::fmt::Display for LinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkError::Open { port, reason } => {
                write!(f, "シリアルポートを開けません {}: {}", port, reason)
            }
            LinkError::Io { port, source } => {
                write!(f, "シリアル入出力エラー {}: {}", port, source)
            }
            LinkError::Closed(port) => {
                write!(f, "シリアルポートは閉じられています: {}", port)
            }
        }
    }
}

impl std::error::Error for LinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LinkError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type LinkResult<T> = Result<T, LinkError>;

/// 行指向バイトストリームのインターフェース
///
/// 1本のリンクは使用中のコンポーネントが排他的に所有し、同時に複数の書き手は存在しません。
pub trait Transport {
    /// ポート名（ログ用）
    fn name(&self) -> &str;

    /// バイト列を書き込む
    fn write(&mut self, data: &[u8]) -> LinkResult<()>;

    /// 出力バッファを送出する
    fn flush(&mut self) -> LinkResult<()>;

    /// 1行読み取る（改行は含まない）。読み取りタイムアウト時は `None`
    fn read_line(&mut self) -> LinkResult<Option<String>>;

    /// 受信済みで未読のバイト数
    fn bytes_available(&mut self) -> LinkResult<usize>;

    /// 受信バッファを破棄する
    fn clear_input_buffer(&mut self) -> LinkResult<()>;

    /// ポートを閉じる（複数回呼んでもよい）
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn write(&mut self, data: &[u8]) -> LinkResult<()> {
        (**self).write(data)
    }

    fn flush(&mut self) -> LinkResult<()> {
        (**self).flush()
    }

    fn read_line(&mut self) -> LinkResult<Option<String>> {
        (**self).read_line()
    }

    fn bytes_available(&mut self) -> LinkResult<usize> {
        (**self).bytes_available()
    }

    fn clear_input_buffer(&mut self) -> LinkResult<()> {
        (**self).clear_input_buffer()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}
