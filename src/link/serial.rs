//! 実機シリアルポートによるトランスポート

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort};
use tracing::{debug, info};

use super::transport::{LinkError, LinkResult, Transport};

/// 実機シリアルポート
///
/// 固定ボーレート・短い読み取りタイムアウトで開きます。
/// 行の途中までしか届いていない場合は内部バッファに保持し、次回の読み取りで続きを連結します。
/// Drop 時に必ず閉じられます。
pub struct HardwareSerial {
    name: String,
    port: Option<Box<dyn SerialPort>>,
    pending: Vec<u8>,
}

impl HardwareSerial {
    /// シリアルポートを開く
    pub fn open(path: &str, baudrate: u32, read_timeout: Duration) -> LinkResult<Self> {
        let port = serialport::new(path, baudrate)
            .timeout(read_timeout)
            .open()
            .map_err(|e| LinkError::Open {
                port: path.to_string(),
                reason: e.to_string(),
            })?;

        info!("シリアルポートを開きました: {} ({} baud)", path, baudrate);

        Ok(Self {
            name: path.to_string(),
            port: Some(port),
            pending: Vec::new(),
        })
    }

    fn port_mut(&mut self) -> LinkResult<&mut Box<dyn SerialPort>> {
        let name = &self.name;
        self.port.as_mut().ok_or_else(|| LinkError::Closed(name.clone()))
    }

    fn io_error(&self, source: io::Error) -> LinkError {
        LinkError::Io {
            port: self.name.clone(),
            source,
        }
    }

    /// 保持中のバッファから1行を取り出す
    fn take_pending_line(&mut self) -> Option<String> {
        let newline = self.pending.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=newline).collect();
        Some(String::from_utf8_lossy(&line).trim_end_matches(['\r', '\n']).to_string())
    }
}

impl Transport for HardwareSerial {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, data: &[u8]) -> LinkResult<()> {
        let result = self.port_mut()?.write_all(data);
        result.map_err(|e| self.io_error(e))
    }

    fn flush(&mut self) -> LinkResult<()> {
        let result = self.port_mut()?.flush();
        result.map_err(|e| self.io_error(e))
    }

    fn read_line(&mut self) -> LinkResult<Option<String>> {
        if let Some(line) = self.take_pending_line() {
            return Ok(Some(line));
        }

        let mut byte = [0u8; 1];
        loop {
            let result = self.port_mut()?.read(&mut byte);
            match result {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    self.pending.push(byte[0]);
                    if byte[0] == b'\n' {
                        return Ok(self.take_pending_line());
                    }
                }
                // 読み取りタイムアウト: 途中までのデータは次回に持ち越す
                Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.io_error(e)),
            }
        }
    }

    fn bytes_available(&mut self) -> LinkResult<usize> {
        let pending = self.pending.len();
        let result = self.port_mut()?.bytes_to_read();
        result
            .map(|n| n as usize + pending)
            .map_err(|e| self.io_error(io::Error::other(e)))
    }

    fn clear_input_buffer(&mut self) -> LinkResult<()> {
        self.pending.clear();
        let result = self.port_mut()?.clear(ClearBuffer::Input);
        result.map_err(|e| self.io_error(io::Error::other(e)))
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("シリアルポートを閉じました: {}", self.name);
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}

impl Drop for HardwareSerial {
    fn drop(&mut self) {
        self.close();
    }
}

/// 利用可能なシリアルポートの一覧
///
/// # 戻り値
///
/// (デバイス名, 種別の説明) のベクター
pub fn list_ports() -> LinkResult<Vec<(String, String)>> {
    let ports = serialport::available_ports().map_err(|e| LinkError::Io {
        port: "*".to_string(),
        source: io::Error::other(e),
    })?;

    Ok(ports
        .into_iter()
        .map(|port| {
            let description = match port.port_type {
                serialport::SerialPortType::UsbPort(usb) => format!(
                    "USB VID:PID={:04x}:{:04x} {}",
                    usb.vid,
                    usb.pid,
                    usb.product.unwrap_or_default()
                ),
                serialport::SerialPortType::PciPort => "PCI".to_string(),
                serialport::SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                serialport::SerialPortType::Unknown => "不明".to_string(),
            };
            (port.port_name, description)
        })
        .collect())
}
