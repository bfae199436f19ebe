//! GDBリモートプロトコルによるターゲット制御
//!
//! エミュレータのリモートデバッグ待ち受けポートに接続し、
//! レジスタ・メモリの読み出し、ステップ実行、継続実行、ブレークポイント設定を行います。

use crate::packet::{self, ProtocolError};
use crate::{I386Registers, Result};
use std::io::{BufReader, Read as _, Write as _};
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

/// 接続の再試行間隔
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// NACK を受けたときの再送回数
const MAX_SEND_ATTEMPTS: usize = 3;

/// `m` パケット1回で読み出す最大バイト数
const MAX_MEMORY_CHUNK: usize = 0x400;

/// 停止イベントの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// シグナルによる停止（ステップ完了・ブレークポイントは SIGTRAP = 5）
    Signal(u8),
    /// プロセス終了（終了コード）
    Exited(u8),
    /// シグナルによる強制終了
    Terminated(u8),
}

impl StopReason {
    /// SIGTRAP のシグナル番号
    pub const SIGTRAP: u8 = 5;

    /// 停止応答（`S`/`T`/`W`/`X`）をパースする
    pub fn parse(reply: &str) -> std::result::Result<Self, ProtocolError> {
        let malformed = || ProtocolError::Malformed(format!("stop reply '{}'", reply));
        let kind = reply.chars().next().ok_or_else(malformed)?;
        let code = reply
            .get(1..3)
            .and_then(|s| u8::from_str_radix(s, 16).ok())
            .ok_or_else(malformed)?;

        match kind {
            'S' | 'T' => Ok(StopReason::Signal(code)),
            'W' => Ok(StopReason::Exited(code)),
            'X' => Ok(StopReason::Terminated(code)),
            _ => Err(malformed()),
        }
    }

    /// プロセスがまだ存在するか
    pub fn is_alive(&self) -> bool {
        matches!(self, StopReason::Signal(_))
    }
}

/// リモートターゲットへの接続
pub struct RemoteTarget {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    address: String,
}

impl RemoteTarget {
    /// ターゲットに接続する
    ///
    /// エミュレータの起動直後は待ち受けが始まっていないことがあるため、
    /// `timeout` の間は接続を再試行します。
    pub fn connect(address: &str, timeout: Duration) -> Result<Self> {
        let deadline = Instant::now() + timeout;
        let stream = loop {
            match TcpStream::connect(address) {
                Ok(stream) => break stream,
                Err(e) if Instant::now() < deadline => {
                    tracing::debug!("connect to {} failed, retrying: {}", address, e);
                    thread::sleep(CONNECT_RETRY_INTERVAL);
                }
                Err(e) => {
                    return Err(anyhow::anyhow!("Failed to connect to {}: {}", address, e));
                }
            }
        };
        stream.set_nodelay(true)?;

        let writer = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
            address: address.to_string(),
        })
    }

    /// 接続先アドレス
    pub fn address(&self) -> &str {
        &self.address
    }

    fn read_byte(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        match self.reader.read(&mut byte)? {
            0 => Err(ProtocolError::Closed.into()),
            _ => Ok(byte[0]),
        }
    }

    /// パケットを送信し、ACKを待つ
    fn send_packet(&mut self, payload: &str) -> Result<()> {
        let framed = packet::frame(payload);
        for _ in 0..MAX_SEND_ATTEMPTS {
            tracing::trace!("-> {}", payload);
            self.writer.write_all(&framed)?;
            self.writer.flush()?;

            match self.read_byte()? {
                b'+' => return Ok(()),
                b'-' => continue,
                other => {
                    return Err(ProtocolError::Malformed(format!(
                        "expected ack, got byte {:#04x}",
                        other
                    ))
                    .into())
                }
            }
        }
        Err(anyhow::anyhow!("Target rejected packet '{}'", payload))
    }

    /// パケットを1つ受信し、ACKを返す
    fn read_packet(&mut self) -> Result<String> {
        // '$' まで読み飛ばす（余分な '+' など）
        while self.read_byte()? != b'$' {}

        let mut payload = Vec::new();
        loop {
            match self.read_byte()? {
                b'#' => break,
                b => payload.push(b),
            }
        }

        let hi = self.read_byte()?;
        let lo = self.read_byte()?;
        let digits = [hi, lo];
        let expected = std::str::from_utf8(&digits)
            .ok()
            .and_then(|s| u8::from_str_radix(s, 16).ok())
            .ok_or_else(|| ProtocolError::Malformed("bad checksum digits".to_string()))?;
        let actual = packet::checksum(&payload);
        if expected != actual {
            self.writer.write_all(b"-")?;
            return Err(ProtocolError::Checksum { expected, actual }.into());
        }
        self.writer.write_all(b"+")?;
        self.writer.flush()?;

        let decoded = packet::decode(&payload)?;
        let reply = String::from_utf8(decoded)
            .map_err(|_| ProtocolError::Malformed("non-UTF-8 payload".to_string()))?;
        tracing::trace!("<- {}", reply);
        Ok(reply)
    }

    /// リクエストを送信し、応答を受け取る
    pub fn request(&mut self, payload: &str) -> Result<String> {
        self.send_packet(payload)?;
        let reply = self.read_packet()?;
        packet::check_error_reply(&reply)?;
        Ok(reply)
    }

    /// `OK` 応答を期待するリクエストを送信する
    fn request_ok(&mut self, payload: &str) -> Result<()> {
        let reply = self.request(payload)?;
        if reply != "OK" {
            return Err(ProtocolError::UnexpectedReply {
                request: payload.to_string(),
                reply,
            }
            .into());
        }
        Ok(())
    }

    /// 停止理由を問い合わせる
    pub fn halt_reason(&mut self) -> Result<StopReason> {
        let reply = self.request("?")?;
        Ok(StopReason::parse(&reply)?)
    }

    /// 汎用レジスタを読み出す
    pub fn read_registers(&mut self) -> Result<I386Registers> {
        let reply = self.request("g")?;
        I386Registers::from_hex(&reply)
    }

    /// メモリを読み出す
    pub fn read_memory(&mut self, address: u64, len: usize) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(len);
        while data.len() < len {
            let offset = data.len();
            let chunk = (len - offset).min(MAX_MEMORY_CHUNK);
            let addr = address.wrapping_add(offset as u64);
            let reply = self.request(&format!("m{:x},{:x}", addr, chunk))?;
            let bytes = packet::hex_to_bytes(&reply)?;
            if bytes.is_empty() {
                return Err(anyhow::anyhow!("Cannot access memory at 0x{:x}", addr));
            }
            data.extend_from_slice(&bytes);
        }
        data.truncate(len);
        Ok(data)
    }

    /// 1命令だけ実行する
    pub fn step(&mut self) -> Result<StopReason> {
        let reply = self.request("s")?;
        Ok(StopReason::parse(&reply)?)
    }

    /// 次の停止まで実行を継続する
    pub fn cont(&mut self) -> Result<StopReason> {
        let reply = self.request("c")?;
        Ok(StopReason::parse(&reply)?)
    }

    /// ソフトウェアブレークポイントを設定する
    pub fn insert_breakpoint(&mut self, address: u64) -> Result<()> {
        self.request_ok(&format!("Z0,{:x},1", address))
    }

    /// ソフトウェアブレークポイントを解除する
    pub fn remove_breakpoint(&mut self, address: u64) -> Result<()> {
        self.request_ok(&format!("z0,{:x},1", address))
    }

    /// ターゲットを終了させる
    ///
    /// `k` には応答が返らないことがあるため、送信のみ行います。
    pub fn kill(&mut self) -> Result<()> {
        self.send_packet("k")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stop_reply() {
        assert_eq!(StopReason::parse("S05").unwrap(), StopReason::Signal(5));
        assert_eq!(
            StopReason::parse("T05thread:01;").unwrap(),
            StopReason::Signal(StopReason::SIGTRAP)
        );
        assert_eq!(StopReason::parse("W00").unwrap(), StopReason::Exited(0));
        assert_eq!(StopReason::parse("X09").unwrap(), StopReason::Terminated(9));
        assert!(StopReason::parse("OK").is_err());
        assert!(StopReason::parse("").is_err());
    }

    #[test]
    fn test_stop_reason_alive() {
        assert!(StopReason::Signal(5).is_alive());
        assert!(!StopReason::Exited(0).is_alive());
        assert!(!StopReason::Terminated(15).is_alive());
    }
}
