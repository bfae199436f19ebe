//! GDBリモートシリアルプロトコルのパケット符号化
//!
//! `$<payload>#<checksum>` 形式のフレーミング、チェックサム、
//! ランレングス圧縮とエスケープの復号を扱います。

use thiserror::Error;

/// プロトコルレベルのエラー
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("checksum mismatch: expected {expected:02x}, got {actual:02x}")]
    Checksum { expected: u8, actual: u8 },

    #[error("malformed packet: {0}")]
    Malformed(String),

    #[error("target replied with error {0:02x}")]
    ErrorReply(u8),

    #[error("unexpected reply to '{request}': {reply}")]
    UnexpectedReply { request: String, reply: String },

    #[error("connection closed by target")]
    Closed,
}

/// ペイロードのチェックサム（バイト値の総和 mod 256）
pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// ペイロードをパケットに包む
pub fn frame(payload: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    out.push(b'$');
    out.extend_from_slice(payload.as_bytes());
    out.push(b'#');
    out.extend_from_slice(format!("{:02x}", checksum(payload.as_bytes())).as_bytes());
    out
}

/// 受信したペイロードのエスケープとランレングス圧縮を展開する
///
/// `}` の次のバイトは 0x20 とXORされ、`*` の次の文字は直前の文字の
/// 繰り返し回数（文字コード - 29）を表します。
pub fn decode(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::with_capacity(payload.len());
    let mut iter = payload.iter().copied();

    while let Some(b) = iter.next() {
        match b {
            b'}' => {
                let escaped = iter
                    .next()
                    .ok_or_else(|| ProtocolError::Malformed("dangling escape".to_string()))?;
                out.push(escaped ^ 0x20);
            }
            b'*' => {
                let count = iter
                    .next()
                    .ok_or_else(|| ProtocolError::Malformed("dangling run-length".to_string()))?;
                let last = *out
                    .last()
                    .ok_or_else(|| ProtocolError::Malformed("run-length without data".to_string()))?;
                let repeat = count
                    .checked_sub(29)
                    .ok_or_else(|| ProtocolError::Malformed(format!("bad run-length {}", count)))?;
                out.extend(std::iter::repeat(last).take(repeat as usize));
            }
            _ => out.push(b),
        }
    }

    Ok(out)
}

/// `Exx` 形式のエラー応答であればエラーに変換する
pub fn check_error_reply(reply: &str) -> Result<(), ProtocolError> {
    if reply.len() == 3 && reply.starts_with('E') {
        if let Ok(code) = u8::from_str_radix(&reply[1..], 16) {
            return Err(ProtocolError::ErrorReply(code));
        }
    }
    Ok(())
}

/// 16進文字列をバイト列に変換する
pub fn hex_to_bytes(hex: &str) -> Result<Vec<u8>, ProtocolError> {
    if hex.len() % 2 != 0 {
        return Err(ProtocolError::Malformed(format!("odd hex length {}", hex.len())));
    }
    hex.as_bytes()
        .chunks(2)
        .map(|pair| {
            let digits = pair
                .iter()
                .all(u8::is_ascii_hexdigit)
                .then(|| std::str::from_utf8(pair).ok())
                .flatten();
            digits
                .and_then(|d| u8::from_str_radix(d, 16).ok())
                .ok_or_else(|| {
                    ProtocolError::Malformed(format!("bad hex '{}'", String::from_utf8_lossy(pair)))
                })
        })
        .collect()
}
