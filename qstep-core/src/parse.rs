//! パース関連のユーティリティ関数

use anyhow::Result;

/// アドレス文字列をu64にパース
///
/// 16進数（0xプレフィックス付き）または10進数をサポート
///
/// # Examples
/// ```
/// use qstep_core::parse::parse_address;
///
/// assert_eq!(parse_address("0x1234").unwrap(), 0x1234);
/// assert_eq!(parse_address("1234").unwrap(), 1234);
/// ```
pub fn parse_address(s: &str) -> Result<u64> {
    let s = s.trim();

    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
            .map_err(|e| anyhow::anyhow!("Invalid hexadecimal address '{}': {}", s, e))
    } else {
        s.parse::<u64>()
            .map_err(|e| anyhow::anyhow!("Invalid address '{}': {}", s, e))
    }
}

/// 命令オペランドが即値アドレスであればパースする
///
/// `0x` 付き16進数と10進数のみを受け付け、レジスタやメモリ参照は `None` を返します。
/// AT&T 構文の `$` 接頭辞は取り除きます。
pub fn parse_immediate(operand: &str) -> Option<u64> {
    let operand = operand.trim().trim_start_matches('$');
    if operand.is_empty() {
        return None;
    }
    let is_number = operand
        .strip_prefix("0x")
        .map(|hex| !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()))
        .unwrap_or_else(|| operand.chars().all(|c| c.is_ascii_digit()));
    if !is_number {
        return None;
    }
    parse_address(operand).ok()
}
