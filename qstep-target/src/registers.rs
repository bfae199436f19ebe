//! i386 レジスタファイル

use crate::packet::hex_to_bytes;
use crate::Result;

/// `g` パケットで返される汎用レジスタの並び順
pub const REGISTER_NAMES: [&str; 16] = [
    "eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi", "eip", "eflags", "cs", "ss", "ds",
    "es", "fs", "gs",
];

/// i386 汎用レジスタ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct I386Registers {
    values: [u32; 16],
}

impl I386Registers {
    /// `g` パケットの応答（リトルエンディアンの16進列）からレジスタを構築する
    ///
    /// 汎用レジスタ以降（x87/SSE）は無視します。
    pub fn from_hex(hex: &str) -> Result<Self> {
        let needed = REGISTER_NAMES.len() * 8;
        if hex.len() < needed {
            return Err(anyhow::anyhow!(
                "Register reply too short: {} hex digits (expected at least {})",
                hex.len(),
                needed
            ));
        }

        let bytes = hex_to_bytes(&hex[..needed])?;
        let mut values = [0u32; 16];
        for (value, chunk) in values.iter_mut().zip(bytes.chunks_exact(4)) {
            *value = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(Self { values })
    }

    /// 値の配列から構築する
    pub fn from_values(values: [u32; 16]) -> Self {
        Self { values }
    }

    /// レジスタ名から値を取得する
    ///
    /// `pc` / `sp` / `fp` はそれぞれ `eip` / `esp` / `ebp` の別名です。
    pub fn get(&self, name: &str) -> Option<u32> {
        let name = name.trim_start_matches('$').to_ascii_lowercase();
        let name = match name.as_str() {
            "pc" => "eip",
            "sp" => "esp",
            "fp" => "ebp",
            other => other,
        };
        REGISTER_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|idx| self.values[idx])
    }

    /// プログラムカウンタ（EIP）
    pub fn eip(&self) -> u32 {
        self.values[8]
    }

    /// スタックポインタ（ESP）
    pub fn esp(&self) -> u32 {
        self.values[4]
    }

    pub fn eflags(&self) -> u32 {
        self.values[9]
    }

    /// 名前と値の組を並び順に列挙する
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u32)> + '_ {
        REGISTER_NAMES.iter().copied().zip(self.values.iter().copied())
    }
}
