//! 逆アセンブル機能
//!
//! ターゲットから読み出したバイト列を i386（Intel構文）として逆アセンブルします。

use crate::parse::parse_immediate;
use crate::Result;
use capstone::prelude::*;
use std::fmt;

/// 命令の最大長（バイト）
pub const MAX_INSTRUCTION_LEN: usize = 15;

/// 逆アセンブルされた命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstruction {
    pub address: u64,
    pub size: usize,
    pub mnemonic: String,
    pub op_str: String,
}

impl DecodedInstruction {
    /// 関数呼び出し命令か
    pub fn is_call(&self) -> bool {
        self.mnemonic == "call"
    }

    /// 分岐・呼び出し命令の即値の分岐先
    pub fn branch_target(&self) -> Option<u64> {
        let m = self.mnemonic.as_str();
        if m == "call" || m.starts_with('j') || m.starts_with("loop") {
            parse_immediate(&self.op_str)
        } else {
            None
        }
    }
}

impl fmt::Display for DecodedInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.op_str.is_empty() {
            write!(f, "{}", self.mnemonic)
        } else {
            write!(f, "{:<6} {}", self.mnemonic, self.op_str)
        }
    }
}

/// i386 逆アセンブラ
pub struct Disassembler {
    cs: Capstone,
}

impl Disassembler {
    pub fn new() -> Result<Self> {
        let cs = Capstone::new()
            .x86()
            .mode(arch::x86::ArchMode::Mode32)
            .syntax(arch::x86::ArchSyntax::Intel)
            .detail(false)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create Capstone: {}", e))?;
        Ok(Self { cs })
    }

    /// `code` の先頭から最大 `count` 命令を逆アセンブルする
    ///
    /// # Arguments
    /// * `code` - 命令のバイト列
    /// * `address` - `code` の先頭アドレス
    /// * `count` - 逆アセンブルする命令数
    pub fn decode(&self, code: &[u8], address: u64, count: usize) -> Result<Vec<DecodedInstruction>> {
        let insns = self
            .cs
            .disasm_count(code, address, count)
            .map_err(|e| anyhow::anyhow!("Failed to disassemble at 0x{:x}: {}", address, e))?;

        let decoded: Vec<DecodedInstruction> = insns
            .as_ref()
            .iter()
            .map(|insn| DecodedInstruction {
                address: insn.address(),
                size: insn.bytes().len(),
                mnemonic: insn.mnemonic().unwrap_or("").to_string(),
                op_str: insn.op_str().unwrap_or("").to_string(),
            })
            .collect();

        if decoded.is_empty() {
            return Err(anyhow::anyhow!("Cannot disassemble memory at 0x{:x}", address));
        }
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_simple_sequence() {
        // mov eax, 1; call 0x1100; ret
        let code = vec![
            0xb8, 0x01, 0x00, 0x00, 0x00, // mov eax, 1
            0xe8, 0xf6, 0x00, 0x00, 0x00, // call 0x1100
            0xc3, // ret
        ];
        let disasm = Disassembler::new().unwrap();
        let insns = disasm.decode(&code, 0x1000, 3).unwrap();

        assert_eq!(insns.len(), 3);
        assert_eq!(insns[0].mnemonic, "mov");
        assert_eq!(insns[0].size, 5);
        assert!(insns[1].is_call());
        assert_eq!(insns[1].address, 0x1005);
        assert_eq!(insns[1].branch_target(), Some(0x1100));
        assert_eq!(insns[2].mnemonic, "ret");
        assert_eq!(insns[2].to_string(), "ret");
        assert_eq!(insns[2].branch_target(), None);
    }

    #[test]
    fn test_decode_respects_count() {
        let code = vec![0x90, 0x90, 0x90, 0x90];
        let disasm = Disassembler::new().unwrap();
        let insns = disasm.decode(&code, 0x2000, 2).unwrap();
        assert_eq!(insns.len(), 2);
        assert_eq!(insns[1].address, 0x2001);
    }

    #[test]
    fn test_decode_empty_is_error() {
        let disasm = Disassembler::new().unwrap();
        assert!(disasm.decode(&[], 0x2000, 1).is_err());
    }
}
