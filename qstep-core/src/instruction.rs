//! 逆アセンブル結果の解釈
//!
//! `x/Ni` 形式の逆アセンブル出力を1行ずつ [`InstructionView`] に変換し、
//! 制御フローの種類を判定します。

use crate::parse::parse_immediate;
use crate::{PredictError, Result};
use regex::Regex;
use std::fmt;

/// 命令の制御フロー上の分類
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFlow {
    /// 無条件ジャンプ（`jmp`, `loop`）
    Jump,
    /// 条件付きジャンプ・ループ（条件サフィックスを保持）
    ConditionalJump(String),
    /// 関数呼び出し
    Call,
    /// 関数からの復帰
    Return,
    /// それ以外（次の命令はフォールスルー）
    Other,
}

/// 逆アセンブルされた1命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionView {
    /// 命令のアドレス
    pub address: u64,
    /// ニーモニック（`rep` などのプレフィックスを含む場合は最初の語）
    pub mnemonic: String,
    /// カンマ区切りのオペランド
    pub operands: Vec<String>,
    /// 末尾のシンボル注釈（`<inchar>` の `inchar` 部分）
    pub symbol: Option<String>,
    /// 元の行
    pub raw: String,
}

impl InstructionView {
    /// ニーモニックから制御フローの種類を判定する
    pub fn control_flow(&self) -> ControlFlow {
        let m = self.mnemonic.as_str();
        match m {
            "jmp" | "loop" => ControlFlow::Jump,
            "call" | "calll" => ControlFlow::Call,
            "ret" | "retl" | "retn" => ControlFlow::Return,
            _ if m.starts_with("loop") => ControlFlow::ConditionalJump(m[4..].to_string()),
            _ if m.starts_with('j') => ControlFlow::ConditionalJump(m[1..].to_string()),
            _ => ControlFlow::Other,
        }
    }

    /// 関数呼び出し命令か
    pub fn is_call(&self) -> bool {
        self.control_flow() == ControlFlow::Call
    }

    /// 分岐先アドレス（最初のオペランドが即値の場合のみ）
    pub fn target_address(&self) -> std::result::Result<u64, PredictError> {
        let operand = self
            .operands
            .first()
            .ok_or_else(|| PredictError::MissingOperand {
                mnemonic: self.mnemonic.clone(),
            })?;
        parse_immediate(operand).ok_or_else(|| PredictError::IndirectTarget {
            mnemonic: self.mnemonic.clone(),
            operand: operand.clone(),
        })
    }
}

impl fmt::Display for InstructionView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic)?;
        if !self.operands.is_empty() {
            write!(f, " {}", self.operands.join(", "))?;
        }
        if let Some(symbol) = &self.symbol {
            write!(f, " <{}>", symbol)?;
        }
        Ok(())
    }
}

/// 逆アセンブル出力のパーサ
pub struct DisassemblyParser {
    /// `=> 0x8049000 <_start+5>:\tcall   0x8049100 <inchar>` 形式の行
    line_pattern: Regex,
    /// 行末のシンボル注釈
    symbol_pattern: Regex,
}

impl DisassemblyParser {
    /// パーサを作成する
    pub fn new() -> Result<Self> {
        let line_pattern =
            Regex::new(r"^\s*(?:=>\s*)?0x(?P<addr>[0-9a-fA-F]+)(?:\s+<[^>]*>)?:\s*(?P<body>.*)$")?;
        let symbol_pattern = Regex::new(r"\s*<(?P<sym>[^<>]+)>\s*$")?;

        Ok(Self {
            line_pattern,
            symbol_pattern,
        })
    }

    /// 1行をパースする
    pub fn parse_line(&self, line: &str) -> std::result::Result<InstructionView, PredictError> {
        let malformed = || PredictError::MalformedDisassembly(line.to_string());

        let caps = self.line_pattern.captures(line).ok_or_else(malformed)?;
        let address = u64::from_str_radix(&caps["addr"], 16).map_err(|_| malformed())?;
        let mut body = caps["body"].trim();

        // 行末の `<symbol>` を取り出す
        let mut symbol = None;
        if let Some(sym) = self.symbol_pattern.captures(body) {
            symbol = Some(sym["sym"].to_string());
            let start = sym.get(0).map(|m| m.start()).unwrap_or(body.len());
            body = body[..start].trim_end();
        }

        let mut parts = body.splitn(2, char::is_whitespace);
        let mnemonic = parts
            .next()
            .filter(|m| !m.is_empty())
            .ok_or_else(malformed)?
            .to_ascii_lowercase();
        let operands = parts
            .next()
            .map(|rest| {
                rest.split(',')
                    .map(|op| op.trim().to_string())
                    .filter(|op| !op.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(InstructionView {
            address,
            mnemonic,
            operands,
            symbol,
            raw: line.to_string(),
        })
    }

    /// 複数行の出力をパースする（空行は無視）
    pub fn parse_listing(
        &self,
        text: &str,
    ) -> std::result::Result<Vec<InstructionView>, PredictError> {
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| self.parse_line(line))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> InstructionView {
        DisassemblyParser::new().unwrap().parse_line(line).unwrap()
    }

    #[test]
    fn test_parse_current_line_with_symbol() {
        let insn = parse("=> 0x08049005 <_start+5>:\tcall   0x8049100 <inchar>");
        assert_eq!(insn.address, 0x0804_9005);
        assert_eq!(insn.mnemonic, "call");
        assert_eq!(insn.operands, vec!["0x8049100"]);
        assert_eq!(insn.symbol.as_deref(), Some("inchar"));
        assert!(insn.is_call());
        assert_eq!(insn.target_address().unwrap(), 0x0804_9100);
    }

    #[test]
    fn test_parse_operands() {
        let insn = parse("   0x4000:\tmov    eax, 1");
        assert_eq!(insn.mnemonic, "mov");
        assert_eq!(insn.operands, vec!["eax", "1"]);
        assert_eq!(insn.symbol, None);
        assert_eq!(insn.to_string(), "mov eax, 1");

        // セグメント指定のコロンを含むオペランド
        let insn = parse("   0x4005 <f>:\tmov    eax,DWORD PTR ds:0x804a000");
        assert_eq!(insn.operands, vec!["eax", "DWORD PTR ds:0x804a000"]);
    }

    #[test]
    fn test_parse_no_operands() {
        let insn = parse("   0x08049010 <inchar+16>:\tret    ");
        assert_eq!(insn.mnemonic, "ret");
        assert!(insn.operands.is_empty());
        assert_eq!(insn.control_flow(), ControlFlow::Return);
        assert!(matches!(
            insn.target_address(),
            Err(PredictError::MissingOperand { .. })
        ));
    }

    #[test]
    fn test_control_flow_classification() {
        let classify = |m: &str| parse(&format!("   0x1000:\t{} 0x2000", m)).control_flow();

        assert_eq!(classify("jmp"), ControlFlow::Jump);
        assert_eq!(classify("loop"), ControlFlow::Jump);
        assert_eq!(classify("call"), ControlFlow::Call);
        assert_eq!(classify("je"), ControlFlow::ConditionalJump("e".to_string()));
        assert_eq!(classify("jnz"), ControlFlow::ConditionalJump("nz".to_string()));
        assert_eq!(classify("loopne"), ControlFlow::ConditionalJump("ne".to_string()));
        assert_eq!(classify("mov"), ControlFlow::Other);
        assert_eq!(classify("push"), ControlFlow::Other);
    }

    #[test]
    fn test_indirect_target() {
        let insn = parse("   0x1000:\tjmp    DWORD PTR [eax*4+0x804a000]");
        assert!(matches!(
            insn.target_address(),
            Err(PredictError::IndirectTarget { .. })
        ));
    }

    #[test]
    fn test_malformed_lines() {
        let parser = DisassemblyParser::new().unwrap();
        assert!(parser.parse_line("Cannot access memory at address 0x0").is_err());
        assert!(parser.parse_line("   0x1000:\t").is_err());
        assert!(parser.parse_line("").is_err());
    }

    #[test]
    fn test_parse_listing_skips_blank_lines() {
        let parser = DisassemblyParser::new().unwrap();
        let listing = "=> 0x4000:\tjmp    0x4010\n   0x4002:\tnop\n\n";
        let insns = parser.parse_listing(listing).unwrap();
        assert_eq!(insns.len(), 2);
        assert_eq!(insns[1].mnemonic, "nop");
    }
}
