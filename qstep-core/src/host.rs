//! ホストデバッガの抽象化
//!
//! 次命令の予測とコマンドの置き換えは、このトレイトを通してのみホストデバッガにアクセスします。

use crate::{FlagSet, Result};
use std::collections::{BTreeMap, HashMap, HashSet};

/// ホストデバッガのコマンドAPI
pub trait DebugHost {
    /// ホストのコマンドを実行し、テキスト出力を取得する
    fn execute(&mut self, command: &str) -> Result<String>;

    /// 選択中フレームの名前付きレジスタを読み取る
    fn read_register(&mut self, name: &str) -> Result<u64>;

    /// メモリを読み取る
    fn read_memory(&mut self, address: u64, len: usize) -> Result<Vec<u8>>;
}

impl<H: DebugHost + ?Sized> DebugHost for Box<H> {
    fn execute(&mut self, command: &str) -> Result<String> {
        (**self).execute(command)
    }

    fn read_register(&mut self, name: &str) -> Result<u64> {
        (**self).read_register(name)
    }

    fn read_memory(&mut self, address: u64, len: usize) -> Result<Vec<u8>> {
        (**self).read_memory(address, len)
    }
}

/// あらかじめ用意した命令列・レジスタ・メモリで応答するホスト
///
/// `x/Ni <addr>` は登録済み命令をアドレス順に `addr` から N 個返し、
/// `info registers eflags` は設定したフラグ集合を返します。
/// それ以外のコマンドは記録され、登録済みの応答（なければ空文字列）を返します。
///
/// 実ホストを使わずに予測器やセッションを動かすためのテスト用ホストです。
/// 結合テスト（`tests/`）から使えるよう公開しています。
#[derive(Debug, Default)]
pub struct ScriptedHost {
    registers: HashMap<String, u64>,
    memory: BTreeMap<u64, u8>,
    instructions: BTreeMap<u64, String>,
    flags: FlagSet,
    responses: HashMap<String, String>,
    failures: HashSet<String>,
    executed: Vec<String>,
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// レジスタの値を設定する
    pub fn with_register(mut self, name: &str, value: u64) -> Self {
        self.registers.insert(name.to_string(), value);
        self
    }

    /// アドレスに命令を登録する（例: `"mov eax, 1"`）
    pub fn with_instruction(mut self, address: u64, text: &str) -> Self {
        self.instructions.insert(address, text.to_string());
        self
    }

    /// 32ビット値をリトルエンディアンでメモリに書き込む
    pub fn with_word(mut self, address: u64, value: u32) -> Self {
        for (i, b) in value.to_le_bytes().iter().enumerate() {
            self.memory.insert(address + i as u64, *b);
        }
        self
    }

    pub fn with_flags(mut self, flags: FlagSet) -> Self {
        self.flags = flags;
        self
    }

    /// コマンドに対する応答を登録する
    pub fn with_response(mut self, command: &str, output: &str) -> Self {
        self.responses.insert(command.to_string(), output.to_string());
        self
    }

    /// コマンドを失敗させる
    pub fn with_failure(mut self, command: &str) -> Self {
        self.failures.insert(command.to_string());
        self
    }

    /// 実行されたコマンドの履歴
    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    /// `$pc` などのレジスタ参照か数値のアドレスを評価する
    fn evaluate(&self, location: &str) -> Result<u64> {
        match location.strip_prefix('$') {
            Some("pc") => self.evaluate("$eip"),
            Some(reg) => self
                .registers
                .get(reg)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("No registers.")),
            None => crate::parse::parse_address(location),
        }
    }

    fn disassemble(&self, count: usize, location: &str) -> Result<String> {
        let address = self.evaluate(location)?;
        let lines: Vec<String> = self
            .instructions
            .range(address..)
            .take(count)
            .map(|(addr, text)| format!("   0x{:x}:\t{}", addr, text))
            .collect();
        if lines.is_empty() {
            return Err(anyhow::anyhow!("Cannot access memory at address 0x{:x}", address));
        }
        Ok(lines.join("\n"))
    }
}

impl DebugHost for ScriptedHost {
    fn execute(&mut self, command: &str) -> Result<String> {
        self.executed.push(command.to_string());

        if self.failures.contains(command) {
            return Err(anyhow::anyhow!("{}: command failed", command));
        }
        if let Some(output) = self.responses.get(command) {
            return Ok(output.clone());
        }
        if command == "info registers eflags" {
            return Ok(format!("eflags         0x{:<18x}{}", self.flags.bits(), self.flags));
        }
        if let Some(rest) = command.strip_prefix("x/") {
            if let Some((unit, location)) = rest.split_once(' ') {
                if let Some(count) = unit.strip_suffix('i') {
                    let count = if count.is_empty() { 1 } else { count.parse()? };
                    return self.disassemble(count, location);
                }
            }
        }
        Ok(String::new())
    }

    fn read_register(&mut self, name: &str) -> Result<u64> {
        if name == "eflags" {
            return Ok(self.flags.bits() as u64);
        }
        self.registers
            .get(name)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("No frame selected (register {} unavailable)", name))
    }

    fn read_memory(&mut self, address: u64, len: usize) -> Result<Vec<u8>> {
        (0..len as u64)
            .map(|i| {
                self.memory
                    .get(&(address + i))
                    .copied()
                    .ok_or_else(|| anyhow::anyhow!("Cannot access memory at address 0x{:x}", address + i))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_disassembly_in_address_order() {
        let mut host = ScriptedHost::new()
            .with_instruction(0x4005, "nop")
            .with_instruction(0x4000, "mov eax, 1")
            .with_instruction(0x4010, "ret");

        let out = host.execute("x/2i 0x4000").unwrap();
        assert_eq!(out, "   0x4000:\tmov eax, 1\n   0x4005:\tnop");
        assert_eq!(host.execute("x/i 0x4010").unwrap(), "   0x4010:\tret");
        assert!(host.execute("x/i 0x5000").is_err());
        assert_eq!(host.executed().len(), 3);

        let mut host = host.with_register("eip", 0x4005);
        assert_eq!(host.execute("x/i $pc").unwrap(), "   0x4005:\tnop");
    }

    #[test]
    fn test_scripted_registers_and_memory() {
        let mut host = ScriptedHost::new()
            .with_register("esp", 0x1000)
            .with_word(0x1000, 0x4020);

        assert_eq!(host.read_register("esp").unwrap(), 0x1000);
        assert!(host.read_register("eip").is_err());
        assert_eq!(host.read_memory(0x1000, 4).unwrap(), vec![0x20, 0x40, 0, 0]);
        assert!(host.read_memory(0x1002, 4).is_err());
    }

    #[test]
    fn test_scripted_failures_and_responses() {
        let mut host = ScriptedHost::new()
            .with_failure("kill")
            .with_response("target remote :1337", "Remote debugging using :1337");

        assert!(host.execute("kill").is_err());
        assert_eq!(
            host.execute("target remote :1337").unwrap(),
            "Remote debugging using :1337"
        );
        assert_eq!(host.execute("continue").unwrap(), "");
    }
}
