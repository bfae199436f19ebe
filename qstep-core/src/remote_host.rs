//! リモートターゲットに対するホストデバッガの実装
//!
//! エミュレータのリモートデバッグ待ち受けに直接接続し、
//! GDB互換の最小限のコマンド（`target remote`, `x/Ni`, `info registers`, `stepi` など）を
//! テキスト出力付きで実行します。

use crate::disasm::{DecodedInstruction, Disassembler, MAX_INSTRUCTION_LEN};
use crate::errors::ERR_NOT_CONNECTED;
use crate::parse::parse_address;
use crate::{DebugHost, FlagSet, Result};
use qstep_elf::SymbolTable;
use qstep_target::{I386Registers, RemoteTarget, StopReason};
use std::time::Duration;

/// 接続の既定タイムアウト（エミュレータの起動待ちを含む）
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// ページサイズ（コード読み出しの再試行境界）
const PAGE_SIZE: u64 = 0x1000;

/// `x` コマンドの表示形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExamineFormat {
    Instruction,
    HexWord,
}

/// ホストコマンド
#[derive(Debug, Clone, PartialEq, Eq)]
enum HostCommand {
    TargetRemote(String),
    Examine {
        count: usize,
        format: ExamineFormat,
        location: String,
    },
    InfoRegisters(Option<String>),
    StepInstruction,
    NextInstruction,
    Continue,
    Break(String),
    Delete,
    Kill,
    Set,
    Disconnect,
}

impl HostCommand {
    /// コマンド文字列をパースする
    fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("x/") {
            return Self::parse_examine(rest);
        }

        let mut parts = line.split_whitespace();
        let word = parts.next().unwrap_or("");
        let rest: Vec<&str> = parts.collect();

        let command = match word {
            "target" => match rest.as_slice() {
                ["remote", address] => HostCommand::TargetRemote(normalize_address(address)),
                ["remote"] => return Err(anyhow::anyhow!("Argument required (remote address).")),
                _ => return Err(anyhow::anyhow!("Only 'target remote' is supported.")),
            },
            "x" => HostCommand::Examine {
                count: 1,
                format: ExamineFormat::HexWord,
                location: if rest.is_empty() {
                    "$pc".to_string()
                } else {
                    rest.join(" ")
                },
            },
            "info" => match rest.as_slice() {
                ["registers" | "reg" | "r"] => HostCommand::InfoRegisters(None),
                ["registers" | "reg" | "r", name] => {
                    HostCommand::InfoRegisters(Some(name.trim_start_matches('$').to_string()))
                }
                _ => return Err(anyhow::anyhow!("Undefined info command: \"{}\".", rest.join(" "))),
            },
            // 行番号情報がないため step/next は命令単位で動作する
            "stepi" | "si" | "step" | "s" => HostCommand::StepInstruction,
            "nexti" | "ni" | "next" | "n" => HostCommand::NextInstruction,
            "continue" | "c" => HostCommand::Continue,
            "break" | "b" => {
                if rest.is_empty() {
                    return Err(anyhow::anyhow!("Argument required (location)."));
                }
                HostCommand::Break(rest.join(" "))
            }
            "delete" | "d" => HostCommand::Delete,
            "kill" | "k" => HostCommand::Kill,
            "set" => HostCommand::Set,
            "disconnect" => HostCommand::Disconnect,
            _ => return Err(anyhow::anyhow!("Undefined command: \"{}\".", word)),
        };
        Ok(command)
    }

    /// `x/<count><format> <location>` をパースする
    fn parse_examine(rest: &str) -> Result<Self> {
        let (unit, location) = match rest.trim().split_once(char::is_whitespace) {
            Some((unit, location)) => (unit, location.trim()),
            None => (rest.trim(), "$pc"),
        };

        let digits: String = unit.chars().take_while(|c| c.is_ascii_digit()).collect();
        let count = if digits.is_empty() {
            1
        } else {
            digits
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid count '{}'", digits))?
        };
        let letters = &unit[digits.len()..];

        let format = if letters.contains('i') {
            ExamineFormat::Instruction
        } else if letters.chars().all(|c| c == 'x' || c == 'w') {
            ExamineFormat::HexWord
        } else {
            return Err(anyhow::anyhow!("Unsupported format '{}'", letters));
        };

        Ok(HostCommand::Examine {
            count,
            format,
            location: location.to_string(),
        })
    }
}

/// `:1337` 形式を `127.0.0.1:1337` に補完する
fn normalize_address(address: &str) -> String {
    if let Some(port) = address.strip_prefix(':') {
        format!("127.0.0.1:{}", port)
    } else if address.chars().all(|c| c.is_ascii_digit()) {
        format!("127.0.0.1:{}", address)
    } else {
        address.to_string()
    }
}

/// GDB形式のレジスタ行
fn format_register(name: &str, value: u32, symbols: &SymbolTable) -> String {
    let natural = match name {
        "eflags" => FlagSet::from_bits(value).to_string(),
        "eip" => match symbols.annotate(value as u64) {
            Some(annotation) => format!("0x{:x} {}", value, annotation),
            None => format!("0x{:x}", value),
        },
        "esp" | "ebp" => format!("0x{:x}", value),
        _ => (value as i32).to_string(),
    };
    format!("{:<15}{:<19}{}", name, format!("0x{:x}", value), natural)
}

/// リモートターゲットを操作するホストデバッガ
pub struct RemoteHost {
    target: Option<RemoteTarget>,
    symbols: SymbolTable,
    disassembler: Disassembler,
    /// ユーザーが設定したブレークポイント（番号 = 位置 + 1）
    breakpoints: Vec<u64>,
    connect_timeout: Duration,
}

impl RemoteHost {
    /// シンボルテーブルを指定して作成する
    pub fn new(symbols: SymbolTable) -> Result<Self> {
        Ok(Self {
            target: None,
            symbols,
            disassembler: Disassembler::new()?,
            breakpoints: Vec::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        })
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// ターゲットに接続済みか
    pub fn is_connected(&self) -> bool {
        self.target.is_some()
    }

    fn target(&mut self) -> Result<&mut RemoteTarget> {
        self.target
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!(ERR_NOT_CONNECTED))
    }

    fn registers(&mut self) -> Result<I386Registers> {
        self.target()?.read_registers()
    }

    /// アドレス式（数値・`$reg`・シンボル名）を評価する
    fn evaluate(&mut self, expr: &str) -> Result<u64> {
        let expr = expr.trim().trim_start_matches('*');
        if let Some(reg) = expr.strip_prefix('$') {
            return self.read_register(reg);
        }
        if let Ok(address) = parse_address(expr) {
            return Ok(address);
        }
        self.symbols
            .resolve(expr)
            .ok_or_else(|| anyhow::anyhow!("No symbol \"{}\" in current context.", expr))
    }

    /// コードを読み出す（末尾がページ境界をまたいで読めない場合は境界まで）
    fn read_code(&mut self, address: u64, len: usize) -> Result<Vec<u8>> {
        match self.target()?.read_memory(address, len) {
            Ok(code) => Ok(code),
            Err(e) => {
                let to_page_end = (PAGE_SIZE - (address % PAGE_SIZE)) as usize;
                if to_page_end >= len {
                    return Err(e);
                }
                self.target()?.read_memory(address, to_page_end)
            }
        }
    }

    fn decode_at(&mut self, address: u64, count: usize) -> Result<Vec<DecodedInstruction>> {
        let code = self.read_code(address, count * MAX_INSTRUCTION_LEN)?;
        self.disassembler.decode(&code, address, count)
    }

    /// GDB形式の逆アセンブル行
    fn format_instruction(&self, insn: &DecodedInstruction, pc: Option<u64>) -> String {
        let marker = if pc == Some(insn.address) { "=> " } else { "   " };
        let location = match self.symbols.annotate(insn.address) {
            Some(annotation) => format!("0x{:08x} {}", insn.address, annotation),
            None => format!("0x{:08x}", insn.address),
        };
        let target = insn
            .branch_target()
            .and_then(|addr| self.symbols.annotate(addr))
            .map(|annotation| format!(" {}", annotation))
            .unwrap_or_default();
        format!("{}{}:\t{}{}", marker, location, insn, target)
    }

    fn examine_instructions(&mut self, count: usize, address: u64) -> Result<String> {
        let pc = self.registers().ok().map(|regs| regs.eip() as u64);
        let insns = self.decode_at(address, count)?;
        let lines: Vec<String> = insns
            .iter()
            .map(|insn| self.format_instruction(insn, pc))
            .collect();
        Ok(lines.join("\n"))
    }

    fn examine_words(&mut self, count: usize, address: u64) -> Result<String> {
        let data = self.target()?.read_memory(address, count * 4)?;
        let words: Vec<u32> = data
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let lines: Vec<String> = words
            .chunks(4)
            .enumerate()
            .map(|(row, chunk)| {
                let addr = address + (row * 16) as u64;
                let location = match self.symbols.annotate(addr) {
                    Some(annotation) => format!("0x{:x} {}", addr, annotation),
                    None => format!("0x{:x}", addr),
                };
                let values: Vec<String> = chunk.iter().map(|w| format!("0x{:08x}", w)).collect();
                format!("{}:\t{}", location, values.join("\t"))
            })
            .collect();
        Ok(lines.join("\n"))
    }

    fn info_registers(&mut self, name: Option<&str>) -> Result<String> {
        let regs = self.registers()?;
        match name {
            Some(name) => {
                let value = regs
                    .get(name)
                    .ok_or_else(|| anyhow::anyhow!("Invalid register `{}'", name))?;
                Ok(format_register(name, value, &self.symbols))
            }
            None => {
                let lines: Vec<String> = regs
                    .iter()
                    .map(|(name, value)| format_register(name, value, &self.symbols))
                    .collect();
                Ok(lines.join("\n"))
            }
        }
    }

    fn connect(&mut self, address: &str) -> Result<String> {
        if let Some(target) = &self.target {
            return Ok(format!("Already connected to {}.", target.address()));
        }

        let mut target = RemoteTarget::connect(address, self.connect_timeout)?;
        for bp in &self.breakpoints {
            target.insert_breakpoint(*bp)?;
        }
        let reason = target.halt_reason()?;
        tracing::debug!("connected to {}, halted: {:?}", address, reason);
        self.target = Some(target);

        let location = self.report_stop(reason)?;
        Ok(format!("Remote debugging using {}\n{}", address, location))
    }

    /// 停止理由を表示用テキストにする
    fn report_stop(&mut self, reason: StopReason) -> Result<String> {
        match reason {
            StopReason::Signal(sig) => {
                let pc = self.registers()?.eip() as u64;
                let location = self.examine_instructions(1, pc)?;
                if sig != StopReason::SIGTRAP {
                    return Ok(format!("\nProgram received signal {}.\n{}", sig, location));
                }
                match self.breakpoints.iter().position(|bp| *bp == pc) {
                    Some(idx) => Ok(format!("\nBreakpoint {}, {}", idx + 1, location)),
                    None => Ok(location),
                }
            }
            StopReason::Exited(code) => {
                self.target = None;
                if code == 0 {
                    Ok("[Inferior 1 (process 1) exited normally]".to_string())
                } else {
                    Ok(format!("[Inferior 1 (process 1) exited with code {:02o}]", code))
                }
            }
            StopReason::Terminated(sig) => {
                self.target = None;
                Ok(format!("\nProgram terminated with signal {}.", sig))
            }
        }
    }

    fn step_instruction(&mut self) -> Result<String> {
        let reason = self.target()?.step()?;
        self.report_stop(reason)
    }

    /// 1命令実行する（`call` は戻り先まで実行する）
    fn next_instruction(&mut self) -> Result<String> {
        let pc = self.registers()?.eip() as u64;
        let insn = self
            .decode_at(pc, 1)?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Cannot disassemble at 0x{:x}", pc))?;

        if !insn.is_call() {
            return self.step_instruction();
        }

        let return_address = pc + insn.size as u64;
        let temporary = !self.breakpoints.contains(&return_address);
        if temporary {
            self.target()?.insert_breakpoint(return_address)?;
        }
        let result = self.target()?.cont();
        if temporary {
            if let Ok(reason) = &result {
                if reason.is_alive() {
                    self.target()?.remove_breakpoint(return_address)?;
                }
            }
        }
        self.report_stop(result?)
    }

    fn cont(&mut self) -> Result<String> {
        let reason = self.target()?.cont()?;
        self.report_stop(reason)
    }

    fn set_breakpoint(&mut self, location: &str) -> Result<String> {
        let address = self.evaluate(location)?;
        if let Some(target) = self.target.as_mut() {
            target.insert_breakpoint(address)?;
        }
        self.breakpoints.push(address);
        let annotation = self
            .symbols
            .annotate(address)
            .map(|a| format!(" {}", a))
            .unwrap_or_default();
        Ok(format!(
            "Breakpoint {} at 0x{:x}{}",
            self.breakpoints.len(),
            address,
            annotation
        ))
    }

    fn delete_breakpoints(&mut self) -> Result<String> {
        let breakpoints = std::mem::take(&mut self.breakpoints);
        if let Some(target) = self.target.as_mut() {
            for bp in breakpoints {
                target.remove_breakpoint(bp)?;
            }
        }
        Ok(String::new())
    }

    fn kill(&mut self) -> Result<String> {
        let mut target = self
            .target
            .take()
            .ok_or_else(|| anyhow::anyhow!(ERR_NOT_CONNECTED))?;
        // 応答前に接続が閉じられることがある
        if let Err(e) = target.kill() {
            tracing::debug!("kill: {}", e);
        }
        Ok("[Inferior 1 (process 1) killed]".to_string())
    }
}

impl DebugHost for RemoteHost {
    fn execute(&mut self, command: &str) -> Result<String> {
        tracing::debug!("host command: {}", command);
        match HostCommand::parse(command)? {
            HostCommand::TargetRemote(address) => self.connect(&address),
            HostCommand::Examine {
                count,
                format,
                location,
            } => {
                let address = self.evaluate(&location)?;
                match format {
                    ExamineFormat::Instruction => self.examine_instructions(count, address),
                    ExamineFormat::HexWord => self.examine_words(count, address),
                }
            }
            HostCommand::InfoRegisters(name) => self.info_registers(name.as_deref()),
            HostCommand::StepInstruction => self.step_instruction(),
            HostCommand::NextInstruction => self.next_instruction(),
            HostCommand::Continue => self.cont(),
            HostCommand::Break(location) => self.set_breakpoint(&location),
            HostCommand::Delete => self.delete_breakpoints(),
            HostCommand::Kill => self.kill(),
            HostCommand::Set => Ok(String::new()),
            HostCommand::Disconnect => {
                self.target = None;
                Ok("Ending remote debugging.".to_string())
            }
        }
    }

    fn read_register(&mut self, name: &str) -> Result<u64> {
        let regs = self.registers()?;
        regs.get(name)
            .map(u64::from)
            .ok_or_else(|| anyhow::anyhow!("Invalid register `{}'", name))
    }

    fn read_memory(&mut self, address: u64, len: usize) -> Result<Vec<u8>> {
        self.target()?.read_memory(address, len)
    }
}
