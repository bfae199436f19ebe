//! 次命令の予測
//!
//! step/next 系コマンドの実行前に、そのコマンドの後で実行位置となる命令を求めます。
//! ジャンプ・条件分岐・呼び出し・復帰を考慮し、単純なフォールスルーとは限りません。

use crate::instruction::DisassemblyParser;
use crate::{Condition, ControlFlow, DebugHost, FlagSet, InstructionView, PredictError, Result};
use qstep_target::Console;
use std::sync::Arc;

/// プログラムカウンタのレジスタ名
const PC_REGISTER: &str = "eip";

/// スタックポインタのレジスタ名
const SP_REGISTER: &str = "esp";

/// フラグを表示するホストコマンド
const FLAGS_COMMAND: &str = "info registers eflags";

/// 次命令の予測器
pub struct StepPredictor {
    parser: DisassemblyParser,
    console: Arc<dyn Console>,
}

impl StepPredictor {
    /// 予測器を作成する
    pub fn new(console: Arc<dyn Console>) -> Result<Self> {
        Ok(Self {
            parser: DisassemblyParser::new()?,
            console,
        })
    }

    /// 次に実行される命令を予測する
    ///
    /// `step_into` が真のとき（step/stepi）は `call` を呼び出し先への分岐として扱います。
    /// 途中で失敗した場合は理由をコンソールに表示し、`None` を返します。
    pub fn predict<H: DebugHost + ?Sized>(
        &self,
        host: &mut H,
        step_into: bool,
    ) -> Option<InstructionView> {
        match self.resolve_next(host, step_into) {
            Ok(next) => {
                tracing::debug!("predicted next instruction: {}", next);
                Some(next)
            }
            Err(e) => {
                self.console
                    .print_line(&format!("Warning: failed to resolve the next instruction: {}", e));
                None
            }
        }
    }

    /// 次に実行される命令を求める
    pub fn resolve_next<H: DebugHost + ?Sized>(
        &self,
        host: &mut H,
        step_into: bool,
    ) -> Result<InstructionView> {
        let pc = host.read_register(PC_REGISTER)?;
        let mut listing = self.disassemble(host, pc, 2)?;
        let fallthrough = listing.pop().ok_or(PredictError::ShortDisassembly {
            expected: 2,
            got: 0,
        })?;
        let current = listing.pop().ok_or(PredictError::ShortDisassembly {
            expected: 2,
            got: 1,
        })?;

        match current.control_flow() {
            ControlFlow::Jump => self.disassemble_at_target(host, &current),
            ControlFlow::Call if step_into => self.disassemble_at_target(host, &current),
            ControlFlow::Return => {
                let sp = host.read_register(SP_REGISTER)?;
                let word = host.read_memory(sp, 4)?;
                let bytes: [u8; 4] = word.as_slice().try_into().map_err(|_| {
                    anyhow::anyhow!("Short read of return address at 0x{:x}", sp)
                })?;
                let return_address = u32::from_le_bytes(bytes) as u64;
                self.disassemble_one(host, return_address)
            }
            ControlFlow::ConditionalJump(suffix) => {
                let condition = Condition::from_suffix(&suffix)?;
                let flags = FlagSet::parse(&host.execute(FLAGS_COMMAND)?);
                if condition.holds(&flags) {
                    self.disassemble_at_target(host, &current)
                } else {
                    Ok(fallthrough)
                }
            }
            ControlFlow::Call | ControlFlow::Other => Ok(fallthrough),
        }
    }

    /// `address` から `count` 命令を逆アセンブルする
    fn disassemble<H: DebugHost + ?Sized>(
        &self,
        host: &mut H,
        address: u64,
        count: usize,
    ) -> Result<Vec<InstructionView>> {
        let output = host.execute(&format!("x/{}i 0x{:x}", count, address))?;
        let mut insns = self.parser.parse_listing(&output)?;
        if insns.len() < count {
            return Err(PredictError::ShortDisassembly {
                expected: count,
                got: insns.len(),
            }
            .into());
        }
        insns.truncate(count);
        Ok(insns)
    }

    fn disassemble_one<H: DebugHost + ?Sized>(
        &self,
        host: &mut H,
        address: u64,
    ) -> Result<InstructionView> {
        let mut insns = self.disassemble(host, address, 1)?;
        insns
            .pop()
            .ok_or_else(|| PredictError::ShortDisassembly { expected: 1, got: 0 }.into())
    }

    fn disassemble_at_target<H: DebugHost + ?Sized>(
        &self,
        host: &mut H,
        current: &InstructionView,
    ) -> Result<InstructionView> {
        let target = current.target_address()?;
        self.disassemble_one(host, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Flag, ScriptedHost};
    use qstep_target::MemoryConsole;

    fn predictor() -> (StepPredictor, Arc<MemoryConsole>) {
        let console = Arc::new(MemoryConsole::new());
        (StepPredictor::new(console.clone()).unwrap(), console)
    }

    fn jump_program(current: &str) -> ScriptedHost {
        ScriptedHost::new()
            .with_register("eip", 0x4000)
            .with_instruction(0x4000, current)
            .with_instruction(0x4002, "inc ecx")
            .with_instruction(0x4010, "dec edx")
    }

    #[test]
    fn test_jmp_resolves_to_target() {
        let (predictor, _) = predictor();
        let mut host = ScriptedHost::new()
            .with_register("eip", 0x3ffe)
            .with_instruction(0x3ffe, "jmp 0x4000")
            .with_instruction(0x3fff, "nop")
            .with_instruction(0x4000, "mov eax, 1");

        let next = predictor.predict(&mut host, false).unwrap();
        assert_eq!(next.address, 0x4000);
        assert_eq!(next.mnemonic, "mov");
        assert_eq!(next.operands, vec!["eax", "1"]);
    }

    #[test]
    fn test_conditional_jump_not_taken() {
        let (predictor, _) = predictor();
        let mut host = jump_program("je 0x4010").with_flags(FlagSet::default());

        let next = predictor.predict(&mut host, false).unwrap();
        assert_eq!(next.address, 0x4002);
        assert_eq!(next.mnemonic, "inc");
    }

    #[test]
    fn test_conditional_jump_taken() {
        let (predictor, _) = predictor();
        let mut host = jump_program("je 0x4010").with_flags(FlagSet::from_flags(&[Flag::Zero]));

        let next = predictor.predict(&mut host, false).unwrap();
        assert_eq!(next.address, 0x4010);
        assert_eq!(next.mnemonic, "dec");
    }

    #[test]
    fn test_conditional_loop_uses_flags() {
        let (predictor, _) = predictor();
        let mut host = jump_program("loopne 0x4010").with_flags(FlagSet::default());
        assert_eq!(predictor.predict(&mut host, false).unwrap().address, 0x4010);

        let mut host =
            jump_program("loopne 0x4010").with_flags(FlagSet::from_flags(&[Flag::Zero]));
        assert_eq!(predictor.predict(&mut host, false).unwrap().address, 0x4002);
    }

    #[test]
    fn test_unconditional_loop_always_taken() {
        let (predictor, _) = predictor();
        let mut host = jump_program("loop 0x4010");
        assert_eq!(predictor.predict(&mut host, true).unwrap().address, 0x4010);
    }

    #[test]
    fn test_ret_resolves_to_return_address() {
        let (predictor, _) = predictor();
        let mut host = ScriptedHost::new()
            .with_register("eip", 0x4100)
            .with_register("esp", 0x1000)
            .with_word(0x1000, 0x4020)
            .with_instruction(0x4100, "ret")
            .with_instruction(0x4101, "nop")
            .with_instruction(0x4020, "add esp, 4");

        let next = predictor.predict(&mut host, false).unwrap();
        assert_eq!(next.address, 0x4020);
        assert_eq!(next.mnemonic, "add");
    }

    #[test]
    fn test_call_descends_only_when_stepping() {
        let (predictor, _) = predictor();
        let program = || {
            ScriptedHost::new()
                .with_register("eip", 0x4000)
                .with_instruction(0x4000, "call 0x4100 <inchar>")
                .with_instruction(0x4005, "mov ebx, eax")
                .with_instruction(0x4100, "push ebp")
        };

        let next = predictor.predict(&mut program(), false).unwrap();
        assert_eq!(next.mnemonic, "mov");

        let next = predictor.predict(&mut program(), true).unwrap();
        assert_eq!(next.address, 0x4100);
        assert_eq!(next.mnemonic, "push");
    }

    #[test]
    fn test_other_instruction_uses_fallthrough() {
        let (predictor, _) = predictor();
        let mut host = ScriptedHost::new()
            .with_register("eip", 0x4000)
            .with_instruction(0x4000, "mov eax, 1")
            .with_instruction(0x4005, "call 0x4100 <inchar>");

        let next = predictor.predict(&mut host, true).unwrap();
        assert!(next.is_call());
        assert_eq!(next.symbol.as_deref(), Some("inchar"));
        // フラグも分岐先も参照しない
        assert_eq!(host.executed(), &["x/2i 0x4000".to_string()]);
    }

    #[test]
    fn test_failures_yield_none_and_warn() {
        let (predictor, console) = predictor();

        // フレームなし
        let mut host = ScriptedHost::new();
        assert!(predictor.predict(&mut host, false).is_none());
        assert!(console.contains("failed to resolve the next instruction"));

        // 未知の条件サフィックス
        let mut host = jump_program("jecxz 0x4010");
        assert!(predictor.predict(&mut host, false).is_none());
        assert!(console.contains("unknown condition suffix 'ecxz'"));

        // 間接ジャンプ
        let mut host = jump_program("jmp eax");
        assert!(predictor.predict(&mut host, false).is_none());

        // 逆アセンブル結果が1命令しかない
        let mut host = ScriptedHost::new()
            .with_register("eip", 0x4000)
            .with_instruction(0x4000, "nop");
        assert!(predictor.predict(&mut host, false).is_none());

        // 不正な逆アセンブル出力
        let mut host = ScriptedHost::new()
            .with_register("eip", 0x4000)
            .with_response("x/2i 0x4000", "garbage\nmore garbage");
        assert!(predictor.predict(&mut host, false).is_none());
        assert!(console.contains("malformed disassembly line"));
    }
}
