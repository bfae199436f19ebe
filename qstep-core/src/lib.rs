//! qstep デバッガのコア機能
//!
//! このクレートは、エミュレータ上のバイナリを対話的にデバッグするための中核ロジックを提供します。
//! 次に実行される命令の予測、入力ルーチン呼び出しの検出と入力の注入、
//! run/start/quit の置き換えと next/step 系コマンドの実行前フックを統合します。

pub mod command;
pub mod config;
pub mod disasm;
pub mod errors;
pub mod flags;
pub mod host;
pub mod instruction;
pub mod overrides;
pub mod parse;
pub mod predictor;
pub mod prompt;
pub mod remote_host;
pub mod session;

pub use command::Verb;
pub use config::{InputMarker, SessionConfig};
pub use errors::PredictError;
pub use flags::{Condition, Flag, FlagSet};
pub use host::{DebugHost, ScriptedHost};
pub use instruction::{ControlFlow, InstructionView};
pub use predictor::StepPredictor;
pub use prompt::{InputPrompt, ScriptedPrompt, StdinPrompt};
pub use remote_host::RemoteHost;
pub use session::{CommandFn, CommandTable, HookFn, Outcome, Session};

// 他のクレートから使用するために再エクスポート
pub use qstep_elf::SymbolTable;
pub use qstep_target::{Console, EmulatorConfig, MemoryConsole, StdoutConsole, DEFAULT_PORT};

/// デバッガの結果型
pub type Result<T> = anyhow::Result<T>;
