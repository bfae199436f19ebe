//! エラー定義

use thiserror::Error;

/// ターゲットに接続されていない場合のエラーメッセージ
pub const ERR_NOT_CONNECTED: &str = "The program is not being run.";

/// 次命令の予測に失敗した理由
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PredictError {
    #[error("malformed disassembly line: '{0}'")]
    MalformedDisassembly(String),

    #[error("expected {expected} instructions from disassembler, got {got}")]
    ShortDisassembly { expected: usize, got: usize },

    #[error("unknown condition suffix '{0}'")]
    UnknownCondition(String),

    #[error("'{mnemonic}' has no operand")]
    MissingOperand { mnemonic: String },

    #[error("cannot resolve target of '{mnemonic} {operand}'")]
    IndirectTarget { mnemonic: String, operand: String },
}
