//! セッション設定

use crate::InstructionView;
use qstep_target::{EmulatorConfig, DEFAULT_PORT};
use std::path::PathBuf;

/// 入力ルーチンを表すシンボル名の既定の接頭辞
pub const DEFAULT_INPUT_PREFIX: &str = "in";

/// 入力ルーチンの命名規約
///
/// 呼び出し先のシンボル名がこの接頭辞で始まる `call` を、
/// 標準入力を読む呼び出しとみなします。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputMarker {
    prefix: String,
}

impl InputMarker {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// 入力ルーチンの呼び出しであれば、プロンプトに表示するラベルを返す
    pub fn match_call(&self, insn: &InstructionView) -> Option<String> {
        if !insn.is_call() {
            return None;
        }
        let symbol = insn.symbol.as_deref()?;
        symbol
            .starts_with(self.prefix.as_str())
            .then(|| symbol.to_string())
    }
}

impl Default for InputMarker {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_PREFIX)
    }
}

/// デバッグセッションの設定
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// デバッグ対象のバイナリ
    pub binary: PathBuf,
    /// リモートデバッグの待ち受けポート
    pub port: u16,
    /// エミュレータの起動設定
    pub emulator: EmulatorConfig,
    /// 入力ルーチンの命名規約
    pub input_marker: InputMarker,
}

impl SessionConfig {
    /// 既定の設定でバイナリを指定する
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            ..Self::default()
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::new(),
            port: DEFAULT_PORT,
            emulator: EmulatorConfig::default(),
            input_marker: InputMarker::default(),
        }
    }
}
