//! qstep ELF シンボル情報
//!
//! デバッグ対象バイナリのシンボルテーブルを読み込み、
//! シンボル名とアドレスの相互変換を提供します。

pub mod symbols;

pub use symbols::{Symbol, SymbolTable};

/// ELF解析の結果型
pub type Result<T> = anyhow::Result<T>;
