//! qstep ターゲット制御
//!
//! このクレートは、エミュレータ上で動作するデバッグ対象を制御するための低レベル機能を提供します。
//! エミュレータプロセスの起動・停止と入出力の中継、GDBリモートプロトコルによる
//! レジスタ・メモリアクセス、ステップ実行、ブレークポイント設定などを行います。

pub mod console;
pub mod supervisor;
pub mod packet;
pub mod remote;
pub mod registers;

pub use console::{Console, MemoryConsole, StdoutConsole};
pub use supervisor::{EmulatedProcess, EmulatorConfig, ProcessSupervisor, DEFAULT_PORT};
pub use packet::ProtocolError;
pub use remote::{RemoteTarget, StopReason};
pub use registers::{I386Registers, REGISTER_NAMES};

/// ターゲット制御の結果型
pub type Result<T> = anyhow::Result<T>;
