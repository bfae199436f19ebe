//! エミュレータプロセスの管理
//!
//! デバッグ対象のバイナリをユーザーモードエミュレータ上でリモートデバッグ待ち受け状態で起動し、
//! その標準出力を中継し、標準入力へ入力を注入します。

use crate::{Console, Result};
use nix::fcntl::OFlag;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::fs::File;
use std::io::{BufRead, BufReader, Write as _};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// リモートデバッグの既定ポート
pub const DEFAULT_PORT: u16 = 1337;

/// 既定のエミュレータ
pub const DEFAULT_EMULATOR: &str = "qemu-i386-static";

/// 終了要求後に待機する最大時間
const STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// 終了待ちのポーリング間隔
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// 中継する出力行の接頭辞
const OUTPUT_PREFIX: &str = "output << ";

/// 引数テンプレート中のポート番号プレースホルダ
const PORT_PLACEHOLDER: &str = "{port}";

/// 引数テンプレート中のバイナリパスプレースホルダ
const BINARY_PLACEHOLDER: &str = "{binary}";

/// エミュレータの起動設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulatorConfig {
    /// エミュレータの実行ファイル
    pub program: String,
    /// 引数テンプレート（`{port}` と `{binary}` が置換される）
    pub args: Vec<String>,
}

impl EmulatorConfig {
    /// `<program> -g <port> <extra_args...> <binary>` の形で起動する設定を作成する
    pub fn qemu(program: impl Into<String>, extra_args: &[String]) -> Self {
        let mut args = vec!["-g".to_string(), PORT_PLACEHOLDER.to_string()];
        args.extend(extra_args.iter().cloned());
        args.push(BINARY_PLACEHOLDER.to_string());
        Self {
            program: program.into(),
            args,
        }
    }

    /// 任意の引数テンプレートで設定を作成する
    pub fn custom(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// プレースホルダを置換した引数列を生成する
    pub fn render_args(&self, binary: &Path, port: u16) -> Vec<String> {
        let binary = binary.to_string_lossy();
        let port = port.to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace(PORT_PLACEHOLDER, &port)
                    .replace(BINARY_PLACEHOLDER, &binary)
            })
            .collect()
    }
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self::qemu(DEFAULT_EMULATOR, &["-one-insn-per-tb".to_string()])
    }
}

/// 実行中のエミュレータプロセス
pub struct EmulatedProcess {
    binary_path: PathBuf,
    port: u16,
    child: Child,
    stdin: Option<ChildStdin>,
    /// 出力中継スレッド（ストリーム終端で自然に終了する）
    reader: Option<JoinHandle<()>>,
}

impl EmulatedProcess {
    /// デバッグ対象バイナリのパス
    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    /// リモートデバッグの待ち受けポート
    pub fn port(&self) -> u16 {
        self.port
    }

    /// OSプロセスID
    pub fn pid(&self) -> u32 {
        self.child.id()
    }
}

/// エミュレータプロセスの管理者
///
/// セッションごとに高々1つの [`EmulatedProcess`] を所有します。
pub struct ProcessSupervisor {
    config: EmulatorConfig,
    console: Arc<dyn Console>,
    process: Option<EmulatedProcess>,
}

impl ProcessSupervisor {
    /// 新しい管理者を作成する
    pub fn new(config: EmulatorConfig, console: Arc<dyn Console>) -> Self {
        Self {
            config,
            console,
            process: None,
        }
    }

    /// エミュレータの起動設定
    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    /// 実行中のプロセス
    pub fn process(&self) -> Option<&EmulatedProcess> {
        self.process.as_ref()
    }

    /// プロセスが実行中かどうか
    ///
    /// 自然に終了していたプロセスはここで回収されます。
    pub fn is_running(&mut self) -> bool {
        let exited = match self.process.as_mut() {
            None => return false,
            Some(process) => match process.child.try_wait() {
                Ok(Some(status)) => Some(status),
                Ok(None) => None,
                Err(e) => {
                    tracing::warn!("failed to poll emulator status: {}", e);
                    None
                }
            },
        };

        if let Some(status) = exited {
            self.console
                .print_line(&format!("Emulated process exited ({})", status));
            self.process = None;
            return false;
        }
        true
    }

    /// エミュレータを起動する
    ///
    /// 既に実行中の場合は警告を表示して何もしません。
    /// 標準出力と標準エラーは1本のパイプにまとめられ、バックグラウンドスレッドが
    /// 行単位でコンソールへ中継します。
    pub fn start(&mut self, binary_path: &Path, port: u16) -> Result<()> {
        if self.is_running() {
            self.console
                .print_line("Warning: the emulated program is already running.");
            return Ok(());
        }

        self.console.print_line(&format!(
            "Starting {} in debug mode on tcp:{}...",
            binary_path.display(),
            port
        ));

        let args = self.config.render_args(binary_path, port);
        tracing::debug!("spawning emulator: {} {:?}", self.config.program, args);

        // stdoutとstderrを同じパイプにまとめる（元のfdは子に継承させない）
        let (output_rx, output_tx) = nix::unistd::pipe2(OFlag::O_CLOEXEC)?;
        let output_tx_err = output_tx.try_clone()?;

        let mut child = {
            let mut command = Command::new(&self.config.program);
            command
                .args(&args)
                .stdin(Stdio::piped())
                .stdout(Stdio::from(output_tx))
                .stderr(Stdio::from(output_tx_err));
            command.spawn().map_err(|e| {
                anyhow::anyhow!("Failed to launch emulator '{}': {}", self.config.program, e)
            })?
            // commandのドロップで親側の書き込み端が閉じられる
        };

        let stdin = child.stdin.take();
        let console = Arc::clone(&self.console);
        let output = File::from(output_rx);
        let reader = thread::Builder::new()
            .name("emulator-output".to_string())
            .spawn(move || mirror_output(output, console.as_ref()))?;

        self.process = Some(EmulatedProcess {
            binary_path: binary_path.to_path_buf(),
            port,
            child,
            stdin,
            reader: Some(reader),
        });

        self.console
            .print_line("Emulator started and waiting for the debugger.");
        Ok(())
    }

    /// プロセスの標準入力へ1行書き込む
    ///
    /// 末尾に改行を付けて即座にフラッシュします。
    /// 実行中でなければ失敗を表示して何もしません。
    pub fn send_input(&mut self, text: &str) -> Result<()> {
        if !self.is_running() {
            self.console
                .print_line("Error: the emulated process is not running.");
            return Ok(());
        }

        let stdin = self
            .process
            .as_mut()
            .and_then(|p| p.stdin.as_mut())
            .ok_or_else(|| anyhow::anyhow!("Emulator stdin is not available"))?;

        stdin.write_all(text.as_bytes())?;
        stdin.write_all(b"\n")?;
        stdin.flush()?;
        tracing::debug!("sent {} bytes of input", text.len() + 1);
        Ok(())
    }

    /// エミュレータを停止する
    ///
    /// SIGTERMを送り、最大1秒だけ終了を待ちます。
    /// 待機がタイムアウトしてもそれ以上の処理は行いません。
    pub fn stop(&mut self) {
        if !self.is_running() {
            self.console
                .print_line("Warning: no emulated process is running.");
            return;
        }
        let Some(mut process) = self.process.take() else {
            return;
        };

        self.console.print_line("Stopping the emulated program...");

        // 標準入力を閉じてから終了を要求する
        drop(process.stdin.take());
        let pid = Pid::from_raw(process.child.id() as i32);
        if let Err(e) = signal::kill(pid, Signal::SIGTERM) {
            tracing::debug!("SIGTERM to {} failed: {}", pid, e);
        }

        match wait_with_timeout(&mut process.child, STOP_TIMEOUT) {
            Some(status) => tracing::debug!("emulator exited: {}", status),
            None => tracing::warn!("emulator did not exit within {:?}", STOP_TIMEOUT),
        }

        // 終了済みなら中継スレッドも回収する
        if let Some(reader) = process.reader.take() {
            if reader.is_finished() {
                let _ = reader.join();
            }
        }

        self.console.print_line("Emulated program terminated.");
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        if let Some(mut process) = self.process.take() {
            let _ = process.child.kill();
            let _ = process.child.wait();
        }
    }
}

/// 出力を行単位でコンソールへ中継する
fn mirror_output(output: File, console: &dyn Console) {
    let reader = BufReader::new(output);
    for line in reader.split(b'\n') {
        match line {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                let text = text.strip_suffix('\r').unwrap_or(&text);
                console.print_line(&format!("{}{}", OUTPUT_PREFIX, text));
            }
            Err(e) => {
                tracing::debug!("emulator output closed: {}", e);
                break;
            }
        }
    }
}

/// 子プロセスの終了を一定時間だけ待つ
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("failed to wait for emulator: {}", e);
                return None;
            }
        }
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(STOP_POLL_INTERVAL);
    }
}
