//! コンソール出力
//!
//! ステータスメッセージとエミュレータの出力はすべてこのトレイトを経由して表示されます。

use std::io::Write as _;
use std::sync::Mutex;

/// 行単位で書き込むコンソール
///
/// エミュレータ出力の中継スレッドからも呼ばれるため `Send + Sync` を要求します。
pub trait Console: Send + Sync {
    /// 1行を書き込み、即座にフラッシュする
    fn print_line(&self, line: &str);
}

/// 標準出力に書き込むコンソール
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutConsole;

impl Console for StdoutConsole {
    fn print_line(&self, line: &str) {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        // 書き込み失敗（パイプ切断など）は無視する
        let _ = writeln!(lock, "{}", line);
        let _ = lock.flush();
    }
}

/// 書き込まれた行をメモリに保持するコンソール
#[derive(Debug, Default)]
pub struct MemoryConsole {
    lines: Mutex<Vec<String>>,
}

impl MemoryConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// これまでに書き込まれた行のコピーを取得する
    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// 指定した文字列を含む行があるか
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|l| l.contains(needle))
    }
}

impl Console for MemoryConsole {
    fn print_line(&self, line: &str) {
        match self.lines.lock() {
            Ok(mut lines) => lines.push(line.to_string()),
            Err(poisoned) => poisoned.into_inner().push(line.to_string()),
        }
    }
}
