//! デバッグセッション
//!
//! ホスト・エミュレータ管理・予測器・入力プロンプトとコマンド表をまとめて保持します。
//! コマンドの置き換えとフックはすべてこのコンテキストを通して動作します。

use crate::{overrides, DebugHost, InputPrompt, Result, SessionConfig, StepPredictor, Verb};
use qstep_target::{Console, ProcessSupervisor};
use std::collections::HashMap;
use std::sync::Arc;

/// コマンド実行後の継続可否
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    /// セッションを終了する
    Exit,
}

/// 置き換えコマンドの本体（`invoke(args, interactive)`）
pub type CommandFn<H> = fn(&mut Session<H>, &str, bool) -> Result<Outcome>;

/// コマンド実行前フック（引数はコマンド名）
pub type HookFn<H> = fn(&mut Session<H>, &str) -> Result<()>;

/// コマンド名とコールバックの対応表
pub struct CommandTable<H: DebugHost> {
    commands: HashMap<String, CommandFn<H>>,
    hooks: HashMap<String, HookFn<H>>,
}

impl<H: DebugHost> CommandTable<H> {
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
            hooks: HashMap::new(),
        }
    }

    /// コマンドを登録する（同名のものは置き換える）
    pub fn register(&mut self, name: &str, command: CommandFn<H>) {
        self.commands.insert(name.to_string(), command);
    }

    /// 実行前フックを定義する
    pub fn define_hook(&mut self, name: &str, hook: HookFn<H>) {
        self.hooks.insert(name.to_string(), hook);
    }

    pub fn command(&self, name: &str) -> Option<CommandFn<H>> {
        self.commands.get(name).copied()
    }

    pub fn hook(&self, name: &str) -> Option<HookFn<H>> {
        self.hooks.get(name).copied()
    }

    /// 登録済みコマンド名（ソート済み）
    pub fn command_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// フック済みコマンド名（ソート済み）
    pub fn hooked_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.hooks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl<H: DebugHost> Default for CommandTable<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// デバッグセッション
pub struct Session<H: DebugHost> {
    pub(crate) host: H,
    pub(crate) supervisor: ProcessSupervisor,
    pub(crate) config: SessionConfig,
    pub(crate) predictor: StepPredictor,
    pub(crate) prompt: Box<dyn InputPrompt>,
    pub(crate) console: Arc<dyn Console>,
    commands: CommandTable<H>,
}

impl<H: DebugHost> Session<H> {
    /// セッションを作成し、run/start/quit の置き換えと next/step 系のフックを登録する
    pub fn new(
        host: H,
        config: SessionConfig,
        console: Arc<dyn Console>,
        prompt: Box<dyn InputPrompt>,
    ) -> Result<Self> {
        let supervisor = ProcessSupervisor::new(config.emulator.clone(), Arc::clone(&console));
        let predictor = StepPredictor::new(Arc::clone(&console))?;

        let mut commands = CommandTable::new();
        overrides::install(&mut commands);

        console.print_line(&format!(
            "Custom commands registered: {}",
            commands.command_names().join(", ")
        ));
        console.print_line(&format!(
            "Hooks installed on: {}",
            commands.hooked_names().join(", ")
        ));

        Ok(Self {
            host,
            supervisor,
            config,
            predictor,
            prompt,
            console,
            commands,
        })
    }

    /// 1行のコマンドを実行する
    ///
    /// フックが定義されていれば先に実行し（失敗は表示のみ）、
    /// 置き換えコマンドがあればそれを、なければホストにそのまま渡します。
    pub fn dispatch(&mut self, line: &str) -> Result<Outcome> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Outcome::Continue);
        }

        let (word, args) = match line.split_once(char::is_whitespace) {
            Some((word, args)) => (word, args.trim()),
            None => (line, ""),
        };
        let name = Verb::parse(word).map(Verb::name).unwrap_or(word);

        if let Some(hook) = self.commands.hook(name) {
            if let Err(e) = hook(self, name) {
                self.console
                    .print_line(&format!("Warning: hook-{} failed: {}", name, e));
            }
        }

        if let Some(command) = self.commands.command(name) {
            return command(self, args, true);
        }

        let output = self.host.execute(line)?;
        self.print(&output);
        Ok(Outcome::Continue)
    }

    /// 登録済みコマンドを名前で直接呼び出す（フックは実行しない）
    pub fn invoke(&mut self, name: &str, args: &str, interactive: bool) -> Result<Outcome> {
        let command = self
            .commands
            .command(name)
            .ok_or_else(|| anyhow::anyhow!("Undefined command: \"{}\"", name))?;
        command(self, args, interactive)
    }

    /// セッション終了時の後始末（エミュレータが動いていれば停止する）
    pub fn shutdown(&mut self) {
        if self.supervisor.is_running() {
            self.supervisor.stop();
        }
    }

    /// 複数行のテキストをコンソールに表示する
    pub(crate) fn print(&self, text: &str) {
        for line in text.lines() {
            self.console.print_line(line);
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn supervisor_mut(&mut self) -> &mut ProcessSupervisor {
        &mut self.supervisor
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn commands(&self) -> &CommandTable<H> {
        &self.commands
    }
}
