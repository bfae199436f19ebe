//! コマンドの置き換えと実行前フック
//!
//! run/start/quit をエミュレータ管理と連動する実装に置き換え、
//! next/nexti/step/stepi の実行前に入力ルーチンの呼び出しを検出して入力を注入します。

use crate::{CommandTable, DebugHost, Outcome, Result, Session, Verb};

/// 置き換えコマンドとフックを登録する
pub fn install<H: DebugHost>(table: &mut CommandTable<H>) {
    table.register(Verb::Run.name(), run_command::<H>);
    table.register(Verb::Start.name(), start_command::<H>);
    table.register(Verb::Quit.name(), quit_command::<H>);

    for verb in Verb::HOOKED {
        table.define_hook(verb.name(), before_exec::<H>);
    }
}

/// 実行前フック
///
/// 次に実行される命令が入力ルーチンの呼び出しであれば、ユーザーに入力を求めて
/// エミュレータの標準入力へ送ります。検出は呼び出し命令の直前でのみ行われ、
/// `nexti` が入力ルーチン全体を一度に実行する場合の停止位置は制御しません。
pub fn before_exec<H: DebugHost>(session: &mut Session<H>, name: &str) -> Result<()> {
    let step_into = Verb::parse(name).map(Verb::is_step_class).unwrap_or(false);

    let Some(next) = session.predictor.predict(&mut session.host, step_into) else {
        return Ok(());
    };
    let Some(label) = session.config.input_marker.match_call(&next) else {
        return Ok(());
    };

    tracing::debug!("input routine '{}' ahead of {}", label, name);
    let text = session.prompt.read_line(&format!("{} >> ", label))?;
    session.supervisor.send_input(&text)
}

/// エミュレータを起動し、リモートターゲットに接続する
fn launch<H: DebugHost>(session: &mut Session<H>) -> Result<()> {
    let binary = session.config.binary.clone();
    let port = session.config.port;

    session.supervisor.start(&binary, port)?;
    let output = session.host.execute(&format!("target remote :{}", port))?;
    session.print(&output);
    Ok(())
}

/// `run`: 起動・接続して実行を継続する
fn run_command<H: DebugHost>(
    session: &mut Session<H>,
    _args: &str,
    _interactive: bool,
) -> Result<Outcome> {
    launch(session)?;
    let output = session.host.execute("continue")?;
    session.print(&output);
    Ok(Outcome::Continue)
}

/// `start`: 起動・接続してエントリで停止したままにする
fn start_command<H: DebugHost>(
    session: &mut Session<H>,
    _args: &str,
    _interactive: bool,
) -> Result<Outcome> {
    launch(session)?;
    match session.host.execute("x/i $pc") {
        Ok(output) => session.print(&output),
        Err(e) => tracing::debug!("cannot show entry instruction: {}", e),
    }
    Ok(Outcome::Continue)
}

/// `quit`: エミュレータを停止し、セッションを無条件に終了する
fn quit_command<H: DebugHost>(
    session: &mut Session<H>,
    _args: &str,
    _interactive: bool,
) -> Result<Outcome> {
    session
        .console
        .print_line("Closing the debugger and the emulated program...");
    session.supervisor.stop();

    // ホスト側の後始末の失敗は無視する
    for command in ["set confirm off", "kill"] {
        if let Err(e) = session.host.execute(command) {
            tracing::debug!("'{}' failed during quit: {}", command, e);
        }
    }
    Ok(Outcome::Exit)
}
