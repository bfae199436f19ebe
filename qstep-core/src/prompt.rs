//! 対話的な入力の取得

use crate::Result;
use std::collections::VecDeque;
use std::io::{BufRead as _, Write as _};
use std::sync::{Arc, Mutex};

/// 入力ルーチンの呼び出し前にユーザーから1行を受け取る
pub trait InputPrompt {
    /// プロンプトを表示して1行読み取る（改行は含まない）
    fn read_line(&mut self, prompt: &str) -> Result<String>;
}

/// 標準入力から読み取るプロンプト
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompt;

impl InputPrompt for StdinPrompt {
    fn read_line(&mut self, prompt: &str) -> Result<String> {
        let mut stdout = std::io::stdout();
        write!(stdout, "{}", prompt)?;
        stdout.flush()?;

        let mut line = String::new();
        if std::io::stdin().lock().read_line(&mut line)? == 0 {
            return Err(anyhow::anyhow!("End of input"));
        }
        Ok(trim_newline(&line).to_string())
    }
}

/// 行末の改行（`\n` / `\r\n`）を取り除く
fn trim_newline(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

#[derive(Debug, Default)]
struct ScriptedState {
    answers: VecDeque<String>,
    prompts: Vec<String>,
}

/// あらかじめ用意した回答を順に返すプロンプト
///
/// クローンは同じ状態を共有するため、セッションに渡した後も表示されたプロンプトを確認できます。
///
/// 端末を使わずにセッションを動かすためのテスト用プロンプトです。
#[derive(Debug, Default, Clone)]
pub struct ScriptedPrompt {
    state: Arc<Mutex<ScriptedState>>,
}

impl ScriptedPrompt {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let state = ScriptedState {
            answers: answers.into_iter().map(Into::into).collect(),
            prompts: Vec::new(),
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// これまでに表示されたプロンプト
    pub fn prompts(&self) -> Vec<String> {
        match self.state.lock() {
            Ok(state) => state.prompts.clone(),
            Err(poisoned) => poisoned.into_inner().prompts.clone(),
        }
    }
}

impl InputPrompt for ScriptedPrompt {
    fn read_line(&mut self, prompt: &str) -> Result<String> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("Prompt state poisoned"))?;
        state.prompts.push(prompt.to_string());
        state
            .answers
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("End of input"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_newline() {
        assert_eq!(trim_newline("abc\n"), "abc");
        assert_eq!(trim_newline("abc\r\n"), "abc");
        assert_eq!(trim_newline("\n"), "");
        assert_eq!(trim_newline("  spaced  \n"), "  spaced  ");
    }

    #[test]
    fn test_scripted_prompt_shares_state() {
        let prompt = ScriptedPrompt::new(["first", ""]);
        let mut handle = prompt.clone();

        assert_eq!(handle.read_line("a >> ").unwrap(), "first");
        assert_eq!(handle.read_line("b >> ").unwrap(), "");
        assert!(handle.read_line("c >> ").is_err());
        assert_eq!(prompt.prompts(), vec!["a >> ", "b >> ", "c >> "]);
    }
}
