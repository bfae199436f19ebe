//! 置き換え対象のデバッガコマンド

/// セッションが介入するコマンド
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// エミュレータを起動して実行開始
    Run,
    /// エミュレータを起動してエントリで停止
    Start,
    /// エミュレータを停止してセッションを終了
    Quit,
    /// 次の行へ
    Next,
    /// 次の命令へ（呼び出しには入らない）
    Nexti,
    /// ステップ実行
    Step,
    /// 1命令ステップ実行
    Stepi,
}

impl Verb {
    /// 全コマンド
    pub const ALL: [Verb; 7] = [
        Verb::Run,
        Verb::Start,
        Verb::Quit,
        Verb::Next,
        Verb::Nexti,
        Verb::Step,
        Verb::Stepi,
    ];

    /// 実行前フックを設置するコマンド
    pub const HOOKED: [Verb; 4] = [Verb::Next, Verb::Nexti, Verb::Step, Verb::Stepi];

    /// コマンド名（別名も受け付ける）をパースする
    pub fn parse(word: &str) -> Option<Self> {
        match word.trim() {
            "run" | "r" => Some(Verb::Run),
            "start" => Some(Verb::Start),
            "quit" | "q" | "exit" => Some(Verb::Quit),
            "next" | "n" => Some(Verb::Next),
            "nexti" | "ni" => Some(Verb::Nexti),
            "step" | "s" => Some(Verb::Step),
            "stepi" | "si" => Some(Verb::Stepi),
            _ => None,
        }
    }

    /// 正式なコマンド名
    pub fn name(self) -> &'static str {
        match self {
            Verb::Run => "run",
            Verb::Start => "start",
            Verb::Quit => "quit",
            Verb::Next => "next",
            Verb::Nexti => "nexti",
            Verb::Step => "step",
            Verb::Stepi => "stepi",
        }
    }

    /// 呼び出し先に入るステップ系コマンドか
    pub fn is_step_class(self) -> bool {
        matches!(self, Verb::Step | Verb::Stepi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_verbs() {
        assert_eq!(Verb::parse("run"), Some(Verb::Run));
        assert_eq!(Verb::parse("r"), Some(Verb::Run));
        assert_eq!(Verb::parse("ni"), Some(Verb::Nexti));
        assert_eq!(Verb::parse("si"), Some(Verb::Stepi));
        assert_eq!(Verb::parse("q"), Some(Verb::Quit));
        assert_eq!(Verb::parse("continue"), None);
        assert_eq!(Verb::parse(""), None);
    }

    #[test]
    fn test_names_round_trip() {
        for verb in Verb::ALL {
            assert_eq!(Verb::parse(verb.name()), Some(verb));
        }
    }

    #[test]
    fn test_step_class() {
        assert!(Verb::Step.is_step_class());
        assert!(Verb::Stepi.is_step_class());
        assert!(!Verb::Next.is_step_class());
        assert!(!Verb::Nexti.is_step_class());
    }
}
