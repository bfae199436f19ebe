//! CPUフラグと分岐条件
//!
//! レジスタダンプ中の `[ PF ZF IF ]` 形式の表記からフラグ集合を構築し、
//! 条件付き分岐のサフィックスが成立するかを判定します。

use crate::PredictError;
use std::fmt;

/// EFLAGS の各フラグ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    Carry,
    Parity,
    Adjust,
    Zero,
    Sign,
    Trap,
    Interrupt,
    Direction,
    Overflow,
}

impl Flag {
    /// ビット位置の順に並べた全フラグ
    pub const ALL: [Flag; 9] = [
        Flag::Carry,
        Flag::Parity,
        Flag::Adjust,
        Flag::Zero,
        Flag::Sign,
        Flag::Trap,
        Flag::Interrupt,
        Flag::Direction,
        Flag::Overflow,
    ];

    /// EFLAGS 中のビットマスク
    pub fn mask(self) -> u32 {
        match self {
            Flag::Carry => 1 << 0,
            Flag::Parity => 1 << 2,
            Flag::Adjust => 1 << 4,
            Flag::Zero => 1 << 6,
            Flag::Sign => 1 << 7,
            Flag::Trap => 1 << 8,
            Flag::Interrupt => 1 << 9,
            Flag::Direction => 1 << 10,
            Flag::Overflow => 1 << 11,
        }
    }

    /// レジスタダンプでの略称
    pub fn abbreviation(self) -> &'static str {
        match self {
            Flag::Carry => "CF",
            Flag::Parity => "PF",
            Flag::Adjust => "AF",
            Flag::Zero => "ZF",
            Flag::Sign => "SF",
            Flag::Trap => "TF",
            Flag::Interrupt => "IF",
            Flag::Direction => "DF",
            Flag::Overflow => "OF",
        }
    }

    /// 略称からフラグを取得する
    pub fn from_abbreviation(s: &str) -> Option<Self> {
        Flag::ALL.iter().copied().find(|f| f.abbreviation() == s)
    }
}

/// セットされているフラグの集合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlagSet {
    bits: u32,
}

impl FlagSet {
    /// EFLAGS の値から構築する（未知のビットは無視）
    pub fn from_bits(bits: u32) -> Self {
        let known = Flag::ALL.iter().fold(0, |acc, f| acc | f.mask());
        Self { bits: bits & known }
    }

    /// フラグの一覧から構築する
    pub fn from_flags(flags: &[Flag]) -> Self {
        Self {
            bits: flags.iter().fold(0, |acc, f| acc | f.mask()),
        }
    }

    /// テキスト形式のレジスタダンプからフラグ集合を読み取る
    ///
    /// `eflags 0x246 [ PF ZF IF ]` のように角括弧で囲まれた部分があればそこを、
    /// なければ全体を空白で区切って略称として解釈します。
    /// 略称として認識できない語（`IOPL=0` など）は無視します。
    pub fn parse(text: &str) -> Self {
        let section = match (text.find('['), text.rfind(']')) {
            (Some(start), Some(end)) if start < end => &text[start + 1..end],
            _ => text,
        };
        let flags: Vec<Flag> = section
            .split_whitespace()
            .filter_map(Flag::from_abbreviation)
            .collect();
        Self::from_flags(&flags)
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// フラグがセットされているか
    pub fn contains(&self, flag: Flag) -> bool {
        self.bits & flag.mask() != 0
    }

    /// フラグを設定・解除する
    pub fn set(&mut self, flag: Flag, value: bool) {
        if value {
            self.bits |= flag.mask();
        } else {
            self.bits &= !flag.mask();
        }
    }
}

impl fmt::Display for FlagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[ ")?;
        for flag in Flag::ALL.iter().filter(|flag| self.contains(**flag)) {
            write!(f, "{} ", flag.abbreviation())?;
        }
        write!(f, "]")
    }
}

/// 条件付き分岐の条件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// e / z
    Equal,
    /// ne / nz
    NotEqual,
    /// a
    Above,
    /// ae / nc
    AboveOrEqual,
    /// b / c
    Below,
    /// be
    BelowOrEqual,
    /// g
    Greater,
    /// ge
    GreaterOrEqual,
    /// l
    Less,
    /// le
    LessOrEqual,
    /// o
    Overflow,
    /// no
    NoOverflow,
    /// s
    Sign,
    /// ns
    NoSign,
}

impl Condition {
    /// `j` / `loop` を取り除いたサフィックスから条件を求める
    pub fn from_suffix(suffix: &str) -> Result<Self, PredictError> {
        let cond = match suffix {
            "e" | "z" => Condition::Equal,
            "ne" | "nz" => Condition::NotEqual,
            "a" => Condition::Above,
            "ae" | "nc" => Condition::AboveOrEqual,
            "b" | "c" => Condition::Below,
            "be" => Condition::BelowOrEqual,
            "g" => Condition::Greater,
            "ge" => Condition::GreaterOrEqual,
            "l" => Condition::Less,
            "le" => Condition::LessOrEqual,
            "o" => Condition::Overflow,
            "no" => Condition::NoOverflow,
            "s" => Condition::Sign,
            "ns" => Condition::NoSign,
            other => return Err(PredictError::UnknownCondition(other.to_string())),
        };
        Ok(cond)
    }

    /// フラグ集合に対して条件が成立するか
    pub fn holds(self, flags: &FlagSet) -> bool {
        let zf = flags.contains(Flag::Zero);
        let cf = flags.contains(Flag::Carry);
        let sf = flags.contains(Flag::Sign);
        let of = flags.contains(Flag::Overflow);

        match self {
            Condition::Equal => zf,
            Condition::NotEqual => !zf,
            Condition::Above => !cf && !zf,
            Condition::AboveOrEqual => !cf,
            Condition::Below => cf,
            Condition::BelowOrEqual => cf || zf,
            Condition::Greater => !zf && sf == of,
            Condition::GreaterOrEqual => sf == of,
            Condition::Less => sf != of,
            Condition::LessOrEqual => zf || sf != of,
            Condition::Overflow => of,
            Condition::NoOverflow => !of,
            Condition::Sign => sf,
            Condition::NoSign => !sf,
        }
    }
}
