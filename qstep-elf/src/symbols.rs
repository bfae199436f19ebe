//! シンボル解決機能

use crate::Result;
use object::{Object, ObjectSymbol, SymbolKind};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// シンボル情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub address: u64,
    pub size: u64,
}

impl Symbol {
    pub fn new(name: impl Into<String>, address: u64, size: u64) -> Self {
        Self {
            name: name.into(),
            address,
            size,
        }
    }
}

/// シンボルテーブル
#[derive(Debug, Default)]
pub struct SymbolTable {
    /// シンボル名 -> シンボル情報のマップ
    by_name: HashMap<String, Symbol>,
    /// アドレス順にソートしたシンボル
    by_address: Vec<Symbol>,
}

impl SymbolTable {
    /// ELFファイルからシンボルテーブルを読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path)
            .map_err(|e| anyhow::anyhow!("Failed to read file {:?}: {}", path, e))?;
        let file = object::File::parse(&*data)
            .map_err(|e| anyhow::anyhow!("Failed to parse ELF file {:?}: {}", path, e))?;

        let symbols = file
            .symbols()
            .filter(|sym| !matches!(sym.kind(), SymbolKind::Section | SymbolKind::File))
            .filter(|sym| !sym.is_undefined() && sym.address() != 0)
            .filter_map(|sym| {
                let name = sym.name().ok()?;
                if name.is_empty() {
                    return None;
                }
                Some(Symbol::new(name, sym.address(), sym.size()))
            })
            .collect::<Vec<_>>();

        tracing::debug!("loaded {} symbols from {:?}", symbols.len(), path);
        Ok(Self::from_symbols(symbols))
    }

    /// シンボルの一覧からテーブルを構築する
    pub fn from_symbols(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        let mut by_name = HashMap::new();
        let mut by_address = Vec::new();

        for sym in symbols {
            by_name.entry(sym.name.clone()).or_insert_with(|| sym.clone());
            by_address.push(sym);
        }

        // アドレスでソート（同一アドレスでは名前順で安定させる）
        by_address.sort_by(|a, b| a.address.cmp(&b.address).then_with(|| a.name.cmp(&b.name)));

        Self {
            by_name,
            by_address,
        }
    }

    /// シンボル数
    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }

    /// シンボル名からアドレスを解決する
    pub fn resolve(&self, name: &str) -> Option<u64> {
        self.by_name.get(name).map(|s| s.address)
    }

    /// アドレスを含む（または直前の）シンボルを返す
    pub fn reverse_resolve(&self, addr: u64) -> Option<&Symbol> {
        let idx = self.by_address.partition_point(|s| s.address <= addr);
        let sym = self.by_address.get(idx.checked_sub(1)?)?;
        // サイズ情報がある場合は範囲内のみ
        if sym.size > 0 && addr >= sym.address + sym.size {
            return None;
        }
        Some(sym)
    }

    /// GDB形式の注釈（`<name>` または `<name+off>`）を生成する
    pub fn annotate(&self, addr: u64) -> Option<String> {
        let sym = self.reverse_resolve(addr)?;
        let offset = addr - sym.address;
        if offset == 0 {
            Some(format!("<{}>", sym.name))
        } else {
            Some(format!("<{}+{}>", sym.name, offset))
        }
    }
}
