//! リモートホストのテスト
//!
//! メモリイメージとレジスタを持つスタブに接続し、
//! GDB互換コマンドの出力と次命令の予測を確認する。

use qstep_core::{DebugHost, InputMarker, MemoryConsole, RemoteHost, StepPredictor, SymbolTable};
use qstep_elf::Symbol;
use qstep_target::packet;
use std::collections::{BTreeSet, HashMap};
use std::io::{BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const ENTRY: u32 = 0x0804_9000;

/// mov eax, 1 / call inchar / ret、inchar は ret のみ
const IMAGE: &[(u32, &[u8])] = &[
    (0x0804_9000, &[0xb8, 0x01, 0x00, 0x00, 0x00]),
    (0x0804_9005, &[0xe8, 0xf6, 0x00, 0x00, 0x00]),
    (0x0804_900a, &[0xc3]),
    (0x0804_9100, &[0xc3]),
];

/// 1命令実行したときの遷移
const STEPS: &[(u32, u32)] = &[
    (0x0804_9000, 0x0804_9005),
    (0x0804_9005, 0x0804_9100),
    (0x0804_9100, 0x0804_900a),
];

struct Stub {
    memory: HashMap<u32, u8>,
    eip: u32,
    breakpoints: BTreeSet<u32>,
}

impl Stub {
    fn new() -> Self {
        let mut memory = HashMap::new();
        for (address, bytes) in IMAGE {
            for (i, b) in bytes.iter().enumerate() {
                memory.insert(address + i as u32, *b);
            }
        }
        Self {
            memory,
            eip: ENTRY,
            breakpoints: BTreeSet::new(),
        }
    }

    fn registers(&self) -> String {
        let mut values = [0u32; 16];
        values[4] = 0xffff_d0ac;
        values[8] = self.eip;
        values[9] = 0x246;
        values
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    fn read(&self, args: &str) -> String {
        let (addr, len) = args.split_once(',').unwrap();
        let addr = u32::from_str_radix(addr, 16).unwrap();
        let len = u32::from_str_radix(len, 16).unwrap();
        if !(0x0804_9000..0x0804_a000).contains(&addr) {
            return "E14".to_string();
        }
        (addr..addr + len)
            .map(|a| format!("{:02x}", self.memory.get(&a).copied().unwrap_or(0x90)))
            .collect()
    }

    fn handle(&mut self, request: &str) -> Option<String> {
        let reply = match request {
            "?" => "S05".to_string(),
            "g" => self.registers(),
            "s" => {
                let next = STEPS.iter().find(|(from, _)| *from == self.eip)?;
                self.eip = next.1;
                "S05".to_string()
            }
            "c" => match self.breakpoints.iter().next() {
                Some(bp) => {
                    self.eip = *bp;
                    "S05".to_string()
                }
                None => "W00".to_string(),
            },
            "k" => return None,
            _ => {
                if let Some(args) = request.strip_prefix('m') {
                    self.read(args)
                } else if let Some(args) = request.strip_prefix("Z0,") {
                    let addr = args.split(',').next().unwrap();
                    self.breakpoints.insert(u32::from_str_radix(addr, 16).unwrap());
                    "OK".to_string()
                } else if let Some(args) = request.strip_prefix("z0,") {
                    let addr = args.split(',').next().unwrap();
                    self.breakpoints.remove(&u32::from_str_radix(addr, 16).unwrap());
                    "OK".to_string()
                } else {
                    String::new()
                }
            }
        };
        Some(reply)
    }
}

fn read_request(reader: &mut BufReader<TcpStream>) -> Option<String> {
    let mut byte = [0u8; 1];
    loop {
        if reader.read(&mut byte).ok()? == 0 {
            return None;
        }
        if byte[0] == b'$' {
            break;
        }
    }
    let mut payload = Vec::new();
    loop {
        reader.read_exact(&mut byte).ok()?;
        if byte[0] == b'#' {
            break;
        }
        payload.push(byte[0]);
    }
    let mut checksum = [0u8; 2];
    reader.read_exact(&mut checksum).ok()?;
    String::from_utf8(payload).ok()
}

fn spawn_stub() -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut reader = BufReader::new(stream);
        let mut stub = Stub::new();
        let mut seen = Vec::new();
        while let Some(request) = read_request(&mut reader) {
            writer.write_all(b"+").unwrap();
            let reply = stub.handle(&request);
            seen.push(request);
            match reply {
                Some(reply) => writer.write_all(&packet::frame(&reply)).unwrap(),
                None => break,
            }
        }
        seen
    });
    (address, handle)
}

fn symbols() -> SymbolTable {
    SymbolTable::from_symbols(vec![
        Symbol::new("_start", 0x0804_9000, 0x0b),
        Symbol::new("inchar", 0x0804_9100, 1),
    ])
}

fn connected_host() -> (RemoteHost, JoinHandle<Vec<String>>) {
    let (address, stub) = spawn_stub();
    let mut host = RemoteHost::new(symbols())
        .unwrap()
        .with_connect_timeout(Duration::from_secs(1));

    let output = host.execute(&format!("target remote {}", address)).unwrap();
    assert!(output.starts_with(&format!("Remote debugging using {}", address)));
    assert!(output.contains("=> 0x08049000 <_start>:\tmov    eax, 1"), "{}", output);
    assert!(host.is_connected());
    (host, stub)
}

#[test]
fn test_disassembly_is_annotated_like_gdb() {
    let (mut host, stub) = connected_host();

    let output = host.execute("x/2i $pc").unwrap();
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "=> 0x08049000 <_start>:\tmov    eax, 1");
    assert_eq!(
        lines[1],
        "   0x08049005 <_start+5>:\tcall   0x8049100 <inchar>"
    );

    let output = host.execute("x/i inchar").unwrap();
    assert_eq!(output, "   0x08049100 <inchar>:\tret");

    assert_eq!(host.read_register("eip").unwrap(), 0x0804_9000);
    assert_eq!(host.read_register("esp").unwrap(), 0xffff_d0ac);

    host.execute("kill").unwrap();
    stub.join().unwrap();
}

#[test]
fn test_predictor_sees_input_call_through_remote_host() {
    let (mut host, stub) = connected_host();
    let console = Arc::new(MemoryConsole::new());
    let predictor = StepPredictor::new(console.clone()).unwrap();

    let next = predictor.predict(&mut host, false).unwrap();
    assert!(next.is_call());
    assert_eq!(
        InputMarker::default().match_call(&next),
        Some("inchar".to_string())
    );
    assert!(console.lines().is_empty());

    host.execute("kill").unwrap();
    stub.join().unwrap();
}

#[test]
fn test_stepi_and_nexti_over_call() {
    let (mut host, stub) = connected_host();

    let output = host.execute("si").unwrap();
    assert!(output.starts_with("=> 0x08049005 <_start+5>:\tcall"), "{}", output);

    // call はテンポラリブレークポイントで戻り先まで実行する
    let output = host.execute("nexti").unwrap();
    assert!(output.starts_with("=> 0x0804900a <_start+10>:\tret"), "{}", output);

    let output = host.execute("info registers eip").unwrap();
    assert_eq!(output, "eip            0x804900a          0x804900a <_start+10>");

    let output = host.execute("continue").unwrap();
    assert_eq!(output, "[Inferior 1 (process 1) exited normally]");
    assert!(!host.is_connected());

    drop(host);
    let seen = stub.join().unwrap();
    assert!(seen.contains(&"Z0,804900a,1".to_string()));
    assert!(seen.contains(&"z0,804900a,1".to_string()));
}

#[test]
fn test_breakpoint_is_reported_on_continue() {
    let (mut host, stub) = connected_host();

    assert_eq!(
        host.execute("break inchar").unwrap(),
        "Breakpoint 1 at 0x8049100 <inchar>"
    );
    let output = host.execute("c").unwrap();
    assert!(
        output.starts_with("\nBreakpoint 1, => 0x08049100 <inchar>:\tret"),
        "{}",
        output
    );

    let words = host.execute("x/2xw 0x8049000").unwrap();
    assert_eq!(words, "0x8049000 <_start>:\t0x000001b8\t0x00f6e800");

    assert!(host.execute("x/i 0x10").is_err());
    assert!(host.execute("frobnicate").is_err());

    host.execute("kill").unwrap();
    assert!(!host.is_connected());
    stub.join().unwrap();
}
