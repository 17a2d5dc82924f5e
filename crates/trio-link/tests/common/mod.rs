#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::io;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use smol_str::SmolStr;
use trio_link::checksum::checksum;
use trio_link::program::{AutorunSpec, ProgramType};
use trio_link::report::{CollectingReporter, Reporter};
use trio_link::session::{Connector, Session, SessionOptions, Transport};
use trio_link::{Controller, WriteOptions};

pub const SUCCESS: &str = "0x10000000A";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimProgram {
    pub program_type: ProgramType,
    pub lines: Vec<String>,
    pub autorun: AutorunSpec,
}

impl SimProgram {
    pub fn new(program_type: ProgramType, lines: &[&str]) -> Self {
        Self {
            program_type,
            lines: lines.iter().map(|line| (*line).to_string()).collect(),
            autorun: AutorunSpec::None,
        }
    }

    fn source_size(&self) -> usize {
        self.lines.iter().map(|line| line.len() + 2).sum()
    }
}

/// Controller state shared by every connection opened to the simulator.
#[derive(Debug, Default)]
pub struct SimState {
    pub programs: IndexMap<SmolStr, SimProgram>,
    /// Every command line received, in order.
    pub log: Vec<String>,
    pub mpe: i64,
    /// Answers handshake tokens with a wrong value.
    pub locked: bool,
    /// Bytes sent ahead of the next reply, as a running task would print.
    pub preamble: Option<String>,
    /// Telnet negotiation sent right after a connection opens.
    pub greeting: Vec<u8>,
    /// Telnet bytes received from the client.
    pub telnet_received: Vec<u8>,
    pub connections: usize,
    pub restarts: usize,
    /// Connection attempts refused after each restart.
    pub boot_refusals: u32,
    pub refusals_left: u32,
    /// `FLASH_STATUS` reports busy this many times after each program write.
    pub flash_busy_polls: u32,
    pub flash_busy_left: u32,
    pub flash_stuck: bool,
    /// Programs whose `EDPROG` checksum query fails.
    pub checksum_failures: HashSet<SmolStr>,
    /// Commands answered without ever completing the frame.
    pub mute: HashSet<String>,
    /// Commands swallowed without sending a single byte back.
    pub silent: HashSet<String>,
    pub system_error: i64,
    pub system_load_max: f64,
    pub ethercat_state: i64,
}

impl SimState {
    pub fn with_program(mut self, name: &str, program: SimProgram) -> Self {
        self.programs.insert(SmolStr::new(name), program);
        self
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.log.iter().filter(|cmd| cmd.starts_with(prefix)).count()
    }

    fn listing(&self) -> String {
        let mut out = String::from("Program          Source  Code  Run       Type\n");
        out.push_str("--------------------------------------------------\n");
        for (name, program) in &self.programs {
            out.push_str(&format!(
                "{name:<16} {:>6} {:>5}  {:<9} {}\n",
                program.source_size(),
                program.lines.len() * 4,
                program.autorun.to_string(),
                program.program_type.code_type_name()
            ));
        }
        out.push_str("OK");
        out
    }

    fn handle(&mut self, cmd: &str) -> Outcome {
        self.log.push(cmd.to_string());
        if self.silent.contains(cmd) {
            return Outcome::Silent;
        }
        if self.mute.contains(cmd) {
            return Outcome::Partial;
        }
        if cmd == "EX" {
            self.restarts += 1;
            self.refusals_left = self.boot_refusals;
            return Outcome::Exit;
        }
        if let Some(query) = cmd.strip_prefix('?') {
            return self.query(cmd, query);
        }
        if cmd == "DIR" {
            return Outcome::Ok(self.listing());
        }
        if let Some(rest) = cmd.strip_prefix("LIST ") {
            let Some((name, _)) = unquote(rest) else {
                return error(cmd);
            };
            return match self.programs.get(name.as_str()) {
                Some(program) => Outcome::Ok(program.lines.join("\n")),
                None => error(cmd),
            };
        }
        if let Some(rest) = cmd.strip_prefix("DEL ") {
            let Some((name, _)) = unquote(rest) else {
                return error(cmd);
            };
            return match self.programs.shift_remove(name.as_str()) {
                Some(_) => Outcome::Ok(String::new()),
                None => error(cmd),
            };
        }
        if let Some(rest) = cmd.strip_prefix("SELECT ") {
            let Some((name, rest)) = unquote(rest) else {
                return error(cmd);
            };
            let Some(program_type) = rest
                .strip_prefix(',')
                .and_then(|code| code.parse::<i64>().ok())
                .and_then(ProgramType::from_code)
            else {
                return error(cmd);
            };
            self.programs
                .insert(SmolStr::new(name), SimProgram::new(program_type, &[]));
            return Outcome::Ok(String::new());
        }
        if let Some(rest) = cmd.strip_prefix('!') {
            return self.edit(cmd, rest);
        }
        if let Some(rest) = cmd.strip_prefix("EDPROG") {
            let Some((name, rest)) = unquote(rest) else {
                return error(cmd);
            };
            if rest != ",10" || self.checksum_failures.contains(name.as_str()) {
                return error(cmd);
            }
            return match self.programs.get(name.as_str()) {
                Some(program) => Outcome::Ok(checksum(&program.lines).to_string()),
                None => error(cmd),
            };
        }
        if let Some(rest) = cmd.strip_prefix("RUNTYPE") {
            let Some((name, rest)) = unquote(rest) else {
                return error(cmd);
            };
            let Some(program) = self.programs.get_mut(name.as_str()) else {
                return error(cmd);
            };
            program.autorun = match rest {
                ",0,-1" => AutorunSpec::None,
                other => match other
                    .strip_prefix(",1,")
                    .and_then(|process| process.parse::<i32>().ok())
                {
                    Some(process) => AutorunSpec::Auto(process),
                    None => return error(cmd),
                },
            };
            return Outcome::Ok(String::new());
        }
        match cmd {
            "&M" | "HALT" | "COMPILE" | "SYSTEM_LOAD_MAX=0" => {
                if cmd == "SYSTEM_LOAD_MAX=0" {
                    self.system_load_max = 0.0;
                }
                Outcome::Ok(String::new())
            }
            "COMPILE_ALL" => Outcome::Ok("Compiling all programs\nOK".to_string()),
            "AUTORUN" => Outcome::Ok(
                self.programs
                    .iter()
                    .filter(|(_, program)| program.autorun.is_auto())
                    .map(|(name, _)| format!("Starting {name}"))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            "NEW \"ALL\"" => {
                self.programs.clear();
                Outcome::Ok(String::new())
            }
            "PROCESS" => Outcome::Ok("Process  Program   Load\n   1     STARTUP   3%".to_string()),
            "ETHERCAT($87,0)" => Outcome::Ok("Slave 0: AX5000\nSlave 1: EL1008".to_string()),
            "ETHERCAT($22,0,-1)" => Outcome::Ok(self.ethercat_state.to_string()),
            "ETHERCAT(0, 0)" => {
                self.ethercat_state = 0;
                Outcome::Ok(String::new())
            }
            "ETHERCAT(1, 0)" => {
                self.ethercat_state = 1;
                Outcome::Ok(String::new())
            }
            _ => {
                if let Some(state) = cmd
                    .strip_prefix("ETHERCAT($21, 0, ")
                    .and_then(|rest| rest.strip_suffix(", 0) "))
                    .and_then(|state| state.parse::<i64>().ok())
                {
                    self.ethercat_state = state;
                    return Outcome::Ok(String::new());
                }
                error(cmd)
            }
        }
    }

    fn query(&mut self, cmd: &str, query: &str) -> Outcome {
        if query.bytes().all(|byte| byte.is_ascii_digit()) && !query.is_empty() {
            return if self.locked {
                Outcome::Ok("0".to_string())
            } else {
                Outcome::Ok(query.to_string())
            };
        }
        let value = match query {
            "MPE" => self.mpe.to_string(),
            "FLASH_STATUS" => {
                if self.flash_stuck {
                    "1".to_string()
                } else if self.flash_busy_left > 0 {
                    self.flash_busy_left -= 1;
                    "1".to_string()
                } else {
                    "0".to_string()
                }
            }
            "SYSTEM_ERROR" => self.system_error.to_string(),
            "SYSTEM_LOAD_MAX" => format!("{:.1}", self.system_load_max),
            "CHECKSUM" => {
                let sum: u32 = self
                    .programs
                    .values()
                    .map(|program| u32::from(checksum(&program.lines)))
                    .sum();
                sum.to_string()
            }
            _ => {
                if let Some((name, _)) = query.strip_prefix("PROG_TYPE ").and_then(unquote) {
                    return Outcome::Ok(
                        self.programs
                            .get(name.as_str())
                            .map_or(-1, |program| program.program_type.code())
                            .to_string(),
                    );
                }
                if let Some((name, _)) = query.strip_prefix("IS_PROG ").and_then(unquote) {
                    let exists = self.programs.contains_key(name.as_str());
                    return Outcome::Ok(if exists { "1" } else { "0" }.to_string());
                }
                return error(cmd);
            }
        };
        Outcome::Ok(value)
    }

    fn edit(&mut self, cmd: &str, rest: &str) -> Outcome {
        let Some((name, op)) = rest.split_once(',') else {
            return error(cmd);
        };
        match op {
            "M" => {
                self.flash_busy_left = self.flash_busy_polls;
                Outcome::Ok(String::new())
            }
            "Z" => Outcome::Ok(String::new()),
            _ => {
                let Some(split) = op.find('R') else {
                    return error(cmd);
                };
                let Ok(index) = op[..split].parse::<usize>() else {
                    return error(cmd);
                };
                let Some(program) = self.programs.get_mut(name) else {
                    return error(cmd);
                };
                let line = op[split + 1..].to_string();
                if index < program.lines.len() {
                    program.lines[index] = line;
                } else {
                    program.lines.resize(index, String::new());
                    program.lines.push(line);
                }
                Outcome::Ok(String::new())
            }
        }
    }
}

enum Outcome {
    Ok(String),
    Partial,
    Silent,
    Exit,
}

fn error(cmd: &str) -> Outcome {
    Outcome::Ok(format!("%[COMMAND {cmd}] - Error #2030"))
}

/// Parses a leading `"..."` with `""` escapes.
fn unquote(text: &str) -> Option<(String, &str)> {
    let inner = text.strip_prefix('"')?;
    let mut out = String::new();
    let mut chars = inner.char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        if ch == '"' {
            if matches!(chars.peek(), Some((_, '"'))) {
                chars.next();
                out.push('"');
            } else {
                return Some((out, &inner[idx + 1..]));
            }
        } else {
            out.push(ch);
        }
    }
    None
}

pub fn frame(preamble: &str, cmd: &str, body: &str, status: &str) -> Vec<u8> {
    format!("{preamble}{cmd}\r\n{body}>>\nControl char : {status}\r\n>>").into_bytes()
}

pub type SharedState = Rc<RefCell<SimState>>;

#[derive(Debug, Clone)]
pub struct SimConnector {
    pub state: SharedState,
}

impl Connector for SimConnector {
    type Transport = SimTransport;

    fn endpoint(&self) -> &str {
        "sim:23"
    }

    fn open(&mut self, _timeout: Duration) -> io::Result<SimTransport> {
        let mut state = self.state.borrow_mut();
        if state.refusals_left > 0 {
            state.refusals_left -= 1;
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "controller booting",
            ));
        }
        state.connections += 1;
        let outbound = state.greeting.iter().copied().collect();
        Ok(SimTransport {
            state: Rc::clone(&self.state),
            inbound: Vec::new(),
            outbound,
            closing: false,
        })
    }
}

#[derive(Debug)]
pub struct SimTransport {
    state: SharedState,
    inbound: Vec<u8>,
    outbound: VecDeque<u8>,
    closing: bool,
}

impl SimTransport {
    fn strip_telnet(&mut self, bytes: &[u8]) -> Vec<u8> {
        let mut text = Vec::with_capacity(bytes.len());
        let mut idx = 0;
        while idx < bytes.len() {
            if bytes[idx] == 255 && idx + 2 < bytes.len() {
                self.state
                    .borrow_mut()
                    .telnet_received
                    .extend_from_slice(&bytes[idx..idx + 3]);
                idx += 3;
            } else {
                text.push(bytes[idx]);
                idx += 1;
            }
        }
        text
    }
}

impl Transport for SimTransport {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.closing {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
        }
        let text = self.strip_telnet(bytes);
        self.inbound.extend_from_slice(&text);
        while let Some(end) = self.inbound.windows(2).position(|w| w == b"\r\n") {
            let line: Vec<u8> = self.inbound.drain(..end + 2).collect();
            let cmd = String::from_utf8_lossy(&line[..end]).into_owned();
            let mut state = self.state.borrow_mut();
            let preamble = state.preamble.take().unwrap_or_default();
            match state.handle(&cmd) {
                Outcome::Ok(body) => {
                    let mut body = body.replace('\n', "\r\n");
                    if !body.is_empty() {
                        body.push_str("\r\n");
                    }
                    self.outbound
                        .extend(frame(&preamble, &cmd, &body, SUCCESS));
                }
                Outcome::Partial => self
                    .outbound
                    .extend(format!("{preamble}{cmd}\r\nworking").into_bytes()),
                Outcome::Silent => state.preamble = Some(preamble).filter(|text| !text.is_empty()),
                Outcome::Exit => {
                    self.outbound.extend(format!("{cmd}\r\n").into_bytes());
                    self.closing = true;
                }
            }
        }
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8], _timeout: Duration) -> io::Result<usize> {
        if self.outbound.is_empty() {
            if self.closing {
                return Ok(0);
            }
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "no data"));
        }
        let n = buf.len().min(self.outbound.len());
        for (slot, byte) in buf.iter_mut().zip(self.outbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn drain(&mut self) -> io::Result<Vec<u8>> {
        if self.closing {
            return Ok(Vec::new());
        }
        Ok(self.outbound.drain(..).collect())
    }
}

/// Reporter whose messages stay readable after the session takes ownership.
#[derive(Debug, Clone, Default)]
pub struct SharedReporter(pub Rc<RefCell<CollectingReporter>>);

impl Reporter for SharedReporter {
    fn extra_output(&mut self, text: &str) {
        self.0.borrow_mut().extra_output(text);
    }

    fn status(&mut self, message: &str) {
        self.0.borrow_mut().status(message);
    }

    fn tick(&mut self) {
        self.0.borrow_mut().tick();
    }
}

pub fn fast_options() -> SessionOptions {
    SessionOptions {
        connect_timeout: Duration::from_millis(50),
        command_timeout: Duration::from_millis(200),
        restart_interval: Duration::from_millis(1),
        ..SessionOptions::default()
    }
}

pub fn fast_write() -> WriteOptions {
    WriteOptions {
        flash_poll_interval: Duration::from_millis(1),
        ..WriteOptions::default()
    }
}

pub struct Sim {
    pub state: SharedState,
    pub reporter: SharedReporter,
}

impl Sim {
    pub fn new(state: SimState) -> Self {
        Self {
            state: Rc::new(RefCell::new(state)),
            reporter: SharedReporter::default(),
        }
    }

    pub fn connector(&self) -> SimConnector {
        SimConnector {
            state: Rc::clone(&self.state),
        }
    }

    pub fn session(&self) -> Session<SimConnector> {
        Session::open(
            self.connector(),
            fast_options(),
            Box::new(self.reporter.clone()),
        )
        .expect("simulated controller accepts the session")
    }

    pub fn controller(&self) -> Controller<SimConnector> {
        Controller::new(self.session(), fast_write())
    }

    pub fn messages(&self) -> Vec<String> {
        self.reporter.0.borrow().messages.clone()
    }

    pub fn extra_output(&self) -> Vec<String> {
        self.reporter.0.borrow().extra.clone()
    }

    pub fn program(&self, name: &str) -> Option<SimProgram> {
        self.state.borrow().programs.get(name).cloned()
    }
}

pub fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before unix epoch")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "trio-link-{prefix}-{}-{nanos}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}
