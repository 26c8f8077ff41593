use std::{collections::BTreeSet, error::Error, fmt::Display, path::Path, sync::{atomic::{AtomicBool, Ordering}, Arc}};

use micro4_core_bridge::{Bridge, Subscription};
use micro4_core_emulator_protocol::StateSnapshot;
use tracing::{debug, warn};

use crate::display;

/// Speed used by `run` when none is given, in instructions per second.
pub const DEFAULT_SPEED: u32 = 10;

/// Most instructions `until` executes when no limit is given.
pub const DEFAULT_UNTIL_LIMIT: u64 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct ApplicationState {
    pub bridge: Bridge,

    /// The last snapshot shown, to find what changed since.
    pub emulator: Option<StateSnapshot>,
    pub changes: Vec<String>,

    /// Addresses where `until` stops.
    pub breakpoints: BTreeSet<u8>,

    /// Whether streamed updates are printed. Only set during a run.
    streaming: Arc<AtomicBool>,
    subscriptions: Vec<Subscription>,
}

impl ApplicationState {
    pub fn new(bridge: Bridge) -> Self {
        let streaming = Arc::new(AtomicBool::new(false));

        let subscriptions = vec![
            bridge.on_state_update({
                let streaming = streaming.clone();
                move |state| if streaming.load(Ordering::SeqCst) {
                    println!("  {}", display::registers(state, &[]));
                }
            }),
            bridge.on_halted({
                let streaming = streaming.clone();
                move || {
                    streaming.store(false, Ordering::SeqCst);
                    println!("halted");
                }
            }),
            bridge.on_error({
                let streaming = streaming.clone();
                move |fault| {
                    streaming.store(false, Ordering::SeqCst);
                    println!("error: {fault}");
                }
            }),
        ];

        Self { bridge, emulator: None, changes: vec![], breakpoints: BTreeSet::new(), streaming, subscriptions }
    }

    pub async fn execute_command(&mut self, command: &str) -> Result<Flow, Box<dyn Error>> {
        let [command, args@..] = &shell_words::split(command)?[..] else {
            return Ok(Flow::Continue) // empty commands are fine, but don't do anything
        };

        match (command.as_str(), args) {
            ("load", [file]) => {
                let source = std::fs::read_to_string(file)?;
                let program = micro4_core_assembler::assemble(&source)?;
                println!("assembled {} nibbles at 0x{:02X}", program.nibbles.len(), program.origin);
                self.load(program.nibbles, program.origin).await
            }
            ("load", _) => usage("load <file.asm>"),

            ("load.raw", [file, rest@..]) if rest.len() <= 1 => {
                let start = match rest.first() {
                    Some(start) => clap_num::maybe_hex::<u8>(start)?,
                    None => 0,
                };
                let nibbles = read_image(Path::new(file))?;
                self.load(nibbles, start).await
            }
            ("load.raw", _) => usage("load.raw <file> [start]"),

            ("step", []) => {
                let state = self.bridge.step().await?;
                self.show(state);
                Ok(Flow::Continue)
            }

            ("run", [rest@..]) if rest.len() <= 1 => {
                let speed = match rest.first() {
                    Some(speed) => speed.parse()?,
                    None => DEFAULT_SPEED,
                };
                self.streaming.store(true, Ordering::SeqCst);
                if let Err(e) = self.bridge.run(speed) {
                    self.streaming.store(false, Ordering::SeqCst);
                    warn!(speed, error = %e, "could not start run");
                    return Err(e.into())
                }
                Ok(Flow::Continue)
            }
            ("run", _) => usage("run [speed]"),

            ("speed", [speed]) => {
                self.bridge.set_speed(speed.parse()?)?;
                if !self.bridge.is_running() {
                    println!("not running; speed applies to the next run");
                }
                Ok(Flow::Continue)
            }
            ("speed", _) => usage("speed <instructions per second>"),

            ("stop", []) => {
                self.streaming.store(false, Ordering::SeqCst);
                let state = self.bridge.stop().await?;
                self.show(state);
                Ok(Flow::Continue)
            }

            ("reset", []) => {
                self.streaming.store(false, Ordering::SeqCst);
                let state = self.bridge.reset().await?;
                self.show(state);
                Ok(Flow::Continue)
            }

            ("state", []) => {
                let state = self.bridge.get_state().await?;
                self.show(state);
                Ok(Flow::Continue)
            }

            ("until", [rest@..]) if rest.len() <= 1 => {
                let limit = match rest.first() {
                    Some(limit) => limit.parse()?,
                    None => DEFAULT_UNTIL_LIMIT,
                };
                self.run_until_break(limit).await
            }
            ("until", _) => usage("until [limit]"),

            ("break" | "b", [address]) => {
                let address = clap_num::maybe_hex::<u8>(address)?;
                if self.breakpoints.insert(address) {
                    println!("breakpoint set at 0x{address:02X}");
                } else {
                    println!("breakpoint already set at 0x{address:02X}");
                }
                Ok(Flow::Continue)
            }
            ("break" | "b", _) => usage("break <address>"),

            ("clear", [address]) => {
                let address = clap_num::maybe_hex::<u8>(address)?;
                if self.breakpoints.remove(&address) {
                    println!("breakpoint cleared at 0x{address:02X}");
                } else {
                    println!("no breakpoint at 0x{address:02X}");
                }
                Ok(Flow::Continue)
            }
            ("clear", _) => usage("clear <address>"),

            ("list" | "l", []) => {
                if self.breakpoints.is_empty() {
                    println!("no breakpoints set");
                }
                for address in &self.breakpoints {
                    println!("  0x{address:02X}");
                }
                Ok(Flow::Continue)
            }

            ("mem", []) => {
                let state = self.bridge.get_state().await?;
                print!("{}", display::memory(&state));
                Ok(Flow::Continue)
            }
            ("mem", [start, rest@..]) if rest.len() <= 1 => {
                let (start, end) = parse_range(start, rest.first(), 0x1F)?;
                let state = self.bridge.get_state().await?;
                print!("{}", display::memory_range(&state, start, end));
                Ok(Flow::Continue)
            }
            ("mem", _) => usage("mem [start [end]]"),

            ("disasm", [rest@..]) if rest.len() <= 2 => {
                let state = self.bridge.get_state().await?;
                let (start, end) = match rest {
                    [] => (state.pc, state.pc.saturating_add(0x1F)),
                    [start, end@..] => parse_range(start, end.first(), 0x1F)?,
                };
                print!("{}", display::disassembly(&state, start, end, &self.breakpoints));
                Ok(Flow::Continue)
            }
            ("disasm", _) => usage("disasm [start [end]]"),

            ("help", _) => {
                println!("{HELP}");
                Ok(Flow::Continue)
            }

            ("quit" | "exit", _) => Ok(Flow::Quit),
            
            _ => Err(Box::new(CommandError::new(format!("unknown command: {command}")))),
        }
    }

    /// Steps until the program counter reaches a breakpoint, the machine halts, or `limit`
    /// instructions have executed. A breakpoint at the starting address doesn't stop it.
    async fn run_until_break(&mut self, limit: u64) -> Result<Flow, Box<dyn Error>> {
        if self.bridge.is_running() {
            self.streaming.store(false, Ordering::SeqCst);
            self.bridge.stop().await?;
        }

        let mut state = self.bridge.get_state().await?;
        let mut executed = 0;
        while !state.halted && executed < limit {
            state = match self.bridge.step().await {
                Ok(state) => state,
                Err(e) => {
                    warn!(executed, error = %e, "stepping towards a breakpoint failed");
                    return Err(e.into())
                }
            };
            executed += 1;

            if self.breakpoints.contains(&state.pc) {
                println!("breakpoint hit at 0x{:02X}", state.pc);
                break
            }
        }
        debug!(executed, pc = state.pc, "until finished");

        if executed == limit && !state.halted && !self.breakpoints.contains(&state.pc) {
            println!("stopped after {limit} instructions");
        }
        self.show(state);
        Ok(Flow::Continue)
    }

    async fn load(&mut self, nibbles: Vec<u8>, start: u8) -> Result<Flow, Box<dyn Error>> {
        self.streaming.store(false, Ordering::SeqCst);
        let state = self.bridge.load_program(nibbles, start).await?;

        // Loading replaces everything, so there's nothing to compare against
        self.emulator = None;
        self.show(state);
        Ok(Flow::Continue)
    }

    /// Prints a snapshot, marking what changed since the last one shown.
    pub fn show(&mut self, state: StateSnapshot) {
        self.changes = match &self.emulator {
            Some(old) => display::changes(old, &state),
            None => vec![],
        };

        println!("{}", display::registers(&state, &self.changes));
        let cells = self.changes.iter().filter(|c| c.starts_with('[')).cloned().collect::<Vec<_>>();
        if !cells.is_empty() {
            println!("  wrote {}", cells.join(", "));
        }
        if let Some(next) = display::next_instruction(&state).filter(|_| !state.halted) {
            println!("  next: {next}");
        }

        self.emulator = Some(state);
    }

    pub fn shutdown(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            self.bridge.unsubscribe(subscription);
        }
        self.bridge.terminate();
    }
}

/// Reads a program image: either hex digits, one per nibble, or raw bytes holding one nibble each.
pub fn read_image(path: &Path) -> Result<Vec<u8>, Box<dyn Error>> {
    let bytes = std::fs::read(path)?;
    if let Ok(text) = std::str::from_utf8(&bytes) {
        let digits = text.chars().filter(|c| !c.is_whitespace()).collect::<Vec<_>>();
        if !digits.is_empty() && digits.iter().all(|c| c.is_ascii_hexdigit()) {
            return Ok(digits.iter().filter_map(|c| c.to_digit(16)).map(|d| d as u8).collect())
        }
    }
    Ok(bytes)
}

/// Parses an inclusive address range. Without an end, it spans `default_len` more nibbles,
/// clamped to the end of memory.
fn parse_range(start: &str, end: Option<&String>, default_len: u8) -> Result<(u8, u8), Box<dyn Error>> {
    let start = clap_num::maybe_hex::<u8>(start)?;
    let end = match end {
        Some(end) => clap_num::maybe_hex::<u8>(end)?,
        None => start.saturating_add(default_len),
    };
    if end < start {
        return Err(Box::new(CommandError::new(format!("range ends before it starts: 0x{start:02X} to 0x{end:02X}"))))
    }
    Ok((start, end))
}

fn usage(text: &str) -> Result<Flow, Box<dyn Error>> {
    Err(Box::new(CommandError::new(format!("usage: {text}"))))
}

const HELP: &str = "\
commands:
  load <file.asm>           assemble and load a program
  load.raw <file> [start]   load an image of hex digits or raw nibbles
  step                      execute one instruction
  run [speed]               run continuously, in instructions per second
  speed <n>                 change the speed of the current run
  stop                      stop running
  until [limit]             step until a breakpoint or halt
  break <addr>, b           set a breakpoint
  clear <addr>              clear a breakpoint
  list, l                   list breakpoints
  reset                     return to the state just after loading
  state                     show registers
  mem [start [end]]         show all of memory, or a range of it
  disasm [start [end]]      disassemble memory, from the program counter by default
  quit";

#[derive(Clone, Debug)]
pub struct CommandError(String);
impl CommandError {
    pub fn new(error: String) -> Self {
        Self(error)
    }
}
impl Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl Error for CommandError {}
