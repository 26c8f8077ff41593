use std::time::Duration;

use micro4_core_emulator::{memory::{Memory, NibbleMemory}, Core};
use micro4_core_emulator_protocol::{Command, CommandFrame, CommandId, Event, EventFrame, StateSnapshot};
use tracing::{debug, warn};

use crate::HostConfig;

pub struct Dispatcher {
    core: Core<NibbleMemory>,
    config: HostConfig,

    /// Where the last program was loaded, and where a reset returns to.
    entry: u8,

    /// Speed of the active run, if there is one.
    run_speed: Option<u32>,
}

impl Dispatcher {
    pub fn new(config: HostConfig) -> Self {
        Self {
            core: Core::new(NibbleMemory::new()),
            config,
            entry: 0,
            run_speed: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.run_speed.is_some()
    }

    pub fn tick_interval(&self) -> Duration {
        self.config.tick
    }

    /// Decodes and handles one encoded command.
    /// Frames which can't be decoded are answered with an error, if they have a usable id.
    pub fn handle_text(&mut self, text: &str) -> Vec<EventFrame> {
        match CommandFrame::from_json(text) {
            Ok(frame) => self.handle(frame),
            Err(e) => {
                warn!(error = %e, "undecodable command");
                let event = Event::Error { message: e.to_string(), address: None };
                vec![EventFrame { reply_to: CommandFrame::recover_id(text), event }]
            }
        }
    }

    pub fn handle(&mut self, frame: CommandFrame) -> Vec<EventFrame> {
        let CommandFrame { id, command } = frame;
        debug!(id = %id, command = command.name(), "handling command");

        if let Err(e) = command.validate() {
            return vec![EventFrame::reply(id, Event::Error { message: e.to_string(), address: None })]
        }

        match command {
            Command::LoadProgram { binary, start_address } => {
                self.run_speed = None;
                self.core = Core::new(NibbleMemory::new());
                if let Err(e) = self.core.load(start_address, &binary) {
                    return vec![EventFrame::reply(id, Event::Error { message: e.to_string(), address: Some(start_address) })]
                }
                self.core.pc = start_address;
                self.entry = start_address;
                vec![self.reply_snapshot(id)]
            }

            Command::Step => {
                if self.core.halted {
                    return vec![EventFrame::reply(id, Event::Halted)]
                }
                match self.core.step() {
                    Err(e) => vec![EventFrame::reply(id, Event::Error { message: e.to_string(), address: Some(e.address()) })],
                    Ok(_) if self.core.halted => vec![EventFrame::reply(id, Event::Halted)],
                    Ok(_) => vec![self.reply_snapshot(id)],
                }
            }

            Command::Run { speed } => {
                if self.core.halted {
                    return vec![EventFrame::reply(id, Event::Halted)]
                }
                self.run_speed = Some(speed);
                vec![]
            }

            Command::SetSpeed { speed } => {
                if let Some(current) = self.run_speed.as_mut() {
                    *current = speed;
                }
                vec![]
            }

            Command::Stop => {
                self.run_speed = None;
                vec![self.reply_snapshot(id)]
            }

            Command::Reset => {
                self.run_speed = None;
                self.core.reset();
                self.core.pc = self.entry;
                vec![self.reply_snapshot(id)]
            }

            Command::GetState => vec![self.reply_snapshot(id)],
        }
    }

    /// Runs one batch of the active run, if there is one, and reports on it.
    pub fn tick(&mut self) -> Vec<EventFrame> {
        let Some(speed) = self.run_speed else {
            return vec![]
        };

        match self.core.run_for(instructions_per_tick(speed, self.config.tick)) {
            Ok(outcome) if outcome.halted => {
                self.run_speed = None;
                vec![
                    EventFrame::stream(Event::StateSnapshot { state: self.snapshot() }),
                    EventFrame::stream(Event::Halted),
                ]
            }
            Ok(_) => vec![EventFrame::stream(Event::StateSnapshot { state: self.snapshot() })],
            Err(e) => {
                self.run_speed = None;
                vec![EventFrame::stream(Event::Error { message: e.to_string(), address: Some(e.address()) })]
            }
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let core = &self.core;
        StateSnapshot {
            pc: core.pc,
            accumulator: core.a,
            zero: core.z,
            ir: core.ir,
            mar: core.mar,
            mdr: core.mdr,
            halted: core.halted,
            error: core.fault.as_ref().map(|e| e.to_string()),
            cycles: core.cycles,
            instructions: core.instructions,
            memory: core.memory.image(),
        }
    }

    fn reply_snapshot(&self, id: CommandId) -> EventFrame {
        EventFrame::reply(id, Event::StateSnapshot { state: self.snapshot() })
    }
}

/// How many instructions one batch executes to approximate `speed` instructions per second.
pub fn instructions_per_tick(speed: u32, tick: Duration) -> u64 {
    let per_tick = speed as u128 * tick.as_micros() / 1_000_000;
    per_tick.clamp(1, u64::MAX as u128) as u64
}
