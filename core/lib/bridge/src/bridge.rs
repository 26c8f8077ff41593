use std::sync::{atomic::{AtomicU64, Ordering}, Arc};

use futures_util::{future::{BoxFuture, Shared}, FutureExt};
use micro4_core_emulator_protocol::{validate_speed, Command, CommandFrame, CommandId, Event, EventFrame, StateSnapshot};
use parking_lot::Mutex;
use tokio::{task::JoinHandle, time::timeout};
use tracing::{debug, info, warn};

use crate::{
    relay::{listen, PendingReply, Relay},
    BridgeConfig, BridgeError, Fault, HostLauncher, HostLink, HostMessage, HostTransport, InitFailure, Subscription,
};

/// Where a [Bridge] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Initializing,
    Ready,
    Running,
    /// Was ready, but the host can no longer be reached. Every command fails.
    Faulted,
    Terminated,
}

type Handshake = Shared<BoxFuture<'static, Result<(), BridgeError>>>;

enum Lifecycle {
    Uninitialized,
    Initializing(Handshake),
    Ready(Connection),
    Terminated,
}

struct Connection {
    transport: Arc<dyn HostTransport>,
    listener: JoinHandle<()>,
}

impl Connection {
    fn close(self) {
        self.listener.abort();
        self.transport.shutdown();
    }
}

struct Inner {
    launcher: Box<dyn HostLauncher>,
    config: BridgeConfig,
    lifecycle: Mutex<Lifecycle>,
    relay: Arc<Relay>,
    next_id: AtomicU64,
}

/// Front-end handle to an emulator host.
///
/// Commands that expect an answer are `async` and resolve with the host's reply, or fail
/// once [BridgeConfig::command_timeout] passes. [Bridge::run] and [Bridge::set_speed]
/// return as soon as the command is posted; a run is observed through subscriptions.
///
/// Dropping the bridge terminates it.
pub struct Bridge {
    inner: Arc<Inner>,
}

impl Bridge {
    pub fn new(launcher: impl HostLauncher, config: BridgeConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                launcher: Box::new(launcher),
                config,
                lifecycle: Mutex::new(Lifecycle::Uninitialized),
                relay: Arc::new(Relay::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Launches the host and waits until it reports that it's ready.
    ///
    /// Concurrent callers share a single attempt and all see its outcome. Once ready,
    /// further calls succeed immediately. After a failure, the next call tries again.
    ///
    /// A host which became unreachable after starting is not relaunched; this then fails with
    /// the same [BridgeError::Transport] as every command.
    pub async fn init(&self) -> Result<(), BridgeError> {
        let handshake = {
            let mut lifecycle = self.inner.lifecycle.lock();
            match &*lifecycle {
                Lifecycle::Ready(_) => return match self.inner.relay.fault() {
                    Some(reason) => Err(BridgeError::Transport(reason)),
                    None => Ok(()),
                },
                Lifecycle::Terminated => return Err(BridgeError::Terminated),
                Lifecycle::Initializing(handshake) => handshake.clone(),
                Lifecycle::Uninitialized => {
                    info!("initializing bridge");
                    let handshake = self.inner.clone().handshake().boxed().shared();
                    *lifecycle = Lifecycle::Initializing(handshake.clone());
                    handshake
                }
            }
        };
        handshake.await
    }

    /// Loads `binary`, one nibble per element, at `start_address`.
    /// An active run is stopped first.
    pub async fn load_program(&self, binary: Vec<u8>, start_address: u8) -> Result<StateSnapshot, BridgeError> {
        let command = Command::LoadProgram { binary, start_address };
        command.validate()?;
        self.stop_if_running("LOAD_PROGRAM").await?;
        expect_snapshot(self.request(command).await?, "LOAD_PROGRAM")
    }

    /// Executes one instruction.
    ///
    /// If the machine is (or becomes) halted, the state at the halt is fetched and returned.
    pub async fn step(&self) -> Result<StateSnapshot, BridgeError> {
        match self.request(Command::Step).await? {
            Event::Halted => {
                self.inner.relay.set_running(false);
                debug!("step reached a halt, fetching final state");
                self.get_state().await
            }
            other => expect_snapshot(other, "STEP"),
        }
    }

    /// Starts running at `speed` instructions per second. Returns once the command is posted.
    /// Does nothing if a run is already active.
    pub fn run(&self, speed: u32) -> Result<(), BridgeError> {
        validate_speed(speed)?;
        let transport = self.transport()?;

        let relay = &self.inner.relay;
        if relay.running.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            debug!("already running, ignoring RUN");
            return Ok(())
        }

        let id = self.next_id();
        if let Err(e) = self.post(&*transport, id, Command::Run { speed }) {
            relay.set_running(false);
            return Err(e)
        }
        Ok(())
    }

    /// Changes the speed of the active run. Does nothing when not running.
    pub fn set_speed(&self, speed: u32) -> Result<(), BridgeError> {
        validate_speed(speed)?;
        let transport = self.transport()?;

        if !self.is_running() {
            debug!("not running, ignoring SET_SPEED");
            return Ok(())
        }
        self.post(&*transport, self.next_id(), Command::SetSpeed { speed })
    }

    pub async fn stop(&self) -> Result<StateSnapshot, BridgeError> {
        let state = expect_snapshot(self.request(Command::Stop).await?, "STOP")?;
        self.inner.relay.set_running(false);
        Ok(state)
    }

    /// Returns the machine to its state just after loading. An active run is stopped first.
    pub async fn reset(&self) -> Result<StateSnapshot, BridgeError> {
        self.stop_if_running("RESET").await?;
        let state = expect_snapshot(self.request(Command::Reset).await?, "RESET")?;
        self.inner.relay.set_running(false);
        Ok(state)
    }

    pub async fn get_state(&self) -> Result<StateSnapshot, BridgeError> {
        expect_snapshot(self.request(Command::GetState).await?, "GET_STATE")
    }

    /// Called with every snapshot the host sends, whether replied or streamed.
    pub fn on_state_update(&self, callback: impl Fn(&StateSnapshot) + Send + Sync + 'static) -> Subscription {
        self.inner.relay.subscribers.on_state_update(callback)
    }

    pub fn on_halted(&self, callback: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.inner.relay.subscribers.on_halted(callback)
    }

    pub fn on_error(&self, callback: impl Fn(&Fault) + Send + Sync + 'static) -> Subscription {
        self.inner.relay.subscribers.on_error(callback)
    }

    /// Removes a callback. Once this returns, the callback is never called again.
    /// Returns false if it had already been removed.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.inner.relay.subscribers.remove(subscription)
    }

    pub fn is_running(&self) -> bool {
        self.inner.relay.is_running()
    }

    pub fn phase(&self) -> Phase {
        match &*self.inner.lifecycle.lock() {
            Lifecycle::Uninitialized => Phase::Uninitialized,
            Lifecycle::Initializing(_) => Phase::Initializing,
            Lifecycle::Ready(_) if self.inner.relay.fault().is_some() => Phase::Faulted,
            Lifecycle::Ready(_) if self.is_running() => Phase::Running,
            Lifecycle::Ready(_) => Phase::Ready,
            Lifecycle::Terminated => Phase::Terminated,
        }
    }

    /// The most recent snapshot received from the host, if any.
    pub fn latest_state(&self) -> Option<StateSnapshot> {
        self.inner.relay.latest()
    }

    /// Shuts the host down and rejects anything still waiting on it. Permanent, and
    /// safe to call more than once.
    pub fn terminate(&self) {
        let previous = std::mem::replace(&mut *self.inner.lifecycle.lock(), Lifecycle::Terminated);
        if matches!(previous, Lifecycle::Terminated) {
            return
        }

        self.inner.relay.detach();
        if let Lifecycle::Ready(connection) = previous {
            connection.close();
        }
        info!("bridge terminated");
    }

    fn next_id(&self) -> CommandId {
        CommandId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn transport(&self) -> Result<Arc<dyn HostTransport>, BridgeError> {
        match &*self.inner.lifecycle.lock() {
            Lifecycle::Ready(connection) => match self.inner.relay.fault() {
                Some(reason) => Err(BridgeError::Transport(reason)),
                None => Ok(connection.transport.clone()),
            },
            Lifecycle::Terminated => Err(BridgeError::Terminated),
            Lifecycle::Uninitialized | Lifecycle::Initializing(_) => Err(BridgeError::NotReady),
        }
    }

    fn post(&self, transport: &dyn HostTransport, id: CommandId, command: Command) -> Result<(), BridgeError> {
        let name = command.name();
        let text = CommandFrame { id, command }.to_json()
            .map_err(|e| BridgeError::Protocol(e.to_string()))?;
        debug!(id = %id, command = name, "posting command");
        transport.post(text).map_err(|e| BridgeError::Transport(e.to_string()))
    }

    /// Posts a command and waits for the reply to it.
    async fn request(&self, command: Command) -> Result<Event, BridgeError> {
        command.validate()?;
        let transport = self.transport()?;
        let name = command.name();
        let id = self.next_id();

        let (pending, reply) = PendingReply::new(&self.inner.relay, id);
        if let Err(e) = self.post(&*transport, id, command) {
            pending.unsent();
            return Err(e)
        }

        let after = self.inner.config.command_timeout;
        match timeout(after, reply).await {
            Ok(Ok(reply)) => {
                pending.settle();
                reply
            }
            // Waiters are only dropped without an answer on termination
            Ok(Err(_)) => {
                pending.settle();
                Err(BridgeError::Terminated)
            }
            Err(_) => {
                warn!(id = %id, command = name, ?after, "command timed out");
                Err(BridgeError::Timeout { command: name, after })
            }
        }
    }

    async fn stop_if_running(&self, before: &'static str) -> Result<(), BridgeError> {
        if self.is_running() {
            debug!(before, "stopping active run first");
            self.stop().await?;
        }
        Ok(())
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl Inner {
    async fn handshake(self: Arc<Self>) -> Result<(), BridgeError> {
        let connected = self.connect().await;

        let mut lifecycle = self.lifecycle.lock();
        match connected {
            Ok(connection) if matches!(*lifecycle, Lifecycle::Terminated) => {
                connection.close();
                Err(BridgeError::Terminated)
            }
            Ok(connection) => {
                *lifecycle = Lifecycle::Ready(connection);
                info!("bridge ready");
                Ok(())
            }
            Err(failure) => {
                if !matches!(*lifecycle, Lifecycle::Terminated) {
                    *lifecycle = Lifecycle::Uninitialized;
                }
                warn!(error = %failure, "host initialization failed");
                Err(BridgeError::Initialization(failure))
            }
        }
    }

    async fn connect(&self) -> Result<Connection, InitFailure> {
        let HostLink { transport, mut events } = self.launcher.launch()
            .map_err(|e| InitFailure::Launch(e.to_string()))?;
        let transport: Arc<dyn HostTransport> = Arc::from(transport);

        let greeting = match timeout(self.config.init_timeout, events.recv()).await {
            Err(_) => Err(InitFailure::HandshakeTimeout(self.config.init_timeout)),
            Ok(None) => Err(InitFailure::ChannelClosed),
            Ok(Some(HostMessage::Fault(reason))) => Err(InitFailure::Transport(reason)),
            Ok(Some(HostMessage::Frame(text))) => match EventFrame::from_json(&text) {
                Ok(EventFrame { event: Event::HostReady, .. }) => Ok(()),
                Ok(EventFrame { event: Event::Error { message, .. }, .. }) => Err(InitFailure::HostError(message)),
                Ok(EventFrame { event, .. }) => Err(InitFailure::Unexpected(event.name())),
                Err(e) => Err(InitFailure::Transport(e.to_string())),
            },
        };
        if let Err(failure) = greeting {
            transport.shutdown();
            return Err(failure)
        }

        let listener = tokio::spawn(listen(self.relay.clone(), events));
        Ok(Connection { transport, listener })
    }
}

fn expect_snapshot(event: Event, command: &'static str) -> Result<StateSnapshot, BridgeError> {
    match event {
        Event::StateSnapshot { state } => Ok(state),
        Event::Error { message, address } => Err(BridgeError::HostReported { message, address }),
        other => Err(BridgeError::Protocol(format!("unexpected {} in reply to {command}", other.name()))),
    }
}

#[cfg(test)]
mod test {
    use std::{sync::{atomic::{AtomicUsize, Ordering}, Arc}, time::Duration};

    use micro4_core_emulator_protocol::{Event, EventFrame, ValidationError};
    use parking_lot::Mutex;

    use crate::{test_utils::{blank_snapshot, settle, Greeting, ScriptedHost}, Bridge, BridgeConfig, BridgeError, Fault, InitFailure, Phase};

    // LDI 5; HLT
    const LOAD_FIVE: [u8; 4] = [0x7, 0x5, 0x0, 0x0];

    // LDI 1; JMP 0x00
    const SPIN: [u8; 6] = [0x7, 0x1, 0x5, 0x0, 0x0, 0x0];

    async fn ready(host: &ScriptedHost) -> Bridge {
        let bridge = Bridge::new(host.clone(), BridgeConfig::default());
        bridge.init().await.unwrap();
        bridge
    }

    fn count(counter: &Arc<AtomicUsize>) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn counting_state(bridge: &Bridge) -> (Arc<AtomicUsize>, crate::Subscription) {
        let counter = Arc::new(AtomicUsize::new(0));
        let inner = counter.clone();
        let subscription = bridge.on_state_update(move |_| { inner.fetch_add(1, Ordering::SeqCst); });
        (counter, subscription)
    }

    fn collect_faults(bridge: &Bridge) -> Arc<Mutex<Vec<Fault>>> {
        let faults = Arc::new(Mutex::new(vec![]));
        let inner = faults.clone();
        bridge.on_error(move |f| inner.lock().push(f.clone()));
        faults
    }

    #[tokio::test]
    async fn test_init_shared_between_callers() {
        let host = ScriptedHost::emulating();
        let bridge = Bridge::new(host.clone(), BridgeConfig::default());
        assert_eq!(Phase::Uninitialized, bridge.phase());

        let (a, b) = tokio::join!(bridge.init(), bridge.init());
        assert_eq!(Ok(()), a);
        assert_eq!(Ok(()), b);
        assert_eq!(Ok(()), bridge.init().await);
        assert_eq!(1, host.launches());
        assert_eq!(Phase::Ready, bridge.phase());
    }

    #[tokio::test]
    async fn test_init_host_error_then_retry() {
        let host = ScriptedHost::greeting(Greeting::Error("could not fetch core".to_owned()));
        let bridge = Bridge::new(host.clone(), BridgeConfig::default());

        let expected = Err(BridgeError::Initialization(InitFailure::HostError("could not fetch core".to_owned())));
        assert_eq!(expected, bridge.init().await);
        assert_eq!(Phase::Uninitialized, bridge.phase());

        // Failures aren't sticky, so the next attempt launches again
        assert_eq!(expected, bridge.init().await);
        assert_eq!(2, host.launches());
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_timeout() {
        let host = ScriptedHost::greeting(Greeting::Silent);
        let bridge = Bridge::new(host.clone(), BridgeConfig::default());
        assert_eq!(
            Err(BridgeError::Initialization(InitFailure::HandshakeTimeout(Duration::from_secs(30)))),
            bridge.init().await,
        );
        assert_eq!(Phase::Uninitialized, bridge.phase());
    }

    #[tokio::test]
    async fn test_init_launch_failure() {
        let host = ScriptedHost::greeting(Greeting::LaunchFails);
        let bridge = Bridge::new(host, BridgeConfig::default());
        assert!(matches!(bridge.init().await, Err(BridgeError::Initialization(InitFailure::Launch(_)))));
    }

    #[tokio::test]
    async fn test_commands_before_init() {
        let host = ScriptedHost::emulating();
        let bridge = Bridge::new(host.clone(), BridgeConfig::default());
        assert_eq!(Err(BridgeError::NotReady), bridge.get_state().await);
        assert_eq!(Err(BridgeError::NotReady), bridge.run(10));
        assert!(!bridge.is_running());
        assert!(host.posted().is_empty());
    }

    #[tokio::test]
    async fn test_load_and_step_onto_halt() {
        let host = ScriptedHost::emulating();
        let bridge = ready(&host).await;

        let loaded = bridge.load_program(LOAD_FIVE.to_vec(), 0x10).await.unwrap();
        assert_eq!(0x10, loaded.pc);

        let state = bridge.step().await.unwrap();
        assert_eq!(5, state.accumulator);
        assert!(!bridge.is_running());

        // The halting step resolves with the state after the halt
        let halted = bridge.step().await.unwrap();
        assert!(halted.halted);
        assert_eq!(halted, bridge.get_state().await.unwrap());

        // And stepping again stays put
        assert_eq!(halted, bridge.step().await.unwrap());
        assert_eq!(
            vec!["LOAD_PROGRAM", "STEP", "STEP", "GET_STATE", "GET_STATE", "STEP", "GET_STATE"],
            host.posted_names(),
        );
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let host = ScriptedHost::emulating();
        let bridge = ready(&host).await;
        let (a, b) = tokio::join!(bridge.get_state(), bridge.step());
        assert!(a.is_ok() && b.is_ok());

        let ids = host.posted().iter().map(|f| f.id).collect::<Vec<_>>();
        assert_eq!(2, ids.len());
        assert_ne!(ids[0], ids[1]);
    }

    #[tokio::test]
    async fn test_reset_while_running_stops_first() {
        let host = ScriptedHost::emulating();
        let bridge = ready(&host).await;
        bridge.load_program(SPIN.to_vec(), 0).await.unwrap();

        bridge.run(1000).unwrap();
        host.tick();
        settle().await;
        assert!(bridge.is_running());
        assert_eq!(Phase::Running, bridge.phase());

        let state = bridge.reset().await.unwrap();
        assert_eq!(0, state.pc);
        assert_eq!(0, state.instructions);
        assert!(!bridge.is_running());
        assert_eq!(vec!["LOAD_PROGRAM", "RUN", "STOP", "RESET"], host.posted_names());
    }

    #[tokio::test]
    async fn test_load_while_running_stops_first() {
        let host = ScriptedHost::emulating();
        let bridge = ready(&host).await;
        bridge.load_program(SPIN.to_vec(), 0).await.unwrap();
        bridge.run(1000).unwrap();

        bridge.load_program(LOAD_FIVE.to_vec(), 0).await.unwrap();
        assert!(!bridge.is_running());
        assert_eq!(vec!["LOAD_PROGRAM", "RUN", "STOP", "LOAD_PROGRAM"], host.posted_names());
    }

    #[tokio::test]
    async fn test_run_twice_posts_once() {
        let host = ScriptedHost::emulating();
        let bridge = ready(&host).await;
        bridge.load_program(SPIN.to_vec(), 0).await.unwrap();

        bridge.run(10).unwrap();
        bridge.run(10).unwrap();
        assert_eq!(vec!["LOAD_PROGRAM", "RUN"], host.posted_names());
    }

    #[tokio::test]
    async fn test_set_speed_only_while_running() {
        let host = ScriptedHost::emulating();
        let bridge = ready(&host).await;
        bridge.load_program(SPIN.to_vec(), 0).await.unwrap();

        bridge.set_speed(50).unwrap();
        assert_eq!(vec!["LOAD_PROGRAM"], host.posted_names());

        bridge.run(10).unwrap();
        bridge.set_speed(50).unwrap();
        assert_eq!(vec!["LOAD_PROGRAM", "RUN", "SET_SPEED"], host.posted_names());
    }

    #[tokio::test]
    async fn test_invalid_commands_not_posted() {
        let host = ScriptedHost::emulating();
        let bridge = ready(&host).await;

        assert_eq!(
            Err(BridgeError::InvalidCommand(ValidationError::SpeedOutOfRange { speed: 0 })),
            bridge.run(0),
        );
        assert_eq!(
            Err(BridgeError::InvalidCommand(ValidationError::NotANibble { offset: 1, value: 0x10 })),
            bridge.load_program(vec![0x7, 0x10], 0).await,
        );
        assert!(!bridge.is_running());
        assert!(host.posted().is_empty());
    }

    #[tokio::test]
    async fn test_run_streams_until_halt() {
        let host = ScriptedHost::emulating();
        let bridge = ready(&host).await;
        bridge.load_program(LOAD_FIVE.to_vec(), 0).await.unwrap();

        let (states, _) = counting_state(&bridge);
        let halts = Arc::new(AtomicUsize::new(0));
        {
            let halts = halts.clone();
            bridge.on_halted(move || { halts.fetch_add(1, Ordering::SeqCst); });
        }

        bridge.run(1_000_000).unwrap();
        host.tick();
        settle().await;

        assert_eq!(1, count(&states));
        assert_eq!(1, count(&halts));
        assert!(!bridge.is_running());

        let latest = bridge.latest_state().unwrap();
        assert_eq!(5, latest.accumulator);
        assert!(latest.halted);
    }

    #[tokio::test]
    async fn test_run_when_already_halted() {
        let host = ScriptedHost::emulating();
        let bridge = ready(&host).await;
        bridge.load_program(LOAD_FIVE.to_vec(), 0).await.unwrap();
        bridge.step().await.unwrap();
        bridge.step().await.unwrap();

        // The host answers RUN with HALTED, which ends the run straight away
        bridge.run(10).unwrap();
        settle().await;
        assert!(!bridge.is_running());
    }

    #[tokio::test]
    async fn test_unsubscribe_during_run() {
        let host = ScriptedHost::emulating();
        let bridge = ready(&host).await;
        bridge.load_program(SPIN.to_vec(), 0).await.unwrap();

        let (first, subscription) = counting_state(&bridge);
        let (second, _) = counting_state(&bridge);

        bridge.run(1000).unwrap();
        host.tick();
        settle().await;
        assert_eq!((1, 1), (count(&first), count(&second)));

        assert!(bridge.unsubscribe(subscription));
        host.tick();
        host.tick();
        settle().await;
        assert_eq!((1, 3), (count(&first), count(&second)));
        assert!(!bridge.unsubscribe(subscription));
    }

    #[tokio::test]
    async fn test_panicking_subscriber_isolated() {
        let host = ScriptedHost::emulating();
        let bridge = ready(&host).await;
        bridge.on_state_update(|_| panic!("subscriber bug"));
        let (states, _) = counting_state(&bridge);

        bridge.get_state().await.unwrap();
        bridge.get_state().await.unwrap();
        assert_eq!(2, count(&states));
    }

    #[tokio::test]
    async fn test_host_error_reaches_caller_and_subscribers() {
        let host = ScriptedHost::emulating();
        let bridge = ready(&host).await;
        let faults = collect_faults(&bridge);

        bridge.load_program(vec![0xC, 0x0], 0).await.unwrap();
        let result = bridge.step().await;
        assert!(matches!(result, Err(BridgeError::HostReported { address: Some(0), .. })));
        assert!(matches!(faults.lock().as_slice(), [Fault::Host { address: Some(0), .. }]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_leaves_running_flag() {
        let host = ScriptedHost::unresponsive();
        let bridge = ready(&host).await;

        assert_eq!(
            Err(BridgeError::Timeout { command: "GET_STATE", after: Duration::from_secs(10) }),
            bridge.get_state().await,
        );
        assert!(!bridge.is_running());

        bridge.run(10).unwrap();
        assert!(matches!(bridge.get_state().await, Err(BridgeError::Timeout { .. })));
        assert!(bridge.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_suppressed() {
        let host = ScriptedHost::unresponsive();
        let bridge = ready(&host).await;
        let (states, _) = counting_state(&bridge);

        assert!(bridge.get_state().await.is_err());
        let id = host.posted()[0].id;

        host.push(EventFrame::reply(id, Event::StateSnapshot { state: blank_snapshot() }));
        settle().await;
        assert_eq!(0, count(&states));
        assert_eq!(None, bridge.latest_state());

        // Streamed snapshots still arrive
        host.push(EventFrame::stream(Event::StateSnapshot { state: blank_snapshot() }));
        settle().await;
        assert_eq!(1, count(&states));
    }

    #[tokio::test]
    async fn test_transport_failure_reported() {
        let host = ScriptedHost::emulating();
        let bridge = ready(&host).await;
        let faults = collect_faults(&bridge);

        host.crash();
        settle().await;
        assert!(matches!(faults.lock().as_slice(), [Fault::Transport(_)]));
        assert!(matches!(bridge.get_state().await, Err(BridgeError::Transport(_))));
        assert!(matches!(bridge.run(10), Err(BridgeError::Transport(_))));

        assert_eq!(Phase::Faulted, bridge.phase());
        assert!(matches!(bridge.init().await, Err(BridgeError::Transport(_))));
        assert_eq!(1, host.launches());

        bridge.terminate();
        assert_eq!(Phase::Terminated, bridge.phase());
    }

    #[tokio::test]
    async fn test_transport_failure_rejects_pending() {
        let host = ScriptedHost::unresponsive();
        let bridge = ready(&host).await;
        let faults = collect_faults(&bridge);

        let (result, ()) = tokio::join!(bridge.get_state(), async {
            settle().await;
            host.crash();
        });
        assert!(matches!(result, Err(BridgeError::Transport(_))));

        // The failure went to the waiting caller instead
        assert!(faults.lock().is_empty());
    }

    #[tokio::test]
    async fn test_terminate() {
        let host = ScriptedHost::emulating();
        let bridge = ready(&host).await;
        let (states, subscription) = counting_state(&bridge);

        bridge.terminate();
        bridge.terminate();
        assert_eq!(Phase::Terminated, bridge.phase());

        assert_eq!(Err(BridgeError::Terminated), bridge.init().await);
        assert_eq!(Err(BridgeError::Terminated), bridge.get_state().await);
        assert_eq!(Err(BridgeError::Terminated), bridge.step().await);
        assert_eq!(Err(BridgeError::Terminated), bridge.stop().await);
        assert_eq!(Err(BridgeError::Terminated), bridge.reset().await);
        assert_eq!(Err(BridgeError::Terminated), bridge.load_program(LOAD_FIVE.to_vec(), 0).await);
        assert_eq!(Err(BridgeError::Terminated), bridge.run(10));
        assert_eq!(Err(BridgeError::Terminated), bridge.set_speed(10));

        // Subscriptions were all dropped, and new ones never fire
        assert!(!bridge.unsubscribe(subscription));
        let (late, _) = counting_state(&bridge);
        settle().await;
        assert_eq!((0, 0), (count(&states), count(&late)));
        assert_eq!(1, host.launches());
    }

    #[tokio::test]
    async fn test_terminate_rejects_pending() {
        let host = ScriptedHost::unresponsive();
        let bridge = ready(&host).await;

        let (result, ()) = tokio::join!(bridge.get_state(), async {
            settle().await;
            bridge.terminate();
        });
        assert_eq!(Err(BridgeError::Terminated), result);
    }

    #[tokio::test]
    async fn test_terminate_before_init() {
        let host = ScriptedHost::emulating();
        let bridge = Bridge::new(host.clone(), BridgeConfig::default());
        bridge.terminate();
        assert_eq!(Err(BridgeError::Terminated), bridge.init().await);
        assert_eq!(0, host.launches());
    }
}
