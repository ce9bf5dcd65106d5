//! HDCP 1.x transmitter state machine
//!
//! This module drives the Part 1 (and Part 2 repeater) authentication
//! handshake with a downstream receiver and keeps watch over link integrity
//! afterwards. One [`Transmitter`] exists per downstream link; it owns the
//! cipher, port and platform adapters bound to that link.
//!
//! The machine is event driven. Host calls, timer expiry and interrupt
//! notifications post events into a pending set; [`Transmitter::poll`]
//! drains the set and runs the state machine to a stable point. Nothing
//! here blocks on external I/O beyond two short hardware settle delays.

mod auth;

use bitflags::bitflags;

use crate::cipher::Cipher;
use crate::config::TxConfig;
use crate::event::{Event, EventQueue};
use crate::platform::Platform;
use crate::port::Port;

/// Settle delay around encryption enable/disable (milliseconds)
const SETTLE_MS: u32 = 5;

/// Time allowed for the downstream device to produce Ro' (milliseconds)
const VALIDATE_RX_TIMEOUT_MS: u32 = 100;

/// Time allowed for a repeater to assemble its KSV list (milliseconds)
const WAIT_FOR_READY_TIMEOUT_MS: u32 = 5_000;

bitflags! {
    /// Sticky per-instance condition flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Flags: u8 {
        /// The physical layer is up
        const PHY_UP = 1 << 0;
        /// The downstream device advertised repeater capability
        const IS_REPEATER = 1 << 1;
    }
}

/// States of the transmitter machine
///
/// `Disabled`, `Unauthenticated`, `Authenticated` and `LinkIntegrityCheck`
/// are steady; every other state is waiting on an external stimulus
/// (remote data, cipher completion or a timer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Interface held down; cipher and port disabled
    Disabled,
    /// Probing the downstream device for HDCP capability
    DetermineRxCapable,
    /// Exchanging BKSV/AKSV and the session value An
    ExchangeKsvs,
    /// Hardware block computation in flight
    Computations,
    /// Waiting out the Ro' settle time, then comparing Ro/Ro'
    ValidateRx,
    /// Deciding between the repeater and non-repeater tails
    TestForRepeater,
    /// Waiting for a repeater to report its KSV list ready
    WaitForReady,
    /// Reading and verifying the repeater KSV list
    ReadKsvList,
    /// Authentication complete; encryption may run
    Authenticated,
    /// Comparing Ri/Ri' mid-session
    LinkIntegrityCheck,
    /// Idle, not authenticated
    Unauthenticated,
    /// Physical layer down
    PhyDown,
}

impl State {
    /// Display name used in log output
    pub fn as_str(self) -> &'static str {
        match self {
            State::Disabled => "disabled",
            State::DetermineRxCapable => "determine-rx-capable",
            State::ExchangeKsvs => "exchange-ksvs",
            State::Computations => "computations",
            State::ValidateRx => "validate-rx",
            State::TestForRepeater => "test-for-repeater",
            State::WaitForReady => "wait-for-ready",
            State::ReadKsvList => "read-ksv-list",
            State::Authenticated => "authenticated",
            State::LinkIntegrityCheck => "link-integrity-check",
            State::Unauthenticated => "unauthenticated",
            State::PhyDown => "physical-layer-down",
        }
    }
}

/// Monotonic per-instance counters, cleared when the interface is enabled
#[derive(Debug, Default, Clone, Copy)]
pub struct TxStats {
    /// Authentications carried through to `Authenticated`
    pub auth_passed: u32,
    /// Authentications that failed on Ro/Ro' comparison
    pub auth_failed: u32,
    /// Re-authentication requests from the downstream device
    pub reauth_requested: u32,
    /// Link integrity checks that passed
    pub link_check_passed: u32,
    /// Link integrity checks that failed
    pub link_check_failed: u32,
    /// Sideband read transactions that failed
    pub read_failures: u32,
}

/// HDCP 1.x transmitter instance
///
/// Owns the adapters for one downstream link. All state lives in memory;
/// nothing is persisted.
pub struct Transmitter<C, P, T> {
    config: TxConfig,
    cipher: C,
    port: P,
    platform: T,
    events: EventQueue,
    current_state: State,
    previous_state: State,
    flags: Flags,
    /// Scratch carried between related states: An from the KSV exchange
    /// through the block computation, BInfo from ready-poll through KSV
    /// list validation. Meaningless outside those spans.
    state_helper: u64,
    /// Streams the host wants encrypted; survives re-authentication
    encryption_map: u64,
    stats: TxStats,
}

impl<C: Cipher, P: Port, T: Platform> Transmitter<C, P, T> {
    /// Bind a transmitter to its adapters and hold it disabled
    pub fn new(config: TxConfig, cipher: C, port: P, platform: T) -> Self {
        let mut tx = Self {
            config,
            cipher,
            port,
            platform,
            events: EventQueue::new(),
            current_state: State::Disabled,
            previous_state: State::Disabled,
            flags: Flags::empty(),
            state_helper: 0,
            encryption_map: 0,
            stats: TxStats::default(),
        };
        // Land in Disabled with the hardware actually held down
        tx.shutdown();
        tx
    }

    // ========================================================================
    // Public API
    // ========================================================================

    /// Drain pending events, then give the machine a service tick
    pub fn poll(&mut self) {
        for event in self.events.drain() {
            self.dispatch(event);
        }
        self.dispatch(Event::Poll);
    }

    /// Disable then re-enable the interface on the next poll
    pub fn reset(&self) {
        self.events.post(Event::Disable);
        self.events.post(Event::Enable);
    }

    /// Bring the interface up on the next poll
    pub fn enable(&self) {
        self.events.post(Event::Enable);
    }

    /// Shut the interface down on the next poll
    pub fn disable(&self) {
        self.events.post(Event::Disable);
    }

    /// Report a physical layer state change
    pub fn set_physical_state(&self, is_up: bool) {
        self.events.post(if is_up { Event::PhyUp } else { Event::PhyDown });
    }

    /// Configure the lane count of the underlying link (DisplayPort)
    pub fn set_lane_count(&mut self, lanes: u32) {
        self.cipher.set_lane_count(lanes);
    }

    /// Start (or restart) authentication on the next poll
    pub fn authenticate(&self) {
        self.events.post(Event::Authenticate);
    }

    /// Whether an authentication handshake is underway
    pub fn is_in_progress(&self) -> bool {
        !matches!(
            self.current_state,
            State::Disabled
                | State::Unauthenticated
                | State::Authenticated
                | State::LinkIntegrityCheck
        )
    }

    /// Whether the link is currently authenticated
    pub fn is_authenticated(&self) -> bool {
        matches!(
            self.current_state,
            State::Authenticated | State::LinkIntegrityCheck
        )
    }

    /// The bitmap of streams the host has asked to encrypt
    pub fn encryption(&self) -> u64 {
        self.encryption_map
    }

    /// Request encryption of the streams in `stream_map`
    ///
    /// Takes effect immediately when authenticated, otherwise when the
    /// machine next reaches `Authenticated`.
    pub fn enable_encryption(&mut self, stream_map: u64) {
        self.encryption_map |= stream_map;
        if self.is_authenticated() {
            self.apply_encryption();
        }
    }

    /// Stop encrypting the streams in `stream_map`
    pub fn disable_encryption(&mut self, stream_map: u64) {
        self.cipher.disable_encryption(stream_map);
        self.encryption_map &= !stream_map;
    }

    /// Platform timer expiry path. Safe from interrupt context.
    pub fn handle_timeout(&self) {
        self.events.post(Event::Timeout);
    }

    /// Cipher Ri-update interrupt path (HDMI). Safe from interrupt context.
    pub fn handle_ri_update(&self) {
        self.events.post(Event::Check);
    }

    /// Physical link failure path. Safe from interrupt context.
    pub fn handle_link_failure(&self) {
        self.events.post(Event::LinkDown);
    }

    /// Downstream re-authentication request path (e.g. DisplayPort CP_IRQ)
    pub fn handle_reauth_request(&mut self) {
        self.stats.reauth_requested += 1;
        self.events.post(Event::Authenticate);
    }

    /// Current machine state
    pub fn state(&self) -> State {
        self.current_state
    }

    /// Counters accumulated since the interface was last enabled
    pub fn stats(&self) -> &TxStats {
        &self.stats
    }

    /// Configuration this instance was bound with
    pub fn config(&self) -> &TxConfig {
        &self.config
    }

    /// Borrow the cipher adapter
    pub fn cipher(&self) -> &C {
        &self.cipher
    }

    /// Borrow the port adapter
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Borrow the platform adapter
    pub fn platform(&self) -> &T {
        &self.platform
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Run one event through the machine, then follow entry-action
    /// transitions until the state settles
    fn dispatch(&mut self, event: Event) {
        let mut next = self.run_state(self.current_state, event);
        while next != self.current_state {
            log::trace!(
                "hdcp-tx({}): {} -> {}",
                self.config.device_id,
                self.current_state.as_str(),
                next.as_str()
            );
            self.exit_state(self.current_state);
            self.previous_state = self.current_state;
            self.current_state = next;
            next = self.enter_state(self.current_state);
        }
    }

    /// Let the current state react to an event; returns the target state
    fn run_state(&mut self, state: State, event: Event) -> State {
        match state {
            State::Disabled => self.run_disabled(event),
            State::DetermineRxCapable => self.run_handshake_step(state, event),
            State::ExchangeKsvs => self.run_handshake_step(state, event),
            State::Computations => self.run_computations(event),
            State::ValidateRx => self.run_validate_rx(event),
            State::TestForRepeater => self.run_test_for_repeater(event),
            State::WaitForReady => self.run_wait_for_ready(event),
            State::ReadKsvList => self.run_steady_auth_step(state, event),
            State::Authenticated => self.run_authenticated(event),
            State::LinkIntegrityCheck => self.run_link_integrity_check(event),
            State::Unauthenticated => self.run_steady_auth_step(state, event),
            State::PhyDown => self.run_phy_down(event),
        }
    }

    fn run_disabled(&mut self, event: Event) -> State {
        match event {
            Event::Enable => {
                if self.flags.contains(Flags::PHY_UP) {
                    State::Unauthenticated
                } else {
                    State::PhyDown
                }
            }
            Event::PhyDown => {
                self.flags.remove(Flags::PHY_UP);
                State::Disabled
            }
            Event::PhyUp => {
                self.flags.insert(Flags::PHY_UP);
                State::Disabled
            }
            _ => State::Disabled,
        }
    }

    /// Shared handler for the two handshake steps that only react to
    /// teardown events
    fn run_handshake_step(&mut self, state: State, event: Event) -> State {
        match event {
            Event::Disable => State::Disabled,
            Event::PhyDown => State::PhyDown,
            _ => state,
        }
    }

    /// Shared handler for states that additionally accept a restart
    fn run_steady_auth_step(&mut self, state: State, event: Event) -> State {
        match event {
            Event::Authenticate => State::DetermineRxCapable,
            Event::Disable => State::Disabled,
            Event::PhyDown => State::PhyDown,
            _ => state,
        }
    }

    fn run_computations(&mut self, event: Event) -> State {
        match event {
            Event::Poll => self.poll_computations(),
            _ => self.run_steady_auth_step(State::Computations, event),
        }
    }

    fn run_validate_rx(&mut self, event: Event) -> State {
        match event {
            Event::Timeout => {
                log::debug!("hdcp-tx({}): validate-rx timeout", self.config.device_id);
                self.validate_rx()
            }
            _ => self.run_steady_auth_step(State::ValidateRx, event),
        }
    }

    fn run_test_for_repeater(&mut self, event: Event) -> State {
        match event {
            Event::Poll => self.test_for_repeater(),
            _ => self.run_steady_auth_step(State::TestForRepeater, event),
        }
    }

    fn run_wait_for_ready(&mut self, event: Event) -> State {
        match event {
            Event::Poll => self.poll_ready(),
            Event::Timeout => {
                log::debug!("hdcp-tx({}): wait-for-ready timeout", self.config.device_id);
                let next = self.poll_ready();
                if next == State::WaitForReady {
                    State::Unauthenticated
                } else {
                    next
                }
            }
            _ => self.run_steady_auth_step(State::WaitForReady, event),
        }
    }

    fn run_authenticated(&mut self, event: Event) -> State {
        match event {
            Event::Check => State::LinkIntegrityCheck,
            _ => self.run_steady_auth_step(State::Authenticated, event),
        }
    }

    fn run_link_integrity_check(&mut self, event: Event) -> State {
        match event {
            Event::Poll => self.check_link(),
            _ => self.run_steady_auth_step(State::LinkIntegrityCheck, event),
        }
    }

    fn run_phy_down(&mut self, event: Event) -> State {
        match event {
            Event::Disable => State::Disabled,
            Event::PhyUp => {
                // A standing encryption request means the host wants the
                // link back; re-authenticate without being asked
                if self.encryption_map != 0 {
                    self.events.post(Event::Authenticate);
                }
                State::Unauthenticated
            }
            _ => State::PhyDown,
        }
    }

    /// Entry action of a state; may redirect to a further state
    fn enter_state(&mut self, state: State) -> State {
        match state {
            State::Disabled => {
                self.shutdown();
                state
            }
            State::DetermineRxCapable => {
                self.flags.insert(Flags::PHY_UP);
                self.set_check_link(false);
                self.clear_encryption();
                self.check_rx_capable()
            }
            State::ExchangeKsvs => {
                self.state_helper = 0;
                self.exchange_ksvs()
            }
            State::Computations => {
                self.start_computations();
                state
            }
            State::ValidateRx => {
                self.state_helper = 0;
                self.platform.timer_start(VALIDATE_RX_TIMEOUT_MS);
                state
            }
            State::TestForRepeater => state,
            State::WaitForReady => {
                self.state_helper = 0;
                self.platform.timer_start(WAIT_FOR_READY_TIMEOUT_MS);
                state
            }
            State::ReadKsvList => self.read_ksv_list(),
            State::Authenticated => {
                self.state_helper = 0;
                self.apply_encryption();
                if self.previous_state != State::LinkIntegrityCheck {
                    self.stats.auth_passed += 1;
                    self.set_check_link(true);
                    log::info!("hdcp-tx({}): authenticated", self.config.device_id);
                }
                state
            }
            State::LinkIntegrityCheck => self.check_link(),
            State::Unauthenticated => {
                self.flags.remove(Flags::IS_REPEATER);
                self.flags.insert(Flags::PHY_UP);
                self.clear_encryption();
                state
            }
            State::PhyDown => {
                self.flags.remove(Flags::PHY_UP);
                self.clear_encryption();
                self.cipher.disable();
                state
            }
        }
    }

    /// Exit action of a state
    fn exit_state(&mut self, state: State) {
        match state {
            State::Disabled => self.bring_up(),
            State::Computations => self.state_helper = 0,
            State::ValidateRx => self.platform.timer_stop(),
            State::WaitForReady => self.platform.timer_stop(),
            State::ReadKsvList => self.state_helper = 0,
            State::PhyDown => self.cipher.enable(),
            _ => {}
        }
    }

    // ========================================================================
    // Interface Control
    // ========================================================================

    /// Bring the interface up on leaving `Disabled`
    fn bring_up(&mut self) {
        self.stats = TxStats::default();
        self.cipher.enable();
        self.port.enable();
    }

    /// Tear the interface down on entering `Disabled`
    fn shutdown(&mut self) {
        self.port.disable();
        self.cipher.disable();
        self.platform.timer_stop();
        self.flags.remove(Flags::IS_REPEATER);
        self.state_helper = 0;
        self.encryption_map = 0;
    }

    /// Arm or disarm the periodic Ri link check (HDMI only)
    fn set_check_link(&mut self, enabled: bool) {
        if self.config.protocol.is_hdmi() {
            self.cipher.set_ri_update(enabled);
        }
    }

    /// Push the requested stream map into the cipher
    ///
    /// The 5 ms settle keeps the cipher from switching mid-frame.
    fn apply_encryption(&mut self) {
        if self.encryption_map == 0 {
            return;
        }
        if self.cipher.encryption() != self.encryption_map {
            self.platform.timer_busy_wait(SETTLE_MS);
            self.cipher.enable_encryption(self.encryption_map);
        }
    }

    /// Stop encryption on every stream the cipher is running
    fn clear_encryption(&mut self) {
        if self.cipher.encryption() != 0 {
            self.cipher.disable_encryption(u64::MAX);
            self.platform.timer_busy_wait(SETTLE_MS);
        }
    }
}
