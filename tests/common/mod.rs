//! Fake cipher, port and platform devices for driving the transmitter
//! state machine end to end.

use hdcp1x::cipher::{Cipher, CipherRequest};
use hdcp1x::config::{Protocol, TxConfig};
use hdcp1x::platform::{Platform, SrmRevocationList};
use hdcp1x::port::{self, Port, PortError, PortRegister, RepeaterInfo};
use hdcp1x::tx::Transmitter;

/// Downstream KSV with exactly 20 ones
pub const BKSV: u64 = 0x00000F_FFFF;

/// Local KSV with exactly 20 ones
pub const AKSV: u64 = 0xFFFFF0_0000;

/// Value the fake RNG produces (becomes An)
pub const MI: u64 = 0x0123_4567_89AB_CDEF;

/// Ro/Ro' value for matching handshakes
pub const RO: u16 = 0xBEEF;

/// Mo value feeding the repeater V computation
pub const MO: u64 = 0xFEDC_BA98_7654_3210;

pub struct FakeCipher {
    pub enabled: bool,
    pub remote_ksv: Option<u64>,
    pub local_ksv: u64,
    pub b: Option<(u32, u32, u32)>,
    pub requests: Vec<CipherRequest>,
    pub complete: bool,
    pub mi: u64,
    pub ri: u16,
    pub mo: u64,
    pub ro: u16,
    pub encryption: u64,
    pub ri_update: bool,
    pub lanes: u32,
}

impl FakeCipher {
    pub fn new() -> Self {
        Self {
            enabled: false,
            remote_ksv: None,
            local_ksv: AKSV,
            b: None,
            requests: Vec::new(),
            complete: true,
            mi: MI,
            ri: RO,
            mo: MO,
            ro: RO,
            encryption: 0,
            ri_update: false,
            lanes: 1,
        }
    }
}

impl Cipher for FakeCipher {
    fn enable(&mut self) {
        self.enabled = true;
    }

    fn disable(&mut self) {
        self.enabled = false;
    }

    fn set_remote_ksv(&mut self, ksv: u64) {
        self.remote_ksv = Some(ksv);
    }

    fn local_ksv(&self) -> u64 {
        self.local_ksv
    }

    fn set_b(&mut self, x: u32, y: u32, z: u32) {
        self.b = Some((x, y, z));
    }

    fn request(&mut self, request: CipherRequest) {
        self.requests.push(request);
    }

    fn is_request_complete(&self) -> bool {
        self.complete
    }

    fn mi(&self) -> u64 {
        self.mi
    }

    fn ri(&self) -> u16 {
        self.ri
    }

    fn mo(&self) -> u64 {
        self.mo
    }

    fn ro(&self) -> u16 {
        self.ro
    }

    fn encryption(&self) -> u64 {
        self.encryption
    }

    fn enable_encryption(&mut self, stream_map: u64) {
        self.encryption |= stream_map;
    }

    fn disable_encryption(&mut self, stream_map: u64) {
        self.encryption &= !stream_map;
    }

    fn set_ri_update(&mut self, enabled: bool) {
        self.ri_update = enabled;
    }

    fn set_lane_count(&mut self, lanes: u32) {
        self.lanes = lanes;
    }
}

pub struct FakePort {
    pub enabled: bool,
    pub capable: bool,
    pub repeater: bool,
    pub bksv: u64,
    /// Served for both Ro' and Ri' reads
    pub ro: u16,
    /// BInfo word; `None` makes `repeater_info` fail
    pub binfo: Option<u16>,
    /// Backing bytes of the KSV FIFO, served cyclically
    pub ksv_fifo: Vec<u8>,
    fifo_pos: usize,
    /// V' words as the repeater reports them
    pub vh: [u32; 5],
    /// Registers whose reads fail with a transport error
    pub fail_reads: Vec<PortRegister>,
    /// Log of every write: register and bytes
    pub writes: Vec<(PortRegister, Vec<u8>)>,
}

impl FakePort {
    pub fn new() -> Self {
        Self {
            enabled: false,
            capable: true,
            repeater: false,
            bksv: BKSV,
            ro: RO,
            binfo: Some(0),
            ksv_fifo: Vec::new(),
            fifo_pos: 0,
            vh: [0; 5],
            fail_reads: Vec::new(),
            writes: Vec::new(),
        }
    }

    /// Bytes written to a register, if any write happened
    pub fn written(&self, register: PortRegister) -> Option<&[u8]> {
        self.writes
            .iter()
            .rev()
            .find(|(reg, _)| *reg == register)
            .map(|(_, bytes)| bytes.as_slice())
    }

    fn vh_word(&self, register: PortRegister) -> Option<u32> {
        let index = match register {
            PortRegister::Vh0 => 0,
            PortRegister::Vh1 => 1,
            PortRegister::Vh2 => 2,
            PortRegister::Vh3 => 3,
            PortRegister::Vh4 => 4,
            _ => return None,
        };
        Some(self.vh[index])
    }
}

impl Port for FakePort {
    fn enable(&mut self) {
        self.enabled = true;
    }

    fn disable(&mut self) {
        self.enabled = false;
    }

    fn read(&mut self, register: PortRegister, buf: &mut [u8]) -> Result<usize, PortError> {
        if self.fail_reads.contains(&register) {
            return Err(PortError);
        }

        match register {
            PortRegister::Bksv => port::value_to_wire(self.bksv, buf),
            PortRegister::Ro => port::value_to_wire(u64::from(self.ro), buf),
            PortRegister::KsvFifo => {
                if self.ksv_fifo.is_empty() {
                    return Err(PortError);
                }
                for byte in buf.iter_mut() {
                    *byte = self.ksv_fifo[self.fifo_pos];
                    self.fifo_pos = (self.fifo_pos + 1) % self.ksv_fifo.len();
                }
            }
            _ => {
                if let Some(word) = self.vh_word(register) {
                    buf.copy_from_slice(&word.to_be_bytes());
                } else {
                    buf.fill(0);
                }
            }
        }
        Ok(buf.len())
    }

    fn write(&mut self, register: PortRegister, buf: &[u8]) -> Result<usize, PortError> {
        self.writes.push((register, buf.to_vec()));
        Ok(buf.len())
    }

    fn is_capable(&mut self) -> bool {
        self.capable
    }

    fn is_repeater(&mut self) -> bool {
        self.repeater
    }

    fn repeater_info(&mut self) -> Result<RepeaterInfo, PortError> {
        self.binfo.map(RepeaterInfo).ok_or(PortError)
    }
}

pub struct FakePlatform {
    /// Timeout of the armed one-shot, if armed
    pub timer_armed: Option<u32>,
    pub timer_stops: u32,
    /// Every busy-wait issued, in milliseconds
    pub busy_waits: Vec<u32>,
    pub srm: SrmRevocationList<8>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            timer_armed: None,
            timer_stops: 0,
            busy_waits: Vec::new(),
            srm: SrmRevocationList::new(),
        }
    }
}

impl Platform for FakePlatform {
    fn timer_start(&mut self, ms: u32) {
        self.timer_armed = Some(ms);
    }

    fn timer_stop(&mut self) {
        self.timer_armed = None;
        self.timer_stops += 1;
    }

    fn timer_busy_wait(&mut self, ms: u32) {
        self.busy_waits.push(ms);
    }

    fn is_ksv_revoked(&self, ksv: u64) -> bool {
        self.srm.contains(ksv)
    }
}

pub type FakeTx = Transmitter<FakeCipher, FakePort, FakePlatform>;

pub fn config() -> TxConfig {
    TxConfig {
        device_id: 0,
        protocol: Protocol::Hdmi,
        base_address: 0xA000_0000,
    }
}

pub fn transmitter(cipher: FakeCipher, port: FakePort, platform: FakePlatform) -> FakeTx {
    Transmitter::new(config(), cipher, port, platform)
}

/// Raise the phy and enable the interface: Disabled -> Unauthenticated
pub fn bring_up(tx: &mut FakeTx) {
    tx.set_physical_state(true);
    tx.poll();
    tx.enable();
    tx.poll();
}

/// Drive one authentication attempt: kick it off, then deliver the Ro'
/// settle timeout. Repeater links are left in `WaitForReady`; a further
/// poll evaluates BInfo.
pub fn run_handshake(tx: &mut FakeTx) {
    tx.authenticate();
    tx.poll();
    tx.handle_timeout();
    tx.poll();
}
