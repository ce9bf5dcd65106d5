//! Authentication actions
//!
//! The protocol legwork behind the state machine: KSV exchange, session
//! value generation, Ro/Ri comparison and the repeater tail (BInfo polling
//! and SHA-1 verification of the downstream KSV list). Each action returns
//! the state the machine should move to; the dispatch loop in the parent
//! module does the moving.

use sha1::{Digest, Sha1};

use super::{Flags, State, Transmitter};
use crate::cipher::{Cipher, CipherRequest};
use crate::ksv::is_ksv_valid;
use crate::platform::Platform;
use crate::port::{self, Port, PortRegister, RepeaterInfo};

/// Substitute session value for a cipher RNG that produced zero
const AN_FALLBACK: u64 = 0x0351_F717_5406_A74D;

/// Probes of the cipher completion flag during RNG fulfilment
const RNG_POLL_LIMIT: u32 = 100;

/// Delay between RNG completion probes (milliseconds)
const RNG_POLL_INTERVAL_MS: u32 = 1;

/// Attempts at reading Ro'/Ri' or the KSV list before giving up
const READ_ATTEMPTS: u32 = 3;

impl<C: Cipher, P: Port, T: Platform> Transmitter<C, P, T> {
    /// Probe the downstream device for HDCP capability
    pub(super) fn check_rx_capable(&mut self) -> State {
        if self.port.is_capable() {
            log::debug!("hdcp-tx({}): rx hdcp capable", self.config.device_id);
            State::ExchangeKsvs
        } else {
            log::debug!("hdcp-tx({}): rx not capable", self.config.device_id);
            State::Unauthenticated
        }
    }

    /// Exchange KSVs with the downstream device
    ///
    /// Reads and vets BKSV, generates An, loads the cipher and writes An
    /// and AKSV out. Any validation failure or transport error abandons
    /// the handshake.
    pub(super) fn exchange_ksvs(&mut self) -> State {
        let mut buf = [0u8; port::SIZE_AN];

        if !self.port_read(PortRegister::Bksv, &mut buf[..port::SIZE_KSV]) {
            return State::Unauthenticated;
        }
        let remote_ksv = port::value_from_wire(&buf[..port::SIZE_KSV]);

        if !is_ksv_valid(remote_ksv) {
            log::warn!("hdcp-tx({}): Bksv invalid", self.config.device_id);
            return State::Unauthenticated;
        }
        if self.platform.is_ksv_revoked(remote_ksv) {
            log::warn!("hdcp-tx({}): Bksv is revoked", self.config.device_id);
            return State::Unauthenticated;
        }

        let repeater = self.port.is_repeater();
        self.flags.set(Flags::IS_REPEATER, repeater);

        let an = self.generate_an();
        self.state_helper = an;
        let local_ksv = self.cipher.local_ksv();
        self.cipher.set_remote_ksv(remote_ksv);

        port::value_to_wire(an, &mut buf[..port::SIZE_AN]);
        let _ = self.port.write(PortRegister::An, &buf[..port::SIZE_AN]);

        port::value_to_wire(local_ksv, &mut buf[..port::SIZE_KSV]);
        let _ = self.port.write(PortRegister::Aksv, &buf[..port::SIZE_KSV]);

        State::Computations
    }

    /// Produce the 64-bit session value An from the cipher RNG
    pub(super) fn generate_an(&mut self) -> u64 {
        self.cipher.request(CipherRequest::Rng);

        let mut probes = 0;
        while !self.cipher.is_request_complete() && probes < RNG_POLL_LIMIT {
            self.platform.timer_busy_wait(RNG_POLL_INTERVAL_MS);
            probes += 1;
        }

        let mut an = 0;
        if self.cipher.is_request_complete() {
            an = self.cipher.mi();
        }
        // The protocol needs a nonzero An
        if an == 0 {
            an = AN_FALLBACK;
        }
        an
    }

    /// Seed the cipher with An and kick off the block computation
    pub(super) fn start_computations(&mut self) {
        log::debug!("hdcp-tx({}): starting computations", self.config.device_id);

        let an = self.state_helper;
        let x = (an & 0x0FFF_FFFF) as u32;
        let y = ((an >> 28) & 0x0FFF_FFFF) as u32;
        let mut z = ((an >> 56) & 0xFF) as u32;
        if self.flags.contains(Flags::IS_REPEATER) {
            z |= 1 << 8;
        }
        self.cipher.set_b(x, y, z);
        self.cipher.request(CipherRequest::Block);
    }

    /// Check whether the block computation has finished
    pub(super) fn poll_computations(&mut self) -> State {
        if self.cipher.is_request_complete() {
            log::debug!("hdcp-tx({}): computations complete", self.config.device_id);
            State::ValidateRx
        } else {
            log::debug!(
                "hdcp-tx({}): waiting for computations",
                self.config.device_id
            );
            State::Computations
        }
    }

    /// Compare the downstream Ro' against the locally computed Ro
    pub(super) fn validate_rx(&mut self) -> State {
        let mut next = State::Unauthenticated;
        let mut attempts = READ_ATTEMPTS;

        loop {
            let mut buf = [0u8; port::SIZE_RO];
            if self.port_read(PortRegister::Ro, &mut buf) {
                let remote_ro = port::value_from_wire(&buf) as u16;
                let local_ro = self.cipher.ro();
                if local_ro == remote_ro {
                    log::debug!(
                        "hdcp-tx({}): rx valid Ro/Ro' ({:04X})",
                        self.config.device_id,
                        local_ro
                    );
                    next = State::TestForRepeater;
                } else {
                    log::warn!(
                        "hdcp-tx({}): Ro/Ro' mismatch ({:04X}/{:04X})",
                        self.config.device_id,
                        local_ro,
                        remote_ro
                    );
                    if attempts == 1 {
                        self.stats.auth_failed += 1;
                    }
                }
            } else {
                log::warn!("hdcp-tx({}): Ro' read failure", self.config.device_id);
            }

            attempts -= 1;
            if next != State::Unauthenticated || attempts == 0 {
                break;
            }
        }

        next
    }

    /// Compare the downstream Ri' against the locally computed Ri
    pub(super) fn check_link(&mut self) -> State {
        let mut next = State::DetermineRxCapable;
        let mut attempts = READ_ATTEMPTS;

        loop {
            let mut buf = [0u8; port::SIZE_RO];
            if self.port_read(PortRegister::Ro, &mut buf) {
                let remote_ri = port::value_from_wire(&buf) as u16;
                let local_ri = self.cipher.ri();
                if local_ri == remote_ri {
                    log::debug!(
                        "hdcp-tx({}): link check passed Ri/Ri' ({:04X})",
                        self.config.device_id,
                        local_ri
                    );
                    next = State::Authenticated;
                } else if attempts == 1 {
                    log::warn!(
                        "hdcp-tx({}): link check failed Ri/Ri' ({:04X}/{:04X})",
                        self.config.device_id,
                        local_ri,
                        remote_ri
                    );
                }
            } else {
                log::warn!("hdcp-tx({}): Ri' read failure", self.config.device_id);
            }

            attempts -= 1;
            if next == State::Authenticated || attempts == 0 {
                break;
            }
        }

        if next == State::Authenticated {
            self.stats.link_check_passed += 1;
        } else {
            self.stats.link_check_failed += 1;
        }
        next
    }

    /// Route the handshake into its repeater or non-repeater tail
    pub(super) fn test_for_repeater(&mut self) -> State {
        if self.port.is_repeater() {
            self.flags.insert(Flags::IS_REPEATER);

            let buf = [0u8; port::SIZE_AINFO];
            let _ = self.port.write(PortRegister::Ainfo, &buf);

            log::debug!("hdcp-tx({}): repeater detected", self.config.device_id);

            // Encryption comes up before repeater authentication has
            // completed; the Unigraf compliance tester requires this
            // ordering even though the HDCP 1.x specification does not.
            #[cfg(not(feature = "strict-repeater"))]
            self.apply_encryption();

            State::WaitForReady
        } else {
            self.flags.remove(Flags::IS_REPEATER);
            State::Authenticated
        }
    }

    /// Evaluate the repeater's BInfo word
    pub(super) fn poll_ready(&mut self) -> State {
        let Ok(info) = self.port.repeater_info() else {
            // Keep waiting; the 5 s timer bounds this
            return State::WaitForReady;
        };

        if info.topology_error() {
            if info.max_cascade_exceeded() {
                log::warn!("hdcp-tx({}): max cascade exceeded", self.config.device_id);
            } else {
                log::warn!("hdcp-tx({}): max devices exceeded", self.config.device_id);
            }
            State::Unauthenticated
        } else if info.device_count() != 0 {
            self.state_helper = u64::from(info.0 & RepeaterInfo::MASK);
            log::debug!(
                "hdcp-tx({}): devices attached: ksv list ready",
                self.config.device_id
            );
            State::ReadKsvList
        } else {
            log::debug!("hdcp-tx({}): no attached devices", self.config.device_id);
            State::Authenticated
        }
    }

    /// Read and verify the repeater KSV list, retrying a bounded number
    /// of times
    pub(super) fn read_ksv_list(&mut self) -> State {
        let info = RepeaterInfo(self.state_helper as u16 & RepeaterInfo::MASK);

        let mut attempts = READ_ATTEMPTS;
        let mut valid = false;
        while !valid && attempts > 0 {
            valid = self.validate_ksv_list(info);
            attempts -= 1;
        }

        if valid {
            log::debug!("hdcp-tx({}): ksv list validated", self.config.device_id);
            State::Authenticated
        } else {
            log::warn!("hdcp-tx({}): ksv list invalid", self.config.device_id);
            State::Unauthenticated
        }
    }

    /// Verify the downstream KSV list against the repeater's V' digest
    ///
    /// V = SHA-1 over the KSV list bytes, then BInfo (low byte first), then
    /// Mo (high byte first). The repeater's V' arrives as five 32-bit words
    /// read MSB-first; all five must match.
    fn validate_ksv_list(&mut self, info: RepeaterInfo) -> bool {
        let mut sha = Sha1::new();

        let mut remaining = usize::from(info.device_count()) * port::SIZE_KSV;
        while remaining > 0 {
            let mut chunk = [0u8; port::KSV_FIFO_CHUNK];
            let len = remaining.min(port::KSV_FIFO_CHUNK);
            if !self.port_read(PortRegister::KsvFifo, &mut chunk[..len]) {
                return false;
            }
            sha.update(&chunk[..len]);
            remaining -= len;
        }

        sha.update(info.0.to_le_bytes());
        sha.update(self.cipher.mo().to_be_bytes());
        let digest = sha.finalize();

        let mut valid = true;
        for (chunk, register) in digest
            .as_slice()
            .chunks_exact(port::SIZE_VH)
            .zip(port::VH_REGISTERS)
        {
            let calculated = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);

            let mut buf = [0u8; port::SIZE_VH];
            let reported = if self.port_read(register, &mut buf) {
                u32::from_be_bytes(buf)
            } else {
                0
            };

            if calculated != reported {
                valid = false;
            }
        }
        valid
    }

    /// Read a downstream register, counting transport failures
    ///
    /// A zero-length read is a transport failure like any other.
    fn port_read(&mut self, register: PortRegister, buf: &mut [u8]) -> bool {
        match self.port.read(register, buf) {
            Ok(n) if n > 0 => true,
            _ => {
                self.stats.read_failures += 1;
                false
            }
        }
    }
}
