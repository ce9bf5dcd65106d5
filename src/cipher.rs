//! Cipher capability
//!
//! The hardware cipher block performs the actual HDCP key generation and
//! stream encryption. The transmitter state machine drives it through this
//! narrow capability: load the remote KSV, seed the session value, kick off
//! one of the three hardware computations, poll for completion and read the
//! cryptographic outputs back out.
//!
//! The register map, key-loading sequence and internal computation of the
//! block live entirely behind the implementation of this trait.

/// Hardware computations the cipher block can perform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherRequest {
    /// Full block computation (produces Ro/Ri, Mo/Mi and the session keys)
    Block,
    /// Re-key operation for the next frame group
    Rekey,
    /// Random number generation (produces Mi, consumed as An)
    Rng,
}

/// Capability surface of the hardware cipher block
///
/// All register-sized getters read back values latched by the most recently
/// completed request; callers are expected to check [`Cipher::is_request_complete`]
/// first.
pub trait Cipher {
    /// Enable the cipher core. Idempotent.
    fn enable(&mut self);

    /// Disable the cipher core. Idempotent.
    fn disable(&mut self);

    /// Load the downstream device's KSV (BKSV) into the key-select unit
    fn set_remote_ksv(&mut self, ksv: u64);

    /// Read the local 40-bit KSV (AKSV)
    fn local_ksv(&self) -> u64;

    /// Load the 64-bit session value plus repeater flag as three register
    /// pieces: X = An[27:0], Y = An[55:28], Z[7:0] = An[63:56] and Z bit 8
    /// carries the repeater flag.
    fn set_b(&mut self, x: u32, y: u32, z: u32);

    /// Initiate a hardware computation. Fire-and-poll: completion is
    /// observed through [`Cipher::is_request_complete`].
    fn request(&mut self, request: CipherRequest);

    /// Non-blocking completion poll for the most recent request
    fn is_request_complete(&self) -> bool;

    /// Read the 64-bit Mi output (An after an RNG request)
    fn mi(&self) -> u64;

    /// Read the 16-bit Ri link-integrity value
    fn ri(&self) -> u16;

    /// Read the 64-bit Mo output (feeds the repeater V computation)
    fn mo(&self) -> u64;

    /// Read the 16-bit Ro authentication check value
    fn ro(&self) -> u16;

    /// Read the bitmap of streams currently being encrypted
    fn encryption(&self) -> u64;

    /// Start encrypting the streams in `stream_map`
    fn enable_encryption(&mut self, stream_map: u64);

    /// Stop encrypting the streams in `stream_map`
    fn disable_encryption(&mut self, stream_map: u64);

    /// Arm or disarm the Ri-update interrupt (HDMI only; fires every 128
    /// frames when a fresh Ri is available)
    fn set_ri_update(&mut self, enabled: bool);

    /// Configure the number of lanes the cipher spans (DisplayPort)
    fn set_lane_count(&mut self, lanes: u32);
}
