//! Per-instance configuration
//!
//! A transmitter instance is bound to one downstream link. The configuration
//! record identifies the instance and the sideband protocol it speaks; how
//! the record is looked up (device tables, platform glue) is the host's
//! business.

/// Sideband protocol spoken by the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// HDMI; sideband registers are reached over DDC/I2C
    Hdmi,
    /// DisplayPort; sideband registers are reached over the AUX channel
    DisplayPort,
}

impl Protocol {
    /// Check whether this is the HDMI flavour of the link
    pub fn is_hdmi(self) -> bool {
        self == Protocol::Hdmi
    }
}

/// Configuration of a single transmitter instance
#[derive(Debug, Clone, Copy)]
pub struct TxConfig {
    /// Logical device identifier (used to tag log output)
    pub device_id: u32,
    /// Protocol flavour of the downstream link
    pub protocol: Protocol,
    /// Hardware base address of the cipher core backing this instance
    pub base_address: u64,
}
