//! Controller health values: system error flags and EtherCAT state.

#![allow(missing_docs)]

use std::fmt;

use bitflags::bitflags;

use crate::error::TrioError;

bitflags! {
    /// Bits of `SYSTEM_ERROR`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SystemErrors: u32 {
        const RAM = 0x0000_0001;
        const BATTERY = 0x0000_0002;
        const INVALID_MODULE = 0x0000_0004;
        const VR_TABLE_CORRUPT_ENTRY = 0x0000_0008;
        const MC_CONFIG = 0x0000_0010;
        const WATCHDOG_TRIP = 0x0000_0020;
        const FPGA = 0x0000_0040;
        const FLASH_MEMORY = 0x0000_0080;
        const UNIT = 0x0000_0100;
        const STATION = 0x0000_0200;
        const IO_CONFIGURATION = 0x0000_0400;
        const AXES_CONFIGURATION = 0x0000_0800;
        const UNIT_LOST = 0x0001_0000;
        const UNIT_TERMINATOR_LOST = 0x0002_0000;
        const UNIT_STATION_LOST = 0x0004_0000;
        const INVALID_UNIT = 0x0008_0000;
        const UNIT_STATION = 0x0010_0000;
        const PROCESSOR_EXCEPTION = 0x0100_0000;
        const RFID_CIRCUIT_IDENTIFICATION = 0x0200_0000;
    }
}

impl SystemErrors {
    /// Keeps unknown bits so nothing reported by the controller is lost.
    pub fn from_value(value: i64) -> Result<Self, TrioError> {
        let bits = u32::try_from(value).map_err(|_| TrioError::UnexpectedValue {
            command: "?SYSTEM_ERROR".into(),
            value,
        })?;
        Ok(Self::from_bits_retain(bits))
    }

    /// Flag names, plus the hex value of unknown bits.
    #[must_use]
    pub fn describe(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .iter_names()
            .map(|(name, _)| name.to_ascii_lowercase())
            .collect();
        let unknown = self.bits() & !Self::all().bits();
        if unknown != 0 {
            names.push(format!("unknown(0x{unknown:08X})"));
        }
        names
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EthercatState {
    Initial,
    PreOperational,
    SafeOperational,
    Operational,
}

impl EthercatState {
    pub const ALL: [EthercatState; 4] = [
        Self::Initial,
        Self::PreOperational,
        Self::SafeOperational,
        Self::Operational,
    ];

    #[must_use]
    pub fn value(self) -> i64 {
        match self {
            Self::Initial => 0,
            Self::PreOperational => 1,
            Self::SafeOperational => 2,
            Self::Operational => 3,
        }
    }

    #[must_use]
    pub fn from_value(value: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.value() == value)
    }

    pub fn parse(text: &str) -> Result<Self, TrioError> {
        match text.trim().to_ascii_lowercase().replace(&['-', '_'][..], "").as_str() {
            "initial" | "init" => Ok(Self::Initial),
            "preoperational" | "preop" => Ok(Self::PreOperational),
            "safeoperational" | "safeop" => Ok(Self::SafeOperational),
            "operational" | "op" => Ok(Self::Operational),
            _ => Err(TrioError::InvalidConfig(
                format!("invalid ethercat state '{text}'").into(),
            )),
        }
    }
}

impl fmt::Display for EthercatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initial => "Initial",
            Self::PreOperational => "PreOperational",
            Self::SafeOperational => "SafeOperational",
            Self::Operational => "Operational",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_errors_keep_unknown_bits() {
        let errors = SystemErrors::from_value(0x0000_1012).unwrap();
        assert!(errors.contains(SystemErrors::BATTERY));
        assert!(errors.contains(SystemErrors::MC_CONFIG));
        assert_eq!(
            errors.describe(),
            vec![
                "battery".to_string(),
                "mc_config".to_string(),
                "unknown(0x00001000)".to_string()
            ]
        );
        assert!(SystemErrors::from_value(-1).is_err());
    }

    #[test]
    fn ethercat_state_names() {
        assert_eq!(EthercatState::parse("safe-op").unwrap(), EthercatState::SafeOperational);
        assert_eq!(EthercatState::from_value(3), Some(EthercatState::Operational));
        assert_eq!(EthercatState::from_value(7), None);
        assert!(EthercatState::parse("running").is_err());
    }
}
