// SPDX-License-Identifier: BSD-3-Clause

//! Symbolic names for the `MODn_TYPE` integers reported by `SYSTEM`.

/// The kind of backplane module installed in a given slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModType {
    NoMod,
    Driver,
    Ad,
    LvBias,
    HvBias,
    Heater,
    XvBias,
    Lvds,
    Hs,
    HeaterX,
    Xvio,
    Adf,
    Atlas,
    Unknown(u64),
}

impl ModType {
    pub fn from_code(code: u64) -> Self {
        match code {
            0 => ModType::NoMod,
            1 => ModType::Driver,
            2 => ModType::Ad,
            3 => ModType::LvBias,
            4 => ModType::HvBias,
            5 => ModType::Heater,
            6 => ModType::XvBias,
            7 => ModType::Lvds,
            8 => ModType::Hs,
            9 => ModType::HeaterX,
            10 => ModType::Xvio,
            11 => ModType::Adf,
            12 => ModType::Atlas,
            other => ModType::Unknown(other),
        }
    }

    /// The symbolic name inserted into `get_system()`'s `modN_name` field.
    pub fn name(&self) -> String {
        match self {
            ModType::NoMod => "NOMOD".to_string(),
            ModType::Driver => "DRIVER".to_string(),
            ModType::Ad => "AD".to_string(),
            ModType::LvBias => "LVBIAS".to_string(),
            ModType::HvBias => "HVBIAS".to_string(),
            ModType::Heater => "HEATER".to_string(),
            ModType::XvBias => "XVBIAS".to_string(),
            ModType::Lvds => "LVDS".to_string(),
            ModType::Hs => "HS".to_string(),
            ModType::HeaterX => "HEATERX".to_string(),
            ModType::Xvio => "XVIO".to_string(),
            ModType::Adf => "ADF".to_string(),
            ModType::Atlas => "ATLAS".to_string(),
            ModType::Unknown(code) => format!("UNKNOWN_{code}"),
        }
    }
}
