use std::fmt::{Display, Formatter};

/// <sup>[`serde`](https://serde.rs)</sup>
/// Identity of a device port as understood by a [`Backend`](super::Backend).
///
/// [`DeviceId::None`] means that no device is selected for a direction.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum DeviceId {
    /// No device.
    #[default]
    None,
    /// Port with the specified index.
    Port(u32),
}

impl DeviceId {
    /// Returns `true` if no device is selected.
    pub fn is_none(&self) -> bool {
        matches!(self, DeviceId::None)
    }

    /// Port index, if any.
    pub fn port(&self) -> Option<u32> {
        match self {
            DeviceId::None => None,
            DeviceId::Port(idx) => Some(*idx),
        }
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceId::None => f.write_str("(none)"),
            DeviceId::Port(idx) => write!(f, "port {idx}"),
        }
    }
}

/// Direction of a device port.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Device delivers messages.
    Input,
    /// Device transmits messages.
    Output,
}

/// Human-readable description of a device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    name: String,
    id: DeviceId,
}

impl DeviceInfo {
    /// Creates device description.
    pub fn new(name: impl Into<String>, id: DeviceId) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }

    /// Description of the "no device" choice.
    pub fn none() -> Self {
        Self::new(DeviceId::None.to_string(), DeviceId::None)
    }

    /// Device name.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Device identifier.
    pub fn id(&self) -> DeviceId {
        self.id
    }
}

/// Finds a device by its name.
///
/// Returns [`DeviceInfo::none`] if there is no such device in the list.
pub fn resolve_device(devices: &[DeviceInfo], name: &str) -> DeviceInfo {
    devices
        .iter()
        .find(|info| info.name == name)
        .cloned()
        .unwrap_or_else(DeviceInfo::none)
}
