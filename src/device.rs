use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::error::{AdbError, Result};

/// Connection state of an attached device, as reported in a
/// `host:devices-l` listing. Unknown tokens map to [`DeviceState::Unknown`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceState {
    Online,
    Offline,
    Bootloader,
    Recovery,
    Unauthorized,
    Authorizing,
    Sideload,
    Host,
    NoPermissions,
    #[default]
    Unknown,
}

impl DeviceState {
    /// Map a state token from a device listing. `device` is the wire
    /// token for an online device.
    pub fn from_token(token: &str) -> DeviceState {
        match token {
            "device" => DeviceState::Online,
            "offline" => DeviceState::Offline,
            "bootloader" => DeviceState::Bootloader,
            "recovery" => DeviceState::Recovery,
            "unauthorized" => DeviceState::Unauthorized,
            "authorizing" => DeviceState::Authorizing,
            "sideload" => DeviceState::Sideload,
            "host" => DeviceState::Host,
            // `no permissions` arrives with trailing udev detail.
            token if token.starts_with("no permissions") => DeviceState::NoPermissions,
            _ => DeviceState::Unknown,
        }
    }
}

impl Display for DeviceState {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let token = match self {
            DeviceState::Online => "device",
            DeviceState::Offline => "offline",
            DeviceState::Bootloader => "bootloader",
            DeviceState::Recovery => "recovery",
            DeviceState::Unauthorized => "unauthorized",
            DeviceState::Authorizing => "authorizing",
            DeviceState::Sideload => "sideload",
            DeviceState::Host => "host",
            DeviceState::NoPermissions => "no permissions",
            DeviceState::Unknown => "unknown",
        };
        write!(f, "{token}")
    }
}

impl FromStr for DeviceState {
    type Err = AdbError;

    fn from_str(s: &str) -> Result<DeviceState> {
        Ok(DeviceState::from_token(s))
    }
}

/// One attached device from a `host:devices-l` listing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceData {
    pub serial: String,
    pub state: DeviceState,
    pub product: String,
    pub model: String,
    pub name: String,
    pub features: HashSet<String>,
    pub transport_id: Option<u64>,
}

impl DeviceData {
    /// Parse one listing line. Accepts both the short `serial\tstate`
    /// form and the long `devices -l` form with `key:value` pairs.
    /// The parser is whitespace-tolerant; unrecognised pairs are
    /// ignored.
    pub fn parse(line: &str) -> Result<DeviceData> {
        let mut tokens = line.split_whitespace();
        let serial = tokens
            .next()
            .ok_or_else(|| AdbError::InvalidArgument(format!("blank device line {line:?}")))?;
        let state_token = tokens
            .next()
            .ok_or_else(|| AdbError::InvalidArgument(format!("device line without state: {line:?}")))?;

        let mut device = DeviceData {
            serial: serial.to_string(),
            state: DeviceState::from_token(state_token),
            ..DeviceData::default()
        };

        // `no permissions` splits across tokens; the parenthesised
        // udev hint after it is not a key:value pair and is skipped.
        if state_token == "no" {
            let mut peek = tokens.clone();
            if peek.next().map_or(false, |t| t.starts_with("permissions")) {
                device.state = DeviceState::NoPermissions;
            }
        }

        for pair in tokens {
            let Some((key, value)) = pair.split_once(':') else {
                continue;
            };
            match key {
                "product" => device.product = value.to_string(),
                "model" => device.model = value.to_string(),
                "device" => device.name = value.to_string(),
                "features" => {
                    device.features = value.split(',').map(|f| f.to_string()).collect();
                }
                "transport_id" => device.transport_id = value.parse().ok(),
                _ => {}
            }
        }
        Ok(device)
    }
}

impl Display for DeviceData {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.serial, self.state)
    }
}

/// One endpoint of a port forward. The textual form is canonical and
/// round-trips through [`FromStr`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub enum ForwardSpec {
    /// `tcp:<port>`
    Tcp(u16),
    /// `localabstract:<name>` — abstract unix socket on the device.
    LocalAbstract(String),
    /// `localreserved:<name>`
    LocalReserved(String),
    /// `localfilesystem:<name>`
    LocalFilesystem(String),
    /// `dev:<path>` — character device.
    Dev(String),
    /// `jdwp:<pid>` — JDWP debugging of a process.
    Jdwp(u32),
}

impl Display for ForwardSpec {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            ForwardSpec::Tcp(port) => write!(f, "tcp:{port}"),
            ForwardSpec::LocalAbstract(name) => write!(f, "localabstract:{name}"),
            ForwardSpec::LocalReserved(name) => write!(f, "localreserved:{name}"),
            ForwardSpec::LocalFilesystem(name) => write!(f, "localfilesystem:{name}"),
            ForwardSpec::Dev(path) => write!(f, "dev:{path}"),
            ForwardSpec::Jdwp(pid) => write!(f, "jdwp:{pid}"),
        }
    }
}

impl FromStr for ForwardSpec {
    type Err = AdbError;

    fn from_str(s: &str) -> Result<ForwardSpec> {
        let (protocol, address) = s
            .split_once(':')
            .ok_or_else(|| AdbError::InvalidArgument(format!("forward spec without protocol: {s:?}")))?;
        match protocol {
            "tcp" => address
                .parse()
                .map(ForwardSpec::Tcp)
                .map_err(|_| AdbError::InvalidArgument(format!("bad tcp port in {s:?}"))),
            "localabstract" => Ok(ForwardSpec::LocalAbstract(address.to_string())),
            "localreserved" => Ok(ForwardSpec::LocalReserved(address.to_string())),
            "localfilesystem" => Ok(ForwardSpec::LocalFilesystem(address.to_string())),
            "dev" => Ok(ForwardSpec::Dev(address.to_string())),
            "jdwp" => address
                .parse()
                .map(ForwardSpec::Jdwp)
                .map_err(|_| AdbError::InvalidArgument(format!("bad jdwp pid in {s:?}"))),
            _ => Err(AdbError::InvalidArgument(format!(
                "unknown forward protocol {protocol:?}"
            ))),
        }
    }
}

/// One established forward from a `list-forward` listing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ForwardData {
    pub serial: String,
    pub local: ForwardSpec,
    pub remote: ForwardSpec,
}

impl ForwardData {
    /// Parse a `serial local remote` listing line.
    pub fn parse(line: &str) -> Result<ForwardData> {
        let mut tokens = line.split_whitespace();
        let (Some(serial), Some(local), Some(remote)) =
            (tokens.next(), tokens.next(), tokens.next())
        else {
            return Err(AdbError::InvalidArgument(format!(
                "bad forward line {line:?}"
            )));
        };
        Ok(ForwardData {
            serial: serial.to_string(),
            local: local.parse()?,
            remote: remote.parse()?,
        })
    }
}

impl Display for ForwardData {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{} {} {}", self.serial, self.local, self.remote)
    }
}
