use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::FleetError;

/// Run state of a service's long-lived run command.
///
/// - `Stopped`: no run process is attached.
/// - `Pending`: the run command was spawned and readiness is being probed.
/// - `Running`: the readiness probe answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Stopped,
    Pending,
    Running,
}

impl RunStatus {
    pub const ALL: [RunStatus; 3] = [RunStatus::Stopped, RunStatus::Pending, RunStatus::Running];

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Stopped => "STOPPED",
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
        }
    }
}

impl Default for RunStatus {
    fn default() -> Self {
        RunStatus::Stopped
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "STOPPED" => Ok(RunStatus::Stopped),
            "PENDING" => Ok(RunStatus::Pending),
            "RUNNING" => Ok(RunStatus::Running),
            other => Err(format!(
                "invalid run status: {other} (expected STOPPED, PENDING or RUNNING)"
            )),
        }
    }
}

/// How `GIT_CLONE` reaches the remote, taken from the `gitCheckoutType`
/// task attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutTransport {
    Ssh,
    Https,
    /// HTTPS with `user:password` credentials from the `basicAuth` attribute.
    HttpsBasicAuth,
}

impl FromStr for CheckoutTransport {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ssh" => Ok(CheckoutTransport::Ssh),
            "https" => Ok(CheckoutTransport::Https),
            "https+basicauth" => Ok(CheckoutTransport::HttpsBasicAuth),
            other => Err(FleetError::UnknownCheckoutTransport(other.to_string())),
        }
    }
}

/// Package manager used for install, run and script commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Npm,
    Yarn,
    Pnpm,
}

impl Default for PackageManager {
    fn default() -> Self {
        PackageManager::Npm
    }
}

impl PackageManager {
    /// Executable name, with the `.cmd` shim on Windows.
    pub fn command(self) -> &'static str {
        match (self, cfg!(windows)) {
            (PackageManager::Npm, false) => "npm",
            (PackageManager::Npm, true) => "npm.cmd",
            (PackageManager::Yarn, false) => "yarn",
            (PackageManager::Yarn, true) => "yarn.cmd",
            (PackageManager::Pnpm, false) => "pnpm",
            (PackageManager::Pnpm, true) => "pnpm.cmd",
        }
    }

    pub fn install_command(self) -> String {
        match self {
            PackageManager::Npm => format!("{} i", self.command()),
            PackageManager::Yarn | PackageManager::Pnpm => format!("{} install", self.command()),
        }
    }

    pub fn run_script_command(self, script: &str) -> String {
        format!("{} run {}", self.command(), script)
    }
}

/// Parse a simple duration string like `"3s"`, `"250ms"`, `"1m"`, `"2h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => value
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration '{s}' is too large")),
        "h" => value
            .checked_mul(60 * 60)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration '{s}' is too large")),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compact_durations() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration(" 3s "), Ok(Duration::from_secs(3)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("0s"), Ok(Duration::ZERO));
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("").is_err());
        assert_eq!(
            parse_duration("99999999999999999h"),
            Err("duration '99999999999999999h' is too large".to_string())
        );
        assert!(parse_duration("999999999999999999m").is_err());
    }

    #[test]
    fn checkout_transport_rejects_unknown_values() {
        assert_eq!("ssh".parse::<CheckoutTransport>().ok(), Some(CheckoutTransport::Ssh));
        assert_eq!(
            "https+basicauth".parse::<CheckoutTransport>().ok(),
            Some(CheckoutTransport::HttpsBasicAuth)
        );
        match "ftp".parse::<CheckoutTransport>() {
            Err(FleetError::UnknownCheckoutTransport(t)) => assert_eq!(t, "ftp"),
            other => panic!("expected UnknownCheckoutTransport, got {other:?}"),
        }
    }

    #[test]
    fn run_status_round_trips_through_strings() {
        for status in RunStatus::ALL {
            assert_eq!(status.as_str().parse::<RunStatus>(), Ok(status));
        }
        assert!("paused".parse::<RunStatus>().is_err());
    }
}
