//! User-mode client for the DBK kernel driver.
//!
//! [`Session`] is the entry point: it enables the debug privilege, opens the
//! device, hands the driver its two notification events and then issues
//! typed commands. All OS access goes through the traits in [`os`], with
//! [`win32::Win32`] as the real implementation.

pub mod channel;
pub mod codec;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod os;
pub mod privilege;
pub mod session;
pub mod uni;
#[cfg(windows)]
pub mod win32;

#[cfg(test)]
mod mock;

pub use channel::{ChannelState, DeviceChannel};
pub use codec::{Command, CommandResult, RegionInfo, RequestFrame, VersionInfo};
pub use dispatcher::{Dispatcher, DispatcherState};
pub use error::{Error, Result};
pub use os::OsError;
pub use privilege::{PrivilegeEscalator, PrivilegeGrant};
pub use session::{RemoteProcessHandle, Session, SessionConfig};
