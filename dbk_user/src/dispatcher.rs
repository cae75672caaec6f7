//! Typed driver commands on top of a device channel.
//!
//! The dispatcher owns the channel and enforces the command ordering the
//! driver relies on: `Initialize` exactly once and first, nothing after a
//! fault. Ordering errors and size-bound violations are reported without any
//! I/O.
use dbk_shared::Opcode;
use log::{debug, info, warn};

use crate::channel::DeviceChannel;
use crate::codec::{decode, encode, Command, CommandResult, RegionInfo, VersionInfo};
use crate::error::{Error, Result};
use crate::os::{
    DeviceIo, ERROR_ACCESS_DENIED, ERROR_INVALID_ADDRESS, ERROR_INVALID_PARAMETER, ERROR_NOACCESS,
    ERROR_PARTIAL_COPY,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Uninitialized,
    Initializing,
    Ready,
    Faulted,
}

pub struct Dispatcher<D> {
    channel: DeviceChannel<D>,
    state: DispatcherState,
    max_transfer: usize,
    sdt_shadow: Option<u64>,
}

impl<D: DeviceIo> Dispatcher<D> {
    /// Wrap an open channel. `max_transfer` bounds every read and write.
    pub fn new(channel: DeviceChannel<D>, max_transfer: usize) -> Self {
        Self {
            channel,
            state: DispatcherState::Uninitialized,
            max_transfer,
            sdt_shadow: None,
        }
    }

    pub fn state(&self) -> DispatcherState {
        self.state
    }

    pub fn channel(&self) -> &DeviceChannel<D> {
        &self.channel
    }

    pub fn max_transfer(&self) -> usize {
        self.max_transfer
    }

    /// Shadow service table address the driver reported on initialize.
    pub fn sdt_shadow(&self) -> Option<u64> {
        self.sdt_shadow
    }

    /// Hand the two event handles to the driver. Allowed exactly once.
    pub fn initialize(&mut self, process_event: u64, thread_event: u64) -> Result<()> {
        match self.state {
            DispatcherState::Uninitialized => {}
            DispatcherState::Faulted => return Err(Error::ChannelFaulted),
            DispatcherState::Initializing | DispatcherState::Ready => {
                return Err(Error::AlreadyInitialized)
            }
        }

        self.state = DispatcherState::Initializing;
        let command = Command::Initialize {
            process_event,
            thread_event,
        };
        match self.execute(&command) {
            Ok(CommandResult::Initialized { sdt_shadow }) => {
                info!("Driver initialized, SDT shadow at 0x{sdt_shadow:X}");
                self.sdt_shadow = Some(sdt_shadow);
                self.state = DispatcherState::Ready;
                Ok(())
            }
            Ok(other) => unreachable!("{} decoded as {other:?}", Opcode::Initialize),
            Err(err) => {
                if self.state != DispatcherState::Faulted {
                    self.state = DispatcherState::Uninitialized;
                }
                Err(err)
            }
        }
    }

    pub fn get_version(&mut self) -> Result<VersionInfo> {
        match self.run(Command::GetVersion)? {
            CommandResult::Version(version) => Ok(version),
            other => unreachable!("{} decoded as {other:?}", Opcode::GetVersion),
        }
    }

    /// Round-trip an 8-byte payload through the driver.
    pub fn test(&mut self, payload: [u8; 8]) -> Result<[u8; 8]> {
        match self.run(Command::Test(payload))? {
            CommandResult::Test(echo) => Ok(echo),
            other => unreachable!("{} decoded as {other:?}", Opcode::Test),
        }
    }

    /// Returns the raw handle value the driver opened in this process.
    pub fn open_process(&mut self, pid: u32, access: u32) -> Result<u64> {
        match self.run(Command::OpenProcess { pid, access })? {
            CommandResult::ProcessOpened { handle } => {
                debug!("Opened pid {pid} as handle 0x{handle:X}");
                Ok(handle)
            }
            other => unreachable!("{} decoded as {other:?}", Opcode::OpenProcess),
        }
    }

    pub fn read_memory(&mut self, handle: u64, address: u64, size: usize) -> Result<Vec<u8>> {
        let size = self.check_transfer(size)?;
        match self.run(Command::ReadMemory {
            handle,
            address,
            size,
        })? {
            CommandResult::Memory(bytes) => Ok(bytes),
            other => unreachable!("{} decoded as {other:?}", Opcode::ReadMemory),
        }
    }

    pub fn write_memory(&mut self, handle: u64, address: u64, data: &[u8]) -> Result<()> {
        self.check_transfer(data.len())?;
        match self.run(Command::WriteMemory {
            handle,
            address,
            data: data.to_vec(),
        })? {
            CommandResult::Written => Ok(()),
            other => unreachable!("{} decoded as {other:?}", Opcode::WriteMemory),
        }
    }

    pub fn query_virtual_memory(&mut self, pid: u32, base: u64) -> Result<RegionInfo> {
        let command = Command::QueryVirtualMemory {
            pid: pid as u64,
            base,
        };
        match self.run(command)? {
            CommandResult::Region(region) => Ok(region),
            other => unreachable!("{} decoded as {other:?}", Opcode::QueryVirtualMemory),
        }
    }

    /// Kernel address of the process object for `pid`.
    pub fn get_peprocess(&mut self, pid: u32) -> Result<u64> {
        match self.run(Command::GetPeProcess { pid })? {
            CommandResult::PeProcess(address) => Ok(address),
            other => unreachable!("{} decoded as {other:?}", Opcode::GetPeProcess),
        }
    }

    /// Close the channel. Nothing can be sent afterwards.
    pub fn close(&mut self) {
        self.channel.close();
    }

    fn check_transfer(&self, size: usize) -> Result<u32> {
        let exceeded = Error::SizeExceeded {
            requested: size,
            limit: self.max_transfer,
        };
        if size > self.max_transfer {
            return Err(exceeded);
        }
        u32::try_from(size).map_err(|_| exceeded)
    }

    /// Any command other than `Initialize` requires `Ready`.
    fn run(&mut self, command: Command) -> Result<CommandResult> {
        match self.state {
            DispatcherState::Ready => self.execute(&command),
            DispatcherState::Faulted => Err(Error::ChannelFaulted),
            DispatcherState::Uninitialized | DispatcherState::Initializing => {
                Err(Error::NotInitialized {
                    opcode: command.opcode(),
                })
            }
        }
    }

    fn execute(&mut self, command: &Command) -> Result<CommandResult> {
        let frame = encode(command)?;
        let result = self
            .channel
            .send(frame.opcode, &frame.bytes, frame.response_len)
            .map_err(|err| refine(command, err))
            .and_then(|response| decode(frame.opcode, frame.response_len, &response));

        if let Err(err) = &result {
            if err.is_fatal() {
                warn!("{}: {err}, dispatcher faulted", frame.opcode);
                self.state = DispatcherState::Faulted;
                self.channel.fault();
            }
        }
        result
    }
}

/// Turn a generic driver refusal into the error that explains it for this
/// particular command.
fn refine(command: &Command, err: Error) -> Error {
    let Error::Rejected { os, .. } = err else {
        return err;
    };
    match (command, os.code()) {
        (Command::OpenProcess { .. }, ERROR_ACCESS_DENIED) => Error::AccessDenied { os },
        (Command::OpenProcess { pid, .. }, ERROR_INVALID_PARAMETER) => {
            Error::NoSuchProcess { pid: *pid, os }
        }
        (
            Command::ReadMemory { address, .. } | Command::WriteMemory { address, .. },
            ERROR_PARTIAL_COPY | ERROR_INVALID_ADDRESS | ERROR_NOACCESS,
        ) => Error::InvalidAddress {
            address: *address,
            os,
        },
        (Command::QueryVirtualMemory { base, .. }, ERROR_INVALID_ADDRESS) => {
            Error::InvalidAddress { address: *base, os }
        }
        (Command::WriteMemory { .. }, ERROR_ACCESS_DENIED) => Error::AccessDenied { os },
        _ => err,
    }
}
