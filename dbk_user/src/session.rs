//! A connected, initialized driver session and everything it owns.
use std::sync::atomic::{AtomicU64, Ordering};

use dbk_shared::{DEBUG_PRIVILEGE, DEVICE_PATH, PROCESS_EVENT_NAME, THREAD_EVENT_NAME};
use log::{debug, info, warn};

use crate::channel::DeviceChannel;
use crate::codec::{RegionInfo, VersionInfo};
use crate::dispatcher::{Dispatcher, DispatcherState};
use crate::error::{Error, Result};
use crate::os::{KernelObject, Platform, SecurityContext};
use crate::privilege::{PrivilegeEscalator, PrivilegeGrant};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Upper bound for a single read or write, in bytes.
    pub max_transfer: usize,
    pub process_event: String,
    pub thread_event: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_transfer: 4096,
            process_event: PROCESS_EVENT_NAME.to_string(),
            thread_event: THREAD_EVENT_NAME.to_string(),
        }
    }
}

/// A process handle the driver opened on behalf of one session.
///
/// Not `Clone`: the session closes the underlying handle exactly once, either
/// through [`Session::release_process`] or when the session is dropped.
#[derive(Debug, PartialEq, Eq)]
pub struct RemoteProcessHandle {
    raw: u64,
    session: u64,
    pid: u32,
}

impl RemoteProcessHandle {
    pub fn raw(&self) -> u64 {
        self.raw
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

/// One open channel to the driver, initialized and ready for commands.
///
/// Dropping the session closes, in order, every process handle still held,
/// the device channel, and the two event handles.
pub struct Session<P: Platform> {
    id: u64,
    processes: Vec<u64>,
    dispatcher: Dispatcher<P::Device>,
    process_event: P::Event,
    thread_event: P::Event,
    platform: P,
}

impl<P: Platform> Session<P> {
    /// Enable the debug privilege, then open the session.
    pub fn connect<S: SecurityContext>(
        platform: P,
        escalator: &mut PrivilegeEscalator<S>,
        config: SessionConfig,
    ) -> Result<Self> {
        let grant = escalator.escalate(DEBUG_PRIVILEGE)?;
        Self::open(platform, &grant, config)
    }

    /// Open the device, create the notification events and initialize the
    /// driver. On failure everything acquired so far is released again.
    pub fn open(platform: P, grant: &PrivilegeGrant, config: SessionConfig) -> Result<Self> {
        debug!("Opening session holding {}", grant.privilege());

        let channel = DeviceChannel::open(&platform, DEVICE_PATH)?;
        let process_event = create_event(&platform, &config.process_event)?;
        let thread_event = create_event(&platform, &config.thread_event)?;

        let mut dispatcher = Dispatcher::new(channel, config.max_transfer);
        dispatcher.initialize(process_event.raw(), thread_event.raw())?;

        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        info!("Session {id} ready on {DEVICE_PATH}");
        Ok(Self {
            id,
            processes: Vec::new(),
            dispatcher,
            process_event,
            thread_event,
            platform,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> DispatcherState {
        self.dispatcher.state()
    }

    pub fn sdt_shadow(&self) -> Option<u64> {
        self.dispatcher.sdt_shadow()
    }

    pub fn event_handles(&self) -> (u64, u64) {
        (self.process_event.raw(), self.thread_event.raw())
    }

    pub fn get_version(&mut self) -> Result<VersionInfo> {
        self.dispatcher.get_version()
    }

    pub fn test(&mut self, payload: [u8; 8]) -> Result<[u8; 8]> {
        self.dispatcher.test(payload)
    }

    pub fn open_process(&mut self, pid: u32, access: u32) -> Result<RemoteProcessHandle> {
        let raw = self.dispatcher.open_process(pid, access)?;
        self.processes.push(raw);
        Ok(RemoteProcessHandle {
            raw,
            session: self.id,
            pid,
        })
    }

    pub fn read_memory(
        &mut self,
        process: &RemoteProcessHandle,
        address: u64,
        size: usize,
    ) -> Result<Vec<u8>> {
        let raw = self.owned(process)?;
        self.dispatcher.read_memory(raw, address, size)
    }

    pub fn write_memory(
        &mut self,
        process: &RemoteProcessHandle,
        address: u64,
        data: &[u8],
    ) -> Result<()> {
        let raw = self.owned(process)?;
        self.dispatcher.write_memory(raw, address, data)
    }

    pub fn query_virtual_memory(&mut self, pid: u32, base: u64) -> Result<RegionInfo> {
        self.dispatcher.query_virtual_memory(pid, base)
    }

    pub fn get_peprocess(&mut self, pid: u32) -> Result<u64> {
        self.dispatcher.get_peprocess(pid)
    }

    /// Close one process handle before the session ends.
    pub fn release_process(&mut self, process: RemoteProcessHandle) -> Result<()> {
        let raw = self.owned(&process)?;
        self.processes.retain(|h| *h != raw);
        self.platform
            .close_handle(raw)
            .map_err(|os| Error::HandleRelease { raw, os })?;
        debug!("Released handle 0x{raw:X} for pid {}", process.pid);
        Ok(())
    }

    fn owned(&self, process: &RemoteProcessHandle) -> Result<u64> {
        if process.session != self.id {
            return Err(Error::ForeignHandle);
        }
        Ok(process.raw)
    }
}

impl<P: Platform> Drop for Session<P> {
    fn drop(&mut self) {
        for raw in self.processes.drain(..) {
            if let Err(os) = self.platform.close_handle(raw) {
                warn!("Closing process handle 0x{raw:X} failed: {os}");
            }
        }
        self.dispatcher.close();
        info!("Session {} closed", self.id);
    }
}

fn create_event<P: Platform>(platform: &P, name: &str) -> Result<P::Event> {
    let event = platform
        .create_event(name)
        .map_err(|os| Error::EventCreation {
            name: name.to_string(),
            os,
        })?;
    debug!("Created event {name} as 0x{:X}", event.raw());
    Ok(event)
}
