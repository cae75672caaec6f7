//! Simulated OS and DBK driver for unit tests.
//!
//! The fake driver parses every request with `decode_request`, which applies
//! the same size checks the real one does, so a test sees the same
//! accept/reject behaviour without a kernel.
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use dbk_shared::frames::{
    InitializeRequest, InitializeResponse, PointerResponse, QueryRegionResponse, VersionResponse,
};
use dbk_shared::{Opcode, DEVICE_PATH};
use zerocopy::AsBytes;

use crate::codec::{decode_request, Command, RequestFrame};

use crate::os::{
    AdjustError, Adjustment, DeviceIo, KernelObject, Luid, OsError, Platform, SecurityContext,
    ERROR_ACCESS_DENIED, ERROR_FILE_NOT_FOUND, ERROR_INVALID_ADDRESS, ERROR_INVALID_FUNCTION,
    ERROR_INVALID_HANDLE, ERROR_INVALID_PARAMETER, ERROR_PARTIAL_COPY,
};

pub const DRIVER_VERSION: u32 = 0x00E0_000B;
pub const SDT_SHADOW: u64 = 0xFFFF_F800_1234_5000;
pub const REGION_SIZE: u64 = 0x1000;
pub const PAGE_READWRITE: u32 = 0x04;

struct SecurityState {
    adjustment: Result<Adjustment, AdjustError>,
    lookup_error: Option<OsError>,
    lookups: u32,
    adjusts: u32,
}

#[derive(Clone)]
pub struct MockSecurity {
    state: Rc<RefCell<SecurityState>>,
}

impl MockSecurity {
    pub fn granting() -> Self {
        Self::with_adjustment(Ok(Adjustment::Complete))
    }

    pub fn with_adjustment(adjustment: Result<Adjustment, AdjustError>) -> Self {
        Self {
            state: Rc::new(RefCell::new(SecurityState {
                adjustment,
                lookup_error: None,
                lookups: 0,
                adjusts: 0,
            })),
        }
    }

    pub fn fail_lookup(&self, os: OsError) {
        self.state.borrow_mut().lookup_error = Some(os);
    }

    pub fn lookup_calls(&self) -> u32 {
        self.state.borrow().lookups
    }

    pub fn adjust_calls(&self) -> u32 {
        self.state.borrow().adjusts
    }
}

impl SecurityContext for MockSecurity {
    fn lookup_privilege(&self, _name: &str) -> Result<Luid, OsError> {
        let mut state = self.state.borrow_mut();
        state.lookups += 1;
        match state.lookup_error {
            Some(os) => Err(os),
            None => Ok(Luid { low: 20, high: 0 }),
        }
    }

    fn enable_privilege(&self, _luid: Luid) -> Result<Adjustment, AdjustError> {
        let mut state = self.state.borrow_mut();
        state.adjusts += 1;
        state.adjustment
    }
}

/// Behaviour of the simulated driver.
#[derive(Default)]
pub struct MockDriver {
    /// pid -> sparse byte memory of that process.
    pub processes: HashMap<u32, HashMap<u64, u8>>,
    /// Pids whose open is refused with access denied.
    pub protected: Vec<u32>,
    /// Queued failures, consumed when the next request for that opcode arrives.
    pub failures: VecDeque<(Opcode, OsError)>,
    /// Opcode whose reply is cut short by half.
    pub short_reply: Option<Opcode>,
    /// Last initialization record received.
    pub init_record: Option<InitializeRequest>,
}

impl MockDriver {
    pub fn with_process(mut self, pid: u32, base: u64, bytes: &[u8]) -> Self {
        let memory = self.processes.entry(pid).or_default();
        for (i, b) in bytes.iter().enumerate() {
            memory.insert(base + i as u64, *b);
        }
        self
    }
}

/// Shared state behind [`MockPlatform`]; tests inspect it after the fact.
pub struct PlatformState {
    /// `None` means no driver is loaded and opening the device fails.
    pub driver: Option<MockDriver>,
    pub open_error: Option<OsError>,
    /// Fail the event creation with this index (0 = process, 1 = thread).
    pub fail_event: Option<(usize, OsError)>,
    /// (control code, input bytes, declared output length) per request.
    pub requests: Vec<(u32, Vec<u8>, usize)>,
    pub devices_opened: usize,
    pub devices_live: usize,
    pub events_created: usize,
    pub live_events: Vec<u64>,
    /// Process handles handed out by the driver and not yet closed.
    pub process_handles: HashMap<u64, u32>,
    pub closed_handles: Vec<u64>,
    next_handle: u64,
}

impl PlatformState {
    fn allocate_handle(&mut self) -> u64 {
        self.next_handle += 4;
        self.next_handle
    }

    fn control(&mut self, code: u32, input: &[u8], output: &mut [u8]) -> Result<usize, OsError> {
        let opcode = Opcode::from_code(code).ok_or(OsError(ERROR_INVALID_FUNCTION))?;
        let frame = RequestFrame {
            opcode,
            bytes: input.to_vec(),
            response_len: output.len(),
        };
        let command = decode_request(&frame).map_err(|_| OsError(ERROR_INVALID_PARAMETER))?;

        let driver = self.driver.as_mut().ok_or(OsError(ERROR_INVALID_HANDLE))?;
        if let Some(pos) = driver.failures.iter().position(|(op, _)| *op == opcode) {
            if let Some((_, os)) = driver.failures.remove(pos) {
                return Err(os);
            }
        }

        let reply = self.reply(command)?;
        let mut len = reply.len();
        if self.driver.as_ref().and_then(|d| d.short_reply) == Some(opcode) {
            len /= 2;
        }
        output[..len].copy_from_slice(&reply[..len]);
        Ok(len)
    }

    fn reply(&mut self, command: Command) -> Result<Vec<u8>, OsError> {
        let invalid = OsError(ERROR_INVALID_PARAMETER);
        let driver = self.driver.as_mut().ok_or(invalid)?;
        match command {
            Command::GetVersion => Ok(VersionResponse {
                version: DRIVER_VERSION,
            }
            .as_bytes()
            .to_vec()),
            Command::Test(payload) => Ok(payload.to_vec()),
            Command::Initialize {
                process_event,
                thread_event,
            } => {
                driver.init_record = Some(InitializeRequest::new(process_event, thread_event));
                Ok(InitializeResponse {
                    sdt_shadow: SDT_SHADOW,
                }
                .as_bytes()
                .to_vec())
            }
            Command::OpenProcess { pid, .. } => {
                if driver.protected.contains(&pid) {
                    return Err(OsError(ERROR_ACCESS_DENIED));
                }
                if !driver.processes.contains_key(&pid) {
                    return Err(invalid);
                }
                let handle = self.allocate_handle();
                self.process_handles.insert(handle, pid);
                Ok(PointerResponse { value: handle }.as_bytes().to_vec())
            }
            Command::ReadMemory {
                handle,
                address,
                size,
            } => {
                let memory = self.memory_of(handle)?;
                (0..size as u64)
                    .map(|i| memory.get(&(address + i)).copied())
                    .collect::<Option<Vec<u8>>>()
                    .ok_or(OsError(ERROR_PARTIAL_COPY))
            }
            Command::WriteMemory {
                handle,
                address,
                data,
            } => {
                let memory = self.memory_of_mut(handle)?;
                if (0..data.len() as u64).any(|i| !memory.contains_key(&(address + i))) {
                    return Err(OsError(ERROR_PARTIAL_COPY));
                }
                for (i, b) in data.iter().enumerate() {
                    memory.insert(address + i as u64, *b);
                }
                Ok(Vec::new())
            }
            Command::QueryVirtualMemory { pid, base } => {
                let memory = driver.processes.get(&(pid as u32)).ok_or(invalid)?;
                if !memory.contains_key(&base) {
                    return Err(OsError(ERROR_INVALID_ADDRESS));
                }
                Ok(QueryRegionResponse {
                    length: REGION_SIZE,
                    protection: PAGE_READWRITE,
                    reserved: 0,
                }
                .as_bytes()
                .to_vec())
            }
            Command::GetPeProcess { pid } => {
                if !driver.processes.contains_key(&pid) {
                    return Err(invalid);
                }
                Ok(PointerResponse {
                    value: 0xFFFF_A000_0000_0000 | pid as u64,
                }
                .as_bytes()
                .to_vec())
            }
        }
    }

    fn memory_of(&self, handle: u64) -> Result<&HashMap<u64, u8>, OsError> {
        let invalid = OsError(ERROR_INVALID_PARAMETER);
        let pid = self.process_handles.get(&handle).ok_or(invalid)?;
        self.driver
            .as_ref()
            .and_then(|d| d.processes.get(pid))
            .ok_or(invalid)
    }

    fn memory_of_mut(&mut self, handle: u64) -> Result<&mut HashMap<u64, u8>, OsError> {
        let invalid = OsError(ERROR_INVALID_PARAMETER);
        let pid = self.process_handles.get(&handle).ok_or(invalid)?;
        self.driver
            .as_mut()
            .and_then(|d| d.processes.get_mut(pid))
            .ok_or(invalid)
    }
}

#[derive(Clone)]
pub struct MockPlatform {
    pub state: Rc<RefCell<PlatformState>>,
}

impl MockPlatform {
    pub fn with_driver(driver: MockDriver) -> Self {
        Self::new(Some(driver))
    }

    pub fn without_driver() -> Self {
        Self::new(None)
    }

    fn new(driver: Option<MockDriver>) -> Self {
        Self {
            state: Rc::new(RefCell::new(PlatformState {
                driver,
                open_error: None,
                fail_event: None,
                requests: Vec::new(),
                devices_opened: 0,
                devices_live: 0,
                events_created: 0,
                live_events: Vec::new(),
                process_handles: HashMap::new(),
                closed_handles: Vec::new(),
                next_handle: 0x100,
            })),
        }
    }

    pub fn request_count(&self) -> usize {
        self.state.borrow().requests.len()
    }

    pub fn requests_for(&self, opcode: Opcode) -> usize {
        self.state
            .borrow()
            .requests
            .iter()
            .filter(|(code, _, _)| *code == opcode.code())
            .count()
    }

    pub fn driver<R>(&self, f: impl FnOnce(&mut MockDriver) -> R) -> R {
        let mut state = self.state.borrow_mut();
        f(state.driver.as_mut().expect("no simulated driver loaded"))
    }

    /// True once every device, event and process handle has been closed.
    pub fn all_released(&self) -> bool {
        let state = self.state.borrow();
        state.devices_live == 0 && state.live_events.is_empty() && state.process_handles.is_empty()
    }
}

pub struct MockDevice {
    state: Rc<RefCell<PlatformState>>,
}

impl DeviceIo for MockDevice {
    fn control(&mut self, code: u32, input: &[u8], output: &mut [u8]) -> Result<usize, OsError> {
        let mut state = self.state.borrow_mut();
        state.requests.push((code, input.to_vec(), output.len()));
        state.control(code, input, output)
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.state.borrow_mut().devices_live -= 1;
    }
}

pub struct MockEvent {
    raw: u64,
    state: Rc<RefCell<PlatformState>>,
}

impl KernelObject for MockEvent {
    fn raw(&self) -> u64 {
        self.raw
    }
}

impl Drop for MockEvent {
    fn drop(&mut self) {
        let mut state = self.state.borrow_mut();
        state.live_events.retain(|raw| *raw != self.raw);
        state.closed_handles.push(self.raw);
    }
}

impl Platform for MockPlatform {
    type Device = MockDevice;
    type Event = MockEvent;

    fn open_device(&self, path: &str) -> Result<MockDevice, OsError> {
        let mut state = self.state.borrow_mut();
        if let Some(os) = state.open_error {
            return Err(os);
        }
        if path != DEVICE_PATH || state.driver.is_none() {
            return Err(OsError(ERROR_FILE_NOT_FOUND));
        }
        state.devices_opened += 1;
        state.devices_live += 1;
        Ok(MockDevice {
            state: self.state.clone(),
        })
    }

    fn create_event(&self, _name: &str) -> Result<MockEvent, OsError> {
        let mut state = self.state.borrow_mut();
        let index = state.events_created;
        state.events_created += 1;
        if let Some((at, os)) = state.fail_event {
            if at == index {
                return Err(os);
            }
        }
        let raw = state.allocate_handle();
        state.live_events.push(raw);
        Ok(MockEvent {
            raw,
            state: self.state.clone(),
        })
    }

    fn close_handle(&self, raw: u64) -> Result<(), OsError> {
        let mut state = self.state.borrow_mut();
        match state.process_handles.remove(&raw) {
            Some(_) => {
                state.closed_handles.push(raw);
                Ok(())
            }
            None => Err(OsError(ERROR_INVALID_HANDLE)),
        }
    }
}
