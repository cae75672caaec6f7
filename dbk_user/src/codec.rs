//! Typed commands to and from the fixed wire frames.
use std::mem::size_of;

use dbk_shared::frames::{
    InitializeRequest, InitializeResponse, MemoryHeader, OpenProcessRequest, PointerResponse,
    ProcessIdRequest, QueryRegionRequest, QueryRegionResponse, TestFrame, VersionResponse,
};
use dbk_shared::{Contract, Opcode};
use zerocopy::{AsBytes, FromBytes};

use crate::error::{Error, Result};

/// One driver request with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Initialize { process_event: u64, thread_event: u64 },
    GetVersion,
    Test([u8; 8]),
    OpenProcess { pid: u32, access: u32 },
    ReadMemory { handle: u64, address: u64, size: u32 },
    WriteMemory { handle: u64, address: u64, data: Vec<u8> },
    QueryVirtualMemory { pid: u64, base: u64 },
    GetPeProcess { pid: u32 },
}

impl Command {
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::Initialize { .. } => Opcode::Initialize,
            Command::GetVersion => Opcode::GetVersion,
            Command::Test(_) => Opcode::Test,
            Command::OpenProcess { .. } => Opcode::OpenProcess,
            Command::ReadMemory { .. } => Opcode::ReadMemory,
            Command::WriteMemory { .. } => Opcode::WriteMemory,
            Command::QueryVirtualMemory { .. } => Opcode::QueryVirtualMemory,
            Command::GetPeProcess { .. } => Opcode::GetPeProcess,
        }
    }
}

/// Request bytes plus the exact output size to declare for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub opcode: Opcode,
    pub bytes: Vec<u8>,
    pub response_len: usize,
}

/// Driver version word as returned by `IOCTL_CE_GETVERSION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    pub raw: u32,
}

impl std::fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:08X}", self.raw)
    }
}

/// Size and protection of the region containing a queried address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionInfo {
    pub length: u64,
    pub protection: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    Initialized { sdt_shadow: u64 },
    Version(VersionInfo),
    Test([u8; 8]),
    ProcessOpened { handle: u64 },
    Memory(Vec<u8>),
    Written,
    Region(RegionInfo),
    PeProcess(u64),
}

pub fn encode(command: &Command) -> Result<RequestFrame> {
    let opcode = command.opcode();
    let (bytes, response_len) = match command {
        Command::Initialize {
            process_event,
            thread_event,
        } => (
            InitializeRequest::new(*process_event, *thread_event)
                .as_bytes()
                .to_vec(),
            size_of::<InitializeResponse>(),
        ),
        Command::GetVersion => (Vec::new(), size_of::<VersionResponse>()),
        Command::Test(payload) => (
            TestFrame { payload: *payload }.as_bytes().to_vec(),
            size_of::<TestFrame>(),
        ),
        Command::OpenProcess { pid, access } => (
            OpenProcessRequest {
                process_id: *pid,
                desired_access: *access,
            }
            .as_bytes()
            .to_vec(),
            size_of::<PointerResponse>(),
        ),
        Command::ReadMemory {
            handle,
            address,
            size,
        } => (
            MemoryHeader::new(*handle, *address, *size)
                .as_bytes()
                .to_vec(),
            *size as usize,
        ),
        Command::WriteMemory {
            handle,
            address,
            data,
        } => {
            let size = u32::try_from(data.len()).map_err(|_| Error::SizeExceeded {
                requested: data.len(),
                limit: u32::MAX as usize,
            })?;
            let mut bytes = Vec::with_capacity(size_of::<MemoryHeader>() + data.len());
            bytes.extend_from_slice(MemoryHeader::new(*handle, *address, size).as_bytes());
            bytes.extend_from_slice(data);
            (bytes, 0)
        }
        Command::QueryVirtualMemory { pid, base } => (
            QueryRegionRequest {
                process_id: *pid,
                base: *base,
            }
            .as_bytes()
            .to_vec(),
            size_of::<QueryRegionResponse>(),
        ),
        Command::GetPeProcess { pid } => (
            ProcessIdRequest { process_id: *pid }.as_bytes().to_vec(),
            size_of::<PointerResponse>(),
        ),
    };

    Ok(RequestFrame {
        opcode,
        bytes,
        response_len,
    })
}

/// Interpret the bytes the driver returned for `opcode`.
///
/// `declared_len` is the output size that was declared for the request; the
/// driver must have filled all of it.
pub fn decode(opcode: Opcode, declared_len: usize, response: &[u8]) -> Result<CommandResult> {
    let malformed = Error::MalformedResponse {
        opcode,
        expected: declared_len,
        actual: response.len(),
    };
    if response.len() != declared_len {
        return Err(malformed);
    }

    let result = match opcode {
        Opcode::Initialize => {
            let resp = InitializeResponse::read_from(response).ok_or(malformed)?;
            CommandResult::Initialized {
                sdt_shadow: resp.sdt_shadow,
            }
        }
        Opcode::GetVersion => {
            let resp = VersionResponse::read_from(response).ok_or(malformed)?;
            CommandResult::Version(VersionInfo { raw: resp.version })
        }
        Opcode::Test => {
            let resp = TestFrame::read_from(response).ok_or(malformed)?;
            CommandResult::Test(resp.payload)
        }
        Opcode::OpenProcess => {
            let resp = PointerResponse::read_from(response).ok_or(malformed)?;
            CommandResult::ProcessOpened { handle: resp.value }
        }
        Opcode::ReadMemory => CommandResult::Memory(response.to_vec()),
        Opcode::WriteMemory => CommandResult::Written,
        Opcode::QueryVirtualMemory => {
            let resp = QueryRegionResponse::read_from(response).ok_or(malformed)?;
            CommandResult::Region(RegionInfo {
                length: resp.length,
                protection: resp.protection,
            })
        }
        Opcode::GetPeProcess => {
            let resp = PointerResponse::read_from(response).ok_or(malformed)?;
            CommandResult::PeProcess(resp.value)
        }
    };
    Ok(result)
}

/// Parse a request frame the way the driver does.
///
/// Fails with `ContractViolation` when the sizes do not match the opcode,
/// when a reserved field is not zero, or when a memory header's size field
/// disagrees with the bytes around it.
pub fn decode_request(frame: &RequestFrame) -> Result<Command> {
    let opcode = frame.opcode;
    let input = frame.bytes.as_slice();
    let violation = Error::ContractViolation {
        opcode,
        input: input.len(),
        output: frame.response_len,
    };
    if !Contract::of(opcode).admits(input.len(), frame.response_len) {
        return Err(violation);
    }

    let command = match opcode {
        Opcode::Initialize => {
            let req = InitializeRequest::read_from(input).ok_or(violation.clone())?;
            if req.reserved.iter().any(|w| *w != 0) {
                return Err(violation);
            }
            Command::Initialize {
                process_event: req.process_event,
                thread_event: req.thread_event,
            }
        }
        Opcode::GetVersion => Command::GetVersion,
        Opcode::Test => {
            let req = TestFrame::read_from(input).ok_or(violation)?;
            Command::Test(req.payload)
        }
        Opcode::OpenProcess => {
            let req = OpenProcessRequest::read_from(input).ok_or(violation)?;
            Command::OpenProcess {
                pid: req.process_id,
                access: req.desired_access,
            }
        }
        Opcode::ReadMemory => {
            let hdr = MemoryHeader::read_from(input).ok_or(violation.clone())?;
            if hdr.reserved != 0 || hdr.size as usize != frame.response_len {
                return Err(violation);
            }
            Command::ReadMemory {
                handle: hdr.process_handle,
                address: hdr.address,
                size: hdr.size,
            }
        }
        Opcode::WriteMemory => {
            let (head, payload) = input.split_at(size_of::<MemoryHeader>());
            let hdr = MemoryHeader::read_from(head).ok_or(violation.clone())?;
            if hdr.reserved != 0 || hdr.size as usize != payload.len() {
                return Err(violation);
            }
            Command::WriteMemory {
                handle: hdr.process_handle,
                address: hdr.address,
                data: payload.to_vec(),
            }
        }
        Opcode::QueryVirtualMemory => {
            let req = QueryRegionRequest::read_from(input).ok_or(violation)?;
            Command::QueryVirtualMemory {
                pid: req.process_id,
                base: req.base,
            }
        }
        Opcode::GetPeProcess => {
            let req = ProcessIdRequest::read_from(input).ok_or(violation)?;
            Command::GetPeProcess {
                pid: req.process_id,
            }
        }
    };
    Ok(command)
}
