//! Shared types and constants describing the DBK driver's device-control
//! contract. Everything in here is plain data: control codes, the fixed
//! `#[repr(C)]` frame layouts, and the per-opcode size table that both the
//! user-mode client and a test driver must agree on bit-for-bit.
#![cfg_attr(not(test), no_std)]

pub mod contract;
pub mod frames;

pub use contract::{Contract, Extent, CONTRACTS, PROTOCOL_REVISION};

/// Path the driver's symbolic link is reachable at from user mode.
pub const DEVICE_PATH: &str = "\\\\.\\DBK64";

/// Privilege the calling process must hold before the driver accepts it.
pub const DEBUG_PRIVILEGE: &str = "SeDebugPrivilege";

/// Default names of the manual-reset events handed to the driver on initialize.
pub const PROCESS_EVENT_NAME: &str = "DBKProcList60";
pub const THREAD_EVENT_NAME: &str = "DBKThreadList60";

pub const FILE_DEVICE_UNKNOWN: u32 = 0x0000_0022;
pub const METHOD_BUFFERED: u32 = 0;
pub const FILE_ANY_ACCESS: u32 = 0;

/// `CTL_CODE` from the DDK.
pub const fn ctl_code(device_type: u32, function: u32, method: u32, access: u32) -> u32 {
    (device_type << 16) | (access << 14) | (function << 2) | method
}

/// Buffered, any-access control code on the unknown device type, which is how
/// every DBK request is defined.
const fn ce_code(function: u32) -> u32 {
    ctl_code(FILE_DEVICE_UNKNOWN, function, METHOD_BUFFERED, FILE_ANY_ACCESS)
}

/// Driver operations understood by the client.
///
/// The discriminant is the function number inside the control code. A value
/// is never reassigned to a different operation.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Opcode {
    ReadMemory = 0x800,
    WriteMemory = 0x801,
    OpenProcess = 0x802,
    QueryVirtualMemory = 0x803,
    Test = 0x804,
    GetPeProcess = 0x805,
    Initialize = 0x80d,
    GetVersion = 0x816,
}

impl Opcode {
    pub const ALL: [Opcode; 8] = [
        Opcode::ReadMemory,
        Opcode::WriteMemory,
        Opcode::OpenProcess,
        Opcode::QueryVirtualMemory,
        Opcode::Test,
        Opcode::GetPeProcess,
        Opcode::Initialize,
        Opcode::GetVersion,
    ];

    /// Function number inside the control code.
    pub const fn function(self) -> u32 {
        self as u32
    }

    /// Full control code passed to `DeviceIoControl`.
    pub const fn code(self) -> u32 {
        ce_code(self.function())
    }

    pub fn from_code(code: u32) -> Option<Opcode> {
        Opcode::ALL.into_iter().find(|op| op.code() == code)
    }

    /// Name of the control code as the driver sources spell it.
    pub const fn name(self) -> &'static str {
        match self {
            Opcode::ReadMemory => "IOCTL_CE_READMEMORY",
            Opcode::WriteMemory => "IOCTL_CE_WRITEMEMORY",
            Opcode::OpenProcess => "IOCTL_CE_OPENPROCESS",
            Opcode::QueryVirtualMemory => "IOCTL_CE_QUERY_VIRTUAL_MEMORY",
            Opcode::Test => "IOCTL_CE_TEST",
            Opcode::GetPeProcess => "IOCTL_CE_GETPEPROCESS",
            Opcode::Initialize => "IOCTL_CE_INITIALIZE",
            Opcode::GetVersion => "IOCTL_CE_GETVERSION",
        }
    }
}

impl core::fmt::Display for Opcode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} (0x{:08X})", self.name(), self.code())
    }
}
