//! Fixed-layout request and response frames, one per operation.
//!
//! Every struct is `#[repr(C)]` with no implicit padding, so `as_bytes()` is
//! exactly what the driver reads out of its system buffer. Fields the driver
//! treats as reserved are spelled out and always zero when built through the
//! constructors here.
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Input of `IOCTL_CE_INITIALIZE`.
///
/// The driver's record is eleven quad-words. The first nine (win32k base and
/// size, four win32k service numbers, and the `ActiveProcessLinks`,
/// `ImageFileName` and `DebugPort` offsets) are only consumed by driver
/// builds that hook win32k, and must be zero otherwise. The two event
/// handles follow at offsets 72 and 80.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
pub struct InitializeRequest {
    pub reserved: [u64; 9],
    pub process_event: u64,
    pub thread_event: u64,
}

impl InitializeRequest {
    pub fn new(process_event: u64, thread_event: u64) -> Self {
        Self {
            reserved: [0; 9],
            process_event,
            thread_event,
        }
    }
}

/// Output of `IOCTL_CE_INITIALIZE`: the address of the shadow service table
/// the driver located, or zero.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
pub struct InitializeResponse {
    pub sdt_shadow: u64,
}

/// Output of `IOCTL_CE_GETVERSION`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
pub struct VersionResponse {
    pub version: u32,
}

/// Input and output of `IOCTL_CE_TEST`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
pub struct TestFrame {
    pub payload: [u8; 8],
}

/// Input of `IOCTL_CE_OPENPROCESS`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
pub struct OpenProcessRequest {
    pub process_id: u32,
    pub desired_access: u32,
}

/// Output of any request that returns a single pointer-sized value on the
/// 64-bit driver (process handles, `EPROCESS` addresses).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
pub struct PointerResponse {
    pub value: u64,
}

/// Header shared by `IOCTL_CE_READMEMORY` and `IOCTL_CE_WRITEMEMORY`.
///
/// A write request is this header immediately followed by `size` payload
/// bytes; a read request is the header alone and the driver returns `size`
/// bytes. The trailing `reserved` word is where a C compiler would pad the
/// struct to 24 bytes, so it is sent explicitly as zero.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
pub struct MemoryHeader {
    pub process_handle: u64,
    pub address: u64,
    pub size: u32,
    pub reserved: u32,
}

impl MemoryHeader {
    pub fn new(process_handle: u64, address: u64, size: u32) -> Self {
        Self {
            process_handle,
            address,
            size,
            reserved: 0,
        }
    }
}

/// Input of `IOCTL_CE_QUERY_VIRTUAL_MEMORY`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
pub struct QueryRegionRequest {
    pub process_id: u64,
    pub base: u64,
}

/// Output of `IOCTL_CE_QUERY_VIRTUAL_MEMORY`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
pub struct QueryRegionResponse {
    pub length: u64,
    pub protection: u32,
    pub reserved: u32,
}

/// Input of `IOCTL_CE_GETPEPROCESS`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
pub struct ProcessIdRequest {
    pub process_id: u32,
}

const _: () = assert!(core::mem::size_of::<InitializeRequest>() == 88);
const _: () = assert!(core::mem::size_of::<MemoryHeader>() == 24);
const _: () = assert!(core::mem::size_of::<QueryRegionResponse>() == 16);
