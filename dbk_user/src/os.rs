//! The operating-system seam.
//!
//! Everything the client needs from the OS (opening the device, issuing a
//! blocking control request, creating the two notification events, closing
//! handles the driver hands back, and adjusting the process token) goes
//! through the traits in this module. The Win32 implementation lives in
//! `win32`; tests run against a simulated driver.

/// A raw Win32 error code as reported by `GetLastError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OsError(pub u32);

pub const ERROR_INVALID_FUNCTION: u32 = 1;
pub const ERROR_FILE_NOT_FOUND: u32 = 2;
pub const ERROR_PATH_NOT_FOUND: u32 = 3;
pub const ERROR_ACCESS_DENIED: u32 = 5;
pub const ERROR_INVALID_HANDLE: u32 = 6;
pub const ERROR_GEN_FAILURE: u32 = 31;
pub const ERROR_INVALID_PARAMETER: u32 = 87;
pub const ERROR_SEM_TIMEOUT: u32 = 121;
pub const ERROR_INSUFFICIENT_BUFFER: u32 = 122;
pub const ERROR_MORE_DATA: u32 = 234;
pub const WAIT_TIMEOUT: u32 = 258;
pub const ERROR_PARTIAL_COPY: u32 = 299;
pub const ERROR_INVALID_ADDRESS: u32 = 487;
pub const ERROR_OPERATION_ABORTED: u32 = 995;
pub const ERROR_IO_PENDING: u32 = 997;
pub const ERROR_NOACCESS: u32 = 998;
pub const ERROR_DEVICE_NOT_CONNECTED: u32 = 1167;
pub const ERROR_NOT_ALL_ASSIGNED: u32 = 1300;
pub const ERROR_NO_SUCH_PRIVILEGE: u32 = 1313;
pub const ERROR_PRIVILEGE_NOT_HELD: u32 = 1314;

impl OsError {
    pub fn code(self) -> u32 {
        self.0
    }

    /// Symbolic name for the codes this client reacts to.
    pub fn name(self) -> Option<&'static str> {
        let name = match self.0 {
            ERROR_INVALID_FUNCTION => "ERROR_INVALID_FUNCTION",
            ERROR_FILE_NOT_FOUND => "ERROR_FILE_NOT_FOUND",
            ERROR_PATH_NOT_FOUND => "ERROR_PATH_NOT_FOUND",
            ERROR_ACCESS_DENIED => "ERROR_ACCESS_DENIED",
            ERROR_INVALID_HANDLE => "ERROR_INVALID_HANDLE",
            ERROR_GEN_FAILURE => "ERROR_GEN_FAILURE",
            ERROR_INVALID_PARAMETER => "ERROR_INVALID_PARAMETER",
            ERROR_SEM_TIMEOUT => "ERROR_SEM_TIMEOUT",
            ERROR_INSUFFICIENT_BUFFER => "ERROR_INSUFFICIENT_BUFFER",
            ERROR_MORE_DATA => "ERROR_MORE_DATA",
            WAIT_TIMEOUT => "WAIT_TIMEOUT",
            ERROR_PARTIAL_COPY => "ERROR_PARTIAL_COPY",
            ERROR_INVALID_ADDRESS => "ERROR_INVALID_ADDRESS",
            ERROR_OPERATION_ABORTED => "ERROR_OPERATION_ABORTED",
            ERROR_IO_PENDING => "ERROR_IO_PENDING",
            ERROR_NOACCESS => "ERROR_NOACCESS",
            ERROR_DEVICE_NOT_CONNECTED => "ERROR_DEVICE_NOT_CONNECTED",
            ERROR_NOT_ALL_ASSIGNED => "ERROR_NOT_ALL_ASSIGNED",
            ERROR_NO_SUCH_PRIVILEGE => "ERROR_NO_SUCH_PRIVILEGE",
            ERROR_PRIVILEGE_NOT_HELD => "ERROR_PRIVILEGE_NOT_HELD",
            _ => return None,
        };
        Some(name)
    }
}

impl std::fmt::Display for OsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} ({})", self.0),
            None => write!(f, "os error {}", self.0),
        }
    }
}

/// An open handle to the driver device. Dropping it closes the handle.
pub trait DeviceIo {
    /// Issue one synchronous device-control request.
    ///
    /// `output.len()` is the output buffer size declared to the driver.
    /// Returns the number of bytes the driver wrote into `output`.
    fn control(&mut self, code: u32, input: &[u8], output: &mut [u8]) -> Result<usize, OsError>;
}

/// An owned kernel object handle (an event) whose value is handed to the
/// driver. Dropping it closes the handle.
pub trait KernelObject {
    fn raw(&self) -> u64;
}

/// Handle-level OS services used by the session.
pub trait Platform {
    type Device: DeviceIo;
    type Event: KernelObject;

    fn open_device(&self, path: &str) -> Result<Self::Device, OsError>;

    /// Create a named manual-reset event in the non-signalled state.
    fn create_event(&self, name: &str) -> Result<Self::Event, OsError>;

    /// Close a handle value the driver created in this process.
    fn close_handle(&self, raw: u64) -> Result<(), OsError>;
}

/// Locally unique identifier of a privilege on this machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Luid {
    pub low: u32,
    pub high: i32,
}

/// How much of a privilege adjustment the OS actually applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Complete,
    /// The call succeeded but the token does not hold the privilege
    /// (`ERROR_NOT_ALL_ASSIGNED`).
    NotAllAssigned,
}

/// Why an adjustment of the process token failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustError {
    /// The process token could not be opened for adjustment.
    OpenToken(OsError),
    /// `AdjustTokenPrivileges` itself failed.
    Adjust(OsError),
}

/// Token services used by the privilege escalator.
pub trait SecurityContext {
    fn lookup_privilege(&self, name: &str) -> Result<Luid, OsError>;

    /// Enable `luid` on the calling process's token.
    fn enable_privilege(&self, luid: Luid) -> Result<Adjustment, AdjustError>;
}
