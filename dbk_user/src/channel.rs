//! Exclusive ownership of the open device handle.
use dbk_shared::{Contract, Opcode};
use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::os::{
    DeviceIo, OsError, Platform, ERROR_ACCESS_DENIED, ERROR_DEVICE_NOT_CONNECTED,
    ERROR_FILE_NOT_FOUND, ERROR_GEN_FAILURE, ERROR_INSUFFICIENT_BUFFER, ERROR_INVALID_HANDLE,
    ERROR_IO_PENDING, ERROR_MORE_DATA, ERROR_OPERATION_ABORTED, ERROR_PATH_NOT_FOUND,
    ERROR_SEM_TIMEOUT, WAIT_TIMEOUT,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Open,
    /// A low-level I/O failure happened; the handle is gone and nothing may be
    /// sent until the channel is reopened.
    Faulted,
}

/// The open device plus the lifecycle rules around it.
pub struct DeviceChannel<D> {
    path: String,
    device: Option<D>,
    state: ChannelState,
}

impl<D: DeviceIo> DeviceChannel<D> {
    pub fn open<P>(platform: &P, path: &str) -> Result<Self>
    where
        P: Platform<Device = D>,
    {
        let device = open_device(platform, path)?;
        info!("Opened {path}");
        Ok(Self {
            path: path.to_string(),
            device: Some(device),
            state: ChannelState::Open,
        })
    }

    /// Open the same path again after a fault or close.
    pub fn reopen<P>(&mut self, platform: &P) -> Result<()>
    where
        P: Platform<Device = D>,
    {
        self.close();
        let device = open_device(platform, &self.path)?;
        info!("Reopened {}", self.path);
        self.device = Some(device);
        self.state = ChannelState::Open;
        Ok(())
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Send one request and return exactly the bytes the driver wrote.
    ///
    /// `expected_response_len` is the output buffer size declared to the
    /// driver. Both sizes, and for memory requests the header's size field,
    /// are checked against the opcode's contract before anything leaves the
    /// process.
    pub fn send(
        &mut self,
        opcode: Opcode,
        request: &[u8],
        expected_response_len: usize,
    ) -> Result<Vec<u8>> {
        let device = match (self.state, self.device.as_mut()) {
            (ChannelState::Open, Some(device)) => device,
            (ChannelState::Faulted, _) => return Err(Error::ChannelFaulted),
            _ => return Err(Error::ChannelClosed),
        };

        if !Contract::of(opcode).admits_frame(request, expected_response_len) {
            return Err(Error::ContractViolation {
                opcode,
                input: request.len(),
                output: expected_response_len,
            });
        }

        debug!(
            "{opcode}: sending {} bytes, expecting {expected_response_len}",
            request.len()
        );
        let mut response = vec![0u8; expected_response_len];
        match device.control(opcode.code(), request, &mut response) {
            Ok(returned) => {
                debug!("{opcode}: driver returned {returned} bytes");
                response.truncate(returned);
                Ok(response)
            }
            Err(os) => {
                let err = classify_control_error(opcode, os);
                if matches!(err, Error::DeviceFault { .. }) {
                    warn!("{opcode}: {err}, faulting channel to {}", self.path);
                    self.fault();
                } else {
                    debug!("{opcode}: {err}");
                }
                Err(err)
            }
        }
    }

    /// Drop the handle and refuse further sends until reopened.
    pub(crate) fn fault(&mut self) {
        self.device = None;
        self.state = ChannelState::Faulted;
    }

    /// Close the handle. Safe to call any number of times.
    pub fn close(&mut self) {
        if self.device.take().is_some() {
            info!("Closed {}", self.path);
        }
        if self.state == ChannelState::Open {
            self.state = ChannelState::Closed;
        }
    }
}

fn open_device<P: Platform>(platform: &P, path: &str) -> Result<P::Device> {
    platform.open_device(path).map_err(|os| match os.code() {
        ERROR_FILE_NOT_FOUND | ERROR_PATH_NOT_FOUND => Error::NotFound {
            path: path.to_string(),
            os,
        },
        ERROR_ACCESS_DENIED => Error::AccessDenied { os },
        _ => Error::DeviceFault { os },
    })
}

/// Sort a failed `DeviceIoControl` into the error taxonomy.
fn classify_control_error(opcode: Opcode, os: OsError) -> Error {
    match os.code() {
        ERROR_INVALID_HANDLE
        | ERROR_GEN_FAILURE
        | ERROR_SEM_TIMEOUT
        | WAIT_TIMEOUT
        | ERROR_OPERATION_ABORTED
        | ERROR_IO_PENDING
        | ERROR_DEVICE_NOT_CONNECTED => Error::DeviceFault { os },
        ERROR_INSUFFICIENT_BUFFER | ERROR_MORE_DATA => Error::Truncated { opcode, os },
        _ => Error::Rejected { opcode, os },
    }
}
