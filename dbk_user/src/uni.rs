//! NUL-terminated UTF-16 strings for the `W` family of Win32 calls.
#[cfg(windows)]
use windows::core::PCWSTR;

/// Owns the UTF-16 buffer a `PCWSTR` points into, so the pointer stays valid
/// for as long as this value lives.
pub struct WideString {
    buf: Vec<u16>,
}

impl WideString {
    pub fn new(s: &str) -> Self {
        let mut buf = Vec::with_capacity(s.encode_utf16().count() + 1);
        buf.extend(s.encode_utf16());
        buf.push(0);
        Self { buf }
    }

    /// Code units including the terminating NUL.
    pub fn units(&self) -> &[u16] {
        &self.buf
    }

    #[cfg(windows)]
    pub fn as_pcwstr(&self) -> PCWSTR {
        PCWSTR::from_raw(self.buf.as_ptr())
    }
}
