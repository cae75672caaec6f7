//! Per-opcode buffer size contract.
//!
//! The driver validates `InputBufferLength`/`OutputBufferLength` against its
//! own structs and fails the request on any mismatch, so the client declares
//! exactly these sizes and never a "big enough" buffer.
use core::mem::size_of;

use crate::frames::{
    InitializeRequest, InitializeResponse, MemoryHeader, OpenProcessRequest, PointerResponse,
    ProcessIdRequest, QueryRegionRequest, QueryRegionResponse, TestFrame, VersionResponse,
};
use crate::Opcode;
use zerocopy::FromBytes;

/// Bumped whenever an entry of [`CONTRACTS`] changes meaning.
pub const PROTOCOL_REVISION: u32 = 1;

/// Size rule for one side of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extent {
    /// Exactly this many bytes.
    Fixed(usize),
    /// A fixed header of this many bytes followed by a variable payload.
    HeaderPlusPayload(usize),
    /// Chosen by the caller per request (the size field of the request header).
    Declared,
}

impl Extent {
    pub fn admits(self, len: usize) -> bool {
        match self {
            Extent::Fixed(n) => len == n,
            Extent::HeaderPlusPayload(header) => len >= header,
            Extent::Declared => true,
        }
    }
}

impl core::fmt::Display for Extent {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Extent::Fixed(n) => write!(f, "{n}"),
            Extent::HeaderPlusPayload(n) => write!(f, "{n}+payload"),
            Extent::Declared => write!(f, "declared"),
        }
    }
}

/// Wire contract for one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contract {
    pub opcode: Opcode,
    pub input: Extent,
    pub output: Extent,
}

impl Contract {
    /// Look up the contract for `opcode`. Every opcode has exactly one entry.
    pub fn of(opcode: Opcode) -> &'static Contract {
        CONTRACTS
            .iter()
            .find(|c| c.opcode == opcode)
            .unwrap_or_else(|| unreachable!("{} missing from contract table", opcode.name()))
    }

    pub fn admits(&self, input_len: usize, output_len: usize) -> bool {
        self.input.admits(input_len) && self.output.admits(output_len)
    }

    /// Like [`Contract::admits`], but also checks what a memory header says
    /// about the sizes around it: a read must declare an output buffer of
    /// exactly `size` bytes, a write must carry exactly `size` payload bytes,
    /// and the header's reserved word must be zero.
    pub fn admits_frame(&self, request: &[u8], output_len: usize) -> bool {
        if !self.admits(request.len(), output_len) {
            return false;
        }
        let header_len = size_of::<MemoryHeader>();
        let payload_len = match self.opcode {
            Opcode::ReadMemory => output_len,
            Opcode::WriteMemory => request.len() - header_len,
            _ => return true,
        };
        match MemoryHeader::read_from_prefix(request) {
            Some(hdr) => hdr.reserved == 0 && hdr.size as usize == payload_len,
            None => false,
        }
    }
}

pub const CONTRACTS: [Contract; 8] = [
    Contract {
        opcode: Opcode::ReadMemory,
        input: Extent::Fixed(size_of::<MemoryHeader>()),
        output: Extent::Declared,
    },
    Contract {
        opcode: Opcode::WriteMemory,
        input: Extent::HeaderPlusPayload(size_of::<MemoryHeader>()),
        output: Extent::Fixed(0),
    },
    Contract {
        opcode: Opcode::OpenProcess,
        input: Extent::Fixed(size_of::<OpenProcessRequest>()),
        output: Extent::Fixed(size_of::<PointerResponse>()),
    },
    Contract {
        opcode: Opcode::QueryVirtualMemory,
        input: Extent::Fixed(size_of::<QueryRegionRequest>()),
        output: Extent::Fixed(size_of::<QueryRegionResponse>()),
    },
    Contract {
        opcode: Opcode::Test,
        input: Extent::Fixed(size_of::<TestFrame>()),
        output: Extent::Fixed(size_of::<TestFrame>()),
    },
    Contract {
        opcode: Opcode::GetPeProcess,
        input: Extent::Fixed(size_of::<ProcessIdRequest>()),
        output: Extent::Fixed(size_of::<PointerResponse>()),
    },
    Contract {
        opcode: Opcode::Initialize,
        input: Extent::Fixed(size_of::<InitializeRequest>()),
        output: Extent::Fixed(size_of::<InitializeResponse>()),
    },
    Contract {
        opcode: Opcode::GetVersion,
        input: Extent::Fixed(0),
        output: Extent::Fixed(size_of::<VersionResponse>()),
    },
];
