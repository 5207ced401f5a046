// src/pe.rs

//! Binary architecture inspection for Windows executables.
//!
//! Only the two fields needed for the compatibility gate are read: the stub
//! pointer (`e_lfanew`) in the legacy header and the machine type right
//! after the `PE\0\0` signature. Any malformed input classifies as
//! [`BinaryArch::Unrecognized`].

use std::io::{self, Read};
use std::path::Path;

use tracing::{debug, warn};

use crate::errors::{Result, WinepilotError};
use crate::fs::FileSystem;
use crate::runtime::RuntimeDescriptor;
use crate::types::{describe_arches, BinaryArch};

const LEGACY_HEADER_LEN: usize = 64;
const STUB_POINTER_OFFSET: usize = 0x3c;

/// Headers further into the file than this are treated as garbage.
const MAX_HEADER_OFFSET: u64 = 16 * 1024 * 1024;

pub const MACHINE_I386: u16 = 0x014c;
pub const MACHINE_ARM: u16 = 0x01c0;
pub const MACHINE_ARMNT: u16 = 0x01c4;
pub const MACHINE_AMD64: u16 = 0x8664;
pub const MACHINE_ARM64: u16 = 0xaa64;

/// Map a machine-type code to an architecture.
pub fn classify_machine(machine: u16) -> BinaryArch {
    match machine {
        MACHINE_I386 | MACHINE_ARM | MACHINE_ARMNT => BinaryArch::X86,
        MACHINE_AMD64 | MACHINE_ARM64 => BinaryArch::X64,
        _ => BinaryArch::Unrecognized,
    }
}

/// Classify an executable read from `reader`.
pub fn classify_reader<R: Read>(mut reader: R) -> BinaryArch {
    match read_machine(&mut reader) {
        Ok(Some(machine)) => classify_machine(machine),
        Ok(None) => BinaryArch::Unrecognized,
        Err(e) => {
            debug!(error = %e, "short read while inspecting executable header");
            BinaryArch::Unrecognized
        }
    }
}

/// Classify the executable at `path`. Unreadable files are `Unrecognized`.
pub fn inspect(fs: &dyn FileSystem, path: &Path) -> BinaryArch {
    match fs.open_read(path) {
        Ok(reader) => classify_reader(reader),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "cannot open executable for inspection");
            BinaryArch::Unrecognized
        }
    }
}

fn read_machine<R: Read>(reader: &mut R) -> io::Result<Option<u16>> {
    let mut legacy = [0u8; LEGACY_HEADER_LEN];
    reader.read_exact(&mut legacy)?;
    if &legacy[..2] != b"MZ" {
        return Ok(None);
    }

    let ptr = &legacy[STUB_POINTER_OFFSET..STUB_POINTER_OFFSET + 4];
    let offset = u64::from(u32::from_le_bytes([ptr[0], ptr[1], ptr[2], ptr[3]]));
    if offset < LEGACY_HEADER_LEN as u64 || offset > MAX_HEADER_OFFSET {
        return Ok(None);
    }

    let skip = offset - LEGACY_HEADER_LEN as u64;
    let skipped = io::copy(&mut reader.by_ref().take(skip), &mut io::sink())?;
    if skipped != skip {
        return Ok(None);
    }

    let mut header = [0u8; 6];
    reader.read_exact(&mut header)?;
    if &header[..4] != b"PE\0\0" {
        return Ok(None);
    }

    Ok(Some(u16::from_le_bytes([header[4], header[5]])))
}

/// Compatibility gate between a target executable and the runtime.
///
/// Fails fast when the target needs an architecture the runtime lacks;
/// `Unrecognized` targets pass with a warning.
pub fn check_compatibility(
    fs: &dyn FileSystem,
    target: &Path,
    runtime: &RuntimeDescriptor,
) -> Result<BinaryArch> {
    let binary = inspect(fs, target);
    match binary.arch() {
        Some(arch) if !runtime.supports(arch) => Err(WinepilotError::ArchitectureMismatch {
            target: target.to_path_buf(),
            binary: arch,
            supported: describe_arches(runtime.architectures()),
        }),
        Some(_) => Ok(binary),
        None => {
            warn!(
                target = %target.display(),
                "could not determine executable architecture; continuing without the check"
            );
            Ok(binary)
        }
    }
}
