// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! PE header reader
//!
//! Wine decides where a Windows executable must live before the preloader
//! runs: the executable's preferred range becomes `WINEPRELOADRESERVE`. This
//! module parses:
//! - the DOS header and the `PE\0\0` signature
//! - the COFF file header
//! - PE32 and PE32+ optional headers
//! - section headers

use crate::reserve::ReserveRange;
use crate::{PreloaderError, Result};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// DOS header magic number "MZ"
pub const DOS_SIGNATURE: u16 = 0x5A4D;

/// PE signature "PE\0\0"
pub const PE_SIGNATURE: u32 = 0x0000_4550;

pub const OPTIONAL_HDR32_MAGIC: u16 = 0x10b;
pub const OPTIONAL_HDR64_MAGIC: u16 = 0x20b;

pub const MACHINE_I386: u16 = 0x014c;
pub const MACHINE_ARMNT: u16 = 0x01c4;
pub const MACHINE_AMD64: u16 = 0x8664;
pub const MACHINE_ARM64: u16 = 0xaa64;

pub const FILE_DLL: u16 = 0x2000;

/// Markers Wine writes right after the DOS header of its own DLLs
const BUILTIN_SIGNATURE: &[u8] = b"Wine builtin DLL";
const FAKEDLL_SIGNATURE: &[u8] = b"Wine placeholder DLL";

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct DosHeader {
    pub e_magic: u16,
    pub e_unused: [u16; 29],
    pub e_lfanew: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct FileHeader {
    pub machine: u16,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    pub pointer_to_symbol_table: u32,
    pub number_of_symbols: u32,
    pub size_of_optional_header: u16,
    pub characteristics: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct OptionalHeader32 {
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
    pub base_of_data: u32,
    pub image_base: u32,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub check_sum: u32,
    pub subsystem: u16,
    pub dll_characteristics: u16,
    pub size_of_stack_reserve: u32,
    pub size_of_stack_commit: u32,
    pub size_of_heap_reserve: u32,
    pub size_of_heap_commit: u32,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct OptionalHeader64 {
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
    pub image_base: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub check_sum: u32,
    pub subsystem: u16,
    pub dll_characteristics: u16,
    pub size_of_stack_reserve: u64,
    pub size_of_stack_commit: u64,
    pub size_of_heap_reserve: u64,
    pub size_of_heap_commit: u64,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct SectionHeader {
    pub name: [u8; 8],
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
    pub pointer_to_relocations: u32,
    pub pointer_to_linenumbers: u32,
    pub number_of_relocations: u16,
    pub number_of_linenumbers: u16,
    pub characteristics: u32,
}

/// Information about a PE section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeSection {
    /// Section name (null-terminated in the file)
    pub name: String,
    pub virtual_address: u32,
    pub virtual_size: u32,
    pub characteristics: u32,
}

/// The parts of a PE image the preloader cares about
#[derive(Debug, Clone)]
pub struct PeImage {
    pub machine: u16,
    pub characteristics: u16,
    pub entry_point: u32,
    pub image_base: u64,
    pub size_of_image: u32,
    pub subsystem: u16,
    /// Carries the `Wine builtin DLL` marker
    pub wine_builtin: bool,
    /// Carries the `Wine placeholder DLL` marker
    pub wine_fakedll: bool,
    pub sections: Vec<PeSection>,
}

fn read_at<T: FromBytes>(data: &[u8], offset: usize, what: &str) -> Result<T> {
    data.get(offset..)
        .and_then(|bytes| T::read_from_prefix(bytes).ok())
        .map(|(value, _)| value)
        .ok_or_else(|| PreloaderError::InvalidImage(format!("{what} out of bounds")))
}

impl PeImage {
    /// Parse the headers of a PE file
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < size_of::<DosHeader>() {
            return Err(PreloaderError::InvalidImage(
                "File too small to contain DOS header".to_string(),
            ));
        }

        let dos_header: DosHeader = read_at(data, 0, "DOS header")?;
        if dos_header.e_magic != DOS_SIGNATURE {
            return Err(PreloaderError::InvalidImage(format!(
                "Invalid DOS signature: expected 0x{DOS_SIGNATURE:04X}, found 0x{:04X}",
                dos_header.e_magic
            )));
        }

        let stub = &data[size_of::<DosHeader>()..];
        let wine_builtin = stub.starts_with(BUILTIN_SIGNATURE);
        let wine_fakedll = stub.starts_with(FAKEDLL_SIGNATURE);

        let pe_offset = dos_header.e_lfanew as usize;
        let pe_signature: u32 = read_at(data, pe_offset, "PE signature")?;
        if pe_signature != PE_SIGNATURE {
            return Err(PreloaderError::InvalidImage(format!(
                "Invalid PE signature: expected 0x{PE_SIGNATURE:08X}, found 0x{pe_signature:08X}"
            )));
        }

        let file_header_offset = pe_offset + 4;
        let file_header: FileHeader = read_at(data, file_header_offset, "File header")?;

        let optional_header_offset = file_header_offset + size_of::<FileHeader>();
        let magic: u16 = read_at(data, optional_header_offset, "Optional header")?;
        let (entry_point, image_base, size_of_image, subsystem) = match magic {
            OPTIONAL_HDR64_MAGIC => {
                let opt: OptionalHeader64 =
                    read_at(data, optional_header_offset, "Optional header")?;
                (
                    opt.address_of_entry_point,
                    opt.image_base,
                    opt.size_of_image,
                    opt.subsystem,
                )
            }
            OPTIONAL_HDR32_MAGIC => {
                let opt: OptionalHeader32 =
                    read_at(data, optional_header_offset, "Optional header")?;
                (
                    opt.address_of_entry_point,
                    u64::from(opt.image_base),
                    opt.size_of_image,
                    opt.subsystem,
                )
            }
            other => {
                return Err(PreloaderError::UnsupportedImage(format!(
                    "optional header magic 0x{other:04X}"
                )));
            }
        };

        // Section headers start after the optional header
        let section_headers_offset =
            optional_header_offset + file_header.size_of_optional_header as usize;
        let mut sections = Vec::with_capacity(usize::from(file_header.number_of_sections));
        for i in 0..usize::from(file_header.number_of_sections) {
            let header: SectionHeader = read_at(
                data,
                section_headers_offset + i * size_of::<SectionHeader>(),
                "Section header",
            )?;
            let name_len = header
                .name
                .iter()
                .position(|&c| c == 0)
                .unwrap_or(header.name.len());
            sections.push(PeSection {
                name: String::from_utf8_lossy(&header.name[..name_len]).into_owned(),
                virtual_address: header.virtual_address,
                virtual_size: header.virtual_size,
                characteristics: header.characteristics,
            });
        }

        Ok(Self {
            machine: file_header.machine,
            characteristics: file_header.characteristics,
            entry_point,
            image_base,
            size_of_image,
            subsystem,
            wine_builtin,
            wine_fakedll,
            sections,
        })
    }

    pub fn is_dll(&self) -> bool {
        self.characteristics & FILE_DLL != 0
    }

    /// Human-readable machine name
    pub fn machine_name(&self) -> &'static str {
        match self.machine {
            MACHINE_I386 => "i386",
            MACHINE_AMD64 => "x86_64",
            MACHINE_ARMNT => "arm",
            MACHINE_ARM64 => "arm64",
            _ => "unknown",
        }
    }

    /// Range the executable wants reserved before the loader starts,
    /// rounded out to `page_size`
    ///
    /// Placeholder DLLs are never mapped at their base and need no
    /// reservation.
    pub fn reserve_range(&self, page_size: u64) -> Result<ReserveRange> {
        if self.wine_fakedll {
            return Ok(ReserveRange::empty());
        }
        self.image_base
            .checked_add(u64::from(self.size_of_image))
            .and_then(|end| ReserveRange::aligned(self.image_base, end, page_size))
            .ok_or_else(|| {
                PreloaderError::InvalidImage(format!(
                    "image at {:#x} with size {:#x} overflows the address space",
                    self.image_base, self.size_of_image
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_too_small() {
        let data = vec![0; 10];
        assert!(PeImage::parse(&data).is_err());
    }

    #[test]
    fn test_invalid_dos_signature() {
        let data = vec![0; 64];
        let result = PeImage::parse(&data);
        assert!(matches!(result, Err(PreloaderError::InvalidImage(_))));
    }

    fn image(image_base: u64, size_of_image: u32) -> PeImage {
        PeImage {
            machine: MACHINE_AMD64,
            characteristics: 0x0022,
            entry_point: 0x1000,
            image_base,
            size_of_image,
            subsystem: 3,
            wine_builtin: false,
            wine_fakedll: false,
            sections: Vec::new(),
        }
    }

    #[test]
    fn test_reserve_range_overflow() {
        let result = image(u64::MAX - 0x100, 0x1000).reserve_range(0x1000);
        assert!(matches!(result, Err(PreloaderError::InvalidImage(_))));

        // the end fits but rounding it up does not
        let result = image(u64::MAX - 0x1800, 0x1000).reserve_range(0x1000);
        assert!(matches!(result, Err(PreloaderError::InvalidImage(_))));
    }

    #[test]
    fn test_reserve_range_rounds_size_of_image() {
        let range = image(0x1_4000_0000, 0x3_2200).reserve_range(0x1000).unwrap();
        assert_eq!(range, ReserveRange::new(0x1_4000_0000, 0x1_4003_3000));
    }

    #[test]
    fn test_pe_offset_out_of_bounds() {
        let mut data = vec![0u8; 64];
        data[..2].copy_from_slice(&DOS_SIGNATURE.to_le_bytes());
        data[60..64].copy_from_slice(&0x1000u32.to_le_bytes());
        assert!(PeImage::parse(&data).is_err());
    }
}
