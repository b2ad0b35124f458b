// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Mach-O header and load command reader
//!
//! Only the pieces the preloader needs are decoded:
//! - segment commands, to find the address range an image occupies
//! - `LC_MAIN` / `LC_UNIXTHREAD`, to find where execution starts
//!
//! Images are read in host byte order, which is little-endian on every
//! macOS host Wine supports.

use super::{EntryPoint, ImageRange};
use crate::{PreloaderError, Result};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub const MH_MAGIC: u32 = 0xfeed_face;
pub const MH_MAGIC_64: u32 = 0xfeed_facf;
pub const MH_CIGAM: u32 = 0xcefa_edfe;
pub const MH_CIGAM_64: u32 = 0xcffa_edfe;

pub const MH_EXECUTE: u32 = 0x2;
pub const MH_DYLIB: u32 = 0x6;

pub const CPU_TYPE_X86: i32 = 7;
pub const CPU_TYPE_X86_64: i32 = 0x0100_0007;
pub const CPU_TYPE_ARM64: i32 = 0x0100_000c;

pub const LC_SEGMENT: u32 = 0x1;
pub const LC_UNIXTHREAD: u32 = 0x5;
pub const LC_SEGMENT_64: u32 = 0x19;
pub const LC_MAIN: u32 = 0x8000_0028;

pub const X86_THREAD_STATE32: u32 = 1;
pub const X86_THREAD_STATE64: u32 = 4;
pub const ARM_THREAD_STATE64: u32 = 6;

/// Byte offset of the program counter inside each supported thread state
const X86_THREAD_STATE32_EIP: usize = 10 * 4;
const X86_THREAD_STATE64_RIP: usize = 16 * 8;
const ARM_THREAD_STATE64_PC: usize = 32 * 8;

const PAGEZERO: &str = "__PAGEZERO";
const TEXT: &str = "__TEXT";

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct MachHeader32 {
    pub magic: u32,
    pub cputype: i32,
    pub cpusubtype: i32,
    pub filetype: u32,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct MachHeader64 {
    pub magic: u32,
    pub cputype: i32,
    pub cpusubtype: i32,
    pub filetype: u32,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: u32,
    pub reserved: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct LoadCommand {
    pub cmd: u32,
    pub cmdsize: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct SegmentCommand32 {
    pub cmd: u32,
    pub cmdsize: u32,
    pub segname: [u8; 16],
    pub vmaddr: u32,
    pub vmsize: u32,
    pub fileoff: u32,
    pub filesize: u32,
    pub maxprot: i32,
    pub initprot: i32,
    pub nsects: u32,
    pub flags: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct SegmentCommand64 {
    pub cmd: u32,
    pub cmdsize: u32,
    pub segname: [u8; 16],
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
    pub maxprot: i32,
    pub initprot: i32,
    pub nsects: u32,
    pub flags: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct EntryPointCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub entryoff: u64,
    pub stacksize: u64,
}

/// Fixed part of `LC_UNIXTHREAD`; the register state follows
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct ThreadCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub flavor: u32,
    pub count: u32,
}

/// A decoded segment command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
    pub initprot: i32,
}

impl Segment {
    pub fn range(&self) -> ImageRange {
        ImageRange::new(self.vmaddr, self.vmaddr.saturating_add(self.vmsize))
    }
}

fn read_at<T: FromBytes>(data: &[u8], offset: usize, what: &str) -> Result<T> {
    data.get(offset..)
        .and_then(|bytes| T::read_from_prefix(bytes).ok())
        .map(|(value, _)| value)
        .ok_or_else(|| {
            PreloaderError::InvalidImage(format!("{what} out of bounds at offset {offset:#x}"))
        })
}

fn segment_name(raw: &[u8; 16]) -> String {
    let len = raw.iter().position(|&c| c == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..len]).into_owned()
}

/// A parsed Mach-O header with its load commands
#[derive(Debug, Clone)]
pub struct MachImage<'a> {
    data: &'a [u8],
    is_64: bool,
    cputype: i32,
    filetype: u32,
    /// (offset, cmd) of every load command
    commands: Vec<(usize, u32)>,
}

impl<'a> MachImage<'a> {
    /// Number of bytes covering the header and all load commands
    ///
    /// Only the fixed header has to be present in `prefix`. Used to size the
    /// view of an image that is already mapped in memory.
    pub fn headers_len(prefix: &[u8]) -> Result<usize> {
        let magic: u32 = read_at(prefix, 0, "Mach-O magic")?;
        let (header_size, sizeofcmds) = match magic {
            MH_MAGIC => {
                let header: MachHeader32 = read_at(prefix, 0, "Mach-O header")?;
                (size_of::<MachHeader32>(), header.sizeofcmds)
            }
            MH_MAGIC_64 => {
                let header: MachHeader64 = read_at(prefix, 0, "Mach-O header")?;
                (size_of::<MachHeader64>(), header.sizeofcmds)
            }
            MH_CIGAM | MH_CIGAM_64 => {
                return Err(PreloaderError::UnsupportedImage(
                    "byte-swapped Mach-O image".to_string(),
                ));
            }
            other => {
                return Err(PreloaderError::InvalidImage(format!(
                    "invalid Mach-O magic 0x{other:08X}"
                )));
            }
        };
        Ok(header_size + sizeofcmds as usize)
    }

    /// Parse the header and walk the load command list
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let end = Self::headers_len(data)?;
        let magic: u32 = read_at(data, 0, "Mach-O magic")?;
        let is_64 = magic == MH_MAGIC_64;

        let (cputype, filetype, ncmds, mut offset) = if is_64 {
            let header: MachHeader64 = read_at(data, 0, "Mach-O header")?;
            (header.cputype, header.filetype, header.ncmds, size_of::<MachHeader64>())
        } else {
            let header: MachHeader32 = read_at(data, 0, "Mach-O header")?;
            (header.cputype, header.filetype, header.ncmds, size_of::<MachHeader32>())
        };

        if end > data.len() {
            return Err(PreloaderError::InvalidImage(format!(
                "load commands end at {end:#x} past image size {:#x}",
                data.len()
            )));
        }

        let mut commands = Vec::with_capacity(ncmds as usize);
        for _ in 0..ncmds {
            let command: LoadCommand = read_at(&data[..end], offset, "load command")?;
            let size = command.cmdsize as usize;
            if size < size_of::<LoadCommand>() || offset + size > end {
                return Err(PreloaderError::InvalidImage(format!(
                    "load command 0x{:X} at {offset:#x} has bad size {size:#x}",
                    command.cmd
                )));
            }
            commands.push((offset, command.cmd));
            offset += size;
        }

        Ok(Self {
            data: &data[..end],
            is_64,
            cputype,
            filetype,
            commands,
        })
    }

    pub fn is_64(&self) -> bool {
        self.is_64
    }

    pub fn cputype(&self) -> i32 {
        self.cputype
    }

    pub fn filetype(&self) -> u32 {
        self.filetype
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    /// All segment commands in load order
    pub fn segments(&self) -> Result<Vec<Segment>> {
        let mut segments = Vec::new();
        for &(offset, cmd) in &self.commands {
            match cmd {
                LC_SEGMENT_64 => {
                    let seg: SegmentCommand64 = read_at(self.data, offset, "segment command")?;
                    segments.push(Segment {
                        name: segment_name(&seg.segname),
                        vmaddr: seg.vmaddr,
                        vmsize: seg.vmsize,
                        fileoff: seg.fileoff,
                        filesize: seg.filesize,
                        initprot: seg.initprot,
                    });
                }
                LC_SEGMENT => {
                    let seg: SegmentCommand32 = read_at(self.data, offset, "segment command")?;
                    segments.push(Segment {
                        name: segment_name(&seg.segname),
                        vmaddr: u64::from(seg.vmaddr),
                        vmsize: u64::from(seg.vmsize),
                        fileoff: u64::from(seg.fileoff),
                        filesize: u64::from(seg.filesize),
                        initprot: seg.initprot,
                    });
                }
                _ => {}
            }
        }
        Ok(segments)
    }

    /// Link-time address of `__TEXT`, which maps the header itself
    pub fn text_vmaddr(&self) -> Result<Option<u64>> {
        Ok(self
            .segments()?
            .into_iter()
            .find(|seg| seg.name == TEXT)
            .map(|seg| seg.vmaddr))
    }

    /// Slide of an image whose header is mapped at `header_address`
    pub fn slide(&self, header_address: u64) -> Result<u64> {
        let text = self.text_vmaddr()?.ok_or_else(|| {
            PreloaderError::InvalidImage("no __TEXT segment".to_string())
        })?;
        Ok(header_address.wrapping_sub(text))
    }

    /// Address range covered by all segments except `__PAGEZERO`, shifted by
    /// `slide`
    pub fn image_range(&self, slide: u64) -> Result<Option<ImageRange>> {
        Ok(self
            .segments()?
            .iter()
            .filter(|seg| seg.name != PAGEZERO && seg.vmsize != 0)
            .map(Segment::range)
            .reduce(ImageRange::union)
            .map(|range| {
                ImageRange::new(
                    range.start.wrapping_add(slide),
                    range.end.wrapping_add(slide),
                )
            }))
    }

    /// Find where execution starts
    ///
    /// `LC_MAIN` gives an offset from the header; `LC_UNIXTHREAD` gives a
    /// link-time program counter that has to be moved by `slide`.
    pub fn entry_point(&self, header_address: u64, slide: u64) -> Result<Option<EntryPoint>> {
        for &(offset, cmd) in &self.commands {
            match cmd {
                LC_MAIN => {
                    let main: EntryPointCommand = read_at(self.data, offset, "LC_MAIN")?;
                    return Ok(Some(EntryPoint::Main(header_address.wrapping_add(main.entryoff))));
                }
                LC_UNIXTHREAD => {
                    let pc = self.thread_pc(offset)?;
                    return Ok(Some(EntryPoint::UnixThread(pc.wrapping_add(slide))));
                }
                _ => {}
            }
        }
        Ok(None)
    }

    fn thread_pc(&self, offset: usize) -> Result<u64> {
        let thread: ThreadCommand = read_at(self.data, offset, "LC_UNIXTHREAD")?;
        let state = offset + size_of::<ThreadCommand>();
        match thread.flavor {
            X86_THREAD_STATE64 => read_at(self.data, state + X86_THREAD_STATE64_RIP, "rip"),
            ARM_THREAD_STATE64 => read_at(self.data, state + ARM_THREAD_STATE64_PC, "pc"),
            X86_THREAD_STATE32 => {
                read_at::<u32>(self.data, state + X86_THREAD_STATE32_EIP, "eip").map(u64::from)
            }
            other => Err(PreloaderError::UnsupportedImage(format!(
                "thread state flavor {other}"
            ))),
        }
    }
}
