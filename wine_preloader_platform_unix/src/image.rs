// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Locating images through the host loader

use wine_preloader_core::syscalls::{DynamicLoader, LibraryHandle};
use wine_preloader_core::{EntryPoint, ImageRange, PreloaderError, Result};

/// Symbols used to find the binary's Mach-O header through `dladdr`
#[cfg(target_os = "macos")]
const ANCHOR_SYMBOLS: [&str; 2] = ["wine_main_preload_info", "main"];

/// Address range of the running preloader's own segments
///
/// Returns `None` when the host gives no way to find it, in which case the
/// override range is not checked against the preloader.
#[cfg(target_os = "macos")]
pub fn self_image_range() -> Option<ImageRange> {
    use wine_preloader_core::image::MachImage;

    // SAFETY: image 0 is always the main executable, which stays mapped
    let (header, slide) = unsafe {
        (
            libc::_dyld_get_image_header(0),
            libc::_dyld_get_image_vmaddr_slide(0),
        )
    };
    if header.is_null() {
        return None;
    }

    // SAFETY: the header belongs to the mapped main executable
    let headers = unsafe { mapped_headers(header as u64) }.ok()?;
    let image = MachImage::parse(headers).ok()?;
    #[allow(clippy::cast_sign_loss)]
    let slide = slide as u64;
    image.image_range(slide).ok().flatten()
}

/// Address range of the running preloader's own segments
///
/// Covers every `PT_LOAD` segment of the main executable.
#[cfg(target_os = "linux")]
pub fn self_image_range() -> Option<ImageRange> {
    use core::ffi::{c_int, c_void};

    #[allow(clippy::useless_conversion)]
    unsafe extern "C" fn first_object(
        info: *mut libc::dl_phdr_info,
        _size: libc::size_t,
        data: *mut c_void,
    ) -> c_int {
        // SAFETY: dl_iterate_phdr passes a valid info block and our `data`
        let (info, range) = unsafe { (&*info, &mut *data.cast::<Option<ImageRange>>()) };
        let phdrs = if info.dlpi_phdr.is_null() {
            &[][..]
        } else {
            // SAFETY: the loader describes `dlpi_phnum` program headers
            unsafe { core::slice::from_raw_parts(info.dlpi_phdr, usize::from(info.dlpi_phnum)) }
        };

        for phdr in phdrs.iter().filter(|phdr| phdr.p_type == libc::PT_LOAD) {
            let start = u64::from(info.dlpi_addr) + u64::from(phdr.p_vaddr);
            let segment = ImageRange::new(start, start + u64::from(phdr.p_memsz));
            *range = Some(range.map_or(segment, |range| range.union(segment)));
        }
        // the main executable comes first; stop there
        1
    }

    let mut range: Option<ImageRange> = None;
    // SAFETY: the callback only writes through the pointer it is given
    unsafe {
        libc::dl_iterate_phdr(Some(first_object), (&raw mut range).cast());
    }
    range
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
pub fn self_image_range() -> Option<ImageRange> {
    None
}

/// View of the header and load commands of a Mach-O image mapped at `base`
///
/// # Safety
///
/// `base` must point at the Mach-O header of an image that stays mapped for
/// the returned lifetime.
#[cfg(target_os = "macos")]
unsafe fn mapped_headers<'a>(base: u64) -> Result<&'a [u8]> {
    use wine_preloader_core::image::MachImage;
    use wine_preloader_core::image::macho::MachHeader64;

    let ptr = base as usize as *const u8;
    // SAFETY: a mapped header is at least this long
    let prefix = unsafe { core::slice::from_raw_parts(ptr, size_of::<MachHeader64>()) };
    let len = MachImage::headers_len(prefix)?;
    // SAFETY: the load commands follow the header in the same mapping
    Ok(unsafe { core::slice::from_raw_parts(ptr, len) })
}

/// Find where to enter a binary loaded through `loader`
///
/// On macOS the binary's Mach-O header is located with `dladdr` and its
/// `LC_MAIN` or `LC_UNIXTHREAD` command decides. Elsewhere the binary has to
/// export `main`.
#[cfg(target_os = "macos")]
pub fn binary_entry_point<L: DynamicLoader + ?Sized>(
    loader: &mut L,
    handle: LibraryHandle,
    path: &str,
) -> Result<EntryPoint> {
    use wine_preloader_core::image::MachImage;

    let anchor = ANCHOR_SYMBOLS
        .iter()
        .find_map(|name| loader.symbol(handle, name))
        .ok_or_else(|| PreloaderError::MissingEntryPoint(path.to_string()))?;
    let header = loader.image_base_of(anchor).ok_or_else(|| PreloaderError::Loader {
        path: path.to_string(),
        reason: "could not find mach header".to_string(),
    })?;

    // SAFETY: dladdr reported `header` as the base of a loaded image
    let headers = unsafe { mapped_headers(header) }?;
    let image = MachImage::parse(headers)?;
    let slide = image.slide(header)?;
    image
        .entry_point(header, slide)?
        .ok_or_else(|| PreloaderError::MissingEntryPoint(path.to_string()))
}

/// Find where to enter a binary loaded through `loader`
///
/// On macOS the binary's Mach-O header is located with `dladdr` and its
/// `LC_MAIN` or `LC_UNIXTHREAD` command decides. Elsewhere the binary has to
/// export `main`.
#[cfg(not(target_os = "macos"))]
pub fn binary_entry_point<L: DynamicLoader + ?Sized>(
    loader: &mut L,
    handle: LibraryHandle,
    path: &str,
) -> Result<EntryPoint> {
    loader
        .symbol(handle, "main")
        .map(EntryPoint::Main)
        .ok_or_else(|| PreloaderError::MissingEntryPoint(path.to_string()))
}
