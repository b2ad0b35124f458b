// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Tracing wrapper for the host syscall traits
//!
//! [`TracedPlatform`] forwards every call to the wrapped platform and emits a
//! call event before and a return event after it.

use crate::Result;
use crate::syscalls::{DynamicLoader, LibraryHandle, VirtualMemory};
use crate::tracing::{TraceCategory, TraceEvent, Tracer};
use std::sync::Arc;

/// Platform decorator that traces every host call
pub struct TracedPlatform<T> {
    inner: T,
    tracer: Arc<Tracer>,
}

impl<T> TracedPlatform<T> {
    pub fn new(inner: T, tracer: Arc<Tracer>) -> Self {
        Self { inner, tracer }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn traced<R>(
        &mut self,
        function: &str,
        category: TraceCategory,
        args: impl FnOnce() -> String,
        call: impl FnOnce(&mut T) -> R,
        describe: impl FnOnce(&R) -> String,
    ) -> R {
        if self.tracer.is_enabled() {
            self.tracer
                .trace(TraceEvent::call(function, category).with_args(args()));
        }

        let result = call(&mut self.inner);

        if self.tracer.is_enabled() {
            self.tracer.trace(
                TraceEvent::return_event(function, category).with_return_value(describe(&result)),
            );
        }
        result
    }
}

fn describe_address(address: Option<u64>) -> String {
    match address {
        Some(address) => format!("{address:#x}"),
        None => "NULL".to_string(),
    }
}

impl<T: VirtualMemory> VirtualMemory for TracedPlatform<T> {
    fn page_size(&self) -> u64 {
        self.inner.page_size()
    }

    fn reserve(&mut self, address: u64, size: u64, fixed: bool) -> Result<u64> {
        self.traced(
            "mmap",
            TraceCategory::Reserve,
            || format!("addr={address:#x}, size={size:#x}, fixed={fixed}"),
            |inner| inner.reserve(address, size, fixed),
            |result| match result {
                Ok(actual) => format!("Ok({actual:#x})"),
                Err(e) => format!("Err({e})"),
            },
        )
    }

    fn unmap(&mut self, address: u64, size: u64) -> Result<()> {
        self.traced(
            "munmap",
            TraceCategory::Release,
            || format!("addr={address:#x}, size={size:#x}"),
            |inner| inner.unmap(address, size),
            |result| match result {
                Ok(()) => "Ok(())".to_string(),
                Err(e) => format!("Err({e})"),
            },
        )
    }

    fn residency(&mut self, address: u64, size: u64, pages: &mut [u8]) -> Result<()> {
        self.traced(
            "mincore",
            TraceCategory::Probe,
            || format!("addr={address:#x}, size={size:#x}"),
            |inner| {
                inner
                    .residency(address, size, pages)
                    .map(|()| pages.iter().filter(|&&page| page & 1 != 0).count())
            },
            |result| match result {
                Ok(resident) => format!("Ok(resident={resident})"),
                Err(e) => format!("Err({e})"),
            },
        )
        .map(|_| ())
    }
}

impl<T: DynamicLoader> DynamicLoader for TracedPlatform<T> {
    fn open(&mut self, path: &str) -> Result<LibraryHandle> {
        self.traced(
            "dlopen",
            TraceCategory::Loader,
            || format!("path=\"{path}\", flags=RTLD_NOW"),
            |inner| inner.open(path),
            |result| match result {
                Ok(handle) => format!("Ok(handle={:#x})", handle.0),
                Err(e) => format!("Err({e})"),
            },
        )
    }

    fn symbol(&mut self, handle: LibraryHandle, name: &str) -> Option<u64> {
        self.traced(
            "dlsym",
            TraceCategory::Loader,
            || format!("handle={:#x}, name=\"{name}\"", handle.0),
            |inner| inner.symbol(handle, name),
            |result| describe_address(*result),
        )
    }

    fn image_base_of(&mut self, address: u64) -> Option<u64> {
        self.traced(
            "dladdr",
            TraceCategory::Loader,
            || format!("addr={address:#x}"),
            |inner| inner.image_base_of(address),
            |result| describe_address(*result),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PreloaderError;
    use crate::tracing::{TraceConfig, TraceFilter, TraceOutput};

    // Mock implementation for testing
    struct MockPlatform;

    impl VirtualMemory for MockPlatform {
        fn page_size(&self) -> u64 {
            0x1000
        }

        fn reserve(&mut self, address: u64, _size: u64, _fixed: bool) -> Result<u64> {
            Ok(address)
        }

        fn unmap(&mut self, _address: u64, _size: u64) -> Result<()> {
            Err(PreloaderError::Syscall {
                call: "munmap",
                reason: "Invalid argument".to_string(),
            })
        }

        fn residency(&mut self, _address: u64, _size: u64, pages: &mut [u8]) -> Result<()> {
            pages.fill(1);
            Ok(())
        }
    }

    impl DynamicLoader for MockPlatform {
        fn open(&mut self, _path: &str) -> Result<LibraryHandle> {
            Ok(LibraryHandle(0x42))
        }

        fn symbol(&mut self, _handle: LibraryHandle, name: &str) -> Option<u64> {
            (name == "main").then_some(0x1234)
        }

        fn image_base_of(&mut self, _address: u64) -> Option<u64> {
            None
        }
    }

    fn traced_to_file(name: &str) -> (TracedPlatform<MockPlatform>, std::path::PathBuf) {
        let path = std::env::temp_dir().join(name);
        let _ = std::fs::remove_file(&path);
        let config = TraceConfig::enabled()
            .with_timestamps(false)
            .with_output(TraceOutput::File(path.clone()));
        let tracer = Arc::new(Tracer::new(config, TraceFilter::new()).unwrap());
        (TracedPlatform::new(MockPlatform, tracer), path)
    }

    #[test]
    fn test_traced_disabled_passes_through() {
        let mut traced = TracedPlatform::new(MockPlatform, Arc::new(Tracer::disabled()));
        assert_eq!(traced.reserve(0x10000, 0x1000, false).unwrap(), 0x10000);
        assert_eq!(traced.page_size(), 0x1000);
    }

    #[test]
    fn test_traced_memory_calls() {
        let (mut traced, path) = traced_to_file("wine_preloader_wrapper_memory.txt");

        traced.reserve(0x10000, 0x2000, true).unwrap();
        assert!(traced.unmap(0x10000, 0x2000).is_err());
        let mut pages = [0u8; 2];
        traced.residency(0x10000, 0x2000, &mut pages).unwrap();
        drop(traced);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "CALL   mmap(addr=0x10000, size=0x2000, fixed=true)");
        assert_eq!(lines[1], "RETURN mmap() -> Ok(0x10000)");
        assert!(lines[3].contains("Err(munmap failed: Invalid argument)"));
        assert_eq!(lines[5], "RETURN mincore() -> Ok(resident=2)");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_traced_loader_calls() {
        let (mut traced, path) = traced_to_file("wine_preloader_wrapper_loader.txt");

        let handle = traced.open("/usr/bin/wine").unwrap();
        assert_eq!(traced.symbol(handle, "main"), Some(0x1234));
        assert_eq!(traced.symbol(handle, "wine_main_preload_info"), None);
        drop(traced);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("CALL   dlopen(path=\"/usr/bin/wine\", flags=RTLD_NOW)"));
        assert!(contents.contains("RETURN dlopen() -> Ok(handle=0x42)"));
        assert!(contents.contains("RETURN dlsym() -> 0x1234"));
        assert!(contents.contains("RETURN dlsym() -> NULL"));
        let _ = std::fs::remove_file(&path);
    }
}
