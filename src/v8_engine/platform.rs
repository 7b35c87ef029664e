//! Process-wide V8 platform initialization.
//!
//! V8 can only be initialized once per process; every [`V8Engine`](super::V8Engine)
//! goes through [`get_platform`].

use std::sync::OnceLock;

static PLATFORM: OnceLock<v8::SharedRef<v8::Platform>> = OnceLock::new();

/// Get the global V8 platform, initializing it on first use.
pub fn get_platform() -> &'static v8::SharedRef<v8::Platform> {
    PLATFORM.get_or_init(|| {
        // Small embedder heaps do better without incremental marking
        v8::V8::set_flags_from_string("--noincremental-marking");

        #[cfg(target_os = "macos")]
        v8::V8::set_flags_from_string("--single-threaded-gc");

        let platform = v8::new_default_platform(0, false).make_shared();
        v8::V8::initialize_platform(platform.clone());
        v8::V8::initialize();

        log::info!("V8 {} initialized", v8::V8::get_version());
        platform
    })
}
