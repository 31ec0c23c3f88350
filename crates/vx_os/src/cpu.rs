//! CPU topology queries and thread placement.

use std::num::NonZero;

/// Returns the number of logical cores on the system.
///
/// Falls back to `1` when the count cannot be determined, so callers can
/// rely on `result >= 1`.
pub fn logical_core_count() -> usize {
    std::thread::available_parallelism()
        .map(NonZero::get)
        .unwrap_or(1)
}

/// Pins the calling thread to a single logical core.
///
/// Returns `false` when the platform refuses the request or `core` does not
/// name an existing core. Placement is a soft hint; callers are expected to
/// keep running unpinned on failure.
pub fn pin_current_thread(core: usize) -> bool {
    let Some(core_ids) = core_affinity::get_core_ids() else {
        return false;
    };

    match core_ids.into_iter().find(|id| id.id == core) {
        Some(id) => core_affinity::set_for_current(id),
        None => {
            log::warn!("cannot pin thread: core {core} does not exist");
            false
        }
    }
}

/// Whether this platform runs a dedicated render thread.
// TODO: read from the platform properties table once it exists, instead of
// hardcoding the desktop configuration.
pub fn requires_render_thread() -> bool {
    true
}

/// Whether this platform runs a dedicated audio thread.
pub fn requires_audio_thread() -> bool {
    false
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_count_is_positive() {
        assert!(logical_core_count() >= 1);
    }

    #[test]
    fn pinning_to_missing_core_fails() {
        assert!(!pin_current_thread(usize::MAX));
    }
}
