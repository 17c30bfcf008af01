use crate::input::InputControl;
use crate::types::FrameType;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Mode-S downlink format bitmask values.
const MODE_S_EXT_SQUITTER_ALL: u32 = 1 << 17 | 1 << 18;
const MODE_S_ALL: u32 = !0;

/// Filter flags, shared with the input layer: the receiver is configured
/// from the same settings the software filter applies.
pub struct FilterConfig {
    crc: AtomicBool,
    ext_squitter: AtomicBool,
    sync: AtomicBool,
}

impl FilterConfig {
    pub fn new(crc: bool, ext_squitter: bool, sync: bool) -> FilterConfig {
        FilterConfig {
            crc: AtomicBool::new(crc),
            ext_squitter: AtomicBool::new(ext_squitter),
            sync: AtomicBool::new(sync),
        }
    }

    #[inline]
    pub fn crc(&self) -> bool {
        self.crc.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn ext_squitter(&self) -> bool {
        self.ext_squitter.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn sync(&self) -> bool {
        self.sync.load(Ordering::SeqCst)
    }
}

/// Filter statistics snapshot.
#[derive(Debug, Default, Clone)]
pub struct FilterStatistics {
    pub frames_by_type: [u64; 4],
    pub mode_s_by_type: [u64; 32],
    pub filtered: u64,
    pub mode_s_filtered: u64,
    pub unsynchronized: u64,
}

struct FilterState {
    synchronized: bool,
    mode_s_mask: u32,
    stats: FilterStatistics,
}

/// Frame filter.
///
/// Drops everything but Mode-S frames, optionally restricted to extended
/// squitter, and gates all of it on receiver timestamp synchronization
/// when the sync filter is enabled.
pub struct Filter {
    cfg: Arc<FilterConfig>,
    state: Mutex<FilterState>,
    input: Mutex<Option<Arc<InputControl>>>,
}

impl Filter {
    pub fn new(cfg: Arc<FilterConfig>) -> Filter {
        let mask = Self::mode_s_mask(cfg.ext_squitter());

        Filter {
            cfg,
            state: Mutex::new(FilterState {
                synchronized: false,
                mode_s_mask: mask,
                stats: FilterStatistics::default(),
            }),
            input: Mutex::new(None),
        }
    }

    /// Attaches the input control used for the cross-layer reconfigure
    /// when the extended squitter policy changes.
    pub fn attach_input(&self, input: Arc<InputControl>) {
        *self.input.lock().unwrap() = Some(input);
    }

    /// Resets the filter state. Called on input reconnect: synchronization
    /// must be observed again on the new stream.
    pub fn reset(&self) {
        self.state.lock().unwrap().synchronized = false;
    }

    /// Sets the synchronization state. Driven by Status frames carrying a
    /// non-zero timestamp.
    pub fn set_synchronized(&self, synchronized: bool) {
        self.state.lock().unwrap().synchronized = synchronized;
    }

    /// Enables or disables the synchronization gate.
    pub fn set_sync_filter(&self, sync: bool) {
        self.cfg.sync.store(sync, Ordering::SeqCst);
    }

    /// Restricts forwarding to extended squitter frames (downlink formats
    /// 17 and 18). Cross layer: the receiver's own frame filter follows.
    pub fn set_ext_squitter_only(&self, ext_squitter: bool) {
        self.cfg.ext_squitter.store(ext_squitter, Ordering::SeqCst);

        self.state.lock().unwrap().mode_s_mask = Self::mode_s_mask(ext_squitter);

        let input = self.input.lock().unwrap();
        if let Some(input) = input.as_ref() {
            input.reconfigure();
        }
    }

    #[inline]
    fn mode_s_mask(ext_squitter: bool) -> u32 {
        if ext_squitter {
            MODE_S_EXT_SQUITTER_ALL
        } else {
            MODE_S_ALL
        }
    }

    /// Tests a frame. Returns true if it may pass.
    pub fn filter(&self, frame_type: FrameType, first_byte: u8) -> bool {
        let mut state = self.state.lock().unwrap();

        state.stats.frames_by_type[frame_type as usize] += 1;

        if !state.synchronized {
            state.stats.unsynchronized += 1;
            if self.cfg.sync() {
                state.stats.filtered += 1;
                return false;
            }
        }

        if frame_type != FrameType::ModeSShort && frame_type != FrameType::ModeSLong {
            state.stats.filtered += 1;
            return false;
        }

        let downlink_format = u32::from(first_byte >> 3) & 0x1f;
        state.stats.mode_s_by_type[downlink_format as usize] += 1;

        if (1 << downlink_format) & state.mode_s_mask == 0 {
            state.stats.filtered += 1;
            state.stats.mode_s_filtered += 1;
            return false;
        }

        true
    }

    /// Statistics snapshot.
    pub fn statistics(&self) -> FilterStatistics {
        self.state.lock().unwrap().stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(crc: bool, ext_squitter: bool, sync: bool) -> Filter {
        Filter::new(Arc::new(FilterConfig::new(crc, ext_squitter, sync)))
    }

    fn first_byte(downlink_format: u8) -> u8 {
        downlink_format << 3
    }

    #[test]
    fn test_unsynchronized_drops_all() {
        let filter = filter(true, false, true);

        assert!(!filter.filter(FrameType::ModeSLong, first_byte(17)));
        assert_eq!(filter.statistics().unsynchronized, 1);
        assert_eq!(filter.statistics().filtered, 1);
    }

    #[test]
    fn test_synchronized_passes_mode_s() {
        let filter = filter(true, false, true);
        filter.set_synchronized(true);

        assert!(filter.filter(FrameType::ModeSShort, first_byte(11)));
        assert!(filter.filter(FrameType::ModeSLong, first_byte(17)));
    }

    #[test]
    fn test_sync_filter_disabled_passes_unsynchronized() {
        let filter = filter(true, false, false);

        assert!(filter.filter(FrameType::ModeSLong, first_byte(17)));
        assert_eq!(filter.statistics().unsynchronized, 1);
    }

    #[test]
    fn test_mode_ac_and_status_never_pass() {
        let filter = filter(true, false, false);

        assert!(!filter.filter(FrameType::ModeAc, 0));
        assert!(!filter.filter(FrameType::Status, 0));
        assert_eq!(filter.statistics().filtered, 2);
        assert_eq!(filter.statistics().frames_by_type[FrameType::ModeAc as usize], 1);
        assert_eq!(filter.statistics().frames_by_type[FrameType::Status as usize], 1);
    }

    #[test]
    fn test_ext_squitter_only() {
        let filter = filter(true, true, false);

        assert!(filter.filter(FrameType::ModeSLong, first_byte(17)));
        assert!(filter.filter(FrameType::ModeSLong, first_byte(18)));
        assert!(!filter.filter(FrameType::ModeSLong, first_byte(11)));
        assert!(!filter.filter(FrameType::ModeSShort, first_byte(4)));

        let stats = filter.statistics();
        assert_eq!(stats.mode_s_filtered, 2);
        assert_eq!(stats.mode_s_by_type[17], 1);
        assert_eq!(stats.mode_s_by_type[18], 1);
        assert_eq!(stats.mode_s_by_type[11], 1);
        assert_eq!(stats.mode_s_by_type[4], 1);
    }

    #[test]
    fn test_policy_change_at_runtime() {
        let filter = filter(true, true, false);
        assert!(!filter.filter(FrameType::ModeSLong, first_byte(11)));

        filter.set_ext_squitter_only(false);
        assert!(filter.filter(FrameType::ModeSLong, first_byte(11)));

        filter.set_ext_squitter_only(true);
        assert!(!filter.filter(FrameType::ModeSLong, first_byte(11)));
    }

    #[test]
    fn test_reset_requires_new_synchronization() {
        let filter = filter(true, false, true);
        filter.set_synchronized(true);
        assert!(filter.filter(FrameType::ModeSLong, first_byte(17)));

        filter.reset();
        assert!(!filter.filter(FrameType::ModeSLong, first_byte(17)));
    }
}
