//! PC-keyed breakpoints and address-range watchpoints.
//!
//! Grounded on `original_source/src/cpu/cpu_bkpt.c` (hash-bucket design,
//! `BP_TYPE_TEMPORARY` precedence and auto-removal, the single-step
//! counter) and `cpu_types.h` (`MAX_WATCHPOINTS`, `WatchpointType`,
//! `CpuStopReason`).

use crate::memory::AccessMode;

const HASH_SIZE: usize = 256;
const MAX_WATCHPOINTS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointKind {
    User,
    Temporary,
    Function,
    Data,
    Instruction,
}

/// Aligned with the Debug Adapter Protocol's StoppedEvent reasons, per
/// `cpu_types.h`'s `CpuStopReason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    None,
    Entry,
    Step,
    Breakpoint,
    Exception,
    Pause,
    Goto,
    FunctionBreakpoint,
    DataBreakpoint,
    InstructionBreakpoint,
}

impl BreakpointKind {
    fn stop_reason(self) -> StopReason {
        match self {
            BreakpointKind::User => StopReason::Breakpoint,
            BreakpointKind::Temporary => StopReason::Step,
            BreakpointKind::Function => StopReason::FunctionBreakpoint,
            BreakpointKind::Data => StopReason::DataBreakpoint,
            BreakpointKind::Instruction => StopReason::InstructionBreakpoint,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakpointEntry {
    pub address: u16,
    pub kind: BreakpointKind,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
    pub log_message: Option<String>,
    pub hit_count: u32,
}

fn hash_address(address: u16) -> usize {
    address as usize % HASH_SIZE
}

/// Lazily initialized on first `add`, mirroring the source's
/// `breakpoint_manager_init()` auto-init-on-first-use.
pub struct BreakpointManager {
    buckets: Option<Vec<Vec<BreakpointEntry>>>,
    step_count: u32,
}

impl BreakpointManager {
    pub fn new() -> Self {
        BreakpointManager {
            buckets: None,
            step_count: 0,
        }
    }

    fn buckets_mut(&mut self) -> &mut Vec<Vec<BreakpointEntry>> {
        self.buckets.get_or_insert_with(|| vec![Vec::new(); HASH_SIZE])
    }

    pub fn add(
        &mut self,
        address: u16,
        kind: BreakpointKind,
        condition: Option<String>,
        hit_condition: Option<String>,
        log_message: Option<String>,
    ) {
        let h = hash_address(address);
        let bucket = self.buckets_mut();
        if kind == BreakpointKind::Temporary
            && bucket[h]
                .iter()
                .any(|e| e.address == address && e.kind == BreakpointKind::Temporary)
        {
            return;
        }
        bucket[h].push(BreakpointEntry {
            address,
            kind,
            condition,
            hit_condition,
            log_message,
            hit_count: 0,
        });
    }

    pub fn remove(&mut self, address: u16, kind: Option<BreakpointKind>) {
        if self.buckets.is_none() {
            return;
        }
        let h = hash_address(address);
        self.buckets_mut()[h].retain(|e| !(e.address == address && (kind.is_none() || Some(e.kind) == kind)));
    }

    pub fn step_one(&mut self) {
        self.step_count = 1;
    }

    /// Checks the single-step counter, the PC-keyed breakpoint hash bucket
    /// for `pc`, and `watchpoints` for a data hit struck during this
    /// instruction. Temporary breakpoint hits take precedence over all
    /// other kinds and are removed after firing. Entries carrying a
    /// `log_message` never cause a stop (logpoint semantics). Returns
    /// `None` when execution should simply continue.
    pub fn check(&mut self, pc: u16, watchpoints: &WatchpointTable) -> Option<StopReason> {
        if self.step_count > 0 {
            self.step_count -= 1;
            if self.step_count == 0 {
                return Some(StopReason::Step);
            }
        }

        if watchpoints.take_pending_hit() {
            return Some(StopReason::DataBreakpoint);
        }

        if self.buckets.is_none() {
            return None;
        }
        let h = hash_address(pc);

        let mut temp_idx = None;
        let mut user_reason = None;
        {
            let bucket = &mut self.buckets_mut()[h];
            for (i, entry) in bucket.iter_mut().enumerate() {
                if entry.address != pc {
                    continue;
                }
                if !hit_condition_met(entry) {
                    continue;
                }
                entry.hit_count += 1;
                if entry.log_message.is_some() {
                    continue;
                }
                if entry.kind == BreakpointKind::Temporary {
                    temp_idx = Some(i);
                    break;
                }
                user_reason = Some(entry.kind.stop_reason());
            }
        }

        if let Some(i) = temp_idx {
            self.buckets_mut()[h].remove(i);
            return Some(StopReason::Step);
        }
        user_reason
    }
}

fn hit_condition_met(entry: &BreakpointEntry) -> bool {
    match &entry.hit_condition {
        Some(cond) => cond.trim().parse::<u32>().map(|want| entry.hit_count == want).unwrap_or(true),
        None => true,
    }
}

impl Default for BreakpointManager {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchpointKind {
    Read,
    Write,
    ReadWrite,
}

impl WatchpointKind {
    fn matches(self, access: AccessMode) -> bool {
        match self {
            WatchpointKind::Read => access.contains(AccessMode::READ),
            WatchpointKind::Write => access.contains(AccessMode::WRITE),
            WatchpointKind::ReadWrite => access.contains(AccessMode::READ) || access.contains(AccessMode::WRITE),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct WatchpointEntry {
    address: u16,
    length: u16,
    kind: WatchpointKind,
    enabled: bool,
    hit_count: u32,
}

/// Fixed-capacity table of data watchpoints, checked on every virtual
/// memory access rather than only at instruction boundaries. Mirrors
/// `MAX_WATCHPOINTS` in `cpu_types.h`.
pub struct WatchpointTable {
    entries: Vec<WatchpointEntry>,
    pending_hit: std::cell::Cell<bool>,
}

impl WatchpointTable {
    pub fn new() -> Self {
        WatchpointTable {
            entries: Vec::new(),
            pending_hit: std::cell::Cell::new(false),
        }
    }

    /// Reads and clears the "struck since last check" latch consulted by
    /// `BreakpointManager::check` at the end of each instruction.
    pub fn take_pending_hit(&self) -> bool {
        self.pending_hit.replace(false)
    }

    pub fn add(&mut self, address: u16, length: u16, kind: WatchpointKind) -> Result<(), &'static str> {
        if self.entries.len() >= MAX_WATCHPOINTS {
            return Err("watchpoint table is full");
        }
        self.entries.push(WatchpointEntry {
            address,
            length: length.max(1),
            kind,
            enabled: true,
            hit_count: 0,
        });
        Ok(())
    }

    pub fn remove(&mut self, address: u16) {
        self.entries.retain(|w| w.address != address);
    }

    /// Called on every virtual memory access (not just at instruction
    /// boundaries). Returns true the first time a matching watchpoint is
    /// struck this access; also bumps `hit_count` for every matching entry
    /// and latches `pending_hit` for the next `take_pending_hit` poll.
    pub fn check(&mut self, address: u16, access: AccessMode) -> bool {
        let mut hit = false;
        for w in self.entries.iter_mut() {
            if !w.enabled || !w.kind.matches(access) {
                continue;
            }
            if address >= w.address && (address as u32) < w.address as u32 + w.length as u32 {
                w.hit_count += 1;
                hit = true;
            }
        }
        if hit {
            self.pending_hit.set(true);
        }
        hit
    }
}

impl Default for WatchpointTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporary_breakpoint_fires_once() {
        let mut mgr = BreakpointManager::new();
        let watchpoints = WatchpointTable::new();
        mgr.add(0o1000, BreakpointKind::Temporary, None, None, None);
        assert_eq!(mgr.check(0o1000, &watchpoints), Some(StopReason::Step));
        assert_eq!(mgr.check(0o1000, &watchpoints), None);
    }

    #[test]
    fn duplicate_temporary_is_skipped() {
        let mut mgr = BreakpointManager::new();
        let watchpoints = WatchpointTable::new();
        mgr.add(0o1000, BreakpointKind::Temporary, None, None, None);
        mgr.add(0o1000, BreakpointKind::Temporary, None, None, None);
        mgr.check(0o1000, &watchpoints);
        assert_eq!(mgr.check(0o1000, &watchpoints), None);
    }

    #[test]
    fn user_breakpoint_fires_unboundedly() {
        let mut mgr = BreakpointManager::new();
        let watchpoints = WatchpointTable::new();
        mgr.add(0o2000, BreakpointKind::User, None, None, None);
        assert_eq!(mgr.check(0o2000, &watchpoints), Some(StopReason::Breakpoint));
        assert_eq!(mgr.check(0o2000, &watchpoints), Some(StopReason::Breakpoint));
    }

    #[test]
    fn temporary_takes_precedence_over_user() {
        let mut mgr = BreakpointManager::new();
        let watchpoints = WatchpointTable::new();
        mgr.add(0o3000, BreakpointKind::User, None, None, None);
        mgr.add(0o3000, BreakpointKind::Temporary, None, None, None);
        assert_eq!(mgr.check(0o3000, &watchpoints), Some(StopReason::Step));
        // User breakpoint survives and still fires on the next hit.
        assert_eq!(mgr.check(0o3000, &watchpoints), Some(StopReason::Breakpoint));
    }

    #[test]
    fn step_one_stops_after_single_instruction() {
        let mut mgr = BreakpointManager::new();
        let watchpoints = WatchpointTable::new();
        mgr.step_one();
        assert_eq!(mgr.check(0, &watchpoints), Some(StopReason::Step));
    }

    #[test]
    fn watchpoint_hit_is_latched_for_breakpoint_manager() {
        let mgr_watchpoints = WatchpointTable::new();
        let mut mgr = BreakpointManager::new();
        let mut wp = WatchpointTable::new();
        wp.add(0x50, 1, WatchpointKind::Write).unwrap();
        wp.check(0x50, AccessMode::WRITE);
        assert_eq!(mgr.check(0, &wp), Some(StopReason::DataBreakpoint));
        assert_eq!(mgr.check(0, &wp), None);
        assert_eq!(mgr.check(0, &mgr_watchpoints), None);
    }

    #[test]
    fn watchpoint_hits_only_on_matching_access() {
        let mut wp = WatchpointTable::new();
        wp.add(0x100, 4, WatchpointKind::Write).unwrap();
        assert!(!wp.check(0x100, AccessMode::READ));
        assert!(wp.check(0x100, AccessMode::WRITE));
        assert!(wp.check(0x103, AccessMode::WRITE));
        assert!(!wp.check(0x104, AccessMode::WRITE));
    }

    #[test]
    fn watchpoint_table_rejects_beyond_capacity() {
        let mut wp = WatchpointTable::new();
        for i in 0..MAX_WATCHPOINTS {
            wp.add(i as u16, 1, WatchpointKind::ReadWrite).unwrap();
        }
        assert!(wp.add(1000, 1, WatchpointKind::ReadWrite).is_err());
    }
}
