//! Canonical tag paths for machines and systems
//!
//! The gateway lays performance-tracking tags out as
//! `<root><system>/<machine>/...`, with system-level tags under the reserved
//! `_ System` pseudo-machine. Paths are built once per machine per cycle and
//! passed to the signal queries and tag writes.

/// Name of the reserved system pseudo-child excluded from machine browsing.
pub const SYSTEM_PSEUDO_CHILD: &str = "_ System";

/// Tag paths for one machine under a system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineTagPaths {
    /// `<root><system>/<machine>/`
    pub root: String,
    pub cycle_done: String,
    pub in_cycle: String,
    pub idle: String,
    pub active_recipe: String,
    pub shift_run_time: String,
    pub shift_idle_time: String,
    pub shift_down_time: String,
    pub parts_complete: String,
    pub expected_parts: String,
}

impl MachineTagPaths {
    pub fn new(tag_root: &str, system: &str, machine: &str) -> Self {
        let root = format!("{tag_root}{system}/{machine}/");
        Self {
            cycle_done: format!("{root}machineStatus/Cycle Done"),
            in_cycle: format!("{root}machineStatus/In Cycle"),
            idle: format!("{root}machineStatus/Machine Idle"),
            active_recipe: format!("{root}Active Recipe"),
            shift_run_time: format!("{root}Shift Run Time"),
            shift_idle_time: format!("{root}Shift Idle Time"),
            shift_down_time: format!("{root}Shift Down Time"),
            parts_complete: format!("{root}Parts Complete"),
            expected_parts: format!("{root}Expected Parts"),
            root,
        }
    }

    /// Unique name used to key persisted recipe runs: `"<system>/<machine>"`.
    ///
    /// Derived by stripping the provider root from the machine root path,
    /// mirroring how the run database keys rows.
    pub fn machine_unique_name(&self, tag_root: &str) -> String {
        self.root
            .strip_prefix(tag_root)
            .unwrap_or(&self.root)
            .trim_end_matches('/')
            .to_string()
    }
}

/// System-level tag paths under the `_ System` pseudo-machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemTagPaths {
    /// `<root><system>`
    pub root: String,
    pub active_recipe_info: String,
    pub cycle_done: String,
    pub completed_parts: String,
    pub expected_parts: String,
    pub scorecard_value: String,
}

impl SystemTagPaths {
    pub fn new(tag_root: &str, system: &str) -> Self {
        let root = format!("{tag_root}{system}");
        Self {
            active_recipe_info: format!("{root}/{SYSTEM_PSEUDO_CHILD}/Active Recipe Info"),
            cycle_done: format!("{root}/{SYSTEM_PSEUDO_CHILD}/machineStatus/Cycle Done"),
            completed_parts: format!("{root}/{SYSTEM_PSEUDO_CHILD}/Completed Parts"),
            expected_parts: format!("{root}/{SYSTEM_PSEUDO_CHILD}/Expected Parts"),
            scorecard_value: format!("{root}/{SYSTEM_PSEUDO_CHILD}/Scorecard Value"),
            root,
        }
    }
}
