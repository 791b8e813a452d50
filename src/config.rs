use tracing::warn;

/// Environment variable overriding [`Config::arena_cells`].
pub const ARENA_CELLS_VAR: &str = "SCM_ARENA_CELLS";
/// Environment variable overriding [`Config::root_slots`].
pub const ROOT_SLOTS_VAR: &str = "SCM_ROOT_SLOTS";

/// Sizing for one runtime instance. Both limits are fixed for the life of
/// the heap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Number of collectible cells in the arena.
    pub arena_cells: usize,
    /// Capacity of the root-protection stack. Bounds native nesting depth.
    pub root_slots: usize,
}

impl Config {
    pub const DEFAULT_ARENA_CELLS: usize = 65_536;
    /// Each pending non-tail call holds three slots (its expression, the
    /// caller's environment and the partly evaluated combination), so the
    /// default allows roughly 1,300 levels of non-tail recursion before the
    /// fatal overflow.
    pub const DEFAULT_ROOT_SLOTS: usize = 4_096;

    /// Defaults, overridden by `SCM_ARENA_CELLS` / `SCM_ROOT_SLOTS` when set.
    pub fn from_env() -> Self {
        let defaults = Config::default();
        Config {
            arena_cells: parse_count(
                ARENA_CELLS_VAR,
                std::env::var(ARENA_CELLS_VAR).ok(),
                defaults.arena_cells,
            ),
            root_slots: parse_count(
                ROOT_SLOTS_VAR,
                std::env::var(ROOT_SLOTS_VAR).ok(),
                defaults.root_slots,
            ),
        }
    }

    /// A tiny arena, handy for exercising the collector.
    pub fn small() -> Self {
        Config {
            arena_cells: 1_024,
            root_slots: 512,
        }
    }

    pub fn with_arena_cells(mut self, cells: usize) -> Self {
        self.arena_cells = cells;
        self
    }

    pub fn with_root_slots(mut self, slots: usize) -> Self {
        self.root_slots = slots;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            arena_cells: Self::DEFAULT_ARENA_CELLS,
            root_slots: Self::DEFAULT_ROOT_SLOTS,
        }
    }
}

fn parse_count(var: &str, raw: Option<String>, default: usize) -> usize {
    match raw {
        None => default,
        Some(text) => match text.trim().parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => {
                warn!(var, value = %text, default, "ignoring invalid size override");
                default
            }
        },
    }
}
