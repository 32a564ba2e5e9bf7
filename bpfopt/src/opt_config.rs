//! A global store of flags that tweak optimizer behavior.
//!
//! WARNING: supports a single consistent configuration per process; it is
//! initialized once from the command line before first use.

/// The global configuration store. Accessed across the program via the
/// global [`CONFIG`](static@CONFIG).
pub struct OptConfig {
    /// The block-selection scan historically keeps overwriting its choice
    /// and therefore picks the largest ready block id. Set to pick the
    /// first (smallest) instead. Off by default to keep output bit-stable
    /// with existing deployments.
    pub pick_first_ready_block: bool,
    /// Refuse a 64-bit store merge whose concatenated immediate does not
    /// fit in the 32-bit immediate field. By default the upper half is
    /// dropped, matching historical output.
    pub strict_store_merge_truncation: bool,
    /// Log the final dependency arrays after analysis.
    pub debug_dump_dependencies: bool,
}

impl OptConfig {
    #[allow(static_mut_refs)]
    fn from_initialized() -> Self {
        let init = unsafe {
            INTERNAL_CONFIG_INITIALIZER
                .take()
                .expect("Should be initialized only once")
        };
        init.unwrap_or_default()
    }

    /// Initialize with the given command line configuration. Should only be
    /// called once, from `main`.
    #[allow(static_mut_refs)]
    pub fn initialize(command_line_config: Vec<CommandLineOptConfig>) {
        let prev = unsafe { INTERNAL_CONFIG_INITIALIZER.replace(Some(command_line_config.into())) };
        assert!(prev.is_some(), "Performed double initialization");
        lazy_static::initialize(&CONFIG);
    }
}

/// Internal initialization detail.
static mut INTERNAL_CONFIG_INITIALIZER: Option<Option<OptConfig>> = Some(None);

lazy_static::lazy_static! {
    /// The global configuration store
    pub static ref CONFIG: OptConfig = OptConfig::from_initialized();
}

#[derive(clap::ArgEnum, Clone, Debug)]
/// Advanced optimizer switches
pub enum CommandLineOptConfig {
    PickFirstReadyBlock,
    StrictStoreMergeTruncation,
    DebugDumpDependencies,
}

impl Default for OptConfig {
    fn default() -> Self {
        OptConfig {
            pick_first_ready_block: false,
            strict_store_merge_truncation: false,
            debug_dump_dependencies: false,
        }
    }
}

impl From<Vec<CommandLineOptConfig>> for OptConfig {
    fn from(v: Vec<CommandLineOptConfig>) -> Self {
        use CommandLineOptConfig::*;
        let mut r = OptConfig::default();
        for v in v {
            match v {
                PickFirstReadyBlock => {
                    r.pick_first_ready_block = true;
                }
                StrictStoreMergeTruncation => {
                    r.strict_store_merge_truncation = true;
                }
                DebugDumpDependencies => {
                    r.debug_dump_dependencies = true;
                }
            }
        }
        r
    }
}
