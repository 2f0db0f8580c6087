//! `orc-core` mines DWARF debug information out of Mach-O object files and archives to find One
//! Definition Rule Violations (ODRVs) before link time: two translation units that both define the
//! same externally visible symbol, but disagree on its shape.
//!
//! The pipeline runs leaf to root: [`reader`] maps a file and exposes a cursor, [`string_pool`]
//! interns names into process-lifetime handles, [`registry`] tracks where every DIE came from,
//! [`container`] walks Mach-O/fat/archive containers down to DWARF sections, [`dwarf`] decodes those
//! sections into [`die::Die`] records, and [`registration`] hashes and cross-compares them into
//! [`registration::OdrvReport`]s. [`scheduler`] fans the per-file work out across a worker pool.
//!
//! This crate has no opinion about argv, configuration files, or the linker; see the `orc-cli`
//! binary crate for that ambient layer.

pub mod arch;
pub mod container;
pub mod die;
pub mod dwarf;
pub mod error;
pub mod hash;
pub mod reader;
pub mod registration;
pub mod registry;
pub mod scheduler;
pub mod settings;
pub mod string_pool;

pub use die::Die;
pub use error::CoreError;
pub use registration::OdrvReport;
pub use settings::Settings;

use std::path::Path;
use std::sync::Arc;

use crate::registration::Registration;
use crate::registry::ObjectFileRegistry;
use crate::scheduler::TaskSystem;
use crate::settings::Globals;
use crate::string_pool::StringPool;

/// Process-scoped singletons shared by every worker task.
///
/// A [`Engine`] bundles the string pool, object-file registry, and DIE registration map that would
/// otherwise be process-wide globals. Bundling them behind one `Arc` rather than reaching for a
/// handful of lazily-initialized statics keeps the core embeddable: a host process can run more
/// than one independent analysis without the second one silently sharing state with the first.
pub struct Engine {
    pub(crate) strings: StringPool,
    pub(crate) registry: Arc<ObjectFileRegistry>,
    pub(crate) registration: Registration,
    pub(crate) globals: Globals,
}

impl Engine {
    /// Creates a fresh engine with empty pools and an empty registration map.
    pub fn new() -> Arc<Self> {
        let registry = Arc::new(ObjectFileRegistry::new());
        Arc::new(Self {
            strings: StringPool::new(),
            registration: Registration::new(Arc::clone(&registry)),
            registry,
            globals: Globals::new(),
        })
    }

    /// Empties the DIE registration map and resets error/progress counters so the engine can be
    /// driven again in the same process. The string pool and object-file registry persist
    /// deliberately: handles and indices handed out so far remain valid.
    pub fn reset(&self) {
        self.registration.clear();
        self.globals.reset();
    }

    /// Runs the whole pipeline over `paths`: dispatches one task per input file onto `tasks`,
    /// blocks until every task completes, then walks the registration map and returns the ODRV
    /// reports found, filtered per `settings`.
    pub fn process(
        self: &Arc<Self>,
        paths: &[impl AsRef<Path>],
        settings: &Settings,
        tasks: &TaskSystem,
    ) -> Vec<OdrvReport> {
        let work = tasks.work_counter();
        for path in paths {
            let engine = Arc::clone(self);
            let path = path.as_ref().to_path_buf();
            let settings = settings.clone();
            let token = work.clone();
            tasks.execute(scheduler::Priority::Normal, move || {
                let _token = token;
                if let Err(err) = container::process_file(&engine, &path, &settings) {
                    tracing::warn!(path = %path.display(), error = %err, "skipping file");
                    engine.globals.record_error();
                }
            });
        }
        work.join();

        self.registration.collect_reports(settings, &self.globals)
    }
}
