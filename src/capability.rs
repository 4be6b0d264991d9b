//! Optional solver capability probing.
//!
//! Some downstream applets can use a native LP solver wrapper when one is
//! installed next to the binary. Probing is explicit: callers ask for the
//! capability and get a value back, nothing is cached globally.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Shared library name on Unix-like systems.
pub const SOLVER_LIBRARY: &str = "libgurobiwrapper.so";

/// Shared library name on Windows.
pub const SOLVER_DLL: &str = "gurobiwrapper.dll";

/// Outcome of a solver probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolverCapability {
    /// Wrapper library found at this path
    Available { path: PathBuf },
    /// No wrapper in any searched directory
    Unavailable { searched: Vec<PathBuf> },
}

impl SolverCapability {
    pub fn is_available(&self) -> bool {
        matches!(self, SolverCapability::Available { .. })
    }
}

impl fmt::Display for SolverCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverCapability::Available { path } => {
                write!(f, "solver wrapper found at {}", path.display())
            }
            SolverCapability::Unavailable { searched } => {
                write!(f, "no solver wrapper found in {} location(s)", searched.len())
            }
        }
    }
}

/// Directory of the running executable, then the working directory.
pub fn default_search_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        dirs.push(dir);
    }
    dirs.push(PathBuf::from("."));
    dirs
}

/// Look for the solver wrapper in `dirs`, in order.
///
/// The first directory holding either library name wins; the shared object
/// is checked before the DLL in each directory.
pub fn probe_solver<P: AsRef<Path>>(dirs: &[P]) -> SolverCapability {
    let mut searched = Vec::with_capacity(dirs.len());
    for dir in dirs {
        let dir = dir.as_ref();
        for name in [SOLVER_LIBRARY, SOLVER_DLL] {
            let candidate = dir.join(name);
            if candidate.is_file() {
                debug!(path = %candidate.display(), "solver wrapper found");
                return SolverCapability::Available { path: candidate };
            }
        }
        searched.push(dir.to_path_buf());
    }
    debug!(searched = searched.len(), "solver wrapper not found");
    SolverCapability::Unavailable { searched }
}
