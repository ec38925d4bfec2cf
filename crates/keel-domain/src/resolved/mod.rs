mod analysis;
mod io;
mod types;

pub use analysis::{detect_pin_drift, pin_matches_managed_state, PinDivergence, PinDrift};
pub use io::{
    load_resolved_file, load_resolved_file_optional, parse_resolved_file, render_resolved_file,
    save_resolved_file,
};
pub use types::{
    PinState, ResolvedPackage, ResolvedPackagesStore, RESOLVED_FILE_NAME, RESOLVED_VERSION,
};
