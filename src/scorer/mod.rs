pub mod run_stats;

pub use run_stats::{compute_stats, squad_frequency, valid_runs, within_window};
