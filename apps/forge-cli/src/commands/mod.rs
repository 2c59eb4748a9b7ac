pub mod config;
pub mod overlay;
pub mod projects;
pub mod review;
mod util;

pub use config::ConfigCmd;
pub use overlay::{BookmarksCmd, NarrativesCmd, PersonasCmd, PromotableArgs};
pub use projects::ProjectsArgs;
pub use review::{AdjudicateArgs, BulkArgs, DiffArgs, DriftArgs, HistoryArgs};
pub use util::Context;
