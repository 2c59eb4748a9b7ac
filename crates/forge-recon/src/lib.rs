//! Reconciliation between an immutable, periodically regenerated source
//! store and the hand-curated overlay that references it.
//!
//! A [`Project`] pairs one read-only [`SourceStore`] with one overlay
//! [`Ledger`]. [`Project::list_drift`] classifies every source entity against
//! the ledger, [`Project::get_diff`] shows what moved since the last review,
//! and [`Project::adjudicate`] is the only path that writes the ledger.

mod adjudicate;
pub mod config;
mod diff;
mod drift;
mod error;
pub mod hash;
mod ledger;
mod model;
mod overlay;
mod project;
mod source;

pub use adjudicate::{Adjudication, AdjudicationRequest, BulkFailure, BulkOutcome};
pub use config::{load_config, ReconConfig};
pub use diff::{diff_attributes, ChangeKind, EntityDiff, FieldDelta, TextChange};
pub use drift::{
    classify, detect, Classification, DriftEntry, DriftOptions, DriftReport, DriftStatus,
    DriftSummary, DriftWarning,
};
pub use error::{ReconError, Result, StaleReason};
pub use hash::{content_hash, ContentHash};
pub use ledger::{Ledger, LedgerRecord, LedgerView};
pub use model::{Entity, SourceEntity};
pub use overlay::{OverlayView, OverlayWarning};
pub use project::{Project, ProjectInfo, ProjectManifest, ProjectRegistry, MANIFEST_FILE};
pub use source::{SourceSnapshot, SourceStore, SqliteSource, StaticSource};

pub use forge_overlay_core::{
    BookmarkDraft, Decision, HistoryRow, NarrativeContext, NarrativeDraft, Persona, PersonaDraft,
    SpatialBookmark,
};
