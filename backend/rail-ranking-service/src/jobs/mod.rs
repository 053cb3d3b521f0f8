// ============================================
// Background Jobs Module
// ============================================
//
// Contains background job runners for:
// 1. Rail refresh (debounced recomputation + periodic poll)
//
// Triggers come from whoever owns the interaction log and inventory
// (e.g. after an append or an inventory reload).

pub mod refresh;

pub use refresh::{RailRefreshJob, RailUpdates, RefreshConfig, RefreshStats, RefreshTrigger};
