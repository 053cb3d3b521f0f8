pub mod affinity;
pub mod dynamic_categories;
pub mod pipeline;
pub mod rail_assembler;
pub mod sources;
pub mod veto;

pub use affinity::{compute_affinity, AffinityEngine};
pub use dynamic_categories::{generate_dynamic_categories, DynamicCategoryGenerator};
pub use pipeline::{PreparedComputation, RailPipeline};
pub use rail_assembler::{assemble_rails, Assembly, AssemblyInput, RailAssembler, RankingError};
pub use sources::{
    InteractionLog, InventoryLookup, InventorySnapshot, InventorySource, MemoryInteractionLog,
    SourceError, StaticInventory,
};
pub use veto::{compute_vetoed, filter_vetoed, VetoRegistry};
