pub mod analysis;
pub mod context;
pub mod event;
pub mod job;
pub mod optimization;
pub mod project;
pub mod selection;
pub mod strategy;
pub mod vfs;

pub use analysis::{AnalysisResult, Complexity};
pub use context::{coerce_codebase_context, CodebaseContext};
pub use event::{EngineEvent, SSE_RELAY_CHANNEL};
pub use job::{Job, JobStatus};
pub use optimization::{
    Optimization, OptimizationResult, OptimizationStatus, TokenUsage, ValidationResult,
};
pub use project::{Project, ProjectError, ProjectStatus, Prompt, PromptVersion, MAX_FOLDER_DEPTH};
pub use selection::{StrategySelection, StrategySelectionError};
pub use strategy::{
    combo_for_task_type, count_specificity_weaknesses, default_combo, p2_exempt, Strategy,
    StrategyCombo, SPECIFICITY_PATTERNS,
};
pub use vfs::{VfsFile, VfsFileVersion, VfsFolder, VFS_MAX_DEPTH};
