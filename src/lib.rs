// Plan execution kernel library entry point

pub mod internal {
    pub mod plan {
        pub mod graph;
        pub mod ir;
    }
    pub mod tools {
        pub mod http;
        pub mod spec;
    }
    pub mod exec {
        pub mod engine;
        pub mod policy;
        pub mod result;
        pub mod runner;
        pub mod scheduler;
        pub mod template;
    }
    pub mod trace {
        pub mod trace;
    }
    pub mod api;
    pub mod registry;
}

// Re-export key types for external use
pub use internal::exec::engine::{ExecutionEngine, ExecutionReport};
pub use internal::exec::policy::ExecutionPolicy;
pub use internal::exec::result::{ErrorInfo, ResultMetadata, ResultStore, ToolResult};
pub use internal::exec::runner::StepRunner;
pub use internal::exec::scheduler::{ExecutionError, Scheduler};
pub use internal::exec::template::{Expression, TemplateError, TemplateResolver};
pub use internal::plan::graph::{DependencyGraph, GraphError};
pub use internal::plan::ir::{Plan, PlanMetadata, PlanValidationError, Step};
pub use internal::registry::{RegistryError, ToolEntry, ToolKind, ToolRegistry};
pub use internal::tools::http::{InvokeTool, ResourceTool};
pub use internal::tools::spec::{Tool, ToolError};
pub use internal::trace::trace::{Trace, TraceLog, TraceStore};
