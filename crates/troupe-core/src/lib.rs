//! Troupe core: a durable-style LLM-agent orchestration engine.
//!
//! The engine routes a natural-language task through planning, budget and
//! approval gates into one of several strategy workflows (simple, DAG,
//! supervisor, ReAct/research loops, browser-use, templates), coordinates the
//! resulting agent fleet, and synthesizes their outputs into a single result
//! with citations and per-step usage accounting.
//!
//! LLM calls, tools, and persistence live behind the `troupe-traits`
//! activity contracts; this crate contains only orchestration logic, so it
//! can be hosted on any substrate that provides cooperative async execution.

pub mod budget;
pub mod citations;
pub mod compression;
pub mod config;
pub mod error;
pub mod metadata;
pub mod pricing;
pub mod retry;
pub mod router;
pub mod runtime;
pub mod strategies;
pub mod synthesis;
pub mod template;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use router::{Engine, WorkflowHandle};
pub use runtime::WorkflowCtx;
pub use strategies::StrategyKind;
