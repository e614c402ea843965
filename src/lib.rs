//! Turnwise: turn orchestration for tool-calling LLM agents.
//!
//! One round streams a model response into a [`plan::Plan`], fans tool steps
//! out to concurrent tasks as they arrive, suppresses runaway repetition of
//! identical calls, and recovers from context-window overflow by letting the
//! model prune its own history. [`turn::TurnRunner`] repeats rounds until the
//! model answers or asks the user for input.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use turnwise::prelude::*;
//!
//! # async fn example(client: Arc<dyn ModelClient>, builder: Arc<dyn BindingBuilder>) -> turnwise::error::Result<()> {
//! let store = Arc::new(InMemoryStore::new());
//! let tools = ToolSet::new().with_tool(HistoryRemoveTool::new(store.clone()));
//! let runner = PlanRunner::new(client, Arc::new(tools), store)
//!     .with_config(TurnwiseConfig::load_layered()?);
//! let outcome = TurnRunner::new(Arc::new(runner), builder)
//!     .run("conversation-1", Some("turn-1"), Default::default())
//!     .await?;
//! println!("{:?}", outcome.plan.content);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod continuation;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod guard;
pub mod plan;
pub mod prelude;
pub mod provider;
pub mod recovery;
pub mod runner;
pub mod store;
pub mod tools;
pub mod turn;
pub mod types;
pub mod util;
