//! Conversational layer of datapac.
//!
//! A turn flows through the same steps in both runtime strategies:
//! 1. **Catalog** (`tools::GetTablesTool`) - fetch the table catalog first
//! 2. **Selection** (`selection`) - pick the table the question is about, or ask
//! 3. **Planning** (`planner`) - turn the question into an easy-query payload
//! 4. **Guardrail** (`guardrails`) - check the payload against the schema
//! 5. **Execution** (`executor`) - run it and remember it in the `session`
//!
//! With a model configured, the model drives steps 1-3 through tool calls
//! (`runtime::AgentRuntime::model_driven`). Without one, the keyword analyzer in
//! `conversation` and the heuristic planner do it deterministically.
//!
//! The model never talks to the backend directly. Every payload it produces is
//! validated before it leaves the process.

pub mod conversation;
pub mod executor;
pub mod guardrails;
pub mod llm;
pub mod planner;
pub mod prompts;
pub mod render;
pub mod runtime;
pub mod selection;
pub mod session;
pub mod tools;

pub use runtime::{AgentRuntime, Answerer};
pub use session::SessionHandle;
pub use tools::Clock;
