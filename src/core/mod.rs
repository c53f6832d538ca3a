/*!
 * Core ingest pipeline
 *
 * catalog -> router -> planner -> executor, driven by the orchestrator.
 */

pub mod catalog;
pub mod executor;
pub mod orchestrator;
pub mod pattern;
pub mod planner;
pub mod router;
pub mod strategy;

pub use catalog::{read_catalog, CandidateObject};
pub use executor::{TransferExecutor, TransferOutcome, TransferStatus};
pub use orchestrator::{Orchestrator, RunReport};
pub use pattern::CompiledPattern;
pub use planner::{plan_table, PlanningFailure, TablePlan, TransferPlan};
pub use router::{route, RoutedObject, Router, RoutingTable, TransferPolicy};
pub use strategy::{StrategySelector, TransferStrategy};
