/*!
 * Monitoring
 * Tracing setup for applications embedding the primitives
 */

mod tracer;

pub use tracer::{init_tracing, span_scenario, ScenarioSpan};
