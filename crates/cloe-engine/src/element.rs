//! Element-facing trait seams
//!
//! The engine never talks to a network element directly; deployments
//! inject a [`ParameterAccessor`] for configuration reads/writes and a
//! [`TelemetrySource`] for KPI snapshots. The in-crate harness ships a
//! simulated implementation of both.

use crate::error::AccessorError;
use crate::types::{ElementId, KpiSnapshot, ParamValue};

/// Reads and writes individual configuration parameters on an element
///
/// Writes are externally visible and are the only place the engine
/// mutates state outside itself before verification.
#[async_trait::async_trait]
pub trait ParameterAccessor: Send + Sync {
    /// Read the current value of one parameter
    async fn read(&self, element: &ElementId, name: &str) -> Result<ParamValue, AccessorError>;

    /// Write one parameter
    async fn write(
        &self,
        element: &ElementId,
        name: &str,
        value: ParamValue,
    ) -> Result<(), AccessorError>;
}

/// Samples a point-in-time KPI snapshot for an element on demand
#[async_trait::async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Take one synchronous snapshot of the element's KPIs
    async fn snapshot(&self, element: &ElementId) -> Result<KpiSnapshot, AccessorError>;
}
