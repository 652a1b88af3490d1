//! Resource Registry
//!
//! Maps each [`Component`] to the handler that exports and imports it.

use super::external_tables::ExternalTablesHandler;
use super::routines::RoutinesHandler;
use super::scheduled_queries::ScheduledQueriesHandler;
use super::tables::TablesHandler;
use super::views::ViewsHandler;
use super::{in_order, Component, ComponentHandler};

/// Get the handler of a component
pub fn handler_for(component: Component) -> Box<dyn ComponentHandler> {
    match component {
        Component::Routines => Box::new(RoutinesHandler),
        Component::Views => Box::new(ViewsHandler),
        Component::ExternalTables => Box::new(ExternalTablesHandler),
        Component::Tables => Box::new(TablesHandler),
        Component::ScheduledQueries => Box::new(ScheduledQueriesHandler),
    }
}

/// Handlers of the selected components, in `order`
pub fn handlers_in_order(selected: &[Component], order: &[Component]) -> Vec<Box<dyn ComponentHandler>> {
    in_order(selected, order)
        .into_iter()
        .map(handler_for)
        .collect()
}
