//! Queries over time-series events.

use crate::error::QueryResult;
use crate::filter::{Filter, Subject};
use crate::parser::compile;
use warden_store::{Event, TimeSeries};

/// Events of a time series that pass a compiled query, in timestamp order.
pub struct EventQuery {
    filter: Box<dyn Filter>,
    events: std::vec::IntoIter<Event>,
}

impl Iterator for EventQuery {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        let filter = &self.filter;
        self.events
            .by_ref()
            .find(|event| filter.matches(event as &dyn Subject))
    }
}

/// Query support for [`TimeSeries`].
pub trait TimeSeriesQuery {
    /// Events matching `query`, e.g.
    /// `timestamp >= 2011/11/18 and timestamp < 2011/11/19`.
    fn query(&self, query: &str) -> QueryResult<EventQuery>;
}

impl TimeSeriesQuery for TimeSeries {
    fn query(&self, query: &str) -> QueryResult<EventQuery> {
        Ok(EventQuery {
            filter: compile(query)?,
            events: self.events(),
        })
    }
}
