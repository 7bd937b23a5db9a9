//! Time-series objects: every `Event` version retained, read in time order.

use crate::error::StoreResult;
use crate::handle::Aff4Object;
use crate::object_store::ObjectStore;
use crate::schema::{attrs, types};
use crate::token::{AccessMode, Token};
use crate::urn::Urn;
use crate::value::{AttributeValue, Event};

/// Handle on a `TimeSeries` object.
#[derive(Debug)]
pub struct TimeSeries {
    object: Aff4Object,
}

impl TimeSeries {
    pub fn create(store: &ObjectStore, urn: &Urn, token: &Token) -> StoreResult<Self> {
        let object = store.create(urn, types::TIME_SERIES, AccessMode::ReadWrite, token)?;
        Ok(Self { object })
    }

    pub fn open(store: &ObjectStore, urn: &Urn, token: &Token, mode: AccessMode) -> StoreResult<Self> {
        let object = store.open_as(urn, types::TIME_SERIES, token, mode)?;
        Ok(Self { object })
    }

    pub fn urn(&self) -> &Urn {
        self.object.urn()
    }

    pub fn object(&self) -> &Aff4Object {
        &self.object
    }

    /// Buffer an event; its own timestamp orders it.
    pub fn add_event(&mut self, event: Event) -> StoreResult<()> {
        let timestamp = event.timestamp;
        self.object.set_at(attrs::EVENT, event, timestamp)
    }

    /// Every event, committed and buffered, in ascending timestamp order.
    pub fn events(&self) -> std::vec::IntoIter<Event> {
        self.object
            .get_versions(attrs::EVENT)
            .into_iter()
            .filter_map(|v| match v.value {
                AttributeValue::Event(event) => Some(*event),
                _ => None,
            })
            .collect::<Vec<_>>()
            .into_iter()
    }

    pub fn len(&self) -> usize {
        self.object.get_versions(attrs::EVENT).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Commit buffered events and record the new size.
    pub fn flush(&mut self) -> StoreResult<()> {
        if self.object.mode().can_write() && self.object.has_pending() {
            let size = self.len() as i64;
            self.object.set(attrs::SIZE, size)?;
        }
        self.object.flush()
    }

    pub fn close(mut self) -> StoreResult<()> {
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_out_of_order_events_read_in_order() {
        let store = ObjectStore::in_memory();
        let urn = Urn::new("C.1/analysis/timeline");
        let token = Token::system();

        let mut series = TimeSeries::create(&store, &urn, &token).unwrap();
        for micros in [3_000_000, 1_000_000, 2_000_000] {
            series.add_event(Event::at_micros(micros)).unwrap();
        }
        series.close().unwrap();

        let series = TimeSeries::open(&store, &urn, &token, AccessMode::Read).unwrap();
        let stamps: Vec<i64> = series.events().map(|e| e.timestamp.timestamp_micros()).collect();
        assert_eq!(stamps, vec![1_000_000, 2_000_000, 3_000_000]);
        assert_eq!(series.object().get(attrs::SIZE), Some(AttributeValue::Integer(3)));
    }

    #[test]
    fn test_open_wrong_type() {
        let store = ObjectStore::in_memory();
        let urn = Urn::new("C.1");
        store
            .create(&urn, types::CLIENT, AccessMode::Write, &Token::system())
            .unwrap()
            .close()
            .unwrap();
        let err = TimeSeries::open(&store, &urn, &Token::system(), AccessMode::Read).unwrap_err();
        assert!(err.is_schema_error());
    }

    proptest! {
        #[test]
        fn prop_events_read_back_ascending(stamps in proptest::collection::vec(0i64..4_000_000_000_000, 1..50)) {
            let store = ObjectStore::in_memory();
            let urn = Urn::new("C.1/timeline");
            let token = Token::system();
            let mut series = TimeSeries::create(&store, &urn, &token).unwrap();
            for micros in &stamps {
                series.add_event(Event::at_micros(*micros)).unwrap();
            }
            series.close().unwrap();

            let series = TimeSeries::open(&store, &urn, &token, AccessMode::Read).unwrap();
            let read: Vec<i64> = series.events().map(|e| e.timestamp.timestamp_micros()).collect();
            prop_assert_eq!(read.len(), stamps.len());
            prop_assert!(read.windows(2).all(|w| w[0] <= w[1]));
        }
    }
}
