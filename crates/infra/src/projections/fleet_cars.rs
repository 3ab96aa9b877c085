use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use fleetstream_core::{AggregateId, AggregateRoot, DomainFactory, FactoryError, ValueObjectFactory};
use fleetstream_events::{EventEnvelope, Projection};
use fleetstream_fleet::{Car, CarEvent, CarStatus, Plate};

use crate::read_model::{ReadModelError, ReadModelQuery, ReadModelStore};

#[derive(Debug, Error)]
pub enum CarListError {
    #[error(transparent)]
    ReadModel(#[from] ReadModelError),

    #[error(transparent)]
    Factory(#[from] FactoryError),
}

/// Queryable fleet read model: one row per car.
///
/// Plates are kept in their persisted string form; use
/// [`CarListProjection::plate`] to get the value object back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarListRow {
    pub car_id: AggregateId,
    pub plate: Option<String>,
    pub driver_id: Option<AggregateId>,
    pub status: CarStatus,
    /// Stream version of the last event folded into this row.
    pub version: u64,
}

impl CarListRow {
    fn new(car_id: AggregateId) -> Self {
        Self {
            car_id,
            plate: None,
            driver_id: None,
            status: CarStatus::InService,
            version: 0,
        }
    }
}

/// Fleet car list projection.
///
/// Every update is a field assignment, so re-applying an event after a
/// missed checkpoint write leaves the row unchanged.
pub struct CarListProjection<S>
where
    S: ReadModelStore<AggregateId, CarListRow>,
{
    store: S,
    factory: Arc<DomainFactory>,
}

impl<S> CarListProjection<S>
where
    S: ReadModelStore<AggregateId, CarListRow>,
{
    pub const NAME: &'static str = "fleet.car_list";

    pub fn new(store: S, factory: Arc<DomainFactory>) -> Self {
        Self { store, factory }
    }

    pub fn get(&self, car_id: &AggregateId) -> Result<Option<CarListRow>, ReadModelError> {
        self.store.get(car_id)
    }

    pub fn query(&self, query: &ReadModelQuery<CarListRow>) -> Vec<CarListRow> {
        self.store.query(query)
    }

    pub fn count(&self) -> usize {
        self.store.count()
    }

    /// Cars currently assigned to `driver_id`, sorted by car id.
    pub fn cars_of_driver(&self, driver_id: &AggregateId) -> Vec<CarListRow> {
        let driver_id = driver_id.clone();
        self.store.query(
            &ReadModelQuery::all()
                .filter(move |row: &CarListRow| row.driver_id.as_ref() == Some(&driver_id))
                .sort_by(|a, b| a.car_id.cmp(&b.car_id)),
        )
    }

    /// The car's plate, rebuilt through the domain factory.
    pub fn plate(&self, car_id: &AggregateId) -> Result<Option<Plate>, CarListError> {
        match self.store.get(car_id)?.and_then(|row| row.plate) {
            Some(raw) => Ok(Some(
                self.factory
                    .rehydrate_value_object::<Plate>(Plate::TYPE_NAME, &raw)?,
            )),
            None => Ok(None),
        }
    }

    fn row(&self, car_id: &AggregateId) -> Result<CarListRow, ReadModelError> {
        Ok(self
            .store
            .get(car_id)?
            .unwrap_or_else(|| CarListRow::new(car_id.clone())))
    }
}

impl<S> Projection for CarListProjection<S>
where
    S: ReadModelStore<AggregateId, CarListRow>,
{
    type Ev = CarEvent;

    fn name(&self) -> &str {
        Self::NAME
    }

    fn handles(&self, aggregate_type: &str) -> bool {
        aggregate_type == Car::AGGREGATE_TYPE
    }

    fn apply(&self, envelope: &EventEnvelope<JsonValue>, event: &CarEvent) -> anyhow::Result<()> {
        let mut row = match event {
            CarEvent::CarCreated(e) => CarListRow::new(e.car_id.clone()),
            CarEvent::CarRegistered(e) => {
                let mut row = self.row(&e.car_id)?;
                row.plate = Some(e.plate.as_str().to_string());
                row
            }
            CarEvent::DriverAssigned(e) => {
                let mut row = self.row(&e.car_id)?;
                row.driver_id = Some(e.driver_id.clone());
                row
            }
            CarEvent::CarDecommissioned(e) => {
                let mut row = self.row(&e.car_id)?;
                row.status = CarStatus::Decommissioned;
                row.driver_id = None;
                row
            }
        };

        if &row.car_id != envelope.aggregate_id() {
            anyhow::bail!(
                "event for car '{}' arrived on stream '{}'",
                row.car_id,
                envelope.stream_name()
            );
        }

        row.version = envelope.version();
        self.store.upsert(row.car_id.clone(), row)?;
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        self.store.destroy_all()?;
        Ok(())
    }
}
