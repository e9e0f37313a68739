//! In-memory persistence. Areas and depots are read-mostly
//! configuration edited by operators; jobs carry derived ETA/distance;
//! samples are append-only and never mutated or deleted here.

use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    area::ServiceArea,
    fee::Depot,
    tracking::{LocationSample, TrackingJob},
};

#[derive(Debug, Default)]
pub struct Store {
    pub areas: RwLock<HashMap<Uuid, ServiceArea>>,
    pub depots: RwLock<HashMap<Uuid, Depot>>,
    pub jobs: RwLock<HashMap<Uuid, TrackingJob>>,
    pub samples: RwLock<Vec<LocationSample>>,
}
