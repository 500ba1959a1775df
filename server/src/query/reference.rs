//! Resolution of plate/well/site names into reference regions

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::geometry::Polygon;
use crate::model::{MapobjectError, MapobjectType, ReferenceInstance, ReferenceKind};
use crate::partition::{PartitionKey, PartitionScheme};
use crate::store::MapobjectStore;

/// Named region filters as they arrive from a request
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ReferenceSelector {
    pub plate_name: Option<String>,
    pub well_name: Option<String>,
    pub well_pos_y: Option<u32>,
    pub well_pos_x: Option<u32>,
}

impl ReferenceSelector {
    pub fn well(plate_name: &str, well_name: &str) -> Self {
        Self {
            plate_name: Some(plate_name.to_string()),
            well_name: Some(well_name.to_string()),
            ..Self::default()
        }
    }

    pub fn site(plate_name: &str, well_name: &str, y: u32, x: u32) -> Self {
        Self {
            well_pos_y: Some(y),
            well_pos_x: Some(x),
            ..Self::well(plate_name, well_name)
        }
    }

    /// Site position as (y, x). The coordinates come as a pair or not at all.
    pub fn site_position(&self) -> Result<Option<(u32, u32)>, MapobjectError> {
        match (self.well_pos_y, self.well_pos_x) {
            (Some(y), Some(x)) => Ok(Some((y, x))),
            (None, None) => Ok(None),
            (Some(_), None) => Err(MapobjectError::MalformedInput(
                "parameter \"well_pos_x\" is required when \"well_pos_y\" is given".into(),
            )),
            (None, Some(_)) => Err(MapobjectError::MalformedInput(
                "parameter \"well_pos_y\" is required when \"well_pos_x\" is given".into(),
            )),
        }
    }

    /// Finest granularity named by the filters, if any
    pub fn granularity(&self) -> Result<Option<ReferenceKind>, MapobjectError> {
        if self.site_position()?.is_some() {
            Ok(Some(ReferenceKind::Site))
        } else if self.well_name.is_some() {
            Ok(Some(ReferenceKind::Well))
        } else if self.plate_name.is_some() {
            Ok(Some(ReferenceKind::Plate))
        } else {
            Ok(None)
        }
    }

    /// Reject filters finer than the type's anchor: objects of a type
    /// anchored at a well cannot be selected by site position.
    pub fn check_against(&self, mapobject_type: &MapobjectType) -> Result<(), MapobjectError> {
        if let Some(requested) = self.granularity()?
            && mapobject_type.reference_kind.is_coarser_than(requested)
        {
            let parameters = match requested {
                ReferenceKind::Site => "\"well_pos_y\" and \"well_pos_x\" are",
                _ => "\"well_name\" is",
            };
            return Err(MapobjectError::MalformedInput(format!(
                "query parameters {} not supported for mapobject type \"{}\"",
                parameters, mapobject_type.name
            )));
        }
        Ok(())
    }
}

/// Region a query is evaluated against
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedReference {
    pub instance: ReferenceInstance,
    pub partition_key: PartitionKey,
    pub polygon: Polygon,
}

/// Turns selectors into reference instances, partitions and outlines
#[derive(Clone)]
pub struct ReferenceResolver {
    store: Arc<dyn MapobjectStore>,
}

impl ReferenceResolver {
    pub fn new(store: Arc<dyn MapobjectStore>) -> Self {
        Self { store }
    }

    /// Resolve one well or site
    pub async fn resolve(
        &self,
        mapobject_type: &MapobjectType,
        selector: &ReferenceSelector,
    ) -> Result<ResolvedReference, MapobjectError> {
        let position = selector.site_position()?;
        selector.check_against(mapobject_type)?;

        let plate_name = selector.plate_name.as_deref().ok_or_else(|| {
            MapobjectError::MalformedInput("parameter \"plate_name\" is required".into())
        })?;
        let well_name = selector.well_name.as_deref().ok_or_else(|| {
            MapobjectError::MalformedInput("parameter \"well_name\" is required".into())
        })?;

        let plate = self
            .store
            .find_plate(plate_name)
            .await?
            .ok_or_else(|| MapobjectError::NotFound(format!("plate \"{}\"", plate_name)))?;
        let well = self
            .store
            .find_well(plate.id, well_name)
            .await?
            .ok_or_else(|| {
                MapobjectError::NotFound(format!(
                    "well \"{}\" of plate \"{}\"",
                    well_name, plate_name
                ))
            })?;

        let instance = match position {
            Some((y, x)) => {
                let site = self.store.find_site(well.id, y, x).await?.ok_or_else(|| {
                    MapobjectError::NotFound(format!(
                        "site (y={}, x={}) of well \"{}\"",
                        y, x, well_name
                    ))
                })?;
                ReferenceInstance::Site { plate, well, site }
            }
            None => ReferenceInstance::Well { plate, well },
        };

        self.reference_for(instance).await
    }

    /// Partition and outline of a known instance
    pub async fn reference_for(
        &self,
        instance: ReferenceInstance,
    ) -> Result<ResolvedReference, MapobjectError> {
        let partition_key = PartitionScheme::for_instance(&instance)?;
        let polygon = self
            .store
            .reference_polygon(instance.kind(), instance.ref_id())
            .await?;
        debug!(
            "Resolved {} to partition {}",
            instance.describe(),
            partition_key
        );
        Ok(ResolvedReference {
            instance,
            partition_key,
            polygon,
        })
    }

    /// Every instance matching the selector, in registration order. Sites
    /// are enumerated when a position is given or the type is anchored at
    /// sites; wells otherwise.
    pub async fn instances(
        &self,
        mapobject_type: &MapobjectType,
        selector: &ReferenceSelector,
    ) -> Result<Vec<ReferenceInstance>, MapobjectError> {
        let position = selector.site_position()?;
        selector.check_against(mapobject_type)?;
        let site_level = position.is_some() || mapobject_type.reference_kind == ReferenceKind::Site;

        let plates = match selector.plate_name.as_deref() {
            Some(name) => vec![
                self.store
                    .find_plate(name)
                    .await?
                    .ok_or_else(|| MapobjectError::NotFound(format!("plate \"{}\"", name)))?,
            ],
            None => self.store.list_plates().await?,
        };

        let mut instances = Vec::new();
        for plate in plates {
            let wells = match selector.well_name.as_deref() {
                Some(name) => self.store.find_well(plate.id, name).await?.into_iter().collect(),
                None => self.store.list_wells(plate.id).await?,
            };
            for well in wells {
                if !site_level {
                    instances.push(ReferenceInstance::Well {
                        plate: plate.clone(),
                        well,
                    });
                    continue;
                }
                for site in self.store.list_sites(well.id).await? {
                    if position.is_some_and(|(y, x)| (site.y, site.x) != (y, x)) {
                        continue;
                    }
                    instances.push(ReferenceInstance::Site {
                        plate: plate.clone(),
                        well: well.clone(),
                        site,
                    });
                }
            }
        }

        if instances.is_empty() {
            return Err(MapobjectError::NotFound(
                "no plate, well or site matches the given filters".into(),
            ));
        }
        Ok(instances)
    }
}
