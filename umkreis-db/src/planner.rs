use crate::{
    error::{IndexError, QueryError, StoreError},
    spatial::SpatialIndex,
    store::PostStore,
};
use std::cmp::Ordering;
use tracing::{debug, warn};
use umkreis_common::model::{
    location::Location,
    post::{Post, PostId},
    radius::Radius,
};

/// Answers radius searches by asking the spatial index for ids and the post
/// store for the posts behind them.
pub struct QueryPlanner<'a> {
    pub spatial: &'a dyn SpatialIndex,
    pub store: &'a dyn PostStore,
    pub default_radius: Radius,
}

impl QueryPlanner<'_> {
    /// Posts within `radius_meters` of `center`, closest first.
    ///
    /// Ids whose post is missing from the store are skipped: the spatial entry
    /// may outlive a write that never completed.
    pub async fn search(
        &self,
        center: Location,
        radius_meters: Option<f64>,
    ) -> Result<Vec<Post>, QueryError> {
        let center = center.validate()?;
        let radius = match radius_meters {
            Some(meters) => Radius::from_meters(meters).map_err(IndexError::from)?,
            None => self.default_radius,
        };

        let mut ids: Vec<PostId> = self
            .spatial
            .query_radius(center, radius.meters())
            .await?
            .into_iter()
            .collect();
        ids.sort_unstable();

        let mut posts = Vec::with_capacity(ids.len());
        for result in self.store.get_many(&ids).await {
            match result {
                Ok(post) => posts.push(post),
                Err(StoreError::NotFound(id)) => {
                    warn!(post = %id, "Spatial entry without stored post");
                }
                Err(err) => return Err(err.into()),
            }
        }

        posts.sort_by(|a, b| {
            let a_distance = center.distance_meters(a.location());
            let b_distance = center.distance_meters(b.location());
            a_distance
                .partial_cmp(&b_distance)
                .unwrap_or(Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });

        debug!(
            lat = center.lat,
            lon = center.lon,
            radius = radius.meters(),
            found = posts.len(),
            "Searched nearby posts"
        );

        Ok(posts)
    }
}
