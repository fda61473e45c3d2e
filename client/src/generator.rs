//! Random point clouds for exercising the ingestion server.

use rand::Rng;
use shared::Point;

/// Half-width of the cube points are drawn from.
pub const CLOUD_EXTENT: f32 = 1.0;

/// Generates `count` points uniformly distributed in `[-1, 1)` on each axis.
pub fn random_cloud<R: Rng + ?Sized>(rng: &mut R, count: usize) -> Vec<Point> {
    (0..count)
        .map(|_| {
            Point::new(
                rng.gen_range(-CLOUD_EXTENT..CLOUD_EXTENT),
                rng.gen_range(-CLOUD_EXTENT..CLOUD_EXTENT),
                rng.gen_range(-CLOUD_EXTENT..CLOUD_EXTENT),
            )
        })
        .collect()
}
