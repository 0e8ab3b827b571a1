//! Orbit presenter: arranges an owner's active tokens on a ring around a
//! moving anchor.

use std::f32::consts::TAU;

use enrichments_config::PresenterConfig;
use enrichments_core::math::{Pose, Vec3};

use crate::pool::TokenPool;
use crate::token::OwnerId;

/// Evenly spaced points on a ring of `radius` in the local XZ plane.
pub fn orbit_offsets(count: usize, radius: f32) -> Vec<Vec3> {
    (0..count)
        .map(|i| {
            let angle = TAU * i as f32 / count as f32;
            Vec3::new(radius * angle.cos(), 0.0, radius * angle.sin())
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct OrbitPresenter {
    radius: f32,
    follow_rate: f32,
    anchor: Option<Pose>,
}

impl OrbitPresenter {
    pub fn new(radius: f32, follow_rate: f32) -> Self {
        Self {
            radius,
            follow_rate,
            anchor: None,
        }
    }

    pub fn anchor(&self) -> Option<Pose> {
        self.anchor
    }

    /// Ease the anchor toward `target`. The first update snaps to it.
    pub fn update(&mut self, target: Pose, dt: f32) -> Pose {
        let anchor = match self.anchor {
            None => target,
            Some(current) => {
                let t = (self.follow_rate * dt.max(0.0)).min(1.0);
                Pose::new(current.position.lerp(target.position, t), target.rotation)
            }
        };
        self.anchor = Some(anchor);
        anchor
    }

    /// World poses for `count` tokens around the current anchor.
    pub fn layout(&self, count: usize) -> Vec<Pose> {
        let Some(anchor) = self.anchor else {
            return Vec::new();
        };
        orbit_offsets(count, self.radius)
            .into_iter()
            .map(|offset| Pose::new(anchor.transform_point(offset), anchor.rotation))
            .collect()
    }

    /// Follow `target` and move `owner`'s active tokens onto the ring.
    /// Returns how many tokens were placed.
    pub fn arrange(&mut self, pool: &mut TokenPool, owner: OwnerId, target: Pose, dt: f32) -> usize {
        self.update(target, dt);
        let tokens = pool.active_tokens_of(owner);
        let poses = self.layout(tokens.len());
        let mut placed = 0;
        for (id, pose) in tokens.into_iter().zip(poses) {
            if pool.move_to(id, pose).is_ok() {
                placed += 1;
            }
        }
        placed
    }

    /// Forget the anchor so the next update snaps.
    pub fn reset(&mut self) {
        self.anchor = None;
    }
}

impl From<&PresenterConfig> for OrbitPresenter {
    fn from(config: &PresenterConfig) -> Self {
        Self::new(config.orbit_radius, config.follow_rate)
    }
}
