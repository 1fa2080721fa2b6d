//! Area-of-interest raycasting
//!
//! One scene raycast per frame along the canonical gaze ray. Hits on objects
//! carrying the AOI tag are projected into the fixed observation camera.

use crate::projection::Camera;
use crate::types::{AoiHit, GazeRay};
use glam::Vec3;

/// Nearest collider hit by a ray
#[derive(Debug, Clone, PartialEq)]
pub struct SceneHit {
    pub name: String,
    pub tag: Option<String>,
    pub point: Vec3,
    pub distance: f32,
}

/// Raycast query service of the host scene
pub trait SceneQuery: Send {
    fn raycast(&self, ray: &GazeRay) -> Option<SceneHit>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape {
    Sphere { center: Vec3, radius: f32 },
    Box { min: Vec3, max: Vec3 },
}

impl Shape {
    /// Distance along a unit-direction ray to the first surface crossing
    fn intersect(&self, ray: &GazeRay) -> Option<f32> {
        match *self {
            Shape::Sphere { center, radius } => {
                let oc = ray.origin - center;
                let b = oc.dot(ray.direction);
                let c = oc.length_squared() - radius * radius;
                let disc = b * b - c;
                if disc < 0.0 {
                    return None;
                }
                let sq = disc.sqrt();
                [-b - sq, -b + sq].into_iter().find(|t| *t >= 0.0)
            }
            Shape::Box { min, max } => {
                let inv = ray.direction.recip();
                let t1 = (min - ray.origin) * inv;
                let t2 = (max - ray.origin) * inv;
                let t_near = t1.min(t2).max_element();
                let t_far = t1.max(t2).min_element();
                if t_far < t_near.max(0.0) {
                    return None;
                }
                Some(if t_near >= 0.0 { t_near } else { t_far })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Collider {
    pub name: String,
    pub tag: Option<String>,
    pub shape: Shape,
}

impl Collider {
    pub fn new(name: impl Into<String>, shape: Shape) -> Self {
        Self {
            name: name.into(),
            tag: None,
            shape,
        }
    }

    pub fn tagged(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

/// A fixed set of colliders; the nearest hit wins
#[derive(Debug, Clone, Default)]
pub struct StaticScene {
    colliders: Vec<Collider>,
}

impl StaticScene {
    pub fn new(colliders: Vec<Collider>) -> Self {
        Self { colliders }
    }

    pub fn add(&mut self, collider: Collider) {
        self.colliders.push(collider);
    }

    pub fn len(&self) -> usize {
        self.colliders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colliders.is_empty()
    }
}

impl SceneQuery for StaticScene {
    fn raycast(&self, ray: &GazeRay) -> Option<SceneHit> {
        self.colliders
            .iter()
            .filter_map(|c| c.shape.intersect(ray).map(|t| (c, t)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(c, t)| SceneHit {
                name: c.name.clone(),
                tag: c.tag.clone(),
                point: ray.point_at(t),
                distance: t,
            })
    }
}

pub struct AoiRaycaster {
    scene: Box<dyn SceneQuery>,
    fixed_camera: Camera,
    aoi_tag: String,
}

impl AoiRaycaster {
    pub fn new(scene: Box<dyn SceneQuery>, fixed_camera: Camera, aoi_tag: impl Into<String>) -> Self {
        Self {
            scene,
            fixed_camera,
            aoi_tag: aoi_tag.into(),
        }
    }

    /// Resolve this frame's AOI. Misses and untagged hits are the neutral result.
    pub fn cast(&self, ray: &GazeRay) -> AoiHit {
        let Some(hit) = self.scene.raycast(ray) else {
            return AoiHit::none();
        };
        if hit.tag.as_deref() != Some(self.aoi_tag.as_str()) {
            log::debug!("Gaze on untagged object '{}'", hit.name);
            return AoiHit::none();
        }

        let screen_point = self.fixed_camera.world_to_screen(hit.point);
        log::debug!(
            "Current AOI: {}, hit point: {:?}, screen point: {:?}",
            hit.name,
            hit.point,
            screen_point
        );
        AoiHit {
            aoi_id: hit.name,
            world_point: hit.point,
            screen_point,
        }
    }
}
