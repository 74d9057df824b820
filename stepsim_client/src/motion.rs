//! Entity motion.
//!
//! The service sends discrete step targets at irregular cadence.
//! The client renders at its own rate and walks every entity toward its
//! latest target a bounded distance per tick.

use std::collections::BTreeMap;

use stepsim_shared::{
    math::Vec2,
    protocol::{Activity, Environment},
};

/// A tracked simulated actor.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: String,
    /// Current world position, advanced by ticks.
    pub position: Vec2,
    /// Latest target from the service.
    pub target: Vec2,
    /// Short label shown above the entity; empty until the service sends one.
    pub annotation: String,
    /// Raw description from the latest step that carried one.
    pub description: Option<String>,
    pub activity: Option<Activity>,
}

impl Entity {
    fn new(id: &str, position: Vec2) -> Self {
        Self {
            id: id.to_string(),
            position,
            target: position,
            annotation: String::new(),
            description: None,
            activity: None,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.position == self.target
    }
}

/// Position integrator for every tracked entity.
#[derive(Debug, Clone)]
pub struct EntityMotionEngine {
    entities: BTreeMap<String, Entity>,
    cell_size: f32,
}

impl EntityMotionEngine {
    pub fn new(cell_size: f32) -> Self {
        Self {
            entities: BTreeMap::new(),
            cell_size,
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Sets an entity's target. An unseen entity is created standing exactly on
    /// `position`; a known one keeps its current position and heads there.
    ///
    /// Returns true if the entity was created.
    pub fn set_target(&mut self, id: &str, position: Vec2) -> bool {
        match self.entities.get_mut(id) {
            Some(entity) => {
                entity.target = position;
                false
            }
            None => {
                self.entities
                    .insert(id.to_string(), Entity::new(id, position));
                true
            }
        }
    }

    pub fn set_annotation(&mut self, id: &str, annotation: &str) {
        if let Some(entity) = self.entities.get_mut(id) {
            entity.annotation = annotation.to_string();
        }
    }

    /// Stores the raw description and whatever activity parses out of it.
    /// A description without a location clears the previous activity.
    pub fn set_description(&mut self, id: &str, description: &str) {
        if let Some(entity) = self.entities.get_mut(id) {
            entity.activity = Activity::parse(description);
            entity.description = Some(description.to_string());
        }
    }

    /// Advances every entity toward its target by at most `max_step` per axis.
    pub fn tick(&mut self, max_step: f32) {
        for entity in self.entities.values_mut() {
            entity.position = entity.position.step_toward(entity.target, max_step);
        }
    }

    /// Drops every tracked entity.
    pub fn clear_all(&mut self) {
        self.entities.clear();
    }

    /// Grid cell of every entity's current position.
    ///
    /// This is what the next step request reports as the environment, so the
    /// service always sees what is actually on screen.
    pub fn snapshot(&self) -> Environment {
        self.entities
            .iter()
            .map(|(id, e)| (id.clone(), e.position.to_grid(self.cell_size)))
            .collect()
    }

    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// Iterates entities in id order.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// True when every entity has reached its target.
    pub fn is_settled(&self) -> bool {
        self.entities.values().all(Entity::is_settled)
    }
}
