//! Solids and the arena that owns them during an evaluation
//!
//! Scripts never hold geometry directly. Every constructor and operation
//! allocates a [`Shape`] in the [`ShapeArena`] and hands the script a small
//! [`Solid`] handle. The arena is cleared after each evaluation, which is the
//! kernel's per-evaluation cleanup step; handles from an earlier evaluation
//! are rejected.

use crate::error::{KernelError, Result};
use serde::{Deserialize, Serialize};

/// Handle to a shape allocated in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Solid {
    index: usize,
    epoch: u64,
}

/// Constructive solid geometry tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Shape {
    // Primitives
    Cuboid {
        size: [f64; 3],
    },
    Sphere {
        radius: f64,
    },
    Cylinder {
        radius: f64,
        height: f64,
    },
    Torus {
        major_radius: f64,
        minor_radius: f64,
    },

    // Transforms
    Translate {
        offset: [f64; 3],
        shape: Box<Shape>,
    },
    Rotate {
        degrees: [f64; 3],
        shape: Box<Shape>,
    },
    Scale {
        factor: [f64; 3],
        shape: Box<Shape>,
    },

    // Appearance
    Color {
        rgb: [f64; 3],
        shape: Box<Shape>,
    },

    // Boolean operations
    Union {
        a: Box<Shape>,
        b: Box<Shape>,
    },
    Subtract {
        a: Box<Shape>,
        b: Box<Shape>,
    },
    Intersect {
        a: Box<Shape>,
        b: Box<Shape>,
    },
}

impl Shape {
    /// Number of primitive leaves in the tree
    pub fn primitive_count(&self) -> usize {
        match self {
            Self::Cuboid { .. }
            | Self::Sphere { .. }
            | Self::Cylinder { .. }
            | Self::Torus { .. } => 1,
            Self::Translate { shape, .. }
            | Self::Rotate { shape, .. }
            | Self::Scale { shape, .. }
            | Self::Color { shape, .. } => shape.primitive_count(),
            Self::Union { a, b } | Self::Subtract { a, b } | Self::Intersect { a, b } => {
                a.primitive_count() + b.primitive_count()
            }
        }
    }
}

/// Storage for every shape allocated during one evaluation
#[derive(Debug, Default)]
pub struct ShapeArena {
    shapes: Vec<Shape>,
    epoch: u64,
}

impl ShapeArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a shape and return its handle
    pub fn alloc(&mut self, shape: Shape) -> Solid {
        self.shapes.push(shape);
        Solid {
            index: self.shapes.len() - 1,
            epoch: self.epoch,
        }
    }

    /// Look up the shape behind a handle
    pub fn get(&self, solid: Solid) -> Result<&Shape> {
        if solid.epoch != self.epoch {
            return Err(KernelError::StaleSolid(solid.index));
        }
        self.shapes
            .get(solid.index)
            .ok_or(KernelError::StaleSolid(solid.index))
    }

    /// Clone the shape behind a handle out of the arena
    pub fn resolve(&self, solid: Solid) -> Result<Shape> {
        self.get(solid).cloned()
    }

    /// Free every shape and invalidate outstanding handles
    ///
    /// Returns the number of shapes released.
    pub fn release(&mut self) -> usize {
        let freed = self.shapes.len();
        self.shapes.clear();
        self.epoch += 1;
        freed
    }

    /// Number of shapes currently allocated
    pub fn live(&self) -> usize {
        self.shapes.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_resolve() {
        let mut arena = ShapeArena::new();
        let ball = arena.alloc(Shape::Sphere { radius: 1.0 });
        assert_eq!(arena.live(), 1);
        assert_eq!(arena.resolve(ball).unwrap(), Shape::Sphere { radius: 1.0 });
    }

    #[test]
    fn test_release_invalidates_handles() {
        let mut arena = ShapeArena::new();
        let ball = arena.alloc(Shape::Sphere { radius: 1.0 });
        assert_eq!(arena.release(), 1);
        assert_eq!(arena.live(), 0);

        // Same index, new epoch
        let cube = arena.alloc(Shape::Cuboid { size: [1.0; 3] });
        assert!(matches!(arena.get(ball), Err(KernelError::StaleSolid(0))));
        assert!(arena.get(cube).is_ok());
    }

    #[test]
    fn test_primitive_count() {
        let shape = Shape::Subtract {
            a: Box::new(Shape::Cuboid { size: [2.0; 3] }),
            b: Box::new(Shape::Translate {
                offset: [0.5, 0.0, 0.0],
                shape: Box::new(Shape::Union {
                    a: Box::new(Shape::Sphere { radius: 0.2 }),
                    b: Box::new(Shape::Sphere { radius: 0.3 }),
                }),
            }),
        };
        assert_eq!(shape.primitive_count(), 3);
    }
}
