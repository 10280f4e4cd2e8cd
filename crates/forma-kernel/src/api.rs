//! Rhai API for solid construction
//!
//! Every function allocates into the shared [`ShapeArena`]; scripts only see
//! [`Solid`] handles.

use crate::error::KernelError;
use crate::solid::{Shape, ShapeArena, Solid};
use parking_lot::Mutex;
use rhai::{Engine, EvalAltResult};
use std::sync::Arc;

pub(crate) type Arena = Arc<Mutex<ShapeArena>>;

type FnResult<T> = Result<T, Box<EvalAltResult>>;

fn to_rhai(err: KernelError) -> Box<EvalAltResult> {
    err.to_string().into()
}

fn positive(what: &str, value: f64) -> FnResult<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(to_rhai(KernelError::Geometry(format!(
            "{what} must be positive, got {value}"
        ))))
    }
}

fn finite(what: &str, values: [f64; 3]) -> FnResult<[f64; 3]> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(values)
    } else {
        Err(to_rhai(KernelError::Geometry(format!(
            "{what} must be finite, got {values:?}"
        ))))
    }
}

/// Parse "#rrggbb" or "rrggbb" into 0-1 RGB
fn parse_hex_color(hex: &str) -> Option<[f64; 3]> {
    let hex = hex.trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }

    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;

    Some([r as f64 / 255.0, g as f64 / 255.0, b as f64 / 255.0])
}

fn alloc(arena: &Arena, shape: Shape) -> Solid {
    arena.lock().alloc(shape)
}

/// Wrap an existing solid in a new node
fn derive(arena: &Arena, solid: Solid, wrap: impl FnOnce(Box<Shape>) -> Shape) -> FnResult<Solid> {
    let mut arena = arena.lock();
    let inner = arena.resolve(solid).map_err(to_rhai)?;
    Ok(arena.alloc(wrap(Box::new(inner))))
}

/// Combine two solids into a boolean node
fn combine(
    arena: &Arena,
    a: Solid,
    b: Solid,
    op: impl FnOnce(Box<Shape>, Box<Shape>) -> Shape,
) -> FnResult<Solid> {
    let mut arena = arena.lock();
    let a = arena.resolve(a).map_err(to_rhai)?;
    let b = arena.resolve(b).map_err(to_rhai)?;
    Ok(arena.alloc(op(Box::new(a), Box::new(b))))
}

/// Register all solid constructors and operations
pub(crate) fn register_solid_api(engine: &mut Engine, arena: &Arena) {
    let a = Arc::clone(arena);
    engine
        .register_type_with_name::<Solid>("Solid")
        .register_fn("to_string", move |s: &mut Solid| match a.lock().get(*s) {
            Ok(shape) => format!("{shape:?}"),
            Err(e) => e.to_string(),
        });

    register_primitives(engine, arena);
    register_transforms(engine, arena);
    register_booleans(engine, arena);

    // === Math helpers ===
    engine.register_fn("PI", || std::f64::consts::PI);
    engine.register_fn("TAU", || std::f64::consts::TAU);
}

fn register_primitives(engine: &mut Engine, arena: &Arena) {
    let a = Arc::clone(arena);
    engine.register_fn("cube", move |size: f64| -> FnResult<Solid> {
        let size = positive("cube size", size)?;
        Ok(alloc(&a, Shape::Cuboid { size: [size; 3] }))
    });

    let a = Arc::clone(arena);
    engine.register_fn("box3", move |x: f64, y: f64, z: f64| -> FnResult<Solid> {
        let size = [
            positive("box width", x)?,
            positive("box height", y)?,
            positive("box depth", z)?,
        ];
        Ok(alloc(&a, Shape::Cuboid { size }))
    });

    let a = Arc::clone(arena);
    engine.register_fn("sphere", move |radius: f64| -> FnResult<Solid> {
        let radius = positive("sphere radius", radius)?;
        Ok(alloc(&a, Shape::Sphere { radius }))
    });

    let a = Arc::clone(arena);
    engine.register_fn("cylinder", move |radius: f64, height: f64| -> FnResult<Solid> {
        let radius = positive("cylinder radius", radius)?;
        let height = positive("cylinder height", height)?;
        Ok(alloc(&a, Shape::Cylinder { radius, height }))
    });

    let a = Arc::clone(arena);
    engine.register_fn("torus", move |major: f64, minor: f64| -> FnResult<Solid> {
        let major_radius = positive("torus major radius", major)?;
        let minor_radius = positive("torus minor radius", minor)?;
        if minor_radius >= major_radius {
            return Err(to_rhai(KernelError::Geometry(format!(
                "torus minor radius {minor_radius} must be smaller than major radius {major_radius}"
            ))));
        }
        Ok(alloc(
            &a,
            Shape::Torus {
                major_radius,
                minor_radius,
            },
        ))
    });
}

fn register_transforms(engine: &mut Engine, arena: &Arena) {
    let a = Arc::clone(arena);
    engine.register_fn(
        "translate",
        move |s: &mut Solid, x: f64, y: f64, z: f64| -> FnResult<Solid> {
            let offset = finite("translation", [x, y, z])?;
            derive(&a, *s, |shape| Shape::Translate { offset, shape })
        },
    );

    // Angles in degrees, applied X then Y then Z
    let a = Arc::clone(arena);
    engine.register_fn(
        "rotate",
        move |s: &mut Solid, x: f64, y: f64, z: f64| -> FnResult<Solid> {
            let degrees = finite("rotation", [x, y, z])?;
            derive(&a, *s, |shape| Shape::Rotate { degrees, shape })
        },
    );

    let a = Arc::clone(arena);
    engine.register_fn("scale", move |s: &mut Solid, factor: f64| -> FnResult<Solid> {
        let factor = positive("scale factor", factor)?;
        derive(&a, *s, |shape| Shape::Scale {
            factor: [factor; 3],
            shape,
        })
    });

    let a = Arc::clone(arena);
    engine.register_fn(
        "scale",
        move |s: &mut Solid, x: f64, y: f64, z: f64| -> FnResult<Solid> {
            let factor = [
                positive("scale x", x)?,
                positive("scale y", y)?,
                positive("scale z", z)?,
            ];
            derive(&a, *s, |shape| Shape::Scale { factor, shape })
        },
    );

    let a = Arc::clone(arena);
    engine.register_fn("color", move |s: &mut Solid, hex: &str| -> FnResult<Solid> {
        let rgb = parse_hex_color(hex).ok_or_else(|| {
            to_rhai(KernelError::Geometry(format!("invalid color '{hex}'")))
        })?;
        derive(&a, *s, |shape| Shape::Color { rgb, shape })
    });

    let a = Arc::clone(arena);
    engine.register_fn(
        "color",
        move |s: &mut Solid, r: f64, g: f64, b: f64| -> FnResult<Solid> {
            let rgb = [r.clamp(0.0, 1.0), g.clamp(0.0, 1.0), b.clamp(0.0, 1.0)];
            derive(&a, *s, |shape| Shape::Color { rgb, shape })
        },
    );
}

fn register_booleans(engine: &mut Engine, arena: &Arena) {
    let a = Arc::clone(arena);
    engine.register_fn("union", move |s: &mut Solid, other: Solid| -> FnResult<Solid> {
        combine(&a, *s, other, |a, b| Shape::Union { a, b })
    });

    let a = Arc::clone(arena);
    engine.register_fn("subtract", move |s: &mut Solid, other: Solid| -> FnResult<Solid> {
        combine(&a, *s, other, |a, b| Shape::Subtract { a, b })
    });

    let a = Arc::clone(arena);
    engine.register_fn("intersect", move |s: &mut Solid, other: Solid| -> FnResult<Solid> {
        combine(&a, *s, other, |a, b| Shape::Intersect { a, b })
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("#ff0000"), Some([1.0, 0.0, 0.0]));
        assert_eq!(parse_hex_color("00ff00"), Some([0.0, 1.0, 0.0]));
        assert_eq!(parse_hex_color("#fff"), None);
        assert_eq!(parse_hex_color("#gg0000"), None);
    }

    #[test]
    fn test_positive_rejects_degenerate_sizes() {
        assert!(positive("size", 1.0).is_ok());
        assert!(positive("size", 0.0).is_err());
        assert!(positive("size", -2.0).is_err());
        assert!(positive("size", f64::NAN).is_err());
    }
}
