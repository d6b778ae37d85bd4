use nalgebra::{Matrix4, Vector3};
use serde::{Deserialize, Serialize};

// Re-export shared types from tenon-types
pub use tenon_types::{IndexedName, MappedElement, MappedName, OpCode, ShapeKind};

/// Geometric signature of a topological entity, used for coincidence
/// search when name-based tracing fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementSignature {
    /// Surface/curve type (planar, cylindrical, line, circle, point, ...).
    pub surface_type: Option<String>,
    /// Centroid position, in the shape's local frame.
    pub centroid: [f64; 3],
    /// Outward normal at centroid (faces only).
    pub normal: Option<[f64; 3]>,
    /// Area for faces, length for edges, zero for vertices.
    pub size: f64,
}

impl ElementSignature {
    pub fn point(p: [f64; 3]) -> Self {
        Self {
            surface_type: Some("point".to_string()),
            centroid: p,
            normal: None,
            size: 0.0,
        }
    }

    pub fn curve(kind: &str, centroid: [f64; 3], length: f64) -> Self {
        Self {
            surface_type: Some(kind.to_string()),
            centroid,
            normal: None,
            size: length,
        }
    }

    pub fn surface(kind: &str, centroid: [f64; 3], normal: [f64; 3], area: f64) -> Self {
        Self {
            surface_type: Some(kind.to_string()),
            centroid,
            normal: Some(normal),
            size: area,
        }
    }

    /// Signature mapped through a placement.
    pub fn transformed(&self, mat: &Matrix4<f64>) -> Self {
        let c = mat.transform_point(&nalgebra::Point3::new(
            self.centroid[0],
            self.centroid[1],
            self.centroid[2],
        ));
        let normal = self.normal.map(|n| {
            let v = mat.transform_vector(&Vector3::new(n[0], n[1], n[2]));
            let len = v.norm();
            if len > 1e-12 {
                [v.x / len, v.y / len, v.z / len]
            } else {
                n
            }
        });
        let s = uniform_scale(mat);
        let size = match self.normal {
            Some(_) => self.size * s * s,
            None if self.size > 0.0 => self.size * s,
            None => 0.0,
        };
        Self {
            surface_type: self.surface_type.clone(),
            centroid: [c.x, c.y, c.z],
            normal,
            size,
        }
    }

    /// Coincidence test within a positional tolerance and an angular
    /// tolerance (radians, applied to normals when both sides have one).
    pub fn coincides(&self, other: &Self, check_geometry: bool, tol: f64, atol: f64) -> bool {
        let d = distance(self.centroid, other.centroid);
        if d > tol {
            return false;
        }
        if let (Some(a), Some(b)) = (self.normal, other.normal) {
            let dot = (a[0] * b[0] + a[1] * b[1] + a[2] * b[2]).clamp(-1.0, 1.0);
            if dot.acos().min((-dot).acos()) > atol {
                return false;
            }
        }
        if check_geometry {
            if self.surface_type != other.surface_type {
                return false;
            }
            let ref_size = self.size.abs().max(other.size.abs());
            if ref_size > tol && (self.size - other.size).abs() > ref_size * 1e-6 + tol {
                return false;
            }
        }
        true
    }
}

fn distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    (dx * dx + dy * dy + dz * dz).sqrt()
}

/// Whether a placement matrix carries a scaling component.
pub fn has_scale(mat: &Matrix4<f64>) -> bool {
    for col in 0..3 {
        let v = mat.column(col);
        let n = Vector3::new(v[0], v[1], v[2]).norm();
        if (n - 1.0).abs() > 1e-9 {
            return true;
        }
    }
    false
}

/// Approximate uniform scale factor of a placement.
pub fn uniform_scale(mat: &Matrix4<f64>) -> f64 {
    let mut s = 0.0;
    for col in 0..3 {
        let v = mat.column(col);
        s += Vector3::new(v[0], v[1], v[2]).norm();
    }
    s / 3.0
}

/// Errors from kernel operations. These are the only failures this layer
/// raises; out-of-range lookups answer with empty results instead.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KernelError {
    #[error("boolean operation failed: {reason}")]
    BooleanFailed { reason: String },

    #[error("chamfer failed: {reason}")]
    ChamferFailed { reason: String },

    #[error("fillet failed: {reason}")]
    FilletFailed { reason: String },

    #[error("transform failed: {reason}")]
    TransformFailed { reason: String },

    #[error("shape repair failed: {reason}")]
    FixFailed { reason: String },

    #[error("kernel error: {message}")]
    Other { message: String },
}
