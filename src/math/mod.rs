//! Scalar type, 3D vector alias and dense 3D array used throughout the engine.

use nalgebra::{Unit, UnitQuaternion, Vector3};

/// Floating point type for all geometry and energies, fixed at build time.
#[cfg(not(feature = "f32"))]
pub type Fl = f64;
#[cfg(feature = "f32")]
pub type Fl = f32;

pub const PI: Fl = std::f64::consts::PI as Fl;

/// Three-component coordinate / direction vector.
pub type Vec3 = Vector3<Fl>;

/// Squared Euclidean distance between two coordinates.
#[inline]
pub fn distance_sqr(a: &Vec3, b: &Vec3) -> Fl {
    (a - b).norm_squared()
}

/// Converts a rotation vector (axis scaled by angle in radians) into a unit
/// quaternion. A near-zero vector maps to the identity rotation.
pub fn rotation_vector_to_quaternion(v: &Vec3) -> UnitQuaternion<Fl> {
    let angle = v.norm();
    if angle > 1e-10 {
        UnitQuaternion::from_axis_angle(&Unit::new_normalize(*v), angle)
    } else {
        UnitQuaternion::identity()
    }
}

/// A dense 3D array stored as a flattened row-major vector, x slowest.
#[derive(Debug, Clone, PartialEq)]
pub struct Array3d<T> {
    dims: [usize; 3],
    data: Vec<T>,
}

impl<T: Clone + Default> Array3d<T> {
    /// Creates an array of the given dimensions filled with `T::default()`.
    pub fn new(dims: [usize; 3]) -> Self {
        Self {
            dims,
            data: vec![T::default(); dims[0] * dims[1] * dims[2]],
        }
    }
}

impl<T> Array3d<T> {
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Linear index of `(x, y, z)`: `(x * ny + y) * nz + z`.
    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        debug_assert!(x < self.dims[0] && y < self.dims[1] && z < self.dims[2]);
        (x * self.dims[1] + y) * self.dims[2] + z
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> &T {
        &self.data[self.index(x, y, z)]
    }

    #[inline]
    pub fn get_mut(&mut self, x: usize, y: usize, z: usize) -> &mut T {
        let i = self.index(x, y, z);
        &mut self.data[i]
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Mutable view of the contiguous `(y, z)` plane at slab `x`.
    pub fn slab_mut(&mut self, x: usize) -> &mut [T] {
        let len = self.dims[1] * self.dims[2];
        let start = x * len;
        &mut self.data[start..start + len]
    }
}
