//! The scope: a composable affine frame for shape placement.
//!
//! A scope carries a position, a rotation, and a non-uniform scale. It is
//! the unit of state the execution engine hands down a derivation tree:
//! every production node starts from a copy of its parent's scope and
//! mutates it through transform actions.
//!
//! Transform semantics:
//! - `translate` moves along the scope's local axes, scaled by the current
//!   scale (a unit step spans the scope's own extent)
//! - `translate_world` moves along the world axes, ignoring rotation and
//!   scale
//! - `rotate` re-normalizes the rotation axis against the anisotropic scale
//!   before composing, so rotations stay visually correct inside stretched
//!   scopes
//! - `subdivide` slices the scope into equal child scopes along one axis

use glam::{DMat4, DQuat, DVec3, EulerRot};

use crate::{Scalar, NEAR_ZERO};

// ---------------------------------------------------------------------------
// Axis
// ---------------------------------------------------------------------------

/// A principal axis of a scope, used for subdivision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    /// Unit vector along this axis.
    #[must_use]
    pub const fn unit(self) -> DVec3 {
        match self {
            Self::X => DVec3::X,
            Self::Y => DVec3::Y,
            Self::Z => DVec3::Z,
        }
    }
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// A placement frame: position, rotation, and non-uniform scale.
///
/// Scopes are plain value objects; copies are independent.
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    /// World-space position of the frame origin.
    pub position: DVec3,
    /// Orientation (unit quaternion).
    pub rotation: DQuat,
    /// Per-axis scale.
    pub scale: DVec3,
}

impl Default for Scope {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Scope {
    /// The identity scope: origin, no rotation, unit scale.
    pub const IDENTITY: Self = Self {
        position: DVec3::ZERO,
        rotation: DQuat::IDENTITY,
        scale: DVec3::ONE,
    };

    /// Create a scope from its three components.
    #[must_use]
    pub const fn new(position: DVec3, rotation: DQuat, scale: DVec3) -> Self {
        Self {
            position,
            rotation,
            scale,
        }
    }

    /// Translate along the scope's local axes.
    ///
    /// The translation is scaled by the current scale before being rotated
    /// into world space: a step of 1 moves by one current scope extent.
    pub fn translate(&mut self, v: DVec3) {
        self.position += self.rotation * (v * self.scale);
    }

    /// Translate along the world axes, ignoring rotation and scale.
    pub fn translate_world(&mut self, v: DVec3) {
        self.position += v;
    }

    /// Overwrite the position.
    pub fn set_position(&mut self, position: DVec3) {
        self.position = position;
    }

    /// Rotate by Euler angles in degrees.
    pub fn rotate_euler(&mut self, degrees: DVec3) {
        let q = DQuat::from_euler(
            EulerRot::ZXY,
            degrees.z.to_radians(),
            degrees.x.to_radians(),
            degrees.y.to_radians(),
        );
        self.rotate(q);
    }

    /// Compose a rotation onto the scope.
    ///
    /// The rotation axis is re-normalized against the anisotropic scale
    /// (each component weighted by the product of the other two scale
    /// components) so that rotating a stretched scope does not shear its
    /// contents. A degenerate corrected axis leaves the scope unchanged.
    pub fn rotate(&mut self, q: DQuat) {
        let (axis, angle) = q.to_axis_angle();
        if angle.abs() < NEAR_ZERO {
            return;
        }
        let s = self.scale;
        let corrected = axis * DVec3::new(s.y * s.z, s.x * s.z, s.x * s.y);
        if corrected.length_squared() < NEAR_ZERO {
            return;
        }
        self.rotation *= DQuat::from_axis_angle(corrected.normalize(), angle);
    }

    /// Overwrite the rotation.
    pub fn set_rotation(&mut self, rotation: DQuat) {
        self.rotation = rotation;
    }

    /// Scale relative to the current scale (componentwise multiply).
    pub fn scale_by(&mut self, v: DVec3) {
        self.scale *= v;
    }

    /// Overwrite the scale.
    pub fn set_scale(&mut self, v: DVec3) {
        self.scale = v;
    }

    /// The scope as a TRS matrix.
    #[must_use]
    pub fn matrix(&self) -> DMat4 {
        DMat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    /// Subdivide evenly into `divisions` child scopes along `axis`.
    ///
    /// Child `i` sits at the center of the `i`-th slice of the parent and
    /// spans `1/divisions` of the parent extent along the subdivision axis.
    #[must_use]
    pub fn subdivide(&self, divisions: usize, axis: Axis) -> Vec<Self> {
        if divisions == 0 {
            return Vec::new();
        }

        let dir = axis.unit();
        let rel = 1.0 / divisions as Scalar;
        let shrink = DVec3::ONE - dir * (1.0 - rel);

        let mut children = Vec::with_capacity(divisions);
        for i in 0..divisions {
            let mut child = self.clone();
            let t = (i as Scalar * rel - 0.5 + rel / 2.0) * dir;
            child.translate(t);
            child.scale_by(shrink);
            children.push(child);
        }
        children
    }

    /// Componentwise approximate equality within `eps`.
    #[must_use]
    pub fn approx_eq(&self, other: &Self, eps: Scalar) -> bool {
        self.position.abs_diff_eq(other.position, eps)
            && self.scale.abs_diff_eq(other.scale, eps)
            // q and -q are the same orientation
            && (self.rotation.abs_diff_eq(other.rotation, eps)
                || self.rotation.abs_diff_eq(-other.rotation, eps))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EPSILON;

    // -- translation --

    #[test]
    fn translate_identity() {
        let mut s = Scope::IDENTITY;
        s.translate(DVec3::new(1.0, 2.0, 3.0));
        assert!(s.position.abs_diff_eq(DVec3::new(1.0, 2.0, 3.0), EPSILON));
    }

    #[test]
    fn translate_respects_scale() {
        let mut s = Scope::IDENTITY;
        s.scale_by(DVec3::new(2.0, 1.0, 1.0));
        s.translate(DVec3::X);
        assert!(s.position.abs_diff_eq(DVec3::new(2.0, 0.0, 0.0), EPSILON));
    }

    #[test]
    fn translate_respects_rotation() {
        let mut s = Scope::IDENTITY;
        // 90 degrees about z: local +x becomes world +y
        s.rotate_euler(DVec3::new(0.0, 0.0, 90.0));
        s.translate(DVec3::X);
        assert!(s.position.abs_diff_eq(DVec3::new(0.0, 1.0, 0.0), 1e-9));
    }

    #[test]
    fn translate_world_ignores_rotation_and_scale() {
        let mut s = Scope::IDENTITY;
        s.rotate_euler(DVec3::new(0.0, 0.0, 90.0));
        s.scale_by(DVec3::splat(5.0));
        s.translate_world(DVec3::X);
        assert!(s.position.abs_diff_eq(DVec3::X, EPSILON));
    }

    // -- rotation --

    #[test]
    fn rotate_composes() {
        let mut s = Scope::IDENTITY;
        s.rotate_euler(DVec3::new(0.0, 0.0, 45.0));
        s.rotate_euler(DVec3::new(0.0, 0.0, 45.0));
        let p = s.rotation * DVec3::X;
        assert!(p.abs_diff_eq(DVec3::Y, 1e-9));
    }

    #[test]
    fn rotate_zero_angle_is_noop() {
        let mut s = Scope::IDENTITY;
        s.rotate(DQuat::IDENTITY);
        assert_eq!(s, Scope::IDENTITY);
    }

    #[test]
    fn rotate_uniform_scale_unchanged_axis() {
        // Uniform scale must not alter the rotation axis
        let mut a = Scope::IDENTITY;
        let mut b = Scope::IDENTITY;
        b.scale_by(DVec3::splat(3.0));
        a.rotate_euler(DVec3::new(0.0, 90.0, 0.0));
        b.rotate_euler(DVec3::new(0.0, 90.0, 0.0));
        assert!(a.rotation.abs_diff_eq(b.rotation, 1e-9));
    }

    #[test]
    fn rotate_degenerate_scale_is_noop() {
        let mut s = Scope::IDENTITY;
        s.set_scale(DVec3::new(1.0, 0.0, 0.0));
        // axis correction weights collapse to zero for a rotation about x
        let before = s.rotation;
        s.rotate_euler(DVec3::new(90.0, 0.0, 0.0));
        assert!(s.rotation.abs_diff_eq(before, EPSILON));
    }

    // -- scale --

    #[test]
    fn scale_by_is_relative() {
        let mut s = Scope::IDENTITY;
        s.scale_by(DVec3::new(2.0, 3.0, 4.0));
        s.scale_by(DVec3::new(2.0, 1.0, 0.5));
        assert!(s.scale.abs_diff_eq(DVec3::new(4.0, 3.0, 2.0), EPSILON));
    }

    #[test]
    fn set_scale_is_absolute() {
        let mut s = Scope::IDENTITY;
        s.scale_by(DVec3::splat(7.0));
        s.set_scale(DVec3::new(1.0, 2.0, 3.0));
        assert!(s.scale.abs_diff_eq(DVec3::new(1.0, 2.0, 3.0), EPSILON));
    }

    // -- matrix --

    #[test]
    fn matrix_roundtrips_components() {
        let s = Scope::new(
            DVec3::new(1.0, 2.0, 3.0),
            DQuat::from_euler(EulerRot::ZXY, 0.3, 0.2, 0.1),
            DVec3::new(2.0, 2.0, 2.0),
        );
        let (scale, rotation, translation) = s.matrix().to_scale_rotation_translation();
        assert!(scale.abs_diff_eq(s.scale, 1e-9));
        assert!(translation.abs_diff_eq(s.position, 1e-9));
        assert!(rotation.abs_diff_eq(s.rotation, 1e-9) || rotation.abs_diff_eq(-s.rotation, 1e-9));
    }

    // -- subdivision --

    #[test]
    fn subdivide_zero_is_empty() {
        assert!(Scope::IDENTITY.subdivide(0, Axis::X).is_empty());
    }

    #[test]
    fn subdivide_counts_and_scale() {
        let children = Scope::IDENTITY.subdivide(4, Axis::X);
        assert_eq!(children.len(), 4);
        for c in &children {
            assert!(c.scale.abs_diff_eq(DVec3::new(0.25, 1.0, 1.0), EPSILON));
        }
    }

    #[test]
    fn subdivide_centers_are_even() {
        let children = Scope::IDENTITY.subdivide(2, Axis::X);
        assert!(children[0].position.abs_diff_eq(DVec3::new(-0.25, 0.0, 0.0), EPSILON));
        assert!(children[1].position.abs_diff_eq(DVec3::new(0.25, 0.0, 0.0), EPSILON));
    }

    #[test]
    fn subdivide_single_child_covers_parent() {
        let children = Scope::IDENTITY.subdivide(1, Axis::Z);
        assert_eq!(children.len(), 1);
        assert!(children[0].approx_eq(&Scope::IDENTITY, EPSILON));
    }

    #[test]
    fn subdivide_respects_parent_frame() {
        let mut parent = Scope::IDENTITY;
        parent.translate(DVec3::new(10.0, 0.0, 0.0));
        parent.scale_by(DVec3::new(4.0, 1.0, 1.0));
        let children = parent.subdivide(2, Axis::X);
        // slices sit at +-1 around the parent center, scaled by parent extent
        assert!(children[0].position.abs_diff_eq(DVec3::new(9.0, 0.0, 0.0), EPSILON));
        assert!(children[1].position.abs_diff_eq(DVec3::new(11.0, 0.0, 0.0), EPSILON));
        for c in &children {
            assert!(c.scale.abs_diff_eq(DVec3::new(2.0, 1.0, 1.0), EPSILON));
        }
    }

    // -- approx_eq --

    #[test]
    fn approx_eq_negated_quaternion() {
        let a = Scope::IDENTITY;
        let mut b = Scope::IDENTITY;
        b.rotation = -b.rotation;
        assert!(a.approx_eq(&b, EPSILON));
    }
}
