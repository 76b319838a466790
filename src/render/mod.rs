//! Rendering: ordered draw passes into a shared colour buffer, followed by
//! the multi-resolution shadow pipeline.

pub mod compositor;
pub mod framebuffer;
pub mod shadow;

pub use compositor::{RenderCompositor, RenderScene};
pub use framebuffer::{Framebuffer, ScalarBuffer};
pub use shadow::{working_resolution, ShadowParams, ShadowPipeline};

use glam::{Vec2, Vec4};
use serde::{Deserialize, Serialize};

/// One draw pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RenderStep {
    Background,
    Fluids,
    RigidBodies,
    RigidBodySprings,
    Ui,
}

impl RenderStep {
    pub const DEFAULT_ORDER: [RenderStep; 5] = [
        RenderStep::Background,
        RenderStep::Fluids,
        RenderStep::RigidBodies,
        RenderStep::RigidBodySprings,
        RenderStep::Ui,
    ];

    /// Whether the pass writes into the shadow source buffer.
    pub fn casts_shadow(self) -> bool {
        matches!(self, RenderStep::Fluids | RenderStep::RigidBodies | RenderStep::RigidBodySprings)
    }
}

/// Shadow style. Every style except `None` ray-marches toward the light;
/// the blurred variants add the ping-pong blur.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShadowType {
    None,
    VerticalSharp,
    VerticalBlurred,
    DiagonalSharp,
    DiagonalBlurred,
    DirectionalSharp,
    #[default]
    DirectionalBlurred,
}

impl ShadowType {
    pub fn is_blurred(self) -> bool {
        matches!(self, ShadowType::VerticalBlurred | ShadowType::DiagonalBlurred | ShadowType::DirectionalBlurred)
    }

    /// Unit vector pointing toward the light, `None` when shadows are off.
    ///
    /// `angle_degrees` is only used by the directional styles.
    pub fn toward_light(self, angle_degrees: f32) -> Option<Vec2> {
        match self {
            ShadowType::None => None,
            ShadowType::VerticalSharp | ShadowType::VerticalBlurred => Some(Vec2::Y),
            ShadowType::DiagonalSharp | ShadowType::DiagonalBlurred => Some(Vec2::ONE.normalize()),
            ShadowType::DirectionalSharp | ShadowType::DirectionalBlurred => {
                Some(Vec2::from_angle(angle_degrees.to_radians()))
            }
        }
    }
}

/// A rectangle tinted by the UI pass. Not simulated.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorArea {
    pub min: Vec2,
    pub max: Vec2,
    /// Colour and opacity of the tint.
    pub tint: Vec4,
    /// Diagonal stripe spacing in world units; solid when `None`.
    pub stripes: Option<f32>,
}

impl SensorArea {
    pub fn contains(&self, p: Vec2) -> bool {
        p.cmpge(self.min).all() && p.cmplt(self.max).all()
    }

    /// Tint weight at `p`, zero outside the area and in the gaps between stripes.
    pub fn weight(&self, p: Vec2) -> f32 {
        if !self.contains(p) {
            return 0.0;
        }
        match self.stripes {
            Some(spacing) if spacing > 0.0 => {
                let phase = ((p.x + p.y) / spacing).rem_euclid(2.0);
                if phase < 1.0 { 1.0 } else { 0.0 }
            }
            _ => 1.0,
        }
    }
}
