//! Bake input description (JSON).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::BakeSettings;
use crate::util::{Error, Result, Vec3};
use crate::world::{Environment, Light, Material, Triangle};

/// Indexed triangle mesh in world space.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshInput {
    pub positions: Vec<Vec3>,
    /// Three indices per triangle, counter-clockwise front faces
    pub indices: Vec<u32>,
    pub material: u32,
}

/// Everything a probe bake consumes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BakeInput {
    pub meshes: Vec<MeshInput>,
    /// Empty means every mesh uses the default material
    pub materials: Vec<Material>,
    pub lights: Vec<Light>,
    pub environment: Environment,
    pub probe_positions: Vec<Vec3>,
    pub settings: BakeSettings,
}

impl BakeInput {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn probe_count(&self) -> usize {
        self.probe_positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.meshes.iter().map(|m| m.indices.len() / 3).sum()
    }

    /// Reject inputs that cannot be baked.
    pub fn validate(&self) -> Result<()> {
        self.settings.validate()?;
        let material_count = self.materials.len().max(1);

        for (i, mesh) in self.meshes.iter().enumerate() {
            if mesh.indices.len() % 3 != 0 {
                return Err(Error::invalid(format!(
                    "mesh {}: {} indices is not a multiple of 3",
                    i,
                    mesh.indices.len()
                )));
            }
            if let Some(&bad) = mesh.indices.iter().find(|&&ix| ix as usize >= mesh.positions.len()) {
                return Err(Error::invalid(format!(
                    "mesh {}: index {} out of range ({} positions)",
                    i,
                    bad,
                    mesh.positions.len()
                )));
            }
            if !mesh.positions.iter().all(|p| p.is_finite()) {
                return Err(Error::invalid(format!("mesh {}: non-finite vertex position", i)));
            }
            if mesh.material as usize >= material_count {
                return Err(Error::invalid(format!(
                    "mesh {}: material {} out of range ({} materials)",
                    i, mesh.material, material_count
                )));
            }
        }

        if let Some(i) = self.probe_positions.iter().position(|p| !p.is_finite()) {
            return Err(Error::invalid(format!("probe {}: non-finite position", i)));
        }
        if self.probe_positions.len() > u32::MAX as usize {
            return Err(Error::invalid("too many probes"));
        }
        for (i, light) in self.lights.iter().enumerate() {
            let finite = match *light {
                Light::Directional { direction, color, intensity, radius } => {
                    direction.is_finite()
                        && direction != Vec3::ZERO
                        && color.is_finite()
                        && intensity.is_finite()
                        && radius.is_finite()
                }
                Light::Point { position, color, intensity, radius } => {
                    position.is_finite() && color.is_finite() && intensity.is_finite() && radius.is_finite()
                }
            };
            if !finite {
                return Err(Error::invalid(format!("light {}: invalid parameters", i)));
            }
        }
        Ok(())
    }

    /// Materials with the default filled in when none are given.
    pub(crate) fn materials_or_default(&self) -> Vec<Material> {
        if self.materials.is_empty() {
            vec![Material::default()]
        } else {
            self.materials.clone()
        }
    }

    /// Flattened world-space triangles; degenerate ones are dropped.
    pub(crate) fn triangles(&self) -> Vec<Triangle> {
        let mut out = Vec::with_capacity(self.triangle_count());
        for mesh in &self.meshes {
            for tri in mesh.indices.chunks_exact(3) {
                let t = Triangle {
                    v0: mesh.positions[tri[0] as usize],
                    v1: mesh.positions[tri[1] as usize],
                    v2: mesh.positions[tri[2] as usize],
                    material: mesh.material,
                };
                if t.normal() != Vec3::ZERO {
                    out.push(t);
                }
            }
        }
        out
    }
}
