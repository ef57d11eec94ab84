//! Vertex data structures and input descriptions.
//!
//! # Vertex Types
//!
//! - [`VertexPtn`] - position, texture coordinate, normal (mesh loaders hand these over)
//! - [`VertexPctn`] - position, color, texture coordinate, normal

use std::mem::offset_of;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// A vertex layout usable as pipeline vertex input on binding 0.
pub trait VertexLayout: Pod {
    /// Number of vertex attributes.
    const ATTRIBUTE_COUNT: usize;

    /// Binding 0, per-vertex input rate, stride of `Self`.
    fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription>;
}

fn attribute(location: u32, format: vk::Format, offset: usize) -> vk::VertexInputAttributeDescription {
    vk::VertexInputAttributeDescription {
        binding: 0,
        location,
        format,
        offset: offset as u32,
    }
}

/// Position, texture coordinate and normal.
///
/// # Shader Locations
///
/// - location 0: position (vec3)
/// - location 1: tex_coord (vec2)
/// - location 2: normal (vec3)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct VertexPtn {
    pub position: Vec3,
    pub tex_coord: Vec2,
    pub normal: Vec3,
}

impl VertexPtn {
    #[inline]
    pub const fn new(position: Vec3, tex_coord: Vec2, normal: Vec3) -> Self {
        Self {
            position,
            tex_coord,
            normal,
        }
    }
}

impl VertexLayout for VertexPtn {
    const ATTRIBUTE_COUNT: usize = 3;

    fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Self, position)),
            attribute(1, vk::Format::R32G32_SFLOAT, offset_of!(Self, tex_coord)),
            attribute(2, vk::Format::R32G32B32_SFLOAT, offset_of!(Self, normal)),
        ]
    }
}

/// Position, vertex color, texture coordinate and normal.
///
/// # Shader Locations
///
/// - location 0: position (vec3)
/// - location 1: color (vec3)
/// - location 2: tex_coord (vec2)
/// - location 3: normal (vec3)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct VertexPctn {
    pub position: Vec3,
    pub color: Vec3,
    pub tex_coord: Vec2,
    pub normal: Vec3,
}

impl VertexPctn {
    #[inline]
    pub const fn new(position: Vec3, color: Vec3, tex_coord: Vec2, normal: Vec3) -> Self {
        Self {
            position,
            color,
            tex_coord,
            normal,
        }
    }
}

impl VertexLayout for VertexPctn {
    const ATTRIBUTE_COUNT: usize = 4;

    fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Self, position)),
            attribute(1, vk::Format::R32G32B32_SFLOAT, offset_of!(Self, color)),
            attribute(2, vk::Format::R32G32_SFLOAT, offset_of!(Self, tex_coord)),
            attribute(3, vk::Format::R32G32B32_SFLOAT, offset_of!(Self, normal)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ptn_layout() {
        // 3 + 2 + 3 floats
        assert_eq!(std::mem::size_of::<VertexPtn>(), 32);

        let binding = VertexPtn::binding_description();
        assert_eq!(binding.binding, 0);
        assert_eq!(binding.stride, 32);
        assert_eq!(binding.input_rate, vk::VertexInputRate::VERTEX);

        let attrs = VertexPtn::attribute_descriptions();
        assert_eq!(attrs.len(), VertexPtn::ATTRIBUTE_COUNT);
        assert_eq!(attrs[0].offset, 0);
        assert_eq!(attrs[1].offset, 12);
        assert_eq!(attrs[1].format, vk::Format::R32G32_SFLOAT);
        assert_eq!(attrs[2].offset, 20);
        assert_eq!(attrs[2].location, 2);
    }

    #[test]
    fn test_pctn_layout() {
        assert_eq!(std::mem::size_of::<VertexPctn>(), 44);

        let attrs = VertexPctn::attribute_descriptions();
        assert_eq!(attrs.len(), VertexPctn::ATTRIBUTE_COUNT);
        let offsets: Vec<u32> = attrs.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24, 32]);
        assert!(attrs.iter().all(|a| a.binding == 0));
    }

    #[test]
    fn test_vertices_cast_to_bytes() {
        let vertices = [
            VertexPtn::new(Vec3::ZERO, Vec2::ZERO, Vec3::Z),
            VertexPtn::new(Vec3::X, Vec2::X, Vec3::Z),
        ];
        let bytes: &[u8] = bytemuck::cast_slice(&vertices);
        assert_eq!(bytes.len(), 64);
    }
}
