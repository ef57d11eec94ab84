//! Demo geometry: a unit cube, a checkerboard texture and the drawable
//! that binds them through the simple material.

use std::cell::RefCell;
use std::rc::Rc;

use ash::vk;
use glam::{Mat4, Vec2, Vec3};

use vkframe_renderer::{Drawable, OBJECT_SET_INDEX, ObjectUbo, Renderer, SetupId};
use vkframe_rhi::RhiResult;
use vkframe_rhi::buffer::{Buffer, BufferUsage};
use vkframe_rhi::command::CommandBuffer;
use vkframe_rhi::descriptor::{write_combined_image_sampler, write_uniform_buffer};
use vkframe_rhi::image::Texture;
use vkframe_rhi::upload::upload_slice;
use vkframe_rhi::vertex::VertexPtn;

use crate::material::{OBJECT_UBO_BINDING, TEXTURE_BINDING};

/// CPU-side indexed triangle list.
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub vertices: Vec<VertexPtn>,
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Axis-aligned cube of edge 1 centered at the origin, four vertices per
    /// face so each face has its own normal and full texture.
    pub fn cube() -> Self {
        // (normal, u axis, v axis)
        let faces = [
            (Vec3::X, Vec3::NEG_Z, Vec3::NEG_Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::NEG_Y),
            (Vec3::Y, Vec3::X, Vec3::Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::NEG_Z),
            (Vec3::Z, Vec3::X, Vec3::NEG_Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::NEG_Y),
        ];
        let corners = [
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(0.0, 1.0),
        ];

        let mut mesh = Self::default();
        for (normal, u_axis, v_axis) in faces {
            let base = mesh.vertices.len() as u32;
            for uv in corners {
                let position =
                    normal * 0.5 + u_axis * (uv.x - 0.5) + v_axis * (uv.y - 0.5);
                mesh.vertices.push(VertexPtn::new(position, uv, normal));
            }
            // Counter-clockwise seen from outside.
            mesh.indices
                .extend_from_slice(&[base, base + 2, base + 1, base, base + 3, base + 2]);
        }
        mesh
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }
}

/// RGBA8 checkerboard of `size`x`size` texels with `cells` squares per side.
pub fn checkerboard(size: u32, cells: u32) -> Vec<u8> {
    const LIGHT: [u8; 4] = [230, 230, 230, 255];
    const DARK: [u8; 4] = [40, 90, 160, 255];

    let cell = (size / cells.max(1)).max(1);
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let texel = if (x / cell + y / cell) % 2 == 0 {
                LIGHT
            } else {
                DARK
            };
            pixels.extend_from_slice(&texel);
        }
    }
    pixels
}

/// A mesh drawn through the simple material with its own transform per frame.
pub struct TexturedMesh {
    setup: SetupId,
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    index_count: u32,
    object_ubos: RefCell<Vec<Buffer>>,
    object_sets: Vec<vk::DescriptorSet>,
    _texture: Rc<Texture>,
}

impl TexturedMesh {
    /// Uploads `mesh` and allocates one object set per frame in flight from
    /// the setup's pool.
    pub fn new(
        renderer: &Renderer,
        setup: SetupId,
        mesh: &MeshData,
        texture: Rc<Texture>,
    ) -> vkframe_renderer::Result<Self> {
        let device = renderer.device();
        let transfer = renderer.transfer();

        let vertex_buffer = upload_slice(device, transfer, BufferUsage::Vertex, &mesh.vertices)?;
        let index_buffer = upload_slice(device, transfer, BufferUsage::Index, &mesh.indices)?;

        let object_sets = renderer
            .setup(setup)
            .ok_or(vkframe_renderer::RendererError::UnknownSetup(setup))?
            .allocate_object_sets(renderer.frames_in_flight())?;

        let mut object_ubos = Vec::with_capacity(object_sets.len());
        for &set in &object_sets {
            let mut ubo = Buffer::with_usage(
                device.clone(),
                BufferUsage::Uniform,
                ObjectUbo::SIZE as vk::DeviceSize,
            )?;
            ubo.write_pod(0, &ObjectUbo::new(Mat4::IDENTITY))?;
            write_uniform_buffer(device.as_ref(), set, OBJECT_UBO_BINDING, ubo.descriptor_info());
            write_combined_image_sampler(
                device.as_ref(),
                set,
                TEXTURE_BINDING,
                texture.descriptor_info(),
            );
            object_ubos.push(ubo);
        }

        Ok(Self {
            setup,
            vertex_buffer,
            index_buffer,
            index_count: mesh.index_count(),
            object_ubos: RefCell::new(object_ubos),
            object_sets,
            _texture: texture,
        })
    }

    /// Writes the model matrix used when `frame_index` next renders.
    ///
    /// Call after the frame slot has been waited on, e.g. right after
    /// [`Renderer::update_global_uniform`].
    pub fn set_transform(&self, frame_index: usize, model: Mat4) -> RhiResult<()> {
        let mut ubos = self.object_ubos.borrow_mut();
        match ubos.get_mut(frame_index) {
            Some(ubo) => ubo.write_pod(0, &ObjectUbo::new(model)),
            None => Err(vkframe_rhi::RhiError::InvalidHandle(format!(
                "no object uniform for frame {}",
                frame_index
            ))),
        }
    }
}

impl Drawable for TexturedMesh {
    fn setup_id(&self) -> SetupId {
        self.setup
    }

    fn bind(
        &self,
        cmd: &CommandBuffer,
        layout: vk::PipelineLayout,
        frame_index: usize,
    ) -> RhiResult<()> {
        let set = self.object_sets.get(frame_index).copied().ok_or_else(|| {
            vkframe_rhi::RhiError::InvalidHandle(format!("no object set for frame {}", frame_index))
        })?;
        cmd.bind_descriptor_sets(layout, OBJECT_SET_INDEX, &[set]);
        cmd.bind_vertex_buffers(0, &[self.vertex_buffer.handle()]);
        cmd.bind_index_buffer(self.index_buffer.handle(), vk::IndexType::UINT32);
        Ok(())
    }

    fn index_count(&self) -> u32 {
        self.index_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_has_six_textured_faces() {
        let cube = MeshData::cube();
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.index_count(), 36);
        assert!(cube.indices.iter().all(|&i| (i as usize) < cube.vertices.len()));
        assert!(
            cube.vertices
                .iter()
                .all(|v| v.position.abs().max_element() <= 0.5 + f32::EPSILON)
        );
    }

    #[test]
    fn test_cube_triangles_face_outwards() {
        let cube = MeshData::cube();
        for tri in cube.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| cube.vertices[i as usize]);
            let winding = (b.position - a.position).cross(c.position - a.position);
            assert!(winding.dot(a.normal) > 0.0);
        }
    }

    #[test]
    fn test_checkerboard_alternates_cells() {
        let pixels = checkerboard(8, 2);
        assert_eq!(pixels.len(), 8 * 8 * 4);

        let texel = |x: usize, y: usize| &pixels[(y * 8 + x) * 4..(y * 8 + x) * 4 + 4];
        assert_eq!(texel(0, 0), texel(3, 3));
        assert_ne!(texel(0, 0), texel(4, 0));
        assert_eq!(texel(4, 0), texel(0, 4));
        assert!(pixels.chunks_exact(4).all(|t| t[3] == 255));
    }
}
