//! Drawable objects and the per-setup draw registry.

use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use ash::vk;

use vkframe_rhi::RhiResult;
use vkframe_rhi::command::CommandBuffer;

use crate::error::{RendererError, Result};
use crate::setup::SetupId;

/// Anything the renderer can draw with one indexed draw call.
///
/// The object owns its vertex, index and descriptor resources and binds
/// them itself; the renderer only issues the draw.
pub trait Drawable {
    /// The setup this object renders through.
    fn setup_id(&self) -> SetupId;

    /// Binds the per-object descriptor set (set 1), vertex buffer and index buffer.
    fn bind(
        &self,
        cmd: &CommandBuffer,
        layout: vk::PipelineLayout,
        frame_index: usize,
    ) -> RhiResult<()>;

    fn index_count(&self) -> u32;
}

/// Drawables grouped by setup id, in caller order within each group.
///
/// Entries are weak: the registry never keeps an object alive, and objects
/// dropped since the last [`DrawRegistry::rebuild`] are skipped.
#[derive(Default)]
pub struct DrawRegistry {
    groups: BTreeMap<SetupId, Vec<Weak<dyn Drawable>>>,
}

impl DrawRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the registry contents with `objects`.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::UnknownSetup`] if an object names a setup id
    /// at or above `setup_count`; the registry is left unchanged.
    pub fn rebuild(&mut self, objects: &[Rc<dyn Drawable>], setup_count: usize) -> Result<()> {
        if let Some(object) = objects.iter().find(|o| o.setup_id().index() >= setup_count) {
            return Err(RendererError::UnknownSetup(object.setup_id()));
        }

        self.groups.clear();
        for object in objects {
            self.groups
                .entry(object.setup_id())
                .or_default()
                .push(Rc::downgrade(object));
        }
        Ok(())
    }

    /// Groups in ascending setup id order.
    pub fn groups(&self) -> impl Iterator<Item = (SetupId, &[Weak<dyn Drawable>])> {
        self.groups.iter().map(|(id, objects)| (*id, objects.as_slice()))
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Total number of registered objects.
    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn clear(&mut self) {
        self.groups.clear();
    }
}
