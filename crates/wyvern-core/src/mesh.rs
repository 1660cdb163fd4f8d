//! Vertex and mesh data.

use crate::error::{Error, Result};
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// A single mesh vertex: position plus a per-vertex color.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
#[repr(C)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

impl Vertex {
    /// Byte stride of one vertex in a vertex buffer.
    pub const STRIDE: u32 = std::mem::size_of::<Self>() as u32;

    /// Create a new vertex.
    #[inline]
    pub const fn new(position: [f32; 3], color: [f32; 3]) -> Self {
        Self { position, color }
    }
}

/// Index storage for a mesh.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum IndexData {
    /// Non-indexed mesh, drawn with a plain vertex count.
    #[default]
    None,
    /// 16-bit indices.
    U16(Vec<u16>),
    /// 32-bit indices.
    U32(Vec<u32>),
}

impl IndexData {
    /// Number of indices.
    pub fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::U16(indices) => indices.len(),
            Self::U32(indices) => indices.len(),
        }
    }

    /// Whether there are no indices.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw bytes of the index data, as uploaded to the GPU.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::None => &[],
            Self::U16(indices) => bytemuck::cast_slice(indices),
            Self::U32(indices) => bytemuck::cast_slice(indices),
        }
    }

    fn max_index(&self) -> Option<u32> {
        match self {
            Self::None => None,
            Self::U16(indices) => indices.iter().copied().max().map(u32::from),
            Self::U32(indices) => indices.iter().copied().max(),
        }
    }
}

/// CPU-side mesh: vertices plus optional indices.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: IndexData,
}

impl MeshData {
    /// Create a mesh from vertices and indices.
    pub fn new(vertices: Vec<Vertex>, indices: IndexData) -> Self {
        Self { vertices, indices }
    }

    /// Number of vertices.
    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    /// Number of indices (0 for non-indexed meshes).
    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    /// Raw vertex bytes.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Check that the mesh has vertices and every index refers to one.
    pub fn validate(&self) -> Result<()> {
        if self.vertices.is_empty() {
            return Err(Error::InvalidData("mesh has no vertices".to_string()));
        }
        if let Some(max) = self.indices.max_index() {
            if max as usize >= self.vertices.len() {
                return Err(Error::OutOfBounds(format!(
                    "index {max} exceeds vertex count {}",
                    self.vertices.len()
                )));
            }
        }
        Ok(())
    }

    /// A unit quad in the XY plane made of two triangles (6 indices).
    pub fn quad() -> Self {
        let vertices = vec![
            Vertex::new([-0.5, -0.5, 0.0], [1.0, 0.0, 0.0]),
            Vertex::new([0.5, -0.5, 0.0], [0.0, 1.0, 0.0]),
            Vertex::new([0.5, 0.5, 0.0], [0.0, 0.0, 1.0]),
            Vertex::new([-0.5, 0.5, 0.0], [1.0, 1.0, 1.0]),
        ];
        Self::new(vertices, IndexData::U16(vec![0, 1, 2, 2, 3, 0]))
    }

    /// A unit cube centered on the origin with one color per corner.
    pub fn cube() -> Self {
        let mut vertices = Vec::with_capacity(8);
        for i in 0..8u8 {
            let x = f32::from(i & 1);
            let y = f32::from((i >> 1) & 1);
            let z = f32::from((i >> 2) & 1);
            vertices.push(Vertex::new([x - 0.5, y - 0.5, z - 0.5], [x, y, z]));
        }
        #[rustfmt::skip]
        let indices = vec![
            0, 2, 1, 1, 2, 3, // -Z
            4, 5, 6, 5, 7, 6, // +Z
            0, 1, 4, 1, 5, 4, // -Y
            2, 6, 3, 3, 6, 7, // +Y
            0, 4, 2, 2, 4, 6, // -X
            1, 3, 5, 3, 7, 5, // +X
        ];
        Self::new(vertices, IndexData::U16(indices))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout() {
        assert_eq!(Vertex::STRIDE, 24);
        assert_eq!(std::mem::align_of::<Vertex>(), 4);
    }

    #[test]
    fn quad_is_valid() {
        let quad = MeshData::quad();
        quad.validate().unwrap();
        assert_eq!(quad.vertex_count(), 4);
        assert_eq!(quad.index_count(), 6);
        assert_eq!(quad.indices.as_bytes().len(), 12);
        assert_eq!(quad.vertex_bytes().len(), 4 * 24);
    }

    #[test]
    fn cube_is_valid() {
        let cube = MeshData::cube();
        cube.validate().unwrap();
        assert_eq!(cube.index_count(), 36);
    }

    #[test]
    fn out_of_range_index_rejected() {
        let mesh = MeshData::new(
            vec![Vertex::default(); 3],
            IndexData::U32(vec![0, 1, 3]),
        );
        assert!(matches!(mesh.validate(), Err(Error::OutOfBounds(_))));
    }

    #[test]
    fn empty_mesh_rejected() {
        assert!(MeshData::default().validate().is_err());
    }

    #[test]
    fn non_indexed_mesh() {
        let mesh = MeshData::new(vec![Vertex::default(); 3], IndexData::None);
        mesh.validate().unwrap();
        assert_eq!(mesh.index_count(), 0);
        assert!(mesh.indices.as_bytes().is_empty());
    }
}
