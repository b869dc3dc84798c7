//! Vertex and index data for the sample geometry

use bytemuck::Pod;

use crate::backend::types::{ColorVertex, PrimitiveTopology, TexturedVertex, VertexBufferLayout};

/// Geometry for one draw call
#[derive(Debug, Clone, PartialEq)]
pub struct MeshData<V> {
    pub vertices: Vec<V>,
    pub indices: Option<Vec<u16>>,
    pub topology: PrimitiveTopology,
}

impl<V: Pod> MeshData<V> {
    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    pub fn index_count(&self) -> Option<u32> {
        self.indices.as_ref().map(|indices| indices.len() as u32)
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }
}

/// Vertex data with its buffer layout erased, as consumed by the renderer
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub layout: VertexBufferLayout,
    pub vertex_bytes: Vec<u8>,
    pub vertex_count: u32,
    pub indices: Option<Vec<u16>>,
    pub topology: PrimitiveTopology,
}

impl From<MeshData<ColorVertex>> for Geometry {
    fn from(mesh: MeshData<ColorVertex>) -> Self {
        Self {
            layout: ColorVertex::layout(),
            vertex_bytes: mesh.vertex_bytes().to_vec(),
            vertex_count: mesh.vertex_count(),
            indices: mesh.indices,
            topology: mesh.topology,
        }
    }
}

impl From<MeshData<TexturedVertex>> for Geometry {
    fn from(mesh: MeshData<TexturedVertex>) -> Self {
        Self {
            layout: TexturedVertex::layout(),
            vertex_bytes: mesh.vertex_bytes().to_vec(),
            vertex_count: mesh.vertex_count(),
            indices: mesh.indices,
            topology: mesh.topology,
        }
    }
}

const RED: [f32; 4] = [1.0, 0.0, 0.0, 1.0];
const GREEN: [f32; 4] = [0.0, 1.0, 0.0, 1.0];
const BLUE: [f32; 4] = [0.0, 0.0, 1.0, 1.0];

/// Three-vertex triangle with one primary color per corner
pub fn triangle() -> MeshData<ColorVertex> {
    MeshData {
        vertices: vec![
            ColorVertex {
                position: [-0.5, 0.5, 0.0],
                color: BLUE,
            },
            ColorVertex {
                position: [0.5, 0.5, 0.0],
                color: GREEN,
            },
            ColorVertex {
                position: [0.0, -0.5, 0.0],
                color: RED,
            },
        ],
        indices: None,
        topology: PrimitiveTopology::TriangleList,
    }
}

/// Unit quad drawn as a four-vertex strip, uv origin at the top left
pub fn quad() -> MeshData<TexturedVertex> {
    MeshData {
        vertices: vec![
            TexturedVertex {
                position: [-0.5, 0.5, 0.0],
                uv: [0.0, 0.0],
            },
            TexturedVertex {
                position: [0.5, 0.5, 0.0],
                uv: [1.0, 0.0],
            },
            TexturedVertex {
                position: [-0.5, -0.5, 0.0],
                uv: [0.0, 1.0],
            },
            TexturedVertex {
                position: [0.5, -0.5, 0.0],
                uv: [1.0, 1.0],
            },
        ],
        indices: None,
        topology: PrimitiveTopology::TriangleStrip,
    }
}

/// Unit cube with one flat color per face, 24 vertices and 36 indices
pub fn cube() -> MeshData<ColorVertex> {
    // Corners of each face, counter-clockwise seen from outside
    let faces: [([[f32; 3]; 4], [f32; 4]); 6] = [
        // +Z
        (
            [[-0.5, -0.5, 0.5], [0.5, -0.5, 0.5], [0.5, 0.5, 0.5], [-0.5, 0.5, 0.5]],
            RED,
        ),
        // -Z
        (
            [[0.5, -0.5, -0.5], [-0.5, -0.5, -0.5], [-0.5, 0.5, -0.5], [0.5, 0.5, -0.5]],
            GREEN,
        ),
        // +X
        (
            [[0.5, -0.5, 0.5], [0.5, -0.5, -0.5], [0.5, 0.5, -0.5], [0.5, 0.5, 0.5]],
            BLUE,
        ),
        // -X
        (
            [[-0.5, -0.5, -0.5], [-0.5, -0.5, 0.5], [-0.5, 0.5, 0.5], [-0.5, 0.5, -0.5]],
            [1.0, 1.0, 0.0, 1.0],
        ),
        // +Y
        (
            [[-0.5, 0.5, 0.5], [0.5, 0.5, 0.5], [0.5, 0.5, -0.5], [-0.5, 0.5, -0.5]],
            [0.0, 1.0, 1.0, 1.0],
        ),
        // -Y
        (
            [[-0.5, -0.5, -0.5], [0.5, -0.5, -0.5], [0.5, -0.5, 0.5], [-0.5, -0.5, 0.5]],
            [1.0, 0.0, 1.0, 1.0],
        ),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (corners, color) in faces {
        let base = vertices.len() as u16;
        vertices.extend(corners.iter().map(|&position| ColorVertex { position, color }));
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    MeshData {
        vertices,
        indices: Some(indices),
        topology: PrimitiveTopology::TriangleList,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_counts() {
        let cube = cube();
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.index_count(), Some(36));
        assert!(cube
            .indices
            .as_ref()
            .unwrap()
            .iter()
            .all(|&i| (i as u32) < cube.vertex_count()));
    }

    #[test]
    fn test_geometry_bytes() {
        let geometry = Geometry::from(triangle());
        assert_eq!(geometry.vertex_count, 3);
        assert_eq!(geometry.vertex_bytes.len(), 3 * 28);
        assert_eq!(geometry.layout.array_stride, 28);

        let geometry = Geometry::from(quad());
        assert_eq!(geometry.vertex_bytes.len(), 4 * 20);
        assert_eq!(geometry.topology, PrimitiveTopology::TriangleStrip);
    }
}
