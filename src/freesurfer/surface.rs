//! FreeSurfer binary triangle surfaces
//!
//! Layout: a 3-byte magic (0xFF 0xFF 0xFE), a creator comment terminated
//! by "\n\n", then big-endian vertex and face counts followed by the
//! vertex coordinates (f32 surface-RAS mm) and triangle indices (i32).

use std::path::Path;

use crate::error::{ExtractError, Result};

const TRIANGLE_MAGIC: [u8; 3] = [0xff, 0xff, 0xfe];

/// A cortical surface mesh in surface-RAS millimetres.
#[derive(Debug, Clone)]
pub struct Surface {
    pub vertices: Vec<[f64; 3]>,
    pub faces: Vec<[usize; 3]>,
}

impl Surface {
    /// Outward-pointing unit normal at each vertex: area-weighted average
    /// of adjacent face normals, renormalized.
    pub fn vertex_normals(&self) -> Vec<[f64; 3]> {
        let mut normals: Vec<[f64; 3]> = vec![[0.0, 0.0, 0.0]; self.vertices.len()];

        for &[i0, i1, i2] in &self.faces {
            let v0 = self.vertices[i0];
            let v1 = self.vertices[i1];
            let v2 = self.vertices[i2];

            let e1 = [v1[0] - v0[0], v1[1] - v0[1], v1[2] - v0[2]];
            let e2 = [v2[0] - v0[0], v2[1] - v0[1], v2[2] - v0[2]];

            // Face normal (cross product), left unnormalized so larger
            // faces weigh more
            let fx = e1[1] * e2[2] - e1[2] * e2[1];
            let fy = e1[2] * e2[0] - e1[0] * e2[2];
            let fz = e1[0] * e2[1] - e1[1] * e2[0];

            for &idx in &[i0, i1, i2] {
                normals[idx][0] += fx;
                normals[idx][1] += fy;
                normals[idx][2] += fz;
            }
        }

        for n in normals.iter_mut() {
            let norm = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
            if norm > 1e-10 {
                n[0] /= norm;
                n[1] /= norm;
                n[2] /= norm;
            }
        }

        normals
    }
}

struct BeReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    origin: &'a Path,
}

impl<'a> BeReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(ExtractError::parse(self.origin, "unexpected end of file"));
        }
        let s = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32(&mut self) -> Result<f32> {
        let b = self.take(4)?;
        Ok(f32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Parse a binary triangle surface from bytes.
pub fn load_surface(bytes: &[u8], origin: &Path) -> Result<Surface> {
    if bytes.len() < 3 || bytes[0..3] != TRIANGLE_MAGIC {
        return Err(ExtractError::parse(origin, "not a FreeSurfer triangle surface (bad magic)"));
    }

    // Creator comment ends at the first "\n\n" after the magic
    let mut pos = 3;
    while pos + 1 < bytes.len() && !(bytes[pos] == b'\n' && bytes[pos + 1] == b'\n') {
        pos += 1;
    }
    if pos + 1 >= bytes.len() {
        return Err(ExtractError::parse(origin, "truncated surface header"));
    }
    let mut r = BeReader {
        bytes,
        pos: pos + 2,
        origin,
    };

    let nv = r.i32()?;
    let nf = r.i32()?;
    if nv < 0 || nf < 0 {
        return Err(ExtractError::parse(origin, "negative vertex or face count"));
    }
    let (nv, nf) = (nv as usize, nf as usize);

    let mut vertices = Vec::with_capacity(nv);
    for _ in 0..nv {
        let x = r.f32()? as f64;
        let y = r.f32()? as f64;
        let z = r.f32()? as f64;
        vertices.push([x, y, z]);
    }

    let mut faces = Vec::with_capacity(nf);
    for _ in 0..nf {
        let a = r.i32()?;
        let b = r.i32()?;
        let c = r.i32()?;
        if a < 0 || b < 0 || c < 0 || a as usize >= nv || b as usize >= nv || c as usize >= nv {
            return Err(ExtractError::parse(origin, "face index out of range"));
        }
        faces.push([a as usize, b as usize, c as usize]);
    }

    Ok(Surface { vertices, faces })
}

/// Read a binary triangle surface from disk.
pub fn read_surface(path: &Path) -> Result<Surface> {
    let bytes = std::fs::read(path).map_err(|e| ExtractError::io(path, e))?;
    load_surface(&bytes, path)
}

/// Serialize a surface in the binary triangle format.
///
/// The pipeline only reads surfaces; the writer exists so tests can
/// synthesize small anatomical inputs.
pub fn write_surface(path: &Path, surface: &Surface) -> Result<()> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&TRIANGLE_MAGIC);
    bytes.extend_from_slice(b"created by fsub-core\n\n");
    bytes.extend_from_slice(&(surface.vertices.len() as i32).to_be_bytes());
    bytes.extend_from_slice(&(surface.faces.len() as i32).to_be_bytes());
    for v in &surface.vertices {
        for c in v {
            bytes.extend_from_slice(&(*c as f32).to_be_bytes());
        }
    }
    for f in &surface.faces {
        for i in f {
            bytes.extend_from_slice(&(*i as i32).to_be_bytes());
        }
    }
    std::fs::write(path, &bytes).map_err(|e| ExtractError::io(path, e))
}
