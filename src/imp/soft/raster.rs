// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Primitive assembly and scan conversion.

Clip-space positions go through the perspective divide and the viewport transform for a
viewport covering the whole target, with y pointing down in window space.  Samples sit at
pixel centers.  Triangles are scan converted with edge functions and no face culling;
varyings are interpolated perspective-correctly.  Lines are stepped with a DDA and points
cover the single pixel they land in.

Primitives with a vertex at or behind the eye (`w <= 0`) are dropped rather than clipped,
and fragments outside the `[0, 1]` depth range are discarded.
*/

use crate::types::PrimitiveType;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Vertex {
    /// Clip-space position.
    pub(crate) position: [f32; 4],
    pub(crate) varyings: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Fragment {
    pub(crate) x: usize,
    pub(crate) y: usize,
    /// Window-space position: pixel center, depth, and `1/w`.
    pub(crate) position: [f32; 4],
    pub(crate) varyings: Vec<f32>,
}

/// A vertex after the viewport transform.
#[derive(Debug, Clone, Copy)]
struct Window {
    x: f32,
    y: f32,
    z: f32,
    inv_w: f32,
}

fn to_window(v: &Vertex, width: usize, height: usize) -> Option<Window> {
    let [x, y, z, w] = v.position;
    if w <= 0.0 || !w.is_finite() {
        return None;
    }
    let inv_w = 1.0 / w;
    Some(Window {
        x: (x * inv_w + 1.0) * 0.5 * width as f32,
        y: (1.0 - y * inv_w) * 0.5 * height as f32,
        z: z * inv_w,
        inv_w,
    })
}

/// Groups the vertex stream into primitives, as index lists.
pub(crate) fn assemble(primitive: PrimitiveType, count: usize) -> Vec<Vec<usize>> {
    match primitive {
        PrimitiveType::Point => (0..count).map(|i| vec![i]).collect(),
        PrimitiveType::Line => (0..count / 2).map(|i| vec![2 * i, 2 * i + 1]).collect(),
        PrimitiveType::LineStrip => (1..count).map(|i| vec![i - 1, i]).collect(),
        PrimitiveType::Triangle => (0..count / 3)
            .map(|i| vec![3 * i, 3 * i + 1, 3 * i + 2])
            .collect(),
        PrimitiveType::TriangleStrip => (2..count)
            .map(|i| {
                // keep a consistent winding across the strip
                if i % 2 == 0 {
                    vec![i - 2, i - 1, i]
                } else {
                    vec![i - 1, i - 2, i]
                }
            })
            .collect(),
    }
}

/// Interpolates varyings with perspective-correct weights.  `weights` are screen-space
/// barycentrics; they are corrected by each vertex's `1/w`.
fn interpolate(vertices: &[&Vertex], windows: &[Window], weights: &[f32]) -> (f32, f32, Vec<f32>) {
    let z: f32 = windows.iter().zip(weights).map(|(w, b)| w.z * b).sum();
    let inv_w: f32 = windows.iter().zip(weights).map(|(w, b)| w.inv_w * b).sum();
    let len = vertices.iter().map(|v| v.varyings.len()).min().unwrap_or(0);
    let mut varyings = vec![0.0; len];
    if inv_w != 0.0 {
        for ((v, w), b) in vertices.iter().zip(windows).zip(weights) {
            let k = b * w.inv_w / inv_w;
            for (out, value) in varyings.iter_mut().zip(&v.varyings) {
                *out += value * k;
            }
        }
    }
    (z, inv_w, varyings)
}

/// Scan converts one assembled primitive, calling `emit` for each covered pixel.
pub(crate) fn rasterize<E>(
    vertices: &[&Vertex],
    width: usize,
    height: usize,
    emit: &mut impl FnMut(Fragment) -> Result<(), E>,
) -> Result<(), E> {
    let mut windows = Vec::with_capacity(vertices.len());
    for v in vertices {
        match to_window(v, width, height) {
            Some(w) => windows.push(w),
            None => return Ok(()),
        }
    }
    let mut shade = |x: usize, y: usize, weights: &[f32]| -> Result<(), E> {
        let (z, inv_w, varyings) = interpolate(vertices, &windows, weights);
        if !(0.0..=1.0).contains(&z) {
            return Ok(());
        }
        emit(Fragment {
            x,
            y,
            position: [x as f32 + 0.5, y as f32 + 0.5, z, inv_w],
            varyings,
        })
    };
    match windows.as_slice() {
        [p] => {
            let (x, y) = (p.x.floor(), p.y.floor());
            if x >= 0.0 && y >= 0.0 && (x as usize) < width && (y as usize) < height {
                shade(x as usize, y as usize, &[1.0])?;
            }
            Ok(())
        }
        [a, b] => {
            let (dx, dy) = (b.x - a.x, b.y - a.y);
            let steps = dx.abs().max(dy.abs()).ceil().max(1.0) as usize;
            let mut last = None;
            for i in 0..=steps {
                let t = i as f32 / steps as f32;
                let (x, y) = ((a.x + dx * t).floor(), (a.y + dy * t).floor());
                if x < 0.0 || y < 0.0 || x as usize >= width || y as usize >= height {
                    continue;
                }
                let pixel = (x as usize, y as usize);
                if last == Some(pixel) {
                    continue;
                }
                last = Some(pixel);
                shade(pixel.0, pixel.1, &[1.0 - t, t])?;
            }
            Ok(())
        }
        [a, b, c] => {
            let edge = |p: &Window, q: &Window, x: f32, y: f32| {
                (q.x - p.x) * (y - p.y) - (q.y - p.y) * (x - p.x)
            };
            let area = edge(a, b, c.x, c.y);
            if area == 0.0 || !area.is_finite() {
                return Ok(());
            }
            let clamp = |v: f32, limit: usize| v.max(0.0).min(limit as f32) as usize;
            let x0 = clamp(a.x.min(b.x).min(c.x).floor(), width);
            let x1 = clamp(a.x.max(b.x).max(c.x).ceil(), width);
            let y0 = clamp(a.y.min(b.y).min(c.y).floor(), height);
            let y1 = clamp(a.y.max(b.y).max(c.y).ceil(), height);
            for y in y0..y1 {
                for x in x0..x1 {
                    let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
                    let w0 = edge(b, c, px, py) / area;
                    let w1 = edge(c, a, px, py) / area;
                    let w2 = edge(a, b, px, py) / area;
                    if w0 >= 0.0 && w1 >= 0.0 && w2 >= 0.0 {
                        shade(x, y, &[w0, w1, w2])?;
                    }
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex(x: f32, y: f32, varying: f32) -> Vertex {
        Vertex {
            position: [x, y, 0.0, 1.0],
            varyings: vec![varying],
        }
    }

    fn collect(vertices: &[Vertex], width: usize, height: usize) -> Vec<Fragment> {
        let refs: Vec<&Vertex> = vertices.iter().collect();
        let mut out = Vec::new();
        rasterize::<()>(&refs, width, height, &mut |f| {
            out.push(f);
            Ok(())
        })
        .unwrap();
        out
    }

    #[test]
    fn assembles_strips_and_lists() {
        assert_eq!(assemble(PrimitiveType::Triangle, 7).len(), 2);
        assert_eq!(
            assemble(PrimitiveType::TriangleStrip, 4),
            [vec![0, 1, 2], vec![2, 1, 3]]
        );
        assert_eq!(assemble(PrimitiveType::LineStrip, 3), [vec![0, 1], vec![1, 2]]);
        assert_eq!(assemble(PrimitiveType::Line, 3), [vec![0, 1]]);
    }

    #[test]
    fn full_screen_triangle_covers_every_pixel_once() {
        let fragments = collect(
            &[vertex(-1.0, -1.0, 0.0), vertex(3.0, -1.0, 0.0), vertex(-1.0, 3.0, 0.0)],
            4,
            4,
        );
        assert_eq!(fragments.len(), 16);
        // y is flipped: clip-space top is window row 0
        let top_left = fragments.iter().find(|f| f.x == 0 && f.y == 0).unwrap();
        assert_eq!(top_left.position[..2], [0.5, 0.5]);
    }

    #[test]
    fn winding_does_not_cull_and_varyings_interpolate() {
        let (a, b, c) = (
            vertex(-1.0, -1.0, 0.0),
            vertex(1.0, -1.0, 1.0),
            vertex(-1.0, 1.0, 0.0),
        );
        let ccw = collect(&[a.clone(), b.clone(), c.clone()], 8, 8);
        let cw = collect(&[a, c, b], 8, 8);
        assert_eq!(ccw.len(), cw.len());
        assert!(!ccw.is_empty());
        for f in &ccw {
            let expected = f.position[0] / 8.0;
            assert!((f.varyings[0] - expected).abs() < 1e-4);
        }
    }

    #[test]
    fn behind_the_eye_is_dropped() {
        let mut v = vertex(0.0, 0.0, 0.0);
        v.position[3] = 0.0;
        assert!(collect(&[v, vertex(1.0, 0.0, 0.0), vertex(0.0, 1.0, 0.0)], 4, 4).is_empty());
        let point = collect(&[vertex(0.0, 0.0, 0.0)], 4, 4);
        assert_eq!((point[0].x, point[0].y), (2, 2));
    }
}
