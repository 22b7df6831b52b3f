//! Edge and contour annotation
//!
//! Smooths the frame with a 5x5 Gaussian, finds edges with Canny, groups
//! edge pixels into contours, keeps only the outermost ones, draws them in
//! green and burns a summary line in red:
//!
//! `size: <bytes> bytes, contours: <count>`

use std::collections::VecDeque;

use super::Transform;
use super::font;
use crate::pipeline::types::Frame;

/// 5-tap Gaussian, sigma 1.5, in 1/256 units; sums to exactly 256 so a
/// uniform image comes out unchanged
const GAUSSIAN: [u32; 5] = [31, 60, 74, 60, 31];
const GAUSSIAN_SHIFT: u32 = 8;

pub const LOW_THRESHOLD: i32 = 100;
pub const HIGH_THRESHOLD: i32 = 200;

pub const CONTOUR_BGR: [u8; 3] = [0, 255, 0];
pub const CONTOUR_THICKNESS: i64 = 2;
pub const TEXT_BGR: [u8; 3] = [0, 0, 255];
pub const TEXT_ORIGIN: (i64, i64) = (10, 30);
pub const TEXT_SCALE: u32 = 2;

/// Reflect an out of range index back into `0..n` without repeating the
/// edge sample
fn reflect(i: isize, n: usize) -> usize {
    let n = n as isize;
    if n == 1 {
        return 0;
    }
    let mut i = i;
    while i < 0 || i >= n {
        i = if i < 0 { -i } else { 2 * (n - 1) - i };
    }
    i as usize
}

/// Single-channel working image
struct Plane {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl Plane {
    fn luma(frame: &Frame) -> Self {
        let (w, h) = (frame.width(), frame.height());
        let mut data = Vec::with_capacity(w as usize * h as usize);
        for y in 0..h {
            for x in 0..w {
                data.push(frame.luma(x, y));
            }
        }
        Self {
            width: w as usize,
            height: h as usize,
            data,
        }
    }

    fn at(&self, x: isize, y: isize) -> u8 {
        self.data[reflect(y, self.height) * self.width + reflect(x, self.width)]
    }

    fn gaussian(&self) -> Self {
        let (w, h) = (self.width, self.height);
        let round = 1u32 << (GAUSSIAN_SHIFT - 1);

        let mut horizontal = vec![0u8; w * h];
        for y in 0..h {
            for x in 0..w {
                let sum: u32 = GAUSSIAN
                    .iter()
                    .enumerate()
                    .map(|(k, weight)| weight * self.at(x as isize + k as isize - 2, y as isize) as u32)
                    .sum();
                horizontal[y * w + x] = ((sum + round) >> GAUSSIAN_SHIFT) as u8;
            }
        }
        let horizontal = Plane {
            width: w,
            height: h,
            data: horizontal,
        };

        let mut data = vec![0u8; w * h];
        for y in 0..h {
            for x in 0..w {
                let sum: u32 = GAUSSIAN
                    .iter()
                    .enumerate()
                    .map(|(k, weight)| {
                        weight * horizontal.at(x as isize, y as isize + k as isize - 2) as u32
                    })
                    .sum();
                data[y * w + x] = ((sum + round) >> GAUSSIAN_SHIFT) as u8;
            }
        }
        Plane {
            width: w,
            height: h,
            data,
        }
    }

    /// Canny edge map: 1 for edge pixels, 0 elsewhere
    fn canny(&self, low: i32, high: i32) -> Vec<u8> {
        let (w, h) = (self.width, self.height);
        let mut gx = vec![0i32; w * h];
        let mut gy = vec![0i32; w * h];
        let mut magnitude = vec![0i32; w * h];

        for y in 0..h {
            for x in 0..w {
                let p = |dx: isize, dy: isize| self.at(x as isize + dx, y as isize + dy) as i32;
                let sx = (p(1, -1) + 2 * p(1, 0) + p(1, 1)) - (p(-1, -1) + 2 * p(-1, 0) + p(-1, 1));
                let sy = (p(-1, 1) + 2 * p(0, 1) + p(1, 1)) - (p(-1, -1) + 2 * p(0, -1) + p(1, -1));
                let i = y * w + x;
                gx[i] = sx;
                gy[i] = sy;
                magnitude[i] = sx.abs() + sy.abs();
            }
        }

        // non-maximum suppression along the quantised gradient direction
        const STRONG: u8 = 2;
        const WEAK: u8 = 1;
        let mag = |x: isize, y: isize| -> i32 {
            if x < 0 || y < 0 || x >= w as isize || y >= h as isize {
                0
            } else {
                magnitude[y as usize * w + x as usize]
            }
        };
        let mut marks = vec![0u8; w * h];
        for y in 0..h {
            for x in 0..w {
                let i = y * w + x;
                let m = magnitude[i];
                if m <= low {
                    continue;
                }
                let (ax, ay) = (gx[i].abs() as i64, gy[i].abs() as i64);
                let (xi, yi) = (x as isize, y as isize);
                // tan(22.5°) ≈ 0.4142, tan(67.5°) ≈ 2.4142, in 1/10000
                let (a, b) = if ay * 10_000 <= ax * 4_142 {
                    (mag(xi - 1, yi), mag(xi + 1, yi))
                } else if ay * 10_000 >= ax * 24_142 {
                    (mag(xi, yi - 1), mag(xi, yi + 1))
                } else if (gx[i] > 0) == (gy[i] > 0) {
                    (mag(xi - 1, yi - 1), mag(xi + 1, yi + 1))
                } else {
                    (mag(xi + 1, yi - 1), mag(xi - 1, yi + 1))
                };
                if m > a && m >= b {
                    marks[i] = if m > high { STRONG } else { WEAK };
                }
            }
        }

        // hysteresis: keep weak pixels 8-connected to a strong one
        let mut edges = vec![0u8; w * h];
        let mut queue: VecDeque<usize> = VecDeque::new();
        for (i, &mark) in marks.iter().enumerate() {
            if mark == STRONG {
                edges[i] = 1;
                queue.push_back(i);
            }
        }
        while let Some(i) = queue.pop_front() {
            for j in neighbours8(i, w, h) {
                if edges[j] == 0 && marks[j] != 0 {
                    edges[j] = 1;
                    queue.push_back(j);
                }
            }
        }
        edges
    }
}

fn neighbours8(i: usize, w: usize, h: usize) -> impl Iterator<Item = usize> {
    let (x, y) = ((i % w) as isize, (i / w) as isize);
    (-1isize..=1)
        .flat_map(move |dy| (-1isize..=1).map(move |dx| (x + dx, y + dy)))
        .filter(move |&(nx, ny)| {
            (nx, ny) != (x, y) && nx >= 0 && ny >= 0 && nx < w as isize && ny < h as isize
        })
        .map(move |(nx, ny)| ny as usize * w + nx as usize)
}

fn neighbours4(i: usize, w: usize, h: usize) -> impl Iterator<Item = usize> {
    let (x, y) = ((i % w) as isize, (i / w) as isize);
    [(-1isize, 0isize), (1, 0), (0, -1), (0, 1)]
        .into_iter()
        .map(move |(dx, dy)| (x + dx, y + dy))
        .filter(move |&(nx, ny)| nx >= 0 && ny >= 0 && nx < w as isize && ny < h as isize)
        .map(move |(nx, ny)| ny as usize * w + nx as usize)
}

/// Outer contours of an edge map, each as the list of its boundary pixels
/// (row-major indices)
pub fn external_contours(edges: &[u8], w: usize, h: usize) -> Vec<Vec<usize>> {
    if w == 0 || h == 0 {
        return Vec::new();
    }

    // background reachable from the frame border
    let mut outside = vec![false; w * h];
    let mut queue: VecDeque<usize> = VecDeque::new();
    for i in 0..w * h {
        let (x, y) = (i % w, i / w);
        let on_border = x == 0 || y == 0 || x == w - 1 || y == h - 1;
        if on_border && edges[i] == 0 {
            outside[i] = true;
            queue.push_back(i);
        }
    }
    while let Some(i) = queue.pop_front() {
        for j in neighbours4(i, w, h) {
            if !outside[j] && edges[j] == 0 {
                outside[j] = true;
                queue.push_back(j);
            }
        }
    }

    // 8-connected edge components; external ones touch the outside
    let mut label = vec![0u32; w * h];
    let mut contours = Vec::new();
    let mut next = 0u32;
    for start in 0..w * h {
        if edges[start] == 0 || label[start] != 0 {
            continue;
        }
        next += 1;
        label[start] = next;
        let mut component = vec![start];
        let mut cursor = 0;
        while cursor < component.len() {
            let i = component[cursor];
            cursor += 1;
            for j in neighbours8(i, w, h) {
                if edges[j] != 0 && label[j] == 0 {
                    label[j] = next;
                    component.push(j);
                }
            }
        }

        let boundary: Vec<usize> = component
            .into_iter()
            .filter(|&i| {
                let (x, y) = (i % w, i / w);
                x == 0 || y == 0 || x == w - 1 || y == h - 1 || neighbours4(i, w, h).any(|j| outside[j])
            })
            .collect();
        if !boundary.is_empty() {
            contours.push(boundary);
        }
    }
    contours
}

/// Reference analysis transform
#[derive(Debug, Clone)]
pub struct EdgeTransform {
    low: i32,
    high: i32,
}

impl EdgeTransform {
    pub fn new() -> Self {
        Self::with_thresholds(LOW_THRESHOLD, HIGH_THRESHOLD)
    }

    pub fn with_thresholds(low: i32, high: i32) -> Self {
        Self { low, high }
    }

    /// Summary line burned into the frame
    pub fn annotation(size: usize, contours: usize) -> String {
        format!("size: {} bytes, contours: {}", size, contours)
    }

    /// Region (x, y, width, height) the annotation may cover
    pub fn annotation_bounds(text: &str) -> (i64, i64, u32, u32) {
        let (w, h) = font::text_size(text, TEXT_SCALE);
        (TEXT_ORIGIN.0, TEXT_ORIGIN.1 - h as i64, w, h)
    }

    /// Outer contours of `frame`
    pub fn contours(&self, frame: &Frame) -> Vec<Vec<usize>> {
        let plane = Plane::luma(frame).gaussian();
        let edges = plane.canny(self.low, self.high);
        external_contours(&edges, plane.width, plane.height)
    }
}

impl Default for EdgeTransform {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for EdgeTransform {
    fn name(&self) -> &'static str {
        "edges"
    }

    fn apply(&self, frame: &Frame) -> Frame {
        if frame.is_empty() {
            return Frame::empty(frame.format());
        }

        let contours = self.contours(frame);
        let mut out = frame.to_packed();
        let w = frame.width() as usize;
        for contour in &contours {
            for &i in contour {
                let (x, y) = ((i % w) as i64, (i / w) as i64);
                for dy in 0..CONTOUR_THICKNESS {
                    for dx in 0..CONTOUR_THICKNESS {
                        out.put_bgr(x + dx, y + dy, CONTOUR_BGR);
                    }
                }
            }
        }

        let size = frame.area() as usize * frame.format().bytes_per_pixel();
        let text = Self::annotation(size, contours.len());
        font::draw_text(&mut out, &text, TEXT_ORIGIN.0, TEXT_ORIGIN.1, TEXT_SCALE, TEXT_BGR);
        out
    }
}
