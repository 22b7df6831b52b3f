//! Frame transforms applied between decode and encode
//!
//! A transform is a pure function from one frame to a new frame. The relay
//! never inspects what a transform does; it only asks it for the caps of its
//! output so the transmit side can be negotiated accordingly.

pub mod edges;
pub mod font;
pub mod square;

use std::sync::Arc;

use crate::config::{TransformConfig, TransformKind};
use crate::pipeline::caps::CapsDescriptor;
use crate::pipeline::types::Frame;

pub use edges::EdgeTransform;
pub use square::SquareTransform;

pub trait Transform: Send + Sync {
    fn name(&self) -> &'static str;

    /// Produce a new frame from `frame`; an empty input yields an empty output
    fn apply(&self, frame: &Frame) -> Frame;

    /// Caps of frames returned by [`Transform::apply`] for `input`
    fn output_caps(&self, input: &CapsDescriptor) -> CapsDescriptor {
        *input
    }
}

/// Returns a copy of every frame
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl Transform for Passthrough {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn apply(&self, frame: &Frame) -> Frame {
        if frame.is_empty() {
            return Frame::empty(frame.format());
        }
        frame.to_packed()
    }
}

/// Adapts a closure into a geometry-preserving transform
pub struct FnTransform<F> {
    name: &'static str,
    f: F,
}

impl<F> FnTransform<F>
where
    F: Fn(&Frame) -> Frame + Send + Sync,
{
    pub fn new(name: &'static str, f: F) -> Self {
        Self { name, f }
    }
}

impl<F> Transform for FnTransform<F>
where
    F: Fn(&Frame) -> Frame + Send + Sync,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn apply(&self, frame: &Frame) -> Frame {
        if frame.is_empty() {
            return Frame::empty(frame.format());
        }
        (self.f)(frame)
    }
}

pub fn from_config(config: &TransformConfig) -> Arc<dyn Transform> {
    match config.kind {
        TransformKind::None => Arc::new(Passthrough),
        TransformKind::Edges => Arc::new(EdgeTransform::new()),
        TransformKind::Square => Arc::new(SquareTransform::new(config.square_method)),
    }
}
